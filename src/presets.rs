//! Conversion presets: category -> profile label -> ffmpeg params and output
//! extension. Defaults ship with the binary; the user's copy lives in the
//! config dir and wins when present.

use std::collections::BTreeMap;
use std::path::Path;

use quick_xml::Reader;
use quick_xml::events::Event;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

const BUNDLED_PRESETS: &str = include_str!("../presets/default_presets.json");

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preset {
    #[serde(default)]
    pub params: String,
    #[serde(default)]
    pub extension: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PresetCatalog {
    categories: BTreeMap<String, BTreeMap<String, Preset>>,
}

fn non_empty(name: &str) -> Result<&str, AppError> {
    let name = name.trim();
    if name.is_empty() {
        Err(AppError::EmptyName)
    } else {
        Ok(name)
    }
}

impl PresetCatalog {
    /// The presets compiled into the binary.
    pub fn bundled() -> Result<Self, AppError> {
        Ok(serde_json::from_str(BUNDLED_PRESETS)?)
    }

    /// User presets at `user_file` if the file exists and is non-empty,
    /// otherwise the bundled defaults. A malformed user file is logged and
    /// ignored.
    pub fn load(user_file: &Path) -> Self {
        match std::fs::read_to_string(user_file) {
            Ok(json) if !json.trim().is_empty() => match serde_json::from_str(&json) {
                Ok(catalog) => {
                    log::info!(
                        target: "ffqueue::presets",
                        "Loaded presets from {}",
                        user_file.display()
                    );
                    return catalog;
                }
                Err(e) => log::warn!(
                    target: "ffqueue::presets",
                    "Ignoring malformed presets file {}: {}",
                    user_file.display(),
                    e
                ),
            },
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!(
                target: "ffqueue::presets",
                "Cannot read presets file {}: {}",
                user_file.display(),
                e
            ),
        }
        Self::bundled().unwrap_or_else(|e| {
            log::error!(target: "ffqueue::presets", "Bundled presets are invalid: {}", e);
            Self::default()
        })
    }

    /// Writes the catalog as JSON with a two-space indent.
    pub fn save(&self, path: &Path) -> Result<(), AppError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        log::debug!(target: "ffqueue::presets", "Saved presets to {}", path.display());
        Ok(())
    }

    pub fn restore_defaults(&mut self) -> Result<(), AppError> {
        *self = Self::bundled()?;
        Ok(())
    }

    pub fn get(&self, category: &str, profile: &str) -> Option<&Preset> {
        self.categories.get(category)?.get(profile)
    }

    /// Category names, sorted.
    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.categories.keys().map(String::as_str)
    }

    /// Profile labels of `category`, sorted; empty for an unknown category.
    pub fn profiles(&self, category: &str) -> Vec<&str> {
        self.categories
            .get(category)
            .map(|p| p.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn contains_category(&self, category: &str) -> bool {
        self.categories.contains_key(category)
    }

    /// Category name at a combo-box index; negative means nothing selected.
    pub fn category_at(&self, index: i64) -> Option<&str> {
        let index = usize::try_from(index).ok()?;
        self.categories().nth(index)
    }

    pub fn profile_at(&self, category: &str, index: i64) -> Option<&str> {
        let index = usize::try_from(index).ok()?;
        self.categories.get(category)?.keys().nth(index).map(String::as_str)
    }

    pub fn category_index(&self, category: &str) -> Option<usize> {
        self.categories().position(|c| c == category)
    }

    pub fn profile_index(&self, category: &str, profile: &str) -> Option<usize> {
        self.categories.get(category)?.keys().position(|p| p == profile)
    }

    pub fn add_category(&mut self, name: &str) -> Result<(), AppError> {
        let name = non_empty(name)?;
        if self.categories.contains_key(name) {
            return Err(AppError::CategoryExists);
        }
        self.categories.insert(name.to_string(), BTreeMap::new());
        Ok(())
    }

    /// Renames a category, keeping its profiles. Renaming onto another
    /// existing category is rejected.
    pub fn rename_category(&mut self, current: &str, new_name: &str) -> Result<(), AppError> {
        let new_name = non_empty(new_name)?;
        if current == new_name {
            return Ok(());
        }
        if self.categories.contains_key(new_name) {
            return Err(AppError::CategoryExists);
        }
        let profiles = self
            .categories
            .remove(current)
            .ok_or(AppError::NoCategorySelected)?;
        self.categories.insert(new_name.to_string(), profiles);
        Ok(())
    }

    pub fn remove_category(&mut self, name: &str) -> Result<(), AppError> {
        self.categories
            .remove(name)
            .map(|_| ())
            .ok_or(AppError::NoCategorySelected)
    }

    pub fn add_profile(&mut self, category: &str, label: &str, preset: Preset) -> Result<(), AppError> {
        let profiles = self
            .categories
            .get_mut(category)
            .ok_or(AppError::NoCategorySelected)?;
        let label = non_empty(label)?;
        if profiles.contains_key(label) {
            return Err(AppError::ProfileExists);
        }
        profiles.insert(label.to_string(), preset);
        Ok(())
    }

    /// Replaces the params and extension of `current`, moving it to
    /// `new_label` when that differs.
    pub fn edit_profile(
        &mut self,
        category: &str,
        current: &str,
        new_label: &str,
        preset: Preset,
    ) -> Result<(), AppError> {
        let profiles = self
            .categories
            .get_mut(category)
            .ok_or(AppError::NoCategorySelected)?;
        let new_label = non_empty(new_label)?;
        if !profiles.contains_key(current) {
            return Err(AppError::NoProfileSelected);
        }
        if current != new_label {
            if profiles.contains_key(new_label) {
                return Err(AppError::ProfileExists);
            }
            profiles.remove(current);
        }
        profiles.insert(new_label.to_string(), preset);
        Ok(())
    }

    pub fn remove_profile(&mut self, category: &str, label: &str) -> Result<(), AppError> {
        self.categories
            .get_mut(category)
            .ok_or(AppError::NoCategorySelected)?
            .remove(label)
            .map(|_| ())
            .ok_or(AppError::NoProfileSelected)
    }

    /// Adds every profile of `other`, replacing same-named ones. Returns the
    /// number of profiles taken over.
    pub fn merge(&mut self, other: PresetCatalog) -> usize {
        let mut count = 0;
        for (category, profiles) in other.categories {
            let target = self.categories.entry(category).or_default();
            count += profiles.len();
            target.extend(profiles);
        }
        count
    }

    pub fn profile_count(&self) -> usize {
        self.categories.values().map(BTreeMap::len).sum()
    }
}

/// Parses a WinFF `presets.xml`. Every element directly under `<presets>` is
/// one preset whose child elements carry `label`, `params`, `extension` and
/// `category`. Presets without a label or category are skipped.
pub fn import_winff_xml(xml: &str) -> Result<PresetCatalog, AppError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut catalog = PresetCatalog::default();
    let mut depth = 0usize;
    let mut root_depth: Option<usize> = None;
    let mut fields: BTreeMap<String, String> = BTreeMap::new();
    let mut field: Option<String> = None;
    let mut skipped = 0usize;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                depth += 1;
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                match root_depth {
                    None if name == "presets" => root_depth = Some(depth),
                    Some(root) if depth == root + 1 => fields.clear(),
                    Some(root) if depth == root + 2 => field = Some(name),
                    _ => {}
                }
            }
            Event::Text(t) => {
                if let Some(name) = &field {
                    let text = t.unescape()?;
                    fields.entry(name.clone()).or_insert_with(|| text.into_owned());
                }
            }
            Event::CData(c) => {
                if let Some(name) = &field {
                    let text = String::from_utf8_lossy(&c.into_inner()).into_owned();
                    fields.entry(name.clone()).or_insert(text);
                }
            }
            Event::End(_) => {
                match root_depth {
                    Some(root) if depth == root + 2 => field = None,
                    Some(root) if depth == root + 1 => {
                        if !insert_imported(&mut catalog, &mut fields) {
                            skipped += 1;
                        }
                    }
                    Some(root) if depth == root => root_depth = None,
                    _ => {}
                }
                depth = depth.saturating_sub(1);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    log::info!(
        target: "ffqueue::presets",
        "Imported {} WinFF preset(s), skipped {}",
        catalog.profile_count(),
        skipped
    );
    Ok(catalog)
}

fn insert_imported(catalog: &mut PresetCatalog, fields: &mut BTreeMap<String, String>) -> bool {
    let (Some(label), Some(category)) = (fields.remove("label"), fields.remove("category")) else {
        return false;
    };
    let preset = Preset {
        params: fields.remove("params").unwrap_or_default(),
        extension: fields.remove("extension").unwrap_or_default(),
    };
    catalog
        .categories
        .entry(category)
        .or_default()
        .insert(label, preset);
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn preset(params: &str, ext: &str) -> Preset {
        Preset {
            params: params.into(),
            extension: ext.into(),
        }
    }

    #[test]
    fn bundled_presets_parse() {
        let catalog = PresetCatalog::bundled().unwrap();
        assert!(catalog.contains_category("Audio"));
        let mp3 = catalog.get("Audio", "MP3 Audio (128 kbps)").unwrap();
        assert_eq!(mp3.extension, "mp3");
    }

    #[test]
    fn categories_iterate_sorted() {
        let mut c = PresetCatalog::default();
        c.add_category("Web").unwrap();
        c.add_category("Audio").unwrap();
        c.add_category("DVD").unwrap();
        assert_eq!(c.categories().collect::<Vec<_>>(), vec!["Audio", "DVD", "Web"]);
        assert_eq!(c.category_at(1), Some("DVD"));
        assert_eq!(c.category_at(-1), None);
        assert_eq!(c.category_index("Web"), Some(2));
    }

    #[test]
    fn duplicate_names_rejected() {
        let mut c = PresetCatalog::default();
        c.add_category("Audio").unwrap();
        assert!(matches!(c.add_category("Audio"), Err(AppError::CategoryExists)));
        c.add_profile("Audio", "MP3", preset("-vn", "mp3")).unwrap();
        assert!(matches!(
            c.add_profile("Audio", "MP3", preset("-vn", "mp3")),
            Err(AppError::ProfileExists)
        ));
        assert!(matches!(
            c.add_profile("Video", "MP4", preset("", "mp4")),
            Err(AppError::NoCategorySelected)
        ));
        assert!(matches!(c.add_category("  "), Err(AppError::EmptyName)));
    }

    #[test]
    fn rename_category_keeps_profiles() {
        let mut c = PresetCatalog::default();
        c.add_category("Audio").unwrap();
        c.add_category("Video").unwrap();
        c.add_profile("Audio", "MP3", preset("-vn", "mp3")).unwrap();
        c.rename_category("Audio", "Sound").unwrap();
        assert!(!c.contains_category("Audio"));
        assert_eq!(c.get("Sound", "MP3").unwrap().extension, "mp3");
        assert!(matches!(
            c.rename_category("Sound", "Video"),
            Err(AppError::CategoryExists)
        ));
        c.rename_category("Sound", "Sound").unwrap();
    }

    #[test]
    fn edit_profile_replaces_and_renames() {
        let mut c = PresetCatalog::default();
        c.add_category("Audio").unwrap();
        c.add_profile("Audio", "MP3", preset("-vn", "mp3")).unwrap();
        c.edit_profile("Audio", "MP3", "MP3", preset("-vn -ab 320k", "mp3"))
            .unwrap();
        assert_eq!(c.get("Audio", "MP3").unwrap().params, "-vn -ab 320k");

        c.edit_profile("Audio", "MP3", "MP3 HQ", preset("-vn -ab 320k", "mp3"))
            .unwrap();
        assert!(c.get("Audio", "MP3").is_none());
        assert_eq!(c.profiles("Audio"), vec!["MP3 HQ"]);

        assert!(matches!(
            c.edit_profile("Audio", "Missing", "X", Preset::default()),
            Err(AppError::NoProfileSelected)
        ));
    }

    #[test]
    fn remove_profile_and_category() {
        let mut c = PresetCatalog::default();
        c.add_category("Audio").unwrap();
        c.add_profile("Audio", "MP3", preset("-vn", "mp3")).unwrap();
        c.remove_profile("Audio", "MP3").unwrap();
        assert!(c.profiles("Audio").is_empty());
        assert!(matches!(
            c.remove_profile("Audio", "MP3"),
            Err(AppError::NoProfileSelected)
        ));
        c.remove_category("Audio").unwrap();
        assert!(matches!(
            c.remove_category("Audio"),
            Err(AppError::NoCategorySelected)
        ));
    }

    #[test]
    fn save_writes_two_space_indent_and_load_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("presets.json");
        let mut c = PresetCatalog::default();
        c.add_category("Audio").unwrap();
        c.add_profile("Audio", "MP3", preset("-vn", "mp3")).unwrap();
        c.save(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("{\n  \"Audio\": {\n    \"MP3\": {"));
        assert_eq!(PresetCatalog::load(&path), c);
    }

    #[test]
    fn load_falls_back_to_bundled() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("presets.json");
        assert_eq!(PresetCatalog::load(&missing), PresetCatalog::bundled().unwrap());

        std::fs::write(&missing, "").unwrap();
        assert_eq!(PresetCatalog::load(&missing), PresetCatalog::bundled().unwrap());

        std::fs::write(&missing, "{ broken").unwrap();
        assert_eq!(PresetCatalog::load(&missing), PresetCatalog::bundled().unwrap());
    }

    #[test]
    fn restore_defaults_discards_edits() {
        let mut c = PresetCatalog::bundled().unwrap();
        c.add_category("Mine").unwrap();
        c.restore_defaults().unwrap();
        assert!(!c.contains_category("Mine"));
    }

    #[test]
    fn imports_winff_xml() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<presets>
  <dvdntsc>
    <label>NTSC DVD Standard</label>
    <params>-f dvd -target ntsc-dvd -aspect 4:3</params>
    <extension>mpg</extension>
    <category>DVD</category>
  </dvdntsc>
  <mp3>
    <label>MP3 &amp; more</label>
    <params><![CDATA[-vn -acodec libmp3lame]]></params>
    <extension>mp3</extension>
    <category>Audio</category>
  </mp3>
  <broken>
    <params>-c copy</params>
  </broken>
</presets>"#;
        let c = import_winff_xml(xml).unwrap();
        assert_eq!(c.profile_count(), 2);
        let dvd = c.get("DVD", "NTSC DVD Standard").unwrap();
        assert_eq!(dvd.params, "-f dvd -target ntsc-dvd -aspect 4:3");
        assert_eq!(dvd.extension, "mpg");
        assert_eq!(c.get("Audio", "MP3 & more").unwrap().params, "-vn -acodec libmp3lame");
    }

    #[test]
    fn import_rejects_malformed_xml() {
        assert!(matches!(
            import_winff_xml("<presets><a><label>x</b></a></presets>"),
            Err(AppError::Xml(_))
        ));
    }

    #[test]
    fn merge_replaces_same_named_profiles() {
        let mut c = PresetCatalog::default();
        c.add_category("Audio").unwrap();
        c.add_profile("Audio", "MP3", preset("-old", "mp3")).unwrap();
        let mut other = PresetCatalog::default();
        other.add_category("Audio").unwrap();
        other.add_profile("Audio", "MP3", preset("-new", "mp3")).unwrap();
        other.add_category("Web").unwrap();
        other.add_profile("Web", "GIF", preset("-an", "gif")).unwrap();
        assert_eq!(c.merge(other), 2);
        assert_eq!(c.get("Audio", "MP3").unwrap().params, "-new");
        assert!(c.get("Web", "GIF").is_some());
    }
}
