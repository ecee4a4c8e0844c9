//! Builds ffmpeg argument lists for conversion and crop jobs. Pure: nothing here
//! touches the filesystem except the output-folder check in [`OutputTarget::resolve`].

use std::path::{Path, PathBuf};

use super::progress::format_hms;
use crate::error::AppError;
use crate::path_to_string;
use crate::presets::PresetCatalog;
use crate::queue::{Row, RowId};

/// Program name placed in `argv[0]`. The runner swaps in the resolved binary.
pub const FFMPEG_PROGRAM: &str = "ffmpeg";

const CONVERTED_PREFIX: &str = "CONVERTED!_";
const CROP_SUFFIX: &str = "_CROP";

/// Full argv for one ffmpeg invocation, `argv[0]` included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FfmpegCommand {
    pub argv: Vec<String>,
}

impl FfmpegCommand {
    pub fn args(&self) -> &[String] {
        self.argv.get(1..).unwrap_or(&[])
    }

    pub fn input(&self) -> Option<&str> {
        self.argv
            .iter()
            .position(|a| a == "-i")
            .and_then(|i| self.argv.get(i + 1))
            .map(String::as_str)
    }

    pub fn output(&self) -> Option<&str> {
        self.argv.last().map(String::as_str)
    }
}

/// One conversion bound to the queue row it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertJob {
    pub row_id: RowId,
    pub command: FfmpegCommand,
}

/// Where outputs are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    SourceFolder,
    Folder(PathBuf),
}

impl OutputTarget {
    /// Rejects a missing or non-directory output folder unless outputs go
    /// beside their sources.
    pub fn resolve(use_source_folder: bool, output_folder: Option<&Path>) -> Result<Self, AppError> {
        if use_source_folder {
            return Ok(Self::SourceFolder);
        }
        match output_folder {
            Some(dir) if !dir.as_os_str().is_empty() && dir.is_dir() => {
                Ok(Self::Folder(dir.to_path_buf()))
            }
            _ => Err(AppError::OutputFolderNotSet),
        }
    }

    fn dir_for(&self, input: &Path) -> PathBuf {
        match self {
            Self::SourceFolder => input.parent().map(Path::to_path_buf).unwrap_or_default(),
            Self::Folder(dir) => dir.clone(),
        }
    }
}

fn overwrite_flag(overwrite: bool) -> &'static str {
    if overwrite { "-y" } else { "-n" }
}

fn file_stem(input: &Path) -> String {
    input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// `<dir>/<stem>.<ext>`, or `<dir>/CONVERTED!_<stem>.<ext>` when that would
/// overwrite the input.
pub fn convert_output_path(input: &Path, extension: &str, target: &OutputTarget) -> PathBuf {
    let dir = target.dir_for(input);
    let stem = file_stem(input);
    let out = dir.join(format!("{}.{}", stem, extension));
    if out == input {
        dir.join(format!("{}{}.{}", CONVERTED_PREFIX, stem, extension))
    } else {
        out
    }
}

/// Same name and extension as the input, with `_CROP` before the extension
/// when the path would collide with the input.
pub fn crop_output_path(input: &Path, target: &OutputTarget) -> PathBuf {
    let dir = target.dir_for(input);
    let file_name = input
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let out = dir.join(&file_name);
    if out != input {
        return out;
    }
    let stem = file_stem(input);
    match input.extension() {
        Some(ext) => dir.join(format!("{}{}.{}", stem, CROP_SUFFIX, ext.to_string_lossy())),
        None => dir.join(format!("{}{}", stem, CROP_SUFFIX)),
    }
}

/// Splits a preset parameter string into arguments. Whitespace separates;
/// single quotes are literal; double quotes group but honour `\"` and `\\`;
/// a backslash outside quotes escapes the next character.
pub fn split_params(params: &str) -> Result<Vec<String>, AppError> {
    #[derive(PartialEq)]
    enum State {
        Plain,
        Single,
        Double,
    }

    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut state = State::Plain;
    let mut chars = params.chars();

    while let Some(c) = chars.next() {
        match state {
            State::Plain => match c {
                c if c.is_whitespace() => {
                    if in_word {
                        args.push(std::mem::take(&mut current));
                        in_word = false;
                    }
                }
                '\'' => {
                    state = State::Single;
                    in_word = true;
                }
                '"' => {
                    state = State::Double;
                    in_word = true;
                }
                '\\' => {
                    let next = chars.next().ok_or_else(|| {
                        AppError::InvalidParams(format!("trailing backslash in `{}`", params))
                    })?;
                    current.push(next);
                    in_word = true;
                }
                c => {
                    current.push(c);
                    in_word = true;
                }
            },
            State::Single => match c {
                '\'' => state = State::Plain,
                c => current.push(c),
            },
            State::Double => match c {
                '"' => state = State::Plain,
                '\\' => match chars.next() {
                    Some(next @ ('"' | '\\')) => current.push(next),
                    Some(next) => {
                        current.push('\\');
                        current.push(next);
                    }
                    None => {
                        return Err(AppError::InvalidParams(format!(
                            "unterminated double quote in `{}`",
                            params
                        )));
                    }
                },
                c => current.push(c),
            },
        }
    }

    if state != State::Plain {
        return Err(AppError::InvalidParams(format!(
            "unterminated quote in `{}`",
            params
        )));
    }
    if in_word {
        args.push(current);
    }
    Ok(args)
}

/// `ffmpeg -i <input> <params...> -y|-n <output>`.
pub fn build_convert_command(
    input: &Path,
    params: &[String],
    extension: &str,
    target: &OutputTarget,
    overwrite: bool,
) -> FfmpegCommand {
    let output = convert_output_path(input, extension, target);
    let mut argv = Vec::with_capacity(params.len() + 5);
    argv.push(FFMPEG_PROGRAM.to_string());
    argv.push("-i".to_string());
    argv.push(path_to_string(input));
    argv.extend(params.iter().cloned());
    argv.push(overwrite_flag(overwrite).to_string());
    argv.push(path_to_string(&output));
    FfmpegCommand { argv }
}

/// One job per queue row, in queue order. Selection is not filtered here; the
/// supervisor re-checks it when each job comes up.
pub fn build_convert_commands(
    catalog: &PresetCatalog,
    category: Option<&str>,
    profile: Option<&str>,
    rows: &[Row],
    target: &OutputTarget,
    overwrite: bool,
) -> Result<Vec<ConvertJob>, AppError> {
    let (Some(category), Some(profile)) = (category, profile) else {
        return Err(AppError::CheckSettings);
    };
    let preset = catalog
        .get(category, profile)
        .ok_or(AppError::CheckSettings)?;
    let params = split_params(&preset.params)?;

    log::debug!(
        target: "ffqueue::ffmpeg::builder",
        "Building {} conversion(s): category={}, profile={}, params={:?}, ext={}",
        rows.len(),
        category,
        profile,
        params,
        preset.extension
    );

    Ok(rows
        .iter()
        .map(|row| ConvertJob {
            row_id: row.id,
            command: build_convert_command(&row.path, &params, &preset.extension, target, overwrite),
        })
        .collect())
}

/// `ffmpeg -i <input> -ss <start> -t <length> -y|-n <output>`.
pub fn build_crop_command(
    input: &Path,
    start_secs: f64,
    end_secs: f64,
    target: &OutputTarget,
    overwrite: bool,
) -> Result<FfmpegCommand, AppError> {
    if !(start_secs.is_finite() && end_secs.is_finite()) || start_secs < 0.0 || end_secs <= start_secs
    {
        return Err(AppError::InvalidCropRange {
            start: start_secs,
            end: end_secs,
        });
    }
    let output = crop_output_path(input, target);
    let argv = vec![
        FFMPEG_PROGRAM.to_string(),
        "-i".to_string(),
        path_to_string(input),
        "-ss".to_string(),
        format_hms(start_secs),
        "-t".to_string(),
        format_hms(end_secs - start_secs),
        overwrite_flag(overwrite).to_string(),
        path_to_string(&output),
    ];
    Ok(FfmpegCommand { argv })
}

/// Shell-like rendering for logs and the output view, one option per line.
pub fn format_args_for_display_multiline(argv: &[String]) -> String {
    let quoted: Vec<String> = argv
        .iter()
        .map(|a| {
            if a.is_empty() || a.contains(|c: char| c.is_whitespace() || c == '"' || c == '\'') {
                format!("\"{}\"", a.replace('\\', "\\\\").replace('"', "\\\""))
            } else {
                a.clone()
            }
        })
        .collect();

    let mut lines: Vec<String> = Vec::new();
    for arg in quoted {
        let attach_to_option = matches!(
            lines.last(),
            Some(last) if !arg.starts_with('-') && last.starts_with('-') && !last.contains(' ')
        );
        match lines.last_mut() {
            Some(last) if attach_to_option => {
                last.push(' ');
                last.push_str(&arg);
            }
            _ => lines.push(arg),
        }
    }
    lines.join(" \\\n  ")
}
