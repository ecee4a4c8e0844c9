use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use ffqueue_core::app::{App, SettingsPatch};
use ffqueue_core::config::AppPaths;
use ffqueue_core::error::AppError;
use ffqueue_core::ffmpeg::{ToolPaths, parse_ffmpeg_error};
use ffqueue_core::logging::init_logger;
use ffqueue_core::presets::{Preset, PresetCatalog, import_winff_xml};
use ffqueue_core::queue::RowId;
use ffqueue_core::supervisor::{EventSink, MessageLevel, RunEvent};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Value, json};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Queue-based FFmpeg front-end",
    long_about = "Runs the ffqueue core as a JSON-lines sidecar for a GUI, or converts and crops files headlessly."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Also write log lines to ffqueue.log in the config directory.
    #[arg(long, global = true, default_value_t = false)]
    log: bool,

    /// Directory holding config.json and presets.json.
    #[arg(long, global = true, value_name = "DIR", env = "FFQUEUE_CONFIG_DIR")]
    config_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve JSON-lines requests on stdin and write replies and events to stdout (default)
    Serve,
    /// Convert files with a preset
    Convert(ConvertArgs),
    /// Cut a time range out of one file
    Crop(CropArgs),
    /// Print container metadata for a file
    Probe {
        #[arg(value_name = "FILE")]
        path: PathBuf,
    },
    /// Merge a WinFF presets.xml into the user presets
    ImportPresets {
        #[arg(value_name = "XML")]
        path: PathBuf,
    },
}

#[derive(Args, Debug)]
struct OutputArgs {
    /// Output directory; outputs go beside their sources when omitted
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Overwrite existing output files
    #[arg(short = 'y', long, default_value_t = false)]
    overwrite: bool,
}

#[derive(Args, Debug)]
struct ConvertArgs {
    #[arg(required = true, value_name = "FILES")]
    files: Vec<PathBuf>,

    /// Preset category
    #[arg(short, long)]
    category: String,

    /// Profile within the category
    #[arg(short, long)]
    profile: String,

    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Args, Debug)]
struct CropArgs {
    #[arg(value_name = "FILE")]
    file: PathBuf,

    /// Start position, seconds or HH:MM:SS
    #[arg(short, long, value_parser = parse_position)]
    start: f64,

    /// End position, seconds or HH:MM:SS
    #[arg(short, long, value_parser = parse_position)]
    end: f64,

    #[command(flatten)]
    output: OutputArgs,
}

fn parse_position(s: &str) -> Result<f64, String> {
    let parts: Vec<&str> = s.split(':').collect();
    let mut secs = 0.0;
    for part in &parts {
        let value: f64 = part
            .trim()
            .parse()
            .map_err(|_| format!("invalid time position `{}`", s))?;
        secs = secs * 60.0 + value;
    }
    if parts.len() > 3 || !secs.is_finite() || secs < 0.0 {
        return Err(format!("invalid time position `{}`", s));
    }
    Ok(secs)
}

// --- JSON-lines protocol ---

#[derive(Debug, Deserialize)]
struct RpcRequest {
    id: u64,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, serde::Serialize)]
struct RpcSuccess {
    id: u64,
    result: Value,
}

#[derive(Debug, serde::Serialize)]
struct RpcFailure {
    id: u64,
    error: RpcErrorPayload,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct RpcErrorPayload {
    summary: String,
    detail: String,
}

#[derive(Debug, Deserialize)]
struct PathParams {
    path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct PathsParams {
    paths: Vec<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RowIdsParams {
    ids: Vec<RowId>,
    #[serde(default = "default_true")]
    selected: bool,
}

#[derive(Debug, Deserialize)]
struct RowParams {
    id: RowId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CropFrameParams {
    position: f64,
    output_path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct CropStartParams {
    start: f64,
    end: f64,
}

#[derive(Debug, Deserialize)]
struct NameParams {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RenameParams {
    current: String,
    new_name: String,
}

#[derive(Debug, Deserialize)]
struct ProfileParams {
    category: String,
    label: String,
    #[serde(default)]
    params: String,
    #[serde(default)]
    extension: String,
}

#[derive(Debug, Deserialize)]
struct EditProfileParams {
    category: String,
    current: String,
    label: String,
    #[serde(default)]
    params: String,
    #[serde(default)]
    extension: String,
}

#[derive(Debug, Deserialize)]
struct RemoveProfileParams {
    category: String,
    label: String,
}

fn default_true() -> bool {
    true
}

type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

fn write_json_line<T: serde::Serialize>(writer: &mut impl Write, value: &T) -> io::Result<()> {
    serde_json::to_writer(&mut *writer, value)
        .map_err(|e| io::Error::other(format!("serialize response: {}", e)))?;
    writer.write_all(b"\n")?;
    writer.flush()
}

fn write_json_line_shared<T: serde::Serialize>(writer: &SharedWriter, value: &T) -> io::Result<()> {
    let mut guard = writer.lock();
    write_json_line(&mut *guard, value)
}

fn parse_error_payload(err: &AppError) -> RpcErrorPayload {
    match err {
        AppError::FfmpegFailed { code, stderr } if *code == -1 => RpcErrorPayload {
            summary: stderr.clone(),
            detail: stderr.clone(),
        },
        AppError::FfmpegFailed { code, stderr } => {
            let parsed = parse_ffmpeg_error(stderr, Some(*code));
            RpcErrorPayload {
                summary: parsed.summary,
                detail: parsed.detail,
            }
        }
        _ => {
            let text = err.to_string();
            RpcErrorPayload {
                summary: text.clone(),
                detail: text,
            }
        }
    }
}

fn params_from_value<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, AppError> {
    serde_json::from_value(params)
        .map_err(|e| AppError::from(format!("Invalid params payload: {}", e)))
}

fn to_value<T: serde::Serialize>(value: T) -> Result<Value, AppError> {
    serde_json::to_value(value)
        .map_err(|e| AppError::from(format!("Failed to serialize result: {}", e)))
}

fn dispatch(app: &mut App, method: &str, params: Value) -> Result<Value, AppError> {
    match method {
        "app.status" => to_value(app.status()),
        "queue.list" => to_value(app.rows()),
        "queue.add" => {
            let p: PathsParams = params_from_value(params)?;
            let added = app.add_files(p.paths)?;
            Ok(json!({ "added": added }))
        }
        "queue.remove" => {
            let p: RowIdsParams = params_from_value(params)?;
            let removed = app.remove_rows(&p.ids)?;
            Ok(json!({ "removed": removed }))
        }
        "queue.select" => {
            let p: RowIdsParams = params_from_value(params)?;
            app.set_selected(&p.ids, p.selected);
            to_value(app.rows())
        }
        "queue.toggle" => {
            let p: RowParams = params_from_value(params)?;
            Ok(json!({ "selected": app.toggle_selected(p.id) }))
        }
        "queue.selectAll" => {
            app.select_all();
            to_value(app.rows())
        }
        "queue.unselect" => {
            let p: RowIdsParams = params_from_value(params)?;
            app.unselect(&p.ids);
            to_value(app.rows())
        }
        "media.info" => {
            let p: PathParams = params_from_value(params)?;
            to_value(app.media_info(&p.path))
        }
        "crop.open" => {
            let p: PathParams = params_from_value(params)?;
            to_value(app.open_crop_file(&p.path)?)
        }
        "crop.frame" => {
            let p: CropFrameParams = params_from_value(params)?;
            let bytes = app.crop_frame(p.position)?;
            std::fs::write(&p.output_path, &bytes)?;
            Ok(json!({ "outputPath": p.output_path, "size": bytes.len() }))
        }
        "crop.start" => {
            let p: CropStartParams = params_from_value(params)?;
            app.start_crop(p.start, p.end)?;
            Ok(json!({ "started": true }))
        }
        "convert.start" => {
            app.start_convert()?;
            Ok(json!({ "started": true }))
        }
        "task.cancel" => Ok(json!({ "cancelled": app.cancel() })),
        "presets.list" => Ok(json!({
            "presets": to_value(app.presets())?,
            "selected": to_value(app.selected_preset())?,
        })),
        "presets.addCategory" => {
            let p: NameParams = params_from_value(params)?;
            app.add_category(&p.name)?;
            to_value(app.presets())
        }
        "presets.renameCategory" => {
            let p: RenameParams = params_from_value(params)?;
            app.rename_category(&p.current, &p.new_name)?;
            to_value(app.presets())
        }
        "presets.removeCategory" => {
            let p: NameParams = params_from_value(params)?;
            app.remove_category(&p.name)?;
            to_value(app.presets())
        }
        "presets.addProfile" => {
            let p: ProfileParams = params_from_value(params)?;
            app.add_profile(
                &p.category,
                &p.label,
                Preset {
                    params: p.params,
                    extension: p.extension,
                },
            )?;
            to_value(app.presets())
        }
        "presets.editProfile" => {
            let p: EditProfileParams = params_from_value(params)?;
            app.edit_profile(
                &p.category,
                &p.current,
                &p.label,
                Preset {
                    params: p.params,
                    extension: p.extension,
                },
            )?;
            to_value(app.presets())
        }
        "presets.removeProfile" => {
            let p: RemoveProfileParams = params_from_value(params)?;
            app.remove_profile(&p.category, &p.label)?;
            to_value(app.presets())
        }
        "presets.restoreDefaults" => {
            app.restore_default_presets()?;
            to_value(app.presets())
        }
        "presets.importXml" => {
            let p: PathParams = params_from_value(params)?;
            let imported = app.import_presets_xml(&p.path)?;
            Ok(json!({ "imported": imported }))
        }
        "settings.get" => to_value(app.settings()),
        "settings.set" => {
            let patch: SettingsPatch = params_from_value(params)?;
            to_value(app.update_settings(patch)?)
        }
        _ => Err(AppError::from(format!("Unknown method: {}", method))),
    }
}

fn handle_request(request: RpcRequest, writer: &SharedWriter, app: &mut App) {
    let written = match dispatch(app, &request.method, request.params) {
        Ok(result) => write_json_line_shared(
            writer,
            &RpcSuccess {
                id: request.id,
                result,
            },
        ),
        Err(err) => {
            if err.is_user_error() {
                log::debug!(
                    target: "ffqueue::sidecar",
                    "{} rejected: {}",
                    request.method,
                    err
                );
            } else {
                log::warn!(
                    target: "ffqueue::sidecar",
                    "{} failed: {}",
                    request.method,
                    err
                );
            }
            write_json_line_shared(
                writer,
                &RpcFailure {
                    id: request.id,
                    error: parse_error_payload(&err),
                },
            )
        }
    };
    if let Err(e) = written {
        log::error!(target: "ffqueue::sidecar", "Failed to write reply: {}", e);
    }
}

fn event_sink(writer: &SharedWriter) -> EventSink {
    let events_writer = Arc::clone(writer);
    Arc::new(move |event: RunEvent| {
        if let Err(e) = write_json_line_shared(&events_writer, &event) {
            log::error!(target: "ffqueue::sidecar", "Failed to write event: {}", e);
        }
    })
}

/// Answers requests from `input` until EOF, then cancels any active run and
/// persists settings and presets.
fn serve_lines(input: impl BufRead, writer: &SharedWriter, app: &mut App) -> Result<(), AppError> {
    for line in input.lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                let failure = RpcFailure {
                    id: 0,
                    error: RpcErrorPayload {
                        summary: "Invalid input stream".to_string(),
                        detail: err.to_string(),
                    },
                };
                let _ = write_json_line_shared(writer, &failure);
                continue;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        let request: RpcRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                let failure = RpcFailure {
                    id: 0,
                    error: RpcErrorPayload {
                        summary: "Invalid request".to_string(),
                        detail: err.to_string(),
                    },
                };
                let _ = write_json_line_shared(writer, &failure);
                continue;
            }
        };

        handle_request(request, writer, app);
    }

    app.shutdown()
}

fn serve(paths: AppPaths) -> Result<(), AppError> {
    let boxed: Box<dyn Write + Send> = Box::new(io::stdout());
    let stdout: SharedWriter = Arc::new(Mutex::new(boxed));
    let mut app = App::new(paths, ToolPaths::discover_or_default(), event_sink(&stdout));
    app.startup();
    serve_lines(io::stdin().lock(), &stdout, &mut app)
}

// --- Headless commands ---

fn console_sink() -> EventSink {
    Arc::new(|event: RunEvent| match event {
        RunEvent::JobStarted { command, .. } => {
            log::info!(target: "ffqueue::cli", "Running:\n{}", command)
        }
        RunEvent::RowProgress { row_id, percent } => {
            println!("{} {}%", row_id, percent);
        }
        RunEvent::OutputLine { line } => log::debug!(target: "ffqueue::ffmpeg", "{}", line),
        RunEvent::Message { text, level } => match level {
            MessageLevel::Info => log::info!(target: "ffqueue::cli", "{}", text),
            MessageLevel::Warning => log::warn!(target: "ffqueue::cli", "{}", text),
            MessageLevel::Error => log::error!(target: "ffqueue::cli", "{}", text),
        },
        RunEvent::JobFinished {
            exit_code: Some(code),
            ..
        } if code != 0 => log::warn!(target: "ffqueue::cli", "ffmpeg exited with code {}", code),
        _ => {}
    })
}

fn headless_app(paths: AppPaths, output: &OutputArgs) -> Result<App, AppError> {
    let mut app = App::new(paths, ToolPaths::discover_or_default(), console_sink());
    if !app.startup() {
        return Err(AppError::AddFilesDisabled);
    }
    app.update_settings(SettingsPatch {
        output_folder: output
            .output
            .as_ref()
            .map(|p| ffqueue_core::path_to_string(p)),
        use_source_folder: Some(output.output.is_none()),
        overwrite_existing: Some(output.overwrite),
        ..Default::default()
    })?;
    Ok(app)
}

fn convert(paths: AppPaths, args: ConvertArgs) -> Result<(), AppError> {
    let mut app = headless_app(paths, &args.output)?;
    app.update_settings(SettingsPatch {
        category: Some(args.category),
        profile: Some(args.profile),
        ..Default::default()
    })
    .map_err(|_| AppError::CheckSettings)?;
    if app.add_files(args.files)?.is_empty() {
        return Err(AppError::NoFileSelected);
    }
    app.start_convert()?;
    app.wait_for_run();
    Ok(())
}

fn crop(paths: AppPaths, args: CropArgs) -> Result<(), AppError> {
    let mut app = headless_app(paths, &args.output)?;
    app.open_crop_file(&args.file)?;
    app.start_crop(args.start, args.end)?;
    app.wait_for_run();
    Ok(())
}

fn probe(paths: AppPaths, path: PathBuf) -> Result<(), AppError> {
    let app = App::new(paths, ToolPaths::discover_or_default(), console_sink());
    let info = app.media_info(&path);
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}

fn import_presets(paths: AppPaths, xml_path: PathBuf) -> Result<(), AppError> {
    let imported = import_winff_xml(&std::fs::read_to_string(&xml_path)?)?;
    let presets_file = paths.presets_file();
    let mut catalog = PresetCatalog::load(&presets_file);
    let count = catalog.merge(imported);
    catalog.save(&presets_file)?;
    println!("Imported {} preset(s) into {}", count, presets_file.display());
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let paths = cli
        .config_dir
        .map(AppPaths::new)
        .unwrap_or_else(AppPaths::from_env);

    let log_file = cli.log.then(|| paths.log_file());
    if let Err(e) = init_logger(log_file.as_deref()) {
        eprintln!("Cannot open log file: {}", e);
    }

    let result = match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(paths),
        Commands::Convert(args) => convert(paths, args),
        Commands::Crop(args) => crop(paths, args),
        Commands::Probe { path } => probe(paths, path),
        Commands::ImportPresets { path } => import_presets(paths, path),
    };

    ExitCode::from(exit_status(&result))
}

/// 0 on success, 2 when the request itself was rejected, 1 otherwise.
fn exit_status(result: &Result<(), AppError>) -> u8 {
    match result {
        Ok(()) => 0,
        Err(e) if e.is_user_error() => {
            eprintln!("{}", e);
            2
        }
        Err(e) => {
            log::error!(target: "ffqueue::cli", "{}", e);
            eprintln!("{}", e);
            1
        }
    }
}
