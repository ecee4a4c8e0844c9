pub mod builder;
pub mod discovery;
mod error;
pub mod ffprobe;
pub mod progress;
pub mod runner;

pub use builder::{
    ConvertJob, FfmpegCommand, OutputTarget, build_convert_command, build_convert_commands,
    build_crop_command, convert_output_path, crop_output_path, format_args_for_display_multiline,
    split_params,
};
pub use discovery::{ToolPaths, check_ffprobe, get_ffmpeg_path, get_ffprobe_path};
pub use error::{FfmpegErrorPayload, parse_ffmpeg_error};
pub use ffprobe::{FormatMetadata, MetadataCache, grab_frame, probe_format};
pub use progress::{ProgressTracker, ProgressUpdate, format_duration_label, format_hms};
pub use runner::{ProcessSlot, new_process_slot, run_ffmpeg_blocking, terminate};
