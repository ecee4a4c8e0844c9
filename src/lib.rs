pub mod app;
pub mod config;
pub mod error;
pub mod ffmpeg;
pub mod logging;
pub mod presets;
pub mod queue;
pub mod supervisor;

pub use app::App;
pub use error::AppError;

pub fn path_to_string(path: &(impl AsRef<std::path::Path> + ?Sized)) -> String {
    path.as_ref().to_string_lossy().to_string()
}
