pub mod app_paths;
pub mod logging;
pub mod settings;
