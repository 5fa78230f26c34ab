pub mod config;
pub mod texts;

pub use config::AppConfig;
pub use texts::{Locale, format_seconds};
