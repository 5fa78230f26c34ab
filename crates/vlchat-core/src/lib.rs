//! Streaming chat session core for vision-language models.

pub mod error;
pub mod models;
pub mod repositories;
pub mod services;
pub mod session;
pub mod settings;


pub use error::{ChatError, ChatResult, StateError};
pub use session::{ChatSession, SessionSnapshot, StreamOutcome};
pub use settings::{AppConfig, Locale};
