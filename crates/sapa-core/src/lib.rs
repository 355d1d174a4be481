pub mod config;
pub mod error;
pub mod language;
pub mod retry;
pub mod types;

pub use config::SapaConfig;
pub use error::{Result, SapaError};
pub use language::detect_language;
pub use retry::RetryPolicy;
pub use types::*;
