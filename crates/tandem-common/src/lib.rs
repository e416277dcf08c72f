pub mod errors;
pub mod id;

pub use errors::{ConfigError, TandemError};
pub use id::SessionId;

pub type Result<T> = std::result::Result<T, TandemError>;
