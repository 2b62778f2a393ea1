pub mod config;
pub mod error;
pub mod types;

pub use config::PantryConfig;
pub use error::{PantryError, Result};
pub use types::*;
