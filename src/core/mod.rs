pub mod config;
pub mod error;
pub mod storage_layout;
pub mod types;

pub use config::*;
pub use error::*;
pub use types::*;
