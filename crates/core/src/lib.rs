pub mod config;
pub mod error;
pub mod request;

pub use config::ExportConfig;
pub use error::*;
pub use request::*;
