pub mod config;
pub mod error;

pub use config::{load_dotenv, DispatchConfig};
pub use error::*;
