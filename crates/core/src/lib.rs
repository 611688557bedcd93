pub mod checkpoint;
pub mod config;
pub mod error;
pub mod period;
pub mod result;
pub mod settings;

pub use checkpoint::Checkpoint;
pub use config::Config;
pub use error::*;
pub use period::Period;
pub use result::{ResultEntry, ResultMap};
pub use settings::{JobSettings, TimeInterval, Ttl};
