pub mod automation;
pub mod broadcast;
pub mod device;
mod error;
pub mod persistence;
pub mod reading;
pub mod scene;
pub mod signal;
pub mod trigger_event;
pub mod value;
pub mod zone;

pub use error::{Error, Result};
pub use persistence::Database;
