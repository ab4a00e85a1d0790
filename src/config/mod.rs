//! Configuration Module
//!
//! Service settings, persistence and credentials.

mod secrets;
mod settings;
mod store;

pub use secrets::*;
pub use settings::*;
pub use store::*;
