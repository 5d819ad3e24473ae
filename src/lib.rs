pub mod config;
pub mod core;
pub mod error;
pub mod log;
pub mod orchestration;
pub mod resilience;
pub mod store;

pub use error::{Error, Result};
