//! Library crate for gateway-scan exposing reusable modules.
pub mod batch;
pub mod config;
pub mod error;
pub mod monitor;
pub mod probe;
pub mod probe_process;
pub mod progress;
pub mod retry;
pub mod rules;
pub mod scanner;
pub mod session;
pub mod types;

pub use error::{Error, Result};
