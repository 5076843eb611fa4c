#![forbid(unsafe_code)]

//! Keeps recorded session status in step with OS process reality.

pub mod config;
pub mod context;
pub mod errors;
pub mod events;
pub mod http;
pub mod models;
pub mod persistence;
pub mod supervisor;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
