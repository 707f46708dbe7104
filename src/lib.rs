pub mod checkpoint;
pub mod config;
pub mod error;
pub mod replicator;

pub mod batch;
pub mod extract;
pub mod model;
pub mod route;

pub use config::Config;
pub use error::{Error, Result};
pub use replicator::{Capture, Replicator};
