pub mod history;
pub mod types;

pub use history::{
    resolve_history, InactivationReason, SchemaHistory, SchemaHistoryLookup, SchemaHistoryRegistry,
};
pub use types::*;
