pub mod aggregate;
pub mod outgoing;
pub mod planner;

pub use aggregate::OutgoingBatches;
pub use outgoing::{BatchEvent, BatchStatus, OutgoingBatch};
pub use planner::BatchPlanner;
