use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BatchStatus {
    New,
    Error,
    Ok,
}

/// One routed change inside a batch, tagged with the route that selected it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchEvent {
    pub change_id: u64,
    pub route_id: String,
}

/// An ordered group of changes destined for one node on one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutgoingBatch {
    pub batch_id: u64,
    pub node_id: String,
    pub channel_id: String,
    pub status: BatchStatus,
    /// Set once the batch has failed at least once; survives a later retry.
    pub error_flag: bool,
    pub last_updated: DateTime<Utc>,
    /// Routed changes in extraction order.
    #[serde(default)]
    pub events: Vec<BatchEvent>,
}

impl OutgoingBatch {
    pub fn new(batch_id: u64, node_id: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self {
            batch_id,
            node_id: node_id.into(),
            channel_id: channel_id.into(),
            status: BatchStatus::New,
            error_flag: false,
            last_updated: Utc::now(),
            events: Vec::new(),
        }
    }

    pub fn is_in_error(&self) -> bool {
        self.status == BatchStatus::Error
    }

    /// Records a status transition reported by the sender.
    pub fn mark(&mut self, status: BatchStatus, at: DateTime<Utc>) {
        self.status = status;
        self.last_updated = at;
        if status == BatchStatus::Error {
            self.error_flag = true;
        }
    }

    pub fn push(&mut self, change_id: u64, route_id: impl Into<String>) {
        self.events.push(BatchEvent {
            change_id,
            route_id: route_id.into(),
        });
    }

    pub fn change_ids(&self) -> Vec<u64> {
        self.events.iter().map(|e| e.change_id).collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
