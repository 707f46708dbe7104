//! The in-memory batch aggregate for one scheduling pass.
//!
//! [`OutgoingBatches`] is created fresh for a pass, filtered and re-sorted,
//! then discarded. Nothing here performs I/O; status changes made through
//! [`OutgoingBatches::mark_status`] must be persisted by the caller.

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use tracing::debug;

use super::outgoing::{BatchStatus, OutgoingBatch};
use crate::model::Channel;

#[derive(Debug, Clone, Default)]
pub struct OutgoingBatches {
    batches: Vec<OutgoingBatch>,
    active_channels: BTreeSet<String>,
}

impl OutgoingBatches {
    pub fn new(batches: Vec<OutgoingBatch>) -> Self {
        Self {
            batches,
            active_channels: BTreeSet::new(),
        }
    }

    pub fn batches(&self) -> &[OutgoingBatch] {
        &self.batches
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    pub fn add_active_channel(&mut self, channel: &Channel) {
        self.active_channels.insert(channel.channel_id.clone());
    }

    pub fn active_channels(&self) -> &BTreeSet<String> {
        &self.active_channels
    }

    pub fn batches_for_channel(&self, channel_id: &str) -> Vec<&OutgoingBatch> {
        self.batches
            .iter()
            .filter(|b| b.channel_id == channel_id)
            .collect()
    }

    pub fn batches_for_channels(&self, channel_ids: &BTreeSet<String>) -> Vec<&OutgoingBatch> {
        self.batches
            .iter()
            .filter(|b| channel_ids.contains(&b.channel_id))
            .collect()
    }

    pub fn batches_for_node(&self, node_id: &str) -> Vec<&OutgoingBatch> {
        self.batches.iter().filter(|b| b.node_id == node_id).collect()
    }

    /// Removes every batch on the given channel.
    pub fn filter_batches_for_channel(&mut self, channel_id: &str) {
        self.batches.retain(|b| b.channel_id != channel_id);
    }

    /// Removes every batch on any of the given channels.
    pub fn filter_batches_for_channels(&mut self, channel_ids: &BTreeSet<String>) {
        self.batches.retain(|b| !channel_ids.contains(&b.channel_id));
    }

    /// Removes every batch whose channel has not been marked active.
    pub fn filter_batches_for_inactive_channels(&mut self) {
        let before = self.batches.len();
        let active = &self.active_channels;
        self.batches.retain(|b| active.contains(&b.channel_id));
        debug!(
            removed = before - self.batches.len(),
            "Filtered batches for inactive channels"
        );
    }

    pub fn contains_batches_in_error(&self) -> bool {
        self.batches.iter().any(OutgoingBatch::is_in_error)
    }

    pub fn batch_ids(&self) -> Vec<u64> {
        self.batches.iter().map(|b| b.batch_id).collect()
    }

    /// Applies a sender-reported status change. Returns false if the batch is unknown.
    pub fn mark_status(&mut self, batch_id: u64, status: BatchStatus, at: DateTime<Utc>) -> bool {
        match self.batches.iter_mut().find(|b| b.batch_id == batch_id) {
            Some(batch) => {
                batch.mark(status, at);
                true
            }
            None => false,
        }
    }

    /// Most recent update time over a channel's batches that are in error.
    fn last_error_time(&self, channel_id: &str) -> Option<DateTime<Utc>> {
        self.batches
            .iter()
            .filter(|b| b.channel_id == channel_id && b.is_in_error())
            .map(|b| b.last_updated)
            .max()
    }

    /// Reorders channels so that error-free channels come first, keeping
    /// their relative order, followed by channels with batches in error
    /// ordered by their latest failure, oldest first.
    pub fn sort_channels(&self, channels: &mut [Channel]) {
        channels.sort_by_cached_key(|c| {
            let last_error = self.last_error_time(&c.channel_id);
            (last_error.is_some(), last_error)
        });
    }
}
