use std::collections::HashMap;
use tracing::debug;

use super::aggregate::OutgoingBatches;
use super::outgoing::OutgoingBatch;
use crate::model::Channel;

/// Groups routed changes into batches per (node, channel).
///
/// Batch ids come from one increasing sequence, so batches for the same
/// node and channel are numbered in the order their changes were routed.
#[derive(Debug)]
pub struct BatchPlanner {
    next_batch_id: u64,
    default_max_batch_size: usize,
    open: HashMap<(String, String), usize>,
    batches: Vec<OutgoingBatch>,
}

impl BatchPlanner {
    /// `last_batch_id` is the highest id already handed out; planning continues after it.
    pub fn new(last_batch_id: u64, default_max_batch_size: usize) -> Self {
        Self {
            next_batch_id: last_batch_id + 1,
            default_max_batch_size: default_max_batch_size.max(1),
            open: HashMap::new(),
            batches: Vec::new(),
        }
    }

    /// Appends a change to the open batch for (node, channel), starting a new
    /// batch when there is none or the open one is full. Returns the batch id.
    pub fn add(&mut self, change_id: u64, route_id: &str, node_id: &str, channel: &Channel) -> u64 {
        let max = channel
            .max_batch_size
            .unwrap_or(self.default_max_batch_size)
            .max(1);
        let key = (node_id.to_string(), channel.channel_id.clone());

        let open = self
            .open
            .get(&key)
            .copied()
            .filter(|&index| self.batches[index].len() < max);

        let index = match open {
            Some(index) => index,
            None => {
                let batch = OutgoingBatch::new(self.next_batch_id, node_id, &channel.channel_id);
                debug!(
                    batch_id = batch.batch_id,
                    node_id,
                    channel = %channel.channel_id,
                    "Opened batch"
                );
                self.next_batch_id += 1;
                self.batches.push(batch);
                self.open.insert(key, self.batches.len() - 1);
                self.batches.len() - 1
            }
        };

        let batch = &mut self.batches[index];
        batch.push(change_id, route_id);
        batch.batch_id
    }

    /// Highest batch id allocated so far, or the starting point if none were.
    pub fn last_batch_id(&self) -> u64 {
        self.next_batch_id - 1
    }

    pub fn finish(self) -> OutgoingBatches {
        OutgoingBatches::new(self.batches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_groups_per_node_and_channel() {
        let default = Channel::new("default", 1);
        let config = Channel::new("config", 0);
        let mut planner = BatchPlanner::new(100, 10);

        assert_eq!(planner.add(1, "r1", "a", &default), 101);
        assert_eq!(planner.add(1, "r1", "b", &default), 102);
        assert_eq!(planner.add(2, "r2", "a", &config), 103);
        assert_eq!(planner.add(3, "r1", "a", &default), 101);
        assert_eq!(planner.last_batch_id(), 103);

        let batches = planner.finish();
        assert_eq!(batches.batch_ids(), vec![101, 102, 103]);
        assert_eq!(batches.batches()[2].events[0].route_id, "r2");
        assert_eq!(batches.batches()[0].change_ids(), vec![1, 3]);
    }

    #[test]
    fn test_full_batch_rolls_over_with_increasing_id() {
        let channel = Channel::new("default", 1).with_max_batch_size(2);
        let mut planner = BatchPlanner::new(0, 1000);

        let ids: Vec<u64> = (1..=5).map(|c| planner.add(c, "r1", "a", &channel)).collect();
        assert_eq!(ids, vec![1, 1, 2, 2, 3]);

        let batches = planner.finish();
        assert_eq!(batches.batches()[2].change_ids(), vec![5]);
    }

    #[test]
    fn test_nothing_planned_keeps_last_batch_id() {
        let planner = BatchPlanner::new(42, 10);
        assert_eq!(planner.last_batch_id(), 42);
        assert!(planner.finish().is_empty());
    }
}
