//! Drives one routing pass and the extraction of its batches.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, instrument, warn};

use crate::batch::{BatchPlanner, BatchStatus, OutgoingBatch, OutgoingBatches};
use crate::checkpoint::{CheckpointManager, RoutingCheckpoint};
use crate::extract::{DataExtractor, StagingBuffer};
use crate::model::{
    resolve_history, ChangeRecord, Channel, ChannelConfigProvider, Node, NodeLookup, Route,
    SchemaHistory, SchemaHistoryLookup, SchemaHistoryRegistry,
};
use crate::route::{RouterRegistry, RoutingContext};
use crate::{Config, Error, Result};

/// Everything a pass reads: reference data plus the captured changes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Capture {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub channels: Vec<Channel>,
    #[serde(default)]
    pub routes: Vec<Route>,
    #[serde(default)]
    pub histories: Vec<SchemaHistory>,
    #[serde(default)]
    pub changes: Vec<ChangeRecord>,
}

impl Capture {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn history_registry(&self) -> Result<SchemaHistoryRegistry> {
        let mut registry = SchemaHistoryRegistry::new();
        for history in &self.histories {
            registry.insert(history.clone())?;
        }
        Ok(registry)
    }
}

/// Result of routing a set of changes.
#[derive(Debug, Clone)]
pub struct RoutingOutcome {
    pub batches: OutgoingBatches,
    pub checkpoint: RoutingCheckpoint,
    /// Changes that reached at least one node.
    pub routed: usize,
    /// Changes skipped because their channel is unknown.
    pub skipped: usize,
}

#[derive(Debug, Clone, Default)]
pub struct PassSummary {
    pub routed: usize,
    pub skipped: usize,
    /// Routed batches that were not written, e.g. on a disabled channel.
    pub held_back: usize,
    pub files: Vec<PathBuf>,
    pub checkpoint: Option<RoutingCheckpoint>,
}

pub struct Replicator {
    config: Config,
    routers: RouterRegistry,
    routes: Vec<Route>,
}

impl Replicator {
    /// Creates a replicator with the built-in routers. Every route is
    /// validated up front; a bad expression rejects the whole set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ExpressionSyntax`] or [`Error::UnknownRouter`] for the
    /// first route that fails validation.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use std::path::Path;
    /// use sync_relay::{Capture, Config, Replicator};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let config = Config::from_file("relay.toml")?;
    ///     let capture = Capture::from_json(&std::fs::read_to_string("capture.json")?)?;
    ///
    ///     let replicator = Replicator::new(config, capture.routes.clone())?;
    ///     let summary = replicator.run(&capture, Path::new("outgoing")).await?;
    ///     println!("Wrote {} batch files", summary.files.len());
    ///     Ok(())
    /// }
    /// ```
    pub fn new(config: Config, routes: Vec<Route>) -> Result<Self> {
        Self::with_routers(config, routes, RouterRegistry::with_defaults())
    }

    pub fn with_routers(
        config: Config,
        routes: Vec<Route>,
        routers: RouterRegistry,
    ) -> Result<Self> {
        for route in &routes {
            routers.validate(route)?;
        }
        Ok(Self {
            config,
            routers,
            routes,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Routes every change after the checkpoint and groups the results into
    /// batches.
    ///
    /// Changes are visited in change id order. A schema mismatch stops the
    /// pass; a change on an unknown channel is skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SchemaMismatch`] when a routed change disagrees with
    /// its schema history. No partial outcome is returned.
    #[instrument(skip_all, fields(changes = changes.len()))]
    pub fn route_changes<H, N>(
        &self,
        changes: &[ChangeRecord],
        histories: &H,
        nodes: &N,
        channels: &[Channel],
        after: Option<&RoutingCheckpoint>,
    ) -> Result<RoutingOutcome>
    where
        H: SchemaHistoryLookup + ?Sized,
        N: NodeLookup + ?Sized,
    {
        let last_change_id = after.map_or(0, |c| c.last_change_id);
        let last_batch_id = after.map_or(0, |c| c.last_batch_id);
        let mut planner = BatchPlanner::new(last_batch_id, self.config.routing.max_batch_size);

        let mut pending: Vec<&ChangeRecord> = changes
            .iter()
            .filter(|c| c.change_id > last_change_id)
            .collect();
        pending.sort_by_key(|c| c.change_id);

        let mut cursor = last_change_id;
        let mut routed = 0;
        let mut skipped = 0;

        for change in pending {
            cursor = change.change_id;

            let Some(channel) = channels.iter().find(|c| c.channel_id == change.channel_id) else {
                warn!(
                    change_id = change.change_id,
                    channel = %change.channel_id,
                    "Skipping change on unknown channel"
                );
                skipped += 1;
                continue;
            };

            if self.route_one(change, channel, histories, nodes, &mut planner)? {
                routed += 1;
            }
        }

        let checkpoint = RoutingCheckpoint::new(cursor, planner.last_batch_id());
        let batches = planner.finish();
        info!(
            routed,
            skipped,
            batches = batches.len(),
            last_change_id = checkpoint.last_change_id,
            "Routing pass complete"
        );

        Ok(RoutingOutcome {
            batches,
            checkpoint,
            routed,
            skipped,
        })
    }

    /// Routes one change through every route for its table. A node reached
    /// by more than one route receives the change once, under the first route.
    fn route_one<H, N>(
        &self,
        change: &ChangeRecord,
        channel: &Channel,
        histories: &H,
        nodes: &N,
        planner: &mut BatchPlanner,
    ) -> Result<bool>
    where
        H: SchemaHistoryLookup + ?Sized,
        N: NodeLookup + ?Sized,
    {
        let routes: Vec<&Route> = self
            .routes
            .iter()
            .filter(|r| r.is_for_table(&change.table_name))
            .collect();
        if routes.is_empty() {
            debug!(change_id = change.change_id, table = %change.table_name, "No routes for table");
            return Ok(false);
        }

        let history = resolve_history(histories, change)?;
        let mut targeted = BTreeSet::new();

        for route in routes {
            let candidates: Vec<Node> = nodes
                .nodes_in_group(&route.target_group_id)
                .into_iter()
                .filter(|n| !self.is_source(change, n))
                .collect();

            let ctx = RoutingContext::new(change, history, route).with_channel(channel);
            for node_id in self.routers.route(&ctx, &candidates)? {
                if targeted.insert(node_id.clone()) {
                    planner.add(change.change_id, &route.route_id, &node_id, channel);
                }
            }
        }

        Ok(!targeted.is_empty())
    }

    fn is_source(&self, change: &ChangeRecord, node: &Node) -> bool {
        self.config.routing.exclude_source_node
            && change.source_node_id.as_deref() == Some(node.node_id.as_str())
    }

    /// Orders a node's outstanding batches for extraction.
    ///
    /// Batches on disabled channels and batches already acknowledged are
    /// dropped. Channels are taken in processing-order rank, then channels
    /// with failing batches are moved behind healthy ones; within a channel
    /// batches stay in increasing batch id order.
    pub fn batches_to_extract<C>(
        &self,
        batches: &OutgoingBatches,
        node_id: &str,
        channels: &C,
    ) -> Vec<OutgoingBatch>
    where
        C: ChannelConfigProvider + ?Sized,
    {
        let mut pass = OutgoingBatches::new(
            batches
                .batches_for_node(node_id)
                .into_iter()
                .filter(|b| b.status != BatchStatus::Ok)
                .cloned()
                .collect(),
        );

        let mut ordered = channels.channels();
        for channel in ordered.iter().filter(|c| c.enabled) {
            pass.add_active_channel(channel);
        }
        pass.filter_batches_for_inactive_channels();
        pass.sort_channels(&mut ordered);

        let mut selected = Vec::with_capacity(pass.len());
        for channel in &ordered {
            let mut lane: Vec<OutgoingBatch> = pass
                .batches_for_channel(&channel.channel_id)
                .into_iter()
                .cloned()
                .collect();
            lane.sort_by_key(|b| b.batch_id);
            selected.extend(lane);
        }
        selected
    }

    /// Serializes one batch into `out` and hands the sink back.
    pub fn extract_batch<W, H>(
        &self,
        out: W,
        histories: &H,
        batch: &OutgoingBatch,
        changes: &HashMap<u64, &ChangeRecord>,
    ) -> Result<W>
    where
        W: Write,
        H: SchemaHistoryLookup + ?Sized,
    {
        let mut items = Vec::with_capacity(batch.len());
        for event in &batch.events {
            let change = changes.get(&event.change_id).ok_or_else(|| {
                Error::invalid_state(format!(
                    "batch {} references unknown change {}",
                    batch.batch_id, event.change_id
                ))
            })?;
            items.push((*change, event.route_id.as_str()));
        }

        let mut extractor = DataExtractor::new(out, histories, self.config.extractor_settings());
        extractor.extract_batch(batch, items)?;
        Ok(extractor.into_inner())
    }

    /// Runs a full pass over a capture: route, extract every batch to
    /// `<node>-<batch>.csv` under `output_dir`, then save the checkpoint.
    ///
    /// The checkpoint is only written after all batch files are on disk.
    /// Batches held back on a disabled channel keep the change cursor in
    /// front of them, so a later pass routes those changes again.
    ///
    /// # Errors
    ///
    /// Fails on an unreadable checkpoint, a schema mismatch, or an I/O error
    /// writing a batch file. The checkpoint is left untouched in every case.
    #[instrument(skip_all, fields(output_dir = %output_dir.display()))]
    pub async fn run(&self, capture: &Capture, output_dir: &Path) -> Result<PassSummary> {
        let checkpoints = self
            .config
            .routing
            .checkpoint_file
            .as_ref()
            .map(CheckpointManager::new);
        let previous = match &checkpoints {
            Some(manager) => manager.load().await?,
            None => None,
        };

        let histories = capture.history_registry()?;
        let outcome = self.route_changes(
            &capture.changes,
            &histories,
            &capture.nodes,
            &capture.channels,
            previous.as_ref(),
        )?;

        fs::create_dir_all(output_dir).await?;
        let by_id: HashMap<u64, &ChangeRecord> =
            capture.changes.iter().map(|c| (c.change_id, c)).collect();
        let node_ids: BTreeSet<&str> = outcome
            .batches
            .batches()
            .iter()
            .map(|b| b.node_id.as_str())
            .collect();

        let mut files = Vec::new();
        let mut written = BTreeSet::new();
        for node_id in node_ids {
            for batch in self.batches_to_extract(&outcome.batches, node_id, &capture.channels) {
                let staged = self.extract_batch(StagingBuffer::new(), &histories, &batch, &by_id)?;
                let path = output_dir.join(format!("{}-{}.csv", batch.node_id, batch.batch_id));
                fs::write(&path, staged.freeze()).await?;
                debug!(path = %path.display(), "Wrote batch file");
                files.push(path);
                written.insert(batch.batch_id);
            }
        }

        let held_back: Vec<&OutgoingBatch> = outcome
            .batches
            .batches()
            .iter()
            .filter(|b| !written.contains(&b.batch_id))
            .collect();
        let checkpoint = hold_cursor(outcome.checkpoint, &held_back);

        if let Some(manager) = &checkpoints {
            manager.save(&checkpoint).await?;
        }

        info!(
            routed = outcome.routed,
            skipped = outcome.skipped,
            files = files.len(),
            held_back = held_back.len(),
            "Pass complete"
        );

        Ok(PassSummary {
            routed: outcome.routed,
            skipped: outcome.skipped,
            held_back: held_back.len(),
            files,
            checkpoint: Some(checkpoint),
        })
    }
}

/// Moves the change cursor back in front of the earliest change in a batch
/// that was not written, so the next pass routes it again. The batch id
/// sequence is left alone; ids are never reused.
fn hold_cursor(checkpoint: RoutingCheckpoint, held_back: &[&OutgoingBatch]) -> RoutingCheckpoint {
    let earliest = held_back.iter().flat_map(|b| b.change_ids()).min();
    match earliest {
        Some(change_id) if change_id <= checkpoint.last_change_id => {
            warn!(
                batches = held_back.len(),
                change_id,
                "Batches held back on disabled channels, cursor kept before them"
            );
            RoutingCheckpoint::new(change_id.saturating_sub(1), checkpoint.last_batch_id)
        }
        _ => checkpoint,
    }
}
