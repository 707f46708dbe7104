//! Streams outgoing batches in the line-oriented wire format.
//!
//! A [`DataExtractor`] owns one output sink for the lifetime of a stream.
//! `NODEID` and `BINARY` open the stream, then each batch is framed by
//! `BATCH`/`COMMIT`. Table metadata is declared the first time a schema
//! history appears in a batch; afterwards a bare `TABLE` record marks a
//! switch between tables or routes.

use std::collections::HashSet;
use std::io::Write;
use tracing::{debug, info};

use super::protocol::{self, write_names, write_values};
use crate::batch::OutgoingBatch;
use crate::model::{
    resolve_history, ChangeRecord, EventKind, Row, SchemaHistory, SchemaHistoryLookup,
};
use crate::{Error, Result};

/// Stream-level settings shared by every batch an extractor writes.
#[derive(Debug, Clone)]
pub struct ExtractorSettings {
    /// Identity of the sending node, written as `NODEID`.
    pub node_id: String,
    pub binary_encoding: String,
    /// Write an `OLD` record ahead of updates that carry an old row image.
    pub include_old_data: bool,
}

impl ExtractorSettings {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            binary_encoding: "BASE64".to_string(),
            include_old_data: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractorState {
    Idle,
    StreamOpened,
    BatchOpen,
    TableDeclared,
    TableSwitched,
    BatchCommitted,
}

impl ExtractorState {
    fn in_batch(self) -> bool {
        matches!(
            self,
            ExtractorState::BatchOpen
                | ExtractorState::TableDeclared
                | ExtractorState::TableSwitched
        )
    }
}

pub struct DataExtractor<'h, W, L>
where
    W: Write,
    L: SchemaHistoryLookup + ?Sized,
{
    out: W,
    histories: &'h L,
    settings: ExtractorSettings,
    state: ExtractorState,
    batch_id: Option<u64>,
    last_channel: Option<String>,
    seen_histories: HashSet<u64>,
    last_seen: Option<(u64, String)>,
}

impl<'h, W, L> DataExtractor<'h, W, L>
where
    W: Write,
    L: SchemaHistoryLookup + ?Sized,
{
    /// Creates an extractor writing to `out`. Nothing is written until the
    /// first batch starts.
    pub fn new(out: W, histories: &'h L, settings: ExtractorSettings) -> Self {
        Self {
            out,
            histories,
            settings,
            state: ExtractorState::Idle,
            batch_id: None,
            last_channel: None,
            seen_histories: HashSet::new(),
            last_seen: None,
        }
    }

    pub fn state(&self) -> ExtractorState {
        self.state
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Writes the stream preamble. Only valid once, before the first batch.
    pub fn open_stream(&mut self) -> Result<()> {
        if self.state != ExtractorState::Idle {
            return Err(Error::invalid_state(format!(
                "stream already opened (state {:?})",
                self.state
            )));
        }

        write_names(&mut self.out, protocol::NODEID, [&self.settings.node_id])?;
        write_names(&mut self.out, protocol::BINARY, [&self.settings.binary_encoding])?;
        self.state = ExtractorState::StreamOpened;
        Ok(())
    }

    /// Starts a batch, opening the stream first if needed.
    ///
    /// `CHANNEL` is written only when it differs from the previous batch.
    pub fn begin_batch(&mut self, batch: &OutgoingBatch) -> Result<()> {
        match self.state {
            ExtractorState::Idle => self.open_stream()?,
            ExtractorState::StreamOpened | ExtractorState::BatchCommitted => {}
            state => {
                return Err(Error::invalid_state(format!(
                    "cannot begin batch {} while batch {:?} is open (state {:?})",
                    batch.batch_id, self.batch_id, state
                )))
            }
        }

        if self.last_channel.as_deref() != Some(batch.channel_id.as_str()) {
            write_names(&mut self.out, protocol::CHANNEL, [&batch.channel_id])?;
            self.last_channel = Some(batch.channel_id.clone());
        }
        write_names(&mut self.out, protocol::BATCH, [batch.batch_id.to_string()])?;

        self.batch_id = Some(batch.batch_id);
        self.seen_histories.clear();
        self.last_seen = None;
        self.state = ExtractorState::BatchOpen;
        Ok(())
    }

    /// Writes one change selected by `route_id` into the open batch.
    pub fn write_change(&mut self, change: &ChangeRecord, route_id: &str) -> Result<()> {
        if !self.state.in_batch() {
            return Err(Error::invalid_state(format!(
                "change {} written outside of a batch (state {:?})",
                change.change_id, self.state
            )));
        }

        let history = self.validate(change)?;
        self.write_table_header(history, route_id)?;
        self.write_event(change, history)
    }

    /// Writes the commit marker for the open batch and flushes the sink.
    pub fn commit(&mut self) -> Result<u64> {
        let batch_id = match (self.state.in_batch(), self.batch_id) {
            (true, Some(batch_id)) => batch_id,
            _ => {
                return Err(Error::invalid_state(format!(
                    "no open batch to commit (state {:?})",
                    self.state
                )))
            }
        };

        write_names(&mut self.out, protocol::COMMIT, [batch_id.to_string()])?;
        self.out.flush()?;
        self.state = ExtractorState::BatchCommitted;
        Ok(batch_id)
    }

    /// Serializes a whole batch. Every change is checked against its schema
    /// history before anything is written, so a bad change fails the batch
    /// with no output at all.
    ///
    /// Returns the number of change records written.
    ///
    /// # Errors
    ///
    /// - [`Error::SchemaMismatch`] if a change has no usable schema history or
    ///   its row does not match the history's columns.
    /// - [`Error::InvalidState`] if a batch is already open.
    /// - [`Error::SinkWrite`] if the sink fails; no `COMMIT` is written.
    ///
    /// # Example
    ///
    /// ```rust
    /// use sync_relay::batch::OutgoingBatch;
    /// use sync_relay::extract::{DataExtractor, ExtractorSettings};
    /// use sync_relay::model::{row, ChangeRecord, EventKind, SchemaHistory, SchemaHistoryRegistry};
    ///
    /// let mut histories = SchemaHistoryRegistry::new();
    /// histories.insert(SchemaHistory::new(1, "orders", &["ID"], &["ID", "STATUS"]))?;
    ///
    /// let change = ChangeRecord::new(7, EventKind::Insert, "orders", 1, "default")
    ///     .with_row(row(&["1", "open"]));
    /// let mut batch = OutgoingBatch::new(1, "store-1", "default");
    /// batch.push(7, "orders");
    ///
    /// let mut extractor =
    ///     DataExtractor::new(Vec::new(), &histories, ExtractorSettings::new("corp-000"));
    /// extractor.extract_batch(&batch, [(&change, "orders")])?;
    ///
    /// let text = String::from_utf8(extractor.into_inner()).unwrap();
    /// assert!(text.contains("INSERT, \"1\",\"open\"\n"));
    /// assert!(text.ends_with("COMMIT, 1\n"));
    /// # Ok::<(), sync_relay::Error>(())
    /// ```
    pub fn extract_batch<'c, I>(&mut self, batch: &OutgoingBatch, changes: I) -> Result<usize>
    where
        I: IntoIterator<Item = (&'c ChangeRecord, &'c str)>,
    {
        let changes: Vec<(&ChangeRecord, &str)> = changes.into_iter().collect();
        for (change, _) in &changes {
            self.validate(change)?;
        }

        self.begin_batch(batch)?;
        for (change, route_id) in &changes {
            self.write_change(change, route_id)?;
        }
        self.commit()?;

        info!(
            batch_id = batch.batch_id,
            node_id = %batch.node_id,
            channel = %batch.channel_id,
            changes = changes.len(),
            "Extracted batch"
        );
        Ok(changes.len())
    }

    fn validate(&self, change: &ChangeRecord) -> Result<&'h SchemaHistory> {
        let history = resolve_history(self.histories, change)?;
        let width = history.columns.len();
        let mismatch = |what: &str, len: usize| {
            Error::schema_mismatch(format!(
                "change {} has {} {} values but table '{}' has {} columns",
                change.change_id, len, what, history.source_table, width
            ))
        };

        if matches!(change.event, EventKind::Insert | EventKind::Update) {
            let row = change.row_data.as_ref().ok_or_else(|| {
                Error::schema_mismatch(format!("change {} has no row data", change.change_id))
            })?;
            if row.len() != width {
                return Err(mismatch("row", row.len()));
            }
        }
        if let Some(old) = &change.old_data {
            if change.event.is_dml() && old.len() != width {
                return Err(mismatch("old", old.len()));
            }
        }
        if matches!(change.event, EventKind::Update | EventKind::Delete) {
            let keys = key_values(change, history).ok_or_else(|| {
                Error::schema_mismatch(format!(
                    "change {} carries no key values for table '{}'",
                    change.change_id, history.source_table
                ))
            })?;
            if keys.len() != history.key_columns.len() {
                return Err(Error::schema_mismatch(format!(
                    "change {} has {} key values but table '{}' has {} key columns",
                    change.change_id,
                    keys.len(),
                    history.source_table,
                    history.key_columns.len()
                )));
            }
        }

        Ok(history)
    }

    fn write_table_header(&mut self, history: &SchemaHistory, route_id: &str) -> Result<()> {
        if self.seen_histories.insert(history.history_id) {
            debug!(
                table = %history.source_table,
                history_id = history.history_id,
                route_id,
                "Declaring table"
            );
            write_names(&mut self.out, protocol::SCHEMA, history.source_schema.iter())?;
            write_names(&mut self.out, protocol::CATALOG, history.source_catalog.iter())?;
            write_names(&mut self.out, protocol::TABLE, [&history.source_table])?;
            write_names(&mut self.out, protocol::KEYS, &history.key_columns)?;
            write_names(&mut self.out, protocol::COLUMNS, &history.columns)?;
            self.state = ExtractorState::TableDeclared;
        } else if !self.is_last_seen(history.history_id, route_id) {
            write_names(&mut self.out, protocol::TABLE, [&history.source_table])?;
            self.state = ExtractorState::TableSwitched;
        }

        self.last_seen = Some((history.history_id, route_id.to_string()));
        Ok(())
    }

    fn is_last_seen(&self, history_id: u64, route_id: &str) -> bool {
        matches!(&self.last_seen, Some((h, r)) if *h == history_id && r == route_id)
    }

    fn write_event(&mut self, change: &ChangeRecord, history: &SchemaHistory) -> Result<()> {
        let out = &mut self.out;
        match change.event {
            EventKind::Insert => {
                write_values(out, protocol::INSERT, change.row_data.iter().flatten())?;
            }
            EventKind::Update => {
                if self.settings.include_old_data {
                    if let Some(old) = &change.old_data {
                        write_values(out, protocol::OLD, old)?;
                    }
                }
                let keys = key_values(change, history).unwrap_or_default();
                write_values(
                    out,
                    protocol::UPDATE,
                    keys.iter().chain(change.row_data.iter().flatten()),
                )?;
            }
            EventKind::Delete => {
                let keys = key_values(change, history).unwrap_or_default();
                write_values(out, protocol::DELETE, &keys)?;
            }
            EventKind::Reload => write_payload(out, protocol::RELOAD, change)?,
            EventKind::Sql => write_payload(out, protocol::SQL, change)?,
            EventKind::Create => write_payload(out, protocol::CREATE, change)?,
        }
        Ok(())
    }
}

/// Key values of a change: the captured primary key, or the key columns
/// picked out of the old (then new) row image.
fn key_values(change: &ChangeRecord, history: &SchemaHistory) -> Option<Row> {
    if let Some(pk) = &change.pk_data {
        return Some(pk.clone());
    }

    let image = change.old_data.as_ref().or(change.row_data.as_ref())?;
    let indices = history.key_indices();
    if indices.len() != history.key_columns.len() {
        return None;
    }
    indices.into_iter().map(|i| image.get(i).cloned()).collect()
}

fn write_payload<W: Write>(out: &mut W, tag: &str, change: &ChangeRecord) -> std::io::Result<()> {
    let payload = change
        .row_data
        .as_ref()
        .and_then(|row| row.first().cloned())
        .flatten();
    write_values(out, tag, [&payload])
}
