//! Versioned snapshots of captured table shapes.
//!
//! A [`SchemaHistory`] is never mutated after creation except to mark it
//! inactive. A shape change produces a new history with a new id, so every
//! [`ChangeRecord`] can always be interpreted against the exact column list
//! that was in force when it was captured.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

use super::types::ChangeRecord;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InactivationReason {
    SchemaChanged,
    TableDropped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaHistory {
    pub history_id: u64,
    pub source_table: String,
    #[serde(default)]
    pub source_schema: Option<String>,
    #[serde(default)]
    pub source_catalog: Option<String>,
    pub key_columns: Vec<String>,
    pub columns: Vec<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub inactive_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub inactive_reason: Option<InactivationReason>,
}

impl SchemaHistory {
    pub fn new(
        history_id: u64,
        source_table: &str,
        key_columns: &[&str],
        columns: &[&str],
    ) -> Self {
        Self {
            history_id,
            source_table: source_table.to_string(),
            source_schema: None,
            source_catalog: None,
            key_columns: key_columns.iter().map(|c| c.to_string()).collect(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            created_at: Utc::now(),
            inactive_at: None,
            inactive_reason: None,
        }
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.source_schema = Some(schema.into());
        self
    }

    pub fn with_catalog(mut self, catalog: impl Into<String>) -> Self {
        self.source_catalog = Some(catalog.into());
        self
    }

    pub fn is_active(&self) -> bool {
        self.inactive_at.is_none()
    }

    pub fn is_for_table(&self, table_name: &str) -> bool {
        self.source_table.eq_ignore_ascii_case(table_name)
    }

    /// Position of a column, compared case-insensitively.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.eq_ignore_ascii_case(name))
    }

    /// Positions of the key columns within the full column list.
    pub fn key_indices(&self) -> Vec<usize> {
        self.key_columns
            .iter()
            .filter_map(|k| self.column_index(k))
            .collect()
    }

    fn same_shape(&self, key_columns: &[&str], columns: &[&str]) -> bool {
        self.key_columns.iter().map(String::as_str).eq(key_columns.iter().copied())
            && self.columns.iter().map(String::as_str).eq(columns.iter().copied())
    }
}

pub trait SchemaHistoryLookup {
    fn history(&self, history_id: u64) -> Option<&SchemaHistory>;
    fn active_history(&self, table_name: &str) -> Option<&SchemaHistory>;
}

/// Resolves the history a change refers to and checks that the table names agree.
pub fn resolve_history<'a, L>(lookup: &'a L, change: &ChangeRecord) -> Result<&'a SchemaHistory>
where
    L: SchemaHistoryLookup + ?Sized,
{
    let history = lookup.history(change.history_id).ok_or_else(|| {
        Error::schema_mismatch(format!(
            "change {} references unknown schema history {}",
            change.change_id, change.history_id
        ))
    })?;

    if !history.is_for_table(&change.table_name) {
        return Err(Error::schema_mismatch(format!(
            "change {} is for table '{}' but schema history {} describes '{}'",
            change.change_id, change.table_name, history.history_id, history.source_table
        )));
    }

    Ok(history)
}

/// In-memory registry of schema histories keyed by history id.
#[derive(Debug, Default, Clone)]
pub struct SchemaHistoryRegistry {
    histories: BTreeMap<u64, SchemaHistory>,
    next_id: u64,
}

impl SchemaHistoryRegistry {
    pub fn new() -> Self {
        Self {
            histories: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Loads a previously persisted history.
    ///
    /// Fails if the id is taken or the table already has a different active history.
    pub fn insert(&mut self, history: SchemaHistory) -> Result<()> {
        if self.histories.contains_key(&history.history_id) {
            return Err(Error::schema_mismatch(format!(
                "schema history {} is already registered",
                history.history_id
            )));
        }
        if history.is_active() {
            if let Some(active) = self.active_history(&history.source_table) {
                return Err(Error::schema_mismatch(format!(
                    "table '{}' already has active schema history {}",
                    history.source_table, active.history_id
                )));
            }
        }

        self.next_id = self.next_id.max(history.history_id + 1);
        self.histories.insert(history.history_id, history);
        Ok(())
    }

    /// Returns the id of the active history matching this shape, creating a
    /// new history and retiring the previous one if the shape changed.
    pub fn record_shape(
        &mut self,
        table_name: &str,
        key_columns: &[&str],
        columns: &[&str],
    ) -> u64 {
        if let Some(active) = self.active_history(table_name) {
            if active.same_shape(key_columns, columns) {
                return active.history_id;
            }
        }

        self.retire(table_name, InactivationReason::SchemaChanged);

        let history_id = self.next_id.max(1);
        self.next_id = history_id + 1;
        self.histories.insert(
            history_id,
            SchemaHistory::new(history_id, table_name, key_columns, columns),
        );
        debug!(table = table_name, history_id, "Recorded new schema history");
        history_id
    }

    /// Marks the active history of a table inactive. Returns the retired id, if any.
    pub fn inactivate(&mut self, table_name: &str, reason: InactivationReason) -> Option<u64> {
        self.retire(table_name, reason)
    }

    pub fn len(&self) -> usize {
        self.histories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.histories.is_empty()
    }

    fn retire(&mut self, table_name: &str, reason: InactivationReason) -> Option<u64> {
        let history = self
            .histories
            .values_mut()
            .find(|h| h.is_active() && h.is_for_table(table_name))?;
        history.inactive_at = Some(Utc::now());
        history.inactive_reason = Some(reason);
        info!(
            table = table_name,
            history_id = history.history_id,
            ?reason,
            "Inactivated schema history"
        );
        Some(history.history_id)
    }
}

impl SchemaHistoryLookup for SchemaHistoryRegistry {
    fn history(&self, history_id: u64) -> Option<&SchemaHistory> {
        self.histories.get(&history_id)
    }

    fn active_history(&self, table_name: &str) -> Option<&SchemaHistory> {
        self.histories
            .values()
            .find(|h| h.is_active() && h.is_for_table(table_name))
    }
}
