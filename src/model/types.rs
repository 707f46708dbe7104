use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One row image as captured by a trigger. `None` is a SQL NULL.
pub type Row = Vec<Option<String>>;

/// Builds a [`Row`] from string slices, mapping empty strings to NULL.
pub fn row(values: &[&str]) -> Row {
    values
        .iter()
        .map(|v| if v.is_empty() { None } else { Some(v.to_string()) })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Node {
    pub node_id: String,
    pub group_id: String,
    pub external_id: String,
}

impl Node {
    /// A node whose external id equals its node id, the usual registration default.
    pub fn new(node_id: impl Into<String>, group_id: impl Into<String>) -> Self {
        let node_id = node_id.into();
        Self {
            external_id: node_id.clone(),
            node_id,
            group_id: group_id.into(),
        }
    }

    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = external_id.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub channel_id: String,
    pub processing_order: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub max_batch_size: Option<usize>,
}

impl Channel {
    pub fn new(channel_id: impl Into<String>, processing_order: i32) -> Self {
        Self {
            channel_id: channel_id.into(),
            processing_order,
            enabled: true,
            max_batch_size: None,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = Some(max_batch_size);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventKind {
    Insert,
    Update,
    Delete,
    Reload,
    Sql,
    Create,
}

impl EventKind {
    /// Row-level DML as opposed to opaque payload events.
    pub fn is_dml(&self) -> bool {
        matches!(self, EventKind::Insert | EventKind::Update | EventKind::Delete)
    }
}

/// A single captured row mutation. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub change_id: u64,
    pub event: EventKind,
    pub table_name: String,
    #[serde(default)]
    pub row_data: Option<Row>,
    #[serde(default)]
    pub old_data: Option<Row>,
    #[serde(default)]
    pub pk_data: Option<Row>,
    pub history_id: u64,
    pub channel_id: String,
    #[serde(default)]
    pub external_data: Option<String>,
    #[serde(default)]
    pub source_node_id: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl ChangeRecord {
    pub fn new(
        change_id: u64,
        event: EventKind,
        table_name: impl Into<String>,
        history_id: u64,
        channel_id: impl Into<String>,
    ) -> Self {
        Self {
            change_id,
            event,
            table_name: table_name.into(),
            row_data: None,
            old_data: None,
            pk_data: None,
            history_id,
            channel_id: channel_id.into(),
            external_data: None,
            source_node_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_row(mut self, row: Row) -> Self {
        self.row_data = Some(row);
        self
    }

    pub fn with_old(mut self, old: Row) -> Self {
        self.old_data = Some(old);
        self
    }

    pub fn with_pk(mut self, pk: Row) -> Self {
        self.pk_data = Some(pk);
        self
    }

    pub fn with_external_data(mut self, external_data: impl Into<String>) -> Self {
        self.external_data = Some(external_data.into());
        self
    }

    pub fn with_source_node(mut self, node_id: impl Into<String>) -> Self {
        self.source_node_id = Some(node_id.into());
        self
    }
}

/// A routing rule attached to a source table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    pub route_id: String,
    pub source_table: String,
    pub target_group_id: String,
    #[serde(default = "default_router_type")]
    pub router_type: String,
    #[serde(default)]
    pub expression: Option<String>,
    #[serde(default = "default_enabled")]
    pub sync_on_insert: bool,
    #[serde(default = "default_enabled")]
    pub sync_on_update: bool,
    #[serde(default = "default_enabled")]
    pub sync_on_delete: bool,
}

impl Route {
    pub fn new(
        route_id: impl Into<String>,
        source_table: impl Into<String>,
        target_group_id: impl Into<String>,
    ) -> Self {
        Self {
            route_id: route_id.into(),
            source_table: source_table.into(),
            target_group_id: target_group_id.into(),
            router_type: default_router_type(),
            expression: None,
            sync_on_insert: true,
            sync_on_update: true,
            sync_on_delete: true,
        }
    }

    pub fn with_expression(mut self, router_type: &str, expression: impl Into<String>) -> Self {
        self.router_type = router_type.to_string();
        self.expression = Some(expression.into());
        self
    }

    /// Whether this route routes the given kind of event at all.
    pub fn applies_to(&self, event: EventKind) -> bool {
        match event {
            EventKind::Insert => self.sync_on_insert,
            EventKind::Update => self.sync_on_update,
            EventKind::Delete => self.sync_on_delete,
            EventKind::Reload | EventKind::Sql | EventKind::Create => true,
        }
    }

    pub fn is_for_table(&self, table_name: &str) -> bool {
        self.source_table.eq_ignore_ascii_case(table_name)
    }
}

/// Resolves registered nodes for bind-variable evaluation and candidate selection.
pub trait NodeLookup {
    fn node(&self, node_id: &str) -> Option<Node>;
    fn nodes_in_group(&self, group_id: &str) -> Vec<Node>;
}

impl NodeLookup for [Node] {
    fn node(&self, node_id: &str) -> Option<Node> {
        self.iter().find(|n| n.node_id == node_id).cloned()
    }

    fn nodes_in_group(&self, group_id: &str) -> Vec<Node> {
        self.iter().filter(|n| n.group_id == group_id).cloned().collect()
    }
}

impl NodeLookup for Vec<Node> {
    fn node(&self, node_id: &str) -> Option<Node> {
        self.as_slice().node(node_id)
    }

    fn nodes_in_group(&self, group_id: &str) -> Vec<Node> {
        self.as_slice().nodes_in_group(group_id)
    }
}

/// Supplies channel configuration ordered by processing rank.
pub trait ChannelConfigProvider {
    fn channels(&self) -> Vec<Channel>;
}

impl ChannelConfigProvider for Vec<Channel> {
    fn channels(&self) -> Vec<Channel> {
        let mut channels = self.clone();
        channels.sort_by_key(|c| c.processing_order);
        channels
    }
}

fn default_enabled() -> bool {
    true
}

fn default_router_type() -> String {
    "default".to_string()
}
