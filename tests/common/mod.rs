#![allow(dead_code)]

use std::path::PathBuf;
use sync_relay::config::{Config, ExtractionConfig, NodeConfig, RoutingConfig};
use sync_relay::model::{row, ChangeRecord, Channel, EventKind, Node, Route, SchemaHistory};
use sync_relay::route::RouterRegistry;
use sync_relay::Capture;

pub const ORDERS_HISTORY: u64 = 1;
pub const ITEMS_HISTORY: u64 = 2;

/// Relay configuration for the `corp-000` hub node.
pub fn test_config(checkpoint_file: Option<PathBuf>) -> Config {
    Config {
        node: NodeConfig {
            node_id: "corp-000".to_string(),
            group_id: "corp".to_string(),
            external_id: None,
        },
        routing: RoutingConfig {
            max_batch_size: 100,
            checkpoint_file,
            exclude_source_node: true,
        },
        extraction: ExtractionConfig {
            binary_encoding: "BASE64".to_string(),
            include_old_data: true,
            output_dir: PathBuf::from("outgoing"),
        },
    }
}

pub fn nodes() -> Vec<Node> {
    vec![
        Node::new("corp-000", "corp"),
        Node::new("store-1", "store"),
        Node::new("store-2", "store"),
        Node::new("store-3", "store"),
    ]
}

/// `config` is ranked ahead of `default`.
pub fn channels() -> Vec<Channel> {
    vec![Channel::new("default", 1), Channel::new("config", 0)]
}

/// Orders go to the store named in `STORE_ID`; items go to every store.
pub fn routes() -> Vec<Route> {
    vec![
        Route::new("corp-orders", "orders", "store")
            .with_expression(RouterRegistry::COLUMN, "STORE_ID = :NODE_ID"),
        Route::new("corp-items", "items", "store"),
    ]
}

pub fn histories() -> Vec<SchemaHistory> {
    vec![
        SchemaHistory::new(ORDERS_HISTORY, "orders", &["ID"], &["ID", "STORE_ID", "STATUS"]),
        SchemaHistory::new(ITEMS_HISTORY, "items", &["ID"], &["ID", "NAME"]),
    ]
}

pub fn order(change_id: u64, event: EventKind) -> ChangeRecord {
    ChangeRecord::new(change_id, event, "orders", ORDERS_HISTORY, "default")
}

/// Five changes:
///
/// 1. order insert for store-1
/// 2. item insert on the `config` channel, for every store
/// 3. order update for store-2
/// 4. order delete for store-1 (old row only)
/// 5. order insert for store-3 captured at store-3, so never sent back
pub fn changes() -> Vec<ChangeRecord> {
    vec![
        order(1, EventKind::Insert).with_row(row(&["1", "store-1", "open"])),
        ChangeRecord::new(2, EventKind::Insert, "items", ITEMS_HISTORY, "config")
            .with_row(row(&["10", "widget"])),
        order(3, EventKind::Update)
            .with_row(row(&["2", "store-2", "shipped"]))
            .with_old(row(&["2", "store-2", "open"]))
            .with_pk(row(&["2"])),
        order(4, EventKind::Delete).with_old(row(&["1", "store-1", "open"])),
        order(5, EventKind::Insert)
            .with_row(row(&["3", "store-3", "open"]))
            .with_source_node("store-3"),
    ]
}

pub fn capture() -> Capture {
    Capture {
        nodes: nodes(),
        channels: channels(),
        routes: routes(),
        histories: histories(),
        changes: changes(),
    }
}
