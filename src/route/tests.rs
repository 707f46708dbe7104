use super::*;
use crate::model::{row, EventKind, Node, Route, SchemaHistory};
use std::collections::HashMap;

fn history(columns: &[&str]) -> SchemaHistory {
    SchemaHistory::new(1, "mytable", &["ID"], columns)
}

fn insert(values: &[&str]) -> ChangeRecord {
    ChangeRecord::new(1, EventKind::Insert, "mytable", 1, "default").with_row(row(values))
}

fn column_route(expression: &str) -> Route {
    Route::new("route1", "mytable", "client").with_expression(RouterRegistry::COLUMN, expression)
}

fn client_nodes(ids: &[&str]) -> Vec<Node> {
    ids.iter().map(|id| Node::new(*id, "client")).collect()
}

fn route_ids(
    registry: &RouterRegistry,
    change: &ChangeRecord,
    history: &SchemaHistory,
    route: &Route,
    nodes: &[Node],
) -> Vec<String> {
    let ctx = RoutingContext::new(change, history, route);
    registry.route(&ctx, nodes).unwrap().into_iter().collect()
}

#[test]
fn test_equals_node_id() {
    let registry = RouterRegistry::with_defaults();
    let history = history(&["ID", "NODE_ID", "COLUMN2"]);
    let change = insert(&["1", "100", "Super Dooper"]);
    let nodes = client_nodes(&["100", "200", "300"]);

    let result = route_ids(
        &registry,
        &change,
        &history,
        &column_route("NODE_ID = :NODE_ID"),
        &nodes,
    );
    assert_eq!(result, vec!["100"]);
}

#[test]
fn test_not_equals_node_id() {
    let registry = RouterRegistry::with_defaults();
    let history = history(&["ID", "NODE_ID", "COLUMN2"]);
    let change = insert(&["1", "100", "Super Dooper"]);
    let nodes = client_nodes(&["100", "200", "300"]);

    let result = route_ids(
        &registry,
        &change,
        &history,
        &column_route("NODE_ID != :NODE_ID"),
        &nodes,
    );
    assert_eq!(result, vec!["200", "300"]);
}

#[test]
fn test_equals_external_id() {
    let registry = RouterRegistry::with_defaults();
    let history = history(&["ID", "STORE_ID", "COLUMN2"]);
    let change = insert(&["1", "100", "Super Dooper"]);
    let nodes = client_nodes(&["1000", "100", "10"]);

    let result = route_ids(
        &registry,
        &change,
        &history,
        &column_route("STORE_ID = :EXTERNAL_ID"),
        &nodes,
    );
    assert_eq!(result, vec!["100"]);
}

#[test]
fn test_external_id_differs_from_node_id() {
    let registry = RouterRegistry::with_defaults();
    let history = history(&["ID", "STORE_ID"]);
    let change = insert(&["1", "store-7"]);
    let nodes = vec![
        Node::new("001", "client").with_external_id("store-7"),
        Node::new("002", "client").with_external_id("store-8"),
    ];

    let result = route_ids(
        &registry,
        &change,
        &history,
        &column_route("STORE_ID=:EXTERNAL_ID"),
        &nodes,
    );
    assert_eq!(result, vec!["001"]);
}

#[test]
fn test_equals_group_id() {
    let registry = RouterRegistry::with_defaults();
    let history = history(&["ID", "GROUP_ID", "COLUMN2"]);
    let change = insert(&["1", "client", "Super Dooper"]);
    let nodes = vec![
        Node::new("10", "server"),
        Node::new("20", "server"),
        Node::new("3", "client"),
        Node::new("2", "client"),
        Node::new("1", "client"),
    ];

    let result = route_ids(
        &registry,
        &change,
        &history,
        &column_route("GROUP_ID = :NODE_GROUP_ID"),
        &nodes,
    );
    assert_eq!(result, vec!["1", "2", "3"]);
}

#[test]
fn test_equals_null_matches_blank_column() {
    let registry = RouterRegistry::with_defaults();
    let history = history(&["ID", "NODE_ID", "COLUMN2"]);
    let change = insert(&["1", "100", ""]);
    let nodes = client_nodes(&["100", "200"]);

    let result = route_ids(&registry, &change, &history, &column_route("COLUMN2 = NULL"), &nodes);
    assert_eq!(result, vec!["100", "200"]);

    let result = route_ids(&registry, &change, &history, &column_route("COLUMN2 != NULL"), &nodes);
    assert!(result.is_empty());
}

#[test]
fn test_external_data_contains() {
    let registry = RouterRegistry::with_defaults();
    let history = history(&["ID", "NODE_ID", "COLUMN2"]);
    let change = insert(&["1", "100", "Super Dooper"]).with_external_data("1000,200");
    let nodes = client_nodes(&["100", "200", "300", "1000"]);

    let result = route_ids(
        &registry,
        &change,
        &history,
        &column_route("EXTERNAL_DATA contains :NODE_ID"),
        &nodes,
    );
    assert_eq!(result, vec!["1000", "200"]);

    let result = route_ids(
        &registry,
        &change,
        &history,
        &column_route("EXTERNAL_DATA not contains :NODE_ID"),
        &nodes,
    );
    assert_eq!(result, vec!["100", "300"]);
}

#[test]
fn test_literal_match_selects_every_candidate() {
    let registry = RouterRegistry::with_defaults();
    let history = history(&["ID", "STATUS"]);
    let nodes = client_nodes(&["1", "2"]);

    let shipped = insert(&["1", "SHIPPED"]);
    let result = route_ids(
        &registry,
        &shipped,
        &history,
        &column_route("status = SHIPPED"),
        &nodes,
    );
    assert_eq!(result, vec!["1", "2"]);

    let pending = insert(&["1", "PENDING"]);
    let result = route_ids(&registry, &pending, &history, &column_route("STATUS=SHIPPED"), &nodes);
    assert!(result.is_empty());
}

#[test]
fn test_clauses_are_or_combined() {
    let registry = RouterRegistry::with_defaults();
    let history = history(&["ID", "NODE_ID"]);
    let change = insert(&["200", "100"]);
    let nodes = client_nodes(&["100", "200", "300"]);

    let route = column_route("NODE_ID = :NODE_ID\nID = :NODE_ID or ID = 999");
    let result = route_ids(&registry, &change, &history, &route, &nodes);
    assert_eq!(result, vec!["100", "200"]);
}

#[test]
fn test_old_column_and_column_bind() {
    let registry = RouterRegistry::with_defaults();
    let history = history(&["ID", "STATUS", "PREV"]);
    let change = ChangeRecord::new(1, EventKind::Update, "mytable", 1, "default")
        .with_row(row(&["1", "OPEN", "OPEN"]))
        .with_old(row(&["1", "CLOSED", "OPEN"]));
    let nodes = client_nodes(&["1"]);

    let result = route_ids(
        &registry,
        &change,
        &history,
        &column_route("OLD_STATUS=CLOSED"),
        &nodes,
    );
    assert_eq!(result, vec!["1"]);

    let result = route_ids(&registry, &change, &history, &column_route("STATUS=:PREV"), &nodes);
    assert_eq!(result, vec!["1"]);

    let result = route_ids(
        &registry,
        &change,
        &history,
        &column_route("OLD_STATUS=:STATUS"),
        &nodes,
    );
    assert!(result.is_empty());
}

#[test]
fn test_delete_matches_against_old_row() {
    let registry = RouterRegistry::with_defaults();
    let history = history(&["ID", "NODE_ID"]);
    let change = ChangeRecord::new(1, EventKind::Delete, "mytable", 1, "default")
        .with_old(row(&["1", "200"]))
        .with_pk(row(&["1"]));
    let nodes = client_nodes(&["100", "200"]);

    let result = route_ids(&registry, &change, &history, &column_route("NODE_ID=:NODE_ID"), &nodes);
    assert_eq!(result, vec!["200"]);
}

#[test]
fn test_redirect_node() {
    let mut redirects = HashMap::new();
    redirects.insert("store-9".to_string(), "region-1".to_string());
    let registry = RouterRegistry::with_redirects(redirects);
    let history = history(&["ID", "STORE_ID"]);
    let nodes = vec![Node::new("region-1", "region"), Node::new("region-2", "region")];

    let change = insert(&["1", "store-9"]);
    let result = route_ids(
        &registry,
        &change,
        &history,
        &column_route("STORE_ID=:REDIRECT_NODE"),
        &nodes,
    );
    assert_eq!(result, vec!["region-1"]);

    let unknown = insert(&["1", "store-3"]);
    let result = route_ids(
        &registry,
        &unknown,
        &history,
        &column_route("STORE_ID=:REDIRECT_NODE"),
        &nodes,
    );
    assert!(result.is_empty());
}

#[test]
fn test_absent_expression_matches_all() {
    let registry = RouterRegistry::with_defaults();
    let history = history(&["ID"]);
    let change = insert(&["1"]);
    let nodes = client_nodes(&["1", "2"]);

    let mut route = column_route("");
    route.expression = None;
    assert_eq!(route_ids(&registry, &change, &history, &route, &nodes), vec!["1", "2"]);

    let blank = column_route("   ");
    assert_eq!(route_ids(&registry, &change, &history, &blank, &nodes), vec!["1", "2"]);
}

#[test]
fn test_empty_candidate_set_is_not_an_error() {
    let registry = RouterRegistry::with_defaults();
    let history = history(&["ID", "NODE_ID"]);
    let change = insert(&["1", "100"]);

    let result = route_ids(&registry, &change, &history, &column_route("NODE_ID=:NODE_ID"), &[]);
    assert!(result.is_empty());
}

#[test]
fn test_route_event_filter() {
    let registry = RouterRegistry::with_defaults();
    let history = history(&["ID"]);
    let change = insert(&["1"]);
    let nodes = client_nodes(&["1"]);

    let mut route = Route::new("r", "mytable", "client");
    route.sync_on_insert = false;
    assert!(route_ids(&registry, &change, &history, &route, &nodes).is_empty());
}

#[test]
fn test_default_router_routes_to_all_candidates() {
    let registry = RouterRegistry::with_defaults();
    let history = history(&["ID"]);
    let change = insert(&["1"]);
    let nodes = client_nodes(&["3", "1", "2"]);

    let route = Route::new("r", "mytable", "client");
    assert_eq!(route_ids(&registry, &change, &history, &route, &nodes), vec!["1", "2", "3"]);
}

#[test]
fn test_validate_rejects_bad_routes() {
    let registry = RouterRegistry::with_defaults();

    assert!(registry.validate(&column_route("NODE_ID = :NODE_ID")).is_ok());
    assert!(matches!(
        registry.validate(&column_route("NODE_ID :NODE_ID")),
        Err(Error::ExpressionSyntax { .. })
    ));

    let mut unknown = Route::new("r", "mytable", "client");
    unknown.router_type = "lookuptable".to_string();
    assert!(matches!(registry.validate(&unknown), Err(Error::UnknownRouter(_))));
}

#[test]
fn test_custom_router_registration() {
    struct FirstNodeRouter;

    impl DataRouter for FirstNodeRouter {
        fn route_to_nodes(
            &self,
            _ctx: &RoutingContext<'_>,
            nodes: &[Node],
        ) -> Result<BTreeSet<String>> {
            Ok(nodes.iter().take(1).map(|n| n.node_id.clone()).collect())
        }
    }

    let mut registry = RouterRegistry::with_defaults();
    registry.register("first", FirstNodeRouter);

    let history = history(&["ID"]);
    let change = insert(&["1"]);
    let mut route = Route::new("r", "mytable", "client");
    route.router_type = "FIRST".to_string();

    let result = route_ids(&registry, &change, &history, &route, &client_nodes(&["9", "8"]));
    assert_eq!(result, vec!["9"]);
}
