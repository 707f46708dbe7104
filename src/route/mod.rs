//! Routing: deciding which candidate nodes receive a captured change.
//!
//! Every matcher implements [`DataRouter`] and is registered by name in a
//! [`RouterRegistry`]. A [`Route`] selects its matcher through
//! `router_type`; adding a matcher means registering a new name.

pub mod column_match;
pub mod expression;

#[cfg(test)]
mod tests;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, trace};

use crate::model::{Channel, ChangeRecord, Node, Route, SchemaHistory};
use crate::{Error, Result};

pub use column_match::ColumnMatchDataRouter;
pub use expression::{Clause, Operator};

/// Everything a matcher may consult for one change/route evaluation.
#[derive(Debug, Clone, Copy)]
pub struct RoutingContext<'a> {
    pub change: &'a ChangeRecord,
    pub history: &'a SchemaHistory,
    pub route: &'a Route,
    pub channel: Option<&'a Channel>,
}

impl<'a> RoutingContext<'a> {
    pub fn new(change: &'a ChangeRecord, history: &'a SchemaHistory, route: &'a Route) -> Self {
        Self {
            change,
            history,
            route,
            channel: None,
        }
    }

    pub fn with_channel(mut self, channel: &'a Channel) -> Self {
        self.channel = Some(channel);
        self
    }
}

pub trait DataRouter: Send + Sync {
    /// Returns the ids of the candidate nodes that should receive the change.
    fn route_to_nodes(&self, ctx: &RoutingContext<'_>, nodes: &[Node]) -> Result<BTreeSet<String>>;

    /// Rejects route configuration this matcher cannot evaluate.
    fn validate(&self, _route: &Route) -> Result<()> {
        Ok(())
    }
}

/// Routes to every candidate node, i.e. to the whole target node group.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultDataRouter;

impl DataRouter for DefaultDataRouter {
    fn route_to_nodes(
        &self,
        _ctx: &RoutingContext<'_>,
        nodes: &[Node],
    ) -> Result<BTreeSet<String>> {
        Ok(node_ids(nodes))
    }
}

pub(crate) fn node_ids(nodes: &[Node]) -> BTreeSet<String> {
    nodes.iter().map(|n| n.node_id.clone()).collect()
}

/// Name-keyed registry of matchers.
#[derive(Clone)]
pub struct RouterRegistry {
    routers: HashMap<String, Arc<dyn DataRouter>>,
}

impl RouterRegistry {
    pub const DEFAULT: &'static str = "default";
    pub const COLUMN: &'static str = "column";

    /// An empty registry. Most callers want [`RouterRegistry::with_defaults`].
    pub fn new() -> Self {
        Self {
            routers: HashMap::new(),
        }
    }

    /// Registry with the built-in `default` and `column` matchers.
    pub fn with_defaults() -> Self {
        Self::with_redirects(HashMap::new())
    }

    /// Like [`RouterRegistry::with_defaults`], with a registration-redirect
    /// map (external id to node id) for `:REDIRECT_NODE` expressions.
    pub fn with_redirects(redirects: HashMap<String, String>) -> Self {
        let mut registry = Self::new();
        registry.register(Self::DEFAULT, DefaultDataRouter);
        registry.register(Self::COLUMN, ColumnMatchDataRouter::new().with_redirects(redirects));
        registry
    }

    /// Registers `router` under `name`, replacing any matcher already using
    /// it. Names are case-insensitive.
    pub fn register(&mut self, name: &str, router: impl DataRouter + 'static) {
        self.routers.insert(name.to_lowercase(), Arc::new(router));
    }

    /// # Errors
    ///
    /// Returns [`Error::UnknownRouter`] if nothing is registered under `name`.
    pub fn get(&self, name: &str) -> Result<&dyn DataRouter> {
        self.routers
            .get(&name.to_lowercase())
            .map(|r| r.as_ref())
            .ok_or_else(|| Error::UnknownRouter(name.to_string()))
    }

    /// Checks a route before it is saved.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownRouter`] for an unregistered `router_type` and
    /// [`Error::ExpressionSyntax`] when a column expression does not parse.
    ///
    /// # Example
    ///
    /// ```rust
    /// use sync_relay::model::Route;
    /// use sync_relay::route::RouterRegistry;
    ///
    /// let registry = RouterRegistry::with_defaults();
    /// let route = Route::new("orders", "orders", "store")
    ///     .with_expression(RouterRegistry::COLUMN, "STORE_ID");
    ///
    /// assert!(registry.validate(&route).is_err());
    /// ```
    pub fn validate(&self, route: &Route) -> Result<()> {
        self.get(&route.router_type)?.validate(route)
    }

    /// Routes one change through one route over the candidate nodes.
    ///
    /// An empty candidate set, or a route that does not sync this kind of
    /// event, yields an empty result rather than an error.
    ///
    /// # Example
    ///
    /// ```rust
    /// use sync_relay::model::{row, ChangeRecord, EventKind, Node, Route, SchemaHistory};
    /// use sync_relay::route::{RouterRegistry, RoutingContext};
    ///
    /// let registry = RouterRegistry::with_defaults();
    /// let history = SchemaHistory::new(1, "orders", &["ID"], &["ID", "STORE_ID"]);
    /// let change = ChangeRecord::new(7, EventKind::Insert, "orders", 1, "default")
    ///     .with_row(row(&["1", "store-2"]));
    /// let route = Route::new("orders", "orders", "store")
    ///     .with_expression(RouterRegistry::COLUMN, "STORE_ID = :NODE_ID");
    /// let nodes = vec![Node::new("store-1", "store"), Node::new("store-2", "store")];
    ///
    /// let ctx = RoutingContext::new(&change, &history, &route);
    /// let targets: Vec<String> = registry.route(&ctx, &nodes)?.into_iter().collect();
    /// assert_eq!(targets, vec!["store-2"]);
    /// # Ok::<(), sync_relay::Error>(())
    /// ```
    pub fn route(&self, ctx: &RoutingContext<'_>, candidates: &[Node]) -> Result<BTreeSet<String>> {
        if candidates.is_empty() {
            trace!(route = %ctx.route.route_id, "No candidate nodes");
            return Ok(BTreeSet::new());
        }
        if !ctx.route.applies_to(ctx.change.event) {
            trace!(
                route = %ctx.route.route_id,
                event = ?ctx.change.event,
                "Route does not sync this event kind"
            );
            return Ok(BTreeSet::new());
        }

        let router = self.get(&ctx.route.router_type)?;
        let node_ids = router.route_to_nodes(ctx, candidates)?;
        debug!(
            change_id = ctx.change.change_id,
            route = %ctx.route.route_id,
            routed = node_ids.len(),
            candidates = candidates.len(),
            "Routed change"
        );
        Ok(node_ids)
    }
}

impl Default for RouterRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
