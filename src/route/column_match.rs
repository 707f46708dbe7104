use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, warn};

use super::expression::{self, Clause, Operator};
use super::{node_ids, DataRouter, RoutingContext};
use crate::model::{EventKind, Node, Route};
use crate::Result;

const NULL_VALUE: &str = "NULL";
const NODE_ID: &str = ":NODE_ID";
const EXTERNAL_ID: &str = ":EXTERNAL_ID";
const NODE_GROUP_ID: &str = ":NODE_GROUP_ID";
const REDIRECT_NODE: &str = ":REDIRECT_NODE";
const EXTERNAL_DATA_BIND: &str = ":EXTERNAL_DATA";
const EXTERNAL_DATA_COLUMN: &str = "EXTERNAL_DATA";
const OLD_PREFIX: &str = "OLD_";

/// Routes by comparing row values against per-node bind variables or literals.
///
/// The left side of a clause names a column of the captured row
/// (case-insensitive), `OLD_<column>` for the old row image, or
/// `EXTERNAL_DATA`. The right side is a literal, `NULL`, or a `:`-prefixed
/// bind variable: `:NODE_ID`, `:EXTERNAL_ID`, `:NODE_GROUP_ID` and
/// `:REDIRECT_NODE` are resolved per candidate node, `:EXTERNAL_DATA` and
/// `:<column>` against the change itself. A node is selected when any
/// clause holds for it.
#[derive(Debug, Default)]
pub struct ColumnMatchDataRouter {
    redirects: HashMap<String, String>,
    // route id -> (expression text, parsed clauses)
    cache: RwLock<HashMap<String, (String, Arc<Vec<Clause>>)>>,
}

impl ColumnMatchDataRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_redirects(mut self, redirects: HashMap<String, String>) -> Self {
        self.redirects = redirects;
        self
    }

    fn clauses(&self, route: &Route, expression: &str) -> Result<Arc<Vec<Clause>>> {
        {
            let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
            if let Some((text, clauses)) = cache.get(&route.route_id) {
                if text == expression {
                    return Ok(Arc::clone(clauses));
                }
            }
        }

        let clauses = Arc::new(expression::parse(expression)?);
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                route.route_id.clone(),
                (expression.to_string(), Arc::clone(&clauses)),
            );
        Ok(clauses)
    }
}

impl DataRouter for ColumnMatchDataRouter {
    fn route_to_nodes(&self, ctx: &RoutingContext<'_>, nodes: &[Node]) -> Result<BTreeSet<String>> {
        let expression = match ctx.route.expression.as_deref() {
            Some(e) if !e.trim().is_empty() => e,
            _ => return Ok(node_ids(nodes)),
        };
        let clauses = self.clauses(ctx.route, expression)?;
        let values = column_values(ctx);
        if values.is_empty() {
            warn!(
                change_id = ctx.change.change_id,
                "There were no columns to match for the change"
            );
            return Ok(BTreeSet::new());
        }

        let mut selected = BTreeSet::new();
        for clause in clauses.iter() {
            if selected.len() == nodes.len() {
                break;
            }
            let column_value = lookup(&values, &clause.column);
            self.evaluate(ctx, clause, column_value, &values, nodes, &mut selected);
        }

        debug!(
            route = %ctx.route.route_id,
            selected = ?selected,
            "Column match evaluated"
        );
        Ok(selected)
    }

    fn validate(&self, route: &Route) -> Result<()> {
        if let Some(expression) = route.expression.as_deref() {
            self.clauses(route, expression)?;
        }
        Ok(())
    }
}

impl ColumnMatchDataRouter {
    fn evaluate(
        &self,
        ctx: &RoutingContext<'_>,
        clause: &Clause,
        column_value: Option<&str>,
        values: &HashMap<String, Option<String>>,
        nodes: &[Node],
        selected: &mut BTreeSet<String>,
    ) {
        let bind = clause.value.to_uppercase();
        if [NODE_ID, EXTERNAL_ID, NODE_GROUP_ID].contains(&bind.as_str()) {
            for node in nodes {
                if matches(clause.operator, column_value, node_attribute(&bind, node)) {
                    selected.insert(node.node_id.clone());
                }
            }
            return;
        }

        if clause.has_equals() && bind == REDIRECT_NODE {
            let target = column_value.and_then(|v| self.redirects.get(v));
            if let Some(node_id) = target {
                if nodes.iter().any(|n| &n.node_id == node_id) {
                    selected.insert(node_id.clone());
                }
            }
            return;
        }

        let compare_value = if bind == EXTERNAL_DATA_BIND {
            blank_to_none(ctx.change.external_data.as_deref())
        } else if let Some(column) = clause.value.strip_prefix(':') {
            lookup(values, column)
        } else if clause.value == NULL_VALUE {
            None
        } else {
            Some(clause.value.as_str())
        };

        if matches(clause.operator, column_value, compare_value) {
            selected.extend(nodes.iter().map(|n| n.node_id.clone()));
        }
    }
}

fn node_attribute<'n>(bind: &str, node: &'n Node) -> Option<&'n str> {
    match bind {
        NODE_ID => Some(&node.node_id),
        EXTERNAL_ID => Some(&node.external_id),
        NODE_GROUP_ID => Some(&node.group_id),
        _ => None,
    }
}

fn matches(operator: Operator, column_value: Option<&str>, compare_value: Option<&str>) -> bool {
    match (operator, column_value, compare_value) {
        (Operator::Equals, c, v) => c == v,
        (Operator::NotEquals, c, v) => c != v,
        (Operator::Contains, Some(list), Some(v)) => list.split(',').any(|item| item == v),
        (Operator::NotContains, Some(list), Some(v)) => !list.split(',').any(|item| item == v),
        (Operator::Contains | Operator::NotContains, _, _) => false,
    }
}

/// Column name (upper case) to value for the change, including `OLD_`
/// columns and `EXTERNAL_DATA`. Blank values are NULL.
fn column_values(ctx: &RoutingContext<'_>) -> HashMap<String, Option<String>> {
    let change = ctx.change;
    let columns = &ctx.history.columns;
    let mut values = HashMap::new();

    let current = match (&change.row_data, &change.old_data) {
        (Some(row), _) => Some(row.clone()),
        (None, Some(old)) if change.event == EventKind::Delete => Some(old.clone()),
        (None, _) => change.pk_data.as_ref().map(|pk| {
            let mut row = vec![None; columns.len()];
            for (value, index) in pk.iter().zip(ctx.history.key_indices()) {
                row[index] = value.clone();
            }
            row
        }),
    };

    if let Some(row) = current {
        for (name, value) in columns.iter().zip(row) {
            values.insert(name.to_uppercase(), value.filter(|v| !v.is_empty()));
        }
    }
    if let Some(old) = &change.old_data {
        for (name, value) in columns.iter().zip(old) {
            values.insert(
                format!("{}{}", OLD_PREFIX, name.to_uppercase()),
                value.clone().filter(|v| !v.is_empty()),
            );
        }
    }
    if !values.is_empty() || change.external_data.is_some() {
        values.insert(
            EXTERNAL_DATA_COLUMN.to_string(),
            change.external_data.clone().filter(|v| !v.is_empty()),
        );
    }

    values
}

fn lookup<'v>(values: &'v HashMap<String, Option<String>>, column: &str) -> Option<&'v str> {
    values
        .get(&column.to_uppercase())
        .and_then(|v| v.as_deref())
}

fn blank_to_none(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}
