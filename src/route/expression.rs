//! Parser for column-match route expressions.
//!
//! An expression is a list of independent clauses separated by line breaks
//! or a standalone `or` token. Each clause compares a column with a value:
//!
//! ```text
//! STATUS = 'OK'
//! NODE_ID != :NODE_ID or EXTERNAL_DATA contains :EXTERNAL_ID
//! ```
//!
//! Clauses are OR-combined by the router; there is no AND and no grouping.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::{Error, Result};

// Line breaks (optionally with an `or` on either side) or a whitespace-bounded `or`.
static CLAUSE_SEPARATOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\s*(?:\s+or)?(?:\r\n|\r|\n)(?:or\s+)?\s*|\s+or\s+").unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
}

impl Operator {
    // Checked in this order so that `!=` wins over `=` and `not contains` over `contains`.
    const PRECEDENCE: [Operator; 4] = [
        Operator::NotEquals,
        Operator::Equals,
        Operator::NotContains,
        Operator::Contains,
    ];

    pub fn symbol(&self) -> &'static str {
        match self {
            Operator::Equals => "=",
            Operator::NotEquals => "!=",
            Operator::Contains => "contains",
            Operator::NotContains => "not contains",
        }
    }

    fn is_keyword(&self) -> bool {
        matches!(self, Operator::Contains | Operator::NotContains)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clause {
    pub column: String,
    pub operator: Operator,
    pub value: String,
}

impl Clause {
    pub fn has_equals(&self) -> bool {
        self.operator == Operator::Equals
    }
}

/// Splits an expression into clauses.
///
/// A blank expression yields no clauses. Any non-blank clause without a
/// recognizable operator rejects the whole expression.
pub fn parse(expression: &str) -> Result<Vec<Clause>> {
    let mut clauses = Vec::new();
    if expression.trim().is_empty() {
        return Ok(clauses);
    }

    for text in CLAUSE_SEPARATOR.split(expression) {
        if text.trim().is_empty() {
            continue;
        }
        let clause = parse_clause(text).ok_or_else(|| Error::ExpressionSyntax {
            expression: expression.to_string(),
            clause: text.to_string(),
        })?;
        clauses.push(clause);
    }

    Ok(clauses)
}

fn parse_clause(text: &str) -> Option<Clause> {
    Operator::PRECEDENCE.iter().find_map(|&operator| {
        let at = find_operator(text, operator)?;
        let left = &text[..at];
        let right = &text[at + operator.symbol().len()..];
        if left.trim().is_empty() || right.trim().is_empty() {
            return None;
        }
        Some(Clause {
            column: unquote(left),
            operator,
            value: unquote(right),
        })
    })
}

/// Byte offset of the first occurrence of `operator` outside single quotes.
fn find_operator(text: &str, operator: Operator) -> Option<usize> {
    let symbol = operator.symbol();
    let mut in_quote = false;

    for (i, c) in text.char_indices() {
        if c == '\'' {
            in_quote = !in_quote;
            continue;
        }
        if in_quote || !text[i..].starts_with(symbol) {
            continue;
        }
        if operator.is_keyword() {
            let before = text[..i].chars().next_back();
            let after = text[i + symbol.len()..].chars().next();
            let bounded = |c: Option<char>| c.map_or(false, char::is_whitespace);
            if !bounded(before) || !bounded(after) {
                continue;
            }
        }
        return Some(i);
    }

    None
}

/// Trims a token and, if it is wrapped in single quotes, strips them and
/// collapses doubled quotes. Whitespace inside the quotes is kept.
fn unquote(token: &str) -> String {
    let token = token.trim();
    if token.len() >= 2 && token.starts_with('\'') && token.ends_with('\'') {
        token[1..token.len() - 1].replace("''", "'")
    } else {
        token.to_string()
    }
}
