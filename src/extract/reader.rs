//! Reads a wire stream back into typed records.
//!
//! This is a tokenizer for verification and diagnostics. It tracks just
//! enough table state to split `UPDATE` records into key and row values.

use std::collections::HashMap;
use std::io::BufRead;

use super::protocol::{self, split_fields};
use crate::model::Row;
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    NodeId(String),
    Binary(String),
    Channel(String),
    Batch(u64),
    Schema(Option<String>),
    Catalog(Option<String>),
    Table(String),
    Keys(Vec<String>),
    Columns(Vec<String>),
    Old(Row),
    Insert(Row),
    Update { keys: Row, row: Row },
    Delete(Row),
    Sql(Option<String>),
    Create(Option<String>),
    Reload(Option<String>),
    Commit(u64),
}

impl Record {
    /// True for records that carry a change, as opposed to framing or metadata.
    pub fn is_event(&self) -> bool {
        matches!(
            self,
            Record::Insert(_)
                | Record::Update { .. }
                | Record::Delete(_)
                | Record::Sql(_)
                | Record::Create(_)
                | Record::Reload(_)
        )
    }
}

pub struct ProtocolReader<R> {
    input: R,
    line_no: usize,
    buf: String,
    key_counts: HashMap<String, usize>,
    table: Option<String>,
}

impl<R: BufRead> ProtocolReader<R> {
    pub fn new(input: R) -> Self {
        Self {
            input,
            line_no: 0,
            buf: String::new(),
            key_counts: HashMap::new(),
            table: None,
        }
    }

    /// Reads the next record, skipping blank lines. `Ok(None)` at end of input.
    pub fn read_record(&mut self) -> Result<Option<Record>> {
        loop {
            self.buf.clear();
            let read = self
                .input
                .read_line(&mut self.buf)
                .map_err(|e| self.error(e.to_string()))?;
            if read == 0 {
                return Ok(None);
            }
            self.line_no += 1;

            let line = self.buf.trim_end_matches(['\r', '\n']).to_string();
            if line.trim().is_empty() {
                continue;
            }
            return self.parse_line(&line).map(Some);
        }
    }

    /// Reads every remaining record.
    pub fn read_all(mut self) -> Result<Vec<Record>> {
        let mut records = Vec::new();
        while let Some(record) = self.read_record()? {
            records.push(record);
        }
        Ok(records)
    }

    fn parse_line(&mut self, line: &str) -> Result<Record> {
        let (tag, fields) = match line.split_once(',') {
            Some((tag, rest)) => (
                tag.trim(),
                split_fields(rest).ok_or_else(|| self.error("unterminated quoted value"))?,
            ),
            None => (line.trim(), Vec::new()),
        };

        let record = match tag {
            protocol::NODEID => Record::NodeId(self.name(fields)?),
            protocol::BINARY => Record::Binary(self.name(fields)?),
            protocol::CHANNEL => Record::Channel(self.name(fields)?),
            protocol::BATCH => Record::Batch(self.number(fields)?),
            protocol::COMMIT => Record::Commit(self.number(fields)?),
            protocol::SCHEMA => Record::Schema(fields.into_iter().flatten().next()),
            protocol::CATALOG => Record::Catalog(fields.into_iter().flatten().next()),
            protocol::TABLE => {
                let table = self.name(fields)?;
                self.table = Some(table.clone());
                Record::Table(table)
            }
            protocol::KEYS => {
                let keys: Vec<String> = fields.into_iter().flatten().collect();
                let table = self
                    .table
                    .clone()
                    .ok_or_else(|| self.error("KEYS before TABLE"))?;
                self.key_counts.insert(table, keys.len());
                Record::Keys(keys)
            }
            protocol::COLUMNS => Record::Columns(fields.into_iter().flatten().collect()),
            protocol::OLD => Record::Old(fields),
            protocol::INSERT => Record::Insert(fields),
            protocol::DELETE => Record::Delete(fields),
            protocol::UPDATE => {
                let key_count = self
                    .table
                    .as_ref()
                    .and_then(|t| self.key_counts.get(t))
                    .copied()
                    .ok_or_else(|| self.error("UPDATE before the table's KEYS"))?;
                if fields.len() < key_count {
                    return Err(self.error(format!(
                        "UPDATE has {} values, expected at least {} keys",
                        fields.len(),
                        key_count
                    )));
                }
                let mut keys = fields;
                let row = keys.split_off(key_count);
                Record::Update { keys, row }
            }
            protocol::SQL => Record::Sql(fields.into_iter().next().flatten()),
            protocol::CREATE => Record::Create(fields.into_iter().next().flatten()),
            protocol::RELOAD => Record::Reload(fields.into_iter().next().flatten()),
            other => return Err(self.error(format!("unknown record tag '{}'", other))),
        };
        Ok(record)
    }

    fn name(&self, fields: Vec<Option<String>>) -> Result<String> {
        fields
            .into_iter()
            .next()
            .flatten()
            .ok_or_else(|| self.error("missing value"))
    }

    fn number(&self, fields: Vec<Option<String>>) -> Result<u64> {
        let value = self.name(fields)?;
        value
            .parse()
            .map_err(|_| self.error(format!("'{}' is not a batch id", value)))
    }

    fn error(&self, message: impl Into<String>) -> Error {
        Error::Protocol {
            line: self.line_no,
            message: message.into(),
        }
    }
}

impl<R: BufRead> Iterator for ProtocolReader<R> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_record().transpose()
    }
}
