//! Line-oriented wire protocol shared by the extractor and the reader.
//!
//! Every record is a tag followed by comma separated fields:
//!
//! ```text
//! NODEID, corp-000
//! BATCH, 1042
//! TABLE, orders
//! INSERT, "1","open",
//! COMMIT, 1042
//! ```
//!
//! Identifiers are written bare. Row values are double-quoted with `\` and
//! `"` backslash-escaped and line breaks written as `\n` / `\r`, so a record
//! never spans lines; a NULL value is an empty unquoted field.

use bytes::{BufMut, Bytes, BytesMut};
use std::io::{self, Write};

pub const NODEID: &str = "NODEID";
pub const BINARY: &str = "BINARY";
pub const CHANNEL: &str = "CHANNEL";
pub const BATCH: &str = "BATCH";
pub const SCHEMA: &str = "SCHEMA";
pub const CATALOG: &str = "CATALOG";
pub const TABLE: &str = "TABLE";
pub const KEYS: &str = "KEYS";
pub const COLUMNS: &str = "COLUMNS";
pub const OLD: &str = "OLD";
pub const INSERT: &str = "INSERT";
pub const UPDATE: &str = "UPDATE";
pub const DELETE: &str = "DELETE";
pub const SQL: &str = "SQL";
pub const CREATE: &str = "CREATE";
pub const RELOAD: &str = "RELOAD";
pub const COMMIT: &str = "COMMIT";

/// Writes a record whose fields are bare identifiers.
pub fn write_names<W, I, S>(out: &mut W, tag: &str, names: I) -> io::Result<()>
where
    W: Write + ?Sized,
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    out.write_all(tag.as_bytes())?;
    for name in names {
        out.write_all(b", ")?;
        out.write_all(name.as_ref().as_bytes())?;
    }
    out.write_all(b"\n")
}

/// Writes a record whose fields are row values.
pub fn write_values<'a, W, I>(out: &mut W, tag: &str, values: I) -> io::Result<()>
where
    W: Write + ?Sized,
    I: IntoIterator<Item = &'a Option<String>>,
{
    out.write_all(tag.as_bytes())?;
    let mut first = true;
    for value in values {
        out.write_all(if first { b", " } else { b"," })?;
        first = false;
        if let Some(value) = value {
            out.write_all(escape(value).as_bytes())?;
        }
    }
    out.write_all(b"\n")
}

pub fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len() + 2);
    escaped.push('"');
    for c in value.chars() {
        match c {
            '"' | '\\' => {
                escaped.push('\\');
                escaped.push(c);
            }
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            c => escaped.push(c),
        }
    }
    escaped.push('"');
    escaped
}

/// Splits the fields that follow a record tag. Quoted fields are unescaped;
/// empty bare fields are NULL. Returns `None` on an unterminated quote.
pub fn split_fields(text: &str) -> Option<Vec<Option<String>>> {
    let mut fields = Vec::new();
    let mut chars = text.chars().peekable();

    loop {
        while matches!(chars.peek(), Some(' ') | Some('\t')) {
            chars.next();
        }

        let field = if chars.peek() == Some(&'"') {
            chars.next();
            let mut value = String::new();
            loop {
                match chars.next()? {
                    '\\' => match chars.next()? {
                        'n' => value.push('\n'),
                        'r' => value.push('\r'),
                        c => value.push(c),
                    },
                    '"' => break,
                    c => value.push(c),
                }
            }
            Some(value)
        } else {
            let mut value = String::new();
            while let Some(&c) = chars.peek() {
                if c == ',' {
                    break;
                }
                value.push(c);
                chars.next();
            }
            let value = value.trim();
            (!value.is_empty()).then(|| value.to_string())
        };
        fields.push(field);

        // Skip to the next separator; anything after a closing quote is ignored.
        loop {
            match chars.next() {
                Some(',') => break,
                Some(_) => continue,
                None => return Some(fields),
            }
        }
    }
}

/// In-memory sink that stages a whole batch before it is handed to a transport.
///
/// A batch that fails half way is dropped with the buffer, so a receiver
/// never sees a partial write.
#[derive(Debug, Default)]
pub struct StagingBuffer {
    buf: BytesMut,
}

impl StagingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }

    pub fn to_text(&self) -> String {
        String::from_utf8_lossy(&self.buf).into_owned()
    }
}

impl Write for StagingBuffer {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.put_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
