//! Streaming JSON writer and tree dump
//!
//! `JsonWriter` appends JSON tokens to an in-memory buffer and inserts the
//! separators itself, so callers only describe structure (maps, arrays, keys,
//! values). String escaping is delegated to `serde_json`.
//!
//! `dump_tree` serializes one thread's timing tree as
//!
//! ```text
//! "<thread>": [
//!   { "name": "...", "<comment>": "...", "elapsed": "1.500us",
//!     "sub": [ ... ] },          // "sub" only for internal nodes
//!   ...
//! ]
//! ```

use crate::pretty::pretty_duration;
use crate::record::Record;
use crate::tree::{Tree, TreeVisitor};
use thiserror::Error;

/// Errors raised while writing JSON
#[derive(Error, Debug)]
pub enum WriterError {
    #[error("JSON encoding failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unbalanced writer state: {0}")]
    Unbalanced(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Container {
    Map,
    Array,
}

#[derive(Debug)]
struct Frame {
    container: Container,
    entries: usize,
}

/// Append-only JSON token writer
#[derive(Debug, Default)]
pub struct JsonWriter {
    out: String,
    frames: Vec<Frame>,
    after_key: bool,
}

impl JsonWriter {
    /// Create an empty writer
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_map_start(&mut self) -> Result<(), WriterError> {
        self.begin_value()?;
        self.out.push('{');
        self.open(Container::Map);
        Ok(())
    }

    pub fn push_map_end(&mut self) -> Result<(), WriterError> {
        self.close(Container::Map)?;
        self.out.push('}');
        Ok(())
    }

    pub fn push_array_start(&mut self) -> Result<(), WriterError> {
        self.begin_value()?;
        self.out.push('[');
        self.open(Container::Array);
        Ok(())
    }

    pub fn push_array_end(&mut self) -> Result<(), WriterError> {
        self.close(Container::Array)?;
        self.out.push(']');
        Ok(())
    }

    /// Push a map key known at compile time (written without escaping)
    pub fn push_map_key_const(&mut self, key: &'static str) -> Result<(), WriterError> {
        self.begin_key()?;
        self.out.push('"');
        self.out.push_str(key);
        self.out.push_str("\":");
        Ok(())
    }

    /// Push an arbitrary runtime map key
    pub fn push_map_key(&mut self, key: &str) -> Result<(), WriterError> {
        self.begin_key()?;
        self.out.push_str(&serde_json::to_string(key)?);
        self.out.push(':');
        Ok(())
    }

    pub fn push_string(&mut self, value: &str) -> Result<(), WriterError> {
        self.begin_value()?;
        self.out.push_str(&serde_json::to_string(value)?);
        Ok(())
    }

    /// Push a pre-formatted fragment verbatim
    ///
    /// With `as_value` set the fragment counts as one value (separators are
    /// handled); otherwise it is copied as-is with no bookkeeping.
    pub fn push_raw(&mut self, fragment: &str, as_value: bool) -> Result<(), WriterError> {
        if as_value {
            self.begin_value()?;
        }
        self.out.push_str(fragment);
        Ok(())
    }

    fn open(&mut self, container: Container) {
        self.frames.push(Frame {
            container,
            entries: 0,
        });
    }

    fn close(&mut self, container: Container) -> Result<(), WriterError> {
        if self.after_key {
            return Err(WriterError::Unbalanced("container closed after a dangling key"));
        }
        match self.frames.last() {
            Some(frame) if frame.container == container => {
                self.frames.pop();
                Ok(())
            }
            Some(_) => Err(WriterError::Unbalanced("mismatched container end")),
            None => Err(WriterError::Unbalanced("container end without start")),
        }
    }

    fn begin_key(&mut self) -> Result<(), WriterError> {
        if self.after_key {
            return Err(WriterError::Unbalanced("two keys in a row"));
        }
        match self.frames.last_mut() {
            Some(frame) if frame.container == Container::Map => {
                if frame.entries > 0 {
                    self.out.push(',');
                }
                frame.entries += 1;
                self.after_key = true;
                Ok(())
            }
            _ => Err(WriterError::Unbalanced("map key outside of a map")),
        }
    }

    fn begin_value(&mut self) -> Result<(), WriterError> {
        if self.after_key {
            self.after_key = false;
            return Ok(());
        }
        match self.frames.last_mut() {
            Some(frame) if frame.container == Container::Map => {
                Err(WriterError::Unbalanced("map value without a key"))
            }
            Some(frame) => {
                if frame.entries > 0 {
                    self.out.push(',');
                }
                frame.entries += 1;
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Current buffer contents
    pub fn as_str(&self) -> &str {
        &self.out
    }

    pub fn is_empty(&self) -> bool {
        self.out.is_empty()
    }

    /// Number of containers currently open
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Take the buffer out and reset the writer state
    pub fn take(&mut self) -> String {
        self.frames.clear();
        self.after_key = false;
        std::mem::take(&mut self.out)
    }

    /// Clear the buffer and the writer state
    pub fn reset(&mut self) {
        self.out.clear();
        self.frames.clear();
        self.after_key = false;
    }
}

/// Tree visitor writing every node as a JSON object
pub struct DumpVisitor<'w> {
    writer: &'w mut JsonWriter,
}

impl<'w> DumpVisitor<'w> {
    pub fn new(writer: &'w mut JsonWriter) -> Self {
        DumpVisitor { writer }
    }

    fn write_fields(&mut self, record: &Record) -> Result<(), WriterError> {
        self.writer.push_map_start()?;
        self.writer.push_map_key_const("name")?;
        self.writer.push_string(&record.name)?;
        for (key, value) in &record.comments {
            self.writer.push_map_key(key)?;
            self.writer.push_string(value)?;
        }
        self.writer.push_map_key_const("elapsed")?;
        self.writer.push_string(&pretty_duration(record.elapsed))
    }
}

impl TreeVisitor for DumpVisitor<'_> {
    type Error = WriterError;

    fn visit_leaf(&mut self, record: &Record) -> Result<(), WriterError> {
        self.write_fields(record)?;
        self.writer.push_map_end()
    }

    fn enter_internal(&mut self, record: &Record) -> Result<(), WriterError> {
        self.write_fields(record)?;
        self.writer.push_map_key_const("sub")?;
        self.writer.push_array_start()
    }

    fn leave_internal(&mut self, _record: &Record) -> Result<(), WriterError> {
        self.writer.push_array_end()?;
        self.writer.push_map_end()
    }
}

/// Write `"<key>": [ ...nodes... ]` for `tree` into the currently open map
pub fn dump_tree(writer: &mut JsonWriter, key: &str, tree: &Tree) -> Result<(), WriterError> {
    writer.push_map_key(key)?;
    writer.push_array_start()?;
    tree.traverse(&mut DumpVisitor::new(writer))?;
    writer.push_array_end()
}
