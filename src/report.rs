//! Typed view of a flushed timing report
//!
//! Reports are the JSON documents produced by
//! [`Environment::flush_all`](crate::environment::Environment::flush_all):
//! a map from thread key to a list of nodes, every node carrying its name,
//! its comments, a pretty-printed `elapsed` and, for internal nodes, `sub`.
//!
//! Parsing goes through `serde_json::Value` with `preserve_order` enabled so
//! that threads, nodes and comments keep their document order.

use crate::pretty::{parse_pretty, pretty_print};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt::Write as _;
use thiserror::Error;

/// Errors raised while reading a report
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed report: {0}")]
    Malformed(String),
}

/// One recorded node
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeReport {
    pub name: String,
    pub elapsed_ns: u128,
    /// Comments in the order they were added
    pub comments: Vec<(String, String)>,
    /// Children of an internal node, `None` for leaves
    pub sub: Option<Vec<NodeReport>>,
}

impl NodeReport {
    pub fn is_leaf(&self) -> bool {
        self.sub.is_none()
    }

    pub fn children(&self) -> &[NodeReport] {
        self.sub.as_deref().unwrap_or_default()
    }

    pub fn comment(&self, key: &str) -> Option<&str> {
        self.comments
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Sum of the direct children's elapsed time
    pub fn children_elapsed_ns(&self) -> u128 {
        self.children().iter().map(|c| c.elapsed_ns).sum()
    }

    fn from_value(value: &Value) -> Result<Self, ReportError> {
        let object = value
            .as_object()
            .ok_or_else(|| ReportError::Malformed(format!("node is not an object: {}", value)))?;

        let mut name = None;
        let mut elapsed_ns = None;
        let mut comments = Vec::new();
        let mut sub = None;

        for (key, field) in object {
            match key.as_str() {
                "name" => name = field.as_str().map(str::to_owned),
                "elapsed" => {
                    let text = field.as_str().unwrap_or_default();
                    elapsed_ns = Some(parse_pretty(text).ok_or_else(|| {
                        ReportError::Malformed(format!("bad elapsed value {:?}", text))
                    })?);
                }
                "sub" => sub = Some(parse_nodes(field)?),
                _ => comments.push((key.clone(), comment_text(field))),
            }
        }

        Ok(NodeReport {
            name: name.ok_or_else(|| ReportError::Malformed("node without a name".into()))?,
            elapsed_ns: elapsed_ns
                .ok_or_else(|| ReportError::Malformed("node without elapsed".into()))?,
            comments,
            sub,
        })
    }
}

fn comment_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn parse_nodes(value: &Value) -> Result<Vec<NodeReport>, ReportError> {
    value
        .as_array()
        .ok_or_else(|| ReportError::Malformed(format!("expected a node list, got {}", value)))?
        .iter()
        .map(NodeReport::from_value)
        .collect()
}

/// Every node recorded by one thread
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThreadReport {
    pub thread: String,
    pub nodes: Vec<NodeReport>,
}

impl ThreadReport {
    /// Pre-order iterator over every node of the thread
    pub fn walk(&self) -> impl Iterator<Item = &NodeReport> {
        let mut stack: Vec<&NodeReport> = self.nodes.iter().rev().collect();
        std::iter::from_fn(move || {
            let node = stack.pop()?;
            stack.extend(node.children().iter().rev());
            Some(node)
        })
    }

    /// Sum of the top level nodes' elapsed time
    pub fn total_ns(&self) -> u128 {
        self.nodes.iter().map(|n| n.elapsed_ns).sum()
    }
}

/// Aggregated time of every node sharing a name
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SummaryEntry {
    pub name: String,
    pub calls: u64,
    pub total_ns: u128,
}

impl SummaryEntry {
    pub fn average_ns(&self) -> u128 {
        if self.calls == 0 {
            0
        } else {
            self.total_ns / u128::from(self.calls)
        }
    }
}

/// A parsed timing report
///
/// # Example
/// ```
/// use benchtree::report::Report;
///
/// let report = Report::parse(
///     r#"{"ThreadId(1)":[{"name":"bunch","N":"2","elapsed":"1.500us","sub":[
///         {"name":"scope","elapsed":"500ns"},
///         {"name":"scope","elapsed":"1.000us"}]}]}"#,
/// ).unwrap();
///
/// let bunch = &report.threads[0].nodes[0];
/// assert_eq!(bunch.elapsed_ns, 1_500);
/// assert_eq!(bunch.comment("N"), Some("2"));
/// assert_eq!(bunch.children_elapsed_ns(), bunch.elapsed_ns);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Report {
    pub threads: Vec<ThreadReport>,
}

impl Report {
    pub fn parse(document: &str) -> Result<Self, ReportError> {
        let value: Value = serde_json::from_str(document)?;
        let map: &Map<String, Value> = value
            .as_object()
            .ok_or_else(|| ReportError::Malformed("top level is not an object".into()))?;

        let threads = map
            .iter()
            .map(|(thread, nodes)| {
                Ok(ThreadReport {
                    thread: thread.clone(),
                    nodes: parse_nodes(nodes)?,
                })
            })
            .collect::<Result<_, ReportError>>()?;

        Ok(Report { threads })
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    /// Section recorded under `key`
    ///
    /// When a thread was dumped before the final flush its key occurs
    /// several times in the document; the last occurrence is kept, at the
    /// position of the first.
    pub fn thread(&self, key: &str) -> Option<&ThreadReport> {
        self.threads.iter().find(|t| t.thread == key)
    }

    /// Calls and total time per node name, by total time descending
    pub fn summary(&self) -> Vec<SummaryEntry> {
        let mut order: Vec<String> = Vec::new();
        let mut totals: HashMap<&str, (u64, u128)> = HashMap::new();

        for node in self.threads.iter().flat_map(ThreadReport::walk) {
            let entry = totals.entry(node.name.as_str()).or_insert_with(|| {
                order.push(node.name.clone());
                (0, 0)
            });
            entry.0 += 1;
            entry.1 += node.elapsed_ns;
        }

        let mut summary: Vec<SummaryEntry> = order
            .into_iter()
            .map(|name| {
                let (calls, total_ns) = totals.get(name.as_str()).copied().unwrap_or_default();
                SummaryEntry {
                    name,
                    calls,
                    total_ns,
                }
            })
            .collect();
        // Stable sort keeps first-seen order among equal totals
        summary.sort_by(|a, b| b.total_ns.cmp(&a.total_ns));
        summary
    }

    /// Render the summary as a fixed-width table
    pub fn render_summary(&self) -> String {
        let summary = self.summary();
        let mut out = String::new();
        if summary.is_empty() {
            out.push_str("No timing data recorded.\n");
            return out;
        }

        let _ = writeln!(
            out,
            "{:<40} {:>10} {:>18} {:>18}",
            "Name", "Calls", "Total", "Average"
        );
        let _ = writeln!(out, "{}", "─".repeat(89));
        for entry in &summary {
            let _ = writeln!(
                out,
                "{:<40} {:>10} {:>18} {:>18}",
                entry.name,
                entry.calls,
                pretty_print(entry.total_ns),
                pretty_print(entry.average_ns())
            );
        }
        let _ = writeln!(out, "{}", "─".repeat(89));
        out
    }

    /// Render every thread as an indented tree
    ///
    /// ```text
    /// ThreadId(2)
    ///   bunch  300ns  [N=2]
    ///     scope  100ns
    ///     scope  200ns
    /// ```
    pub fn render_tree(&self) -> String {
        let mut out = String::new();
        for thread in &self.threads {
            let _ = writeln!(out, "{}", thread.thread);
            let mut stack: Vec<(usize, &NodeReport)> =
                thread.nodes.iter().rev().map(|n| (1, n)).collect();
            while let Some((depth, node)) = stack.pop() {
                let _ = write!(
                    out,
                    "{:indent$}{}  {}",
                    "",
                    node.name,
                    pretty_print(node.elapsed_ns),
                    indent = depth * 2
                );
                if !node.comments.is_empty() {
                    let comments: Vec<String> = node
                        .comments
                        .iter()
                        .map(|(k, v)| format!("{}={}", k, v))
                        .collect();
                    let _ = write!(out, "  [{}]", comments.join(", "));
                }
                out.push('\n');
                stack.extend(node.children().iter().rev().map(|c| (depth + 1, c)));
            }
        }
        out
    }
}
