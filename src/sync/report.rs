//! Per-run accumulation and the human-readable summary.
use anyhow::Result;
use serde::Serialize;
use serde_json::Value;

use crate::sync::walker::{ItemResult, WalkEnd};

/// What a batch keeps of its accepted items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retention {
    /// Keep every accepted item, in scan order.
    Items,
    /// Keep only a running count.
    Count,
}

#[derive(Debug, Clone)]
pub struct BatchResult<T> {
    pub endpoint: &'static str,
    pub count: usize,
    pub items: Option<Vec<T>>,
    pub skipped: usize,
    pub failed: usize,
    pub pages_fetched: u32,
    pub end: WalkEnd,
}

impl<T: Clone> BatchResult<T> {
    pub fn new(endpoint: &'static str, retention: Retention) -> Self {
        Self {
            endpoint,
            count: 0,
            items: match retention {
                Retention::Items => Some(Vec::new()),
                Retention::Count => None,
            },
            skipped: 0,
            failed: 0,
            pages_fetched: 0,
            end: WalkEnd::Exhausted,
        }
    }

    pub fn record(&mut self, item: &T, result: ItemResult) {
        match result {
            ItemResult::Accepted => {
                self.count += 1;
                if let Some(items) = self.items.as_mut() {
                    items.push(item.clone());
                }
            }
            ItemResult::Skipped(_) => self.skipped += 1,
            ItemResult::Failed(_) => self.failed += 1,
        }
    }

    pub fn finish(mut self, end: WalkEnd) -> Self {
        self.end = end;
        self
    }

    pub fn incomplete(&self) -> bool {
        self.end.incomplete()
    }
}

/// Transport-independent run summary.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Summary {
    pub title: String,
    pub count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<Value>>,
    pub skipped: usize,
    pub failed: usize,
    pub pages_fetched: u32,
    pub scan: WalkEnd,
    pub incomplete: bool,
}

pub fn summarize<T: Serialize>(title: &str, batch: &BatchResult<T>) -> Result<Summary> {
    let items = match &batch.items {
        Some(items) => Some(
            items
                .iter()
                .map(serde_json::to_value)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        None => None,
    };
    Ok(Summary {
        title: title.to_string(),
        count: batch.count,
        items,
        skipped: batch.skipped,
        failed: batch.failed,
        pages_fetched: batch.pages_fetched,
        scan: batch.end,
        incomplete: batch.end.incomplete(),
    })
}

/// Pretty JSON with sorted keys and 4-space indentation.
pub fn render<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let value = sorted(serde_json::to_value(value)?);
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
    value.serialize(&mut ser)?;
    Ok(String::from_utf8(out)?)
}

fn sorted(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(entries.into_iter().map(|(k, v)| (k, sorted(v))).collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sorted).collect()),
        other => other,
    }
}
