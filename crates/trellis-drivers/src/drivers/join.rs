use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::debug;
use trellis_graph::Node;

use crate::context::Context;
use crate::registry::{Driver, DriverRegistry};
use crate::response::DriverResponse;

/// Merge node: combines the parallel branch results (or explicitly
/// configured sources) into one output.
///
/// Configuration (`node.data`):
/// - `merge_strategy`: `list` (default, flattens one level) | `concat` |
///   `first` | `last` | `merge` (right-biased map merge) | `join`
/// - `separator`: string separator for `join`
/// - `sources`: optional list of `input` / `parallel_results` /
///   `state.<key>` / `params.<key>` selectors; defaults to the parallel
///   results.
pub struct JoinDriver;

#[async_trait]
impl Driver for JoinDriver {
  fn type_name(&self) -> &'static str {
    "join"
  }

  async fn execute(&self, node: &Node, cx: &Context, _registry: &DriverRegistry) -> DriverResponse {
    let strategy = node.data_str("merge_strategy").unwrap_or("list");
    let separator = node.data_str("separator").unwrap_or("");

    let values: Vec<Value> = match node.data.get("sources").and_then(Value::as_array) {
      Some(sources) => sources
        .iter()
        .filter_map(Value::as_str)
        .filter_map(|source| value_from_source(source, cx))
        .collect(),
      None => cx.parallel_results.clone().unwrap_or_default(),
    };

    debug!(node = %node.label(), strategy, count = values.len(), "join node");
    DriverResponse::output(merge_results(values, strategy, separator))
  }
}

fn value_from_source(source: &str, cx: &Context) -> Option<Value> {
  if source == "input" {
    return Some(cx.input.clone());
  }
  if source == "parallel_results" {
    return Some(Value::Array(cx.parallel_results.clone().unwrap_or_default()));
  }
  if let Some(key) = source.strip_prefix("state.") {
    return cx.state.get(key).cloned();
  }
  if let Some(key) = source.strip_prefix("params.") {
    return cx.params.get(key).cloned();
  }
  None
}

fn merge_results(results: Vec<Value>, strategy: &str, separator: &str) -> Value {
  if results.is_empty() {
    return Value::Null;
  }

  match strategy {
    "first" => results.into_iter().next().unwrap_or(Value::Null),
    "last" => results.into_iter().next_back().unwrap_or(Value::Null),
    "concat" => Value::String(results.iter().map(display_string).collect()),
    "join" => Value::String(
      results.iter().map(display_string).collect::<Vec<_>>().join(separator),
    ),
    "merge" => {
      let mut merged = Map::new();
      for result in results {
        if let Value::Object(map) = result {
          merged.extend(map);
        }
      }
      Value::Object(merged)
    }
    // Default `list`: keep order, flatten one level of nested lists.
    _ => {
      let mut flattened = Vec::with_capacity(results.len());
      for result in results {
        match result {
          Value::Array(items) => flattened.extend(items),
          other => flattened.push(other),
        }
      }
      Value::Array(flattened)
    }
  }
}

fn display_string(value: &Value) -> String {
  match value {
    Value::Null => String::new(),
    Value::String(s) => s.clone(),
    other => other.to_string(),
  }
}
