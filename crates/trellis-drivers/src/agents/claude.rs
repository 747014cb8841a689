use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::debug;
use trellis_graph::Node;

use crate::agents::{
  MAX_TOOL_ROUNDS, build_system_prompt, dispatch_function_call, fallback_response, input_text,
  log_entry, provider_error_response, temperature,
};
use crate::context::Context;
use crate::registry::{Driver, DriverRegistry};
use crate::response::DriverResponse;

const DEFAULT_MODEL: &str = "claude-3-5-sonnet-latest";
const BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

/// Anthropic messages agent.
///
/// Tool use follows the messages-API shape: the model returns `tool_use`
/// content blocks, we execute them through the registry and answer with
/// `tool_result` blocks, for at most [`MAX_TOOL_ROUNDS`] rounds.
pub struct ClaudeAgentDriver {
  client: Client,
}

impl ClaudeAgentDriver {
  pub fn new() -> Self {
    let client = Client::builder()
      .timeout(Duration::from_secs(60))
      .build()
      .unwrap_or_else(|_| Client::new());
    Self { client }
  }

  async fn messages(&self, api_key: &str, body: &Value) -> Result<Value, reqwest::Error> {
    self
      .client
      .post(format!("{BASE_URL}/v1/messages"))
      .header("x-api-key", api_key)
      .header("anthropic-version", API_VERSION)
      .json(body)
      .send()
      .await?
      .error_for_status()?
      .json()
      .await
  }
}

impl Default for ClaudeAgentDriver {
  fn default() -> Self {
    Self::new()
  }
}

#[async_trait]
impl Driver for ClaudeAgentDriver {
  fn type_name(&self) -> &'static str {
    "claude_agent"
  }

  async fn execute(&self, node: &Node, cx: &Context, registry: &DriverRegistry) -> DriverResponse {
    let Ok(api_key) = std::env::var("ANTHROPIC_API_KEY") else {
      return fallback_response(cx, &[]);
    };
    let model = node.data_str("model").unwrap_or(DEFAULT_MODEL).to_string();
    let system_prompt = build_system_prompt(node, cx.knowledge.as_ref());

    let tools = tool_definitions(cx);
    let mut messages = vec![json!({ "role": "user", "content": input_text(&cx.input) })];
    let mut tool_call_log: Vec<Value> = Vec::new();

    for round in 0..MAX_TOOL_ROUNDS {
      let mut body = json!({
        "model": model.clone(),
        "max_tokens": node.data_i64("max_tokens").unwrap_or(1024),
        "system": system_prompt.clone(),
        "messages": messages.clone(),
        "temperature": temperature(node),
      });
      if !tools.is_empty() {
        body["tools"] = Value::Array(tools.clone());
      }

      let data = match self.messages(&api_key, &body).await {
        Ok(data) => data,
        Err(err) => {
          return provider_error_response(node, cx, format!("Claude request failed: {err}"));
        }
      };

      let content = data["content"].as_array().cloned().unwrap_or_default();
      let tool_uses: Vec<Value> =
        content.iter().filter(|block| block["type"] == "tool_use").cloned().collect();

      if data["stop_reason"] != "tool_use" || tool_uses.is_empty() {
        let text: String = content
          .iter()
          .filter_map(|block| block["text"].as_str())
          .collect::<Vec<_>>()
          .join("");
        let mut response =
          DriverResponse::output(json!(text)).with_extra("model", json!(model));
        if !tool_call_log.is_empty() {
          response = response.with_extra("tool_call_log", json!(tool_call_log));
        }
        return response;
      }

      debug!(round, calls = tool_uses.len(), "claude agent tool round");
      messages.push(json!({ "role": "assistant", "content": content }));

      let mut results = Vec::with_capacity(tool_uses.len());
      for block in tool_uses {
        let name = block["name"].as_str().unwrap_or("").to_string();
        let arguments = block["input"].clone();
        let result = dispatch_function_call(registry, cx, &name, &arguments).await;
        tool_call_log.push(log_entry(&name, &arguments, &result));
        results.push(json!({
          "type": "tool_result",
          "tool_use_id": block["id"],
          "content": result.to_string(),
        }));
      }
      messages.push(json!({ "role": "user", "content": results }));
    }

    let outputs: Vec<Value> =
      tool_call_log.iter().filter_map(|entry| entry.get("result").cloned()).collect();
    let mut response = fallback_response(cx, &outputs);
    response.extras.insert("tool_call_log".into(), json!(tool_call_log));
    response
  }
}

/// Anthropic tool definitions for connected tool and memory nodes.
fn tool_definitions(cx: &Context) -> Vec<Value> {
  let mut definitions = Vec::new();

  for spec in cx.agent_tools.iter().flatten() {
    definitions.push(json!({
      "name": format!("tool_{}", spec.node_id),
      "description": format!(
        "Run the connected '{}' tool{}",
        spec.name,
        spec.operation.as_deref().map(|op| format!(" ({op})")).unwrap_or_default()
      ),
      "input_schema": {
        "type": "object",
        "properties": {
          "input": { "type": "string", "description": "Input value for the tool" },
          "params": { "type": "object", "description": "Optional parameter overrides" }
        }
      }
    }));
  }

  for spec in cx.agent_memory_nodes.iter().flatten() {
    definitions.push(json!({
      "name": format!("memory_{}", spec.node_id),
      "description": format!("Write to persistent memory '{}:{}'", spec.namespace, spec.key),
      "input_schema": {
        "type": "object",
        "properties": {
          "value": { "description": "Value to store" },
          "mode": { "type": "string", "enum": ["replace", "append", "merge"] },
          "dedupe": { "type": "boolean", "description": "De-duplicate appended items" }
        },
        "required": ["value"]
      }
    }));
  }

  definitions
}
