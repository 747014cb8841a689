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

const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// OpenAI chat-completions agent.
///
/// When tool or memory nodes are connected, they are exposed to the model
/// as callable functions (`tool_<nodeId>`, `memory_<nodeId>`) and executed
/// through the registry for at most [`MAX_TOOL_ROUNDS`] rounds. Without an
/// API key the driver degrades to the non-conversational fallback so
/// offline graphs still flow.
pub struct OpenAiAgentDriver {
  client: Client,
}

impl OpenAiAgentDriver {
  pub fn new() -> Self {
    let client = Client::builder()
      .timeout(Duration::from_secs(60))
      .build()
      .unwrap_or_else(|_| Client::new());
    Self { client }
  }

  async fn chat(
    &self,
    base_url: &str,
    api_key: &str,
    body: &Value,
  ) -> Result<Value, reqwest::Error> {
    self
      .client
      .post(format!("{}/v1/chat/completions", base_url.trim_end_matches('/')))
      .bearer_auth(api_key)
      .json(body)
      .send()
      .await?
      .error_for_status()?
      .json()
      .await
  }
}

impl Default for OpenAiAgentDriver {
  fn default() -> Self {
    Self::new()
  }
}

#[async_trait]
impl Driver for OpenAiAgentDriver {
  fn type_name(&self) -> &'static str {
    "openai_agent"
  }

  async fn execute(&self, node: &Node, cx: &Context, registry: &DriverRegistry) -> DriverResponse {
    let Ok(api_key) = std::env::var("OPENAI_API_KEY") else {
      return fallback_response(cx, &[]);
    };
    let base_url =
      std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
    let model = node.data_str("model").unwrap_or(DEFAULT_MODEL).to_string();
    let system_prompt = build_system_prompt(node, cx.knowledge.as_ref());

    let tools = function_definitions(cx);
    let mut messages = vec![
      json!({ "role": "system", "content": system_prompt }),
      json!({ "role": "user", "content": input_text(&cx.input) }),
    ];
    let mut tool_call_log: Vec<Value> = Vec::new();

    for round in 0..MAX_TOOL_ROUNDS {
      let mut body = json!({
        "model": model.clone(),
        "messages": messages.clone(),
        "temperature": temperature(node),
      });
      if !tools.is_empty() {
        body["tools"] = Value::Array(tools.clone());
        body["tool_choice"] = json!("auto");
      }

      let data = match self.chat(&base_url, &api_key, &body).await {
        Ok(data) => data,
        Err(err) => {
          return provider_error_response(node, cx, format!("OpenAI request failed: {err}"));
        }
      };

      let message = data["choices"][0]["message"].clone();
      let tool_calls = message["tool_calls"].as_array().cloned().unwrap_or_default();

      if tool_calls.is_empty() {
        let content = message["content"].as_str().unwrap_or("").to_string();
        let mut response = DriverResponse::output(json!(content))
          .with_extra("model", json!(model));
        if !tool_call_log.is_empty() {
          response = response.with_extra("tool_call_log", json!(tool_call_log));
        }
        return response;
      }

      debug!(round, calls = tool_calls.len(), "openai agent tool round");
      messages.push(json!({
        "role": "assistant",
        "content": message["content"],
        "tool_calls": tool_calls.clone(),
      }));

      for call in tool_calls {
        let name = call["function"]["name"].as_str().unwrap_or("").to_string();
        let arguments: Value = call["function"]["arguments"]
          .as_str()
          .and_then(|raw| serde_json::from_str(raw).ok())
          .unwrap_or(json!({}));

        let result = dispatch_function_call(registry, cx, &name, &arguments).await;
        tool_call_log.push(log_entry(&name, &arguments, &result));
        messages.push(json!({
          "role": "tool",
          "tool_call_id": call["id"],
          "content": result.to_string(),
        }));
      }
    }

    // The model kept calling tools past the round budget; return what the
    // tools produced rather than looping further.
    let outputs: Vec<Value> =
      tool_call_log.iter().filter_map(|entry| entry.get("result").cloned()).collect();
    let mut response = fallback_response(cx, &outputs);
    response.extras.insert("tool_call_log".into(), json!(tool_call_log));
    response
  }
}

/// OpenAI function definitions for connected tool and memory nodes.
fn function_definitions(cx: &Context) -> Vec<Value> {
  let mut definitions = Vec::new();

  for spec in cx.agent_tools.iter().flatten() {
    definitions.push(json!({
      "type": "function",
      "function": {
        "name": format!("tool_{}", spec.node_id),
        "description": format!(
          "Run the connected '{}' tool{}",
          spec.name,
          spec.operation.as_deref().map(|op| format!(" ({op})")).unwrap_or_default()
        ),
        "parameters": {
          "type": "object",
          "properties": {
            "input": { "type": "string", "description": "Input value for the tool" },
            "params": { "type": "object", "description": "Optional parameter overrides" }
          }
        }
      }
    }));
  }

  for spec in cx.agent_memory_nodes.iter().flatten() {
    definitions.push(json!({
      "type": "function",
      "function": {
        "name": format!("memory_{}", spec.node_id),
        "description": format!(
          "Write to persistent memory '{}:{}'",
          spec.namespace, spec.key
        ),
        "parameters": {
          "type": "object",
          "properties": {
            "value": { "description": "Value to store" },
            "mode": { "type": "string", "enum": ["replace", "append", "merge"] },
            "dedupe": { "type": "boolean", "description": "De-duplicate appended items" }
          },
          "required": ["value"]
        }
      }
    }));
  }

  definitions
}
