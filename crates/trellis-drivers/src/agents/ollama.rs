use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use trellis_graph::Node;

use crate::agents::{build_system_prompt, input_text, provider_error_response, temperature};
use crate::context::Context;
use crate::registry::{Driver, DriverRegistry};
use crate::response::DriverResponse;

const DEFAULT_BASE_URL: &str = "http://localhost:11434";
const DEFAULT_MODEL: &str = "llama3.1:8b-instruct";

/// Ollama chat agent for local models. No API key, no tool calling; a
/// plain single-turn chat against `{base_url}/api/chat`.
pub struct OllamaAgentDriver {
  client: Client,
}

impl OllamaAgentDriver {
  pub fn new() -> Self {
    let client = Client::builder()
      .timeout(Duration::from_secs(60))
      .build()
      .unwrap_or_else(|_| Client::new());
    Self { client }
  }
}

impl Default for OllamaAgentDriver {
  fn default() -> Self {
    Self::new()
  }
}

#[async_trait]
impl Driver for OllamaAgentDriver {
  fn type_name(&self) -> &'static str {
    "ollama_agent"
  }

  async fn execute(&self, node: &Node, cx: &Context, _registry: &DriverRegistry) -> DriverResponse {
    let base_url =
      std::env::var("OLLAMA_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
    let model = node
      .data_str("model")
      .map(str::to_string)
      .or_else(|| std::env::var("OLLAMA_MODEL").ok())
      .unwrap_or_else(|| DEFAULT_MODEL.to_string());

    let body = json!({
      "model": model.clone(),
      "messages": [
        { "role": "system", "content": build_system_prompt(node, cx.knowledge.as_ref()) },
        { "role": "user", "content": input_text(&cx.input) },
      ],
      "stream": false,
      "options": { "temperature": temperature(node) },
    });

    let url = format!("{}/api/chat", base_url.trim_end_matches('/'));
    let result = async {
      self
        .client
        .post(&url)
        .json(&body)
        .send()
        .await?
        .error_for_status()?
        .json::<serde_json::Value>()
        .await
    }
    .await;

    match result {
      Ok(data) => {
        let content = data["message"]["content"].as_str().unwrap_or("").to_string();
        DriverResponse::output(json!(content)).with_extra("model", json!(model))
      }
      Err(err) => {
        provider_error_response(node, cx, format!("Ollama connection failed: {err}"))
      }
    }
  }
}
