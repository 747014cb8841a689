use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Outcome discriminator for a driver call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
  #[default]
  Ok,
  Error,
}

/// What a driver hands back to the executor.
///
/// The executor only reads the typed fields below; anything driver-specific
/// (`previous`/`stored` from memory writes, `tool_call_log` from agents,
/// `iterations` from loops) rides along in `extras` and is preserved on the
/// wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DriverResponse {
  pub status: ResponseStatus,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub output: Option<Value>,
  #[serde(rename = "final", default, skip_serializing_if = "Option::is_none")]
  pub final_value: Option<Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub state: Option<Map<String, Value>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub route: Option<String>,
  #[serde(default, skip_serializing_if = "is_false")]
  pub parallel: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
  #[serde(default, skip_serializing_if = "is_false")]
  pub had_error: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error_type: Option<String>,
  #[serde(flatten)]
  pub extras: Map<String, Value>,
}

fn is_false(flag: &bool) -> bool {
  !*flag
}

impl DriverResponse {
  /// Successful response with no payload.
  pub fn ok() -> Self {
    Self::default()
  }

  /// Successful response carrying an output value.
  pub fn output(value: Value) -> Self {
    Self { output: Some(value), ..Self::default() }
  }

  /// Failed response with an error message.
  pub fn error(message: impl Into<String>) -> Self {
    Self {
      status: ResponseStatus::Error,
      error: Some(message.into()),
      ..Self::default()
    }
  }

  pub fn with_route(mut self, route: impl Into<String>) -> Self {
    self.route = Some(route.into());
    self
  }

  pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
    self.extras.insert(key.into(), value);
    self
  }

  pub fn is_ok(&self) -> bool {
    self.status == ResponseStatus::Ok
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn final_field_uses_wire_name() {
    let response = DriverResponse {
      final_value: Some(json!("done")),
      ..DriverResponse::default()
    };
    let wire = serde_json::to_value(&response).unwrap();
    assert_eq!(wire["final"], "done");
    assert_eq!(wire["status"], "ok");
  }

  #[test]
  fn extras_flatten_on_the_wire() {
    let response = DriverResponse::output(json!("x")).with_extra("tool", json!("Uppercase"));
    let wire = serde_json::to_value(&response).unwrap();
    assert_eq!(wire["tool"], "Uppercase");

    let parsed: DriverResponse = serde_json::from_value(wire).unwrap();
    assert_eq!(parsed.extras.get("tool"), Some(&json!("Uppercase")));
  }
}
