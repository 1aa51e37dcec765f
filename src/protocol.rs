//! Wire shapes of the Service Manager and OAuth endpoints.
//!
//! Fields the tool does not act on are left out; unknown fields are ignored.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Deserialize, Clone)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct InstanceContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ServiceInstance {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<InstanceContext>,
}

impl ServiceInstance {
    pub fn matches(&self, name: &str) -> bool {
        self.name == name
            || self
                .context
                .as_ref()
                .and_then(|c| c.instance_name.as_deref())
                == Some(name)
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ServiceInstancePage {
    #[serde(default)]
    pub items: Vec<ServiceInstance>,
    #[serde(default)]
    pub token: Option<String>,
}

impl ServiceInstancePage {
    pub fn find(&self, name: &str) -> Option<&ServiceInstance> {
        self.items.iter().find(|inst| inst.matches(name))
    }

    pub fn next_token(&self) -> Option<&str> {
        self.token.as_deref().filter(|t| !t.is_empty())
    }
}

/// Raw `data` block of the parameters endpoint. Values stay untyped because
/// the API does not guarantee their JSON type.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ParameterData {
    #[serde(rename = "serviceStopped", default)]
    pub service_stopped: Option<Value>,
    #[serde(rename = "requestedOperation", default)]
    pub requested_operation: Option<Value>,
}

/// How `serviceStopped` was reported. A missing flag and a flag of the
/// wrong JSON type both read as UNKNOWN, but autostart only acts on the former.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoppedFlag {
    Set(bool),
    Missing,
    Malformed,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct InstanceParameters {
    #[serde(default)]
    pub data: Option<ParameterData>,
}

impl InstanceParameters {
    fn data(&self) -> Option<&ParameterData> {
        self.data.as_ref()
    }

    pub fn stopped_flag(&self) -> StoppedFlag {
        match self.data().and_then(|d| d.service_stopped.as_ref()) {
            None | Some(Value::Null) => StoppedFlag::Missing,
            Some(Value::Bool(b)) => StoppedFlag::Set(*b),
            Some(_) => StoppedFlag::Malformed,
        }
    }

    /// `Some` only when the API reported a real boolean.
    pub fn service_stopped(&self) -> Option<bool> {
        match self.stopped_flag() {
            StoppedFlag::Set(b) => Some(b),
            _ => None,
        }
    }

    pub fn raw_service_stopped(&self) -> Value {
        self.data()
            .and_then(|d| d.service_stopped.clone())
            .unwrap_or(Value::Null)
    }

    pub fn raw_requested_operation(&self) -> Value {
        self.data()
            .and_then(|d| d.requested_operation.clone())
            .unwrap_or(Value::Null)
    }

    /// The in-flight operation, if the marker is set to anything truthy.
    pub fn requested_operation(&self) -> Option<String> {
        let value = self.data()?.requested_operation.as_ref()?;
        if !is_truthy(value) {
            return None;
        }
        Some(match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct StatePatch {
    #[serde(rename = "serviceStopped")]
    pub service_stopped: bool,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct PatchParameters {
    pub data: StatePatch,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct PatchRequest {
    pub parameters: PatchParameters,
}

impl PatchRequest {
    pub fn service_stopped(stopped: bool) -> Self {
        Self {
            parameters: PatchParameters {
                data: StatePatch {
                    service_stopped: stopped,
                },
            },
        }
    }
}
