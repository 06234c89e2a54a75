use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Unique identifier for a single workflow run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque workflow identity supplied by the caller
///
/// Serialized as a string; integer ids are accepted when deserializing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct WorkflowId(pub String);

impl<'de> Deserialize<'de> for WorkflowId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(i64),
            Str(String),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Int(id) => Self::from(id),
            Raw::Str(id) => Self(id),
        })
    }
}

impl WorkflowId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for WorkflowId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

impl From<&str> for WorkflowId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Key of a vertex, unique within one workflow run (the task number)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VertexKey(pub String);

impl VertexKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for VertexKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for VertexKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for VertexKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// Accumulated results of a run, keyed by vertex
pub type Results = HashMap<VertexKey, serde_json::Value>;

/// A `task` row as stored in the job store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRow {
    pub id: i64,
    pub task_no: String,
    /// JSON payload naming the handler and its parameters
    pub content: String,
    /// Timeout in seconds, 0 when unset
    #[serde(default)]
    pub timeout: u64,
}

/// A `vertex_edge` row; `pid == 0` marks a root edge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeRow {
    pub workflow_id: WorkflowId,
    pub task_id: i64,
    pub pid: i64,
}

/// Decoded task `content`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPayload {
    #[serde(alias = "class")]
    pub handler: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Terminal status of a workflow run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Running,
    Succeeded,
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_accepts_class_alias() {
        let payload: TaskPayload =
            serde_json::from_str(r#"{"class": "sum", "params": {"add": 1}}"#).unwrap();
        assert_eq!(payload.handler, "sum");
        assert_eq!(payload.params["add"], 1);

        let bare: TaskPayload = serde_json::from_str(r#"{"handler": "echo"}"#).unwrap();
        assert!(bare.params.is_null());
    }

    #[test]
    fn test_keys_serialize_transparently() {
        let key = VertexKey::new("7");
        assert_eq!(serde_json::to_string(&key).unwrap(), "\"7\"");
        assert_eq!(WorkflowId::from(42).to_string(), "42");

        let numeric: WorkflowId = serde_json::from_str("42").unwrap();
        let text: WorkflowId = serde_json::from_str("\"42\"").unwrap();
        assert_eq!(numeric, text);
    }
}
