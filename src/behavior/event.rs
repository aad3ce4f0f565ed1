//! Raw behavioral events, one JSON object per line of `behavior.jsonl`.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Tracers emit `null` for empty slices and structs; every field falls back
/// to its zero value whether absent or null.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BehaviorEvent {
    #[serde(default, deserialize_with = "null_as_default")]
    pub timestamp: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub process_id: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub process_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub parent_process_id: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub event_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub args: Vec<EventArg>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub container: ContainerInfo,
}

/// Event argument. `value` shape depends on the event.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventArg {
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(rename = "type", default, deserialize_with = "null_as_default")]
    pub kind: String,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContainerInfo {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub image: String,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl BehaviorEvent {
    /// Grouping key: process name, or `pid_<n>` when the name is absent.
    pub fn process_key(&self) -> String {
        if self.process_name.is_empty() {
            format!("pid_{}", self.process_id)
        } else {
            self.process_name.clone()
        }
    }

    pub fn arg(&self, name: &str) -> Option<&Value> {
        self.args.iter().find(|a| a.name == name).map(|a| &a.value)
    }

    pub fn str_arg(&self, name: &str) -> Option<&str> {
        self.arg(name).and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_parses_and_keys_by_pid() {
        let event: BehaviorEvent = serde_json::from_str(
            r#"{"timestamp":1,"processId":42,"processName":"","eventName":"openat",
                "args":[{"name":"pathname","type":"const char*","value":"/etc/hosts"}],
                "container":{"id":"c1","name":"sandbox","image":"node:20"}}"#,
        )
        .unwrap();
        assert_eq!(event.process_key(), "pid_42");
        assert_eq!(event.str_arg("pathname"), Some("/etc/hosts"));
        assert_eq!(event.container.image, "node:20");
    }

    #[test]
    fn test_null_args_and_container_tolerated() {
        let event: BehaviorEvent = serde_json::from_str(
            r#"{"processId":9,"processName":"node","eventName":"fork","args":null,"container":null}"#,
        )
        .unwrap();
        assert!(event.args.is_empty());
        assert_eq!(event.container.id, "");
        assert_eq!(event.event_name, "fork");

        let event: BehaviorEvent = serde_json::from_str(
            r#"{"processName":null,"processId":3,"args":[{"name":"fd","type":null,"value":null}]}"#,
        )
        .unwrap();
        assert_eq!(event.event_name, "");
        assert_eq!(event.process_key(), "pid_3");
        assert_eq!(event.args[0].kind, "");
        assert!(event.arg("fd").unwrap().is_null());
    }
}
