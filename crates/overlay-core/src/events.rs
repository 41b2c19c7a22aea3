//! Overlay event definitions
//!
//! The server serializes these payloads into the `data` field of custom hot
//! channel messages. Receivers must not trust that shape: the payload crossed
//! a process boundary and other plugins may share the channel. The `is_*`
//! predicates and [`OverlayEvent::recognize`] check the untyped JSON before
//! any field is read.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

/// Plugin name, used as the event prefix and as the overlay error identity
pub const PLUGIN_NAME: &str = "command-overlay";

// ─────────────────────────────────────────────────────────
// Event Names
// ─────────────────────────────────────────────────────────

/// The four named events the overlay plugin emits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OverlayEventKind {
    PluginRegistered,
    LintStarted,
    LintFinished,
    LintFailed,
}

impl OverlayEventKind {
    pub const ALL: [OverlayEventKind; 4] = [
        OverlayEventKind::PluginRegistered,
        OverlayEventKind::LintStarted,
        OverlayEventKind::LintFinished,
        OverlayEventKind::LintFailed,
    ];

    /// Unprefixed event suffix
    pub fn suffix(&self) -> &'static str {
        match self {
            OverlayEventKind::PluginRegistered => "plugin-registered",
            OverlayEventKind::LintStarted => "lint-started",
            OverlayEventKind::LintFinished => "lint-finished",
            OverlayEventKind::LintFailed => "lint-failed",
        }
    }

    /// Full, namespaced event name as it appears on the wire
    pub fn event_name(&self) -> &'static str {
        match self {
            OverlayEventKind::PluginRegistered => "command-overlay:plugin-registered",
            OverlayEventKind::LintStarted => "command-overlay:lint-started",
            OverlayEventKind::LintFinished => "command-overlay:lint-finished",
            OverlayEventKind::LintFailed => "command-overlay:lint-failed",
        }
    }

    /// Look up a kind from its namespaced wire name
    pub fn from_event_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.event_name() == name)
    }
}

impl std::fmt::Display for OverlayEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.event_name())
    }
}

// ─────────────────────────────────────────────────────────
// Payloads (server side, typed)
// ─────────────────────────────────────────────────────────

/// Emitted once when the plugin attaches to a running server
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginRegistered {
    pub timestamp: i64,
}

/// Emitted at the moment a run begins
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LintStarted {
    pub command: Vec<String>,
    pub timestamp: i64,
}

/// Emitted exactly once per run that produced an exit status
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LintFinished {
    pub command: Vec<String>,
    pub exit_code: Option<i32>,
    pub success: bool,
    /// Raw interleaved stdout/stderr capture
    pub output: String,
    /// `output` with escape sequences removed
    pub clean: String,
}

/// Emitted when the check command could not be started at all
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LintFailed {
    pub command: Vec<String>,
    pub message: String,
    pub timestamp: i64,
}

/// Typed payload plus the name it travels under
#[derive(Debug, Clone, PartialEq)]
pub enum OverlayPayload {
    PluginRegistered(PluginRegistered),
    LintStarted(LintStarted),
    LintFinished(LintFinished),
    LintFailed(LintFailed),
}

impl OverlayPayload {
    pub fn kind(&self) -> OverlayEventKind {
        match self {
            OverlayPayload::PluginRegistered(_) => OverlayEventKind::PluginRegistered,
            OverlayPayload::LintStarted(_) => OverlayEventKind::LintStarted,
            OverlayPayload::LintFinished(_) => OverlayEventKind::LintFinished,
            OverlayPayload::LintFailed(_) => OverlayEventKind::LintFailed,
        }
    }

    pub fn event_name(&self) -> &'static str {
        self.kind().event_name()
    }

    /// True for the two events that end an invocation
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OverlayPayload::LintFinished(_) | OverlayPayload::LintFailed(_)
        )
    }

    /// Serialize the payload into the untyped `data` blob
    pub fn to_data(&self) -> Value {
        let result = match self {
            OverlayPayload::PluginRegistered(p) => serde_json::to_value(p),
            OverlayPayload::LintStarted(p) => serde_json::to_value(p),
            OverlayPayload::LintFinished(p) => serde_json::to_value(p),
            OverlayPayload::LintFailed(p) => serde_json::to_value(p),
        };
        // Plain structs of strings, bools and integers always serialize
        result.unwrap_or(Value::Null)
    }
}

/// Render a command vector the way a shell user would type it
pub fn command_line<S: AsRef<str>>(command: &[S]) -> String {
    command
        .iter()
        .map(|part| part.as_ref())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Current wall-clock time in epoch milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ─────────────────────────────────────────────────────────
// Shape Predicates (receiver side, untyped)
// ─────────────────────────────────────────────────────────

fn as_object(value: &Value) -> Option<&Map<String, Value>> {
    value.as_object()
}

/// An array whose every element is a string
pub fn is_string_array(value: &Value) -> bool {
    value
        .as_array()
        .map(|items| items.iter().all(Value::is_string))
        .unwrap_or(false)
}

fn field_is(map: &Map<String, Value>, key: &str, check: fn(&Value) -> bool) -> bool {
    map.get(key).map(check).unwrap_or(false)
}

fn is_null_or_number(value: &Value) -> bool {
    value.is_null() || value.is_number()
}

/// `{ command: string[], timestamp: number }`
pub fn is_lint_started(value: &Value) -> bool {
    let Some(map) = as_object(value) else {
        return false;
    };
    field_is(map, "command", is_string_array) && field_is(map, "timestamp", Value::is_number)
}

/// `{ command: string[], exitCode: number | null, success: boolean, output: string, clean: string }`
pub fn is_lint_finished(value: &Value) -> bool {
    let Some(map) = as_object(value) else {
        return false;
    };
    field_is(map, "success", Value::is_boolean)
        && field_is(map, "output", Value::is_string)
        && field_is(map, "clean", Value::is_string)
        && field_is(map, "exitCode", is_null_or_number)
        && field_is(map, "command", is_string_array)
}

/// `{ command: string[], message: string, timestamp: number }`
pub fn is_lint_failed(value: &Value) -> bool {
    let Some(map) = as_object(value) else {
        return false;
    };
    field_is(map, "command", is_string_array)
        && field_is(map, "message", Value::is_string)
        && field_is(map, "timestamp", Value::is_number)
}

// ─────────────────────────────────────────────────────────
// Recognized Views
// ─────────────────────────────────────────────────────────

/// A payload that passed its shape check, borrowing from the raw JSON
#[derive(Debug, Clone, PartialEq)]
pub enum OverlayEvent<'a> {
    /// The registration timestamp is checked leniently: a bad value yields
    /// `None` instead of rejecting the event.
    PluginRegistered { timestamp: Option<&'a Number> },
    LintStarted {
        command: Vec<&'a str>,
        timestamp: &'a Number,
    },
    LintFinished {
        command: Vec<&'a str>,
        exit_code: Option<&'a Number>,
        success: bool,
        output: &'a str,
        clean: &'a str,
    },
    LintFailed {
        command: Vec<&'a str>,
        message: &'a str,
        timestamp: &'a Number,
    },
}

fn string_items(value: &Value) -> Vec<&str> {
    value
        .as_array()
        .map(|items| items.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

impl<'a> OverlayEvent<'a> {
    /// Recognize `data` as the payload of `kind`.
    ///
    /// Returns `None` for malformed payloads; never panics.
    pub fn recognize(kind: OverlayEventKind, data: &'a Value) -> Option<Self> {
        match kind {
            OverlayEventKind::PluginRegistered => Some(OverlayEvent::PluginRegistered {
                timestamp: data.get("timestamp").and_then(Value::as_number),
            }),
            OverlayEventKind::LintStarted => {
                if !is_lint_started(data) {
                    return None;
                }
                Some(OverlayEvent::LintStarted {
                    command: string_items(&data["command"]),
                    timestamp: data["timestamp"].as_number()?,
                })
            }
            OverlayEventKind::LintFinished => {
                if !is_lint_finished(data) {
                    return None;
                }
                Some(OverlayEvent::LintFinished {
                    command: string_items(&data["command"]),
                    exit_code: data["exitCode"].as_number(),
                    success: data["success"].as_bool()?,
                    output: data["output"].as_str()?,
                    clean: data["clean"].as_str()?,
                })
            }
            OverlayEventKind::LintFailed => {
                if !is_lint_failed(data) {
                    return None;
                }
                Some(OverlayEvent::LintFailed {
                    command: string_items(&data["command"]),
                    message: data["message"].as_str()?,
                    timestamp: data["timestamp"].as_number()?,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn finished_payload() -> Value {
        json!({
            "command": ["npm", "run", "lint"],
            "exitCode": 1,
            "success": false,
            "output": "\u{1b}[31merror\u{1b}[0m",
            "clean": "error",
        })
    }

    #[test]
    fn test_event_names_are_namespaced() {
        for kind in OverlayEventKind::ALL {
            assert_eq!(
                kind.event_name(),
                format!("{}:{}", PLUGIN_NAME, kind.suffix())
            );
            assert_eq!(OverlayEventKind::from_event_name(kind.event_name()), Some(kind));
        }
        assert_eq!(OverlayEventKind::from_event_name("lint-finished"), None);
        assert_eq!(OverlayEventKind::from_event_name("vite:beforeUpdate"), None);
    }

    #[test]
    fn test_lint_finished_serializes_camel_case() {
        let payload = OverlayPayload::LintFinished(LintFinished {
            command: vec!["eslint".into(), ".".into()],
            exit_code: None,
            success: false,
            output: String::new(),
            clean: String::new(),
        });
        let data = payload.to_data();
        assert!(data.get("exitCode").is_some());
        assert!(data["exitCode"].is_null());
        assert!(data.get("exit_code").is_none());
        assert!(is_lint_finished(&data));
    }

    #[test]
    fn test_typed_payloads_pass_their_predicates() {
        let started = OverlayPayload::LintStarted(LintStarted {
            command: vec!["check".into()],
            timestamp: 1_700_000_000_000,
        });
        assert!(is_lint_started(&started.to_data()));

        let failed = OverlayPayload::LintFailed(LintFailed {
            command: vec!["check".into()],
            message: "spawn check ENOENT".into(),
            timestamp: 1_700_000_000_000,
        });
        assert!(is_lint_failed(&failed.to_data()));
        assert!(failed.is_terminal());
        assert!(!started.is_terminal());
    }

    #[test]
    fn test_is_lint_finished_rejects_wrong_types() {
        let mut data = finished_payload();
        data["exitCode"] = json!("1");
        assert!(!is_lint_finished(&data));

        let mut data = finished_payload();
        data["command"] = json!(["npm", 3]);
        assert!(!is_lint_finished(&data));

        let mut data = finished_payload();
        data["success"] = json!("false");
        assert!(!is_lint_finished(&data));

        let mut data = finished_payload();
        data.as_object_mut().unwrap().remove("clean");
        assert!(!is_lint_finished(&data));
    }

    #[test]
    fn test_is_lint_finished_accepts_null_exit_code() {
        let mut data = finished_payload();
        data["exitCode"] = Value::Null;
        assert!(is_lint_finished(&data));
    }

    #[test]
    fn test_predicates_reject_non_objects() {
        for value in [json!(null), json!(42), json!("lint"), json!([1, 2])] {
            assert!(!is_lint_started(&value));
            assert!(!is_lint_finished(&value));
            assert!(!is_lint_failed(&value));
        }
    }

    #[test]
    fn test_missing_command_field_rejected() {
        let data = json!({ "message": "boom", "timestamp": 1 });
        assert!(!is_lint_failed(&data));
    }

    #[test]
    fn test_recognize_finished() {
        let data = finished_payload();
        let event = OverlayEvent::recognize(OverlayEventKind::LintFinished, &data).unwrap();
        match event {
            OverlayEvent::LintFinished {
                command,
                exit_code,
                success,
                clean,
                ..
            } => {
                assert_eq!(command, vec!["npm", "run", "lint"]);
                assert_eq!(exit_code.and_then(Number::as_i64), Some(1));
                assert!(!success);
                assert_eq!(clean, "error");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_recognize_registration_is_lenient() {
        let data = json!({ "timestamp": "yesterday" });
        let event = OverlayEvent::recognize(OverlayEventKind::PluginRegistered, &data);
        assert_eq!(event, Some(OverlayEvent::PluginRegistered { timestamp: None }));

        let data = json!("not even an object");
        let event = OverlayEvent::recognize(OverlayEventKind::PluginRegistered, &data);
        assert_eq!(event, Some(OverlayEvent::PluginRegistered { timestamp: None }));
    }

    #[test]
    fn test_command_line() {
        assert_eq!(command_line(&["check", "src/"]), "check src/");
        assert_eq!(command_line::<&str>(&[]), "");
    }
}
