//! Tool-call dispatch for bot configuration changes.
//!
//! Tool calls arrive as name + JSON parameters extracted from the stream.
//! Arguments are parsed into a statically shaped variant per tool name;
//! anything that fails shape validation fails that call only. Task keys map
//! onto a fixed set of configuration actions; unknown keys fail that task
//! only. The batch never errors: every outcome lands in one report.

use log::{debug, warn};
use serde::Deserialize;

/// Transient tool call extracted from the stream; consumed here, never
/// persisted.
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub name: String,
    pub parameters: serde_json::Value,
}

/// Tool calls the dispatcher knows how to route, keyed by tool name.
#[derive(Debug, Clone, PartialEq)]
enum KnownToolCall {
    UpdateBotConfig { tasks: Vec<ConfigTask> },
}

/// One `{key, value}` configuration task inside an `update_bot_config` call.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConfigTask {
    pub key: String,
    pub value: String,
}

/// The fixed set of side effects the dispatcher may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigAction {
    UpdateLanguage,
    UpdateLogo,
    UpdateTheme,
    ToggleStatus,
    UpdateWelcome,
    UpdateName,
}

impl ConfigAction {
    /// Map a task key onto an action. Keys accept the aliases the model is
    /// known to emit.
    pub fn from_task_key(key: &str) -> Option<Self> {
        match key.trim().to_ascii_lowercase().as_str() {
            "update_language" | "change_language" | "language" => Some(Self::UpdateLanguage),
            "update_logo" | "change_logo" | "logo" => Some(Self::UpdateLogo),
            "update_theme" | "change_theme" | "theme" | "color_scheme" => Some(Self::UpdateTheme),
            "toggle_status" | "status" | "bot_status" => Some(Self::ToggleStatus),
            "update_welcome" | "change_welcome" | "welcome_message" => Some(Self::UpdateWelcome),
            "update_name" | "change_name" | "display_name" | "bot_name" => Some(Self::UpdateName),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::UpdateLanguage => "language",
            Self::UpdateLogo => "logo",
            Self::UpdateTheme => "color scheme",
            Self::ToggleStatus => "bot status",
            Self::UpdateWelcome => "welcome message",
            Self::UpdateName => "display name",
        }
    }
}

/// The only side-effecting seam the dispatcher calls into. Implementations
/// apply one action with one string value and answer with a human-readable
/// success or failure message.
pub trait ConfigSink {
    fn apply(&mut self, action: ConfigAction, value: &str) -> Result<String, String>;
}

/// Aggregated per-call and per-task outcomes for one batch.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DispatchReport {
    successes: Vec<String>,
    failures: Vec<String>,
}

impl DispatchReport {
    pub fn success_count(&self) -> usize {
        self.successes.len()
    }

    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }

    pub fn successes(&self) -> &[String] {
        &self.successes
    }

    pub fn failures(&self) -> &[String] {
        &self.failures
    }

    /// Render the combined summary: bulleted successes, then bulleted
    /// failures.
    pub fn render(&self) -> String {
        if self.successes.is_empty() && self.failures.is_empty() {
            return "No configuration changes were requested.".to_string();
        }

        let mut out = String::new();
        if !self.successes.is_empty() {
            out.push_str("Applied:\n");
            for line in &self.successes {
                out.push_str(&format!("- {line}\n"));
            }
        }
        if !self.failures.is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str("Failed:\n");
            for line in &self.failures {
                out.push_str(&format!("- {line}\n"));
            }
        }
        out.trim_end().to_string()
    }
}

/// Route every recognized call to the configuration sink. Unknown tool
/// names and malformed argument shapes produce per-call failures; sibling
/// calls and tasks in the same batch still run.
pub fn dispatch(calls: &[ToolCall], sink: &mut dyn ConfigSink) -> DispatchReport {
    let mut report = DispatchReport::default();

    for call in calls {
        match parse_known(call) {
            Ok(KnownToolCall::UpdateBotConfig { tasks }) => {
                debug!(
                    "dispatching update_bot_config ({} task(s))",
                    tasks.len()
                );
                for task in tasks {
                    run_task(&task, sink, &mut report);
                }
            }
            Err(reason) => {
                warn!("tool call rejected (name={}): {reason}", call.name);
                report.failures.push(reason);
            }
        }
    }

    report
}

fn parse_known(call: &ToolCall) -> Result<KnownToolCall, String> {
    match call.name.as_str() {
        "update_bot_config" => {
            let tasks = call
                .parameters
                .get("tasks")
                .ok_or_else(|| "update_bot_config: missing 'tasks' array".to_string())?;
            let tasks: Vec<ConfigTask> = serde_json::from_value(tasks.clone())
                .map_err(|e| format!("update_bot_config: invalid 'tasks' shape: {e}"))?;
            Ok(KnownToolCall::UpdateBotConfig { tasks })
        }
        other => Err(format!("unknown tool '{other}'")),
    }
}

fn run_task(task: &ConfigTask, sink: &mut dyn ConfigSink, report: &mut DispatchReport) {
    let Some(action) = ConfigAction::from_task_key(&task.key) else {
        report
            .failures
            .push(format!("{}: unrecognized configuration key", task.key));
        return;
    };

    match sink.apply(action, &task.value) {
        Ok(message) => report.successes.push(message),
        Err(message) => report
            .failures
            .push(format!("{}: {message}", action.label())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingSink {
        applied: Vec<(ConfigAction, String)>,
    }

    impl ConfigSink for RecordingSink {
        fn apply(&mut self, action: ConfigAction, value: &str) -> Result<String, String> {
            self.applied.push((action, value.to_string()));
            Ok(format!("{} set to \"{value}\"", action.label()))
        }
    }

    #[test]
    fn test_action_key_aliases() {
        assert_eq!(
            ConfigAction::from_task_key("change_language"),
            Some(ConfigAction::UpdateLanguage)
        );
        assert_eq!(
            ConfigAction::from_task_key("  Color_Scheme "),
            Some(ConfigAction::UpdateTheme)
        );
        assert_eq!(ConfigAction::from_task_key("unknown_key"), None);
    }

    #[test]
    fn test_malformed_tasks_shape_fails_that_call_only() {
        let calls = vec![
            ToolCall {
                name: "update_bot_config".to_string(),
                parameters: serde_json::json!({ "tasks": "not-an-array" }),
            },
            ToolCall {
                name: "update_bot_config".to_string(),
                parameters: serde_json::json!({ "tasks": [{ "key": "language", "value": "de" }] }),
            },
        ];
        let mut sink = RecordingSink { applied: vec![] };
        let report = dispatch(&calls, &mut sink);
        assert_eq!(report.failure_count(), 1);
        assert_eq!(report.success_count(), 1);
        assert_eq!(sink.applied.len(), 1);
    }

    #[test]
    fn test_render_empty_report() {
        let report = DispatchReport::default();
        assert_eq!(report.render(), "No configuration changes were requested.");
    }
}
