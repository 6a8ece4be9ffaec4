use botstudio::dispatch::{dispatch, ConfigAction, ConfigSink, ToolCall};
use serde_json::json;

struct FakeBotConfig {
    language: Option<String>,
    theme: Option<String>,
    rejected_actions: Vec<ConfigAction>,
}

impl FakeBotConfig {
    fn new() -> Self {
        Self {
            language: None,
            theme: None,
            rejected_actions: Vec::new(),
        }
    }
}

impl ConfigSink for FakeBotConfig {
    fn apply(&mut self, action: ConfigAction, value: &str) -> Result<String, String> {
        if self.rejected_actions.contains(&action) {
            return Err(format!("'{value}' is not allowed"));
        }
        match action {
            ConfigAction::UpdateLanguage => self.language = Some(value.to_string()),
            ConfigAction::UpdateTheme => self.theme = Some(value.to_string()),
            _ => {}
        }
        Ok(format!("{} set to \"{value}\"", action.label()))
    }
}

fn config_call(tasks: serde_json::Value) -> ToolCall {
    ToolCall {
        name: "update_bot_config".to_string(),
        parameters: json!({ "tasks": tasks }),
    }
}

#[test]
fn test_mixed_batch_applies_valid_tasks_and_reports_invalid_ones() {
    let calls = vec![config_call(json!([
        { "key": "change_language", "value": "fr" },
        { "key": "unknown_key", "value": "x" }
    ]))];
    let mut sink = FakeBotConfig::new();

    let report = dispatch(&calls, &mut sink);

    assert_eq!(report.success_count(), 1);
    assert_eq!(report.failure_count(), 1);
    assert_eq!(sink.language.as_deref(), Some("fr"));
    assert!(report.failures()[0].contains("unknown_key"));
}

#[test]
fn test_key_aliases_route_to_the_same_action() {
    let calls = vec![config_call(json!([
        { "key": "color_scheme", "value": "dark" },
        { "key": "update_theme", "value": "light" }
    ]))];
    let mut sink = FakeBotConfig::new();

    let report = dispatch(&calls, &mut sink);

    assert_eq!(report.success_count(), 2);
    // Tasks apply in order; the last write wins.
    assert_eq!(sink.theme.as_deref(), Some("light"));
}

#[test]
fn test_unknown_tool_name_fails_that_call_only() {
    let calls = vec![
        ToolCall {
            name: "delete_everything".to_string(),
            parameters: json!({}),
        },
        config_call(json!([{ "key": "language", "value": "de" }])),
    ];
    let mut sink = FakeBotConfig::new();

    let report = dispatch(&calls, &mut sink);

    assert_eq!(report.failure_count(), 1);
    assert!(report.failures()[0].contains("delete_everything"));
    assert_eq!(report.success_count(), 1);
    assert_eq!(sink.language.as_deref(), Some("de"));
}

#[test]
fn test_sink_rejection_is_reported_per_task() {
    let calls = vec![config_call(json!([
        { "key": "language", "value": "fr" },
        { "key": "theme", "value": "neon" }
    ]))];
    let mut sink = FakeBotConfig::new();
    sink.rejected_actions.push(ConfigAction::UpdateTheme);

    let report = dispatch(&calls, &mut sink);

    assert_eq!(report.success_count(), 1);
    assert_eq!(report.failure_count(), 1);
    assert!(report.failures()[0].contains("color scheme"));
    assert_eq!(sink.language.as_deref(), Some("fr"));
    assert_eq!(sink.theme, None);
}

#[test]
fn test_null_parameters_fail_the_call() {
    let calls = vec![ToolCall {
        name: "update_bot_config".to_string(),
        parameters: serde_json::Value::Null,
    }];
    let mut sink = FakeBotConfig::new();

    let report = dispatch(&calls, &mut sink);

    assert_eq!(report.success_count(), 0);
    assert_eq!(report.failure_count(), 1);
    assert!(report.failures()[0].contains("tasks"));
}

#[test]
fn test_render_groups_successes_then_failures() {
    let calls = vec![config_call(json!([
        { "key": "language", "value": "fr" },
        { "key": "bogus", "value": "x" }
    ]))];
    let mut sink = FakeBotConfig::new();

    let rendered = dispatch(&calls, &mut sink).render();

    let applied_at = rendered.find("Applied:").unwrap();
    let failed_at = rendered.find("Failed:").unwrap();
    assert!(applied_at < failed_at);
    assert!(rendered.contains("- language set to \"fr\""));
    assert!(rendered.contains("- bogus: unrecognized configuration key"));
}
