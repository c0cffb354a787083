// Output formatting
//
// Command results are JSON on stdout; errors and logs go to stderr.

use serde::Serialize;
use serde_json::Value;

use crate::error::CliResult;

/// Convert a command result into a JSON value
pub fn to_json<T: Serialize>(value: &T) -> CliResult<Value> {
    Ok(serde_json::to_value(value)?)
}

/// Render a JSON value the way it is printed
pub fn render(value: &Value) -> CliResult<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

pub fn print_json(value: &Value) -> CliResult<()> {
    println!("{}", render(value)?);
    Ok(())
}

pub fn print_error(message: &str) {
    eprintln!("error: {}", message);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    struct Sample {
        task_id: &'static str,
        changed: bool,
    }

    #[test]
    fn test_to_json_keeps_serde_names() {
        let value = to_json(&Sample {
            task_id: "a.one",
            changed: true,
        })
        .unwrap();
        assert_eq!(value, json!({ "taskId": "a.one", "changed": true }));
    }

    #[test]
    fn test_render_is_pretty() {
        let text = render(&json!({ "outcome": "exhausted" })).unwrap();
        assert_eq!(text, "{\n  \"outcome\": \"exhausted\"\n}");
    }
}
