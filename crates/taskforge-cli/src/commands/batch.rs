// Batch command: apply a list of transitions from a JSON document

use std::io::Read;
use std::path::PathBuf;

use anyhow::Context;
use serde_json::Value;
use taskforge_orchestration::{BatchOperation, Orchestrator};

use super::Command;
use crate::error::CliResult;
use crate::output::to_json;

/// Where the operations come from; `-` reads stdin
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchSource {
    Stdin,
    File(PathBuf),
}

impl BatchSource {
    pub fn from_arg(arg: &str) -> Self {
        if arg == "-" {
            BatchSource::Stdin
        } else {
            BatchSource::File(PathBuf::from(arg))
        }
    }

    fn read(&self) -> anyhow::Result<String> {
        match self {
            BatchSource::Stdin => {
                let mut text = String::new();
                std::io::stdin()
                    .read_to_string(&mut text)
                    .context("reading operations from stdin")?;
                Ok(text)
            }
            BatchSource::File(path) => std::fs::read_to_string(path)
                .with_context(|| format!("reading operations from {}", path.display())),
        }
    }
}

/// Parse a JSON array of `{"action": "start"|"done"|"fail", "taskId": ...}`
pub fn parse_operations(text: &str) -> anyhow::Result<Vec<BatchOperation>> {
    let operations: Vec<BatchOperation> =
        serde_json::from_str(text).context("parsing batch operations")?;
    if operations.is_empty() {
        anyhow::bail!("batch contains no operations");
    }
    Ok(operations)
}

#[derive(Debug, Clone)]
pub struct BatchCommand {
    pub source: BatchSource,
    pub atomic: bool,
}

impl BatchCommand {
    pub fn new(source: BatchSource, atomic: bool) -> Self {
        Self { source, atomic }
    }
}

#[async_trait::async_trait]
impl Command for BatchCommand {
    async fn execute(&self, orchestrator: &Orchestrator) -> CliResult<Value> {
        let operations = parse_operations(&self.source.read()?)?;
        let report = orchestrator
            .batch_operations(&operations, self.atomic)
            .await?;
        to_json(&report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_operations() {
        let ops = parse_operations(
            r#"[
                {"action": "start", "taskId": "a.one"},
                {"action": "done", "taskId": "a.one"},
                {"action": "fail", "taskId": "a.two", "reason": "flaky"}
            ]"#,
        )
        .unwrap();
        assert_eq!(ops.len(), 3);
        assert_eq!(ops[0], BatchOperation::start("a.one"));
        assert_eq!(ops[2].task_id(), "a.two");
    }

    #[test]
    fn test_parse_operations_rejects_bad_input() {
        let err = parse_operations(r#"[{"action": "restart", "taskId": "a.one"}]"#).unwrap_err();
        assert!(format!("{:#}", err).starts_with("parsing batch operations"));
        assert!(parse_operations("[]").is_err());
    }

    #[test]
    fn test_source_from_arg() {
        assert_eq!(BatchSource::from_arg("-"), BatchSource::Stdin);
        assert_eq!(
            BatchSource::from_arg("ops.json"),
            BatchSource::File(PathBuf::from("ops.json"))
        );
    }
}
