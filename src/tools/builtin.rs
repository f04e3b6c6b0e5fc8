//! 本地工具：add，以及保留的 context_ready 信号工具

use async_trait::async_trait;
use schemars::{schema_for, JsonSchema};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::react::CONTEXT_READY_TOOL;
use crate::tools::Tool;

/// 信号调用对应的工具结果
pub const CONTEXT_READY_ACK: &str = "Context gathered, proceed to the final answer.";

#[derive(Debug, Deserialize, JsonSchema)]
struct AddArgs {
    /// First addend
    a: f64,
    /// Second addend
    b: f64,
}

/// 两数相加
pub struct AddTool;

#[async_trait]
impl Tool for AddTool {
    fn name(&self) -> &str {
        "add"
    }

    fn description(&self) -> &str {
        "Add two numbers and return the sum."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::to_value(schema_for!(AddArgs)).unwrap_or_else(|_| json!({}))
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let AddArgs { a, b } =
            serde_json::from_value(args).map_err(|e| format!("invalid arguments for add: {e}"))?;
        Ok((a + b).to_string())
    }
}

/// 信号工具：模型调用它表示上下文已足够，不执行任何动作
pub struct ContextReadyTool;

#[async_trait]
impl Tool for ContextReadyTool {
    fn name(&self) -> &str {
        CONTEXT_READY_TOOL
    }

    fn description(&self) -> &str {
        "Call this when you have gathered enough information to answer the user, \
         or when no tool is needed. Takes no arguments."
    }

    async fn execute(&self, _args: Value) -> Result<String, String> {
        Ok(CONTEXT_READY_ACK.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::schema::normalize_schema;

    #[tokio::test]
    async fn test_add() {
        assert_eq!(AddTool.execute(json!({"a": 2, "b": 3})).await.unwrap(), "5");
        assert_eq!(AddTool.execute(json!({"a": 1.5, "b": 1})).await.unwrap(), "2.5");
    }

    #[tokio::test]
    async fn test_add_rejects_bad_args() {
        let err = AddTool.execute(json!({"a": "two"})).await.unwrap_err();
        assert!(err.starts_with("invalid arguments for add"));
    }

    #[test]
    fn test_add_schema_normalizes() {
        let schema = normalize_schema(&AddTool.parameters_schema()).unwrap();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["a"]["type"], "number");
        assert_eq!(schema["required"], json!(["a", "b"]));
        assert!(schema.get("$schema").is_none());
    }
}
