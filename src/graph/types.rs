//! 执行图类型定义
//!
//! 节点（游标）、路由结果与图错误

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 执行图节点；Terminated 为终止状态，只能经由 FinalAnswer 到达
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphNode {
    /// 校验请求、决定是否走工具增强推理
    Validation,
    /// 调用模型得到下一步决策
    Reasoning,
    /// 执行上一条 Assistant 消息里的工具调用
    ToolDispatch,
    /// 合成最终回复（流式）
    FinalAnswer,
    /// 已结束
    Terminated,
}

impl GraphNode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GraphNode::Validation => "validation",
            GraphNode::Reasoning => "reasoning",
            GraphNode::ToolDispatch => "tool_dispatch",
            GraphNode::FinalAnswer => "final_answer",
            GraphNode::Terminated => "terminated",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, GraphNode::Terminated)
    }
}

impl fmt::Display for GraphNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 路由结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    /// 还有工具要执行
    Continue,
    /// 进入最终回复
    FinalAnswer,
}

/// 图结构错误（转移表不完整等）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("no transition registered for node {0}")]
    MissingTransition(GraphNode),

    #[error("invalid graph configuration: {0}")]
    InvalidConfiguration(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_serializes_snake_case() {
        let s = serde_json::to_string(&GraphNode::ToolDispatch).unwrap();
        assert_eq!(s, "\"tool_dispatch\"");
        let n: GraphNode = serde_json::from_str("\"final_answer\"").unwrap();
        assert_eq!(n, GraphNode::FinalAnswer);
    }
}
