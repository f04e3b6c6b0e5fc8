//! Kronos - 对话式智能体执行器
//!
//! 给定用户消息与启用的 toolkit 集合，驱动 LLM 走有界的推理循环，按模型请求调用工具或子智能体，
//! 以流式事件增量返回最终回答，并在每次图转移后写检查点以便续跑。
//!
//! 模块划分：
//! - **agent**: 无头运行时（按配置组装全部协作者，供 HTTP / CLI 调用）
//! - **api**: axum 路由（SSE 流式接口、健康检查），feature `web`
//! - **checkpoint**: 检查点模型与存储（内存 / JSON 文件）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误分类、恢复策略、会话状态、会话监管、任务调度
//! - **graph**: 执行图（节点、转移表、构建器、引擎）
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock）
//! - **memory**: 对话消息模型与历史不变量
//! - **react**: 路由函数与 Planner（系统提示、推理调用）
//! - **stream**: 流事件、发射器、SSE 编解码
//! - **tools**: 工具注册表、外部目录、schema 归一化、调度器、子智能体

pub mod agent;
#[cfg(feature = "web")]
pub mod api;
pub mod checkpoint;
pub mod config;
pub mod core;
pub mod graph;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod stream;
pub mod tools;

pub use agent::AgentRuntime;
pub use core::{AgentError, RunOutcome, RunRequest, RunStatus};
pub use graph::{ExecutionEngine, GraphBuilder, GraphNode};
pub use stream::StreamEvent;
