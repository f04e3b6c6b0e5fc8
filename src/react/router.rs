//! 路由：根据最新一条消息决定下一步
//!
//! should_act 是纯函数且对所有输入有定义：含 context_ready 信号或无工具调用时进入最终回复，否则继续执行工具。

use crate::graph::Route;
use crate::memory::Message;

/// 保留的信号工具名：模型调用它表示上下文已足够，进入最终回复
pub const CONTEXT_READY_TOOL: &str = "context_ready";

pub fn should_act(last: Option<&Message>) -> Route {
    let calls = match last {
        Some(Message::Assistant { tool_calls, .. }) => tool_calls,
        _ => return Route::FinalAnswer,
    };
    if calls.iter().any(|c| c.name == CONTEXT_READY_TOOL) {
        return Route::FinalAnswer;
    }
    if calls.is_empty() {
        Route::FinalAnswer
    } else {
        Route::Continue
    }
}
