//! Planner：拼装系统提示词并调用 LLM
//!
//! Reasoning 节点用 reason（带工具 schema，tool_choice = required）；Final-Answer 节点用 synthesize（流式、无工具）。
//! 提示词由调用方上下文（编排者 / 子智能体）、启用的 toolkit 与当天日期生成。

use std::sync::Arc;

use chrono::Local;

use crate::llm::{AssistantReply, GenerationOptions, LlmClient, LlmError, TokenStream, ToolChoice};
use crate::memory::Message;
use crate::react::CONTEXT_READY_TOOL;
use crate::tools::{CallerContext, ToolDescriptor, Toolkit};

pub struct Planner {
    llm: Arc<dyn LlmClient>,
    caller: CallerContext,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>, caller: CallerContext) -> Self {
        Self { llm, caller }
    }

    pub fn caller(&self) -> &CallerContext {
        &self.caller
    }

    /// Reasoning 阶段的系统提示词
    pub fn system_prompt(&self, toolkits: &[Toolkit]) -> String {
        let today = today();
        match &self.caller {
            CallerContext::Orchestrator => {
                let available = if toolkits.is_empty() {
                    "none".to_string()
                } else {
                    toolkits
                        .iter()
                        .map(|t| format!("{} (`{}`)", t.display_name(), t.agent_tool_name()))
                        .collect::<Vec<_>>()
                        .join(", ")
                };
                format!(
                    "You are Kronos, a helpful assistant that gets things done across the user's connected apps.\n\
                     Today is {today}.\n\
                     Connected apps: {available}.\n\n\
                     Every turn you must call at least one tool.\n\
                     - To act on an app, call its specialist tool with a complete, self-contained task.\n\
                     - Calls you emit together run in parallel, so only batch calls that do not depend on each other.\n\
                     - When you have everything needed to answer, or no tool is needed, call `{CONTEXT_READY_TOOL}`."
                )
            }
            CallerContext::Subagent(toolkit) => {
                let name = toolkit.display_name();
                format!(
                    "You are the {name} specialist working for an orchestrating assistant.\n\
                     Today is {today}.\n\n\
                     Complete the task you are given using the {name} actions available to you.\n\
                     Every turn you must call at least one tool. Call `{CONTEXT_READY_TOOL}` once the task is done \
                     or cannot be completed."
                )
            }
        }
    }

    /// Final-Answer 阶段的系统提示词
    pub fn synthesis_prompt(&self) -> String {
        let today = today();
        match &self.caller {
            CallerContext::Orchestrator => format!(
                "You are Kronos, a helpful assistant. Today is {today}.\n\
                 Write the final reply to the user based on the conversation and the tool results above. \
                 Be concise and accurate, and do not mention internal tools."
            ),
            CallerContext::Subagent(toolkit) => format!(
                "You are the {} specialist. Today is {today}.\n\
                 Report the outcome of your task to the orchestrating assistant: what you did, the relevant data \
                 you found, and anything that failed.",
                toolkit.display_name()
            ),
        }
    }

    /// 一次结构化决策：模型必须给出至少一个工具调用（含信号工具）
    pub async fn reason(
        &self,
        history: &[Message],
        tools: &[ToolDescriptor],
        toolkits: &[Toolkit],
        options: &GenerationOptions,
    ) -> Result<AssistantReply, LlmError> {
        let messages = with_system(self.system_prompt(toolkits), history);
        let choice = if tools.is_empty() {
            ToolChoice::Auto
        } else {
            ToolChoice::Required
        };
        self.llm.invoke(&messages, tools, choice, options).await
    }

    /// 流式合成最终回复
    pub async fn synthesize(
        &self,
        history: &[Message],
        options: &GenerationOptions,
    ) -> Result<TokenStream, LlmError> {
        let messages = with_system(self.synthesis_prompt(), history);
        self.llm.stream(&messages, options).await
    }
}

fn today() -> String {
    Local::now().format("%A, %B %-d, %Y").to_string()
}

fn with_system(system: String, history: &[Message]) -> Vec<Message> {
    let mut messages = Vec::with_capacity(history.len() + 1);
    messages.push(Message::system(system));
    messages.extend(
        history
            .iter()
            .filter(|m| !matches!(m, Message::System { .. }))
            .cloned(),
    );
    messages
}
