//! 执行图引擎
//!
//! 驱动 Validation → Reasoning ⇄ ToolDispatch → FinalAnswer → Terminated。
//! 每个节点在状态副本上工作；计算出下一节点后先写检查点，写入成功才提交副本，保证 (state, cursor) 一致。
//! 同一 thread 的并发执行由 SessionSupervisor 拒绝。流事件经 EventEmitter 发出：
//! 成功发 End，失败发一次 Error，取消时什么都不发（最终回复的部分文本丢弃，检查点停在 FinalAnswer）。

use std::sync::Arc;
use std::time::Instant;

use futures_util::StreamExt;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::core::{
    AgentError, ConversationState, RecoveryEngine, RunOutcome, RunRequest, RunStatus,
    SessionSupervisor,
};
use crate::graph::{GraphNode, Route, TransitionContext, TransitionTable};
use crate::llm::GenerationOptions;
use crate::memory::{pending_tool_calls, Message, ToolCallRequest};
use crate::react::{Planner, CONTEXT_READY_TOOL};
use crate::stream::EventEmitter;
use crate::tools::builtin::CONTEXT_READY_ACK;
use crate::tools::{dedup_toolkits, CallerContext, DispatchContext, ToolDispatcher, ToolRegistry, ToolSet, Toolkit};

/// 未执行即进入最终回复的调用
pub const SKIPPED_RESULT: &str = "Skipped: the final answer was requested before this call ran.";
/// 上一次执行中断时遗留的调用
pub const INTERRUPTED_RESULT: &str = "Interrupted: this call did not complete before the conversation continued.";

const ANONYMOUS_USER: &str = "anonymous";

pub struct ExecutionEngine {
    pub(crate) planner: Planner,
    pub(crate) registry: Arc<ToolRegistry>,
    pub(crate) dispatcher: ToolDispatcher,
    pub(crate) store: Arc<dyn CheckpointStore>,
    pub(crate) supervisor: Arc<SessionSupervisor>,
    pub(crate) transitions: TransitionTable,
    pub(crate) recovery: RecoveryEngine,
    pub(crate) options: GenerationOptions,
    pub(crate) max_iterations: u32,
}

/// 一次执行的可变游标（提交后的状态）
struct Run {
    state: ConversationState,
    cursor: GraphNode,
    iterations: u32,
    toolkits: Vec<Toolkit>,
    version: u64,
}

/// 一次执行的只读上下文
struct RunScope<'a> {
    user_id: &'a str,
    toolkits: &'a [Toolkit],
    options: GenerationOptions,
    cancel: CancellationToken,
    tools: OnceCell<ToolSet>,
}

/// 新会话 id：conv_<user>_<8 位十六进制>
pub fn new_conversation_id(user_id: &str) -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("conv_{}_{}", user_id, &hex[..8])
}

impl ExecutionEngine {
    pub fn caller(&self) -> &CallerContext {
        self.planner.caller()
    }

    pub fn supervisor(&self) -> &Arc<SessionSupervisor> {
        &self.supervisor
    }

    /// 执行一次请求，直到终止、失败或取消
    pub async fn execute(&self, request: RunRequest, emitter: &mut EventEmitter) -> RunOutcome {
        let started = Instant::now();
        let user_id = match request.user_id.trim() {
            "" => ANONYMOUS_USER.to_string(),
            u => u.to_string(),
        };
        let requested = request
            .conversation_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string);
        let thread_id = requested
            .clone()
            .unwrap_or_else(|| new_conversation_id(&user_id));
        let session_id = uuid::Uuid::new_v4().to_string();

        let lease = match self.supervisor.try_acquire(&thread_id, emitter.cancel_token()) {
            Ok(lease) => lease,
            Err(e) => {
                emitter.start(&thread_id, false, &session_id);
                return self.fail(&thread_id, e, emitter, Vec::new());
            }
        };
        let cancel = lease.cancel_token();

        let existing = match self.store.get(&thread_id).await {
            Ok(cp) => cp,
            Err(e) => {
                emitter.start(&thread_id, requested.is_none(), &session_id);
                return self.fail(&thread_id, e.into(), emitter, Vec::new());
            }
        };
        emitter.start(&thread_id, existing.is_none(), &session_id);

        let mut run = match self.prepare(&request, existing, &user_id) {
            Ok(run) => run,
            Err(e) => return self.fail(&thread_id, e, emitter, Vec::new()),
        };
        tracing::info!(
            thread_id = %thread_id,
            session_id = %session_id,
            caller = self.caller().as_str(),
            cursor = %run.cursor,
            toolkits = ?run.toolkits,
            "execution started"
        );

        let toolkits = run.toolkits.clone();
        let scope = RunScope {
            user_id: &user_id,
            toolkits: &toolkits,
            options: self
                .options
                .with_overrides(request.temperature, request.max_tokens),
            cancel: cancel.clone(),
            tools: OnceCell::new(),
        };

        let mut path = Vec::new();
        while !run.cursor.is_terminal() {
            if cancel.is_cancelled() {
                return self.cancelled(&thread_id, run.cursor, path);
            }
            let node = run.cursor;
            path.push(node);

            let mut working = run.state.clone();
            if let Err(e) = self.run_node(node, &mut working, &scope, emitter).await {
                if matches!(e, AgentError::Cancelled) || cancel.is_cancelled() {
                    return self.cancelled(&thread_id, node, path);
                }
                return self.fail(&thread_id, e, emitter, path);
            }
            if cancel.is_cancelled() {
                return self.cancelled(&thread_id, node, path);
            }

            let iterations = run.iterations + u32::from(node == GraphNode::Reasoning);
            let ctx = TransitionContext {
                has_toolkits: !run.toolkits.is_empty(),
                iterations,
                max_iterations: self.max_iterations,
            };
            let next = match self.transitions.next(node, &working, &ctx) {
                Ok(next) => next,
                Err(e) => return self.fail(&thread_id, AgentError::Graph(e.to_string()), emitter, path),
            };
            if node == GraphNode::Reasoning
                && next == GraphNode::FinalAnswer
                && (self.transitions.router())(working.last_message()) == Route::Continue
            {
                tracing::warn!(thread_id = %thread_id, iterations, "iteration cap reached, moving to final answer");
                emitter.progress("Reached the step limit, preparing the answer with what I have.");
            }

            let checkpoint = Checkpoint {
                thread_id: thread_id.clone(),
                state: working,
                cursor: next,
                iterations,
                toolkits: run.toolkits.clone(),
                version: run.version + 1,
                updated_at: chrono::Utc::now().timestamp_millis(),
            };
            if let Err(e) = self.store.put(&thread_id, &checkpoint).await {
                return self.fail(&thread_id, e.into(), emitter, path);
            }
            tracing::info!(thread_id = %thread_id, from = %node, to = %next, version = checkpoint.version, "transition");

            run.state = checkpoint.state;
            run.cursor = next;
            run.iterations = iterations;
            run.version = checkpoint.version;
        }

        let elapsed = started.elapsed().as_millis() as u64;
        emitter.end(&run.state.result, elapsed);
        tracing::info!(thread_id = %thread_id, elapsed_ms = elapsed, chars = run.state.result.chars().count(), "execution completed");
        drop(lease);
        RunOutcome {
            conversation_id: thread_id,
            status: RunStatus::Completed,
            result: run.state.result,
            path,
        }
    }

    /// 续跑或开始新的一轮
    fn prepare(
        &self,
        request: &RunRequest,
        existing: Option<Checkpoint>,
        user_id: &str,
    ) -> Result<Run, AgentError> {
        if let Some(cp) = &existing {
            if cp.state.user_id != user_id {
                return Err(AgentError::InvalidRequest(
                    "conversation belongs to another user".to_string(),
                ));
            }
        }
        match existing {
            Some(cp) if request.resume && !cp.is_terminated() => Ok(Run {
                state: cp.state,
                cursor: cp.cursor,
                iterations: cp.iterations,
                toolkits: cp.toolkits,
                version: cp.version,
            }),
            existing => {
                let message = request.message.trim();
                if message.is_empty() {
                    return Err(AgentError::InvalidRequest(
                        "message must not be empty".to_string(),
                    ));
                }
                let (mut state, version) = match existing {
                    Some(cp) => (cp.state, cp.version),
                    None => (ConversationState::new(user_id), 0),
                };
                seal_pending(&mut state, |_| INTERRUPTED_RESULT);
                state.result.clear();
                state.push(Message::user(message));
                Ok(Run {
                    state,
                    cursor: GraphNode::Validation,
                    iterations: 0,
                    toolkits: dedup_toolkits(&request.toolkits),
                    version,
                })
            }
        }
    }

    async fn run_node(
        &self,
        node: GraphNode,
        state: &mut ConversationState,
        scope: &RunScope<'_>,
        emitter: &mut EventEmitter,
    ) -> Result<(), AgentError> {
        match node {
            GraphNode::Validation => state
                .validate()
                .map_err(|e| AgentError::InvalidRequest(e.to_string())),
            GraphNode::Reasoning => self.reasoning(state, scope).await,
            GraphNode::ToolDispatch => self.tool_dispatch(state, scope, emitter).await,
            GraphNode::FinalAnswer => self.final_answer(state, scope, emitter).await,
            GraphNode::Terminated => Ok(()),
        }
    }

    async fn tool_set<'s>(&self, scope: &'s RunScope<'_>) -> &'s ToolSet {
        scope
            .tools
            .get_or_init(|| {
                self.registry
                    .list_tools(scope.user_id, scope.toolkits, self.caller())
            })
            .await
    }

    async fn reasoning(&self, state: &mut ConversationState, scope: &RunScope<'_>) -> Result<(), AgentError> {
        let tools = self.tool_set(scope).await.descriptors();
        let reply = tokio::select! {
            biased;
            _ = scope.cancel.cancelled() => return Err(AgentError::Cancelled),
            r = self.planner.reason(&state.messages, &tools, scope.toolkits, &scope.options) => r?,
        };
        let mut message = reply.into_message();
        if let Message::Assistant { tool_calls, .. } = &mut message {
            assign_call_ids(tool_calls);
            tracing::debug!(calls = ?tool_calls.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(), "model decision");
        }
        state.push(message);
        Ok(())
    }

    async fn tool_dispatch(
        &self,
        state: &mut ConversationState,
        scope: &RunScope<'_>,
        emitter: &mut EventEmitter,
    ) -> Result<(), AgentError> {
        let calls: Vec<ToolCallRequest> = state
            .last_message()
            .map(|m| m.tool_calls().to_vec())
            .unwrap_or_default();
        if calls.is_empty() {
            return Ok(());
        }
        let tools = self.tool_set(scope).await;
        for call in &calls {
            emitter.progress(progress_text(call, tools));
        }
        let ctx = DispatchContext {
            user_id: scope.user_id,
            tools,
            options: &scope.options,
            cancel: &scope.cancel,
        };
        let results = self.dispatcher.dispatch(&calls, &ctx).await;
        if scope.cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }
        state.messages.extend(results);
        Ok(())
    }

    async fn final_answer(
        &self,
        state: &mut ConversationState,
        scope: &RunScope<'_>,
        emitter: &mut EventEmitter,
    ) -> Result<(), AgentError> {
        seal_pending(state, |call| {
            if call.name == CONTEXT_READY_TOOL {
                CONTEXT_READY_ACK
            } else {
                SKIPPED_RESULT
            }
        });

        let mut stream = tokio::select! {
            biased;
            _ = scope.cancel.cancelled() => return Err(AgentError::Cancelled),
            s = self.planner.synthesize(&state.messages, &scope.options) => s?,
        };
        let mut text = String::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = scope.cancel.cancelled() => return Err(AgentError::Cancelled),
                n = stream.next() => n,
            };
            match next {
                Some(Ok(fragment)) => {
                    if fragment.is_empty() {
                        continue;
                    }
                    text.push_str(&fragment);
                    emitter.token(fragment);
                }
                Some(Err(e)) => return Err(e.into()),
                None => break,
            }
        }
        state.result = text.clone();
        state.push(Message::assistant(text));
        Ok(())
    }

    fn fail(
        &self,
        thread_id: &str,
        err: AgentError,
        emitter: &mut EventEmitter,
        path: Vec<GraphNode>,
    ) -> RunOutcome {
        if matches!(err, AgentError::Cancelled) {
            return self.cancelled(thread_id, path.last().copied().unwrap_or(GraphNode::Validation), path);
        }
        let disposition = self.recovery.handle(&err);
        tracing::warn!(
            thread_id,
            code = disposition.code,
            retryable = disposition.retryable,
            error = %err,
            "execution failed"
        );
        emitter.error(&disposition);
        RunOutcome {
            conversation_id: thread_id.to_string(),
            status: RunStatus::Failed {
                code: disposition.code,
                message: disposition.message,
            },
            result: String::new(),
            path,
        }
    }

    fn cancelled(&self, thread_id: &str, at: GraphNode, path: Vec<GraphNode>) -> RunOutcome {
        tracing::info!(thread_id, at = %at, "execution cancelled");
        RunOutcome {
            conversation_id: thread_id.to_string(),
            status: RunStatus::Cancelled,
            result: String::new(),
            path,
        }
    }
}

/// 为最后一条 Assistant 消息中尚无结果的调用补上结果
fn seal_pending<F>(state: &mut ConversationState, content: F)
where
    F: Fn(&ToolCallRequest) -> &'static str,
{
    for call in pending_tool_calls(&state.messages) {
        let text = content(&call);
        state.push(Message::tool_result(call.id, call.name, text));
    }
}

/// 补齐空 id、消除同一轮内重复 id
fn assign_call_ids(calls: &mut [ToolCallRequest]) {
    let mut seen = std::collections::HashSet::new();
    for call in calls.iter_mut() {
        if call.id.trim().is_empty() || !seen.insert(call.id.clone()) {
            let hex = uuid::Uuid::new_v4().simple().to_string();
            call.id = format!("call_{}", &hex[..12]);
            seen.insert(call.id.clone());
        }
    }
}

fn progress_text(call: &ToolCallRequest, tools: &ToolSet) -> String {
    match tools.get(&call.name).map(|r| &r.kind) {
        Some(crate::tools::ToolKind::Delegated(toolkit)) => {
            format!("Asking the {} specialist", toolkit.display_name())
        }
        _ => format!("Running {}", call.name),
    }
}
