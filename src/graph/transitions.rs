//! 显式转移表：Map<GraphNode, Fn(state, ctx) -> GraphNode>
//!
//! 路由函数可注入（默认 should_act），迭代上限在这里生效：Reasoning 次数达到上限且路由要求继续时，
//! 改为进入 FinalAnswer。

use std::collections::HashMap;
use std::sync::Arc;

use crate::core::ConversationState;
use crate::graph::{GraphError, GraphNode, Route};
use crate::memory::Message;
use crate::react::should_act;

/// 可注入的路由函数
pub type RouterFn = Arc<dyn Fn(Option<&Message>) -> Route + Send + Sync>;

/// 单条边
pub type TransitionFn = Arc<dyn Fn(&ConversationState, &TransitionContext) -> GraphNode + Send + Sync>;

/// 包装一条边
pub fn edge<F>(f: F) -> TransitionFn
where
    F: Fn(&ConversationState, &TransitionContext) -> GraphNode + Send + Sync + 'static,
{
    Arc::new(f)
}

/// 包装一个路由函数
pub fn router<F>(f: F) -> RouterFn
where
    F: Fn(Option<&Message>) -> Route + Send + Sync + 'static,
{
    Arc::new(f)
}

/// 计算转移时可见的执行信息
#[derive(Debug, Clone, Copy)]
pub struct TransitionContext {
    pub has_toolkits: bool,
    /// 已完成的 Reasoning 次数（含刚结束的这一次）
    pub iterations: u32,
    pub max_iterations: u32,
}

impl TransitionContext {
    pub fn cap_reached(&self) -> bool {
        self.iterations >= self.max_iterations
    }
}

#[derive(Clone)]
pub struct TransitionTable {
    edges: HashMap<GraphNode, TransitionFn>,
    router: RouterFn,
}

impl TransitionTable {
    /// Validation → Reasoning | FinalAnswer；Reasoning → ToolDispatch | FinalAnswer；
    /// ToolDispatch → Reasoning；FinalAnswer → Terminated
    pub fn standard(router: RouterFn) -> Self {
        let mut edges: HashMap<GraphNode, TransitionFn> = HashMap::new();
        edges.insert(
            GraphNode::Validation,
            edge(|_, ctx| {
                if ctx.has_toolkits {
                    GraphNode::Reasoning
                } else {
                    GraphNode::FinalAnswer
                }
            }),
        );
        let route = Arc::clone(&router);
        edges.insert(
            GraphNode::Reasoning,
            edge(move |state, ctx| match route(state.last_message()) {
                Route::Continue if ctx.cap_reached() => GraphNode::FinalAnswer,
                Route::Continue => GraphNode::ToolDispatch,
                Route::FinalAnswer => GraphNode::FinalAnswer,
            }),
        );
        edges.insert(GraphNode::ToolDispatch, edge(|_, _| GraphNode::Reasoning));
        edges.insert(GraphNode::FinalAnswer, edge(|_, _| GraphNode::Terminated));
        Self { edges, router }
    }

    /// 替换某个节点的出边
    pub fn set(&mut self, node: GraphNode, edge: TransitionFn) {
        self.edges.insert(node, edge);
    }

    pub fn remove(&mut self, node: GraphNode) {
        self.edges.remove(&node);
    }

    pub fn router(&self) -> &RouterFn {
        &self.router
    }

    pub fn next(
        &self,
        node: GraphNode,
        state: &ConversationState,
        ctx: &TransitionContext,
    ) -> Result<GraphNode, GraphError> {
        let edge = self
            .edges
            .get(&node)
            .ok_or(GraphError::MissingTransition(node))?;
        Ok(edge(state, ctx))
    }

    /// 所有非终止节点都必须有出边
    pub fn validate(&self) -> Result<(), GraphError> {
        for node in [
            GraphNode::Validation,
            GraphNode::Reasoning,
            GraphNode::ToolDispatch,
            GraphNode::FinalAnswer,
        ] {
            if !self.edges.contains_key(&node) {
                return Err(GraphError::MissingTransition(node));
            }
        }
        Ok(())
    }
}

impl Default for TransitionTable {
    fn default() -> Self {
        Self::standard(router(should_act))
    }
}
