//! 执行图：节点类型、显式转移表、构建器与引擎

pub mod builder;
pub mod engine;
pub mod transitions;
pub mod types;

pub use builder::GraphBuilder;
pub use engine::{new_conversation_id, ExecutionEngine, INTERRUPTED_RESULT, SKIPPED_RESULT};
pub use transitions::{edge, router, RouterFn, TransitionContext, TransitionFn, TransitionTable};
pub use types::{GraphError, GraphNode, Route};
