//! 认知层：路由决策与 Planner（提示词 + 模型调用）

pub mod planner;
pub mod router;

pub use planner::Planner;
pub use router::{should_act, CONTEXT_READY_TOOL};
