//! 核心层：错误与处置、会话状态、线程租约、工具并发调度

pub mod error;
pub mod recovery;
pub mod session_supervisor;
pub mod state;
pub mod task_scheduler;

pub use error::AgentError;
pub use recovery::{ErrorDisposition, RecoveryEngine};
pub use session_supervisor::{SessionSupervisor, ThreadLease};
pub use state::{ConversationState, RunOutcome, RunRequest, RunStatus};
pub use task_scheduler::TaskScheduler;
