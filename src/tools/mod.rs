//! 工具层：注册表、外部目录、schema 归一化、调度器、子智能体工厂、本地工具

pub mod builtin;
pub mod catalog;
pub mod delegate;
pub mod executor;
pub mod registry;
pub mod schema;
pub mod toolkit;

pub use builtin::{AddTool, ContextReadyTool, CONTEXT_READY_ACK};
pub use catalog::{CatalogError, ComposioCatalog, StaticCatalog, ToolCatalog};
pub use delegate::{SubagentFactory, SubagentSettings};
pub use executor::{Delegator, DispatchContext, ToolDispatcher};
pub use registry::{
    is_valid_tool_name, CallerContext, Tool, ToolDescriptor, ToolKind, ToolRecord, ToolRegistry, ToolSet,
};
pub use schema::{normalize_schema, normalize_schema_with, NormalizeOptions, SchemaError};
pub use toolkit::{dedup_toolkits, Toolkit};
