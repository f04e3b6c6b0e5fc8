//! 工具注册表
//!
//! 本地工具实现 Tool trait（name / description / parameters_schema / execute），按名注册。
//! list_tools 按调用方上下文组装一次执行可见的 ToolSet：每条 ToolRecord 带变体标签
//! （本地 / 委派子智能体 / 外部目录动作 / 信号），由 ToolDispatcher 按标签路由，不再做字符串比较。

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::tools::builtin::ContextReadyTool;
use crate::tools::catalog::ToolCatalog;
use crate::tools::schema::{normalize_schema_with, NormalizeOptions};
use crate::tools::Toolkit;

const MAX_TOOL_NAME_LEN: usize = 64;

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、异步执行（args 为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// 参数 JSON Schema；默认无参数
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String>;
}

/// 交给模型的工具描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// 工具种类（调度路由依据）
#[derive(Clone)]
pub enum ToolKind {
    /// 本地函数
    Inhouse(Arc<dyn Tool>),
    /// 委派给该 toolkit 的子智能体
    Delegated(Toolkit),
    /// 外部目录中该 toolkit 的动作
    Remote(Toolkit),
    /// 保留信号工具，不执行任何动作
    Signal,
}

impl ToolKind {
    pub fn label(&self) -> &'static str {
        match self {
            ToolKind::Inhouse(_) => "inhouse",
            ToolKind::Delegated(_) => "delegated",
            ToolKind::Remote(_) => "remote",
            ToolKind::Signal => "signal",
        }
    }
}

impl fmt::Debug for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolKind::Inhouse(t) => write!(f, "Inhouse({})", t.name()),
            ToolKind::Delegated(tk) => write!(f, "Delegated({tk})"),
            ToolKind::Remote(tk) => write!(f, "Remote({tk})"),
            ToolKind::Signal => f.write_str("Signal"),
        }
    }
}

/// 能力记录：schema + 调用方式
#[derive(Debug, Clone)]
pub struct ToolRecord {
    pub descriptor: ToolDescriptor,
    pub kind: ToolKind,
}

/// 一次执行可见的工具集合（按名字排序，保证每轮给模型的顺序稳定）
#[derive(Debug, Clone, Default)]
pub struct ToolSet {
    records: BTreeMap<String, ToolRecord>,
}

impl ToolSet {
    pub fn insert(&mut self, record: ToolRecord) {
        self.records.insert(record.descriptor.name.clone(), record);
    }

    pub fn get(&self, name: &str) -> Option<&ToolRecord> {
        self.records.get(name)
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.records.values().map(|r| r.descriptor.clone()).collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.records.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// 调用方上下文：编排者或某个 toolkit 的子智能体
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallerContext {
    Orchestrator,
    Subagent(Toolkit),
}

impl CallerContext {
    /// "orchestrator" 或 toolkit slug
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("orchestrator") {
            CallerContext::Orchestrator
        } else {
            CallerContext::Subagent(Toolkit::from_slug(s))
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            CallerContext::Orchestrator => "orchestrator",
            CallerContext::Subagent(tk) => tk.slug(),
        }
    }
}

/// 工具注册表：本地工具 + 外部目录
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    catalog: Option<Arc<dyn ToolCatalog>>,
    normalize: NormalizeOptions,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            catalog: None,
            normalize: NormalizeOptions::default(),
        }
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn ToolCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn with_normalize_options(mut self, opts: NormalizeOptions) -> Self {
        self.normalize = opts;
        self
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn catalog(&self) -> Option<Arc<dyn ToolCatalog>> {
        self.catalog.clone()
    }

    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// 组装调用方可见的工具集
    pub async fn list_tools(
        &self,
        user_id: &str,
        toolkits: &[Toolkit],
        caller: &CallerContext,
    ) -> ToolSet {
        let mut set = ToolSet::default();
        set.insert(signal_record());

        match caller {
            CallerContext::Orchestrator => {
                for tool in self.tools.values() {
                    if let Some(descriptor) = self.describe(
                        tool.name(),
                        tool.description(),
                        &tool.parameters_schema(),
                    ) {
                        set.insert(ToolRecord {
                            descriptor,
                            kind: ToolKind::Inhouse(Arc::clone(tool)),
                        });
                    }
                }
                for toolkit in toolkits {
                    let record = delegation_record(toolkit);
                    if !is_valid_tool_name(&record.descriptor.name) {
                        tracing::warn!(toolkit = %toolkit, tool = %record.descriptor.name, "excluding delegation tool with invalid name");
                        continue;
                    }
                    set.insert(record);
                }
            }
            CallerContext::Subagent(toolkit) => {
                let Some(catalog) = &self.catalog else {
                    tracing::warn!(toolkit = %toolkit, "no tool catalog configured, subagent has no actions");
                    return set;
                };
                match catalog.list_actions(user_id, toolkit).await {
                    Ok(actions) => {
                        for action in actions {
                            if action.name.is_empty() {
                                continue;
                            }
                            if let Some(descriptor) =
                                self.describe(&action.name, &action.description, &action.parameters)
                            {
                                set.insert(ToolRecord {
                                    descriptor,
                                    kind: ToolKind::Remote(toolkit.clone()),
                                });
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(toolkit = %toolkit, error = %e, "listing toolkit actions failed, skipping toolkit");
                    }
                }
            }
        }

        tracing::debug!(caller = caller.as_str(), tools = ?set.names(), "tool set assembled");
        set
    }

    /// 归一化 schema；失败时排除该工具
    fn describe(&self, name: &str, description: &str, schema: &Value) -> Option<ToolDescriptor> {
        if !is_valid_tool_name(name) {
            tracing::warn!(tool = name, "excluding tool with invalid name");
            return None;
        }
        match normalize_schema_with(schema, &self.normalize) {
            Ok(parameters) => Some(ToolDescriptor::new(name, description, parameters)),
            Err(e) => {
                tracing::warn!(tool = name, error = %e, "excluding tool with unusable schema");
                None
            }
        }
    }
}

/// 函数名须匹配 `^[a-zA-Z0-9_-]{1,64}$`，否则模型端会拒绝整个请求
pub fn is_valid_tool_name(name: &str) -> bool {
    (1..=MAX_TOOL_NAME_LEN).contains(&name.len())
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

fn signal_record() -> ToolRecord {
    let signal = ContextReadyTool;
    ToolRecord {
        descriptor: ToolDescriptor::new(
            signal.name(),
            signal.description(),
            signal.parameters_schema(),
        ),
        kind: ToolKind::Signal,
    }
}

fn delegation_record(toolkit: &Toolkit) -> ToolRecord {
    let display = toolkit.display_name();
    ToolRecord {
        descriptor: ToolDescriptor::new(
            toolkit.agent_tool_name(),
            format!(
                "Delegate a task to the {display} specialist. It can read and act on the user's {display} account. \
                 Describe the complete task in plain language, including every detail it needs."
            ),
            json!({
                "type": "object",
                "properties": {
                    "task": {
                        "type": "string",
                        "description": format!("The task for the {display} specialist")
                    }
                },
                "required": ["task"]
            }),
        ),
        kind: ToolKind::Delegated(toolkit.clone()),
    }
}
