//! 外部工具目录：列出某个 toolkit 的动作、替用户执行动作
//!
//! ComposioCatalog 通过 HTTP 调用 Composio 后端；StaticCatalog 为内存实现（测试与离线运行）。
//! 目录返回的 schema 是原始方言，由 ToolRegistry 负责归一化。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::tools::{ToolDescriptor, Toolkit};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CatalogError {
    #[error("catalog is not configured")]
    NotConfigured,

    #[error("catalog request failed: {0}")]
    Http(String),

    #[error("catalog returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected catalog response: {0}")]
    Decode(String),

    #[error("action {action} failed: {message}")]
    Action { action: String, message: String },

    #[error("unknown action: {0}")]
    UnknownAction(String),
}

/// 外部工具目录
#[async_trait]
pub trait ToolCatalog: Send + Sync {
    /// 列出 toolkit 下对该用户可用的动作（原始 schema）
    async fn list_actions(
        &self,
        user_id: &str,
        toolkit: &Toolkit,
    ) -> Result<Vec<ToolDescriptor>, CatalogError>;

    /// 以用户身份执行一个动作，返回序列化后的结果
    async fn execute_action(
        &self,
        user_id: &str,
        action: &str,
        args: Value,
    ) -> Result<String, CatalogError>;
}

/// Composio HTTP 目录
pub struct ComposioCatalog {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Deserialize)]
struct ActionList {
    #[serde(default)]
    items: Vec<ActionItem>,
}

#[derive(Deserialize)]
struct ActionItem {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    parameters: Value,
}

#[derive(Deserialize)]
struct ExecuteResponse {
    #[serde(default)]
    data: Value,
    #[serde(default)]
    successful: Option<bool>,
    /// 旧版接口的拼写
    #[serde(default)]
    successfull: Option<bool>,
    #[serde(default)]
    error: Option<String>,
}

impl ExecuteResponse {
    fn succeeded(&self) -> Option<bool> {
        self.successful.or(self.successfull)
    }
}

impl ComposioCatalog {
    pub fn new(base_url: &str, api_key: Option<String>, timeout_secs: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
        }
    }

    fn api_key(&self) -> Result<&str, CatalogError> {
        self.api_key.as_deref().ok_or(CatalogError::NotConfigured)
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, CatalogError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(CatalogError::Status {
            status: status.as_u16(),
            body: body.chars().take(200).collect(),
        })
    }
}

#[async_trait]
impl ToolCatalog for ComposioCatalog {
    async fn list_actions(
        &self,
        user_id: &str,
        toolkit: &Toolkit,
    ) -> Result<Vec<ToolDescriptor>, CatalogError> {
        let url = format!("{}/api/v2/actions", self.base_url);
        let resp = self
            .client
            .get(&url)
            .header("x-api-key", self.api_key()?)
            .query(&[("apps", toolkit.slug())])
            .send()
            .await
            .map_err(|e| CatalogError::Http(e.to_string()))?;
        let list: ActionList = Self::check(resp)
            .await?
            .json()
            .await
            .map_err(|e| CatalogError::Decode(e.to_string()))?;
        tracing::debug!(user_id, toolkit = %toolkit, count = list.items.len(), "listed catalog actions");
        Ok(list
            .items
            .into_iter()
            .map(|a| ToolDescriptor {
                name: a.name,
                description: a.description,
                parameters: a.parameters,
            })
            .collect())
    }

    async fn execute_action(
        &self,
        user_id: &str,
        action: &str,
        args: Value,
    ) -> Result<String, CatalogError> {
        let url = format!("{}/api/v2/actions/{}/execute", self.base_url, action);
        let resp = self
            .client
            .post(&url)
            .header("x-api-key", self.api_key()?)
            .json(&json!({"entityId": user_id, "input": args}))
            .send()
            .await
            .map_err(|e| CatalogError::Http(e.to_string()))?;
        let out: ExecuteResponse = Self::check(resp)
            .await?
            .json()
            .await
            .map_err(|e| CatalogError::Decode(e.to_string()))?;
        if out.succeeded() == Some(false) {
            return Err(CatalogError::Action {
                action: action.to_string(),
                message: out.error.unwrap_or_else(|| "unknown error".to_string()),
            });
        }
        Ok(match out.data {
            Value::String(s) => s,
            other => other.to_string(),
        })
    }
}

/// 一个静态动作：描述 + 固定处理函数
pub type ActionHandler = Arc<dyn Fn(&str, Value) -> Result<String, String> + Send + Sync>;

/// 内存目录：按 toolkit 预置动作
#[derive(Default)]
pub struct StaticCatalog {
    actions: HashMap<Toolkit, Vec<(ToolDescriptor, ActionHandler)>>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册一个动作；handler 收到 (user_id, args)
    pub fn with_action<F>(mut self, toolkit: Toolkit, descriptor: ToolDescriptor, handler: F) -> Self
    where
        F: Fn(&str, Value) -> Result<String, String> + Send + Sync + 'static,
    {
        self.actions
            .entry(toolkit)
            .or_default()
            .push((descriptor, Arc::new(handler)));
        self
    }
}

#[async_trait]
impl ToolCatalog for StaticCatalog {
    async fn list_actions(
        &self,
        _user_id: &str,
        toolkit: &Toolkit,
    ) -> Result<Vec<ToolDescriptor>, CatalogError> {
        Ok(self
            .actions
            .get(toolkit)
            .map(|v| v.iter().map(|(d, _)| d.clone()).collect())
            .unwrap_or_default())
    }

    async fn execute_action(
        &self,
        user_id: &str,
        action: &str,
        args: Value,
    ) -> Result<String, CatalogError> {
        let handler = self
            .actions
            .values()
            .flatten()
            .find(|(d, _)| d.name == action)
            .map(|(_, h)| Arc::clone(h))
            .ok_or_else(|| CatalogError::UnknownAction(action.to_string()))?;
        handler(user_id, args).map_err(|message| CatalogError::Action {
            action: action.to_string(),
            message,
        })
    }
}
