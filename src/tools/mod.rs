pub mod handlers;
pub mod validator;

use futures_util::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

use crate::gateway::{Dispatcher, GatewayError};

pub type ToolFuture<'a> = BoxFuture<'a, Result<Value, GatewayError>>;
pub type ToolHandler = for<'a> fn(&'a Dispatcher, &'a Value) -> ToolFuture<'a>;

#[derive(Clone, Copy)]
struct Tool {
    description: &'static str,
    handler: ToolHandler,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: &'static str,
    pub description: &'static str,
}

/// Name to handler table, filled once at startup.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<&'static str, Tool>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for &(name, description, handler) in handlers::DEFAULT_TOOLS {
            registry.register(name, description, handler);
        }
        registry
    }

    pub fn register(&mut self, name: &'static str, description: &'static str, handler: ToolHandler) {
        self.tools.insert(name, Tool { description, handler });
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.tools.keys().copied().collect()
    }

    pub fn describe(&self) -> Vec<ToolInfo> {
        self.tools
            .iter()
            .map(|(name, tool)| ToolInfo {
                name,
                description: tool.description,
            })
            .collect()
    }

    pub async fn invoke(
        &self,
        dispatcher: &Dispatcher,
        name: &str,
        params: &Value,
    ) -> Result<Value, GatewayError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| GatewayError::UnknownTool(name.to_string()))?;
        debug!(tool = name, "invoking tool");
        (tool.handler)(dispatcher, params).await
    }
}
