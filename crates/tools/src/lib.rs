//! `ag-tools` — the built-in tool registry.
//!
//! Tools implement the small [`Tool`] trait; the [`Registry`] adapts them to
//! the registry contract the executor dispatches through. Unknown names are
//! `Error::NotFound`.

pub mod file_ops;
pub mod image;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use ag_domain::tool::{ToolDefinition, ToolOutcome, ToolRegistry};
use ag_domain::{Error, ExecContext, Result};

/// One dispatchable tool.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema for the tool's parameters.
    fn parameters_schema(&self) -> Value;

    /// JSON Schema for the structured result, when the tool declares one.
    fn output_schema(&self) -> Option<Value> {
        None
    }

    async fn execute(&self, ctx: &ExecContext, args: &Value) -> Result<ToolOutcome>;
}

/// In-memory tool registry.
#[derive(Default)]
pub struct Registry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-loaded with the built-in file and image tools.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register(Arc::new(file_ops::ReadFileTool));
        registry.register(Arc::new(image::ReadImageTool));
        registry
    }

    pub fn register(&self, tool: Arc<dyn Tool>) {
        self.tools.write().insert(tool.name().to_owned(), tool);
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.read().keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait::async_trait]
impl ToolRegistry for Registry {
    fn definition(&self, name: &str) -> Option<ToolDefinition> {
        let tools = self.tools.read();
        let tool = tools.get(name)?;
        Some(ToolDefinition {
            name: tool.name().to_owned(),
            description: tool.description().to_owned(),
            parameters: tool.parameters_schema(),
            output_schema: tool.output_schema(),
        })
    }

    async fn execute(&self, ctx: &ExecContext, name: &str, args: &Value) -> Result<ToolOutcome> {
        let tool = {
            let tools = self.tools.read();
            tools.get(name).cloned()
        };
        let tool = tool.ok_or_else(|| Error::not_found(format!("tool {name}")))?;
        tracing::debug!(tool = name, "dispatching tool");
        tool.execute(ctx, args).await
    }
}
