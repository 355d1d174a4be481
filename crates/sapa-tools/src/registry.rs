//! Tool registry: registration, schema validation and execution.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use sapa_core::error::SapaError;
use sapa_core::types::{Link, ToolSchema};

use crate::error::ToolError;

/// Default per-call timeout for tool execution.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(5);

/// A named, schema-described capability the model may call.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema of the arguments object.
    fn parameters(&self) -> Value;

    /// Run the tool. Arguments have already been validated against
    /// [`parameters`](Tool::parameters).
    async fn invoke(&self, arguments: Value) -> Result<Vec<Link>, ToolError>;

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

struct RegisteredTool {
    tool: Arc<dyn Tool>,
    validator: jsonschema::Validator,
}

/// Fixed set of tools, immutable once the application has started.
pub struct ToolRegistry {
    tools: BTreeMap<String, RegisteredTool>,
    timeout: Duration,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
            timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Register a tool. Its argument schema is compiled here; an invalid
    /// schema is a configuration error.
    pub fn register<T: Tool + 'static>(&mut self, tool: T) -> Result<(), SapaError> {
        self.register_arc(Arc::new(tool))
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> Result<(), SapaError> {
        let validator = jsonschema::validator_for(&tool.parameters()).map_err(|e| {
            SapaError::Config(format!("invalid schema for tool {}: {}", tool.name(), e))
        })?;
        let name = tool.name().to_string();
        self.tools.insert(name, RegisteredTool { tool, validator });
        Ok(())
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Declarations for every registered tool, in name order.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools.values().map(|r| r.tool.schema()).collect()
    }

    /// Invoke `name` with raw JSON arguments as produced by the model.
    pub async fn invoke(&self, name: &str, raw_arguments: &str) -> Result<Vec<Link>, ToolError> {
        let arguments: Value = serde_json::from_str(raw_arguments)
            .map_err(|e| ToolError::invalid(name, format!("arguments are not valid JSON: {}", e)))?;
        self.invoke_value(name, arguments).await
    }

    /// Invoke `name` with already-parsed arguments.
    pub async fn invoke_value(&self, name: &str, arguments: Value) -> Result<Vec<Link>, ToolError> {
        let registered = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;

        let problems: Vec<String> = registered
            .validator
            .iter_errors(&arguments)
            .map(|e| e.to_string())
            .collect();
        if !problems.is_empty() {
            return Err(ToolError::invalid(name, problems.join("; ")));
        }

        debug!(tool = name, "Invoking tool");
        match tokio::time::timeout(self.timeout, registered.tool.invoke(arguments)).await {
            Ok(result) => result,
            Err(_) => Err(ToolError::Timeout {
                tool: name.to_string(),
                secs: self.timeout.as_secs(),
            }),
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
