//! Tool abstraction: typed schemas, call validation and execution.

pub mod registry;
pub mod schema;
pub mod tool;
pub mod validator;

pub use registry::ToolRegistry;
pub use schema::{ParamKind, ParamSpec, SchemaError, ToolDefinition};
pub use tool::{Tool, ToolExecutor, ToolOutput};
pub use validator::{ValidationResult, recovery_prompt, validate_tool_call};
