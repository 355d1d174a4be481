//! Sapa tools crate - the tool registry and the link-lookup tool.

pub mod error;
pub mod links;
pub mod registry;

pub use error::ToolError;
pub use links::{normalize_topic, LinkLookupTool, TopicLinks, LINK_LOOKUP_TOOL};
pub use registry::{Tool, ToolRegistry};
