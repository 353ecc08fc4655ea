use serde_json::Value as JsonValue;
use std::fmt;
use tracing::info;

use crate::buildah::{Buildah, InspectType};
use crate::error::ToolError;

/// Reference to an image in buildah's local storage. Tags can be added; the id
/// never changes.
#[derive(Debug, Clone)]
pub struct ImageHandle {
    tool: Buildah,
    id: String,
}

impl ImageHandle {
    pub fn new(tool: Buildah, id: impl Into<String>) -> Self {
        Self {
            tool,
            id: id.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn add_tag(&self, name: &str) -> Result<(), ToolError> {
        self.tool.tag(&self.id, name)?;
        info!(image = %self.id, tag = %name, "image.tagged");
        Ok(())
    }

    pub fn names(&self) -> Result<Vec<String>, ToolError> {
        self.tool.image_names(&self.id)
    }

    pub fn inspect(&self) -> Result<JsonValue, ToolError> {
        self.tool.inspect(InspectType::Image, &self.id)
    }

    /// `buildah rmi`. The handle keeps its id but no longer refers to anything.
    pub fn remove(&self) -> Result<(), ToolError> {
        self.tool.rmi(&self.id)
    }
}

impl PartialEq for ImageHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ImageHandle {}

impl fmt::Display for ImageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}
