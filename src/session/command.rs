//! Inbound wire protocol of a subscription session

use crate::cache::key::ResourceKey;
use crate::error::{Error, Result};
use crate::k8s::kinds::ResourceKind;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum CommandType {
    AddSource,
    RemoveSource,
    RemoveAllSources,
}

/// Raw frame as sent by clients
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandFrame {
    pub command: CommandType,
    #[serde(default)]
    pub object_type: Option<String>,
    #[serde(default)]
    pub context_name: Option<String>,
    #[serde(default)]
    pub namespace_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    AddSource(ResourceKey),
    RemoveSource(ResourceKey),
    RemoveAllSources,
}

impl Command {
    /// Parse one text frame.
    ///
    /// # Errors
    ///
    /// Returns `MalformedCommand` when the frame is not valid JSON, names an
    /// unknown command or object type, or lacks the key fields.
    pub fn parse(raw: &str) -> Result<Self> {
        let frame: CommandFrame = serde_json::from_str(raw)
            .map_err(|e| Error::MalformedCommand(e.to_string()))?;
        Self::try_from(frame)
    }
}

impl TryFrom<CommandFrame> for Command {
    type Error = Error;

    fn try_from(frame: CommandFrame) -> Result<Self> {
        match frame.command {
            CommandType::RemoveAllSources => Ok(Self::RemoveAllSources),
            CommandType::AddSource => key_of(&frame).map(Self::AddSource),
            CommandType::RemoveSource => key_of(&frame).map(Self::RemoveSource),
        }
    }
}

fn key_of(frame: &CommandFrame) -> Result<ResourceKey> {
    let kind: ResourceKind = frame
        .object_type
        .as_deref()
        .ok_or_else(|| Error::MalformedCommand("missing objectType".to_string()))?
        .parse()?;
    let context = frame
        .context_name
        .as_deref()
        .filter(|name| !name.is_empty())
        .ok_or_else(|| Error::MalformedCommand("missing contextName".to_string()))?;
    Ok(ResourceKey::new(context, kind, frame.namespace_name.as_deref()))
}
