use super::key::ResourceKey;
use crate::k8s::kinds::ResourceKind;
use kube::api::DynamicObject;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventType {
    Created,
    Updated,
    Deleted,
}

/// One change observed by a watcher, as pushed to subscribers
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub event_type: EventType,
    pub object_type: ResourceKind,
    pub context_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace_name: Option<String>,
    /// Current representation, or the last known one for `Deleted`
    pub object: DynamicObject,
}

impl ChangeEvent {
    #[must_use]
    pub fn new(event_type: EventType, key: &ResourceKey, object: DynamicObject) -> Self {
        Self {
            event_type,
            object_type: key.kind(),
            context_name: key.context().to_string(),
            namespace_name: key.namespace().map(ToString::to_string),
            object,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLevel {
    Warning,
    Error,
}

/// Out-of-band message about a subscription, never about an object
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    #[serde(rename = "diagnostic")]
    pub level: DiagnosticLevel,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl Diagnostic {
    #[must_use]
    pub fn warning(message: impl Into<String>, source: Option<&ResourceKey>) -> Self {
        Self {
            level: DiagnosticLevel::Warning,
            message: message.into(),
            source: source.map(ToString::to_string),
        }
    }

    #[must_use]
    pub fn error(message: impl Into<String>, source: Option<&ResourceKey>) -> Self {
        Self {
            level: DiagnosticLevel::Error,
            message: message.into(),
            source: source.map(ToString::to_string),
        }
    }
}

/// Everything a session can send to its client
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Outbound {
    Event(ChangeEvent),
    Diagnostic(Diagnostic),
}

impl From<ChangeEvent> for Outbound {
    fn from(event: ChangeEvent) -> Self {
        Self::Event(event)
    }
}

impl From<Diagnostic> for Outbound {
    fn from(diagnostic: Diagnostic) -> Self {
        Self::Diagnostic(diagnostic)
    }
}
