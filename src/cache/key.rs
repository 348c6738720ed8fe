use crate::k8s::kinds::ResourceKind;
use kube::api::DynamicObject;
use std::fmt;

/// Whether a kind is queried across the cluster or inside one namespace
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    Cluster,
    Namespace(String),
}

impl Scope {
    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        match self {
            Self::Cluster => None,
            Self::Namespace(ns) => Some(ns),
        }
    }
}

/// Identifies one watcher: (context, scope, kind)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceKey {
    context: String,
    scope: Scope,
    kind: ResourceKind,
}

impl ResourceKey {
    /// Build a key, normalising the scope.
    ///
    /// An empty or missing namespace means cluster-wide. Cluster-family kinds
    /// always get `Scope::Cluster` so that both spellings share a watcher.
    #[must_use]
    pub fn new(context: impl Into<String>, kind: ResourceKind, namespace: Option<&str>) -> Self {
        let scope = match namespace {
            Some(ns) if !ns.is_empty() && kind.family().is_namespaced() => {
                Scope::Namespace(ns.to_string())
            }
            _ => Scope::Cluster,
        };
        Self {
            context: context.into(),
            scope,
            kind,
        }
    }

    #[must_use]
    pub fn context(&self) -> &str {
        &self.context
    }

    #[must_use]
    pub const fn scope(&self) -> &Scope {
        &self.scope
    }

    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        self.kind
    }

    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.scope.namespace()
    }

    /// A namespaced kind watched across every namespace. Names alone do not
    /// identify objects under such a key.
    #[must_use]
    pub fn spans_namespaces(&self) -> bool {
        self.scope == Scope::Cluster && self.kind.family().is_namespaced()
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            Scope::Cluster => write!(f, "{}:{}:*", self.context, self.kind),
            Scope::Namespace(ns) => write!(f, "{}:{}:{ns}", self.context, self.kind),
        }
    }
}

/// Identity of one object inside a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectId {
    Named {
        namespace: Option<String>,
        name: String,
    },
    Uid(String),
}

impl ObjectId {
    /// Namespace and name when present, otherwise the UID.
    #[must_use]
    pub fn of(object: &DynamicObject) -> Option<Self> {
        let meta = &object.metadata;
        meta.name.as_ref().map_or_else(
            || meta.uid.clone().map(Self::Uid),
            |name| {
                Some(Self::Named {
                    namespace: meta.namespace.clone(),
                    name: name.clone(),
                })
            },
        )
    }
}
