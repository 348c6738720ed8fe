//! Closed set of resource kinds served by the proxy
//!
//! Every kind maps to one row of a static table: the `ApiResource` used to
//! build dynamic `Api` handles, the family that decides which client and
//! scope apply, and whether the API server supports watching it.

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{
    ConfigMap, Namespace, Node, PersistentVolume, PersistentVolumeClaim, Pod,
    ReplicationController, Secret, Service, ServiceAccount,
};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use k8s_openapi::api::storage::v1::StorageClass;
use kube::api::ApiResource;
use kube::core::GroupVersionKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Where a kind lives and which client serves it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KindFamily {
    /// Cluster-scoped objects served by the standard client
    Cluster,
    /// Namespaced objects served by the standard client
    Namespace,
    /// Cluster-scoped objects served by the metrics client
    ClusterMetrics,
    /// Namespaced objects served by the metrics client
    NamespaceMetrics,
}

impl KindFamily {
    #[must_use]
    pub const fn is_namespaced(self) -> bool {
        matches!(self, Self::Namespace | Self::NamespaceMetrics)
    }

    #[must_use]
    pub const fn is_metrics(self) -> bool {
        matches!(self, Self::ClusterMetrics | Self::NamespaceMetrics)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Namespace,
    Node,
    PersistentVolume,
    ClusterRole,
    ClusterRoleBinding,
    StorageClass,
    Service,
    Pod,
    PersistentVolumeClaim,
    ConfigMap,
    ReplicationController,
    Secret,
    ServiceAccount,
    Deployment,
    StatefulSet,
    DaemonSet,
    ReplicaSet,
    NetworkPolicy,
    Role,
    RoleBinding,
    Job,
    CronJob,
    NodeMetrics,
    PodMetrics,
}

impl ResourceKind {
    pub const ALL: [Self; 24] = [
        Self::Namespace,
        Self::Node,
        Self::PersistentVolume,
        Self::ClusterRole,
        Self::ClusterRoleBinding,
        Self::StorageClass,
        Self::Service,
        Self::Pod,
        Self::PersistentVolumeClaim,
        Self::ConfigMap,
        Self::ReplicationController,
        Self::Secret,
        Self::ServiceAccount,
        Self::Deployment,
        Self::StatefulSet,
        Self::DaemonSet,
        Self::ReplicaSet,
        Self::NetworkPolicy,
        Self::Role,
        Self::RoleBinding,
        Self::Job,
        Self::CronJob,
        Self::NodeMetrics,
        Self::PodMetrics,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Namespace => "Namespace",
            Self::Node => "Node",
            Self::PersistentVolume => "PersistentVolume",
            Self::ClusterRole => "ClusterRole",
            Self::ClusterRoleBinding => "ClusterRoleBinding",
            Self::StorageClass => "StorageClass",
            Self::Service => "Service",
            Self::Pod => "Pod",
            Self::PersistentVolumeClaim => "PersistentVolumeClaim",
            Self::ConfigMap => "ConfigMap",
            Self::ReplicationController => "ReplicationController",
            Self::Secret => "Secret",
            Self::ServiceAccount => "ServiceAccount",
            Self::Deployment => "Deployment",
            Self::StatefulSet => "StatefulSet",
            Self::DaemonSet => "DaemonSet",
            Self::ReplicaSet => "ReplicaSet",
            Self::NetworkPolicy => "NetworkPolicy",
            Self::Role => "Role",
            Self::RoleBinding => "RoleBinding",
            Self::Job => "Job",
            Self::CronJob => "CronJob",
            Self::NodeMetrics => "NodeMetrics",
            Self::PodMetrics => "PodMetrics",
        }
    }

    #[must_use]
    pub const fn family(self) -> KindFamily {
        match self {
            Self::Namespace
            | Self::Node
            | Self::PersistentVolume
            | Self::ClusterRole
            | Self::ClusterRoleBinding
            | Self::StorageClass => KindFamily::Cluster,
            Self::NodeMetrics => KindFamily::ClusterMetrics,
            Self::PodMetrics => KindFamily::NamespaceMetrics,
            _ => KindFamily::Namespace,
        }
    }

    /// metrics.k8s.io only supports list/get, so those kinds are polled
    #[must_use]
    pub const fn supports_watch(self) -> bool {
        !self.family().is_metrics()
    }

    /// The dynamic API description used to talk to the cluster for this kind
    #[must_use]
    pub fn api_resource(self) -> ApiResource {
        match self {
            Self::Namespace => ApiResource::erase::<Namespace>(&()),
            Self::Node => ApiResource::erase::<Node>(&()),
            Self::PersistentVolume => ApiResource::erase::<PersistentVolume>(&()),
            Self::ClusterRole => ApiResource::erase::<ClusterRole>(&()),
            Self::ClusterRoleBinding => ApiResource::erase::<ClusterRoleBinding>(&()),
            Self::StorageClass => ApiResource::erase::<StorageClass>(&()),
            Self::Service => ApiResource::erase::<Service>(&()),
            Self::Pod => ApiResource::erase::<Pod>(&()),
            Self::PersistentVolumeClaim => ApiResource::erase::<PersistentVolumeClaim>(&()),
            Self::ConfigMap => ApiResource::erase::<ConfigMap>(&()),
            Self::ReplicationController => ApiResource::erase::<ReplicationController>(&()),
            Self::Secret => ApiResource::erase::<Secret>(&()),
            Self::ServiceAccount => ApiResource::erase::<ServiceAccount>(&()),
            Self::Deployment => ApiResource::erase::<Deployment>(&()),
            Self::StatefulSet => ApiResource::erase::<StatefulSet>(&()),
            Self::DaemonSet => ApiResource::erase::<DaemonSet>(&()),
            Self::ReplicaSet => ApiResource::erase::<ReplicaSet>(&()),
            Self::NetworkPolicy => ApiResource::erase::<NetworkPolicy>(&()),
            Self::Role => ApiResource::erase::<Role>(&()),
            Self::RoleBinding => ApiResource::erase::<RoleBinding>(&()),
            Self::Job => ApiResource::erase::<Job>(&()),
            Self::CronJob => ApiResource::erase::<CronJob>(&()),
            Self::NodeMetrics => metrics_resource("NodeMetrics", "nodes"),
            Self::PodMetrics => metrics_resource("PodMetrics", "pods"),
        }
    }
}

fn metrics_resource(kind: &str, plural: &str) -> ApiResource {
    let gvk = GroupVersionKind::gvk("metrics.k8s.io", "v1beta1", kind);
    ApiResource::from_gvk_with_plural(&gvk, plural)
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| crate::error::Error::MalformedCommand(format!("unknown object type {s:?}")))
    }
}
