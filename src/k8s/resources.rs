//! Resource kinds mirrored by the engine and the api triples they map to
//!
//! Every kind resolves to one `ApiTarget` (group, version, kind, plural).
//! `CronJob` carries a modern and a legacy candidate; which one a server
//! actually serves is decided at runtime by the capability probe.

use kube::discovery::ApiResource;
use std::fmt;
use std::str::FromStr;

/// Transport/type triple for one resource collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ApiTarget {
    /// API group, empty for the core group
    pub group: &'static str,
    pub version: &'static str,
    pub kind: &'static str,
    /// Plural resource name as reported by discovery
    pub plural: &'static str,
}

impl ApiTarget {
    const fn core(kind: &'static str, plural: &'static str) -> Self {
        Self {
            group: "",
            version: "v1",
            kind,
            plural,
        }
    }

    const fn grouped(
        group: &'static str,
        version: &'static str,
        kind: &'static str,
        plural: &'static str,
    ) -> Self {
        Self {
            group,
            version,
            kind,
            plural,
        }
    }

    /// `v1` for the core group, `group/version` otherwise
    #[must_use]
    pub fn group_version(&self) -> String {
        if self.group.is_empty() {
            self.version.to_string()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    #[must_use]
    pub fn api_resource(&self) -> ApiResource {
        ApiResource {
            group: self.group.to_string(),
            version: self.version.to_string(),
            api_version: self.group_version(),
            kind: self.kind.to_string(),
            plural: self.plural.to_string(),
        }
    }
}

impl fmt::Display for ApiTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group_version(), self.plural)
    }
}

const PODS: [ApiTarget; 1] = [ApiTarget::core("Pod", "pods")];
const SERVICES: [ApiTarget; 1] = [ApiTarget::core("Service", "services")];
const NODES: [ApiTarget; 1] = [ApiTarget::core("Node", "nodes")];
const NAMESPACES: [ApiTarget; 1] = [ApiTarget::core("Namespace", "namespaces")];
const DEPLOYMENTS: [ApiTarget; 1] = [ApiTarget::grouped("apps", "v1", "Deployment", "deployments")];
const DAEMON_SETS: [ApiTarget; 1] = [ApiTarget::grouped("apps", "v1", "DaemonSet", "daemonsets")];
const STATEFUL_SETS: [ApiTarget; 1] =
    [ApiTarget::grouped("apps", "v1", "StatefulSet", "statefulsets")];
const JOBS: [ApiTarget; 1] = [ApiTarget::grouped("batch", "v1", "Job", "jobs")];
// modern first; legacy only when the modern one is reported unsupported
const CRON_JOBS: [ApiTarget; 2] = [
    ApiTarget::grouped("batch", "v1", "CronJob", "cronjobs"),
    ApiTarget::grouped("batch", "v1beta1", "CronJob", "cronjobs"),
];

/// Every resource collection the engine mirrors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Pod,
    Service,
    Node,
    Namespace,
    Deployment,
    DaemonSet,
    Job,
    StatefulSet,
    CronJob,
}

impl ResourceKind {
    pub const ALL: [Self; 9] = [
        Self::Pod,
        Self::Service,
        Self::Node,
        Self::Namespace,
        Self::Deployment,
        Self::DaemonSet,
        Self::Job,
        Self::StatefulSet,
        Self::CronJob,
    ];

    /// Candidate triples in preference order
    #[must_use]
    pub const fn candidates(self) -> &'static [ApiTarget] {
        match self {
            Self::Pod => &PODS,
            Self::Service => &SERVICES,
            Self::Node => &NODES,
            Self::Namespace => &NAMESPACES,
            Self::Deployment => &DEPLOYMENTS,
            Self::DaemonSet => &DAEMON_SETS,
            Self::Job => &JOBS,
            Self::StatefulSet => &STATEFUL_SETS,
            Self::CronJob => &CRON_JOBS,
        }
    }

    /// Plural name used in logs and discovery
    #[must_use]
    pub const fn plural(self) -> &'static str {
        self.candidates()[0].plural
    }

    #[must_use]
    pub const fn is_namespaced(self) -> bool {
        !matches!(self, Self::Node | Self::Namespace)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.plural())
    }
}

impl FromStr for ResourceKind {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| {
                let target = kind.candidates()[0];
                target.plural == wanted || target.kind.to_ascii_lowercase() == wanted
            })
            .ok_or_else(|| crate::error::Error::Custom(format!("Invalid resource: {s}")))
    }
}
