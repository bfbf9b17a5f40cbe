//! Immutable records shared across discovery, the manager, and the renderer
//! (SPEC_FULL §3).

use chrono::{DateTime, FixedOffset};

/// Which slot in a pod spec a container comes from. Affects whether
/// `--exclude-init` / `--exclude-ephemeral` drop it during discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ContainerKind {
    Init,
    Main,
    Ephemeral,
}

impl ContainerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ContainerKind::Init => "init",
            ContainerKind::Main => "main",
            ContainerKind::Ephemeral => "ephemeral",
        }
    }
}

/// `{namespace, pod_name, container_name, kind}`, uniquely keying a log
/// stream within a run. Also carries the owning pod's UID so the rotation
/// watcher can tell a recreated pod with a reused name from the one it
/// already has a producer for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerIdentity {
    pub namespace: String,
    pub pod_name: String,
    pub pod_uid: String,
    pub container_name: String,
    pub kind: ContainerKind,
}

impl ContainerIdentity {
    pub fn pod_key(&self) -> (String, String) {
        (self.namespace.clone(), self.pod_name.clone())
    }
}

/// Immutable snapshot of a pod taken at discovery time. Rotation produces a
/// new `PodRecord` (with a new set of `ContainerIdentity`s) rather than
/// mutating an existing one.
#[derive(Debug, Clone)]
pub struct PodRecord {
    pub namespace: String,
    pub name: String,
    pub uid: String,
    pub labels: std::collections::BTreeMap<String, String>,
    pub phase: String,
    pub containers: Vec<ContainerIdentity>,
}

/// The input to one producer: an immutable parameter bundle identifying one
/// log stream.
#[derive(Debug, Clone)]
pub struct StreamContext {
    pub container: ContainerIdentity,
    pub since_seconds: Option<i64>,
    pub tail_lines: i64,
    pub follow: bool,
    pub timestamps: bool,
}

/// One line read from a container's log stream. Parsing (JSON detection) is
/// attempted by the renderer at render time, not stored here — this keeps
/// the entry a cheap, immutable value that flows through the queue.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub container: ContainerIdentity,
    pub raw_text: String,
    pub timestamp: Option<DateTime<FixedOffset>>,
}

/// Resolved, validated configuration for the duration of one run. Built once
/// by the CLI layer (SPEC_FULL §4.8) and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub namespaces: Vec<String>,
    pub label_selector: Option<String>,
    pub include: Vec<regex::Regex>,
    pub exclude: Vec<regex::Regex>,
    pub exclude_init: bool,
    pub exclude_ephemeral: bool,
    pub since_seconds: i64,
    pub tail_lines: i64,
    pub follow: bool,
    pub max_containers: usize,
    pub color_logs: bool,
    pub timestamps: bool,
    pub verbosity: u8,
    pub kubeconfig: Option<std::path::PathBuf>,
}
