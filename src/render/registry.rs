//! Manager-owned, renderer-read bookkeeping for the prefix grammar's
//! alignment width and per-pod container counts (SPEC_FULL §3, §4.6).

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use crate::model::{PodRecord, RunConfig};

/// `YYYY-MM-DDTHH:MM:SS.ffffffZ ` — the fixed-width timestamp prefix the
/// renderer prepends when `--timestamps` is set (SPEC_FULL §4.6 "Timestamp
/// prefixing").
pub const TIMESTAMP_PREFIX_WIDTH: usize = 28;

/// Builds the plain-text (uncolored) prefix for one container, used both to
/// measure alignment width and to render the real line.
pub fn prefix_text(show_namespace: bool, namespace: &str, pod_name: &str, show_container: bool, container_name: &str) -> String {
    let mut prefix = String::new();
    if show_namespace {
        prefix.push('[');
        prefix.push_str(namespace);
        prefix.push_str("] ");
    }
    prefix.push_str(pod_name);
    if show_container {
        prefix.push_str(" (");
        prefix.push_str(container_name);
        prefix.push(')');
    }
    prefix
}

/// Owned by the log manager; the snapshot renderer only reads from it. Grows
/// monotonically as rotation admits pods with longer prefixes, per the
/// alignment-width invariant in SPEC_FULL §3.
pub struct AlignmentRegistry {
    show_namespace: bool,
    timestamp_width: usize,
    width: AtomicUsize,
    container_counts: RwLock<HashMap<(String, String), usize>>,
}

impl AlignmentRegistry {
    pub fn new(cfg: &RunConfig, namespace_count: usize) -> AlignmentRegistry {
        AlignmentRegistry {
            show_namespace: namespace_count != 1,
            timestamp_width: if cfg.timestamps { TIMESTAMP_PREFIX_WIDTH } else { 0 },
            width: AtomicUsize::new(0),
            container_counts: RwLock::new(HashMap::new()),
        }
    }

    pub fn show_namespace(&self) -> bool {
        self.show_namespace
    }

    /// Registers one pod's admitted container set: records the per-pod
    /// container count (for the "omit `(CONTAINER)`" rule) and grows the
    /// alignment width if this pod's longest prefix exceeds it.
    pub fn register_pod(&self, pod: &PodRecord) {
        let show_container = pod.containers.len() > 1;
        self.container_counts
            .write()
            .unwrap()
            .insert((pod.namespace.clone(), pod.name.clone()), pod.containers.len());

        let widest = pod
            .containers
            .iter()
            .map(|c| prefix_text(self.show_namespace, &pod.namespace, &pod.name, show_container, &c.container_name).len())
            .max()
            .unwrap_or(0);
        self.width.fetch_max(self.timestamp_width + widest, Ordering::SeqCst);
    }

    pub fn width(&self) -> usize {
        self.width.load(Ordering::SeqCst)
    }

    pub fn container_count(&self, namespace: &str, pod_name: &str) -> usize {
        *self
            .container_counts
            .read()
            .unwrap()
            .get(&(namespace.to_string(), pod_name.to_string()))
            .unwrap_or(&1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ContainerIdentity, ContainerKind};

    fn container(ns: &str, pod: &str, name: &str) -> ContainerIdentity {
        ContainerIdentity {
            namespace: ns.to_string(),
            pod_name: pod.to_string(),
            pod_uid: "uid".to_string(),
            container_name: name.to_string(),
            kind: ContainerKind::Main,
        }
    }

    fn base_cfg() -> RunConfig {
        RunConfig {
            namespaces: vec!["default".to_string()],
            label_selector: None,
            include: vec![],
            exclude: vec![],
            exclude_init: false,
            exclude_ephemeral: false,
            since_seconds: 600,
            tail_lines: 25,
            follow: false,
            max_containers: 10,
            color_logs: true,
            timestamps: false,
            verbosity: 0,
            kubeconfig: None,
        }
    }

    #[test]
    fn width_never_shrinks_and_grows_on_longer_prefix() {
        let registry = AlignmentRegistry::new(&base_cfg(), 1);
        registry.register_pod(&PodRecord {
            namespace: "default".to_string(),
            name: "web".to_string(),
            uid: "u1".to_string(),
            labels: Default::default(),
            phase: "Running".to_string(),
            containers: vec![container("default", "web", "nginx")],
        });
        let first = registry.width();
        assert_eq!(first, "web".len());

        registry.register_pod(&PodRecord {
            namespace: "default".to_string(),
            name: "a-much-longer-pod-name".to_string(),
            uid: "u2".to_string(),
            labels: Default::default(),
            phase: "Running".to_string(),
            containers: vec![container("default", "a-much-longer-pod-name", "app")],
        });
        assert!(registry.width() > first);
    }

    #[test]
    fn single_container_pod_omits_container_name_from_count() {
        let registry = AlignmentRegistry::new(&base_cfg(), 1);
        registry.register_pod(&PodRecord {
            namespace: "default".to_string(),
            name: "web".to_string(),
            uid: "u1".to_string(),
            labels: Default::default(),
            phase: "Running".to_string(),
            containers: vec![container("default", "web", "nginx")],
        });
        assert_eq!(registry.container_count("default", "web"), 1);
    }
}
