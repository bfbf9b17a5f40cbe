//! Namespace resolution and pod/container discovery (SPEC_FULL §4.5).

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Pod;
use regex::RegexBuilder;

use crate::error::{ClientError, ConfigError};
use crate::k8s::ClusterApi;
use crate::model::{ContainerIdentity, ContainerKind, PodRecord, RunConfig};
use crate::util::{admitted, is_regex_pattern};

/// Resolves the `--namespace` tokens into a sorted, deduplicated list of
/// concrete namespace names (SPEC_FULL §4.5 step 1). Tokens that look like a
/// regex expand against the cluster's namespace list; exact tokens are
/// validated to exist. Falls back to `default_namespace` when `tokens` is
/// empty.
pub async fn resolve_namespaces(
    client: &dyn ClusterApi,
    tokens: &[String],
    default_namespace: &str,
) -> Result<Vec<String>, ConfigErrorOrClient> {
    if tokens.is_empty() {
        return Ok(vec![default_namespace.to_string()]);
    }

    let needs_listing = tokens.iter().any(|t| is_regex_pattern(t));
    let cluster_namespaces = if needs_listing {
        Some(client.list_namespaces().await.map_err(ConfigErrorOrClient::Client)?)
    } else {
        None
    };

    let mut resolved = std::collections::BTreeSet::new();
    for token in tokens {
        if is_regex_pattern(token) {
            let re = RegexBuilder::new(token)
                .case_insensitive(true)
                .build()
                .map_err(|err| ConfigError::InvalidPattern(token.clone(), err))?;
            for name in cluster_namespaces.as_ref().unwrap() {
                if re.is_match(name) {
                    resolved.insert(name.clone());
                }
            }
        } else {
            let exists = client
                .check_namespace_exists(token)
                .await
                .map_err(ConfigErrorOrClient::Client)?;
            if !exists {
                return Err(ConfigError::UnknownNamespace(token.clone()).into());
            }
            resolved.insert(token.clone());
        }
    }
    Ok(resolved.into_iter().collect())
}

/// Either layer of error `resolve_namespaces` can fail with, kept distinct
/// so callers still map each to the right exit code (SPEC_FULL §7).
#[derive(thiserror::Error, Debug)]
pub enum ConfigErrorOrClient {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Client(#[from] ClientError),
}

pub(crate) fn pod_phase(pod: &Pod) -> String {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.clone())
        .unwrap_or_else(|| "Unknown".to_string())
}

/// SPEC_FULL §4.5 step 5: drop pods whose phase gives no hope of readable
/// logs. `CrashLoopBackOff` pods are *not* dropped here — their phase is
/// `Running` or `Pending`, never `Unknown`, so this rule never touches them;
/// a dead stream for those is left to `StreamGone` to retire.
pub(crate) fn is_streamable(pod: &Pod, phase: &str) -> bool {
    if phase != "Unknown" {
        return true;
    }
    pod.status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref())
        .map(|statuses| !statuses.is_empty())
        .unwrap_or(false)
}

/// Builds the immutable pod snapshot for one pod, expanding it into
/// container identities with `exclude_init` / `exclude_ephemeral` already
/// applied and sorted by `(kind, container_name)`. Shared by initial
/// discovery and the rotation watcher so a rotated-in pod is expanded
/// exactly the same way.
pub fn build_pod_record(namespace: &str, pod: &Pod, cfg: &RunConfig) -> Option<PodRecord> {
    let name = pod.metadata.name.clone()?;
    let uid = pod.metadata.uid.clone().unwrap_or_default();
    let phase = pod_phase(pod);
    let labels: BTreeMap<String, String> = pod
        .metadata
        .labels
        .clone()
        .unwrap_or_default()
        .into_iter()
        .collect();

    let mut containers = Vec::new();
    if let Some(spec) = &pod.spec {
        if !cfg.exclude_init {
            for c in spec.init_containers.as_deref().unwrap_or(&[]) {
                containers.push(ContainerIdentity {
                    namespace: namespace.to_string(),
                    pod_name: name.clone(),
                    pod_uid: uid.clone(),
                    container_name: c.name.clone(),
                    kind: ContainerKind::Init,
                });
            }
        }
        for c in &spec.containers {
            containers.push(ContainerIdentity {
                namespace: namespace.to_string(),
                pod_name: name.clone(),
                pod_uid: uid.clone(),
                container_name: c.name.clone(),
                kind: ContainerKind::Main,
            });
        }
        if !cfg.exclude_ephemeral {
            for c in spec.ephemeral_containers.as_deref().unwrap_or(&[]) {
                containers.push(ContainerIdentity {
                    namespace: namespace.to_string(),
                    pod_name: name.clone(),
                    pod_uid: uid.clone(),
                    container_name: c.name.clone(),
                    kind: ContainerKind::Ephemeral,
                });
            }
        }
    }
    containers.sort_by(|a, b| (a.kind, &a.container_name).cmp(&(b.kind, &b.container_name)));

    Some(PodRecord {
        namespace: namespace.to_string(),
        name,
        uid,
        labels,
        phase,
        containers,
    })
}

/// Runs discovery steps 2-6: server-side pod listing per namespace,
/// client-side include/exclude filtering, container expansion, phase
/// skipping, and a final deterministic sort by `(namespace, name)`.
/// Max-concurrency truncation is the log manager's job (SPEC_FULL §4.4 step
/// 5), not discovery's.
pub async fn discover(
    client: &dyn ClusterApi,
    namespaces: &[String],
    cfg: &RunConfig,
) -> Result<Vec<PodRecord>, ClientError> {
    let mut records = Vec::new();
    for namespace in namespaces {
        let pods = client.list_pods(namespace, cfg.label_selector.as_deref()).await?;
        for pod in pods.items {
            let name = match &pod.metadata.name {
                Some(n) => n.clone(),
                None => continue,
            };
            if !admitted(&cfg.include, &cfg.exclude, &name) {
                continue;
            }
            let phase = pod_phase(&pod);
            if !is_streamable(&pod, &phase) {
                continue;
            }
            if let Some(record) = build_pod_record(namespace, &pod, cfg) {
                if !record.containers.is_empty() {
                    records.push(record);
                }
            }
        }
    }
    records.sort_by(|a, b| (&a.namespace, &a.name).cmp(&(&b.namespace, &b.name)));
    Ok(records)
}
