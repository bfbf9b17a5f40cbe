//! Watches each configured namespace for pod lifecycle events and admits
//! newly-appearing containers while the run is in `--follow` mode
//! (SPEC_FULL §4.4 "Dynamic rotation").

use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex};

use futures::StreamExt;
use kube::api::WatchEvent;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::color::ColorAssigner;
use crate::discovery::{build_pod_record, is_streamable, pod_phase};
use crate::k8s::ClusterApi;
use crate::model::RunConfig;
use crate::render::AlignmentRegistry;
use crate::util::{admitted, Backoff};

use super::{producer, Fatal, Producers, QueueItem, SeenPods};

/// After this many consecutive failures to list or open a watch on one
/// namespace, the rotation watcher stops retrying that namespace and treats
/// it as session-fatal (SPEC_FULL §7: "repeated watcher failures past a
/// threshold terminate the run").
const MAX_CONSECUTIVE_WATCH_FAILURES: u32 = 8;

#[allow(clippy::too_many_arguments)]
pub(super) async fn run(
    client: Arc<dyn ClusterApi>,
    cfg: Arc<RunConfig>,
    colors: Arc<ColorAssigner>,
    registry: Arc<AlignmentRegistry>,
    cancel: CancellationToken,
    tx: tokio::sync::mpsc::Sender<QueueItem>,
    producers: Producers,
    semaphore: Arc<tokio::sync::Semaphore>,
    live: Arc<StdMutex<HashSet<crate::model::ContainerIdentity>>>,
    seen_pods: SeenPods,
    fatal: Fatal,
) {
    let watchers = cfg.namespaces.iter().cloned().map(|namespace| {
        watch_namespace(
            namespace,
            client.clone(),
            cfg.clone(),
            colors.clone(),
            registry.clone(),
            cancel.clone(),
            tx.clone(),
            producers.clone(),
            semaphore.clone(),
            live.clone(),
            seen_pods.clone(),
            fatal.clone(),
        )
    });
    futures::future::join_all(watchers).await;
}

/// Records one list/watch failure. Returns `true` (and makes the run's
/// fatal condition visible to `LogManager::run`) once the namespace has
/// failed `MAX_CONSECUTIVE_WATCH_FAILURES` times in a row, in which case the
/// caller should give up rather than keep retrying with backoff.
async fn report_watch_failure(
    namespace: &str,
    message: &str,
    consecutive_failures: &mut u32,
    fatal: &Fatal,
    cancel: &CancellationToken,
    tx: &tokio::sync::mpsc::Sender<QueueItem>,
) -> bool {
    *consecutive_failures += 1;
    if *consecutive_failures < MAX_CONSECUTIVE_WATCH_FAILURES {
        return false;
    }
    let summary = format!(
        "rotation watcher for namespace '{namespace}' failed {consecutive_failures} times in a row: {message}"
    );
    *fatal.lock().unwrap() = Some(summary.clone());
    let _ = tx.send(QueueItem::Error(summary)).await;
    cancel.cancel();
    true
}

#[allow(clippy::too_many_arguments)]
async fn watch_namespace(
    namespace: String,
    client: Arc<dyn ClusterApi>,
    cfg: Arc<RunConfig>,
    colors: Arc<ColorAssigner>,
    registry: Arc<AlignmentRegistry>,
    cancel: CancellationToken,
    tx: tokio::sync::mpsc::Sender<QueueItem>,
    producers: Producers,
    semaphore: Arc<tokio::sync::Semaphore>,
    live: Arc<StdMutex<HashSet<crate::model::ContainerIdentity>>>,
    seen_pods: SeenPods,
    fatal: Fatal,
) {
    let mut backoff = Backoff::new();
    let mut consecutive_failures: u32 = 0;
    loop {
        if cancel.is_cancelled() {
            return;
        }

        let listed = match client.list_pods(&namespace, cfg.label_selector.as_deref()).await {
            Ok(list) => list,
            Err(err) => {
                warn!(%namespace, %err, "failed to list pods for rotation watch, retrying");
                if report_watch_failure(&namespace, &err.to_string(), &mut consecutive_failures, &fatal, &cancel, &tx).await {
                    return;
                }
                if !super::sleep_or_cancel(backoff.next_delay(), &cancel).await {
                    return;
                }
                continue;
            }
        };
        let mut resource_version = listed.resource_version;

        let stream = match client
            .watch_pods(&namespace, cfg.label_selector.as_deref(), &resource_version)
            .await
        {
            Ok(stream) => stream,
            Err(err) => {
                warn!(%namespace, %err, "failed to open pod watch, retrying");
                if report_watch_failure(&namespace, &err.to_string(), &mut consecutive_failures, &fatal, &cancel, &tx).await {
                    return;
                }
                if !super::sleep_or_cancel(backoff.next_delay(), &cancel).await {
                    return;
                }
                continue;
            }
        };
        tokio::pin!(stream);
        backoff.reset();
        consecutive_failures = 0;

        loop {
            let next = tokio::select! {
                item = stream.next() => item,
                _ = cancel.cancelled() => return,
            };
            match next {
                Some(Ok(WatchEvent::Added(pod))) | Some(Ok(WatchEvent::Modified(pod))) => {
                    handle_possible_new_pod(
                        &namespace, &pod, &client, &cfg, &colors, &registry, &producers, &semaphore, &live,
                        &seen_pods, &tx, &cancel,
                    );
                }
                Some(Ok(WatchEvent::Bookmark(bookmark))) => {
                    resource_version = bookmark.metadata.resource_version;
                }
                Some(Ok(WatchEvent::Deleted(_))) => {}
                Some(Ok(WatchEvent::Error(err))) => {
                    debug!(%namespace, ?err, "watch stream reported an error event, relisting");
                    break;
                }
                Some(Err(err)) => {
                    debug!(%namespace, %err, "watch stream failed, relisting");
                    break;
                }
                None => break,
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn handle_possible_new_pod(
    namespace: &str,
    pod: &k8s_openapi::api::core::v1::Pod,
    client: &Arc<dyn ClusterApi>,
    cfg: &Arc<RunConfig>,
    colors: &Arc<ColorAssigner>,
    registry: &Arc<AlignmentRegistry>,
    producers: &Producers,
    semaphore: &Arc<tokio::sync::Semaphore>,
    live: &Arc<StdMutex<HashSet<crate::model::ContainerIdentity>>>,
    seen_pods: &SeenPods,
    tx: &tokio::sync::mpsc::Sender<QueueItem>,
    cancel: &CancellationToken,
) {
    let Some(name) = pod.metadata.name.clone() else { return };
    if !admitted(&cfg.include, &cfg.exclude, &name) {
        return;
    }
    let phase = pod_phase(pod);
    if !is_streamable(pod, &phase) {
        return;
    }
    let Some(record) = build_pod_record(namespace, pod, cfg) else { return };
    if record.containers.is_empty() {
        return;
    }

    let key = (record.namespace.clone(), record.name.clone(), record.uid.clone());
    {
        let mut seen = seen_pods.lock().unwrap();
        if !seen.insert(key) {
            return;
        }
    }

    debug!(namespace = %record.namespace, pod = %record.name, "rotation admitted new pod");
    colors.get(&record.name);
    registry.register_pod(&record);

    for container in &record.containers {
        live.lock().unwrap().insert(container.clone());
        spawn_producer(
            producers,
            client.clone(),
            container.clone(),
            cfg.clone(),
            semaphore.clone(),
            cancel.clone(),
            tx.clone(),
            live.clone(),
        );
    }
}

#[allow(clippy::too_many_arguments)]
fn spawn_producer(
    producers: &Producers,
    client: Arc<dyn ClusterApi>,
    container: crate::model::ContainerIdentity,
    cfg: Arc<RunConfig>,
    semaphore: Arc<tokio::sync::Semaphore>,
    cancel: CancellationToken,
    tx: tokio::sync::mpsc::Sender<QueueItem>,
    live: Arc<StdMutex<HashSet<crate::model::ContainerIdentity>>>,
) {
    producers.lock().unwrap().spawn(async move {
        producer::run(client, container, cfg, semaphore, cancel, tx, live).await;
    });
}
