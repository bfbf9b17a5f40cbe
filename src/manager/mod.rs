//! The concurrency core: producers, the consumer, shutdown, and dynamic pod
//! rotation (SPEC_FULL §4.4).

mod consumer;
mod producer;
mod rotation;

use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::color::ColorAssigner;
use crate::error::KuloError;
use crate::k8s::ClusterApi;
use crate::model::{ContainerIdentity, PodRecord, RunConfig};
use crate::render::{AlignmentRegistry, Renderer};

/// Bounded queue capacity (SPEC_FULL §5 "Backpressure").
const QUEUE_CAPACITY: usize = 1024;
/// Teardown grace deadline (SPEC_FULL §4.4 "Shutdown protocol").
const SHUTDOWN_GRACE: std::time::Duration = std::time::Duration::from_secs(2);

/// What travels through the bounded queue between producers and the
/// consumer: a log line to render, an out-of-band warning, or a
/// session-ending error. The consumer is the only task with a handle to the
/// renderer (SPEC_FULL §5 "Shared-resource policy"), so this is also how a
/// non-renderer task (the rotation watcher) reaches `Renderer::error`.
pub(crate) enum QueueItem {
    Entry(crate::model::LogEntry),
    Warning(String),
    Error(String),
}

type Producers = Arc<StdMutex<JoinSet<()>>>;
type SeenPods = Arc<StdMutex<HashSet<(String, String, String)>>>;
type Fatal = Arc<StdMutex<Option<String>>>;

/// Sleeps for `delay`, returning `false` if cancellation fires first so the
/// caller can unwind without an extra wakeup. Shared by producers (retrying
/// a stream) and the rotation watcher (retrying a relist/watch).
async fn sleep_or_cancel(delay: std::time::Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = cancel.cancelled() => false,
    }
}

/// Owns the cancellation flag, the live-producer set, the concurrency
/// semaphore, and (by reference) the alignment registry and color assigner.
/// One instance is constructed per run.
pub struct LogManager {
    client: Arc<dyn ClusterApi>,
    cfg: Arc<RunConfig>,
    colors: Arc<ColorAssigner>,
    registry: Arc<AlignmentRegistry>,
    cancel: CancellationToken,
    semaphore: Arc<Semaphore>,
    live: Arc<StdMutex<HashSet<ContainerIdentity>>>,
    /// Set by the rotation watcher when a failure is session-fatal rather
    /// than per-stream (SPEC_FULL §7: "repeated watcher failures past a
    /// threshold terminate the run"). Checked by `run` after shutdown so
    /// case (c) — an unrecoverable internal error — actually surfaces as an
    /// `Err` instead of a silent clean exit.
    fatal: Fatal,
}

impl LogManager {
    pub fn new(
        client: Arc<dyn ClusterApi>,
        cfg: Arc<RunConfig>,
        colors: Arc<ColorAssigner>,
        registry: Arc<AlignmentRegistry>,
    ) -> LogManager {
        let semaphore = if cfg.max_containers == 0 {
            Arc::new(Semaphore::new(Semaphore::MAX_PERMITS))
        } else {
            Arc::new(Semaphore::new(cfg.max_containers))
        };
        LogManager {
            client,
            cfg,
            colors,
            registry,
            cancel: CancellationToken::new(),
            semaphore,
            live: Arc::new(StdMutex::new(HashSet::new())),
            fatal: Arc::new(StdMutex::new(None)),
        }
    }

    /// Exposes the manager's cancellation flag so `main` can trigger it on
    /// SIGINT/SIGTERM alongside the manager's own signal handler.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Blocks until every producer finishes naturally (snapshot mode), a
    /// shutdown signal lands, or an unrecoverable error occurs. Returns with
    /// no dangling tasks, no open HTTP bodies, and an empty queue.
    pub async fn run(&self, pods: Vec<PodRecord>, renderer: Box<dyn Renderer + Send>) -> Result<(), KuloError> {
        self.spawn_signal_handler();

        self.colors.initialize(pods.iter().map(|p| p.name.clone()));
        for pod in &pods {
            self.registry.register_pod(pod);
        }

        let mut containers: Vec<ContainerIdentity> =
            pods.iter().flat_map(|p| p.containers.iter().cloned()).collect();
        containers.sort_by(|a, b| {
            (&a.namespace, &a.pod_name, &a.container_name).cmp(&(&b.namespace, &b.pod_name, &b.container_name))
        });

        let (tx, rx) = mpsc::channel::<QueueItem>(QUEUE_CAPACITY);

        // Consumer starts before any producer so no enqueued entry is ever
        // lost waiting for a consumer that isn't ready yet.
        let consumer_handle = tokio::spawn(consumer::run(rx, renderer));

        if self.cfg.max_containers > 0 && containers.len() > self.cfg.max_containers {
            let total = containers.len();
            let cap = self.cfg.max_containers;
            containers.truncate(cap);
            warn!(total, cap, "truncating admitted containers to --max-containers");
            let _ = tx
                .send(QueueItem::Warning(format!(
                    "admitted {total} containers exceeds --max-containers={cap}; truncating to the first {cap}"
                )))
                .await;
        }

        let producers: Producers = Arc::new(StdMutex::new(JoinSet::new()));
        let mut seen: HashSet<(String, String, String)> = HashSet::new();
        for pod in &pods {
            seen.insert((pod.namespace.clone(), pod.name.clone(), pod.uid.clone()));
        }
        let seen_pods: SeenPods = Arc::new(StdMutex::new(seen));

        for container in containers {
            self.live.lock().unwrap().insert(container.clone());
            self.spawn_producer(&producers, container, tx.clone());
        }

        let rotation_handle = if self.cfg.follow {
            info!("follow mode: starting rotation watcher");
            Some(tokio::spawn(rotation::run(
                self.client.clone(),
                self.cfg.clone(),
                self.colors.clone(),
                self.registry.clone(),
                self.cancel.clone(),
                tx.clone(),
                producers.clone(),
                self.semaphore.clone(),
                self.live.clone(),
                seen_pods,
                self.fatal.clone(),
            )))
        } else {
            None
        };
        drop(tx);

        if self.cfg.follow {
            self.cancel.cancelled().await;
        } else {
            // Snapshot mode: wait for every producer to finish naturally,
            // then unify with the follow-mode shutdown path below.
            let mut owned = std::mem::replace(&mut *producers.lock().unwrap(), JoinSet::new());
            while owned.join_next().await.is_some() {}
            self.cancel.cancel();
        }

        if let Some(handle) = rotation_handle {
            handle.abort();
        }

        let mut owned = std::mem::replace(&mut *producers.lock().unwrap(), JoinSet::new());
        if tokio::time::timeout(SHUTDOWN_GRACE, async { while owned.join_next().await.is_some() {} })
            .await
            .is_err()
        {
            owned.abort_all();
            while owned.join_next().await.is_some() {}
        }

        // Dropping the last sender unblocks the consumer's `recv`, which
        // then drains whatever is still queued and returns.
        drop(producers);
        let _ = consumer_handle.await;

        if let Some(message) = self.fatal.lock().unwrap().take() {
            return Err(KuloError::Internal(message));
        }
        Ok(())
    }

    fn spawn_signal_handler(&self) {
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            #[cfg(unix)]
            {
                let mut term = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(sig) => sig,
                    Err(_) => return,
                };
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            #[cfg(not(unix))]
            {
                let _ = tokio::signal::ctrl_c().await;
            }
            cancel.cancel();
        });
    }

    fn spawn_producer(&self, producers: &Producers, container: ContainerIdentity, tx: mpsc::Sender<QueueItem>) {
        let client = self.client.clone();
        let cfg = self.cfg.clone();
        let semaphore = self.semaphore.clone();
        let cancel = self.cancel.clone();
        let live = self.live.clone();
        producers.lock().unwrap().spawn(async move {
            producer::run(client, container, cfg, semaphore, cancel, tx, live).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use futures::stream::{self, BoxStream};
    use k8s_openapi::api::core::v1::Pod;
    use kube::api::WatchEvent;

    use crate::color::ColorAssigner;
    use crate::error::{ClientError, StreamError};
    use crate::k8s::{ClusterApi, PodList};
    use crate::model::{ContainerIdentity, ContainerKind, LogEntry, PodRecord, RunConfig};
    use crate::render::{AlignmentRegistry, Renderer};

    use super::*;

    fn container(pod: &str, name: &str) -> ContainerIdentity {
        ContainerIdentity {
            namespace: "ns".to_string(),
            pod_name: pod.to_string(),
            pod_uid: format!("{pod}-uid"),
            container_name: name.to_string(),
            kind: ContainerKind::Main,
        }
    }

    fn pod_record(pod: &str, containers: Vec<ContainerIdentity>) -> PodRecord {
        PodRecord {
            namespace: "ns".to_string(),
            name: pod.to_string(),
            uid: format!("{pod}-uid"),
            labels: Default::default(),
            phase: "Running".to_string(),
            containers,
        }
    }

    fn run_config(max_containers: usize, follow: bool) -> RunConfig {
        RunConfig {
            namespaces: vec!["ns".to_string()],
            label_selector: None,
            include: vec![],
            exclude: vec![],
            exclude_init: false,
            exclude_ephemeral: false,
            since_seconds: 0,
            tail_lines: 10,
            follow,
            max_containers,
            color_logs: false,
            timestamps: false,
            verbosity: 0,
            kubeconfig: None,
        }
    }

    #[derive(Clone, Default)]
    struct RecordingRenderer {
        /// `(pod_name, container_name, raw_text)` per rendered entry.
        rendered: Arc<StdMutex<Vec<(String, String, String)>>>,
        warnings: Arc<StdMutex<Vec<String>>>,
        errors: Arc<StdMutex<Vec<String>>>,
    }

    impl Renderer for RecordingRenderer {
        fn render(&mut self, entry: &LogEntry) {
            self.rendered.lock().unwrap().push((
                entry.container.pod_name.clone(),
                entry.container.container_name.clone(),
                entry.raw_text.clone(),
            ));
        }
        fn warn(&mut self, text: &str) {
            self.warnings.lock().unwrap().push(text.to_string());
        }
        fn error(&mut self, text: &str) {
            self.errors.lock().unwrap().push(text.to_string());
        }
    }

    /// Guard decrementing a shared "currently streaming" gauge when the fake
    /// stream it's embedded in is exhausted or dropped.
    struct GaugeGuard(Arc<AtomicUsize>);
    impl Drop for GaugeGuard {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn scripted_stream(
        lines: Vec<String>,
        delay: Duration,
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    ) -> BoxStream<'static, Result<String, StreamError>> {
        struct State {
            lines: std::vec::IntoIter<String>,
            delay: Duration,
            _guard: GaugeGuard,
        }

        let prev = active.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(prev, Ordering::SeqCst);

        let state = State {
            lines: lines.into_iter(),
            delay,
            _guard: GaugeGuard(active),
        };
        Box::pin(stream::unfold(state, |mut state| async move {
            tokio::time::sleep(state.delay).await;
            let line = state.lines.next()?;
            Some((Ok(line), state))
        }))
    }

    /// A fake [`ClusterApi`] whose `stream_logs` plays back a fixed, per-
    /// container script of lines, tracking how many scripted streams are
    /// concurrently open.
    struct FakeCluster {
        scripts: HashMap<String, Vec<String>>,
        delay: Duration,
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ClusterApi for FakeCluster {
        async fn list_namespaces(&self) -> Result<Vec<String>, ClientError> {
            Ok(vec![])
        }
        async fn check_namespace_exists(&self, _name: &str) -> Result<bool, ClientError> {
            Ok(true)
        }
        async fn list_pods(&self, _namespace: &str, _label_selector: Option<&str>) -> Result<PodList, ClientError> {
            Ok(PodList::default())
        }
        async fn stream_logs(
            &self,
            ctx: &crate::model::StreamContext,
        ) -> Result<BoxStream<'static, Result<String, StreamError>>, StreamError> {
            let key = format!("{}/{}", ctx.container.pod_name, ctx.container.container_name);
            let lines = self.scripts.get(&key).cloned().unwrap_or_default();
            Ok(scripted_stream(lines, self.delay, self.active.clone(), self.peak.clone()))
        }
        async fn watch_pods(
            &self,
            _namespace: &str,
            _label_selector: Option<&str>,
            _resource_version: &str,
        ) -> Result<BoxStream<'static, Result<WatchEvent<Pod>, ClientError>>, ClientError> {
            Ok(Box::pin(stream::empty()))
        }
    }

    /// Property #4 (SPEC_FULL §4.4 "Concurrency cap"): at no point does the
    /// number of producers in the streaming phase exceed `max_containers`,
    /// and property #6 (per-container ordering): lines from one container
    /// are rendered in the order the stream produced them.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn producers_never_exceed_max_containers_and_preserve_order() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut scripts = HashMap::new();
        let mut pods = Vec::new();
        for p in 0..3 {
            let pod_name = format!("pod{p}");
            let mut containers = Vec::new();
            for c in 0..2 {
                let cname = format!("c{c}");
                containers.push(container(&pod_name, &cname));
                scripts.insert(
                    format!("{pod_name}/{cname}"),
                    (0..4).map(|i| format!("line{i}")).collect(),
                );
            }
            pods.push(pod_record(&pod_name, containers));
        }

        let client: Arc<dyn ClusterApi> = Arc::new(FakeCluster {
            scripts,
            delay: Duration::from_millis(15),
            active,
            peak: peak.clone(),
        });
        let cfg = Arc::new(run_config(2, false));
        let colors = Arc::new(ColorAssigner::new());
        let registry = Arc::new(AlignmentRegistry::new(&cfg, cfg.namespaces.len()));
        let manager = LogManager::new(client, cfg, colors, registry);

        let renderer = RecordingRenderer::default();
        let renderer_box: Box<dyn Renderer + Send> = Box::new(renderer.clone());
        manager.run(pods, renderer_box).await.unwrap();

        assert!(peak.load(Ordering::SeqCst) <= 2, "exceeded --max-containers=2 in the streaming phase");

        let rendered = renderer.rendered.lock().unwrap();
        assert_eq!(rendered.len(), 6 * 4);
        for p in 0..3 {
            let pod_name = format!("pod{p}");
            for c in 0..2 {
                let cname = format!("c{c}");
                let got: Vec<&str> = rendered
                    .iter()
                    .filter(|(pod, name, _)| pod == &pod_name && name == &cname)
                    .map(|(_, _, text)| text.as_str())
                    .collect();
                assert_eq!(got, vec!["line0", "line1", "line2", "line3"]);
            }
        }
    }

    /// Property #5 (SPEC_FULL §4.4 "Shutdown protocol"): once `run` returns,
    /// every entry enqueued before cancellation has been rendered, and
    /// nothing is rendered afterwards.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn cancellation_drains_queued_entries_before_run_returns() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut scripts = HashMap::new();
        scripts.insert("pod/c".to_string(), (0..500).map(|i| format!("line{i}")).collect());

        let client: Arc<dyn ClusterApi> = Arc::new(FakeCluster {
            scripts,
            delay: Duration::from_millis(1),
            active,
            peak,
        });
        let cfg = Arc::new(run_config(1, true));
        let colors = Arc::new(ColorAssigner::new());
        let registry = Arc::new(AlignmentRegistry::new(&cfg, cfg.namespaces.len()));
        let manager = Arc::new(LogManager::new(client, cfg, colors, registry));
        let pods = vec![pod_record("pod", vec![container("pod", "c")])];

        let renderer = RecordingRenderer::default();
        let renderer_box: Box<dyn Renderer + Send> = Box::new(renderer.clone());

        let run_manager = manager.clone();
        let handle = tokio::spawn(async move { run_manager.run(pods, renderer_box).await });

        tokio::time::sleep(Duration::from_millis(30)).await;
        manager.cancellation_token().cancel();

        let result = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("manager.run did not shut down within the grace window")
            .expect("manager task panicked");
        assert!(result.is_ok());

        let count_at_return = renderer.rendered.lock().unwrap().len();
        assert!(count_at_return > 0, "no entries were rendered before cancellation");

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            renderer.rendered.lock().unwrap().len(),
            count_at_return,
            "entries kept arriving after run() returned"
        );

        let rendered = renderer.rendered.lock().unwrap();
        let indices: Vec<usize> = rendered
            .iter()
            .map(|(_, _, text)| text.trim_start_matches("line").parse::<usize>().unwrap())
            .collect();
        assert!(indices.windows(2).all(|w| w[0] < w[1]), "log lines rendered out of order: {indices:?}");
    }

    /// A fake whose `stream_logs` always opens successfully and immediately
    /// reports a mid-stream read error, used to regression-test the
    /// healthy-stream-reset timing fix: `started.elapsed()` must be measured
    /// before the backoff sleep, never after.
    struct FlappingCluster {
        calls: Arc<StdMutex<Vec<Duration>>>,
        start: tokio::time::Instant,
    }

    #[async_trait]
    impl ClusterApi for FlappingCluster {
        async fn list_namespaces(&self) -> Result<Vec<String>, ClientError> {
            Ok(vec![])
        }
        async fn check_namespace_exists(&self, _name: &str) -> Result<bool, ClientError> {
            Ok(true)
        }
        async fn list_pods(&self, _namespace: &str, _label_selector: Option<&str>) -> Result<PodList, ClientError> {
            Ok(PodList::default())
        }
        async fn stream_logs(
            &self,
            _ctx: &crate::model::StreamContext,
        ) -> Result<BoxStream<'static, Result<String, StreamError>>, StreamError> {
            self.calls.lock().unwrap().push(tokio::time::Instant::now() - self.start);
            Ok(Box::pin(stream::once(async { Err(StreamError::Interrupted("boom".to_string())) })))
        }
        async fn watch_pods(
            &self,
            _namespace: &str,
            _label_selector: Option<&str>,
            _resource_version: &str,
        ) -> Result<BoxStream<'static, Result<WatchEvent<Pod>, ClientError>>, ClientError> {
            Ok(Box::pin(stream::empty()))
        }
    }

    /// Property #2: a stream that fails instantly, every time, must never
    /// trip the healthy-stream reset — the delay sequence keeps doubling
    /// until it caps at 60s instead of cycling back to 1s.
    #[tokio::test(start_paused = true)]
    async fn flapping_stream_backoff_never_resets_and_caps_at_sixty() {
        let calls = Arc::new(StdMutex::new(Vec::new()));
        let client: Arc<dyn ClusterApi> = Arc::new(FlappingCluster {
            calls: calls.clone(),
            start: tokio::time::Instant::now(),
        });
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(16);
        let live = Arc::new(StdMutex::new(HashSet::new()));
        let semaphore = Arc::new(Semaphore::new(1));
        let cfg = Arc::new(run_config(1, false));
        let identity = container("pod", "c");

        let task_cancel = cancel.clone();
        let handle = tokio::spawn(producer::run(client, identity, cfg, semaphore, task_cancel, tx, live));

        for _ in 0..200 {
            tokio::time::advance(Duration::from_secs(1)).await;
            tokio::task::yield_now().await;
            if calls.lock().unwrap().len() >= 9 {
                break;
            }
        }
        cancel.cancel();
        let _ = handle.await;
        drop(rx);

        let recorded = calls.lock().unwrap().clone();
        assert!(recorded.len() >= 9, "only observed {} retries", recorded.len());
        let deltas: Vec<u64> = recorded.windows(2).map(|w| (w[1] - w[0]).as_secs()).collect();
        assert_eq!(&deltas[..6], &[1, 2, 4, 8, 16, 32]);
        assert!(deltas[6..].iter().all(|&d| d == 60), "delay sequence did not cap at 60s: {deltas:?}");
    }
}
