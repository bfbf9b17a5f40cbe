//! One task per admitted container: holds a streaming-phase semaphore
//! permit, reads lines from the cluster, and retries with backoff on
//! transient failure (SPEC_FULL §4.4 "Producer lifecycle").

use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::StreamError;
use crate::k8s::ClusterApi;
use crate::model::{ContainerIdentity, LogEntry, RunConfig, StreamContext};
use crate::util::Backoff;

use super::{sleep_or_cancel, QueueItem};

/// A stream is considered healthy, and its backoff counter reset, once it
/// has stayed open this long (SPEC_FULL §4.4 "Healthy-stream reset").
const HEALTHY_STREAM_THRESHOLD: Duration = Duration::from_secs(5);

pub(super) async fn run(
    client: Arc<dyn ClusterApi>,
    container: ContainerIdentity,
    cfg: Arc<RunConfig>,
    semaphore: Arc<tokio::sync::Semaphore>,
    cancel: CancellationToken,
    tx: tokio::sync::mpsc::Sender<QueueItem>,
    live: Arc<StdMutex<HashSet<ContainerIdentity>>>,
) {
    let permit = tokio::select! {
        permit = semaphore.acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => return,
        },
        _ = cancel.cancelled() => {
            live.lock().unwrap().remove(&container);
            return;
        }
    };

    let ctx = StreamContext {
        container: container.clone(),
        since_seconds: Some(cfg.since_seconds),
        tail_lines: cfg.tail_lines,
        follow: cfg.follow,
        timestamps: cfg.timestamps,
    };

    let mut backoff = Backoff::new();

    'outer: loop {
        if cancel.is_cancelled() {
            break;
        }

        let stream = match client.stream_logs(&ctx).await {
            Ok(stream) => stream,
            Err(StreamError::StreamGone(msg)) => {
                debug!(pod = %container.pod_name, container = %container.container_name, %msg, "stream gone, retiring producer");
                break;
            }
            Err(StreamError::PermissionDenied(msg)) => {
                let _ = tx
                    .send(QueueItem::Warning(format!(
                        "{}/{} ({}): permission denied: {msg}",
                        container.namespace, container.pod_name, container.container_name
                    )))
                    .await;
                break;
            }
            Err(StreamError::Interrupted(msg)) => {
                warn!(pod = %container.pod_name, container = %container.container_name, %msg, "failed to open log stream, retrying");
                if !sleep_or_cancel(backoff.delay(), &cancel).await {
                    break;
                }
                backoff.advance();
                continue;
            }
        };
        tokio::pin!(stream);

        let started = Instant::now();
        let mut streamed_for = None;
        loop {
            let next = tokio::select! {
                item = stream.next() => item,
                _ = cancel.cancelled() => break 'outer,
            };
            match next {
                Some(Ok(raw_line)) => {
                    let (timestamp, raw_text) = if cfg.timestamps {
                        split_timestamp(&raw_line)
                    } else {
                        (None, raw_line)
                    };
                    let entry = LogEntry {
                        container: container.clone(),
                        raw_text,
                        timestamp,
                    };
                    if tx.send(QueueItem::Entry(entry)).await.is_err() {
                        break 'outer;
                    }
                }
                Some(Err(_)) => {
                    // Captured before the backoff sleep below, so a growing
                    // delay never pads the window and falsely looks healthy
                    // (SPEC_FULL §4.4 "Healthy-stream reset").
                    streamed_for = Some(started.elapsed());
                    break;
                }
                None => break,
            }
        }

        if let Some(streamed_for) = streamed_for {
            if !sleep_or_cancel(backoff.delay(), &cancel).await {
                break;
            }
            if streamed_for >= HEALTHY_STREAM_THRESHOLD {
                backoff.reset();
            } else {
                backoff.advance();
            }
            continue;
        }

        if cfg.follow {
            // Clean EOF while following: the container may just be between
            // writes. `StreamGone` (404/410 on the next open) is what
            // actually retires the producer when the pod is gone.
            backoff.reset();
            continue;
        }
        break;
    }

    drop(permit);
    live.lock().unwrap().remove(&container);
}

/// Splits a `--timestamps`-prefixed log line (`<rfc3339> <rest>`) into its
/// parsed timestamp and the remaining text. Falls back to an unparsed,
/// timestamp-less line when the prefix isn't valid RFC3339.
fn split_timestamp(line: &str) -> (Option<chrono::DateTime<chrono::FixedOffset>>, String) {
    match line.split_once(' ') {
        Some((prefix, rest)) => match chrono::DateTime::parse_from_rfc3339(prefix) {
            Ok(ts) => (Some(ts), rest.to_string()),
            Err(_) => (None, line.to_string()),
        },
        None => (None, line.to_string()),
    }
}
