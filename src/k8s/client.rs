use std::path::Path;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{AsyncBufReadExt, TryStreamExt};
use k8s_openapi::api::core::v1::{Namespace, Pod};
use kube::api::{ListParams, LogParams, WatchEvent};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config};

use crate::error::{ClientError, StreamError};
use crate::model::StreamContext;

/// Reads the namespace of the kubeconfig's current context, falling back to
/// `default` when there is no context, no kubeconfig, or the context has no
/// namespace set (SPEC_FULL §4.5 step 1).
pub fn infer_default_namespace(kubeconfig: Option<&Path>) -> String {
    let read = match kubeconfig {
        Some(path) => Kubeconfig::read_from(path),
        None => Kubeconfig::read(),
    };
    read.ok()
        .and_then(|kconf| {
            let current = kconf.current_context.clone()?;
            kconf
                .contexts
                .into_iter()
                .find(|named| named.name == current)?
                .context?
                .namespace
        })
        .unwrap_or_else(|| "default".to_string())
}

/// 401 (not authenticated) and 403 (authenticated but forbidden) both map to
/// the same `PermissionDenied` classification and the same exit code 2
/// (SPEC_FULL §7: "401/403 on list. Exit 2.").
fn classify_client_error(err: kube::Error) -> ClientError {
    if let kube::Error::Api(resp) = &err {
        if resp.code == 401 || resp.code == 403 {
            return ClientError::PermissionDenied(resp.message.clone());
        }
    }
    ClientError::Api(err)
}

/// One page of pods plus the resource version to resume a watch from. Keeps
/// `kube::api::ObjectList`'s wire shape out of the rest of the crate, behind
/// the same thin-facade boundary `ClusterApi` already draws around
/// `kube::Api` (SPEC_FULL §4.3) — and, not incidentally, gives a fake test
/// implementation of `ClusterApi` a type it can construct without reaching
/// into kube's internal list/metadata types.
#[derive(Debug, Clone, Default)]
pub struct PodList {
    pub items: Vec<Pod>,
    pub resource_version: String,
}

/// Async wrapper over the subset of the Kubernetes API KuLo needs: listing
/// namespaces and pods, streaming container logs, and watching pod
/// lifecycle events. This is the sole seam between the concurrency core
/// (manager, producer, rotation watcher, discovery) and the real cluster —
/// `ClusterClient` is its only production implementation; tests substitute a
/// fake so the producer/consumer/rotation fabric can be exercised without a
/// live cluster.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn list_namespaces(&self) -> Result<Vec<String>, ClientError>;
    async fn check_namespace_exists(&self, name: &str) -> Result<bool, ClientError>;
    /// Server-side label-filtered pod listing for one namespace.
    async fn list_pods(&self, namespace: &str, label_selector: Option<&str>) -> Result<PodList, ClientError>;
    /// Opens one container's log stream. Infinite when `ctx.follow`, finite
    /// (ends at normal EOF) otherwise.
    async fn stream_logs(&self, ctx: &StreamContext) -> Result<BoxStream<'static, Result<String, StreamError>>, StreamError>;
    /// Resumable pod-lifecycle watch from a known resource version.
    async fn watch_pods(
        &self,
        namespace: &str,
        label_selector: Option<&str>,
        resource_version: &str,
    ) -> Result<BoxStream<'static, Result<WatchEvent<Pod>, ClientError>>, ClientError>;
}

/// The real, `kube`-backed implementation of [`ClusterApi`]. Holds a cloned
/// `kube::Client`, which is cheap to share across the producer/consumer/
/// rotation tasks.
#[derive(Clone)]
pub struct ClusterClient {
    client: Client,
}

impl ClusterClient {
    /// Builds the client from the ambient kubeconfig, or from `kubeconfig`
    /// when given. Resolution failure is a startup error (SPEC_FULL §7),
    /// never a per-stream one.
    pub async fn connect(kubeconfig: Option<&Path>) -> Result<ClusterClient, ClientError> {
        let config = match kubeconfig {
            Some(path) => {
                let kconf = Kubeconfig::read_from(path)
                    .map_err(|err| ClientError::Kubeconfig(err.to_string()))?;
                Config::from_custom_kubeconfig(kconf, &KubeConfigOptions::default())
                    .await
                    .map_err(|err| ClientError::Kubeconfig(err.to_string()))?
            }
            None => Config::infer()
                .await
                .map_err(|err| ClientError::Kubeconfig(err.to_string()))?,
        };
        let client =
            Client::try_from(config).map_err(|err| ClientError::Connection(err.to_string()))?;
        Ok(ClusterClient { client })
    }
}

#[async_trait]
impl ClusterApi for ClusterClient {
    /// Only called when a namespace token needs regex expansion
    /// (SPEC_FULL §4.3 "Namespace listing failure mode").
    async fn list_namespaces(&self) -> Result<Vec<String>, ClientError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(classify_client_error)?;
        Ok(list.into_iter().filter_map(|ns| ns.metadata.name).collect())
    }

    async fn check_namespace_exists(&self, name: &str) -> Result<bool, ClientError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        match api.get(name).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(false),
            Err(err) => Err(classify_client_error(err)),
        }
    }

    async fn list_pods(&self, namespace: &str, label_selector: Option<&str>) -> Result<PodList, ClientError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let mut params = ListParams::default();
        if let Some(selector) = label_selector {
            params = params.labels(selector);
        }
        let list = api.list(&params).await.map_err(classify_client_error)?;
        let resource_version = list.metadata.resource_version.clone().unwrap_or_default();
        Ok(PodList { items: list.items, resource_version })
    }

    /// Mid-stream read failures are classified as `StreamError::Interrupted`;
    /// failures opening the stream (403/404/410) are classified by
    /// `StreamError::classify`.
    async fn stream_logs(&self, ctx: &StreamContext) -> Result<BoxStream<'static, Result<String, StreamError>>, StreamError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &ctx.container.namespace);
        let params = LogParams {
            container: Some(ctx.container.container_name.clone()),
            follow: ctx.follow,
            limit_bytes: None,
            pretty: false,
            previous: false,
            since_seconds: ctx.since_seconds,
            tail_lines: Some(ctx.tail_lines),
            timestamps: ctx.timestamps,
        };
        let body = api
            .log_stream(&ctx.container.pod_name, &params)
            .await
            .map_err(StreamError::classify)?;
        let lines = body
            .lines()
            .map_err(|err| StreamError::Interrupted(err.to_string()));
        Ok(Box::pin(lines))
    }

    /// Callers (the rotation watcher) re-list to get a fresh resource
    /// version and call this again when the stream ends or errors, which
    /// naturally covers a 410 Gone resource-version gap by re-listing.
    async fn watch_pods(
        &self,
        namespace: &str,
        label_selector: Option<&str>,
        resource_version: &str,
    ) -> Result<BoxStream<'static, Result<WatchEvent<Pod>, ClientError>>, ClientError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let mut params = ListParams::default();
        if let Some(selector) = label_selector {
            params = params.labels(selector);
        }
        let stream = api
            .watch(&params, resource_version)
            .await
            .map_err(classify_client_error)?;
        Ok(Box::pin(stream.map_err(classify_client_error)))
    }
}
