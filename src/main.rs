mod cli;
mod color;
mod diagnostics;
mod discovery;
mod error;
mod k8s;
mod manager;
mod model;
mod render;
mod util;

use std::process::ExitCode;
use std::sync::Arc;

use tracing::warn;

use crate::color::ColorAssigner;
use crate::error::KuloError;
use crate::k8s::client::infer_default_namespace;
use crate::k8s::{ClusterApi, ClusterClient};
use crate::manager::LogManager;
use crate::render::snapshot::SnapshotRenderer;
use crate::render::{AlignmentRegistry, Renderer};

#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    let args = cli::Args::parse_args();
    diagnostics::init(args.verbosity());

    match run(args).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("kulo: {err}");
            err.exit_code()
        }
    }
}

async fn run(args: cli::Args) -> Result<ExitCode, KuloError> {
    let client = ClusterClient::connect(args.kubeconfig()).await?;

    let (mut cfg, warnings) = args.into_run_config()?;
    for warning in warnings {
        warn!("{warning}");
    }

    let default_namespace = infer_default_namespace(cfg.kubeconfig.as_deref());
    cfg.namespaces = discovery::resolve_namespaces(&client, &cfg.namespaces, &default_namespace).await?;

    let client: Arc<dyn ClusterApi> = Arc::new(client);
    let cfg = Arc::new(cfg);

    let pods = discovery::discover(&client, &cfg.namespaces, &cfg).await?;
    if pods.is_empty() {
        eprintln!("kulo: no pods matched the given namespace/label/include/exclude filters");
        if !cfg.follow {
            return Ok(ExitCode::from(1));
        }
    }

    let colors = Arc::new(ColorAssigner::new());
    let registry = Arc::new(AlignmentRegistry::new(&cfg, cfg.namespaces.len()));
    let renderer: Box<dyn Renderer + Send> =
        Box::new(SnapshotRenderer::new(registry.clone(), colors.clone(), cfg.color_logs));

    let manager = LogManager::new(client, cfg, colors, registry);
    manager.run(pods, renderer).await?;
    Ok(ExitCode::SUCCESS)
}
