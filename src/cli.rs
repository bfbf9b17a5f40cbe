//! Argument parsing (SPEC_FULL §4.8): a thin `clap`-derived struct that
//! resolves into an immutable [`RunConfig`] before discovery starts.

use std::path::PathBuf;

use clap::Parser;

use crate::error::ConfigError;
use crate::model::RunConfig;
use crate::util::{compile_regex_list, parse_duration};

/// Aggregates Kubernetes container logs into one color-coded stream.
#[derive(Parser, Debug)]
#[command(name = "kulo", version, about)]
pub struct Args {
    /// Exact namespace names and/or regex patterns, comma-separated.
    /// Defaults to the current kubeconfig context's namespace.
    #[arg(short = 'n', long = "namespace", value_delimiter = ',')]
    namespace: Vec<String>,

    /// Server-side label selector, passed verbatim to the pod list call.
    #[arg(short = 'l', long = "label-selector")]
    label_selector: Option<String>,

    /// Client-side regex include on pod name, comma-separated.
    #[arg(short = 'i', long = "include", visible_alias = "filter", short_alias = 'f', value_delimiter = ',')]
    include: Vec<String>,

    /// Client-side regex exclude on pod name, comma-separated. Wins over
    /// `--include` when both match.
    #[arg(short = 'e', long = "exclude", value_delimiter = ',')]
    exclude: Vec<String>,

    /// Drop init containers.
    #[arg(long = "exclude-init")]
    exclude_init: bool,

    /// Drop ephemeral containers.
    #[arg(long = "exclude-ephemeral")]
    exclude_ephemeral: bool,

    /// Stream continuously and attach to pods that appear after start.
    #[arg(long = "follow")]
    follow: bool,

    /// How far back to read on first connect (`\d+[smhd]`).
    #[arg(short = 's', long = "since", default_value = "10m")]
    since: String,

    /// Initial lines read per container.
    #[arg(short = 't', long = "tail", default_value_t = 25)]
    tail: i64,

    /// Cap on concurrently streaming containers. 0 means unlimited.
    #[arg(long = "max-containers", default_value_t = 10)]
    max_containers: usize,

    /// Suppress terminal styling.
    #[arg(long = "no-color-logs")]
    no_color_logs: bool,

    /// Increases diagnostic verbosity (stderr only); repeatable.
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,

    /// Prefix rendered lines with the entry's timestamp.
    #[arg(long = "timestamps")]
    timestamps: bool,

    /// Overrides which kubeconfig file is read. Never bypasses ambient
    /// credential discovery itself.
    #[arg(long = "kubeconfig")]
    kubeconfig: Option<PathBuf>,
}

impl Args {
    pub fn parse_args() -> Args {
        Args::parse()
    }

    pub fn kubeconfig(&self) -> Option<&std::path::Path> {
        self.kubeconfig.as_deref()
    }

    pub fn verbosity(&self) -> u8 {
        self.verbose
    }

    /// Validates and compiles this struct into a [`RunConfig`], plus any
    /// non-fatal warnings discovered during validation (e.g. include/exclude
    /// given provably-identical pattern sources).
    pub fn into_run_config(self) -> Result<(RunConfig, Vec<String>), ConfigError> {
        let since_seconds = parse_duration(&self.since)?;
        let include = compile_many(&self.include)?;
        let exclude = compile_many(&self.exclude)?;

        let mut warnings = Vec::new();
        if !include.is_empty() && !exclude.is_empty() {
            let include_src: Vec<&str> = include.iter().map(regex::Regex::as_str).collect();
            let exclude_src: Vec<&str> = exclude.iter().map(regex::Regex::as_str).collect();
            if include_src == exclude_src {
                warnings.push(format!(
                    "--include and --exclude use the same pattern(s) ({}); this likely excludes everything it includes",
                    include_src.join(", ")
                ));
            }
        }

        let cfg = RunConfig {
            namespaces: self.namespace,
            label_selector: self.label_selector,
            include,
            exclude,
            exclude_init: self.exclude_init,
            exclude_ephemeral: self.exclude_ephemeral,
            since_seconds,
            tail_lines: self.tail,
            follow: self.follow,
            max_containers: self.max_containers,
            color_logs: !self.no_color_logs,
            timestamps: self.timestamps,
            verbosity: self.verbose,
            kubeconfig: self.kubeconfig,
        };
        Ok((cfg, warnings))
    }
}

/// `compile_regex_list` takes one comma-separated string; the CLI layer
/// already splits on commas via `value_delimiter`, so each token here is
/// compiled as its own single-pattern list and flattened.
fn compile_many(tokens: &[String]) -> Result<Vec<regex::Regex>, ConfigError> {
    let mut patterns = Vec::new();
    for token in tokens {
        patterns.extend(compile_regex_list(token)?);
    }
    Ok(patterns)
}
