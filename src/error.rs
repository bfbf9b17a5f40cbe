use std::process::ExitCode;

/// Errors detected before any network call is made: bad flags, bad regex,
/// an unknown namespace. Always fatal, always exit 1.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("invalid duration '{0}': expected <integer><s|m|h|d>")]
    InvalidDuration(String),
    #[error("invalid regex pattern '{0}': {1}")]
    InvalidPattern(String, regex::Error),
    #[error("namespace '{0}' does not exist")]
    UnknownNamespace(String),
    #[error("no kubeconfig context is selected and no namespace was given")]
    NoDefaultNamespace,
}

/// Errors from the cluster client that are not specific to one stream:
/// failing to list namespaces/pods, or to load credentials at all.
#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("failed to load kubeconfig: {0}")]
    Kubeconfig(String),
    #[error("failed to reach the cluster: {0}")]
    Connection(String),
    #[error("kubernetes api error: {0}")]
    Api(#[from] kube::Error),
}

/// Per-stream failure kinds. `StreamGone` and `PermissionDenied` are
/// terminal for that one producer; `Interrupted` is retried with backoff.
#[derive(thiserror::Error, Debug)]
pub enum StreamError {
    #[error("stream gone: {0}")]
    StreamGone(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("stream interrupted: {0}")]
    Interrupted(String),
}

impl StreamError {
    /// Classifies a raw `kube::Error` surfaced while reading or opening a
    /// log stream into the three-way taxonomy the producer loop (SPEC_FULL
    /// §4.4) switches on.
    pub fn classify(err: kube::Error) -> StreamError {
        if let kube::Error::Api(resp) = &err {
            return match resp.code {
                404 | 410 => StreamError::StreamGone(resp.message.clone()),
                403 => StreamError::PermissionDenied(resp.message.clone()),
                _ => StreamError::Interrupted(err.to_string()),
            };
        }
        StreamError::Interrupted(err.to_string())
    }
}

/// Top-level error, only ever seen by `main`, which maps it to one of the
/// process exit codes documented in SPEC_FULL.md §6.
#[derive(thiserror::Error, Debug)]
pub enum KuloError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<crate::discovery::ConfigErrorOrClient> for KuloError {
    fn from(err: crate::discovery::ConfigErrorOrClient) -> KuloError {
        match err {
            crate::discovery::ConfigErrorOrClient::Config(err) => KuloError::Config(err),
            crate::discovery::ConfigErrorOrClient::Client(err) => KuloError::Client(err),
        }
    }
}

impl KuloError {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            KuloError::Config(_) => ExitCode::from(1),
            KuloError::Client(ClientError::PermissionDenied(_)) => ExitCode::from(2),
            KuloError::Client(ClientError::Kubeconfig(_)) => ExitCode::from(2),
            KuloError::Client(_) => ExitCode::from(3),
            KuloError::Internal(_) => ExitCode::from(1),
        }
    }
}
