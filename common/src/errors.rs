// Error handling framework for the SFTP sink

use std::path::PathBuf;
use thiserror::Error;

/// Sink errors raised while connecting, staging or transferring batches
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("SFTP connection failed: {0}")]
    ConnectionFailed(String),

    #[error("SFTP authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Host key rejected for {host}:{port}: {reason}")]
    HostKeyRejected {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("Local staging I/O failed for {}: {source}", path.display())]
    LocalIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create remote directory over SFTP: {path}: {reason}")]
    RemoteDirectory { path: String, reason: String },

    #[error("Failed to transfer file {} to {remote} over SFTP: {reason}", local.display())]
    RemoteUpload {
        local: PathBuf,
        remote: String,
        reason: String,
    },

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Sink has not been started")]
    NotStarted,
}

impl SinkError {
    /// Startup-class failures; the process cannot proceed without a session
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SinkError::ConnectionFailed(_)
                | SinkError::AuthenticationFailed(_)
                | SinkError::HostKeyRejected { .. }
        )
    }

    /// Short label used for metrics and structured logs
    pub fn reason(&self) -> &'static str {
        match self {
            SinkError::ConnectionFailed(_) => "connection",
            SinkError::AuthenticationFailed(_) => "authentication",
            SinkError::HostKeyRejected { .. } => "host_key",
            SinkError::LocalIo { .. } => "local_io",
            SinkError::RemoteDirectory { .. } => "remote_directory",
            SinkError::RemoteUpload { .. } => "remote_upload",
            SinkError::Queue(_) => "queue",
            SinkError::NotStarted => "not_started",
        }
    }

    pub(crate) fn local_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SinkError::LocalIo {
            path: path.into(),
            source,
        }
    }
}

/// Upstream queue errors
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Failed to connect to queue: {0}")]
    Connection(String),

    #[error("Failed to create stream: {0}")]
    StreamCreation(String),

    #[error("Failed to create consumer: {0}")]
    ConsumerCreation(String),

    #[error("Failed to consume message: {0}")]
    ConsumeFailed(String),

    #[error("Failed to acknowledge message: {0}")]
    AckFailed(String),

    #[error("Queue is full (capacity {0})")]
    Full(usize),

    #[error("Transaction already closed")]
    TransactionClosed,
}

/// Returned by a sink invocation that was aborted and rolled back.
///
/// The caller should back off before invoking the sink again; any record taken
/// during the aborted invocation has been returned to the upstream queue.
#[derive(Error, Debug)]
#[error("Event delivery failed: {0}")]
pub struct DeliveryError(#[source] pub SinkError);

impl From<SinkError> for DeliveryError {
    fn from(err: SinkError) -> Self {
        DeliveryError(err)
    }
}

impl DeliveryError {
    pub fn cause(&self) -> &SinkError {
        &self.0
    }
}
