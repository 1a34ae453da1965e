// Remote transfer session abstraction and its SFTP implementation

mod auth;
mod connection;
mod sftp;

pub use auth::authenticate_session;
pub use connection::SftpConnection;
pub use sftp::{SftpConnector, SftpTransfer};

use crate::config::ConnectionSettings;
use crate::errors::SinkError;
use crate::models::DirProbe;
use std::path::Path;

/// An established remote file-transfer session.
///
/// All operations block until the remote side answers; there is no internal
/// timeout.
#[cfg_attr(test, mockall::automock)]
pub trait RemoteTransfer: Send {
    /// Check whether a remote directory exists
    fn probe(&self, path: &str) -> DirProbe;

    /// Create a single remote directory
    fn mkdir(&self, path: &str) -> Result<(), SinkError>;

    /// Write the local file to `remote_path`, replacing any existing file
    fn upload(&self, local_file: &Path, remote_path: &str) -> Result<(), SinkError>;

    /// Tear down the transfer channel and the underlying session
    fn disconnect(&mut self) -> Result<(), SinkError>;
}

/// Opens [`RemoteTransfer`] sessions
pub trait Connector: Send + Sync {
    fn connect(&self, settings: &ConnectionSettings) -> Result<Box<dyn RemoteTransfer>, SinkError>;
}

/// Ensure `path` exists on the remote side, creating it when the probe does
/// not positively report it.
pub fn ensure_remote_dir(remote: &dyn RemoteTransfer, path: &str) -> Result<(), SinkError> {
    match remote.probe(path) {
        DirProbe::Exists => Ok(()),
        DirProbe::Absent | DirProbe::Indeterminate => remote.mkdir(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;

    #[test]
    fn test_existing_directory_is_not_created() {
        let mut remote = MockRemoteTransfer::new();
        remote.expect_probe().return_const(DirProbe::Exists);
        remote.expect_mkdir().never();

        assert!(ensure_remote_dir(&remote, "sftpdata").is_ok());
    }

    #[test]
    fn test_indeterminate_probe_attempts_creation() {
        let mut remote = MockRemoteTransfer::new();
        remote.expect_probe().return_const(DirProbe::Indeterminate);
        remote
            .expect_mkdir()
            .with(eq("sftpdata"))
            .times(1)
            .returning(|_| Ok(()));

        assert!(ensure_remote_dir(&remote, "sftpdata").is_ok());
    }

    #[test]
    fn test_creation_failure_is_propagated() {
        let mut remote = MockRemoteTransfer::new();
        remote.expect_probe().return_const(DirProbe::Absent);
        remote.expect_mkdir().returning(|path| {
            Err(SinkError::RemoteDirectory {
                path: path.to_string(),
                reason: "permission denied".to_string(),
            })
        });

        let err = ensure_remote_dir(&remote, "sftpdata").unwrap_err();
        assert_eq!(err.reason(), "remote_directory");
    }
}
