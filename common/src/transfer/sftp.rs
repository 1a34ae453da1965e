// SFTP session operations (probe, mkdir, upload)

use crate::config::ConnectionSettings;
use crate::errors::SinkError;
use crate::models::DirProbe;
use ssh2::{ErrorCode, Sftp};
use std::fs::File;
use std::io;
use std::path::Path;
use tracing::{debug, error, info, instrument};

use super::connection::SftpConnection;
use super::{Connector, RemoteTransfer};

/// SFTP status code for a missing path
const SSH_FX_NO_SUCH_FILE: i32 = 2;

/// Connects over SSH and opens the SFTP subsystem
#[derive(Debug, Default, Clone, Copy)]
pub struct SftpConnector;

impl Connector for SftpConnector {
    fn connect(&self, settings: &ConnectionSettings) -> Result<Box<dyn RemoteTransfer>, SinkError> {
        Ok(Box::new(SftpTransfer::open(settings)?))
    }
}

/// SFTP channel on top of an authenticated SSH session
pub struct SftpTransfer {
    sftp: Option<Sftp>,
    connection: SftpConnection,
}

impl SftpTransfer {
    pub fn open(settings: &ConnectionSettings) -> Result<Self, SinkError> {
        let connection = SftpConnection::connect(settings)?;

        let sftp = connection.session().sftp().map_err(|e| {
            error!(error = %e, "Failed to open SFTP channel");
            SinkError::ConnectionFailed(format!("Failed to open SFTP channel: {}", e))
        })?;

        Ok(Self {
            sftp: Some(sftp),
            connection,
        })
    }

    fn channel(&self) -> Result<&Sftp, String> {
        self.sftp
            .as_ref()
            .ok_or_else(|| "SFTP channel is closed".to_string())
    }
}

impl RemoteTransfer for SftpTransfer {
    fn probe(&self, path: &str) -> DirProbe {
        let Ok(sftp) = self.channel() else {
            return DirProbe::Indeterminate;
        };

        match sftp.stat(Path::new(path)) {
            Ok(_) => DirProbe::Exists,
            Err(e) if e.code() == ErrorCode::SFTP(SSH_FX_NO_SUCH_FILE) => DirProbe::Absent,
            Err(e) => {
                debug!(error = %e, path = %path, "Remote directory probe failed");
                DirProbe::Indeterminate
            }
        }
    }

    fn mkdir(&self, path: &str) -> Result<(), SinkError> {
        let remote_dir_error = |reason: String| SinkError::RemoteDirectory {
            path: path.to_string(),
            reason,
        };

        info!(path = %path, "Creating remote directory");
        self.channel()
            .map_err(remote_dir_error)?
            .mkdir(Path::new(path), 0o755)
            .map_err(|e| {
                error!(error = %e, path = %path, "Failed to create remote directory");
                remote_dir_error(e.to_string())
            })
    }

    #[instrument(skip(self), fields(local = %local_file.display()))]
    fn upload(&self, local_file: &Path, remote_path: &str) -> Result<(), SinkError> {
        let upload_error = |reason: String| SinkError::RemoteUpload {
            local: local_file.to_path_buf(),
            remote: remote_path.to_string(),
            reason,
        };

        let sftp = self.channel().map_err(upload_error)?;

        let mut local = File::open(local_file).map_err(|e| SinkError::local_io(local_file, e))?;

        let mut remote_file = sftp.create(Path::new(remote_path)).map_err(|e| {
            error!(error = %e, remote_path = %remote_path, "Failed to create remote file");
            upload_error(format!("Failed to create remote file: {}", e))
        })?;

        let bytes = io::copy(&mut local, &mut remote_file).map_err(|e| {
            error!(error = %e, remote_path = %remote_path, "Failed to write file");
            upload_error(format!("Failed to write file: {}", e))
        })?;

        info!(remote_path = %remote_path, size = bytes, "File uploaded successfully");
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), SinkError> {
        // Dropping the handle closes the SFTP channel before the session goes away
        drop(self.sftp.take());

        self.connection
            .session()
            .disconnect(None, "sftp sink shutting down", None)
            .map_err(|e| SinkError::ConnectionFailed(format!("Failed to disconnect: {}", e)))
    }
}
