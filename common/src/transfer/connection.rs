// SFTP connection management

use crate::config::ConnectionSettings;
use crate::errors::SinkError;
use ssh2::{CheckResult, KnownHostFileKind, Session};
use std::net::TcpStream;
use std::path::Path;
use tracing::{debug, error, info, instrument};

use super::auth::authenticate_session;

/// Authenticated SSH session
pub struct SftpConnection {
    session: Session,
    _tcp: TcpStream,
}

impl SftpConnection {
    /// Establish an authenticated SSH session.
    ///
    /// The host key is checked against the known hosts file when one is
    /// configured; otherwise strict host key checking is off.
    #[instrument(skip(settings), fields(host = %settings.host, port = %settings.port, username = %settings.auth.username()))]
    pub fn connect(settings: &ConnectionSettings) -> Result<Self, SinkError> {
        let host = settings.host.as_str();
        let port = settings.port;

        info!(
            known_hosts = ?settings.known_hosts,
            "Attempting to connect to SFTP server"
        );

        let tcp = TcpStream::connect((host, port)).map_err(|e| {
            error!(error = %e, host = %host, port = %port, "Failed to connect");
            SinkError::ConnectionFailed(format!("Failed to connect to {}:{}: {}", host, port, e))
        })?;

        let mut sess = Session::new().map_err(|e| {
            error!(error = %e, "Failed to create SSH session");
            SinkError::ConnectionFailed(format!("Failed to create SSH session: {}", e))
        })?;

        sess.set_tcp_stream(tcp.try_clone().map_err(|e| {
            SinkError::ConnectionFailed(format!("Failed to clone TCP stream: {}", e))
        })?);

        sess.handshake().map_err(|e| {
            error!(error = %e, "SSH handshake failed");
            SinkError::ConnectionFailed(format!("SSH handshake failed: {}", e))
        })?;

        match &settings.known_hosts {
            Some(path) => verify_known_host(&sess, host, port, path)?,
            None => {
                info!("Known hosts path is not set, strict host key checking is turned off");
                log_host_key(&sess);
            }
        }

        authenticate_session(&sess, &settings.auth)?;

        info!("Finished connecting to SSH server");
        Ok(Self {
            session: sess,
            _tcp: tcp,
        })
    }

    /// Get reference to SSH session
    pub fn session(&self) -> &Session {
        &self.session
    }
}

fn verify_known_host(sess: &Session, host: &str, port: u16, path: &Path) -> Result<(), SinkError> {
    let rejected = |reason: String| SinkError::HostKeyRejected {
        host: host.to_string(),
        port,
        reason,
    };

    let mut known_hosts = sess
        .known_hosts()
        .map_err(|e| rejected(format!("Failed to initialise known hosts: {}", e)))?;
    known_hosts
        .read_file(path, KnownHostFileKind::OpenSSH)
        .map_err(|e| rejected(format!("Failed to read {}: {}", path.display(), e)))?;

    let (key, _key_type) = sess
        .host_key()
        .ok_or_else(|| rejected("Server did not present a host key".to_string()))?;

    match known_hosts.check_port(host, port, key) {
        CheckResult::Match => {
            debug!(known_hosts = %path.display(), "Host key matched");
            Ok(())
        }
        CheckResult::NotFound => Err(rejected(format!(
            "Host not present in {}",
            path.display()
        ))),
        CheckResult::Mismatch => Err(rejected("Host key mismatch".to_string())),
        CheckResult::Failure => Err(rejected("Host key check failed".to_string())),
    }
}

fn log_host_key(sess: &Session) {
    if let Some((_host_key_bytes, host_key_type)) = sess.host_key() {
        if let Some(hash_bytes) = sess.host_key_hash(ssh2::HashType::Sha256) {
            let hash_hex = hash_bytes
                .iter()
                .map(|b| format!("{:02x}", b))
                .collect::<Vec<_>>()
                .join(":");
            info!(host_key_type = ?host_key_type, hash = %hash_hex, "Accepting unverified host key");
        }
    }
}
