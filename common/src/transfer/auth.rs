// SFTP authentication

use crate::errors::SinkError;
use crate::models::SftpAuth;
use ssh2::Session;
use std::path::Path;
use tracing::{debug, error};

/// Authenticate an SSH session that has completed its handshake
pub fn authenticate_session(sess: &Session, auth: &SftpAuth) -> Result<(), SinkError> {
    match auth {
        SftpAuth::Password { username, password } => {
            debug!(username = %username, "Authenticating with password");
            sess.userauth_password(username, password).map_err(|e| {
                error!(error = %e, username = %username, "Password authentication failed");
                SinkError::AuthenticationFailed(format!(
                    "Password authentication failed for user {}: {}",
                    username, e
                ))
            })?;
        }
        SftpAuth::SshKey {
            username,
            private_key_path,
        } => {
            debug!(username = %username, key_path = %private_key_path, "Authenticating with SSH key");
            sess.userauth_pubkey_file(username, None, Path::new(private_key_path), None)
                .map_err(|e| {
                    error!(
                        error = %e,
                        username = %username,
                        key_path = %private_key_path,
                        "SSH key authentication failed"
                    );
                    SinkError::AuthenticationFailed(format!(
                        "SSH key authentication failed for user {}: {}",
                        username, e
                    ))
                })?;
        }
    }

    if !sess.authenticated() {
        error!("Authentication failed - session not authenticated");
        return Err(SinkError::AuthenticationFailed(
            "Authentication failed".to_string(),
        ));
    }

    Ok(())
}
