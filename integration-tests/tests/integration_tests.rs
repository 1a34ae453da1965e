// Integration tests for the SFTP sink
// These tests need a reachable SFTP server, e.g.
//   docker run -p 2222:22 -d atmoz/sftp username:password:::sftpdata
// and are ignored by default. Run with:
//   cargo test --test integration_tests -- --ignored

use common::config::{BatchSettings, ConnectionSettings};
use common::models::{SftpAuth, Status};
use common::queue::MemoryChannel;
use common::sink::{batch_file_name, SftpSink};
use common::transfer::SftpConnection;
use std::io::Read;
use std::path::Path;
use tempfile::TempDir;

const EVENTS_CSV: &str = "events.csv";

/// Helper function to build connection settings from the environment
fn connection_settings() -> ConnectionSettings {
    let host = std::env::var("SFTP_HOST").unwrap_or_else(|_| "localhost".to_string());
    let port = std::env::var("SFTP_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(2222);
    let username = std::env::var("SFTP_USERNAME").unwrap_or_else(|_| "username".to_string());
    let password = std::env::var("SFTP_PASSWORD").unwrap_or_else(|_| "password".to_string());

    ConnectionSettings {
        host,
        port,
        auth: SftpAuth::Password { username, password },
        known_hosts: None,
    }
}

/// Each test writes into its own remote folder below the writable base folder
fn destination_folder(test_name: &str) -> String {
    let base = std::env::var("SFTP_BASE_FOLDER").unwrap_or_else(|_| "sftpdata".to_string());
    let run = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    format!("{}/{}-{}", base, test_name, run)
}

fn sink(
    staging: &TempDir,
    folder: &str,
    roll_count: u64,
) -> SftpSink<MemoryChannel> {
    let batch = BatchSettings {
        destination_folder: folder.to_string(),
        destination_file: EVENTS_CSV.to_string(),
        roll_count,
        staging_dir: staging.path().to_path_buf(),
    };
    SftpSink::new(connection_settings(), &batch, MemoryChannel::default())
}

/// Read a remote file over a separate session; a missing file reads as empty
fn remote_content(path: &str) -> String {
    let connection =
        SftpConnection::connect(&connection_settings()).expect("Failed to connect to SFTP server");
    let sftp = connection
        .session()
        .sftp()
        .expect("Failed to open SFTP channel");

    let mut content = String::new();
    if let Ok(mut file) = sftp.open(Path::new(path)) {
        file.read_to_string(&mut content)
            .expect("Failed to read remote file");
    }
    content
}

fn remote_batch(folder: &str, sequence: u64) -> String {
    format!("{}/{}", folder, batch_file_name(sequence, EVENTS_CSV))
}

#[cfg(test)]
mod integration_tests {
    use super::*;

    #[tokio::test]
    #[ignore]
    async fn test_file_creation() {
        let staging = TempDir::new().unwrap();
        let folder = destination_folder("file-creation");
        let mut sink = sink(&staging, &folder, 1);
        sink.start().expect("Failed to start sink");

        sink.channel().put("first-message").unwrap();
        assert_eq!(sink.process().await.unwrap(), Status::Ready);
        sink.stop();

        assert_eq!(remote_content(&remote_batch(&folder, 0)), "first-message\n");
    }

    #[tokio::test]
    #[ignore]
    async fn test_multiple_file_creation() {
        let staging = TempDir::new().unwrap();
        let folder = destination_folder("multiple-files");
        let mut sink = sink(&staging, &folder, 1);
        sink.start().expect("Failed to start sink");

        sink.channel().put("first-message").unwrap();
        sink.channel().put("second-message").unwrap();
        assert_eq!(sink.process().await.unwrap(), Status::Ready);
        assert_eq!(sink.process().await.unwrap(), Status::Ready);
        sink.stop();

        assert_eq!(remote_content(&remote_batch(&folder, 0)), "first-message\n");
        assert_eq!(remote_content(&remote_batch(&folder, 1)), "second-message\n");
    }

    #[tokio::test]
    #[ignore]
    async fn test_file_creation_with_roll_count() {
        let staging = TempDir::new().unwrap();
        let folder = destination_folder("roll-count");
        let mut sink = sink(&staging, &folder, 2);
        sink.start().expect("Failed to start sink");

        sink.channel().put("first-message").unwrap();
        sink.channel().put("second-message").unwrap();
        assert_eq!(sink.process().await.unwrap(), Status::Ready);
        assert_eq!(sink.process().await.unwrap(), Status::Ready);
        assert_eq!(sink.process().await.unwrap(), Status::Backoff);
        sink.stop();

        assert_eq!(
            remote_content(&remote_batch(&folder, 0)),
            "first-message\nsecond-message\n"
        );
        assert_eq!(remote_content(&remote_batch(&folder, 1)), "");
    }

    #[test]
    #[ignore]
    fn test_wrong_password_is_fatal() {
        let mut settings = connection_settings();
        settings.auth = SftpAuth::Password {
            username: settings.auth.username().to_string(),
            password: "definitely-wrong".to_string(),
        };

        let err = SftpConnection::connect(&settings)
            .err()
            .expect("Authentication should fail");
        assert!(err.is_fatal());
    }
}
