// Data models shared by the queue, transfer and sink modules

use serde::{Deserialize, Serialize};

/// Record is an opaque payload drained from the upstream queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub body: Vec<u8>,
}

impl Record {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self { body: body.into() }
    }

    /// Body decoded as UTF-8, replacing invalid sequences
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

impl From<&str> for Record {
    fn from(value: &str) -> Self {
        Record::new(value.as_bytes())
    }
}

impl From<String> for Record {
    fn from(value: String) -> Self {
        Record::new(value.into_bytes())
    }
}

impl From<Vec<u8>> for Record {
    fn from(value: Vec<u8>) -> Self {
        Record::new(value)
    }
}

/// Status reported by one sink invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// A record was consumed; call again immediately
    Ready,
    /// No work was available or the attempt failed; wait before retrying
    Backoff,
}

/// SftpAuth represents SFTP authentication methods
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SftpAuth {
    Password {
        username: String,
        password: String,
    },
    SshKey {
        username: String,
        private_key_path: String,
    },
}

impl SftpAuth {
    pub fn username(&self) -> &str {
        match self {
            SftpAuth::Password { username, .. } | SftpAuth::SshKey { username, .. } => username,
        }
    }
}

/// Result of probing a remote directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirProbe {
    Exists,
    Absent,
    /// The probe failed for a reason other than a missing path
    Indeterminate,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_text_is_lossy() {
        let record = Record::new(vec![b'o', b'k', 0xff]);
        assert_eq!(record.text(), "ok\u{fffd}");
        assert_eq!(Record::from("first-message").text(), "first-message");
    }

    #[test]
    fn test_sftp_auth_serialization_is_tagged() {
        let auth = SftpAuth::SshKey {
            username: "ingest".to_string(),
            private_key_path: "/home/ingest/.ssh/id_rsa".to_string(),
        };
        let json = serde_json::to_value(&auth).unwrap();
        assert_eq!(json["type"], "ssh_key");
        assert_eq!(auth.username(), "ingest");
    }
}
