// Local staging of the batch that is currently accumulating

use crate::errors::SinkError;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use tracing::debug;

/// Name of the file holding batch `sequence`, shared by the local staging
/// file and the remote destination.
pub fn batch_file_name(sequence: u64, template: &str) -> String {
    format!("{}_{}", sequence, template)
}

/// Position in the staged file that an aborted append can be rewound to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageMark {
    pub sequence: u64,
    pub len: u64,
}

struct StagingBuffer {
    path: PathBuf,
    writer: BufWriter<File>,
}

/// Owns at most one open staging file at a time
pub struct StagingWriter {
    dir: PathBuf,
    template: String,
    current: Option<StagingBuffer>,
    /// Bytes of the current batch already staged, open or finalized
    staged_len: u64,
}

impl StagingWriter {
    pub fn new(dir: impl Into<PathBuf>, template: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            template: template.into(),
            current: None,
            staged_len: 0,
        }
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn file_name(&self, sequence: u64) -> String {
        batch_file_name(sequence, &self.template)
    }

    pub fn path_for(&self, sequence: u64) -> PathBuf {
        self.dir.join(self.file_name(sequence))
    }

    pub fn is_open(&self) -> bool {
        self.current.is_some()
    }

    pub fn mark(&self, sequence: u64) -> StageMark {
        StageMark {
            sequence,
            len: self.staged_len,
        }
    }

    /// Append `line` and a newline to the staging file of batch `sequence`,
    /// opening it first if no buffer is open.
    ///
    /// Opening trims the file to the bytes already staged for the batch: the
    /// first record of a batch truncates any stale file with the same name,
    /// and bytes left behind by an incomplete rewind are discarded.
    pub fn append(&mut self, sequence: u64, line: &str) -> Result<(), SinkError> {
        let buffer = match self.current.take() {
            Some(buffer) => self.current.insert(buffer),
            None => {
                let buffer = self.open_buffer(sequence)?;
                self.current.insert(buffer)
            }
        };

        buffer
            .writer
            .write_all(line.as_bytes())
            .and_then(|_| buffer.writer.write_all(b"\n"))
            // Each staged record reaches the file before its transaction commits
            .and_then(|_| buffer.writer.flush())
            .map_err(|e| SinkError::local_io(&buffer.path, e))?;

        self.staged_len += line.len() as u64 + 1;
        Ok(())
    }

    fn open_buffer(&self, sequence: u64) -> Result<StagingBuffer, SinkError> {
        let path = self.path_for(sequence);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| SinkError::local_io(&path, e))?;

        if self.staged_len == 0 {
            debug!(path = %path.display(), "Creating new staging file");
        } else {
            debug!(path = %path.display(), staged_len = self.staged_len, "Reopening staging file");
        }
        file.set_len(self.staged_len)
            .map_err(|e| SinkError::local_io(&path, e))?;

        Ok(StagingBuffer {
            path,
            writer: BufWriter::new(file),
        })
    }

    /// Flush and close the open staging file.
    ///
    /// The handle is released even when the flush fails.
    pub fn finalize_current(&mut self) -> Result<(), SinkError> {
        let Some(mut buffer) = self.current.take() else {
            return Ok(());
        };

        buffer
            .writer
            .flush()
            .map_err(|e| SinkError::local_io(&buffer.path, e))?;

        debug!(path = %buffer.path.display(), bytes = self.staged_len, "Staging file finalized");
        Ok(())
    }

    /// Drop everything written after `mark`, leaving the file closed.
    ///
    /// The staged length is restored even when truncating fails; the next
    /// append then trims the file before writing.
    pub fn rewind(&mut self, mark: StageMark) -> Result<(), SinkError> {
        let path = self.path_for(mark.sequence);

        if let Some(mut buffer) = self.current.take() {
            // Bytes past the mark are truncated below
            let _ = buffer.writer.flush();
        }
        self.staged_len = mark.len;

        if path.exists() {
            OpenOptions::new()
                .write(true)
                .open(&path)
                .and_then(|file| file.set_len(mark.len))
                .map_err(|e| SinkError::local_io(&path, e))?;
        }

        debug!(path = %path.display(), len = mark.len, "Staging file rewound");
        Ok(())
    }

    /// Forget the delivered batch so the next append starts a fresh file
    pub fn reset(&mut self) {
        self.current = None;
        self.staged_len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_names_are_pure() {
        let writer = StagingWriter::new("/tmp", "events.csv");
        assert_eq!(writer.file_name(0), "0_events.csv");
        assert_eq!(writer.file_name(0), writer.file_name(0));
        assert_eq!(writer.path_for(7), PathBuf::from("/tmp/7_events.csv"));
    }

    #[test]
    fn test_append_is_lazy_and_newline_terminated() {
        let dir = TempDir::new().unwrap();
        let mut writer = StagingWriter::new(dir.path(), "events.csv");
        assert!(!writer.is_open());
        assert!(!writer.path_for(0).exists());

        writer.append(0, "first-message").unwrap();
        writer.append(0, "second-message").unwrap();
        assert!(writer.is_open());
        writer.finalize_current().unwrap();
        assert!(!writer.is_open());

        let content = std::fs::read_to_string(writer.path_for(0)).unwrap();
        assert_eq!(content, "first-message\nsecond-message\n");
    }

    #[test]
    fn test_new_batch_truncates_stale_file() {
        let dir = TempDir::new().unwrap();
        let mut writer = StagingWriter::new(dir.path(), "events.csv");
        std::fs::write(writer.path_for(0), "stale\n").unwrap();

        writer.append(0, "fresh").unwrap();
        writer.finalize_current().unwrap();

        let content = std::fs::read_to_string(writer.path_for(0)).unwrap();
        assert_eq!(content, "fresh\n");
    }

    #[test]
    fn test_rewind_after_finalize_reopens_same_file() {
        let dir = TempDir::new().unwrap();
        let mut writer = StagingWriter::new(dir.path(), "events.csv");

        writer.append(0, "a").unwrap();
        let mark = writer.mark(0);
        writer.append(0, "b").unwrap();
        writer.finalize_current().unwrap();

        writer.rewind(mark).unwrap();
        assert_eq!(std::fs::read_to_string(writer.path_for(0)).unwrap(), "a\n");

        writer.append(0, "b").unwrap();
        writer.finalize_current().unwrap();
        assert_eq!(
            std::fs::read_to_string(writer.path_for(0)).unwrap(),
            "a\nb\n"
        );
    }

    #[test]
    fn test_rewind_of_open_buffer_discards_pending_bytes() {
        let dir = TempDir::new().unwrap();
        let mut writer = StagingWriter::new(dir.path(), "events.csv");

        let mark = writer.mark(0);
        writer.append(0, "only").unwrap();
        writer.rewind(mark).unwrap();
        assert!(!writer.is_open());

        writer.append(0, "again").unwrap();
        writer.finalize_current().unwrap();
        assert_eq!(
            std::fs::read_to_string(writer.path_for(0)).unwrap(),
            "again\n"
        );
    }

    #[test]
    fn test_failed_rewind_still_drops_aborted_record() {
        let dir = TempDir::new().unwrap();
        let mut writer = StagingWriter::new(dir.path(), "events.csv");
        let path = writer.path_for(0);

        writer.append(0, "a").unwrap();
        let mark = writer.mark(0);
        writer.append(0, "b").unwrap();
        writer.finalize_current().unwrap();

        // A directory in place of the staging file makes truncation fail
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();
        let err = writer.rewind(mark).unwrap_err();
        assert_eq!(err.reason(), "local_io");
        assert_eq!(writer.mark(0), mark);

        // The untruncated bytes are still on disk when the record comes back
        std::fs::remove_dir(&path).unwrap();
        std::fs::write(&path, "a\nb\n").unwrap();

        writer.append(0, "b").unwrap();
        writer.finalize_current().unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a\nb\n");
    }

    #[test]
    fn test_reopen_trims_bytes_past_staged_length() {
        let dir = TempDir::new().unwrap();
        let mut writer = StagingWriter::new(dir.path(), "events.csv");

        writer.append(0, "a").unwrap();
        writer.finalize_current().unwrap();
        let mut file = OpenOptions::new()
            .append(true)
            .open(writer.path_for(0))
            .unwrap();
        file.write_all(b"junk\n").unwrap();
        drop(file);

        writer.append(0, "b").unwrap();
        writer.finalize_current().unwrap();
        assert_eq!(
            std::fs::read_to_string(writer.path_for(0)).unwrap(),
            "a\nb\n"
        );
    }

    #[test]
    fn test_reset_starts_next_batch_fresh() {
        let dir = TempDir::new().unwrap();
        let mut writer = StagingWriter::new(dir.path(), "events.csv");

        writer.append(0, "a").unwrap();
        writer.finalize_current().unwrap();
        writer.reset();

        assert_eq!(writer.mark(1).len, 0);
        writer.append(1, "b").unwrap();
        writer.finalize_current().unwrap();
        assert_eq!(std::fs::read_to_string(writer.path_for(1)).unwrap(), "b\n");
        assert_eq!(std::fs::read_to_string(writer.path_for(0)).unwrap(), "a\n");
    }

    #[test]
    fn test_append_to_missing_directory_fails() {
        let dir = TempDir::new().unwrap();
        let mut writer = StagingWriter::new(dir.path().join("missing"), "events.csv");

        let err = writer.append(0, "a").unwrap_err();
        assert_eq!(err.reason(), "local_io");
        assert!(!writer.is_open());
    }
}
