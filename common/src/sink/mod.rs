// SFTP sink: staging writer, batch engine and lifecycle controller

pub mod engine;
pub mod lifecycle;
pub mod staging;

pub use engine::BatchEngine;
pub use lifecycle::SftpSink;
pub use staging::{batch_file_name, StageMark, StagingWriter};
