// SFTP sink library: drains records from an upstream queue into batches
// that are shipped to a remote server over SFTP

pub mod config;
pub mod errors;
pub mod models;
pub mod queue;
pub mod sink;
pub mod telemetry;
pub mod transfer;
