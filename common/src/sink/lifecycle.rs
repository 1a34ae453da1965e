// Sink lifecycle: owns the remote session and the run configuration

use crate::config::{BatchSettings, ConnectionSettings};
use crate::errors::{DeliveryError, SinkError};
use crate::models::Status;
use crate::queue::Channel;
use crate::transfer::{Connector, RemoteTransfer, SftpConnector};
use tracing::{info, instrument, warn};

use super::engine::BatchEngine;

/// SFTP sink bound to one upstream channel.
///
/// `start` opens the remote session once; `process` is then invoked
/// repeatedly by the driver; `stop` tears the session down.
pub struct SftpSink<C: Channel, K: Connector = SftpConnector> {
    connection: ConnectionSettings,
    channel: C,
    connector: K,
    session: Option<Box<dyn RemoteTransfer>>,
    engine: BatchEngine,
}

impl<C: Channel> SftpSink<C, SftpConnector> {
    pub fn new(connection: ConnectionSettings, batch: &BatchSettings, channel: C) -> Self {
        Self::with_connector(connection, batch, channel, SftpConnector)
    }
}

impl<C: Channel, K: Connector> SftpSink<C, K> {
    pub fn with_connector(
        connection: ConnectionSettings,
        batch: &BatchSettings,
        channel: C,
        connector: K,
    ) -> Self {
        Self {
            connection,
            channel,
            connector,
            session: None,
            engine: BatchEngine::new(batch),
        }
    }

    /// Connect and authenticate. Failures are fatal and not retried here.
    #[instrument(skip(self), fields(host = %self.connection.host, port = self.connection.port))]
    pub fn start(&mut self) -> Result<(), SinkError> {
        if self.session.is_some() {
            return Ok(());
        }

        let session = self.connector.connect(&self.connection)?;
        self.session = Some(session);
        info!("SFTP sink started");
        Ok(())
    }

    /// Run one delivery attempt against the upstream channel
    pub async fn process(&mut self) -> Result<Status, DeliveryError> {
        let session = self.session.as_deref().ok_or(SinkError::NotStarted)?;
        self.engine.process(&self.channel, session).await
    }

    /// Best-effort disconnect; failures are logged and swallowed
    pub fn stop(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };

        match session.disconnect() {
            Ok(()) => info!("SFTP sink stopped"),
            Err(e) => warn!(error = %e, "Error while disconnecting SFTP session, ignoring"),
        }
    }

    pub fn is_started(&self) -> bool {
        self.session.is_some()
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn engine(&self) -> &BatchEngine {
        &self.engine
    }
}

impl<C: Channel, K: Connector> Drop for SftpSink<C, K> {
    fn drop(&mut self) {
        self.stop();
    }
}
