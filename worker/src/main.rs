// Worker binary entry point: drives the SFTP sink until shutdown

use anyhow::Result;
use common::config::{QueueKind, Settings};
use common::models::Status;
use common::queue::{Channel, MemoryChannel, NatsChannel, NatsClient};
use common::sink::SftpSink;
use common::telemetry;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Set once Ctrl+C is received; checked between sink invocations
#[derive(Clone)]
struct Shutdown {
    requested: Arc<watch::Sender<bool>>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self {
            requested: Arc::new(watch::Sender::new(false)),
        }
    }
}

impl Shutdown {
    fn trigger(&self) {
        self.requested.send_replace(true);
    }

    fn requested(&self) -> bool {
        *self.requested.borrow()
    }

    /// Sleep for `duration` unless shutdown is requested first, including
    /// a request that arrived before the call
    async fn sleep(&self, duration: Duration) {
        let mut requested = self.requested.subscribe();
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = requested.wait_for(|stop| *stop) => {}
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load()
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    settings
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    telemetry::init_logging(
        &settings.observability.log_level,
        settings.observability.tracing_endpoint.as_deref(),
        &settings.destination_uri(),
    )?;

    info!("Starting SFTP sink worker");

    if let Some(port) = settings.observability.metrics_port {
        telemetry::init_metrics(port)?;
    }

    let shutdown = Shutdown::default();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match signal::ctrl_c().await {
                Ok(()) => info!("Shutdown signal received, finishing current invocation"),
                Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
            }
            shutdown.trigger();
        });
    }

    let result = match settings.queue.kind {
        QueueKind::Memory => {
            let channel = MemoryChannel::new(settings.queue.capacity);
            info!(capacity = channel.capacity(), "Reading records from stdin");
            tokio::spawn(feed_from_stdin(channel.clone(), shutdown.clone()));
            run(&settings, channel, &shutdown).await
        }
        QueueKind::Nats => {
            let client = NatsClient::new(settings.queue.nats.clone()).await?;
            let channel = NatsChannel::connect(
                &client,
                Duration::from_millis(settings.queue.fetch_expiry_ms),
            )
            .await?;
            info!(stream = %client.config().stream_name, "NATS channel ready");
            run(&settings, channel, &shutdown).await
        }
    };

    if settings.observability.tracing_endpoint.is_some() {
        telemetry::shutdown_tracer();
    }

    info!("Worker shutdown complete");
    result
}

/// Drive the sink: call again on Ready, back off on Backoff or failure
async fn run<C: Channel>(settings: &Settings, channel: C, shutdown: &Shutdown) -> Result<()> {
    let mut sink = SftpSink::new(settings.connection(), &settings.batch(), channel);

    sink.start().map_err(|e| {
        error!(error = %e, "Failed to establish SFTP session");
        anyhow::anyhow!("SFTP connection error: {}", e)
    })?;

    let backoff = Duration::from_millis(settings.worker.backoff_ms);

    while !shutdown.requested() {
        match sink.process().await {
            Ok(Status::Ready) => {}
            Ok(Status::Backoff) => shutdown.sleep(backoff).await,
            Err(e) => {
                warn!(error = %e, "Delivery attempt failed, backing off");
                shutdown.sleep(backoff).await;
            }
        }
    }

    sink.stop();
    Ok(())
}

/// Read stdin line by line into the in-memory channel
async fn feed_from_stdin(channel: MemoryChannel, shutdown: Shutdown) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("Input stream closed");
                return;
            }
            Err(e) => {
                error!(error = %e, "Failed to read input");
                return;
            }
        };

        while let Err(e) = channel.put(line.as_str()) {
            if shutdown.requested() {
                return;
            }
            warn!(error = %e, "Channel full, waiting");
            shutdown.sleep(Duration::from_millis(50)).await;
        }
    }
}
