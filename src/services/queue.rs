//! AMQP queue connector
//!
//! Owns the broker connection and channel lifecycle. The broker is a
//! mandatory dependency with no degraded mode, so connection failures
//! retry forever at a fixed interval and never surface to the caller.
//!
//! Reconnect state machine: Disconnected -> Connecting -> Connected.
//! Any connection or channel error drops back to Disconnected and the
//! channel is re-declared from scratch on the next cycle.

use crate::config::AmqpConfig;
use crate::error::Result;
use crate::metrics;
use crate::services::worker::PhotoWorker;
use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{Channel, Connection, ConnectionProperties};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Fixed delay between data-plane reconnect attempts
const RECONNECT_DELAY: Duration = Duration::from_secs(7);
/// Fixed delay between queue-declaration retries on a live connection
const DECLARE_RETRY_DELAY: Duration = Duration::from_millis(100);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ConnectorState {
    Disconnected,
    Connecting,
    Connected,
}

/// AMQP consumer driving the photo worker
pub struct QueueConnector {
    config: AmqpConfig,
    worker: Arc<PhotoWorker>,
    shutdown_rx: watch::Receiver<bool>,
    state: ConnectorState,
}

impl QueueConnector {
    pub fn new(
        config: AmqpConfig,
        worker: Arc<PhotoWorker>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            config,
            worker,
            shutdown_rx,
            state: ConnectorState::Disconnected,
        }
    }

    /// Wait out the retry delay, returning early on shutdown
    async fn sleep_or_shutdown(&mut self, delay: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = self.shutdown_rx.changed() => {}
        }
    }

    fn set_state(&mut self, next: ConnectorState) {
        debug!(from = ?self.state, to = ?next, "Connector state transition");
        self.state = next;
    }

    /// Run the connect/consume loop until shutdown.
    ///
    /// Blocks (asynchronously) through broker outages; the only way out
    /// is the shutdown signal.
    pub async fn run(&mut self) -> Result<()> {
        loop {
            if *self.shutdown_rx.borrow() {
                break;
            }

            self.set_state(ConnectorState::Connecting);
            info!(url = %self.config.url, "Connecting to AMQP broker");

            let connection =
                match Connection::connect(&self.config.url, ConnectionProperties::default()).await
                {
                    Ok(connection) => connection,
                    Err(e) => {
                        error!(error = %e, "AMQP connection failed, retrying");
                        self.set_state(ConnectorState::Disconnected);
                        self.sleep_or_shutdown(RECONNECT_DELAY).await;
                        continue;
                    }
                };

            let channel = match self.open_channel(&connection).await {
                Ok(channel) => channel,
                Err(e) => {
                    error!(error = %e, "AMQP channel setup failed, reconnecting");
                    self.set_state(ConnectorState::Disconnected);
                    self.sleep_or_shutdown(RECONNECT_DELAY).await;
                    continue;
                }
            };

            self.set_state(ConnectorState::Connected);
            info!(queue = %self.config.queue, prefetch = self.config.prefetch_count, "AMQP connected, consuming");

            if let Err(e) = self.consume(&channel).await {
                warn!(error = %e, "AMQP consumer stopped");
            }

            self.set_state(ConnectorState::Disconnected);
            if *self.shutdown_rx.borrow() {
                break;
            }
            warn!("AMQP connection lost, reconnecting");
            self.sleep_or_shutdown(RECONNECT_DELAY).await;
        }

        info!("Queue connector stopped");
        Ok(())
    }

    /// Open a channel and provision the queue topology.
    ///
    /// Declaration is retried at a short fixed interval while the
    /// connection stays up; a dead connection aborts to a full
    /// reconnect cycle.
    async fn open_channel(&self, connection: &Connection) -> Result<Channel> {
        let channel = connection.create_channel().await?;
        channel
            .basic_qos(self.config.prefetch_count, BasicQosOptions::default())
            .await?;

        loop {
            match self.declare_topology(&channel).await {
                Ok(()) => return Ok(channel),
                Err(e) if connection.status().connected() => {
                    warn!(error = %e, "Queue declaration failed, retrying");
                    tokio::time::sleep(DECLARE_RETRY_DELAY).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Declare the durable work queue and its dead-letter queue.
    ///
    /// Fatally failed messages are rejected without requeue and routed
    /// through the default exchange to the dead queue.
    async fn declare_topology(&self, channel: &Channel) -> Result<()> {
        let durable = QueueDeclareOptions {
            durable: true,
            ..Default::default()
        };

        channel
            .queue_declare(&self.config.dead_queue, durable, FieldTable::default())
            .await?;

        let mut args = FieldTable::default();
        args.insert(
            "x-dead-letter-exchange".into(),
            AMQPValue::LongString("".into()),
        );
        args.insert(
            "x-dead-letter-routing-key".into(),
            AMQPValue::LongString(self.config.dead_queue.as_str().into()),
        );
        channel
            .queue_declare(&self.config.queue, durable, args)
            .await?;

        Ok(())
    }

    /// Consume deliveries until the stream ends, errors, or shutdown
    async fn consume(&mut self, channel: &Channel) -> Result<()> {
        let mut consumer = channel
            .basic_consume(
                &self.config.queue,
                "photo-worker",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        loop {
            tokio::select! {
                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping consumer");
                        return Ok(());
                    }
                }
                delivery = consumer.next() => {
                    match delivery {
                        Some(Ok(delivery)) => self.handle_delivery(delivery).await?,
                        Some(Err(e)) => return Err(e.into()),
                        None => {
                            warn!("Consumer stream ended");
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    /// Process one delivery and settle it with the broker.
    ///
    /// Acknowledged only after the pipeline future resolves, so a crash
    /// mid-pipeline leaves the message unacked for redelivery. Fatal
    /// errors requeue once when retrying could help, then dead-letter;
    /// unfixable ones (missing original, corrupt bytes) dead-letter
    /// immediately.
    async fn handle_delivery(&self, delivery: Delivery) -> Result<()> {
        let photo_id = match std::str::from_utf8(&delivery.data) {
            Ok(body) => body.trim().to_string(),
            Err(e) => {
                warn!(error = %e, "Non-UTF8 message body, dead-lettering");
                metrics::PHOTOS_DEAD_LETTERED.inc();
                delivery.nack(nack_options(false)).await?;
                return Ok(());
            }
        };

        debug!(photo_id = %photo_id, redelivered = delivery.redelivered, "Received photo message");

        match self.worker.process_photo(&photo_id).await {
            Ok(outcome) => {
                if !outcome.is_clean() {
                    let failed: Vec<&str> =
                        outcome.failed.iter().map(|(l, _)| l.as_str()).collect();
                    warn!(photo_id = %photo_id, failed = ?failed, "Photo processed with per-size failures");
                }
                delivery.ack(BasicAckOptions::default()).await?;
            }
            Err(e) if e.is_retryable() && !delivery.redelivered => {
                warn!(photo_id = %photo_id, error = %e, "Processing failed, requeueing");
                delivery.nack(nack_options(true)).await?;
            }
            Err(e) => {
                error!(photo_id = %photo_id, error = %e, "Processing failed fatally, dead-lettering");
                metrics::PHOTOS_DEAD_LETTERED.inc();
                delivery.nack(nack_options(false)).await?;
            }
        }

        Ok(())
    }
}

fn nack_options(requeue: bool) -> BasicNackOptions {
    BasicNackOptions {
        requeue,
        ..Default::default()
    }
}
