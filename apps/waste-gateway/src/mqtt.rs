use anyhow::{anyhow, Context, Result};
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, Outgoing, QoS};
use std::future::Future;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration};
use waste_core::config::BusConfig;

const EVENTLOOP_CAPACITY: usize = 64;
const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("mqtt publish failed: {0}")]
    Client(String),
}

/// Sink for relayed records. Implementations must tolerate concurrent use.
pub trait Publisher: Send + Sync {
    fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<(), PublishError>> + Send;
}

/// Long-lived broker session; the event loop is driven by a background poller.
pub struct MqttPublisher {
    client: AsyncClient,
    poller: JoinHandle<()>,
}

/// Connects and waits for the first CONNACK. Any failure before it is
/// returned to the caller; later drops are retried by the poller.
pub async fn connect(bus: &BusConfig, connect_timeout: Duration) -> Result<MqttPublisher> {
    let (client, mut eventloop) = AsyncClient::new(bus.mqtt_options(), EVENTLOOP_CAPACITY);

    timeout(connect_timeout, wait_for_connack(&mut eventloop))
        .await
        .map_err(|_| {
            anyhow!(
                "no CONNACK from {}:{} within {:?}",
                bus.host,
                bus.port,
                connect_timeout
            )
        })?
        .with_context(|| format!("failed to connect to MQTT broker {}:{}", bus.host, bus.port))?;

    tracing::info!(host=%bus.host, port=bus.port, client_id=%bus.client_id, "MQTT connected");
    let poller = spawn_poller(eventloop);
    Ok(MqttPublisher { client, poller })
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<()> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Incoming::ConnAck(_))) => return Ok(()),
            Ok(_) => {}
            Err(err) => return Err(err.into()),
        }
    }
}

fn spawn_poller(mut eventloop: EventLoop) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    tracing::info!("MQTT reconnected");
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    tracing::debug!("MQTT disconnect sent");
                    break;
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(error=%err, "MQTT connection dropped; reconnecting");
                    sleep(RECONNECT_BACKOFF).await;
                }
            }
        }
    })
}

impl MqttPublisher {
    /// Sends DISCONNECT and gives the poller a short window to flush it.
    pub async fn disconnect(mut self) {
        if let Err(err) = self.client.try_disconnect() {
            tracing::warn!(error=%err, "failed to queue MQTT disconnect");
        }
        if timeout(DISCONNECT_GRACE, &mut self.poller).await.is_err() {
            tracing::warn!("MQTT poller did not stop in time; aborting");
            self.poller.abort();
        }
        tracing::info!("MQTT disconnected");
    }
}

impl Publisher for MqttPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError> {
        // Never waits on the request queue: a stalled broker link must not
        // hold up the supervisor.
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload)
            .map_err(|err| PublishError::Client(err.to_string()))
    }
}
