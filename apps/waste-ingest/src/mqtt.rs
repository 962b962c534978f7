use crate::handler::MessageHandler;
use anyhow::Result;
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, Outgoing, Publish, QoS};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::{sleep, timeout, Duration};
use waste_core::config::BusConfig;

const EVENTLOOP_CAPACITY: usize = 64;
const MAX_IN_FLIGHT: usize = 64;
const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

/// Consumes the reading topic until `shutdown` resolves.
///
/// The subscription is re-issued on every CONNACK since the session is not
/// persistent. Each publish is handled on its own task; at most
/// `MAX_IN_FLIGHT` run at once, after which polling waits for a free slot.
pub async fn run_listener<H: MessageHandler>(
    bus: &BusConfig,
    handler: Arc<H>,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    let (client, mut eventloop) = AsyncClient::new(bus.mqtt_options(), EVENTLOOP_CAPACITY);
    let in_flight = Arc::new(Semaphore::new(MAX_IN_FLIGHT));
    let mut shutdown = std::pin::pin!(shutdown);
    let mut connected = false;

    loop {
        let event = tokio::select! {
            _ = &mut shutdown => break,
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                connected = true;
                match client.try_subscribe(bus.topic.clone(), QoS::AtMostOnce) {
                    Ok(()) => tracing::info!(topic=%bus.topic, "subscribed to reading feed"),
                    Err(err) => tracing::warn!(error=%err, topic=%bus.topic, "failed to queue subscribe"),
                }
            }
            Ok(Event::Incoming(Incoming::Publish(publish))) => {
                tokio::select! {
                    _ = &mut shutdown => break,
                    _ = dispatch(&handler, &in_flight, publish) => {}
                }
            }
            Ok(_) => {}
            Err(err) => {
                connected = false;
                tracing::warn!(error=%err, host=%bus.host, port=bus.port, "MQTT connection dropped; reconnecting");
                tokio::select! {
                    _ = &mut shutdown => break,
                    _ = sleep(RECONNECT_BACKOFF) => {}
                }
            }
        }
    }

    if connected {
        disconnect(&client, &mut eventloop).await;
    }
    Ok(())
}

/// Waits for an in-flight slot, then hands the message to its own task.
async fn dispatch<H: MessageHandler>(handler: &Arc<H>, in_flight: &Arc<Semaphore>, publish: Publish) {
    let Ok(permit) = in_flight.clone().acquire_owned().await else {
        return;
    };
    let handler = handler.clone();
    tokio::spawn(async move {
        if let Err(err) = handler.handle(&publish.topic, &publish.payload[..]).await {
            tracing::warn!(error=%err, topic=%publish.topic, "discarding message");
        }
        drop(permit);
    });
}

async fn disconnect(client: &AsyncClient, eventloop: &mut EventLoop) {
    if let Err(err) = client.try_disconnect() {
        tracing::warn!(error=%err, "failed to queue MQTT disconnect");
        return;
    }
    let flushed = timeout(DISCONNECT_GRACE, async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    })
    .await;
    if flushed.is_err() {
        tracing::warn!("MQTT disconnect not flushed in time");
    }
    tracing::info!("MQTT disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::IngestError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::oneshot;

    const TOPIC: &str = "city/waste/containers";
    const CONNACK: [u8; 4] = [0x20, 0x02, 0x00, 0x00];
    const SUBSCRIBE: u8 = 0x82;
    const DISCONNECT: u8 = 0xe0;

    #[derive(Default)]
    struct CountingHandler {
        calls: AtomicUsize,
    }

    impl MessageHandler for CountingHandler {
        async fn handle(&self, _topic: &str, _payload: &[u8]) -> Result<(), IngestError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Holds every message until the gate is opened.
    struct GatedHandler {
        gate: Semaphore,
        started: AtomicUsize,
        finished: AtomicUsize,
    }

    impl MessageHandler for GatedHandler {
        async fn handle(&self, _topic: &str, _payload: &[u8]) -> Result<(), IngestError> {
            self.started.fetch_add(1, Ordering::SeqCst);
            let _ = self.gate.acquire().await;
            self.finished.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn bus(port: u16) -> BusConfig {
        BusConfig {
            host: "127.0.0.1".to_string(),
            port,
            username: None,
            password: None,
            topic: TOPIC.to_string(),
            client_id: "waste-ingest-test".to_string(),
            keepalive_secs: 60,
        }
    }

    fn unreachable_bus() -> BusConfig {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        bus(port)
    }

    /// Reads one MQTT control packet: first header byte plus body.
    async fn read_packet(stream: &mut TcpStream) -> std::io::Result<(u8, Vec<u8>)> {
        let header = stream.read_u8().await?;
        let mut remaining = 0usize;
        let mut shift = 0;
        loop {
            let byte = stream.read_u8().await?;
            remaining |= usize::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        let mut body = vec![0u8; remaining];
        stream.read_exact(&mut body).await?;
        Ok((header, body))
    }

    #[tokio::test]
    async fn shutdown_interrupts_reconnect_backoff() {
        let handler = Arc::new(CountingHandler::default());
        let bus = unreachable_bus();

        let result = timeout(
            Duration::from_secs(5),
            run_listener(&bus, handler.clone(), sleep(Duration::from_millis(200))),
        )
        .await;

        assert!(matches!(result, Ok(Ok(()))));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn subscribes_again_after_reconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (resubscribed_tx, resubscribed_rx) = oneshot::channel::<()>();

        let broker = tokio::spawn(async move {
            let mut subscribed_topics = Vec::new();
            let mut resubscribed_tx = Some(resubscribed_tx);
            let mut last = None;
            for _ in 0..2 {
                let (mut stream, _) = listener.accept().await.unwrap();
                let (connect, _) = read_packet(&mut stream).await.unwrap();
                assert_eq!(connect >> 4, 1);
                stream.write_all(&CONNACK).await.unwrap();

                let (header, body) = read_packet(&mut stream).await.unwrap();
                assert_eq!(header, SUBSCRIBE);
                subscribed_topics.push(String::from_utf8_lossy(&body[4..body.len() - 1]).into_owned());
                stream
                    .write_all(&[0x90, 0x03, body[0], body[1], 0x00])
                    .await
                    .unwrap();

                if subscribed_topics.len() == 2 {
                    if let Some(tx) = resubscribed_tx.take() {
                        let _ = tx.send(());
                    }
                    last = read_packet(&mut stream).await.ok().map(|(h, _)| h);
                }
                // Dropping the first stream forces a reconnect.
            }
            (subscribed_topics, last)
        });

        let handler = Arc::new(CountingHandler::default());
        let listened = timeout(
            Duration::from_secs(10),
            run_listener(&bus(port), handler, async {
                let _ = resubscribed_rx.await;
            }),
        )
        .await;
        assert!(matches!(listened, Ok(Ok(()))));

        let (topics, last) = timeout(Duration::from_secs(5), broker).await.unwrap().unwrap();
        assert_eq!(topics, vec![TOPIC.to_string(), TOPIC.to_string()]);
        assert_eq!(last, Some(DISCONNECT));
    }

    #[tokio::test]
    async fn in_flight_messages_are_capped() {
        let handler = Arc::new(GatedHandler {
            gate: Semaphore::new(0),
            started: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
        });
        let in_flight = Arc::new(Semaphore::new(2));
        let message = || Publish::new(TOPIC, QoS::AtMostOnce, b"{}".to_vec());

        dispatch(&handler, &in_flight, message()).await;
        dispatch(&handler, &in_flight, message()).await;

        let third = dispatch(&handler, &in_flight, message());
        tokio::pin!(third);
        assert!(timeout(Duration::from_millis(100), &mut third).await.is_err());
        assert_eq!(handler.started.load(Ordering::SeqCst), 2);

        handler.gate.add_permits(1);
        timeout(Duration::from_secs(5), &mut third).await.unwrap();
        timeout(Duration::from_secs(5), async {
            while in_flight.available_permits() < 2 {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(handler.finished.load(Ordering::SeqCst), 3);
    }
}
