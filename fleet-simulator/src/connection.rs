//! Shared broker connection ownership and lifecycle tracking
//!
//! One `ConnectionManager` per simulator run owns the mutually authenticated
//! MQTT session every device loop publishes through. Devices never touch the
//! session state; they only see publish success or failure. Reconnection is
//! the rumqttc event loop's own behavior - polling again after an error
//! re-establishes the session - so the driver task here only observes and
//! logs the transitions.

use crate::config::{MqttSettings, TlsMaterial};
use crate::errors::{ConnectError, PublishError};
use crate::telemetry::TelemetryEnvelope;
use parking_lot::Mutex;
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS, TlsConfiguration, Transport};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Pause between event loop polls after a transport error, before rumqttc
/// attempts the next reconnect.
const RECONNECT_PAUSE: Duration = Duration::from_secs(1);

/// Connection lifecycle. Only the event-loop driver (and explicit shutdown)
/// moves this; devices observe it through the publish contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Interrupted,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Interrupted => "interrupted",
        };
        f.write_str(name)
    }
}

enum PublishSink {
    Mqtt(AsyncClient),
    #[cfg(test)]
    Recorded(tokio::sync::mpsc::UnboundedSender<RecordedPublish>),
}

/// One publish captured by the test sink.
#[cfg(test)]
pub(crate) struct RecordedPublish {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Single owner of the shared broker session.
pub struct ConnectionManager {
    sink: PublishSink,
    state_tx: watch::Sender<ConnectionState>,
    state_rx: watch::Receiver<ConnectionState>,
    shutdown_tx: watch::Sender<bool>,
}

impl ConnectionManager {
    /// Establish the mutually authenticated session and wait for the first
    /// CONNACK, up to the configured connect timeout.
    ///
    /// Fatal on expiry: no device can publish without this session, so the
    /// caller is expected to abort the run.
    pub async fn connect(
        settings: &MqttSettings,
        material: &TlsMaterial,
    ) -> Result<Arc<Self>, ConnectError> {
        let mut options = MqttOptions::new(&settings.client_id, &settings.endpoint, settings.port);
        options.set_keep_alive(settings.keep_alive);
        options.set_clean_session(settings.clean_session);
        options.set_transport(Transport::Tls(TlsConfiguration::Simple {
            ca: material.ca.clone(),
            alpn: None,
            client_auth: Some((material.client_cert.clone(), material.private_key.clone())),
        }));

        let (client, event_loop) = AsyncClient::new(options, 64);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let last_error: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));

        tokio::spawn(drive_event_loop(
            event_loop,
            state_tx.clone(),
            last_error.clone(),
            shutdown_rx,
        ));

        info!(
            "Connecting to broker {}:{} as '{}'",
            settings.endpoint, settings.port, settings.client_id
        );

        let mut ready = state_rx.clone();
        let wait = ready.wait_for(|state| *state == ConnectionState::Connected);
        match tokio::time::timeout(settings.connect_timeout, wait).await {
            Ok(Ok(_)) => {}
            Ok(Err(_)) | Err(_) => {
                let _ = shutdown_tx.send(true);
                let detail = last_error
                    .lock()
                    .clone()
                    .unwrap_or_else(|| "no response from broker".to_string());
                return Err(ConnectError::Timeout {
                    timeout: settings.connect_timeout,
                    detail,
                });
            }
        }

        Ok(Arc::new(Self {
            sink: PublishSink::Mqtt(client),
            state_tx,
            state_rx,
            shutdown_tx,
        }))
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Deliver one envelope at-least-once on `topic`.
    ///
    /// Rejected without touching the transport whenever the session is not
    /// in `Connected`; that failure is non-fatal and left to the caller to
    /// log.
    pub async fn publish(
        &self,
        topic: &str,
        envelope: &TelemetryEnvelope,
    ) -> Result<(), PublishError> {
        let state = self.state();
        if state != ConnectionState::Connected {
            return Err(PublishError::NotConnected(state));
        }
        let payload = serde_json::to_vec(envelope)?;
        match &self.sink {
            PublishSink::Mqtt(client) => {
                client
                    .publish(topic, QoS::AtLeastOnce, false, payload)
                    .await?;
            }
            #[cfg(test)]
            PublishSink::Recorded(tx) => {
                let _ = tx.send(RecordedPublish {
                    topic: topic.to_string(),
                    payload,
                });
            }
        }
        Ok(())
    }

    /// Close the session: send the MQTT disconnect, stop the driver task and
    /// park the state at terminal `Disconnected`.
    pub async fn shutdown(&self) {
        if let PublishSink::Mqtt(client) = &self.sink {
            let _ = client.disconnect().await;
        }
        let _ = self.shutdown_tx.send(true);
        self.state_tx.send_replace(ConnectionState::Disconnected);
        info!("Broker connection closed");
    }

    /// Test double: records published payloads instead of handing them to a
    /// broker. Starts in the given lifecycle state.
    #[cfg(test)]
    pub(crate) fn recorded(
        initial: ConnectionState,
    ) -> (
        Arc<Self>,
        tokio::sync::mpsc::UnboundedReceiver<RecordedPublish>,
    ) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(initial);
        let (shutdown_tx, _shutdown_rx) = watch::channel(false);
        let manager = Arc::new(Self {
            sink: PublishSink::Recorded(tx),
            state_tx,
            state_rx,
            shutdown_tx,
        });
        (manager, rx)
    }

    #[cfg(test)]
    pub(crate) fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }
}

/// Drive the rumqttc event loop until shutdown, translating transport events
/// into lifecycle transitions.
async fn drive_event_loop(
    mut event_loop: EventLoop,
    state: watch::Sender<ConnectionState>,
    last_error: Arc<Mutex<Option<String>>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            event = event_loop.poll() => match event {
                Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                    on_conn_ack(&state, ack.session_present);
                }
                Ok(Event::Incoming(Incoming::Disconnect)) => {
                    on_transport_error(&state, "broker sent disconnect", &last_error);
                }
                Ok(_) => {}
                Err(e) => {
                    on_transport_error(&state, &e.to_string(), &last_error);
                    tokio::time::sleep(RECONNECT_PAUSE).await;
                }
            }
        }
    }
    debug!("Event loop driver stopped");
}

/// CONNACK observed: either the initial handshake completing or the event
/// loop recovering from an interruption.
fn on_conn_ack(state: &watch::Sender<ConnectionState>, session_present: bool) {
    let previous = *state.borrow();
    state.send_replace(ConnectionState::Connected);
    match previous {
        ConnectionState::Interrupted => {
            info!(
                "Connection resumed (broker session {})",
                if session_present { "preserved" } else { "reset" }
            );
        }
        _ => info!("Connected to broker"),
    }
}

/// Transport-level failure observed while driving the event loop.
fn on_transport_error(
    state: &watch::Sender<ConnectionState>,
    reason: &str,
    last_error: &Mutex<Option<String>>,
) {
    *last_error.lock() = Some(reason.to_string());
    let previous = *state.borrow();
    match previous {
        ConnectionState::Connected => {
            warn!("Connection interrupted: {}", reason);
            state.send_replace(ConnectionState::Interrupted);
        }
        ConnectionState::Interrupted => {
            debug!("Reconnect attempt failed: {}", reason);
        }
        ConnectionState::Connecting => {
            error!("Connection attempt failed: {}", reason);
        }
        ConnectionState::Disconnected => {}
    }
}
