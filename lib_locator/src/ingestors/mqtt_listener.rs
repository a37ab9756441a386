//! # MQTT Ingest Listener
//!
//! Subscribes to the OwnTracks wildcard topic and feeds every valid location
//! report into the [`LocationStore`]. Bad payloads and failed inserts are
//! logged and dropped; they never stop the receive loop.
//!
//! Lifecycle:
//! `Disconnected -> Connecting -> Subscribed <-> Reconnecting` (a broker that is
//! down at start goes straight from `Connecting` to `Reconnecting`), and
//! `Unsubscribed` once the cancellation token fires. The subscription is
//! re-issued on every ConnAck because sessions are clean.

use chrono::Utc;
use rumqttc::{AsyncClient, Event, MqttOptions, Outgoing, Packet, QoS};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::owntracks::{decode_sample, DecodeError};
use crate::locations::{LocationStore, SampleRef};

/// How long the event loop is driven after cancellation so the UNSUBSCRIBE
/// and DISCONNECT packets reach the broker.
const DISCONNECT_GRACE: Duration = Duration::from_millis(250);
const REQUEST_CHANNEL_CAPACITY: usize = 16;

/// Settings the MQTT client cannot start with. Broker outages are never an
/// error here; they are retried.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Invalid MQTT settings: {0}")]
    InvalidSettings(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Disconnected,
    Connecting,
    Subscribed,
    Reconnecting,
    Unsubscribed,
}

#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub credentials: Option<(String, String)>,
    pub topic: String,
    pub keep_alive: Duration,
    pub reconnect_delay: Duration,
}

impl MqttSettings {
    pub fn broker(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn validate(&self) -> Result<(), TransportError> {
        if self.topic.trim().is_empty() {
            return Err(TransportError::InvalidSettings("topic must not be empty"));
        }
        // rumqttc panics on a client id starting with a space.
        if self.client_id.starts_with(' ') {
            return Err(TransportError::InvalidSettings("client id must not start with a space"));
        }
        Ok(())
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(true);
        if let Some((username, password)) = &self.credentials {
            options.set_credentials(username, password);
        }
        options
    }
}

pub struct MqttListener {
    settings: MqttSettings,
    store: LocationStore,
    state: watch::Sender<ListenerState>,
}

impl MqttListener {
    pub fn new(settings: MqttSettings, store: LocationStore) -> Self {
        let (state, _) = watch::channel(ListenerState::Disconnected);
        Self { settings, store, state }
    }

    /// Observe lifecycle transitions.
    pub fn state(&self) -> watch::Receiver<ListenerState> {
        self.state.subscribe()
    }

    fn set_state(&self, next: ListenerState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(from = ?previous, to = ?next, "MQTT listener state changed.");
        }
    }

    /// Runs until `cancel` fires. Fails only on unusable settings; every
    /// transport error, including a broker that is not up yet, is retried
    /// after `reconnect_delay`.
    pub async fn start(&self, cancel: CancellationToken) -> Result<(), TransportError> {
        self.settings.validate()?;
        let broker = self.settings.broker();
        info!(broker = %broker, topic = %self.settings.topic, "Connecting to MQTT broker.");
        self.set_state(ListenerState::Connecting);

        let (client, mut eventloop) = AsyncClient::new(self.settings.options(), REQUEST_CHANNEL_CAPACITY);
        let mut connected_once = false;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = eventloop.poll() => match event {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        connected_once = true;
                        info!(broker = %broker, "Connected to MQTT broker, subscribing.");
                        if let Err(e) = client.try_subscribe(&self.settings.topic, QoS::AtMostOnce) {
                            error!(error = %e, topic = %self.settings.topic, "Failed to queue subscription.");
                        }
                    }
                    Ok(Event::Incoming(Packet::SubAck(_))) => {
                        info!(topic = %self.settings.topic, "Subscribed.");
                        self.set_state(ListenerState::Subscribed);
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        handle_publish(&self.store, &publish.topic, &publish.payload).await;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(
                            broker = %broker,
                            error = %e,
                            retry_in_ms = self.settings.reconnect_delay.as_millis() as u64,
                            "MQTT connection failed, reconnecting."
                        );
                        self.set_state(ListenerState::Reconnecting);
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(self.settings.reconnect_delay) => {}
                        }
                    }
                }
            }
        }

        info!(topic = %self.settings.topic, "Unsubscribing from MQTT.");
        if connected_once {
            if let Err(e) = client.try_unsubscribe(&self.settings.topic) {
                warn!(error = %e, "Error unsubscribing from MQTT.");
            }
        }
        if let Err(e) = client.try_disconnect() {
            warn!(error = %e, "Error disconnecting from MQTT.");
        }
        let drained = tokio::time::timeout(DISCONNECT_GRACE, async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        })
        .await;
        if drained.is_err() {
            warn!(broker = %broker, "MQTT disconnect not confirmed within {:?}.", DISCONNECT_GRACE);
        }

        self.set_state(ListenerState::Unsubscribed);
        info!("MQTT listener closed.");
        Ok(())
    }
}

/// Decodes one published payload and stores it. Returns the new sample's id,
/// or `None` when the message was dropped.
pub async fn handle_publish(store: &LocationStore, topic: &str, payload: &[u8]) -> Option<SampleRef> {
    let sample = match decode_sample(payload, Utc::now()) {
        Ok(sample) => sample,
        Err(DecodeError::NotALocation(kind)) => {
            debug!(topic = %topic, kind = %kind, "Ignoring non-location message.");
            return None;
        }
        Err(e) => {
            warn!(topic = %topic, error = %e, "Dropping undecodable message.");
            return None;
        }
    };

    match store.insert(&sample).await {
        Ok(id) => {
            debug!(topic = %topic, device_id = %sample.device_id, sample_id = %id, "Location received.");
            Some(id)
        }
        Err(e) => {
            error!(topic = %topic, device_id = %sample.device_id, error = %e, "Failed to store location.");
            None
        }
    }
}
