//! # Ingestors
//!
//! Everything that turns device reports into stored samples:
//! - **`mqtt_listener`**: the long-running OwnTracks subscriber.
//! - **`owntracks`**: OwnTracks payload decoding and validation.
//! - **`legacy_form`**: the form-encoded reports accepted on `POST /locator`.

pub mod legacy_form;
pub mod mqtt_listener;
pub mod owntracks;

pub use legacy_form::LegacyReport;
pub use mqtt_listener::{handle_publish, ListenerState, MqttListener, MqttSettings, TransportError};
pub use owntracks::{decode_sample, DecodeError, OwnTracksMessage};
