//! Shared message construction helpers used by every controller.
//!
//! Generalizes the teacher's `channel::MessageBuilder`: namespaces move from
//! free constants per-module into `crate::controller::*::NAMESPACE`, but the
//! builder itself and the request id discipline it documents (spec §3,
//! "Request IDs are monotonically increasing... ID 0 is reserved for
//! unsolicited/heartbeat messages") carry over unchanged.

use serde::Serialize;

use crate::proto::{CastMessage, CastMessage_PayloadType, CastMessage_ProtocolVersion};

/// Virtual-channel connection namespace (spec §6).
pub const CONNECTION_NAMESPACE: &str = "urn:x-cast:com.google.cast.tp.connection";

#[derive(Debug, Default)]
pub struct MessageBuilder<'a> {
    namespace: Option<&'a str>,
    source: Option<&'a str>,
    destination: Option<&'a str>,
    payload: Option<String>,
}

impl<'a> MessageBuilder<'a> {
    pub fn namespace(mut self, namespace: &'a str) -> Self {
        self.namespace = Some(namespace);
        self
    }

    pub fn source(mut self, source: &'a str) -> Self {
        self.source = Some(source);
        self
    }

    pub fn destination(mut self, destination: &'a str) -> Self {
        self.destination = Some(destination);
        self
    }

    /// Serialize `payload` to JSON and attach it as a STRING payload.
    /// Silently produces a message with no payload on serialize failure,
    /// matching the teacher's builder (payload types here are all
    /// `#[derive(Serialize)]` enums controlled entirely by this crate, so
    /// serialization cannot fail in practice).
    pub fn payload<T: Serialize>(mut self, payload: &T) -> Self {
        if let Ok(payload) = serde_json::to_string(payload) {
            self.payload = Some(payload);
        }
        self
    }

    pub fn into_message(self) -> CastMessage {
        let mut message = CastMessage::new();
        message.set_protocol_version(CastMessage_ProtocolVersion::CASTV2_1_0);
        if let Some(source) = self.source {
            message.set_source_id(source.to_owned());
        }
        if let Some(destination) = self.destination {
            message.set_destination_id(destination.to_owned());
        }
        if let Some(namespace) = self.namespace {
            message.set_namespace(namespace.to_owned());
        }
        if let Some(payload) = self.payload {
            message.set_payload_type(CastMessage_PayloadType::STRING);
            message.set_payload_utf8(payload);
        }
        message
    }
}

/// Build the implicit virtual-channel `CONNECT` message sent the first time
/// a destination id is addressed (spec §4.7).
pub fn connect(source: &str, destination: &str) -> CastMessage {
    #[derive(Serialize)]
    #[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
    enum Request {
        #[serde(rename_all = "camelCase")]
        Connect { user_agent: String },
    }

    MessageBuilder::default()
        .namespace(CONNECTION_NAMESPACE)
        .source(source)
        .destination(destination)
        .payload(&Request::Connect {
            user_agent: "castv2-client".to_owned(),
        })
        .into_message()
}

/// Build the `CLOSE` message sent when tearing down a virtual channel
/// (best-effort, spec §4.7).
pub fn close(source: &str, destination: &str) -> CastMessage {
    #[derive(Serialize)]
    #[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
    enum Request {
        Close,
    }

    MessageBuilder::default()
        .namespace(CONNECTION_NAMESPACE)
        .source(source)
        .destination(destination)
        .payload(&Request::Close)
        .into_message()
}
