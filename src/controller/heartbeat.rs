//! Heartbeat controller: answer PING with PONG (spec §4.4).
//!
//! The connection engine owns the actual liveness timer — it sends PING on
//! `ClientConfig::ping_interval` and resets its pong-grace deadline whenever
//! a frame arrives on this namespace (spec §4.7) — so this controller's only
//! job is the reply half. Grounded in `pychromecast.controllers.heartbeat`,
//! which keeps exactly this split between connection-level liveness tracking
//! and controller-level PONG replies.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::OnceCell;

use crate::controller::{self, Controller, SendOptions};
use crate::engine::EngineHandle;
use crate::message::MessageBuilder;
use crate::proto::CastMessage;

/// Heartbeat namespace; also the frame the engine watches to reset its
/// pong-grace deadline.
pub const NAMESPACE: &str = "urn:x-cast:com.google.cast.tp.heartbeat";

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
enum Reply {
    Pong,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
enum Ping {
    Ping,
}

/// Build the PING frame the engine sends on every `ping_interval` tick.
/// Request id 0 (heartbeat messages are unsolicited, spec §3).
pub(crate) fn ping_message(source_id: &str, destination_id: &str) -> CastMessage {
    MessageBuilder::default()
        .namespace(NAMESPACE)
        .source(source_id)
        .destination(destination_id)
        .payload(&Ping::Ping)
        .into_message()
}

/// Replies to PING with PONG. Registered against the platform destination.
#[derive(Default)]
pub struct HeartbeatController {
    engine: OnceCell<EngineHandle>,
}

impl HeartbeatController {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Controller for HeartbeatController {
    fn namespace(&self) -> &str {
        NAMESPACE
    }

    fn target_platform(&self) -> bool {
        true
    }

    async fn registered(&self, engine: EngineHandle) {
        let _ = self.engine.set(engine);
    }

    async fn receive_message(&self, _message: &CastMessage, parsed: &Value) -> bool {
        if parsed.get("type").and_then(Value::as_str) != Some("PING") {
            return false;
        }
        if let Some(engine) = self.engine.get() {
            let payload = serde_json::to_value(Reply::Pong).unwrap_or(Value::Null);
            let _ = controller::send(
                self,
                engine,
                payload,
                SendOptions {
                    no_add_request_id: true,
                    ..Default::default()
                },
            )
            .await;
        }
        true
    }
}
