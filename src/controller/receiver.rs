//! Platform controller: status, app launch, and volume (spec §4.5).
//!
//! Grounded in the teacher's `channel::receiver::{Request, Response,
//! Status, Applications}` wire shapes (kept verbatim where the JSON layout
//! matches) and in `pychromecast.controllers.receiver.ReceiverController`
//! for the status-listener/launch-failure bookkeeping the teacher never
//! built (punchtop only cared about the transport id, not exposing status
//! to callers).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{OnceCell, RwLock};

use crate::config::{self, RECEIVER_NAMESPACE};
use crate::controller::{self, Controller, SendOptions};
use crate::engine::EngineHandle;
use crate::error::Result;
use crate::model::CastStatus;
use crate::model::CastType;
use crate::proto::CastMessage;

pub const NAMESPACE: &str = RECEIVER_NAMESPACE;

/// Reason and context for a failed `LAUNCH` (spec §4.5).
#[derive(Clone, Debug)]
pub struct LaunchFailure {
    pub reason: Option<String>,
    pub app_id: Option<String>,
    pub request_id: Option<i64>,
}

/// Notified on every `RECEIVER_STATUS`.
pub trait CastStatusListener: Send + Sync {
    fn new_cast_status(&self, status: &CastStatus);
}

/// Notified on every `LAUNCH_ERROR`.
pub trait LaunchErrorListener: Send + Sync {
    fn new_launch_error(&self, failure: &LaunchFailure);
}

/// Controls the Cast platform: status polling, app launch/stop, device
/// volume. Always registered with `target_platform() == true`.
pub struct ReceiverController {
    engine: OnceCell<EngineHandle>,
    cast_type: CastType,
    status: RwLock<Option<CastStatus>>,
    launch_failure: RwLock<Option<LaunchFailure>>,
    status_listeners: RwLock<Vec<Arc<dyn CastStatusListener>>>,
    launch_error_listeners: RwLock<Vec<Arc<dyn LaunchErrorListener>>>,
}

impl ReceiverController {
    pub fn new(cast_type: CastType) -> Self {
        Self {
            engine: OnceCell::new(),
            cast_type,
            status: RwLock::new(None),
            launch_failure: RwLock::new(None),
            status_listeners: RwLock::new(Vec::new()),
            launch_error_listeners: RwLock::new(Vec::new()),
        }
    }

    pub async fn status(&self) -> Option<CastStatus> {
        self.status.read().await.clone()
    }

    pub async fn app_id(&self) -> Option<String> {
        self.status.read().await.as_ref().and_then(|s| s.app_id.clone())
    }

    pub async fn register_status_listener(&self, listener: Arc<dyn CastStatusListener>) {
        self.status_listeners.write().await.push(listener);
    }

    pub async fn register_launch_error_listener(&self, listener: Arc<dyn LaunchErrorListener>) {
        self.launch_error_listeners.write().await.push(listener);
    }

    /// Send `GET_STATUS` and return once the receiver acknowledges it.
    pub async fn update_status(&self) -> Result<()> {
        let engine = self.engine()?;
        controller::send(
            self,
            engine,
            serde_json::json!({ "type": "GET_STATUS" }),
            SendOptions::default(),
        )
        .await?;
        Ok(())
    }

    /// Launch `app_id`, skipping the request if it's already running unless
    /// `force_launch` is set (spec §4.5).
    pub async fn launch_app(&self, app_id: &str, force_launch: bool) -> Result<()> {
        let engine = self.engine()?;
        if force_launch {
            engine
                .send(
                    RECEIVER_NAMESPACE,
                    config::PLATFORM_DESTINATION_ID,
                    serde_json::json!({ "type": "LAUNCH", "appId": app_id }),
                    SendOptions::default(),
                )
                .await?;
            Ok(())
        } else {
            engine.launch_app(app_id).await
        }
    }

    /// Stop the currently running app.
    pub async fn stop_app(&self) -> Result<()> {
        let engine = self.engine()?;
        controller::send(
            self,
            engine,
            serde_json::json!({ "type": "STOP" }),
            SendOptions {
                inc_session_id: true,
                ..Default::default()
            },
        )
        .await?;
        Ok(())
    }

    /// Set device volume, clamped to `[0, 1]`. Returns the clamped value.
    pub async fn set_volume(&self, level: f64) -> Result<f64> {
        let level = clamp_volume(level);
        let engine = self.engine()?;
        controller::send(
            self,
            engine,
            serde_json::json!({ "type": "SET_VOLUME", "volume": { "level": level } }),
            SendOptions::default(),
        )
        .await?;
        Ok(level)
    }

    pub async fn set_volume_muted(&self, muted: bool) -> Result<()> {
        let engine = self.engine()?;
        controller::send(
            self,
            engine,
            serde_json::json!({ "type": "SET_VOLUME", "volume": { "muted": muted } }),
            SendOptions::default(),
        )
        .await?;
        Ok(())
    }

    /// Supplemented feature (spec §11, `GetAppAvailability`): ask the
    /// receiver whether each of `app_ids` is installed/available, without
    /// launching anything.
    pub async fn app_availability(&self, app_ids: &[String]) -> Result<HashMap<String, bool>> {
        let engine = self.engine()?;
        let response = controller::send(
            self,
            engine,
            serde_json::json!({ "type": "GET_APP_AVAILABILITY", "appId": app_ids }),
            SendOptions::default(),
        )
        .await?
        .unwrap_or(Value::Null);

        let availability = response
            .get("availability")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        Ok(availability
            .into_iter()
            .map(|(app_id, value)| {
                let available = value.as_str() == Some("APP_AVAILABLE");
                (app_id, available)
            })
            .collect())
    }

    fn engine(&self) -> Result<&EngineHandle> {
        self.engine
            .get()
            .ok_or(crate::error::CastError::ControllerNotRegistered {
                namespace: NAMESPACE.to_owned(),
            })
    }

    async fn notify_status(&self, status: &CastStatus) {
        for listener in self.status_listeners.read().await.iter() {
            listener.new_cast_status(status);
        }
    }

    async fn notify_launch_error(&self, failure: &LaunchFailure) {
        for listener in self.launch_error_listeners.read().await.iter() {
            listener.new_launch_error(failure);
        }
    }
}

#[async_trait]
impl Controller for ReceiverController {
    fn namespace(&self) -> &str {
        NAMESPACE
    }

    fn target_platform(&self) -> bool {
        true
    }

    async fn registered(&self, engine: EngineHandle) {
        let _ = self.engine.set(engine);
    }

    async fn channel_disconnected(&self) {
        *self.status.write().await = None;
    }

    async fn receive_message(&self, _message: &CastMessage, parsed: &Value) -> bool {
        match parsed.get("type").and_then(Value::as_str) {
            Some("RECEIVER_STATUS") => {
                let status = parse_status(parsed, self.cast_type);
                *self.status.write().await = Some(status.clone());
                self.notify_status(&status).await;
                if let Some(engine) = self.engine.get() {
                    engine.report_cast_status(status).await;
                }
                true
            }
            Some("LAUNCH_ERROR") => {
                let failure = parse_launch_error(parsed);
                *self.launch_failure.write().await = Some(failure.clone());
                self.notify_launch_error(&failure).await;
                true
            }
            _ => false,
        }
    }
}

#[derive(Deserialize)]
struct Applications {
    #[serde(rename = "appId")]
    app_id: Option<String>,
    #[serde(rename = "displayName")]
    display_name: Option<String>,
    #[serde(default)]
    namespaces: Vec<NamespaceEntry>,
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
    #[serde(rename = "transportId")]
    transport_id: Option<String>,
    #[serde(rename = "statusText", default)]
    status_text: String,
    #[serde(rename = "iconUrl")]
    icon_url: Option<String>,
}

#[derive(Deserialize)]
struct NamespaceEntry {
    name: String,
}

#[derive(Serialize, Deserialize)]
struct VolumePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    level: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    muted: Option<bool>,
    #[serde(rename = "controlType", skip_serializing_if = "Option::is_none")]
    control_type: Option<String>,
}

fn parse_status(parsed: &Value, cast_type: CastType) -> CastStatus {
    let status = parsed.get("status").cloned().unwrap_or(Value::Null);
    let is_audio = matches!(cast_type, CastType::Audio | CastType::Group);

    let volume: VolumePayload = status
        .get("volume")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or(VolumePayload {
            level: Some(1.0),
            muted: Some(false),
            control_type: None,
        });

    let app: Option<Applications> = status
        .get("applications")
        .and_then(Value::as_array)
        .and_then(|apps| apps.first())
        .and_then(|app| serde_json::from_value(app.clone()).ok());

    CastStatus {
        is_active_input: status
            .get("isActiveInput")
            .and_then(Value::as_bool)
            .or(if is_audio { None } else { Some(false) }),
        is_stand_by: status
            .get("isStandBy")
            .and_then(Value::as_bool)
            .or(if is_audio { None } else { Some(true) }),
        volume_level: volume.level.unwrap_or(1.0),
        volume_muted: volume.muted.unwrap_or(false),
        app_id: app.as_ref().and_then(|a| a.app_id.clone()),
        display_name: app.as_ref().and_then(|a| a.display_name.clone()),
        namespaces: app
            .as_ref()
            .map(|a| a.namespaces.iter().map(|n| n.name.clone()).collect())
            .unwrap_or_default(),
        session_id: app.as_ref().and_then(|a| a.session_id.clone()),
        transport_id: app.as_ref().and_then(|a| a.transport_id.clone()),
        status_text: app.as_ref().map(|a| a.status_text.clone()).unwrap_or_default(),
        icon_url: app.as_ref().and_then(|a| a.icon_url.clone()),
        volume_control_type: volume.control_type.or_else(|| Some("attenuation".to_owned())),
    }
}

fn parse_launch_error(parsed: &Value) -> LaunchFailure {
    LaunchFailure {
        reason: parsed.get("reason").and_then(Value::as_str).map(str::to_owned),
        app_id: parsed.get("appId").and_then(Value::as_str).map(str::to_owned),
        request_id: parsed.get("requestId").and_then(Value::as_i64),
    }
}

/// Clamp a requested device volume to the receiver's valid `[0, 1]` range.
fn clamp_volume(level: f64) -> f64 {
    level.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_volume_into_unit_range() {
        assert_eq!(clamp_volume(0.5), 0.5);
        assert_eq!(clamp_volume(-1.0), 0.0);
        assert_eq!(clamp_volume(2.5), 1.0);
        assert_eq!(clamp_volume(0.0), 0.0);
        assert_eq!(clamp_volume(1.0), 1.0);
    }

    #[test]
    fn parses_launch_error_fields() {
        let parsed = serde_json::json!({
            "type": "LAUNCH_ERROR",
            "reason": "NOT_FOUND",
            "appId": "ABCD1234",
            "requestId": 7,
        });
        let failure = parse_launch_error(&parsed);
        assert_eq!(failure.reason.as_deref(), Some("NOT_FOUND"));
        assert_eq!(failure.app_id.as_deref(), Some("ABCD1234"));
        assert_eq!(failure.request_id, Some(7));
    }

    #[test]
    fn parses_status_defaults_for_audio_cast_type() {
        let parsed = serde_json::json!({
            "type": "RECEIVER_STATUS",
            "status": {
                "applications": [],
            },
        });
        let status = parse_status(&parsed, CastType::Audio);
        assert_eq!(status.is_active_input, None);
        assert_eq!(status.is_stand_by, None);
        assert_eq!(status.volume_level, 1.0);
    }

    #[test]
    fn parses_status_defaults_for_video_cast_type() {
        let parsed = serde_json::json!({
            "type": "RECEIVER_STATUS",
            "status": {
                "applications": [],
            },
        });
        let status = parse_status(&parsed, CastType::Video);
        assert_eq!(status.is_active_input, Some(false));
        assert_eq!(status.is_stand_by, Some(true));
    }
}
