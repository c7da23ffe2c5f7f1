//! `CastDevice`: the public façade over one receiver's connection engine and
//! its three built-in controllers (spec §4.8). Generalizes the teacher's
//! `Client` (`lib.rs`) — which only ever drove a single hardcoded media
//! session — into a general-purpose remote control surface with volume,
//! app lifecycle, and idle detection.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::config::{self, ClientConfig};
use crate::controller::heartbeat::HeartbeatController;
use crate::controller::media::{LoadRequest, MediaController};
use crate::controller::multizone::MultizoneController;
use crate::controller::receiver::ReceiverController;
use crate::engine::EngineHandle;
use crate::error::{CastError, Result};
use crate::model::{CastInfo, CastStatus, CastType, ConnectionStatus, MediaStatus};

/// A connected (or connecting/reconnecting) receiver and its controllers.
///
/// Cloning a `CastDevice` is cheap: every clone shares the same engine and
/// controller instances.
#[derive(Clone)]
pub struct CastDevice {
    engine: EngineHandle,
    config: ClientConfig,
    info: CastInfo,
    receiver: Arc<ReceiverController>,
    media: Arc<MediaController>,
    multizone: Arc<MultizoneController>,
}

impl CastDevice {
    /// Start connecting to `info` and register the built-in controllers.
    /// Returns immediately; use `connection_status` to observe when the
    /// underlying TLS socket actually comes up.
    pub async fn connect(info: CastInfo, config: ClientConfig) -> Self {
        let cast_type = info.cast_type.unwrap_or(CastType::Video);
        let engine = EngineHandle::connect(info.clone(), config.clone());

        let heartbeat = Arc::new(HeartbeatController::new());
        let receiver = Arc::new(ReceiverController::new(cast_type));
        let media = Arc::new(MediaController::new());
        let multizone = Arc::new(MultizoneController::new());

        engine.register_controller(heartbeat).await;
        engine.register_controller(receiver.clone()).await;
        engine.register_controller(media.clone()).await;
        engine.register_controller(multizone.clone()).await;

        Self {
            engine,
            config,
            info,
            receiver,
            media,
            multizone,
        }
    }

    pub fn uuid(&self) -> Uuid {
        self.info.uuid
    }

    pub fn friendly_name(&self) -> &str {
        &self.info.friendly_name
    }

    pub fn receiver(&self) -> &Arc<ReceiverController> {
        &self.receiver
    }

    pub fn media(&self) -> &Arc<MediaController> {
        &self.media
    }

    pub fn multizone(&self) -> &Arc<MultizoneController> {
        &self.multizone
    }

    /// Subscribe to `ConnectionStatus` transitions (spec §3, §4.7).
    pub fn connection_status(&self) -> broadcast::Receiver<ConnectionStatus> {
        self.engine.connection_status()
    }

    /// Block until a media session becomes active, or `timeout` elapses.
    pub async fn wait(&self, timeout: Duration) -> bool {
        self.media.block_until_active(timeout).await
    }

    /// Launch `app_id` if it isn't already running (spec §4.5).
    pub async fn start_app(&self, app_id: &str) -> Result<()> {
        self.receiver.launch_app(app_id, false).await
    }

    /// Stop the currently running app.
    pub async fn quit_app(&self) -> Result<()> {
        self.receiver.stop_app().await
    }

    /// Launch the default media receiver (if needed) and load `request`
    /// (spec §4.6).
    pub async fn play_media(&self, request: LoadRequest) -> Result<MediaStatus> {
        self.media.load(request).await
    }

    pub async fn set_volume(&self, level: f64) -> Result<f64> {
        self.receiver.set_volume(level).await
    }

    pub async fn set_volume_muted(&self, muted: bool) -> Result<()> {
        self.receiver.set_volume_muted(muted).await
    }

    /// Raise device volume by `step`, which must be positive (spec §4.8).
    pub async fn volume_up(&self, step: f64) -> Result<f64> {
        if step <= 0.0 {
            return Err(CastError::InvalidVolumeStep { step });
        }
        let current = self.receiver.status().await.map(|s| s.volume_level).unwrap_or(0.0);
        self.set_volume(current + step).await
    }

    /// Lower device volume by `step`, which must be positive (spec §4.8).
    pub async fn volume_down(&self, step: f64) -> Result<f64> {
        if step <= 0.0 {
            return Err(CastError::InvalidVolumeStep { step });
        }
        let current = self.receiver.status().await.map(|s| s.volume_level).unwrap_or(0.0);
        self.set_volume(current - step).await
    }

    /// Whether the receiver is idle: no app running and (unless this
    /// receiver's friendly name is on the CEC-bypass allow-list) not
    /// reporting an active external (CEC) input (spec §4.8).
    pub async fn is_idle(&self) -> bool {
        let status = self.receiver.status().await;
        is_idle_status(status.as_ref(), self.config.bypasses_cec(&self.info.friendly_name))
    }

    /// Disconnect and stop reconnecting. Idempotent.
    pub fn disconnect(&self) {
        self.engine.stop();
    }
}

/// Pure core of `CastDevice::is_idle`, split out so the CEC-bypass branch is
/// testable without a connected engine.
fn is_idle_status(status: Option<&CastStatus>, bypasses_cec: bool) -> bool {
    let Some(status) = status else { return true };

    let app_idle = status
        .app_id
        .as_deref()
        .map(|id| id == config::IDLE_APP_ID)
        .unwrap_or(true);

    if bypasses_cec {
        return app_idle;
    }

    app_idle && status.is_active_input != Some(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(app_id: Option<&str>, is_active_input: Option<bool>) -> CastStatus {
        CastStatus {
            app_id: app_id.map(str::to_owned),
            is_active_input,
            ..Default::default()
        }
    }

    #[test]
    fn no_status_is_idle() {
        assert!(is_idle_status(None, false));
    }

    #[test]
    fn idle_app_with_no_active_input_is_idle() {
        let status = status(Some(config::IDLE_APP_ID), Some(false));
        assert!(is_idle_status(Some(&status), false));
    }

    #[test]
    fn idle_app_with_active_cec_input_is_not_idle_without_bypass() {
        let status = status(Some(config::IDLE_APP_ID), Some(true));
        assert!(!is_idle_status(Some(&status), false));
    }

    #[test]
    fn idle_app_with_active_cec_input_is_idle_with_bypass() {
        let status = status(Some(config::IDLE_APP_ID), Some(true));
        assert!(is_idle_status(Some(&status), true));
    }

    #[test]
    fn running_app_is_not_idle() {
        let status = status(Some("ABCD1234"), Some(false));
        assert!(!is_idle_status(Some(&status), false));
    }
}
