//! Process-wide configuration knobs.
//!
//! Spec §9 calls out logging configuration and the CEC-bypass name list as
//! the only legitimate process-wide state, and asks that both be threaded
//! through explicit configuration rather than mutable globals. `ClientConfig`
//! is that configuration object; it is passed into `CastDevice::new` and the
//! connection engine rather than read from a global.

use std::collections::HashMap;
use std::time::Duration;

/// Client-chosen sender identifier used as `source_id` on outbound frames.
pub const DEFAULT_SENDER_ID: &str = "sender-0";

/// Interval between heartbeat pings (spec §4.4 `PING_INTERVAL`).
pub const PING_INTERVAL: Duration = Duration::from_secs(10);

/// Extra grace period after a ping before the heartbeat is considered
/// expired (spec §4.4 `PONG_GRACE`).
pub const PONG_GRACE: Duration = Duration::from_secs(10);

/// Ceiling for per-service exponential reconnect backoff (spec §4.7).
pub const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Starting delay for per-service exponential reconnect backoff.
pub const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Default TCP+TLS connect timeout for a single service endpoint attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for request/response correlated operations
/// (`play_media`, `launch_app`, etc., spec §4.6).
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Sentinel `app_id` the receiver reports when no app is running
/// (spec §4.8 `is_idle`).
pub const IDLE_APP_ID: &str = "E8C28D3C";

/// App id of Google's default media receiver, used by the media controller's
/// `supporting_app_id` (spec §4.6).
pub const DEFAULT_MEDIA_RECEIVER_APP_ID: &str = "CC1AD845";

/// Destination id of the platform/receiver virtual channel.
pub const PLATFORM_DESTINATION_ID: &str = "receiver-0";

/// Receiver (platform) namespace. The connection engine sends raw `LAUNCH`
/// requests on this namespace directly (spec §4.7's auto-launch chaining),
/// so it lives here rather than only inside `controller::receiver`.
pub const RECEIVER_NAMESPACE: &str = "urn:x-cast:com.google.cast.receiver";

/// Process-wide knobs for a `CastDevice` / connection engine.
///
/// `Default` reproduces the spec's stated defaults.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Value used as `source_id` on outbound frames.
    pub source_id: String,
    /// Timeout for a single TLS connect attempt to one service endpoint.
    pub connect_timeout: Duration,
    /// Heartbeat ping cadence.
    pub ping_interval: Duration,
    /// Extra grace period after a ping before heartbeat is expired.
    pub pong_grace: Duration,
    /// Ceiling for per-service exponential backoff.
    pub max_backoff: Duration,
    /// Default timeout applied to request/response correlated operations.
    pub request_timeout: Duration,
    /// Per-app override for the delay observed between a `RECEIVER_STATUS`
    /// naming a new transport and opening that transport's virtual channel.
    ///
    /// The "Audible" receiver app is known to require a 1 second delay here
    /// (spec §4.7); other apps default to no delay.
    pub app_channel_open_delay: HashMap<String, Duration>,
    /// Receiver friendly names for which CEC "external input" signals are
    /// ignored when computing `CastDevice::is_idle` (spec §4.8).
    pub cec_bypass_names: Vec<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let mut app_channel_open_delay = HashMap::new();
        app_channel_open_delay.insert("Audible".to_owned(), Duration::from_secs(1));

        Self {
            source_id: DEFAULT_SENDER_ID.to_owned(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            ping_interval: PING_INTERVAL,
            pong_grace: PONG_GRACE,
            max_backoff: MAX_BACKOFF,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            app_channel_open_delay,
            cec_bypass_names: Vec::new(),
        }
    }
}

impl ClientConfig {
    /// Delay to observe before opening a virtual channel for `app_name`.
    pub fn channel_open_delay(&self, app_name: &str) -> Duration {
        self.app_channel_open_delay
            .get(app_name)
            .copied()
            .unwrap_or_default()
    }

    /// Whether CEC "external input" interpretation should be bypassed for a
    /// receiver with this friendly name.
    pub fn bypasses_cec(&self, friendly_name: &str) -> bool {
        self.cec_bypass_names.iter().any(|name| name == friendly_name)
    }
}
