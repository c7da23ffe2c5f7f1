//! Core data model: `CastInfo`, `CastStatus`, `MediaStatus`,
//! `ConnectionStatus`, and the virtual channel record. See spec §3.

use std::net::SocketAddr;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One way to reach a receiver: a resolved host/port, or an mDNS name to be
/// resolved at connect time. A `CastInfo` may carry several of these, tried
/// in order (spec §4.2).
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ServiceEndpoint {
    /// A resolved socket address.
    Host(SocketAddr),
    /// An mDNS service instance name, resolved lazily on connect.
    MdnsName(String),
}

/// Receiver category. Unknown from mDNS alone; the façade fills this in
/// lazily via a `CastTypeProbe` (spec §4.2).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CastType {
    /// Video-capable receiver (e.g. Chromecast).
    Video,
    /// Audio-only receiver (e.g. Google Home).
    Audio,
    /// A multizone (speaker group) receiver.
    Group,
}

/// Immutable descriptor of a receiver. Created by discovery or from a
/// static host; the `services` set is the only field discovery mutates in
/// place (a new `CastInfo` with updated `services` replaces the old one in
/// the registry). Consumed by the connection engine on every reconnect.
#[derive(Clone, Debug)]
pub struct CastInfo {
    /// Endpoints to try, in order, during connect.
    pub services: Vec<ServiceEndpoint>,
    /// Stable identifier for this receiver (mDNS TXT `id`).
    pub uuid: Uuid,
    /// Device model name (mDNS TXT `md`).
    pub model_name: String,
    /// User-assigned friendly name (mDNS TXT `fn`).
    pub friendly_name: String,
    /// Last known host, convenience accessor over `services`.
    pub host: Option<SocketAddr>,
    /// Default cast control port, 8009 unless advertised otherwise.
    pub port: u16,
    /// `None` until probed (spec §4.2); `Some` after the façade resolves it.
    pub cast_type: Option<CastType>,
    /// Device manufacturer, filled in alongside `cast_type`.
    pub manufacturer: Option<String>,
}

impl CastInfo {
    /// Build a `CastInfo` for a statically configured host, bypassing mDNS.
    pub fn from_known_host(uuid: Uuid, host: SocketAddr, friendly_name: impl Into<String>) -> Self {
        Self {
            services: vec![ServiceEndpoint::Host(host)],
            uuid,
            model_name: String::new(),
            friendly_name: friendly_name.into(),
            host: Some(host),
            port: host.port(),
            cast_type: None,
            manufacturer: None,
        }
    }
}

/// Receiver-wide status, derived at each `RECEIVER_STATUS` message
/// (spec §3).
#[derive(Clone, Debug, Default)]
pub struct CastStatus {
    /// Absent ("unknown") for audio/group casts.
    pub is_active_input: Option<bool>,
    /// Absent ("unknown") for audio/group casts.
    pub is_stand_by: Option<bool>,
    /// Device volume in `[0, 1]`.
    pub volume_level: f64,
    /// Whether the device volume is muted.
    pub volume_muted: bool,
    /// Currently running app id, if any.
    pub app_id: Option<String>,
    /// Human readable name of the running app.
    pub display_name: Option<String>,
    /// Namespaces the running app exposes.
    pub namespaces: Vec<String>,
    /// Current app session id.
    pub session_id: Option<String>,
    /// Current app transport id (destination id for app-targeted messages).
    pub transport_id: Option<String>,
    /// Free-form status text from the receiver.
    pub status_text: String,
    /// Icon URL for the running app, if any.
    pub icon_url: Option<String>,
    /// One of `"attenuation"`, `"fixed"`, `"master"`.
    pub volume_control_type: Option<String>,
}

/// Playback stream classification (spec §3).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Default)]
pub enum StreamType {
    /// Seekable, finite-length content.
    Buffered,
    /// Live, generally non-seekable content.
    Live,
    /// Not yet known.
    #[default]
    Unknown,
}

/// Playback state (spec §3).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Default)]
pub enum PlayerState {
    /// Actively playing.
    Playing,
    /// Buffering before/after a seek or at start of playback.
    Buffering,
    /// Paused.
    Paused,
    /// No media loaded or playback finished/cancelled/errored.
    Idle,
    /// Not yet known.
    #[default]
    Unknown,
}

/// Bitset of commands the currently loaded media supports (spec §4.6).
///
/// The raw value is always available via `.0`; the associated constants
/// decode individual bits on demand rather than spreading a dozen booleans
/// across `MediaStatus`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SupportedMediaCommands(pub u32);

impl SupportedMediaCommands {
    // Bit values from the CAF receiver framework
    // (cast_receiver_framework.js), also used verbatim by python-pychromecast.
    /// `MediaStatus.supportedMediaCommands` bit for `PAUSE`.
    pub const PAUSE: u32 = 1;
    /// Bit for `SEEK`.
    pub const SEEK: u32 = 2;
    /// Bit for stream (device) volume control.
    pub const STREAM_VOLUME: u32 = 4;
    /// Bit for stream mute control.
    pub const STREAM_MUTE: u32 = 8;
    /// Bit for queue-next support.
    pub const QUEUE_NEXT: u32 = 64;
    /// Bit for queue-previous support.
    pub const QUEUE_PREV: u32 = 128;
    /// Bit for queue shuffle support.
    pub const QUEUE_SHUFFLE: u32 = 256;
    /// Bit for editing active track ids (subtitle selection).
    pub const EDIT_TRACKS: u32 = 4096;

    /// Whether the given bit is set.
    pub fn has(self, bit: u32) -> bool {
        self.0 & bit != 0
    }

    /// Convenience: pause supported.
    pub fn can_pause(self) -> bool {
        self.has(Self::PAUSE)
    }

    /// Convenience: seek supported.
    pub fn can_seek(self) -> bool {
        self.has(Self::SEEK)
    }

    /// Convenience: queue-next supported.
    pub fn can_queue_next(self) -> bool {
        self.has(Self::QUEUE_NEXT)
    }

    /// Convenience: queue-previous supported.
    pub fn can_queue_prev(self) -> bool {
        self.has(Self::QUEUE_PREV)
    }
}

/// Current playback status (spec §3). Deserialized from a `MEDIA_STATUS`
/// payload entry by `crate::controller::media`.
#[derive(Clone, Debug)]
pub struct MediaStatus {
    /// Receiver-issued identifier for this playback instance.
    pub media_session_id: i64,
    /// Position, in seconds, as of `last_updated`.
    pub current_time: f64,
    /// Opaque content identifier, usually a URL.
    pub content_id: Option<String>,
    /// MIME content type.
    pub content_type: Option<String>,
    /// Duration in seconds, if known.
    pub duration: Option<f64>,
    /// Buffered/live/unknown classification.
    pub stream_type: StreamType,
    /// Reason playback went idle, if applicable.
    pub idle_reason: Option<String>,
    /// Playback speed multiplier.
    pub playback_rate: f64,
    /// Current player state.
    pub player_state: PlayerState,
    /// Raw command-support bitset plus decode helpers.
    pub supported_media_commands: SupportedMediaCommands,
    /// Stream (device-side) volume level, distinct from receiver volume.
    pub volume_level: Option<f64>,
    /// Stream mute state.
    pub volume_muted: Option<bool>,
    /// Nested metadata blob (title, type-specific fields) as raw JSON —
    /// shape varies by `metadataType`, so callers that need typed access
    /// should match on `metadata_type` and parse further.
    pub media_metadata: Option<serde_json::Value>,
    /// Subtitle/text tracks available for the loaded media.
    pub subtitle_tracks: Vec<serde_json::Value>,
    /// Track ids currently active.
    pub current_subtitle_tracks: Vec<i64>,
    /// Monotonic local timestamp this status was recorded at, used to
    /// compute `adjusted_current_time`.
    pub last_updated: Instant,
}

impl MediaStatus {
    /// `current_time` advanced by wall-clock elapsed time since
    /// `last_updated` when playing; otherwise `current_time` as-is
    /// (spec §4.6).
    pub fn adjusted_current_time(&self, now: Instant) -> f64 {
        if self.player_state == PlayerState::Playing {
            self.current_time + now.saturating_duration_since(self.last_updated).as_secs_f64()
        } else {
            self.current_time
        }
    }
}

/// Lifecycle state of a device connection, mirrored 1:1 by
/// `ConnectionStatus` events (spec §3, §4.7).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectionState {
    /// Not yet connected and no connect attempt in flight.
    Idle,
    /// A connect attempt (resolve + TLS handshake) is in flight.
    Connecting,
    /// TLS socket established and first status received.
    Connected,
    /// Heartbeat expired or a write failed; reconnecting.
    Lost,
    /// A connect attempt exhausted every service and every retry.
    Failed,
    /// A connect attempt's resolution step failed for every service.
    FailedResolve,
    /// Terminal: `disconnect()` was called.
    Stopped,
}

/// Emitted by the connection engine on every state change (spec §3).
#[derive(Clone, Debug)]
pub struct ConnectionStatus {
    /// New lifecycle state.
    pub status: ConnectionState,
    /// Address involved in this transition, if applicable.
    pub address: Option<SocketAddr>,
    /// Service endpoint involved in this transition, if applicable.
    pub service: Option<ServiceEndpoint>,
}

impl ConnectionStatus {
    pub(crate) fn new(status: ConnectionState) -> Self {
        Self {
            status,
            address: None,
            service: None,
        }
    }

    pub(crate) fn with_service(status: ConnectionState, service: ServiceEndpoint) -> Self {
        Self {
            status,
            address: None,
            service: Some(service),
        }
    }

    pub(crate) fn with_address(status: ConnectionState, address: SocketAddr) -> Self {
        Self {
            status,
            address: Some(address),
            service: None,
        }
    }
}

/// `(destination_id, opened_at)` record for an open virtual channel
/// (spec §3).
#[derive(Clone, Debug)]
pub struct VirtualChannel {
    /// `"receiver-0"` for the platform, otherwise the app's `transport_id`.
    pub destination_id: String,
    /// When this channel's implicit `CONNECT` was sent.
    pub opened_at: Instant,
}
