//! Stable error taxonomy for the client. See spec §7.

use thiserror::Error;

use crate::codec::WireError;
use crate::discovery::DiscoveryError;

/// Errors surfaced to callers of the public API.
///
/// Transport-layer failures are absorbed by the connection engine (it emits
/// `ConnectionStatus::Lost` and reconnects); this enum is for the failures
/// that a user-initiated operation can actually observe.
#[derive(Debug, Error)]
pub enum CastError {
    /// Every configured service endpoint was tried and failed; terminal for
    /// this connection attempt.
    #[error("unable to connect to any service endpoint for this receiver")]
    ConnectionError,

    /// A command was issued while the engine is connecting, lost, or
    /// otherwise not in the `Connected` state.
    #[error("not connected to receiver")]
    NotConnected,

    /// A command was issued after `disconnect()`/`stop()`.
    #[error("client has been stopped")]
    Stopped,

    /// The controller's namespace is not offered by the currently running
    /// app and the controller has no `supporting_app_id` to auto-launch.
    #[error("namespace {namespace} is not supported by the running application")]
    UnsupportedNamespace {
        /// Namespace that could not be reached.
        namespace: String,
    },

    /// A controller was used before `registered()` wired it to an engine.
    #[error("controller for namespace {namespace} is not registered")]
    ControllerNotRegistered {
        /// Namespace of the unregistered controller.
        namespace: String,
    },

    /// `quick_play` was asked for an app name with no registered adapter
    /// (spec §4.9).
    #[error("no quick-play adapter registered for app {app_name}")]
    NotImplemented {
        /// App name that had no matching adapter.
        app_name: String,
    },

    /// `volume_up`/`volume_down` was called with a non-positive step
    /// (spec §4.8: "delta>0 required").
    #[error("volume step must be positive, got {step}")]
    InvalidVolumeStep {
        /// The rejected step value.
        step: f64,
    },

    /// An awaited request/response was resolved as a failure, typically
    /// because the connection was lost while the request was pending.
    #[error("request failed")]
    RequestFailed,

    /// An awaited request/response did not arrive before its deadline.
    ///
    /// Carries the name of the operation that timed out rather than a bare
    /// failure (per spec §9 Open Question 3).
    #[error("{operation} timed out waiting for a response")]
    RequestTimeout {
        /// Name of the operation that timed out, e.g. `"play_media"`.
        operation: &'static str,
    },

    /// Framing/protobuf/JSON decode or encode failure on the wire.
    #[error(transparent)]
    Wire(#[from] WireError),

    /// mDNS discovery failure.
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    /// Underlying TLS or TCP I/O failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS handshake failure.
    #[error("tls error: {0}")]
    Tls(#[from] native_tls::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CastError>;
