//! Controller framework (spec §4.3).
//!
//! Generalizes the teacher's namespace-keyed `channel::Handler` trait (which
//! only knew how to parse an inbound payload) into the full controller
//! contract from the spec: a controller additionally declares whether it
//! targets the platform or the current app, names an app it can auto-launch,
//! and gets lifecycle hooks for registration and virtual-channel open/close.
//! Modeled as an `async_trait` object (`Arc<dyn Controller>`) rather than the
//! teacher's generic-over-`Handler::Payload` struct, since the engine needs
//! to hold a namespace-keyed collection of heterogeneous controllers.

use async_trait::async_trait;
use serde_json::Value;

use crate::engine::EngineHandle;
use crate::error::{CastError, Result};
use crate::proto::CastMessage;

pub mod heartbeat;
pub mod media;
pub mod multizone;
pub mod receiver;

/// Options for `Controller::send`.
#[derive(Clone, Copy, Debug, Default)]
pub struct SendOptions {
    /// Attach the current app session id to the outgoing payload.
    pub inc_session_id: bool,
    /// Suppress `requestId` assignment (spec §3: reserved for
    /// unsolicited/heartbeat messages).
    pub no_add_request_id: bool,
}

/// A namespace-scoped message handler, registered with a connection engine.
///
/// Implementors are expected to be cheap to `Clone` behind an `Arc` and
/// `Send + Sync`, since the engine dispatches to them from its read loop.
#[async_trait]
pub trait Controller: Send + Sync {
    /// Namespace this controller handles, e.g.
    /// `"urn:x-cast:com.google.cast.receiver"`.
    fn namespace(&self) -> &str;

    /// App this controller can auto-launch when its namespace is not
    /// exposed by the currently running app. `None` means `send` fails with
    /// `UnsupportedNamespace` instead of auto-launching.
    fn supporting_app_id(&self) -> Option<&str> {
        None
    }

    /// `true` if messages should target the platform (`"receiver-0"`)
    /// rather than the current app's transport id.
    fn target_platform(&self) -> bool {
        false
    }

    /// Called once, when the controller is wired to an engine.
    async fn registered(&self, engine: EngineHandle);

    /// A virtual channel supporting this namespace has opened.
    async fn channel_connected(&self) {}

    /// The inverse of `channel_connected`.
    async fn channel_disconnected(&self) {}

    /// Handle an inbound message already JSON-parsed into `parsed`.
    /// Returns `true` if the message was consumed (spec §4.3).
    async fn receive_message(&self, message: &CastMessage, parsed: &Value) -> bool;

    /// Drop engine references; called on controller teardown.
    async fn tear_down(&self) {}
}

/// Engine-facing half of `Controller::send`: resolve the destination,
/// auto-launching `supporting_app_id` if the namespace isn't currently
/// exposed, then hand off to `EngineHandle::send`.
///
/// Pulled out of the trait as a free function (rather than a default trait
/// method) so it can be shared by controllers without every implementor
/// re-deriving the same auto-launch chaining logic.
pub(crate) async fn send(
    controller: &(impl Controller + ?Sized),
    engine: &EngineHandle,
    payload: Value,
    opts: SendOptions,
) -> Result<Option<Value>> {
    let namespace = controller.namespace();

    if !controller.target_platform() && !engine.app_namespaces().await.contains(&namespace.to_owned()) {
        match controller.supporting_app_id() {
            Some(app_id) => {
                engine.launch_app(app_id).await?;
                if !engine.app_namespaces().await.contains(&namespace.to_owned()) {
                    return Err(CastError::UnsupportedNamespace {
                        namespace: namespace.to_owned(),
                    });
                }
            }
            None => {
                return Err(CastError::UnsupportedNamespace {
                    namespace: namespace.to_owned(),
                });
            }
        }
    }

    let destination = if controller.target_platform() {
        crate::config::PLATFORM_DESTINATION_ID.to_owned()
    } else {
        engine
            .current_transport_id()
            .await
            .ok_or(CastError::NotConnected)?
    };

    engine.send(namespace, &destination, payload, opts).await
}
