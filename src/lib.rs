//! Async client for discovering and remote-controlling CASTV2 receivers
//! (Chromecasts and compatible devices): mDNS discovery, a length-prefixed
//! protobuf wire codec, a reconnecting connection engine, and a controller
//! framework with built-in heartbeat/receiver/media/multizone controllers.

#[macro_use]
extern crate log;

mod codec;
pub mod config;
pub mod controller;
pub mod device;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod message;
pub mod model;
#[allow(clippy::all, clippy::pedantic)]
mod proto;
pub mod quick_play;

pub use config::ClientConfig;
pub use device::CastDevice;
pub use discovery::{CastTypeProbe, Discovery, DiscoveryError, DiscoveryEvent};
pub use error::{CastError, Result};
pub use model::{
    CastInfo, CastStatus, CastType, ConnectionState, ConnectionStatus, MediaStatus, PlayerState,
    ServiceEndpoint, StreamType, SupportedMediaCommands,
};
pub use quick_play::quick_play;
