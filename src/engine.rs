//! Connection engine (spec §4.7): owns one receiver's TLS socket, its
//! request-id correlation table, virtual channel bookkeeping, and the
//! reconnect-with-backoff state machine.
//!
//! The teacher's equivalent (`provider.rs` + `session.rs` + `task.rs` +
//! `channel/connection.rs`) split this across a futures-0.1
//! `Stream`/`Sink` pair driven by a hand-rolled executor task and a
//! `futures-locks`-guarded `ConnectState`. This module keeps the same shape
//! — one long-lived task owns the socket, state is shared behind locks for
//! controllers to read — but drives it with async/await, a single
//! `tokio::select!` loop instead of a polled `Stream` combinator chain, and
//! `tokio_util::sync::CancellationToken` in place of `stream-util`.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, watch, Mutex, RwLock};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use crate::codec::{self, CastMessageCodec};
use crate::config::{self, ClientConfig};
use crate::controller::heartbeat;
use crate::controller::{Controller, SendOptions};
use crate::discovery;
use crate::error::{CastError, Result};
use crate::message::{self, MessageBuilder};
use crate::model::{CastInfo, CastStatus, ConnectionState, ConnectionStatus, ServiceEndpoint, VirtualChannel};
use crate::proto::CastMessage;

/// App-session bookkeeping derived from the most recent `RECEIVER_STATUS`
/// (spec §3). Reset to its default on every fresh TLS connect.
#[derive(Clone, Debug, Default)]
struct SessionState {
    app_id: Option<String>,
    session_id: Option<String>,
    transport_id: Option<String>,
    namespaces: Vec<String>,
}

struct EngineShared {
    config: ClientConfig,
    cast_info: RwLock<CastInfo>,
    session: RwLock<SessionState>,
    app_id_changes: watch::Sender<Option<String>>,
    request_id: AtomicI64,
    pending: Mutex<HashMap<i64, oneshot::Sender<Value>>>,
    controllers: RwLock<HashMap<String, Arc<dyn Controller>>>,
    outbound: mpsc::UnboundedSender<CastMessage>,
    status: broadcast::Sender<ConnectionStatus>,
    open_channels: Mutex<Vec<VirtualChannel>>,
    state: Mutex<ConnectionState>,
    cancel: CancellationToken,
}

impl EngineShared {
    async fn set_state(&self, state: ConnectionState) {
        *self.state.lock().await = state;
    }

    fn publish(&self, status: ConnectionStatus) {
        let _ = self.status.send(status);
    }

    async fn reset_session(&self) {
        *self.session.write().await = SessionState::default();
        self.open_channels.lock().await.clear();
        // `request_id` starts at 1, not 0: id 0 is reserved for
        // unsolicited/heartbeat messages (spec's request-id discipline), so
        // the first `fetch_add` must return 1, matching a fresh connect.
        self.request_id.store(1, Ordering::SeqCst);
        let _ = self.app_id_changes.send(None);
    }

    async fn fail_pending(&self) {
        self.pending.lock().await.clear();
    }

    async fn open_channel(&self, destination: &str) {
        let mut channels = self.open_channels.lock().await;
        if !channels.iter().any(|vc| vc.destination_id == destination) {
            channels.push(VirtualChannel {
                destination_id: destination.to_owned(),
                opened_at: Instant::now(),
            });
        }
    }

    async fn notify_platform_channel_connected(&self) {
        let controllers = self.controllers.read().await;
        for controller in controllers.values() {
            if controller.target_platform() {
                controller.channel_connected().await;
            }
        }
    }

    async fn notify_namespaces(&self, namespaces: &[String], connected: bool) {
        let controllers = self.controllers.read().await;
        for namespace in namespaces {
            if let Some(controller) = controllers.get(namespace) {
                if connected {
                    controller.channel_connected().await;
                } else {
                    controller.channel_disconnected().await;
                }
            }
        }
    }

    /// Apply a freshly parsed `RECEIVER_STATUS`: update session bookkeeping,
    /// and if the running app's transport id changed, close the previous
    /// virtual channel and open the new one (spec §4.7, §4.8 app-channel
    /// delay quirk).
    async fn on_new_cast_status(self: &Arc<Self>, status: CastStatus) {
        let (transport_changed, previous_transport, previous_namespaces) = {
            let mut session = self.session.write().await;
            let transport_changed = session.transport_id != status.transport_id;
            let previous_transport = session.transport_id.clone();
            let previous_namespaces = std::mem::take(&mut session.namespaces);

            session.app_id = status.app_id.clone();
            session.session_id = status.session_id.clone();
            session.transport_id = status.transport_id.clone();
            session.namespaces = status.namespaces.clone();
            (transport_changed, previous_transport, previous_namespaces)
        };

        let _ = self.app_id_changes.send(status.app_id.clone());

        if !transport_changed {
            return;
        }

        if let Some(previous) = previous_transport {
            let _ = self.outbound.send(message::close(&self.config.source_id, &previous));
            self.open_channels.lock().await.retain(|vc| vc.destination_id != previous);
            self.notify_namespaces(&previous_namespaces, false).await;
        }

        let Some(new_transport) = status.transport_id.clone() else {
            return;
        };

        let delay = self
            .config
            .channel_open_delay(status.display_name.as_deref().unwrap_or_default());
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.open_channel(&new_transport).await;
        let _ = self
            .outbound
            .send(message::connect(&self.config.source_id, &new_transport));
        self.notify_namespaces(&status.namespaces, true).await;
    }

    async fn dispatch(self: &Arc<Self>, raw: CastMessage) {
        let namespace = raw.get_namespace().to_owned();
        let Some(payload) = codec::payload_utf8(&raw) else {
            return;
        };
        let Ok(parsed) = serde_json::from_str::<Value>(payload) else {
            return;
        };

        if let Some(id) = parsed.get("requestId").and_then(Value::as_i64) {
            if id != 0 {
                if let Some(tx) = self.pending.lock().await.remove(&id) {
                    let _ = tx.send(parsed.clone());
                }
            }
        }

        let controller = self.controllers.read().await.get(&namespace).cloned();
        if let Some(controller) = controller {
            controller.receive_message(&raw, &parsed).await;
        }
    }
}

/// Clonable, `Send + Sync` handle to a running connection engine. This is
/// what controllers and the device façade hold; the engine's reconnect loop
/// itself is a detached task with no handle of its own beyond this.
#[derive(Clone)]
pub struct EngineHandle {
    shared: Arc<EngineShared>,
}

impl EngineHandle {
    /// Start the reconnect loop for `cast_info` and return a handle to it.
    /// The loop runs until `stop()` is called or the process exits.
    pub fn connect(cast_info: CastInfo, config: ClientConfig) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (status_tx, _) = broadcast::channel(32);
        let (app_id_tx, _) = watch::channel(None);

        let shared = Arc::new(EngineShared {
            config,
            cast_info: RwLock::new(cast_info),
            session: RwLock::new(SessionState::default()),
            app_id_changes: app_id_tx,
            request_id: AtomicI64::new(1),
            pending: Mutex::new(HashMap::new()),
            controllers: RwLock::new(HashMap::new()),
            outbound: outbound_tx,
            status: status_tx,
            open_channels: Mutex::new(Vec::new()),
            state: Mutex::new(ConnectionState::Idle),
            cancel: CancellationToken::new(),
        });

        tokio::spawn(reconnect_loop(shared.clone(), outbound_rx));

        Self { shared }
    }

    /// Register a controller. Calls `Controller::registered` before making
    /// it visible to the dispatch table, so a controller can assume
    /// `self.engine` is set by the time any message could reach it.
    pub async fn register_controller(&self, controller: Arc<dyn Controller>) {
        let namespace = controller.namespace().to_owned();
        controller.registered(self.clone()).await;
        self.shared.controllers.write().await.insert(namespace, controller);
    }

    /// Namespaces the currently running app exposes, per the last
    /// `RECEIVER_STATUS`.
    pub async fn app_namespaces(&self) -> Vec<String> {
        self.shared.session.read().await.namespaces.clone()
    }

    /// Transport id (destination id) of the currently running app, if any.
    pub async fn current_transport_id(&self) -> Option<String> {
        self.shared.session.read().await.transport_id.clone()
    }

    /// App id of the currently running app, if any.
    pub async fn current_app_id(&self) -> Option<String> {
        self.shared.session.read().await.app_id.clone()
    }

    /// Session id of the currently running app, if any.
    pub async fn current_session_id(&self) -> Option<String> {
        self.shared.session.read().await.session_id.clone()
    }

    /// Subscribe to connection lifecycle transitions.
    pub fn connection_status(&self) -> broadcast::Receiver<ConnectionStatus> {
        self.shared.status.subscribe()
    }

    /// Replace the set of service endpoints tried on the next reconnect,
    /// e.g. after discovery resolves a new address for this receiver.
    pub async fn update_cast_info(&self, cast_info: CastInfo) {
        *self.shared.cast_info.write().await = cast_info;
    }

    /// Send `payload` in `namespace` to `destination`, opening the virtual
    /// channel first if needed (spec §4.7). With `opts.no_add_request_id`
    /// unset, awaits the correlated response and returns it; otherwise
    /// returns `Ok(None)` once the frame is enqueued.
    pub async fn send(
        &self,
        namespace: &str,
        destination: &str,
        mut payload: Value,
        opts: SendOptions,
    ) -> Result<Option<Value>> {
        if *self.shared.state.lock().await != ConnectionState::Connected {
            return Err(CastError::NotConnected);
        }

        self.ensure_channel_open(destination).await?;

        let request_id = if opts.no_add_request_id {
            None
        } else {
            let id = self.shared.request_id.fetch_add(1, Ordering::SeqCst);
            if let Value::Object(ref mut map) = payload {
                map.insert("requestId".to_owned(), Value::from(id));
            }
            Some(id)
        };

        if opts.inc_session_id {
            if let Some(session_id) = self.shared.session.read().await.session_id.clone() {
                if let Value::Object(ref mut map) = payload {
                    map.insert("sessionId".to_owned(), Value::from(session_id));
                }
            }
        }

        let message = MessageBuilder::default()
            .namespace(namespace)
            .source(&self.shared.config.source_id)
            .destination(destination)
            .payload(&payload)
            .into_message();

        let Some(id) = request_id else {
            self.shared.outbound.send(message).map_err(|_| CastError::NotConnected)?;
            return Ok(None);
        };

        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().await.insert(id, tx);
        if self.shared.outbound.send(message).is_err() {
            self.shared.pending.lock().await.remove(&id);
            return Err(CastError::NotConnected);
        }
        rx.await.map(Some).map_err(|_| CastError::RequestFailed)
    }

    /// Feed a freshly parsed `RECEIVER_STATUS` into session/virtual-channel
    /// bookkeeping. Called by `controller::receiver::ReceiverController`
    /// after it updates its own status cache and notifies its listeners.
    pub async fn report_cast_status(&self, status: CastStatus) {
        self.shared.on_new_cast_status(status).await;
    }

    /// Launch `app_id` on the platform and wait for `RECEIVER_STATUS` to
    /// confirm it's running, per `ClientConfig::request_timeout`
    /// (spec §4.5, §4.6 auto-launch).
    pub async fn launch_app(&self, app_id: &str) -> Result<()> {
        if self.shared.session.read().await.app_id.as_deref() == Some(app_id) {
            return Ok(());
        }

        let mut watcher = self.shared.app_id_changes.subscribe();
        self.send(
            config::RECEIVER_NAMESPACE,
            config::PLATFORM_DESTINATION_ID,
            serde_json::json!({ "type": "LAUNCH", "appId": app_id }),
            SendOptions::default(),
        )
        .await?;

        let wanted = app_id.to_owned();
        tokio::time::timeout(self.shared.config.request_timeout, async move {
            loop {
                if watcher.borrow().as_deref() == Some(wanted.as_str()) {
                    return;
                }
                if watcher.changed().await.is_err() {
                    return;
                }
            }
        })
        .await
        .map_err(|_| CastError::RequestTimeout { operation: "launch_app" })
    }

    /// Stop the engine: close the socket, cancel the reconnect loop, and
    /// fail any pending requests. Idempotent.
    pub fn stop(&self) {
        self.shared.cancel.cancel();
    }

    async fn ensure_channel_open(&self, destination: &str) -> Result<()> {
        let already_open = self
            .shared
            .open_channels
            .lock()
            .await
            .iter()
            .any(|vc| vc.destination_id == destination);
        if already_open {
            return Ok(());
        }

        self.shared
            .outbound
            .send(message::connect(&self.shared.config.source_id, destination))
            .map_err(|_| CastError::NotConnected)?;
        self.shared.open_channel(destination).await;
        Ok(())
    }
}

enum ConnectionOutcome {
    Stopped,
    Lost,
}

async fn reconnect_loop(shared: Arc<EngineShared>, mut outbound_rx: mpsc::UnboundedReceiver<CastMessage>) {
    let mut attempt: u32 = 0;

    loop {
        if shared.cancel.is_cancelled() {
            break;
        }

        let hosts = resolvable_hosts(&shared).await;
        if hosts.is_empty() {
            shared.set_state(ConnectionState::FailedResolve).await;
            shared.publish(ConnectionStatus::new(ConnectionState::FailedResolve));
            if wait_backoff(&shared, &mut attempt).await {
                break;
            }
            continue;
        }

        shared.set_state(ConnectionState::Connecting).await;
        shared.publish(ConnectionStatus::new(ConnectionState::Connecting));

        let mut established = None;
        for addr in &hosts {
            match connect_one(&shared, *addr).await {
                Ok(stream) => {
                    established = Some((stream, *addr));
                    break;
                }
                Err(err) => debug!("connect attempt to {} failed: {}", addr, err),
            }
        }

        let Some((stream, addr)) = established else {
            shared.set_state(ConnectionState::Failed).await;
            shared.publish(ConnectionStatus::with_address(ConnectionState::Failed, hosts[0]));
            if wait_backoff(&shared, &mut attempt).await {
                break;
            }
            continue;
        };

        attempt = 0;
        shared.reset_session().await;
        shared.set_state(ConnectionState::Connected).await;
        shared.publish(ConnectionStatus::with_address(ConnectionState::Connected, addr));

        match drive_connection(&shared, stream, &mut outbound_rx).await {
            ConnectionOutcome::Stopped => break,
            ConnectionOutcome::Lost => {
                shared.fail_pending().await;
                shared.set_state(ConnectionState::Lost).await;
                shared.publish(ConnectionStatus::with_address(ConnectionState::Lost, addr));
            }
        }
    }

    shared.set_state(ConnectionState::Stopped).await;
    shared.publish(ConnectionStatus::new(ConnectionState::Stopped));
}

async fn resolvable_hosts(shared: &Arc<EngineShared>) -> Vec<SocketAddr> {
    let services = shared.cast_info.read().await.services.clone();
    let mut hosts = Vec::with_capacity(services.len());
    for service in services {
        match service {
            ServiceEndpoint::Host(addr) => hosts.push(addr),
            ServiceEndpoint::MdnsName(name) => {
                match resolve_mdns_name(&name, shared.config.connect_timeout).await {
                    Some(addr) => hosts.push(addr),
                    None => warn!("failed to resolve mdns endpoint {} within timeout", name),
                }
            }
        }
    }
    hosts
}

/// One-shot resolution of a single `_googlecast._tcp.local.` instance name
/// to a socket address, for `CastInfo`s built with only an unresolved mDNS
/// name (spec §4.2/§4.7 step 2). Spins up its own short-lived browse rather
/// than sharing a `discovery::Discovery` instance, since the engine has no
/// dependency on one and a receiver can be connected to directly without
/// ever going through discovery.
async fn resolve_mdns_name(name: &str, timeout: Duration) -> Option<SocketAddr> {
    let daemon = mdns_sd::ServiceDaemon::new().ok()?;
    let events = daemon.browse(discovery::SERVICE_TYPE).ok()?;
    let deadline = tokio::time::Instant::now() + timeout;

    let result = loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break None;
        }
        let Ok(Ok(event)) = tokio::time::timeout(remaining, events.recv_async()).await else {
            break None;
        };
        if let mdns_sd::ServiceEvent::ServiceResolved(info) = event {
            if info.get_fullname() == name {
                let port = if info.get_port() == 0 {
                    discovery::DEFAULT_CAST_PORT
                } else {
                    info.get_port()
                };
                if let Some(addr) = info.get_addresses().iter().next() {
                    break Some(SocketAddr::new(IpAddr::from(*addr), port));
                }
            }
        }
    };

    let _ = daemon.stop_browse(discovery::SERVICE_TYPE);
    result
}

async fn connect_one(
    shared: &Arc<EngineShared>,
    addr: SocketAddr,
) -> Result<tokio_native_tls::TlsStream<TcpStream>> {
    let tcp = tokio::time::timeout(shared.config.connect_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| CastError::ConnectionError)??;

    // Cast receivers present self-signed certificates; there's no public CA
    // to validate against (spec §5 non-goal: no certificate validation).
    let connector = native_tls::TlsConnector::builder()
        .danger_accept_invalid_certs(true)
        .danger_accept_invalid_hostnames(true)
        .build()?;
    let connector = tokio_native_tls::TlsConnector::from(connector);

    let tls = tokio::time::timeout(shared.config.connect_timeout, connector.connect("castdevice", tcp))
        .await
        .map_err(|_| CastError::ConnectionError)??;
    Ok(tls)
}

async fn drive_connection(
    shared: &Arc<EngineShared>,
    stream: tokio_native_tls::TlsStream<TcpStream>,
    outbound_rx: &mut mpsc::UnboundedReceiver<CastMessage>,
) -> ConnectionOutcome {
    let framed = Framed::new(stream, CastMessageCodec::default());
    let (mut sink, mut inbound) = framed.split();

    shared.open_channel(config::PLATFORM_DESTINATION_ID).await;
    if sink
        .send(message::connect(&shared.config.source_id, config::PLATFORM_DESTINATION_ID))
        .await
        .is_err()
    {
        return ConnectionOutcome::Lost;
    }
    shared.notify_platform_channel_connected().await;

    // On every successful connect, request status and prove liveness before
    // any other frame crosses the wire (spec §4.7 step 4).
    let get_status = MessageBuilder::default()
        .namespace(config::RECEIVER_NAMESPACE)
        .source(&shared.config.source_id)
        .destination(config::PLATFORM_DESTINATION_ID)
        .payload(&serde_json::json!({ "type": "GET_STATUS" }))
        .into_message();
    if sink.send(get_status).await.is_err() {
        return ConnectionOutcome::Lost;
    }
    let ping = heartbeat::ping_message(&shared.config.source_id, config::PLATFORM_DESTINATION_ID);
    if sink.send(ping).await.is_err() {
        return ConnectionOutcome::Lost;
    }

    let mut heartbeat_timer = tokio::time::interval(shared.config.ping_interval);
    heartbeat_timer.tick().await; // first tick fires immediately; the ping it would send already went out above
    let mut pong_deadline = tokio::time::Instant::now() + shared.config.ping_interval + shared.config.pong_grace;

    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => {
                let _ = sink.send(message::close(&shared.config.source_id, config::PLATFORM_DESTINATION_ID)).await;
                return ConnectionOutcome::Stopped;
            }
            _ = tokio::time::sleep_until(pong_deadline) => {
                warn!("heartbeat expired, reconnecting");
                return ConnectionOutcome::Lost;
            }
            _ = heartbeat_timer.tick() => {
                let ping = heartbeat::ping_message(&shared.config.source_id, config::PLATFORM_DESTINATION_ID);
                if sink.send(ping).await.is_err() {
                    return ConnectionOutcome::Lost;
                }
            }
            outbound = outbound_rx.recv() => {
                match outbound {
                    Some(message) => {
                        if sink.send(message).await.is_err() {
                            return ConnectionOutcome::Lost;
                        }
                    }
                    None => return ConnectionOutcome::Stopped,
                }
            }
            inbound_frame = inbound.next() => {
                match inbound_frame {
                    Some(Ok(message)) => {
                        if message.get_namespace() == heartbeat::NAMESPACE {
                            pong_deadline = tokio::time::Instant::now() + shared.config.ping_interval + shared.config.pong_grace;
                        }
                        shared.dispatch(message).await;
                    }
                    Some(Err(err)) => {
                        warn!("wire error, reconnecting: {}", err);
                        return ConnectionOutcome::Lost;
                    }
                    None => return ConnectionOutcome::Lost,
                }
            }
        }
    }
}

/// The deterministic half of `wait_backoff`: exponential growth from
/// `INITIAL_BACKOFF`, capped at `max_backoff`. Split out so growth can be
/// asserted without the jitter or the cancellation race.
fn backoff_duration(attempt: u32, max_backoff: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    Duration::from_secs(config::INITIAL_BACKOFF.as_secs().saturating_mul(1u64 << exponent)).min(max_backoff)
}

/// Exponential backoff with jitter between reconnect attempts, capped at
/// `ClientConfig::max_backoff` (spec §4.7). Returns `true` if the engine was
/// stopped while waiting.
async fn wait_backoff(shared: &Arc<EngineShared>, attempt: &mut u32) -> bool {
    *attempt += 1;
    let backoff = backoff_duration(*attempt, shared.config.max_backoff);
    let jitter = Duration::from_millis((rand::random::<f64>() * 250.0) as u64);

    tokio::select! {
        _ = tokio::time::sleep(backoff + jitter) => false,
        _ = shared.cancel.cancelled() => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_shared() -> Arc<EngineShared> {
        let (outbound_tx, _outbound_rx) = mpsc::unbounded_channel();
        let (status_tx, _) = broadcast::channel(32);
        let (app_id_tx, _) = watch::channel(None);
        Arc::new(EngineShared {
            config: ClientConfig::default(),
            cast_info: RwLock::new(CastInfo::from_known_host(
                uuid::Uuid::nil(),
                "127.0.0.1:8009".parse().unwrap(),
                "Test Receiver",
            )),
            session: RwLock::new(SessionState::default()),
            app_id_changes: app_id_tx,
            request_id: AtomicI64::new(1),
            pending: Mutex::new(HashMap::new()),
            controllers: RwLock::new(HashMap::new()),
            outbound: outbound_tx,
            status: status_tx,
            open_channels: Mutex::new(Vec::new()),
            state: Mutex::new(ConnectionState::Idle),
            cancel: CancellationToken::new(),
        })
    }

    #[test]
    fn backoff_grows_exponentially_then_caps() {
        let max = Duration::from_secs(300);
        assert_eq!(backoff_duration(1, max), Duration::from_secs(1));
        assert_eq!(backoff_duration(2, max), Duration::from_secs(2));
        assert_eq!(backoff_duration(3, max), Duration::from_secs(4));
        assert_eq!(backoff_duration(4, max), Duration::from_secs(8));
        assert_eq!(backoff_duration(10, max), max);
    }

    #[tokio::test]
    async fn reset_session_resets_request_id_to_one() {
        let shared = test_shared();
        shared.request_id.fetch_add(41, Ordering::SeqCst);
        assert_eq!(shared.request_id.load(Ordering::SeqCst), 42);

        shared.reset_session().await;

        assert_eq!(shared.request_id.load(Ordering::SeqCst), 1);
    }
}
