// ── Device manager ──
//
// Owns everything the bridge knows at runtime: the registry, the state
// tree and its synchronizer, and one task per device. Each device task
// runs that device's watchdog and owns its WebSocket event stream, so
// health checks for one device never overlap. Commands run on their own
// tasks and may overlap a check.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use chrono::Utc;
use dashmap::DashMap;
use futures_util::future::join_all;
use serde_json::Value;
use tokio::sync::{Mutex, Notify, broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use ledbridge_api::{
    DeviceSnapshot, StateUpdate, TransportConfig, WledClient, WsConnection, WsEvent, WsHandle,
    WsMessage,
};

use crate::config::BridgeConfig;
use crate::discovery::{DiscoveredDevice, DiscoverySource};
use crate::error::CoreError;
use crate::model::{DeviceRecord, MacAddress};
use crate::registry::DeviceRegistry;
use crate::sync::TreeSync;
use crate::translator::{Outbound, translate};
use crate::tree::{StateTree, TreeEvent};
use crate::watchdog::{FailureOutcome, LinkState, Transport, Watchdog};

// ── Delivery ─────────────────────────────────────────────────────────

/// How a command reached its device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Sent over the live socket; the device pushes its new state back.
    WebSocket,
    /// `POST /json`; `acknowledged` mirrors the device's `success` flag.
    Http { acknowledged: bool },
    /// Legacy `GET /win` query.
    Raw,
}

// ── DeviceManager ────────────────────────────────────────────────────

/// Entry point of the bridge.
///
/// Cheaply cloneable via `Arc<ManagerInner>`. Call [`start()`](Self::start)
/// to contact known devices, begin discovery and relay tree writes.
#[derive(Clone)]
pub struct DeviceManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    config: BridgeConfig,
    transport: TransportConfig,
    tree: Arc<StateTree>,
    sync: TreeSync,
    registry: DeviceRegistry,
    links: DashMap<IpAddr, Arc<DeviceLink>>,
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

/// Per-device resources. Dropped (and the socket closed) when the
/// device is removed or moves to another IP.
struct DeviceLink {
    client: WledClient,
    ws: ArcSwapOption<WsHandle>,
    cancel: CancellationToken,
    /// Pulls the next health check forward.
    wake: Notify,
}

impl DeviceLink {
    fn socket(&self) -> Option<Arc<WsHandle>> {
        self.ws.load_full().filter(|ws| !ws.is_closed())
    }

    fn close_socket(&self) -> bool {
        match self.ws.swap(None) {
            Some(ws) => {
                ws.close();
                true
            }
            None => false,
        }
    }

    fn stop(&self) {
        self.cancel.cancel();
        self.close_socket();
    }
}

/// What woke a device task.
enum Wakeup {
    Check,
    Socket(Option<WsEvent>),
}

impl DeviceManager {
    pub fn new(config: BridgeConfig) -> Self {
        Self::with_tree(config, Arc::new(StateTree::new()))
    }

    /// Use an existing tree. Device objects already in it (with `native.ip`)
    /// are contacted by [`try_known_devices`](Self::try_known_devices).
    pub fn with_tree(config: BridgeConfig, tree: Arc<StateTree>) -> Self {
        let transport = config.transport();
        let sync = TreeSync::new(Arc::clone(&tree), config.online_expiry());
        Self {
            inner: Arc::new(ManagerInner {
                config,
                transport,
                tree,
                sync,
                registry: DeviceRegistry::new(),
                links: DashMap::new(),
                cancel: CancellationToken::new(),
                task_handles: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    pub fn tree(&self) -> &Arc<StateTree> {
        &self.inner.tree
    }

    pub fn sync(&self) -> &TreeSync {
        &self.inner.sync
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.inner.registry
    }

    pub fn devices(&self) -> Arc<Vec<DeviceRecord>> {
        self.inner.registry.snapshot()
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Contact known devices, then start the command relay, housekeeping
    /// and (when given) the discovery feed.
    pub async fn start(&self, discovery: Option<Box<dyn DiscoverySource>>) -> Result<(), CoreError> {
        self.inner.sync.set_connection(false);
        self.try_known_devices().await;

        // Subscribe before spawning so no write slips past the relay
        let writes = self.inner.tree.subscribe();
        let mut handles = self.inner.task_handles.lock().await;
        handles.push(tokio::spawn(command_relay_task(self.clone(), writes)));
        handles.push(tokio::spawn(housekeeping_task(self.clone())));
        drop(handles);

        if let Some(source) = discovery {
            self.scan_devices(source).await?;
        }
        info!(devices = self.inner.registry.len(), "bridge started");
        Ok(())
    }

    /// Stop every task and close every socket.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        for link in self.inner.links.iter() {
            link.stop();
        }

        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        debug!("bridge stopped");
    }

    /// Initial health check for every device persisted in the tree or listed
    /// in the configuration. Returns once each has had its first check.
    pub async fn try_known_devices(&self) -> usize {
        let mut known: Vec<(IpAddr, Option<MacAddress>)> = self
            .inner
            .tree
            .devices()
            .into_iter()
            .filter_map(|(id, object)| {
                let ip = object.native.get("ip")?.as_str()?.parse().ok()?;
                Some((ip, Some(MacAddress::new(id))))
            })
            .collect();
        for ip in &self.inner.config.known_devices {
            if !known.iter().any(|(k, _)| k == ip) {
                known.push((*ip, None));
            }
        }

        let pending: Vec<_> = known
            .into_iter()
            .filter_map(|(ip, mac)| {
                let mut record = DeviceRecord::new(ip);
                record.mac = mac;
                self.inner.registry.insert(record);
                self.spawn_device(ip)
            })
            .collect();

        let count = pending.len();
        let online = join_all(pending)
            .await
            .into_iter()
            .filter(|r| matches!(r, Ok(true)))
            .count();
        info!(count, online, "known devices contacted");
        count
    }

    /// Follow a discovery feed until the manager shuts down.
    pub async fn scan_devices(&self, source: Box<dyn DiscoverySource>) -> Result<(), CoreError> {
        let mut rx = source.start(self.inner.cancel.child_token())?;
        let manager = self.clone();
        let cancel = self.inner.cancel.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    found = rx.recv() => {
                        let Some(found) = found else {
                            warn!("discovery feed ended");
                            break;
                        };
                        manager.handle_discovered(found);
                    }
                }
            }
        });
        self.inner.task_handles.lock().await.push(handle);
        Ok(())
    }

    /// Register a newly announced device, or refresh the IP of a known one.
    pub fn handle_discovered(&self, found: DiscoveredDevice) {
        let registry = &self.inner.registry;

        if let Some(mac) = &found.mac {
            if let Some(known_ip) = registry.ip_for(mac) {
                if known_ip != found.ip {
                    info!(mac = %mac, from = %known_ip, to = %found.ip, "device changed IP");
                    self.stop_link(known_ip);
                    registry.relocate(mac, found.ip);
                    self.spawn_device(found.ip);
                }
                return;
            }
        }
        if registry.contains(found.ip) {
            return;
        }

        info!("Device {} found on IP {}", found.name, found.ip);
        let mut record = DeviceRecord::new(found.ip);
        record.mac = found.mac;
        record.name = found.name;
        registry.insert(record);
        self.spawn_device(found.ip);
    }

    /// Register `ip` and start its watchdog. Returns `false` if already known.
    pub fn add_device(&self, ip: IpAddr) -> bool {
        if !self.inner.registry.insert(DeviceRecord::new(ip)) {
            return false;
        }
        self.spawn_device(ip);
        true
    }

    /// Remove a device: stop its task, close its socket and delete every
    /// tree entry and cache keyed by its MAC or IP.
    pub fn remove_device(&self, mac: &MacAddress) -> Result<(), CoreError> {
        let ip = self.inner.registry.ip_for(mac);
        let in_tree = self.inner.tree.get_object(mac.as_str()).is_some();
        if ip.is_none() && !in_tree {
            return Err(CoreError::DeviceNotFound {
                identifier: mac.to_string(),
            });
        }

        info!(mac = %mac, "Cleaning up backend structures for device");
        if let Some(ip) = ip {
            self.stop_link(ip);
            self.inner.registry.remove(ip);
        }
        let removed = self.inner.sync.remove_device(mac);
        debug!(mac = %mac, removed, "device tree deleted");
        self.inner.sync.set_connection(self.inner.registry.any_connected());
        Ok(())
    }

    /// Run every device's next health check now.
    pub fn refresh(&self) {
        for link in self.inner.links.iter() {
            link.wake.notify_one();
        }
    }

    /// Register `ip` and run one HTTP check without starting a watchdog.
    /// Commands can then be delivered over HTTP.
    pub async fn connect_once(&self, ip: IpAddr) -> Result<MacAddress, CoreError> {
        self.inner.registry.insert(DeviceRecord::new(ip));
        let existing = self.inner.links.get(&ip).map(|l| Arc::clone(l.value()));
        let link = match existing {
            Some(link) => link,
            None => {
                let link = Arc::new(self.new_link(ip)?);
                self.inner.links.insert(ip, Arc::clone(&link));
                link
            }
        };
        let mac = self.http_check(ip, &link).await?;
        self.mark_healthy(ip, &link, &mac);
        Ok(mac)
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Translate a tree write and send it to its device.
    pub async fn deliver(&self, id: &str, value: &Value) -> Result<Delivery, CoreError> {
        let command = translate(&self.inner.tree, id, value)?;
        let link = self.link_for(&command.mac)?;

        match &command.payload {
            Outbound::Json(body) => {
                let delivery = send_json(&link, body).await?;
                match delivery {
                    Delivery::Http { acknowledged: true } => {
                        self.inner.tree.acknowledge(&command.origin, command.value.clone());
                    }
                    Delivery::Http { acknowledged: false } => {
                        warn!(id, "device did not confirm command");
                    }
                    Delivery::WebSocket | Delivery::Raw => {}
                }
                debug!(id, ?delivery, "command delivered");
                Ok(delivery)
            }
            Outbound::Raw(query) => {
                link.client.raw_command(query).await?;
                self.inner.tree.acknowledge(&command.origin, command.value.clone());
                debug!(id, query = %query, "raw command delivered");
                Ok(Delivery::Raw)
            }
        }
    }

    /// Send a prebuilt state command to a device.
    pub async fn send_state(&self, mac: &MacAddress, body: &Value) -> Result<Delivery, CoreError> {
        let link = self.link_for(mac)?;
        send_json(&link, body).await
    }

    // ── Device tasks ─────────────────────────────────────────────────

    fn new_link(&self, ip: IpAddr) -> Result<DeviceLink, CoreError> {
        let client = WledClient::new(&self.inner.config.device_host(ip), &self.inner.transport)?;
        Ok(DeviceLink {
            client,
            ws: ArcSwapOption::empty(),
            cancel: self.inner.cancel.child_token(),
            wake: Notify::new(),
        })
    }

    /// Start the watchdog task for `ip`. The receiver resolves after the
    /// first check with whether it succeeded.
    fn spawn_device(&self, ip: IpAddr) -> Option<oneshot::Receiver<bool>> {
        if self.inner.links.contains_key(&ip) {
            return None;
        }
        let link = match self.new_link(ip) {
            Ok(link) => Arc::new(link),
            Err(e) => {
                warn!(ip = %ip, error = %e, "cannot create device client");
                return None;
            }
        };
        self.inner.links.insert(ip, Arc::clone(&link));

        let (first_tx, first_rx) = oneshot::channel();
        tokio::spawn(device_task(self.clone(), ip, link, first_tx));
        Some(first_rx)
    }

    fn stop_link(&self, ip: IpAddr) {
        if let Some((_, link)) = self.inner.links.remove(&ip) {
            link.stop();
        }
    }

    fn link_for(&self, mac: &MacAddress) -> Result<Arc<DeviceLink>, CoreError> {
        self.inner
            .registry
            .ip_for(mac)
            .and_then(|ip| self.inner.links.get(&ip).map(|l| Arc::clone(l.value())))
            .ok_or_else(|| CoreError::DeviceNotFound {
                identifier: mac.to_string(),
            })
    }

    /// One watchdog pass. Returns the delay until the next one.
    async fn run_check(
        &self,
        ip: IpAddr,
        link: &DeviceLink,
        watchdog: &mut Watchdog,
        events: &mut Option<mpsc::Receiver<WsEvent>>,
    ) -> (bool, Duration) {
        let recovering = matches!(
            watchdog.state(),
            LinkState::Degraded { .. } | LinkState::LongBackoff
        );
        watchdog.begin_check();

        let result = if events.is_some() && link.socket().is_some() {
            self.ping_check(ip, link, events).await.map(|()| Transport::WebSocket)
        } else {
            match self.http_check(ip, link).await {
                Ok(_) if self.open_socket(ip, link, events).await => Ok(Transport::WebSocket),
                Ok(_) => Ok(Transport::Http),
                Err(e) => Err(e),
            }
        };

        match result {
            Ok(transport) => {
                let mac = self.inner.registry.get(ip).and_then(|r| r.mac);
                if let Some(mac) = mac {
                    self.mark_healthy(ip, link, &mac);
                }
                if recovering {
                    info!(ip = %ip, %transport, "device reachable again");
                }
                (true, watchdog.on_success(transport))
            }
            Err(_) if self.link_retired(ip, link) => (false, Duration::ZERO),
            Err(e) => {
                let outcome = watchdog.on_failure();
                self.mark_failed(ip, link, events, &e, outcome);
                (false, outcome.next_check)
            }
        }
    }

    /// `GET /json` and mirror the result into the tree.
    async fn http_check(&self, ip: IpAddr, link: &DeviceLink) -> Result<MacAddress, CoreError> {
        let snapshot = link.client.get_json().await?;
        self.apply_snapshot(ip, link, snapshot).await
    }

    async fn apply_snapshot(
        &self,
        ip: IpAddr,
        link: &DeviceLink,
        mut snapshot: DeviceSnapshot,
    ) -> Result<MacAddress, CoreError> {
        let identity = snapshot.identity()?;
        let mac = MacAddress::new(&identity.mac);
        let sync = &self.inner.sync;

        // Older firmware leaves the lists out of `/json`
        if !sync.has_labels(&mac) {
            if snapshot.effects.is_empty() {
                match link.client.get_effects().await {
                    Ok(effects) => snapshot.effects = effects,
                    Err(e) => debug!(ip = %ip, error = %e, "effect list unavailable"),
                }
            }
            if snapshot.palettes.is_empty() {
                match link.client.get_palettes().await {
                    Ok(palettes) => snapshot.palettes = palettes,
                    Err(e) => debug!(ip = %ip, error = %e, "palette list unavailable"),
                }
            }
        }

        if self.link_retired(ip, link) {
            return Err(CoreError::DeviceNotFound {
                identifier: ip.to_string(),
            });
        }
        let report = sync.sync_snapshot(&mac, ip, &snapshot);
        // Removed while syncing: undo unless the device moved to another IP
        if link.cancel.is_cancelled() {
            if self.inner.registry.ip_for(&mac).is_none() {
                sync.remove_device(&mac);
            }
            return Err(CoreError::DeviceNotFound {
                identifier: mac.to_string(),
            });
        }

        let supports_ws = identity.supports_websocket();
        let was_initialized = self.inner.registry.get(ip).is_some_and(|r| r.initialized);
        self.inner.registry.update(ip, |record| {
            record.mac = Some(mac.clone());
            record.name.clone_from(&identity.name);
            record.firmware.clone_from(&identity.ver);
            record.initialized = true;
            if !supports_ws {
                record.ws_ping_supported = false;
            }
        });
        if !was_initialized {
            info!(
                ip = %ip,
                mac = %mac,
                firmware = identity.ver.as_deref().unwrap_or("?"),
                objects = report.metadata_writes,
                "Device {} initialized", identity.name
            );
        }
        Ok(mac)
    }

    /// Try to open the WebSocket after a successful HTTP check.
    async fn open_socket(
        &self,
        ip: IpAddr,
        link: &DeviceLink,
        events: &mut Option<mpsc::Receiver<WsEvent>>,
    ) -> bool {
        if !self.inner.config.websocket_enabled || events.is_some() {
            return false;
        }
        let supported = self
            .inner
            .registry
            .get(ip)
            .is_some_and(|r| r.ws_ping_supported);
        if !supported {
            return false;
        }

        let url = match link.client.ws_url() {
            Ok(url) => url,
            Err(e) => {
                debug!(ip = %ip, error = %e, "no WebSocket URL");
                return false;
            }
        };

        match WsConnection::connect(&url, link.cancel.child_token()).await {
            Ok((handle, rx)) => {
                link.ws.store(Some(Arc::new(handle)));
                *events = Some(rx);
                self.inner.registry.update(ip, |r| r.ws_connected = true);
                debug!(ip = %ip, "WebSocket link established");
                true
            }
            Err(e) if e.is_ws_unsupported() => {
                info!(ip = %ip, "device has no WebSocket endpoint, using HTTP only");
                self.inner.registry.update(ip, |r| r.ws_ping_supported = false);
                false
            }
            Err(e) => {
                debug!(ip = %ip, error = %e, "WebSocket connect failed, staying on HTTP");
                false
            }
        }
    }

    /// Send `ping` and wait for `pong`, applying any state pushes meanwhile.
    async fn ping_check(
        &self,
        ip: IpAddr,
        link: &DeviceLink,
        events: &mut Option<mpsc::Receiver<WsEvent>>,
    ) -> Result<(), CoreError> {
        let lost = |reason: &str| CoreError::WebSocketLost {
            reason: reason.to_owned(),
        };
        let socket = link.socket().ok_or_else(|| lost("socket closed"))?;
        let rx = events.as_mut().ok_or_else(|| lost("no event stream"))?;
        socket.ping()?;

        let wait_for_pong = async {
            loop {
                match rx.recv().await {
                    Some(WsEvent::Message(WsMessage::Pong)) => return Ok(()),
                    Some(WsEvent::Message(WsMessage::State(update))) => self.apply_update(ip, &update),
                    Some(WsEvent::Opened | WsEvent::Message(WsMessage::Other(_))) => {}
                    Some(WsEvent::Closed { code, reason }) => {
                        return Err(lost(&format!("closed with code {code}: {reason}")));
                    }
                    Some(WsEvent::Error(e)) => return Err(lost(&e)),
                    None => return Err(lost("event stream ended")),
                }
            }
        };

        let ping_timeout = self.inner.config.ping_timeout;
        timeout(ping_timeout, wait_for_pong)
            .await
            .unwrap_or_else(|_| {
                Err(CoreError::Timeout {
                    timeout_ms: u64::try_from(ping_timeout.as_millis()).unwrap_or(u64::MAX),
                })
            })
    }

    /// A `{state, info}` push from the device.
    fn apply_update(&self, ip: IpAddr, update: &StateUpdate) {
        let Some(mac) = self.inner.registry.get(ip).and_then(|r| r.mac) else {
            return;
        };
        if let Some(info) = &update.info {
            self.inner.sync.sync_info(&mac, info);
        }
        if let Some(state) = &update.state {
            self.inner.sync.sync_state(&mac, state);
        }
        self.inner.sync.set_online(&mac, true);
        self.inner.registry.update(ip, |r| r.last_seen = Some(Utc::now()));
    }

    /// Handle an event that arrived between checks.
    fn handle_socket_event(
        &self,
        ip: IpAddr,
        link: &DeviceLink,
        watchdog: &mut Watchdog,
        events: &mut Option<mpsc::Receiver<WsEvent>>,
        event: Option<WsEvent>,
    ) {
        let reason = match event {
            Some(WsEvent::Message(WsMessage::State(update))) => {
                self.apply_update(ip, &update);
                return;
            }
            Some(WsEvent::Message(other)) => {
                trace!(ip = %ip, message = ?other, "ignoring WebSocket message");
                return;
            }
            Some(WsEvent::Opened) => return,
            Some(WsEvent::Closed { code, reason }) => format!("closed with code {code}: {reason}"),
            Some(WsEvent::Error(e)) => e,
            None => "event stream ended".to_owned(),
        };

        info!(ip = %ip, reason = %reason, "WebSocket lost, falling back to HTTP");
        link.close_socket();
        *events = None;
        watchdog.downgrade();
        self.inner.registry.update(ip, |r| r.ws_connected = false);
    }

    /// The device was removed (or moved) since `link` was created.
    fn link_retired(&self, ip: IpAddr, link: &DeviceLink) -> bool {
        link.cancel.is_cancelled() || !self.inner.registry.contains(ip)
    }

    fn mark_healthy(&self, ip: IpAddr, link: &DeviceLink, mac: &MacAddress) {
        if self.link_retired(ip, link) {
            return;
        }
        self.inner.sync.set_online(mac, true);
        self.inner.registry.update(ip, |r| {
            r.connected = true;
            r.last_seen = Some(Utc::now());
        });
        self.inner.sync.set_connection(true);
    }

    fn mark_failed(
        &self,
        ip: IpAddr,
        link: &DeviceLink,
        events: &mut Option<mpsc::Receiver<WsEvent>>,
        err: &CoreError,
        outcome: FailureOutcome,
    ) {
        let closed = link.close_socket();
        *events = None;

        let record = self.inner.registry.update(ip, |r| {
            r.connected = false;
            r.ws_connected = false;
        });
        if let Some(mac) = record.as_ref().and_then(|r| r.mac.as_ref()) {
            self.inner.sync.mark_offline(mac);
        }
        self.inner.sync.set_connection(self.inner.registry.any_connected());

        let label = record.map_or_else(|| ip.to_string(), |r| r.label());
        let next_ms = u64::try_from(outcome.next_check.as_millis()).unwrap_or(u64::MAX);
        if outcome.long_backoff {
            error!(
                ip = %ip,
                retries = outcome.retry_count,
                next_check_ms = next_ms,
                error = %err,
                "Device {label} unreachable, retrying at the long interval"
            );
        } else if outcome.retry_count == 1 && !matches!(err, CoreError::MalformedResponse { .. }) {
            warn!(ip = %ip, next_check_ms = next_ms, socket_closed = closed, error = %err, "Device {label} offline");
        } else {
            debug!(
                ip = %ip,
                retries = outcome.retry_count,
                next_check_ms = next_ms,
                error = %err,
                "Device {label} check failed"
            );
        }
    }
}

// ── Background tasks ─────────────────────────────────────────────────

/// Watchdog loop for one device.
async fn device_task(
    manager: DeviceManager,
    ip: IpAddr,
    link: Arc<DeviceLink>,
    first_check: oneshot::Sender<bool>,
) {
    let mut watchdog = Watchdog::new(manager.inner.config.retry_policy());
    let mut events: Option<mpsc::Receiver<WsEvent>> = None;
    let mut first_check = Some(first_check);
    let mut deadline = Instant::now();

    loop {
        let wakeup = tokio::select! {
            biased;
            () = link.cancel.cancelled() => break,
            () = link.wake.notified() => Wakeup::Check,
            event = next_socket_event(&mut events) => Wakeup::Socket(event),
            () = sleep_until(deadline) => Wakeup::Check,
        };

        match wakeup {
            Wakeup::Check => {
                let check = manager.run_check(ip, &link, &mut watchdog, &mut events);
                let (healthy, next) = tokio::select! {
                    biased;
                    () = link.cancel.cancelled() => break,
                    outcome = check => outcome,
                };
                if let Some(tx) = first_check.take() {
                    let _ = tx.send(healthy);
                }
                deadline = Instant::now() + next;
            }
            Wakeup::Socket(event) => {
                manager.handle_socket_event(ip, &link, &mut watchdog, &mut events, event);
            }
        }
    }

    link.close_socket();
    debug!(ip = %ip, "device task stopped");
}

async fn next_socket_event(events: &mut Option<mpsc::Receiver<WsEvent>>) -> Option<WsEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Relay unacknowledged tree writes to their devices.
async fn command_relay_task(manager: DeviceManager, mut rx: broadcast::Receiver<TreeEvent>) {
    let cancel = manager.inner.cancel.clone();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = rx.recv() => match event {
                Ok(TreeEvent::State { id, state }) if !state.ack => {
                    let manager = manager.clone();
                    tokio::spawn(async move {
                        if let Err(e) = manager.deliver(&id, &state.val).await {
                            warn!(id = %id, error = %e, "command not delivered");
                        }
                    });
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "command relay lagged, writes dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

/// Expire stale `_online` indicators between checks.
async fn housekeeping_task(manager: DeviceManager) {
    let mut interval = tokio::time::interval(manager.inner.config.poll_interval);
    let cancel = manager.inner.cancel.clone();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                let expired = manager.inner.tree.expire_due();
                if expired > 0 {
                    debug!(expired, "states expired");
                }
            }
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

/// WebSocket when a socket is live, `POST /json` otherwise.
async fn send_json(link: &DeviceLink, body: &Value) -> Result<Delivery, CoreError> {
    if let Some(socket) = link.socket() {
        match socket.send_json(body) {
            Ok(()) => return Ok(Delivery::WebSocket),
            Err(e) => debug!(error = %e, "WebSocket send failed, using HTTP"),
        }
    }
    let ack = link.client.post_state(body).await?;
    Ok(Delivery::Http {
        acknowledged: ack.success,
    })
}
