// ── Controller ──
//
// Owns one session per registered vacuum. Background tasks per device
// fold inbound Data Points into the store, raise events, serialize
// composite commands, and (optionally) keep the session connected.

use std::future::Future;
use std::sync::{Arc, MutexGuard, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use robovac_api::{ConnectionState, DpsMap, DpsValue, Session, SessionEvent};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::command::{self, CommandEnvelope, CommandResult, Step, VacuumCommand};
use crate::config::{DeviceConfig, ReconnectConfig, calculate_backoff};
use crate::error::CoreError;
use crate::model::{DeviceStatus, StatusTracker, Transition, VacuumDps, encode_command};
use crate::store::{DeviceSnapshot, DeviceStore};

const EVENT_CHANNEL_SIZE: usize = 256;
const COMMAND_CHANNEL_SIZE: usize = 16;

// ── DeviceEvent ──────────────────────────────────────────────────────

/// Change notifications raised by the controller.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DeviceEvent {
    StatusChanged {
        device_id: String,
        status: DeviceStatus,
        previous: Option<DeviceStatus>,
    },
    /// Carries only the Data Points whose value changed.
    DpsUpdated { device_id: String, dps: DpsMap },
    ConnectivityChanged { device_id: String, online: bool },
}

impl DeviceEvent {
    pub fn device_id(&self) -> &str {
        match self {
            Self::StatusChanged { device_id, .. }
            | Self::DpsUpdated { device_id, .. }
            | Self::ConnectivityChanged { device_id, .. } => device_id,
        }
    }
}

// ── Controller ───────────────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<ControllerInner>`.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    reconnect: ReconnectConfig,
    store: Arc<DeviceStore>,
    devices: DashMap<String, Arc<DeviceHandle>>,
    event_tx: broadcast::Sender<Arc<DeviceEvent>>,
    cancel: CancellationToken,
}

struct DeviceHandle {
    config: DeviceConfig,
    session: Session,
    tracker: std::sync::Mutex<StatusTracker>,
    command_tx: mpsc::Sender<CommandEnvelope>,
    /// Child of the controller token; cancelled when the device is removed.
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl DeviceHandle {
    fn device_id(&self) -> &str {
        &self.config.device_id
    }

    fn tracker(&self) -> MutexGuard<'_, StatusTracker> {
        self.tracker.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Controller {
    /// Create an empty controller. Register devices with
    /// [`add_device`](Self::add_device).
    pub fn new(reconnect: ReconnectConfig) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_SIZE);

        Self {
            inner: Arc::new(ControllerInner {
                reconnect,
                store: Arc::new(DeviceStore::new()),
                devices: DashMap::new(),
                event_tx,
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn store(&self) -> &Arc<DeviceStore> {
        &self.inner.store
    }

    // ── Device registry ──────────────────────────────────────────────

    /// Register a device and start its event and command tasks.
    ///
    /// Does NOT connect: call [`connect`](Self::connect),
    /// [`keep_connected`](Self::keep_connected), or [`attach`](Self::attach).
    pub async fn add_device(&self, config: DeviceConfig) -> Result<(), CoreError> {
        let key = config.device_key()?;
        let device_id = config.device_id.clone();
        let session = Session::new(config.session_config(), key);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);

        let handle = Arc::new(DeviceHandle {
            session,
            tracker: std::sync::Mutex::new(StatusTracker::new()),
            command_tx,
            cancel: self.inner.cancel.child_token(),
            task_handles: Mutex::new(Vec::new()),
            config,
        });

        match self.inner.devices.entry(device_id.clone()) {
            Entry::Occupied(_) => {
                return Err(CoreError::DuplicateDevice {
                    identifier: device_id,
                });
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&handle));
            }
        }

        self.inner.store.upsert(DeviceSnapshot::new(
            device_id.clone(),
            handle.config.display_name(),
            handle.config.host.clone(),
        ));

        let events = handle.session.subscribe();
        let mut tasks = handle.task_handles.lock().await;
        tasks.push(tokio::spawn(device_event_task(
            self.clone(),
            Arc::clone(&handle),
            events,
        )));
        tasks.push(tokio::spawn(command_processor_task(
            self.clone(),
            Arc::clone(&handle),
            command_rx,
        )));
        drop(tasks);

        info!(device_id = %device_id, host = %handle.config.host, "device registered");
        Ok(())
    }

    /// Stop a device's tasks, close its session, and forget it.
    pub async fn remove_device(&self, device_id: &str) -> Result<(), CoreError> {
        let (_, handle) = self
            .inner
            .devices
            .remove(device_id)
            .ok_or_else(|| not_found(device_id))?;

        shutdown_device(&handle).await;
        self.inner.store.remove(device_id);
        info!(device_id, "device removed");
        Ok(())
    }

    pub fn device_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .inner
            .devices
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        ids
    }

    fn device(&self, device_id: &str) -> Result<Arc<DeviceHandle>, CoreError> {
        self.inner
            .devices
            .get(device_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| not_found(device_id))
    }

    // ── Connection lifecycle ─────────────────────────────────────────

    /// Connect once. Resolves when the hello exchange completes.
    pub async fn connect(&self, device_id: &str) -> Result<(), CoreError> {
        let handle = self.device(device_id)?;
        handle.session.connect().await?;
        Ok(())
    }

    /// Run a device's session over an already-open stream.
    pub async fn attach<S>(&self, device_id: &str, stream: S) -> Result<(), CoreError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let handle = self.device(device_id)?;
        handle.session.attach(stream).await?;
        Ok(())
    }

    /// Keep the device connected in the background, reconnecting with
    /// backoff, and poll its status if the device config asks for it.
    ///
    /// Returns immediately. Subscribe to [`events`](Self::events) to follow
    /// connectivity.
    pub async fn keep_connected(&self, device_id: &str) -> Result<(), CoreError> {
        let handle = self.device(device_id)?;
        let mut tasks = handle.task_handles.lock().await;

        tasks.push(tokio::spawn(supervisor_task(
            self.inner.reconnect.clone(),
            Arc::clone(&handle),
        )));
        if let Some(period) = handle.config.poll_interval {
            tasks.push(tokio::spawn(poll_task(Arc::clone(&handle), period)));
        }
        Ok(())
    }

    /// Cancel every background task and close every session.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();

        let handles: Vec<Arc<DeviceHandle>> = self
            .inner
            .devices
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for handle in handles {
            shutdown_device(&handle).await;
        }
        debug!("controller shut down");
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Write one Data Point. Returns the frame's sequence number once written.
    pub async fn send_command(
        &self,
        device_id: &str,
        index: u8,
        value: impl Into<DpsValue>,
    ) -> Result<u32, CoreError> {
        let handle = self.device(device_id)?;
        let seq = handle.session.set_dps(&encode_command(index, value)).await?;
        Ok(seq)
    }

    /// Run a composite command.
    ///
    /// Commands for one device run one at a time, in submission order.
    pub async fn execute(
        &self,
        device_id: &str,
        command: VacuumCommand,
    ) -> Result<CommandResult, CoreError> {
        let handle = self.device(device_id)?;
        if !handle.session.is_connected() {
            return Err(CoreError::NotConnected);
        }

        let (tx, rx) = oneshot::channel();
        handle
            .command_tx
            .send(CommandEnvelope {
                command,
                response_tx: tx,
            })
            .await
            .map_err(|_| CoreError::Disconnected)?;

        rx.await.map_err(|_| CoreError::Disconnected)?
    }

    /// Query every Data Point and wait for the answer.
    pub async fn refresh(&self, device_id: &str) -> Result<Arc<DeviceSnapshot>, CoreError> {
        let handle = self.device(device_id)?;
        let dps = handle
            .session
            .query_and_wait(handle.config.request_timeout)
            .await?;

        self.inner.apply_dps(&handle, &dps);
        self.snapshot(device_id)
    }

    async fn run_command(
        &self,
        handle: &DeviceHandle,
        command: VacuumCommand,
    ) -> Result<CommandResult, CoreError> {
        let resume = {
            let decoded = self
                .inner
                .store
                .get(handle.device_id())
                .map(|device| device.decoded())
                .unwrap_or_default();
            command::should_resume(&handle.tracker(), &decoded)
        };
        let plan = command::plan(&command, resume, &handle.config.rooms)?;
        info!(device_id = %handle.device_id(), ?command, resume, "executing command");

        let mut result = CommandResult::default();
        for step in plan.steps {
            match step {
                Step::Send(dps) => {
                    let seq = handle.session.set_dps(&dps).await?;
                    result.sequence_numbers.push(seq);
                }
                Step::Settle(delay) => {
                    tokio::select! {
                        biased;
                        () = handle.cancel.cancelled() => return Err(CoreError::Disconnected),
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        if let Some(paused) = plan.was_paused {
            handle.tracker().set_was_paused(paused);
        }
        if plan.refresh {
            if let Err(e) = handle.session.query().await {
                debug!(device_id = %handle.device_id(), error = %e, "post-command query failed");
            }
        }
        Ok(result)
    }

    // ── State observation ────────────────────────────────────────────

    pub fn events(&self) -> broadcast::Receiver<Arc<DeviceEvent>> {
        self.inner.event_tx.subscribe()
    }

    pub fn snapshot(&self, device_id: &str) -> Result<Arc<DeviceSnapshot>, CoreError> {
        self.inner
            .store
            .get(device_id)
            .ok_or_else(|| not_found(device_id))
    }

    pub fn status(&self, device_id: &str) -> Result<DeviceStatus, CoreError> {
        Ok(self.snapshot(device_id)?.status)
    }

    // ── One-shot convenience ─────────────────────────────────────────

    /// Register one device, connect, run `f`, shut down.
    pub async fn oneshot<F, Fut, T>(config: DeviceConfig, f: F) -> Result<T, CoreError>
    where
        F: FnOnce(Controller, String) -> Fut,
        Fut: Future<Output = Result<T, CoreError>>,
    {
        let device_id = config.device_id.clone();
        let controller = Controller::default();
        controller.add_device(config).await?;

        let result = match controller.connect(&device_id).await {
            Ok(()) => f(controller.clone(), device_id).await,
            Err(e) => Err(e),
        };

        controller.shutdown().await;
        result
    }
}

impl Default for Controller {
    fn default() -> Self {
        Self::new(ReconnectConfig::default())
    }
}

impl ControllerInner {
    fn emit(&self, event: DeviceEvent) {
        // Ignore send errors: no subscribers right now.
        let _ = self.event_tx.send(Arc::new(event));
    }

    /// Fold a Data Point update into the store and raise events.
    fn apply_dps(&self, handle: &DeviceHandle, update: &DpsMap) {
        if update.is_empty() {
            return;
        }

        let device_id = handle.device_id();
        let mut changed = DpsMap::new();
        let Some(device) = self.store.update(device_id, |device| {
            changed = device.merge_dps(update);
            !changed.is_empty()
        }) else {
            return;
        };

        debug!(device_id, changed = changed.len(), "data points updated");
        let decoded = VacuumDps::decode(&changed);
        for error in decoded.errors() {
            warn!(device_id, error = %error, "data point failed to decode");
        }

        let transition = handle.tracker().observe(device.status);
        self.emit(DeviceEvent::DpsUpdated {
            device_id: device_id.to_owned(),
            dps: changed,
        });

        if let Some(Transition { from, to }) = transition {
            info!(device_id, from = ?from, to = %to, "status changed");
            self.emit(DeviceEvent::StatusChanged {
                device_id: device_id.to_owned(),
                status: to,
                previous: from,
            });
        }
    }

    fn set_online(&self, handle: &DeviceHandle, online: bool) {
        let device_id = handle.device_id();
        let updated = self.store.update(device_id, |device| {
            if device.online == online {
                return false;
            }
            device.online = online;
            true
        });

        if updated.is_some() {
            self.emit(DeviceEvent::ConnectivityChanged {
                device_id: device_id.to_owned(),
                online,
            });
        }
    }
}

fn not_found(device_id: &str) -> CoreError {
    CoreError::DeviceNotFound {
        identifier: device_id.to_owned(),
    }
}

async fn shutdown_device(handle: &DeviceHandle) {
    handle.cancel.cancel();
    handle.session.close().await;

    let mut tasks = handle.task_handles.lock().await;
    for task in tasks.drain(..) {
        let _ = task.await;
    }
}

// ── Background tasks ─────────────────────────────────────────────────

/// Apply session frames and connectivity changes to the store.
async fn device_event_task(
    controller: Controller,
    handle: Arc<DeviceHandle>,
    mut events: broadcast::Receiver<SessionEvent>,
) {
    let cancel = handle.cancel.clone();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = events.recv() => match event {
                Ok(SessionEvent::Frame(frame)) => controller.inner.apply_dps(&handle, &frame.dps),
                Ok(SessionEvent::Connectivity { connected }) => {
                    controller.inner.set_online(&handle, connected);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(device_id = %handle.device_id(), skipped, "session events lagged, re-querying");
                    if let Err(e) = handle.session.query().await {
                        debug!(device_id = %handle.device_id(), error = %e, "re-query failed");
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

/// Run queued commands one at a time.
async fn command_processor_task(
    controller: Controller,
    handle: Arc<DeviceHandle>,
    mut rx: mpsc::Receiver<CommandEnvelope>,
) {
    let cancel = handle.cancel.clone();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            envelope = rx.recv() => {
                let Some(envelope) = envelope else { break };
                let result = controller.run_command(&handle, envelope.command).await;
                let _ = envelope.response_tx.send(result);
            }
        }
    }
}

/// Reconnect with backoff whenever the session drops.
async fn supervisor_task(reconnect: ReconnectConfig, handle: Arc<DeviceHandle>) {
    let cancel = handle.cancel.clone();
    let mut state = handle.session.state();
    let mut failures: u32 = 0;

    loop {
        if !handle.session.is_connected() {
            let attempt = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                result = handle.session.connect() => result,
            };

            if let Err(e) = attempt {
                failures = failures.saturating_add(1);
                if reconnect.max_retries.is_some_and(|max| failures > max) {
                    warn!(device_id = %handle.device_id(), failures, "giving up on reconnecting");
                    break;
                }

                let delay = calculate_backoff(failures - 1, &reconnect);
                warn!(
                    device_id = %handle.device_id(),
                    error = %e,
                    attempt = failures,
                    retry_in = ?delay,
                    "connect failed"
                );
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(delay) => continue,
                }
            }
            failures = 0;
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = wait_for_disconnect(&mut state) => {
                info!(device_id = %handle.device_id(), "connection lost, reconnecting");
            }
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(reconnect.initial_delay) => {}
        }
    }
}

async fn wait_for_disconnect(state: &mut watch::Receiver<ConnectionState>) {
    loop {
        if *state.borrow_and_update() == ConnectionState::Disconnected {
            return;
        }
        if state.changed().await.is_err() {
            // Session gone: nothing left to watch.
            std::future::pending::<()>().await;
        }
    }
}

/// Periodic status query while connected.
async fn poll_task(handle: Arc<DeviceHandle>, period: Duration) {
    let cancel = handle.cancel.clone();
    let mut interval = tokio::time::interval(period);
    interval.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                if handle.session.is_connected() {
                    if let Err(e) = handle.session.query().await {
                        debug!(device_id = %handle.device_id(), error = %e, "status poll failed");
                    }
                }
            }
        }
    }
}
