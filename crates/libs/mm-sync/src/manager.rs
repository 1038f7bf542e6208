//! The public modem manager handle.
//!
//! A [`ModemManager`] watches the service name on the bus, connects to
//! each new owner, negotiates the interface version, and then keeps its
//! cached [`Snapshot`] current from the service's incremental updates.
//! Consumers read the cache through accessors and observe changes through
//! handlers or [`ModemManager::subscribe_events`].
//!
//! All work runs on the current thread's `LocalSet`; constructing a
//! manager outside one panics.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::cache::StateCache;
use crate::config::ManagerConfig;
use crate::error::{ErrorClass, ManagerError, RpcError};
use crate::negotiate::{self, FetchCall, Negotiated};
use crate::registry::InstanceSlot;
use crate::requests::{MmsRequest, MmsResult, RequestTracker};
use crate::retry::RetryScheduler;
use crate::signals::{HandlerId, SignalHub};
use crate::traits::{ModemManagerBus, ModemManagerRpc};
use crate::types::*;

thread_local! {
    static SHARED: InstanceSlot<Inner> = const { InstanceSlot::new() };
}

/// Handle to a modem manager mirror. Clones share one instance; the
/// instance is torn down when the last clone is dropped.
#[derive(Clone)]
pub struct ModemManager {
    inner: Rc<Inner>,
}

struct Inner {
    config: ManagerConfig,
    bus: Rc<dyn ModemManagerBus>,
    root: CancellationToken,
    state: RefCell<ManagerState>,
    signals: SignalHub<ModemManager>,
    requests: RequestTracker,
}

struct ManagerState {
    sync: SyncState,
    cache: StateCache,
    rpc: Option<Rc<dyn ModemManagerRpc>>,
    /// Parent of everything bound to the current service owner.
    session: CancellationToken,
    subscription: Option<CancellationToken>,
    /// Versioned call learned from the base reply, reused by retries.
    known_call: Option<FetchCall>,
    retry: RetryScheduler,
}

impl ModemManager {
    /// Create a standalone manager and start watching the service.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio `LocalSet`, since the watch task is
    /// spawned with `spawn_local`.
    pub fn new(bus: Rc<dyn ModemManagerBus>, config: ManagerConfig) -> Self {
        let inner = Rc::new(Inner::new(bus, config));
        inner.start_watch();
        Self { inner }
    }

    /// Acquire the manager shared by this thread.
    ///
    /// The first acquisition builds it from `make_bus` and `config`; later
    /// ones return the live instance and ignore both arguments. Once every
    /// handle is dropped, the next acquisition builds a fresh instance.
    ///
    /// # Panics
    ///
    /// Panics if it has to build the instance outside a tokio `LocalSet`.
    /// Returning a live instance never panics.
    pub fn shared<F>(make_bus: F, config: ManagerConfig) -> Self
    where
        F: FnOnce() -> Rc<dyn ModemManagerBus>,
    {
        let inner = SHARED.with(|slot| {
            slot.get_or_insert_with(|| {
                let inner = Rc::new(Inner::new(make_bus(), config));
                inner.start_watch();
                inner
            })
        });
        Self { inner }
    }

    /// The shared manager of this thread, if one is alive.
    pub fn current_shared() -> Option<Self> {
        SHARED
            .with(InstanceSlot::current)
            .map(|inner| Self { inner })
    }

    /// Whether both handles refer to the same instance.
    pub fn ptr_eq(&self, other: &ModemManager) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    // ── State ─────────────────────────────────────────────────────────────────

    pub fn valid(&self) -> bool {
        self.inner.state.borrow().cache.is_valid()
    }

    pub fn state(&self) -> SyncState {
        self.inner.state.borrow().sync
    }

    /// Negotiated interface version, while valid.
    pub fn interface_version(&self) -> Option<u32> {
        self.inner.state.borrow().cache.version()
    }

    /// A consistent copy of every cached field.
    pub fn snapshot(&self) -> Snapshot {
        self.inner.state.borrow().cache.snapshot().clone()
    }

    fn read<T>(&self, f: impl FnOnce(&Snapshot) -> T) -> T {
        f(self.inner.state.borrow().cache.snapshot())
    }

    pub fn available(&self) -> Vec<ModemPath> {
        self.read(|s| s.available.clone())
    }

    pub fn enabled(&self) -> Vec<ModemPath> {
        self.read(|s| s.enabled.clone())
    }

    pub fn data_imsi(&self) -> Option<Imsi> {
        self.read(|s| s.data_imsi.clone())
    }

    pub fn voice_imsi(&self) -> Option<Imsi> {
        self.read(|s| s.voice_imsi.clone())
    }

    pub fn mms_imsi(&self) -> Option<Imsi> {
        self.read(|s| s.mms_imsi.clone())
    }

    pub fn data_modem(&self) -> Option<ModemHandle> {
        self.read(|s| s.data_modem.clone())
    }

    pub fn voice_modem(&self) -> Option<ModemHandle> {
        self.read(|s| s.voice_modem.clone())
    }

    pub fn mms_modem(&self) -> Option<ModemHandle> {
        self.read(|s| s.mms_modem.clone())
    }

    pub fn present_sims(&self) -> Vec<bool> {
        self.read(|s| s.present_sims.clone())
    }

    pub fn imei(&self) -> Vec<String> {
        self.read(|s| s.imei.clone())
    }

    pub fn ready(&self) -> bool {
        self.read(|s| s.ready)
    }

    pub fn modem_count(&self) -> usize {
        self.read(Snapshot::modem_count)
    }

    /// Whether the modem at `index` of [`available`](Self::available) is enabled.
    pub fn modem_enabled_at(&self, index: usize) -> bool {
        self.read(|s| s.modem_enabled_at(index))
    }

    pub fn sim_count(&self) -> usize {
        self.inner.state.borrow().cache.sim_count()
    }

    pub fn active_sim_count(&self) -> usize {
        self.inner.state.borrow().cache.active_sim_count()
    }

    // ── Handlers ──────────────────────────────────────────────────────────────

    /// Register `handler` for events of `kind`.
    ///
    /// Handlers run on the event loop after the change is applied, in
    /// registration order, and may read the manager or (un)register
    /// handlers.
    pub fn add_handler<F>(&self, kind: EventKind, handler: F) -> HandlerId
    where
        F: Fn(&ModemManager, &ModemManagerEvent) + 'static,
    {
        self.inner.signals.add(kind, handler)
    }

    pub fn on_valid_changed<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&ModemManager, &ModemManagerEvent) + 'static,
    {
        self.add_handler(EventKind::Valid, handler)
    }

    pub fn on_enabled_modems_changed<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&ModemManager, &ModemManagerEvent) + 'static,
    {
        self.add_handler(EventKind::EnabledModems, handler)
    }

    pub fn on_data_imsi_changed<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&ModemManager, &ModemManagerEvent) + 'static,
    {
        self.add_handler(EventKind::DataImsi, handler)
    }

    pub fn on_data_modem_changed<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&ModemManager, &ModemManagerEvent) + 'static,
    {
        self.add_handler(EventKind::DataModem, handler)
    }

    pub fn on_voice_imsi_changed<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&ModemManager, &ModemManagerEvent) + 'static,
    {
        self.add_handler(EventKind::VoiceImsi, handler)
    }

    pub fn on_voice_modem_changed<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&ModemManager, &ModemManagerEvent) + 'static,
    {
        self.add_handler(EventKind::VoiceModem, handler)
    }

    pub fn on_present_sims_changed<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&ModemManager, &ModemManagerEvent) + 'static,
    {
        self.add_handler(EventKind::PresentSims, handler)
    }

    pub fn on_sim_count_changed<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&ModemManager, &ModemManagerEvent) + 'static,
    {
        self.add_handler(EventKind::SimCount, handler)
    }

    pub fn on_active_sim_count_changed<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&ModemManager, &ModemManagerEvent) + 'static,
    {
        self.add_handler(EventKind::ActiveSimCount, handler)
    }

    pub fn on_mms_imsi_changed<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&ModemManager, &ModemManagerEvent) + 'static,
    {
        self.add_handler(EventKind::MmsImsi, handler)
    }

    pub fn on_mms_modem_changed<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&ModemManager, &ModemManagerEvent) + 'static,
    {
        self.add_handler(EventKind::MmsModem, handler)
    }

    pub fn on_ready_changed<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&ModemManager, &ModemManagerEvent) + 'static,
    {
        self.add_handler(EventKind::Ready, handler)
    }

    /// Returns `false` if `id` was not registered.
    pub fn remove_handler(&self, id: HandlerId) -> bool {
        self.inner.signals.remove(id)
    }

    /// Remove every handler in `ids`, resetting each to [`HandlerId::NONE`].
    pub fn remove_handlers(&self, ids: &mut [HandlerId]) {
        self.inner.signals.remove_many(ids);
    }

    pub fn remove_all_handlers(&self) {
        self.inner.signals.clear();
    }

    pub fn handler_count(&self) -> usize {
        self.inner.signals.handler_count()
    }

    /// Receive every event delivered to handlers, asynchronously.
    pub fn subscribe_events(&self) -> broadcast::Receiver<ModemManagerEvent> {
        self.inner.signals.subscribe()
    }

    // ── Write commands ────────────────────────────────────────────────────────

    /// Ask the service to carry MMS on the SIM with `imsi`.
    ///
    /// Fails with [`ManagerError::NotValid`] without calling the service
    /// unless the state is valid. Otherwise `callback` later receives the
    /// modem now carrying MMS, unless the request is cancelled, the
    /// service goes away, or the manager is dropped first.
    pub fn set_mms_sim<F>(&self, imsi: &str, callback: F) -> Result<MmsRequest, ManagerError>
    where
        F: FnOnce(MmsResult) + 'static,
    {
        let (rpc, session) = {
            let state = self.inner.state.borrow();
            match (&state.rpc, state.cache.is_valid()) {
                (Some(rpc), true) => (Rc::clone(rpc), state.session.clone()),
                _ => return Err(ManagerError::NotValid),
            }
        };
        Ok(self
            .inner
            .requests
            .set_mms_sim(rpc, imsi, &session, callback))
    }

    /// Awaitable form of [`set_mms_sim`](Self::set_mms_sim).
    pub async fn select_mms_sim(&self, imsi: &str) -> MmsResult {
        let (tx, rx) = oneshot::channel();
        self.set_mms_sim(imsi, move |result| {
            let _ = tx.send(result);
        })?;
        // The sender is dropped unsent when the request is cancelled.
        rx.await.unwrap_or(Err(ManagerError::Cancelled))
    }

    /// Write commands still in flight.
    pub fn pending_requests(&self) -> usize {
        self.inner.requests.pending()
    }
}

impl fmt::Debug for ModemManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("ModemManager")
            .field("service", &self.inner.config.service)
            .field("state", &state.sync)
            .field("version", &state.cache.version())
            .field("modems", &state.cache.snapshot().modem_count())
            .finish()
    }
}

impl Inner {
    fn new(bus: Rc<dyn ModemManagerBus>, config: ManagerConfig) -> Self {
        let root = CancellationToken::new();
        let state = ManagerState {
            sync: SyncState::Invalid,
            cache: StateCache::default(),
            rpc: None,
            session: root.child_token(),
            subscription: None,
            known_call: None,
            retry: RetryScheduler::new(config.retry_delay()),
        };
        Self {
            signals: SignalHub::new(config.event_capacity()),
            requests: RequestTracker::default(),
            state: RefCell::new(state),
            root,
            bus,
            config,
        }
    }

    fn emit(self: &Rc<Self>, events: Vec<ModemManagerEvent>) {
        if events.is_empty() {
            return;
        }
        let sender = ModemManager {
            inner: Rc::clone(self),
        };
        for event in &events {
            self.signals.emit(&sender, event);
        }
    }

    fn start_watch(self: &Rc<Self>) {
        let mut events = self.bus.watch(&self.config.service);
        let root = self.root.clone();
        let weak = Rc::downgrade(self);
        tokio::task::spawn_local(async move {
            loop {
                let event = tokio::select! {
                    _ = root.cancelled() => break,
                    event = events.recv() => event,
                };
                let Some(event) = event else {
                    log::debug!("service watch closed");
                    break;
                };
                let Some(inner) = weak.upgrade() else { break };
                inner.on_service_event(event);
            }
        });
    }

    fn on_service_event(self: &Rc<Self>, event: ServiceEvent) {
        match event {
            ServiceEvent::Appeared { owner } => {
                log::debug!("{} owned by {}", self.config.service, owner);
                // A new owner invalidates anything learned from the old one.
                self.reset();
                self.connect(owner);
            }
            ServiceEvent::Vanished => {
                log::debug!("{} vanished", self.config.service);
                self.reset();
            }
        }
    }

    /// Tear down the session and drop back to INVALID, notifying once if
    /// the state was valid.
    fn reset(self: &Rc<Self>) {
        let events = {
            let mut state = self.state.borrow_mut();
            if let Some(subscription) = state.subscription.take() {
                subscription.cancel();
            }
            state.session.cancel();
            state.session = self.root.child_token();
            state.retry.cancel();
            state.rpc = None;
            state.known_call = None;
            state.sync = SyncState::Invalid;
            state.cache.clear()
        };
        self.emit(events);
    }

    fn connect(self: &Rc<Self>, owner: String) {
        let session = {
            let mut state = self.state.borrow_mut();
            state.sync = SyncState::Negotiating;
            state.session.clone()
        };
        let bus = Rc::clone(&self.bus);
        let path = self.config.object_path.clone();
        let weak = Rc::downgrade(self);
        tokio::task::spawn_local(async move {
            let result = tokio::select! {
                biased;
                _ = session.cancelled() => Err(RpcError::Cancelled),
                result = bus.connect(&owner, &path) => result,
            };
            let Some(inner) = weak.upgrade() else { return };
            if session.is_cancelled() {
                log::debug!("dropping connection to stale owner {}", owner);
                return;
            }
            match result {
                Ok(rpc) => {
                    inner.state.borrow_mut().rpc = Some(rpc);
                    inner.fetch(FetchCall::GetAll);
                }
                // Connect failures wait for the next ownership change.
                Err(err) => inner.fail("connect", err),
            }
        });
    }

    fn fetch(self: &Rc<Self>, call: FetchCall) {
        let (rpc, session) = {
            let mut state = self.state.borrow_mut();
            let Some(rpc) = state.rpc.clone() else {
                log::debug!("no channel for {}", call.name());
                return;
            };
            state.sync = SyncState::Negotiating;
            (rpc, state.session.clone())
        };
        log::debug!("issuing {}", call.name());
        let weak = Rc::downgrade(self);
        tokio::task::spawn_local(async move {
            let result = tokio::select! {
                biased;
                _ = session.cancelled() => Err(RpcError::Cancelled),
                result = negotiate::fetch(rpc.as_ref(), call) => result,
            };
            let Some(inner) = weak.upgrade() else { return };
            if session.is_cancelled() {
                log::debug!("{} outlived its session", call.name());
                return;
            }
            inner.on_fetched(call, result);
        });
    }

    fn on_fetched(self: &Rc<Self>, call: FetchCall, result: Result<Negotiated, RpcError>) {
        match result {
            Ok(Negotiated::Upgrade(next)) => {
                self.state.borrow_mut().known_call = Some(next);
                self.fetch(next);
            }
            Ok(Negotiated::Complete { version, snapshot }) => self.commit(version, snapshot),
            Err(err) if err.is_retryable() => self.schedule_retry(call, err),
            Err(err) => self.fail(call.name(), err),
        }
    }

    fn schedule_retry(self: &Rc<Self>, call: FetchCall, err: RpcError) {
        let mut state = self.state.borrow_mut();
        log::warn!(
            "{} failed: {}, retrying in {:?}",
            call.name(),
            err,
            self.config.retry_delay()
        );
        state.sync = SyncState::RetryWait;
        let weak = Rc::downgrade(self);
        let session = state.session.clone();
        state.retry.schedule(&session, move || {
            if let Some(inner) = weak.upgrade() {
                inner.on_retry();
            }
        });
    }

    fn on_retry(self: &Rc<Self>) {
        let call = {
            let state = self.state.borrow();
            if state.sync != SyncState::RetryWait {
                return;
            }
            state.known_call.unwrap_or(FetchCall::GetAll)
        };
        log::debug!("retrying with {}", call.name());
        self.fetch(call);
    }

    fn fail(self: &Rc<Self>, step: &str, err: RpcError) {
        match err.class() {
            ErrorClass::Cancelled => log::debug!("{} cancelled", step),
            ErrorClass::Timeout => log::warn!("{} failed: {}", step, err),
            ErrorClass::Other => log::error!("{} failed: {}", step, err),
        }
        self.state.borrow_mut().sync = SyncState::Invalid;
    }

    fn commit(self: &Rc<Self>, version: u32, snapshot: Snapshot) {
        let events = {
            let mut state = self.state.borrow_mut();
            state.retry.cancel();
            state.sync = SyncState::Valid;
            log::info!(
                "{} interface v{}: {} modems",
                self.config.service,
                version,
                snapshot.modem_count()
            );
            state.cache.commit(version, snapshot)
        };
        self.subscribe_updates();
        self.emit(events);
    }

    /// Follow the service's incremental updates until the session ends.
    fn subscribe_updates(self: &Rc<Self>) {
        let (mut updates, token) = {
            let mut state = self.state.borrow_mut();
            let Some(rpc) = state.rpc.clone() else { return };
            if let Some(previous) = state.subscription.take() {
                previous.cancel();
            }
            let token = state.session.child_token();
            state.subscription = Some(token.clone());
            (rpc.subscribe(), token)
        };
        let weak = Rc::downgrade(self);
        tokio::task::spawn_local(async move {
            loop {
                let received = tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    received = updates.recv() => received,
                };
                let Some(inner) = weak.upgrade() else { break };
                match received {
                    Ok(signal) => inner.on_update(signal),
                    Err(RecvError::Lagged(missed)) => {
                        log::warn!("missed {} updates, resynchronising", missed);
                        inner.resync();
                        break;
                    }
                    Err(RecvError::Closed) => {
                        log::debug!("update stream closed");
                        break;
                    }
                }
            }
        });
    }

    fn on_update(self: &Rc<Self>, signal: ModemSignal) {
        let events = {
            let mut state = self.state.borrow_mut();
            if state.sync != SyncState::Valid {
                return;
            }
            state.cache.apply(signal)
        };
        self.emit(events);
    }

    /// Reset, then renegotiate on the same channel.
    fn resync(self: &Rc<Self>) {
        let rpc = self.state.borrow().rpc.clone();
        self.reset();
        if let Some(rpc) = rpc {
            self.state.borrow_mut().rpc = Some(rpc);
            self.fetch(FetchCall::GetAll);
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        log::debug!("releasing modem manager for {}", self.config.service);
        self.root.cancel();
        let this: *const Inner = self;
        // The slot is gone if the thread itself is exiting.
        let _ = SHARED.try_with(|slot| slot.release(this));
    }
}
