use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use crate::error::RpcError;
use crate::traits::*;
use crate::types::*;

type Script<T> = RefCell<VecDeque<Result<T, RpcError>>>;

/// An in-memory modem manager service with scripted replies.
///
/// Each bulk-fetch call consumes the next scripted reply for that call, or
/// fails with `NotImplemented` when none is queued. Signals pushed with
/// [`emit`](Self::emit) reach every live subscription.
pub struct StubService {
    get_all: Script<GetAllReply>,
    get_all2: Script<GetAll2Reply>,
    get_all3: Script<GetAll3Reply>,
    get_all4: Script<GetAll4Reply>,
    get_all5: Script<GetAll5Reply>,
    mms_routes: RefCell<HashMap<Imsi, (Result<ModemPath, RpcError>, Duration)>>,
    fetch_delay: Cell<Duration>,
    calls: RefCell<Vec<String>>,
    signals: broadcast::Sender<ModemSignal>,
}

impl Default for StubService {
    fn default() -> Self {
        Self::new()
    }
}

impl StubService {
    pub fn new() -> Self {
        Self::with_signal_capacity(64)
    }

    pub fn with_signal_capacity(capacity: usize) -> Self {
        let (signals, _) = broadcast::channel(capacity.max(1));
        Self {
            get_all: RefCell::default(),
            get_all2: RefCell::default(),
            get_all3: RefCell::default(),
            get_all4: RefCell::default(),
            get_all5: RefCell::default(),
            mms_routes: RefCell::default(),
            fetch_delay: Cell::new(Duration::ZERO),
            calls: RefCell::default(),
            signals,
        }
    }

    pub fn push_get_all(&self, reply: Result<GetAllReply, RpcError>) {
        self.get_all.borrow_mut().push_back(reply);
    }

    pub fn push_get_all2(&self, reply: Result<GetAll2Reply, RpcError>) {
        self.get_all2.borrow_mut().push_back(reply);
    }

    pub fn push_get_all3(&self, reply: Result<GetAll3Reply, RpcError>) {
        self.get_all3.borrow_mut().push_back(reply);
    }

    pub fn push_get_all4(&self, reply: Result<GetAll4Reply, RpcError>) {
        self.get_all4.borrow_mut().push_back(reply);
    }

    pub fn push_get_all5(&self, reply: Result<GetAll5Reply, RpcError>) {
        self.get_all5.borrow_mut().push_back(reply);
    }

    /// Answer `SetMmsSim(imsi)` with `modem` after `delay`.
    pub fn set_mms_route(&self, imsi: &str, modem: &str, delay: Duration) {
        self.mms_routes
            .borrow_mut()
            .insert(imsi.to_owned(), (Ok(modem.to_owned()), delay));
    }

    /// Fail every `SetMmsSim(imsi)` with `err` after `delay`.
    pub fn set_mms_failure(&self, imsi: &str, err: RpcError, delay: Duration) {
        self.mms_routes
            .borrow_mut()
            .insert(imsi.to_owned(), (Err(err), delay));
    }

    /// Latency applied to every bulk-fetch call.
    pub fn set_fetch_delay(&self, delay: Duration) {
        self.fetch_delay.set(delay);
    }

    /// Names of the calls issued so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    pub fn call_count(&self, name: &str) -> usize {
        self.calls.borrow().iter().filter(|call| *call == name).count()
    }

    /// Push an incremental update. Returns the number of live subscriptions.
    pub fn emit(&self, signal: ModemSignal) -> usize {
        self.signals.send(signal).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.signals.receiver_count()
    }

    async fn reply<T>(&self, name: &str, script: &Script<T>) -> Result<T, RpcError> {
        self.calls.borrow_mut().push(name.to_owned());
        let reply = script
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Err(RpcError::not_implemented(name)));
        let delay = self.fetch_delay.get();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        reply
    }
}

#[async_trait(?Send)]
impl ModemManagerRpc for StubService {
    async fn get_all(&self) -> Result<GetAllReply, RpcError> {
        self.reply("GetAll", &self.get_all).await
    }

    async fn get_all2(&self) -> Result<GetAll2Reply, RpcError> {
        self.reply("GetAll2", &self.get_all2).await
    }

    async fn get_all3(&self) -> Result<GetAll3Reply, RpcError> {
        self.reply("GetAll3", &self.get_all3).await
    }

    async fn get_all4(&self) -> Result<GetAll4Reply, RpcError> {
        self.reply("GetAll4", &self.get_all4).await
    }

    async fn get_all5(&self) -> Result<GetAll5Reply, RpcError> {
        self.reply("GetAll5", &self.get_all5).await
    }

    async fn set_mms_sim(&self, imsi: &str) -> Result<ModemPath, RpcError> {
        self.calls.borrow_mut().push("SetMmsSim".to_owned());
        let route = self.mms_routes.borrow().get(imsi).cloned();
        let Some((outcome, delay)) = route else {
            return Err(RpcError::Rejected {
                name: "org.ofono.Error.NotFound".into(),
                message: format!("no SIM with IMSI {}", imsi),
            });
        };
        tokio::time::sleep(delay).await;
        outcome
    }

    fn subscribe(&self) -> broadcast::Receiver<ModemSignal> {
        self.signals.subscribe()
    }
}

/// An in-memory bus hosting one [`StubService`].
pub struct StubBus {
    service: Rc<StubService>,
    owner: RefCell<Option<String>>,
    watchers: RefCell<Vec<mpsc::UnboundedSender<ServiceEvent>>>,
    connect_failures: RefCell<VecDeque<RpcError>>,
    connects: Cell<usize>,
}

impl StubBus {
    pub fn new(service: Rc<StubService>) -> Self {
        Self {
            service,
            owner: RefCell::new(None),
            watchers: RefCell::default(),
            connect_failures: RefCell::default(),
            connects: Cell::new(0),
        }
    }

    pub fn service(&self) -> &Rc<StubService> {
        &self.service
    }

    /// The service name gains `owner`.
    pub fn appear(&self, owner: &str) {
        *self.owner.borrow_mut() = Some(owner.to_owned());
        self.notify(ServiceEvent::Appeared {
            owner: owner.to_owned(),
        });
    }

    /// The service name loses its owner.
    pub fn vanish(&self) {
        if self.owner.borrow_mut().take().is_some() {
            self.notify(ServiceEvent::Vanished);
        }
    }

    /// Make the next `connect` fail with `err`.
    pub fn fail_next_connect(&self, err: RpcError) {
        self.connect_failures.borrow_mut().push_back(err);
    }

    pub fn connect_count(&self) -> usize {
        self.connects.get()
    }

    pub fn watcher_count(&self) -> usize {
        self.watchers.borrow().iter().filter(|tx| !tx.is_closed()).count()
    }

    fn notify(&self, event: ServiceEvent) {
        self.watchers
            .borrow_mut()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[async_trait(?Send)]
impl ModemManagerBus for StubBus {
    fn watch(&self, _service: &str) -> mpsc::UnboundedReceiver<ServiceEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(owner) = self.owner.borrow().clone() {
            let _ = tx.send(ServiceEvent::Appeared { owner });
        }
        self.watchers.borrow_mut().push(tx);
        rx
    }

    async fn connect(
        &self,
        _owner: &str,
        _object_path: &str,
    ) -> Result<Rc<dyn ModemManagerRpc>, RpcError> {
        self.connects.set(self.connects.get() + 1);
        if let Some(err) = self.connect_failures.borrow_mut().pop_front() {
            return Err(err);
        }
        let rpc: Rc<dyn ModemManagerRpc> = self.service.clone();
        Ok(rpc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unscripted_calls_are_not_implemented() {
        let stub = StubService::new();
        let err = stub.get_all3().await.expect_err("nothing queued");
        assert_eq!(
            err,
            RpcError::NotImplemented {
                method: "GetAll3".into()
            }
        );
        assert_eq!(stub.calls(), vec!["GetAll3"]);
    }

    #[tokio::test]
    async fn scripted_replies_are_consumed_in_order() {
        let stub = StubService::new();
        stub.push_get_all(Err(RpcError::timeout("GetAll")));
        stub.push_get_all(Ok(GetAllReply {
            version: 2,
            ..GetAllReply::default()
        }));

        assert!(stub.get_all().await.is_err());
        assert_eq!(stub.get_all().await.expect("second").version, 2);
        assert!(stub.get_all().await.is_err());
        assert_eq!(stub.call_count("GetAll"), 3);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn mms_routes_replay_their_outcome() {
        let stub = StubService::new();
        stub.set_mms_route("I1", "/ril_0", Duration::from_millis(5));
        stub.set_mms_failure("I2", RpcError::Cancelled, Duration::from_millis(5));

        assert_eq!(stub.set_mms_sim("I1").await, Ok("/ril_0".to_string()));
        assert_eq!(stub.set_mms_sim("I2").await, Err(RpcError::Cancelled));
        assert_eq!(stub.set_mms_sim("I2").await, Err(RpcError::Cancelled));
        assert!(matches!(
            stub.set_mms_sim("I3").await,
            Err(RpcError::Rejected { .. })
        ));
        assert_eq!(stub.call_count("SetMmsSim"), 4);
    }

    #[tokio::test]
    async fn bus_replays_current_owner_to_new_watchers() {
        let bus = StubBus::new(Rc::new(StubService::new()));
        bus.appear(":1.7");

        let mut rx = bus.watch("org.ofono");
        assert_eq!(
            rx.recv().await,
            Some(ServiceEvent::Appeared {
                owner: ":1.7".into()
            })
        );

        bus.vanish();
        bus.vanish();
        assert_eq!(rx.recv().await, Some(ServiceEvent::Vanished));
        assert!(rx.try_recv().is_err());
        assert_eq!(bus.watcher_count(), 1);
    }

    #[tokio::test]
    async fn connect_failures_are_one_shot() {
        let bus = StubBus::new(Rc::new(StubService::new()));
        bus.fail_next_connect(RpcError::Transport {
            message: "no such name".into(),
        });
        assert!(bus.connect(":1.7", "/").await.is_err());
        assert!(bus.connect(":1.7", "/").await.is_ok());
        assert_eq!(bus.connect_count(), 2);
    }
}
