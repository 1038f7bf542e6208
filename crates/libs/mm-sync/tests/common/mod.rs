#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use mm_sync::{
    EventKind, GetAll5Reply, GetAllReply, ManagerConfig, ModemManager, ModemManagerEvent,
    StubBus, StubService,
};

pub fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

pub fn base_reply(version: i32) -> GetAllReply {
    GetAllReply {
        version,
        ..GetAllReply::default()
    }
}

pub fn v5_reply(available: &[&str], enabled: &[&str], present: &[bool]) -> GetAll5Reply {
    GetAll5Reply {
        version: 5,
        available: strings(available),
        enabled: strings(enabled),
        data_imsi: "I1".into(),
        voice_imsi: "I1".into(),
        data_modem: available.first().map(|s| s.to_string()).unwrap_or_default(),
        voice_modem: String::new(),
        present_sims: present.to_vec(),
        imei: available.iter().map(|_| "490154203237518".to_string()).collect(),
        mms_imsi: String::new(),
        mms_modem: String::new(),
        ready: true,
    }
}

pub struct Harness {
    pub service: Rc<StubService>,
    pub bus: Rc<StubBus>,
    pub mm: ModemManager,
}

/// A manager over a fresh stub. Must run inside a `LocalSet`.
pub fn harness() -> Harness {
    let _ = env_logger::builder().is_test(true).try_init();
    let service = Rc::new(StubService::new());
    let bus = Rc::new(StubBus::new(Rc::clone(&service)));
    let mm = ModemManager::new(bus.clone(), ManagerConfig::default());
    Harness { service, bus, mm }
}

/// Let spawned tasks run without crossing a retry delay.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

pub type EventLog = Rc<RefCell<Vec<ModemManagerEvent>>>;

/// Record every event delivered to handlers, in order.
pub fn record_all(mm: &ModemManager) -> EventLog {
    let log: EventLog = Rc::default();
    for kind in EventKind::ALL {
        let sink = Rc::clone(&log);
        mm.add_handler(kind, move |_, event| sink.borrow_mut().push(event.clone()));
    }
    log
}

pub fn count_kind(log: &EventLog, kind: EventKind) -> usize {
    log.borrow().iter().filter(|e| e.kind() == kind).count()
}

pub fn assert_counters_consistent(mm: &ModemManager) {
    let present = mm.present_sims();
    assert_eq!(mm.sim_count(), present.iter().filter(|p| **p).count());
    assert!(mm.active_sim_count() <= mm.sim_count());
}

pub fn assert_empty(mm: &ModemManager) {
    assert!(!mm.valid());
    assert!(mm.available().is_empty());
    assert!(mm.enabled().is_empty());
    assert_eq!(mm.data_imsi(), None);
    assert_eq!(mm.voice_imsi(), None);
    assert_eq!(mm.mms_imsi(), None);
    assert_eq!(mm.data_modem(), None);
    assert_eq!(mm.voice_modem(), None);
    assert_eq!(mm.mms_modem(), None);
    assert!(mm.present_sims().is_empty());
    assert!(mm.imei().is_empty());
    assert!(!mm.ready());
    assert_eq!(mm.sim_count(), 0);
    assert_eq!(mm.active_sim_count(), 0);
}
