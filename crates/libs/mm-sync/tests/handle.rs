mod common;

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use common::*;
use mm_sync::{
    EventKind, HandlerId, ManagerConfig, ModemManager, ModemManagerBus, ModemManagerEvent,
    StubBus, StubService, SyncState,
};
use tokio::task::LocalSet;

fn bus_factory(builds: &Rc<Cell<u32>>) -> impl FnOnce() -> Rc<dyn ModemManagerBus> {
    let builds = Rc::clone(builds);
    move || {
        builds.set(builds.get() + 1);
        let bus: Rc<dyn ModemManagerBus> = Rc::new(StubBus::new(Rc::new(StubService::new())));
        bus
    }
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn shared_handle_is_refcounted() {
    LocalSet::new()
        .run_until(async {
            let builds = Rc::new(Cell::new(0));
            assert!(ModemManager::current_shared().is_none());

            let first = ModemManager::shared(bus_factory(&builds), ManagerConfig::default());
            let second = ModemManager::shared(bus_factory(&builds), ManagerConfig::default());
            assert!(first.ptr_eq(&second));
            assert_eq!(builds.get(), 1);

            drop(first);
            let current = ModemManager::current_shared().expect("still held");
            assert!(current.ptr_eq(&second));
            drop(current);
            drop(second);
            assert!(ModemManager::current_shared().is_none());

            let third = ModemManager::shared(bus_factory(&builds), ManagerConfig::default());
            assert_eq!(builds.get(), 2);
            assert!(!third.valid());
        })
        .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn standalone_managers_are_independent() {
    LocalSet::new()
        .run_until(async {
            let a = harness();
            let b = harness();
            assert!(!a.mm.ptr_eq(&b.mm));
            assert!(ModemManager::current_shared().is_none());

            a.service.push_get_all(Ok(base_reply(1)));
            a.bus.appear(":1.1");
            settle().await;
            assert!(a.mm.valid());
            assert!(!b.mm.valid());
        })
        .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn removing_a_handler_during_delivery() {
    LocalSet::new()
        .run_until(async {
            let h = harness();
            let calls = Rc::new(RefCell::new(Vec::new()));
            let victim = Rc::new(Cell::new(HandlerId::NONE));
            let own = Rc::new(Cell::new(HandlerId::NONE));

            let (log, target) = (Rc::clone(&calls), Rc::clone(&victim));
            h.mm.on_valid_changed(move |mm, _| {
                log.borrow_mut().push("remover");
                mm.remove_handler(target.get());
            });
            let log = Rc::clone(&calls);
            victim.set(h.mm.on_valid_changed(move |_, _| log.borrow_mut().push("victim")));
            let (log, me) = (Rc::clone(&calls), Rc::clone(&own));
            own.set(h.mm.on_valid_changed(move |mm, _| {
                log.borrow_mut().push("self");
                mm.remove_handler(me.get());
            }));

            h.service.push_get_all(Ok(base_reply(1)));
            h.bus.appear(":1.1");
            settle().await;
            h.bus.vanish();
            settle().await;

            assert_eq!(*calls.borrow(), vec!["remover", "self", "remover"]);
            assert_eq!(h.mm.handler_count(), 1);
        })
        .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn bulk_removal_clears_ids() {
    LocalSet::new()
        .run_until(async {
            let h = harness();
            let events = record_all(&h.mm);
            assert_eq!(h.mm.handler_count(), EventKind::ALL.len());

            let mut ids = [
                h.mm.on_ready_changed(|_, _| {}),
                h.mm.on_sim_count_changed(|_, _| {}),
                HandlerId::NONE,
            ];
            h.mm.remove_handlers(&mut ids);
            assert!(ids.iter().all(|id| id.is_none()));
            assert_eq!(h.mm.handler_count(), EventKind::ALL.len());

            h.mm.remove_all_handlers();
            assert_eq!(h.mm.handler_count(), 0);

            h.service.push_get_all(Ok(base_reply(1)));
            h.bus.appear(":1.1");
            settle().await;
            assert!(h.mm.valid());
            assert!(events.borrow().is_empty());
        })
        .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn handlers_are_scoped_by_kind() {
    LocalSet::new()
        .run_until(async {
            let h = harness();
            let seen = Rc::new(RefCell::new(Vec::new()));
            let sink = Rc::clone(&seen);
            h.mm.on_mms_imsi_changed(move |_, event| sink.borrow_mut().push(event.clone()));

            h.service.push_get_all(Ok(base_reply(5)));
            h.service.push_get_all5(Ok(v5_reply(&["A"], &["A"], &[true])));
            h.bus.appear(":1.1");
            settle().await;
            h.service
                .emit(mm_sync::ModemSignal::MmsSimChanged("I3".into()));
            h.service.emit(mm_sync::ModemSignal::ReadyChanged(false));
            settle().await;

            assert_eq!(
                *seen.borrow(),
                vec![ModemManagerEvent::MmsImsi(Some("I3".into()))]
            );
        })
        .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn handles_keep_the_manager_alive() {
    LocalSet::new()
        .run_until(async {
            let h = harness();
            let clone = h.mm.clone();
            assert!(clone.ptr_eq(&h.mm));

            let Harness { service, bus, mm } = h;
            drop(mm);
            settle().await;
            assert_eq!(bus.watcher_count(), 1);

            service.push_get_all(Ok(base_reply(1)));
            bus.appear(":1.1");
            settle().await;
            assert!(clone.valid());

            drop(clone);
            settle().await;
            assert_eq!(bus.watcher_count(), 0);
            assert_eq!(service.subscriber_count(), 0);
        })
        .await;
}

fn describe(state: SyncState) -> &'static str {
    // Downstream matches need a catch-all arm.
    match state {
        SyncState::Invalid => "invalid",
        SyncState::Negotiating => "negotiating",
        SyncState::RetryWait => "retry-wait",
        SyncState::Valid => "valid",
        _ => "unknown",
    }
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn state_is_reported_through_an_open_enum() {
    LocalSet::new()
        .run_until(async {
            let h = harness();
            assert_eq!(describe(h.mm.state()), "invalid");
            h.service.push_get_all(Ok(base_reply(1)));
            h.bus.appear(":1.1");
            settle().await;
            assert_eq!(describe(h.mm.state()), "valid");
        })
        .await;
}
