//! Consumer notification table.
//!
//! Handlers are keyed by opaque [`HandlerId`]s and invoked synchronously,
//! in registration order. The same events are also fanned out on a
//! broadcast channel for async consumers.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use tokio::sync::broadcast;

use crate::types::{EventKind, ModemManagerEvent};

/// Identifies a registered handler. The default value is the null id,
/// which is never handed out and is ignored on removal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

impl HandlerId {
    pub const NONE: HandlerId = HandlerId(0);

    pub fn is_none(self) -> bool {
        self == Self::NONE
    }
}

type Handler<S> = Rc<dyn Fn(&S, &ModemManagerEvent)>;

struct Registration<S> {
    kind: EventKind,
    handler: Handler<S>,
}

pub(crate) struct SignalHub<S> {
    handlers: RefCell<HashMap<HandlerId, Registration<S>>>,
    last_id: Cell<u64>,
    events: broadcast::Sender<ModemManagerEvent>,
}

impl<S> SignalHub<S> {
    pub fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity);
        Self {
            handlers: RefCell::new(HashMap::new()),
            last_id: Cell::new(0),
            events,
        }
    }

    pub fn add<F>(&self, kind: EventKind, handler: F) -> HandlerId
    where
        F: Fn(&S, &ModemManagerEvent) + 'static,
    {
        let id = HandlerId(self.last_id.get() + 1);
        self.last_id.set(id.0);
        self.handlers.borrow_mut().insert(
            id,
            Registration {
                kind,
                handler: Rc::new(handler),
            },
        );
        id
    }

    pub fn remove(&self, id: HandlerId) -> bool {
        !id.is_none() && self.handlers.borrow_mut().remove(&id).is_some()
    }

    /// Remove every id in `ids` and reset each slot to [`HandlerId::NONE`].
    pub fn remove_many(&self, ids: &mut [HandlerId]) {
        let mut handlers = self.handlers.borrow_mut();
        for id in ids.iter_mut() {
            if !id.is_none() {
                handlers.remove(id);
                *id = HandlerId::NONE;
            }
        }
    }

    pub fn clear(&self) {
        self.handlers.borrow_mut().clear();
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.borrow().len()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ModemManagerEvent> {
        self.events.subscribe()
    }

    /// Deliver `event` to the handlers registered for its kind.
    ///
    /// The table is not borrowed while a handler runs, so handlers may add
    /// or remove registrations. A handler removed mid-delivery is skipped.
    pub fn emit(&self, sender: &S, event: &ModemManagerEvent) {
        let kind = event.kind();
        let mut targets: Vec<(HandlerId, Handler<S>)> = self
            .handlers
            .borrow()
            .iter()
            .filter(|(_, reg)| reg.kind == kind)
            .map(|(id, reg)| (*id, Rc::clone(&reg.handler)))
            .collect();
        targets.sort_by_key(|(id, _)| *id);

        for (id, handler) in targets {
            if self.handlers.borrow().contains_key(&id) {
                handler(sender, event);
            }
        }
        // No async subscribers is not an error.
        let _ = self.events.send(event.clone());
    }
}
