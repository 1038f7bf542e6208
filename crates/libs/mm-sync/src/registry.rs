//! Per-thread shared instance slot.
//!
//! The slot holds a weak reference only: the instance lives while some
//! caller holds a strong handle, and the next acquisition after the last
//! handle is dropped builds a fresh one.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

pub(crate) struct InstanceSlot<T> {
    slot: RefCell<Weak<T>>,
}

impl<T> InstanceSlot<T> {
    pub const fn new() -> Self {
        Self {
            slot: RefCell::new(Weak::new()),
        }
    }

    /// Return the live instance, or build and publish a new one.
    ///
    /// `build` runs without the slot borrowed.
    pub fn get_or_insert_with<F>(&self, build: F) -> Rc<T>
    where
        F: FnOnce() -> Rc<T>,
    {
        if let Some(live) = self.slot.borrow().upgrade() {
            return live;
        }
        let fresh = build();
        *self.slot.borrow_mut() = Rc::downgrade(&fresh);
        fresh
    }

    pub fn current(&self) -> Option<Rc<T>> {
        self.slot.borrow().upgrade()
    }

    /// Forget `instance` if it is the one published here. Called while
    /// the instance is being dropped.
    pub fn release(&self, instance: *const T) {
        let mut slot = self.slot.borrow_mut();
        if std::ptr::eq(slot.as_ptr(), instance) {
            *slot = Weak::new();
        }
    }
}
