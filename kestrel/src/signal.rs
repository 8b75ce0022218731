//! A lightweight multi-subscriber broadcast signal.
//!
//! This replaces the C source's embedded `list_head` listener lists
//! (`cb_signal_add`/`cb_signal_emit`/`list_del`) per the redesign flags in
//! §9: adapted from the teacher's `utils::signaling::Signaler`/`SignalToken`
//! pair (same weak-upgrade-and-retain removal strategy, trimmed of the
//! teacher's delayed-registration-during-dispatch bookkeeping since this
//! crate never registers a new listener from within a firing listener).
//! Each registrant holds a [`SignalToken`] that keeps its callback slot alive
//! and removes it in O(1) when dropped (§5 Cancellation: "dropping listeners
//! so their notifications become no-ops"). Buffers' own one-shot `flipped`
//! and `completed` notifications (§4.1, §4.3) are a separate, narrower
//! mechanism defined directly on [`crate::buffer::Buffer`].

use std::cell::RefCell;
use std::rc::{Rc, Weak};

type WeakCallback<S> = Weak<RefCell<dyn FnMut(&S)>>;

/// A multi-subscriber broadcast signal, adapted from the teacher's
/// `utils::signaling::Signaler`.
pub struct Signal<S> {
    callbacks: RefCell<Vec<WeakCallback<S>>>,
}

impl<S> Default for Signal<S> {
    fn default() -> Self {
        Signal {
            callbacks: RefCell::new(Vec::new()),
        }
    }
}

pub struct SignalToken<S> {
    // keeps the Rc (and thus the registration) alive
    _cb: Rc<RefCell<dyn FnMut(&S)>>,
}

impl<S> Signal<S> {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn register<F: FnMut(&S) + 'static>(&self, f: F) -> SignalToken<S> {
        let rc: Rc<RefCell<dyn FnMut(&S)>> = Rc::new(RefCell::new(f));
        self.callbacks.borrow_mut().push(Rc::downgrade(&rc));
        SignalToken { _cb: rc }
    }

    pub fn emit(&self, payload: &S) {
        self.callbacks.borrow_mut().retain(|weak| {
            if let Some(cb) = weak.upgrade() {
                (cb.borrow_mut())(payload);
                true
            } else {
                false
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn broadcast_reaches_every_live_listener() {
        let signal = Signal::<u32>::new();
        let count = Rc::new(Cell::new(0));
        let c1 = count.clone();
        let c2 = count.clone();
        let t1 = signal.register(move |_| c1.set(c1.get() + 1));
        let t2 = signal.register(move |_| c2.set(c2.get() + 1));
        signal.emit(&1);
        assert_eq!(count.get(), 2);
        drop(t1);
        signal.emit(&1);
        assert_eq!(count.get(), 3);
        drop(t2);
    }
}
