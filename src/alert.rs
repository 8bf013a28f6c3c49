//! Coalescing alerts fanning state changes out to subscribers
use crate::Error;

/// Identifies one registered subscriber, for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

struct Subscriber {
    id: CallbackId,
    func: Box<dyn FnMut()>,
}

/// A subscriber list with a coalescing pending flag.
///
/// Any number of [`Alert::pending`] marks between two dispatches collapse
/// into a single dispatch: the owner checks [`Alert::take_pending`], runs its
/// prepare step, then calls [`Alert::notify`].
#[derive(Default)]
pub struct Alert {
    pending: bool,
    next_id: u64,
    subscribers: Vec<Subscriber>,
}

impl Alert {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_callback(&mut self, func: Box<dyn FnMut()>) -> CallbackId {
        let id = CallbackId(self.next_id);
        self.next_id += 1;
        self.subscribers.push(Subscriber { id, func });
        id
    }

    pub fn rm_callback(&mut self, id: CallbackId) -> Result<(), Error> {
        let pos = self
            .subscribers
            .iter()
            .position(|s| s.id == id)
            .ok_or(Error::NotFound)?;
        self.subscribers.remove(pos);
        Ok(())
    }

    /// Mark the alert for dispatch.
    pub fn pending(&mut self) {
        self.pending = true;
    }

    /// Consume the pending mark, reporting whether a dispatch is due.
    pub fn take_pending(&mut self) -> bool {
        std::mem::replace(&mut self.pending, false)
    }

    /// Invoke every subscriber.
    pub fn notify(&mut self) {
        for sub in self.subscribers.iter_mut() {
            (sub.func)();
        }
    }
}
