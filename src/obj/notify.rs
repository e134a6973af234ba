//! Observer lists for registry and engine notifications
//!
//! Replaces ad-hoc signal/slot wiring with an explicit subscribe/unsubscribe
//! interface: `subscribe(handler) -> Token`, `unsubscribe(token)`. Handlers
//! are delivered in subscription order.

use std::sync::Arc;

/// Opaque subscription handle returned by `subscribe`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token(u64);

/// Shared handler type
pub type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Ordered list of subscribers for one event kind
///
/// Not internally synchronized; owners keep it behind their own lock and
/// emit on a snapshot taken while holding that lock.
pub struct SignalList<T> {
    next: u64,
    subs: Vec<(Token, Handler<T>)>,
}

impl<T> SignalList<T> {
    pub fn new() -> Self {
        SignalList {
            next: 1,
            subs: Vec::new(),
        }
    }

    /// Add a handler, returning its token
    pub fn subscribe(&mut self, handler: Handler<T>) -> Token {
        let token = Token(self.next);
        self.next += 1;
        self.subs.push((token, handler));
        token
    }

    /// Remove a handler by token; unknown tokens are ignored
    pub fn unsubscribe(&mut self, token: Token) {
        self.subs.retain(|(t, _)| *t != token);
    }

    /// Snapshot the current handlers in subscription order
    ///
    /// Taken under the owner's lock so emission can happen outside it.
    pub fn snapshot(&self) -> Vec<Handler<T>> {
        self.subs.iter().map(|(_, h)| Arc::clone(h)).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.subs.is_empty()
    }
}

impl<T> Default for SignalList<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Invoke every handler in a snapshot with the given event
pub fn emit<T>(handlers: &[Handler<T>], event: &T) {
    for h in handlers {
        h(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_delivery_order_and_unsubscribe() {
        let mut list: SignalList<u32> = SignalList::new();
        let calls = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let c1 = Arc::clone(&calls);
        let t1 = list.subscribe(Arc::new(move |v| c1.lock().push((1, *v))));
        let c2 = Arc::clone(&calls);
        let _t2 = list.subscribe(Arc::new(move |v| c2.lock().push((2, *v))));

        emit(&list.snapshot(), &7);
        assert_eq!(*calls.lock(), vec![(1, 7), (2, 7)]);

        list.unsubscribe(t1);
        calls.lock().clear();
        emit(&list.snapshot(), &8);
        assert_eq!(*calls.lock(), vec![(2, 8)]);
    }

    #[test]
    fn test_unknown_token_ignored() {
        let mut list: SignalList<()> = SignalList::new();
        let count = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&count);
        let token = list.subscribe(Arc::new(move |_| {
            c.fetch_add(1, Ordering::Relaxed);
        }));
        list.unsubscribe(token);
        list.unsubscribe(token); // second removal is a no-op
        emit(&list.snapshot(), &());
        assert_eq!(count.load(Ordering::Relaxed), 0);
    }
}
