//! ## EVENT DISPATCH (C6)
//!
//! The wire protocol's "subscribe to anything, receive everything or one
//! kind" fans out to two Rust idioms: a closed [`Event`] enum stands in for
//! the open-ended invariant subscription, and a parallel `Any`-kind list
//! stands in for the contravariant "receive every event regardless of type"
//! subscription. Handlers run sequentially, in registration order, and a
//! handler that panics or returns an error never stops the remaining
//! handlers for that event (§4.6).
//!
//! Handlers take owned values rather than references: a reference borrowed
//! across the `await` points inside a handler body cannot be proven to
//! outlive the call the way it can in a synchronous, non-async dispatch
//! loop, so values are cloned/moved in instead.

use std::fmt;
use std::time::SystemTime;

use tracing::warn;

/// Everything the connection core can hand to a subscriber.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// The connection completed its handshake and is now delivering traffic.
    Connected { time: SystemTime },
    /// The connection tore down, voluntarily or due to an error.
    Disconnected {
        error: Option<String>,
        time: SystemTime,
        /// Monotonically increasing per-connection-attempt counter, so
        /// subscribers can tell which `connect()` call this disconnect
        /// belongs to.
        token: u64,
    },
    /// A `viewer count` push (action 3).
    Popularity { value: u32, time: SystemTime },
    /// A decoded JSON message body (action 5, v0/v1, or recursed out of a
    /// v2 deflate sub-frame).
    Raw { json: serde_json::Value },
}

type Handler = Box<dyn Fn(Event) + Send + Sync>;

/// Per-kind handler registry, built once via [`Dispatcher::builder`] and
/// shared (read-only) for the life of a connection.
#[derive(Default)]
pub struct Dispatcher {
    connected: Vec<Handler>,
    disconnected: Vec<Handler>,
    popularity: Vec<Handler>,
    raw: Vec<Handler>,
    any: Vec<Handler>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("connected", &self.connected.len())
            .field("disconnected", &self.disconnected.len())
            .field("popularity", &self.popularity.len())
            .field("raw", &self.raw.len())
            .field("any", &self.any.len())
            .finish()
    }
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::default()
    }

    /// Invokes every handler registered for `event`'s kind, then every
    /// handler registered for "any" kind, in registration order. A handler
    /// that panics is caught and logged so it cannot take down the receive
    /// or heartbeat loop that triggered it.
    pub fn dispatch(&self, event: Event) {
        let kind_handlers: &[Handler] = match &event {
            Event::Connected { .. } => &self.connected,
            Event::Disconnected { .. } => &self.disconnected,
            Event::Popularity { .. } => &self.popularity,
            Event::Raw { .. } => &self.raw,
        };

        for handler in kind_handlers.iter().chain(self.any.iter()) {
            let event = event.clone();
            if let Err(panic) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(event))) {
                let reason = panic_message(&panic);
                warn!(reason, "event handler panicked, continuing with remaining handlers");
            }
        }
    }
}

/// Builds a [`Dispatcher`] by registering handlers before the connection
/// starts. Subscription is closed once the connection is running — there is
/// no dynamic add/remove, mirroring the "subscribe before dispatch begins"
/// shape of the originating invoker/subscriber model.
#[derive(Default)]
pub struct DispatcherBuilder {
    connected: Vec<Handler>,
    disconnected: Vec<Handler>,
    popularity: Vec<Handler>,
    raw: Vec<Handler>,
    any: Vec<Handler>,
}

impl DispatcherBuilder {
    pub fn on_connected(mut self, f: impl Fn(Event) + Send + Sync + 'static) -> Self {
        self.connected.push(Box::new(f));
        self
    }

    pub fn on_disconnected(mut self, f: impl Fn(Event) + Send + Sync + 'static) -> Self {
        self.disconnected.push(Box::new(f));
        self
    }

    pub fn on_popularity(mut self, f: impl Fn(Event) + Send + Sync + 'static) -> Self {
        self.popularity.push(Box::new(f));
        self
    }

    pub fn on_raw(mut self, f: impl Fn(Event) + Send + Sync + 'static) -> Self {
        self.raw.push(Box::new(f));
        self
    }

    /// Registers a handler that receives every event regardless of kind —
    /// the contravariant-equivalent subscription.
    pub fn on_any(mut self, f: impl Fn(Event) + Send + Sync + 'static) -> Self {
        self.any.push(Box::new(f));
        self
    }

    pub fn build(self) -> Dispatcher {
        Dispatcher {
            connected: self.connected,
            disconnected: self.disconnected,
            popularity: self.popularity,
            raw: self.raw,
            any: self.any,
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic payload>"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn handlers_run_in_registration_order() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let o1 = order.clone();
        let o2 = order.clone();

        let dispatcher = Dispatcher::builder()
            .on_popularity(move |_| o1.lock().unwrap().push(1))
            .on_popularity(move |_| o2.lock().unwrap().push(2))
            .build();

        dispatcher.dispatch(Event::Popularity { value: 7, time: SystemTime::now() });
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn any_handlers_receive_every_kind() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let dispatcher = Dispatcher::builder().on_any(move |_| { c.fetch_add(1, Ordering::SeqCst); }).build();

        dispatcher.dispatch(Event::Popularity { value: 1, time: SystemTime::now() });
        dispatcher.dispatch(Event::Raw { json: serde_json::json!({}) });
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn panicking_handler_does_not_stop_the_next_one() {
        let ran = Arc::new(AtomicUsize::new(0));
        let r = ran.clone();
        let dispatcher = Dispatcher::builder()
            .on_popularity(|_| panic!("boom"))
            .on_popularity(move |_| { r.fetch_add(1, Ordering::SeqCst); })
            .build();

        dispatcher.dispatch(Event::Popularity { value: 1, time: SystemTime::now() });
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn kind_specific_handler_not_called_for_other_kinds() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let dispatcher = Dispatcher::builder().on_popularity(move |_| { c.fetch_add(1, Ordering::SeqCst); }).build();

        dispatcher.dispatch(Event::Raw { json: serde_json::json!({}) });
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
