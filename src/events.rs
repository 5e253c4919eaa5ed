/*!
 * Typed publish/subscribe event bus
 *
 * Each pipeline stage (Hash Pipeline, Upload Queue, Controller) gets its own
 * closed event enum and its own `EventBus<E>` instance — rather than one
 * global string-keyed emitter, the event *names* are a Rust enum, so a
 * subscriber can never mis-key a handler to an event that doesn't exist.
 *
 * Handlers run synchronously on the thread that calls `publish`. If a
 * handler itself calls `publish` (re-entrant publish), the nested event is
 * queued and drained after the in-progress publish finishes, preserving
 * first-in-first-out delivery order without recursing.
 */

use std::collections::VecDeque;
use std::sync::Mutex;

type Handler<E> = Box<dyn Fn(&E) + Send + Sync>;

pub struct EventBus<E> {
    handlers: Mutex<Vec<Handler<E>>>,
    pending: Mutex<VecDeque<E>>,
    publishing: Mutex<bool>,
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> EventBus<E> {
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(Vec::new()),
            pending: Mutex::new(VecDeque::new()),
            publishing: Mutex::new(false),
        }
    }

    /// Register a handler. Handlers are invoked in registration order.
    pub fn subscribe<F>(&self, handler: F)
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.handlers.lock().unwrap().push(Box::new(handler));
    }

    /// Publish an event to all current subscribers.
    pub fn publish(&self, event: E) {
        self.pending.lock().unwrap().push_back(event);

        let mut publishing = self.publishing.lock().unwrap();
        if *publishing {
            // A publish is already draining the queue on an outer stack
            // frame; it will pick up this event too.
            return;
        }
        *publishing = true;
        drop(publishing);

        loop {
            let next = self.pending.lock().unwrap().pop_front();
            match next {
                Some(event) => {
                    let handlers = self.handlers.lock().unwrap();
                    for handler in handlers.iter() {
                        handler(&event);
                    }
                }
                None => break,
            }
        }

        *self.publishing.lock().unwrap() = false;
    }
}
