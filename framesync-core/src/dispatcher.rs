//! Time-tagged Dispatcher
//!
//! Routes inbound messages to handlers registered per address and holds back
//! bundles until their time tag is reached. Deferral is handed back to the
//! caller as a delay so the event loop owns every timer.

use std::collections::HashMap;
use std::time::Duration;

use tracing::debug;

use crate::clock::Timestamp;
use crate::sync::{Arg, Bundle, Message, Packet};

type Handler<C> = Box<dyn FnMut(&mut C, &[Arg]) + Send>;

/// A bundle that is not due yet, to be redelivered after `delay`
#[derive(Debug, Clone, PartialEq)]
pub struct Deferred {
    pub bundle: Bundle,
    pub delay: Duration,
}

/// Address router for inbound packets.
///
/// Handlers get mutable access to a context `C` owned by the caller.
pub struct Dispatcher<C> {
    handlers: HashMap<String, Handler<C>>,
}

impl<C> Dispatcher<C> {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register the handler for `address`, replacing any earlier one
    pub fn register<F>(&mut self, address: impl Into<String>, handler: F)
    where
        F: FnMut(&mut C, &[Arg]) + Send + 'static,
    {
        self.handlers.insert(address.into(), Box::new(handler));
    }

    pub fn is_registered(&self, address: &str) -> bool {
        self.handlers.contains_key(address)
    }

    /// Deliver a packet as of `now`.
    ///
    /// Messages are delivered immediately. A bundle whose time tag is not
    /// after `now` has its packets dispatched in order; a nested bundle is
    /// checked again on its own. Bundles still in the future come back as
    /// [`Deferred`] entries.
    pub fn dispatch(&mut self, ctx: &mut C, packet: Packet, now: Timestamp) -> Vec<Deferred> {
        let mut deferred = Vec::new();
        self.dispatch_into(ctx, packet, now, &mut deferred);
        deferred
    }

    fn dispatch_into(&mut self, ctx: &mut C, packet: Packet, now: Timestamp, deferred: &mut Vec<Deferred>) {
        match packet {
            Packet::Message(message) => self.deliver(ctx, message),
            Packet::Bundle(bundle) => match now.checked_duration_until(bundle.time) {
                Some(delay) => {
                    debug!("Deferring bundle tagged {} by {:?}", bundle.time, delay);
                    deferred.push(Deferred { bundle, delay });
                }
                None => {
                    for packet in bundle.packets {
                        self.dispatch_into(ctx, packet, now, deferred);
                    }
                }
            },
        }
    }

    fn deliver(&mut self, ctx: &mut C, message: Message) {
        match self.handlers.get_mut(&message.address) {
            Some(handler) => handler(ctx, &message.args),
            None => debug!("No handler for {}, dropping", message.address),
        }
    }
}

impl<C> Default for Dispatcher<C> {
    fn default() -> Self {
        Self::new()
    }
}
