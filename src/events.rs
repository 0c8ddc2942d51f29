//! Host event listeners exposed as cancellable, pausable subscriptions.

use std::cell::Cell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use futures_util::{Stream, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tracing::{debug, error, warn};

use crate::bridge::Bridge;
use crate::host::{NativeCallback, NativeRef, NativeValue};
use crate::proxy::Proxy;

type Handler = Rc<dyn Fn(&Proxy)>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubscriptionError {
    #[error("subscription has been canceled")]
    Canceled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Active,
    Paused,
    Canceled,
    /// The stream was built over a bare proxy, so there is no host object to
    /// attach to and the handler never runs.
    Unbound,
}

/// Events of one type fired at one target.
///
/// Nothing is attached until [`EventStream::listen`]; each listen creates an
/// independent subscription.
#[derive(Clone)]
pub struct EventStream {
    bridge: Bridge,
    target: Option<NativeRef>,
    event_type: String,
    capture: bool,
    selector: Option<String>,
}

impl EventStream {
    pub fn new(bridge: &Bridge, target: &Proxy, event_type: impl Into<String>) -> Self {
        Self {
            bridge: bridge.clone(),
            target: target.raw().cloned(),
            event_type: event_type.into(),
            capture: false,
            selector: None,
        }
    }

    pub fn capture(mut self, capture: bool) -> Self {
        self.capture = capture;
        self
    }

    /// Only deliver events whose target, or one of its ancestors, matches
    /// `selector`. Delivered events carry the selector in
    /// [`Proxy::delegated_selector`].
    pub fn matching(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn listen(self, handler: impl Fn(&Proxy) + 'static) -> Subscription {
        if self.target.is_none() {
            warn!(
                target = "events",
                event_type = %self.event_type,
                "listening on a proxy with no native object"
            );
        }
        let mut subscription = Subscription {
            bridge: self.bridge,
            target: self.target,
            event_type: self.event_type,
            capture: self.capture,
            selector: self.selector,
            handler: Some(Rc::new(handler)),
            attached: None,
            pause_count: 0,
            canceled: false,
        };
        subscription.attach();
        subscription
    }

    /// Subscribes and forwards every event into a channel. The receiver ends
    /// once the subscription is canceled and buffered events are drained.
    pub fn into_receiver(self) -> (Subscription, EventReceiver) {
        let (sender, receiver) = unbounded_channel();
        let subscription = self.listen(move |event| {
            if sender.send(event.clone()).is_err() {
                debug!(target = "events", "event receiver dropped");
            }
        });
        (subscription, EventReceiver { receiver })
    }

    /// Resolves with the next event, then cancels. The listener is attached
    /// before this returns, so events fired before the first poll count.
    /// Dropping the future before it resolves also cancels. Resolves with
    /// `None` at once when the stream is unbound.
    pub fn first(self) -> impl Future<Output = Option<Proxy>> {
        let (mut subscription, mut receiver) = self.into_receiver();
        if subscription.state() == SubscriptionState::Unbound {
            subscription.cancel();
        }
        let guard = CancelOnDrop(subscription);
        async move {
            let event = receiver.next().await;
            drop(guard);
            event
        }
    }
}

struct CancelOnDrop(Subscription);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

struct AttachedListener {
    callback: NativeCallback,
    live: Rc<Cell<bool>>,
}

/// One attachment of a handler to a host event target.
///
/// Dropping a subscription leaves the listener attached; call
/// [`Subscription::cancel`] to detach it.
pub struct Subscription {
    bridge: Bridge,
    target: Option<NativeRef>,
    event_type: String,
    capture: bool,
    selector: Option<String>,
    handler: Option<Handler>,
    attached: Option<AttachedListener>,
    pause_count: u32,
    canceled: bool,
}

impl Subscription {
    pub fn state(&self) -> SubscriptionState {
        if self.canceled {
            SubscriptionState::Canceled
        } else if self.target.is_none() {
            SubscriptionState::Unbound
        } else if self.pause_count > 0 {
            SubscriptionState::Paused
        } else {
            SubscriptionState::Active
        }
    }

    pub fn is_paused(&self) -> bool {
        self.state() == SubscriptionState::Paused
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Pauses are counted; each needs a matching [`Subscription::resume`].
    pub fn pause(&mut self) -> Result<(), SubscriptionError> {
        self.ensure_live()?;
        self.pause_count += 1;
        self.detach();
        Ok(())
    }

    pub fn resume(&mut self) -> Result<(), SubscriptionError> {
        self.ensure_live()?;
        if self.pause_count == 0 {
            return Ok(());
        }
        self.pause_count -= 1;
        self.attach();
        Ok(())
    }

    /// Detaches for good. Calling it again does nothing.
    pub fn cancel(&mut self) {
        if self.canceled {
            return;
        }
        self.detach();
        self.canceled = true;
        self.handler = None;
        debug!(target = "events", event_type = %self.event_type, "subscription canceled");
    }

    /// Replaces the handler. Takes effect immediately unless paused.
    pub fn on_data(&mut self, handler: impl Fn(&Proxy) + 'static) -> Result<(), SubscriptionError> {
        self.ensure_live()?;
        self.detach();
        self.handler = Some(Rc::new(handler));
        self.attach();
        Ok(())
    }

    fn ensure_live(&self) -> Result<(), SubscriptionError> {
        if self.canceled {
            return Err(SubscriptionError::Canceled);
        }
        Ok(())
    }

    fn attach(&mut self) {
        if self.canceled || self.pause_count > 0 || self.attached.is_some() {
            return;
        }
        let (Some(target), Some(handler)) = (self.target.as_ref(), self.handler.as_ref()) else {
            return;
        };

        let live = Rc::new(Cell::new(true));
        let callback = listener(
            self.bridge.clone(),
            Rc::clone(handler),
            self.selector.clone(),
            Rc::clone(&live),
        );
        target.add_event_listener(&self.event_type, &callback, self.capture);
        self.attached = Some(AttachedListener { callback, live });
    }

    fn detach(&mut self) {
        let Some(attached) = self.attached.take() else {
            return;
        };
        attached.live.set(false);
        if let Some(target) = self.target.as_ref() {
            target.remove_event_listener(&self.event_type, &attached.callback, self.capture);
        }
    }
}

fn listener(
    bridge: Bridge,
    handler: Handler,
    selector: Option<String>,
    live: Rc<Cell<bool>>,
) -> NativeCallback {
    NativeCallback::new(move |argument| {
        // A listener removed mid-dispatch may still sit in the host's snapshot.
        if !live.get() {
            return NativeValue::Null;
        }
        let Some(native_event) = argument.as_object() else {
            return NativeValue::Null;
        };

        if let Some(selector) = selector.as_deref() {
            let target = native_event.property("target");
            let matched = target
                .as_object()
                .is_some_and(|target| target.matches_with_ancestors(selector));
            if !matched {
                return NativeValue::Null;
            }
        }

        match bridge.wrap_object(native_event) {
            Ok(event) => {
                event.set_delegated_selector(selector.as_deref());
                handler(&event);
            }
            Err(err) => {
                error!(target = "events", error = %err, "failed to wrap native event");
            }
        }
        NativeValue::Null
    })
}

/// Asynchronous side of [`EventStream::into_receiver`].
pub struct EventReceiver {
    receiver: UnboundedReceiver<Proxy>,
}

impl EventReceiver {
    /// Returns a buffered event without waiting.
    pub fn try_next(&mut self) -> Option<Proxy> {
        self.receiver.try_recv().ok()
    }
}

impl Stream for EventReceiver {
    type Item = Proxy;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostRealm;
    use crate::registry::ProxyRegistry;
    use std::cell::RefCell;

    struct Fixture {
        realm: HostRealm,
        bridge: Bridge,
        button: Proxy,
    }

    fn fixture() -> Fixture {
        let realm = HostRealm::dom();
        let bridge = Bridge::new(Rc::new(ProxyRegistry::dom()));
        let button = bridge
            .wrap_object(&realm.create_element("button").unwrap())
            .unwrap();
        Fixture {
            realm,
            bridge,
            button,
        }
    }

    impl Fixture {
        fn click(&self) {
            let event = self
                .realm
                .create_event("MouseEvent", "click", true, true)
                .unwrap();
            self.button.raw().unwrap().dispatch_event(&event);
        }

        fn listeners(&self) -> usize {
            self.button.raw().unwrap().listener_count("click")
        }
    }

    fn counter() -> (Rc<Cell<usize>>, impl Fn(&Proxy) + 'static) {
        let hits = Rc::new(Cell::new(0));
        let sink = Rc::clone(&hits);
        (hits, move |_: &Proxy| sink.set(sink.get() + 1))
    }

    #[test]
    fn listen_attaches_immediately() {
        let fixture = fixture();
        let (hits, handler) = counter();
        let subscription = EventStream::new(&fixture.bridge, &fixture.button, "click").listen(handler);

        assert_eq!(subscription.state(), SubscriptionState::Active);
        assert_eq!(fixture.listeners(), 1);
        fixture.click();
        fixture.click();
        assert_eq!(hits.get(), 2);
    }

    #[test]
    fn pause_is_counted() {
        let fixture = fixture();
        let (hits, handler) = counter();
        let mut subscription =
            EventStream::new(&fixture.bridge, &fixture.button, "click").listen(handler);

        subscription.pause().unwrap();
        subscription.pause().unwrap();
        subscription.resume().unwrap();
        assert!(subscription.is_paused());
        assert_eq!(fixture.listeners(), 0);
        fixture.click();
        assert_eq!(hits.get(), 0);

        subscription.resume().unwrap();
        assert_eq!(subscription.state(), SubscriptionState::Active);
        assert_eq!(fixture.listeners(), 1);
        fixture.click();
        assert_eq!(hits.get(), 1);

        subscription.resume().unwrap();
        assert_eq!(fixture.listeners(), 1);
    }

    #[test]
    fn cancel_is_final() {
        let fixture = fixture();
        let (hits, handler) = counter();
        let mut subscription =
            EventStream::new(&fixture.bridge, &fixture.button, "click").listen(handler);

        fixture.click();
        subscription.cancel();
        subscription.cancel();
        fixture.click();

        assert_eq!(hits.get(), 1);
        assert_eq!(fixture.listeners(), 0);
        assert_eq!(subscription.pause(), Err(SubscriptionError::Canceled));
        assert_eq!(subscription.resume(), Err(SubscriptionError::Canceled));
        assert_eq!(
            subscription.on_data(|_| {}),
            Err(SubscriptionError::Canceled)
        );
        assert_eq!(fixture.listeners(), 0);
        assert_eq!(subscription.state(), SubscriptionState::Canceled);
    }

    #[test]
    fn on_data_swaps_handler() {
        let fixture = fixture();
        let (old_hits, old_handler) = counter();
        let (new_hits, new_handler) = counter();
        let mut subscription =
            EventStream::new(&fixture.bridge, &fixture.button, "click").listen(old_handler);

        subscription.on_data(new_handler).unwrap();
        assert_eq!(fixture.listeners(), 1);
        fixture.click();
        assert_eq!(old_hits.get(), 0);
        assert_eq!(new_hits.get(), 1);
    }

    #[test]
    fn on_data_while_paused_waits_for_resume() {
        let fixture = fixture();
        let (hits, handler) = counter();
        let mut subscription =
            EventStream::new(&fixture.bridge, &fixture.button, "click").listen(|_| {});

        subscription.pause().unwrap();
        subscription.on_data(handler).unwrap();
        assert_eq!(fixture.listeners(), 0);
        subscription.resume().unwrap();
        fixture.click();
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn cancel_during_dispatch_suppresses_later_listener() {
        let fixture = fixture();
        let (hits, handler) = counter();
        let victim = Rc::new(RefCell::new(None::<Subscription>));

        let slot = Rc::clone(&victim);
        let _killer = EventStream::new(&fixture.bridge, &fixture.button, "click").listen(
            move |_| {
                if let Some(subscription) = slot.borrow_mut().as_mut() {
                    subscription.cancel();
                }
            },
        );
        *victim.borrow_mut() =
            Some(EventStream::new(&fixture.bridge, &fixture.button, "click").listen(handler));

        fixture.click();
        assert_eq!(hits.get(), 0);
    }

    #[test]
    fn delivered_events_are_cached_proxies() {
        let fixture = fixture();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let _subscription = EventStream::new(&fixture.bridge, &fixture.button, "click")
            .listen(move |event| sink.borrow_mut().push(event.clone()));

        let event = fixture
            .realm
            .create_event("PointerEvent", "click", true, false)
            .unwrap();
        fixture.button.raw().unwrap().dispatch_event(&event);
        fixture.button.raw().unwrap().dispatch_event(&event);

        let seen = seen.borrow();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].ptr_eq(&seen[1]));
        assert_eq!(seen[0].interface_name(), "PointerEvent");
    }

    #[test]
    fn dropping_first_detaches() {
        let fixture = fixture();
        let pending = EventStream::new(&fixture.bridge, &fixture.button, "click").first();
        assert_eq!(fixture.listeners(), 1);

        drop(pending);
        assert_eq!(fixture.listeners(), 0);
        fixture.click();
    }

    #[test]
    fn bare_target_is_unbound() {
        let fixture = fixture();
        let class = fixture.bridge.registry().lookup_type("HTMLButtonElement").unwrap();
        let bare = Proxy::bare(class);
        let (hits, handler) = counter();
        let mut subscription = EventStream::new(&fixture.bridge, &bare, "click").listen(handler);

        assert_eq!(subscription.state(), SubscriptionState::Unbound);
        subscription.pause().unwrap();
        assert_eq!(subscription.state(), SubscriptionState::Unbound);
        subscription.cancel();
        assert_eq!(subscription.state(), SubscriptionState::Canceled);
        assert_eq!(hits.get(), 0);
    }
}
