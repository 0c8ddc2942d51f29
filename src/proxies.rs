//! Typed views over proxies.
//!
//! A view pairs a [`Proxy`] with the [`Bridge`] that produced it so results
//! coming back from the host are wrapped through the same caches.

use std::rc::Rc;

use crate::bridge::{Bridge, BridgeError};
use crate::events::EventStream;
use crate::host::{NativeRef, NativeValue};
use crate::interfaces::DomInterface;
use crate::proxy::{ManagedCallback, Proxy};

pub trait ProxyView: Sized {
    const INTERFACE: DomInterface;

    fn from_parts(bridge: Bridge, proxy: Proxy) -> Self;

    fn proxy(&self) -> &Proxy;

    fn bridge(&self) -> &Bridge;

    /// Checks that `proxy` is attached and implements [`Self::INTERFACE`].
    fn cast(bridge: &Bridge, proxy: &Proxy) -> Result<Self, BridgeError> {
        if proxy.is_bare() {
            return Err(BridgeError::Unattached {
                interface: proxy.interface_name().to_string(),
            });
        }
        if !bridge.registry().is_instance(proxy, Self::INTERFACE.name()) {
            return Err(BridgeError::TypeMismatch {
                expected: Self::INTERFACE.name().to_string(),
                actual: proxy.interface_name().to_string(),
            });
        }
        Ok(Self::from_parts(bridge.clone(), proxy.clone()))
    }

    /// Wraps `native` and casts the result.
    fn wrap(bridge: &Bridge, native: &NativeRef) -> Result<Self, BridgeError> {
        let proxy = bridge.wrap_object(native)?;
        Self::cast(bridge, &proxy)
    }

    fn native(&self) -> Option<&NativeRef> {
        self.proxy().raw()
    }

    fn attached(&self) -> Result<&NativeRef, BridgeError> {
        self.native().ok_or_else(|| BridgeError::Unattached {
            interface: self.proxy().interface_name().to_string(),
        })
    }

    fn unsupported<T>(&self, operation: &str) -> Result<T, BridgeError> {
        Err(BridgeError::Unsupported {
            interface: self.proxy().interface_name().to_string(),
            operation: operation.to_string(),
        })
    }
}

macro_rules! proxy_view {
    ($(#[$meta:meta])* $name:ident => $interface:ident) => {
        $(#[$meta])*
        #[derive(Clone)]
        pub struct $name {
            bridge: Bridge,
            proxy: Proxy,
        }

        impl ProxyView for $name {
            const INTERFACE: DomInterface = DomInterface::$interface;

            fn from_parts(bridge: Bridge, proxy: Proxy) -> Self {
                Self { bridge, proxy }
            }

            fn proxy(&self) -> &Proxy {
                &self.proxy
            }

            fn bridge(&self) -> &Bridge {
                &self.bridge
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_tuple(stringify!($name)).field(&self.proxy).finish()
            }
        }
    };
}

proxy_view!(EventTarget => EventTarget);
proxy_view!(Node => Node);
proxy_view!(Element => Element);
proxy_view!(Window => Window);
proxy_view!(
    /// A host event as seen by a handler.
    Event => Event
);

impl EventTarget {
    pub fn add_event_listener(
        &self,
        event_type: &str,
        callback: &ManagedCallback,
        capture: bool,
    ) -> Result<(), BridgeError> {
        let native = self.attached()?;
        let listener = self.bridge.unwrap_callback(callback);
        native.add_event_listener(event_type, &listener, capture);
        Ok(())
    }

    pub fn remove_event_listener(
        &self,
        event_type: &str,
        callback: &ManagedCallback,
        capture: bool,
    ) -> Result<(), BridgeError> {
        let native = self.attached()?;
        let listener = self.bridge.unwrap_callback(callback);
        native.remove_event_listener(event_type, &listener, capture);
        Ok(())
    }

    /// Returns `false` if the event was cancelable and a listener prevented
    /// its default action.
    pub fn dispatch_event(&self, event: &Event) -> bool {
        match (self.native(), event.native()) {
            (Some(target), Some(native_event)) => target.dispatch_event(native_event),
            _ => true,
        }
    }

    pub fn on(&self, event_type: &str) -> EventStream {
        EventStream::new(&self.bridge, &self.proxy, event_type)
    }
}

impl Node {
    pub fn as_event_target(&self) -> EventTarget {
        EventTarget::from_parts(self.bridge.clone(), self.proxy.clone())
    }

    pub fn parent_node(&self) -> Result<Option<Node>, BridgeError> {
        self.native()
            .and_then(|native| native.parent())
            .map(|parent| Node::wrap(&self.bridge, &parent))
            .transpose()
    }

    pub fn child_nodes(&self) -> Result<Vec<Node>, BridgeError> {
        let children = self.native().map(|native| native.children()).unwrap_or_default();
        self.bridge
            .wrap_all(&children)?
            .into_iter()
            .map(|proxy| Node::cast(&self.bridge, &proxy))
            .collect()
    }

    /// Fails if either node is unattached or `child` is this node or one of
    /// its ancestors.
    pub fn append_child(&self, child: &Node) -> Result<(), BridgeError> {
        self.attached()?.append_child(child.attached()?)?;
        Ok(())
    }
}

impl Element {
    pub fn as_node(&self) -> Node {
        Node::from_parts(self.bridge.clone(), self.proxy.clone())
    }

    pub fn as_event_target(&self) -> EventTarget {
        EventTarget::from_parts(self.bridge.clone(), self.proxy.clone())
    }

    /// Upper-cased for HTML elements, as the host reports it.
    pub fn tag_name(&self) -> String {
        let local = self
            .native()
            .and_then(|native| native.local_name().map(str::to_string))
            .unwrap_or_default();
        if self.bridge.registry().is_instance(&self.proxy, "HTMLElement") {
            local.to_ascii_uppercase()
        } else {
            local
        }
    }

    pub fn id(&self) -> String {
        self.get_attribute("id").unwrap_or_default()
    }

    pub fn get_attribute(&self, name: &str) -> Option<String> {
        self.native().and_then(|native| native.attribute(name))
    }

    pub fn set_attribute(&self, name: &str, value: &str) {
        if let Some(native) = self.native() {
            native.set_attribute(name, value);
        }
    }

    pub fn matches(&self, selector: &str) -> bool {
        self.native().is_some_and(|native| native.matches(selector))
    }

    pub fn on_click(&self) -> EventStream {
        self.as_event_target().on("click")
    }

    /// Exclusive pointer capture is not available in this host.
    pub fn request_pointer_lock(&self) -> Result<(), BridgeError> {
        self.unsupported("requestPointerLock")
    }
}

impl Window {
    pub fn as_event_target(&self) -> EventTarget {
        EventTarget::from_parts(self.bridge.clone(), self.proxy.clone())
    }

    pub fn document(&self) -> Result<Option<Proxy>, BridgeError> {
        let value = self
            .native()
            .map(|native| native.property("document"))
            .unwrap_or_default();
        Ok(self.bridge.wrap(&value)?.into_proxy())
    }

    /// Modal dialogs were removed from the platform; always fails.
    pub fn show_modal_dialog(&self, _url: &str) -> Result<NativeValue, BridgeError> {
        self.unsupported("showModalDialog")
    }
}

impl Event {
    pub fn event_type(&self) -> String {
        self.native()
            .and_then(|native| native.property("type").as_str().map(str::to_string))
            .unwrap_or_default()
    }

    pub fn target(&self) -> Result<Option<Proxy>, BridgeError> {
        self.object_property("target")
    }

    pub fn current_target(&self) -> Result<Option<Proxy>, BridgeError> {
        self.object_property("currentTarget")
    }

    fn object_property(&self, name: &str) -> Result<Option<Proxy>, BridgeError> {
        match self.native().map(|native| native.property(name)) {
            Some(NativeValue::Object(object)) => self.bridge.wrap_object(&object).map(Some),
            _ => Ok(None),
        }
    }

    pub fn prevent_default(&self) {
        if let Some(native) = self.native() {
            native.set_property("defaultPrevented", true);
        }
    }

    pub fn default_prevented(&self) -> bool {
        self.native()
            .and_then(|native| native.property("defaultPrevented").as_bool())
            .unwrap_or(false)
    }

    pub fn stop_propagation(&self) {
        if let Some(native) = self.native() {
            native.set_property("propagationStopped", true);
        }
    }

    /// Selector matched by the stream delivering this event, if it has one.
    pub fn delegated_selector(&self) -> Option<String> {
        self.proxy.delegated_selector()
    }
}

/// True if both views wrap the same native object.
pub fn same_object(a: &impl ProxyView, b: &impl ProxyView) -> bool {
    match (a.native(), b.native()) {
        (Some(a), Some(b)) => Rc::ptr_eq(a, b),
        _ => false,
    }
}
