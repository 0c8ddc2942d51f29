//! Managed-side values: proxies, proxy classes and callbacks.

use std::cell::{OnceCell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::host::{NativeId, NativeRef};

static NEXT_CALLBACK_ID: AtomicU64 = AtomicU64::new(1);

struct ProxyClassInner {
    name: String,
    parent: Option<ProxyClass>,
}

/// Managed-side type of a proxy, used for `is` checks.
#[derive(Clone)]
pub struct ProxyClass(Rc<ProxyClassInner>);

impl ProxyClass {
    pub fn new(name: impl Into<String>, parent: Option<ProxyClass>) -> Self {
        Self(Rc::new(ProxyClassInner {
            name: name.into(),
            parent,
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn parent(&self) -> Option<&ProxyClass> {
        self.0.parent.as_ref()
    }

    pub fn is_subclass_of(&self, name: &str) -> bool {
        let mut current = Some(self);
        while let Some(class) = current {
            if class.name() == name {
                return true;
            }
            current = class.parent();
        }
        false
    }
}

impl PartialEq for ProxyClass {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for ProxyClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProxyClass({})", self.name())
    }
}

pub(crate) struct ProxyObject {
    class: ProxyClass,
    raw: OnceCell<NativeRef>,
    delegated_selector: RefCell<Option<String>>,
}

/// Managed wrapper around exactly one native object.
///
/// Proxies compare by reference: two handles are equal only if they are the
/// same proxy.
#[derive(Clone)]
pub struct Proxy(Rc<ProxyObject>);

pub(crate) struct WeakProxy(Weak<ProxyObject>);

impl Proxy {
    /// A proxy of `class` with no native object attached yet. Allocators
    /// return these; the bridge attaches the native object.
    pub fn bare(class: ProxyClass) -> Self {
        Self(Rc::new(ProxyObject {
            class,
            raw: OnceCell::new(),
            delegated_selector: RefCell::new(None),
        }))
    }

    pub fn class(&self) -> &ProxyClass {
        &self.0.class
    }

    pub fn interface_name(&self) -> &str {
        self.0.class.name()
    }

    /// The wrapped native object, `None` only for a bare proxy.
    pub fn raw(&self) -> Option<&NativeRef> {
        self.0.raw.get()
    }

    pub fn native_id(&self) -> Option<NativeId> {
        self.raw().map(|native| native.id())
    }

    pub fn is_bare(&self) -> bool {
        self.0.raw.get().is_none()
    }

    pub(crate) fn attach(&self, native: NativeRef) -> bool {
        self.0.raw.set(native).is_ok()
    }

    pub fn ptr_eq(&self, other: &Proxy) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Selector matched by the event stream delivering this proxy right now.
    /// `None` when the current delivery comes from a stream without a
    /// selector. Every delivery overwrites the value.
    pub fn delegated_selector(&self) -> Option<String> {
        self.0.delegated_selector.borrow().clone()
    }

    pub(crate) fn set_delegated_selector(&self, selector: Option<&str>) {
        *self.0.delegated_selector.borrow_mut() = selector.map(str::to_string);
    }

    pub(crate) fn downgrade(&self) -> WeakProxy {
        WeakProxy(Rc::downgrade(&self.0))
    }
}

impl WeakProxy {
    pub(crate) fn upgrade(&self) -> Option<Proxy> {
        self.0.upgrade().map(Proxy)
    }

    pub(crate) fn is_dead(&self) -> bool {
        self.0.strong_count() == 0
    }
}

impl PartialEq for Proxy {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.native_id() {
            Some(id) => write!(f, "Proxy({} {id})", self.interface_name()),
            None => write!(f, "Proxy({} bare)", self.interface_name()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

struct ManagedCallbackInner {
    id: CallbackId,
    func: Box<dyn Fn(ManagedValue) -> ManagedValue>,
}

/// A managed function that may be handed to the host.
#[derive(Clone)]
pub struct ManagedCallback(Rc<ManagedCallbackInner>);

pub(crate) struct WeakManagedCallback(Weak<ManagedCallbackInner>);

impl ManagedCallback {
    pub fn new(func: impl Fn(ManagedValue) -> ManagedValue + 'static) -> Self {
        Self(Rc::new(ManagedCallbackInner {
            id: CallbackId(NEXT_CALLBACK_ID.fetch_add(1, Ordering::Relaxed)),
            func: Box::new(func),
        }))
    }

    pub fn id(&self) -> CallbackId {
        self.0.id
    }

    pub fn call(&self, argument: ManagedValue) -> ManagedValue {
        (self.0.func)(argument)
    }

    pub fn ptr_eq(&self, other: &ManagedCallback) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn downgrade(&self) -> WeakManagedCallback {
        WeakManagedCallback(Rc::downgrade(&self.0))
    }
}

impl WeakManagedCallback {
    pub(crate) fn upgrade(&self) -> Option<ManagedCallback> {
        self.0.upgrade().map(ManagedCallback)
    }
}

impl fmt::Debug for ManagedCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ManagedCallback({})", self.0.id.0)
    }
}

/// A value as managed code sees it.
#[derive(Clone, Debug, Default)]
pub enum ManagedValue {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Proxy(Proxy),
    Callback(ManagedCallback),
}

impl ManagedValue {
    pub fn as_proxy(&self) -> Option<&Proxy> {
        match self {
            Self::Proxy(proxy) => Some(proxy),
            _ => None,
        }
    }

    pub fn into_proxy(self) -> Option<Proxy> {
        match self {
            Self::Proxy(proxy) => Some(proxy),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }
}

impl PartialEq for ManagedValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Proxy(a), Self::Proxy(b)) => a.ptr_eq(b),
            (Self::Callback(a), Self::Callback(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl From<Proxy> for ManagedValue {
    fn from(value: Proxy) -> Self {
        Self::Proxy(value)
    }
}

impl From<&str> for ManagedValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<f64> for ManagedValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<bool> for ManagedValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}
