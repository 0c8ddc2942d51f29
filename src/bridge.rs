//! Wrapping and unwrapping between host objects and managed proxies.
//!
//! The [`Bridge`] owns the side tables that keep proxy identity stable and
//! resolves constructors to registered proxy types, falling back through the
//! constructor chain when a subclass has no registration of its own.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, trace};

use crate::cache::{CallbackCache, SweepLimit, WrapperCache};
use crate::config::BridgeConfig;
use crate::host::{HostError, NativeCallback, NativeClass, NativeRef, NativeValue};
use crate::proxy::{ManagedCallback, ManagedValue, Proxy};
use crate::registry::{Allocator, ProxyRegistry};

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("no proxy registered for {constructor} or its ancestors ({})", .chain.join(" -> "))]
    UnregisteredType {
        constructor: String,
        chain: Vec<String>,
    },
    #[error("allocator for {interface} returned a proxy that already wraps a native object")]
    InvalidAllocation { interface: String },
    #[error("{interface}.{operation} is not supported")]
    Unsupported {
        interface: String,
        operation: String,
    },
    #[error("expected a {expected} proxy, found {actual}")]
    TypeMismatch { expected: String, actual: String },
    #[error("{interface} proxy is not attached to a native object")]
    Unattached { interface: String },
    #[error(transparent)]
    Host(#[from] HostError),
}

/// How often a constructor had to be resolved through one of its ancestors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FallbackRecord {
    pub requested: String,
    pub instantiated: String,
    pub count: usize,
}

struct BridgeInner {
    registry: Rc<ProxyRegistry>,
    wrappers: RefCell<WrapperCache>,
    callbacks: RefCell<CallbackCache>,
    fallbacks: RefCell<HashMap<(String, String), usize>>,
    log_fallbacks: bool,
    wrapper_sweep: SweepLimit,
    callback_sweep: SweepLimit,
}

/// Converts values between the host and managed object graphs.
///
/// Cloning a `Bridge` yields another handle to the same caches. Not `Send`:
/// the host drives everything from one thread.
#[derive(Clone)]
pub struct Bridge {
    inner: Rc<BridgeInner>,
}

impl Bridge {
    pub fn new(registry: Rc<ProxyRegistry>) -> Self {
        Self::with_config(registry, &BridgeConfig::default())
    }

    pub fn with_config(registry: Rc<ProxyRegistry>, config: &BridgeConfig) -> Self {
        Self {
            inner: Rc::new(BridgeInner {
                registry,
                wrappers: RefCell::new(WrapperCache::default()),
                callbacks: RefCell::new(CallbackCache::default()),
                fallbacks: RefCell::new(HashMap::new()),
                log_fallbacks: config.log_fallbacks,
                wrapper_sweep: SweepLimit::new(config.prune_threshold.max(1)),
                callback_sweep: SweepLimit::new(config.prune_threshold.max(1)),
            }),
        }
    }

    pub fn registry(&self) -> &ProxyRegistry {
        &self.inner.registry
    }

    /// Wraps a host value. Null and primitives pass through; objects map to
    /// their proxy and functions to a managed callback.
    pub fn wrap(&self, value: &NativeValue) -> Result<ManagedValue, BridgeError> {
        let wrapped = match value {
            NativeValue::Null => ManagedValue::Null,
            NativeValue::Bool(value) => ManagedValue::Bool(*value),
            NativeValue::Number(value) => ManagedValue::Number(*value),
            NativeValue::String(value) => ManagedValue::String(value.clone()),
            NativeValue::Object(native) => ManagedValue::Proxy(self.wrap_object(native)?),
            NativeValue::Function(function) => ManagedValue::Callback(self.wrap_function(function)),
        };
        Ok(wrapped)
    }

    /// Returns the proxy for `native`, allocating one on first use.
    pub fn wrap_object(&self, native: &NativeRef) -> Result<Proxy, BridgeError> {
        let cached = self.inner.wrappers.borrow().get(native.id());
        if let Some(proxy) = cached {
            return Ok(proxy);
        }

        let (matched, allocate) = self.resolve(native.class())?;
        let proxy = allocate();
        if !proxy.attach(Rc::clone(native)) {
            return Err(BridgeError::InvalidAllocation {
                interface: matched.to_string(),
            });
        }

        let requested = native.constructor_name();
        if matched != requested {
            self.note_fallback(requested, proxy.interface_name());
        }

        let mut wrappers = self.inner.wrappers.borrow_mut();
        if let Some(existing) = wrappers.insert(native.id(), &proxy) {
            return Ok(existing);
        }
        if self.inner.wrapper_sweep.exceeded(wrappers.len()) {
            let removed = wrappers.prune();
            self.inner.wrapper_sweep.reset(wrappers.len());
            debug!(
                target = "bridge",
                removed,
                remaining = wrappers.len(),
                next = self.inner.wrapper_sweep.limit(),
                "pruned wrapper cache"
            );
        }
        trace!(target = "bridge", id = %native.id(), interface = proxy.interface_name(), "allocated proxy");
        Ok(proxy)
    }

    pub fn wrap_all(&self, natives: &[NativeRef]) -> Result<Vec<Proxy>, BridgeError> {
        natives.iter().map(|native| self.wrap_object(native)).collect()
    }

    fn resolve<'a>(&self, class: &'a NativeClass) -> Result<(&'a str, Allocator), BridgeError> {
        for candidate in class.chain() {
            if let Some(allocate) = self.inner.registry.lookup_allocator(candidate.name()) {
                return Ok((candidate.name(), allocate));
            }
        }
        Err(BridgeError::UnregisteredType {
            constructor: class.name().to_string(),
            chain: class.chain().map(|c| c.name().to_string()).collect(),
        })
    }

    fn note_fallback(&self, requested: &str, instantiated: &str) {
        *self
            .inner
            .fallbacks
            .borrow_mut()
            .entry((requested.to_string(), instantiated.to_string()))
            .or_insert(0) += 1;
        if self.inner.log_fallbacks {
            info!(
                target = "bridge",
                requested,
                instantiated,
                "instantiated {instantiated} instead of {requested}"
            );
        }
    }

    /// Managed view of a host function. Calling it unwraps the argument and
    /// wraps the result; the same host function always maps to the same
    /// callback while that callback is alive.
    pub fn wrap_function(&self, function: &NativeCallback) -> ManagedCallback {
        let cached = self.inner.callbacks.borrow().managed_for(function);
        if let Some(managed) = cached {
            return managed;
        }

        let bridge = self.clone();
        let native = function.clone();
        let managed = ManagedCallback::new(move |argument| {
            let result = native.call(&bridge.unwrap(&argument));
            match bridge.wrap(&result) {
                Ok(value) => value,
                Err(err) => {
                    error!(target = "bridge", error = %err, "failed to wrap host function result");
                    ManagedValue::Null
                }
            }
        });
        self.link_callbacks(&managed, function);
        managed
    }

    /// Recovers the host value behind a managed one. A bare proxy unwraps to
    /// `Null`.
    pub fn unwrap(&self, value: &ManagedValue) -> NativeValue {
        match value {
            ManagedValue::Null => NativeValue::Null,
            ManagedValue::Bool(value) => NativeValue::Bool(*value),
            ManagedValue::Number(value) => NativeValue::Number(*value),
            ManagedValue::String(value) => NativeValue::String(value.clone()),
            ManagedValue::Proxy(proxy) => proxy
                .raw()
                .map(|native| NativeValue::Object(Rc::clone(native)))
                .unwrap_or_default(),
            ManagedValue::Callback(callback) => NativeValue::Function(self.unwrap_callback(callback)),
        }
    }

    /// Host-callable form of `callback`. Repeated calls return the same
    /// function so listener removal by reference keeps working.
    pub fn unwrap_callback(&self, callback: &ManagedCallback) -> NativeCallback {
        let cached = self.inner.callbacks.borrow().native_for(callback);
        if let Some(native) = cached {
            return native;
        }

        let bridge = self.clone();
        let managed = callback.clone();
        let native = NativeCallback::new(move |argument| match bridge.wrap(argument) {
            Ok(wrapped) => bridge.unwrap(&managed.call(wrapped)),
            Err(err) => {
                error!(target = "bridge", error = %err, "failed to wrap argument for managed callback");
                NativeValue::Null
            }
        });
        self.link_callbacks(callback, &native);
        native
    }

    fn link_callbacks(&self, managed: &ManagedCallback, native: &NativeCallback) {
        let mut callbacks = self.inner.callbacks.borrow_mut();
        callbacks.link(managed, native);
        if self.inner.callback_sweep.exceeded(callbacks.len()) {
            let removed = callbacks.prune();
            self.inner.callback_sweep.reset(callbacks.len());
            debug!(
                target = "bridge",
                removed,
                remaining = callbacks.len(),
                next = self.inner.callback_sweep.limit(),
                "pruned callback cache"
            );
        }
    }

    /// Number of native objects that currently have a live proxy.
    pub fn cached_proxies(&self) -> usize {
        self.inner.wrappers.borrow().live()
    }

    /// Sweeps dead entries from both side tables.
    pub fn prune(&self) -> usize {
        let wrappers = self.inner.wrappers.borrow_mut().prune();
        let callbacks = self.inner.callbacks.borrow_mut().prune();
        wrappers + callbacks
    }

    pub fn fallback_stats(&self) -> Vec<FallbackRecord> {
        let mut records: Vec<_> = self
            .inner
            .fallbacks
            .borrow()
            .iter()
            .map(|((requested, instantiated), count)| FallbackRecord {
                requested: requested.clone(),
                instantiated: instantiated.clone(),
                count: *count,
            })
            .collect();
        records.sort_by(|a, b| {
            a.requested
                .cmp(&b.requested)
                .then_with(|| a.instantiated.cmp(&b.instantiated))
        });
        records
    }
}
