//! Identity-preserving bridge between host objects and managed proxies.
//!
//! [`Bridge::wrap`] maps a native object to its proxy, allocating one through
//! the [`ProxyRegistry`] on first use and walking the native constructor chain
//! when the exact constructor is not registered. [`Bridge::unwrap`] goes the
//! other way, turning managed callbacks into stable host functions.
//! [`EventStream`] layers pausable, cancellable subscriptions over host
//! listeners.

pub mod bridge;
mod cache;
pub mod config;
pub mod events;
pub mod host;
pub mod interfaces;
pub mod proxies;
pub mod proxy;
pub mod registry;

pub use bridge::{Bridge, BridgeError, FallbackRecord};
pub use config::{BridgeConfig, ConfigError};
pub use events::{EventReceiver, EventStream, Subscription, SubscriptionError, SubscriptionState};
pub use host::{
    HostError, HostRealm, NativeCallback, NativeClass, NativeId, NativeObject, NativeRef,
    NativeValue,
};
pub use interfaces::DomInterface;
pub use proxies::ProxyView;
pub use proxy::{ManagedCallback, ManagedValue, Proxy, ProxyClass};
pub use registry::ProxyRegistry;
