//! Constructor name to proxy allocator table.

use std::cell::OnceCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use tracing::debug;

use crate::interfaces::DomInterface;
use crate::proxy::{Proxy, ProxyClass};

/// Produces a bare proxy of one interface.
pub type Allocator = Rc<dyn Fn() -> Proxy>;

/// Produces the managed type of one interface without allocating a proxy.
pub type TypeThunk = Rc<dyn Fn() -> ProxyClass>;

struct RegistryEntry {
    type_of: Option<TypeThunk>,
    derived_type: OnceCell<ProxyClass>,
    allocate: Allocator,
}

impl RegistryEntry {
    fn class(&self) -> ProxyClass {
        match &self.type_of {
            Some(type_of) => type_of(),
            None => self
                .derived_type
                .get_or_init(|| (self.allocate)().class().clone())
                .clone(),
        }
    }
}

/// Maps native constructor names to proxy allocators.
///
/// Built once at startup and shared with the bridge through an `Rc`; the
/// bridge never mutates it.
#[derive(Default)]
pub struct ProxyRegistry {
    entries: HashMap<String, RegistryEntry>,
    aliases: HashMap<String, String>,
}

impl fmt::Debug for ProxyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.entries.keys().collect();
        names.sort();
        f.debug_struct("ProxyRegistry")
            .field("entries", &names)
            .field("aliases", &self.aliases)
            .finish()
    }
}

impl ProxyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with one entry per [`DomInterface`], each proxy class chained
    /// to its parent interface.
    pub fn dom() -> Self {
        let mut registry = Self::new();
        let mut classes: HashMap<DomInterface, ProxyClass> = HashMap::new();
        for interface in DomInterface::ALL {
            let parent = interface
                .parent()
                .and_then(|parent| classes.get(&parent).cloned());
            let class = ProxyClass::new(interface.name(), parent);
            classes.insert(interface, class.clone());

            let type_class = class.clone();
            registry.register_with_type(
                interface.name(),
                move || type_class.clone(),
                move || Proxy::bare(class.clone()),
            );
        }
        registry
    }

    /// Adds or replaces the entry for `name`. The type metadata is taken from
    /// the first proxy the allocator produces.
    pub fn register(&mut self, name: impl Into<String>, allocate: impl Fn() -> Proxy + 'static) {
        self.insert(name.into(), None, Rc::new(allocate));
    }

    pub fn register_with_type(
        &mut self,
        name: impl Into<String>,
        type_of: impl Fn() -> ProxyClass + 'static,
        allocate: impl Fn() -> Proxy + 'static,
    ) {
        self.insert(name.into(), Some(Rc::new(type_of)), Rc::new(allocate));
    }

    fn insert(&mut self, name: String, type_of: Option<TypeThunk>, allocate: Allocator) {
        let entry = RegistryEntry {
            type_of,
            derived_type: OnceCell::new(),
            allocate,
        };
        if self.entries.insert(name.clone(), entry).is_some() {
            debug!(target = "bridge", interface = %name, "replaced registry entry");
        }
    }

    /// Resolves `native_name` to `interface` when looked up. Aliases are
    /// followed one level only.
    pub fn alias(&mut self, native_name: impl Into<String>, interface: impl Into<String>) {
        self.aliases.insert(native_name.into(), interface.into());
    }

    fn entry(&self, name: &str) -> Option<&RegistryEntry> {
        self.entries.get(name).or_else(|| {
            self.aliases
                .get(name)
                .and_then(|target| self.entries.get(target))
        })
    }

    pub fn lookup_allocator(&self, name: &str) -> Option<Allocator> {
        self.entry(name).map(|entry| Rc::clone(&entry.allocate))
    }

    pub fn lookup_type(&self, name: &str) -> Option<ProxyClass> {
        self.entry(name).map(RegistryEntry::class)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entry(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True if `proxy` was allocated for `name` or one of its descendants.
    pub fn is_instance(&self, proxy: &Proxy, name: &str) -> bool {
        let target = self
            .aliases
            .get(name)
            .map(String::as_str)
            .unwrap_or(name);
        proxy.class().is_subclass_of(target)
    }
}
