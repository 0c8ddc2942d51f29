//! In-memory host environment.
//!
//! Models the native side the bridge talks to: constructor classes with a
//! parent chain, objects with host-assigned identity, and listener tables with
//! reference-equality removal. Event dispatch is the minimum needed to fire
//! listeners in capture/target/bubble order.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use tracing::{debug, trace};

use crate::interfaces::DomInterface;

static NEXT_NATIVE_ID: AtomicU64 = AtomicU64::new(1);

pub type NativeRef = Rc<NativeObject>;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("unknown native class: {0}")]
    UnknownClass(String),
    #[error("class {name} already defined with parent {existing:?}, requested {requested:?}")]
    ClassConflict {
        name: String,
        existing: Option<String>,
        requested: Option<String>,
    },
    #[error("cannot append {child} under {parent}: it is the same node or one of its ancestors")]
    HierarchyCycle { parent: NativeId, child: NativeId },
}

/// Host-assigned identity; never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativeId(u64);

impl NativeId {
    fn next() -> Self {
        Self(NEXT_NATIVE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NativeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A native constructor.
#[derive(Debug)]
pub struct NativeClass {
    name: String,
    parent: Option<Rc<NativeClass>>,
}

impl NativeClass {
    pub fn new(name: impl Into<String>, parent: Option<Rc<NativeClass>>) -> Rc<Self> {
        Rc::new(Self {
            name: name.into(),
            parent,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<&Rc<NativeClass>> {
        self.parent.as_ref()
    }

    /// This class followed by its ancestors, nearest first.
    pub fn chain(&self) -> impl Iterator<Item = &NativeClass> {
        std::iter::successors(Some(self), |class| class.parent.as_deref())
    }

    pub fn inherits_from(&self, name: &str) -> bool {
        self.chain().any(|class| class.name == name)
    }
}

struct CallbackInner {
    func: Box<dyn Fn(&NativeValue) -> NativeValue>,
}

/// A host-callable function. Two handles are the same function only if they
/// share the allocation, which is what listener removal compares.
#[derive(Clone)]
pub struct NativeCallback(Rc<CallbackInner>);

pub(crate) struct WeakNativeCallback(Weak<CallbackInner>);

impl NativeCallback {
    pub fn new(func: impl Fn(&NativeValue) -> NativeValue + 'static) -> Self {
        Self(Rc::new(CallbackInner {
            func: Box::new(func),
        }))
    }

    pub fn call(&self, argument: &NativeValue) -> NativeValue {
        (self.0.func)(argument)
    }

    pub fn ptr_eq(&self, other: &NativeCallback) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }

    pub(crate) fn downgrade(&self) -> WeakNativeCallback {
        WeakNativeCallback(Rc::downgrade(&self.0))
    }
}

impl WeakNativeCallback {
    pub(crate) fn upgrade(&self) -> Option<NativeCallback> {
        self.0.upgrade().map(NativeCallback)
    }
}

impl fmt::Debug for NativeCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeCallback({:#x})", self.addr())
    }
}

/// A value as the host sees it.
#[derive(Clone, Debug, Default)]
pub enum NativeValue {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Object(NativeRef),
    Function(NativeCallback),
}

impl NativeValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_object(&self) -> Option<&NativeRef> {
        match self {
            Self::Object(object) => Some(object),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
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

impl PartialEq for NativeValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => Rc::ptr_eq(a, b),
            (Self::Function(a), Self::Function(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl From<bool> for NativeValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for NativeValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for NativeValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for NativeValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<NativeRef> for NativeValue {
    fn from(value: NativeRef) -> Self {
        Self::Object(value)
    }
}

#[derive(Clone)]
struct ListenerEntry {
    callback: NativeCallback,
    capture: bool,
}

/// An object owned by the host.
pub struct NativeObject {
    id: NativeId,
    class: Rc<NativeClass>,
    local_name: Option<String>,
    properties: RefCell<HashMap<String, NativeValue>>,
    attributes: RefCell<Vec<(String, String)>>,
    parent: RefCell<Weak<NativeObject>>,
    children: RefCell<Vec<NativeRef>>,
    listeners: RefCell<HashMap<String, Vec<ListenerEntry>>>,
}

impl fmt::Debug for NativeObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeObject")
            .field("id", &self.id)
            .field("class", &self.class.name)
            .field("local_name", &self.local_name)
            .finish()
    }
}

impl NativeObject {
    pub fn new(class: Rc<NativeClass>) -> NativeRef {
        Self::build(class, None)
    }

    pub fn new_element(class: Rc<NativeClass>, tag: &str) -> NativeRef {
        Self::build(class, Some(tag.to_ascii_lowercase()))
    }

    fn build(class: Rc<NativeClass>, local_name: Option<String>) -> NativeRef {
        let object = Rc::new(Self {
            id: NativeId::next(),
            class,
            local_name,
            properties: RefCell::new(HashMap::new()),
            attributes: RefCell::new(Vec::new()),
            parent: RefCell::new(Weak::new()),
            children: RefCell::new(Vec::new()),
            listeners: RefCell::new(HashMap::new()),
        });
        trace!(target = "host", id = %object.id, class = object.class.name(), "created native object");
        object
    }

    pub fn id(&self) -> NativeId {
        self.id
    }

    pub fn class(&self) -> &Rc<NativeClass> {
        &self.class
    }

    pub fn constructor_name(&self) -> &str {
        self.class.name()
    }

    pub fn local_name(&self) -> Option<&str> {
        self.local_name.as_deref()
    }

    pub fn property(&self, name: &str) -> NativeValue {
        self.properties
            .borrow()
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    pub fn set_property(&self, name: &str, value: impl Into<NativeValue>) {
        self.properties
            .borrow_mut()
            .insert(name.to_string(), value.into());
    }

    pub fn attribute(&self, name: &str) -> Option<String> {
        let name = name.to_ascii_lowercase();
        self.attributes
            .borrow()
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.clone())
    }

    pub fn set_attribute(&self, name: &str, value: &str) {
        let name = name.to_ascii_lowercase();
        let mut attributes = self.attributes.borrow_mut();
        if let Some(slot) = attributes.iter_mut().find(|(key, _)| *key == name) {
            slot.1 = value.to_string();
        } else {
            attributes.push((name, value.to_string()));
        }
    }

    pub fn parent(&self) -> Option<NativeRef> {
        self.parent.borrow().upgrade()
    }

    pub fn children(&self) -> Vec<NativeRef> {
        self.children.borrow().clone()
    }

    /// Moves `child` under `self`, detaching it from any previous parent.
    /// Fails if `child` is `self` or one of its ancestors.
    pub fn append_child(self: &Rc<Self>, child: &NativeRef) -> Result<(), HostError> {
        let mut current = Some(Rc::clone(self));
        while let Some(node) = current {
            if Rc::ptr_eq(&node, child) {
                return Err(HostError::HierarchyCycle {
                    parent: self.id,
                    child: child.id,
                });
            }
            current = node.parent();
        }

        if let Some(previous) = child.parent() {
            previous
                .children
                .borrow_mut()
                .retain(|existing| !Rc::ptr_eq(existing, child));
        }
        *child.parent.borrow_mut() = Rc::downgrade(self);
        self.children.borrow_mut().push(Rc::clone(child));
        Ok(())
    }

    /// Matches a comma-separated list of compound selectors built from
    /// `tag`, `*`, `#id` and `.class`. Combinators never match.
    pub fn matches(&self, selector: &str) -> bool {
        selector
            .split(',')
            .any(|group| self.matches_compound(group.trim()))
    }

    pub fn matches_with_ancestors(self: &Rc<Self>, selector: &str) -> bool {
        let mut current = Some(Rc::clone(self));
        while let Some(node) = current {
            if node.matches(selector) {
                return true;
            }
            current = node.parent();
        }
        false
    }

    fn matches_compound(&self, compound: &str) -> bool {
        if compound.is_empty() || compound.contains(char::is_whitespace) {
            return false;
        }

        let split = compound.find(['#', '.']).unwrap_or(compound.len());
        let (tag, rest) = compound.split_at(split);
        if !tag.is_empty() && tag != "*" {
            match &self.local_name {
                Some(local) if local.eq_ignore_ascii_case(tag) => {}
                _ => return false,
            }
        }

        let classes = self.attribute("class").unwrap_or_default();
        let mut remaining = rest;
        while let Some(marker) = remaining.chars().next() {
            let body = &remaining[1..];
            let end = body.find(['#', '.']).unwrap_or(body.len());
            let (value, tail) = body.split_at(end);
            if value.is_empty() {
                return false;
            }
            let matched = match marker {
                '#' => self.attribute("id").as_deref() == Some(value),
                _ => classes.split_whitespace().any(|class| class == value),
            };
            if !matched {
                return false;
            }
            remaining = tail;
        }
        true
    }

    /// Registers `callback`; registering the same function twice for the same
    /// type and phase is a no-op.
    pub fn add_event_listener(&self, event_type: &str, callback: &NativeCallback, capture: bool) {
        let mut listeners = self.listeners.borrow_mut();
        let entries = listeners.entry(event_type.to_string()).or_default();
        if entries
            .iter()
            .any(|entry| entry.capture == capture && entry.callback.ptr_eq(callback))
        {
            return;
        }
        entries.push(ListenerEntry {
            callback: callback.clone(),
            capture,
        });
        debug!(target = "host", id = %self.id, event_type, capture, "listener added");
    }

    pub fn remove_event_listener(
        &self,
        event_type: &str,
        callback: &NativeCallback,
        capture: bool,
    ) {
        let mut listeners = self.listeners.borrow_mut();
        let Some(entries) = listeners.get_mut(event_type) else {
            return;
        };
        let before = entries.len();
        entries.retain(|entry| !(entry.capture == capture && entry.callback.ptr_eq(callback)));
        if entries.len() != before {
            debug!(target = "host", id = %self.id, event_type, capture, "listener removed");
        }
        if entries.is_empty() {
            listeners.remove(event_type);
        }
    }

    pub fn listener_count(&self, event_type: &str) -> usize {
        self.listeners
            .borrow()
            .get(event_type)
            .map(Vec::len)
            .unwrap_or(0)
    }

    fn listeners_for(&self, event_type: &str, capture: bool) -> Vec<NativeCallback> {
        self.listeners
            .borrow()
            .get(event_type)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|entry| entry.capture == capture)
                    .map(|entry| entry.callback.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Fires `event` at `self`. Returns `false` if a listener called
    /// `preventDefault` on a cancelable event.
    pub fn dispatch_event(self: &Rc<Self>, event: &NativeRef) -> bool {
        let event_type = event.property("type").as_str().unwrap_or_default().to_string();
        let bubbles = event.property("bubbles").as_bool().unwrap_or(false);
        event.set_property("target", Rc::clone(self));
        event.set_property("propagationStopped", false);

        let mut ancestors = Vec::new();
        let mut current = self.parent();
        while let Some(node) = current {
            current = node.parent();
            ancestors.push(node);
        }

        let value = NativeValue::Object(Rc::clone(event));
        let mut stopped = false;

        for node in ancestors.iter().rev() {
            stopped = Self::invoke(node, &event_type, true, event, &value);
            if stopped {
                break;
            }
        }

        if !stopped {
            stopped = Self::invoke(self, &event_type, true, event, &value);
            if !stopped {
                stopped = Self::invoke(self, &event_type, false, event, &value);
            }
        }

        if bubbles && !stopped {
            for node in &ancestors {
                if Self::invoke(node, &event_type, false, event, &value) {
                    break;
                }
            }
        }

        event.set_property("currentTarget", NativeValue::Null);
        let cancelable = event.property("cancelable").as_bool().unwrap_or(false);
        let prevented = event.property("defaultPrevented").as_bool().unwrap_or(false);
        !(cancelable && prevented)
    }

    fn invoke(
        node: &NativeRef,
        event_type: &str,
        capture: bool,
        event: &NativeRef,
        value: &NativeValue,
    ) -> bool {
        let snapshot = node.listeners_for(event_type, capture);
        if snapshot.is_empty() {
            return false;
        }
        event.set_property("currentTarget", Rc::clone(node));
        for callback in snapshot {
            callback.call(value);
        }
        event
            .property("propagationStopped")
            .as_bool()
            .unwrap_or(false)
    }
}

/// The set of native constructors a host exposes.
#[derive(Debug, Default)]
pub struct HostRealm {
    classes: HashMap<String, Rc<NativeClass>>,
}

impl HostRealm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Realm with every [`DomInterface`] defined.
    pub fn dom() -> Self {
        let mut realm = Self::new();
        for interface in DomInterface::ALL {
            let parent = interface
                .parent()
                .and_then(|parent| realm.classes.get(parent.name()).cloned());
            realm.classes.insert(
                interface.name().to_string(),
                NativeClass::new(interface.name(), parent),
            );
        }
        realm
    }

    pub fn define_class(
        &mut self,
        name: &str,
        parent: Option<&str>,
    ) -> Result<Rc<NativeClass>, HostError> {
        let parent_class = match parent {
            Some(parent_name) => Some(
                self.class(parent_name)
                    .ok_or_else(|| HostError::UnknownClass(parent_name.to_string()))?,
            ),
            None => None,
        };

        if let Some(existing) = self.classes.get(name) {
            let existing_parent = existing.parent().map(|class| class.name().to_string());
            if existing_parent.as_deref() == parent {
                return Ok(Rc::clone(existing));
            }
            return Err(HostError::ClassConflict {
                name: name.to_string(),
                existing: existing_parent,
                requested: parent.map(str::to_string),
            });
        }

        let class = NativeClass::new(name, parent_class);
        self.classes.insert(name.to_string(), Rc::clone(&class));
        debug!(target = "host", class = name, parent, "defined native class");
        Ok(class)
    }

    pub fn class(&self, name: &str) -> Option<Rc<NativeClass>> {
        self.classes.get(name).cloned()
    }

    pub fn create(&self, class_name: &str) -> Result<NativeRef, HostError> {
        let class = self
            .class(class_name)
            .ok_or_else(|| HostError::UnknownClass(class_name.to_string()))?;
        Ok(NativeObject::new(class))
    }

    /// Creates an element the way a parser would, choosing the constructor
    /// from the tag name.
    pub fn create_element(&self, tag: &str) -> Result<NativeRef, HostError> {
        let interface = DomInterface::for_tag(tag);
        let class = self
            .class(interface.name())
            .ok_or_else(|| HostError::UnknownClass(interface.name().to_string()))?;
        Ok(NativeObject::new_element(class, tag))
    }

    /// Creates an element whose constructor is `class_name` instead of the
    /// one its tag implies, as custom element registries do.
    pub fn create_element_with_class(
        &self,
        tag: &str,
        class_name: &str,
    ) -> Result<NativeRef, HostError> {
        let class = self
            .class(class_name)
            .ok_or_else(|| HostError::UnknownClass(class_name.to_string()))?;
        Ok(NativeObject::new_element(class, tag))
    }

    pub fn create_event(
        &self,
        class_name: &str,
        event_type: &str,
        bubbles: bool,
        cancelable: bool,
    ) -> Result<NativeRef, HostError> {
        let event = self.create(class_name)?;
        event.set_property("type", event_type);
        event.set_property("bubbles", bubbles);
        event.set_property("cancelable", cancelable);
        event.set_property("defaultPrevented", false);
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn dom_realm_links_every_parent() {
        let realm = HostRealm::dom();
        for interface in DomInterface::ALL {
            let class = realm.class(interface.name()).unwrap();
            assert_eq!(
                class.parent().map(|parent| parent.name().to_string()),
                interface.parent().map(|parent| parent.name().to_string())
            );
        }
    }

    #[test]
    fn chain_walks_to_root() {
        let realm = HostRealm::dom();
        let div = realm.create_element("div").unwrap();
        let names: Vec<_> = div.class().chain().map(NativeClass::name).collect();
        assert_eq!(
            names,
            vec!["HTMLDivElement", "HTMLElement", "Element", "Node", "EventTarget"]
        );
    }

    #[test]
    fn define_class_rejects_conflicting_parent() {
        let mut realm = HostRealm::dom();
        realm.define_class("FancyButton", Some("HTMLButtonElement")).unwrap();
        assert!(realm
            .define_class("FancyButton", Some("HTMLButtonElement"))
            .is_ok());
        assert!(matches!(
            realm.define_class("FancyButton", Some("HTMLDivElement")),
            Err(HostError::ClassConflict { .. })
        ));
        assert!(matches!(
            realm.define_class("Orphan", Some("Missing")),
            Err(HostError::UnknownClass(_))
        ));
    }

    #[test]
    fn ids_are_unique() {
        let realm = HostRealm::dom();
        let a = realm.create("Node").unwrap();
        let b = realm.create("Node").unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn duplicate_listener_is_ignored_and_removed_by_reference() {
        let realm = HostRealm::dom();
        let button = realm.create_element("button").unwrap();
        let hits = Rc::new(Cell::new(0));
        let counter = Rc::clone(&hits);
        let listener = NativeCallback::new(move |_| {
            counter.set(counter.get() + 1);
            NativeValue::Null
        });

        button.add_event_listener("click", &listener, false);
        button.add_event_listener("click", &listener, false);
        assert_eq!(button.listener_count("click"), 1);

        let lookalike = NativeCallback::new(|_| NativeValue::Null);
        button.remove_event_listener("click", &lookalike, false);
        assert_eq!(button.listener_count("click"), 1);

        let event = realm.create_event("MouseEvent", "click", true, false).unwrap();
        button.dispatch_event(&event);
        assert_eq!(hits.get(), 1);

        button.remove_event_listener("click", &listener, false);
        assert_eq!(button.listener_count("click"), 0);
        button.dispatch_event(&event);
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn dispatch_bubbles_and_respects_stop_propagation() {
        let realm = HostRealm::dom();
        let outer = realm.create_element("div").unwrap();
        let inner = realm.create_element("span").unwrap();
        outer.append_child(&inner).unwrap();

        let order = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&order);
        let capture = NativeCallback::new(move |_| {
            log.borrow_mut().push("outer-capture");
            NativeValue::Null
        });
        let log = Rc::clone(&order);
        let target = NativeCallback::new(move |event| {
            log.borrow_mut().push("inner");
            if let Some(event) = event.as_object() {
                if event.property("type").as_str() == Some("stop") {
                    event.set_property("propagationStopped", true);
                }
            }
            NativeValue::Null
        });
        let log = Rc::clone(&order);
        let bubble = NativeCallback::new(move |_| {
            log.borrow_mut().push("outer-bubble");
            NativeValue::Null
        });

        for event_type in ["go", "stop"] {
            outer.add_event_listener(event_type, &capture, true);
            inner.add_event_listener(event_type, &target, false);
            outer.add_event_listener(event_type, &bubble, false);
        }

        let go = realm.create_event("Event", "go", true, false).unwrap();
        inner.dispatch_event(&go);
        assert_eq!(*order.borrow(), vec!["outer-capture", "inner", "outer-bubble"]);
        assert!(Rc::ptr_eq(go.property("target").as_object().unwrap(), &inner));

        order.borrow_mut().clear();
        let stop = realm.create_event("Event", "stop", true, false).unwrap();
        inner.dispatch_event(&stop);
        assert_eq!(*order.borrow(), vec!["outer-capture", "inner"]);
    }

    #[test]
    fn dispatch_reports_prevented_default() {
        let realm = HostRealm::dom();
        let form = realm.create_element("form").unwrap();
        let listener = NativeCallback::new(|event| {
            if let Some(event) = event.as_object() {
                event.set_property("defaultPrevented", true);
            }
            NativeValue::Null
        });
        form.add_event_listener("submit", &listener, false);

        let cancelable = realm.create_event("Event", "submit", false, true).unwrap();
        assert!(!form.dispatch_event(&cancelable));
        let plain = realm.create_event("Event", "submit", false, false).unwrap();
        assert!(form.dispatch_event(&plain));
    }

    #[test]
    fn simple_selectors() {
        let realm = HostRealm::dom();
        let list = realm.create_element("ul").unwrap();
        list.set_attribute("class", "menu open");
        let item = realm.create_element("li").unwrap();
        item.set_attribute("id", "first");
        list.append_child(&item).unwrap();

        assert!(item.matches("li"));
        assert!(item.matches("LI#first"));
        assert!(item.matches("*"));
        assert!(!item.matches(".menu"));
        assert!(item.matches_with_ancestors("ul.menu.open"));
        assert!(item.matches("p, #first"));
        assert!(!item.matches("ul li"));
        assert!(!item.matches("li."));
    }

    #[test]
    fn append_child_reparents() {
        let realm = HostRealm::dom();
        let first = realm.create_element("div").unwrap();
        let second = realm.create_element("div").unwrap();
        let child = realm.create_element("p").unwrap();

        first.append_child(&child).unwrap();
        second.append_child(&child).unwrap();
        assert!(first.children().is_empty());
        assert_eq!(second.children().len(), 1);
        assert!(Rc::ptr_eq(&child.parent().unwrap(), &second));
    }

    #[test]
    fn append_child_rejects_cycles() {
        let realm = HostRealm::dom();
        let outer = realm.create_element("div").unwrap();
        let inner = realm.create_element("span").unwrap();
        outer.append_child(&inner).unwrap();

        assert!(matches!(
            inner.append_child(&outer),
            Err(HostError::HierarchyCycle { .. })
        ));
        assert!(matches!(
            outer.append_child(&outer),
            Err(HostError::HierarchyCycle { .. })
        ));
        assert!(outer.parent().is_none());
        assert!(inner.children().is_empty());
        assert!(Rc::ptr_eq(&inner.parent().unwrap(), &outer));

        let event = realm.create_event("Event", "ping", true, false).unwrap();
        assert!(inner.dispatch_event(&event));
        assert!(!inner.matches_with_ancestors("p"));
    }
}
