use std::cell::RefCell;
use std::rc::Rc;

use dom_bridge::proxies::{same_object, Element, EventTarget, Node, Window};
use dom_bridge::{
    Bridge, BridgeConfig, BridgeError, FallbackRecord, HostRealm, ManagedCallback, ManagedValue,
    NativeCallback, NativeValue, Proxy, ProxyClass, ProxyRegistry, ProxyView,
};

fn dom() -> (HostRealm, Bridge) {
    let config = BridgeConfig {
        log_fallbacks: false,
        ..BridgeConfig::default()
    };
    (
        HostRealm::dom(),
        Bridge::with_config(Rc::new(config.build_registry()), &config),
    )
}

#[test]
fn wrapping_twice_yields_the_same_proxy() {
    let (realm, bridge) = dom();
    let div = realm.create_element("div").expect("div");

    let first = bridge.wrap_object(&div).expect("wrap");
    let second = bridge
        .wrap(&NativeValue::Object(Rc::clone(&div)))
        .expect("wrap value")
        .into_proxy()
        .expect("proxy");

    assert!(first.ptr_eq(&second));
    assert_eq!(first.interface_name(), "HTMLDivElement");
    assert_eq!(bridge.cached_proxies(), 1);
}

#[test]
fn unwrap_returns_the_wrapped_native() {
    let (realm, bridge) = dom();
    let span = realm.create_element("span").expect("span");
    let proxy = bridge.wrap_object(&span).expect("wrap");

    match bridge.unwrap(&ManagedValue::Proxy(proxy)) {
        NativeValue::Object(native) => assert!(Rc::ptr_eq(&native, &span)),
        other => panic!("expected an object, got {other:?}"),
    }
}

#[test]
fn null_and_primitives_are_untouched() {
    let (_, bridge) = dom();
    assert_eq!(bridge.wrap(&NativeValue::Null).expect("null"), ManagedValue::Null);
    assert_eq!(
        bridge.wrap(&NativeValue::from("text")).expect("string"),
        ManagedValue::String("text".into())
    );
    assert_eq!(bridge.unwrap(&ManagedValue::Number(4.5)), NativeValue::Number(4.5));
    assert_eq!(bridge.unwrap(&ManagedValue::Bool(true)), NativeValue::Bool(true));
}

#[test]
fn registered_subclass_wins_over_its_ancestor() {
    let mut realm = HostRealm::new();
    realm.define_class("Foo", None).expect("Foo");
    realm.define_class("Bar", Some("Foo")).expect("Bar");
    realm.define_class("Baz", Some("Foo")).expect("Baz");

    let class_a = ProxyClass::new("A", None);
    let class_b = ProxyClass::new("B", Some(class_a.clone()));
    let mut registry = ProxyRegistry::new();
    registry.register("Foo", move || Proxy::bare(class_a.clone()));
    registry.register("Bar", move || Proxy::bare(class_b.clone()));
    let bridge = Bridge::new(Rc::new(registry));

    let bar = bridge
        .wrap_object(&realm.create("Bar").expect("bar"))
        .expect("wrap bar");
    assert_eq!(bar.interface_name(), "B");
    assert!(bridge.fallback_stats().is_empty());

    let baz = bridge
        .wrap_object(&realm.create("Baz").expect("baz"))
        .expect("wrap baz");
    assert_eq!(baz.interface_name(), "A");
    assert_eq!(
        bridge.fallback_stats(),
        vec![FallbackRecord {
            requested: "Baz".into(),
            instantiated: "A".into(),
            count: 1,
        }]
    );
}

#[test]
fn unregistered_chain_reports_every_constructor() {
    let mut realm = HostRealm::new();
    realm.define_class("Base", None).expect("Base");
    realm.define_class("Leaf", Some("Base")).expect("Leaf");
    let bridge = Bridge::new(Rc::new(ProxyRegistry::new()));

    let err = bridge
        .wrap_object(&realm.create("Leaf").expect("leaf"))
        .expect_err("nothing registered");
    match err {
        BridgeError::UnregisteredType { constructor, chain } => {
            assert_eq!(constructor, "Leaf");
            assert_eq!(chain, vec!["Leaf", "Base"]);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn custom_elements_fall_back_to_html_element() {
    let mut realm = HostRealm::dom();
    realm
        .define_class("XWidgetElement", Some("HTMLElement"))
        .expect("define");
    let (_, bridge) = dom();

    let widget = realm
        .create_element_with_class("x-widget", "XWidgetElement")
        .expect("widget");
    let element = Element::wrap(&bridge, &widget).expect("element view");

    assert_eq!(element.proxy().interface_name(), "HTMLElement");
    assert_eq!(element.tag_name(), "X-WIDGET");
    assert_eq!(bridge.fallback_stats().len(), 1);
}

#[test]
fn vendor_aliases_resolve_to_their_interface() {
    let mut realm = HostRealm::dom();
    realm
        .define_class("WebKitAnimationEvent", Some("Event"))
        .expect("define");
    let (_, bridge) = dom();

    let event = realm
        .create_event("WebKitAnimationEvent", "animationend", true, false)
        .expect("event");
    let proxy = bridge.wrap_object(&event).expect("wrap");
    assert_eq!(proxy.interface_name(), "AnimationEvent");
}

#[test]
fn dropped_proxies_are_pruned_and_replaced() {
    let (realm, bridge) = dom();
    let div = realm.create_element("div").expect("div");

    let first_id = bridge.wrap_object(&div).expect("wrap").native_id();
    assert_eq!(bridge.cached_proxies(), 0);
    assert_eq!(bridge.prune(), 1);

    let again = bridge.wrap_object(&div).expect("rewrap");
    assert_eq!(again.native_id(), first_id);
    assert_eq!(bridge.cached_proxies(), 1);
}

#[test]
fn listener_removal_survives_a_callback_round_trip() {
    let (realm, bridge) = dom();
    let button = realm.create_element("button").expect("button");
    let target = EventTarget::wrap(&bridge, &button).expect("target");

    let clicks = Rc::new(RefCell::new(0));
    let counter = Rc::clone(&clicks);
    let handler = ManagedCallback::new(move |_| {
        *counter.borrow_mut() += 1;
        ManagedValue::Null
    });

    target
        .add_event_listener("click", &handler, false)
        .expect("add listener");
    let click = realm.create_event("MouseEvent", "click", true, true).expect("click");
    button.dispatch_event(&click);

    target
        .remove_event_listener("click", &handler, false)
        .expect("remove listener");
    button.dispatch_event(&click);

    assert_eq!(*clicks.borrow(), 1);
    assert_eq!(button.listener_count("click"), 0);
}

#[test]
fn host_functions_keep_their_identity() {
    let (realm, bridge) = dom();
    let div = realm.create_element("div").expect("div");
    let host_fn = NativeCallback::new(|argument| argument.clone());
    div.set_property("onclick", NativeValue::Function(host_fn.clone()));

    let managed = bridge
        .wrap(&div.property("onclick"))
        .expect("wrap function");
    let ManagedValue::Callback(callback) = &managed else {
        panic!("expected a callback, got {managed:?}");
    };
    assert!(bridge.unwrap_callback(callback).ptr_eq(&host_fn));

    let echoed = callback.call(ManagedValue::String("ping".into()));
    assert_eq!(echoed.as_str(), Some("ping"));
}

#[test]
fn views_wrap_tree_results_through_the_cache() {
    let (realm, bridge) = dom();
    let body = realm.create_element("body").expect("body");
    let paragraph = realm.create_element("p").expect("p");

    let body_node = Node::wrap(&bridge, &body).expect("body node");
    let p_node = Node::wrap(&bridge, &paragraph).expect("p node");
    body_node.append_child(&p_node).expect("append");

    let parent = p_node.parent_node().expect("parent").expect("has parent");
    assert!(same_object(&parent, &body_node));
    assert!(parent.proxy().ptr_eq(body_node.proxy()));

    let children = body_node.child_nodes().expect("children");
    assert_eq!(children.len(), 1);
    assert!(children[0].proxy().ptr_eq(p_node.proxy()));
}

#[test]
fn view_casts_respect_the_hierarchy() {
    let (realm, bridge) = dom();
    let text = realm.create("Text").expect("text");

    assert!(Node::wrap(&bridge, &text).is_ok());
    let err = Element::wrap(&bridge, &text).expect_err("text is not an element");
    assert!(matches!(
        err,
        BridgeError::TypeMismatch { ref expected, ref actual }
            if expected == "Element" && actual == "Text"
    ));
}

#[test]
fn unsupported_operations_leave_the_host_untouched() {
    let (realm, bridge) = dom();
    let window = realm.create("Window").expect("window");
    let view = Window::wrap(&bridge, &window).expect("window view");

    let err = view
        .show_modal_dialog("about:blank")
        .expect_err("modal dialogs are unsupported");
    assert_eq!(err.to_string(), "Window.showModalDialog is not supported");
    assert!(window.property("returnValue").is_null());
    assert!(view.document().expect("document").is_none());
}
