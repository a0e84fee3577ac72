mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::json;

use spatia_core::access::AccessLevel;
use spatia_core::anchor::Payload;
use spatia_core::value::{Record, Value};
use spatia_memory::{MemoryStore, RootRegistry};
use spatia_runtime::{ContextRequest, EdgeSpec};

use common::{open, open_with};
use spatia_test_utils::{json_str, named, test_config};

#[test]
fn test_nested_handles_become_projections() {
    let store = Arc::new(MemoryStore::new());
    let mut ctx = open(store, ContextRequest::anonymous());
    let root = ctx.root_id();
    let city = ctx
        .spawn_node(named("City", "Oslo"))
        .unwrap();
    let road = ctx
        .connect(root, city, EdgeSpec::new("Road").with("km", 3))
        .unwrap()
        .unwrap();

    let mut deep = BTreeMap::new();
    deep.insert(
        "trip".to_string(),
        Value::from(vec![Value::from(
            Record::new("Leg").field("via", road).field("to", city),
        )]),
    );
    ctx.report(Value::Map(deep));
    ctx.report(city);

    let response = ctx.response(vec![]).unwrap();
    let body = response.to_json();
    assert_eq!(body["status"], 200);
    assert!(body.get("returns").is_none());

    let leg = &body["reports"][0]["trip"][0];
    assert_eq!(
        leg["to"],
        json!({
            "id": city.to_string(),
            "type": "City",
            "context": {"name": "Oslo"},
            "edges": [road.to_string()],
        })
    );
    assert_eq!(
        leg["via"],
        json!({
            "id": road.to_string(),
            "type": "Road",
            "context": {"km": 3},
            "source": root.to_string(),
            "target": city.to_string(),
        })
    );
    assert_eq!(body["reports"][1], leg["to"]);
    assert_eq!(json_str(&leg["via"], "type"), Some("Road"));
    assert_eq!(json_str(&leg["to"]["context"], "name"), Some("Oslo"));
}

#[test]
fn test_unreadable_handles_show_only_id() {
    let store = Arc::new(MemoryStore::new());
    let registry = RootRegistry::new(store.clone());
    registry.register("alice").unwrap();
    registry.register("bob").unwrap();

    let secret = {
        let mut alice = open(store.clone(), ContextRequest::for_principal("alice"));
        let root = alice.root_id();
        let secret = alice.spawn_node(Payload::new("Secret")).unwrap();
        alice.connect(root, secret, EdgeSpec::default()).unwrap();
        alice.close().unwrap();
        secret
    };

    let mut bob = open(store, ContextRequest::for_principal("bob"));
    assert_eq!(bob.access_level(&secret).unwrap(), AccessLevel::NoAccess);
    bob.report(Value::from(vec![secret]));
    let body = bob.response(vec![]).unwrap().to_json();
    assert_eq!(body["reports"][0], json!([{"id": secret.to_string()}]));
}

#[test]
fn test_returns_only_when_enabled() {
    let store = Arc::new(MemoryStore::new());
    let config = test_config("show_returns = true").runtime;
    let mut ctx = open_with(store.clone(), ContextRequest::anonymous(), config);
    let body = ctx
        .response(vec![Value::Float(f64::NAN), Value::from(1.5), Value::Null])
        .unwrap()
        .to_json();
    assert_eq!(body, json!({"status": 200, "returns": [null, 1.5, null]}));

    let mut quiet = open(store, ContextRequest::anonymous());
    let body = quiet.response(vec![Value::from(1)]).unwrap().to_json();
    assert_eq!(body, json!({"status": 200}));
}
