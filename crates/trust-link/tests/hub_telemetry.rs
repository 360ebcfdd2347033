mod common;

use std::time::Duration;

use common::{harness, update_json};
use serde_json::json;
use trust_link::protocol::{Quality, SampleValue};
use trust_link::{ConnectionState, ControllerHub, HubSettings, NotificationCenter, NotificationLevel};
use trust_link::{Clock, ManualClock};

#[test]
fn update_lands_in_variable_map_and_history() {
    let mut h = harness(&[("A", "10.0.0.5")]);
    h.connect_and_open("A");
    let now = h.clock.unix_millis();

    h.connector.message(
        "A",
        &update_json(
            "main-st",
            json!([{ "Name": "Counter", "Value": 5, "Type": "INT", "Quality": "good" }]),
        ),
    );
    h.hub.process_pending();

    let entry = h.hub.variables().get("A:main-st").expect("namespaced entry");
    assert_eq!(entry.samples.len(), 1);
    assert_eq!(entry.samples[0].name, "Counter");
    assert_eq!(entry.samples[0].value, SampleValue::from(5_i64));
    assert_eq!(entry.samples[0].quality, Some(Quality::Good));
    assert_eq!(entry.received_ms, now);

    assert_eq!(h.hub.history().len(), 1);
    let record = h.hub.history().latest().expect("history record");
    assert_eq!(record.timestamp_ms, now);
    assert_eq!(record.get("A:Counter"), Some(5.0));
    assert_eq!(record.get("Counter"), Some(5.0));
}

#[test]
fn identical_paths_from_two_controllers_stay_apart() {
    let mut h = harness(&[("A", "10.0.0.5"), ("B", "10.0.0.6")]);
    h.connect_and_open("A");
    h.connect_and_open("B");

    h.connector
        .message("A", &update_json("main-st", json!([{ "Name": "Counter", "Value": 1 }])));
    h.connector
        .message("B", &update_json("main-st", json!([{ "Name": "Counter", "Value": 2 }])));
    h.hub.process_pending();

    let a = h.hub.variables().get("A:main-st").expect("A entry");
    let b = h.hub.variables().get("B:main-st").expect("B entry");
    assert_eq!(a.samples[0].value, SampleValue::from(1_i64));
    assert_eq!(b.samples[0].value, SampleValue::from(2_i64));

    let latest = h.hub.history().latest().expect("record");
    assert_eq!(latest.get("B:Counter"), Some(2.0));
    let first = h.hub.history().iter().next().expect("record");
    assert_eq!(first.get("A:Counter"), Some(1.0));
}

#[test]
fn history_keeps_the_most_recent_records_in_order() {
    let clock = ManualClock::new();
    let notices = NotificationCenter::new();
    let connector = common::ScriptedConnector::default();
    let mut hub = ControllerHub::new(
        connector.clone(),
        std::sync::Arc::new(notices),
        std::sync::Arc::new(clock.clone()),
        HubSettings {
            history_limit: 10,
            ..HubSettings::default()
        },
    );
    hub.add_controller("A", "Line 1", "10.0.0.5");
    hub.connect("A");
    connector.open("A");
    hub.process_pending();

    for tick in 0..25_i64 {
        clock.advance(Duration::from_millis(10));
        connector.message(
            "A",
            &update_json("main-st", json!([{ "Name": "Counter", "Value": tick }])),
        );
        hub.process_pending();
        assert!(hub.history().len() <= 10);
    }

    let values = hub
        .history()
        .series("A:Counter")
        .into_iter()
        .map(|(_, value)| value)
        .collect::<Vec<_>>();
    let expected = (15..25).map(|tick| tick as f64).collect::<Vec<_>>();
    assert_eq!(values, expected);
    let stamps = hub
        .history()
        .iter()
        .map(|record| record.timestamp_ms)
        .collect::<Vec<_>>();
    assert!(stamps.windows(2).all(|pair| pair[0] < pair[1]));
}

#[test]
fn updates_without_numeric_values_add_no_history() {
    let mut h = harness(&[("A", "10.0.0.5")]);
    h.connect_and_open("A");

    h.connector.message(
        "A",
        &update_json(
            "main-st",
            json!([{ "Name": "Mode", "Value": "auto" }, { "Name": "Note", "Value": null }]),
        ),
    );
    h.hub.process_pending();

    assert_eq!(h.hub.variables().len(), 1);
    assert!(h.hub.history().is_empty());
}

#[test]
fn malformed_message_keeps_the_connection_open() {
    let mut h = harness(&[("A", "10.0.0.5")]);
    h.connect_and_open("A");

    h.connector.message("A", "{\"type\":\"update\",\"variables\":[1,2");
    h.hub.process_pending();

    assert_eq!(h.hub.state("A"), Some(ConnectionState::Connected));
    assert!(!h.connector.latest("A").link.is_closed());
    let notice = h.notices.get("message:A").expect("malformed notice");
    assert_eq!(notice.level, NotificationLevel::Warning);
    assert!(!notice.persistent);
    assert_eq!(
        h.notices.get("controller:A").expect("connected notice").level,
        NotificationLevel::Success
    );

    h.connector
        .message("A", &update_json("main-st", json!([{ "Name": "Counter", "Value": 3 }])));
    h.hub.process_pending();
    assert!(h.hub.variables().get("A:main-st").is_some());
}

#[test]
fn runtime_status_is_projected_into_the_status_view() {
    let mut h = harness(&[("A", "10.0.0.5")]);
    h.connect_and_open("A");

    h.connector.message(
        "A",
        r#"{"type":"update","status":{"scanTime":1.5,"lastScan":"2024-01-01T00:00:00Z","variableCount":12,"taskCount":2,"status":"running"}}"#,
    );
    h.hub.process_pending();

    let view = h.hub.status_view();
    let status = view
        .controller("A")
        .and_then(|controller| controller.runtime_status.as_ref())
        .expect("runtime status");
    assert_eq!(status.scan_time, Some(1.5));
    assert_eq!(status.variable_count, Some(12));
    assert!(view.render_table().contains("running, scan 1.50ms, 2 tasks"));
    assert!(h.hub.history().is_empty());
}

#[test]
fn deployment_and_unknown_messages_change_nothing() {
    let mut h = harness(&[("A", "10.0.0.5")]);
    h.connect_and_open("A");

    h.connector
        .message("A", r#"{"type":"deployment","path":"main.st"}"#);
    h.connector.message("A", r#"{"type":"heartbeat"}"#);
    h.hub.process_pending();

    assert!(h.hub.variables().is_empty());
    assert!(h.hub.history().is_empty());
    assert!(h.notices.get("message:A").is_none());
    assert!(h.hub.get_status("A"));
}
