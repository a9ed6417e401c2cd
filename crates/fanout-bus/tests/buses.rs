use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};

use fanout_bus::{
    BroadcastEventBus, EventBus, EventBusRegistry, EventHandler, ParallelEventBus, SerialEventBus,
};
use fanout_test_support::fixtures::{
    EventLog, event_log, failing_handler, recorded, recording_handler,
};
use fanout_test_support::mocks::StubMessenger;
use fanout_test_support::telemetry::init_test_tracing;
use fanout_transport::Messenger;

async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

#[tokio::test]
async fn lower_order_handler_completes_before_higher_starts() {
    let bus = SerialEventBus::new("ordered");
    let log: EventLog<String> = event_log();

    let slow = Arc::clone(&log);
    assert!(bus.on(EventHandler::new("h2", 2, move |event: String| {
        let log = Arc::clone(&slow);
        async move {
            log.lock().expect("log").push(format!("h2:{event}"));
            Ok(())
        }
    })));
    let first = Arc::clone(&log);
    assert!(bus.on(EventHandler::new("h1", 1, move |event: String| {
        let log = Arc::clone(&first);
        async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            log.lock().expect("log").push(format!("h1:{event}"));
            Ok(())
        }
    })));

    bus.emit("x".to_owned()).await;
    // h1 (order 1) is awaited to completion before h2 (order 2) starts,
    // despite sleeping.
    assert_eq!(recorded(&log), ["h1:x", "h2:x"]);
}

#[tokio::test]
async fn once_handler_sees_only_the_first_emit() {
    let bus = SerialEventBus::new("once");
    let log: EventLog<String> = event_log();
    assert!(bus.on(recording_handler("once1", 1, &log).once()));

    bus.emit("a".to_owned()).await;
    bus.emit("b".to_owned()).await;

    assert_eq!(recorded(&log), ["a"]);
    assert!(bus.handlers().is_empty());
    assert!(!bus.off("once1"));
}

#[tokio::test]
async fn failing_handler_is_isolated_on_both_bus_kinds() {
    init_test_tracing();
    for bus in [
        Box::new(SerialEventBus::new("serial")) as Box<dyn EventBus<String>>,
        Box::new(ParallelEventBus::new("parallel")) as Box<dyn EventBus<String>>,
    ] {
        let log: EventLog<String> = event_log();
        assert!(bus.on(failing_handler("bad", 1, "intentional")));
        assert!(bus.on(recording_handler("good", 2, &log)));

        bus.emit("payload".to_owned()).await;
        assert_eq!(recorded(&log), ["payload"]);
        assert_eq!(bus.handlers().len(), 2);
    }
}

#[tokio::test]
async fn handlers_registered_mid_emit_only_join_later_emits() {
    let bus = Arc::new(SerialEventBus::new("live"));
    let log: EventLog<String> = event_log();

    let registrar_bus = Arc::clone(&bus);
    let registrar_log = Arc::clone(&log);
    assert!(bus.on(EventHandler::new("registrar", 1, move |_event: String| {
        let bus = Arc::clone(&registrar_bus);
        let log = Arc::clone(&registrar_log);
        async move {
            let _ = bus.on(recording_handler("latecomer", 2, &log));
            Ok(())
        }
    })));

    bus.emit("first".to_owned()).await;
    assert!(recorded(&log).is_empty());

    bus.emit("second".to_owned()).await;
    assert_eq!(recorded(&log), ["second"]);
}

#[tokio::test]
async fn broadcast_emit_dispatches_locally_then_relays() {
    let delegate: Arc<dyn EventBus<String>> = Arc::new(SerialEventBus::new("chat"));
    let log: EventLog<String> = event_log();
    assert!(delegate.on(recording_handler("local", 1, &log)));

    let stub = StubMessenger::new();
    let bus = BroadcastEventBus::with_messenger(Arc::clone(&delegate), Arc::clone(&stub) as Arc<dyn Messenger>);

    bus.emit("ping".to_owned()).await;
    assert_eq!(recorded(&log), ["ping"]);
    assert_eq!(stub.posted(), vec![json!("ping")]);
}

#[tokio::test]
async fn incoming_messages_reach_the_delegate_without_echo() {
    let delegate: Arc<dyn EventBus<String>> = Arc::new(SerialEventBus::new("chat"));
    let log: EventLog<String> = event_log();
    assert!(delegate.on(recording_handler("local", 1, &log)));

    let stub = StubMessenger::new();
    let _bus = BroadcastEventBus::with_messenger(Arc::clone(&delegate), Arc::clone(&stub) as Arc<dyn Messenger>);

    stub.deliver(json!("from-another-context"));
    assert!(eventually(|| recorded(&log) == ["from-another-context"]).await);
    // The received message is never re-posted, so no relay loop can form.
    assert!(stub.posted().is_empty());
}

#[tokio::test]
async fn undecodable_incoming_payloads_are_dropped() {
    init_test_tracing();
    let delegate: Arc<dyn EventBus<String>> = Arc::new(SerialEventBus::new("chat"));
    let log: EventLog<String> = event_log();
    assert!(delegate.on(recording_handler("local", 1, &log)));

    let stub = StubMessenger::new();
    let _bus = BroadcastEventBus::with_messenger(Arc::clone(&delegate), Arc::clone(&stub) as Arc<dyn Messenger>);

    stub.deliver(json!({"not": "a string"}));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(recorded(&log).is_empty());
}

#[tokio::test]
async fn destroy_closes_the_messenger_but_spares_the_delegate() {
    let delegate: Arc<dyn EventBus<String>> = Arc::new(SerialEventBus::new("chat"));
    let log: EventLog<String> = event_log();
    assert!(delegate.on(recording_handler("local", 1, &log)));

    let stub = StubMessenger::new();
    let bus = BroadcastEventBus::with_messenger(Arc::clone(&delegate), Arc::clone(&stub) as Arc<dyn Messenger>);

    bus.destroy();
    assert_eq!(stub.close_count(), 1);
    // The delegate keeps its handlers; its lifecycle belongs to the caller.
    assert_eq!(delegate.handlers().len(), 1);
}

#[test]
fn broadcast_bus_construction_fails_without_a_transport() {
    // No tokio runtime here, so the transport factory yields nothing.
    let delegate: Arc<dyn EventBus<Value>> = Arc::new(SerialEventBus::new("metrics"));
    let error = BroadcastEventBus::new(delegate).expect_err("factory yields no messenger");
    assert!(error.to_string().contains("messenger setup failed"));
}

#[tokio::test]
async fn registry_routes_by_type_and_tears_everything_down() {
    let registry = EventBusRegistry::new(|event_type: &str| {
        Arc::new(ParallelEventBus::new(event_type)) as Arc<dyn EventBus<Value>>
    });

    let progress_log: EventLog<Value> = event_log();
    let health_log: EventLog<Value> = event_log();
    assert!(registry.on("progress", recording_handler("p", 1, &progress_log)));
    assert!(registry.on("health", recording_handler("h", 1, &health_log)));

    registry.emit("progress", json!({"done": 1})).await;
    assert_eq!(recorded(&progress_log), vec![json!({"done": 1})]);
    assert!(recorded(&health_log).is_empty());

    registry.destroy();
    assert!(registry.is_empty());
    registry.emit("progress", json!({"done": 2})).await;
    // The fresh bus created after destroy has no handlers.
    assert_eq!(recorded(&progress_log).len(), 1);
}
