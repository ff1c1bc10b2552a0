use statsd_amqp::application::connection_manager::ConnectionPhase;
use statsd_amqp::application::publisher::FlushOutcome;
use statsd_amqp::domain::errors::BrokerError;
use statsd_amqp::infrastructure::{EventHub, MockBroker};
use statsd_amqp::{AmqpBackend, BackendConfig, MetricsSnapshot};
use std::sync::Arc;
use std::time::Duration;

async fn wait_for(backend: &AmqpBackend, phase: ConnectionPhase) {
    let mut state = backend.connections().subscribe();
    tokio::time::timeout(Duration::from_secs(2), state.wait_for(|s| s.phase() == phase))
        .await
        .expect("phase not reached in time")
        .expect("state channel closed");
}

fn config(retry_ms: u64) -> BackendConfig {
    BackendConfig {
        retry_delay: Duration::from_millis(retry_ms),
        operation_timeout: Duration::from_millis(200),
        ..BackendConfig::default()
    }
}

#[tokio::test]
async fn test_broker_down_at_startup_then_recovers() {
    let broker = MockBroker::new();
    broker.fail_next_connects(2);
    let mut hub = EventHub::new();
    let backend = AmqpBackend::init_with_connector(0, &config(20), Arc::new(broker.clone()), &mut hub)
        .expect("init never fails on an unreachable broker");

    wait_for(&backend, ConnectionPhase::Connected).await;
    assert_eq!(broker.connect_attempts(), 3);
    assert_eq!(backend.metrics().reconnects_total.get(), 2.0);
}

#[tokio::test]
async fn test_every_close_triggers_a_new_connection() {
    let broker = MockBroker::new();
    let mut hub = EventHub::new();
    let backend = AmqpBackend::init_with_connector(0, &config(20), Arc::new(broker.clone()), &mut hub)
        .expect("init");
    wait_for(&backend, ConnectionPhase::Connected).await;

    for round in 1..=3 {
        let mut state = backend.connections().subscribe();
        broker.close_connection("connection forced");
        tokio::time::timeout(
            Duration::from_secs(1),
            state.wait_for(|s| s.phase() != ConnectionPhase::Connected),
        )
        .await
        .expect("close not observed")
        .expect("state channel closed");

        wait_for(&backend, ConnectionPhase::Connected).await;
        assert_eq!(broker.connect_attempts(), round + 1);
        assert_eq!(backend.metrics().reconnects_total.get(), round as f64);
    }
}

#[tokio::test]
async fn test_clean_broker_close_triggers_a_new_connection() {
    let broker = MockBroker::new();
    let mut hub = EventHub::new();
    let backend = AmqpBackend::init_with_connector(0, &config(20), Arc::new(broker.clone()), &mut hub)
        .expect("init");
    wait_for(&backend, ConnectionPhase::Connected).await;

    let mut state = backend.connections().subscribe();
    broker.close_gracefully();
    tokio::time::timeout(
        Duration::from_secs(1),
        state.wait_for(|s| s.phase() != ConnectionPhase::Connected),
    )
    .await
    .expect("clean close not observed")
    .expect("state channel closed");

    wait_for(&backend, ConnectionPhase::Connected).await;
    assert_eq!(broker.connect_attempts(), 2);
    assert_eq!(backend.metrics().reconnects_total.get(), 1.0);

    hub.flush_all(1000, &MetricsSnapshot::default()).await;
    assert_eq!(broker.published().len(), 1);
}

#[tokio::test]
async fn test_flush_during_reconnect_fails_fast() {
    let broker = MockBroker::new();
    let mut hub = EventHub::new();
    let backend = AmqpBackend::init_with_connector(0, &config(500), Arc::new(broker.clone()), &mut hub)
        .expect("init");
    wait_for(&backend, ConnectionPhase::Connected).await;

    broker.close_connection("connection forced");
    wait_for(&backend, ConnectionPhase::Connecting).await;

    let outcome = tokio::time::timeout(
        Duration::from_millis(100),
        backend.flush_with_outcome(1000, &MetricsSnapshot::default()),
    )
    .await
    .expect("flush blocked on a missing connection");
    assert!(matches!(
        outcome,
        FlushOutcome::Failed {
            sent: 0,
            error: BrokerError::NotConnected
        }
    ));
}

#[tokio::test]
async fn test_shutdown_stops_reconnecting() {
    let broker = MockBroker::new();
    let mut hub = EventHub::new();
    let backend = AmqpBackend::init_with_connector(0, &config(10), Arc::new(broker.clone()), &mut hub)
        .expect("init");
    wait_for(&backend, ConnectionPhase::Connected).await;

    backend.shutdown();
    broker.close_connection("bye");
    tokio::time::sleep(Duration::from_millis(60)).await;

    assert_eq!(backend.connection_phase(), ConnectionPhase::Disconnected);
    assert_eq!(broker.connect_attempts(), 1);
}
