//! Integration tests for startup while the broker is unreachable


use sensor_agent::transport::mqtt::{ConnectionState, LinkError, MqttLink};
use sensor_agent::transport::Transport;
use std::sync::Arc;
use std::time::{Duration, Instant};
use test_helpers::{closed_port, fast_reconnect, link_config, FakeBroker};

#[tokio::test]
async fn test_connect_reports_unreachable_broker_quickly() {
    let port = closed_port().await;
    let link = MqttLink::with_reconnect_config(link_config(port), fast_reconnect()).unwrap();

    let started = Instant::now();
    let result = link.connect().await;

    match result {
        Err(LinkError::BrokerUnreachable { address, .. }) => {
            assert_eq!(address, format!("127.0.0.1:{port}"));
        }
        other => panic!("expected BrokerUnreachable, got {other:?}"),
    }
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(link.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_connect_with_recovery_waits_for_broker() {
    let port = closed_port().await;
    let link = Arc::new(
        MqttLink::with_reconnect_config(link_config(port), fast_reconnect()).unwrap(),
    );

    let connecting = link.clone();
    let connect_task = tokio::spawn(async move { connecting.connect_with_recovery().await });

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!connect_task.is_finished());
    assert!(!link.is_connected());

    let broker = FakeBroker::start_on(port).await;

    let result = tokio::time::timeout(Duration::from_secs(5), connect_task)
        .await
        .expect("recovery never connected")
        .unwrap();
    assert!(result.is_ok());
    assert!(link.is_connected());
    assert_eq!(broker.connections(), 1);

    link.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_disconnect_stops_startup_recovery() {
    let port = closed_port().await;
    let link = Arc::new(
        MqttLink::with_reconnect_config(link_config(port), fast_reconnect()).unwrap(),
    );

    let connecting = link.clone();
    let connect_task = tokio::spawn(async move { connecting.connect_with_recovery().await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    link.disconnect().await.unwrap();

    let result = tokio::time::timeout(Duration::from_secs(2), connect_task)
        .await
        .expect("recovery ignored shutdown")
        .unwrap();
    assert!(matches!(result, Err(LinkError::BrokerUnreachable { .. })));
}

#[test]
fn test_invalid_broker_address_is_rejected_up_front() {
    let result = MqttLink::new(link_config(0));
    assert!(result.is_err());
}
