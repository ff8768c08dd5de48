#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use harbor_fabric::{
    Arguments, ComponentConnector, ComponentPublisher, ConnectOptions, ConnectorState, Error,
    EventBus,
};
use tokio::sync::mpsc;

use common::{capture_logs, temp_config, TestComponent};

const FAST: Duration = Duration::from_millis(5);
const CEILING: Duration = Duration::from_millis(50);

/// Wait for an event sent through `rx`, failing after a few seconds
async fn expect_event(rx: &mut mpsc::UnboundedReceiver<()>) {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("event not fired in time")
        .unwrap();
}

#[tokio::test]
async fn connect_without_retries_fails_after_one_attempt() {
    let (_dir, config) = temp_config();
    let (logs, _guard) = capture_logs();
    let connector = ComponentConnector::new("test", &config, EventBus::new());

    match connector.connect(ConnectOptions::new().max_retries(0)).await {
        Err(Error::Connect {
            component,
            attempts,
            ..
        }) => {
            assert_eq!(component, "test");
            assert_eq!(attempts, 1);
        }
        other => panic!("Expected Connect error, got {:?}", other),
    }

    assert_eq!(connector.attempts(), 1);
    assert_eq!(connector.state(), ConnectorState::Disconnected);
    assert!(logs.contents().contains("Error while connecting to test"));
}

#[tokio::test]
async fn quiet_connect_logs_nothing() {
    let (_dir, config) = temp_config();
    let (logs, _guard) = capture_logs();
    let connector = ComponentConnector::new("test", &config, EventBus::new());

    let result = connector
        .connect(ConnectOptions::new().max_retries(0).quiet(true))
        .await;

    assert!(matches!(result, Err(Error::Connect { .. })));
    assert!(!logs.contents().contains("Error while connecting"));
}

#[tokio::test]
async fn retry_ceiling_bounds_attempts() {
    let (_dir, config) = temp_config();
    let connector = ComponentConnector::new("test", &config, EventBus::new())
        .with_retry_delays(FAST, CEILING);

    match connector
        .connect(ConnectOptions::new().max_retries(2).quiet(true))
        .await
    {
        Err(Error::Connect { attempts, .. }) => assert_eq!(attempts, 3),
        other => panic!("Expected Connect error, got {:?}", other),
    }
    assert_eq!(connector.attempts(), 3);
}

#[tokio::test]
async fn connect_waits_for_a_late_publisher() {
    let (_dir, config) = temp_config();
    let connector = ComponentConnector::new("test", &config, EventBus::new())
        .with_retry_delays(FAST, CEILING);

    let late = {
        let config = config.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let mut publisher =
                ComponentPublisher::new(Arc::new(TestComponent::default()), &config);
            publisher.start().await.unwrap();
            publisher
        })
    };

    let remote = connector
        .connect(ConnectOptions::new().quiet(true))
        .await
        .unwrap();
    assert!(connector.attempts() > 1);
    assert_eq!(connector.state(), ConnectorState::Connected);
    assert!(remote.ping().await.unwrap());

    connector.disconnect();
    late.await.unwrap().stop().await;
}

#[tokio::test]
async fn reconnect_fires_event_once() {
    let (_dir, config) = temp_config();
    let events = EventBus::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    events.call_on("test-reconnect", move || {
        tx.send(()).map_err(Into::into)
    });

    let mut publisher = ComponentPublisher::new(Arc::new(TestComponent::default()), &config);
    publisher.start().await.unwrap();

    let connector =
        ComponentConnector::new("test", &config, events.clone()).with_retry_delays(FAST, CEILING);
    assert_eq!(connector.reconnect_event(), "test-reconnect");
    let remote = connector
        .connect(ConnectOptions::new().quiet(true))
        .await
        .unwrap();

    let before_crash = {
        let remote = remote.clone();
        tokio::spawn(async move { remote.call("wait", Arguments::new()).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Simulate the remote process crashing and coming back
    publisher.stop().await;
    assert!(rx.try_recv().is_err());
    let mut publisher = ComponentPublisher::new(Arc::new(TestComponent::default()), &config);
    publisher.start().await.unwrap();

    expect_event(&mut rx).await;
    assert_eq!(connector.state(), ConnectorState::Connected);
    assert!(matches!(
        before_crash.await.unwrap(),
        Err(Error::ConnectionLost)
    ));
    assert!(remote.ping().await.unwrap());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(rx.try_recv().is_err());

    connector.disconnect();
    publisher.stop().await;
}

#[tokio::test]
async fn calls_while_reconnecting_fail_fast() {
    let (_dir, config) = temp_config();
    let mut publisher = ComponentPublisher::new(Arc::new(TestComponent::default()), &config);
    publisher.start().await.unwrap();

    let connector = ComponentConnector::new("test", &config, EventBus::new())
        .with_retry_delays(Duration::from_secs(10), Duration::from_secs(10));
    let remote = connector
        .connect(ConnectOptions::new().quiet(true))
        .await
        .unwrap();

    publisher.stop().await;
    tokio::time::timeout(Duration::from_secs(5), async {
        while connector.state() != ConnectorState::Reconnecting {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    assert!(!remote.is_connected());
    assert!(matches!(remote.ping().await, Err(Error::ConnectionLost)));
    connector.disconnect();
}

#[tokio::test]
async fn reconnect_gives_up_at_ceiling() {
    let (_dir, config) = temp_config();
    let events = EventBus::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    events.call_on("test-give-up", move || tx.send(()).map_err(Into::into));

    let mut publisher = ComponentPublisher::new(Arc::new(TestComponent::default()), &config);
    publisher.start().await.unwrap();

    let connector =
        ComponentConnector::new("test", &config, events).with_retry_delays(FAST, CEILING);
    connector
        .connect(ConnectOptions::new().max_retries(1).quiet(true))
        .await
        .unwrap();

    publisher.stop().await;

    expect_event(&mut rx).await;
    assert_eq!(connector.state(), ConnectorState::Disconnected);
    assert_eq!(connector.attempts(), 2);
}

#[tokio::test]
async fn factor_is_propagated_to_remote() {
    let (_dir, config) = temp_config();
    let mut publisher = ComponentPublisher::new(Arc::new(TestComponent::default()), &config);
    publisher.start().await.unwrap();

    let connector = ComponentConnector::new("test", &config, EventBus::new());
    let remote = connector
        .connect(ConnectOptions::new().factor(1.0))
        .await
        .unwrap();
    assert_eq!(remote.factor(), 1.0);

    connector.disconnect();
    let remote = connector.connect(ConnectOptions::new()).await.unwrap();
    assert_eq!(remote.factor(), harbor_fabric::retry::DEFAULT_FACTOR);

    // Reported as the scheduler applies it
    connector.disconnect();
    let remote = connector
        .connect(ConnectOptions::new().factor(0.5))
        .await
        .unwrap();
    assert_eq!(remote.factor(), 1.0);

    publisher.stop().await;
}

#[tokio::test]
async fn disconnect_twice_is_harmless() {
    let (_dir, config) = temp_config();
    let mut publisher = ComponentPublisher::new(Arc::new(TestComponent::default()), &config);
    publisher.start().await.unwrap();

    let connector = ComponentConnector::new("test", &config, EventBus::new());
    connector.connect(ConnectOptions::new()).await.unwrap();

    connector.disconnect();
    connector.disconnect();
    assert_eq!(connector.state(), ConnectorState::Disconnected);

    publisher.stop().await;
}

#[tokio::test]
async fn disconnect_without_connect_is_a_noop() {
    let (_dir, config) = temp_config();
    let connector = ComponentConnector::new("test", &config, EventBus::new());
    assert_eq!(connector.state(), ConnectorState::Idle);

    connector.disconnect();
    assert_eq!(connector.state(), ConnectorState::Disconnected);
}

#[tokio::test]
async fn disconnect_cancels_pending_connect() {
    let (_dir, config) = temp_config();
    let connector = Arc::new(
        ComponentConnector::new("test", &config, EventBus::new())
            .with_retry_delays(Duration::from_secs(60), Duration::from_secs(60)),
    );

    let connecting = {
        let connector = Arc::clone(&connector);
        tokio::spawn(async move { connector.connect(ConnectOptions::new().quiet(true)).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(connector.state(), ConnectorState::Connecting);

    connector.disconnect();
    let result = tokio::time::timeout(Duration::from_secs(5), connecting)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(Error::Disconnected)));
    assert_eq!(connector.state(), ConnectorState::Disconnected);
}

#[tokio::test]
async fn abandoned_connect_releases_the_connector() {
    let (_dir, config) = temp_config();
    let connector = ComponentConnector::new("test", &config, EventBus::new())
        .with_retry_delays(Duration::from_secs(60), Duration::from_secs(60));

    let abandoned = tokio::time::timeout(
        Duration::from_millis(50),
        connector.connect(ConnectOptions::new().quiet(true)),
    )
    .await;
    assert!(abandoned.is_err());
    assert_eq!(connector.state(), ConnectorState::Disconnected);

    let mut publisher = ComponentPublisher::new(Arc::new(TestComponent::default()), &config);
    publisher.start().await.unwrap();

    let remote = connector
        .connect(ConnectOptions::new().max_retries(0))
        .await
        .unwrap();
    assert_eq!(connector.state(), ConnectorState::Connected);
    assert!(remote.ping().await.unwrap());

    connector.disconnect();
    publisher.stop().await;
}

#[tokio::test]
async fn disconnect_fails_pending_calls() {
    let (_dir, config) = temp_config();
    let mut publisher = ComponentPublisher::new(Arc::new(TestComponent::default()), &config);
    publisher.start().await.unwrap();

    let connector = ComponentConnector::new("test", &config, EventBus::new());
    let remote = connector.connect(ConnectOptions::new()).await.unwrap();

    let pending = {
        let remote = remote.clone();
        tokio::spawn(async move { remote.call("wait", Arguments::new()).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    connector.disconnect();
    assert!(matches!(pending.await.unwrap(), Err(Error::ConnectionLost)));
    assert!(matches!(remote.ping().await, Err(Error::ConnectionLost)));

    publisher.stop().await;
}

#[tokio::test]
async fn connect_twice_is_refused() {
    let (_dir, config) = temp_config();
    let mut publisher = ComponentPublisher::new(Arc::new(TestComponent::default()), &config);
    publisher.start().await.unwrap();

    let connector = ComponentConnector::new("test", &config, EventBus::new());
    connector.connect(ConnectOptions::new()).await.unwrap();

    assert!(matches!(
        connector.connect(ConnectOptions::new()).await,
        Err(Error::AlreadyConnected(_))
    ));

    connector.disconnect();
    publisher.stop().await;
}

#[tokio::test]
async fn concurrent_calls_resolve_independently() {
    let (_dir, config) = temp_config();
    let mut publisher = ComponentPublisher::new(Arc::new(TestComponent::default()), &config);
    publisher.start().await.unwrap();

    let connector = ComponentConnector::new("test", &config, EventBus::new());
    let remote = connector.connect(ConnectOptions::new()).await.unwrap();

    // The server finishes the second call first
    let (slow, fast) = tokio::join!(
        remote.call("sleep", Arguments::new().arg("ms", 150).arg("value", "slow")),
        remote.call("sleep", Arguments::new().arg("ms", 1).arg("value", "fast")),
    );
    assert_eq!(slow.unwrap().as_str(), Some("slow"));
    assert_eq!(fast.unwrap().as_str(), Some("fast"));

    let (a, b) = tokio::join!(remote.ping(), remote.ping());
    assert!(a.unwrap() && b.unwrap());

    connector.disconnect();
    publisher.stop().await;
}
