//! Broker client behaviour against the in-process broker
//!
//! All tests run on a paused clock: backoff sleeps complete instantly and
//! connect attempts are stamped with exact virtual times.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use luxbridge_connectors::mqtt::{
    BrokerClient, ConnectionState, LoopbackBroker, MqttConfig, MqttError, QoS, STATUS_OFFLINE,
    STATUS_ONLINE,
};
use luxbridge_connectors::{Delivery, Shutdown};
use tokio::sync::{broadcast, mpsc};

use ConnectionState::*;

const DEADLINE: Duration = Duration::from_secs(600);

fn config() -> MqttConfig {
    MqttConfig::new("loopback", 1883, "luxbridge-test")
}

fn client(broker: &LoopbackBroker) -> BrokerClient {
    BrokerClient::with_transport(config(), Arc::new(broker.transport())).unwrap()
}

async fn wait_for(transitions: &mut broadcast::Receiver<ConnectionState>, target: ConnectionState) {
    tokio::time::timeout(DEADLINE, async {
        while transitions.recv().await.unwrap() != target {}
    })
    .await
    .expect("state never reached");
}

async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(DEADLINE, rx.recv())
        .await
        .expect("nothing received")
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn reconnects_with_exponential_backoff() {
    let broker = LoopbackBroker::new();
    broker.fail_next_connects(2);
    let client = client(&broker);
    let mut transitions = client.watch_state();
    let shutdown = Shutdown::new();

    let task = client.connect_async(shutdown.signal()).unwrap();

    let mut seen = Vec::new();
    while seen.last() != Some(&Connected) {
        seen.push(transitions.recv().await.unwrap());
    }
    assert_eq!(
        seen,
        [Connecting, Reconnecting, Connecting, Reconnecting, Connecting, Connected]
    );

    let attempts = broker.connect_attempts();
    assert_eq!(attempts.len(), 3);
    assert_eq!(attempts[1] - attempts[0], Duration::from_secs(1));
    assert_eq!(attempts[2] - attempts[1], Duration::from_secs(2));

    shutdown.trigger();
    task.await.unwrap().unwrap();
    assert_eq!(client.state(), Disconnected);
    assert_eq!(broker.session_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn publish_during_outage_drops_without_blocking() {
    let broker = LoopbackBroker::new();
    let client = client(&broker);
    let mut transitions = client.watch_state();
    let shutdown = Shutdown::new();
    let task = client.connect_async(shutdown.signal()).unwrap();
    wait_for(&mut transitions, Connected).await;

    let delivery = client.publish("sensornetwork/ldr/light", b"1".to_vec(), QoS::AtMostOnce, false);
    assert_eq!(delivery, Delivery::Queued);

    broker.fail_next_connects(1);
    broker.drop_sessions();
    wait_for(&mut transitions, Reconnecting).await;

    for value in [b"2", b"3", b"4"] {
        assert_eq!(
            client.publish("sensornetwork/ldr/light", value.to_vec(), QoS::AtMostOnce, false),
            Delivery::Dropped
        );
    }

    wait_for(&mut transitions, Connected).await;
    assert!(client
        .publish("sensornetwork/ldr/light", b"5".to_vec(), QoS::AtMostOnce, false)
        .is_queued());

    let stats = client.stats();
    assert_eq!(stats.messages_sent, 2);
    assert_eq!(stats.messages_dropped, 3);
    assert_eq!(stats.bytes_sent, 2);
    assert_eq!(stats.reconnections, 1);
    assert!(stats.last_error.is_some());

    let delivered: Vec<Vec<u8>> = broker
        .published_on("sensornetwork/ldr/light")
        .into_iter()
        .map(|m| m.payload)
        .collect();
    assert_eq!(delivered, [b"1".to_vec(), b"5".to_vec()]);

    shutdown.trigger();
    task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn callbacks_survive_reconnect() {
    let broker = LoopbackBroker::new();
    let client = client(&broker);
    let (tx, mut rx) = mpsc::unbounded_channel();

    client
        .register_callback("sensors/+/light", move |topic, payload| {
            tx.send((topic.to_string(), payload.to_vec())).unwrap();
        })
        .unwrap();

    let mut transitions = client.watch_state();
    let shutdown = Shutdown::new();
    let task = client.connect_async(shutdown.signal()).unwrap();
    wait_for(&mut transitions, Connected).await;

    broker.inject("sensors/3/3/light", b"ignored".to_vec());
    broker.inject("sensors/3/light", b"410".to_vec());
    assert_eq!(next(&mut rx).await, ("sensors/3/light".to_string(), b"410".to_vec()));

    broker.drop_sessions();
    wait_for(&mut transitions, Connected).await;

    broker.inject("sensors/7/light", b"99".to_vec());
    assert_eq!(next(&mut rx).await, ("sensors/7/light".to_string(), b"99".to_vec()));
    assert_eq!(broker.subscribe_log(), ["sensors/+/light", "sensors/+/light"]);

    shutdown.trigger();
    task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn handlers_run_in_registration_order() {
    let broker = LoopbackBroker::new();
    let client = client(&broker);
    let order = Arc::new(Mutex::new(Vec::new()));
    let (done_tx, mut done_rx) = mpsc::unbounded_channel();

    let registrations =
        [("lights/#", "first"), ("lights/kitchen", "exact"), ("lights/#", "second")];
    for (pattern, tag) in registrations {
        let order = order.clone();
        let done_tx = done_tx.clone();
        client
            .register_callback(pattern, move |_, _| {
                order.lock().unwrap().push(tag);
                done_tx.send(()).unwrap();
            })
            .unwrap();
    }

    let mut transitions = client.watch_state();
    let shutdown = Shutdown::new();
    let task = client.connect_async(shutdown.signal()).unwrap();
    wait_for(&mut transitions, Connected).await;

    broker.inject("lights/kitchen", b"on".to_vec());
    for _ in 0..3 {
        next(&mut done_rx).await;
    }
    // Patterns in registration order, handlers within a pattern likewise
    assert_eq!(*order.lock().unwrap(), ["first", "second", "exact"]);

    shutdown.trigger();
    task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn callback_may_register_callbacks() {
    let broker = LoopbackBroker::new();
    let client = client(&broker);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let inner_client = client.clone();
    client
        .register_callback("control/add", move |_, payload| {
            let pattern = String::from_utf8_lossy(payload).into_owned();
            let tx = tx.clone();
            inner_client
                .register_callback(&pattern, move |topic, _| {
                    tx.send(topic.to_string()).unwrap();
                })
                .unwrap();
        })
        .unwrap();

    let mut transitions = client.watch_state();
    let shutdown = Shutdown::new();
    let task = client.connect_async(shutdown.signal()).unwrap();
    wait_for(&mut transitions, Connected).await;

    broker.inject("control/add", b"dynamic/+".to_vec());
    // Let the connection task process the registration
    while !broker.subscribe_log().iter().any(|f| f == "dynamic/+") {
        tokio::task::yield_now().await;
    }
    broker.inject("dynamic/one", b"".to_vec());
    assert_eq!(next(&mut rx).await, "dynamic/one");

    shutdown.trigger();
    task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn rejected_credentials_are_fatal() {
    let broker = LoopbackBroker::new();
    broker.reject_credentials(true);
    let client = client(&broker);
    let shutdown = Shutdown::new();

    let task = client.connect_async(shutdown.signal()).unwrap();
    let result = task.await.unwrap();

    assert!(matches!(result, Err(MqttError::Auth(_))));
    assert_eq!(client.state(), Fatal);
    assert!(client.stats().last_error.unwrap().contains("authentication"));

    // No retry, however long we wait
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(broker.connect_attempts().len(), 1);
    assert_eq!(
        client.publish("a/b", b"x".to_vec(), QoS::AtMostOnce, false),
        Delivery::Dropped
    );
}

#[tokio::test(start_paused = true)]
async fn second_connect_rejected() {
    let broker = LoopbackBroker::new();
    let client = client(&broker);
    let shutdown = Shutdown::new();

    let task = client.connect_async(shutdown.signal()).unwrap();
    assert_eq!(client.connect_async(shutdown.signal()).unwrap_err(), MqttError::AlreadyStarted);

    shutdown.trigger();
    task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn close_announces_offline() {
    let broker = LoopbackBroker::new();
    let client = BrokerClient::with_transport(
        config().status_topic("sensornetwork/luxbridge/status"),
        Arc::new(broker.transport()),
    )
    .unwrap();
    let mut transitions = client.watch_state();
    let shutdown = Shutdown::new();
    let task = client.connect_async(shutdown.signal()).unwrap();
    wait_for(&mut transitions, Connected).await;
    assert_eq!(broker.clients(), ["luxbridge-test"]);

    client.close();
    task.await.unwrap().unwrap();
    assert_eq!(client.state(), Disconnected);

    let statuses: Vec<Vec<u8>> = broker
        .published_on("sensornetwork/luxbridge/status")
        .into_iter()
        .map(|m| m.payload)
        .collect();
    assert_eq!(statuses, [STATUS_ONLINE.to_vec(), STATUS_OFFLINE.to_vec()]);
}
