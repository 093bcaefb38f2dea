#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use luxbridge_connectors::mqtt::{BrokerClient, LoopbackBroker, Message, MqttConfig};
use luxbridge_connectors::{ConnectionState, LightSource};
use luxbridge_core::SensorReadError;

/// Light source replaying a fixed script, `None` is a failed read
pub struct Scripted {
    script: VecDeque<Option<f32>>,
}

impl Scripted {
    pub fn new(script: &[Option<f32>]) -> Self {
        Self { script: script.iter().copied().collect() }
    }

    pub fn values(values: &[f32]) -> Self {
        Self { script: values.iter().map(|v| Some(*v)).collect() }
    }
}

#[async_trait]
impl LightSource for Scripted {
    async fn read_raw(&mut self) -> Result<f32, SensorReadError> {
        match self.script.pop_front() {
            Some(Some(value)) => Ok(value),
            Some(None) => Err(SensorReadError::Timeout { timeout_ms: 800 }),
            None => Err(SensorReadError::Link { reason: "script exhausted".into() }),
        }
    }

    fn describe(&self) -> String {
        "scripted source".into()
    }
}

pub fn client(broker: &LoopbackBroker, client_id: &str) -> BrokerClient {
    BrokerClient::with_transport(
        MqttConfig::new("loopback", 1883, client_id),
        Arc::new(broker.transport()),
    )
    .unwrap()
}

pub async fn connected(client: &BrokerClient) {
    let mut state = client.state_receiver();
    let up = state.wait_for(|s| *s == ConnectionState::Connected);
    tokio::time::timeout(Duration::from_secs(60), up)
        .await
        .expect("never connected")
        .unwrap();
}

pub fn text(message: &Message) -> String {
    String::from_utf8(message.payload.clone()).unwrap()
}
