use std::{future::Future, time::Duration};

use rumqttc::{AsyncClient, EventLoop, MqttOptions, QoS, Transport};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::{
    config::{Config, MqttProtocol},
    rules::ActuatorCommand,
};

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to enqueue MQTT publish")]
    Client(#[from] rumqttc::ClientError),
}

/// Outbound command delivery. Abstracted so the dispatcher can be
/// exercised in tests without a broker.
pub trait Publisher {
    fn publish(
        &self,
        command: &ActuatorCommand,
    ) -> impl Future<Output = Result<(), PublishError>> + Send;
}

/// Command publisher backed by the shared rumqttc client.
///
/// Commands go out at QoS 1 (at-least-once): the broker session retries
/// across transient reconnects, and the rule engine's convergent
/// full-vector output makes duplicate delivery harmless.
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
}

impl MqttPublisher {
    /// Subscribe to `topic` at QoS 1. Called on every (re)connect since
    /// broker sessions are not assumed persistent.
    pub async fn subscribe(&self, topic: &str) -> Result<(), PublishError> {
        self.client.subscribe(topic, QoS::AtLeastOnce).await?;
        Ok(())
    }
}

impl Publisher for MqttPublisher {
    async fn publish(&self, command: &ActuatorCommand) -> Result<(), PublishError> {
        let topic = command.topic();
        debug!(topic = %topic, payload = command.payload(), "Publishing actuator command");
        self.client
            .publish(topic, QoS::AtLeastOnce, false, command.payload())
            .await?;
        Ok(())
    }
}

/// Build the shared MQTT connection from config.
///
/// Returns the publisher half and the event loop; the ingestion
/// dispatcher drives the event loop, which also flushes the publisher's
/// outgoing queue. rumqttc reconnects internally, so a broker outage
/// surfaces as poll errors rather than a dead client.
pub fn connect(config: &Config) -> (MqttPublisher, EventLoop) {
    let client_id = format!("hydrofarm-backend-{}", Uuid::new_v4().simple());
    let mut options = MqttOptions::new(client_id, &config.mqtt_host, config.mqtt_port);
    options.set_keep_alive(Duration::from_secs(30));

    if let (Some(username), Some(password)) = (&config.mqtt_username, &config.mqtt_password) {
        options.set_credentials(username, password);
    }
    if config.mqtt_protocol == MqttProtocol::Mqtts {
        options.set_transport(Transport::tls_with_default_config());
    }

    let (client, event_loop) = AsyncClient::new(options, 64);
    (MqttPublisher { client }, event_loop)
}
