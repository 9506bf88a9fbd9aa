use std::time::Duration;

use chrono::Utc;
use rumqttc::{Event, EventLoop, Packet};
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::{
    codec,
    farm_directory::{DirectoryError, FarmDirectory},
    mqtt::{MqttPublisher, Publisher},
    rules::RuleEngine,
    sink::ReadingSink,
    timer_store::DeviceTimerStore,
};

/// Orchestrates one dispatch cycle per inbound telemetry message:
/// decode → farm lookup → rule evaluation under the per-device lock →
/// command publication and best-effort persistence outside it.
///
/// No failure here is fatal; a bad message is dropped with a log line
/// and the next one is processed as if nothing happened.
#[derive(Clone)]
pub struct IngestionDispatcher<P: Publisher> {
    directory: FarmDirectory,
    timers: DeviceTimerStore,
    engine: RuleEngine,
    publisher: P,
    sink: ReadingSink,
    sink_timeout: Duration,
}

impl<P> IngestionDispatcher<P>
where
    P: Publisher + Clone + Send + Sync + 'static,
{
    pub fn new(
        directory: FarmDirectory,
        timers: DeviceTimerStore,
        engine: RuleEngine,
        publisher: P,
        sink: ReadingSink,
        sink_timeout: Duration,
    ) -> Self {
        Self { directory, timers, engine, publisher, sink, sink_timeout }
    }

    /// Process one raw telemetry payload end to end.
    ///
    /// Returns only after the timer-state commit, so the next reading for
    /// the same serial number sees correct cooldowns. Persistence runs in
    /// a detached task; telemetry loss is acceptable, late pump triggers
    /// are not.
    pub async fn handle_message(&self, payload: &[u8]) {
        let received_at = Utc::now();

        let reading = match codec::decode(payload, received_at) {
            Ok(reading) => reading,
            Err(e) => {
                warn!(error = %e, "Dropping undecodable telemetry payload");
                return;
            }
        };
        let serial_number = reading.serial_number.clone();

        let farm = match self.directory.resolve(&serial_number).await {
            Ok(farm) => farm,
            Err(e @ DirectoryError::FarmNotFound(_)) => {
                warn!(serial_number = %serial_number, error = %e, "Dropping telemetry from unregistered device");
                return;
            }
            Err(e) => {
                error!(serial_number = %serial_number, error = %e, "Farm lookup failed; dropping telemetry");
                return;
            }
        };

        if farm.is_disabled {
            debug!(serial_number = %serial_number, "Farm is disabled; skipping control cycle");
            return;
        }

        // The closure is synchronous and CPU-only, so the per-device lock
        // is held for the evaluation alone, never across I/O.
        let evaluation = self
            .timers
            .with_state(&serial_number, |state| {
                Ok(self.engine.evaluate(&reading, state, reading.received_at))
            })
            .await;
        let commands = match evaluation {
            Ok(commands) => commands,
            Err(e) => {
                error!(serial_number = %serial_number, error = %e, "Rule evaluation failed");
                return;
            }
        };

        // Persistence is fire-and-forget relative to actuation.
        {
            let sink = self.sink.clone();
            let sink_timeout = self.sink_timeout;
            let farm = farm.clone();
            let reading = reading.clone();
            tokio::spawn(async move {
                match time::timeout(sink_timeout, sink.upsert_latest(&farm, &reading)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        warn!(serial_number = %reading.serial_number, error = %e, "Failed to persist latest reading")
                    }
                    Err(_) => {
                        warn!(serial_number = %reading.serial_number, "Timed out persisting latest reading")
                    }
                }
            });
        }

        // One failed actuator must not starve the rest of the vector.
        let mut failures = 0usize;
        for command in &commands {
            if let Err(e) = self.publisher.publish(command).await {
                failures += 1;
                warn!(
                    serial_number = %serial_number,
                    topic = %command.topic(),
                    error = %e,
                    "Failed to publish actuator command"
                );
            }
        }

        debug!(
            serial_number = %serial_number,
            commands = commands.len(),
            failures,
            "Dispatch cycle complete"
        );
    }
}

impl IngestionDispatcher<MqttPublisher> {
    /// Consume the broker event loop forever.
    ///
    /// Subscribes to the telemetry topic on every (re)connect and spawns
    /// one task per inbound publish, so slow farms never block fast ones.
    /// Connection errors are logged and retried; the loop only ends with
    /// the process.
    pub async fn run(self, mut event_loop: EventLoop, topic: String) {
        info!(topic = %topic, "Telemetry ingestion started");

        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("Connected to MQTT broker");
                    if let Err(e) = self.publisher.subscribe(&topic).await {
                        error!(topic = %topic, error = %e, "Failed to subscribe to telemetry topic");
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let dispatcher = self.clone();
                    tokio::spawn(async move {
                        dispatcher.handle_message(&publish.payload).await;
                    });
                }
                Ok(_) => {}
                Err(e) => {
                    error!(error = %e, "MQTT connection error; retrying");
                    time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use sqlx::PgPool;
    use uuid::Uuid;

    use super::*;
    use crate::{
        mqtt::PublishError,
        rules::{Actuator, ActuatorCommand, Thresholds},
    };

    /// Records published commands instead of talking to a broker.
    /// Optionally fails for a chosen actuator to model partial outages.
    #[derive(Clone, Default)]
    struct RecordingPublisher {
        published: Arc<Mutex<Vec<ActuatorCommand>>>,
        fail_for: Option<Actuator>,
    }

    impl Publisher for RecordingPublisher {
        async fn publish(&self, command: &ActuatorCommand) -> Result<(), PublishError> {
            if self.fail_for == Some(command.actuator) {
                let unsent = rumqttc::Publish::new(
                    command.topic(),
                    rumqttc::QoS::AtLeastOnce,
                    command.payload(),
                );
                return Err(PublishError::Client(rumqttc::ClientError::Request(
                    rumqttc::Request::Publish(unsent),
                )));
            }
            self.published.lock().unwrap().push(command.clone());
            Ok(())
        }
    }

    fn dispatcher(pool: PgPool, publisher: RecordingPublisher) -> IngestionDispatcher<RecordingPublisher> {
        IngestionDispatcher::new(
            FarmDirectory::new(pool.clone(), Duration::from_secs(30)),
            DeviceTimerStore::new(),
            RuleEngine::new(Thresholds::default()),
            publisher,
            ReadingSink::new(pool, false),
            Duration::from_secs(3),
        )
    }

    async fn insert_farm(pool: &PgPool, serial: &str, disabled: bool) -> Uuid {
        sqlx::query_scalar::<_, Uuid>(
            "INSERT INTO farms (serial_number, is_disabled) VALUES ($1, $2) RETURNING id",
        )
        .bind(serial)
        .bind(disabled)
        .fetch_one(pool)
        .await
        .unwrap()
    }

    fn payload(serial: &str) -> String {
        format!(
            r#"{{
                "serialNumber": "{serial}", "paired": true,
                "T_temperature": 22, "E_temperature": 25, "E_co2": 450,
                "E_lightLVL": 80, "E_humidity": 70, "T_Waterlvl": 7,
                "T_PH": 6.5, "T_EC": 1500
            }}"#
        )
    }

    async fn wait_for_latest_row(pool: &PgPool, serial: &str) -> bool {
        for _ in 0..100 {
            let found: i64 = sqlx::query_scalar(
                "SELECT count(*) FROM latest_readings WHERE serial_number = $1",
            )
            .bind(serial)
            .fetch_one(pool)
            .await
            .unwrap();
            if found > 0 {
                return true;
            }
            time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn full_cycle_publishes_vector_and_persists(pool: PgPool) {
        insert_farm(&pool, "F1", false).await;
        let publisher = RecordingPublisher::default();
        let d = dispatcher(pool.clone(), publisher.clone());

        d.handle_message(payload("F1").as_bytes()).await;

        let published = publisher.published.lock().unwrap().clone();
        assert_eq!(published.len(), 7);
        // humidity 70 > 60 → fan on; ph 6.5 → pump B on from fresh state
        let on = |a| published.iter().find(|c| c.actuator == a).unwrap().on;
        assert!(on(Actuator::Fan));
        assert!(!on(Actuator::Valve));
        assert!(!on(Actuator::PumpC));
        assert!(!on(Actuator::PumpA));
        assert!(on(Actuator::PumpB));
        assert!(on(Actuator::AirPump));
        assert!(on(Actuator::Light));

        assert!(wait_for_latest_row(&pool, "F1").await, "latest reading never persisted");
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn cooldown_state_survives_between_messages(pool: PgPool) {
        insert_farm(&pool, "F1", false).await;
        let publisher = RecordingPublisher::default();
        let d = dispatcher(pool.clone(), publisher.clone());

        // ph 6.5 on both messages; only the first may trigger pump B.
        d.handle_message(payload("F1").as_bytes()).await;
        d.handle_message(payload("F1").as_bytes()).await;

        let published = publisher.published.lock().unwrap().clone();
        let pump_b_on = published
            .iter()
            .filter(|c| c.actuator == Actuator::PumpB && c.on)
            .count();
        assert_eq!(pump_b_on, 1);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn unknown_serial_issues_no_commands_and_no_writes(pool: PgPool) {
        let publisher = RecordingPublisher::default();
        let d = dispatcher(pool.clone(), publisher.clone());

        d.handle_message(payload("does-not-exist").as_bytes()).await;
        time::sleep(Duration::from_millis(50)).await;

        assert!(publisher.published.lock().unwrap().is_empty());
        let rows: i64 = sqlx::query_scalar("SELECT count(*) FROM latest_readings")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(rows, 0);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn malformed_payload_issues_no_commands(pool: PgPool) {
        insert_farm(&pool, "F1", false).await;
        let publisher = RecordingPublisher::default();
        let d = dispatcher(pool, publisher.clone());

        d.handle_message(b"{\"serialNumber\": \"F1\"}").await;
        d.handle_message(b"garbage").await;

        assert!(publisher.published.lock().unwrap().is_empty());
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn disabled_farm_is_skipped(pool: PgPool) {
        insert_farm(&pool, "F1", true).await;
        let publisher = RecordingPublisher::default();
        let d = dispatcher(pool, publisher.clone());

        d.handle_message(payload("F1").as_bytes()).await;

        assert!(publisher.published.lock().unwrap().is_empty());
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn one_failed_publish_does_not_block_the_rest(pool: PgPool) {
        insert_farm(&pool, "F1", false).await;
        let publisher = RecordingPublisher {
            fail_for: Some(Actuator::Fan),
            ..RecordingPublisher::default()
        };
        let d = dispatcher(pool, publisher.clone());

        d.handle_message(payload("F1").as_bytes()).await;

        let published = publisher.published.lock().unwrap().clone();
        assert_eq!(published.len(), 6);
        assert!(published.iter().all(|c| c.actuator != Actuator::Fan));
    }
}
