use std::sync::Arc;

use api::Database;
use infrastructure::{EventBus, HttpClientConfig};
use settings::Settings;

use crate::automation::AutomationEngine;
use crate::broadcast::{BusBroadcaster, PushMessage};
use crate::command::CommandService;
use crate::ingestion::IngestionRunner;
use crate::pairing::PairingService;
use crate::port::Broadcaster;
use crate::signals::SignalsService;
use crate::state_sync::StateSyncRunner;
use crate::tracker::LatencyTracker;

mod automation;
mod broadcast;
mod command;
mod ingestion;
mod pairing;
mod port;
mod projection;
mod settings;
mod signals;
mod state_sync;
mod tracker;

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    let settings = Settings::new().expect("Error reading configuration");
    settings.monitoring.init().expect("Error initializing monitoring");

    tracing::info!("Starting sdhome core");

    let db_pool = settings.database.new_pool().await.expect("Error connecting to database");
    let database = Database::new(db_pool);
    database.migrate().await.expect("Error applying database migrations");

    let mut mqtt_client = settings.mqtt.new_client();
    let base_topic = settings.ingestion.base_topic.clone();

    let bus = EventBus::<PushMessage>::new(256);
    let broadcaster: Arc<dyn Broadcaster> = Arc::new(BusBroadcaster::new(&bus));
    let tracker = LatencyTracker::new(broadcaster.clone());

    let commands = CommandService::new(mqtt_client.sender(), &base_topic);

    let webhooks = HttpClientConfig::new(None)
        .new_tracing_client()
        .expect("Error building webhook client");
    let engine = Arc::new(AutomationEngine::new(
        database.clone(),
        commands.clone(),
        broadcaster.clone(),
        tracker.clone(),
        webhooks,
        settings.webhooks.main.clone(),
    ));

    let (signals, engine_worker) = SignalsService::new(
        database.clone(),
        broadcaster.clone(),
        tracker.clone(),
        engine.clone(),
        &base_topic,
    );

    let pairing = Arc::new(PairingService::new(database.clone(), commands.clone(), broadcaster.clone()));

    tracing::info!("Bootstrapping automation caches");
    engine.bootstrap().await.expect("Error bootstrapping automation caches");

    if !settings.mqtt.enabled {
        tracing::warn!("MQTT is disabled; ingestion and state sync idle");

        tokio::select!(
            _ = engine_worker.run() => {},
            _ = engine.run_time_loop() => {},
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown signal received");
            },
        );
        return;
    }

    let ingestion_subscription = mqtt_client
        .subscribe(&settings.ingestion.topic_filter)
        .await
        .expect("Error subscribing to ingestion topic");
    let state_subscription = mqtt_client
        .subscribe(format!("{base_topic}/+"))
        .await
        .expect("Error subscribing to device state topics");

    let ingestion = IngestionRunner::new(
        ingestion_subscription,
        signals,
        pairing.clone(),
        database.clone(),
        &base_topic,
    );

    let state_sync = StateSyncRunner::new(
        database.clone(),
        broadcaster.clone(),
        commands.clone(),
        state_subscription,
        &base_topic,
        &settings.state_sync,
    );

    tracing::info!("Starting main loop");

    tokio::select!(
        _ = mqtt_client.process() => {},
        _ = ingestion.run() => {},
        _ = engine_worker.run() => {},
        _ = state_sync.run() => {},
        _ = engine.run_time_loop() => {},
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        },
    );
}
