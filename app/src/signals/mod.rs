//! Signals pipeline: map → persist → broadcast → project → hand off to the
//! automation engine. Persistence is the causal anchor; a signal that cannot
//! be stored produces no derived rows and no automation work. Engine work is
//! queued to a worker task so it never delays the next inbound message,
//! while per-device ordering is preserved.

pub mod mapper;

use std::sync::Arc;
use std::time::Instant;

use api::Database;
use api::broadcast::PipelineStageSnapshot;
use api::reading::SensorReading;
use api::signal::SignalEvent;
use api::trigger_event::TriggerEvent;
use infrastructure::MqttInMessage;
use tokio::sync::mpsc;

use crate::automation::AutomationEngine;
use crate::port::{Broadcaster, CommandPort};
use crate::projection;
use crate::tracker::LatencyTracker;

use mapper::SignalMapper;

pub struct SignalsService {
    db: Database,
    broadcaster: Arc<dyn Broadcaster>,
    tracker: LatencyTracker,
    mapper: SignalMapper,
    engine_queue: mpsc::UnboundedSender<EngineJob>,
}

/// Drains queued engine work sequentially, detached from ingestion.
pub struct EngineWorker<C: CommandPort> {
    engine: Arc<AutomationEngine<C>>,
    rx: mpsc::UnboundedReceiver<EngineJob>,
}

struct EngineJob {
    event: SignalEvent,
    trigger_event: Option<TriggerEvent>,
    readings: Vec<SensorReading>,
    snapshot: PipelineStageSnapshot,
}

impl SignalsService {
    pub fn new<C: CommandPort>(
        db: Database,
        broadcaster: Arc<dyn Broadcaster>,
        tracker: LatencyTracker,
        engine: Arc<AutomationEngine<C>>,
        base_topic: &str,
    ) -> (Self, EngineWorker<C>) {
        let (tx, rx) = mpsc::unbounded_channel();

        (
            Self {
                db,
                broadcaster,
                tracker,
                mapper: SignalMapper::new(base_topic),
                engine_queue: tx,
            },
            EngineWorker { engine, rx },
        )
    }

    pub async fn process(&self, msg: &MqttInMessage) {
        let parse_started = Instant::now();
        let Some(event) = self.mapper.map(&msg.topic, &msg.payload) else {
            tracing::debug!(topic = %msg.topic, "Message produced no signal, dropping");
            return;
        };
        let parse_ms = elapsed_ms(parse_started);

        let db_started = Instant::now();
        if let Err(e) = self.db.add_signal_event(&event).await {
            // The broker will not replay; the signal is lost.
            tracing::error!(device_id = %event.device_id, "Error persisting signal event: {:?}", e);
            return;
        }
        let db_ms = elapsed_ms(db_started);

        let broadcast_started = Instant::now();
        self.broadcaster.signal_event(&event);
        let broadcast_ms = elapsed_ms(broadcast_started);

        let derived = projection::project(&event);

        let mut readings = Vec::with_capacity(derived.readings.len());
        for reading in derived.readings {
            match self.db.add_sensor_reading(&reading).await {
                Ok(()) => {
                    self.broadcaster.sensor_reading(&reading);
                    readings.push(reading);
                }
                Err(e) => {
                    tracing::error!(device_id = %event.device_id, metric = %reading.metric, "Error persisting reading: {:?}", e)
                }
            }
        }

        let mut trigger_event = None;
        if let Some(te) = derived.trigger_event {
            match self.db.add_trigger_event(&te).await {
                Ok(()) => {
                    self.broadcaster.trigger_event(&te);
                    trigger_event = Some(te);
                }
                Err(e) => {
                    tracing::error!(device_id = %event.device_id, "Error persisting trigger event: {:?}", e)
                }
            }
        }

        // Any device message doubles as the confirmation a pending
        // end-to-end timeline may be waiting for.
        self.tracker.record_target_device_response(&event.device_id);

        let job = EngineJob {
            event,
            trigger_event,
            readings,
            snapshot: PipelineStageSnapshot {
                parse_ms,
                db_ms,
                broadcast_ms,
            },
        };
        if self.engine_queue.send(job).is_err() {
            tracing::error!("Automation engine queue is closed, dropping stimulus");
        }
    }
}

impl<C: CommandPort> EngineWorker<C> {
    pub async fn run(mut self) {
        while let Some(job) = self.rx.recv().await {
            self.engine
                .process_signal(&job.event, job.trigger_event.as_ref(), &job.readings, job.snapshot)
                .await;
        }
    }
}

fn elapsed_ms(since: Instant) -> f64 {
    since.elapsed().as_secs_f64() * 1000.0
}
