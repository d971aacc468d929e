//! End-to-end latency tracker: correlates a triggering inbound signal with
//! the target device's eventual state echo and broadcasts the breakdown as
//! one timeline. Pending timelines for the same target resolve in FIFO
//! order; a 5 s watchdog closes abandoned ones as timed out.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use api::broadcast::{PipelineStageSnapshot, PipelineTimeline, StageCategory, TimelineStage};
use uuid::Uuid;

use crate::port::Broadcaster;

const RESPONSE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);
const COMPLETED_RING_SIZE: usize = 100;

#[derive(Debug)]
struct ActiveTimeline {
    trigger_device_id: String,
    rule_name: Option<String>,
    target_device_id: Option<String>,
    started_at: chrono::DateTime<chrono::Utc>,
    snapshot: PipelineStageSnapshot,
    lookup_ms: Option<f64>,
    action_ms: Option<f64>,
    waiting_since: Option<Instant>,
}

#[derive(Clone)]
pub struct LatencyTracker {
    inner: Arc<TrackerInner>,
}

struct TrackerInner {
    broadcaster: Arc<dyn Broadcaster>,
    active: Mutex<HashMap<Uuid, ActiveTimeline>>,
    /// Target device id → tracking ids waiting for its echo, oldest first.
    waiting: Mutex<HashMap<String, VecDeque<Uuid>>>,
    completed: Mutex<VecDeque<PipelineTimeline>>,
}

impl LatencyTracker {
    pub fn new(broadcaster: Arc<dyn Broadcaster>) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                broadcaster,
                active: Mutex::new(HashMap::new()),
                waiting: Mutex::new(HashMap::new()),
                completed: Mutex::new(VecDeque::new()),
            }),
        }
    }

    pub fn start_tracking(
        &self,
        trigger_device_id: &str,
        rule_name: Option<&str>,
        snapshot: PipelineStageSnapshot,
    ) -> Uuid {
        let id = Uuid::new_v4();

        self.inner.active.lock().unwrap().insert(
            id,
            ActiveTimeline {
                trigger_device_id: trigger_device_id.to_string(),
                rule_name: rule_name.map(str::to_string),
                target_device_id: None,
                started_at: support::time::now(),
                snapshot,
                lookup_ms: None,
                action_ms: None,
                waiting_since: None,
            },
        );

        id
    }

    pub fn record_rule_lookup(&self, tracking_id: Uuid, duration_ms: f64) {
        if let Some(timeline) = self.inner.active.lock().unwrap().get_mut(&tracking_id) {
            timeline.lookup_ms = Some(duration_ms);
        }
    }

    /// Marks the timeline as waiting for `target_device_id` and arms the
    /// watchdog. On expiry the timeline closes without a response stage.
    pub fn record_action_execution(&self, tracking_id: Uuid, duration_ms: f64, target_device_id: &str) {
        {
            let mut active = self.inner.active.lock().unwrap();
            let Some(timeline) = active.get_mut(&tracking_id) else {
                return;
            };
            timeline.action_ms = Some(duration_ms);
            timeline.target_device_id = Some(target_device_id.to_string());
            timeline.waiting_since = Some(Instant::now());
        }

        self.inner
            .waiting
            .lock()
            .unwrap()
            .entry(target_device_id.to_string())
            .or_default()
            .push_back(tracking_id);

        let inner = Arc::clone(&self.inner);
        let target = target_device_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(RESPONSE_TIMEOUT).await;
            inner.expire(tracking_id, &target);
        });
    }

    /// Resolves the oldest timeline waiting for this device.
    pub fn record_target_device_response(&self, device_id: &str) {
        let tracking_id = {
            let mut waiting = self.inner.waiting.lock().unwrap();
            let Some(queue) = waiting.get_mut(device_id) else {
                return;
            };
            let id = queue.pop_front();
            if queue.is_empty() {
                waiting.remove(device_id);
            }
            id
        };

        let Some(tracking_id) = tracking_id else {
            return;
        };

        let Some(timeline) = self.inner.active.lock().unwrap().remove(&tracking_id) else {
            return;
        };

        let response_ms = timeline
            .waiting_since
            .map(|since| since.elapsed().as_secs_f64() * 1000.0);

        self.inner.complete(timeline, response_ms, false);
    }

    pub fn completed_timelines(&self) -> Vec<PipelineTimeline> {
        self.inner.completed.lock().unwrap().iter().cloned().collect()
    }
}

impl TrackerInner {
    fn expire(&self, tracking_id: Uuid, target_device_id: &str) {
        let Some(timeline) = self.active.lock().unwrap().remove(&tracking_id) else {
            return; //already resolved
        };

        let mut waiting = self.waiting.lock().unwrap();
        if let Some(queue) = waiting.get_mut(target_device_id) {
            queue.retain(|id| *id != tracking_id);
            if queue.is_empty() {
                waiting.remove(target_device_id);
            }
        }
        drop(waiting);

        tracing::debug!(
            device_id = %target_device_id,
            "No state echo from target device within {:?}, closing timeline as timed out",
            RESPONSE_TIMEOUT
        );

        self.complete(timeline, None, true);
    }

    fn complete(&self, timeline: ActiveTimeline, response_ms: Option<f64>, timed_out: bool) {
        let mut stages = vec![
            stage("Parse", StageCategory::Signal, timeline.snapshot.parse_ms),
            stage("Database", StageCategory::Db, timeline.snapshot.db_ms),
            stage("Broadcast", StageCategory::Broadcast, timeline.snapshot.broadcast_ms),
        ];

        if let Some(lookup_ms) = timeline.lookup_ms {
            stages.push(stage("RuleLookup", StageCategory::Automation, lookup_ms));
        }
        if let Some(action_ms) = timeline.action_ms {
            stages.push(stage("ActionExec", StageCategory::Mqtt, action_ms));
        }
        if let Some(response_ms) = response_ms {
            stages.push(stage("ZigbeeRoundTrip", StageCategory::Zigbee, response_ms));
        }

        let completed = PipelineTimeline {
            id: Uuid::new_v4(),
            trigger_device_id: timeline.trigger_device_id,
            rule_name: timeline.rule_name,
            target_device_id: timeline.target_device_id,
            started_at: timeline.started_at,
            total_ms: stages.iter().map(|s| s.duration_ms).sum(),
            timed_out,
            stages,
        };

        let mut ring = self.completed.lock().unwrap();
        if ring.len() >= COMPLETED_RING_SIZE {
            ring.pop_front();
        }
        ring.push_back(completed.clone());
        drop(ring);

        self.broadcaster.pipeline_timeline(&completed);
    }
}

fn stage(name: &str, category: StageCategory, duration_ms: f64) -> TimelineStage {
    TimelineStage {
        name: name.to_string(),
        category,
        duration_ms,
    }
}
