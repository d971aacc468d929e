//! The automation engine: matches rules against stimuli, gates on cooldown,
//! evaluates conditions against cached ambient state, runs actions in order
//! and records every attempt. Cache access happens under a single mutex and
//! never overlaps with I/O.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use api::Database;
use api::automation::{
    ActionResult, ActionType, AutomationAction, AutomationRule, ExecutionLog, ExecutionStatus, TriggerMode,
};
use api::broadcast::{AutomationLogEntry, LogLevel, LogPhase, PipelineStageSnapshot};
use api::reading::SensorReading;
use api::signal::SignalEvent;
use api::trigger_event::TriggerEvent;
use api::value::Value;
use reqwest_middleware::ClientWithMiddleware;
use uuid::Uuid;

use crate::port::{Broadcaster, CommandPort};
use crate::tracker::LatencyTracker;

use super::condition;
use super::trigger::{self, Stimulus};

const CACHE_BOOTSTRAP_LOOKBACK_HOURS: i64 = 24;
const TIME_TICK_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);

/// Ambient state the engine evaluates conditions against: last seen value
/// per device property, last reading per device metric.
#[derive(Default)]
pub struct EngineCaches {
    device_state: HashMap<String, HashMap<String, Value>>,
    sensor: HashMap<String, HashMap<String, f64>>,
}

impl EngineCaches {
    pub fn device_value(&self, device_id: &str, property: &str) -> Option<&Value> {
        self.device_state.get(device_id)?.get(property)
    }

    pub fn set_device_value(&mut self, device_id: &str, property: &str, value: Value) -> Option<Value> {
        self.device_state
            .entry(device_id.to_string())
            .or_default()
            .insert(property.to_string(), value)
    }

    fn set_sensor_value(&mut self, device_id: &str, metric: &str, value: f64) -> Option<f64> {
        self.sensor
            .entry(device_id.to_string())
            .or_default()
            .insert(metric.to_string(), value)
    }

    /// Merge the scalar fields of a payload, returning per-property
    /// `(property, old, new)` for every value that actually changed.
    fn apply_payload(
        &mut self,
        device_id: &str,
        payload: Option<&serde_json::Map<String, serde_json::Value>>,
    ) -> Vec<(String, Option<Value>, Value)> {
        let Some(payload) = payload else {
            return Vec::new();
        };

        let mut changes = Vec::new();
        for (property, raw) in payload {
            if raw.is_object() || raw.is_array() {
                continue;
            }

            let new = Value::from_json(raw);
            let old = self.set_device_value(device_id, property, new.clone());
            if old.as_ref() != Some(&new) {
                changes.push((property.clone(), old, new));
            }
        }

        changes
    }
}

pub struct AutomationEngine<C: CommandPort> {
    db: Database,
    commands: C,
    broadcaster: Arc<dyn Broadcaster>,
    tracker: LatencyTracker,
    webhooks: ClientWithMiddleware,
    default_webhook_url: Option<String>,
    caches: Mutex<EngineCaches>,
}

impl<C: CommandPort> AutomationEngine<C> {
    pub fn new(
        db: Database,
        commands: C,
        broadcaster: Arc<dyn Broadcaster>,
        tracker: LatencyTracker,
        webhooks: ClientWithMiddleware,
        default_webhook_url: Option<String>,
    ) -> Self {
        Self {
            db,
            commands,
            broadcaster,
            tracker,
            webhooks,
            default_webhook_url,
            caches: Mutex::new(EngineCaches::default()),
        }
    }

    /// Warm the caches from recently persisted signals and readings.
    pub async fn bootstrap(&self) -> anyhow::Result<()> {
        let since = support::time::now() - chrono::Duration::hours(CACHE_BOOTSTRAP_LOOKBACK_HOURS);

        let events = self.db.signal_events_since(since).await?;
        let readings = self.db.sensor_readings_since(since).await?;

        let mut caches = self.caches.lock().unwrap();
        for event in &events {
            caches.apply_payload(&event.device_id, event.payload_object());
        }
        for reading in &readings {
            caches.set_sensor_value(&reading.device_id, &reading.metric, reading.value);
        }

        tracing::info!(
            "Automation caches bootstrapped from {} signals and {} readings",
            events.len(),
            readings.len()
        );
        Ok(())
    }

    /// Full fan-out for one signal: state diffs, then the derived trigger
    /// event, then each reading, in that order.
    pub async fn process_signal(
        &self,
        event: &SignalEvent,
        trigger_event: Option<&TriggerEvent>,
        readings: &[SensorReading],
        snapshot: PipelineStageSnapshot,
    ) {
        let changes = {
            let mut caches = self.caches.lock().unwrap();
            caches.apply_payload(&event.device_id, event.payload_object())
        };

        for (property, old, new) in &changes {
            self.process_device_state_change(&event.device_id, property, old.as_ref(), new, Some(snapshot))
                .await;
        }

        if let Some(trigger_event) = trigger_event {
            self.process_trigger_event(trigger_event, Some(snapshot)).await;
        }

        for reading in readings {
            self.process_sensor_reading(reading, Some(snapshot)).await;
        }
    }

    pub async fn process_device_state_change(
        &self,
        device_id: &str,
        property: &str,
        old: Option<&Value>,
        new: &Value,
        snapshot: Option<PipelineStageSnapshot>,
    ) {
        self.caches
            .lock()
            .unwrap()
            .set_device_value(device_id, property, new.clone());

        let stimulus = Stimulus::DeviceState {
            device_id,
            property,
            old,
            new,
        };
        self.evaluate(&stimulus, snapshot).await;
    }

    pub async fn process_trigger_event(&self, event: &TriggerEvent, snapshot: Option<PipelineStageSnapshot>) {
        let stimulus = Stimulus::Trigger(event);
        self.evaluate(&stimulus, snapshot).await;
    }

    pub async fn process_sensor_reading(&self, reading: &SensorReading, snapshot: Option<PipelineStageSnapshot>) {
        let old = self
            .caches
            .lock()
            .unwrap()
            .set_sensor_value(&reading.device_id, &reading.metric, reading.value);

        let stimulus = Stimulus::Reading { reading, old };
        self.evaluate(&stimulus, snapshot).await;
    }

    /// Time triggers are checked at a ~30 s cadence.
    pub async fn run_time_loop(&self) {
        let mut interval = tokio::time::interval(TIME_TICK_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            self.process_time_tick().await;
        }
    }

    pub async fn process_time_tick(&self) {
        let stimulus = Stimulus::TimeTick {
            now: support::time::now_local(),
        };
        self.evaluate(&stimulus, None).await;
    }

    /// Operator-invoked run, bypassing trigger matching.
    pub async fn trigger_manually(&self, rule_id: Uuid) -> api::Result<()> {
        let rule = self.db.get_rule(rule_id).await?.ok_or(api::Error::NotFound)?;
        if !rule.is_enabled {
            tracing::info!(rule = %rule.name, "Skipping manual run of disabled rule");
            return Ok(());
        }

        self.fire_rule(&rule, None, serde_json::json!({"type": "manual"}), 0.0, None)
            .await;
        Ok(())
    }

    async fn evaluate(&self, stimulus: &Stimulus<'_>, snapshot: Option<PipelineStageSnapshot>) {
        let lookup_started = Instant::now();

        let rules = match self.db.enabled_rules().await {
            Ok(rules) => rules,
            Err(e) => {
                tracing::error!("Error loading rules for evaluation: {:?}", e);
                return;
            }
        };

        for rule in &rules {
            let matching: Vec<_> = rule.triggers.iter().filter(|t| trigger::matches(t, stimulus)).collect();
            if matching.is_empty() {
                continue;
            }

            let fired = match rule.trigger_mode {
                TriggerMode::Any => matching.iter().any(|t| trigger::holds(t, stimulus)),
                TriggerMode::All => matching.iter().all(|t| trigger::holds(t, stimulus)),
            };

            if !fired {
                self.live(
                    rule,
                    LogPhase::TriggerSkipped,
                    LogLevel::Debug,
                    format!("Trigger predicate not met for {}", rule.name),
                );
                continue;
            }

            self.live(
                rule,
                LogPhase::TriggerMatched,
                LogLevel::Info,
                format!("Trigger matched for {}", rule.name),
            );

            let lookup_ms = lookup_started.elapsed().as_secs_f64() * 1000.0;
            self.fire_rule(rule, stimulus.device_id(), stimulus.describe(), lookup_ms, snapshot)
                .await;
        }
    }

    async fn fire_rule(
        &self,
        rule: &AutomationRule,
        trigger_device_id: Option<&str>,
        trigger_source: serde_json::Value,
        lookup_ms: f64,
        snapshot: Option<PipelineStageSnapshot>,
    ) {
        let now = support::time::now();
        let started = Instant::now();

        if rule.in_cooldown(now) {
            self.live(
                rule,
                LogPhase::CooldownActive,
                LogLevel::Warning,
                format!("Cooldown active for {} ({}s), skipping", rule.name, rule.cooldown_seconds),
            );
            self.persist_log(rule, now, ExecutionStatus::SkippedCooldown, trigger_source, vec![], 0, None)
                .await;
            return;
        }

        if !rule.conditions.is_empty() {
            self.live(
                rule,
                LogPhase::ConditionEvaluating,
                LogLevel::Debug,
                format!("Evaluating {} condition(s)", rule.conditions.len()),
            );

            let passed = {
                let caches = self.caches.lock().unwrap();
                condition::conditions_pass(rule, &caches, support::time::now_local())
            };

            if !passed {
                self.live(
                    rule,
                    LogPhase::ConditionFailed,
                    LogLevel::Info,
                    format!("Conditions not met for {}", rule.name),
                );
                self.persist_log(
                    rule,
                    now,
                    ExecutionStatus::SkippedCondition,
                    trigger_source,
                    vec![],
                    started.elapsed().as_millis() as i64,
                    None,
                )
                .await;
                return;
            }

            self.live(rule, LogPhase::ConditionPassed, LogLevel::Debug, "Conditions met");
        }

        let tracking_id = trigger_device_id.map(|device_id| {
            let id = self
                .tracker
                .start_tracking(device_id, Some(&rule.name), snapshot.unwrap_or_default());
            self.tracker.record_rule_lookup(id, lookup_ms);
            id
        });

        let mut results: Vec<ActionResult> = Vec::with_capacity(rule.actions.len());
        let mut tracked_target = false;

        for action in &rule.actions {
            self.live(
                rule,
                LogPhase::ActionExecuting,
                LogLevel::Debug,
                format!("Executing action {}", action.action_type),
            );

            let action_started = Instant::now();
            let outcome = self.run_action(action).await;
            let action_ms = action_started.elapsed().as_secs_f64() * 1000.0;

            match outcome {
                Ok(target_device) => {
                    self.live_with_duration(
                        rule,
                        LogPhase::ActionCompleted,
                        LogLevel::Success,
                        format!("Action {} completed", action.action_type),
                        action_ms as i64,
                    );
                    results.push(ActionResult {
                        action_id: action.id,
                        success: true,
                        error: None,
                        duration_ms: action_ms as i64,
                    });

                    if let (Some(tracking_id), Some(target), false) = (tracking_id, target_device, tracked_target) {
                        self.tracker.record_action_execution(tracking_id, action_ms, &target);
                        tracked_target = true;
                    }
                }
                Err(e) => {
                    tracing::warn!(rule = %rule.name, "Action {} failed: {:?}", action.action_type, e);
                    self.live_with_duration(
                        rule,
                        LogPhase::ActionFailed,
                        LogLevel::Error,
                        format!("Action {} failed: {e:#}", action.action_type),
                        action_ms as i64,
                    );
                    results.push(ActionResult {
                        action_id: action.id,
                        success: false,
                        error: Some(format!("{e:#}")),
                        duration_ms: action_ms as i64,
                    });
                }
            }
        }

        let failed = results.iter().filter(|r| !r.success).count();
        let status = match (failed, results.len()) {
            (0, _) => ExecutionStatus::Success,
            (f, total) if f == total => ExecutionStatus::Failure,
            _ => ExecutionStatus::PartialFailure,
        };

        let duration_ms = started.elapsed().as_millis() as i64;
        let error_message = match status {
            ExecutionStatus::Success => None,
            _ => Some(format!("{} of {} actions failed", failed, results.len())),
        };

        match status {
            ExecutionStatus::Failure => self.live_with_duration(
                rule,
                LogPhase::ExecutionFailed,
                LogLevel::Error,
                format!("Execution of {} failed", rule.name),
                duration_ms,
            ),
            _ => self.live_with_duration(
                rule,
                LogPhase::ExecutionCompleted,
                LogLevel::Success,
                format!("Execution of {} completed", rule.name),
                duration_ms,
            ),
        }

        self.persist_log(rule, now, status, trigger_source, results, duration_ms, error_message)
            .await;

        if let Err(e) = self.db.mark_rule_triggered(rule.id, now).await {
            tracing::error!(rule = %rule.name, "Error updating rule bookkeeping: {:?}", e);
        }
    }

    /// Returns the target device id for device-command actions so the
    /// latency tracker can wait for the echo.
    async fn run_action(&self, action: &AutomationAction) -> anyhow::Result<Option<String>> {
        match action.action_type {
            ActionType::SetDeviceState => {
                let (device_id, property, value) = match (&action.device_id, &action.property, &action.value) {
                    (Some(d), Some(p), Some(v)) => (d, p, v),
                    _ => anyhow::bail!("set-device-state action is missing device, property or value"),
                };

                self.commands.set_device_state(device_id, property, value).await?;
                Ok(Some(device_id.clone()))
            }

            ActionType::ToggleDevice => {
                let (device_id, property) = match (&action.device_id, &action.property) {
                    (Some(d), Some(p)) => (d, p),
                    _ => anyhow::bail!("toggle action is missing device or property"),
                };

                let next = {
                    let caches = self.caches.lock().unwrap();
                    toggled_value(caches.device_value(device_id, property))
                };

                self.commands.set_device_state(device_id, property, &next).await?;
                Ok(Some(device_id.clone()))
            }

            ActionType::Delay => {
                let seconds = action.delay_seconds.unwrap_or(0).max(0) as u64;
                tokio::time::sleep(std::time::Duration::from_secs(seconds)).await;
                Ok(None)
            }

            ActionType::Webhook => {
                self.run_webhook(action).await?;
                Ok(None)
            }

            ActionType::Notification => {
                tracing::info!(
                    title = action.notification_title.as_deref().unwrap_or(""),
                    "Notification: {}",
                    action.notification_message.as_deref().unwrap_or("")
                );
                Ok(None)
            }

            ActionType::ActivateScene => {
                let scene_id = action.scene_id.ok_or_else(|| anyhow::anyhow!("scene action has no scene id"))?;
                self.activate_scene(scene_id).await?;
                Ok(None)
            }

            ActionType::RunAutomation => {
                tracing::info!(rule_id = ?action.run_rule_id, "Run-automation actions are not chained, ignoring");
                Ok(None)
            }
        }
    }

    async fn run_webhook(&self, action: &AutomationAction) -> anyhow::Result<()> {
        let url = action
            .webhook_url
            .clone()
            .or_else(|| self.default_webhook_url.clone())
            .ok_or_else(|| anyhow::anyhow!("webhook action has no URL and no default is configured"))?;

        let method = action.webhook_method.as_deref().unwrap_or("POST");
        let method = reqwest::Method::from_bytes(method.to_uppercase().as_bytes())
            .map_err(|_| anyhow::anyhow!("invalid webhook method {method:?}"))?;

        let mut request = self.webhooks.request(method, &url);
        if let Some(body) = &action.webhook_body {
            request = match serde_json::from_str::<serde_json::Value>(body) {
                Ok(json) => request.json(&json),
                Err(_) => request.body(body.clone()),
            };
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("webhook {url} returned {status}");
        }

        Ok(())
    }

    /// Every `(device, property)` pair of the scene is attempted exactly
    /// once; per-device failures do not abort the rest.
    async fn activate_scene(&self, scene_id: Uuid) -> anyhow::Result<()> {
        let scene = self
            .db
            .get_scene(scene_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("scene {scene_id} not found"))?;

        let mut failures = Vec::new();
        for (device_id, state) in &scene.device_states {
            if let Err(e) = self.commands.apply_device_state(device_id, state).await {
                tracing::warn!(scene = %scene.name, %device_id, "Scene device failed: {:?}", e);
                failures.push(device_id.clone());
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            anyhow::bail!("scene {} failed for devices: {}", scene.name, failures.join(", "))
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn persist_log(
        &self,
        rule: &AutomationRule,
        executed_at: chrono::DateTime<chrono::Utc>,
        status: ExecutionStatus,
        trigger_source: serde_json::Value,
        action_results: Vec<ActionResult>,
        duration_ms: i64,
        error_message: Option<String>,
    ) {
        let log = ExecutionLog {
            id: Uuid::new_v4(),
            rule_id: rule.id,
            executed_at,
            status,
            trigger_source,
            action_results,
            duration_ms,
            error_message,
        };

        if let Err(e) = self.db.add_execution_log(&log).await {
            tracing::error!(rule = %rule.name, "Error persisting execution log: {:?}", e);
        }
    }

    fn live(&self, rule: &AutomationRule, phase: LogPhase, level: LogLevel, message: impl Into<String>) {
        self.broadcaster
            .automation_log(&AutomationLogEntry::new(rule.id, &rule.name, phase, level, message));
    }

    fn live_with_duration(
        &self,
        rule: &AutomationRule,
        phase: LogPhase,
        level: LogLevel,
        message: impl Into<String>,
        duration_ms: i64,
    ) {
        self.broadcaster.automation_log(
            &AutomationLogEntry::new(rule.id, &rule.name, phase, level, message).with_duration_ms(duration_ms),
        );
    }
}

/// Toggle semantics: booleans negate, `"ON"`-ish strings flip to `"OFF"`
/// and back, anything unknown defaults to `"ON"`.
fn toggled_value(current: Option<&Value>) -> Value {
    match current {
        Some(Value::Bool(b)) => Value::Bool(!b),
        Some(Value::String(s)) if s.eq_ignore_ascii_case("ON") => Value::String("OFF".to_string()),
        Some(Value::String(_)) => Value::String("ON".to_string()),
        _ => Value::String("ON".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use api::automation::{AutomationCondition, AutomationTrigger, CompareOp, ConditionMode, TriggerType};
    use api::scene::Scene;
    use chrono::Datelike as _;
    use infrastructure::HttpClientConfig;

    use crate::broadcast::CollectingBroadcaster;
    use crate::command::testing::{SentCommand, SpyCommands};
    use crate::signals::mapper::SignalMapper;

    use super::*;

    struct Harness {
        engine: Arc<AutomationEngine<SpyCommands>>,
        db: Database,
        commands: SpyCommands,
        broadcaster: CollectingBroadcaster,
    }

    async fn harness(pool: sqlx::SqlitePool) -> Harness {
        let db = Database::new(pool);
        db.migrate().await.unwrap();

        let commands = SpyCommands::default();
        let broadcaster = CollectingBroadcaster::default();
        let tracker = LatencyTracker::new(Arc::new(broadcaster.clone()));

        let engine = Arc::new(AutomationEngine::new(
            db.clone(),
            commands.clone(),
            Arc::new(broadcaster.clone()),
            tracker,
            HttpClientConfig::new(None).new_tracing_client().unwrap(),
            None,
        ));

        Harness {
            engine,
            db,
            commands,
            broadcaster,
        }
    }

    fn motion_rule() -> AutomationRule {
        let mut rule = AutomationRule::new("Hallway motion light");
        rule.cooldown_seconds = 60;
        rule.triggers.push(AutomationTrigger::device_state(
            "hallway_motion",
            "occupancy",
            CompareOp::ChangesTo,
            Value::Bool(true),
        ));
        rule.actions.push(AutomationAction::set_device_state(
            "hallway_light",
            "state",
            Value::String("ON".to_string()),
        ));
        rule
    }

    async fn deliver_motion(h: &Harness, payload: &str) {
        let event = SignalMapper::new("sdhome").map("sdhome/hallway_motion", payload).unwrap();
        let projection = crate::projection::project(&event);
        h.engine
            .process_signal(
                &event,
                projection.trigger_event.as_ref(),
                &projection.readings,
                PipelineStageSnapshot::default(),
            )
            .await;
    }

    #[sqlx::test(migrations = false)]
    async fn motion_turns_on_the_light(pool: sqlx::SqlitePool) {
        let h = harness(pool).await;
        h.db.add_rule(&motion_rule()).await.unwrap();

        deliver_motion(&h, r#"{"occupancy":true,"battery":78,"linkquality":200}"#).await;

        let sent = h.commands.sent();
        assert_eq!(
            sent,
            vec![SentCommand::SetState {
                device_id: "hallway_light".to_string(),
                property: "state".to_string(),
                value: Value::String("ON".to_string()),
            }]
        );

        let rule = h.db.enabled_rules().await.unwrap().remove(0);
        assert_eq!(rule.execution_count, 1);
        assert!(rule.last_triggered_at.is_some());

        let logs = h.db.recent_execution_logs(rule.id, 10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, ExecutionStatus::Success);
        assert!(logs[0].action_results[0].success);

        let phases: Vec<LogPhase> = h.broadcaster.automation_logs().iter().map(|l| l.phase).collect();
        assert!(phases.contains(&LogPhase::TriggerMatched));
        assert!(phases.contains(&LogPhase::ActionCompleted));
        assert!(phases.contains(&LogPhase::ExecutionCompleted));
    }

    #[sqlx::test(migrations = false)]
    async fn repeat_within_cooldown_is_skipped(pool: sqlx::SqlitePool) {
        let h = harness(pool).await;
        h.db.add_rule(&motion_rule()).await.unwrap();

        deliver_motion(&h, r#"{"occupancy":true}"#).await;
        // Occupancy flips off and on again 30s later, inside the cooldown.
        deliver_motion(&h, r#"{"occupancy":false}"#).await;
        deliver_motion(&h, r#"{"occupancy":true}"#).await;

        assert_eq!(h.commands.sent().len(), 1);

        let rule = h.db.enabled_rules().await.unwrap().remove(0);
        assert_eq!(rule.execution_count, 1);

        let statuses: Vec<ExecutionStatus> = h
            .db
            .recent_execution_logs(rule.id, 10)
            .await
            .unwrap()
            .iter()
            .map(|l| l.status)
            .collect();
        assert!(statuses.contains(&ExecutionStatus::SkippedCooldown));

        let phases: Vec<LogPhase> = h.broadcaster.automation_logs().iter().map(|l| l.phase).collect();
        assert!(phases.contains(&LogPhase::CooldownActive));
    }

    #[sqlx::test(migrations = false)]
    async fn disabled_rules_never_log(pool: sqlx::SqlitePool) {
        let h = harness(pool).await;
        let rule = motion_rule();
        h.db.add_rule(&rule).await.unwrap();
        h.db.set_rule_enabled(rule.id, false).await.unwrap();

        deliver_motion(&h, r#"{"occupancy":true}"#).await;

        assert!(h.commands.sent().is_empty());
        assert!(h.db.recent_execution_logs(rule.id, 10).await.unwrap().is_empty());
    }

    #[sqlx::test(migrations = false)]
    async fn button_double_press_toggles_cached_on_to_off(pool: sqlx::SqlitePool) {
        let h = harness(pool).await;

        let mut rule = AutomationRule::new("Kitchen toggle");
        let mut t = AutomationTrigger::new(TriggerType::TriggerEvent);
        t.device_id = Some("kitchen_button".to_string());
        t.property = Some("button".to_string());
        t.value = Some(Value::String("double".to_string()));
        rule.triggers.push(t);
        rule.actions.push(AutomationAction::toggle_device("kitchen_light", "state"));
        h.db.add_rule(&rule).await.unwrap();

        // The light previously reported ON.
        let light = SignalMapper::new("sdhome").map("sdhome/kitchen_light", r#"{"state":"ON"}"#).unwrap();
        h.engine
            .process_signal(&light, None, &[], PipelineStageSnapshot::default())
            .await;
        h.commands.sent.lock().unwrap().clear();

        let event = SignalMapper::new("sdhome")
            .map("sdhome/kitchen_button", r#"{"action":"double","battery":90}"#)
            .unwrap();
        let projection = crate::projection::project(&event);
        h.engine
            .process_signal(
                &event,
                projection.trigger_event.as_ref(),
                &projection.readings,
                PipelineStageSnapshot::default(),
            )
            .await;

        assert_eq!(
            h.commands.sent(),
            vec![SentCommand::SetState {
                device_id: "kitchen_light".to_string(),
                property: "state".to_string(),
                value: Value::String("OFF".to_string()),
            }]
        );
    }

    #[sqlx::test(migrations = false)]
    async fn toggle_defaults_to_on_without_cached_value(pool: sqlx::SqlitePool) {
        let h = harness(pool).await;

        let mut rule = AutomationRule::new("Blind toggle");
        let mut t = AutomationTrigger::new(TriggerType::TriggerEvent);
        t.device_id = Some("button".to_string());
        rule.triggers.push(t);
        rule.actions.push(AutomationAction::toggle_device("lamp", "state"));
        h.db.add_rule(&rule).await.unwrap();

        let event = SignalMapper::new("sdhome").map("sdhome/button", r#"{"action":"single"}"#).unwrap();
        let projection = crate::projection::project(&event);
        h.engine
            .process_signal(&event, projection.trigger_event.as_ref(), &[], PipelineStageSnapshot::default())
            .await;

        assert_eq!(
            h.commands.sent(),
            vec![SentCommand::SetState {
                device_id: "lamp".to_string(),
                property: "state".to_string(),
                value: Value::String("ON".to_string()),
            }]
        );
    }

    #[sqlx::test(migrations = false)]
    async fn failing_action_does_not_abort_the_rest(pool: sqlx::SqlitePool) {
        let h = harness(pool).await;

        let mut rule = motion_rule();
        rule.actions.insert(
            0,
            AutomationAction::set_device_state("broken_device", "state", Value::String("ON".to_string())),
        );
        rule.actions[1].sort_order = 1;
        h.db.add_rule(&rule).await.unwrap();
        h.commands.fail_device("broken_device");

        deliver_motion(&h, r#"{"occupancy":true}"#).await;

        // The second action still ran.
        assert_eq!(h.commands.sent().len(), 1);

        let logs = h.db.recent_execution_logs(rule.id, 10).await.unwrap();
        assert_eq!(logs[0].status, ExecutionStatus::PartialFailure);
        assert_eq!(logs[0].action_results.len(), 2);
        assert!(!logs[0].action_results[0].success);
        assert!(logs[0].action_results[1].success);
        assert!(logs[0].error_message.as_deref().unwrap().contains("1 of 2"));
    }

    #[sqlx::test(migrations = false)]
    async fn condition_failure_records_skipped_condition(pool: sqlx::SqlitePool) {
        let h = harness(pool).await;

        let mut rule = motion_rule();
        rule.conditions.push(AutomationCondition::device_state(
            "porch_light",
            "state",
            CompareOp::Equals,
            Value::String("ON".to_string()),
        ));
        rule.condition_mode = ConditionMode::All;
        h.db.add_rule(&rule).await.unwrap();

        deliver_motion(&h, r#"{"occupancy":true}"#).await;

        assert!(h.commands.sent().is_empty());

        let logs = h.db.recent_execution_logs(rule.id, 10).await.unwrap();
        assert_eq!(logs[0].status, ExecutionStatus::SkippedCondition);

        // Cooldown is not consumed by a condition skip.
        let rule = h.db.get_rule(rule.id).await.unwrap().unwrap();
        assert!(rule.last_triggered_at.is_none());
        assert_eq!(rule.execution_count, 0);
    }

    #[sqlx::test(migrations = false)]
    async fn scene_activation_attempts_every_device(pool: sqlx::SqlitePool) {
        let h = harness(pool).await;

        let scene = Scene::new("Morning")
            .with_device_state("kitchen_light", "state", Value::String("ON".to_string()))
            .with_device_state("bedroom_light", "state", Value::String("ON".to_string()))
            .with_device_state("blinds", "position", Value::Number(100.0));
        h.db.upsert_scene(&scene).await.unwrap();

        let mut rule = AutomationRule::new("Morning scene");
        let mut t = AutomationTrigger::new(TriggerType::TriggerEvent);
        t.device_id = Some("bedside_button".to_string());
        rule.triggers.push(t);
        rule.actions.push(AutomationAction::activate_scene(scene.id));
        h.db.add_rule(&rule).await.unwrap();

        // One scene device fails; the others are still attempted.
        h.commands.fail_device("bedroom_light");

        let event = SignalMapper::new("sdhome")
            .map("sdhome/bedside_button", r#"{"action":"single"}"#)
            .unwrap();
        let projection = crate::projection::project(&event);
        h.engine
            .process_signal(&event, projection.trigger_event.as_ref(), &[], PipelineStageSnapshot::default())
            .await;

        let applied: Vec<String> = h
            .commands
            .sent()
            .iter()
            .filter_map(|c| match c {
                SentCommand::ApplyState { device_id, .. } => Some(device_id.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(applied, vec!["blinds".to_string(), "kitchen_light".to_string()]);

        let logs = h.db.recent_execution_logs(rule.id, 10).await.unwrap();
        assert_eq!(logs[0].status, ExecutionStatus::Failure);
    }

    #[sqlx::test(migrations = false)]
    async fn sensor_threshold_rule_fires_on_reading(pool: sqlx::SqlitePool) {
        let h = harness(pool).await;

        let mut rule = AutomationRule::new("Heat warning");
        let mut t = AutomationTrigger::new(TriggerType::SensorReading);
        t.device_id = Some("bedroom_climate".to_string());
        t.property = Some("temperature".to_string());
        t.operator = Some(CompareOp::GreaterThan);
        t.value = Some(Value::Number(25.0));
        rule.triggers.push(t);
        rule.actions.push(AutomationAction::new(ActionType::Notification));
        h.db.add_rule(&rule).await.unwrap();

        let event = SignalMapper::new("sdhome")
            .map("sdhome/bedroom_climate", r#"{"temperature":26.5,"humidity":40}"#)
            .unwrap();
        let projection = crate::projection::project(&event);
        h.engine
            .process_signal(
                &event,
                projection.trigger_event.as_ref(),
                &projection.readings,
                PipelineStageSnapshot::default(),
            )
            .await;

        let logs = h.db.recent_execution_logs(rule.id, 10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, ExecutionStatus::Success);
    }

    #[sqlx::test(migrations = false)]
    async fn time_trigger_with_weekday_condition(pool: sqlx::SqlitePool) {
        let h = harness(pool).await;

        // Pin the clock, then express the trigger in pinned local time so
        // the test is independent of the host timezone.
        let pinned: chrono::DateTime<chrono::Utc> = "2026-03-03T07:00:10Z".parse().unwrap();

        support::time::FIXED_NOW
            .scope(pinned, async {
                let local = support::time::now_local();
                let expression = local.format("%H:%M").to_string();
                let today = local.weekday().number_from_monday() as u8;
                let tomorrow = if today == 7 { 1 } else { today + 1 };

                let mut fires = AutomationRule::new("Today rule");
                fires.triggers.push(AutomationTrigger::at_time(&expression));
                fires.conditions.push(AutomationCondition::days_of_week(&[today]));
                fires
                    .actions
                    .push(AutomationAction::set_device_state("siren", "state", Value::String("ON".to_string())));
                h.db.add_rule(&fires).await.unwrap();

                let mut skips = AutomationRule::new("Tomorrow rule");
                skips.triggers.push(AutomationTrigger::at_time(&expression));
                skips.conditions.push(AutomationCondition::days_of_week(&[tomorrow]));
                skips
                    .actions
                    .push(AutomationAction::set_device_state("siren", "state", Value::String("OFF".to_string())));
                h.db.add_rule(&skips).await.unwrap();

                h.engine.process_time_tick().await;

                assert_eq!(
                    h.commands.sent(),
                    vec![SentCommand::SetState {
                        device_id: "siren".to_string(),
                        property: "state".to_string(),
                        value: Value::String("ON".to_string()),
                    }]
                );

                let skipped_logs = h.db.recent_execution_logs(skips.id, 10).await.unwrap();
                assert_eq!(skipped_logs[0].status, ExecutionStatus::SkippedCondition);
            })
            .await;
    }

    #[sqlx::test(migrations = false)]
    async fn bootstrap_warms_caches_from_recent_signals(pool: sqlx::SqlitePool) {
        let h = harness(pool).await;

        let light = SignalMapper::new("sdhome").map("sdhome/kitchen_light", r#"{"state":"ON"}"#).unwrap();
        h.db.add_signal_event(&light).await.unwrap();

        h.engine.bootstrap().await.unwrap();

        // A condition on the cached state now passes without new traffic.
        let mut rule = AutomationRule::new("Needs warm cache");
        let mut t = AutomationTrigger::new(TriggerType::TriggerEvent);
        t.device_id = Some("button".to_string());
        rule.triggers.push(t);
        rule.conditions.push(AutomationCondition::device_state(
            "kitchen_light",
            "state",
            CompareOp::Equals,
            Value::String("ON".to_string()),
        ));
        rule.actions.push(AutomationAction::new(ActionType::Notification));
        h.db.add_rule(&rule).await.unwrap();

        let event = SignalMapper::new("sdhome").map("sdhome/button", r#"{"action":"single"}"#).unwrap();
        let projection = crate::projection::project(&event);
        h.engine
            .process_signal(&event, projection.trigger_event.as_ref(), &[], PipelineStageSnapshot::default())
            .await;

        let logs = h.db.recent_execution_logs(rule.id, 10).await.unwrap();
        assert_eq!(logs[0].status, ExecutionStatus::Success);
    }

    #[sqlx::test(migrations = false)]
    async fn manual_run_bypasses_triggers(pool: sqlx::SqlitePool) {
        let h = harness(pool).await;

        let mut rule = AutomationRule::new("Manual only");
        rule.triggers.push(AutomationTrigger::new(TriggerType::Manual));
        rule.actions
            .push(AutomationAction::set_device_state("lamp", "state", Value::String("ON".to_string())));
        h.db.add_rule(&rule).await.unwrap();

        h.engine.trigger_manually(rule.id).await.unwrap();

        assert_eq!(h.commands.sent().len(), 1);
        let logs = h.db.recent_execution_logs(rule.id, 10).await.unwrap();
        assert_eq!(logs[0].status, ExecutionStatus::Success);
    }

    #[test]
    fn toggle_value_semantics() {
        assert_eq!(toggled_value(Some(&Value::Bool(true))), Value::Bool(false));
        assert_eq!(toggled_value(Some(&Value::String("on".to_string()))), Value::String("OFF".to_string()));
        assert_eq!(toggled_value(Some(&Value::String("OFF".to_string()))), Value::String("ON".to_string()));
        assert_eq!(toggled_value(None), Value::String("ON".to_string()));
    }
}
