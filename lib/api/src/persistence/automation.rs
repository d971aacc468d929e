use chrono::{DateTime, Utc};
use sqlx::Row as _;
use sqlx::sqlite::SqliteRow;
use uuid::Uuid;

use crate::automation::{
    AutomationAction, AutomationCondition, AutomationRule, AutomationTrigger, ExecutionLog,
};
use crate::value::Value;
use crate::{Error, Result};

fn uuid_col(row: &SqliteRow, col: &str) -> Result<Uuid> {
    let raw: String = row.try_get(col)?;
    Ok(Uuid::parse_str(&raw)?)
}

fn opt_uuid_col(row: &SqliteRow, col: &str) -> Result<Option<Uuid>> {
    let raw: Option<String> = row.try_get(col)?;
    Ok(raw.map(|s| Uuid::parse_str(&s)).transpose()?)
}

fn value_to_db(value: &Option<Value>) -> Result<Option<String>> {
    Ok(value.as_ref().map(serde_json::to_string).transpose()?)
}

fn value_from_db(raw: Option<String>) -> Result<Option<Value>> {
    Ok(raw.as_deref().map(serde_json::from_str).transpose()?)
}

fn trigger_from_row(row: &SqliteRow) -> Result<AutomationTrigger> {
    Ok(AutomationTrigger {
        id: uuid_col(row, "id")?,
        trigger_type: row.try_get("trigger_type")?,
        device_id: row.try_get("device_id")?,
        property: row.try_get("property")?,
        operator: row.try_get("operator")?,
        value: value_from_db(row.try_get("value")?)?,
        value2: value_from_db(row.try_get("value2")?)?,
        time_expression: row.try_get("time_expression")?,
        sun_event: row.try_get("sun_event")?,
        offset_minutes: row.try_get("offset_minutes")?,
        sort_order: row.try_get("sort_order")?,
    })
}

fn condition_from_row(row: &SqliteRow) -> Result<AutomationCondition> {
    let days_of_week: String = row.try_get("days_of_week")?;
    let children: String = row.try_get("children")?;

    Ok(AutomationCondition {
        id: uuid_col(row, "id")?,
        condition_type: row.try_get("condition_type")?,
        device_id: row.try_get("device_id")?,
        property: row.try_get("property")?,
        operator: row.try_get("operator")?,
        value: value_from_db(row.try_get("value")?)?,
        value2: value_from_db(row.try_get("value2")?)?,
        time_start: row.try_get("time_start")?,
        time_end: row.try_get("time_end")?,
        days_of_week: serde_json::from_str(&days_of_week)?,
        children: serde_json::from_str(&children)?,
        sort_order: row.try_get("sort_order")?,
    })
}

fn action_from_row(row: &SqliteRow) -> Result<AutomationAction> {
    Ok(AutomationAction {
        id: uuid_col(row, "id")?,
        action_type: row.try_get("action_type")?,
        device_id: row.try_get("device_id")?,
        property: row.try_get("property")?,
        value: value_from_db(row.try_get("value")?)?,
        delay_seconds: row.try_get("delay_seconds")?,
        webhook_url: row.try_get("webhook_url")?,
        webhook_method: row.try_get("webhook_method")?,
        webhook_body: row.try_get("webhook_body")?,
        notification_title: row.try_get("notification_title")?,
        notification_message: row.try_get("notification_message")?,
        scene_id: opt_uuid_col(row, "scene_id")?,
        run_rule_id: opt_uuid_col(row, "run_rule_id")?,
        sort_order: row.try_get("sort_order")?,
    })
}

fn log_from_row(row: &SqliteRow) -> Result<ExecutionLog> {
    let trigger_source: String = row.try_get("trigger_source")?;
    let action_results: String = row.try_get("action_results")?;

    Ok(ExecutionLog {
        id: uuid_col(row, "id")?,
        rule_id: uuid_col(row, "rule_id")?,
        executed_at: row.try_get("executed_at")?,
        status: row.try_get("status")?,
        trigger_source: serde_json::from_str(&trigger_source)?,
        action_results: serde_json::from_str(&action_results)?,
        duration_ms: row.try_get("duration_ms")?,
        error_message: row.try_get("error_message")?,
    })
}

// Automation rules and their ordered children
impl super::Database {
    #[tracing::instrument(skip_all, fields(rule = %rule.name))]
    pub async fn add_rule(&self, rule: &AutomationRule) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO automation_rules
                (id, name, is_enabled, trigger_mode, condition_mode, cooldown_seconds,
                 last_triggered_at, execution_count)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(rule.id.to_string())
        .bind(&rule.name)
        .bind(rule.is_enabled)
        .bind(rule.trigger_mode)
        .bind(rule.condition_mode)
        .bind(rule.cooldown_seconds)
        .bind(rule.last_triggered_at)
        .bind(rule.execution_count)
        .execute(&mut *tx)
        .await?;

        Self::insert_children(&mut tx, rule).await?;

        tx.commit().await?;
        Ok(())
    }

    /// Replace the rule head and all of its children.
    pub async fn update_rule(&self, rule: &AutomationRule) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE automation_rules
             SET name = ?, is_enabled = ?, trigger_mode = ?, condition_mode = ?, cooldown_seconds = ?
             WHERE id = ?",
        )
        .bind(&rule.name)
        .bind(rule.is_enabled)
        .bind(rule.trigger_mode)
        .bind(rule.condition_mode)
        .bind(rule.cooldown_seconds)
        .bind(rule.id.to_string())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound);
        }

        for table in ["automation_triggers", "automation_conditions", "automation_actions"] {
            sqlx::query(&format!("DELETE FROM {table} WHERE rule_id = ?"))
                .bind(rule.id.to_string())
                .execute(&mut *tx)
                .await?;
        }

        Self::insert_children(&mut tx, rule).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn insert_children(tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>, rule: &AutomationRule) -> Result<()> {
        for trigger in &rule.triggers {
            sqlx::query(
                "INSERT INTO automation_triggers
                    (id, rule_id, trigger_type, device_id, property, operator, value, value2,
                     time_expression, sun_event, offset_minutes, sort_order)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(trigger.id.to_string())
            .bind(rule.id.to_string())
            .bind(trigger.trigger_type)
            .bind(&trigger.device_id)
            .bind(&trigger.property)
            .bind(trigger.operator)
            .bind(value_to_db(&trigger.value)?)
            .bind(value_to_db(&trigger.value2)?)
            .bind(&trigger.time_expression)
            .bind(trigger.sun_event)
            .bind(trigger.offset_minutes)
            .bind(trigger.sort_order)
            .execute(&mut **tx)
            .await?;
        }

        for condition in &rule.conditions {
            sqlx::query(
                "INSERT INTO automation_conditions
                    (id, rule_id, condition_type, device_id, property, operator, value, value2,
                     time_start, time_end, days_of_week, children, sort_order)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(condition.id.to_string())
            .bind(rule.id.to_string())
            .bind(condition.condition_type)
            .bind(&condition.device_id)
            .bind(&condition.property)
            .bind(condition.operator)
            .bind(value_to_db(&condition.value)?)
            .bind(value_to_db(&condition.value2)?)
            .bind(&condition.time_start)
            .bind(&condition.time_end)
            .bind(serde_json::to_string(&condition.days_of_week)?)
            .bind(serde_json::to_string(&condition.children)?)
            .bind(condition.sort_order)
            .execute(&mut **tx)
            .await?;
        }

        for action in &rule.actions {
            sqlx::query(
                "INSERT INTO automation_actions
                    (id, rule_id, action_type, device_id, property, value, delay_seconds,
                     webhook_url, webhook_method, webhook_body, notification_title,
                     notification_message, scene_id, run_rule_id, sort_order)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(action.id.to_string())
            .bind(rule.id.to_string())
            .bind(action.action_type)
            .bind(&action.device_id)
            .bind(&action.property)
            .bind(value_to_db(&action.value)?)
            .bind(action.delay_seconds)
            .bind(&action.webhook_url)
            .bind(&action.webhook_method)
            .bind(&action.webhook_body)
            .bind(&action.notification_title)
            .bind(&action.notification_message)
            .bind(action.scene_id.map(|id| id.to_string()))
            .bind(action.run_rule_id.map(|id| id.to_string()))
            .bind(action.sort_order)
            .execute(&mut **tx)
            .await?;
        }

        Ok(())
    }

    /// Deleting a rule cascades to triggers, conditions, actions and logs.
    pub async fn delete_rule(&self, id: Uuid) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for table in [
            "automation_triggers",
            "automation_conditions",
            "automation_actions",
            "automation_execution_logs",
        ] {
            sqlx::query(&format!("DELETE FROM {table} WHERE rule_id = ?"))
                .bind(id.to_string())
                .execute(&mut *tx)
                .await?;
        }

        let result = sqlx::query("DELETE FROM automation_rules WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound);
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn get_rule(&self, id: Uuid) -> Result<Option<AutomationRule>> {
        let row = sqlx::query("SELECT * FROM automation_rules WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(self.load_rule(&row).await?)),
            None => Ok(None),
        }
    }

    pub async fn all_rules(&self) -> Result<Vec<AutomationRule>> {
        let rows = sqlx::query("SELECT * FROM automation_rules ORDER BY name")
            .fetch_all(&self.pool)
            .await?;

        let mut rules = Vec::with_capacity(rows.len());
        for row in &rows {
            rules.push(self.load_rule(row).await?);
        }
        Ok(rules)
    }

    pub async fn enabled_rules(&self) -> Result<Vec<AutomationRule>> {
        let rows = sqlx::query("SELECT * FROM automation_rules WHERE is_enabled = 1 ORDER BY name")
            .fetch_all(&self.pool)
            .await?;

        let mut rules = Vec::with_capacity(rows.len());
        for row in &rows {
            rules.push(self.load_rule(row).await?);
        }
        Ok(rules)
    }

    async fn load_rule(&self, row: &SqliteRow) -> Result<AutomationRule> {
        let id = uuid_col(row, "id")?;

        let trigger_rows = sqlx::query("SELECT * FROM automation_triggers WHERE rule_id = ? ORDER BY sort_order")
            .bind(id.to_string())
            .fetch_all(&self.pool)
            .await?;
        let condition_rows = sqlx::query("SELECT * FROM automation_conditions WHERE rule_id = ? ORDER BY sort_order")
            .bind(id.to_string())
            .fetch_all(&self.pool)
            .await?;
        let action_rows = sqlx::query("SELECT * FROM automation_actions WHERE rule_id = ? ORDER BY sort_order")
            .bind(id.to_string())
            .fetch_all(&self.pool)
            .await?;

        Ok(AutomationRule {
            id,
            name: row.try_get("name")?,
            is_enabled: row.try_get("is_enabled")?,
            trigger_mode: row.try_get("trigger_mode")?,
            condition_mode: row.try_get("condition_mode")?,
            cooldown_seconds: row.try_get("cooldown_seconds")?,
            last_triggered_at: row.try_get("last_triggered_at")?,
            execution_count: row.try_get("execution_count")?,
            triggers: trigger_rows.iter().map(trigger_from_row).collect::<Result<_>>()?,
            conditions: condition_rows.iter().map(condition_from_row).collect::<Result<_>>()?,
            actions: action_rows.iter().map(action_from_row).collect::<Result<_>>()?,
        })
    }

    pub async fn set_rule_enabled(&self, id: Uuid, is_enabled: bool) -> Result<()> {
        let result = sqlx::query("UPDATE automation_rules SET is_enabled = ? WHERE id = ?")
            .bind(is_enabled)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound);
        }

        Ok(())
    }

    /// Bump the firing bookkeeping after actions ran.
    pub async fn mark_rule_triggered(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            "UPDATE automation_rules SET last_triggered_at = ?, execution_count = execution_count + 1 WHERE id = ?",
        )
        .bind(at)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound);
        }

        Ok(())
    }

    pub async fn add_execution_log(&self, log: &ExecutionLog) -> Result<()> {
        sqlx::query(
            "INSERT INTO automation_execution_logs
                (id, rule_id, executed_at, status, trigger_source, action_results, duration_ms, error_message)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(log.id.to_string())
        .bind(log.rule_id.to_string())
        .bind(log.executed_at)
        .bind(log.status)
        .bind(log.trigger_source.to_string())
        .bind(serde_json::to_string(&log.action_results)?)
        .bind(log.duration_ms)
        .bind(&log.error_message)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn recent_execution_logs(&self, rule_id: Uuid, limit: i64) -> Result<Vec<ExecutionLog>> {
        let rows = sqlx::query(
            "SELECT * FROM automation_execution_logs WHERE rule_id = ? ORDER BY executed_at DESC LIMIT ?",
        )
        .bind(rule_id.to_string())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(log_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use crate::Database;
    use crate::automation::{ActionType, CompareOp, ConditionType, ExecutionStatus, TriggerType};

    use super::*;

    fn motion_rule() -> AutomationRule {
        let mut rule = AutomationRule::new("Hallway motion light");
        rule.cooldown_seconds = 60;
        rule.triggers.push(AutomationTrigger::device_state(
            "hallway_motion",
            "occupancy",
            CompareOp::ChangesTo,
            Value::Bool(true),
        ));
        rule.conditions.push(AutomationCondition::time_range("18:00", "06:00"));
        rule.actions.push(AutomationAction::set_device_state(
            "hallway_light",
            "state",
            Value::String("ON".to_string()),
        ));
        rule
    }

    #[sqlx::test]
    async fn rule_roundtrip_with_children(pool: sqlx::SqlitePool) {
        let db = Database::new(pool);
        db.migrate().await.unwrap();

        let rule = motion_rule();
        db.add_rule(&rule).await.unwrap();

        let loaded = db.get_rule(rule.id).await.unwrap().unwrap();
        assert_eq!(loaded, rule);
    }

    #[sqlx::test]
    async fn nested_composite_conditions_roundtrip(pool: sqlx::SqlitePool) {
        let db = Database::new(pool);
        db.migrate().await.unwrap();

        let mut rule = AutomationRule::new("Composite");
        rule.triggers.push(AutomationTrigger::new(TriggerType::Manual));

        let mut any_of = AutomationCondition::new(ConditionType::Or);
        any_of.children.push(AutomationCondition::device_state(
            "porch_light",
            "state",
            CompareOp::Equals,
            Value::String("ON".to_string()),
        ));
        any_of.children.push(AutomationCondition::days_of_week(&[6, 7]));
        rule.conditions.push(any_of);
        rule.actions.push(AutomationAction::new(ActionType::Notification));

        db.add_rule(&rule).await.unwrap();

        let loaded = db.get_rule(rule.id).await.unwrap().unwrap();
        assert_eq!(loaded.conditions[0].children.len(), 2);
        assert_eq!(loaded, rule);
    }

    #[sqlx::test]
    async fn update_replaces_children(pool: sqlx::SqlitePool) {
        let db = Database::new(pool);
        db.migrate().await.unwrap();

        let mut rule = motion_rule();
        db.add_rule(&rule).await.unwrap();

        rule.actions.clear();
        rule.actions.push(AutomationAction::toggle_device("hallway_light", "state"));
        rule.name = "Hallway toggle".to_string();
        db.update_rule(&rule).await.unwrap();

        let loaded = db.get_rule(rule.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "Hallway toggle");
        assert_eq!(loaded.actions.len(), 1);
        assert_eq!(loaded.actions[0].action_type, ActionType::ToggleDevice);
    }

    #[sqlx::test]
    async fn delete_cascades_to_children_and_logs(pool: sqlx::SqlitePool) {
        let db = Database::new(pool);
        db.migrate().await.unwrap();

        let rule = motion_rule();
        db.add_rule(&rule).await.unwrap();

        let log = ExecutionLog {
            id: Uuid::new_v4(),
            rule_id: rule.id,
            executed_at: "2026-03-01T07:00:00Z".parse().unwrap(),
            status: ExecutionStatus::Success,
            trigger_source: serde_json::json!({"device_id": "hallway_motion"}),
            action_results: vec![],
            duration_ms: 12,
            error_message: None,
        };
        db.add_execution_log(&log).await.unwrap();

        db.delete_rule(rule.id).await.unwrap();

        assert!(db.get_rule(rule.id).await.unwrap().is_none());
        assert!(db.recent_execution_logs(rule.id, 10).await.unwrap().is_empty());
    }

    #[sqlx::test]
    async fn enabled_rules_skips_disabled(pool: sqlx::SqlitePool) {
        let db = Database::new(pool);
        db.migrate().await.unwrap();

        let rule = motion_rule();
        db.add_rule(&rule).await.unwrap();
        db.set_rule_enabled(rule.id, false).await.unwrap();

        assert!(db.enabled_rules().await.unwrap().is_empty());
        assert_eq!(db.all_rules().await.unwrap().len(), 1);
    }

    #[sqlx::test]
    async fn mark_triggered_bumps_bookkeeping(pool: sqlx::SqlitePool) {
        let db = Database::new(pool);
        db.migrate().await.unwrap();

        let rule = motion_rule();
        db.add_rule(&rule).await.unwrap();

        let at: DateTime<Utc> = "2026-03-01T07:00:00Z".parse().unwrap();
        db.mark_rule_triggered(rule.id, at).await.unwrap();
        db.mark_rule_triggered(rule.id, at).await.unwrap();

        let loaded = db.get_rule(rule.id).await.unwrap().unwrap();
        assert_eq!(loaded.execution_count, 2);
        assert_eq!(loaded.last_triggered_at, Some(at));
    }

    #[sqlx::test]
    async fn execution_log_roundtrip(pool: sqlx::SqlitePool) {
        let db = Database::new(pool);
        db.migrate().await.unwrap();

        let rule = motion_rule();
        db.add_rule(&rule).await.unwrap();

        let log = ExecutionLog {
            id: Uuid::new_v4(),
            rule_id: rule.id,
            executed_at: "2026-03-01T07:00:00Z".parse().unwrap(),
            status: ExecutionStatus::PartialFailure,
            trigger_source: serde_json::json!({"device_id": "hallway_motion", "property": "occupancy"}),
            action_results: vec![crate::automation::ActionResult {
                action_id: rule.actions[0].id,
                success: false,
                error: Some("publish failed".to_string()),
                duration_ms: 31,
            }],
            duration_ms: 45,
            error_message: Some("1 of 1 actions failed".to_string()),
        };
        db.add_execution_log(&log).await.unwrap();

        let logs = db.recent_execution_logs(rule.id, 5).await.unwrap();
        assert_eq!(logs, vec![log]);
    }
}
