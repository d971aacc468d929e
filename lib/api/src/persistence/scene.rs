use sqlx::Row as _;
use sqlx::sqlite::SqliteRow;
use uuid::Uuid;

use crate::Result;
use crate::scene::Scene;

fn scene_from_row(row: &SqliteRow) -> Result<Scene> {
    let id: String = row.try_get("id")?;
    let device_states: String = row.try_get("device_states")?;

    Ok(Scene {
        id: Uuid::parse_str(&id)?,
        name: row.try_get("name")?,
        device_states: serde_json::from_str(&device_states)?,
    })
}

// Scenes
impl super::Database {
    pub async fn upsert_scene(&self, scene: &Scene) -> Result<()> {
        sqlx::query(
            "INSERT INTO scenes (id, name, device_states) VALUES (?, ?, ?)
             ON CONFLICT (id) DO UPDATE SET name = excluded.name, device_states = excluded.device_states",
        )
        .bind(scene.id.to_string())
        .bind(&scene.name)
        .bind(serde_json::to_string(&scene.device_states)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_scene(&self, id: Uuid) -> Result<Option<Scene>> {
        let row = sqlx::query("SELECT * FROM scenes WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(scene_from_row).transpose()
    }

    pub async fn all_scenes(&self) -> Result<Vec<Scene>> {
        let rows = sqlx::query("SELECT * FROM scenes ORDER BY name").fetch_all(&self.pool).await?;

        rows.iter().map(scene_from_row).collect()
    }

    pub async fn delete_scene(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM scenes WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::Database;
    use crate::value::Value;

    use super::*;

    #[sqlx::test]
    async fn scene_roundtrip(pool: sqlx::SqlitePool) {
        let db = Database::new(pool);
        db.migrate().await.unwrap();

        let scene = Scene::new("Morning")
            .with_device_state("kitchen_light", "state", Value::String("ON".to_string()))
            .with_device_state("kitchen_light", "brightness", Value::Number(200.0))
            .with_device_state("blinds", "position", Value::Number(100.0));

        db.upsert_scene(&scene).await.unwrap();

        let loaded = db.get_scene(scene.id).await.unwrap().unwrap();
        assert_eq!(loaded, scene);

        db.delete_scene(scene.id).await.unwrap();
        assert!(db.get_scene(scene.id).await.unwrap().is_none());
    }
}
