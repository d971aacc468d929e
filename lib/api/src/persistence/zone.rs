use sqlx::Row as _;
use sqlx::sqlite::SqliteRow;

use crate::zone::{NewZone, Zone, ZoneDeleteMode};
use crate::{Error, Result};

fn zone_from_row(row: &SqliteRow) -> Result<Zone> {
    Ok(Zone {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        parent_zone_id: row.try_get("parent_zone_id")?,
        icon: row.try_get("icon")?,
        color: row.try_get("color")?,
        sort_order: row.try_get("sort_order")?,
    })
}

// Zone tree
impl super::Database {
    pub async fn add_zone(&self, zone: NewZone) -> Result<Zone> {
        if let Some(parent_id) = zone.parent_zone_id {
            // Parent must exist; a fresh zone can never close a cycle.
            self.get_zone(parent_id).await?.ok_or(Error::NotFound)?;
        }

        let row = sqlx::query(
            "INSERT INTO zones (name, parent_zone_id, icon, color, sort_order)
             VALUES (?, ?, ?, ?, ?)
             RETURNING *",
        )
        .bind(&zone.name)
        .bind(zone.parent_zone_id)
        .bind(&zone.icon)
        .bind(&zone.color)
        .bind(zone.sort_order)
        .fetch_one(&self.pool)
        .await?;

        zone_from_row(&row)
    }

    pub async fn update_zone(&self, zone: &Zone) -> Result<()> {
        if let Some(parent_id) = zone.parent_zone_id {
            self.ensure_no_cycle(zone.id, parent_id).await?;
        }

        let result = sqlx::query(
            "UPDATE zones SET name = ?, parent_zone_id = ?, icon = ?, color = ?, sort_order = ? WHERE id = ?",
        )
        .bind(&zone.name)
        .bind(zone.parent_zone_id)
        .bind(&zone.icon)
        .bind(&zone.color)
        .bind(zone.sort_order)
        .bind(zone.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound);
        }

        Ok(())
    }

    pub async fn delete_zone(&self, id: i64, mode: ZoneDeleteMode) -> Result<()> {
        let zone = self.get_zone(id).await?.ok_or(Error::NotFound)?;

        let new_parent = match mode {
            ZoneDeleteMode::ReparentToGrandparent => zone.parent_zone_id,
            ZoneDeleteMode::PromoteToRoot => None,
        };

        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE zones SET parent_zone_id = ? WHERE parent_zone_id = ?")
            .bind(new_parent)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("UPDATE devices SET zone_id = NULL WHERE zone_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM zones WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn get_zone(&self, id: i64) -> Result<Option<Zone>> {
        let row = sqlx::query("SELECT * FROM zones WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(zone_from_row).transpose()
    }

    pub async fn all_zones(&self) -> Result<Vec<Zone>> {
        let rows = sqlx::query("SELECT * FROM zones ORDER BY sort_order, name")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(zone_from_row).collect()
    }

    /// Walk up from `candidate_parent`; hitting `zone_id` means the new
    /// parent is a descendant and the move would close a cycle.
    async fn ensure_no_cycle(&self, zone_id: i64, candidate_parent: i64) -> Result<()> {
        if zone_id == candidate_parent {
            return Err(Error::ZoneCycle(zone_id));
        }

        let mut cursor = Some(candidate_parent);
        while let Some(current) = cursor {
            let zone = self.get_zone(current).await?.ok_or(Error::NotFound)?;
            match zone.parent_zone_id {
                Some(parent) if parent == zone_id => return Err(Error::ZoneCycle(zone_id)),
                next => cursor = next,
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::Database;

    use super::*;

    async fn zone_named(db: &Database, name: &str, parent: Option<i64>) -> Zone {
        db.add_zone(NewZone {
            name: name.to_string(),
            parent_zone_id: parent,
            ..NewZone::default()
        })
        .await
        .unwrap()
    }

    #[sqlx::test]
    async fn zone_roundtrip_and_tree(pool: sqlx::SqlitePool) {
        let db = Database::new(pool);
        db.migrate().await.unwrap();

        let ground = zone_named(&db, "Ground floor", None).await;
        let kitchen = zone_named(&db, "Kitchen", Some(ground.id)).await;

        let loaded = db.get_zone(kitchen.id).await.unwrap().unwrap();
        assert_eq!(loaded.parent_zone_id, Some(ground.id));
        assert_eq!(db.all_zones().await.unwrap().len(), 2);
    }

    #[sqlx::test]
    async fn zone_cannot_become_its_own_ancestor(pool: sqlx::SqlitePool) {
        let db = Database::new(pool);
        db.migrate().await.unwrap();

        let root = zone_named(&db, "Root", None).await;
        let child = zone_named(&db, "Child", Some(root.id)).await;
        let grandchild = zone_named(&db, "Grandchild", Some(child.id)).await;

        let mut moved = db.get_zone(root.id).await.unwrap().unwrap();
        moved.parent_zone_id = Some(grandchild.id);

        assert!(matches!(db.update_zone(&moved).await, Err(Error::ZoneCycle(_))));

        let mut selfish = db.get_zone(child.id).await.unwrap().unwrap();
        selfish.parent_zone_id = Some(child.id);
        assert!(matches!(db.update_zone(&selfish).await, Err(Error::ZoneCycle(_))));
    }

    #[sqlx::test]
    async fn delete_reparents_children_to_grandparent(pool: sqlx::SqlitePool) {
        let db = Database::new(pool);
        db.migrate().await.unwrap();

        let root = zone_named(&db, "Root", None).await;
        let middle = zone_named(&db, "Middle", Some(root.id)).await;
        let leaf = zone_named(&db, "Leaf", Some(middle.id)).await;

        db.delete_zone(middle.id, ZoneDeleteMode::ReparentToGrandparent).await.unwrap();

        let leaf = db.get_zone(leaf.id).await.unwrap().unwrap();
        assert_eq!(leaf.parent_zone_id, Some(root.id));
    }

    #[sqlx::test]
    async fn delete_can_promote_children_to_roots(pool: sqlx::SqlitePool) {
        let db = Database::new(pool);
        db.migrate().await.unwrap();

        let root = zone_named(&db, "Root", None).await;
        let middle = zone_named(&db, "Middle", Some(root.id)).await;
        let leaf = zone_named(&db, "Leaf", Some(middle.id)).await;

        db.delete_zone(middle.id, ZoneDeleteMode::PromoteToRoot).await.unwrap();

        let leaf = db.get_zone(leaf.id).await.unwrap().unwrap();
        assert_eq!(leaf.parent_zone_id, None);
    }
}
