//! Device repository for database operations.

use chrono::Utc;
use sqlx::SqlitePool;

use crate::entities::DeviceEntity;

/// Repository for device-related database operations.
#[derive(Clone)]
pub struct DeviceRepository {
    pool: SqlitePool,
}

impl DeviceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<DeviceEntity>, sqlx::Error> {
        sqlx::query_as::<_, DeviceEntity>(
            r#"
            SELECT id, name, device_id, group_id, status, created_at, updated_at
            FROM devices
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Looks a device up by its ADB address.
    pub async fn find_by_address(
        &self,
        device_id: &str,
    ) -> Result<Option<DeviceEntity>, sqlx::Error> {
        sqlx::query_as::<_, DeviceEntity>(
            r#"
            SELECT id, name, device_id, group_id, status, created_at, updated_at
            FROM devices
            WHERE device_id = ?
            "#,
        )
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn find_by_group(&self, group_id: i64) -> Result<Vec<DeviceEntity>, sqlx::Error> {
        sqlx::query_as::<_, DeviceEntity>(
            r#"
            SELECT id, name, device_id, group_id, status, created_at, updated_at
            FROM devices
            WHERE group_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn count_in_group(&self, group_id: i64) -> Result<i64, sqlx::Error> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM devices WHERE group_id = ?")
            .bind(group_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }

    /// Paginated listing with optional group and keyword filters. The keyword
    /// matches both the display name and the ADB address.
    pub async fn list(
        &self,
        page: u32,
        page_size: u32,
        group_id: Option<i64>,
        keyword: Option<&str>,
    ) -> Result<(Vec<DeviceEntity>, i64), sqlx::Error> {
        let pattern = keyword.map(|k| format!("%{k}%"));
        let offset = i64::from(page.saturating_sub(1)) * i64::from(page_size);

        let rows = sqlx::query_as::<_, DeviceEntity>(
            r#"
            SELECT id, name, device_id, group_id, status, created_at, updated_at
            FROM devices
            WHERE (? IS NULL OR group_id = ?)
              AND (? IS NULL OR name LIKE ? OR device_id LIKE ?)
            ORDER BY id DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(group_id)
        .bind(group_id)
        .bind(&pattern)
        .bind(&pattern)
        .bind(&pattern)
        .bind(i64::from(page_size))
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let total: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM devices
            WHERE (? IS NULL OR group_id = ?)
              AND (? IS NULL OR name LIKE ? OR device_id LIKE ?)
            "#,
        )
        .bind(group_id)
        .bind(group_id)
        .bind(&pattern)
        .bind(&pattern)
        .bind(&pattern)
        .fetch_one(&self.pool)
        .await?;

        Ok((rows, total.0))
    }

    pub async fn create(
        &self,
        name: &str,
        device_id: &str,
        group_id: i64,
        status: &str,
    ) -> Result<DeviceEntity, sqlx::Error> {
        let now = Utc::now();
        sqlx::query_as::<_, DeviceEntity>(
            r#"
            INSERT INTO devices (name, device_id, group_id, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING id, name, device_id, group_id, status, created_at, updated_at
            "#,
        )
        .bind(name)
        .bind(device_id)
        .bind(group_id)
        .bind(status)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
    }

    /// Updates name and/or group; untouched fields keep their value.
    pub async fn update(
        &self,
        id: i64,
        name: Option<&str>,
        group_id: Option<i64>,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE devices
            SET name = COALESCE(?, name),
                group_id = COALESCE(?, group_id),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(name)
        .bind(group_id)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn update_status(&self, device_id: &str, status: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE devices SET status = ?, updated_at = ? WHERE device_id = ?
            "#,
        )
        .bind(status)
        .bind(Utc::now())
        .bind(device_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn delete(&self, id: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM devices WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;

    #[tokio::test]
    async fn create_and_find_by_address() {
        let repo = DeviceRepository::new(create_test_pool().await);
        let created = repo
            .create("Rack phone", "10.0.0.5:5555", 2, "offline")
            .await
            .unwrap();
        assert!(created.id > 0);

        let found = repo.find_by_address("10.0.0.5:5555").await.unwrap();
        assert_eq!(found.unwrap().id, created.id);

        assert!(repo.find_by_address("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_address_is_rejected() {
        let repo = DeviceRepository::new(create_test_pool().await);
        repo.create("a", "10.0.0.5:5555", 0, "offline")
            .await
            .unwrap();
        let err = repo.create("b", "10.0.0.5:5555", 0, "offline").await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn list_filters_by_group_and_keyword() {
        let repo = DeviceRepository::new(create_test_pool().await);
        repo.create("alpha", "10.0.0.1:5555", 1, "online")
            .await
            .unwrap();
        repo.create("beta", "10.0.0.2:5555", 1, "offline")
            .await
            .unwrap();
        repo.create("gamma", "10.0.0.3:5555", 2, "offline")
            .await
            .unwrap();

        let (rows, total) = repo.list(1, 20, Some(1), None).await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(rows.len(), 2);

        let (rows, total) = repo.list(1, 20, None, Some("gam")).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(rows[0].name, "gamma");

        let (rows, total) = repo.list(1, 20, None, Some("10.0.0")).await.unwrap();
        assert_eq!(total, 3);
        assert_eq!(rows.len(), 3);
    }

    #[tokio::test]
    async fn update_keeps_unset_fields() {
        let repo = DeviceRepository::new(create_test_pool().await);
        let created = repo.create("old", "10.0.0.9:5555", 4, "offline").await.unwrap();

        let affected = repo.update(created.id, Some("new"), None).await.unwrap();
        assert_eq!(affected, 1);

        let device = repo.find_by_id(created.id).await.unwrap().unwrap();
        assert_eq!(device.name, "new");
        assert_eq!(device.group_id, 4);
    }

    #[tokio::test]
    async fn count_in_group_counts_members() {
        let repo = DeviceRepository::new(create_test_pool().await);
        assert_eq!(repo.count_in_group(9).await.unwrap(), 0);
        repo.create("a", "d1", 9, "offline").await.unwrap();
        repo.create("b", "d2", 9, "offline").await.unwrap();
        assert_eq!(repo.count_in_group(9).await.unwrap(), 2);
    }
}
