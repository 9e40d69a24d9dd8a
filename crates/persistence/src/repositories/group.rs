//! Group repository for database operations.

use chrono::Utc;
use sqlx::SqlitePool;

use crate::entities::GroupEntity;

/// Repository for group-related database operations.
#[derive(Clone)]
pub struct GroupRepository {
    pool: SqlitePool,
}

impl GroupRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<GroupEntity>, sqlx::Error> {
        sqlx::query_as::<_, GroupEntity>(
            r#"
            SELECT id, name, description, created_at, updated_at
            FROM groups
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn list(&self) -> Result<Vec<GroupEntity>, sqlx::Error> {
        sqlx::query_as::<_, GroupEntity>(
            r#"
            SELECT id, name, description, created_at, updated_at
            FROM groups
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
    }

    pub async fn create(&self, name: &str, description: &str) -> Result<GroupEntity, sqlx::Error> {
        let now = Utc::now();
        sqlx::query_as::<_, GroupEntity>(
            r#"
            INSERT INTO groups (name, description, created_at, updated_at)
            VALUES (?, ?, ?, ?)
            RETURNING id, name, description, created_at, updated_at
            "#,
        )
        .bind(name)
        .bind(description)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
    }

    pub async fn update(
        &self,
        id: i64,
        name: Option<&str>,
        description: Option<&str>,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE groups
            SET name = COALESCE(?, name),
                description = COALESCE(?, description),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(name)
        .bind(description)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn delete(&self, id: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM groups WHERE id = ?")
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
    async fn crud_round_trip() {
        let repo = GroupRepository::new(create_test_pool().await);

        let group = repo.create("rack-1", "first rack").await.unwrap();
        assert!(group.id > 0);

        let listed = repo.list().await.unwrap();
        assert_eq!(listed.len(), 1);

        repo.update(group.id, None, Some("updated")).await.unwrap();
        let found = repo.find_by_id(group.id).await.unwrap().unwrap();
        assert_eq!(found.name, "rack-1");
        assert_eq!(found.description, "updated");

        assert_eq!(repo.delete(group.id).await.unwrap(), 1);
        assert!(repo.find_by_id(group.id).await.unwrap().is_none());
    }
}
