//! File repository for database operations.

use chrono::Utc;
use sqlx::SqlitePool;

use crate::entities::FileEntity;

/// Repository for stored-file database operations.
#[derive(Clone)]
pub struct FileRepository {
    pool: SqlitePool,
}

impl FileRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<FileEntity>, sqlx::Error> {
        sqlx::query_as::<_, FileEntity>(
            r#"
            SELECT id, name, original_name, file_type, file_size, file_path,
                   mime_type, md5, status, created_at, updated_at
            FROM files
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Content-identity lookup: an active row with the same MD5 means the
    /// bytes are already stored.
    pub async fn find_active_by_md5(&self, md5: &str) -> Result<Option<FileEntity>, sqlx::Error> {
        sqlx::query_as::<_, FileEntity>(
            r#"
            SELECT id, name, original_name, file_type, file_size, file_path,
                   mime_type, md5, status, created_at, updated_at
            FROM files
            WHERE md5 = ? AND status = 1
            "#,
        )
        .bind(md5)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn list(
        &self,
        page: u32,
        page_size: u32,
        original_name: Option<&str>,
    ) -> Result<(Vec<FileEntity>, i64), sqlx::Error> {
        let pattern = original_name.map(|n| format!("%{n}%"));
        let offset = i64::from(page.saturating_sub(1)) * i64::from(page_size);

        let rows = sqlx::query_as::<_, FileEntity>(
            r#"
            SELECT id, name, original_name, file_type, file_size, file_path,
                   mime_type, md5, status, created_at, updated_at
            FROM files
            WHERE status = 1 AND (? IS NULL OR original_name LIKE ?)
            ORDER BY id DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(&pattern)
        .bind(&pattern)
        .bind(i64::from(page_size))
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let total: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM files
            WHERE status = 1 AND (? IS NULL OR original_name LIKE ?)
            "#,
        )
        .bind(&pattern)
        .bind(&pattern)
        .fetch_one(&self.pool)
        .await?;

        Ok((rows, total.0))
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        &self,
        name: &str,
        original_name: &str,
        file_type: &str,
        file_size: i64,
        file_path: &str,
        mime_type: &str,
        md5: &str,
    ) -> Result<FileEntity, sqlx::Error> {
        let now = Utc::now();
        sqlx::query_as::<_, FileEntity>(
            r#"
            INSERT INTO files (name, original_name, file_type, file_size, file_path,
                               mime_type, md5, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, 1, ?, ?)
            RETURNING id, name, original_name, file_type, file_size, file_path,
                      mime_type, md5, status, created_at, updated_at
            "#,
        )
        .bind(name)
        .bind(original_name)
        .bind(file_type)
        .bind(file_size)
        .bind(file_path)
        .bind(mime_type)
        .bind(md5)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
    }

    /// Records the name of the latest upload pointing at an existing blob.
    pub async fn update_original_name(
        &self,
        id: i64,
        original_name: &str,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE files SET original_name = ?, updated_at = ? WHERE id = ?",
        )
        .bind(original_name)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Soft delete: the row stays for audit, the status flips to 0.
    pub async fn mark_deleted(&self, id: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("UPDATE files SET status = 0, updated_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
