//! App repository for database operations.

use chrono::Utc;
use sqlx::SqlitePool;

use crate::entities::AppEntity;

/// Repository for app-related database operations.
#[derive(Clone)]
pub struct AppRepository {
    pool: SqlitePool,
}

impl AppRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<AppEntity>, sqlx::Error> {
        sqlx::query_as::<_, AppEntity>(
            r#"
            SELECT id, name, package_name, version, size, app_type, apk_path,
                   created_at, updated_at
            FROM apps
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Probe used to reject duplicate uploads of the same package+version.
    pub async fn find_by_package_version(
        &self,
        package_name: &str,
        version: &str,
    ) -> Result<Option<AppEntity>, sqlx::Error> {
        sqlx::query_as::<_, AppEntity>(
            r#"
            SELECT id, name, package_name, version, size, app_type, apk_path,
                   created_at, updated_at
            FROM apps
            WHERE package_name = ? AND version = ?
            "#,
        )
        .bind(package_name)
        .bind(version)
        .fetch_optional(&self.pool)
        .await
    }

    /// Paginated listing with optional app-type filter and keyword over both
    /// the display name and the package name.
    pub async fn list(
        &self,
        page: u32,
        page_size: u32,
        app_type: Option<&str>,
        keyword: Option<&str>,
    ) -> Result<(Vec<AppEntity>, i64), sqlx::Error> {
        let pattern = keyword.map(|k| format!("%{k}%"));
        let offset = i64::from(page.saturating_sub(1)) * i64::from(page_size);

        let rows = sqlx::query_as::<_, AppEntity>(
            r#"
            SELECT id, name, package_name, version, size, app_type, apk_path,
                   created_at, updated_at
            FROM apps
            WHERE (? IS NULL OR app_type = ?)
              AND (? IS NULL OR name LIKE ? OR package_name LIKE ?)
            ORDER BY id DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(app_type)
        .bind(app_type)
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
            FROM apps
            WHERE (? IS NULL OR app_type = ?)
              AND (? IS NULL OR name LIKE ? OR package_name LIKE ?)
            "#,
        )
        .bind(app_type)
        .bind(app_type)
        .bind(&pattern)
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
        package_name: &str,
        version: &str,
        size: i64,
        app_type: &str,
        apk_path: &str,
    ) -> Result<AppEntity, sqlx::Error> {
        let now = Utc::now();
        sqlx::query_as::<_, AppEntity>(
            r#"
            INSERT INTO apps (name, package_name, version, size, app_type, apk_path,
                              created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id, name, package_name, version, size, app_type, apk_path,
                      created_at, updated_at
            "#,
        )
        .bind(name)
        .bind(package_name)
        .bind(version)
        .bind(size)
        .bind(app_type)
        .bind(apk_path)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
    }

    pub async fn delete(&self, id: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM apps WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
