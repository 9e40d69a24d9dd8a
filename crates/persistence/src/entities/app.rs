//! App entity (database row mapping).

use chrono::{DateTime, Utc};
use domain::models::app::AppType;
use domain::models::App;
use sqlx::FromRow;

/// Database row mapping for the apps table.
#[derive(Debug, Clone, FromRow)]
pub struct AppEntity {
    pub id: i64,
    pub name: String,
    pub package_name: String,
    pub version: String,
    pub size: i64,
    pub app_type: String,
    pub apk_path: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<AppEntity> for App {
    fn from(entity: AppEntity) -> Self {
        Self {
            id: entity.id,
            name: entity.name,
            package_name: entity.package_name,
            version: entity.version,
            size: entity.size,
            app_type: AppType::from_db(&entity.app_type),
            apk_path: entity.apk_path,
            created_at: entity.created_at,
            updated_at: entity.updated_at,
        }
    }
}
