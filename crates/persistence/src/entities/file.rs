//! File entity (database row mapping).

use chrono::{DateTime, Utc};
use domain::models::StoredFile;
use sqlx::FromRow;

/// Database row mapping for the files table.
#[derive(Debug, Clone, FromRow)]
pub struct FileEntity {
    pub id: i64,
    pub name: String,
    pub original_name: String,
    pub file_type: String,
    pub file_size: i64,
    pub file_path: String,
    pub mime_type: String,
    pub md5: String,
    pub status: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<FileEntity> for StoredFile {
    fn from(entity: FileEntity) -> Self {
        Self {
            id: entity.id,
            name: entity.name,
            original_name: entity.original_name,
            file_type: entity.file_type,
            file_size: entity.file_size,
            file_path: entity.file_path,
            mime_type: entity.mime_type,
            md5: entity.md5,
            status: entity.status,
            created_at: entity.created_at,
            updated_at: entity.updated_at,
        }
    }
}
