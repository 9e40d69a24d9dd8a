//! Device entity (database row mapping).

use chrono::{DateTime, Utc};
use domain::models::device::{Device, DeviceStatus};
use sqlx::FromRow;

/// Database row mapping for the devices table.
#[derive(Debug, Clone, FromRow)]
pub struct DeviceEntity {
    pub id: i64,
    pub name: String,
    pub device_id: String,
    pub group_id: i64,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<DeviceEntity> for Device {
    fn from(entity: DeviceEntity) -> Self {
        Self {
            id: entity.id,
            name: entity.name,
            device_id: entity.device_id,
            group_id: entity.group_id,
            status: DeviceStatus::from_db(&entity.status),
            created_at: entity.created_at,
            updated_at: entity.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_to_domain_model() {
        let now = Utc::now();
        let entity = DeviceEntity {
            id: 7,
            name: "Rack phone".to_string(),
            device_id: "10.0.0.5:5555".to_string(),
            group_id: 2,
            status: "online".to_string(),
            created_at: now,
            updated_at: now,
        };

        let device: Device = entity.into();
        assert_eq!(device.id, 7);
        assert_eq!(device.device_id, "10.0.0.5:5555");
        assert_eq!(device.status, DeviceStatus::Online);
    }

    #[test]
    fn unknown_status_reads_as_offline() {
        let now = Utc::now();
        let entity = DeviceEntity {
            id: 1,
            name: "x".to_string(),
            device_id: "a".to_string(),
            group_id: 0,
            status: "weird".to_string(),
            created_at: now,
            updated_at: now,
        };
        let device: Device = entity.into();
        assert_eq!(device.status, DeviceStatus::Offline);
    }
}
