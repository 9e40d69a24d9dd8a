//! Database row mappings.

pub mod app;
pub mod device;
pub mod file;
pub mod group;

pub use app::AppEntity;
pub use device::DeviceEntity;
pub use file::FileEntity;
pub use group::GroupEntity;
