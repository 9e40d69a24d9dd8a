//! Domain models and request/response DTOs.

pub mod app;
pub mod batch;
pub mod device;
pub mod file;
pub mod group;
pub mod stream;

pub use app::{App, AppType};
pub use batch::{BatchAccepted, TaskResult, TaskResultStatus, TaskSnapshot, TaskStatus};
pub use device::{Device, DeviceStatus};
pub use file::StoredFile;
pub use group::Group;
