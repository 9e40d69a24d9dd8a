//! Repository implementations.

pub mod app;
pub mod device;
pub mod file;
pub mod group;

pub use app::AppRepository;
pub use device::DeviceRepository;
pub use file::FileRepository;
pub use group::GroupRepository;
