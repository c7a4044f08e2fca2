// devices/mod.rs
mod store;

pub use store::DeviceStore;
