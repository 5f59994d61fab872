pub mod data;
pub mod point;

pub use data::{PointEvent, PointValueData, now_epoch_ms};
pub use point::{MonitorPoint, NEVER_DUE_MS, Transaction};
