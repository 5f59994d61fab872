//! Handlers 模块

pub mod channels;
pub mod health;
pub mod metrics;
pub mod points;

pub use channels::*;
pub use health::*;
pub use metrics::*;
pub use points::*;
