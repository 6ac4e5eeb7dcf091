//! Dashboard widget sync: time windows, series merging and optimistic
//! collection sync against the dashboard REST service.

pub mod api;
pub mod config;
pub mod error;
pub mod series;
pub mod sync;
pub mod types;
pub mod window;

pub use error::{DashError, ErrorPayload};
