pub mod clock;
pub mod engine;
pub mod error;
pub mod events;
pub mod handlers;
pub mod models;
pub mod router;
pub mod services;
pub mod store;

pub use engine::SchedulingEngine;
pub use error::{ErrorKind, SchedulingError, StoreError};
pub use handlers::SchedulingState;
