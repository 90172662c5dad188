//! Per-repository registry of listeners interested in updates of specific
//! entities.

pub mod error;
pub mod listener;
pub mod service;

pub use error::ListenersError;
pub use listener::{EntityListener, ListenerFailure};
pub use service::EntityListenersService;
