pub mod config;
pub mod control;
pub mod detector;
pub mod error;
pub mod hub;
pub mod listener;
pub mod models;
pub mod projector;
pub mod registry;
pub mod session;
mod ticker;
pub mod traits;

pub use config::*;
pub use control::*;
pub use error::MediaError;
pub use hub::ListenerId;
pub use listener::*;
pub use models::*;
pub use projector::PositionProjector;
pub use registry::SessionRegistry;
pub use session::*;
pub use traits::*;
