//! slotgrid core types shared by every other crate in the workspace.

pub mod config;
pub mod error;
pub mod limit;
pub mod resource;
pub mod types;

pub use config::SlotgridConfig;
pub use error::{CoreError, CoreResult};
pub use limit::Limit;
pub use resource::ResourceSlot;
pub use types::*;
