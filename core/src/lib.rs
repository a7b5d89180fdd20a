pub mod agent;
pub mod backend;
pub mod config;
pub mod providers;
pub mod traits;

pub use agent::{Agent, default_agent};
pub use backend::ProviderBackend;
pub use config::*;
pub use providers::*;
pub use traits::*;
