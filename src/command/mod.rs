// Command surface consumed from the platform message bus
pub mod dispatch;
pub mod types;

pub use dispatch::CommandDispatcher;
pub use types::{AgentRequest, AgentResponse};
