pub mod client;
pub mod event_bridge;
pub mod handlers;
pub mod orchestrator;
pub mod rpc;
pub mod server;
pub mod wire;

pub use handlers::HandlerState;
pub use orchestrator::{Accepted, ChatOrchestrator, EngineOrchestrator, Rejection, SubmitParams};
pub use server::{start, ServerConfig, ServerHandle};
