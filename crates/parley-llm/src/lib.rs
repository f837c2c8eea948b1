pub mod provider;
pub mod registry;
pub mod sse;

pub mod mock;

pub use provider::OpenAiCompatProvider;
pub use registry::{ProviderConfig, ProviderRegistry};
