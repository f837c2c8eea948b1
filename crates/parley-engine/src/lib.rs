pub mod assembler;
pub mod error;
pub mod lifecycle;
pub mod persistence;
pub mod rate_limiter;
pub mod reasoning;
pub mod runner;
pub mod speech;
pub mod title;
pub mod validation;

pub use error::EngineError;
pub use lifecycle::Lifecycle;
pub use rate_limiter::{RateLimitConfig, RateLimiter};
pub use runner::{GenerationOutcome, GenerationRequest, GenerationRunner, RunnerConfig};
pub use speech::{PiperSynthesizer, SpeechError, SpeechSynthesizer};
pub use validation::ValidationError;
