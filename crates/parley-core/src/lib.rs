pub mod errors;
pub mod events;
pub mod ids;
pub mod messages;
pub mod profile;
pub mod provider;
pub mod state;
pub mod stream;
