pub mod database;
pub mod error;
pub mod row_helpers;
pub mod schema;
pub mod sessions;
pub mod settings;
pub mod telemetry;
pub mod turns;

pub use database::Database;
pub use error::StoreError;
pub use sessions::{SessionRepo, SessionRow};
pub use settings::SettingsRepo;
pub use telemetry::{DashboardStats, GenerationRecord, TelemetryRepo};
pub use turns::{TurnRepo, TurnRow};
