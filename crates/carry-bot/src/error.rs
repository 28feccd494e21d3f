//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Core error: {0}")]
    Core(#[from] carry_core::CoreError),

    #[error("State error: {0}")]
    State(#[from] carry_state::StateError),

    #[error("Venue error: {0}")]
    Venue(#[from] carry_venues::VenueError),

    #[error("Position error: {0}")]
    Position(#[from] carry_position::PositionError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] carry_telemetry::TelemetryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;
