use thiserror::Error;

use super::config::ConfigError;
use crate::core::batch::ShapeError;

#[derive(Debug, Error)]
pub enum DiffusionError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Shape error: {source}")]
    Shape {
        #[from]
        source: ShapeError,
    },

    #[error("Configuration error: {source}")]
    Config {
        #[from]
        source: ConfigError,
    },

    #[error("Operation requires {factor} diffusion, which is disabled")]
    FactorDisabled { factor: &'static str },

    #[error("Score model failed at t = {t}: {message}")]
    ScoreModel { t: f64, message: String },
}
