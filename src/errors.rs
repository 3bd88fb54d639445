use miette::Diagnostic;
use thiserror::Error;

use crate::engine::EngineError;

#[derive(Debug, Error, Diagnostic)]
pub enum PalisadeError {
    #[error("I/O error: {0}")]
    #[diagnostic(code(palisade::io))]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    #[diagnostic(code(palisade::config))]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    #[diagnostic(code(palisade::serde))]
    Serde(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    #[diagnostic(code(palisade::db))]
    Db(#[from] sea_orm::DbErr),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Engine(#[from] EngineError),

    #[error("{0}")]
    #[diagnostic(code(palisade::other))]
    Other(String),
}
