//! Error taxonomy for the agent core (spec §7).
//!
//! Each variant maps to one taxonomy entry. Local-recovery cases
//! (`CalculationError`, `ParseError`, `DuplicateEntityError`) are expected
//! to be matched and handled by callers rather than bubbled up as fatal;
//! `ConfigError` is the only variant that should ever terminate the
//! process, and only at startup. `NoContentToParse`/`ProtocolV4NotEnabled`
//! are the Emitter's payload-level boundary rejections (spec §8): they
//! abort the whole payload before any per-dataset work starts.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("config error: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("entity error for {entity}: {detail}")]
    Entity { entity: String, detail: String },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("no content to parse: payload has no datasets")]
    NoContentToParse,

    #[error("protocol v4 is not enabled")]
    ProtocolV4NotEnabled,

    #[error("calculation not yet available")]
    Calculation,

    #[error("capacity exceeded: need {needed} bytes, {available} available")]
    Capacity { needed: usize, available: usize },

    #[error("entity {0} already present in this bulk cycle")]
    DuplicateEntity(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AgentError {
    pub fn transport(err: impl std::fmt::Display) -> Self {
        AgentError::Transport(err.to_string())
    }
}

pub type AgentResult<T> = Result<T, AgentError>;
