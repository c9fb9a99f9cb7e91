use thiserror::Error;

pub type Result<T> = std::result::Result<T, GuideError>;

#[derive(Error, Debug)]
pub enum GuideError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Corpus error: {0}")]
    Corpus(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("Model backend error: {0}")]
    Backend(String),

    #[error("Restaurant not found: id {id}")]
    NotFound { id: i64 },

    #[error("Restaurant not found by name: {name}")]
    RestaurantNotFound { name: String },

    #[error("Invalid arguments for tool '{tool}': {message}")]
    InvalidToolArguments { tool: String, message: String },

    #[error("Tool loop exceeded {rounds} rounds without a final answer")]
    ToolLoopExceeded { rounds: u32 },

    #[error("Search index not ready; run load_and_index first")]
    IndexNotReady,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub mod agent;
pub mod commands;
pub mod config;
pub mod corpus;
pub mod geo;
pub mod index;
pub mod search;
