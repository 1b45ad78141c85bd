use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchemaTreeError {
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Root collection not found: {id}")]
    RootNotFound { id: String },

    #[error("Collection not found: {path}")]
    CollectionNotFound { path: String },

    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, SchemaTreeError>;
