use thiserror::Error;

#[derive(Error, Debug)]
pub enum SharedError {
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid identifier: {0}")]
    InvalidId(String),
}
