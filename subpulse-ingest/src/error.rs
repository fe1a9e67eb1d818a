use thiserror::Error;

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Feed returned {code}: {body}")]
    Status { code: u16, body: String },

    #[error("Invalid feed response: {0}")]
    Decode(String),
}
