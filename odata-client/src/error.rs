use odata_batch::BatchError;

pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("service answered {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed batch response: {0}")]
    Batch(#[from] BatchError),

    #[error("response is missing a Content-Type header")]
    MissingContentType,

    #[error("invalid client configuration: {0}")]
    Config(String),
}
