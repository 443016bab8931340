/// Core error type for the chat client.
///
/// Adapter crates map their transport errors into this type so the cache and
/// refresh logic can treat every remote failure the same way.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("api error {status} ({id}): {message}")]
    Api {
        status: u16,
        id: String,
        message: String,
    },

    #[error("external error: {0}")]
    External(String),
}

impl Error {
    /// True for `Api` errors carrying an HTTP 404.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Api { status: 404, .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
