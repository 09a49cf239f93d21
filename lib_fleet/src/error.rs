//! Error taxonomy for the synchronization core.
//!
//! Transport problems are recovered locally through the reconnect budget and
//! only become observer-visible once that budget is exhausted. Parse problems
//! cost one frame. Nothing in this module should ever take the process down.

use thiserror::Error;

/// All failure modes of the synchronization layer.
#[derive(Debug, Error)]
pub enum SyncError {
    /// WebSocket transport failure (refused, abrupt close, send-while-closed).
    #[error("websocket transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    /// A send was requested while no live connection exists.
    #[error("connection is not established")]
    NotConnected,

    /// The frame body was not valid JSON.
    #[error("malformed frame: {0}")]
    MalformedFrame(#[from] serde_json::Error),

    /// The frame parsed but carried no `type` discriminator.
    #[error("frame has no type discriminator")]
    MissingFrameType,

    /// The `type` discriminator named a kind we do not recognize.
    #[error("unknown frame type: {0}")]
    UnknownFrameType(String),

    /// No registration token is available yet; registration is deferred.
    #[error("registration token not yet available")]
    TokenUnavailable,

    /// The configured REST base URL did not parse.
    #[error("invalid base url: {0}")]
    InvalidBaseUrl(#[from] url::ParseError),

    /// A REST request failed at the transport/middleware level.
    #[error("http request failed: {0}")]
    Request(#[from] reqwest_middleware::Error),

    /// A REST response body could not be decoded.
    #[error("http response decode failed: {0}")]
    Decode(#[from] reqwest::Error),

    /// A REST endpoint answered with a non-success status.
    #[error("api returned status {status} for {path}")]
    ApiStatus {
        /// Numeric HTTP status code.
        status: u16,
        /// The relative path that was requested.
        path: String,
    },
}
