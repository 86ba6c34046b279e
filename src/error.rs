use thiserror::Error;
use tonic::Status;

/// Errors surfaced by the proxy lifecycle API.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The configured gateway endpoint is not a valid URL.
    #[error("invalid gateway endpoint: {0}")]
    InvalidEndpoint(#[from] url::ParseError),

    /// The outbound HTTP client could not be constructed.
    #[error("failed to build http client: {0}")]
    HttpClient(#[source] reqwest::Error),

    /// An endpoint of the single in-memory connection pair was requested a
    /// second time. The pair backs exactly one server loop and one client.
    #[error("in-memory connection pair exhausted: {0}")]
    TransportExhausted(&'static str),

    /// The channel for the bound client could not be set up.
    #[error("failed to build in-memory channel: {0}")]
    ChannelSetup(#[source] tonic::transport::Error),

    /// The gRPC server engine failed while serving the in-memory connection.
    #[error("grpc server error: {0}")]
    Serve(#[from] tonic::transport::Error),
}

/// Per-call failures inside the transcoding dispatcher.
///
/// Every variant reaches the RPC caller as a single `internal` status
/// carrying the formatted message. Nothing is retried here; retry policy
/// belongs to the caller.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The inbound call carried no method name to build the target path from.
    #[error("no rpc method name available to build the upstream path")]
    StreamAccess,

    /// Receiving the single request frame failed.
    #[error("failed to receive request frame: {0}")]
    RequestReceive(String),

    /// The HTTP request to the gateway could not be completed.
    #[error("upstream http request failed: {0}")]
    Upstream(#[from] reqwest::Error),

    /// The gateway answered with a status other than 200.
    #[error("unexpected upstream http status: {0}")]
    UpstreamStatus(u16),

    /// A gateway response header could not be sent back as call metadata.
    #[error("failed to send response headers: {0}")]
    HeaderTranslate(String),

    /// Reading the streamed response body failed mid-call.
    #[error("failed to read response body: {0}")]
    ResponseRead(String),
}

impl From<DispatchError> for Status {
    fn from(err: DispatchError) -> Self {
        Status::internal(err.to_string())
    }
}
