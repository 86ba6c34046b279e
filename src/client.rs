//! Generic client bound to the proxy's in-memory endpoint.
//!
//! Every call is issued with the opaque frame codec forced, so payload
//! bytes pass through the gRPC framing untouched and no per-method stubs
//! are needed on the client side either.

use bytes::Bytes;
use http::uri::PathAndQuery;
use tonic::client::Grpc;
use tonic::codec::Streaming;
use tonic::metadata::MetadataMap;
use tonic::transport::Channel;
use tonic::{Request, Status};

use crate::codec::{JsonCodec, RawCodec, RawMessage};

/// Schema-agnostic gRPC client over the in-memory connection pair.
#[derive(Debug, Clone)]
pub struct RawClient {
    inner: Grpc<Channel>,
}

impl RawClient {
    pub(crate) fn new(channel: Channel) -> Self {
        Self {
            inner: Grpc::new(channel),
        }
    }

    /// Call `method` (e.g. `"helloworld.Greeter/SayHello"`) with an opaque
    /// payload and stream back every response frame.
    pub async fn call(
        &mut self,
        method: &str,
        payload: impl Into<Bytes>,
    ) -> Result<RawResponse, Status> {
        self.call_request(method, Request::new(RawMessage::frame(payload)))
            .await
    }

    /// Like [`call`](Self::call), with caller-supplied metadata and
    /// cancellation scope on the request.
    pub async fn call_request(
        &mut self,
        method: &str,
        request: Request<RawMessage>,
    ) -> Result<RawResponse, Status> {
        self.inner
            .ready()
            .await
            .map_err(|e| Status::unknown(format!("in-memory channel not ready: {e}")))?;

        let path = method_path(method)?;
        let response = self
            .inner
            .server_streaming(request, path, RawCodec::<JsonCodec>::opaque())
            .await?;
        let (metadata, stream, _extensions) = response.into_parts();
        Ok(RawResponse {
            metadata,
            inner: stream,
        })
    }
}

fn method_path(method: &str) -> Result<PathAndQuery, Status> {
    let path = if method.starts_with('/') {
        method.to_string()
    } else {
        format!("/{method}")
    };
    PathAndQuery::try_from(path.as_str())
        .map_err(|e| Status::invalid_argument(format!("invalid method name '{method}': {e}")))
}

/// Leading metadata plus the stream of opaque response frames for one call.
pub struct RawResponse {
    metadata: MetadataMap,
    inner: Streaming<RawMessage>,
}

impl RawResponse {
    /// Metadata sent by the proxy before the first response message; for
    /// transcoded calls these are the gateway's response headers.
    pub fn metadata(&self) -> &MetadataMap {
        &self.metadata
    }

    /// Next response frame, or `None` once the call completes cleanly.
    pub async fn message(&mut self) -> Result<Option<Bytes>, Status> {
        match self.inner.message().await? {
            Some(RawMessage::Frame(payload)) => Ok(Some(payload)),
            Some(RawMessage::Typed(_)) => {
                Err(Status::internal("expected an opaque response frame"))
            }
            None => Ok(None),
        }
    }

    /// Drain the remaining frames into memory.
    pub async fn collect(mut self) -> Result<Vec<Bytes>, Status> {
        let mut frames = Vec::new();
        while let Some(frame) = self.message().await? {
            frames.push(frame);
        }
        Ok(frames)
    }
}
