//! Generic call dispatcher: every inbound RPC, whatever its method, becomes
//! one `POST` against the gateway and its response body streams back as
//! opaque frames.
//!
//! Dispatch is deliberately method-name-agnostic. The catch-all service
//! derives the target path from the request URI alone, so no per-method
//! handlers or compiled schemas exist anywhere in the proxy.

use std::convert::Infallible;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_stream::try_stream;
use futures::{Stream, StreamExt, TryStreamExt};
use http::{Request, Response};
use tokio_util::codec::{AnyDelimiterCodec, FramedRead};
use tokio_util::io::StreamReader;
use tonic::server::{Grpc, ServerStreamingService};
use tonic::{Response as TonicResponse, Status};
use tracing::{debug, warn};
use url::Url;

use crate::codec::{JsonCodec, RawCodec, RawMessage};
use crate::error::DispatchError;
use crate::metadata::{headers_to_metadata, metadata_to_headers};

/// Stream of opaque response frames produced by one call.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<RawMessage, Status>> + Send>>;

/// Shared, read-only state for dispatching calls upstream.
///
/// Cloned per call; safe to drive from any number of concurrent calls.
#[derive(Debug, Clone)]
pub struct CallDispatcher {
    http: reqwest::Client,
    base_url: Url,
}

impl CallDispatcher {
    pub fn new(http: reqwest::Client, base_url: Url) -> Self {
        Self { http, base_url }
    }

    /// Forward one call to the gateway and stream its response back.
    ///
    /// Dropping the returned future or stream (client cancellation, hard
    /// stop) aborts the in-flight HTTP exchange; the proxy adds no timeout
    /// of its own.
    async fn dispatch(
        &self,
        method: String,
        request: tonic::Request<RawMessage>,
    ) -> Result<TonicResponse<FrameStream>, Status> {
        if method.is_empty() || method == "/" {
            return Err(DispatchError::StreamAccess.into());
        }

        let (meta, _extensions, message) = request.into_parts();
        let payload = message.into_payload().ok_or_else(|| {
            Status::from(DispatchError::RequestReceive(
                "expected an opaque request frame".to_string(),
            ))
        })?;

        // The target URL is the configured base with its path replaced by
        // the fully-qualified method name.
        let mut url = self.base_url.clone();
        url.set_path(&method);

        debug!(method = %method, url = %url, request_bytes = payload.len(), "forwarding call to gateway");

        let response = self
            .http
            .post(url)
            .headers(metadata_to_headers(&meta))
            .body(payload)
            .send()
            .await
            .map_err(DispatchError::Upstream)?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            warn!(method = %method, status = status.as_u16(), "gateway rejected the call");
            return Err(DispatchError::UpstreamStatus(status.as_u16()).into());
        }

        let metadata = headers_to_metadata(response.headers())
            .map_err(DispatchError::HeaderTranslate)?;

        // The gateway emits one JSON record per line for streaming methods
        // and a single line otherwise; each line is one response message.
        let body = StreamReader::new(Box::pin(response.bytes_stream().map_err(io::Error::other)));
        let mut records = FramedRead::new(body, AnyDelimiterCodec::new(vec![b'\n'], vec![b'\n']));

        let frames = try_stream! {
            while let Some(record) = records.next().await {
                let mut record = record
                    .map_err(|e| Status::from(DispatchError::ResponseRead(e.to_string())))?;
                if record.ends_with(b"\r") {
                    record.truncate(record.len() - 1);
                }
                yield RawMessage::Frame(record);
            }
            debug!(method = %method, "gateway response stream finished");
        };

        let mut reply = TonicResponse::new(Box::pin(frames) as FrameStream);
        *reply.metadata_mut() = metadata;
        Ok(reply)
    }
}

/// One in-flight call bound to its method name.
pub(crate) struct TranscodeCall {
    dispatcher: CallDispatcher,
    method: String,
}

impl ServerStreamingService<RawMessage> for TranscodeCall {
    type Response = RawMessage;
    type ResponseStream = FrameStream;
    type Future =
        Pin<Box<dyn Future<Output = Result<TonicResponse<FrameStream>, Status>> + Send>>;

    fn call(&mut self, request: tonic::Request<RawMessage>) -> Self::Future {
        let dispatcher = self.dispatcher.clone();
        let method = std::mem::take(&mut self.method);
        Box::pin(async move { dispatcher.dispatch(method, request).await })
    }
}

/// Catch-all gRPC service: accepts any method path, reads exactly one
/// opaque request frame and streams the transcoded response back.
#[derive(Debug, Clone)]
pub struct ProxyService {
    dispatcher: CallDispatcher,
}

impl ProxyService {
    pub fn new(dispatcher: CallDispatcher) -> Self {
        Self { dispatcher }
    }
}

impl tower::Service<Request<axum::body::Body>> for ProxyService {
    type Response = Response<axum::body::Body>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request<axum::body::Body>) -> Self::Future {
        let call = TranscodeCall {
            dispatcher: self.dispatcher.clone(),
            method: request.uri().path().to_string(),
        };
        Box::pin(async move {
            let mut grpc = Grpc::new(RawCodec::<JsonCodec>::opaque());
            let response = grpc.server_streaming(call, request).await;
            Ok(response.map(axum::body::Body::new))
        })
    }
}
