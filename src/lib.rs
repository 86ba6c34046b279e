//! # grpc-transcode
//!
//! An in-process transcoding proxy: clients built against a binary gRPC
//! interface transparently invoke a backend that only exposes an HTTP+JSON
//! gateway, without ever opening a network socket.
//!
//! The proxy terminates one gRPC connection over a private in-memory
//! transport, intercepts every call generically regardless of its method,
//! translates metadata and payload into a `POST` against the configured
//! base URL, and turns the response, including newline-delimited streaming
//! bodies, back into gRPC response messages. JSON-to-protobuf transcoding is
//! the gateway's responsibility; payloads pass through untouched.
//!
//! ```ignore
//! use grpc_transcode::Proxy;
//! use std::sync::Arc;
//!
//! let proxy = Arc::new(Proxy::new("http://localhost:8080/")?);
//!
//! let server = proxy.clone();
//! tokio::spawn(async move { server.serve().await });
//!
//! let mut client = proxy.new_client()?;
//! let mut response = client
//!     .call("helloworld.Greeter/SayHello", &br#"{"name":"world"}"#[..])
//!     .await?;
//! while let Some(frame) = response.message().await? {
//!     println!("{}", String::from_utf8_lossy(&frame));
//! }
//!
//! proxy.graceful_stop();
//! ```
//!
//! ## Pieces
//!
//! - [`transport`]: the single pre-connected in-memory connection pair and
//!   the single-use listener handed to the server engine.
//! - [`codec`]: the dual-mode codec: opaque frames pass through unchanged,
//!   anything else delegates to a JSON fallback.
//! - [`metadata`]: gRPC metadata to gateway header translation.
//! - [`dispatch`]: the catch-all call handler driving the HTTP exchange.
//! - [`proxy`]: the facade wiring it all together.

pub mod client;
pub mod codec;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod metadata;
pub mod proxy;
pub mod transport;

pub use client::{RawClient, RawResponse};
pub use codec::{CodecName, DecodeMode, JsonCodec, RawCodec, RawMessage};
pub use config::ProxyConfig;
pub use error::{DispatchError, ProxyError};
pub use proxy::Proxy;
