//! The proxy facade: owns the connection pair, the gRPC server lifecycle
//! and the bound client factory.

use std::sync::Mutex;

use hyper_util::rt::TokioIo;
use tokio::io::DuplexStream;
use tokio_util::sync::CancellationToken;
use tonic::service::Routes;
use tonic::transport::{Endpoint, Server, Uri};
use tower::service_fn;
use tracing::{debug, info};
use url::Url;

use crate::client::RawClient;
use crate::codec::{CodecName, JsonCodec, RawCodec};
use crate::config::ProxyConfig;
use crate::dispatch::{CallDispatcher, ProxyService};
use crate::error::ProxyError;
use crate::transport::{SingleUseIncoming, connection_pair};

/// An in-process gRPC server that transcodes every call into an HTTP+JSON
/// request against a configured gateway.
///
/// One proxy owns exactly one in-memory connection pair: [`serve`] claims
/// the server half, [`new_client`] the client half, each exactly once.
///
/// [`serve`]: Proxy::serve
/// [`new_client`]: Proxy::new_client
pub struct Proxy {
    base_url: Url,
    http: reqwest::Client,
    client_io: Mutex<Option<DuplexStream>>,
    server_io: Mutex<Option<DuplexStream>>,
    shutdown: CancellationToken,
    abort: CancellationToken,
}

impl Proxy {
    /// Create a proxy forwarding to `endpoint` with default settings.
    pub fn new(endpoint: impl Into<String>) -> Result<Self, ProxyError> {
        Self::with_config(ProxyConfig::builder().endpoint(endpoint.into()).build())
    }

    /// Create a proxy from an explicit configuration.
    pub fn with_config(config: ProxyConfig) -> Result<Self, ProxyError> {
        let base_url = Url::parse(&config.endpoint)?;
        let http = reqwest::Client::builder()
            .build()
            .map_err(ProxyError::HttpClient)?;
        let (client_io, server_io) = connection_pair(config.buffer_size);

        info!(
            endpoint = %base_url,
            codec = %RawCodec::<JsonCodec>::opaque().name(),
            "transcoding proxy created"
        );

        Ok(Self {
            base_url,
            http,
            client_io: Mutex::new(Some(client_io)),
            server_io: Mutex::new(Some(server_io)),
            shutdown: CancellationToken::new(),
            abort: CancellationToken::new(),
        })
    }

    /// Run the gRPC server over the in-memory connection until stopped.
    ///
    /// Returns after [`graceful_stop`](Self::graceful_stop) once in-flight
    /// calls have drained, or immediately after [`stop`](Self::stop).
    pub async fn serve(&self) -> Result<(), ProxyError> {
        let io = self
            .server_io
            .lock()
            .unwrap()
            .take()
            .ok_or(ProxyError::TransportExhausted("server endpoint already claimed"))?;

        let incoming = SingleUseIncoming::new(io, self.shutdown.clone(), self.abort.clone());
        let dispatcher = CallDispatcher::new(self.http.clone(), self.base_url.clone());
        // Every method path lands on the same generic service; dispatch is
        // driven entirely by the translated URL.
        let router =
            axum::Router::new().route_service("/{*method}", ProxyService::new(dispatcher));

        debug!("proxy server loop starting");
        let serve = Server::builder()
            .add_routes(Routes::from(router))
            .serve_with_incoming_shutdown(incoming, self.shutdown.clone().cancelled_owned());

        tokio::select! {
            result = serve => result?,
            () = self.abort.cancelled() => {
                debug!("proxy server aborted");
            }
        }
        Ok(())
    }

    /// Let in-flight calls finish, then shut the server down.
    pub fn graceful_stop(&self) {
        self.shutdown.cancel();
    }

    /// Shut the server down immediately, interrupting in-flight calls.
    pub fn stop(&self) {
        self.abort.cancel();
    }

    /// A gRPC client bound to the client half of the in-memory pair.
    ///
    /// The connection is established lazily on the first call, so the
    /// client may be created before [`serve`](Self::serve) is running.
    pub fn new_client(&self) -> Result<RawClient, ProxyError> {
        let io = self
            .client_io
            .lock()
            .unwrap()
            .take()
            .ok_or(ProxyError::TransportExhausted("client endpoint already claimed"))?;

        let mut io = Some(io);
        let channel = Endpoint::try_from("http://in-memory.invalid")
            .map_err(ProxyError::ChannelSetup)?
            .connect_with_connector_lazy(service_fn(move |_: Uri| {
                let io = io.take();
                async move {
                    match io {
                        Some(io) => Ok(TokioIo::new(io)),
                        None => Err(std::io::Error::other(
                            "in-memory client endpoint already claimed",
                        )),
                    }
                }
            }));

        Ok(RawClient::new(channel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_an_invalid_endpoint() {
        assert!(matches!(
            Proxy::new("not a url"),
            Err(ProxyError::InvalidEndpoint(_))
        ));
    }

    #[tokio::test]
    async fn client_endpoint_is_single_use() {
        let proxy = Proxy::new("http://localhost:8080").unwrap();
        assert!(proxy.new_client().is_ok());
        assert!(matches!(
            proxy.new_client(),
            Err(ProxyError::TransportExhausted(_))
        ));
    }

    #[tokio::test]
    async fn stop_interrupts_an_idle_server() {
        let proxy = Proxy::new("http://localhost:8080").unwrap();
        proxy.stop();
        proxy.serve().await.unwrap();
        // The server endpoint was claimed by the first serve.
        assert!(matches!(
            proxy.serve().await,
            Err(ProxyError::TransportExhausted(_))
        ));
    }
}
