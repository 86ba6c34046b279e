use bon::Builder;

use crate::transport::DEFAULT_BUFFER_SIZE;

/// Configuration for a transcoding proxy instance.
#[derive(Debug, Clone, Builder)]
pub struct ProxyConfig {
    /// Base URL of the HTTP+JSON gateway. Each call replaces the URL path
    /// with its fully-qualified method name.
    pub endpoint: String,

    /// Capacity of the in-memory byte stream in each direction.
    #[builder(default = DEFAULT_BUFFER_SIZE)]
    pub buffer_size: usize,
}
