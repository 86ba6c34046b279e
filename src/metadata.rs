//! Translation between gRPC call metadata and gateway HTTP headers.
//!
//! Outbound, request metadata becomes `grpc-metadata-*` headers the way the
//! JSON gateway expects them; inbound, every response header is copied back
//! verbatim into the call's leading metadata.

use http::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use tonic::metadata::{Ascii, KeyAndValueRef, MetadataKey, MetadataMap, MetadataValue};
use tracing::debug;

/// Prefix under which forwarded request metadata appears to the gateway.
pub const METADATA_HEADER_PREFIX: &str = "grpc-metadata-";

/// Metadata keys that must not be forwarded as gateway headers.
const EXCLUDED_KEYS: [&str; 2] = ["content-type", ":authority"];

/// Response headers that belong to the HTTP/1.1 exchange with the gateway,
/// not to the call. The leading metadata goes out as the HTTP/2 response
/// HEADERS frame, and a stale `content-length` there makes h2 reset the
/// stream, so these never copy back.
const FRAMING_HEADERS: [&str; 4] = ["content-length", "transfer-encoding", "te", "connection"];

/// Build the outbound header set for one call.
///
/// Each metadata key outside the exclusion set is forwarded once per value,
/// order preserved, as `grpc-metadata-<key>` with a single leading `:`
/// stripped. `Content-Type` and `Accept` are always forced to
/// `application/json` regardless of the incoming metadata.
pub fn metadata_to_headers(metadata: &MetadataMap) -> HeaderMap {
    let mut headers = HeaderMap::new();

    for entry in metadata.iter() {
        let (key, value) = match entry {
            KeyAndValueRef::Ascii(key, value) => (key, value),
            KeyAndValueRef::Binary(key, _) => {
                // Binary metadata has no JSON-gateway representation.
                debug!(key = %key, "skipping binary metadata entry");
                continue;
            }
        };

        let key = key.as_str();
        if EXCLUDED_KEYS.contains(&key.to_ascii_lowercase().as_str()) {
            continue;
        }
        let stripped = key.strip_prefix(':').unwrap_or(key);

        let name = match HeaderName::try_from(format!("{METADATA_HEADER_PREFIX}{stripped}")) {
            Ok(name) => name,
            Err(_) => {
                debug!(key, "skipping metadata key that is not a valid header name");
                continue;
            }
        };
        match HeaderValue::from_bytes(value.as_encoded_bytes()) {
            Ok(value) => {
                headers.append(name, value);
            }
            Err(_) => {
                debug!(key, "skipping metadata value that is not a valid header value");
            }
        }
    }

    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers
}

/// Copy gateway response headers into the call's leading metadata.
///
/// Names are lower-cased (the `http` crate guarantees this) and copied
/// without prefix; only the [`FRAMING_HEADERS`] of the HTTP exchange itself
/// are dropped. A header that cannot be represented as ASCII metadata fails
/// the translation, and with it the call.
pub fn headers_to_metadata(headers: &HeaderMap) -> Result<MetadataMap, String> {
    let mut metadata = MetadataMap::new();

    for (name, value) in headers.iter() {
        if FRAMING_HEADERS.contains(&name.as_str()) {
            continue;
        }
        let key = MetadataKey::<Ascii>::from_bytes(name.as_str().as_bytes())
            .map_err(|e| format!("invalid metadata key '{name}': {e}"))?;
        let value = value
            .to_str()
            .map_err(|e| format!("non-ascii value for header '{name}': {e}"))
            .and_then(|v| {
                MetadataValue::try_from(v).map_err(|e| format!("invalid metadata value for '{name}': {e}"))
            })?;
        metadata.append(key, value);
    }

    Ok(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outbound(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut metadata = MetadataMap::new();
        for (key, value) in pairs {
            metadata.append(
                MetadataKey::<Ascii>::from_bytes(key.as_bytes()).unwrap(),
                value.parse().unwrap(),
            );
        }
        metadata_to_headers(&metadata)
    }

    #[test]
    fn excluded_keys_are_dropped_and_values_prefixed() {
        let headers = outbound(&[("content-type", "y"), ("foo", "a"), ("foo", "b")]);

        let foo: Vec<_> = headers.get_all("grpc-metadata-foo").iter().collect();
        assert_eq!(foo, vec!["a", "b"]);
        assert_eq!(headers.get(CONTENT_TYPE).unwrap(), "application/json");
        assert_eq!(headers.get(ACCEPT).unwrap(), "application/json");
        assert!(!headers.contains_key("grpc-metadata-content-type"));
        // 2 forwarded values + 2 forced headers, nothing else.
        assert_eq!(headers.len(), 4);
    }

    #[test]
    fn empty_metadata_produces_only_the_forced_headers() {
        let headers = metadata_to_headers(&MetadataMap::new());
        assert_eq!(headers.len(), 2);
        assert_eq!(headers.get(CONTENT_TYPE).unwrap(), "application/json");
        assert_eq!(headers.get(ACCEPT).unwrap(), "application/json");
    }

    #[test]
    fn forced_headers_win_over_incoming_metadata() {
        let headers = outbound(&[("accept", "text/html")]);
        assert_eq!(headers.get(ACCEPT).unwrap(), "application/json");
        // The non-excluded key is still forwarded under the prefix.
        assert_eq!(headers.get("grpc-metadata-accept").unwrap(), "text/html");
    }

    #[test]
    fn response_headers_copy_back_verbatim() {
        let mut headers = HeaderMap::new();
        headers.insert("x-gateway", HeaderValue::from_static("1"));
        headers.append("set-cookie", HeaderValue::from_static("a=1"));
        headers.append("set-cookie", HeaderValue::from_static("b=2"));

        let metadata = headers_to_metadata(&headers).unwrap();
        assert_eq!(metadata.get("x-gateway").unwrap(), "1");
        let cookies: Vec<_> = metadata.get_all("set-cookie").iter().collect();
        assert_eq!(cookies.len(), 2);
        // No exclusion on this direction.
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let metadata = headers_to_metadata(&headers).unwrap();
        assert!(metadata.get("content-type").is_some());
    }

    #[test]
    fn framing_headers_never_reach_the_metadata() {
        let mut headers = HeaderMap::new();
        headers.insert("content-length", HeaderValue::from_static("27"));
        headers.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        headers.insert("te", HeaderValue::from_static("trailers"));
        headers.insert("connection", HeaderValue::from_static("close"));
        headers.insert("x-gateway", HeaderValue::from_static("1"));

        let metadata = headers_to_metadata(&headers).unwrap();
        assert!(metadata.get("content-length").is_none());
        assert!(metadata.get("transfer-encoding").is_none());
        assert!(metadata.get("te").is_none());
        assert!(metadata.get("connection").is_none());
        assert_eq!(metadata.get("x-gateway").unwrap(), "1");
        assert_eq!(metadata.len(), 1);
    }
}
