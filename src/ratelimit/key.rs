//! Bucket keys and the extractors that derive them from requests.

use axum::http::{HeaderMap, HeaderName};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

/// Key shared by every request whose identity cannot be determined.
pub const GLOBAL_KEY: &str = "global";

/// Identity under which quota is tracked.
///
/// Two requests with equal keys draw from the same bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketKey(Arc<str>);

impl BucketKey {
    /// Create a key from any string.
    pub fn new(key: impl AsRef<str>) -> Self {
        Self(Arc::from(key.as_ref()))
    }

    /// The fallback key used when a request carries no usable identity.
    pub fn global() -> Self {
        Self::new(GLOBAL_KEY)
    }

    /// Key for a client network address.
    pub fn for_ip(addr: IpAddr) -> Self {
        Self::new(format!("ip:{}", addr))
    }

    /// Key for an API key credential.
    pub fn for_api_key(api_key: &str) -> Self {
        Self::new(format!("api_key:{}", api_key))
    }

    /// Whether this is the shared fallback key.
    pub fn is_global(&self) -> bool {
        &*self.0 == GLOBAL_KEY
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BucketKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for BucketKey {
    fn from(key: String) -> Self {
        Self(Arc::from(key))
    }
}

/// The parts of an inbound request a key extractor may look at.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    /// Address of the connected peer, if the transport exposes it.
    pub peer_addr: Option<SocketAddr>,
    /// Request headers.
    pub headers: HeaderMap,
}

impl RequestMeta {
    pub fn new(peer_addr: Option<SocketAddr>, headers: HeaderMap) -> Self {
        Self { peer_addr, headers }
    }

    fn header_str(&self, name: &HeaderName) -> Option<&str> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }
}

/// Derives a [`BucketKey`] from request metadata.
///
/// Implementations must be deterministic and must not fail: a request they
/// cannot identify maps to [`BucketKey::global`].
pub trait KeyExtractor: Send + Sync + 'static {
    /// Extract a key, or `None` if this extractor cannot identify the request.
    fn try_extract(&self, meta: &RequestMeta) -> Option<BucketKey>;

    /// Extract a key, falling back to the shared global key.
    fn extract(&self, meta: &RequestMeta) -> BucketKey {
        self.try_extract(meta).unwrap_or_else(BucketKey::global)
    }

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

impl<E: KeyExtractor + ?Sized> KeyExtractor for Arc<E> {
    fn try_extract(&self, meta: &RequestMeta) -> Option<BucketKey> {
        (**self).try_extract(meta)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// Keys requests by client IP address.
#[derive(Debug, Clone, Default)]
pub struct ClientAddrKey {
    trust_forwarded_for: bool,
}

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

impl ClientAddrKey {
    /// Key by the connected peer address only.
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefer the first `X-Forwarded-For` hop over the peer address.
    ///
    /// Only enable this behind a proxy that overwrites the header.
    pub fn trusting_forwarded_for(mut self, trust: bool) -> Self {
        self.trust_forwarded_for = trust;
        self
    }

    fn forwarded_ip(meta: &RequestMeta) -> Option<IpAddr> {
        let first_hop = meta.header_str(&X_FORWARDED_FOR)?.split(',').next()?;
        first_hop.trim().parse().ok()
    }
}

impl KeyExtractor for ClientAddrKey {
    fn try_extract(&self, meta: &RequestMeta) -> Option<BucketKey> {
        let forwarded = if self.trust_forwarded_for {
            Self::forwarded_ip(meta)
        } else {
            None
        };
        forwarded
            .or_else(|| meta.peer_addr.map(|a| a.ip()))
            .map(BucketKey::for_ip)
    }

    fn name(&self) -> &'static str {
        "client_addr"
    }
}

/// Keys requests by the value of an API key header.
#[derive(Debug, Clone)]
pub struct ApiKeyHeader {
    header: HeaderName,
}

impl ApiKeyHeader {
    pub fn new(header: HeaderName) -> Self {
        Self { header }
    }
}

impl KeyExtractor for ApiKeyHeader {
    fn try_extract(&self, meta: &RequestMeta) -> Option<BucketKey> {
        meta.header_str(&self.header).map(BucketKey::for_api_key)
    }

    fn name(&self) -> &'static str {
        "api_key"
    }
}

/// Tries each extractor in order and takes the first key produced.
#[derive(Default)]
pub struct FirstOf {
    extractors: Vec<Box<dyn KeyExtractor>>,
}

impl FirstOf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(mut self, extractor: impl KeyExtractor) -> Self {
        self.extractors.push(Box::new(extractor));
        self
    }
}

impl fmt::Debug for FirstOf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.extractors.iter().map(|e| e.name()).collect();
        f.debug_struct("FirstOf").field("extractors", &names).finish()
    }
}

impl KeyExtractor for FirstOf {
    fn try_extract(&self, meta: &RequestMeta) -> Option<BucketKey> {
        self.extractors.iter().find_map(|e| e.try_extract(meta))
    }

    fn name(&self) -> &'static str {
        "first_of"
    }
}

/// Configurable choice of key extractor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStrategy {
    /// Client IP address.
    #[default]
    ClientAddr,
    /// API key header only.
    ApiKey,
    /// API key header, then client IP address.
    ApiKeyOrClientAddr,
}

impl KeyStrategy {
    /// Build the extractor this strategy describes.
    pub fn build(
        self,
        api_key_header: HeaderName,
        trust_forwarded_for: bool,
    ) -> Box<dyn KeyExtractor> {
        let client_addr = ClientAddrKey::new().trusting_forwarded_for(trust_forwarded_for);
        match self {
            KeyStrategy::ClientAddr => Box::new(client_addr),
            KeyStrategy::ApiKey => Box::new(ApiKeyHeader::new(api_key_header)),
            KeyStrategy::ApiKeyOrClientAddr => Box::new(
                FirstOf::new()
                    .then(ApiKeyHeader::new(api_key_header))
                    .then(client_addr),
            ),
        }
    }
}
