//! Rate limit key generation and handling.

/// Identity used when the caller could not determine who sent a request.
///
/// Every identity-less request lands in this one bucket, so those callers
/// share a single quota per segment.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// A key that uniquely identifies one counter record.
///
/// The key is composed of the segment (the protected resource) and the
/// client identity, rendered as `segment:client`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    /// The segment this key belongs to
    pub segment: String,
    /// The client identity within the segment
    pub client: String,
}

impl RateLimitKey {
    /// Create a new key from a segment and client identity.
    ///
    /// The client identity is used verbatim; only an empty identity is
    /// mapped to [`UNKNOWN_CLIENT`].
    pub fn new(segment: &str, client: &str) -> Self {
        let client = if client.is_empty() { UNKNOWN_CLIENT } else { client };

        Self {
            segment: segment.to_string(),
            client: client.to_string(),
        }
    }

    /// Whether this key fell back to the shared unknown-client bucket.
    pub fn is_unknown_client(&self) -> bool {
        self.client == UNKNOWN_CLIENT
    }

    /// Convert the key to its `segment:client` string form.
    pub fn to_string_key(&self) -> String {
        format!("{}:{}", self.segment, self.client)
    }
}

impl std::fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.segment, self.client)
    }
}
