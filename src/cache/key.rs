//! Cache key derivation.

use std::fmt;

use sha1::{Digest, Sha1};

/// Content-addressed identifier of a cacheable request.
///
/// The key is the lowercase hex SHA-1 digest of the raw request URI (path
/// plus query string), so `/page?id=5` and `/page?id=6` land in different
/// entries while repeated requests for the same URI share one. The hex form
/// is also safe to use directly as a file name.
///
/// # Examples
///
/// ```
/// use pagecache::cache::CacheKey;
///
/// let a = CacheKey::from_uri("/page?id=5");
/// let b = CacheKey::from_uri("/page?id=5");
/// assert_eq!(a, b);
/// assert_eq!(a.as_str().len(), 40);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Digests a raw request URI into a key.
    pub fn from_uri(uri: &str) -> Self {
        Self(hex::encode(Sha1::digest(uri.as_bytes())))
    }

    /// Returns the hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_known_sha1_vector() {
        assert_eq!(
            CacheKey::from_uri("abc").as_str(),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[test]
    fn identical_uris_share_a_key() {
        assert_eq!(
            CacheKey::from_uri("/search?q=rust"),
            CacheKey::from_uri("/search?q=rust")
        );
    }

    #[test]
    fn query_string_is_part_of_the_key() {
        let uris = ["/page", "/page?id=5", "/page?id=6", "/page/", "/Page?id=5"];
        let keys: std::collections::HashSet<_> =
            uris.iter().map(|uri| CacheKey::from_uri(uri)).collect();
        assert_eq!(keys.len(), uris.len());
    }

    #[test]
    fn key_is_lowercase_hex() {
        let key = CacheKey::from_uri("/feed.xml");
        assert!(
            key.as_str()
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
        );
    }
}
