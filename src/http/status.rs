//! Response status codes.

use std::fmt;

use thiserror::Error;

/// The status code was outside the three-digit range `100..=999`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid HTTP status code {0}")]
pub struct InvalidStatusCode(pub u16);

/// An HTTP response status code.
///
/// Any three-digit code can be carried, so a handler may answer with a
/// status this crate has no name for and the cache still sees its number.
/// The common codes are available as associated constants.
///
/// # Examples
///
/// ```
/// use pagecache::http::StatusCode;
///
/// assert_eq!(StatusCode::OK.as_u16(), 200);
/// assert_eq!(StatusCode::OK.canonical_reason(), Some("OK"));
///
/// let teapot = StatusCode::from_u16(418).unwrap();
/// assert_eq!(teapot.canonical_reason(), None);
/// assert_eq!(teapot.to_string(), "418");
/// assert!(StatusCode::from_u16(1000).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StatusCode(u16);

macro_rules! status_codes {
    ($(($name:ident, $code:expr, $reason:expr);)+) => {
        impl StatusCode {
            $(
                #[doc = concat!("`", stringify!($code), " ", $reason, "`")]
                pub const $name: StatusCode = StatusCode($code);
            )+

            /// Returns the registered reason phrase, if this code has one.
            pub fn canonical_reason(self) -> Option<&'static str> {
                match self.0 {
                    $($code => Some($reason),)+
                    _ => None,
                }
            }
        }
    };
}

status_codes! {
    (OK, 200, "OK");
    (CREATED, 201, "Created");
    (ACCEPTED, 202, "Accepted");
    (NON_AUTHORITATIVE_INFORMATION, 203, "Non-Authoritative Information");
    (NO_CONTENT, 204, "No Content");
    (MOVED_PERMANENTLY, 301, "Moved Permanently");
    (FOUND, 302, "Found");
    (SEE_OTHER, 303, "See Other");
    (NOT_MODIFIED, 304, "Not Modified");
    (TEMPORARY_REDIRECT, 307, "Temporary Redirect");
    (PERMANENT_REDIRECT, 308, "Permanent Redirect");
    (BAD_REQUEST, 400, "Bad Request");
    (UNAUTHORIZED, 401, "Unauthorized");
    (FORBIDDEN, 403, "Forbidden");
    (NOT_FOUND, 404, "Not Found");
    (METHOD_NOT_ALLOWED, 405, "Method Not Allowed");
    (GONE, 410, "Gone");
    (PAYLOAD_TOO_LARGE, 413, "Payload Too Large");
    (TOO_MANY_REQUESTS, 429, "Too Many Requests");
    (INTERNAL_SERVER_ERROR, 500, "Internal Server Error");
    (NOT_IMPLEMENTED, 501, "Not Implemented");
    (BAD_GATEWAY, 502, "Bad Gateway");
    (SERVICE_UNAVAILABLE, 503, "Service Unavailable");
    (GATEWAY_TIMEOUT, 504, "Gateway Timeout");
}

impl StatusCode {
    /// Wraps a numeric code.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidStatusCode`] unless `code` has exactly three digits.
    pub fn from_u16(code: u16) -> Result<Self, InvalidStatusCode> {
        if (100..=999).contains(&code) {
            Ok(Self(code))
        } else {
            Err(InvalidStatusCode(code))
        }
    }

    pub fn as_u16(self) -> u16 {
        self.0
    }

    pub fn is_success(self) -> bool {
        (200..300).contains(&self.0)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.canonical_reason() {
            Some(reason) => write!(f, "{} {reason}", self.0),
            None => write!(f, "{}", self.0),
        }
    }
}

impl From<StatusCode> for u16 {
    fn from(code: StatusCode) -> u16 {
        code.0
    }
}

impl TryFrom<u16> for StatusCode {
    type Error = InvalidStatusCode;

    fn try_from(code: u16) -> Result<Self, Self::Error> {
        Self::from_u16(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_codes_have_reasons() {
        assert_eq!(StatusCode::TOO_MANY_REQUESTS.as_u16(), 429);
        assert_eq!(StatusCode::GONE.canonical_reason(), Some("Gone"));
        assert_eq!(StatusCode::NOT_FOUND.to_string(), "404 Not Found");
    }

    #[test]
    fn unnamed_codes_round_trip_their_number() {
        let code = StatusCode::from_u16(299).unwrap();
        assert_eq!(u16::from(code), 299);
        assert_eq!(code.canonical_reason(), None);
        assert!(code.is_success());
        assert_eq!(StatusCode::try_from(200), Ok(StatusCode::OK));
    }

    #[test]
    fn rejects_codes_outside_three_digits() {
        assert_eq!(StatusCode::from_u16(99), Err(InvalidStatusCode(99)));
        assert_eq!(StatusCode::from_u16(1000), Err(InvalidStatusCode(1000)));
    }
}
