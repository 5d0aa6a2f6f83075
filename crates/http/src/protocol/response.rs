//! HTTP response head handling.
//!
//! A response head is an `http::Response<()>`; the body is attached once the
//! assembler has seen every header.

use http::{Response, StatusCode, Version};

use crate::protocol::{ParseError, StatusClass, status_class};

/// Type alias for HTTP response heads.
pub type ResponseHead = Response<()>;

/// Builds a response head from status-line tokens.
pub fn response_head(code: u16, version: Version) -> Result<ResponseHead, ParseError> {
    let status = StatusCode::from_u16(code).map_err(|_| ParseError::InvalidStatus(code))?;
    let mut head = Response::new(());
    *head.status_mut() = status;
    *head.version_mut() = version;
    Ok(head)
}

/// Whether the response reports a failure (400-599).
pub fn is_failure<T>(response: &Response<T>) -> bool {
    status_class(response.status()) == StatusClass::Failure
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_head() {
        let head = response_head(204, Version::HTTP_10).unwrap();
        assert_eq!(head.status(), StatusCode::NO_CONTENT);
        assert_eq!(head.version(), Version::HTTP_10);
        assert!(!is_failure(&head));
    }

    #[test]
    fn reject_out_of_range_status() {
        assert!(matches!(response_head(42, Version::HTTP_11), Err(ParseError::InvalidStatus(42))));
        assert!(is_failure(&response_head(503, Version::HTTP_11).unwrap()));
    }
}
