/*!
 * Caller-visible result codes
 */

use std::fmt;

/// Closed set of result codes reported to the caller.
///
/// Every completion event carries exactly one of these, and the C ABI
/// exchanges them as `i32` values. `Success` is zero; the order of the
/// remaining variants is part of the ABI and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ResponseCode {
    /// Request sent successfully / sub-range fully read
    Success = 0,

    /// All responses delivered, or the engine was stopped
    FinishedError,

    /// File or object could not be opened or read
    FileAccessError,

    /// Fewer bytes available than requested
    EofError,

    /// Object storage backend could not be loaded
    S3NotSupported,

    /// Runtime prerequisite for the object storage backend is missing
    GlibcPrerequisite,

    /// Process fd limit is too low for the configured concurrency
    InsufficientFdLimit,

    /// Invalid request parameters
    InvalidParameterError,

    /// Empty request parameters
    EmptyRequestError,

    /// A previous request is still being handled
    BusyError,

    /// Unclassified failure
    UnknownError,
}

impl ResponseCode {
    /// Human-readable description of the code, stable across versions.
    pub fn description(self) -> &'static str {
        match self {
            ResponseCode::Success => "Request sent successfully",
            ResponseCode::FinishedError => "Finished all responses",
            ResponseCode::FileAccessError => "File access error",
            ResponseCode::EofError => "End of file reached",
            ResponseCode::S3NotSupported => "S3 not supported",
            ResponseCode::GlibcPrerequisite => "GLIBC version should be at least 2.29",
            ResponseCode::InsufficientFdLimit => {
                "Increase process fd limit or decrease the concurrency level. \
                 Recommended value for the streamer alone is the concurrency multiplied by 64, \
                 in addition to your application fd usage"
            }
            ResponseCode::InvalidParameterError => "Invalid request parameters",
            ResponseCode::EmptyRequestError => "Empty request parameters",
            ResponseCode::BusyError => "Streamer is handling previous request",
            ResponseCode::UnknownError => "Unknown Error",
        }
    }

    /// Convert a raw ABI value back into a code; out-of-range values map
    /// to `None`.
    pub fn from_i32(value: i32) -> Option<Self> {
        let code = match value {
            0 => ResponseCode::Success,
            1 => ResponseCode::FinishedError,
            2 => ResponseCode::FileAccessError,
            3 => ResponseCode::EofError,
            4 => ResponseCode::S3NotSupported,
            5 => ResponseCode::GlibcPrerequisite,
            6 => ResponseCode::InsufficientFdLimit,
            7 => ResponseCode::InvalidParameterError,
            8 => ResponseCode::EmptyRequestError,
            9 => ResponseCode::BusyError,
            10 => ResponseCode::UnknownError,
            _ => return None,
        };
        Some(code)
    }

    pub fn is_success(self) -> bool {
        self == ResponseCode::Success
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        for value in 0..=10 {
            let code = ResponseCode::from_i32(value).unwrap();
            assert_eq!(code as i32, value);
        }
    }

    #[test]
    fn test_out_of_range() {
        assert_eq!(ResponseCode::from_i32(-1), None);
        assert_eq!(ResponseCode::from_i32(11), None);
        assert_eq!(ResponseCode::from_i32(i32::MAX), None);
    }

    #[test]
    fn test_success_is_zero() {
        assert_eq!(ResponseCode::Success as i32, 0);
        assert!(ResponseCode::Success.is_success());
        assert!(!ResponseCode::EofError.is_success());
    }

    #[test]
    fn test_descriptions_nonempty() {
        for value in 0..=10 {
            let code = ResponseCode::from_i32(value).unwrap();
            assert!(!code.description().is_empty());
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(
            ResponseCode::BusyError.to_string(),
            "Streamer is handling previous request"
        );
    }
}
