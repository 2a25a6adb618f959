use crate::Status;

/// Human-readable label for a status, as shown in the TUI.
pub fn status_string(status: Status) -> &'static str {
    match status {
        Status::Unspecified => "Unspecified",
        Status::Ok => "OK",
        Status::Timeout => "Timeout",
        Status::Throttled => "Throttled",
        Status::InvalidArgument => "Invalid argument",
        Status::InvalidResponse => "Invalid response",
        Status::TemporaryError => "Temporary error",
        Status::PermanentError => "Permanent error",
        Status::IncompatibleState => "Incompatible state",
        Status::DnsError => "DNS error",
        Status::TcpError => "TCP error",
        Status::TlsError => "TLS error",
        Status::HttpError => "HTTP error",
        Status::Unauthenticated => "Unauthenticated",
        Status::PermissionDenied => "Permission denied",
        Status::NotFound => "Not found",
    }
}

/// Whether the platform considers a status final, i.e. the call will not be
/// retried upstream.
pub fn terminal_status(status: Status) -> bool {
    !matches!(
        status,
        Status::Timeout
            | Status::Throttled
            | Status::TemporaryError
            | Status::IncompatibleState
            | Status::DnsError
            | Status::TcpError
            | Status::TlsError
            | Status::HttpError
    )
}

/// Terminal classification for plain HTTP responses from the application
/// endpoint. 4xx codes are final except 408 and 429; 5xx codes are retried
/// except 501.
pub fn terminal_http_status(code: u16) -> bool {
    match code / 100 {
        4 => code != 408 && code != 429,
        5 => code == 501,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses_match_platform_retry_table() {
        for status in [
            Status::Ok,
            Status::InvalidArgument,
            Status::PermanentError,
            Status::Unauthenticated,
            Status::PermissionDenied,
            Status::NotFound,
        ] {
            assert!(terminal_status(status), "{status:?} should be terminal");
        }
        for status in [
            Status::Timeout,
            Status::Throttled,
            Status::TemporaryError,
            Status::IncompatibleState,
            Status::DnsError,
            Status::TcpError,
            Status::TlsError,
            Status::HttpError,
        ] {
            assert!(!terminal_status(status), "{status:?} should be retried");
        }
    }

    #[test]
    fn terminal_http_status_table() {
        assert!(!terminal_http_status(408));
        assert!(!terminal_http_status(429));
        assert!(terminal_http_status(501));
        assert!(!terminal_http_status(500));
        assert!(!terminal_http_status(503));
        assert!(terminal_http_status(200));
        assert!(terminal_http_status(404));
        assert!(terminal_http_status(400));
        assert!(terminal_http_status(302));
    }
}
