//! Maps provider-reported failure conditions onto [`ErrorKind`].
//!
//! Classification is table driven. Each vocabulary (HTTP status codes,
//! filesystem error kinds, provider error codes) has its own lookup table and
//! adapters only have to name the condition they observed. Anything not found
//! in a table still resolves to a kind, falling back to
//! [`ErrorKind::Internal`].

use std::io;

use crate::error::ErrorKind;

/// A failure signal as reported by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition<'a> {
    /// HTTP response status.
    HttpStatus(u16),
    /// Local I/O failure.
    Io(io::ErrorKind),
    /// Provider specific error code, such as `NoSuchKey` or `ServerBusy`.
    ProviderCode(&'a str),
}

const HTTP_STATUS_TABLE: &[(u16, ErrorKind)] = &[
    (400, ErrorKind::InvalidArgument),
    (401, ErrorKind::Unauthorized),
    (403, ErrorKind::Unauthorized),
    (404, ErrorKind::NotFound),
    (405, ErrorKind::InvalidArgument),
    (408, ErrorKind::Timeout),
    (409, ErrorKind::TemporaryFailure),
    (410, ErrorKind::NotFound),
    (411, ErrorKind::InvalidArgument),
    (412, ErrorKind::InvalidArgument),
    (413, ErrorKind::InvalidArgument),
    (414, ErrorKind::InvalidArgument),
    (416, ErrorKind::InvalidArgument),
    (429, ErrorKind::TemporaryFailure),
    (431, ErrorKind::InvalidArgument),
    (499, ErrorKind::Cancelled),
    (500, ErrorKind::TemporaryFailure),
    (501, ErrorKind::Internal),
    (502, ErrorKind::TemporaryFailure),
    (503, ErrorKind::TemporaryFailure),
    (504, ErrorKind::Timeout),
];

const IO_TABLE: &[(io::ErrorKind, ErrorKind)] = &[
    (io::ErrorKind::NotFound, ErrorKind::NotFound),
    (io::ErrorKind::PermissionDenied, ErrorKind::Unauthorized),
    (io::ErrorKind::TimedOut, ErrorKind::Timeout),
    (io::ErrorKind::ConnectionRefused, ErrorKind::TemporaryFailure),
    (io::ErrorKind::ConnectionReset, ErrorKind::TemporaryFailure),
    (io::ErrorKind::ConnectionAborted, ErrorKind::TemporaryFailure),
    (io::ErrorKind::NotConnected, ErrorKind::TemporaryFailure),
    (io::ErrorKind::BrokenPipe, ErrorKind::TemporaryFailure),
    (io::ErrorKind::Interrupted, ErrorKind::TemporaryFailure),
    (io::ErrorKind::WouldBlock, ErrorKind::TemporaryFailure),
    (io::ErrorKind::UnexpectedEof, ErrorKind::TemporaryFailure),
    (io::ErrorKind::InvalidInput, ErrorKind::InvalidArgument),
    (io::ErrorKind::InvalidData, ErrorKind::InvalidArgument),
    (io::ErrorKind::AlreadyExists, ErrorKind::InvalidArgument),
    (io::ErrorKind::Unsupported, ErrorKind::InvalidArgument),
];

// S3 and Azure Blob codes. Matched case-insensitively.
const PROVIDER_CODE_TABLE: &[(&str, ErrorKind)] = &[
    ("NoSuchKey", ErrorKind::NotFound),
    ("NoSuchBucket", ErrorKind::NotFound),
    ("NotFound", ErrorKind::NotFound),
    ("BlobNotFound", ErrorKind::NotFound),
    ("ContainerNotFound", ErrorKind::NotFound),
    ("ResourceNotFound", ErrorKind::NotFound),
    ("AccessDenied", ErrorKind::Unauthorized),
    ("InvalidAccessKeyId", ErrorKind::Unauthorized),
    ("SignatureDoesNotMatch", ErrorKind::Unauthorized),
    ("ExpiredToken", ErrorKind::Unauthorized),
    ("InvalidToken", ErrorKind::Unauthorized),
    ("AuthenticationFailed", ErrorKind::Unauthorized),
    ("AuthorizationFailure", ErrorKind::Unauthorized),
    ("AuthorizationPermissionMismatch", ErrorKind::Unauthorized),
    ("InsufficientAccountPermissions", ErrorKind::Unauthorized),
    ("SlowDown", ErrorKind::TemporaryFailure),
    ("Throttling", ErrorKind::TemporaryFailure),
    ("ThrottlingException", ErrorKind::TemporaryFailure),
    ("ServiceUnavailable", ErrorKind::TemporaryFailure),
    ("ServerBusy", ErrorKind::TemporaryFailure),
    ("InternalError", ErrorKind::Internal),
    ("NotImplemented", ErrorKind::Internal),
    ("RequestTimeout", ErrorKind::Timeout),
    ("OperationTimedOut", ErrorKind::Timeout),
    ("EntityTooLarge", ErrorKind::InvalidArgument),
    ("EntityTooSmall", ErrorKind::InvalidArgument),
    ("KeyTooLongError", ErrorKind::InvalidArgument),
    ("InvalidArgument", ErrorKind::InvalidArgument),
    ("InvalidRequest", ErrorKind::InvalidArgument),
    ("InvalidBucketName", ErrorKind::InvalidArgument),
    ("RequestBodyTooLarge", ErrorKind::InvalidArgument),
    ("InvalidBlobOrBlock", ErrorKind::InvalidArgument),
    ("InvalidHeaderValue", ErrorKind::InvalidArgument),
    ("InvalidResourceName", ErrorKind::InvalidArgument),
    ("OperationCancelled", ErrorKind::Cancelled),
];

/// Deterministic condition to [`ErrorKind`] lookup.
///
/// The built-in tables cover HTTP statuses, [`io::ErrorKind`] and common S3 and
/// Azure Blob error codes. Adapters for other providers can register extra
/// codes with [`ErrorClassifier::with_code`]; registered codes take precedence
/// over the built-in ones.
#[derive(Debug, Clone, Default)]
pub struct ErrorClassifier {
    extra_codes: Vec<(String, ErrorKind)>,
}

impl ErrorClassifier {
    /// Registers a provider code.
    pub fn with_code(mut self, code: impl Into<String>, kind: ErrorKind) -> Self {
        self.extra_codes.push((code.into(), kind));
        self
    }

    /// Classifies `condition`. Never fails: unknown conditions map to
    /// [`ErrorKind::Internal`], except unlisted 5xx statuses which are
    /// treated as transient server conditions.
    pub fn classify(&self, condition: Condition<'_>) -> ErrorKind {
        match condition {
            Condition::HttpStatus(status) => lookup(HTTP_STATUS_TABLE, &status)
                .unwrap_or(if (500..600).contains(&status) {
                    ErrorKind::TemporaryFailure
                } else {
                    ErrorKind::Internal
                }),
            Condition::Io(kind) => lookup(IO_TABLE, &kind).unwrap_or(ErrorKind::Internal),
            Condition::ProviderCode(code) => self
                .extra_codes
                .iter()
                .find(|(c, _)| c.eq_ignore_ascii_case(code))
                .map(|(_, kind)| *kind)
                .or_else(|| {
                    PROVIDER_CODE_TABLE
                        .iter()
                        .find(|(c, _)| c.eq_ignore_ascii_case(code))
                        .map(|(_, kind)| *kind)
                })
                .unwrap_or(ErrorKind::Internal),
        }
    }

    /// Classifies using the provider code when known, otherwise the HTTP
    /// status, otherwise [`ErrorKind::Internal`].
    pub fn classify_response(&self, code: Option<&str>, status: Option<u16>) -> ErrorKind {
        let by_code = code.map(|c| self.classify(Condition::ProviderCode(c)));
        match (by_code, status) {
            (Some(kind), _) if kind != ErrorKind::Internal => kind,
            (_, Some(status)) => self.classify(Condition::HttpStatus(status)),
            (Some(kind), None) => kind,
            (None, None) => ErrorKind::Internal,
        }
    }
}

fn lookup<K: PartialEq>(table: &[(K, ErrorKind)], key: &K) -> Option<ErrorKind> {
    table.iter().find(|(k, _)| k == key).map(|(_, kind)| *kind)
}
