use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced while decoding or encoding SCTP wire structures.
///
/// These are internal to the codec layer; the association maps every
/// variant here onto one of the coarser [`AssociationError`] kinds before
/// it ever reaches a caller.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
#[non_exhaustive]
pub enum Error {
    #[error("raw is too small for a SCTP common header")]
    ErrHeaderTooSmall,

    #[error("raw is too small for a SCTP chunk header")]
    ErrChunkHeaderTooSmall,
    #[error("chunk length is shorter than its header")]
    ErrChunkHeaderInvalidLength,
    #[error("not enough data left in SCTP packet to satisfy chunk length")]
    ErrChunkHeaderNotEnoughSpace,
    #[error("chunk padding is non-zero")]
    ErrChunkHeaderPaddingNonZero,

    #[error("chunk type {0} is not the expected kind")]
    ErrChunkTypeMismatch(u8),
    #[error("chunk value is too short for its mandatory fields")]
    ErrChunkValueTooShort,
    #[error("INIT/INIT-ACK flags must be zero")]
    ErrInitFlagsNonZero,
    #[error("INIT/INIT-ACK initiate tag must not be zero")]
    ErrInitiateTagZero,
    #[error("INIT/INIT-ACK inbound stream count must be > 0")]
    ErrInboundStreamsZero,
    #[error("INIT/INIT-ACK outbound stream count must be > 0")]
    ErrOutboundStreamsZero,
    #[error("INIT/INIT-ACK advertised receiver window credit must be >= 1500")]
    ErrAdvertisedRwndTooSmall,

    #[error("param header too short")]
    ErrParamHeaderTooShort,
    #[error("param self-reported length is inconsistent with its header")]
    ErrParamHeaderLengthMismatch,

    #[error("cookie is shorter than the HMAC digest it must carry")]
    ErrCookieTooShort,
    #[error("cookie HMAC verification failed")]
    ErrCookieHmacMismatch,
    #[error("cookie has expired")]
    ErrCookieExpired,

    #[error("packet failed minimal validation")]
    ErrMinimalValidationFailed,
    #[error("packet checksum mismatch")]
    ErrChecksumMismatch,
    #[error("packet source or destination port is zero")]
    ErrZeroPort,
}

/// The coarse error taxonomy the association surfaces to the host.
///
/// Every value other than `None` is terminal: it is paired with the
/// association moving to `Closed` and, except for `WrongState`, with an
/// ABORT chunk being queued for the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationError {
    None,
    WrongState,
    ProtocolViolation,
    VerificationTag,
    InvalidCookie,
    Timeout,
    Unknown,
}

impl Default for AssociationError {
    fn default() -> Self {
        AssociationError::None
    }
}

impl std::fmt::Display for AssociationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AssociationError::None => "none",
            AssociationError::WrongState => "wrong state",
            AssociationError::ProtocolViolation => "protocol violation",
            AssociationError::VerificationTag => "verification tag mismatch",
            AssociationError::InvalidCookie => "invalid cookie",
            AssociationError::Timeout => "timeout",
            AssociationError::Unknown => "unknown error",
        };
        write!(f, "{s}")
    }
}

impl From<&Error> for AssociationError {
    fn from(e: &Error) -> Self {
        match e {
            Error::ErrCookieTooShort | Error::ErrCookieHmacMismatch | Error::ErrCookieExpired => {
                AssociationError::InvalidCookie
            }
            _ => AssociationError::ProtocolViolation,
        }
    }
}
