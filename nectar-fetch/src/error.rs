// Copyright 2021-2022 Nectar Contributors
// SPDX-License-Identifier: Apache-2.0

use nectar_key::KeyUri;
use nectar_runtime::GetFailure;
use nectar_splitfile::FailureTally;

use core::fmt;

/// Stable classification of a fetch failure. The numeric codes are part of
/// the client interface and are kept serializable across versions.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[repr(u16)]
#[allow(missing_docs)]
pub enum FetchErrorKind {
    // Transport, recovered by retry until the budget is exhausted.
    RouteNotFound = 10,
    RouteReallyNotFound = 11,
    RejectedOverload = 12,
    TransferFailed = 13,
    RecentlyFailed = 14,
    Timeout = 15,

    // Transport, fatal.
    Cancelled = 20,
    InternalError = 21,

    // Data.
    DataNotFound = 30,
    BlockDecodeError = 31,
    VerifyFailed = 32,
    TooBig = 33,

    // Structural.
    InvalidMetadata = 40,
    TooMuchRecursion = 41,
    TooManyPathComponents = 42,
    NotEnoughPathComponents = 43,
    NotInArchive = 44,
    UnknownMetadata = 45,
    WrongMimeType = 46,
    UnsupportedFormat = 47,

    // Storage.
    BucketError = 50,
    SplitfileError = 51,
    ChecksumFailed = 52,
    StorageFormat = 53,
    DiskFull = 54,

    // Redirect.
    PermanentRedirect = 60,
}

impl FetchErrorKind {
    /// Returns the stable numeric code of this kind.
    pub fn code(self) -> u16 {
        self as u16
    }

    /// Returns the stable identifier of this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RouteNotFound => "ROUTE_NOT_FOUND",
            Self::RouteReallyNotFound => "ROUTE_REALLY_NOT_FOUND",
            Self::RejectedOverload => "REJECTED_OVERLOAD",
            Self::TransferFailed => "TRANSFER_FAILED",
            Self::RecentlyFailed => "RECENTLY_FAILED",
            Self::Timeout => "TIMEOUT",
            Self::Cancelled => "CANCELLED",
            Self::InternalError => "INTERNAL_ERROR",
            Self::DataNotFound => "DATA_NOT_FOUND",
            Self::BlockDecodeError => "BLOCK_DECODE_ERROR",
            Self::VerifyFailed => "VERIFY_FAILED",
            Self::TooBig => "TOO_BIG",
            Self::InvalidMetadata => "INVALID_METADATA",
            Self::TooMuchRecursion => "TOO_MUCH_RECURSION",
            Self::TooManyPathComponents => "TOO_MANY_PATH_COMPONENTS",
            Self::NotEnoughPathComponents => "NOT_ENOUGH_PATH_COMPONENTS",
            Self::NotInArchive => "NOT_IN_ARCHIVE",
            Self::UnknownMetadata => "UNKNOWN_METADATA",
            Self::WrongMimeType => "WRONG_MIME_TYPE",
            Self::UnsupportedFormat => "UNSUPPORTED_FORMAT",
            Self::BucketError => "BUCKET_ERROR",
            Self::SplitfileError => "SPLITFILE_ERROR",
            Self::ChecksumFailed => "CHECKSUM_FAILED",
            Self::StorageFormat => "STORAGE_FORMAT",
            Self::DiskFull => "DISK_FULL",
            Self::PermanentRedirect => "PERMANENT_REDIRECT",
        }
    }
}

impl From<GetFailure> for FetchErrorKind {
    fn from(failure: GetFailure) -> Self {
        match failure {
            GetFailure::RouteNotFound => Self::RouteNotFound,
            GetFailure::RouteReallyNotFound => Self::RouteReallyNotFound,
            GetFailure::RejectedOverload => Self::RejectedOverload,
            GetFailure::TransferFailed => Self::TransferFailed,
            GetFailure::RecentlyFailed => Self::RecentlyFailed,
            GetFailure::Timeout => Self::Timeout,
            GetFailure::DataNotFound => Self::DataNotFound,
            GetFailure::VerifyFailed => Self::VerifyFailed,
            GetFailure::Cancelled => Self::Cancelled,
            GetFailure::Internal => Self::InternalError,
            _ => Self::InternalError,
        }
    }
}

/// A terminal fetch failure, as surfaced to the client callback.
#[derive(Debug)]
pub struct FetchError {
    kind: FetchErrorKind,
    message: Option<String>,
    new_uri: Option<KeyUri>,
    expected_size: Option<u64>,
    tally: Option<FailureTally>,
}

impl FetchError {
    /// Creates a new [`FetchError`] of the given kind.
    pub fn new(kind: FetchErrorKind) -> Self {
        Self {
            kind,
            message: None,
            new_uri: None,
            expected_size: None,
            tally: None,
        }
    }

    /// Attaches a human-readable detail message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message.replace(message.into());
        self
    }

    /// Attaches the URI the client should retry at — the redirect target,
    /// or for [`FetchErrorKind::TooManyPathComponents`] the truncated URI of
    /// what was actually fetched.
    pub fn with_uri(mut self, uri: KeyUri) -> Self {
        self.new_uri.replace(uri);
        self
    }

    /// Attaches the size the fetch would have produced.
    pub fn with_expected_size(mut self, size: u64) -> Self {
        self.expected_size.replace(size);
        self
    }

    /// Attaches the per-kind tally of failed splitfile blocks.
    pub fn with_tally(mut self, tally: FailureTally) -> Self {
        self.tally.replace(tally);
        self
    }

    /// Returns the kind of this error.
    pub fn kind(&self) -> FetchErrorKind {
        self.kind
    }

    /// Returns the attached URI, if any.
    pub fn new_uri(&self) -> Option<&KeyUri> {
        self.new_uri.as_ref()
    }

    /// Returns the expected size, if known.
    pub fn expected_size(&self) -> Option<u64> {
        self.expected_size
    }

    /// Returns the per-kind tally of failed children, if any.
    pub fn tally(&self) -> Option<&FailureTally> {
        self.tally.as_ref()
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.kind.as_str(), self.kind.code())?;
        if let Some(message) = &self.message {
            write!(f, ": {}", message)?;
        }
        if let Some(tally) = &self.tally {
            write!(f, " [{}]", tally)?;
        }
        if let Some(uri) = &self.new_uri {
            write!(f, " -> {}", uri)?;
        }
        Ok(())
    }
}

impl std::error::Error for FetchError {}

impl From<FetchErrorKind> for FetchError {
    fn from(kind: FetchErrorKind) -> Self {
        Self::new(kind)
    }
}

impl From<GetFailure> for FetchError {
    fn from(failure: GetFailure) -> Self {
        Self::new(failure.into())
    }
}

impl From<nectar_runtime::BucketError> for FetchError {
    fn from(error: nectar_runtime::BucketError) -> Self {
        Self::new(FetchErrorKind::BucketError).with_message(error.to_string())
    }
}

impl From<nectar_key::Error> for FetchError {
    fn from(error: nectar_key::Error) -> Self {
        Self::new(FetchErrorKind::BlockDecodeError).with_message(error.to_string())
    }
}

impl From<nectar_splitfile::Error> for FetchError {
    fn from(error: nectar_splitfile::Error) -> Self {
        match error {
            nectar_splitfile::Error::SplitfileFailed { tally } => {
                Self::new(FetchErrorKind::SplitfileError).with_tally(tally)
            }
            nectar_splitfile::Error::ChecksumFailed(section) => {
                Self::new(FetchErrorKind::ChecksumFailed).with_message(section)
            }
            nectar_splitfile::Error::WrongFormat | nectar_splitfile::Error::UnsupportedVersion(_) => {
                Self::new(FetchErrorKind::StorageFormat).with_message(error.to_string())
            }
            error => Self::new(FetchErrorKind::StorageFormat).with_message(error.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(FetchErrorKind::RouteNotFound.code(), 10);
        assert_eq!(FetchErrorKind::Cancelled.code(), 20);
        assert_eq!(FetchErrorKind::DataNotFound.code(), 30);
        assert_eq!(FetchErrorKind::InvalidMetadata.code(), 40);
        assert_eq!(FetchErrorKind::BucketError.code(), 50);
        assert_eq!(FetchErrorKind::PermanentRedirect.code(), 60);
    }

    #[test]
    fn display_carries_tally() {
        let mut tally = FailureTally::new();
        tally.record(GetFailure::DataNotFound);

        let error = FetchError::new(FetchErrorKind::SplitfileError).with_tally(tally);
        let printed = error.to_string();

        assert!(printed.contains("SPLITFILE_ERROR"));
        assert!(printed.contains("Data not found: 1"));
    }
}
