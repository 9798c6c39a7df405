use std::error::Error;
use std::fmt;

use thiserror::Error;

/// The error type for [`ReportError`].
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReportErrorKind {
    /// The report could not be read from disk.
    Io,

    /// The report is not valid UTF-8.
    InvalidEncoding,

    /// The report contains no data.
    Empty,

    /// The report does not name the crashed process.
    MissingProcessName,

    /// The report does not declare a report version.
    MissingReportVersion,

    /// The report version is not a number.
    InvalidReportVersion,

    /// The date of the crash cannot be parsed.
    InvalidDate,

    /// The first line of an IPS report is not a valid JSON header.
    InvalidHeader,

    /// The body of an IPS report is not a valid JSON payload.
    InvalidPayload,
}

impl fmt::Display for ReportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io => write!(f, "failed to read crash report"),
            Self::InvalidEncoding => write!(f, "crash report is not valid utf-8"),
            Self::Empty => write!(f, "empty crash report"),
            Self::MissingProcessName => write!(f, "missing process name"),
            Self::MissingReportVersion => write!(f, "missing report version"),
            Self::InvalidReportVersion => write!(f, "invalid report version"),
            Self::InvalidDate => write!(f, "invalid date/time"),
            Self::InvalidHeader => write!(f, "invalid ips header"),
            Self::InvalidPayload => write!(f, "invalid ips payload"),
        }
    }
}

/// An error returned when parsing a [`CrashReport`](crate::CrashReport).
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct ReportError {
    kind: ReportErrorKind,
    #[source]
    source: Option<Box<dyn Error + Send + Sync + 'static>>,
}

impl ReportError {
    /// Creates a new report error from a known kind of error as well as an arbitrary error
    /// payload.
    pub fn new<E>(kind: ReportErrorKind, source: E) -> Self
    where
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        let source = Some(source.into());
        Self { kind, source }
    }

    /// Returns the corresponding [`ReportErrorKind`] for this error.
    pub fn kind(&self) -> ReportErrorKind {
        self.kind
    }
}

impl From<ReportErrorKind> for ReportError {
    fn from(kind: ReportErrorKind) -> Self {
        Self { kind, source: None }
    }
}

impl From<std::io::Error> for ReportError {
    fn from(source: std::io::Error) -> Self {
        Self::new(ReportErrorKind::Io, source)
    }
}

impl From<std::str::Utf8Error> for ReportError {
    fn from(source: std::str::Utf8Error) -> Self {
        Self::new(ReportErrorKind::InvalidEncoding, source)
    }
}

impl From<chrono::ParseError> for ReportError {
    fn from(source: chrono::ParseError) -> Self {
        Self::new(ReportErrorKind::InvalidDate, source)
    }
}

impl From<std::num::ParseIntError> for ReportError {
    fn from(source: std::num::ParseIntError) -> Self {
        Self::new(ReportErrorKind::InvalidReportVersion, source)
    }
}
