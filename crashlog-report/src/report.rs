//! The two-phase crash report.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset};
use once_cell::sync::OnceCell;

use crate::error::{ReportError, ReportErrorKind};
use crate::image::{BinaryImage, BinaryImageRegistry};
use crate::types::*;
use crate::{ips, text};

/// Everything a crash report holds beyond its summary.
///
/// Sections that are missing from the report or fail to parse are left empty.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReportDetails {
    /// Process and system metadata.
    pub header: Option<ReportHeader>,
    /// The exception that terminated the process.
    pub exception_information: Option<ExceptionInformation>,
    /// Application specific information.
    pub diagnostic_message: Option<DiagnosticMessage>,
    /// Threads and application specific backtraces in report order.
    pub threads: Vec<Thread>,
    /// Registers of the crashed thread.
    pub thread_state: Option<ThreadState>,
    /// The loaded binary images.
    pub binary_images: BinaryImageRegistry,
}

impl ReportDetails {
    /// Assigns every frame to the binary image that contains its address.
    fn resolve_frames(&mut self) {
        let registry = &self.binary_images;
        for frame in self.threads.iter_mut().flat_map(|t| t.frames.iter_mut()) {
            if let Some(image) = registry.image_containing(frame.address) {
                frame.image_identifier = Some(image.identifier.clone());
                frame.image_offset = image.offset_of(frame.address);
            }
        }
    }
}

/// An Apple crash report.
///
/// Creating a report only runs the first parsing phase, which extracts the [`ReportSummary`]. The
/// remaining sections are parsed once, on the first call to [`finalize_parsing`] or to any
/// accessor that needs them.
///
/// # Example
///
/// ```
/// use crashlog_report::CrashReport;
///
/// let report: CrashReport = "Process: Example [42]\nReport Version: 12\n\nThread 0 Crashed:\n0   Example   0x0000000000001000 main + 0\n"
///     .parse()
///     .unwrap();
///
/// assert_eq!(report.process_name(), "Example");
/// assert!(!report.is_fully_parsed());
/// assert_eq!(report.crashed_thread().map(|t| t.frames.len()), Some(1));
/// assert!(report.is_fully_parsed());
/// ```
///
/// [`finalize_parsing`]: CrashReport::finalize_parsing
pub struct CrashReport {
    format: ReportFormat,
    text: String,
    summary: ReportSummary,
    details: OnceCell<ReportDetails>,
}

impl CrashReport {
    /// Parses a report from a byte buffer, detecting its format.
    pub fn parse(data: &[u8]) -> Result<Self, ReportError> {
        Self::from_slice(data)
    }

    /// Parses a report from a byte buffer, detecting its format.
    pub fn from_slice(data: &[u8]) -> Result<Self, ReportError> {
        let text = std::str::from_utf8(data)?;
        Self::from_string(text.to_owned())
    }

    /// Reads and parses the report at the given path.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ReportError> {
        let data = std::fs::read(path)?;
        let text = String::from_utf8(data).map_err(|e| e.utf8_error())?;
        Self::from_string(text)
    }

    fn from_string(mut contents: String) -> Result<Self, ReportError> {
        if contents.starts_with('\u{feff}') {
            contents.replace_range(..'\u{feff}'.len_utf8(), "");
        }

        let format = match contents.trim_start().as_bytes().first() {
            None => return Err(ReportErrorKind::Empty.into()),
            Some(b'{') => ReportFormat::Ips,
            Some(_) => ReportFormat::Legacy,
        };

        let summary = match format {
            ReportFormat::Legacy => text::parse_summary(&contents)?,
            ReportFormat::Ips => ips::parse_summary(&contents)?,
        };

        tracing::trace!(%format, process = summary.process_name.as_str(), "parsed report summary");

        Ok(CrashReport {
            format,
            text: contents,
            summary,
            details: OnceCell::new(),
        })
    }

    /// The format this report was written in.
    pub fn format(&self) -> ReportFormat {
        self.format
    }

    /// The raw text of the report.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// The summary extracted during the first parsing phase.
    pub fn summary(&self) -> &ReportSummary {
        &self.summary
    }

    /// The name of the crashed process.
    pub fn process_name(&self) -> &str {
        &self.summary.process_name
    }

    /// When the crash happened.
    pub fn date_time(&self) -> Option<DateTime<FixedOffset>> {
        self.summary.date_time
    }

    /// The version of the report format.
    pub fn report_version(&self) -> u32 {
        self.summary.report_version
    }

    /// The exception and the crashed thread.
    pub fn crash_signature(&self) -> &CrashSignature {
        &self.summary.crash_signature
    }

    /// Runs the second parsing phase, unless it already ran.
    ///
    /// Calling this repeatedly returns the same details.
    pub fn finalize_parsing(&self) -> &ReportDetails {
        self.details.get_or_init(|| self.parse_details())
    }

    #[tracing::instrument(level = "trace", skip_all, fields(format = %self.format))]
    fn parse_details(&self) -> ReportDetails {
        let mut details = match self.format {
            ReportFormat::Legacy => text::parse_details(&self.text, &self.summary),
            ReportFormat::Ips => ips::parse_details(&self.text, &self.summary),
        };

        details.resolve_frames();
        details
    }

    /// Whether the second parsing phase has run.
    pub fn is_fully_parsed(&self) -> bool {
        self.details.get().is_some()
    }

    /// Process and system metadata.
    pub fn header(&self) -> Option<&ReportHeader> {
        self.finalize_parsing().header.as_ref()
    }

    /// Whether the report carries a header.
    pub fn is_header_available(&self) -> bool {
        self.header().is_some()
    }

    /// The exception that terminated the process.
    pub fn exception_information(&self) -> Option<&ExceptionInformation> {
        self.finalize_parsing().exception_information.as_ref()
    }

    /// Whether the report describes the exception.
    pub fn is_exception_information_available(&self) -> bool {
        self.exception_information().is_some()
    }

    /// Application specific information.
    pub fn diagnostic_message(&self) -> Option<&DiagnosticMessage> {
        self.finalize_parsing().diagnostic_message.as_ref()
    }

    /// Whether the report carries application specific information.
    pub fn is_diagnostic_message_available(&self) -> bool {
        self.diagnostic_message().is_some()
    }

    /// All threads and application specific backtraces, in report order.
    pub fn threads(&self) -> &[Thread] {
        &self.finalize_parsing().threads
    }

    /// Whether the report contains any backtraces.
    pub fn is_backtraces_available(&self) -> bool {
        !self.threads().is_empty()
    }

    /// The thread that crashed.
    pub fn crashed_thread(&self) -> Option<&Thread> {
        self.threads()
            .iter()
            .find(|thread| thread.crashed && !thread.application_specific)
    }

    /// Backtraces that do not belong to a thread, such as the last exception backtrace.
    pub fn application_specific_backtraces(&self) -> impl Iterator<Item = &Thread> + '_ {
        self.threads()
            .iter()
            .filter(|thread| thread.application_specific)
    }

    /// Registers of the crashed thread.
    pub fn thread_state(&self) -> Option<&ThreadState> {
        self.finalize_parsing().thread_state.as_ref()
    }

    /// Whether the report contains the register state.
    pub fn is_thread_state_available(&self) -> bool {
        self.thread_state().is_some()
    }

    /// The loaded binary images.
    pub fn binary_images(&self) -> &BinaryImageRegistry {
        &self.finalize_parsing().binary_images
    }

    /// Whether the report lists any binary images.
    pub fn is_binary_images_available(&self) -> bool {
        !self.binary_images().is_empty()
    }

    /// Returns the image containing the address of `frame`.
    ///
    /// Images are matched by address range, so images sharing an identifier resolve to the one
    /// that was actually loaded at the frame's address.
    pub fn image_for_frame(&self, frame: &StackFrame) -> Option<&BinaryImage> {
        self.binary_images().image_containing(frame.address)
    }
}

impl FromStr for CrashReport {
    type Err = ReportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_string(s.to_owned())
    }
}

impl PartialEq for CrashReport {
    fn eq(&self, other: &Self) -> bool {
        self.format == other.format
            && self.summary == other.summary
            && self.finalize_parsing() == other.finalize_parsing()
    }
}

impl fmt::Debug for CrashReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrashReport")
            .field("format", &self.format)
            .field("summary", &self.summary)
            .field("is_fully_parsed", &self.is_fully_parsed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CrashReport>();
    }

    #[test]
    fn test_empty_report() {
        let error = CrashReport::from_slice(b" \n\t\n").unwrap_err();
        assert_eq!(error.kind(), ReportErrorKind::Empty);
    }

    #[test]
    fn test_invalid_encoding() {
        let error = CrashReport::from_slice(b"Process: \xff\xfe").unwrap_err();
        assert_eq!(error.kind(), ReportErrorKind::InvalidEncoding);
    }

    #[test]
    fn test_byte_order_mark() {
        let report = CrashReport::from_slice(b"\xef\xbb\xbfProcess: Tool [1]\nReport Version: 11\n")
            .unwrap();
        assert_eq!(report.format(), ReportFormat::Legacy);
        assert_eq!(report.process_name(), "Tool");
        assert_eq!(report.report_version(), 11);
    }

    #[test]
    fn test_format_detection() {
        let report = CrashReport::from_str("\n  {\"name\":\"Tool\"}\n{\"procName\":\"Tool\"}").unwrap();
        assert_eq!(report.format(), ReportFormat::Ips);
    }
}
