//! The structured model of a crash report.

use std::fmt;

use chrono::{DateTime, FixedOffset};

use crashlog_common::{Arch, Uuid};

/// The serialization format of a crash report.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReportFormat {
    /// The line-oriented text format written by older systems.
    Legacy,
    /// The JSON based format, made of a header line and a payload object.
    Ips,
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportFormat::Legacy => write!(f, "legacy"),
            ReportFormat::Ips => write!(f, "ips"),
        }
    }
}

/// What went wrong, in the terms of the crash report.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CrashSignature {
    /// The exception type including the signal, such as `EXC_BAD_ACCESS (SIGSEGV)`.
    pub exception_type: Option<String>,
    /// The number of the thread that crashed.
    pub crashed_thread: Option<u32>,
}

impl fmt::Display for CrashSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.exception_type, self.crashed_thread) {
            (Some(exception), Some(thread)) => write!(f, "{exception} on thread {thread}"),
            (Some(exception), None) => write!(f, "{exception}"),
            (None, Some(thread)) => write!(f, "crash on thread {thread}"),
            (None, None) => write!(f, "unknown crash"),
        }
    }
}

/// The information available after the first, cheap parsing phase.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReportSummary {
    /// The name of the crashed process.
    pub process_name: String,
    /// When the crash happened.
    pub date_time: Option<DateTime<FixedOffset>>,
    /// The version of the report format.
    pub report_version: u32,
    /// The exception and crashed thread.
    pub crash_signature: CrashSignature,
}

/// An operating system name and version, such as `Mac OS X 10.15.7 (19H15)`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OsVersion {
    /// The product name, such as `macOS` or `iPhone OS`.
    pub name: String,
    /// The dotted version number.
    pub version: Option<String>,
    /// The build identifier.
    pub build: Option<String>,
}

impl OsVersion {
    /// Parses a version string in the form `name version (build)`.
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        let (text, build) = match text.strip_suffix(')').and_then(|t| t.rsplit_once('(')) {
            Some((text, build)) => (text.trim_end(), Some(build.trim().to_owned())),
            None => (text, None),
        };

        let (name, version) = match text.rsplit_once(' ') {
            Some((name, version)) if version.starts_with(|c: char| c.is_ascii_digit()) => {
                (name.trim_end(), Some(version.to_owned()))
            }
            _ => (text, None),
        };

        OsVersion {
            name: name.to_owned(),
            version,
            build: build.filter(|b| !b.is_empty()),
        }
    }
}

impl fmt::Display for OsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(ref version) = self.version {
            write!(f, " {version}")?;
        }
        if let Some(ref build) = self.build {
            write!(f, " ({build})")?;
        }
        Ok(())
    }
}

/// Process and system metadata from the head of a crash report.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReportHeader {
    /// The name of the crashed process.
    pub process_name: String,
    /// The process identifier of the crashed process.
    pub process_id: Option<u32>,
    /// The name of the parent process.
    pub parent_process_name: Option<String>,
    /// The process identifier of the parent process.
    pub parent_process_id: Option<u32>,
    /// The name of the process responsible for the crashed process.
    pub responsible_process_name: Option<String>,
    /// The process identifier of the responsible process.
    pub responsible_process_id: Option<u32>,
    /// The user the process ran as.
    pub user_id: Option<u32>,
    /// The operating system.
    pub os_version: Option<OsVersion>,
    /// The version of the bridge OS running on the T2 chip.
    pub bridge_os_version: Option<String>,
    /// Whether System Integrity Protection was enabled.
    pub system_integrity_protection: Option<bool>,
    /// The unique identifier of this crash.
    pub incident_identifier: Option<Uuid>,
    /// An identifier for the reporting machine that is stable across reports.
    pub anonymous_uuid: Option<Uuid>,
    /// The hardware the crash happened on.
    pub hardware_model: Option<String>,
    /// The architecture the process executed.
    pub code_type: Option<Arch>,
    /// Whether the process ran natively, as opposed to under translation.
    pub native: bool,
    /// The path of the main executable.
    pub executable_path: Option<String>,
    /// The bundle identifier of the application.
    pub bundle_identifier: Option<String>,
    /// The version of the application, such as `1.2 (34)`.
    pub executable_version: Option<String>,
    /// When the crash happened.
    pub date_time: Option<DateTime<FixedOffset>>,
    /// The version of the report format.
    pub report_version: u32,
}

/// Details on the exception that terminated the process.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExceptionInformation {
    /// The Mach exception type, such as `EXC_BAD_ACCESS`.
    pub exception_type: String,
    /// The BSD signal, such as `SIGSEGV`.
    pub signal: Option<String>,
    /// The exception codes, as printed in the report.
    pub codes: Option<String>,
    /// A refinement of the exception type, such as `KERN_INVALID_ADDRESS at 0x10`.
    pub subtype: Option<String>,
    /// A note attached to the exception, such as `EXC_CORPSE_NOTIFY`.
    pub note: Option<String>,
    /// Why the process was terminated.
    pub termination_reason: Option<String>,
    /// The description of the terminating signal.
    pub termination_signal: Option<String>,
    /// The process that terminated the crashed process.
    pub terminating_process: Option<String>,
    /// The number of the crashed thread.
    pub crashed_thread: Option<u32>,
    /// The dispatch queue of the crashed thread.
    pub crashed_thread_queue: Option<String>,
}

/// Free-form information the application attached to the crash.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DiagnosticMessage {
    /// The application specific information, one message per line.
    pub text: String,
}

/// A single register value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Register {
    /// The register name, such as `rip`.
    pub name: String,
    /// The value of the register.
    pub value: u64,
}

/// The register state of the crashed thread.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ThreadState {
    /// The number of the thread the registers belong to.
    pub thread: u32,
    /// The kind of register state, such as `X86 Thread State (64-bit)`.
    pub flavor: String,
    /// The registers in report order.
    pub registers: Vec<Register>,
}

impl ThreadState {
    /// Returns the value of the named register.
    pub fn register(&self, name: &str) -> Option<u64> {
        self.registers
            .iter()
            .find(|register| register.name == name)
            .map(|register| register.value)
    }
}

/// A frame of a backtrace.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StackFrame {
    /// The position of the frame in its backtrace, starting at zero for the innermost frame.
    pub index: usize,
    /// The instruction address.
    pub address: u64,
    /// The name of the image as printed in the backtrace.
    pub image_name: Option<String>,
    /// The identifier of the binary image containing the address.
    pub image_identifier: Option<String>,
    /// The address relative to the load address of the containing image.
    pub image_offset: Option<u64>,
    /// The symbol name given by the report.
    pub symbol: Option<String>,
    /// The offset of the address into the symbol.
    pub symbol_offset: Option<u64>,
    /// The source file given by the report.
    pub file: Option<String>,
    /// The source line given by the report.
    pub line: Option<u32>,
}

/// A thread and its backtrace.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Thread {
    /// The number of the thread, or of the application specific backtrace.
    pub number: u32,
    /// The name of the thread.
    pub name: Option<String>,
    /// The dispatch queue the thread was serving.
    pub dispatch_queue: Option<String>,
    /// Whether this thread crashed.
    pub crashed: bool,
    /// Whether this is an application specific backtrace rather than an actual thread, such as
    /// the backtrace of the last uncaught exception.
    pub application_specific: bool,
    /// The frames, innermost first.
    pub frames: Vec<StackFrame>,
}
