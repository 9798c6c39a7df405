//! Parser for the legacy text format of crash reports.
//!
//! A text report starts with a block of `Key: Value` lines describing the process and the
//! exception, followed by sections that are introduced by marker lines such as `Thread 0:` or
//! `Binary Images:` and end at the next blank line.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use chrono::{DateTime, FixedOffset};
use regex::{Captures, Regex};

use crashlog_common::{Arch, Uuid};

use crate::error::{ReportError, ReportErrorKind};
use crate::image::{file_name, is_system_path, AddressRange, BinaryImage, BinaryImageRegistry};
use crate::report::ReportDetails;
use crate::types::*;

static KEY_VALUE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\S[^:]*?):\s*(.*?)\s*$").unwrap());

static PROCESS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*?)\s*\[(\d+)\]$").unwrap());

static THREAD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        ^Thread\ (\d+)(\ Crashed)?:
        (?::?\s*(.*?))?
        \s*$
    ",
    )
    .unwrap()
});

static THREAD_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        ^Thread\ (\d+)\ name:\s*
        (.*?)\s*
        (?:Dispatch\ queue:\s*(.*?))?
        \s*$
    ",
    )
    .unwrap()
});

static THREAD_STATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Thread (\d+) crashed with (.+?)\s*:\s*$").unwrap());

static BACKTRACE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:Application Specific Backtrace (\d+)|Last Exception Backtrace):\s*$").unwrap()
});

static FRAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        ^\s*(\d+)\s+
        (.+?)\s+
        (0x[0-9a-fA-F]+)
        (?:\s+(.*?))?
        \s*$
    ",
    )
    .unwrap()
});

static SYMBOL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        ^(.*?)
        (?:\s+\+\s+(\d+))?
        (?:\s+\(([^()]*?):(\d+)\))?
        $
    ",
    )
    .unwrap()
});

static REGISTER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([A-Za-z0-9]+):\s*(0x[0-9a-fA-F]+)").unwrap());

static BINARY_IMAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        ^\s*
        (0x[0-9a-fA-F]+)\s*-\s*(0x[0-9a-fA-F]+|\?\?\?)\s+
        (\+)?(\S+)\s+
        (?:([a-z0-9_]+|\?\?\?)\s+)?
        (?:\(([^)]*)\)\s+)?
        (?:<([0-9a-fA-F-]+)>\s*)?
        (.*?)
        \s*$
    ",
    )
    .unwrap()
});

/// The date format of both report formats, with optional fractional seconds.
const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f %z";

/// Parses a crash date such as `2023-05-04 13:37:11.123 +0200`.
pub(crate) fn parse_date(text: &str) -> Result<DateTime<FixedOffset>, ReportError> {
    Ok(DateTime::parse_from_str(text.trim(), DATE_FORMAT)?)
}

/// Parses a hexadecimal number with a `0x` prefix.
pub(crate) fn parse_hex(text: &str) -> Option<u64> {
    let digits = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X"))?;
    u64::from_str_radix(digits, 16).ok()
}

/// Splits `Example [4242]` into the process name and identifier.
pub(crate) fn split_process(text: &str) -> (&str, Option<u32>) {
    match PROCESS_RE.captures(text) {
        Some(caps) => {
            let name = caps.get(1).map_or("", |m| m.as_str());
            (name, caps[2].parse().ok())
        }
        None => (text.trim(), None),
    }
}

/// Splits an exception type such as `EXC_BAD_ACCESS (SIGSEGV)` into type and signal.
fn split_exception_type(text: &str) -> (&str, Option<&str>) {
    match text.strip_suffix(')').and_then(|t| t.split_once(" (")) {
        Some((exception, signal)) => (exception.trim(), Some(signal.trim())),
        None => (text, None),
    }
}

/// Splits a trailing `Dispatch queue:` annotation off a thread description.
fn split_dispatch_queue(text: &str) -> (Option<String>, Option<String>) {
    let (name, queue) = match text.split_once("Dispatch queue:") {
        Some((name, queue)) => (name, Some(queue)),
        None => (text, None),
    };

    let non_empty = |s: &str| Some(s.trim()).filter(|s| !s.is_empty()).map(str::to_owned);
    (non_empty(name), queue.and_then(non_empty))
}

/// Parses `1  Dispatch queue: com.example.worker` into the thread number and queue.
fn parse_thread_reference(text: &str) -> (Option<u32>, Option<String>) {
    let digits = text.find(|c: char| !c.is_ascii_digit()).unwrap_or(text.len());
    let number = text[..digits].parse().ok();
    let (_, queue) = split_dispatch_queue(&text[digits..]);
    (number, queue)
}

/// Returns whether a symbol column only holds an address or an offset.
fn is_address_like(symbol: &str) -> bool {
    parse_hex(symbol).is_some() || symbol.bytes().all(|b| b.is_ascii_digit())
}

/// The `Key: Value` pairs at the head of a text report.
#[derive(Debug, Default)]
struct HeaderFields<'a> {
    fields: BTreeMap<&'a str, &'a str>,
}

impl<'a> HeaderFields<'a> {
    /// Collects all fields up to the first backtrace or the list of binary images.
    fn collect(text: &'a str) -> Self {
        let mut fields = BTreeMap::new();
        let mut in_message = false;

        for line in text.lines() {
            let line = line.trim_end();

            if line.starts_with("Binary Images:")
                || THREAD_RE.is_match(line)
                || THREAD_NAME_RE.is_match(line)
                || THREAD_STATE_RE.is_match(line)
                || BACKTRACE_RE.is_match(line)
            {
                break;
            }

            if line.starts_with("Application Specific Information:") {
                in_message = true;
                continue;
            } else if line.is_empty() {
                in_message = false;
                continue;
            } else if in_message {
                continue;
            }

            if let Some(caps) = KEY_VALUE_RE.captures(line) {
                let key = caps.get(1).map_or("", |m| m.as_str());
                let value = caps.get(2).map_or("", |m| m.as_str());
                if !value.is_empty() {
                    fields.entry(key).or_insert(value);
                }
            }
        }

        HeaderFields { fields }
    }

    fn get(&self, key: &str) -> Option<&'a str> {
        self.fields.get(key).copied()
    }

    fn get_owned(&self, key: &str) -> Option<String> {
        self.get(key).map(str::to_owned)
    }

    fn get_uuid(&self, key: &str) -> Option<Uuid> {
        let value = self.get(key)?;
        match Uuid::parse_str(value) {
            Ok(uuid) => Some(uuid),
            Err(error) => {
                tracing::warn!(key, value, %error, "ignoring invalid uuid");
                None
            }
        }
    }

    fn crashed_thread(&self) -> (Option<u32>, Option<String>) {
        match self
            .get("Crashed Thread")
            .or_else(|| self.get("Triggered by Thread"))
        {
            Some(value) => parse_thread_reference(value),
            None => (None, None),
        }
    }
}

/// Runs the first parsing phase over a text report.
pub(crate) fn parse_summary(text: &str) -> Result<ReportSummary, ReportError> {
    let fields = HeaderFields::collect(text);

    let (process_name, _) = fields
        .get("Process")
        .map(split_process)
        .ok_or(ReportErrorKind::MissingProcessName)?;
    if process_name.is_empty() {
        return Err(ReportErrorKind::MissingProcessName.into());
    }

    let report_version = fields
        .get("Report Version")
        .ok_or(ReportErrorKind::MissingReportVersion)?
        .parse::<u32>()?;

    let date_time = fields.get("Date/Time").map(parse_date).transpose()?;

    Ok(ReportSummary {
        process_name: process_name.to_owned(),
        date_time,
        report_version,
        crash_signature: CrashSignature {
            exception_type: fields.get_owned("Exception Type"),
            crashed_thread: fields.crashed_thread().0,
        },
    })
}

fn parse_header(fields: &HeaderFields<'_>, summary: &ReportSummary) -> ReportHeader {
    let process_id = fields.get("Process").and_then(|p| split_process(p).1);
    let (parent_process_name, parent_process_id) = match fields.get("Parent Process") {
        Some(parent) => {
            let (name, pid) = split_process(parent);
            (Some(name.to_owned()), pid)
        }
        None => (None, None),
    };
    let (responsible_process_name, responsible_process_id) = match fields
        .get("Responsible")
        .or_else(|| fields.get("Responsible Process"))
    {
        Some(responsible) => {
            let (name, pid) = split_process(responsible);
            (Some(name.to_owned()), pid)
        }
        None => (None, None),
    };

    let (code_type, native) = match fields.get("Code Type") {
        Some(code_type) => {
            let (arch, mode) = code_type.split_once(' ').unwrap_or((code_type, ""));
            (arch.parse::<Arch>().ok(), mode.trim() != "(Translated)")
        }
        None => (None, true),
    };

    ReportHeader {
        process_name: summary.process_name.clone(),
        process_id,
        parent_process_name,
        parent_process_id,
        responsible_process_name,
        responsible_process_id,
        user_id: fields.get("User ID").and_then(|id| id.parse().ok()),
        os_version: fields.get("OS Version").map(OsVersion::parse),
        bridge_os_version: fields.get_owned("Bridge OS Version"),
        system_integrity_protection: fields
            .get("System Integrity Protection")
            .map(|sip| sip.eq_ignore_ascii_case("enabled")),
        incident_identifier: fields.get_uuid("Incident Identifier"),
        anonymous_uuid: fields.get_uuid("Anonymous UUID"),
        hardware_model: fields.get_owned("Hardware Model"),
        code_type,
        native,
        executable_path: fields.get_owned("Path"),
        bundle_identifier: fields.get_owned("Identifier"),
        executable_version: fields.get_owned("Version"),
        date_time: summary.date_time,
        report_version: summary.report_version,
    }
}

fn parse_exception(fields: &HeaderFields<'_>) -> Option<ExceptionInformation> {
    let (exception_type, signal) = split_exception_type(fields.get("Exception Type")?);
    let (crashed_thread, crashed_thread_queue) = fields.crashed_thread();

    Some(ExceptionInformation {
        exception_type: exception_type.to_owned(),
        signal: signal.map(str::to_owned),
        codes: fields.get_owned("Exception Codes"),
        subtype: fields.get_owned("Exception Subtype"),
        note: fields.get_owned("Exception Note"),
        termination_reason: fields.get_owned("Termination Reason"),
        termination_signal: fields.get_owned("Termination Signal"),
        terminating_process: fields.get_owned("Terminating Process"),
        crashed_thread,
        crashed_thread_queue,
    })
}

fn parse_frame(caps: &Captures<'_>) -> Option<StackFrame> {
    let index = caps[1].parse().ok()?;
    let address = parse_hex(&caps[3])?;
    let image_name = Some(caps[2].trim()).filter(|name| *name != "???");

    let mut frame = StackFrame {
        index,
        address,
        image_name: image_name.map(str::to_owned),
        ..Default::default()
    };

    let rest = caps.get(4).map_or("", |m| m.as_str());
    if let Some(symbol_caps) = SYMBOL_RE.captures(rest) {
        let symbol = symbol_caps.get(1).map_or("", |m| m.as_str()).trim();
        if !symbol.is_empty() && !is_address_like(symbol) {
            frame.symbol = Some(symbol.to_owned());
            frame.symbol_offset = symbol_caps.get(2).and_then(|m| m.as_str().parse().ok());
        }
        frame.file = symbol_caps.get(3).map(|m| m.as_str().to_owned());
        frame.line = symbol_caps.get(4).and_then(|m| m.as_str().parse().ok());
    }

    Some(frame)
}

/// Parses the compact `(0x1 0x2 ...)` form of an exception backtrace.
fn parse_compact_backtrace(line: &str, frames: &mut Vec<StackFrame>) {
    let addresses = line.trim_start_matches('(').trim_end_matches(')');
    for address in addresses.split_whitespace().filter_map(parse_hex) {
        frames.push(StackFrame {
            index: frames.len(),
            address,
            ..Default::default()
        });
    }
}

/// Determines how binary images are classified.
struct ImageContext<'a> {
    bundle_identifier: Option<&'a str>,
    executable_path: Option<&'a str>,
    report_version: u32,
}

impl ImageContext<'_> {
    /// Whether the report marks user code with `+`.
    fn has_user_code_markers(&self) -> bool {
        (11..100).contains(&self.report_version)
    }
}

fn parse_version(text: &str) -> (Option<String>, Option<String>) {
    let text = text.trim();
    if text.is_empty() || text == "???" {
        return (None, None);
    }

    match text.split_once(" - ") {
        Some((version, build)) => (
            Some(version.trim().to_owned()).filter(|v| !v.is_empty() && v != "???"),
            Some(build.trim().to_owned()).filter(|b| !b.is_empty() && b != "???"),
        ),
        None => (Some(text.to_owned()), None),
    }
}

fn parse_binary_image(caps: &Captures<'_>, context: &ImageContext<'_>) -> Option<BinaryImage> {
    let start = parse_hex(&caps[1])?;
    let Some(end) = parse_hex(&caps[2]) else {
        tracing::warn!(start, "dropping binary image without end address");
        return None;
    };
    let Some(range) = AddressRange::from_inclusive(start, end) else {
        tracing::warn!(start, end, "dropping binary image with invalid range");
        return None;
    };

    let identifier = caps[4].to_owned();
    let path = caps.get(8).map_or("", |m| m.as_str()).to_owned();
    let name = if path.is_empty() {
        identifier.clone()
    } else {
        file_name(&path).to_owned()
    };

    let arch = caps
        .get(5)
        .map(|m| m.as_str())
        .filter(|arch| *arch != "???")
        .and_then(|arch| arch.parse().ok());
    let (version, build) = caps.get(6).map_or((None, None), |m| parse_version(m.as_str()));
    let uuid = caps.get(7).and_then(|m| Uuid::parse_str(m.as_str()).ok());

    let is_main = context.bundle_identifier == Some(identifier.as_str())
        || (!path.is_empty() && context.executable_path == Some(path.as_str()));
    let is_user_code = if context.has_user_code_markers() {
        caps.get(3).is_some()
    } else {
        !path.is_empty() && !is_system_path(&path)
    };

    Some(BinaryImage {
        identifier,
        name,
        uuid,
        range,
        version,
        build,
        arch,
        path,
        is_main,
        is_user_code: is_user_code || is_main,
    })
}

enum ParsingState {
    Root,
    Thread,
    ThreadState,
    BinaryImages,
    DiagnosticMessage,
}

/// Collects the sections that follow the header of a text report.
#[derive(Default)]
struct Sections {
    threads: Vec<Thread>,
    thread_names: BTreeMap<u32, (Option<String>, Option<String>)>,
    thread_state: Option<ThreadState>,
    diagnostic_lines: Vec<String>,
    images: BinaryImageRegistry,
}

impl Sections {
    fn parse(text: &str, context: &ImageContext<'_>) -> Self {
        let mut sections = Sections::default();
        let mut state = ParsingState::Root;
        let mut thread: Option<Thread> = None;

        for line in text.lines() {
            let line = line.trim_end();

            if line.starts_with("Binary Images:") {
                sections.flush(&mut thread);
                state = ParsingState::BinaryImages;
                continue;
            } else if line.starts_with("Application Specific Information:") {
                sections.flush(&mut thread);
                state = ParsingState::DiagnosticMessage;
                continue;
            } else if let Some(caps) = THREAD_STATE_RE.captures(line) {
                sections.flush(&mut thread);
                sections.thread_state = Some(ThreadState {
                    thread: caps[1].parse().unwrap_or_default(),
                    flavor: caps[2].to_owned(),
                    registers: Vec::new(),
                });
                state = ParsingState::ThreadState;
                continue;
            } else if let Some(caps) = THREAD_RE.captures(line) {
                sections.flush(&mut thread);
                let rest = caps.get(3).map_or("", |m| m.as_str());
                let (name, dispatch_queue) = split_dispatch_queue(rest);
                thread = Some(Thread {
                    number: caps[1].parse().unwrap_or_default(),
                    name,
                    dispatch_queue,
                    crashed: caps.get(2).is_some(),
                    ..Default::default()
                });
                state = ParsingState::Thread;
                continue;
            } else if let Some(caps) = THREAD_NAME_RE.captures(line) {
                sections.flush(&mut thread);
                let name = caps.get(2).map(|m| m.as_str()).filter(|n| !n.is_empty());
                let queue = caps.get(3).map(|m| m.as_str()).filter(|q| !q.is_empty());
                sections.thread_names.insert(
                    caps[1].parse().unwrap_or_default(),
                    (name.map(str::to_owned), queue.map(str::to_owned)),
                );
                state = ParsingState::Root;
                continue;
            } else if let Some(caps) = BACKTRACE_RE.captures(line) {
                sections.flush(&mut thread);
                thread = Some(Thread {
                    number: caps.get(1).and_then(|m| m.as_str().parse().ok()).unwrap_or(0),
                    application_specific: true,
                    ..Default::default()
                });
                state = ParsingState::Thread;
                continue;
            }

            state = match state {
                ParsingState::Root => ParsingState::Root,
                ParsingState::Thread => {
                    let consumed = match thread {
                        Some(ref mut current) => {
                            if let Some(caps) = FRAME_RE.captures(line) {
                                if let Some(frame) = parse_frame(&caps) {
                                    current.frames.push(frame);
                                }
                                true
                            } else if line.starts_with('(') {
                                parse_compact_backtrace(line, &mut current.frames);
                                true
                            } else {
                                false
                            }
                        }
                        None => false,
                    };

                    if consumed {
                        ParsingState::Thread
                    } else {
                        sections.flush(&mut thread);
                        ParsingState::Root
                    }
                }
                ParsingState::ThreadState => {
                    if line.is_empty() {
                        ParsingState::Root
                    } else {
                        if let Some(ref mut thread_state) = sections.thread_state {
                            for caps in REGISTER_RE.captures_iter(line) {
                                if let Some(value) = parse_hex(&caps[2]) {
                                    thread_state.registers.push(Register {
                                        name: caps[1].to_owned(),
                                        value,
                                    });
                                }
                            }
                        }
                        ParsingState::ThreadState
                    }
                }
                ParsingState::BinaryImages => {
                    if line.is_empty() {
                        if sections.images.is_empty() {
                            ParsingState::BinaryImages
                        } else {
                            ParsingState::Root
                        }
                    } else if let Some(caps) = BINARY_IMAGE_RE.captures(line) {
                        if let Some(image) = parse_binary_image(&caps, context) {
                            if let Err(error) = sections.images.insert(image) {
                                tracing::warn!(%error, "dropping overlapping binary image");
                            }
                        }
                        ParsingState::BinaryImages
                    } else {
                        ParsingState::Root
                    }
                }
                ParsingState::DiagnosticMessage => {
                    if line.is_empty() {
                        ParsingState::Root
                    } else {
                        sections.diagnostic_lines.push(line.trim().to_owned());
                        ParsingState::DiagnosticMessage
                    }
                }
            };
        }

        sections.flush(&mut thread);
        sections
    }

    fn flush(&mut self, thread: &mut Option<Thread>) {
        if let Some(thread) = thread.take() {
            self.threads.push(thread);
        }
    }

    /// Applies names declared by `Thread N name:` lines to the matching threads.
    fn apply_thread_names(&mut self) {
        for thread in &mut self.threads {
            if thread.application_specific {
                continue;
            }

            if let Some((name, queue)) = self.thread_names.get(&thread.number) {
                if thread.name.is_none() {
                    thread.name.clone_from(name);
                }
                if thread.dispatch_queue.is_none() {
                    thread.dispatch_queue.clone_from(queue);
                }
            }
        }
    }
}

/// Runs the second parsing phase over a text report.
#[tracing::instrument(level = "trace", skip_all)]
pub(crate) fn parse_details(text: &str, summary: &ReportSummary) -> ReportDetails {
    let fields = HeaderFields::collect(text);
    let header = parse_header(&fields, summary);
    let exception = parse_exception(&fields);

    let context = ImageContext {
        bundle_identifier: header.bundle_identifier.as_deref(),
        executable_path: header.executable_path.as_deref(),
        report_version: summary.report_version,
    };

    let mut sections = Sections::parse(text, &context);
    sections.apply_thread_names();

    let crashed_thread = exception.as_ref().and_then(|e| e.crashed_thread);
    let has_crashed = sections.threads.iter().any(|t| t.crashed);
    if let (Some(number), false) = (crashed_thread, has_crashed) {
        for thread in &mut sections.threads {
            if thread.number == number && !thread.application_specific {
                thread.crashed = true;
            }
        }
    }

    let diagnostic = Some(sections.diagnostic_lines.join("\n"))
        .filter(|text| !text.is_empty())
        .map(|text| DiagnosticMessage { text });

    tracing::trace!(
        threads = sections.threads.len(),
        images = sections.images.len(),
        "parsed text report"
    );

    ReportDetails {
        header: Some(header),
        exception_information: exception,
        diagnostic_message: diagnostic,
        threads: sections.threads,
        thread_state: sections.thread_state,
        binary_images: sections.images,
    }
}
