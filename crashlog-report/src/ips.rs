//! Parser for IPS crash reports.
//!
//! An IPS report consists of a single line of JSON metadata followed by a JSON payload that spans
//! the rest of the file. The payload layout has changed between OS releases, so most fields are
//! optional and some accept more than one shape.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Map, Value};

use crashlog_common::Uuid;

use crate::error::{ReportError, ReportErrorKind};
use crate::image::{file_name, is_system_path, AddressRange, BinaryImage, BinaryImageRegistry};
use crate::report::ReportDetails;
use crate::text::parse_date;
use crate::types::*;

/// Report version assigned to reports from macOS.
const DESKTOP_REPORT_VERSION: u32 = 12;
/// Report version assigned to reports from iOS, tvOS and watchOS.
const EMBEDDED_REPORT_VERSION: u32 = 104;

/// The metadata line at the top of an IPS report.
#[derive(Debug, Default, Deserialize)]
struct IpsHeader {
    app_name: Option<String>,
    name: Option<String>,
    timestamp: Option<String>,
    app_version: Option<String>,
    build_version: Option<String>,
    #[serde(rename = "bundleID")]
    bundle_id: Option<String>,
    incident_id: Option<String>,
    platform: Option<u32>,
}

impl IpsHeader {
    fn report_version(&self) -> u32 {
        match self.platform {
            Some(2..=4) => EMBEDDED_REPORT_VERSION,
            _ => DESKTOP_REPORT_VERSION,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IpsOsVersion {
    Text(String),
    Structured {
        train: Option<String>,
        build: Option<String>,
    },
}

impl IpsOsVersion {
    fn to_os_version(&self) -> OsVersion {
        match self {
            IpsOsVersion::Text(text) => OsVersion::parse(text),
            IpsOsVersion::Structured { train, build } => {
                let mut version = OsVersion::parse(train.as_deref().unwrap_or_default());
                if build.is_some() {
                    version.build.clone_from(build);
                }
                version
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IpsExceptionCodes {
    Text(String),
    List(Vec<Value>),
}

impl IpsExceptionCodes {
    fn to_text(&self) -> String {
        match self {
            IpsExceptionCodes::Text(text) => text.clone(),
            IpsExceptionCodes::List(codes) => codes
                .iter()
                .map(|code| match code {
                    Value::String(code) => code.clone(),
                    Value::Number(n) => match n.as_u64() {
                        Some(n) => format!("{n:#018x}"),
                        None => n.to_string(),
                    },
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(", "),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IpsMessages {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Deserialize)]
struct IpsException {
    #[serde(rename = "type")]
    exception_type: Option<String>,
    signal: Option<String>,
    codes: Option<IpsExceptionCodes>,
    subtype: Option<String>,
}

impl IpsException {
    fn signature(&self) -> Option<String> {
        let exception_type = self.exception_type.as_deref()?;
        Some(match self.signal {
            Some(ref signal) => format!("{exception_type} ({signal})"),
            None => exception_type.to_owned(),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IpsTermination {
    code: Option<u64>,
    namespace: Option<String>,
    indicator: Option<String>,
    by_proc: Option<String>,
    by_pid: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IpsBundleInfo {
    #[serde(rename = "CFBundleShortVersionString")]
    short_version: Option<String>,
    #[serde(rename = "CFBundleVersion")]
    version: Option<String>,
    #[serde(rename = "CFBundleIdentifier")]
    identifier: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IpsFrame {
    image_offset: Option<u64>,
    image_index: Option<usize>,
    symbol: Option<String>,
    symbol_location: Option<u64>,
    source_file: Option<String>,
    source_line: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IpsThread {
    #[serde(default)]
    triggered: bool,
    name: Option<String>,
    queue: Option<String>,
    #[serde(default)]
    frames: Vec<IpsFrame>,
    thread_state: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct IpsImage {
    arch: Option<String>,
    #[serde(default)]
    base: u64,
    #[serde(default)]
    size: u64,
    uuid: Option<String>,
    path: Option<String>,
    name: Option<String>,
    #[serde(rename = "CFBundleShortVersionString")]
    version: Option<String>,
    #[serde(rename = "CFBundleVersion")]
    build: Option<String>,
    #[serde(rename = "CFBundleIdentifier")]
    bundle_identifier: Option<String>,
}

impl IpsImage {
    fn name(&self) -> Option<&str> {
        self.name
            .as_deref()
            .or_else(|| self.path.as_deref().map(file_name))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IpsThreadTriggered {
    queue: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IpsLegacyInfo {
    thread_triggered: Option<IpsThreadTriggered>,
}

/// The part of the payload needed for the report summary.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IpsSummaryPayload {
    proc_name: Option<String>,
    capture_time: Option<String>,
    exception: Option<IpsException>,
    faulting_thread: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IpsPayload {
    pid: Option<u32>,
    proc_path: Option<String>,
    parent_proc: Option<String>,
    parent_pid: Option<u32>,
    responsible_proc: Option<String>,
    responsible_pid: Option<u32>,
    #[serde(rename = "userID")]
    user_id: Option<u32>,
    os_version: Option<IpsOsVersion>,
    bridge_version: Option<IpsOsVersion>,
    incident: Option<String>,
    model_code: Option<String>,
    cpu_type: Option<String>,
    translated: Option<bool>,
    bundle_info: Option<IpsBundleInfo>,
    sip: Option<String>,
    is_corpse: Option<Value>,
    exception: Option<IpsException>,
    termination: Option<IpsTermination>,
    asi: Option<BTreeMap<String, IpsMessages>>,
    faulting_thread: Option<u32>,
    #[serde(default)]
    threads: Vec<IpsThread>,
    #[serde(default)]
    used_images: Vec<IpsImage>,
    last_exception_backtrace: Option<Vec<IpsFrame>>,
    legacy_info: Option<IpsLegacyInfo>,
}

/// Splits a report into its parsed header line and the raw payload.
fn split_report(text: &str) -> Result<(IpsHeader, &str), ReportError> {
    let text = text.trim_start();
    let (header, payload) = text.split_once('\n').unwrap_or((text, ""));

    let header = serde_json::from_str(header)
        .map_err(|e| ReportError::new(ReportErrorKind::InvalidHeader, e))?;

    if payload.trim().is_empty() {
        return Err(ReportErrorKind::InvalidPayload.into());
    }

    Ok((header, payload))
}

/// Runs the first parsing phase over an IPS report.
pub(crate) fn parse_summary(text: &str) -> Result<ReportSummary, ReportError> {
    let (header, payload) = split_report(text)?;
    let payload: IpsSummaryPayload = serde_json::from_str(payload)
        .map_err(|e| ReportError::new(ReportErrorKind::InvalidPayload, e))?;

    let process_name = payload
        .proc_name
        .or(header.name.clone())
        .or(header.app_name.clone())
        .filter(|name| !name.is_empty())
        .ok_or(ReportErrorKind::MissingProcessName)?;

    let date_time = payload
        .capture_time
        .as_deref()
        .or(header.timestamp.as_deref())
        .map(parse_date)
        .transpose()?;

    Ok(ReportSummary {
        process_name,
        date_time,
        report_version: header.report_version(),
        crash_signature: CrashSignature {
            exception_type: payload.exception.as_ref().and_then(IpsException::signature),
            crashed_thread: payload.faulting_thread,
        },
    })
}

fn parse_uuid(value: Option<&str>) -> Option<Uuid> {
    let value = value?;
    match Uuid::parse_str(value) {
        Ok(uuid) => Some(uuid),
        Err(error) => {
            tracing::warn!(value, %error, "ignoring invalid uuid");
            None
        }
    }
}

fn parse_header(header: &IpsHeader, payload: &IpsPayload, summary: &ReportSummary) -> ReportHeader {
    let bundle = payload.bundle_info.as_ref();
    let short_version = bundle
        .and_then(|b| b.short_version.as_deref())
        .or(header.app_version.as_deref());
    let build = bundle
        .and_then(|b| b.version.as_deref())
        .or(header.build_version.as_deref());
    let executable_version = match (short_version, build) {
        (Some(version), Some(build)) => Some(format!("{version} ({build})")),
        (Some(version), None) => Some(version.to_owned()),
        (None, Some(build)) => Some(format!("({build})")),
        (None, None) => None,
    };

    ReportHeader {
        process_name: summary.process_name.clone(),
        process_id: payload.pid,
        parent_process_name: payload.parent_proc.clone(),
        parent_process_id: payload.parent_pid,
        responsible_process_name: payload.responsible_proc.clone(),
        responsible_process_id: payload.responsible_pid,
        user_id: payload.user_id,
        os_version: payload.os_version.as_ref().map(IpsOsVersion::to_os_version),
        bridge_os_version: payload
            .bridge_version
            .as_ref()
            .map(|v| v.to_os_version().to_string()),
        system_integrity_protection: payload
            .sip
            .as_deref()
            .map(|sip| sip.eq_ignore_ascii_case("enabled")),
        incident_identifier: parse_uuid(
            payload
                .incident
                .as_deref()
                .or(header.incident_id.as_deref()),
        ),
        anonymous_uuid: None,
        hardware_model: payload.model_code.clone(),
        code_type: payload.cpu_type.as_deref().and_then(|c| c.parse().ok()),
        native: !payload.translated.unwrap_or(false),
        executable_path: payload.proc_path.clone(),
        bundle_identifier: bundle
            .and_then(|b| b.identifier.clone())
            .or_else(|| header.bundle_id.clone()),
        executable_version,
        date_time: summary.date_time,
        report_version: summary.report_version,
    }
}

fn parse_exception(payload: &IpsPayload) -> Option<ExceptionInformation> {
    let exception = payload.exception.as_ref()?;
    let termination = payload.termination.as_ref();

    let crashed_thread_queue = payload
        .faulting_thread
        .and_then(|index| payload.threads.get(index as usize))
        .and_then(|thread| thread.queue.clone())
        .or_else(|| {
            payload
                .legacy_info
                .as_ref()?
                .thread_triggered
                .as_ref()?
                .queue
                .clone()
        });

    let is_corpse = payload
        .is_corpse
        .as_ref()
        .is_some_and(|v| v.as_u64() == Some(1) || v.as_bool() == Some(true));

    Some(ExceptionInformation {
        exception_type: exception.exception_type.clone().unwrap_or_default(),
        signal: exception.signal.clone(),
        codes: exception.codes.as_ref().map(IpsExceptionCodes::to_text),
        subtype: exception.subtype.clone(),
        note: is_corpse.then(|| "EXC_CORPSE_NOTIFY".to_owned()),
        termination_reason: termination.and_then(|t| {
            let namespace = t.namespace.as_deref()?;
            Some(match t.code {
                Some(code) => format!("Namespace {namespace}, Code {code:#x}"),
                None => format!("Namespace {namespace}"),
            })
        }),
        termination_signal: termination.and_then(|t| t.indicator.clone()),
        terminating_process: termination.and_then(|t| {
            let process = t.by_proc.as_deref()?;
            Some(match t.by_pid {
                Some(pid) => format!("{process} [{pid}]"),
                None => process.to_owned(),
            })
        }),
        crashed_thread: payload.faulting_thread,
        crashed_thread_queue,
    })
}

fn parse_diagnostic(payload: &IpsPayload) -> Option<DiagnosticMessage> {
    let mut lines = Vec::new();
    for messages in payload.asi.iter().flat_map(|asi| asi.values()) {
        match messages {
            IpsMessages::One(message) => lines.push(message.as_str()),
            IpsMessages::Many(messages) => lines.extend(messages.iter().map(String::as_str)),
        }
    }

    let text = lines.join("\n");
    (!text.is_empty()).then_some(DiagnosticMessage { text })
}

fn convert_frames(frames: &[IpsFrame], images: &[IpsImage]) -> Vec<StackFrame> {
    frames
        .iter()
        .enumerate()
        .map(|(index, frame)| {
            let image = frame.image_index.and_then(|i| images.get(i));
            let offset = frame.image_offset.unwrap_or_default();

            StackFrame {
                index,
                address: image.map_or(offset, |image| image.base.wrapping_add(offset)),
                image_name: image.and_then(IpsImage::name).map(str::to_owned),
                symbol: frame.symbol.clone(),
                symbol_offset: frame.symbol.as_ref().and(frame.symbol_location),
                file: frame.source_file.clone(),
                line: frame.source_line,
                ..Default::default()
            }
        })
        .collect()
}

fn parse_thread_state(number: u32, state: &Map<String, Value>) -> ThreadState {
    let flavor = state
        .get("flavor")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();

    let mut registers = Vec::new();
    for (name, value) in state {
        match value {
            Value::Object(register) => {
                if let Some(value) = register.get("value").and_then(Value::as_u64) {
                    registers.push(Register {
                        name: name.clone(),
                        value,
                    });
                }
            }
            Value::Array(values) => {
                for (index, register) in values.iter().enumerate() {
                    if let Some(value) = register.get("value").and_then(Value::as_u64) {
                        registers.push(Register {
                            name: format!("{name}{index}"),
                            value,
                        });
                    }
                }
            }
            _ => {}
        }
    }

    ThreadState {
        thread: number,
        flavor,
        registers,
    }
}

fn parse_images(payload: &IpsPayload, header: &ReportHeader) -> BinaryImageRegistry {
    let mut registry = BinaryImageRegistry::new();

    for image in &payload.used_images {
        let Some(range) = AddressRange::new(image.base, image.size) else {
            tracing::debug!(base = image.base, "dropping binary image without size");
            continue;
        };

        let path = image.path.clone().unwrap_or_default();
        let name = image.name().unwrap_or("???").to_owned();
        let identifier = image
            .bundle_identifier
            .clone()
            .unwrap_or_else(|| name.clone());

        let is_main = header.bundle_identifier.as_ref() == Some(&identifier)
            || (!path.is_empty() && header.executable_path.as_ref() == Some(&path));
        let is_user_code = is_main || (!path.is_empty() && !is_system_path(&path));

        let image = BinaryImage {
            identifier,
            name,
            uuid: parse_uuid(image.uuid.as_deref()),
            range,
            version: image.version.clone(),
            build: image.build.clone(),
            arch: image.arch.as_deref().and_then(|a| a.parse().ok()),
            path,
            is_main,
            is_user_code,
        };

        if let Err(error) = registry.insert(image) {
            tracing::warn!(%error, "dropping overlapping binary image");
        }
    }

    registry
}

/// Runs the second parsing phase over an IPS report.
#[tracing::instrument(level = "trace", skip_all)]
pub(crate) fn parse_details(text: &str, summary: &ReportSummary) -> ReportDetails {
    let (header, payload) = match split_report(text) {
        Ok(parts) => parts,
        Err(error) => {
            tracing::warn!(error = &error as &dyn std::error::Error, "invalid ips report");
            return ReportDetails::default();
        }
    };

    let payload: IpsPayload = match serde_json::from_str(payload) {
        Ok(payload) => payload,
        Err(error) => {
            tracing::warn!(%error, "invalid ips payload");
            return ReportDetails::default();
        }
    };

    let report_header = parse_header(&header, &payload, summary);
    let binary_images = parse_images(&payload, &report_header);

    let mut threads = Vec::new();
    if let Some(ref frames) = payload.last_exception_backtrace {
        threads.push(Thread {
            number: 0,
            application_specific: true,
            frames: convert_frames(frames, &payload.used_images),
            ..Default::default()
        });
    }

    let mut thread_state = None;
    for (number, thread) in payload.threads.iter().enumerate() {
        let number = number as u32;
        let crashed = thread.triggered || payload.faulting_thread == Some(number);

        if crashed && thread_state.is_none() {
            thread_state = thread
                .thread_state
                .as_ref()
                .map(|state| parse_thread_state(number, state));
        }

        threads.push(Thread {
            number,
            name: thread.name.clone().filter(|n| !n.is_empty()),
            dispatch_queue: thread.queue.clone(),
            crashed,
            application_specific: false,
            frames: convert_frames(&thread.frames, &payload.used_images),
        });
    }

    tracing::trace!(
        threads = threads.len(),
        images = binary_images.len(),
        "parsed ips report"
    );

    ReportDetails {
        header: Some(report_header),
        exception_information: parse_exception(&payload),
        diagnostic_message: parse_diagnostic(&payload),
        threads,
        thread_state,
        binary_images,
    }
}
