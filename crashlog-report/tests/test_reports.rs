use crashlog_common::{Arch, Uuid};
use crashlog_report::*;
use crashlog_testutils::{fixture, fixture_string};

use similar_asserts::assert_eq;

type Error = Box<dyn std::error::Error>;

fn frame_summary(thread: &Thread) -> Vec<(u64, Option<&str>, Option<u64>, Option<&str>)> {
    thread
        .frames
        .iter()
        .map(|frame| {
            (
                frame.address,
                frame.image_identifier.as_deref(),
                frame.image_offset,
                frame.symbol.as_deref(),
            )
        })
        .collect()
}

#[test]
fn test_legacy_summary() -> Result<(), Error> {
    let report = CrashReport::from_path(fixture("legacy/two_threads.crash"))?;

    assert_eq!(report.format(), ReportFormat::Legacy);
    assert_eq!(report.process_name(), "Example");
    assert_eq!(report.report_version(), 12);
    assert_eq!(
        report.date_time().map(|d| d.to_rfc3339()).as_deref(),
        Some("2023-05-04T13:37:11.123+02:00")
    );
    insta::assert_snapshot!(
        report.crash_signature().to_string(),
        @"EXC_BAD_ACCESS (SIGSEGV) on thread 1"
    );
    assert!(!report.is_fully_parsed());

    Ok(())
}

#[test]
fn test_legacy_header() -> Result<(), Error> {
    let report: CrashReport = fixture_string("legacy/two_threads.crash").parse()?;
    let header = report.header().expect("header");

    assert!(report.is_fully_parsed());
    assert_eq!(header.process_name, "Example");
    assert_eq!(header.process_id, Some(4242));
    assert_eq!(header.parent_process_name.as_deref(), Some("launchd"));
    assert_eq!(header.parent_process_id, Some(1));
    assert_eq!(header.responsible_process_name.as_deref(), Some("Example"));
    assert_eq!(header.responsible_process_id, Some(4242));
    assert_eq!(header.user_id, Some(501));
    assert_eq!(
        header.os_version,
        Some(OsVersion {
            name: "Mac OS X".into(),
            version: Some("10.15.7".into()),
            build: Some("19H15".into()),
        })
    );
    assert_eq!(header.bridge_os_version.as_deref(), Some("5.0 (19P548)"));
    assert_eq!(header.system_integrity_protection, Some(true));
    assert_eq!(
        header.anonymous_uuid,
        Some(Uuid::parse_str("6C2A1B9E-2C3D-4A5B-8C7D-1E2F3A4B5C6D")?)
    );
    assert_eq!(header.incident_identifier, None);
    assert_eq!(header.code_type, Some(Arch::Amd64));
    assert!(header.native);
    assert_eq!(
        header.executable_path.as_deref(),
        Some("/Applications/Example.app/Contents/MacOS/Example")
    );
    assert_eq!(header.bundle_identifier.as_deref(), Some("com.example.Example"));
    assert_eq!(header.executable_version.as_deref(), Some("1.2 (34)"));
    assert_eq!(header.report_version, 12);

    Ok(())
}

#[test]
fn test_legacy_exception() -> Result<(), Error> {
    let report: CrashReport = fixture_string("legacy/two_threads.crash").parse()?;

    assert_eq!(
        report.exception_information(),
        Some(&ExceptionInformation {
            exception_type: "EXC_BAD_ACCESS".into(),
            signal: Some("SIGSEGV".into()),
            codes: Some("KERN_INVALID_ADDRESS at 0x0000000000000010".into()),
            subtype: None,
            note: Some("EXC_CORPSE_NOTIFY".into()),
            termination_reason: Some("Namespace SIGNAL, Code 0xb".into()),
            termination_signal: Some("Segmentation fault: 11".into()),
            terminating_process: Some("exc handler [4242]".into()),
            crashed_thread: Some(1),
            crashed_thread_queue: Some("com.example.worker".into()),
        })
    );
    assert_eq!(
        report.diagnostic_message().map(|m| m.text.as_str()),
        Some("crashed on purpose")
    );

    Ok(())
}

#[test]
fn test_legacy_threads() -> Result<(), Error> {
    let report: CrashReport = fixture_string("legacy/two_threads.crash").parse()?;
    let threads = report.threads();

    assert_eq!(threads.len(), 2);
    assert_eq!(threads[0].number, 0);
    assert!(!threads[0].crashed);
    assert_eq!(
        threads[0].dispatch_queue.as_deref(),
        Some("com.apple.main-thread")
    );
    assert_eq!(
        frame_summary(&threads[0]),
        [
            (0x7fff6d5ba8e6, None, None, Some("mach_msg_trap")),
            (0x10c7f4010, Some("com.example.Example"), Some(0x1010), None),
        ]
    );

    let crashed = report.crashed_thread().expect("crashed thread");
    assert_eq!(crashed.number, 1);
    assert_eq!(crashed.dispatch_queue.as_deref(), Some("com.example.worker"));
    assert_eq!(
        frame_summary(crashed),
        [
            (0x7fff6d47a000, None, None, Some("start")),
            (0x10c7f4020, Some("com.example.Example"), Some(0x1020), Some("main")),
            (0x1, None, None, None),
        ]
    );
    assert_eq!(crashed.frames[0].image_name.as_deref(), Some("libdyld.dylib"));
    assert_eq!(crashed.frames[1].symbol_offset, Some(32));
    assert_eq!(crashed.frames[2].image_name, None);

    let image = report
        .image_for_frame(&crashed.frames[1])
        .expect("image for frame");
    assert_eq!(image.identifier, "com.example.Example");

    Ok(())
}

#[test]
fn test_legacy_thread_state() -> Result<(), Error> {
    let report: CrashReport = fixture_string("legacy/two_threads.crash").parse()?;
    let state = report.thread_state().expect("thread state");

    assert_eq!(state.thread, 1);
    assert_eq!(state.flavor, "X86 Thread State (64-bit)");

    let names: Vec<_> = state.registers.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, ["rax", "rbx", "rcx", "rdx", "rip", "rfl", "cr2"]);
    assert_eq!(state.register("rip"), Some(0x10c7f4020));
    assert_eq!(state.register("rcx"), Some(0x7ffee3a0b8a8));
    assert_eq!(state.register("xmm0"), None);

    Ok(())
}

#[test]
fn test_legacy_images() -> Result<(), Error> {
    let report: CrashReport = fixture_string("legacy/two_threads.crash").parse()?;
    let images = report.binary_images();

    assert_eq!(images.len(), 1);
    assert_eq!(
        images.images()[0],
        BinaryImage {
            identifier: "com.example.Example".into(),
            name: "Example".into(),
            uuid: Some(Uuid::parse_str("6A128A5E-7B4C-3D2E-9F10-A1B2C3D4E5F6")?),
            range: AddressRange::new(0x10c7f3000, 0x2000).expect("range"),
            version: Some("1.2".into()),
            build: Some("34".into()),
            arch: None,
            path: "/Applications/Example.app/Contents/MacOS/Example".into(),
            is_main: true,
            is_user_code: true,
        }
    );
    assert_eq!(images.main_image().map(|i| i.name.as_str()), Some("Example"));

    assert!(report.is_header_available());
    assert!(report.is_exception_information_available());
    assert!(report.is_diagnostic_message_available());
    assert!(report.is_backtraces_available());
    assert!(report.is_thread_state_available());
    assert!(report.is_binary_images_available());

    Ok(())
}

#[test]
fn test_ios_report() -> Result<(), Error> {
    let report = CrashReport::from_path(fixture("legacy/ios_app.crash"))?;

    assert_eq!(report.report_version(), 104);
    assert_eq!(
        report.crash_signature(),
        &CrashSignature {
            exception_type: Some("EXC_CRASH (SIGABRT)".into()),
            crashed_thread: Some(0),
        }
    );

    let header = report.header().expect("header");
    assert_eq!(header.code_type, Some(Arch::Arm64));
    assert_eq!(header.hardware_model.as_deref(), Some("iPhone12,1"));
    assert_eq!(
        header.incident_identifier,
        Some(Uuid::parse_str("9B8A7C6D-5E4F-4A3B-9C2D-1E0F9A8B7C6D")?)
    );
    assert_eq!(
        header.os_version.as_ref().map(|v| v.to_string()).as_deref(),
        Some("iPhone OS 14.4 (18D52)")
    );

    let backtraces: Vec<_> = report.application_specific_backtraces().collect();
    assert_eq!(backtraces.len(), 1);
    assert_eq!(backtraces[0].number, 0);
    assert!(!backtraces[0].crashed);
    assert_eq!(
        frame_summary(backtraces[0]),
        [
            (0x1a8f2186c, Some("CoreFoundation"), Some(0x9586c), Some("__exceptionPreprocess")),
            (0x1bdf3cc50, Some("libobjc.A.dylib"), Some(0xbc50), Some("objc_exception_throw")),
        ]
    );

    let crashed = report.crashed_thread().expect("crashed thread");
    assert_eq!(crashed.number, 0);
    assert_eq!(crashed.name, None);
    assert_eq!(crashed.dispatch_queue.as_deref(), Some("com.apple.main-thread"));
    assert_eq!(
        frame_summary(crashed),
        [
            (0x1d3a2e414, Some("libsystem_kernel.dylib"), Some(0x25414), Some("__pthread_kill")),
            (0x104a0c3b8, Some("Example"), Some(0x83b8), None),
        ]
    );

    let threads: Vec<_> = report
        .threads()
        .iter()
        .map(|t| (t.number, t.crashed, t.application_specific, t.frames.len()))
        .collect();
    assert_eq!(threads, [(0, false, true, 2), (0, true, false, 2), (1, false, false, 1)]);

    let state = report.thread_state().expect("thread state");
    assert_eq!(state.flavor, "ARM Thread State (64-bit)");
    assert_eq!(state.registers.len(), 9);
    assert_eq!(state.register("lr"), Some(0x1f0c3a84c));
    assert_eq!(state.register("cpsr"), Some(0x40000000));

    let images = report.binary_images();
    assert_eq!(images.len(), 5);
    let flags: Vec<_> = images
        .iter()
        .map(|i| (i.identifier.as_str(), i.arch, i.is_main, i.is_user_code))
        .collect();
    assert_eq!(
        flags,
        [
            ("Example", Some(Arch::Arm64), true, true),
            ("CoreFoundation", Some(Arch::Arm64e), false, false),
            ("libobjc.A.dylib", Some(Arch::Arm64e), false, false),
            ("libsystem_kernel.dylib", Some(Arch::Arm64e), false, false),
            ("libsystem_pthread.dylib", Some(Arch::Arm64e), false, false),
        ]
    );

    assert!(!report.is_diagnostic_message_available());

    Ok(())
}

#[test]
fn test_ips_report() -> Result<(), Error> {
    let report = CrashReport::from_path(fixture("ips/example.ips"))?;

    assert_eq!(report.format(), ReportFormat::Ips);
    assert_eq!(report.process_name(), "Example");
    assert_eq!(report.report_version(), 12);
    assert_eq!(
        report.date_time().map(|d| d.to_rfc3339()).as_deref(),
        Some("2023-05-04T13:37:11.057300+02:00")
    );
    insta::assert_snapshot!(
        report.crash_signature().to_string(),
        @"EXC_BAD_ACCESS (SIGSEGV) on thread 1"
    );

    let header = report.header().expect("header");
    assert_eq!(header.process_id, Some(4242));
    assert_eq!(header.parent_process_name.as_deref(), Some("launchd"));
    assert_eq!(header.user_id, Some(501));
    assert_eq!(
        header.os_version.as_ref().map(|v| v.to_string()).as_deref(),
        Some("macOS 13.3 (22E252)")
    );
    assert_eq!(header.code_type, Some(Arch::Amd64));
    assert_eq!(header.system_integrity_protection, Some(true));
    assert_eq!(header.bundle_identifier.as_deref(), Some("com.example.Example"));
    assert_eq!(header.executable_version.as_deref(), Some("1.2 (34)"));
    assert_eq!(header.hardware_model.as_deref(), Some("MacBookPro16,1"));

    let exception = report.exception_information().expect("exception");
    assert_eq!(exception.exception_type, "EXC_BAD_ACCESS");
    assert_eq!(exception.signal.as_deref(), Some("SIGSEGV"));
    assert_eq!(
        exception.codes.as_deref(),
        Some("0x0000000000000001, 0x0000000000000010")
    );
    assert_eq!(exception.note.as_deref(), Some("EXC_CORPSE_NOTIFY"));
    assert_eq!(
        exception.termination_reason.as_deref(),
        Some("Namespace SIGNAL, Code 0xb")
    );
    assert_eq!(
        exception.terminating_process.as_deref(),
        Some("exc handler [4242]")
    );
    assert_eq!(exception.crashed_thread, Some(1));
    assert_eq!(exception.crashed_thread_queue.as_deref(), Some("com.example.worker"));

    assert_eq!(
        report.diagnostic_message().map(|m| m.text.as_str()),
        Some("crashed on purpose")
    );

    let crashed = report.crashed_thread().expect("crashed thread");
    assert_eq!(crashed.number, 1);
    assert_eq!(crashed.name.as_deref(), Some("worker"));
    assert_eq!(
        frame_summary(crashed),
        [
            (0x10c7f4020, Some("com.example.Example"), Some(0x1020), Some("main")),
            (0x7fff6d5a0008, Some("libsystem_kernel.dylib"), Some(8), None),
        ]
    );
    assert_eq!(crashed.frames[0].file.as_deref(), Some("main.c"));
    assert_eq!(crashed.frames[0].line, Some(42));
    assert_eq!(crashed.frames[0].symbol_offset, Some(32));

    let state = report.thread_state().expect("thread state");
    assert_eq!(state.thread, 1);
    assert_eq!(state.flavor, "x86_THREAD_STATE");
    assert_eq!(state.register("rip"), Some(0x10c7f4020));
    assert_eq!(state.register("cr2"), Some(16));

    let images = report.binary_images();
    assert_eq!(images.len(), 2);
    let main = images.main_image().expect("main image");
    assert_eq!(main.identifier, "com.example.Example");
    assert_eq!(main.range, AddressRange::new(0x10c7f3000, 0x2000).expect("range"));
    assert_eq!(main.version.as_deref(), Some("1.2"));
    assert_eq!(main.build.as_deref(), Some("34"));
    assert_eq!(main.arch, Some(Arch::Amd64));

    let kernel = images
        .image_by_identifier("libsystem_kernel.dylib")
        .expect("kernel image");
    assert!(!kernel.is_user_code);
    assert_eq!(
        kernel.uuid,
        Some(Uuid::parse_str("7c4a4e06-d2b2-3c5d-8e9f-0a1b2c3d4e5f")?)
    );

    Ok(())
}

#[test]
fn test_legacy_v10_report() -> Result<(), Error> {
    let text = "\
Process:         Tool [77]
Path:            /Users/me/bin/Tool
Identifier:      Tool
Code Type:       PPC (Native)
Date/Time:       2009-08-01 10:11:12 +0100
OS Version:      Mac OS X 10.4.11 (8S165)
Report Version:  4

Exception:  EXC_BAD_ACCESS (0x0001)
Exception Type:  EXC_BAD_ACCESS (SIGBUS)
Crashed Thread:  0

Thread 0 Crashed:
0   Tool       0x00002a10 helper + 16
1   libSystem.B.dylib  0x9000ad3c _start + 40

Binary Images:
    0x1000 -     0x3fff Tool ??? (???) <A2F6A4F1-5B63-3C8E-9E71-2B1F1E2D3C4B> /Users/me/bin/Tool
0x90000000 - 0x901fffff libSystem.B.dylib ??? (88.3.11) /usr/lib/libSystem.B.dylib
0x90400000 -        ??? libbroken.dylib ??? /usr/lib/libbroken.dylib
";

    let report: CrashReport = text.parse()?;
    assert_eq!(report.report_version(), 4);

    let header = report.header().expect("header");
    assert_eq!(header.code_type, Some(Arch::Ppc));

    let images = report.binary_images();
    assert_eq!(images.len(), 2);

    let tool = images.image_by_identifier("Tool").expect("tool");
    assert!(tool.is_main);
    assert!(tool.is_user_code);
    assert_eq!(tool.range.length(), 0x3000);
    assert_eq!(tool.version, None);

    let system = images.image_by_identifier("libSystem.B.dylib").expect("libSystem");
    assert!(!system.is_user_code);
    assert_eq!(system.version.as_deref(), Some("88.3.11"));
    assert_eq!(system.uuid, None);

    let crashed = report.crashed_thread().expect("crashed thread");
    assert_eq!(
        frame_summary(crashed),
        [
            (0x2a10, Some("Tool"), Some(0x1a10), Some("helper")),
            (0x9000ad3c, Some("libSystem.B.dylib"), Some(0xad3c), Some("_start")),
        ]
    );

    Ok(())
}

#[test]
fn test_duplicate_image_identifiers() -> Result<(), Error> {
    let text = "\
Process:         Tool [77]
Identifier:      Tool
Report Version:  12

Thread 0 Crashed:
0   libdup.dylib   0x0000000000002010 dup + 16
1   libdup.dylib   0x0000000000001020 dup + 32

Binary Images:
    0x1000 -     0x1fff libdup.dylib ??? (1.0) /usr/lib/first/libdup.dylib
    0x2000 -     0x2fff libdup.dylib ??? (2.0) /usr/lib/second/libdup.dylib
";

    let report: CrashReport = text.parse()?;
    assert_eq!(report.binary_images().len(), 2);

    let crashed = report.crashed_thread().expect("crashed thread");
    let paths: Vec<_> = crashed
        .frames
        .iter()
        .map(|frame| report.image_for_frame(frame).map(|image| image.path.as_str()))
        .collect();
    assert_eq!(
        paths,
        [
            Some("/usr/lib/second/libdup.dylib"),
            Some("/usr/lib/first/libdup.dylib"),
        ]
    );

    let second = report.image_for_frame(&crashed.frames[0]).expect("image");
    assert_eq!(second.load_address(), 0x2000);
    assert_eq!(crashed.frames[0].image_offset, Some(0x10));

    Ok(())
}

#[test]
fn test_missing_sections() -> Result<(), Error> {
    let report: CrashReport = "Process: Tool [1]\nReport Version: 12\n".parse()?;

    assert!(report.is_header_available());
    assert!(!report.is_exception_information_available());
    assert!(!report.is_diagnostic_message_available());
    assert!(!report.is_backtraces_available());
    assert!(!report.is_thread_state_available());
    assert!(!report.is_binary_images_available());
    assert_eq!(report.crashed_thread(), None);
    assert_eq!(report.date_time(), None);

    Ok(())
}

#[test]
fn test_finalize_is_idempotent() -> Result<(), Error> {
    for name in ["legacy/two_threads.crash", "legacy/ios_app.crash", "ips/example.ips"] {
        let data = std::fs::read(fixture(name))?;

        let report = CrashReport::parse(&data)?;
        let first = report.finalize_parsing();
        let second = report.finalize_parsing();
        assert!(std::ptr::eq(first, second));

        let other = CrashReport::parse(&data)?;
        assert_eq!(report, other);
        assert_eq!(first, other.finalize_parsing());
    }

    Ok(())
}

#[test]
fn test_parse_errors() {
    let error = CrashReport::from_slice(b"Path: /bin/tool\nReport Version: 12\n").unwrap_err();
    assert_eq!(error.kind(), ReportErrorKind::MissingProcessName);

    let error = CrashReport::from_slice(b"Process: tool [1]\n").unwrap_err();
    assert_eq!(error.kind(), ReportErrorKind::MissingReportVersion);

    let error = CrashReport::from_slice(b"{\"name\":\"tool\"}\n{\"procName\":").unwrap_err();
    assert_eq!(error.kind(), ReportErrorKind::InvalidPayload);

    let error = CrashReport::from_path(fixture("ips").join("missing.ips")).unwrap_err();
    assert_eq!(error.kind(), ReportErrorKind::Io);
}
