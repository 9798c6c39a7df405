use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::Parser;

use crashlog::report::{CrashReport, Thread};
use crashlog::symbolicate::{DirectoryLocator, ObjectLocator, PathMapLocator, Symbolicator};

/// Symbolicates the backtraces of an Apple crash report.
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the crash report, either a `.crash` text report or an `.ips` file.
    report: PathBuf,

    /// Maps an image identifier to an object file, as `IDENTIFIER=PATH`.
    #[arg(short, long = "object", value_name = "IDENTIFIER=PATH", value_parser = parse_mapping)]
    objects: Vec<(String, PathBuf)>,

    /// Searches a directory for dSYM bundles and objects named like the images.
    #[arg(short = 'd', long = "search-dir", value_name = "DIR")]
    search_dirs: Vec<PathBuf>,

    /// Symbolicates all threads instead of only the crashed thread.
    #[arg(short, long)]
    all_threads: bool,

    /// Prints debug logs.
    #[arg(short, long)]
    verbose: bool,
}

fn parse_mapping(value: &str) -> Result<(String, PathBuf)> {
    let (identifier, path) = value
        .split_once('=')
        .ok_or_else(|| anyhow!("expected IDENTIFIER=PATH"))?;
    Ok((identifier.to_owned(), PathBuf::from(path)))
}

/// Tries the explicit mappings first, then the search directories.
struct CombinedLocator {
    mappings: PathMapLocator,
    directories: DirectoryLocator,
}

impl ObjectLocator for CombinedLocator {
    fn locate(&self, image: &crashlog::report::BinaryImage) -> Option<PathBuf> {
        self.mappings
            .locate(image)
            .or_else(|| self.directories.locate(image))
    }
}

async fn print_thread(symbolicator: &Symbolicator, report: &CrashReport, thread: &Thread) {
    match (thread.application_specific, thread.crashed) {
        (true, _) => println!("Application Specific Backtrace {}:", thread.number),
        (false, true) => println!("Thread {} Crashed:", thread.number),
        (false, false) => println!("Thread {}:", thread.number),
    }

    let results = symbolicator.symbolicate_thread(report, thread).await;
    for (frame, data) in thread.frames.iter().zip(results) {
        let image = frame
            .image_identifier
            .as_deref()
            .or(frame.image_name.as_deref())
            .unwrap_or("???");

        print!("{:<4}{:<32}{:#018x} ", frame.index, image, frame.address);
        match (data.found, data.symbol.as_deref(), frame.symbol.as_deref()) {
            (true, Some(symbol), _) | (false, _, Some(symbol)) => print!("{symbol}"),
            _ => print!("??"),
        }
        if let Some(ref file) = data.file {
            match data.line {
                Some(line) => print!(" ({file}:{line})"),
                None => print!(" ({file})"),
            }
        }
        println!();
    }

    println!();
}

async fn execute(cli: Cli) -> Result<()> {
    let report = CrashReport::from_path(&cli.report)
        .with_context(|| format!("failed to parse {}", cli.report.display()))?;

    println!("Process:  {}", report.process_name());
    if let Some(date_time) = report.date_time() {
        println!("Date:     {date_time}");
    }
    println!("Format:   {} (version {})", report.format(), report.report_version());
    println!("Crash:    {}", report.crash_signature());
    println!();

    let mut mappings = PathMapLocator::new();
    for (identifier, path) in cli.objects {
        mappings.insert_identifier(identifier, path);
    }

    let symbolicator = Symbolicator::new(CombinedLocator {
        mappings,
        directories: DirectoryLocator::new(cli.search_dirs),
    });

    if cli.all_threads {
        for thread in report.threads() {
            print_thread(&symbolicator, &report, thread).await;
        }
    } else {
        let thread = report
            .crashed_thread()
            .context("the report has no crashed thread")?;
        print_thread(&symbolicator, &report, thread).await;
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        true => tracing::Level::DEBUG,
        false => tracing::Level::WARN,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    execute(cli).await
}
