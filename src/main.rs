//! folio - inspect EPUB structure and narration

use std::process::ExitCode;

use clap::Parser;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use folio::{Book, Diagnostic, LoadedBook, NarrationState, SyncEngine, read_epub};

#[derive(Parser)]
#[command(name = "folio")]
#[command(version, about = "Inspect EPUB structure and media overlays", long_about = None)]
#[command(after_help = "EXAMPLES:
    folio book.epub                      Show metadata and spine
    folio book.epub --toc                Also print the table of contents
    folio book.epub --at 5 --spine 2     Narrated fragment at 5s in spine item 2
    folio book.epub --json               Machine-readable output")]
struct Cli {
    /// EPUB file to inspect
    #[arg(value_name = "EPUB")]
    input: String,

    /// Print the table of contents
    #[arg(long)]
    toc: bool,

    /// Resolve the narrated fragment at this playback time (seconds)
    #[arg(long, value_name = "SECONDS", requires = "spine")]
    at: Option<f64>,

    /// Spine index used with --at
    #[arg(long, value_name = "N")]
    spine: Option<usize>,

    /// Emit JSON instead of text
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct Report<'a> {
    identity: &'a str,
    metadata: &'a folio::Metadata,
    spine: Vec<SpineLine<'a>>,
    has_audio: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    toc: Option<&'a [folio::TocEntry]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    narration: Option<NarrationState>,
    diagnostics: Vec<String>,
}

#[derive(Serialize)]
struct SpineLine<'a> {
    index: usize,
    id: &'a str,
    path: &'a str,
    linear: bool,
    narrated: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<(), String> {
    let loaded = read_epub(&cli.input).map_err(|e| e.to_string())?;
    let book = &loaded.book;

    let narration = match (cli.at, cli.spine) {
        (Some(time), Some(spine)) => {
            if spine >= book.spine_len() {
                return Err(format!("spine index {spine} out of range (0..{})", book.spine_len()));
            }
            let mut engine = SyncEngine::new(book.clone(), spine);
            engine.seek(time);
            Some(engine.state())
        }
        _ => None,
    };

    if cli.json {
        let report = build_report(&loaded, cli.toc, narration);
        let json = serde_json::to_string_pretty(&report).map_err(|e| e.to_string())?;
        println!("{json}");
    } else {
        print_text(&cli.input, &loaded, cli.toc, narration.as_ref());
    }
    Ok(())
}

fn spine_lines(book: &Book) -> Vec<SpineLine<'_>> {
    book.spine()
        .iter()
        .enumerate()
        .map(|(index, item)| SpineLine {
            index,
            id: &item.resource_id,
            path: book.resource(&item.resource_id).map_or("", |r| r.path.as_str()),
            linear: item.linear,
            narrated: book.media_overlay(index).is_some(),
        })
        .collect()
}

fn build_report(loaded: &LoadedBook, toc: bool, narration: Option<NarrationState>) -> Report<'_> {
    let book = &loaded.book;
    Report {
        identity: book.identity(),
        metadata: book.metadata(),
        spine: spine_lines(book),
        has_audio: book.has_audio(),
        toc: toc.then(|| book.toc()),
        narration,
        diagnostics: loaded.diagnostics.iter().map(Diagnostic::to_string).collect(),
    }
}

fn print_text(path: &str, loaded: &LoadedBook, toc: bool, narration: Option<&NarrationState>) {
    let book = &loaded.book;
    let meta = book.metadata();

    println!("File: {path}");
    println!("Title: {}", meta.title);
    if !meta.authors.is_empty() {
        println!("Authors: {}", meta.authors.join(", "));
    }
    if !meta.language.is_empty() {
        println!("Language: {}", meta.language);
    }
    println!("Identity: {}", book.identity());
    if let Some(cover) = book.cover_resource() {
        println!("Cover: {}", cover.path);
    }
    println!("Audio: {}", if book.has_audio() { "yes" } else { "no" });

    println!("Spine ({} items):", book.spine_len());
    for line in spine_lines(book) {
        let mut flags = String::new();
        if !line.linear {
            flags.push_str(" [non-linear]");
        }
        if line.narrated {
            flags.push_str(" [narrated]");
        }
        println!("  {:>3}  {}{}", line.index, line.path, flags);
    }

    if toc {
        println!("Contents:");
        for (depth, entry) in book.toc_flat() {
            let anchor = entry
                .target
                .fragment
                .as_deref()
                .map(|f| format!("#{f}"))
                .unwrap_or_default();
            println!("  {}{} -> {}{}", "  ".repeat(depth), entry.title, entry.target.resource_id, anchor);
        }
    }

    if let Some(state) = narration {
        match &state.highlighted {
            Some(fragment) => println!("Narrating: #{fragment} at {:.3}s in spine item {}", state.time, state.spine_index),
            None => println!("Narrating: nothing at {:.3}s in spine item {}", state.time, state.spine_index),
        }
    }

    for diagnostic in &loaded.diagnostics {
        eprintln!("warning: {diagnostic}");
    }
}
