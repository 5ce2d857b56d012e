//! Command-line front end (SPEC_FULL.md §6.4), grounded on the original's
//! `main.c` `argc` dispatch: one argument enumerates a library's entries,
//! two open, decode and print a single entry's source.

use std::process::ExitCode;

use clap::Parser;
use pbd_decompiler::arena::Arena;
use pbd_decompiler::class_group::parse_entry;
use pbd_decompiler::library::Library;
use pbd_decompiler::printer::write_group;
use pbd_decompiler::schema::PbVersion;

/// Decompile PowerBuilder `.pbl`/`.pbd` library entries to PowerScript source.
#[derive(Parser, Debug)]
#[command(name = "pbdump", version, about)]
struct Args {
    /// Library file to open.
    library: String,

    /// Entry name to decode; omit to list every entry.
    entry: Option<String>,

    /// Raise log verbosity (repeatable: warn -> info -> debug -> trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    let library = match Library::open(&args.library) {
        Ok(lib) => lib,
        Err(e) => {
            eprintln!("pbdump: {}: {e}", args.library);
            return ExitCode::FAILURE;
        }
    };

    match args.entry {
        None => {
            let mut failed = false;
            if let Err(e) = library.enumerate(|entry| println!("Entry {}", entry.name)) {
                eprintln!("pbdump: {}: {e}", args.library);
                failed = true;
            }
            if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS }
        }
        Some(name) => run_decode(&library, &name),
    }
}

fn run_decode(library: &Library, name: &str) -> ExitCode {
    let entry = match library.find(name) {
        Ok(Some(entry)) => entry,
        Ok(None) => {
            eprintln!("pbdump: entry not found: {name}");
            return ExitCode::FAILURE;
        }
        Err(e) => {
            eprintln!("pbdump: {e}");
            return ExitCode::FAILURE;
        }
    };

    let body = match library.read_entry(&entry) {
        Ok(body) => body,
        Err(e) => {
            eprintln!("pbdump: {e}");
            return ExitCode::FAILURE;
        }
    };

    let arena = Arena::new();
    let group = match parse_entry(&body, &arena) {
        Ok(group) => group,
        Err(e) => {
            eprintln!("pbdump: {name}: {e}");
            return ExitCode::FAILURE;
        }
    };

    let unicode = PbVersion::unicode_strings(group.compiler_version);
    print!("{}", write_group(&group, unicode, &arena));
    ExitCode::SUCCESS
}
