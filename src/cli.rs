// Command-line front end for ktiy.
//
// Subcommands build, inspect and extract KTIY archives. Everything here is
// glue over `format` and `io`; the CLI holds no format logic of its own.

use std::io::{self, Write};
use std::path::PathBuf;
use std::process;

use clap::{ArgAction, Args, Parser, Subcommand, ValueHint};

use crate::format::Archive;
use crate::format::header::{DESCRIPTOR_LEN, HEADER_LEN, MAGIC};
use crate::io::{self as kio, CollectOptions};

// ---------------------------------------------------------------------------
// --file NAME=PATH parsing
// ---------------------------------------------------------------------------

fn parse_file_spec(s: &str) -> Result<(String, PathBuf), String> {
    let (name, path) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=PATH, got '{s}'"))?;
    if name.is_empty() {
        return Err(format!("empty entry name in '{s}'"));
    }
    if path.is_empty() {
        return Err(format!("empty path in '{s}'"));
    }
    Ok((name.to_string(), PathBuf::from(path)))
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

// ---------------------------------------------------------------------------
// Clap CLI definition
// ---------------------------------------------------------------------------

/// KTIY initial ramdisk archive tool.
#[derive(Parser, Debug)]
#[command(
    name = "ktiy",
    version,
    about = "Build and inspect KTIY initrd archives",
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,

    /// Force overwrite existing output files.
    #[arg(short = 'f', long, global = true)]
    force: bool,

    /// Quiet mode (suppress non-error output).
    #[arg(short = 'q', long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Verbose mode (use multiple times for more detail).
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Output stats as JSON to stderr.
    #[arg(long = "json", global = true)]
    json_output: bool,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Build an archive from a directory and/or individual files.
    Pack(PackArgs),
    /// List the entries of an archive.
    List(ListArgs),
    /// Write one entry's content to stdout.
    Cat(CatArgs),
    /// Extract every entry into a directory.
    Unpack(UnpackArgs),
    /// Print build/format details.
    Config,
}

#[derive(Args, Debug)]
struct PackArgs {
    /// Directory whose files become entries (sorted by name).
    #[arg(long, short = 'd', value_hint = ValueHint::DirPath)]
    dir: Option<PathBuf>,

    /// Add a single file as entry NAME (repeatable, kept in order).
    #[arg(long = "file", value_name = "NAME=PATH", value_parser = parse_file_spec)]
    files: Vec<(String, PathBuf)>,

    /// Only take files directly inside --dir.
    #[arg(long = "no-recursive")]
    no_recursive: bool,

    /// Follow symbolic links inside --dir.
    #[arg(long = "follow-links")]
    follow_links: bool,

    /// Archive to write.
    #[arg(value_hint = ValueHint::FilePath)]
    output: PathBuf,
}

#[derive(Args, Debug)]
struct ListArgs {
    /// Archive to read.
    #[arg(value_hint = ValueHint::FilePath)]
    input: PathBuf,
}

#[derive(Args, Debug)]
struct CatArgs {
    /// Archive to read.
    #[arg(value_hint = ValueHint::FilePath)]
    input: PathBuf,

    /// Entry name.
    name: String,
}

#[derive(Args, Debug)]
struct UnpackArgs {
    /// Archive to read.
    #[arg(value_hint = ValueHint::FilePath)]
    input: PathBuf,

    /// Destination directory.
    #[arg(value_hint = ValueHint::DirPath)]
    dir: PathBuf,
}

// ---------------------------------------------------------------------------
// Resolved options
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Pack,
    List,
    Cat,
    Unpack,
    Config,
}

#[derive(Debug)]
struct Options {
    command: Command,
    force: bool,
    quiet: bool,
    verbose: u8,
    json_output: bool,
    source_dir: Option<PathBuf>,
    files: Vec<(String, PathBuf)>,
    collect: CollectOptions,
    input_file: Option<PathBuf>,
    output_file: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    entry_name: Option<String>,
}

impl Options {
    fn new(command: Command, cli: &Cli) -> Self {
        Self {
            command,
            force: cli.force,
            quiet: cli.quiet,
            verbose: cli.verbose.min(2),
            json_output: cli.json_output,
            source_dir: None,
            files: Vec::new(),
            collect: CollectOptions::default(),
            input_file: None,
            output_file: None,
            output_dir: None,
            entry_name: None,
        }
    }
}

fn resolve_options(cli: Cli) -> Options {
    match &cli.command {
        Cmd::Pack(args) => Options {
            source_dir: args.dir.clone(),
            files: args.files.clone(),
            collect: CollectOptions {
                recursive: !args.no_recursive,
                follow_links: args.follow_links,
            },
            output_file: Some(args.output.clone()),
            ..Options::new(Command::Pack, &cli)
        },
        Cmd::List(args) => Options {
            input_file: Some(args.input.clone()),
            ..Options::new(Command::List, &cli)
        },
        Cmd::Cat(args) => Options {
            input_file: Some(args.input.clone()),
            entry_name: Some(args.name.clone()),
            ..Options::new(Command::Cat, &cli)
        },
        Cmd::Unpack(args) => Options {
            input_file: Some(args.input.clone()),
            output_dir: Some(args.dir.clone()),
            ..Options::new(Command::Unpack, &cli)
        },
        Cmd::Config => Options::new(Command::Config, &cli),
    }
}

#[cfg(any(test, feature = "fuzzing"))]
pub fn fuzz_try_parse_args(args: &[String]) {
    let argv: Vec<String> = std::iter::once("ktiy".to_string())
        .chain(args.iter().cloned())
        .collect();
    if let Ok(cli) = Cli::try_parse_from(argv) {
        let _ = resolve_options(cli);
    }
}

// ---------------------------------------------------------------------------
// Config command
// ---------------------------------------------------------------------------

fn cmd_config() -> i32 {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!("ktiy version {version}");

    let file_io = cfg!(feature = "file-io") as u8;

    eprintln!("FILE_IO={file_io}");
    eprintln!("MAGIC={}", MAGIC.escape_ascii());
    eprintln!("HEADER_LEN={HEADER_LEN}");
    eprintln!("DESCRIPTOR_LEN={DESCRIPTOR_LEN}");

    0
}

// ---------------------------------------------------------------------------
// Pack command
// ---------------------------------------------------------------------------

/// Build an archive from `--dir` and `--file` inputs.
///
/// The existing-output check runs before the inputs are read and the final
/// rename happens after, so a file created at OUTPUT in between is replaced
/// even without `--force`.
fn cmd_pack(opts: &Options) -> i32 {
    let Some(output) = &opts.output_file else {
        eprintln!("ktiy: pack requires an output file");
        return 1;
    };
    if opts.source_dir.is_none() && opts.files.is_empty() {
        eprintln!("ktiy: pack requires --dir and/or --file");
        return 1;
    }
    if output.exists() && !opts.force {
        eprintln!(
            "ktiy: output file exists, use -f to overwrite: {}",
            output.display()
        );
        return 1;
    }

    let mut entries: Vec<(String, Vec<u8>)> = match &opts.source_dir {
        Some(dir) => match kio::collect_dir(dir, &opts.collect) {
            Ok(entries) => entries,
            Err(e) => {
                eprintln!("ktiy: source dir: {}: {e}", dir.display());
                return 1;
            }
        },
        None => Vec::new(),
    };

    for (name, path) in &opts.files {
        match std::fs::read(path) {
            Ok(data) => entries.push((name.clone(), data)),
            Err(e) => {
                eprintln!("ktiy: input file: {}: {e}", path.display());
                return 1;
            }
        }
    }

    let stats = match kio::pack_file(output, entries) {
        Ok(stats) => stats,
        Err(e) => {
            eprintln!("ktiy: pack error: {e}");
            return 1;
        }
    };

    if opts.verbose > 0 && !opts.quiet {
        eprintln!(
            "ktiy: packed {} entries, data size: {}, archive size: {}",
            stats.entry_count, stats.data_len, stats.archive_len
        );
        if let Some(digest) = &stats.archive_sha256 {
            eprintln!("ktiy: sha256: {}", hex(digest));
        }
    }

    if opts.json_output {
        let json = serde_json::json!({
            "command": "pack",
            "output": output.display().to_string(),
            "entries": stats.entry_count,
            "data_size": stats.data_len,
            "archive_size": stats.archive_len,
            "sha256": stats.archive_sha256.as_ref().map(|d| hex(d)),
        });
        eprintln!("{json:#}");
    }

    0
}

// ---------------------------------------------------------------------------
// Read-side commands (list, cat, unpack)
// ---------------------------------------------------------------------------

fn load_input(opts: &Options) -> Option<Vec<u8>> {
    let path = match &opts.input_file {
        Some(path) => path,
        None => {
            eprintln!("ktiy: an input archive is required");
            return None;
        }
    };
    match kio::read_archive_file(path) {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            eprintln!("ktiy: input file: {}: {e}", path.display());
            None
        }
    }
}

fn parse_or_report(bytes: &[u8]) -> Option<Archive<'_>> {
    match Archive::parse(bytes) {
        Ok(archive) => Some(archive),
        Err(e) => {
            eprintln!("ktiy: decode error: {e}");
            None
        }
    }
}

fn cmd_list(opts: &Options) -> i32 {
    let Some(bytes) = load_input(opts) else {
        return 1;
    };
    let Some(archive) = parse_or_report(&bytes) else {
        return 1;
    };

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut write_listing = || -> io::Result<()> {
        if !opts.quiet {
            writeln!(out, "index   name_off   data_off     length  name")?;
        }
        for (i, entry) in archive.iter().enumerate() {
            let d = entry.descriptor;
            writeln!(
                out,
                "{i:>5} {:>10} {:>10} {:>10}  {}",
                d.name_offset,
                d.data_offset,
                d.data_length,
                entry.name.escape_ascii()
            )?;
        }
        out.flush()
    };
    if let Err(e) = write_listing() {
        eprintln!("ktiy: write error: {e}");
        return 1;
    }

    if opts.json_output {
        let entries: Vec<_> = archive
            .iter()
            .map(|e| {
                serde_json::json!({
                    "name": e.name.escape_ascii().to_string(),
                    "name_offset": e.descriptor.name_offset,
                    "data_offset": e.descriptor.data_offset,
                    "data_length": e.descriptor.data_length,
                })
            })
            .collect();
        let json = serde_json::json!({
            "command": "list",
            "entries": entries,
            "string_table_size": archive.header().string_table_size,
            "data_section_size": archive.data_section().len(),
        });
        eprintln!("{json:#}");
    }

    0
}

fn cmd_cat(opts: &Options) -> i32 {
    let Some(name) = &opts.entry_name else {
        eprintln!("ktiy: cat requires an entry name");
        return 1;
    };
    let Some(bytes) = load_input(opts) else {
        return 1;
    };
    let Some(archive) = parse_or_report(&bytes) else {
        return 1;
    };

    let Some(content) = archive.get(name) else {
        eprintln!("ktiy: no entry named '{name}'");
        return 1;
    };

    let stdout = io::stdout();
    let mut out = stdout.lock();
    if let Err(e) = out.write_all(content).and_then(|()| out.flush()) {
        eprintln!("ktiy: write error: {e}");
        return 1;
    }
    0
}

fn cmd_unpack(opts: &Options) -> i32 {
    let (Some(input), Some(dir)) = (&opts.input_file, &opts.output_dir) else {
        eprintln!("ktiy: unpack requires an input archive and a directory");
        return 1;
    };

    match kio::unpack_file(input, dir, opts.force) {
        Ok(stats) => {
            if opts.verbose > 0 && !opts.quiet {
                eprintln!(
                    "ktiy: unpacked {} files ({} bytes) into {}",
                    stats.files,
                    stats.bytes,
                    dir.display()
                );
            }
            if opts.json_output {
                let json = serde_json::json!({
                    "command": "unpack",
                    "files": stats.files,
                    "bytes": stats.bytes,
                });
                eprintln!("{json:#}");
            }
            0
        }
        Err(kio::IoError::OutputExists(path)) => {
            eprintln!(
                "ktiy: output file exists, use -f to overwrite: {}",
                path.display()
            );
            1
        }
        Err(e) => {
            eprintln!("ktiy: unpack error: {e}");
            1
        }
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn log_filter(opts: &Options) -> &'static str {
    if opts.quiet {
        return "error";
    }
    match opts.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    }
}

/// Main CLI entry point. Parses arguments via clap, dispatches commands.
pub fn run() -> ! {
    let cli = Cli::parse();
    let opts = resolve_options(cli);

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_filter(&opts)))
        .format_timestamp(None)
        .format_target(false)
        .init();

    let exit_code = match opts.command {
        Command::Pack => cmd_pack(&opts),
        Command::List => cmd_list(&opts),
        Command::Cat => cmd_cat(&opts),
        Command::Unpack => cmd_unpack(&opts),
        Command::Config => cmd_config(),
    };

    process::exit(exit_code);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
