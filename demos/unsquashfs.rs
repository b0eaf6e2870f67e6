use unsquash::{Archive, ExtractOptions, Node};

use positioned_io::ReadAt;
use sloggers::terminal::{Destination, TerminalLoggerBuilder};
use sloggers::types::{Format, Severity};
use sloggers::Build;

const USAGE: &str = "usage: unsquashfs [-l] [-v] [-L] [-u] [-k] [-d DEST] IMAGE [PATH]

  -l       list PATH instead of extracting it
  -v       log every extracted file
  -L       extract what symlinks point to instead of the links
  -u       also extract the targets of symlinks
  -k       keep going after errors
  -d DEST  extract into DEST (default: squashfs-root)";

#[derive(Debug, Default)]
struct Args {
    list: bool,
    dest: Option<String>,
    image: Option<String>,
    path: Option<String>,
    options: ExtractOptions,
}

fn parse_args() -> Option<Args> {
    let mut args = Args::default();
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-l" => args.list = true,
            "-v" => args.options.verbose = true,
            "-L" => args.options.dereference = true,
            "-u" => args.options.unbreak = true,
            "-k" => args.options.allow_errors = true,
            "-d" => args.dest = Some(iter.next()?),
            _ if arg.starts_with('-') => return None,
            _ if args.image.is_none() => args.image = Some(arg),
            _ if args.path.is_none() => args.path = Some(arg),
            _ => return None,
        }
    }
    args.image.as_ref()?;
    Some(args)
}

fn main() {
    std::process::exit(real_main());
}

fn real_main() -> i32 {
    let args = match parse_args() {
        Some(args) => args,
        None => {
            eprintln!("{}", USAGE);
            return 2;
        }
    };

    let mut builder = TerminalLoggerBuilder::new();
    builder.level(if args.options.verbose {
        Severity::Info
    } else {
        Severity::Warning
    });
    builder.destination(Destination::Stderr);
    builder.format(Format::Compact);
    let logger = match builder.build() {
        Ok(logger) => logger,
        Err(e) => {
            eprintln!("Unable to set up logging: {}", e);
            return 1;
        }
    };

    let image = args.image.as_deref().unwrap_or_default();
    let archive = match Archive::open_with_logger(image, logger.clone()) {
        Ok(archive) => archive,
        Err(e) => {
            slog::crit!(logger, "{}", e);
            return 1;
        }
    };
    let node = match archive.root().lookup(args.path.as_deref().unwrap_or("")) {
        Ok(node) => node,
        Err(e) => {
            slog::crit!(logger, "{}", e);
            return 1;
        }
    };

    if args.list {
        return match list(&node) {
            Ok(()) => 0,
            Err(e) => {
                slog::crit!(logger, "{}", e);
                1
            }
        };
    }

    let dest = args.dest.as_deref().unwrap_or("squashfs-root");
    match node.extract_with_options(dest, &args.options) {
        Ok(report) => {
            for e in &report.metadata_errors {
                slog::warn!(logger, "{}", e);
            }
            if report.errors.is_empty() {
                0
            } else {
                slog::error!(logger, "{} entries could not be extracted", report.errors.len());
                1
            }
        }
        Err(e) => {
            slog::crit!(logger, "{}", e);
            1
        }
    }
}

fn list<R: ReadAt>(node: &Node<R>) -> unsquash::Result<()> {
    if !node.is_dir() {
        println!("{}", node.metadata()?);
        return Ok(());
    }
    let dir = node.as_dir()?;
    for entry in dir.entries() {
        println!("{}", dir.stat(escape_name(&entry.name))?);
    }
    Ok(())
}

/// Escape wildcard characters, so a lookup finds exactly `name`
fn escape_name(name: &[u8]) -> Vec<u8> {
    let mut escaped = Vec::with_capacity(name.len());
    for &b in name {
        if matches!(b, b'*' | b'?' | b'[' | b'\\') {
            escaped.push(b'\\');
        }
        escaped.push(b);
    }
    escaped
}
