//! Kivi REPL and file runner
//!
//! Loads the files given on the command line, then reads expressions from
//! stdin, printing each top-level value followed by any errors drained
//! from the runtime's ring.

use std::io::{BufRead, Write};
use std::path::PathBuf;

use clap::Parser;

use kivi_engine::runtime::print::format_value;
use kivi_engine::{Reader, Runtime, RuntimeOptions};

#[derive(Parser, Debug)]
#[command(name = "kivi")]
#[command(about = "Kivi language interpreter and JIT")]
#[command(version)]
struct Cli {
    /// Heap growth threshold as a percentage of a semi-space
    #[arg(short = 'm', long = "memory-threshold", default_value_t = 75,
          value_parser = clap::value_parser!(u8).range(1..=99))]
    memory_threshold: u8,

    /// Log each garbage collection to stderr
    #[arg(short = 'g', long = "gc-log")]
    gc_log: bool,

    /// Quiet REPL: no banner, no prompt
    #[arg(short = 'q', long)]
    quiet: bool,

    /// Echo parsed input before evaluating it
    #[arg(short = 'e', long)]
    echo: bool,

    /// Debug logging (debug builds)
    #[arg(short = 'd', long)]
    debug: bool,

    /// Trace each evaluation with a depth marker (debug builds)
    #[arg(short = 's', long = "stack-trace")]
    stack_trace: bool,

    /// Files to load before the REPL starts
    files: Vec<PathBuf>,
}

fn main() {
    let cli = Cli::parse();

    let mut rt = Runtime::new(RuntimeOptions {
        grow_threshold: cli.memory_threshold,
        gc_verbose: cli.gc_log,
        debug: cli.debug,
        stack_trace: cli.stack_trace,
        echo: cli.echo,
        ..RuntimeOptions::default()
    });

    for file in &cli.files {
        rt.load_file(&file.to_string_lossy());
        drain_errors(&mut rt);
        if !rt.running {
            return;
        }
    }

    repl(&mut rt, cli.quiet);
}

fn repl(rt: &mut Runtime, quiet: bool) {
    if !quiet {
        println!("kivi {}", env!("CARGO_PKG_VERSION"));
    }

    let stdin = std::io::stdin();
    let mut lines = stdin.lock().lines();
    let mut pending = String::new();

    while rt.running {
        if !quiet {
            print!("{}", if pending.is_empty() { "> " } else { ".. " });
            let _ = std::io::stdout().flush();
        }
        let Some(Ok(line)) = lines.next() else {
            break;
        };
        pending.push_str(&line);
        pending.push('\n');

        // Keep reading until the parens balance out.
        if open_parens(&pending) > 0 {
            continue;
        }
        let source = std::mem::take(&mut pending);
        if rt.options.echo {
            print!("{source}");
        }

        let mut reader = Reader::new(&source);
        while let Some(expr) = reader.read(rt) {
            let value = rt.eval(expr);
            println!("{}", format_value(value));
            if !rt.running {
                break;
            }
        }
        drain_errors(rt);
    }
}

fn drain_errors(rt: &mut Runtime) {
    for err in rt.drain_errors() {
        eprintln!("error: {err}");
    }
}

/// Net unclosed parens, ignoring comments. Negative means too many
/// closers; hand it to the reader and let it report.
fn open_parens(src: &str) -> i32 {
    let mut depth = 0;
    let mut in_comment = false;
    for c in src.chars() {
        match c {
            '\n' => in_comment = false,
            _ if in_comment => {}
            ';' => in_comment = true,
            '(' => depth += 1,
            ')' => depth -= 1,
            _ => {}
        }
    }
    depth
}
