//! linewatch CLI
//!
//! Reads records from standard input and reacts to a small set of built-in
//! triggers, plus any `--watch` patterns given on the command line.

use std::io::{self, BufReader, Write};
use std::sync::{Arc, Weak};

use anyhow::{bail, Context};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use linewatch::{Console, ConsoleConfig, Record};

#[derive(Debug, Parser)]
#[command(name = "linewatch", version, about = "Dispatch stdin records to triggers")]
struct Args {
    /// Record delimiter (a single ASCII character, `\n`, `\t` or `\0`)
    #[arg(short, long, env = "LINEWATCH_DELIMITER", default_value = "\\n")]
    delimiter: String,

    /// Records the reader may queue ahead of dispatch
    #[arg(long, env = "LINEWATCH_QUEUE_CAPACITY", default_value_t = 1024)]
    queue_capacity: usize,

    /// Regex to watch for; matching records are echoed (repeatable)
    #[arg(short, long = "watch", value_name = "REGEX")]
    watches: Vec<String>,

    /// Echo watched records as JSON lines
    #[arg(long)]
    json: bool,

    /// Log level used when RUST_LOG is not set
    #[arg(long, env = "LINEWATCH_LOG", default_value = "info")]
    log_level: String,
}

fn parse_delimiter(raw: &str) -> anyhow::Result<u8> {
    match raw {
        "\\n" => Ok(b'\n'),
        "\\t" => Ok(b'\t'),
        "\\0" => Ok(0),
        s if s.len() == 1 && s.is_ascii() => Ok(s.as_bytes()[0]),
        other => bail!("delimiter must be a single ASCII character, got {other:?}"),
    }
}

fn echo(rec: &Record, json: bool) {
    let line = if json {
        match serde_json::to_string(rec) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode record");
                return;
            }
        }
    } else {
        format!("[{}] {}", rec.seq(), rec.text())
    };

    let mut out = io::stdout().lock();
    let _ = writeln!(out, "{line}");
}

fn stop_on(console: &Arc<Console>, trigger: &str) {
    let weak: Weak<Console> = Arc::downgrade(console);
    console.register_exact(trigger, move |_rec: Record| {
        if let Some(console) = weak.upgrade() {
            tracing::info!("stop requested from input");
            console.stop();
        }
    });
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(io::stderr),
        )
        .init();

    let cfg = ConsoleConfig {
        delimiter: parse_delimiter(&args.delimiter)?,
        record_queue_capacity: args.queue_capacity,
        ..ConsoleConfig::default()
    };
    let console = Arc::new(Console::with_config(BufReader::new(io::stdin()), cfg));

    stop_on(&console, "quit");
    stop_on(&console, "exit");
    console.register_exact("ping", |_rec: Record| {
        let _ = writeln!(io::stdout().lock(), "pong");
    });

    for pattern in &args.watches {
        let json = args.json;
        console
            .register_regex(pattern, move |rec: Record| echo(&rec, json))
            .with_context(|| format!("invalid --watch pattern {pattern:?}"))?;
    }

    tracing::info!(triggers = console.triggers().len(), "monitoring stdin");
    console.start().context("reading stdin")?;

    let stats = console.stats();
    tracing::info!(
        records = stats.records_dispatched,
        launched = stats.callbacks_launched,
        panicked = stats.callbacks_panicked,
        "done"
    );
    Ok(())
}
