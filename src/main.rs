//! Run a command on a pseudo-terminal and print what it wrote.

use anyhow::{bail, Context, Result};
use clap::Parser;
use expectpty::{run_with, Defaults, Pattern, PtyStrategy, RunOptions};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "expectpty")]
#[command(author, version, about = "Run a command on a pseudo-terminal and print its output", long_about = None)]
struct Args {
    /// Give up after this many seconds
    #[arg(short, long)]
    timeout: Option<f64>,

    /// Working directory for the command
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// Extra environment variable (KEY=VALUE), may be repeated
    #[arg(short, long = "env", value_name = "KEY=VALUE")]
    env: Vec<String>,

    /// Start from an empty environment instead of inheriting this one
    #[arg(long)]
    clear_env: bool,

    /// Answer a prompt: whenever PROMPT appears, send REPLY and a newline
    #[arg(short, long = "respond", value_name = "PROMPT=REPLY")]
    respond: Vec<String>,

    /// How to allocate the terminal: native or manual
    #[arg(long)]
    pty: Option<String>,

    /// Command to run, followed by its arguments
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

fn split_pair(raw: &str, what: &str) -> Result<(String, String)> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_owned(), value.to_owned())),
        _ => bail!("invalid {what} '{raw}', expected KEY=VALUE"),
    }
}

/// Quote a word so the command-line splitter hands it back unchanged.
fn quote(word: &str) -> String {
    format!("'{}'", word.replace('\'', r"'\''"))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if let Some(raw) = &args.pty {
        let strategy: PtyStrategy = raw
            .parse()
            .map_err(|()| anyhow::anyhow!("unknown pty strategy '{raw}', expected native or manual"))?;
        let defaults = Defaults {
            pty_strategy: strategy,
            ..Defaults::from_env()
        };
        if Defaults::install(defaults).is_err() {
            bail!("defaults were already initialized");
        }
    }

    let env = if args.clear_env || !args.env.is_empty() {
        let mut vars: Vec<(String, String)> = if args.clear_env {
            Vec::new()
        } else {
            std::env::vars().collect()
        };
        for raw in &args.env {
            let (key, value) = split_pair(raw, "environment variable")?;
            vars.retain(|(k, _)| *k != key);
            vars.push((key, value));
        }
        Some(vars)
    } else {
        None
    };

    let events = args
        .respond
        .iter()
        .map(|raw| {
            let (prompt, reply) = split_pair(raw, "response")?;
            Ok((Pattern::exact(prompt), format!("{reply}\n").into_bytes()))
        })
        .collect::<Result<Vec<_>>>()?;

    let options = RunOptions {
        cwd: args.cwd,
        env,
        timeout: args.timeout.map(Duration::from_secs_f64),
        events,
    };

    let command_line = args.command.iter().map(|w| quote(w)).collect::<Vec<_>>().join(" ");
    let output = run_with(&command_line, options).with_context(|| format!("running {}", args.command.join(" ")))?;

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&output.output)?;
    stdout.flush()?;

    let code = match (output.exit_status, output.signal_status) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal as i32,
        (None, None) => 1,
    };
    std::process::exit(code);
}
