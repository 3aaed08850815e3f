use std::time::Duration;

use clap::Parser;
use gsquery::{QueryEngine, QueryError, Target, TargetRecord};
use log::debug;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

/// Query game servers and print one JSON result per line.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Per-request timeout in milliseconds
    #[clap(short, long, default_value = "2000")]
    timeout_ms: u64,
    /// Log debug output (RUST_LOG overrides)
    #[clap(short, long)]
    verbose: bool,
    /// Servers as `game:address:port`. Without any, newline-delimited
    /// `{"address", "port", "game"}` records are read from stdin.
    targets: Vec<String>,
}

/// Feed stdin records to `entries` as they are read.
async fn read_records(entries: mpsc::Sender<Result<Target, QueryError>>) -> std::io::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let entry = TargetRecord::from_json(&line).and_then(Target::try_from);
        if entries.send(entry).await.is_err() {
            break;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    let engine = QueryEngine::new(Some(Duration::from_millis(args.timeout_ms)));
    let (entries, entries_rx) = mpsc::channel(64);
    let mut results = engine.query_stream(entries_rx);

    let reader = if args.targets.is_empty() {
        tokio::spawn(read_records(entries))
    } else {
        debug!("{} target(s) to query", args.targets.len());
        let parsed: Vec<Result<Target, QueryError>> = args.targets.iter().map(|arg| arg.parse()).collect();
        tokio::spawn(async move {
            for entry in parsed {
                if entries.send(entry).await.is_err() {
                    break;
                }
            }
            Ok::<_, std::io::Error>(())
        })
    };

    while let Some(result) = results.recv().await {
        println!("{}", serde_json::to_string(&result)?);
    }
    reader.await??;

    Ok(())
}
