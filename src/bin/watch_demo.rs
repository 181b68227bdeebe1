//! Smoke-test harness for `modwatch`, not the project's real surface CLI
//! (spec.md §6 treats that as an external collaborator). Watches a module
//! and prints each diff's changed/removed package names until interrupted.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use modwatch::{Watcher, WatcherConfig};

#[derive(Parser)]
#[command(name = "watch_demo", about = "Exercise modwatch against a real Go module")]
struct Cli {
    /// Directory to start module discovery from (defaults to cwd).
    #[arg(long)]
    dir: Option<PathBuf>,

    /// Poll interval in milliseconds.
    #[arg(long, default_value_t = 200)]
    interval_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let watcher = Watcher::with_config(WatcherConfig {
        directory: cli.dir,
        interval: Some(Duration::from_millis(cli.interval_ms)),
        ignore: None,
    });

    let (mut rx, id) = watcher.watch().await?;
    println!("watching {} ({}), subscription {id}", watcher.name(), watcher.dir().display());

    loop {
        if rx.changed().await.is_err() {
            println!("watcher stopped");
            break;
        }
        let Some(diff) = rx.borrow_and_update().clone() else {
            continue;
        };
        diff.for_each_changed(|pkg| {
            println!("changed: {}", pkg.rel_path);
            false
        });
        diff.for_each_removed(|pkg| {
            println!("removed: {}", pkg.rel_path);
            false
        });
    }

    Ok(())
}
