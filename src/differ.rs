//! The single producer task: owns the subscriber table, the rolling
//! snapshot and the poll timer. All communication in and out is by message
//! passing over channels; nothing here is shared with any other task.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};

use crate::scanner;
use crate::snapshot::{Diff, Snapshot};

/// Per-subscriber state the Differ keeps. Spec.md's coalescing protocol
/// tracks `last_reported` and `last_polled` separately, but its own
/// description of the drain step shows both branches always set
/// `last_polled := last_reported` — the two fields are provably always
/// equal, so only one is kept here. A [`watch`] channel already delivers
/// "only the newest value, older undelivered ones are overwritten"
/// without an explicit non-blocking drain, which is what the capacity-1
/// `mpsc` in spec.md's source system approximates by hand.
struct SubState {
    tx: watch::Sender<Option<Diff>>,
    last_reported: Option<Snapshot>,
}

enum Command {
    Subscribe { id: u64, tx: watch::Sender<Option<Diff>> },
    Unsubscribe(u64),
    QueryWatched(oneshot::Sender<bool>),
}

/// A handle to a running Differ task. Cloned freely; all clones forward
/// commands to the same background task.
#[derive(Clone)]
pub struct DifferHandle {
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl DifferHandle {
    pub fn spawn(root: PathBuf, interval: Duration, ignore: Vec<String>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        tokio::spawn(run(root, interval, ignore, cmd_rx));
        Self { cmd_tx }
    }

    /// Register a new subscription and return its diff stream. The caller
    /// supplies `id`; the Differ never allocates ids, that is the
    /// Facade's job (spec.md's "ids are strictly positive and
    /// monotonically increasing" invariant lives above this layer).
    pub fn subscribe(&self, id: u64) -> watch::Receiver<Option<Diff>> {
        let (tx, rx) = watch::channel(None);
        // The task only stops accepting commands once it has torn itself
        // down via unsubscribe(0), at which point subscribing is moot.
        let _ = self.cmd_tx.send(Command::Subscribe { id, tx });
        rx
    }

    /// `id == 0` is the internal "unsubscribe everyone and stop" signal,
    /// reserved by spec.md so the public facade can never trigger it by
    /// accident through a real subscription id.
    pub fn unsubscribe(&self, id: u64) {
        let _ = self.cmd_tx.send(Command::Unsubscribe(id));
    }

    pub async fn is_watched(&self) -> bool {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.cmd_tx.send(Command::QueryWatched(reply_tx)).is_err() {
            return false;
        }
        reply_rx.await.unwrap_or(false)
    }
}

async fn run(
    root: PathBuf,
    interval: Duration,
    ignore_names: Vec<String>,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
) {
    let mut subs: HashMap<u64, SubState> = HashMap::new();

    let mut ticker = tokio::time::interval(interval);
    // Ticks never queue: a slow scan pushes the next tick out rather than
    // firing a burst of catch-up ticks, per spec.md §5.
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(Command::Subscribe { id, tx }) => {
                        subs.insert(id, SubState { tx, last_reported: None });
                    }
                    Some(Command::Unsubscribe(0)) => {
                        subs.clear();
                        return;
                    }
                    Some(Command::Unsubscribe(id)) => {
                        subs.remove(&id);
                    }
                    Some(Command::QueryWatched(reply)) => {
                        let _ = reply.send(!subs.is_empty());
                    }
                    None => return,
                }
            }
            _ = ticker.tick() => {
                let ignore = scanner::ignore_predicate(ignore_names.clone());
                let scan_root = root.clone();
                let snapshot = tokio::task::spawn_blocking(move || scanner::scan(&scan_root, &ignore))
                    .await
                    .unwrap_or_default();

                for sub in subs.values_mut() {
                    if let Some(diff) = snapshot.diff(sub.last_reported.as_ref()) {
                        // `send` on a watch channel never blocks and always
                        // overwrites any undelivered value - the coalescing
                        // emission protocol, realized without a manual drain.
                        let _ = sub.tx.send(Some(diff));
                        sub.last_reported = Some(snapshot.clone());
                    }
                }
            }
        }
    }
}
