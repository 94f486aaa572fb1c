// File watching module
// Turns raw filesystem notifications into debounced per-note change events

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use notify::event::{ModifyKind, RemoveKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::notes::{ExclusionRules, discover_notes_under, is_markdown_file};
use crate::{Result, VaultError};

const RAW_CHANNEL_CAPACITY: usize = 1024;

/// Kind of change observed for a note file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
}

impl ChangeKind {
    /// Combine a pending kind with a newer one for the same file
    ///
    /// `Created` then `Modified` stays `Created`; `Deleted` then `Created` or
    /// `Modified` means the file was replaced, so it becomes `Modified`.
    /// Otherwise the newer kind wins.
    #[inline]
    pub const fn coalesce(self, next: Self) -> Self {
        match (self, next) {
            (Self::Created, Self::Modified) => Self::Created,
            (Self::Deleted, Self::Created | Self::Modified) => Self::Modified,
            (_, next) => next,
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Modified => write!(f, "modified"),
            Self::Deleted => write!(f, "deleted"),
        }
    }
}

/// A filesystem change for one note, before debouncing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawChange {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

/// A debounced change ready for indexing
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeEvent {
    pub path: PathBuf,
    pub kind: ChangeKind,
    pub timestamp: DateTime<Utc>,
}

/// Recursive watcher over the vault root
///
/// Dropping the watcher stops notifications and closes the raw channel.
pub struct VaultWatcher {
    _watcher: RecommendedWatcher,
    root: PathBuf,
}

impl VaultWatcher {
    /// Start watching `root`; eligible changes arrive on the returned channel
    #[inline]
    pub fn start(
        root: &Path,
        rules: ExclusionRules,
    ) -> Result<(Self, mpsc::Receiver<RawChange>)> {
        let (tx, rx) = mpsc::channel(RAW_CHANNEL_CAPACITY);
        let callback_root = root.to_path_buf();

        let mut watcher = RecommendedWatcher::new(
            move |res: std::result::Result<Event, notify::Error>| match res {
                Ok(event) => {
                    for change in classify_event(&callback_root, &rules, &event) {
                        if tx.blocking_send(change).is_err() {
                            debug!("Raw change channel closed, dropping notification");
                            return;
                        }
                    }
                }
                Err(e) => warn!("File watcher error: {}", e),
            },
            notify::Config::default(),
        )
        .map_err(|e| VaultError::Other(anyhow::anyhow!("Failed to create file watcher: {}", e)))?;

        watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(|e| {
                VaultError::Other(anyhow::anyhow!(
                    "Failed to watch {}: {}",
                    root.display(),
                    e
                ))
            })?;

        info!("Watching vault at {}", root.display());
        Ok((
            Self {
                _watcher: watcher,
                root: root.to_path_buf(),
            },
            rx,
        ))
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Map one notify event to note changes, dropping non-markdown files and
/// excluded paths
///
/// A folder that appears (created, or moved into the vault) is walked and
/// each note inside it is reported as created. A removed path that is not a
/// markdown file may have been a folder, so it is reported as deleted and
/// the indexer drops every note stored under it.
#[inline]
pub fn classify_event(root: &Path, rules: &ExclusionRules, event: &Event) -> Vec<RawChange> {
    let changes: Vec<(PathBuf, ChangeKind)> = match &event.kind {
        EventKind::Create(_) => with_kind(&event.paths, ChangeKind::Created),
        EventKind::Remove(_) => with_kind(&event.paths, ChangeKind::Deleted),
        EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            with_kind(&event.paths, ChangeKind::Deleted)
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            with_kind(&event.paths, ChangeKind::Created)
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => match event.paths.as_slice() {
            [from, to] => vec![
                (from.clone(), ChangeKind::Deleted),
                (to.clone(), ChangeKind::Created),
            ],
            _ => Vec::new(),
        },
        EventKind::Modify(ModifyKind::Name(_)) => event
            .paths
            .iter()
            .map(|path| {
                let kind = if path.exists() {
                    ChangeKind::Created
                } else {
                    ChangeKind::Deleted
                };
                (path.clone(), kind)
            })
            .collect(),
        EventKind::Modify(_) => with_kind(&event.paths, ChangeKind::Modified),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
    };
    let removed_file = matches!(event.kind, EventKind::Remove(RemoveKind::File));

    changes
        .into_iter()
        .filter(|(path, _)| path != root && !rules.is_excluded(root, path))
        .flat_map(|(path, kind)| {
            if kind == ChangeKind::Deleted {
                // notify marked it as a file, so it was not a folder
                if removed_file && !is_markdown_file(&path) {
                    Vec::new()
                } else {
                    vec![RawChange { path, kind }]
                }
            } else if path.is_dir() {
                if kind == ChangeKind::Created {
                    folder_notes(root, rules, &path)
                } else {
                    Vec::new()
                }
            } else if is_markdown_file(&path) {
                vec![RawChange { path, kind }]
            } else {
                Vec::new()
            }
        })
        .collect()
}

/// Every note inside a folder that just appeared, as created
fn folder_notes(root: &Path, rules: &ExclusionRules, dir: &Path) -> Vec<RawChange> {
    let notes = discover_notes_under(root, dir, rules);
    if !notes.is_empty() {
        debug!("Folder {} brought {} notes", dir.display(), notes.len());
    }
    notes
        .into_iter()
        .map(|path| RawChange {
            path,
            kind: ChangeKind::Created,
        })
        .collect()
}

fn with_kind(paths: &[PathBuf], kind: ChangeKind) -> Vec<(PathBuf, ChangeKind)> {
    paths.iter().map(|path| (path.clone(), kind)).collect()
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    kind: ChangeKind,
    deadline: Instant,
}

/// Per-file quiet-window debouncer
///
/// Each file has its own deadline. Every new raw change for a file re-arms
/// that file's deadline and coalesces its kind; a file fires once its window
/// elapses with no further activity.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    pending: HashMap<PathBuf, Pending>,
}

impl Debouncer {
    #[inline]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: HashMap::new(),
        }
    }

    #[inline]
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record a raw change observed at `now`
    #[inline]
    pub fn push(&mut self, change: RawChange, now: Instant) {
        let deadline = now + self.window;
        self.pending
            .entry(change.path)
            .and_modify(|pending| {
                pending.kind = pending.kind.coalesce(change.kind);
                pending.deadline = deadline;
            })
            .or_insert(Pending {
                kind: change.kind,
                deadline,
            });
    }

    /// The earliest armed deadline
    #[inline]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|p| p.deadline).min()
    }

    #[inline]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Remove and return every change whose deadline is at or before `now`
    #[inline]
    pub fn drain_due(&mut self, now: Instant) -> Vec<ChangeEvent> {
        let mut due: Vec<(PathBuf, Pending)> = Vec::new();
        self.pending.retain(|path, pending| {
            if pending.deadline <= now {
                due.push((path.clone(), *pending));
                false
            } else {
                true
            }
        });
        Self::into_events(due)
    }

    /// Remove and return every pending change
    #[inline]
    pub fn drain_all(&mut self) -> Vec<ChangeEvent> {
        let due: Vec<(PathBuf, Pending)> = self.pending.drain().collect();
        Self::into_events(due)
    }

    fn into_events(mut due: Vec<(PathBuf, Pending)>) -> Vec<ChangeEvent> {
        due.sort_by(|a, b| a.1.deadline.cmp(&b.1.deadline).then_with(|| a.0.cmp(&b.0)));
        let timestamp = Utc::now();
        due.into_iter()
            .map(|(path, pending)| ChangeEvent {
                path,
                kind: pending.kind,
                timestamp,
            })
            .collect()
    }

    /// Debounce raw changes until cancelled or the raw channel closes
    ///
    /// Fired events are handed to `emit` in deadline order. When the channel
    /// closes, changes still pending are emitted immediately.
    pub async fn run<F>(
        mut self,
        mut raw: mpsc::Receiver<RawChange>,
        cancel: CancellationToken,
        mut emit: F,
    ) where
        F: FnMut(ChangeEvent) + Send,
    {
        debug!("Debouncer started with a {:?} window", self.window);

        loop {
            let deadline = self.next_deadline();
            let wait = async move {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                () = cancel.cancelled() => {
                    debug!("Debouncer cancelled with {} pending changes", self.pending_len());
                    break;
                }
                received = raw.recv() => match received {
                    Some(change) => {
                        debug!("Raw {} for {}", change.kind, change.path.display());
                        self.push(change, Instant::now());
                    }
                    None => {
                        for event in self.drain_all() {
                            emit(event);
                        }
                        debug!("Raw change channel closed, debouncer stopping");
                        break;
                    }
                },
                () = wait => {
                    for event in self.drain_due(Instant::now()) {
                        debug!("Debounced {} for {}", event.kind, event.path.display());
                        emit(event);
                    }
                }
            }
        }
    }
}
