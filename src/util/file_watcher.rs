// Copyright 2018-2026 the Deno authors. MIT license.

//! File watching for the dev server.
//!
//! Raw notify events are funneled through an unbounded channel and
//! drained by a debouncing receiver so that editor save storms produce
//! a single coalesced batch. Coalescing is per path and kind-aware:
//! an atomic-save rename (remove + create) collapses into one modify,
//! and a file created and deleted within the same window reports
//! nothing at all.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use notify::event::Event as NotifyEvent;
use notify::event::EventKind;
use notify::Error as NotifyError;
use notify::RecommendedWatcher;
use notify::RecursiveMode;
use notify::Watcher;
use tokio::select;
use tokio::sync::mpsc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::sleep;

use crate::errors::AnyError;

/// Events within this window coalesce into one propagation.
const DEBOUNCE_INTERVAL: Duration = Duration::from_millis(50);

/// The kind of change observed for a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
  Create,
  Modify,
  Remove,
}

/// A single coalesced file event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
  pub path: PathBuf,
  pub kind: ChangeKind,
}

/// What two events on the same path within one window amount to.
fn merge_kinds(earlier: ChangeKind, later: ChangeKind) -> Option<ChangeKind> {
  use ChangeKind::*;
  match (earlier, later) {
    // never existed as far as this batch is concerned
    (Create, Remove) => None,
    (Create, _) => Some(Create),
    // atomic-save editors replace the file via remove + create
    (Remove, Create) | (Remove, Modify) => Some(Modify),
    (_, Remove) => Some(Remove),
    _ => Some(Modify),
  }
}

pub struct DebouncedReceiver {
  // the open batch lives on the struct, not in the future: a caller's
  // select! may cancel recv() mid-window and the events must survive
  pending: HashMap<PathBuf, ChangeKind>,
  receiver: UnboundedReceiver<Vec<FileChange>>,
}

impl DebouncedReceiver {
  pub fn new_with_sender() -> (Arc<mpsc::UnboundedSender<Vec<FileChange>>>, Self)
  {
    let (sender, receiver) = mpsc::unbounded_channel();
    (
      Arc::new(sender),
      Self {
        receiver,
        pending: HashMap::new(),
      },
    )
  }

  fn merge(&mut self, change: FileChange) {
    match self.pending.entry(change.path) {
      Entry::Occupied(mut entry) => match merge_kinds(*entry.get(), change.kind)
      {
        Some(kind) => {
          entry.insert(kind);
        }
        None => {
          entry.remove();
        }
      },
      Entry::Vacant(slot) => {
        slot.insert(change.kind);
      }
    }
  }

  /// Next coalesced batch, in path order. Resolves once a full window
  /// passes without new events and something survived the merge.
  pub async fn recv(&mut self) -> Option<Vec<FileChange>> {
    loop {
      while self.pending.is_empty() {
        for change in self.receiver.recv().await? {
          self.merge(change);
        }
      }

      // a batch is open; hold it until the watcher goes quiet
      loop {
        select! {
          changes = self.receiver.recv() => {
            for change in changes? {
              self.merge(change);
            }
          }
          _ = sleep(DEBOUNCE_INTERVAL) => break,
        }
      }

      let mut batch: Vec<FileChange> = self
        .pending
        .drain()
        .map(|(path, kind)| FileChange { path, kind })
        .collect();
      if batch.is_empty() {
        // everything cancelled out (e.g. a temp file came and went)
        continue;
      }
      batch.sort_by(|a, b| a.path.cmp(&b.path));
      return Some(batch);
    }
  }
}

fn change_kind(kind: &EventKind) -> Option<ChangeKind> {
  match kind {
    EventKind::Create(_) => Some(ChangeKind::Create),
    EventKind::Modify(_) => Some(ChangeKind::Modify),
    EventKind::Remove(_) => Some(ChangeKind::Remove),
    _ => None,
  }
}

/// Create a watcher that forwards filtered events into `sender`.
///
/// Paths matching any of `ignored` prefixes are dropped at the source
/// so they never wake the debounce loop.
pub fn new_watcher(
  sender: Arc<mpsc::UnboundedSender<Vec<FileChange>>>,
  ignored: Vec<PathBuf>,
) -> Result<RecommendedWatcher, AnyError> {
  Ok(Watcher::new(
    move |res: Result<NotifyEvent, NotifyError>| {
      let Ok(event) = res else {
        return;
      };

      let Some(kind) = change_kind(&event.kind) else {
        return;
      };

      let changes: Vec<FileChange> = event
        .paths
        .iter()
        .filter(|path| !ignored.iter().any(|prefix| path.starts_with(prefix)))
        .map(|path| FileChange {
          path: path.clone(),
          kind,
        })
        .collect();

      if !changes.is_empty() {
        let _ = sender.send(changes);
      }
    },
    Default::default(),
  )?)
}

/// Watch `paths` recursively, ignoring missing entries.
pub fn watch_paths(watcher: &mut RecommendedWatcher, paths: &[PathBuf]) {
  for path in paths {
    if let Err(err) = watcher.watch(path, RecursiveMode::Recursive) {
      log::debug!("cannot watch {}: {}", path.display(), err);
    }
  }
  log::debug!("watching paths: {:?}", paths);
}

/// Canonicalize a changed path for graph lookup; falls back to the
/// given path when the file no longer exists (removals).
pub fn canonicalize_changed_path(path: &Path) -> PathBuf {
  path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}
