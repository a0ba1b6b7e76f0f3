// Copyright 2018-2026 the Deno authors. MIT license.

//! Hot module replacement engine.
//!
//! Turns a batch of coalesced file changes into the smallest set of
//! updates the connected clients can apply in place, falling back to a
//! full page reload when no accepting boundary exists.

use std::collections::HashSet;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde::Deserialize;
use serde::Serialize;

use crate::errors::ErrorPayload;
use crate::graph::ModuleGraph;
use crate::graph::ModuleIndex;
use crate::graph::ModuleType;
use crate::plugins::HmrContext;
use crate::plugins::HotModule;
use crate::util::file_watcher::FileChange;
use crate::util::path::clean_url;
use crate::util::path::normalize_path;

use super::ServerContext;

/// Messages sent from the server to connected clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum HmrPayload {
  /// Connection established.
  Connected,
  /// Module updates to apply in order.
  Update { updates: Vec<Update> },
  /// Full page reload required.
  FullReload {
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<String>,
  },
  /// Listed modules ceased to be reachable.
  Prune { paths: Vec<String> },
  /// A compile or resolve error to show in the overlay.
  Error { err: ErrorPayload },
  /// Custom event, server to client.
  Custom {
    event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
  },
  /// Keep-alive echo.
  Ping,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum UpdateType {
  JsUpdate,
  CssUpdate,
}

/// One boundary-level update inside an `update` batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Update {
  #[serde(rename = "type")]
  pub update_type: UpdateType,
  /// URL of the accepting boundary.
  pub path: String,
  /// URL of the changed module the boundary accepted.
  #[serde(rename = "acceptedPath")]
  pub accepted_path: String,
  pub timestamp: u64,
  #[serde(
    rename = "explicitImportRequired",
    skip_serializing_if = "Option::is_none"
  )]
  pub explicit_import_required: Option<bool>,
}

/// Messages clients may send back.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum HmrClientMessage {
  Ping,
  Custom {
    event: String,
    #[serde(default)]
    data: Option<serde_json::Value>,
  },
}

/// Monotonic millisecond timestamps; strictly increasing even when the
/// wall clock does not move between calls.
#[derive(Debug)]
pub struct Timestamps(AtomicU64);

impl Default for Timestamps {
  fn default() -> Self {
    Self::new()
  }
}

impl Timestamps {
  pub fn new() -> Self {
    Self(AtomicU64::new(0))
  }

  pub fn next(&self) -> u64 {
    let now = SystemTime::now()
      .duration_since(UNIX_EPOCH)
      .map(|d| d.as_millis() as u64)
      .unwrap_or(0);
    self
      .0
      .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |prev| {
        Some(now.max(prev + 1))
      })
      .map(|prev| now.max(prev + 1))
      .unwrap_or(now)
  }
}

/// A boundary that accepted the change, and through which dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundaryRecord {
  pub boundary: ModuleIndex,
  pub accepted_via: ModuleIndex,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropagationResult {
  /// Boundaries in traversal order.
  Boundaries(Vec<BoundaryRecord>),
  /// No accepting importer chain exists.
  FullReload { reason: String },
}

/// Walk upward from the changed module collecting the nearest
/// accepting importers. A self-accepting module terminates its own
/// branch; a dead end without acceptance forces a full reload.
pub fn propagate_update(
  graph: &ModuleGraph,
  changed: ModuleIndex,
) -> PropagationResult {
  let mut queue = VecDeque::from([changed]);
  let mut visited: HashSet<ModuleIndex> = HashSet::new();
  let mut boundaries: Vec<BoundaryRecord> = Vec::new();

  while let Some(current) = queue.pop_front() {
    if !visited.insert(current) {
      continue;
    }
    let node = graph.module(current);

    // a module with HMR registrations handles an edit to itself:
    // re-executing it re-runs its accept() wiring
    let handles_own_change = node.is_self_accepting
      || (current == changed && !node.accepted_hmr_deps.is_empty());
    if handles_own_change {
      boundaries.push(BoundaryRecord {
        boundary: current,
        accepted_via: current,
      });
      continue;
    }

    if node.importers.is_empty() {
      return PropagationResult::FullReload {
        reason: format!("no accepting boundary above {}", node.url),
      };
    }

    let mut importers: Vec<ModuleIndex> =
      node.importers.iter().copied().collect();
    importers.sort();
    for importer in importers {
      if graph.module(importer).accepted_hmr_deps.contains(&current) {
        boundaries.push(BoundaryRecord {
          boundary: importer,
          accepted_via: current,
        });
      } else if !visited.contains(&importer) {
        queue.push_back(importer);
      }
    }
  }

  PropagationResult::Boundaries(boundaries)
}

/// URL of a changed file relative to the server root, when inside it.
fn file_to_url(root: &Path, file: &Path) -> Option<String> {
  let relative = file.strip_prefix(root).ok()?;
  Some(format!("/{}", normalize_path(relative)))
}

/// React to one debounced batch of file changes.
pub async fn on_file_changes(ctx: &Arc<ServerContext>, changes: Vec<FileChange>) {
  let mut ordered = changes;
  ordered.sort_by(|a, b| a.path.cmp(&b.path));
  for change in ordered {
    if let Err(err) = on_single_file_change(ctx, &change).await {
      log::error!("hmr failed for {}: {err:#}", change.path.display());
      ctx.channel.send_error(ErrorPayload::from_any(&err));
    }
  }
}

async fn on_single_file_change(
  ctx: &Arc<ServerContext>,
  change: &FileChange,
) -> Result<(), crate::errors::AnyError> {
  let file = &change.path;
  let timestamp = ctx.timestamps.next();

  // invalidate every node backed by this file, remembering their urls
  let (affected, affected_urls) = {
    let mut graph = ctx.graph.lock();
    let affected = graph.on_file_change(file, timestamp);
    let urls: Vec<String> = affected
      .iter()
      .map(|index| graph.module(*index).url.clone())
      .collect();
    (affected, urls)
  };
  for url in &affected_urls {
    ctx.container.clear_error(url);
  }

  let hot_modules: Vec<HotModule> = affected
    .iter()
    .zip(affected_urls.iter())
    .map(|(index, url)| HotModule {
      index: *index,
      url: url.clone(),
    })
    .collect();

  let hmr_ctx = HmrContext {
    file: file.clone(),
    timestamp,
    modules: hot_modules,
  };
  let graph_for_urls = ctx.clone();
  let affected = ctx
    .container
    .handle_hot_update(hmr_ctx, move |index| {
      graph_for_urls.graph.lock().module(index).url.clone()
    })
    .await?;

  if affected.is_empty() {
    let is_reload_file = file
      .extension()
      .and_then(|ext| ext.to_str())
      .map(|ext| matches!(ext, "html" | "htm"))
      .unwrap_or(false);
    if is_reload_file && file.starts_with(&ctx.config.root) {
      log::info!("page reload {}", file.display());
      ctx.channel.broadcast(HmrPayload::FullReload {
        path: file_to_url(&ctx.config.root, file),
      });
    }
    return Ok(());
  }

  let mut updates: Vec<Update> = Vec::new();
  let mut full_reload: Option<String> = None;

  {
    let mut graph = ctx.graph.lock();
    let css_links = ctx.css_links.lock().clone();

    for index in &affected {
      let node = graph.module(*index);
      let url = node.url.clone();

      // stylesheets referenced from <link> tags never sit in the JS
      // import graph; swap them directly
      if node.module_type == ModuleType::Css
        && css_links.contains(clean_url(&url))
      {
        updates.push(Update {
          update_type: UpdateType::CssUpdate,
          path: url.clone(),
          accepted_path: url,
          timestamp,
          explicit_import_required: None,
        });
        graph.module_mut(*index).last_hmr_timestamp = timestamp;
        continue;
      }

      match propagate_update(&graph, *index) {
        PropagationResult::FullReload { reason } => {
          log::debug!("full reload: {reason}");
          full_reload = Some(url);
          break;
        }
        PropagationResult::Boundaries(records) => {
          for record in records {
            let boundary_url = graph.module(record.boundary).url.clone();
            let accepted_url = graph.module(record.accepted_via).url.clone();
            let update = Update {
              update_type: UpdateType::JsUpdate,
              path: boundary_url,
              accepted_path: accepted_url,
              timestamp,
              explicit_import_required: None,
            };
            if !updates.contains(&update) {
              updates.push(update);
            }
            graph.module_mut(record.boundary).last_hmr_timestamp = timestamp;
            graph.module_mut(record.accepted_via).last_hmr_timestamp =
              timestamp;
          }
        }
      }
    }
  }

  if let Some(path) = full_reload {
    log::info!("page reload {}", path);
    ctx
      .channel
      .broadcast(HmrPayload::FullReload { path: Some(path) });
    return Ok(());
  }

  if !updates.is_empty() {
    for update in &updates {
      log::info!("hmr update {}", update.path);
    }
    ctx.channel.broadcast(HmrPayload::Update { updates });
  }
  Ok(())
}
