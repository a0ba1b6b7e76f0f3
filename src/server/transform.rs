// Copyright 2018-2026 the Deno authors. MIT license.

//! The per-URL transform pipeline.
//!
//! [`transform_request`] is the single entry point the HTTP middleware
//! calls for every module-like URL. Results are memoized on the module
//! graph node; concurrent requests for the same URL share one
//! computation through a pending-task map, so a URL is compiled at
//! most once per invalidation generation.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::errors::AnyError;
use crate::errors::ErrorPayload;
use crate::errors::EsdevError;
use crate::graph::ModuleIndex;
use crate::graph::ResolvedEntry;
use crate::graph::TransformResult;
use crate::plugins::PluginContext;
use crate::util::checksum;
use crate::util::path::clean_url;
use crate::util::path::fs_url_to_path;
use crate::util::path::has_import_query;
use crate::util::path::is_css_request;
use crate::util::path::is_virtual_id;
use crate::util::path::remove_timestamp_query;
use crate::util::path::unwrap_virtual_id;
use crate::util::path::CLIENT_URL;
use crate::util::path::ID_PREFIX;

use super::hmr::HmrPayload;
use super::import_analysis::analyze_and_rewrite;
use super::import_analysis::ImportRewriteInput;
use super::ServerContext;

type WaiterResult = Result<Arc<TransformResult>, ErrorPayload>;

/// De-duplication of concurrent transforms for the same URL. The first
/// caller computes; later callers park a oneshot and receive a clone.
#[derive(Default)]
pub struct PendingTransforms {
  inner: Mutex<HashMap<String, Vec<oneshot::Sender<WaiterResult>>>>,
}

enum Claim {
  Owner,
  Waiter(oneshot::Receiver<WaiterResult>),
}

impl PendingTransforms {
  fn claim(&self, url: &str) -> Claim {
    let mut inner = self.inner.lock();
    match inner.entry(url.to_string()) {
      Entry::Occupied(mut waiters) => {
        let (sender, receiver) = oneshot::channel();
        waiters.get_mut().push(sender);
        Claim::Waiter(receiver)
      }
      Entry::Vacant(slot) => {
        slot.insert(Vec::new());
        Claim::Owner
      }
    }
  }

  fn resolve(&self, url: &str, result: &WaiterResult) {
    let waiters = self.inner.lock().remove(url).unwrap_or_default();
    for waiter in waiters {
      let _ = waiter.send(result.clone());
    }
  }
}

/// Resolve a URL to a file (or virtual id) without plugin involvement.
fn default_resolve(
  ctx: &ServerContext,
  url: &str,
) -> Option<ResolvedEntry> {
  let path_part = clean_url(url);

  if let Some(rest) = path_part.strip_prefix(ID_PREFIX) {
    let id = unwrap_virtual_id(rest);
    return Some(ResolvedEntry { id, file: None });
  }

  if path_part.starts_with("/@fs/") {
    let file = fs_url_to_path(url)?;
    if !file.is_file() {
      return None;
    }
    return Some(ResolvedEntry {
      id: file.to_string_lossy().into_owned(),
      file: Some(file),
    });
  }

  let relative = path_part.trim_start_matches('/');
  let base = ctx.config.root.join(relative);
  let candidates = [
    base.clone(),
    base.with_extension("js"),
    base.with_extension("ts"),
    base.join("index.js"),
  ];
  let file = candidates.into_iter().find(|p| p.is_file())?;
  Some(ResolvedEntry {
    id: file.to_string_lossy().into_owned(),
    file: Some(file),
  })
}

fn resolve_error(url: &str) -> AnyError {
  EsdevError::Resolve {
    specifier: url.to_string(),
    importer: None,
  }
  .into()
}

/// Wrap raw CSS into a JS module that installs the stylesheet and
/// self-accepts its own updates.
fn css_to_js_module(url: &str, css: &str) -> String {
  let id = clean_url(url);
  format!(
    "import {{ updateStyle as __esdev_updateStyle, removeStyle as __esdev_removeStyle, createHotContext as __esdev_createHotContext }} from \"{CLIENT_URL}\";\n\
     import.meta.hot = __esdev_createHotContext({url_json});\n\
     const __esdev_css = {css_json};\n\
     __esdev_updateStyle({id_json}, __esdev_css);\n\
     import.meta.hot.accept();\n\
     import.meta.hot.prune(() => __esdev_removeStyle({id_json}));\n\
     export default __esdev_css;\n",
    url_json = serde_json::to_string(url).unwrap_or_default(),
    css_json = serde_json::to_string(css).unwrap_or_default(),
    id_json = serde_json::to_string(id).unwrap_or_default(),
  )
}

/// Transform one URL, memoized per invalidation generation.
///
/// Returns `None` only for URLs the pipeline does not serve (currently
/// none; unresolvable module URLs are resolve errors).
pub async fn transform_request(
  ctx: &Arc<ServerContext>,
  raw_url: &str,
) -> Result<Option<Arc<TransformResult>>, AnyError> {
  let url = remove_timestamp_query(raw_url);

  // a failure from this generation re-throws without re-running
  if let Some(payload) = ctx.container.get_error(&url) {
    return Err(
      EsdevError::Transform {
        url: url.clone(),
        message: payload.message,
        plugin: payload.plugin,
      }
      .into(),
    );
  }

  let cached = {
    let graph = ctx.graph.lock();
    graph
      .get_module_by_url(&url)
      .and_then(|index| graph.fresh_transform_result(index))
  };
  if let Some(result) = cached {
    return Ok(Some(result));
  }

  match ctx.pending.claim(&url) {
    Claim::Waiter(receiver) => match receiver.await {
      Ok(Ok(result)) => Ok(Some(result)),
      Ok(Err(payload)) => Err(
        EsdevError::Transform {
          url,
          message: payload.message,
          plugin: payload.plugin,
        }
        .into(),
      ),
      Err(_) => Err(resolve_error(&url)),
    },
    Claim::Owner => {
      let outcome = run_pipeline(ctx, &url).await;
      match &outcome {
        Ok(result) => {
          ctx.pending.resolve(&url, &Ok(result.clone()));
        }
        Err(err) => {
          let payload = ErrorPayload::from_any(err);
          ctx.container.set_error(&url, payload.clone());
          ctx.channel.send_error(payload.clone());
          ctx.pending.resolve(&url, &Err(payload));
        }
      }
      outcome.map(Some)
    }
  }
}

async fn run_pipeline(
  ctx: &Arc<ServerContext>,
  url: &str,
) -> Result<Arc<TransformResult>, AnyError> {
  let plugin_ctx = PluginContext::new(url);

  // resolve; /@id/ URLs carry a plugin-namespace specifier, which the
  // plugins see in its unwrapped form
  let resolve_input = match clean_url(url).strip_prefix(ID_PREFIX) {
    Some(rest) => unwrap_virtual_id(rest),
    None => url.to_string(),
  };
  let resolved = match ctx
    .container
    .resolve_id(&resolve_input, None, &plugin_ctx)
    .await?
  {
    Some(resolved) => ResolvedEntry {
      file: (!resolved.external && !is_virtual_id(&resolved.id))
        .then(|| PathBuf::from(clean_url(&resolved.id)))
        .filter(|p| p.is_file()),
      id: resolved.id,
    },
    None => default_resolve(ctx, url).ok_or_else(|| resolve_error(url))?,
  };

  let index = ctx
    .graph
    .lock()
    .ensure_entry_from_url(url, resolved.clone());

  // load
  let loaded = match ctx.container.load(&resolved.id, &plugin_ctx).await? {
    Some(loaded) => loaded,
    None => {
      let Some(file) = &resolved.file else {
        return Err(resolve_error(url));
      };
      let code = tokio::fs::read_to_string(file).await.map_err(|err| {
        AnyError::from(EsdevError::Transform {
          url: url.to_string(),
          message: format!("failed reading {}: {err}", file.display()),
          plugin: None,
        })
      })?;
      crate::plugins::LoadResult { code, map: None }
    }
  };

  // transform chain
  let transformed = ctx
    .container
    .transform(loaded.code, &resolved.id, &plugin_ctx)
    .await?;
  let map = transformed.map.or(loaded.map);

  if is_css_request(url) {
    let result = if has_import_query(url) {
      // a stylesheet imported from JS becomes a self-accepting module
      let code = css_to_js_module(url, &transformed.code);
      finish_module(ctx, index, code, map, Vec::new(), true)
    } else {
      finish_module(ctx, index, transformed.code, map, Vec::new(), false)
    };
    return Ok(result);
  }

  // import analysis, re-run once if new bare imports force the
  // optimizer to produce a new generation
  let mut analyzed = analyze(ctx, url, &transformed.code)?;
  if !analyzed.missing_bare.is_empty() {
    for specifier in &analyzed.missing_bare {
      ctx.optimizer.register_missing_import(specifier);
    }
    let changed = ctx.optimizer.reoptimize_missing().await?;
    analyzed = analyze(ctx, url, &transformed.code)?;
    if changed {
      // every cached transform may embed the previous browser hash
      invalidate_whole_graph(ctx);
      ctx.channel.broadcast(HmrPayload::FullReload { path: None });
    }
  }

  // wire the analyzed edges into the graph
  let (pruned_urls, result) = {
    let mut graph = ctx.graph.lock();
    let mut imported = Vec::new();
    for dep_url in &analyzed.deps {
      let dep_key = remove_timestamp_query(dep_url);
      if let Some(entry) = default_resolve(ctx, &dep_key) {
        imported.push(graph.ensure_entry_from_url(&dep_key, entry));
      } else if let Some(existing) = graph.get_module_by_url(&dep_key) {
        imported.push(existing);
      }
    }
    let mut accepted: HashSet<ModuleIndex> = HashSet::new();
    for accepted_url in &analyzed.accepted_urls {
      if let Some(entry) = default_resolve(ctx, accepted_url) {
        accepted.insert(graph.ensure_entry_from_url(accepted_url, entry));
      }
    }
    let orphaned = graph.update_module_info(
      index,
      imported,
      accepted,
      analyzed.accepted_exports.clone(),
      analyzed.is_self_accepting,
    );
    let pruned_urls = graph.prune(&orphaned);

    let result = Arc::new(TransformResult {
      etag: checksum::etag(analyzed.code.as_bytes()),
      code: analyzed.code,
      map,
      deps: analyzed.deps,
    });
    graph.set_transform_result(index, result.clone());
    (pruned_urls, result)
  };

  if !pruned_urls.is_empty() {
    ctx.channel.broadcast(HmrPayload::Prune { paths: pruned_urls });
  }

  Ok(result)
}

fn analyze(
  ctx: &Arc<ServerContext>,
  url: &str,
  code: &str,
) -> Result<super::import_analysis::AnalyzedModule, AnyError> {
  let input = ImportRewriteInput {
    code,
    importer_url: url,
    root: &ctx.config.root,
    optimizer: &ctx.optimizer,
  };
  let graph = ctx.graph.clone();
  analyze_and_rewrite(&input, move |dep_url| {
    let graph = graph.lock();
    graph
      .get_module_by_url(dep_url)
      .map(|index| graph.module(index).last_hmr_timestamp)
      .unwrap_or(0)
  })
}

fn invalidate_whole_graph(ctx: &Arc<ServerContext>) {
  let timestamp = ctx.timestamps.next();
  ctx.graph.lock().invalidate_all(timestamp);
}

fn finish_module(
  ctx: &Arc<ServerContext>,
  index: ModuleIndex,
  code: String,
  map: Option<String>,
  deps: Vec<String>,
  is_self_accepting: bool,
) -> Arc<TransformResult> {
  let mut graph = ctx.graph.lock();
  graph.update_module_info(
    index,
    Vec::new(),
    HashSet::new(),
    None,
    is_self_accepting,
  );
  let result = Arc::new(TransformResult {
    etag: checksum::etag(code.as_bytes()),
    code,
    map,
    deps,
  });
  graph.set_transform_result(index, result.clone());
  result
}
