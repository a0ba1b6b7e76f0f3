// Copyright 2018-2026 the Deno authors. MIT license.

//! Plugin system for the dev server.
//!
//! Plugins follow a rollup-like hook model: `resolve_id` and `load`
//! are first-non-null, `transform` chains every plugin's output into
//! the next one's input, and `handle_hot_update` lets plugins rewrite
//! the set of modules affected by a file change. Hooks run in enforce
//! order: pre plugins, then normal, then post, stable within each band.
//!
//! The container caches no transform results (that is the module
//! graph's job) but it does remember per-module error state so a
//! failed URL re-throws cheaply until the next file change clears it.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::config::ServerConfig;
use crate::errors::AnyError;
use crate::errors::ErrorPayload;
use crate::errors::EsdevError;
use crate::graph::ModuleIndex;

/// Ordering band for a plugin's hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum EnforceOrder {
  Pre,
  #[default]
  Normal,
  Post,
}

/// Result of a successful `resolve_id` hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedId {
  pub id: String,
  /// External ids are left untouched by the import rewriter.
  pub external: bool,
}

impl ResolvedId {
  pub fn new(id: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      external: false,
    }
  }
}

/// Outcome of consulting one plugin's `resolve_id`. Unresolved is an
/// expected state, not an error; genuine failures use `Err`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveIdResult {
  Resolved(ResolvedId),
  NotResolved,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadResult {
  pub code: String,
  pub map: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformHookResult {
  pub code: String,
  pub map: Option<String>,
}

/// Shared per-request context handed to hooks.
#[derive(Debug, Clone)]
pub struct PluginContext {
  /// URL (or id) of the request being processed.
  pub url: String,
}

impl PluginContext {
  pub fn new(url: impl Into<String>) -> Self {
    Self { url: url.into() }
  }

  pub fn warn(&self, plugin: &str, message: &str) {
    log::warn!("[{plugin}] {message} ({})", self.url);
  }
}

/// A module affected by a hot update, as shown to plugins.
#[derive(Debug, Clone)]
pub struct HotModule {
  pub index: ModuleIndex,
  pub url: String,
}

/// Context for `handle_hot_update`.
#[derive(Debug, Clone)]
pub struct HmrContext {
  pub file: PathBuf,
  pub timestamp: u64,
  pub modules: Vec<HotModule>,
}

#[async_trait]
pub trait Plugin: Send + Sync {
  fn name(&self) -> &str;

  fn enforce(&self) -> EnforceOrder {
    EnforceOrder::Normal
  }

  /// Called once the final config is known, before the server starts.
  fn config_resolved(&self, _config: &ServerConfig) -> Result<(), AnyError> {
    Ok(())
  }

  /// Called between `config_resolved` and `listen`; the channel handle
  /// lets plugins register custom-event listeners and push payloads.
  fn configure_server(
    &self,
    _channel: &Arc<crate::server::ws::HmrChannel>,
  ) -> Result<(), AnyError> {
    Ok(())
  }

  async fn resolve_id(
    &self,
    _specifier: &str,
    _importer: Option<&str>,
    _ctx: &PluginContext,
  ) -> Result<ResolveIdResult, AnyError> {
    Ok(ResolveIdResult::NotResolved)
  }

  async fn load(
    &self,
    _id: &str,
    _ctx: &PluginContext,
  ) -> Result<Option<LoadResult>, AnyError> {
    Ok(None)
  }

  async fn transform(
    &self,
    _code: &str,
    _id: &str,
    _ctx: &PluginContext,
  ) -> Result<Option<TransformHookResult>, AnyError> {
    Ok(None)
  }

  /// May replace the affected-module list for a file change. `None`
  /// leaves the current list untouched; an empty list claims the
  /// change as fully handled, suppressing any update.
  async fn handle_hot_update(
    &self,
    _ctx: &HmrContext,
  ) -> Result<Option<Vec<ModuleIndex>>, AnyError> {
    Ok(None)
  }
}

pub struct PluginContainer {
  plugins: Vec<Arc<dyn Plugin>>,
  errored: Mutex<HashMap<String, ErrorPayload>>,
}

impl PluginContainer {
  /// Compose the hook chain: (pre) then (normal) then (post), keeping
  /// the caller's order within each band.
  pub fn new(plugins: Vec<Arc<dyn Plugin>>) -> Self {
    let mut ordered = plugins;
    ordered.sort_by_key(|plugin| plugin.enforce());
    Self {
      plugins: ordered,
      errored: Mutex::new(HashMap::new()),
    }
  }

  pub fn plugins(&self) -> &[Arc<dyn Plugin>] {
    &self.plugins
  }

  pub fn config_resolved(
    &self,
    config: &ServerConfig,
  ) -> Result<(), AnyError> {
    for plugin in &self.plugins {
      plugin.config_resolved(config)?;
    }
    Ok(())
  }

  /// First non-null wins.
  pub async fn resolve_id(
    &self,
    specifier: &str,
    importer: Option<&str>,
    ctx: &PluginContext,
  ) -> Result<Option<ResolvedId>, AnyError> {
    for plugin in &self.plugins {
      match plugin.resolve_id(specifier, importer, ctx).await? {
        ResolveIdResult::Resolved(resolved) => {
          log::trace!(
            "[{}] resolved {} -> {}",
            plugin.name(),
            specifier,
            resolved.id
          );
          return Ok(Some(resolved));
        }
        ResolveIdResult::NotResolved => continue,
      }
    }
    Ok(None)
  }

  /// First non-null wins.
  pub async fn load(
    &self,
    id: &str,
    ctx: &PluginContext,
  ) -> Result<Option<LoadResult>, AnyError> {
    for plugin in &self.plugins {
      if let Some(result) = plugin.load(id, ctx).await? {
        return Ok(Some(result));
      }
    }
    Ok(None)
  }

  /// Every plugin may contribute; the output of one becomes the input
  /// of the next. The most recent source map wins.
  pub async fn transform(
    &self,
    code: String,
    id: &str,
    ctx: &PluginContext,
  ) -> Result<TransformHookResult, AnyError> {
    let mut current = TransformHookResult { code, map: None };
    for plugin in &self.plugins {
      match plugin.transform(&current.code, id, ctx).await {
        Ok(Some(result)) => {
          current.code = result.code;
          if result.map.is_some() {
            current.map = result.map;
          }
        }
        Ok(None) => {}
        Err(err) => {
          return Err(
            EsdevError::Transform {
              url: id.to_string(),
              message: err.to_string(),
              plugin: Some(plugin.name().to_string()),
            }
            .into(),
          );
        }
      }
    }
    Ok(current)
  }

  /// Thread the affected list through every plugin; later plugins see
  /// the current list. An empty result short-circuits to "handled".
  pub async fn handle_hot_update(
    &self,
    mut ctx: HmrContext,
    resolve_url: impl Fn(ModuleIndex) -> String,
  ) -> Result<Vec<ModuleIndex>, AnyError> {
    for plugin in &self.plugins {
      if let Some(replaced) = plugin.handle_hot_update(&ctx).await? {
        if replaced.is_empty() {
          return Ok(Vec::new());
        }
        ctx.modules = replaced
          .into_iter()
          .map(|index| HotModule {
            index,
            url: resolve_url(index),
          })
          .collect();
      }
    }
    Ok(ctx.modules.into_iter().map(|m| m.index).collect())
  }

  /// Remember a failure so repeated requests within the same
  /// invalidation generation re-throw without re-running the pipeline.
  pub fn set_error(&self, url: &str, payload: ErrorPayload) {
    self.errored.lock().insert(url.to_string(), payload);
  }

  pub fn get_error(&self, url: &str) -> Option<ErrorPayload> {
    self.errored.lock().get(url).cloned()
  }

  /// A file-system change makes a retry worthwhile.
  pub fn clear_error(&self, url: &str) {
    self.errored.lock().remove(url);
  }
}
