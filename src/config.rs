// Copyright 2018-2026 the Deno authors. MIT license.

//! Resolved server configuration.
//!
//! The core never reads flags or config files itself; everything it
//! consumes arrives through [`ServerConfig`], resolved once before the
//! server is constructed.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use crate::errors::AnyError;
use crate::errors::EsdevError;
use crate::flags::Flags;
use crate::plugins::Plugin;

pub const DEFAULT_PORT: u16 = 5173;
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Options for the HMR message channel.
#[derive(Debug, Clone)]
pub struct HmrOptions {
  pub enabled: bool,
  /// Override for the host the client should dial back to; defaults to
  /// the page origin.
  pub host: Option<String>,
  pub port: Option<u16>,
}

impl Default for HmrOptions {
  fn default() -> Self {
    Self {
      enabled: true,
      host: None,
      port: None,
    }
  }
}

/// Options for the dependency optimizer.
#[derive(Debug, Clone, Default)]
pub struct OptimizeOptions {
  /// Specifiers to pre-bundle even when the scan does not find them.
  pub include: Vec<String>,
  /// Specifiers to never pre-bundle.
  pub exclude: Vec<String>,
  /// Ignore the cache manifest and re-bundle on startup.
  pub force: bool,
}

/// The configuration the core consumes from the outside.
#[derive(Clone)]
pub struct ServerConfig {
  /// Project root directory (canonical).
  pub root: PathBuf,
  /// Public base path, always with leading and trailing slash.
  pub base: String,
  pub host: String,
  pub port: u16,
  /// Directory of files served verbatim, if it exists.
  pub public_dir: Option<PathBuf>,
  /// Workspace roots from which `/@fs/` requests may be served.
  pub fs_allow: Vec<PathBuf>,
  /// Path prefixes the watcher ignores.
  pub watch_ignore: Vec<PathBuf>,
  pub hmr: HmrOptions,
  pub optimize: OptimizeOptions,
  /// Where pre-bundled dependencies and their manifest live.
  pub cache_dir: PathBuf,
  pub plugins: Vec<Arc<dyn Plugin>>,
}

impl std::fmt::Debug for ServerConfig {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ServerConfig")
      .field("root", &self.root)
      .field("base", &self.base)
      .field("host", &self.host)
      .field("port", &self.port)
      .field("plugins", &self.plugins.len())
      .finish_non_exhaustive()
  }
}

fn normalize_base(base: &str) -> String {
  let mut base = base.to_string();
  if !base.starts_with('/') {
    base.insert(0, '/');
  }
  if !base.ends_with('/') {
    base.push('/');
  }
  base
}

impl ServerConfig {
  /// Resolve a config against a project root directory.
  pub fn for_root(root: impl AsRef<Path>) -> Result<Self, AnyError> {
    let root = root.as_ref();
    let root = root.canonicalize().map_err(|err| {
      EsdevError::Config(format!(
        "project root {} is not accessible: {err}",
        root.display()
      ))
    })?;

    let public_dir = {
      let dir = root.join("public");
      dir.is_dir().then_some(dir)
    };
    let cache_dir = root.join("node_modules").join(".esdev").join("deps");
    let watch_ignore = vec![
      root.join("node_modules"),
      root.join(".git"),
      root.join("dist"),
    ];

    Ok(Self {
      fs_allow: vec![root.clone(), cache_dir.clone()],
      root,
      base: "/".to_string(),
      host: DEFAULT_HOST.to_string(),
      port: DEFAULT_PORT,
      public_dir,
      watch_ignore,
      hmr: HmrOptions::default(),
      optimize: OptimizeOptions::default(),
      cache_dir,
      plugins: Vec::new(),
    })
  }

  pub fn from_flags(flags: &Flags) -> Result<Self, AnyError> {
    let root = flags.root.clone().unwrap_or_else(|| ".".to_string());
    let mut config = Self::for_root(root)?;
    if let Some(host) = &flags.host {
      config.host = host.clone();
    }
    if let Some(port) = flags.port {
      config.port = port;
    }
    if let Some(base) = &flags.base {
      config.base = normalize_base(base);
    }
    config.hmr.enabled = !flags.no_hmr;
    config.optimize.force = flags.force;
    Ok(config)
  }

  pub fn with_base(mut self, base: &str) -> Self {
    self.base = normalize_base(base);
    self
  }

  pub fn with_plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
    self.plugins.push(plugin);
    self
  }

  /// Strip the public base from a request path. `None` means the
  /// request is outside the base and should be redirected.
  pub fn strip_base<'a>(&self, url: &'a str) -> Option<&'a str> {
    if self.base == "/" {
      return Some(url);
    }
    let trimmed_base = &self.base[..self.base.len() - 1];
    match url.strip_prefix(trimmed_base) {
      Some("") => Some("/"),
      Some(rest) if rest.starts_with('/') || rest.starts_with('?') => {
        Some(rest)
      }
      _ => None,
    }
  }
}
