// Copyright 2018-2026 the Deno authors. MIT license.

//! Dependency pre-bundling.
//!
//! Bare (node_modules) imports are packaged once into single-file ES
//! modules under a content-hashed cache directory and served from
//! there, so the browser never walks a package's internal import
//! fan-out request by request.
//!
//! The bundling itself goes through the [`DepBundler`] trait; the
//! built-in [`EsmLinkBundler`] produces dev-grade output (CommonJS
//! wrapping, pass-through for ES modules). A production-quality
//! flattening bundler can be plugged in from the outside.
//!
//! Re-optimization is atomic from the browser's perspective: new
//! output is written next to the previous generation's files (which
//! keep serving in-flight requests), then the manifest and browser
//! hash swap in one step and the server issues a full reload.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::Mutex;
use parking_lot::RwLock;
use serde::Deserialize;
use serde::Serialize;

use crate::config::ServerConfig;
use crate::errors::AnyError;
use crate::errors::EsdevError;
use crate::util::checksum;
use crate::util::path::path_to_fs_url;

const METADATA_FILE: &str = "_metadata.json";
const LOCK_FILE: &str = "_lock";

/// One entry the bundler is asked to package.
#[derive(Debug, Clone)]
pub struct BundleRequest {
  /// The bare specifier, e.g. `react` or `react/jsx-runtime`.
  pub specifier: String,
  /// The file the specifier resolved to inside its package.
  pub src: PathBuf,
}

/// One packaged output.
#[derive(Debug, Clone)]
pub struct BundledDep {
  pub specifier: String,
  pub code: String,
  /// Whether the source is CommonJS and default-import sites need the
  /// interop rewrite.
  pub needs_interop: bool,
}

/// The external bundler interface. Invoked once per (re-)optimization
/// with every entry, so the implementation can share work across them.
#[async_trait]
pub trait DepBundler: Send + Sync {
  async fn bundle(
    &self,
    requests: &[BundleRequest],
  ) -> Result<Vec<BundledDep>, AnyError>;
}

/// Built-in development bundler: reads each resolved entry and emits a
/// self-contained ES module, wrapping CommonJS sources in a scope that
/// re-exports `module.exports` as the default binding.
pub struct EsmLinkBundler;

fn source_is_commonjs(code: &str) -> bool {
  let has_esm_syntax = code.contains("import ") || code.contains("export ");
  !has_esm_syntax
    && (code.contains("module.exports")
      || code.contains("exports.")
      || code.contains("require("))
}

#[async_trait]
impl DepBundler for EsmLinkBundler {
  async fn bundle(
    &self,
    requests: &[BundleRequest],
  ) -> Result<Vec<BundledDep>, AnyError> {
    let mut outputs = Vec::with_capacity(requests.len());
    for request in requests {
      let code = tokio::fs::read_to_string(&request.src)
        .await
        .map_err(|err| {
          EsdevError::Optimize(format!(
            "cannot read {} for \"{}\": {err}",
            request.src.display(),
            request.specifier
          ))
        })?;
      if source_is_commonjs(&code) {
        let wrapped = format!(
          "const module = {{ exports: {{}} }};\nconst exports = module.exports;\n{code}\nexport default module.exports;\n"
        );
        outputs.push(BundledDep {
          specifier: request.specifier.clone(),
          code: wrapped,
          needs_interop: true,
        });
      } else {
        outputs.push(BundledDep {
          specifier: request.specifier.clone(),
          code,
          needs_interop: false,
        });
      }
    }
    Ok(outputs)
  }
}

/// Manifest entry for one optimized dependency.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OptimizedDepInfo {
  pub src: PathBuf,
  /// File name of the bundled output inside the cache directory.
  pub file: String,
  pub file_hash: String,
  pub needs_interop: bool,
}

/// The persisted `_metadata.json` manifest.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct DepMetadata {
  pub browser_hash: String,
  pub entries: IndexMap<String, OptimizedDepInfo>,
}

/// Guard file protecting the cache directory against concurrent
/// optimizations from separate server processes.
struct CacheLock {
  path: PathBuf,
}

impl CacheLock {
  fn acquire(cache_dir: &Path) -> Option<Self> {
    let path = cache_dir.join(LOCK_FILE);
    match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
      Ok(_) => Some(Self { path }),
      Err(_) => None,
    }
  }
}

impl Drop for CacheLock {
  fn drop(&mut self) {
    let _ = fs::remove_file(&self.path);
  }
}

/// Turn a specifier into a flat, file-system safe output name.
fn flatten_specifier(specifier: &str) -> String {
  specifier
    .chars()
    .map(|c| match c {
      '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
      other => other,
    })
    .collect()
}

/// Resolve a bare specifier against `node_modules`, walking up parent
/// directories from `root`. Honors `module` over `main` in
/// `package.json` and supports deep imports like `pkg/subpath`.
pub fn resolve_bare_specifier(root: &Path, specifier: &str) -> Option<PathBuf> {
  let (package_name, subpath) = split_package_specifier(specifier)?;

  let mut dir = Some(root);
  while let Some(current) = dir {
    let package_dir = current.join("node_modules").join(package_name);
    if package_dir.is_dir() {
      return resolve_in_package(&package_dir, subpath);
    }
    dir = current.parent();
  }
  None
}

fn split_package_specifier(specifier: &str) -> Option<(&str, Option<&str>)> {
  if specifier.is_empty() || specifier.starts_with('.') {
    return None;
  }
  let segments_in_name = if specifier.starts_with('@') { 2 } else { 1 };
  let mut slash_count = 0;
  for (idx, byte) in specifier.bytes().enumerate() {
    if byte == b'/' {
      slash_count += 1;
      if slash_count == segments_in_name {
        return Some((&specifier[..idx], Some(&specifier[idx + 1..])));
      }
    }
  }
  if specifier.starts_with('@') && slash_count == 0 {
    // a scope without a package name is not importable
    return None;
  }
  Some((specifier, None))
}

fn resolve_in_package(package_dir: &Path, subpath: Option<&str>) -> Option<PathBuf> {
  match subpath {
    Some(subpath) => {
      let candidates = [
        package_dir.join(subpath),
        package_dir.join(format!("{subpath}.js")),
        package_dir.join(format!("{subpath}.mjs")),
        package_dir.join(subpath).join("index.js"),
      ];
      candidates.into_iter().find(|p| p.is_file())
    }
    None => {
      #[derive(Deserialize)]
      struct PackageJson {
        module: Option<String>,
        main: Option<String>,
      }

      let manifest_path = package_dir.join("package.json");
      let entry = fs::read_to_string(&manifest_path)
        .ok()
        .and_then(|text| serde_json::from_str::<PackageJson>(&text).ok())
        .and_then(|manifest| manifest.module.or(manifest.main))
        .unwrap_or_else(|| "index.js".to_string());

      let resolved = package_dir.join(entry);
      if resolved.is_file() {
        Some(resolved)
      } else {
        let with_ext = resolved.with_extension("js");
        with_ext.is_file().then_some(with_ext)
      }
    }
  }
}

pub struct DepOptimizer {
  root: PathBuf,
  cache_dir: PathBuf,
  include: Vec<String>,
  exclude: Vec<String>,
  force: bool,
  bundler: Arc<dyn DepBundler>,
  metadata: RwLock<DepMetadata>,
  /// Bare specifiers discovered during import analysis that are not in
  /// the current optimization.
  missing: Mutex<Vec<String>>,
}

impl DepOptimizer {
  pub fn new(config: &ServerConfig, bundler: Arc<dyn DepBundler>) -> Self {
    Self {
      root: config.root.clone(),
      cache_dir: config.cache_dir.clone(),
      include: config.optimize.include.clone(),
      exclude: config.optimize.exclude.clone(),
      force: config.optimize.force,
      bundler,
      metadata: RwLock::new(DepMetadata::default()),
      missing: Mutex::new(Vec::new()),
    }
  }

  pub fn cache_dir(&self) -> &Path {
    &self.cache_dir
  }

  pub fn browser_hash(&self) -> String {
    self.metadata.read().browser_hash.clone()
  }

  pub fn is_excluded(&self, specifier: &str) -> bool {
    self.exclude.iter().any(|e| e == specifier)
  }

  /// Load the persisted manifest or run a fresh optimization over the
  /// scanned + declared entry set.
  pub async fn init(&self, scanned: Vec<String>) -> Result<(), AnyError> {
    let mut wanted: Vec<String> = self.include.clone();
    for specifier in scanned {
      if !wanted.contains(&specifier) {
        wanted.push(specifier);
      }
    }
    wanted.retain(|specifier| !self.is_excluded(specifier));

    if !self.force {
      if let Some(metadata) = self.load_manifest() {
        let covers_wanted =
          wanted.iter().all(|s| metadata.entries.contains_key(s));
        if covers_wanted {
          log::debug!(
            "using cached optimized deps ({} entries)",
            metadata.entries.len()
          );
          *self.metadata.write() = metadata;
          return Ok(());
        }
      }
    }

    if wanted.is_empty() {
      fs::create_dir_all(&self.cache_dir)?;
      self.persist_manifest(&DepMetadata::default())?;
      return Ok(());
    }

    self.optimize(wanted).await
  }

  fn load_manifest(&self) -> Option<DepMetadata> {
    let text = fs::read_to_string(self.cache_dir.join(METADATA_FILE)).ok()?;
    let metadata: DepMetadata = serde_json::from_str(&text).ok()?;
    // stale if any bundled output vanished
    let complete = metadata
      .entries
      .values()
      .all(|info| self.cache_dir.join(&info.file).is_file());
    complete.then_some(metadata)
  }

  fn persist_manifest(&self, metadata: &DepMetadata) -> Result<(), AnyError> {
    let text = serde_json::to_string_pretty(metadata)?;
    fs::write(self.cache_dir.join(METADATA_FILE), text)?;
    Ok(())
  }

  /// Bundle `specifiers` and swap the manifest in one step.
  async fn optimize(&self, specifiers: Vec<String>) -> Result<(), AnyError> {
    fs::create_dir_all(&self.cache_dir)?;

    let Some(_lock) = CacheLock::acquire(&self.cache_dir) else {
      log::warn!(
        "dependency cache at {} is locked by another server, skipping optimization",
        self.cache_dir.display()
      );
      return Ok(());
    };

    let mut requests = Vec::new();
    for specifier in &specifiers {
      match resolve_bare_specifier(&self.root, specifier) {
        Some(src) => requests.push(BundleRequest {
          specifier: specifier.clone(),
          src,
        }),
        None => {
          return Err(
            EsdevError::Optimize(format!(
              "cannot resolve \"{specifier}\" in node_modules"
            ))
            .into(),
          );
        }
      }
    }

    let outputs = self.bundler.bundle(&requests).await?;

    let mut entries = IndexMap::new();
    for (request, output) in requests.iter().zip(outputs.iter()) {
      let file = format!("{}.js", flatten_specifier(&output.specifier));
      fs::write(self.cache_dir.join(&file), &output.code)?;
      entries.insert(
        output.specifier.clone(),
        OptimizedDepInfo {
          src: request.src.clone(),
          file,
          file_hash: checksum::hash(output.code.as_bytes()),
          needs_interop: output.needs_interop,
        },
      );
    }
    entries.sort_keys();

    let mut hasher_input = String::new();
    for (specifier, info) in &entries {
      hasher_input.push_str(specifier);
      hasher_input.push(':');
      hasher_input.push_str(&info.file_hash);
      hasher_input.push('\n');
    }
    let metadata = DepMetadata {
      browser_hash: checksum::hash(hasher_input.as_bytes()),
      entries,
    };

    self.persist_manifest(&metadata)?;
    log::info!(
      "optimized {} dependencies (browser hash {})",
      metadata.entries.len(),
      metadata.browser_hash
    );
    *self.metadata.write() = metadata;
    Ok(())
  }

  /// Rewrite target for a bare import, when it is already optimized.
  pub fn optimized_import_url(
    &self,
    specifier: &str,
  ) -> Option<(String, bool)> {
    let metadata = self.metadata.read();
    let info = metadata.entries.get(specifier)?;
    let url = format!(
      "{}?v={}",
      path_to_fs_url(&self.cache_dir.join(&info.file)),
      metadata.browser_hash
    );
    Some((url, info.needs_interop))
  }

  /// Record a bare specifier the optimization does not cover yet.
  /// Returns `true` when this is the first time it was seen.
  pub fn register_missing_import(&self, specifier: &str) -> bool {
    if self.is_excluded(specifier) {
      return false;
    }
    if self.metadata.read().entries.contains_key(specifier) {
      return false;
    }
    let mut missing = self.missing.lock();
    if missing.iter().any(|s| s == specifier) {
      return false;
    }
    missing.push(specifier.to_string());
    true
  }

  pub fn has_missing_imports(&self) -> bool {
    !self.missing.lock().is_empty()
  }

  /// Re-run the optimization over the union of current and discovered
  /// entries. Returns `true` when the browser hash changed (the caller
  /// must then issue a full reload).
  pub async fn reoptimize_missing(&self) -> Result<bool, AnyError> {
    let discovered: Vec<String> = {
      let mut missing = self.missing.lock();
      std::mem::take(&mut *missing)
    };
    if discovered.is_empty() {
      return Ok(false);
    }

    let previous_hash = self.browser_hash();
    let mut wanted: Vec<String> =
      self.metadata.read().entries.keys().cloned().collect();
    for specifier in discovered {
      if !wanted.contains(&specifier) {
        wanted.push(specifier);
      }
    }

    self.optimize(wanted).await?;
    Ok(self.browser_hash() != previous_hash)
  }
}

/// Crawl local modules reachable from `entries` and collect the bare
/// specifiers they import.
pub fn scan_bare_imports(
  root: &Path,
  entries: Vec<PathBuf>,
) -> Vec<String> {
  let mut bare = Vec::new();
  let mut queue = entries;
  let mut visited: HashSet<PathBuf> = HashSet::new();

  while let Some(file) = queue.pop() {
    let Ok(canonical) = file.canonicalize() else {
      continue;
    };
    if !visited.insert(canonical.clone()) {
      continue;
    }
    let Ok(code) = fs::read_to_string(&canonical) else {
      continue;
    };
    for specifier in crate::server::import_analysis::scan_import_specifiers(&code)
    {
      if specifier.starts_with('.') {
        if let Some(parent) = canonical.parent() {
          if let Some(resolved) = resolve_local_file(parent, &specifier) {
            queue.push(resolved);
          }
        }
      } else if !specifier.starts_with('/')
        && !bare.contains(&specifier)
        && resolve_bare_specifier(root, &specifier).is_some()
      {
        bare.push(specifier);
      }
    }
  }

  bare.sort();
  bare
}

fn resolve_local_file(base_dir: &Path, specifier: &str) -> Option<PathBuf> {
  let joined = base_dir.join(specifier);
  let candidates = [
    joined.clone(),
    joined.with_extension("js"),
    joined.with_extension("ts"),
    joined.join("index.js"),
  ];
  candidates.into_iter().find(|p| p.is_file())
}
