// Copyright 2018-2026 the Deno authors. MIT license.

//! The server-side module graph.
//!
//! One [`ModuleNode`] exists per distinct URL the server has observed.
//! Nodes live in a flat arena and refer to each other through stable
//! [`ModuleIndex`] handles, which sidesteps cyclic ownership between
//! mutual importer/importee sets. Three indexes (by url, by resolved
//! id, by file path) point into the arena and agree on node identity.
//!
//! Nodes are invalidated, not removed, on file change. Removal happens
//! only when the graph is discarded with the server, or through
//! [`ModuleGraph::prune`] once a module stops being imported.

use std::collections::HashMap;
use std::collections::HashSet;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use crate::util::path::is_css_request;
use crate::util::path::remove_timestamp_query;

/// Stable handle into the module arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleIndex(u32);

impl ModuleIndex {
  pub(crate) fn from_usize(value: usize) -> Self {
    Self(value as u32)
  }

  pub(crate) fn as_usize(self) -> usize {
    self.0 as usize
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleType {
  Js,
  Css,
}

impl ModuleType {
  pub fn from_url(url: &str) -> Self {
    if is_css_request(url) {
      ModuleType::Css
    } else {
      ModuleType::Js
    }
  }
}

/// Cached output of the transform pipeline for one URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformResult {
  pub code: String,
  pub map: Option<String>,
  /// URLs of modules this one imports, as rewritten into the code.
  pub deps: Vec<String>,
  pub etag: String,
}

/// What the resolve step learned about a URL, needed to allocate a node.
#[derive(Debug, Clone)]
pub struct ResolvedEntry {
  /// Resolved absolute file path with query, or a virtual id.
  pub id: String,
  /// Bare file path used for watcher matching; `None` for virtual ids.
  pub file: Option<PathBuf>,
}

#[derive(Debug)]
pub struct ModuleNode {
  /// Canonical URL, as the browser requests it (no timestamp query).
  pub url: String,
  pub id: String,
  pub file: Option<PathBuf>,
  pub module_type: ModuleType,
  pub importers: HashSet<ModuleIndex>,
  pub imported_modules: HashSet<ModuleIndex>,
  /// Dependencies whose updates this module handles itself.
  pub accepted_hmr_deps: HashSet<ModuleIndex>,
  /// Export names accepted via `acceptExports`; `None` accepts all.
  pub accepted_hmr_exports: Option<HashSet<String>>,
  pub is_self_accepting: bool,
  pub transform_result: Option<Arc<TransformResult>>,
  /// Monotonic cache buster appended as `?t=` by importer rewriting.
  pub last_hmr_timestamp: u64,
  pub last_invalidation_timestamp: u64,
  pruned: bool,
}

impl ModuleNode {
  fn new(url: String, resolved: ResolvedEntry) -> Self {
    let module_type = ModuleType::from_url(&url);
    Self {
      url,
      id: resolved.id,
      file: resolved.file,
      module_type,
      importers: HashSet::new(),
      imported_modules: HashSet::new(),
      accepted_hmr_deps: HashSet::new(),
      accepted_hmr_exports: None,
      is_self_accepting: false,
      transform_result: None,
      last_hmr_timestamp: 0,
      last_invalidation_timestamp: 0,
      pruned: false,
    }
  }

  /// An importer accepts a change to `dep` when it self-accepts or
  /// declared the dependency in an `accept(deps)` call.
  pub fn accepts_dep(&self, dep: ModuleIndex) -> bool {
    self.is_self_accepting || self.accepted_hmr_deps.contains(&dep)
  }

  pub fn is_pruned(&self) -> bool {
    self.pruned
  }
}

#[derive(Debug, Default)]
pub struct ModuleGraph {
  modules: Vec<ModuleNode>,
  url_to_module: HashMap<String, ModuleIndex>,
  id_to_module: HashMap<String, ModuleIndex>,
  file_to_modules: HashMap<PathBuf, HashSet<ModuleIndex>>,
}

impl ModuleGraph {
  pub fn new() -> Self {
    Self::default()
  }

  fn canonicalize(url: &str) -> String {
    remove_timestamp_query(url)
  }

  pub fn module(&self, index: ModuleIndex) -> &ModuleNode {
    &self.modules[index.as_usize()]
  }

  pub fn module_mut(&mut self, index: ModuleIndex) -> &mut ModuleNode {
    &mut self.modules[index.as_usize()]
  }

  pub fn module_count(&self) -> usize {
    self.modules.iter().filter(|m| !m.pruned).count()
  }

  pub fn get_module_by_url(&self, url: &str) -> Option<ModuleIndex> {
    let url = Self::canonicalize(url);
    self
      .url_to_module
      .get(&url)
      .or_else(|| self.id_to_module.get(&url))
      .copied()
  }

  pub fn get_modules_by_file(&self, file: &Path) -> Vec<ModuleIndex> {
    self
      .file_to_modules
      .get(file)
      .map(|set| {
        let mut indices: Vec<ModuleIndex> = set.iter().copied().collect();
        indices.sort();
        indices
      })
      .unwrap_or_default()
  }

  /// Create a node on miss and wire it into all applicable indexes.
  pub fn ensure_entry_from_url(
    &mut self,
    url: &str,
    resolved: ResolvedEntry,
  ) -> ModuleIndex {
    let url = Self::canonicalize(url);
    if let Some(index) = self.url_to_module.get(&url) {
      return *index;
    }

    let index = ModuleIndex::from_usize(self.modules.len());
    let node = ModuleNode::new(url.clone(), resolved);
    self.url_to_module.insert(url, index);
    self.id_to_module.insert(node.id.clone(), index);
    if let Some(file) = &node.file {
      self
        .file_to_modules
        .entry(file.clone())
        .or_default()
        .insert(index);
    }
    self.modules.push(node);
    index
  }

  /// Record the outcome of import analysis for `index`: replace its
  /// outgoing edges and HMR registrations.
  ///
  /// Returns modules that lost their last importer in the diff; the
  /// caller reports them through a `prune` message.
  pub fn update_module_info(
    &mut self,
    index: ModuleIndex,
    imported: Vec<ModuleIndex>,
    accepted: HashSet<ModuleIndex>,
    accepted_exports: Option<HashSet<String>>,
    is_self_accepting: bool,
  ) -> Vec<ModuleIndex> {
    let prev_imports: HashSet<ModuleIndex> =
      self.module(index).imported_modules.clone();
    let next_imports: HashSet<ModuleIndex> = imported.iter().copied().collect();

    for dep in &next_imports {
      self.module_mut(*dep).importers.insert(index);
    }

    let mut no_longer_imported = Vec::new();
    for dep in prev_imports.difference(&next_imports) {
      let dep_node = self.module_mut(*dep);
      dep_node.importers.remove(&index);
      if dep_node.importers.is_empty() && !dep_node.pruned {
        no_longer_imported.push(*dep);
      }
    }

    let node = self.module_mut(index);
    node.imported_modules = next_imports;
    node.accepted_hmr_deps = accepted;
    node.accepted_hmr_exports = accepted_exports;
    node.is_self_accepting = is_self_accepting;

    no_longer_imported.sort();
    no_longer_imported
  }

  /// Mark a node stale and walk upward through importers that do not
  /// accept it. The cached transform is dropped; the next request for
  /// the URL recomputes it.
  pub fn invalidate_module(
    &mut self,
    index: ModuleIndex,
    seen: &mut HashSet<ModuleIndex>,
    timestamp: u64,
  ) {
    if !seen.insert(index) {
      return;
    }
    {
      let node = self.module_mut(index);
      node.last_invalidation_timestamp = timestamp;
      node.transform_result = None;
    }
    let importers: Vec<ModuleIndex> =
      self.module(index).importers.iter().copied().collect();
    for importer in importers {
      if !self.module(importer).accepts_dep(index) {
        self.invalidate_module(importer, seen, timestamp);
      }
    }
  }

  /// Invalidate every node backed by `file`, including query variants.
  /// Returns the directly affected nodes in stable order.
  pub fn on_file_change(
    &mut self,
    file: &Path,
    timestamp: u64,
  ) -> Vec<ModuleIndex> {
    let affected = self.get_modules_by_file(file);
    let mut seen = HashSet::new();
    for index in &affected {
      self.invalidate_module(*index, &mut seen, timestamp);
    }
    affected
  }

  /// Drop every cached transform at once, e.g. after the optimizer
  /// produced a new generation and rewritten URLs went stale.
  pub fn invalidate_all(&mut self, timestamp: u64) {
    for node in &mut self.modules {
      if node.pruned {
        continue;
      }
      node.last_invalidation_timestamp = timestamp;
      node.transform_result = None;
    }
  }

  /// Record a successful transform, clearing staleness.
  pub fn set_transform_result(
    &mut self,
    index: ModuleIndex,
    result: Arc<TransformResult>,
  ) {
    let node = self.module_mut(index);
    node.transform_result = Some(result);
    node.last_invalidation_timestamp = 0;
  }

  /// A cached result is only served while the node is not stale.
  pub fn fresh_transform_result(
    &self,
    index: ModuleIndex,
  ) -> Option<Arc<TransformResult>> {
    let node = self.module(index);
    if node.last_invalidation_timestamp > 0 {
      return None;
    }
    node.transform_result.clone()
  }

  /// Detach modules that ceased to be reachable and drop them from all
  /// indexes. Returns their URLs for the prune payload; a module
  /// appears in at most one prune across its lifetime.
  pub fn prune(&mut self, indices: &[ModuleIndex]) -> Vec<String> {
    let mut pruned_urls = Vec::new();
    for &index in indices {
      if self.module(index).pruned || !self.module(index).importers.is_empty()
      {
        continue;
      }
      let (url, id, file, imported) = {
        let node = self.module_mut(index);
        node.pruned = true;
        node.transform_result = None;
        (
          node.url.clone(),
          node.id.clone(),
          node.file.clone(),
          std::mem::take(&mut node.imported_modules),
        )
      };
      self.url_to_module.remove(&url);
      self.id_to_module.remove(&id);
      if let Some(file) = file {
        if let Some(set) = self.file_to_modules.get_mut(&file) {
          set.remove(&index);
          if set.is_empty() {
            self.file_to_modules.remove(&file);
          }
        }
      }
      for dep in imported {
        self.module_mut(dep).importers.remove(&index);
      }
      pruned_urls.push(url);
    }
    pruned_urls
  }

  #[cfg(test)]
  pub fn assert_mutual_edges(&self) {
    for (index, node) in self.modules.iter().enumerate() {
      let index = ModuleIndex::from_usize(index);
      if node.pruned {
        continue;
      }
      for dep in &node.imported_modules {
        assert!(
          self.module(*dep).importers.contains(&index),
          "importer edge missing for {} -> {}",
          node.url,
          self.module(*dep).url
        );
      }
      for importer in &node.importers {
        assert!(
          self.module(*importer).imported_modules.contains(&index),
          "importee edge missing for {} -> {}",
          self.module(*importer).url,
          node.url
        );
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;

  fn file_entry(path: &str) -> ResolvedEntry {
    ResolvedEntry {
      id: path.to_string(),
      file: Some(PathBuf::from(path)),
    }
  }

  fn add(graph: &mut ModuleGraph, url: &str) -> ModuleIndex {
    graph.ensure_entry_from_url(url, file_entry(&format!("/root{url}")))
  }

  fn link(graph: &mut ModuleGraph, importer: ModuleIndex, deps: &[ModuleIndex]) {
    graph.update_module_info(
      importer,
      deps.to_vec(),
      HashSet::new(),
      None,
      false,
    );
  }

  #[test]
  fn triple_index_agreement() {
    let mut graph = ModuleGraph::new();
    let index = add(&mut graph, "/src/a.js");

    assert_eq!(graph.get_module_by_url("/src/a.js"), Some(index));
    assert_eq!(graph.get_module_by_url("/src/a.js?t=123"), Some(index));
    assert_eq!(graph.get_module_by_url("/root/src/a.js"), Some(index));
    assert_eq!(
      graph.get_modules_by_file(Path::new("/root/src/a.js")),
      vec![index]
    );
  }

  #[test]
  fn ensure_entry_is_idempotent() {
    let mut graph = ModuleGraph::new();
    let first = add(&mut graph, "/src/a.js");
    let second = add(&mut graph, "/src/a.js?t=99");
    assert_eq!(first, second);
    assert_eq!(graph.module_count(), 1);
  }

  #[test]
  fn virtual_modules_have_no_file() {
    let mut graph = ModuleGraph::new();
    let index = graph.ensure_entry_from_url(
      "/@id/__x00__virtual:config",
      ResolvedEntry {
        id: "\0virtual:config".to_string(),
        file: None,
      },
    );
    assert!(graph.module(index).file.is_none());
    assert!(graph.file_to_modules.is_empty());
  }

  #[test]
  fn edges_stay_mutual_through_updates() {
    let mut graph = ModuleGraph::new();
    let a = add(&mut graph, "/src/a.js");
    let b = add(&mut graph, "/src/b.js");
    let c = add(&mut graph, "/src/c.js");

    link(&mut graph, a, &[b, c]);
    graph.assert_mutual_edges();

    // drop the edge to c
    link(&mut graph, a, &[b]);
    graph.assert_mutual_edges();
    assert!(graph.module(c).importers.is_empty());
  }

  #[test]
  fn update_reports_no_longer_imported() {
    let mut graph = ModuleGraph::new();
    let a = add(&mut graph, "/src/a.js");
    let b = add(&mut graph, "/src/b.js");
    let c = add(&mut graph, "/src/c.js");

    link(&mut graph, a, &[b, c]);
    let orphaned = graph.update_module_info(
      a,
      vec![b],
      HashSet::new(),
      None,
      false,
    );
    assert_eq!(orphaned, vec![c]);
  }

  #[test]
  fn invalidation_walks_non_accepting_importers() {
    let mut graph = ModuleGraph::new();
    let entry = add(&mut graph, "/src/entry.js");
    let middle = add(&mut graph, "/src/middle.js");
    let leaf = add(&mut graph, "/src/leaf.js");
    link(&mut graph, entry, &[middle]);
    link(&mut graph, middle, &[leaf]);

    for index in [entry, middle, leaf] {
      graph.set_transform_result(
        index,
        Arc::new(TransformResult {
          code: "export {}".to_string(),
          map: None,
          deps: vec![],
          etag: "W/\"0\"".to_string(),
        }),
      );
    }

    let mut seen = HashSet::new();
    graph.invalidate_module(leaf, &mut seen, 100);

    for index in [entry, middle, leaf] {
      assert_eq!(graph.module(index).last_invalidation_timestamp, 100);
      assert!(graph.module(index).transform_result.is_none());
      assert!(graph.fresh_transform_result(index).is_none());
    }
  }

  #[test]
  fn invalidation_stops_at_accepting_importer() {
    let mut graph = ModuleGraph::new();
    let entry = add(&mut graph, "/src/entry.js");
    let parent = add(&mut graph, "/src/parent.js");
    let child = add(&mut graph, "/src/child.js");
    link(&mut graph, entry, &[parent]);
    link(&mut graph, parent, &[child]);
    graph.update_module_info(
      parent,
      vec![child],
      HashSet::from([child]),
      None,
      false,
    );

    let mut seen = HashSet::new();
    graph.invalidate_module(child, &mut seen, 7);

    assert_eq!(graph.module(child).last_invalidation_timestamp, 7);
    // parent accepts the child, so the walk stops before it
    assert_eq!(graph.module(parent).last_invalidation_timestamp, 0);
    assert_eq!(graph.module(entry).last_invalidation_timestamp, 0);
  }

  #[test]
  fn invalidation_survives_cycles() {
    let mut graph = ModuleGraph::new();
    let a = add(&mut graph, "/src/a.js");
    let b = add(&mut graph, "/src/b.js");
    link(&mut graph, a, &[b]);
    link(&mut graph, b, &[a]);

    let mut seen = HashSet::new();
    graph.invalidate_module(a, &mut seen, 3);
    assert_eq!(graph.module(a).last_invalidation_timestamp, 3);
    assert_eq!(graph.module(b).last_invalidation_timestamp, 3);
  }

  #[test]
  fn cache_coherence_after_transform() {
    let mut graph = ModuleGraph::new();
    let a = add(&mut graph, "/src/a.js");
    let result = Arc::new(TransformResult {
      code: "export const x = 1".to_string(),
      map: None,
      deps: vec![],
      etag: "W/\"x\"".to_string(),
    });

    let mut seen = HashSet::new();
    graph.invalidate_module(a, &mut seen, 44);
    assert!(graph.fresh_transform_result(a).is_none());

    graph.set_transform_result(a, result.clone());
    assert_eq!(graph.module(a).last_invalidation_timestamp, 0);
    assert_eq!(graph.fresh_transform_result(a), Some(result));
  }

  #[test]
  fn file_change_hits_query_variants() {
    let mut graph = ModuleGraph::new();
    let plain = graph.ensure_entry_from_url(
      "/src/style.css",
      file_entry("/root/src/style.css"),
    );
    let imported = graph.ensure_entry_from_url(
      "/src/style.css?import",
      file_entry("/root/src/style.css"),
    );
    assert_ne!(plain, imported);

    let affected =
      graph.on_file_change(Path::new("/root/src/style.css"), 12);
    assert_eq!(affected.len(), 2);
  }

  #[test]
  fn prune_fires_once() {
    let mut graph = ModuleGraph::new();
    let a = add(&mut graph, "/src/a.js");
    let b = add(&mut graph, "/src/b.js");
    link(&mut graph, a, &[b]);

    let orphaned =
      graph.update_module_info(a, vec![], HashSet::new(), None, false);
    assert_eq!(orphaned, vec![b]);

    let urls = graph.prune(&orphaned);
    assert_eq!(urls, vec!["/src/b.js".to_string()]);
    assert!(graph.get_module_by_url("/src/b.js").is_none());

    // a second attempt must not re-dispatch
    assert!(graph.prune(&orphaned).is_empty());
  }
}
