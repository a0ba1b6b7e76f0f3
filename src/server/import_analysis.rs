// Copyright 2018-2026 the Deno authors. MIT license.

//! Import analysis and rewriting.
//!
//! After the plugin chain produced JavaScript, this pass scans static
//! imports, re-exports and dynamic `import()` calls, and rewrites each
//! specifier into a URL the browser can request back from the server:
//!
//! - bare specifiers point into the optimized dependency cache, with a
//!   `?v=<browser hash>` cache buster;
//! - relative specifiers resolve against the importer URL and carry a
//!   `?t=<timestamp>` once the importee was hot-updated;
//! - CommonJS dependencies get their default/named import sites
//!   rewritten through the interop binding.
//!
//! The pass also detects `import.meta.hot` registrations (`accept`,
//! `acceptExports`, `dispose`, `prune`) to populate the module's HMR
//! metadata, and injects the hot-context preamble for modules that use
//! them. The scan is lexical (specifier spans only), over source with
//! comments blanked out.

use std::collections::HashSet;
use std::ops::Range;
use std::path::Path;

use lazy_regex::lazy_regex;
use lazy_regex::Lazy;
use regex::Regex;

use crate::errors::AnyError;
use crate::errors::EsdevError;
use crate::optimizer::resolve_bare_specifier;
use crate::optimizer::DepOptimizer;
use crate::util::path::clean_url;
use crate::util::path::inject_query;
use crate::util::path::is_css_request;
use crate::util::path::resolve_relative_url;
use crate::util::path::CLIENT_URL;
use crate::util::path::ID_PREFIX;

static IMPORT_STMT_RE: Lazy<Regex> = lazy_regex!(
  r#"(?x)
  \b(?P<kind>import|export)
  (?P<clause>\s+[^'"();=]+?\s+from)?
  \s*
  ['"](?P<spec>[^'"\n]+)['"]
  "#
);

static DYNAMIC_IMPORT_RE: Lazy<Regex> =
  lazy_regex!(r#"\bimport\s*\(\s*['"](?P<spec>[^'"\n]+)['"]\s*\)"#);

static HOT_ACCEPT_RE: Lazy<Regex> =
  lazy_regex!(r#"import\s*\.\s*meta\s*\.\s*hot\s*\.\s*accept\s*\("#);

static HOT_ACCEPT_EXPORTS_RE: Lazy<Regex> =
  lazy_regex!(r#"import\s*\.\s*meta\s*\.\s*hot\s*\.\s*acceptExports\s*\("#);

static STRING_LITERAL_RE: Lazy<Regex> =
  lazy_regex!(r#"['"](?P<text>[^'"\n]*)['"]"#);

/// Result of analyzing one module's source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyzedModule {
  pub code: String,
  /// Rewritten dependency URLs, in order of first appearance.
  pub deps: Vec<String>,
  /// Canonical URLs named in `accept("./dep")` calls.
  pub accepted_urls: HashSet<String>,
  pub accepted_exports: Option<HashSet<String>>,
  pub is_self_accepting: bool,
  pub uses_hot: bool,
  /// Bare specifiers that are resolvable but not yet optimized.
  pub missing_bare: Vec<String>,
}

pub struct ImportRewriteInput<'a> {
  pub code: &'a str,
  pub importer_url: &'a str,
  pub root: &'a Path,
  pub optimizer: &'a DepOptimizer,
}

/// Blank out line and block comments, preserving offsets. Quote-aware
/// so a `//` inside a string literal does not swallow the line.
fn strip_comments(code: &str) -> String {
  #[derive(Clone, Copy, PartialEq)]
  enum State {
    Normal,
    LineComment,
    BlockComment,
    Str(u8),
  }

  let bytes = code.as_bytes();
  let mut out = bytes.to_vec();
  let mut state = State::Normal;
  let mut i = 0;
  while i < bytes.len() {
    match state {
      State::Normal => match bytes[i] {
        b'/' if bytes.get(i + 1) == Some(&b'/') => {
          state = State::LineComment;
          out[i] = b' ';
        }
        b'/' if bytes.get(i + 1) == Some(&b'*') => {
          state = State::BlockComment;
          out[i] = b' ';
        }
        quote @ (b'\'' | b'"' | b'`') => {
          state = State::Str(quote);
        }
        _ => {}
      },
      State::LineComment => {
        if bytes[i] == b'\n' {
          state = State::Normal;
        } else {
          out[i] = b' ';
        }
      }
      State::BlockComment => {
        if bytes[i] == b'/' && bytes[i - 1] == b'*' {
          state = State::Normal;
        }
        if bytes[i] != b'\n' {
          out[i] = b' ';
        }
      }
      State::Str(quote) => {
        if bytes[i] == b'\\' {
          i += 1;
        } else if bytes[i] == quote {
          state = State::Normal;
        }
      }
    }
    i += 1;
  }
  // the scan regexes only look at ascii syntax, so lossy is safe here
  String::from_utf8_lossy(&out).into_owned()
}

/// List every import specifier in `code` without rewriting anything.
/// Used by the optimizer's startup scan.
pub fn scan_import_specifiers(code: &str) -> Vec<String> {
  let scannable = strip_comments(code);
  let mut specifiers = Vec::new();
  for captures in IMPORT_STMT_RE.captures_iter(&scannable) {
    specifiers.push(captures["spec"].to_string());
  }
  for captures in DYNAMIC_IMPORT_RE.captures_iter(&scannable) {
    specifiers.push(captures["spec"].to_string());
  }
  specifiers
}

#[derive(Debug)]
struct Edit {
  range: Range<usize>,
  text: String,
}

fn apply_edits(code: &str, mut edits: Vec<Edit>) -> String {
  edits.sort_by_key(|edit| edit.range.start);
  // drop any edit overlapping an earlier one; statement-level rewrites
  // subsume the specifier spans inside them
  let mut kept: Vec<Edit> = Vec::with_capacity(edits.len());
  for edit in edits {
    if kept
      .last()
      .map_or(true, |prev| prev.range.end <= edit.range.start)
    {
      kept.push(edit);
    }
  }
  let mut out = code.to_string();
  for edit in kept.into_iter().rev() {
    out.replace_range(edit.range, &edit.text);
  }
  out
}

/// How one import site must be rewritten.
enum SpecifierRewrite {
  /// Replace the specifier text in place.
  Url(String),
  /// Replace the whole statement with interop bindings.
  Interop { url: String },
  /// Leave untouched (external).
  Keep,
}

struct Analysis<'a> {
  input: &'a ImportRewriteInput<'a>,
  deps: Vec<String>,
  missing_bare: Vec<String>,
  cjs_counter: usize,
}

impl<'a> Analysis<'a> {
  fn record_dep(&mut self, url: &str) {
    if !self.deps.iter().any(|d| d == url) {
      self.deps.push(url.to_string());
    }
  }

  /// Compute the rewritten URL for a specifier, recording it as a dep.
  fn rewrite_specifier(
    &mut self,
    specifier: &str,
    dynamic: bool,
    lookup_timestamp: &dyn Fn(&str) -> u64,
  ) -> Result<SpecifierRewrite, AnyError> {
    if specifier.starts_with("./") || specifier.starts_with("../") {
      let Some(url) = resolve_relative_url(self.input.importer_url, specifier)
      else {
        return Err(
          EsdevError::Resolve {
            specifier: specifier.to_string(),
            importer: Some(self.input.importer_url.to_string()),
          }
          .into(),
        );
      };
      return Ok(SpecifierRewrite::Url(self.finish_local_url(
        url,
        lookup_timestamp,
      )));
    }

    if specifier.starts_with('/') {
      return Ok(SpecifierRewrite::Url(
        self.finish_local_url(specifier.to_string(), lookup_timestamp),
      ));
    }

    if specifier.starts_with("http:")
      || specifier.starts_with("https:")
      || specifier.starts_with("data:")
    {
      return Ok(SpecifierRewrite::Keep);
    }

    // scheme-style specifiers (e.g. `virtual:config`) belong to
    // plugins; route them through the /@id/ namespace and resolve at
    // request time
    if specifier.contains(':') {
      let url = format!("{ID_PREFIX}{specifier}");
      self.record_dep(&url);
      return Ok(SpecifierRewrite::Url(url));
    }

    // bare import
    if self.input.optimizer.is_excluded(specifier) {
      return Ok(SpecifierRewrite::Keep);
    }
    if let Some((url, needs_interop)) =
      self.input.optimizer.optimized_import_url(specifier)
    {
      self.record_dep(&url);
      if needs_interop && !dynamic {
        return Ok(SpecifierRewrite::Interop { url });
      }
      return Ok(SpecifierRewrite::Url(url));
    }

    // resolvable but not in the current optimization: queue it for
    // re-optimization; the caller re-runs the analysis afterwards
    if resolve_bare_specifier(self.input.root, specifier).is_some() {
      if !self.missing_bare.iter().any(|s| s == specifier) {
        self.missing_bare.push(specifier.to_string());
      }
      return Ok(SpecifierRewrite::Keep);
    }

    Err(
      EsdevError::Resolve {
        specifier: specifier.to_string(),
        importer: Some(self.input.importer_url.to_string()),
      }
      .into(),
    )
  }

  fn finish_local_url(
    &mut self,
    url: String,
    lookup_timestamp: &dyn Fn(&str) -> u64,
  ) -> String {
    let mut url = url;
    if is_css_request(&url) {
      url = inject_query(&url, "import");
    }
    let timestamp = lookup_timestamp(&url);
    if timestamp > 0 {
      url = inject_query(&url, &format!("t={timestamp}"));
    }
    self.record_dep(&url);
    url
  }

  fn interop_bindings(&mut self, clause: &str, url: &str) -> String {
    self.cjs_counter += 1;
    let var = format!("__esdev_cjs_{}", self.cjs_counter);
    let clause = clause.trim();
    let clause = clause.strip_suffix("from").unwrap_or(clause).trim();

    let mut lines = vec![format!("import {var} from \"{url}\";")];
    if let Some(named) = clause.strip_prefix('{') {
      let named = named.trim_end_matches('}').trim();
      lines.push(format!(
        "const {{ {} }} = {var};",
        rename_named_bindings(named)
      ));
    } else if let Some(namespace) = clause.strip_prefix('*') {
      let name = namespace.trim().trim_start_matches("as").trim();
      lines.push(format!("const {name} = {var};"));
    } else {
      // default import, optionally followed by named bindings
      let (default_name, rest) = match clause.split_once(',') {
        Some((default_name, rest)) => (default_name.trim(), Some(rest.trim())),
        None => (clause, None),
      };
      lines.push(format!(
        "const {default_name} = {var}.default ?? {var};"
      ));
      if let Some(rest) = rest {
        if let Some(named) = rest.strip_prefix('{') {
          let named = named.trim_end_matches('}').trim();
          lines.push(format!(
            "const {{ {} }} = {var};",
            rename_named_bindings(named)
          ));
        } else if let Some(namespace) = rest.strip_prefix('*') {
          let name = namespace.trim().trim_start_matches("as").trim();
          lines.push(format!("const {name} = {var};"));
        }
      }
    }
    lines.join("\n")
  }
}

fn rename_named_bindings(named: &str) -> String {
  named
    .split(',')
    .map(str::trim)
    .filter(|part| !part.is_empty())
    .map(|part| match part.split_once(" as ") {
      Some((source, alias)) => format!("{}: {}", source.trim(), alias.trim()),
      None => part.to_string(),
    })
    .collect::<Vec<_>>()
    .join(", ")
}

/// Character offset just past a regex match, for argument parsing.
fn first_arg_offset(scannable: &str, match_end: usize) -> usize {
  scannable[match_end..]
    .find(|c: char| !c.is_whitespace())
    .map(|off| match_end + off)
    .unwrap_or(match_end)
}

enum AcceptArgs {
  SelfAccept,
  Deps(Vec<(Range<usize>, String)>),
}

/// Inspect the first argument of an `accept(...)` call starting at
/// `offset` (which points at the first non-whitespace character after
/// the opening parenthesis).
fn parse_accept_args(scannable: &str, offset: usize) -> AcceptArgs {
  match scannable.as_bytes().get(offset) {
    Some(b'\'') | Some(b'"') => {
      if let Some(captures) = STRING_LITERAL_RE.captures_at(scannable, offset)
      {
        let matched = captures.name("text").unwrap();
        return AcceptArgs::Deps(vec![(
          matched.range(),
          matched.as_str().to_string(),
        )]);
      }
      AcceptArgs::SelfAccept
    }
    Some(b'[') => {
      let close = scannable[offset..]
        .find(']')
        .map(|off| offset + off)
        .unwrap_or(scannable.len());
      let mut deps = Vec::new();
      for captures in STRING_LITERAL_RE.captures_iter(&scannable[offset..close])
      {
        let matched = captures.name("text").unwrap();
        deps.push((
          offset + matched.start()..offset + matched.end(),
          matched.as_str().to_string(),
        ));
      }
      AcceptArgs::Deps(deps)
    }
    _ => AcceptArgs::SelfAccept,
  }
}

/// Analyze and rewrite one JavaScript module.
///
/// `lookup_timestamp` maps a dependency's canonical URL to its
/// `last_hmr_timestamp`, so stale browser caches miss after an update.
pub fn analyze_and_rewrite(
  input: &ImportRewriteInput<'_>,
  lookup_timestamp: impl Fn(&str) -> u64,
) -> Result<AnalyzedModule, AnyError> {
  let scannable = strip_comments(input.code);
  let mut analysis = Analysis {
    input,
    deps: Vec::new(),
    missing_bare: Vec::new(),
    cjs_counter: 0,
  };
  let mut edits: Vec<Edit> = Vec::new();

  for captures in IMPORT_STMT_RE.captures_iter(&scannable) {
    let whole = captures.get(0).unwrap();
    let spec = captures.name("spec").unwrap();
    let rewrite = analysis.rewrite_specifier(
      spec.as_str(),
      false,
      &lookup_timestamp,
    )?;
    match rewrite {
      SpecifierRewrite::Url(url) => edits.push(Edit {
        range: spec.range(),
        text: url,
      }),
      SpecifierRewrite::Interop { url } => {
        let clause = captures
          .name("clause")
          .map(|m| m.as_str())
          .unwrap_or_default();
        if clause.is_empty() || captures["kind"].starts_with("export") {
          // side-effect import / re-export: no bindings to rewrite
          edits.push(Edit {
            range: spec.range(),
            text: url,
          });
        } else {
          let text = analysis.interop_bindings(clause, &url);
          edits.push(Edit {
            range: whole.range(),
            text,
          });
        }
      }
      SpecifierRewrite::Keep => {}
    }
  }

  for captures in DYNAMIC_IMPORT_RE.captures_iter(&scannable) {
    let spec = captures.name("spec").unwrap();
    match analysis.rewrite_specifier(spec.as_str(), true, &lookup_timestamp)? {
      SpecifierRewrite::Url(url) | SpecifierRewrite::Interop { url } => {
        edits.push(Edit {
          range: spec.range(),
          text: url,
        })
      }
      SpecifierRewrite::Keep => {}
    }
  }

  // HMR registrations
  let uses_hot = scannable.contains("import.meta.hot");
  let mut accepted_urls = HashSet::new();
  let mut accepted_exports: Option<HashSet<String>> = None;
  let mut is_self_accepting = false;

  for matched in HOT_ACCEPT_RE.find_iter(&scannable) {
    let offset = first_arg_offset(&scannable, matched.end());
    match parse_accept_args(&scannable, offset) {
      AcceptArgs::SelfAccept => {
        is_self_accepting = true;
      }
      AcceptArgs::Deps(deps) => {
        for (range, specifier) in deps {
          let url = if specifier.starts_with('.') {
            resolve_relative_url(input.importer_url, &specifier).ok_or_else(
              || {
                AnyError::from(EsdevError::Resolve {
                  specifier: specifier.clone(),
                  importer: Some(input.importer_url.to_string()),
                })
              },
            )?
          } else {
            specifier.clone()
          };
          // the client matches updates against the rewritten URL
          edits.push(Edit {
            range,
            text: url.clone(),
          });
          accepted_urls.insert(url);
        }
      }
    }
  }

  for matched in HOT_ACCEPT_EXPORTS_RE.find_iter(&scannable) {
    let offset = first_arg_offset(&scannable, matched.end());
    if let AcceptArgs::Deps(names) = parse_accept_args(&scannable, offset) {
      let exports = accepted_exports.get_or_insert_with(HashSet::new);
      for (_, name) in names {
        exports.insert(name);
      }
      is_self_accepting = true;
    }
  }

  let mut code = apply_edits(input.code, edits);

  if uses_hot {
    let preamble = format!(
      "import {{ createHotContext as __esdev_createHotContext }} from \"{CLIENT_URL}\";\nimport.meta.hot = __esdev_createHotContext({});\n",
      serde_json::to_string(clean_url(input.importer_url))?
    );
    code.insert_str(0, &preamble);
  }

  Ok(AnalyzedModule {
    code,
    deps: analysis.deps,
    accepted_urls,
    accepted_exports,
    is_self_accepting,
    uses_hot,
    missing_bare: analysis.missing_bare,
  })
}

#[cfg(test)]
mod tests {
  use std::fs;
  use std::sync::Arc;

  use pretty_assertions::assert_eq;
  use tempfile::TempDir;

  use super::*;
  use crate::config::ServerConfig;
  use crate::optimizer::EsmLinkBundler;

  struct Fixture {
    _dir: TempDir,
    root: std::path::PathBuf,
    optimizer: DepOptimizer,
  }

  async fn fixture_with_dep(name: &str, code: &str) -> Fixture {
    let dir = TempDir::new().unwrap();
    let pkg = dir.path().join("node_modules").join(name);
    fs::create_dir_all(&pkg).unwrap();
    fs::write(pkg.join("package.json"), r#"{"main": "index.js"}"#).unwrap();
    fs::write(pkg.join("index.js"), code).unwrap();

    let config = ServerConfig::for_root(dir.path()).unwrap();
    let optimizer = DepOptimizer::new(&config, Arc::new(EsmLinkBundler));
    optimizer.init(vec![name.to_string()]).await.unwrap();
    Fixture {
      root: config.root.clone(),
      _dir: dir,
      optimizer,
    }
  }

  fn rewrite(
    fixture: &Fixture,
    importer: &str,
    code: &str,
  ) -> AnalyzedModule {
    let input = ImportRewriteInput {
      code,
      importer_url: importer,
      root: &fixture.root,
      optimizer: &fixture.optimizer,
    };
    analyze_and_rewrite(&input, |_| 0).unwrap()
  }

  #[tokio::test]
  async fn rewrites_relative_imports() {
    let fixture = fixture_with_dep("unused", "export {}").await;
    let result = rewrite(
      &fixture,
      "/src/parent.js",
      "import { child } from './child.js';\n",
    );
    assert_eq!(
      result.code,
      "import { child } from '/src/child.js';\n"
    );
    assert_eq!(result.deps, vec!["/src/child.js".to_string()]);
  }

  #[tokio::test]
  async fn rewrites_bare_import_to_optimized_url() {
    let fixture = fixture_with_dep("react", "export const h = 1;").await;
    let result = rewrite(
      &fixture,
      "/src/app.js",
      "import React from \"react\";\n",
    );
    let hash = fixture.optimizer.browser_hash();
    assert!(result.code.contains("/react.js?v="));
    assert!(result.code.contains(&hash));
    assert_eq!(result.deps.len(), 1);
    assert!(result.deps[0].contains("react.js?v="));
  }

  #[tokio::test]
  async fn relative_import_gets_timestamp_query() {
    let fixture = fixture_with_dep("unused", "export {}").await;
    let input = ImportRewriteInput {
      code: "import './child.js';\n",
      importer_url: "/src/parent.js",
      root: &fixture.root,
      optimizer: &fixture.optimizer,
    };
    let result = analyze_and_rewrite(&input, |url| {
      if url == "/src/child.js" {
        4200
      } else {
        0
      }
    })
    .unwrap();
    assert_eq!(result.code, "import '/src/child.js?t=4200';\n");
  }

  #[tokio::test]
  async fn css_import_gets_import_query() {
    let fixture = fixture_with_dep("unused", "export {}").await;
    let result = rewrite(
      &fixture,
      "/src/main.js",
      "import './style.css';\n",
    );
    assert_eq!(result.code, "import '/src/style.css?import';\n");
  }

  #[tokio::test]
  async fn commonjs_default_import_gets_interop() {
    let fixture =
      fixture_with_dep("legacy", "module.exports = { fn: () => 1 };").await;
    let result = rewrite(
      &fixture,
      "/src/app.js",
      "import legacy from 'legacy';\nlegacy.fn();\n",
    );
    assert!(result.code.contains("import __esdev_cjs_1 from"));
    assert!(result
      .code
      .contains("const legacy = __esdev_cjs_1.default ?? __esdev_cjs_1;"));
  }

  #[tokio::test]
  async fn commonjs_named_imports_destructure() {
    let fixture =
      fixture_with_dep("legacy", "module.exports = { a: 1, b: 2 };").await;
    let result = rewrite(
      &fixture,
      "/src/app.js",
      "import { a, b as c } from 'legacy';\n",
    );
    assert!(result.code.contains("const { a, b: c } = __esdev_cjs_1;"));
  }

  #[tokio::test]
  async fn dynamic_import_rewritten() {
    let fixture = fixture_with_dep("unused", "export {}").await;
    let result = rewrite(
      &fixture,
      "/src/app.js",
      "const mod = await import('./lazy.js');\n",
    );
    assert_eq!(
      result.code,
      "const mod = await import('/src/lazy.js');\n"
    );
  }

  #[tokio::test]
  async fn self_accept_detected_and_preamble_injected() {
    let fixture = fixture_with_dep("unused", "export {}").await;
    let result = rewrite(
      &fixture,
      "/src/a.js",
      "export const x = 1;\nif (import.meta.hot) {\n  import.meta.hot.accept();\n}\n",
    );
    assert!(result.is_self_accepting);
    assert!(result.uses_hot);
    assert!(result.code.starts_with(
      "import { createHotContext as __esdev_createHotContext } from \"/@esdev/client\";"
    ));
    assert!(result.code.contains("__esdev_createHotContext(\"/src/a.js\")"));
  }

  #[tokio::test]
  async fn dep_accept_resolves_and_rewrites_specifiers() {
    let fixture = fixture_with_dep("unused", "export {}").await;
    let result = rewrite(
      &fixture,
      "/src/parent.js",
      "import { child } from './child.js';\nimport.meta.hot.accept('./child.js', () => {});\n",
    );
    assert!(!result.is_self_accepting);
    assert!(result.accepted_urls.contains("/src/child.js"));
    assert!(result
      .code
      .contains("import.meta.hot.accept('/src/child.js', () => {})"));
  }

  #[tokio::test]
  async fn accept_array_form() {
    let fixture = fixture_with_dep("unused", "export {}").await;
    let result = rewrite(
      &fixture,
      "/src/parent.js",
      "import.meta.hot.accept(['./a.js', './b.js'], () => {});\n",
    );
    assert!(result.accepted_urls.contains("/src/a.js"));
    assert!(result.accepted_urls.contains("/src/b.js"));
  }

  #[tokio::test]
  async fn accept_exports_detected() {
    let fixture = fixture_with_dep("unused", "export {}").await;
    let result = rewrite(
      &fixture,
      "/src/a.js",
      "import.meta.hot.acceptExports(['render'], () => {});\n",
    );
    assert!(result.is_self_accepting);
    assert_eq!(
      result.accepted_exports,
      Some(HashSet::from(["render".to_string()]))
    );
  }

  #[tokio::test]
  async fn unknown_bare_import_is_reported_missing() {
    let fixture = fixture_with_dep("present", "export {}").await;
    // lodash resolvable on disk, but not part of the optimization
    let pkg = fixture.root.join("node_modules").join("lodash");
    fs::create_dir_all(&pkg).unwrap();
    fs::write(pkg.join("package.json"), r#"{"main": "index.js"}"#).unwrap();
    fs::write(pkg.join("index.js"), "export default {};").unwrap();

    let result = rewrite(
      &fixture,
      "/src/x.js",
      "import _ from 'lodash';\n",
    );
    assert_eq!(result.missing_bare, vec!["lodash".to_string()]);
  }

  #[tokio::test]
  async fn unresolvable_specifier_errors() {
    let fixture = fixture_with_dep("present", "export {}").await;
    let input = ImportRewriteInput {
      code: "import x from 'not-installed';\n",
      importer_url: "/src/x.js",
      root: &fixture.root,
      optimizer: &fixture.optimizer,
    };
    let err = analyze_and_rewrite(&input, |_| 0).unwrap_err();
    assert!(err.to_string().contains("not-installed"));
  }

  #[tokio::test]
  async fn comments_are_ignored() {
    let fixture = fixture_with_dep("unused", "export {}").await;
    let result = rewrite(
      &fixture,
      "/src/a.js",
      "// import './fake.js';\n/* import './also-fake.js'; */\nimport './real.js';\n",
    );
    assert_eq!(result.deps, vec!["/src/real.js".to_string()]);
    assert!(result.code.contains("// import './fake.js';"));
  }

  #[test]
  fn scan_lists_all_specifier_kinds() {
    let code = r#"
import a from './a.js';
import './side-effect.js';
export { b } from './b.js';
const lazy = import('./lazy.js');
import 'bare-pkg';
"#;
    let specifiers = scan_import_specifiers(code);
    assert_eq!(
      specifiers,
      vec![
        "./a.js",
        "./side-effect.js",
        "./b.js",
        "bare-pkg",
        "./lazy.js",
      ]
    );
  }
}
