// Copyright 2018-2026 the Deno authors. MIT license.

//! URL and path normalization for the dev server.
//!
//! Request URLs carry meaning in their query string (`?import`, `?t=`,
//! `?v=`), so most helpers here operate on the path/query split rather
//! than on parsed `Url` values.

use std::path::Path;
use std::path::PathBuf;

/// Marker for module ids that do not correspond to a file on disk.
/// Plugins return ids prefixed with this byte from `resolve_id`.
pub const NULL_BYTE_PREFIX: char = '\0';

/// Wire-safe replacement for the null byte in virtual module ids.
pub const VIRTUAL_ID_WIRE_PREFIX: &str = "__x00__";

/// URL prefix that encodes an absolute file-system path.
pub const FS_PREFIX: &str = "/@fs/";

/// URL prefix that encodes a resolved id that is not a normal file path.
pub const ID_PREFIX: &str = "/@id/";

/// URL of the embedded HMR client runtime.
pub const CLIENT_URL: &str = "/@esdev/client";

/// Convert a host-OS path to forward-slash form.
pub fn normalize_path(path: &Path) -> String {
  let text = path.to_string_lossy();
  if cfg!(windows) {
    text.replace('\\', "/")
  } else {
    text.into_owned()
  }
}

/// Strip the query string and hash from a URL, returning the bare path.
pub fn clean_url(url: &str) -> &str {
  let end = url
    .find(|c| c == '?' || c == '#')
    .unwrap_or(url.len());
  &url[..end]
}

/// Split a URL into `(path, query-with-?, hash-with-#)` parts.
fn split_url(url: &str) -> (&str, &str, &str) {
  let (without_hash, hash) = match url.find('#') {
    Some(idx) => url.split_at(idx),
    None => (url, ""),
  };
  let (path, query) = match without_hash.find('?') {
    Some(idx) => without_hash.split_at(idx),
    None => (without_hash, ""),
  };
  (path, query, hash)
}

/// Insert `query` (a `key=value` pair or bare flag) into `url` before
/// any existing search string, preserving the hash.
pub fn inject_query(url: &str, query: &str) -> String {
  let (path, existing, hash) = split_url(url);
  if existing.is_empty() {
    format!("{path}?{query}{hash}")
  } else {
    format!("{path}?{query}&{}{hash}", &existing[1..])
  }
}

/// Remove a `t=<timestamp>` cache-busting parameter from the URL.
pub fn remove_timestamp_query(url: &str) -> String {
  let (path, query, hash) = split_url(url);
  if query.is_empty() {
    return url.to_string();
  }
  let kept: Vec<&str> = query[1..]
    .split('&')
    .filter(|pair| !pair.starts_with("t=") && !pair.is_empty())
    .collect();
  if kept.is_empty() {
    format!("{path}{hash}")
  } else {
    format!("{path}?{}{hash}", kept.join("&"))
  }
}

/// Extract a named query parameter's value, if present.
pub fn get_query_param<'a>(url: &'a str, name: &str) -> Option<&'a str> {
  let (_, query, _) = split_url(url);
  if query.is_empty() {
    return None;
  }
  query[1..].split('&').find_map(|pair| {
    let mut kv = pair.splitn(2, '=');
    match (kv.next(), kv.next()) {
      (Some(k), Some(v)) if k == name => Some(v),
      (Some(k), None) if k == name => Some(""),
      _ => None,
    }
  })
}

/// Check whether a URL has a bare `?import` flag (set by the import
/// rewriter on asset-ish imports so the transform handler picks them up).
pub fn has_import_query(url: &str) -> bool {
  get_query_param(url, "import").is_some()
}

fn extension_of(url: &str) -> Option<&str> {
  let path = clean_url(url);
  let file = path.rsplit('/').next()?;
  let (_, ext) = file.rsplit_once('.')?;
  Some(ext)
}

/// Checks if the URL names a module the transform pipeline should serve.
pub fn is_js_request(url: &str) -> bool {
  match extension_of(url) {
    Some(ext) => matches!(
      ext,
      "js" | "jsx" | "ts" | "tsx" | "mjs" | "mts" | "cjs" | "cts" | "json"
    ),
    // extension-less paths are often directory imports resolved later
    None => !clean_url(url).ends_with('/'),
  }
}

/// Checks if the URL names a stylesheet.
pub fn is_css_request(url: &str) -> bool {
  matches!(extension_of(url), Some("css"))
}

/// Checks if the URL names an HTML document.
pub fn is_html_request(url: &str) -> bool {
  matches!(extension_of(url), Some("html" | "htm"))
}

/// Encode an absolute file-system path as a `/@fs/` URL.
pub fn path_to_fs_url(path: &Path) -> String {
  let normalized = normalize_path(path);
  let trimmed = normalized.trim_start_matches('/');
  format!("{FS_PREFIX}{trimmed}")
}

/// Decode a `/@fs/` URL back to an absolute path, without checking the
/// allow-list (the middleware does that).
pub fn fs_url_to_path(url: &str) -> Option<PathBuf> {
  let rest = clean_url(url).strip_prefix(FS_PREFIX)?;
  if cfg!(windows) {
    // windows paths keep their drive letter after the prefix
    Some(PathBuf::from(rest))
  } else {
    Some(PathBuf::from(format!("/{rest}")))
  }
}

/// Check that `path` is inside one of the allow-listed roots.
pub fn is_fs_path_allowed(path: &Path, allow: &[PathBuf]) -> bool {
  allow.iter().any(|root| path.starts_with(root))
}

/// Replace the id's leading null byte with the wire-safe sentinel.
pub fn wrap_virtual_id(id: &str) -> String {
  match id.strip_prefix(NULL_BYTE_PREFIX) {
    Some(rest) => format!("{VIRTUAL_ID_WIRE_PREFIX}{rest}"),
    None => id.to_string(),
  }
}

/// Restore a wire-encoded virtual id to its server-side form.
pub fn unwrap_virtual_id(id: &str) -> String {
  match id.strip_prefix(VIRTUAL_ID_WIRE_PREFIX) {
    Some(rest) => format!("{NULL_BYTE_PREFIX}{rest}"),
    None => id.to_string(),
  }
}

/// Checks if an id names a virtual module.
pub fn is_virtual_id(id: &str) -> bool {
  id.starts_with(NULL_BYTE_PREFIX)
}

/// Join a relative specifier onto the directory of an importer URL.
///
/// `resolve_relative_url("/src/parent.js", "./child.js")` yields
/// `"/src/child.js"`. Returns `None` when the traversal escapes the
/// URL root.
pub fn resolve_relative_url(importer: &str, specifier: &str) -> Option<String> {
  let importer_path = clean_url(importer);
  let base_dir = match importer_path.rfind('/') {
    Some(idx) => &importer_path[..idx],
    None => "",
  };

  let mut segments: Vec<&str> =
    base_dir.split('/').filter(|s| !s.is_empty()).collect();
  for part in clean_url(specifier).split('/') {
    match part {
      "" | "." => {}
      ".." => {
        segments.pop()?;
      }
      other => segments.push(other),
    }
  }

  let (_, query, hash) = split_url(specifier);
  Some(format!("/{}{}{}", segments.join("/"), query, hash))
}
