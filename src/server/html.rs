// Copyright 2018-2026 the Deno authors. MIT license.

//! HTML serving support: client injection and stylesheet tracking.

use lazy_regex::lazy_regex;
use lazy_regex::Lazy;
use regex::Regex;

use crate::util::path::CLIENT_URL;

static HEAD_OPEN_RE: Lazy<Regex> = lazy_regex!(r#"(?i)<head[^>]*>"#);

static STYLESHEET_LINK_RE: Lazy<Regex> = lazy_regex!(
  r#"(?i)<link\b[^>]*rel\s*=\s*["']stylesheet["'][^>]*href\s*=\s*["'](?P<href>[^"']+)["']"#
);

static STYLESHEET_LINK_HREF_FIRST_RE: Lazy<Regex> = lazy_regex!(
  r#"(?i)<link\b[^>]*href\s*=\s*["'](?P<href>[^"']+)["'][^>]*rel\s*=\s*["']stylesheet["']"#
);

static MODULE_SCRIPT_RE: Lazy<Regex> = lazy_regex!(
  r#"(?i)<script\b[^>]*type\s*=\s*["']module["'][^>]*src\s*=\s*["'](?P<src>[^"']+)["']"#
);

/// Inject the HMR client into a served document.
pub fn inject_client_script(html: &str) -> String {
  let tag = format!("<script type=\"module\" src=\"{CLIENT_URL}\"></script>");
  match HEAD_OPEN_RE.find(html) {
    Some(head) => {
      let mut out = html.to_string();
      out.insert_str(head.end(), &format!("\n  {tag}"));
      out
    }
    None => format!("{tag}\n{html}"),
  }
}

/// URLs of stylesheets referenced via `<link rel="stylesheet">`.
/// Tracking them lets the HMR engine classify their changes as
/// css-updates instead of walking the JS import graph.
pub fn collect_stylesheet_links(html: &str) -> Vec<String> {
  let mut hrefs = Vec::new();
  for regex in [&*STYLESHEET_LINK_RE, &*STYLESHEET_LINK_HREF_FIRST_RE] {
    for captures in regex.captures_iter(html) {
      let href = captures["href"].to_string();
      if href.starts_with('/') && !hrefs.contains(&href) {
        hrefs.push(href);
      }
    }
  }
  hrefs
}

/// Source URLs of `<script type="module">` tags, the app entry points.
pub fn collect_module_scripts(html: &str) -> Vec<String> {
  MODULE_SCRIPT_RE
    .captures_iter(html)
    .map(|captures| captures["src"].to_string())
    .collect()
}
