// Copyright 2018-2026 the Deno authors. MIT license.

//! End-to-end tests driving a bound dev server over real HTTP.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use esdev::config::ServerConfig;
use esdev::server::hmr::on_file_changes;
use esdev::server::hmr::HmrPayload;
use esdev::server::hmr::UpdateType;
use esdev::server::transform::transform_request;
use esdev::server::DevServer;
use esdev::server::ServerContext;
use esdev::util::file_watcher::ChangeKind;
use esdev::util::file_watcher::FileChange;
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
  <link rel="stylesheet" href="/src/styles.css">
</head>
<body>
  <script type="module" src="/src/main.js"></script>
</body>
</html>"#;

struct TestProject {
  dir: TempDir,
}

impl TestProject {
  fn new(files: &[(&str, &str)]) -> Self {
    let dir = TempDir::new().unwrap();
    for (name, content) in files {
      let path = dir.path().join(name);
      fs::create_dir_all(path.parent().unwrap()).unwrap();
      fs::write(path, content).unwrap();
    }
    Self { dir }
  }

  fn with_package(self, name: &str, code: &str) -> Self {
    let pkg = self.dir.path().join("node_modules").join(name);
    fs::create_dir_all(&pkg).unwrap();
    fs::write(pkg.join("package.json"), r#"{"main": "index.js"}"#).unwrap();
    fs::write(pkg.join("index.js"), code).unwrap();
    self
  }

  fn config(&self) -> ServerConfig {
    ServerConfig::for_root(self.dir.path()).unwrap()
  }
}

struct TestServer {
  ctx: Arc<ServerContext>,
  addr: std::net::SocketAddr,
  server: Option<DevServer>,
}

impl TestServer {
  async fn start(mut config: ServerConfig) -> Self {
    config.port = 0;
    let mut server = DevServer::new(config).await.unwrap();
    let addr = server.bind().await.unwrap();
    Self {
      ctx: server.context(),
      addr,
      server: Some(server),
    }
  }

  fn root(&self) -> PathBuf {
    self.ctx.config.root.clone()
  }

  async fn get(&self, path: &str) -> (http::StatusCode, String, Option<String>) {
    self.get_with_etag(path, None).await
  }

  async fn get_with_etag(
    &self,
    path: &str,
    if_none_match: Option<&str>,
  ) -> (http::StatusCode, String, Option<String>) {
    let client = hyper::Client::new();
    let uri: hyper::Uri =
      format!("http://{}{}", self.addr, path).parse().unwrap();
    let mut builder = hyper::Request::get(uri);
    if let Some(etag) = if_none_match {
      builder = builder.header(http::header::IF_NONE_MATCH, etag);
    }
    let request = builder.body(hyper::Body::empty()).unwrap();
    let response = client.request(request).await.unwrap();
    let status = response.status();
    let etag = response
      .headers()
      .get(http::header::ETAG)
      .and_then(|value| value.to_str().ok())
      .map(|value| value.to_string());
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    (status, String::from_utf8_lossy(&bytes).into_owned(), etag)
  }

  /// Overwrite a file and push the change through the HMR engine the
  /// way the debounced watcher would.
  async fn edit(&self, relative: &str, content: &str) {
    let path = self.root().join(relative);
    fs::write(&path, content).unwrap();
    on_file_changes(
      &self.ctx,
      vec![FileChange {
        path,
        kind: ChangeKind::Modify,
      }],
    )
    .await;
  }

  async fn close(mut self) {
    if let Some(server) = self.server.take() {
      server.close().await;
    }
  }
}

async fn recv(
  receiver: &mut UnboundedReceiver<HmrPayload>,
) -> HmrPayload {
  tokio::time::timeout(Duration::from_secs(5), receiver.recv())
    .await
    .expect("timed out waiting for hmr payload")
    .expect("channel closed")
}

async fn connect(server: &TestServer) -> UnboundedReceiver<HmrPayload> {
  let mut receiver = server.ctx.channel.subscribe();
  assert_eq!(recv(&mut receiver).await, HmrPayload::Connected);
  receiver
}

// ---------------------------------------------------------------------------

#[tokio::test]
async fn serves_html_with_injected_client() {
  let project = TestProject::new(&[
    ("index.html", INDEX_HTML),
    ("src/main.js", "export const ok = true;\n"),
    ("src/styles.css", "body { margin: 0 }\n"),
  ]);
  let server = TestServer::start(project.config()).await;

  let (status, body, _) = server.get("/").await;
  assert_eq!(status, http::StatusCode::OK);
  assert!(body.contains("/@esdev/client"));

  let (status, client_js, _) = server.get("/@esdev/client").await;
  assert_eq!(status, http::StatusCode::OK);
  assert!(client_js.contains("createHotContext"));

  server.close().await;
}

#[tokio::test]
async fn transform_is_idempotent_and_etag_revalidates() {
  let project = TestProject::new(&[
    ("index.html", INDEX_HTML),
    ("src/main.js", "import './util.js';\nexport const ok = 1;\n"),
    ("src/util.js", "export const u = 1;\n"),
    ("src/styles.css", ""),
  ]);
  let server = TestServer::start(project.config()).await;

  let (status, first, etag) = server.get("/src/main.js").await;
  assert_eq!(status, http::StatusCode::OK);
  assert!(first.contains("import '/src/util.js';"));
  let etag = etag.expect("transform responses carry an etag");

  let (status, second, _) = server.get("/src/main.js").await;
  assert_eq!(status, http::StatusCode::OK);
  assert_eq!(first, second);

  let (status, _, _) =
    server.get_with_etag("/src/main.js", Some(&etag)).await;
  assert_eq!(status, http::StatusCode::NOT_MODIFIED);

  server.close().await;
}

#[tokio::test]
async fn self_accept_round_trip() {
  let project = TestProject::new(&[
    ("index.html", INDEX_HTML),
    (
      "src/main.js",
      "import './a.js';\n",
    ),
    (
      "src/a.js",
      "export let n = 1;\nif (import.meta.hot) {\n  import.meta.hot.accept(() => {});\n}\n",
    ),
    ("src/styles.css", ""),
  ]);
  let server = TestServer::start(project.config()).await;
  let mut channel = connect(&server).await;

  let (status, code, _) = server.get("/src/a.js").await;
  assert_eq!(status, http::StatusCode::OK);
  assert!(code.contains("createHotContext"));

  server
    .edit(
      "src/a.js",
      "export let n = 2;\nif (import.meta.hot) {\n  import.meta.hot.accept(() => {});\n}\n",
    )
    .await;

  let timestamp = match recv(&mut channel).await {
    HmrPayload::Update { updates } => {
      assert_eq!(updates.len(), 1);
      assert_eq!(updates[0].update_type, UpdateType::JsUpdate);
      assert_eq!(updates[0].path, "/src/a.js");
      assert_eq!(updates[0].accepted_path, "/src/a.js");
      assert!(updates[0].timestamp > 0);
      updates[0].timestamp
    }
    other => panic!("expected update, got {other:?}"),
  };

  // the timestamped re-fetch misses every cache and sees fresh code
  let (status, fresh, _) = server
    .get(&format!("/src/a.js?t={timestamp}"))
    .await;
  assert_eq!(status, http::StatusCode::OK);
  assert!(fresh.contains("export let n = 2;"));

  // a second edit carries a strictly larger timestamp
  server
    .edit(
      "src/a.js",
      "export let n = 3;\nif (import.meta.hot) {\n  import.meta.hot.accept(() => {});\n}\n",
    )
    .await;
  match recv(&mut channel).await {
    HmrPayload::Update { updates } => {
      assert!(updates[0].timestamp > timestamp);
    }
    other => panic!("expected update, got {other:?}"),
  }

  server.close().await;
}

#[tokio::test]
async fn dependency_accept() {
  let project = TestProject::new(&[
    ("index.html", INDEX_HTML),
    (
      "src/main.js",
      "import './parent.js';\n",
    ),
    (
      "src/parent.js",
      "import { c } from './child.js';\nimport.meta.hot.accept('./child.js', () => {});\nexport const p = c;\n",
    ),
    ("src/child.js", "export const c = 1;\n"),
    ("src/styles.css", ""),
  ]);
  let server = TestServer::start(project.config()).await;

  // execute the parent so its accept registration reaches the graph
  let (status, _, _) = server.get("/src/parent.js").await;
  assert_eq!(status, http::StatusCode::OK);

  let mut channel = connect(&server).await;

  server.edit("src/child.js", "export const c = 2;\n").await;
  match recv(&mut channel).await {
    HmrPayload::Update { updates } => {
      assert_eq!(updates.len(), 1);
      assert_eq!(updates[0].path, "/src/parent.js");
      assert_eq!(updates[0].accepted_path, "/src/child.js");
    }
    other => panic!("expected update, got {other:?}"),
  }

  server
    .edit(
      "src/parent.js",
      "import { c } from './child.js';\nimport.meta.hot.accept('./child.js', () => {});\nexport const p = c + 1;\n",
    )
    .await;
  match recv(&mut channel).await {
    HmrPayload::Update { updates } => {
      assert_eq!(updates.len(), 1);
      assert_eq!(updates[0].path, "/src/parent.js");
      assert_eq!(updates[0].accepted_path, "/src/parent.js");
    }
    other => panic!("expected update, got {other:?}"),
  }

  server.close().await;
}

#[tokio::test]
async fn full_reload_without_boundary() {
  let project = TestProject::new(&[
    ("index.html", INDEX_HTML),
    ("src/main.js", "import './leaf.js';\n"),
    ("src/leaf.js", "export const leaf = 1;\n"),
    ("src/styles.css", ""),
  ]);
  let server = TestServer::start(project.config()).await;

  let (status, _, _) = server.get("/src/main.js").await;
  assert_eq!(status, http::StatusCode::OK);

  let mut channel = connect(&server).await;
  server.edit("src/leaf.js", "export const leaf = 2;\n").await;

  match recv(&mut channel).await {
    HmrPayload::FullReload { .. } => {}
    other => panic!("expected full-reload, got {other:?}"),
  }
  // exactly one message for the change
  assert!(channel.try_recv().is_err());

  server.close().await;
}

#[tokio::test]
async fn css_link_update() {
  let project = TestProject::new(&[
    ("index.html", INDEX_HTML),
    ("src/main.js", "export {};\n"),
    ("src/styles.css", "body { color: black }\n"),
  ]);
  let server = TestServer::start(project.config()).await;

  // the browser loads the page, then the stylesheet from the link tag
  let (status, _, _) = server.get("/").await;
  assert_eq!(status, http::StatusCode::OK);
  let (status, css, _) = server.get("/src/styles.css").await;
  assert_eq!(status, http::StatusCode::OK);
  assert!(css.contains("color: black"));

  let mut channel = connect(&server).await;
  server
    .edit("src/styles.css", "body { color: red }\n")
    .await;

  match recv(&mut channel).await {
    HmrPayload::Update { updates } => {
      assert_eq!(updates.len(), 1);
      assert_eq!(updates[0].update_type, UpdateType::CssUpdate);
      assert_eq!(updates[0].path, "/src/styles.css");
    }
    other => panic!("expected css update, got {other:?}"),
  }

  server.close().await;
}

#[tokio::test]
async fn bare_import_rewrite() {
  let project = TestProject::new(&[
    ("index.html", INDEX_HTML),
    (
      "src/main.js",
      "import React from 'react';\nexport default React;\n",
    ),
    ("src/styles.css", ""),
  ])
  .with_package("react", "export default { createElement() {} };\n");
  let server = TestServer::start(project.config()).await;

  let hash = server.ctx.optimizer.browser_hash();
  assert!(!hash.is_empty());

  let (status, code, _) = server.get("/src/main.js").await;
  assert_eq!(status, http::StatusCode::OK);
  assert!(code.contains("/@fs/"));
  assert!(code.contains(&format!("react.js?v={hash}")));

  // the rewritten URL is recorded as a dependency and serves the
  // pre-bundled file
  let result = transform_request(&server.ctx, "/src/main.js")
    .await
    .unwrap()
    .unwrap();
  let dep = result
    .deps
    .iter()
    .find(|dep| dep.contains("react.js"))
    .expect("optimized dep recorded");
  let (status, bundled, _) = server.get(dep).await;
  assert_eq!(status, http::StatusCode::OK);
  assert!(bundled.contains("createElement"));

  server.close().await;
}

#[tokio::test]
async fn reoptimization_on_discovered_import() {
  let project = TestProject::new(&[
    ("index.html", INDEX_HTML),
    (
      "src/main.js",
      "import React from 'react';\nexport default React;\n",
    ),
    ("src/styles.css", ""),
  ])
  .with_package("react", "export default {};\n")
  .with_package("lodash", "export default { chunk() {} };\n");
  let server = TestServer::start(project.config()).await;

  let hash_before = server.ctx.optimizer.browser_hash();
  let mut channel = connect(&server).await;

  // the editor adds a file importing a dependency the startup scan
  // never saw
  fs::write(
    server.root().join("src/x.js"),
    "import _ from 'lodash';\nexport default _;\n",
  )
  .unwrap();

  let (status, code, _) = server.get("/src/x.js").await;
  assert_eq!(status, http::StatusCode::OK);

  let hash_after = server.ctx.optimizer.browser_hash();
  assert_ne!(hash_before, hash_after);
  assert!(code.contains(&format!("lodash.js?v={hash_after}")));

  match recv(&mut channel).await {
    HmrPayload::FullReload { .. } => {}
    other => panic!("expected full-reload after re-optimization, got {other:?}"),
  }

  server.close().await;
}

#[tokio::test]
async fn resolve_failure_yields_structured_error() {
  let project = TestProject::new(&[
    ("index.html", INDEX_HTML),
    ("src/main.js", "export {};\n"),
    ("src/styles.css", ""),
  ]);
  let server = TestServer::start(project.config()).await;
  let mut channel = connect(&server).await;

  let (status, body, _) = server.get("/src/missing.js").await;
  assert_eq!(status, http::StatusCode::BAD_GATEWAY);
  assert!(body.contains("message"));

  match recv(&mut channel).await {
    HmrPayload::Error { err } => {
      assert!(err.message.contains("/src/missing.js"));
    }
    other => panic!("expected error payload, got {other:?}"),
  }

  server.close().await;
}

#[tokio::test]
async fn transform_error_is_cached_until_file_change() {
  let project = TestProject::new(&[
    ("index.html", INDEX_HTML),
    ("src/main.js", "export {};\n"),
    (
      "src/broken.js",
      "import ghost from 'ghost-pkg';\nexport default ghost;\n",
    ),
    ("src/styles.css", ""),
  ]);
  let server = TestServer::start(project.config()).await;

  let (status, _, _) = server.get("/src/broken.js").await;
  assert_eq!(status, http::StatusCode::BAD_GATEWAY);

  // the cached failure re-throws without re-running the pipeline
  let (status, _, _) = server.get("/src/broken.js").await;
  assert!(status.is_server_error());

  // a file change clears the error state
  server
    .edit("src/broken.js", "export default 1;\n")
    .await;
  let (status, code, _) = server.get("/src/broken.js").await;
  assert_eq!(status, http::StatusCode::OK);
  assert!(code.contains("export default 1;"));

  server.close().await;
}

#[tokio::test]
async fn base_path_redirect_and_strip() {
  let project = TestProject::new(&[
    ("index.html", INDEX_HTML),
    ("src/main.js", "export const ok = 1;\n"),
    ("src/styles.css", ""),
  ]);
  let config = project.config().with_base("/app/");
  let server = TestServer::start(config).await;

  let (status, code, _) = server.get("/app/src/main.js").await;
  assert_eq!(status, http::StatusCode::OK);
  assert!(code.contains("export const ok = 1;"));

  let client = hyper::Client::new();
  let uri: hyper::Uri = format!("http://{}/src/main.js", server.addr)
    .parse()
    .unwrap();
  let response = client.get(uri).await.unwrap();
  assert_eq!(response.status(), http::StatusCode::TEMPORARY_REDIRECT);
  assert_eq!(
    response.headers()[http::header::LOCATION],
    "/app/src/main.js"
  );

  server.close().await;
}

#[tokio::test]
async fn spa_fallback_serves_index_for_directory_urls() {
  let project = TestProject::new(&[
    ("index.html", INDEX_HTML),
    ("sub/index.html", "<html><head></head><body>sub</body></html>"),
    ("src/main.js", "export {};\n"),
    ("src/styles.css", ""),
  ]);
  let server = TestServer::start(project.config()).await;

  let (status, body, _) = server.get("/sub/").await;
  assert_eq!(status, http::StatusCode::OK);
  assert!(body.contains("sub"));

  // history-API routes fall back to the root document
  let (status, body, _) = server.get("/some/client/route").await;
  assert_eq!(status, http::StatusCode::OK);
  assert!(body.contains("/src/main.js"));

  server.close().await;
}

#[tokio::test]
async fn watcher_picks_up_real_file_writes() {
  let project = TestProject::new(&[
    ("index.html", INDEX_HTML),
    (
      "src/a.js",
      "export let n = 1;\nimport.meta.hot.accept();\n",
    ),
    ("src/main.js", "import './a.js';\n"),
    ("src/styles.css", ""),
  ]);
  let server = TestServer::start(project.config()).await;

  let (status, _, _) = server.get("/src/a.js").await;
  assert_eq!(status, http::StatusCode::OK);

  let mut channel = connect(&server).await;

  // give the recursive watch a moment to become effective
  tokio::time::sleep(Duration::from_millis(200)).await;
  fs::write(
    server.root().join("src/a.js"),
    "export let n = 2;\nimport.meta.hot.accept();\n",
  )
  .unwrap();

  let payload = tokio::time::timeout(Duration::from_secs(10), channel.recv())
    .await
    .expect("no hmr payload within 10s")
    .expect("channel closed");
  match payload {
    HmrPayload::Update { updates } => {
      assert_eq!(updates[0].path, "/src/a.js");
    }
    HmrPayload::FullReload { .. } => {
      panic!("self-accepting module should hot update, not reload")
    }
    other => panic!("unexpected payload {other:?}"),
  }

  server.close().await;
}

struct VirtualAnswerPlugin;

#[async_trait::async_trait]
impl esdev::plugins::Plugin for VirtualAnswerPlugin {
  fn name(&self) -> &str {
    "virtual-answer"
  }

  async fn resolve_id(
    &self,
    specifier: &str,
    _importer: Option<&str>,
    _ctx: &esdev::plugins::PluginContext,
  ) -> Result<esdev::plugins::ResolveIdResult, esdev::AnyError> {
    if specifier == "virtual:answer" {
      Ok(esdev::plugins::ResolveIdResult::Resolved(
        esdev::plugins::ResolvedId::new("\0virtual:answer"),
      ))
    } else {
      Ok(esdev::plugins::ResolveIdResult::NotResolved)
    }
  }

  async fn load(
    &self,
    id: &str,
    _ctx: &esdev::plugins::PluginContext,
  ) -> Result<Option<esdev::plugins::LoadResult>, esdev::AnyError> {
    if id == "\0virtual:answer" {
      Ok(Some(esdev::plugins::LoadResult {
        code: "export const answer = 42;\n".to_string(),
        map: None,
      }))
    } else {
      Ok(None)
    }
  }
}

#[tokio::test]
async fn virtual_modules_resolve_through_plugins() {
  let project = TestProject::new(&[
    ("index.html", INDEX_HTML),
    (
      "src/main.js",
      "import { answer } from 'virtual:answer';\nexport default answer;\n",
    ),
    ("src/styles.css", ""),
  ]);
  let config = project
    .config()
    .with_plugin(Arc::new(VirtualAnswerPlugin));
  let server = TestServer::start(config).await;

  let (status, code, _) = server.get("/src/main.js").await;
  assert_eq!(status, http::StatusCode::OK);
  assert!(code.contains("from '/@id/virtual:answer'"));

  let (status, virtual_code, _) = server.get("/@id/virtual:answer").await;
  assert_eq!(status, http::StatusCode::OK);
  assert!(virtual_code.contains("export const answer = 42;"));

  server.close().await;
}

#[tokio::test]
async fn prune_fires_once_for_dropped_imports() {
  let project = TestProject::new(&[
    ("index.html", INDEX_HTML),
    ("src/main.js", "import './kept.js';\nimport './dropped.js';\n"),
    ("src/kept.js", "export const k = 1;\n"),
    ("src/dropped.js", "export const d = 1;\n"),
    ("src/styles.css", ""),
  ]);
  let server = TestServer::start(project.config()).await;

  let (status, _, _) = server.get("/src/main.js").await;
  assert_eq!(status, http::StatusCode::OK);

  let mut channel = connect(&server).await;

  // the edit drops one import; re-transforming emits a prune for it
  server
    .edit("src/main.js", "import './kept.js';\n")
    .await;
  // the edit has no boundary, so a full reload is broadcast first
  match recv(&mut channel).await {
    HmrPayload::FullReload { .. } => {}
    other => panic!("expected full-reload, got {other:?}"),
  }

  let (status, _, _) = server.get("/src/main.js").await;
  assert_eq!(status, http::StatusCode::OK);
  match recv(&mut channel).await {
    HmrPayload::Prune { paths } => {
      assert_eq!(paths, vec!["/src/dropped.js".to_string()]);
    }
    other => panic!("expected prune, got {other:?}"),
  }

  // re-requesting does not re-dispatch the prune
  let (status, _, _) = server.get("/src/main.js").await;
  assert_eq!(status, http::StatusCode::OK);
  assert!(channel.try_recv().is_err());

  server.close().await;
}
