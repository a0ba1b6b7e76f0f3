// Copyright 2018-2026 the Deno authors. MIT license.

//! The dev server: HTTP surface, middleware ordering, and lifecycle.
//!
//! Middleware runs in a fixed order for every request: base-path
//! stripping, the optimized-dependency static handler, public assets,
//! the transform pipeline, the HTML rewriter, and finally the SPA
//! fallback. The WebSocket message channel upgrades on the same
//! origin.
//!
//! All mutable server state hangs off one [`ServerContext`] created
//! before `listen()` and dropped at `close()`.

pub mod client;
pub mod hmr;
pub mod html;
pub mod import_analysis;
pub mod transform;
pub mod ws;

use std::collections::HashSet;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use hyper::service::make_service_fn;
use hyper::service::service_fn;
use hyper::Body;
use notify::RecommendedWatcher;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::config::ServerConfig;
use crate::errors::AnyError;
use crate::errors::ErrorPayload;
use crate::errors::EsdevError;
use crate::graph::ModuleGraph;
use crate::optimizer::scan_bare_imports;
use crate::optimizer::DepOptimizer;
use crate::optimizer::EsmLinkBundler;
use crate::plugins::PluginContainer;
use crate::util::file_watcher::canonicalize_changed_path;
use crate::util::file_watcher::new_watcher;
use crate::util::file_watcher::watch_paths;
use crate::util::file_watcher::DebouncedReceiver;
use crate::util::file_watcher::FileChange;
use crate::util::path::clean_url;
use crate::util::path::fs_url_to_path;
use crate::util::path::has_import_query;
use crate::util::path::is_css_request;
use crate::util::path::is_fs_path_allowed;
use crate::util::path::is_html_request;
use crate::util::path::is_js_request;
use crate::util::path::CLIENT_URL;
use crate::util::path::FS_PREFIX;
use crate::util::path::ID_PREFIX;

use self::hmr::Timestamps;
use self::transform::transform_request;
use self::transform::PendingTransforms;
use self::ws::HmrChannel;
use self::ws::HMR_PATH;

/// Per-server shared state. One exists per running server; nothing in
/// the crate is process-global.
pub struct ServerContext {
  pub config: ServerConfig,
  pub graph: Arc<Mutex<ModuleGraph>>,
  pub container: PluginContainer,
  pub optimizer: DepOptimizer,
  pub channel: Arc<HmrChannel>,
  pub pending: PendingTransforms,
  pub timestamps: Timestamps,
  /// Stylesheets the served HTML references via `<link>` tags.
  pub css_links: Mutex<HashSet<String>>,
}

pub struct DevServer {
  ctx: Arc<ServerContext>,
  local_addr: Option<SocketAddr>,
  shutdown_tx: Option<oneshot::Sender<()>>,
  server_task: Option<JoinHandle<()>>,
  watcher_task: Option<JoinHandle<()>>,
  // kept alive so the notify backend keeps delivering events
  watcher: Option<RecommendedWatcher>,
}

impl DevServer {
  /// Build the server context: resolve plugins, scan the entry graph,
  /// and run the dependency optimizer.
  pub async fn new(config: ServerConfig) -> Result<Self, AnyError> {
    let container = PluginContainer::new(config.plugins.clone());
    container.config_resolved(&config)?;

    let optimizer = DepOptimizer::new(&config, Arc::new(EsmLinkBundler));
    let entries = discover_entries(&config);
    let scanned = scan_bare_imports(&config.root, entries);
    if let Err(err) = optimizer.init(scanned).await {
      // the server stays up; bare-import requests surface the error
      log::error!("dependency optimization failed: {err:#}");
    }

    let channel = Arc::new(HmrChannel::new(config.hmr.enabled));
    for plugin in container.plugins() {
      plugin.configure_server(&channel)?;
    }

    let ctx = Arc::new(ServerContext {
      config,
      graph: Arc::new(Mutex::new(ModuleGraph::new())),
      container,
      optimizer,
      channel,
      pending: PendingTransforms::default(),
      timestamps: Timestamps::new(),
      css_links: Mutex::new(HashSet::new()),
    });

    Ok(Self {
      ctx,
      local_addr: None,
      shutdown_tx: None,
      server_task: None,
      watcher_task: None,
      watcher: None,
    })
  }

  pub fn context(&self) -> Arc<ServerContext> {
    self.ctx.clone()
  }

  /// Start the watcher and bind the HTTP listener. Returns the bound
  /// address (useful when the configured port is 0).
  pub async fn bind(&mut self) -> Result<SocketAddr, AnyError> {
    let ctx = self.ctx.clone();

    // file watcher -> debounced batches -> hmr engine
    let (sender, mut debounced) = DebouncedReceiver::new_with_sender();
    let mut watcher =
      new_watcher(sender, ctx.config.watch_ignore.clone())?;
    watch_paths(&mut watcher, &[ctx.config.root.clone()]);
    self.watcher = Some(watcher);

    let watch_ctx = ctx.clone();
    self.watcher_task = Some(tokio::spawn(async move {
      while let Some(batch) = debounced.recv().await {
        let changes: Vec<FileChange> = batch
          .into_iter()
          .map(|change| FileChange {
            path: canonicalize_changed_path(&change.path),
            kind: change.kind,
          })
          .collect();
        hmr::on_file_changes(&watch_ctx, changes).await;
      }
    }));

    let addr: SocketAddr =
      format!("{}:{}", ctx.config.host, ctx.config.port)
        .parse()
        .map_err(|err| {
          EsdevError::Config(format!(
            "invalid listen address {}:{}: {err}",
            ctx.config.host, ctx.config.port
          ))
        })?;

    let service_ctx = ctx.clone();
    let make_svc = make_service_fn(move |_| {
      let ctx = service_ctx.clone();
      async move {
        Ok::<_, Infallible>(service_fn(move |req| {
          let ctx = ctx.clone();
          async move { handle_request(ctx, req).await }
        }))
      }
    });

    let server = hyper::Server::try_bind(&addr)
      .map_err(|err| {
        AnyError::from(EsdevError::Config(format!(
          "cannot bind {addr}: {err}"
        )))
      })?
      .serve(make_svc);
    let local_addr = server.local_addr();

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    self.shutdown_tx = Some(shutdown_tx);
    self.server_task = Some(tokio::spawn(async move {
      let graceful = server.with_graceful_shutdown(async {
        shutdown_rx.await.ok();
      });
      if let Err(err) = graceful.await {
        log::error!("server error: {err}");
      }
    }));

    self.local_addr = Some(local_addr);
    Ok(local_addr)
  }

  pub fn local_addr(&self) -> Option<SocketAddr> {
    self.local_addr
  }

  /// Bind and run until ctrl-c.
  pub async fn listen(mut self) -> Result<(), AnyError> {
    let addr = self.bind().await?;
    log::info!(
      "dev server running at http://{}:{}{}",
      self.ctx.config.host,
      addr.port(),
      self.ctx.config.base
    );
    tokio::signal::ctrl_c().await?;
    self.close().await;
    Ok(())
  }

  /// Graceful shutdown: stop accepting, drop the watcher, discard the
  /// module graph with the context.
  pub async fn close(mut self) {
    if let Some(shutdown_tx) = self.shutdown_tx.take() {
      let _ = shutdown_tx.send(());
    }
    if let Some(task) = self.server_task.take() {
      let _ = task.await;
    }
    if let Some(task) = self.watcher_task.take() {
      task.abort();
    }
    self.watcher.take();
  }
}

/// Entry points for the optimizer's startup scan: module scripts of
/// the root HTML document, with common source entries as fallback.
fn discover_entries(config: &ServerConfig) -> Vec<PathBuf> {
  let index = config.root.join("index.html");
  if let Ok(text) = std::fs::read_to_string(&index) {
    let scripts = html::collect_module_scripts(&text);
    if !scripts.is_empty() {
      return scripts
        .iter()
        .map(|src| config.root.join(src.trim_start_matches('/')))
        .collect();
    }
  }
  ["src/main.js", "src/main.ts", "main.js"]
    .iter()
    .map(|candidate| config.root.join(candidate))
    .filter(|path| path.is_file())
    .collect()
}

type HttpResponse = http::Response<Body>;

fn text_response(
  status: http::StatusCode,
  body: impl Into<Body>,
) -> http::Result<HttpResponse> {
  http::Response::builder().status(status).body(body.into())
}

fn error_response(err: &AnyError) -> http::Result<HttpResponse> {
  let status = match err.downcast_ref::<EsdevError>() {
    Some(EsdevError::Resolve { .. }) | Some(EsdevError::Optimize(_)) => {
      http::StatusCode::BAD_GATEWAY
    }
    _ => http::StatusCode::INTERNAL_SERVER_ERROR,
  };
  let payload = ErrorPayload::from_any(err);
  http::Response::builder()
    .status(status)
    .header(http::header::CONTENT_TYPE, "application/json")
    .body(serde_json::to_string(&payload).unwrap_or_default().into())
}

fn guess_content_type(path: &str) -> &'static str {
  match path.rsplit('.').next() {
    Some("html") | Some("htm") => "text/html; charset=utf-8",
    Some("js") | Some("mjs") => "application/javascript",
    Some("css") => "text/css",
    Some("json") => "application/json",
    Some("svg") => "image/svg+xml",
    Some("png") => "image/png",
    Some("jpg") | Some("jpeg") => "image/jpeg",
    Some("ico") => "image/x-icon",
    Some("wasm") => "application/wasm",
    _ => "application/octet-stream",
  }
}

async fn handle_request(
  ctx: Arc<ServerContext>,
  req: http::Request<Body>,
) -> Result<HttpResponse, Infallible> {
  let response = route(ctx, req).await.unwrap_or_else(|err| {
    log::error!("failed building response: {err}");
    http::Response::new("internal error".into())
  });
  Ok(response)
}

async fn route(
  ctx: Arc<ServerContext>,
  req: http::Request<Body>,
) -> http::Result<HttpResponse> {
  let raw_url = req
    .uri()
    .path_and_query()
    .map(|pq| pq.as_str().to_string())
    .unwrap_or_else(|| "/".to_string());

  // 1. base-path stripping
  let Some(url) = ctx.config.strip_base(&raw_url) else {
    let location = format!(
      "{}{}",
      &ctx.config.base[..ctx.config.base.len() - 1],
      raw_url
    );
    return http::Response::builder()
      .status(http::StatusCode::TEMPORARY_REDIRECT)
      .header(http::header::LOCATION, location)
      .body(Body::empty());
  };
  let url = url.to_string();
  let path = clean_url(&url).to_string();

  // message channel + embedded client
  if path == HMR_PATH {
    if req.headers().contains_key(http::header::UPGRADE) {
      return ctx.channel.handle_upgrade(req);
    }
    // the client's reconnect loop polls this path over plain HTTP
    return text_response(http::StatusCode::OK, "esdev hmr endpoint");
  }
  if path == CLIENT_URL {
    return http::Response::builder()
      .status(http::StatusCode::OK)
      .header(http::header::CONTENT_TYPE, "application/javascript")
      .header(http::header::CACHE_CONTROL, "no-cache")
      .body(client::client_module(&ctx.config).into());
  }

  // 2. optimized-dependency static handler
  if path.starts_with(FS_PREFIX) {
    let Some(file) = fs_url_to_path(&url) else {
      return text_response(http::StatusCode::BAD_REQUEST, "malformed path");
    };
    if !is_fs_path_allowed(&file, &ctx.config.fs_allow) {
      return text_response(
        http::StatusCode::FORBIDDEN,
        "path is outside the allowed workspace roots",
      );
    }
    if file.starts_with(&ctx.config.cache_dir) && file.is_file() {
      match tokio::fs::read(&file).await {
        Ok(bytes) => {
          // content-hashed URLs never change meaning; cache hard
          return http::Response::builder()
            .status(http::StatusCode::OK)
            .header(http::header::CONTENT_TYPE, "application/javascript")
            .header(
              http::header::CACHE_CONTROL,
              "max-age=31536000, immutable",
            )
            .body(bytes.into());
        }
        Err(err) => {
          log::warn!("failed reading {}: {err}", file.display());
          return text_response(http::StatusCode::NOT_FOUND, "not found");
        }
      }
    }
    // other /@fs/ requests go through the transform pipeline
  }

  // 3. public assets
  if let Some(public_dir) = &ctx.config.public_dir {
    let candidate = public_dir.join(path.trim_start_matches('/'));
    if candidate.is_file() {
      if let Ok(bytes) = tokio::fs::read(&candidate).await {
        return http::Response::builder()
          .status(http::StatusCode::OK)
          .header(http::header::CONTENT_TYPE, guess_content_type(&path))
          .header(http::header::CACHE_CONTROL, "no-cache")
          .body(bytes.into());
      }
    }
  }

  // 4. transform pipeline
  let wants_transform = !is_html_request(&path)
    && (is_js_request(&url) && path.contains('.')
      || is_css_request(&url)
      || has_import_query(&url)
      || path.starts_with(ID_PREFIX)
      || path.starts_with(FS_PREFIX));
  if wants_transform {
    match transform_request(&ctx, &url).await {
      Ok(Some(result)) => {
        let if_none_match = req
          .headers()
          .get(http::header::IF_NONE_MATCH)
          .and_then(|value| value.to_str().ok());
        if if_none_match == Some(result.etag.as_str()) {
          return http::Response::builder()
            .status(http::StatusCode::NOT_MODIFIED)
            .body(Body::empty());
        }
        let content_type =
          if is_css_request(&url) && !has_import_query(&url) {
            "text/css"
          } else {
            "application/javascript"
          };
        return http::Response::builder()
          .status(http::StatusCode::OK)
          .header(http::header::CONTENT_TYPE, content_type)
          .header(http::header::CACHE_CONTROL, "no-cache")
          .header(http::header::ETAG, result.etag.clone())
          .body(result.code.clone().into());
      }
      Ok(None) => {}
      Err(err) => {
        log::error!("transform of {url} failed: {err:#}");
        return error_response(&err);
      }
    }
  }

  // 5. HTML rewriter
  if is_html_request(&path) || path.ends_with('/') {
    if let Some(response) = serve_html(&ctx, &path).await? {
      return Ok(response);
    }
  }

  // 6. SPA fallback: directory-style URLs resolve to index.html
  if !path.contains('.') {
    if let Some(response) = serve_html(&ctx, "/").await? {
      return Ok(response);
    }
  }

  text_response(http::StatusCode::NOT_FOUND, "not found")
}

/// Serve an HTML document: record its stylesheet links for css-update
/// classification and inject the HMR client.
async fn serve_html(
  ctx: &Arc<ServerContext>,
  path: &str,
) -> http::Result<Option<HttpResponse>> {
  let relative = path.trim_start_matches('/');
  let file = if path.ends_with('/') || relative.is_empty() {
    ctx.config.root.join(relative).join("index.html")
  } else {
    ctx.config.root.join(relative)
  };

  let Ok(text) = tokio::fs::read_to_string(&file).await else {
    return Ok(None);
  };

  {
    let mut css_links = ctx.css_links.lock();
    for href in html::collect_stylesheet_links(&text) {
      css_links.insert(href);
    }
  }

  let rewritten = if ctx.channel.is_enabled() {
    html::inject_client_script(&text)
  } else {
    text
  };

  Ok(Some(
    http::Response::builder()
      .status(http::StatusCode::OK)
      .header(http::header::CONTENT_TYPE, "text/html; charset=utf-8")
      .header(http::header::CACHE_CONTROL, "no-cache")
      .body(rewritten.into())?,
  ))
}
