// Copyright 2018-2026 the Deno authors. MIT license.

//! Serves the embedded browser runtime.

use crate::config::ServerConfig;

use super::ws::HMR_PATH;

const CLIENT_JS: &str = include_str!("client.js");

/// The client source with connection constants substituted.
pub fn client_module(config: &ServerConfig) -> String {
  let direct_host = config.hmr.host.clone().unwrap_or_default();
  let direct_port = config
    .hmr
    .port
    .map(|port| port.to_string())
    .unwrap_or_default();
  CLIENT_JS
    .replace("__HMR_PATH__", HMR_PATH)
    .replace("__HMR_HOST__", &direct_host)
    .replace("__HMR_PORT__", &direct_port)
}

#[cfg(test)]
mod tests {
  use tempfile::tempdir;

  use super::*;

  #[test]
  fn substitutes_connection_constants() {
    let dir = tempdir().unwrap();
    let mut config = ServerConfig::for_root(dir.path()).unwrap();
    config.hmr.host = Some("10.0.0.5".to_string());
    config.hmr.port = Some(24700);

    let code = client_module(&config);
    assert!(code.contains(HMR_PATH));
    assert!(code.contains("10.0.0.5"));
    assert!(code.contains("24700"));
    assert!(!code.contains("__HMR_PATH__"));
  }

  #[test]
  fn exports_hot_context_factory() {
    let dir = tempdir().unwrap();
    let config = ServerConfig::for_root(dir.path()).unwrap();
    let code = client_module(&config);
    assert!(code.contains("export function createHotContext"));
    assert!(code.contains("export function updateStyle"));
  }
}
