// Copyright 2018-2026 the Deno authors. MIT license.

//! Error types for the dev server.
//!
//! Most plumbing uses [`AnyError`]; the typed [`EsdevError`] taxonomy
//! exists where the class of failure decides behavior: resolve and
//! transform failures surface to the user, optimize and I/O failures
//! are locally recoverable, and only startup configuration failures
//! are fatal.

use serde::Deserialize;
use serde::Serialize;

/// A generic wrapper that can encapsulate any concrete error type.
pub type AnyError = anyhow::Error;

#[derive(Debug, thiserror::Error)]
pub enum EsdevError {
  /// No plugin (and no default strategy) resolved a specifier.
  #[error("Failed to resolve import \"{specifier}\"{}", import_source_suffix(importer))]
  Resolve {
    specifier: String,
    importer: Option<String>,
  },

  /// A plugin's load or transform hook threw.
  #[error("Transform failed for {url}: {message}")]
  Transform {
    url: String,
    message: String,
    plugin: Option<String>,
  },

  /// The dependency bundler failed; the server keeps running.
  #[error("Dependency optimization failed: {0}")]
  Optimize(String),

  /// Startup configuration problems. The only fatal class.
  #[error("Invalid configuration: {0}")]
  Config(String),
}

fn import_source_suffix(importer: &Option<String>) -> String {
  match importer {
    Some(importer) => format!(" from \"{importer}\""),
    None => String::new(),
  }
}

/// Error location within a file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorLocation {
  /// Line number (1-indexed).
  pub line: u32,
  /// Column number (0-indexed).
  pub column: u32,
}

/// Structured error body sent over HTTP and the message channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ErrorPayload {
  pub message: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub stack: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub file: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub loc: Option<ErrorLocation>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub plugin: Option<String>,
}

impl ErrorPayload {
  pub fn from_any(err: &AnyError) -> Self {
    match err.downcast_ref::<EsdevError>() {
      Some(EsdevError::Transform {
        url,
        message,
        plugin,
      }) => Self {
        message: message.clone(),
        file: Some(url.clone()),
        plugin: plugin.clone(),
        ..Default::default()
      },
      Some(typed) => Self {
        message: typed.to_string(),
        ..Default::default()
      },
      None => Self {
        message: err.to_string(),
        ..Default::default()
      },
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn resolve_error_names_importer() {
    let err = EsdevError::Resolve {
      specifier: "missing-pkg".to_string(),
      importer: Some("/src/app.js".to_string()),
    };
    assert_eq!(
      err.to_string(),
      "Failed to resolve import \"missing-pkg\" from \"/src/app.js\""
    );
  }

  #[test]
  fn payload_from_transform_error() {
    let err: AnyError = EsdevError::Transform {
      url: "/src/app.js".to_string(),
      message: "unexpected token".to_string(),
      plugin: Some("css".to_string()),
    }
    .into();
    let payload = ErrorPayload::from_any(&err);
    assert_eq!(payload.file.as_deref(), Some("/src/app.js"));
    assert_eq!(payload.plugin.as_deref(), Some("css"));
    assert_eq!(payload.message, "unexpected token");
  }

  #[test]
  fn payload_serializes_without_empty_fields() {
    let payload = ErrorPayload {
      message: "boom".to_string(),
      ..Default::default()
    };
    let json = serde_json::to_string(&payload).unwrap();
    assert_eq!(json, r#"{"message":"boom"}"#);
  }
}
