// Copyright 2018-2026 the Deno authors. MIT license.

use std::ffi::OsString;

use clap::Arg;
use clap::ArgAction;
use clap::Command;

use crate::errors::AnyError;

/// Parsed command-line flags, before resolution against the project
/// root into a [`crate::config::ServerConfig`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Flags {
  pub root: Option<String>,
  pub host: Option<String>,
  pub port: Option<u16>,
  pub base: Option<String>,
  pub log_level: Option<log::Level>,
  /// Ignore the dependency cache and re-optimize on startup.
  pub force: bool,
  /// Disable the HMR channel entirely.
  pub no_hmr: bool,
  /// Print the local URL prominently once listening.
  pub open: bool,
}

fn clap_root() -> Command {
  Command::new("esdev")
    .version(env!("CARGO_PKG_VERSION"))
    .about("Native ES-module dev server with on-demand transforms and HMR")
    .arg(
      Arg::new("root")
        .help("Project root directory (defaults to the current directory)")
        .num_args(0..=1),
    )
    .arg(
      Arg::new("host")
        .long("host")
        .help("Address to bind to")
        .value_name("HOST"),
    )
    .arg(
      Arg::new("port")
        .long("port")
        .short('p')
        .help("Port to listen on")
        .value_name("PORT")
        .value_parser(clap::value_parser!(u16)),
    )
    .arg(
      Arg::new("base")
        .long("base")
        .help("Public base path the app is served under")
        .value_name("PATH"),
    )
    .arg(
      Arg::new("log-level")
        .long("log-level")
        .short('L')
        .help("Set log level")
        .value_parser(["trace", "debug", "info", "warn", "error"]),
    )
    .arg(
      Arg::new("force")
        .long("force")
        .help("Ignore the dependency cache and re-optimize")
        .action(ArgAction::SetTrue),
    )
    .arg(
      Arg::new("no-hmr")
        .long("no-hmr")
        .help("Disable hot module replacement")
        .action(ArgAction::SetTrue),
    )
    .arg(
      Arg::new("open")
        .long("open")
        .help("Print the server URL once listening")
        .action(ArgAction::SetTrue),
    )
}

/// Parse process arguments. The first element is the executable name.
pub fn flags_from_vec(args: Vec<OsString>) -> Result<Flags, AnyError> {
  let matches = clap_root().try_get_matches_from(args)?;

  let log_level = match matches.get_one::<String>("log-level").map(|s| s.as_str())
  {
    Some("trace") => Some(log::Level::Trace),
    Some("debug") => Some(log::Level::Debug),
    Some("info") => Some(log::Level::Info),
    Some("warn") => Some(log::Level::Warn),
    Some("error") => Some(log::Level::Error),
    _ => None,
  };

  Ok(Flags {
    root: matches.get_one::<String>("root").cloned(),
    host: matches.get_one::<String>("host").cloned(),
    port: matches.get_one::<u16>("port").copied(),
    base: matches.get_one::<String>("base").cloned(),
    log_level,
    force: matches.get_flag("force"),
    no_hmr: matches.get_flag("no-hmr"),
    open: matches.get_flag("open"),
  })
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;

  fn parse(args: &[&str]) -> Flags {
    let mut all = vec![OsString::from("esdev")];
    all.extend(args.iter().map(OsString::from));
    flags_from_vec(all).unwrap()
  }

  #[test]
  fn defaults() {
    let flags = parse(&[]);
    assert_eq!(flags, Flags::default());
  }

  #[test]
  fn full_invocation() {
    let flags =
      parse(&["./app", "--port", "4000", "--base", "/app/", "--force"]);
    assert_eq!(flags.root.as_deref(), Some("./app"));
    assert_eq!(flags.port, Some(4000));
    assert_eq!(flags.base.as_deref(), Some("/app/"));
    assert!(flags.force);
    assert!(!flags.no_hmr);
  }

  #[test]
  fn log_level_parsing() {
    let flags = parse(&["-L", "debug"]);
    assert_eq!(flags.log_level, Some(log::Level::Debug));
  }

  #[test]
  fn rejects_unknown_level() {
    let result = flags_from_vec(vec![
      OsString::from("esdev"),
      OsString::from("--log-level"),
      OsString::from("loud"),
    ]);
    assert!(result.is_err());
  }
}
