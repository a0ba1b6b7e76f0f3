// Copyright 2018-2026 the Deno authors. MIT license.

use std::io::Write;

/// Initialize the `log` facade for the binary.
///
/// `ESDEV_LOG` and `ESDEV_LOG_STYLE` override the level and color
/// choice; `maybe_level` is the fallback from the CLI flag.
pub fn init(maybe_level: Option<log::Level>) {
  let log_level = maybe_level.unwrap_or(log::Level::Info);
  env_logger::Builder::from_env(
    env_logger::Env::new()
      .filter_or("ESDEV_LOG", log_level.to_level_filter().to_string())
      .write_style("ESDEV_LOG_STYLE"),
  )
  // the watcher backend logs every raw event at debug
  .filter_module("notify", log::LevelFilter::Warn)
  .filter_module("hyper", log::LevelFilter::Warn)
  .format(|buf, record| {
    let mut target = record.target().to_string();
    if let Some(line_no) = record.line() {
      target.push(':');
      target.push_str(&line_no.to_string());
    }
    if record.level() <= log::Level::Info {
      // e.g. "hmr update /src/app.js"
      writeln!(buf, "{}", record.args())
    } else {
      writeln!(buf, "{} RS - {} - {}", record.level(), target, record.args())
    }
  })
  .init();
}
