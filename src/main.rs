// Copyright 2018-2026 the Deno authors. MIT license.

use std::env;

use esdev::config::ServerConfig;
use esdev::errors::AnyError;
use esdev::flags::flags_from_vec;
use esdev::server::DevServer;
use esdev::util::logger;

async fn run() -> Result<(), AnyError> {
  let flags = flags_from_vec(env::args_os().collect())?;
  logger::init(flags.log_level);

  let config = ServerConfig::from_flags(&flags)?;
  if flags.open {
    log::info!(
      "open http://{}:{}{} in your browser",
      config.host,
      config.port,
      config.base
    );
  }

  let server = DevServer::new(config).await?;
  server.listen().await
}

#[tokio::main]
async fn main() {
  if let Err(err) = run().await {
    eprintln!("error: {err:#}");
    std::process::exit(1);
  }
}
