// Copyright 2018-2026 the Deno authors. MIT license.

pub mod checksum;
pub mod file_watcher;
pub mod logger;
pub mod path;
