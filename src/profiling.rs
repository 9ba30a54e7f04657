// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # Profiling Guide
//!
//! The manager emits `tracing` events everywhere and, with the `profiling`
//! feature, spans around each frame hook, eviction pass and loader batch.
//!
//! ```toml
//! [dependencies]
//! custom_assets = { version = "0.1", features = ["profiling"] }
//! ```
//!
//! ```ignore
//! let _guard = custom_assets::profiling::init_json_trace("trace.json")?;
//!
//! manager.on_xfb_triggered();   // "custom_assets_xfb" span
//! manager.on_frame_end();       // "custom_assets_frame_end" span
//! ```
//!
//! Keep the returned guard alive until the program exits, dropping it
//! flushes the background writer.
//!
//! ## Performance Tips
//!
//! 1. Profile in release mode for accurate timings
//! 2. `RUST_LOG=custom_assets=debug` shows loads, reloads and evictions

#[cfg(feature = "profiling")]
use crate::error::Result;
#[cfg(feature = "profiling")]
use std::path::Path;

/// Route every event at `TRACE` and above to `path` as JSON lines
#[cfg(feature = "profiling")]
pub fn init_json_trace(path: impl AsRef<Path>) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let file = std::fs::File::create(path)?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file);
    tracing_subscriber::fmt()
        .json()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_max_level(tracing::Level::TRACE)
        .init();
    Ok(guard)
}
