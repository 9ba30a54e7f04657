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

//! Worker pool performing blocking asset loads under a memory budget.
//!
//! The owning thread publishes a [`WorkBatch`] to every worker over its own
//! channel and drains finished loads from a shared completion channel. The two
//! directions never share a lock, so publishing new work never waits on a
//! worker that is mid-load and vice versa.

use super::{CustomAsset, SessionId};
use crate::error::{AssetError, Result};
use ahash::AHashSet;
use crossbeam::channel::{unbounded, Receiver, Sender, TryRecvError};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{Builder, JoinHandle};

#[cfg(feature = "profiling")]
use tracing::info_span;

/// Worker count used when none is configured
pub const DEFAULT_LOADER_THREADS: usize = 2;

/// Pending assets handed to the workers in one publish
struct WorkBatch {
    queue: Mutex<VecDeque<Arc<dyn CustomAsset>>>,
    /// Loaded memory at publish time plus everything this batch loaded since
    memory_used: AtomicU64,
    max_memory: u64,
}

impl WorkBatch {
    fn within_budget(&self) -> bool {
        self.memory_used.load(Ordering::Acquire) <= self.max_memory
    }
}

enum LoaderMessage {
    Work(Arc<WorkBatch>),
    Exit,
}

struct CompletedLoad {
    session_id: SessionId,
    bytes: u64,
}

struct Worker {
    sender: Sender<LoaderMessage>,
    handle: JoinHandle<()>,
}

pub struct AssetLoader {
    workers: Vec<Worker>,
    thread_count: usize,
    completed_sender: Sender<CompletedLoad>,
    completed_receiver: Receiver<CompletedLoad>,
    /// Sessions currently inside a blocking load
    in_flight: Arc<Mutex<AHashSet<SessionId>>>,
    current_batch: Option<Arc<WorkBatch>>,
}

impl Default for AssetLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl AssetLoader {
    /// Loader with no running workers, see [`initialize`](Self::initialize)
    pub fn new() -> Self {
        let (completed_sender, completed_receiver) = unbounded();
        Self {
            workers: Vec::new(),
            thread_count: 0,
            completed_sender,
            completed_receiver,
            in_flight: Arc::new(Mutex::new(AHashSet::new())),
            current_batch: None,
        }
    }

    /// Start `threads` workers
    pub fn initialize(&mut self, threads: usize) -> Result<()> {
        self.shutdown();
        self.thread_count = threads;

        for index in 0..threads {
            let (sender, receiver) = unbounded();
            let completed = self.completed_sender.clone();
            let in_flight = self.in_flight.clone();
            let handle = Builder::new()
                .name(format!("asset-loader-{index}"))
                .spawn(move || worker_loop(receiver, completed, in_flight))
                .map_err(|e| AssetError::WorkerSpawnError(e.to_string()))?;
            self.workers.push(Worker { sender, handle });
        }

        tracing::debug!(threads, "asset loader started");
        Ok(())
    }

    pub fn thread_count(&self) -> usize {
        self.thread_count
    }

    pub fn is_running(&self) -> bool {
        !self.workers.is_empty()
    }

    /// Hand the workers a new pending set and collect finished loads.
    ///
    /// Returns every session completed since the previous call. When there is
    /// nothing pending, or the loaded memory plus what just completed already
    /// reaches `max_memory_allowed`, the current pending set is left untouched
    /// and no worker is woken.
    pub fn load_assets<'a>(
        &mut self,
        pending: impl IntoIterator<Item = &'a Arc<dyn CustomAsset>>,
        current_loaded_memory: u64,
        max_memory_allowed: u64,
    ) -> Vec<SessionId> {
        #[cfg(feature = "profiling")]
        let _span = info_span!("load_assets").entered();

        let mut completed = Vec::new();
        let mut completed_memory = 0u64;
        for load in self.completed_receiver.try_iter() {
            completed_memory += load.bytes;
            completed.push(load.session_id);
        }

        let total = current_loaded_memory.saturating_add(completed_memory);
        let mut pending = pending.into_iter().peekable();
        if pending.peek().is_none() || total >= max_memory_allowed {
            return completed;
        }

        let just_completed: AHashSet<SessionId> = completed.iter().copied().collect();
        let queue: VecDeque<Arc<dyn CustomAsset>> = pending
            .filter(|asset| !just_completed.contains(&asset.session_id()))
            .cloned()
            .collect();

        let batch = Arc::new(WorkBatch {
            queue: Mutex::new(queue),
            memory_used: AtomicU64::new(total),
            max_memory: max_memory_allowed,
        });
        for worker in &self.workers {
            // A worker only disconnects while shutting down.
            let _ = worker.sender.send(LoaderMessage::Work(batch.clone()));
        }
        self.current_batch = Some(batch);

        completed
    }

    /// Sessions still queued in the published batch, front first
    pub fn pending_snapshot(&self) -> Vec<SessionId> {
        self.current_batch
            .as_ref()
            .map(|batch| batch.queue.lock().iter().map(|a| a.session_id()).collect())
            .unwrap_or_default()
    }

    /// Sessions currently being loaded by a worker
    pub fn in_flight(&self) -> Vec<SessionId> {
        self.in_flight.lock().iter().copied().collect()
    }

    /// Signal every worker to exit and wait for them
    pub fn shutdown(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        for worker in &self.workers {
            let _ = worker.sender.send(LoaderMessage::Exit);
        }
        for worker in self.workers.drain(..) {
            if worker.handle.join().is_err() {
                tracing::error!("asset loader worker panicked");
            }
        }
        tracing::debug!("asset loader stopped");
    }

    /// Stop the workers, forget all queued and completed work, then optionally
    /// restart with the same number of threads
    pub fn reset(&mut self, restart: bool) -> Result<()> {
        let threads = self.thread_count;
        self.shutdown();

        self.current_batch = None;
        self.in_flight.lock().clear();
        let (completed_sender, completed_receiver) = unbounded();
        self.completed_sender = completed_sender;
        self.completed_receiver = completed_receiver;

        if restart {
            self.initialize(threads)?;
        }
        Ok(())
    }
}

impl Drop for AssetLoader {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Newest batch waiting on the channel, `Err` on exit
fn latest_batch(
    receiver: &Receiver<LoaderMessage>,
    mut batch: Option<Arc<WorkBatch>>,
) -> std::result::Result<Option<Arc<WorkBatch>>, ()> {
    loop {
        match receiver.try_recv() {
            Ok(LoaderMessage::Work(newer)) => batch = Some(newer),
            Ok(LoaderMessage::Exit) | Err(TryRecvError::Disconnected) => return Err(()),
            Err(TryRecvError::Empty) => return Ok(batch),
        }
    }
}

fn worker_loop(
    receiver: Receiver<LoaderMessage>,
    completed: Sender<CompletedLoad>,
    in_flight: Arc<Mutex<AHashSet<SessionId>>>,
) {
    let mut batch = match receiver.recv() {
        Ok(LoaderMessage::Work(batch)) => batch,
        _ => return,
    };

    loop {
        // A newer publish replaces whatever is left of the old batch.
        batch = match latest_batch(&receiver, Some(batch)) {
            Ok(Some(latest)) => latest,
            _ => return,
        };

        let next = if batch.within_budget() {
            let mut queue = batch.queue.lock();
            let mut in_flight = in_flight.lock();
            let position = queue
                .iter()
                .position(|asset| !in_flight.contains(&asset.session_id()) && !asset.has_data());
            position.and_then(|index| queue.remove(index)).inspect(|asset| {
                in_flight.insert(asset.session_id());
            })
        } else {
            None
        };

        let Some(asset) = next else {
            // Batch drained or over budget, sleep until the next publish.
            batch = match receiver.recv() {
                Ok(LoaderMessage::Work(newer)) => newer,
                _ => return,
            };
            continue;
        };

        let session_id = asset.session_id();
        if asset.load() {
            let bytes = asset.byte_size_in_memory();
            batch.memory_used.fetch_add(bytes, Ordering::AcqRel);
            tracing::trace!(asset = %asset.asset_id(), session = %session_id, bytes, "asset loaded");
            let _ = completed.send(CompletedLoad { session_id, bytes });
        }
        in_flight.lock().remove(&session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::{InMemoryAssetLibrary, LoadableAsset, TextureData};
    use std::time::{Duration, Instant};

    fn texture_asset(
        library: &Arc<InMemoryAssetLibrary>,
        id: &str,
        session: u64,
        bytes: usize,
    ) -> Arc<dyn CustomAsset> {
        library.insert(id, TextureData::single_level(bytes as u32 / 4, 1, vec![0; bytes]));
        Arc::new(LoadableAsset::<TextureData>::new(
            library.clone(),
            id.into(),
            SessionId::new(session),
        ))
    }

    #[test]
    fn test_over_budget_leaves_pending_untouched() {
        let library = Arc::new(InMemoryAssetLibrary::new());
        let a = texture_asset(&library, "a", 0, 16);
        let b = texture_asset(&library, "b", 1, 16);
        let c = texture_asset(&library, "c", 2, 16);

        // No workers, so the published batch stays as it was handed over.
        let mut loader = AssetLoader::new();
        let completed = loader.load_assets([&a, &b], 0, 100);
        assert!(completed.is_empty());
        let snapshot = loader.pending_snapshot();
        assert_eq!(snapshot, vec![SessionId::new(0), SessionId::new(1)]);

        loader.load_assets([&c], 100, 100);
        assert_eq!(loader.pending_snapshot(), snapshot);

        loader.load_assets([&c], 250, 100);
        assert_eq!(loader.pending_snapshot(), snapshot);

        // Empty pending keeps the old batch too.
        loader.load_assets(std::iter::empty(), 0, 100);
        assert_eq!(loader.pending_snapshot(), snapshot);
    }

    #[test]
    fn test_workers_complete_pending_assets() {
        let library = Arc::new(InMemoryAssetLibrary::new());
        let assets: Vec<_> = (0..4)
            .map(|i| texture_asset(&library, &format!("tex{i}"), i, 32))
            .collect();

        let mut loader = AssetLoader::new();
        loader.initialize(2).unwrap();
        let mut completed = loader.load_assets(&assets, 0, 1 << 20);

        let deadline = Instant::now() + Duration::from_secs(5);
        while completed.len() < assets.len() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
            completed.extend(loader.load_assets(std::iter::empty(), 0, 1 << 20));
        }

        completed.sort();
        completed.dedup();
        assert_eq!(completed.len(), assets.len());
        assert!(assets.iter().all(|a| a.has_data()));
        loader.shutdown();
    }

    #[test]
    fn test_failed_load_is_not_published() {
        let library = Arc::new(InMemoryAssetLibrary::new());
        let asset = texture_asset(&library, "broken", 0, 16);
        library.set_failing("broken", true);

        let mut loader = AssetLoader::new();
        loader.initialize(1).unwrap();
        loader.load_assets([&asset], 0, 1024);

        let deadline = Instant::now() + Duration::from_secs(5);
        while library.load_count(&"broken".into()) == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        // let the worker finish its bookkeeping
        loader.shutdown();

        assert!(loader.load_assets(std::iter::empty(), 0, 1024).is_empty());
        assert!(!asset.has_data());
    }

    #[test]
    fn test_reset_restarts_with_same_thread_count() {
        let mut loader = AssetLoader::new();
        loader.initialize(3).unwrap();
        loader.reset(true).unwrap();
        assert_eq!(loader.thread_count(), 3);
        assert!(loader.is_running());
        loader.reset(false).unwrap();
        assert!(!loader.is_running());
        assert!(loader.pending_snapshot().is_empty());
    }
}
