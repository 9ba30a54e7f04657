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

//! Background compiler for shader and pipeline work items.
//!
//! Items are compiled on worker threads and handed back to the owning thread
//! through [`retrieve_work_items`](AsyncShaderCompiler::retrieve_work_items),
//! where they publish their result. An item that is not ready yet returns
//! itself from `retrieve` and is queued again for the next pass. With zero
//! worker threads items are compiled inline during retrieval.

use crate::error::{AssetError, Result};
use crate::gpu::GpuBackend;
use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::{Builder, JoinHandle};

pub trait AsyncWorkItem<Ctx>: Send {
    /// Runs on a compiler thread
    fn compile(&mut self, backend: &dyn GpuBackend);

    /// Runs on the owning thread. Returning the item re-queues it.
    fn retrieve(self: Box<Self>, ctx: &mut Ctx) -> Option<Box<dyn AsyncWorkItem<Ctx>>>;
}

type WorkItem<Ctx> = Box<dyn AsyncWorkItem<Ctx>>;

enum CompilerMessage<Ctx> {
    Work(WorkItem<Ctx>),
    Exit,
}

/// Items queued or being compiled
#[derive(Default)]
struct Outstanding {
    count: Mutex<usize>,
    idle: Condvar,
}

impl Outstanding {
    fn add(&self) {
        *self.count.lock() += 1;
    }

    fn finish(&self) {
        let mut count = self.count.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.idle.notify_all();
        }
    }

    fn wait_idle(&self) {
        let mut count = self.count.lock();
        while *count > 0 {
            self.idle.wait(&mut count);
        }
    }

    fn get(&self) -> usize {
        *self.count.lock()
    }
}

pub struct AsyncShaderCompiler<Ctx: 'static> {
    backend: Arc<dyn GpuBackend>,
    pending_sender: Sender<CompilerMessage<Ctx>>,
    pending_receiver: Receiver<CompilerMessage<Ctx>>,
    completed_sender: Sender<WorkItem<Ctx>>,
    completed_receiver: Receiver<WorkItem<Ctx>>,
    outstanding: Arc<Outstanding>,
    workers: Vec<JoinHandle<()>>,
}

impl<Ctx: 'static> AsyncShaderCompiler<Ctx> {
    pub fn new(backend: Arc<dyn GpuBackend>, threads: usize) -> Result<Self> {
        let (pending_sender, pending_receiver) = unbounded();
        let (completed_sender, completed_receiver) = unbounded();
        let mut compiler = Self {
            backend,
            pending_sender,
            pending_receiver,
            completed_sender,
            completed_receiver,
            outstanding: Arc::new(Outstanding::default()),
            workers: Vec::with_capacity(threads),
        };

        for index in 0..threads {
            let receiver = compiler.pending_receiver.clone();
            let completed = compiler.completed_sender.clone();
            let outstanding = compiler.outstanding.clone();
            let backend = compiler.backend.clone();
            let handle = Builder::new()
                .name(format!("shader-compiler-{index}"))
                .spawn(move || {
                    while let Ok(CompilerMessage::Work(mut item)) = receiver.recv() {
                        item.compile(backend.as_ref());
                        let _ = completed.send(item);
                        outstanding.finish();
                    }
                })
                .map_err(|e| AssetError::WorkerSpawnError(e.to_string()))?;
            compiler.workers.push(handle);
        }

        tracing::debug!(threads, backend = compiler.backend.name(), "shader compiler started");
        Ok(compiler)
    }

    pub fn thread_count(&self) -> usize {
        self.workers.len()
    }

    pub fn queue_work_item(&self, item: WorkItem<Ctx>) {
        self.outstanding.add();
        if self.pending_sender.send(CompilerMessage::Work(item)).is_err() {
            self.outstanding.finish();
        }
    }

    /// Items queued, compiling or waiting for retrieval
    pub fn has_pending_work(&self) -> bool {
        self.outstanding.get() > 0 || !self.completed_receiver.is_empty()
    }

    /// Publish compiled items into `ctx`
    pub fn retrieve_work_items(&mut self, ctx: &mut Ctx) {
        let mut requeue = Vec::new();

        if self.workers.is_empty() {
            // Only what is queued now, re-queued items wait for the next pass.
            let queued: Vec<_> = self.pending_receiver.try_iter().collect();
            for message in queued {
                let CompilerMessage::Work(mut item) = message else {
                    continue;
                };
                item.compile(self.backend.as_ref());
                self.outstanding.finish();
                if let Some(item) = item.retrieve(ctx) {
                    requeue.push(item);
                }
            }
        }

        let completed: Vec<_> = self.completed_receiver.try_iter().collect();
        for item in completed {
            if let Some(item) = item.retrieve(ctx) {
                requeue.push(item);
            }
        }

        for item in requeue {
            self.queue_work_item(item);
        }
    }

    /// Drop queued work, wait for items being compiled, then discard their results
    pub fn clear_and_wait(&mut self) {
        for message in self.pending_receiver.try_iter() {
            if matches!(message, CompilerMessage::Work(_)) {
                self.outstanding.finish();
            }
        }
        self.outstanding.wait_idle();
        self.completed_receiver.try_iter().for_each(drop);
    }

    pub fn shutdown(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        self.clear_and_wait();
        for _ in &self.workers {
            let _ = self.pending_sender.send(CompilerMessage::Exit);
        }
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                tracing::error!("shader compiler worker panicked");
            }
        }
    }
}

impl<Ctx: 'static> Drop for AsyncShaderCompiler<Ctx> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::NullBackend;
    use std::time::{Duration, Instant};

    struct CountingItem {
        compiles_needed: usize,
        compiled: usize,
    }

    impl AsyncWorkItem<Vec<usize>> for CountingItem {
        fn compile(&mut self, _backend: &dyn GpuBackend) {
            self.compiled += 1;
        }

        fn retrieve(self: Box<Self>, ctx: &mut Vec<usize>) -> Option<WorkItem<Vec<usize>>> {
            if self.compiled < self.compiles_needed {
                return Some(self);
            }
            ctx.push(self.compiled);
            None
        }
    }

    fn item(compiles_needed: usize) -> WorkItem<Vec<usize>> {
        Box::new(CountingItem {
            compiles_needed,
            compiled: 0,
        })
    }

    #[test]
    fn test_inline_compile_requeues_one_pass_at_a_time() {
        let mut compiler = AsyncShaderCompiler::new(Arc::new(NullBackend::new()), 0).unwrap();
        compiler.queue_work_item(item(1));
        compiler.queue_work_item(item(3));

        let mut done = Vec::new();
        compiler.retrieve_work_items(&mut done);
        assert_eq!(done, vec![1]);
        assert!(compiler.has_pending_work());

        compiler.retrieve_work_items(&mut done);
        compiler.retrieve_work_items(&mut done);
        assert_eq!(done, vec![1, 3]);
        assert!(!compiler.has_pending_work());
    }

    #[test]
    fn test_threaded_compile() {
        let mut compiler = AsyncShaderCompiler::new(Arc::new(NullBackend::new()), 2).unwrap();
        for _ in 0..8 {
            compiler.queue_work_item(item(1));
        }

        let mut done = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(5);
        while done.len() < 8 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
            compiler.retrieve_work_items(&mut done);
        }
        assert_eq!(done.len(), 8);
    }

    #[test]
    fn test_clear_and_wait_discards_work() {
        let mut compiler = AsyncShaderCompiler::new(Arc::new(NullBackend::new()), 0).unwrap();
        compiler.queue_work_item(item(1));
        compiler.clear_and_wait();
        assert!(!compiler.has_pending_work());

        let mut done = Vec::new();
        compiler.retrieve_work_items(&mut done);
        assert!(done.is_empty());
    }
}
