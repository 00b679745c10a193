// src/worker.rs
//! Background compile service.
//!
//! Loader threads pull material definitions from a shared channel, run the
//! CPU-side pipeline and post the result to the deferred async-res-init list.
//! From there the main thread claims resources and the render thread creates
//! the GPU textures; the caller receives the finished [`MaterialTextures`]
//! through the receiver returned by [`CompileService::submit`].
//!
//! Shutdown is cooperative: dropping the service closes the job channel and
//! joins every worker.

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::channel::{unbounded, Receiver, Sender};
use log::{debug, error};

use crate::deferred::DeferredOperations;
use crate::material::{MaterialDef, MaterialTextures, PendingMaterial, TextureCompiler};

struct CompileJob {
    def: MaterialDef,
    done: Sender<Arc<MaterialTextures>>,
}

/// A pool of loader threads feeding the deferred queues.
pub struct CompileService {
    jobs: Option<Sender<CompileJob>>,
    workers: Vec<JoinHandle<()>>,
}

impl CompileService {
    /// Spawn `threads` loader threads (at least one).
    pub fn new(
        compiler: Arc<TextureCompiler>,
        ops: Arc<DeferredOperations>,
        threads: usize,
    ) -> Self {
        let (jobs, queue) = unbounded::<CompileJob>();
        let workers = (0..threads.max(1))
            .map(|index| {
                let queue: Receiver<CompileJob> = queue.clone();
                let compiler = compiler.clone();
                let ops = ops.clone();
                std::thread::Builder::new()
                    .name(format!("texbake-loader-{index}"))
                    .spawn(move || worker_loop(queue, compiler, ops))
                    .unwrap_or_else(|err| panic!("failed to spawn loader thread: {err}"))
            })
            .collect();
        Self {
            jobs: Some(jobs),
            workers,
        }
    }

    /// Queue a material for compilation. The receiver yields the finished
    /// textures after the main and render threads processed their queues; it
    /// disconnects without a value when the compile or GPU init failed.
    pub fn submit(&self, def: MaterialDef) -> Receiver<Arc<MaterialTextures>> {
        let (done, result) = unbounded();
        if let Some(jobs) = &self.jobs {
            let _ = jobs.send(CompileJob { def, done });
        }
        result
    }

    /// Number of loader threads.
    #[inline]
    pub fn thread_count(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for CompileService {
    fn drop(&mut self) {
        // Closing the sender ends every worker loop.
        self.jobs.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn worker_loop(
    queue: Receiver<CompileJob>,
    compiler: Arc<TextureCompiler>,
    ops: Arc<DeferredOperations>,
) {
    while let Ok(job) = queue.recv() {
        let name = job.def.name.clone();
        match compiler.compile(&job.def) {
            Ok(compiled) => {
                debug!("loader compiled material '{name}'");
                ops.add_async_res_init(PendingMaterial::new(compiled, job.done));
            }
            Err(err) => {
                // Dropping `done` signals the failure to the submitter.
                error!("material '{name}' failed to compile: {err}");
            }
        }
    }
}
