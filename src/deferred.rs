// src/deferred.rs
//! Deferred GPU operations.
//!
//! Loader threads never touch the device. Work crosses threads through four
//! mutex-guarded lists, each with a cached non-empty flag so per-frame polls
//! skip the lock:
//! - **async-res-init**: compiled materials waiting for the main thread to
//!   claim their resource references,
//! - **init**: materials waiting for the render thread to create GPU textures,
//! - **free**: GPU objects whose owners dropped; drained FIFO under a budget
//!   so a mass unload cannot stall a frame,
//! - **synchronize**: main-thread file writes and image saves.
//!
//! Enqueues arriving while the free list is being drained (a drop fired from
//! inside a drain) are legal; they are queued for the next drain and logged as
//! a warning since they usually point at an ownership cycle.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use log::{debug, warn};
use parking_lot::Mutex;

use crate::combined::CombinedTexturePool;
use crate::device::RenderDevice;
use crate::material::PendingMaterial;

/// A GPU object queued for deletion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FreeOp {
    Texture(u64),
}

/// A file written on the main thread during synchronization.
pub struct PendingFileWrite {
    pub path: PathBuf,
    pub data: Vec<u8>,
}

/// An RGBA snapshot saved on the main thread during synchronization.
pub struct PendingImageSave {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

#[derive(Default)]
struct SynchronizeOps {
    file_writes: Vec<PendingFileWrite>,
    image_saves: Vec<PendingImageSave>,
}

/// The cross-thread operation hub. One instance per render context.
pub struct DeferredOperations {
    async_res_init: Mutex<Vec<PendingMaterial>>,
    has_async_res_init: AtomicBool,

    init: Mutex<Vec<PendingMaterial>>,
    has_init: AtomicBool,

    free: Mutex<VecDeque<FreeOp>>,
    has_free: AtomicBool,
    draining_free: AtomicBool,

    synchronize: Mutex<SynchronizeOps>,
    has_synchronize: AtomicBool,

    /// Handed to GPU objects created during init so their drops can post
    /// free operations back here.
    weak_self: Weak<DeferredOperations>,
}

impl DeferredOperations {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            async_res_init: Mutex::new(Vec::new()),
            has_async_res_init: AtomicBool::new(false),
            init: Mutex::new(Vec::new()),
            has_init: AtomicBool::new(false),
            free: Mutex::new(VecDeque::new()),
            has_free: AtomicBool::new(false),
            draining_free: AtomicBool::new(false),
            synchronize: Mutex::new(SynchronizeOps::default()),
            has_synchronize: AtomicBool::new(false),
            weak_self: weak.clone(),
        })
    }

    // ── async-res-init ──────────────────────────────────────────────────────

    #[inline]
    pub fn has_async_res_init_operations(&self) -> bool {
        self.has_async_res_init.load(Ordering::Acquire)
    }

    /// Called from loader threads with a freshly compiled material.
    pub fn add_async_res_init(&self, material: PendingMaterial) {
        self.async_res_init.lock().push(material);
        self.has_async_res_init.store(true, Ordering::Release);
    }

    /// Main thread: claim resource references and hand the materials to the
    /// init list for the render thread.
    pub fn process_async_res_init(&self) {
        if !self.has_async_res_init_operations() {
            return;
        }
        let pending = {
            let mut list = self.async_res_init.lock();
            self.has_async_res_init.store(false, Ordering::Release);
            std::mem::take(&mut *list)
        };
        for mut material in pending {
            material.finalize_async_loading();
            self.add_init(material);
        }
    }

    // ── init ────────────────────────────────────────────────────────────────

    #[inline]
    pub fn has_init_operations(&self) -> bool {
        self.has_init.load(Ordering::Acquire)
    }

    pub fn add_init(&self, material: PendingMaterial) {
        self.init.lock().push(material);
        self.has_init.store(true, Ordering::Release);
    }

    /// Render thread: create GPU textures for every pending material.
    ///
    /// A device failure is a hard failure for that material only; it is logged
    /// and dropped, the rest of the list still initializes.
    pub fn process_init(&self, device: &dyn RenderDevice, pool: &CombinedTexturePool) {
        if !self.has_init_operations() {
            return;
        }
        // Always succeeds: callers reach this method through the Arc.
        let Some(ops) = self.weak_self.upgrade() else {
            return;
        };
        let pending = {
            let mut list = self.init.lock();
            self.has_init.store(false, Ordering::Release);
            std::mem::take(&mut *list)
        };
        for material in pending {
            let name = material.name().to_owned();
            if let Err(err) = material.init_gpu(device, pool, &ops) {
                log::error!("material '{name}' failed GPU init: {err}");
            }
        }
    }

    // ── free ────────────────────────────────────────────────────────────────

    #[inline]
    pub fn has_free_operations(&self) -> bool {
        self.has_free.load(Ordering::Acquire)
    }

    /// Queue a GPU object for deletion. Safe to call from drops that fire
    /// while the free list is draining.
    pub fn add_free(&self, op: FreeOp) {
        if self.draining_free.load(Ordering::Acquire) {
            warn!("free operation queued during drain: {op:?}");
        }
        self.free.lock().push_back(op);
        self.has_free.store(true, Ordering::Release);
    }

    /// Render thread: release queued GPU objects, oldest first, up to
    /// `budget` of them. Returns the number released. Operations queued while
    /// draining wait for the next call.
    pub fn process_free(&self, device: &dyn RenderDevice, budget: usize) -> usize {
        if !self.has_free_operations() || budget == 0 {
            return 0;
        }
        self.draining_free.store(true, Ordering::Release);
        let batch: Vec<FreeOp> = {
            let mut list = self.free.lock();
            let take = budget.min(list.len());
            let batch = list.drain(..take).collect();
            if list.is_empty() {
                self.has_free.store(false, Ordering::Release);
            }
            batch
        };
        // Deletes run outside the lock so a re-entrant drop cannot deadlock.
        for op in &batch {
            match op {
                FreeOp::Texture(handle) => device.delete_texture(*handle),
            }
        }
        self.draining_free.store(false, Ordering::Release);
        if !batch.is_empty() {
            debug!("released {} GPU objects", batch.len());
        }
        batch.len()
    }

    /// Drain the free list completely (shutdown path).
    pub fn process_free_all(&self, device: &dyn RenderDevice) -> usize {
        let mut total = 0;
        loop {
            let released = self.process_free(device, usize::MAX);
            if released == 0 {
                return total;
            }
            total += released;
        }
    }

    // ── synchronize ─────────────────────────────────────────────────────────

    #[inline]
    pub fn has_synchronize_operations(&self) -> bool {
        self.has_synchronize.load(Ordering::Acquire)
    }

    pub fn add_file_write(&self, write: PendingFileWrite) {
        self.synchronize.lock().file_writes.push(write);
        self.has_synchronize.store(true, Ordering::Release);
    }

    pub fn add_image_save(&self, save: PendingImageSave) {
        self.synchronize.lock().image_saves.push(save);
        self.has_synchronize.store(true, Ordering::Release);
    }

    /// Main thread: run queued file writes, then image saves. Failures are
    /// logged and skipped; synchronization never aborts the frame.
    pub fn process_synchronize(&self) {
        if !self.has_synchronize_operations() {
            return;
        }
        let ops = {
            let mut list = self.synchronize.lock();
            self.has_synchronize.store(false, Ordering::Release);
            std::mem::take(&mut *list)
        };
        for write in ops.file_writes {
            if let Some(parent) = write.path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            if let Err(err) = std::fs::write(&write.path, &write.data) {
                warn!("deferred file write '{}' failed: {err}", write.path.display());
            }
        }
        for save in ops.image_saves {
            if let Some(parent) = save.path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            match image::RgbaImage::from_raw(save.width, save.height, save.rgba) {
                Some(img) => {
                    if let Err(err) = img.save(&save.path) {
                        warn!("deferred image save '{}' failed: {err}", save.path.display());
                    }
                }
                None => warn!(
                    "deferred image save '{}' has inconsistent dimensions",
                    save.path.display()
                ),
            }
        }
    }
}
