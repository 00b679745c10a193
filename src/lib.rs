// src/lib.rs
//! Material texture compilation and caching pipeline.
//!
//! texbake turns author-facing material definitions into GPU-ready texture
//! channels: it resolves per-channel pixel formats from the property sources,
//! bakes pixel data, generates mip chains with content-aware filters,
//! block-compresses where supported, and round-trips baked payloads through a
//! content-addressed on-disk cache. GPU work crosses threads through a
//! deferred operations queue so loader threads never touch the device.
//!
//! Typical flow:
//! 1. build a [`MaterialDef`] and submit it to a [`CompileService`],
//! 2. per frame, the main thread calls
//!    [`DeferredOperations::process_async_res_init`] and
//!    [`DeferredOperations::process_synchronize`],
//! 3. the render thread calls [`DeferredOperations::process_init`] and
//!    [`DeferredOperations::process_free`],
//! 4. the submitter receives [`MaterialTextures`] on its result channel.

pub mod cache;
pub mod channel;
pub mod combined;
pub mod compress;
pub mod config;
pub mod deferred;
pub mod device;
pub mod error;
pub mod format;
pub mod hash;
pub mod material;
pub mod mipmap;
pub mod pixels;
pub mod source;
pub mod worker;

pub use cache::{CacheEntry, TextureCache, CACHE_VERSION};
pub use channel::{Channel, ChannelKind, ChannelStage, CHANNEL_KINDS};
pub use combined::{CombinedTexture, CombinedTexturePool};
pub use config::PipelineConfig;
pub use deferred::{DeferredOperations, FreeOp, PendingFileWrite, PendingImageSave};
pub use device::{GpuTexture, RenderDevice, TextureDesc, WgpuDevice};
pub use error::{Error, Result};
pub use format::{ChannelFormat, TextureKind};
pub use material::{
    CompiledMaterial, MaterialDef, MaterialFlags, MaterialProperty, MaterialTextures,
    PendingMaterial, TextureCompiler,
};
pub use mipmap::{MipChain, MipFilter};
pub use pixels::{Color, PixelBuffer, PixelFormat};
pub use source::{
    ConstructedSource, ImageData, ImageSource, MappedSource, Node, NodeGroup, PropertySource,
    VideoSource,
};
pub use worker::CompileService;
