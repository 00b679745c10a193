// src/material.rs
//! Material texture compilation.
//!
//! [`TextureCompiler`] turns a [`MaterialDef`] into a [`CompiledMaterial`] by
//! running every defined channel through the pipeline passes in order:
//! resolve formats → build cache identities → load cached → bake → mip
//! generation → compression → write cached. The passes run per material on a
//! loader thread; GPU texture creation happens later on the render thread via
//! [`PendingMaterial::init_gpu`].

use std::sync::Arc;

use crossbeam::channel::Sender;
use log::{debug, error, warn};

use crate::cache::TextureCache;
use crate::channel::{Channel, ChannelKind, CHANNEL_KINDS};
use crate::combined::CombinedTexturePool;
use crate::config::PipelineConfig;
use crate::deferred::DeferredOperations;
use crate::device::{GpuTexture, RenderDevice};
use crate::error::{Error, Result};
use crate::source::{ImageSource, PropertySource};

/// Uniform transparency and solidity at or above this value count as fully
/// opaque; at or below [`SOLIDITY_ZERO`] a masked material is invisible.
const OPAQUE_THRESHOLD: f32 = 0.999;
const SOLIDITY_ZERO: f32 = 0.001;

// ────────────────────────────────────────────────────────────────────────────
// Definitions
// ────────────────────────────────────────────────────────────────────────────

/// One property binding of a material definition.
#[derive(Clone)]
pub struct MaterialProperty {
    pub channel: ChannelKind,
    pub source: PropertySource,
}

/// Author-facing description of one material texture.
#[derive(Clone)]
pub struct MaterialDef {
    pub name: String,
    pub properties: Vec<MaterialProperty>,
    /// Solidity is a hard mask (alpha test) instead of blended coverage.
    pub solidity_masked: bool,
    /// Steers the solidity mip filter; 0.5 keeps coverage neutral.
    pub solidity_filter_priority: f32,
}

impl MaterialDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: Vec::new(),
            solidity_masked: false,
            solidity_filter_priority: 0.5,
        }
    }

    pub fn with_property(mut self, channel: ChannelKind, source: PropertySource) -> Self {
        self.properties.push(MaterialProperty { channel, source });
        self
    }

    pub fn with_solidity_masked(mut self, masked: bool) -> Self {
        self.solidity_masked = masked;
        self
    }

    pub fn with_solidity_filter_priority(mut self, priority: f32) -> Self {
        self.solidity_filter_priority = priority;
        self
    }
}

/// Render-relevant facts aggregated over all channels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MaterialFlags {
    /// Renders in the solid pass without blending.
    pub solid: bool,
    /// Solid but with masked-out texels (alpha-tested holes).
    pub has_holes: bool,
    pub has_transparency: bool,
    pub has_emissivity: bool,
    /// Masked solidity that is uniformly zero: the material is invisible.
    pub has_zero_solidity: bool,
    /// Invisible materials cast no shadow.
    pub casts_shadow: bool,
    /// Some channel content changes at render time.
    pub dynamic: bool,
}

// ────────────────────────────────────────────────────────────────────────────
// Compiled output
// ────────────────────────────────────────────────────────────────────────────

/// The CPU-side result of compiling one material.
pub struct CompiledMaterial {
    pub name: String,
    pub flags: MaterialFlags,
    channels: Vec<Option<Channel>>,
    /// Image references claimed on the main thread before GPU init.
    held_images: Vec<Arc<ImageSource>>,
}

impl CompiledMaterial {
    #[inline]
    pub fn channel(&self, kind: ChannelKind) -> Option<&Channel> {
        self.channels[kind.index()].as_ref()
    }

    /// Channels that resolved, in kind order.
    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.iter().flatten()
    }
}

/// GPU-side result handed to the scene once the render thread initialized all
/// textures.
pub struct MaterialTextures {
    pub name: String,
    pub flags: MaterialFlags,
    textures: Vec<Option<Arc<GpuTexture>>>,
    /// Combined-pool handles backing uniform channels; dropping them releases
    /// the pool entries.
    combined: Vec<Arc<crate::combined::CombinedTexture>>,
}

impl MaterialTextures {
    #[inline]
    pub fn texture(&self, kind: ChannelKind) -> Option<&Arc<GpuTexture>> {
        self.textures[kind.index()].as_ref()
    }

    pub fn texture_count(&self) -> usize {
        self.textures.iter().flatten().count()
    }

    /// Number of channels served by the combined-texture pool.
    pub fn combined_count(&self) -> usize {
        self.combined.len()
    }
}

/// A compiled material traveling through the deferred queues towards GPU
/// init, carrying the channel through which the finished textures are
/// delivered.
pub struct PendingMaterial {
    compiled: CompiledMaterial,
    done: Sender<Arc<MaterialTextures>>,
}

impl PendingMaterial {
    pub fn new(compiled: CompiledMaterial, done: Sender<Arc<MaterialTextures>>) -> Self {
        Self { compiled, done }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.compiled.name
    }

    /// Main thread: take over the image references the loader thread used, so
    /// they stay alive until the render thread uploaded them.
    pub fn finalize_async_loading(&mut self) {
        let mut held = Vec::new();
        for channel in self.compiled.channels() {
            if let Some(image) = channel.image() {
                held.push(image.clone());
            }
        }
        self.compiled.held_images = held;
        debug!(
            "material '{}' finalized with {} image references",
            self.compiled.name,
            self.compiled.held_images.len()
        );
    }

    /// Render thread: create every channel texture and deliver the result.
    ///
    /// A device failure aborts this material only; the error is returned for
    /// logging and the receiver sees a disconnected channel.
    pub fn init_gpu(
        self,
        device: &dyn RenderDevice,
        pool: &CombinedTexturePool,
        ops: &Arc<DeferredOperations>,
    ) -> Result<()> {
        let mut compiled = self.compiled;
        let name = compiled.name.clone();
        let mut textures: Vec<Option<Arc<GpuTexture>>> = vec![None; CHANNEL_KINDS.len()];
        let mut combined = Vec::new();

        for slot in compiled.channels.iter_mut() {
            let Some(channel) = slot else { continue };
            channel.init_gpu(device, pool, ops, &name)?;
            textures[channel.kind().index()] = channel.gpu().cloned();
            if let Some(entry) = channel.take_combined() {
                combined.push(entry);
            }
        }

        let result = MaterialTextures {
            name,
            flags: compiled.flags,
            textures,
            combined,
        };
        // A dropped receiver is fine; the textures die through the free queue.
        let _ = self.done.send(Arc::new(result));
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Compiler
// ────────────────────────────────────────────────────────────────────────────

/// Compiles material definitions into baked channel textures.
pub struct TextureCompiler {
    config: PipelineConfig,
    cache: Option<Arc<TextureCache>>,
}

impl TextureCompiler {
    pub fn new(config: PipelineConfig, cache: Option<Arc<TextureCache>>) -> Self {
        Self { config, cache }
    }

    #[inline]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run the full CPU-side pipeline for one material.
    pub fn compile(&self, def: &MaterialDef) -> Result<CompiledMaterial> {
        let mut channels: Vec<Option<Channel>> = Vec::with_capacity(CHANNEL_KINDS.len());
        for kind in CHANNEL_KINDS {
            let sources: Vec<PropertySource> = def
                .properties
                .iter()
                .filter(|p| p.channel == kind)
                .map(|p| p.source.clone())
                .collect();
            channels.push(if sources.is_empty() {
                None
            } else {
                Channel::resolve(kind, sources)
            });
        }

        let flags = aggregate_flags(def, &channels);
        let use_cache = self.config.cache_enabled && self.cache.is_some();
        let priority = def.solidity_filter_priority;

        for channel in channels.iter_mut().flatten() {
            channel.build_cache_identity(&self.config, priority);
            if use_cache {
                channel.try_load_cached(self.cache.as_ref().unwrap(), &self.config);
            } else {
                channel.mark_needs_bake();
            }
        }

        for channel in channels.iter_mut().flatten() {
            channel.bake()?;
        }

        for channel in channels.iter_mut().flatten() {
            channel.generate_mipmaps(&self.config, priority)?;
        }

        for channel in channels.iter_mut().flatten() {
            if let Err(err) = channel.compress_textures(&self.config) {
                match err {
                    // Missing compressor: report per material, ship uncompressed.
                    Error::UnsupportedCompression(_) => error!(
                        "material '{}': channel {}: {err}",
                        def.name,
                        channel.kind().name()
                    ),
                    other => return Err(other),
                }
            }
        }

        if use_cache {
            let cache = self.cache.as_ref().unwrap();
            for channel in channels.iter_mut().flatten() {
                channel.write_cached(cache);
            }
        }

        // The cache passes are over; drop the verify scratch so a large
        // material load does not hold every channel's blobs at once.
        for channel in channels.iter_mut().flatten() {
            channel.clear_cache_scratch();
        }

        debug!(
            "compiled material '{}' with {} channels",
            def.name,
            channels.iter().flatten().count()
        );

        Ok(CompiledMaterial {
            name: def.name.clone(),
            flags,
            channels,
            held_images: Vec::new(),
        })
    }
}

/// Derive the material flags from the definition and the resolved channels.
fn aggregate_flags(def: &MaterialDef, channels: &[Option<Channel>]) -> MaterialFlags {
    let mut has_transparency = false;
    let mut has_solidity = false;
    let mut has_zero_solidity = false;
    let mut has_emissivity = false;

    for property in &def.properties {
        match property.channel {
            ChannelKind::Transparency => match &property.source {
                PropertySource::Value(v) => has_transparency |= *v < OPAQUE_THRESHOLD,
                PropertySource::Color(c) => has_transparency |= c.r < OPAQUE_THRESHOLD,
                _ => has_transparency = true,
            },
            ChannelKind::Solidity => match &property.source {
                PropertySource::Value(v) => {
                    has_solidity |= *v < OPAQUE_THRESHOLD;
                    has_zero_solidity |= *v <= SOLIDITY_ZERO;
                }
                PropertySource::Color(c) => {
                    has_solidity |= c.r < OPAQUE_THRESHOLD;
                    has_zero_solidity |= c.r <= SOLIDITY_ZERO;
                }
                _ => has_solidity = true,
            },
            ChannelKind::Emissivity => match &property.source {
                PropertySource::Value(v) => has_emissivity |= *v > SOLIDITY_ZERO,
                PropertySource::Color(c) => {
                    has_emissivity |= c.r > SOLIDITY_ZERO
                        || c.g > SOLIDITY_ZERO
                        || c.b > SOLIDITY_ZERO
                }
                _ => has_emissivity = true,
            },
            _ => {}
        }
    }
    has_zero_solidity &= def.solidity_masked;

    let dynamic = channels
        .iter()
        .flatten()
        .any(|channel| channel.format().dynamic);

    // Blended transparency always leaves the solid pass. Masked solidity
    // keeps the material solid with holes, unless it is fully invisible or
    // emissive (discarding texels would also discard their emission).
    let (solid, has_holes) = if has_transparency {
        (false, false)
    } else if has_zero_solidity {
        (false, false)
    } else if def.solidity_masked && has_solidity && has_emissivity {
        (false, false)
    } else if def.solidity_masked && has_solidity {
        (true, true)
    } else if has_solidity {
        (false, false)
    } else {
        (true, false)
    };

    if has_zero_solidity {
        warn!("material '{}' has zero solidity and is invisible", def.name);
    }

    MaterialFlags {
        solid,
        has_holes,
        has_transparency,
        has_emissivity,
        has_zero_solidity,
        casts_shadow: !has_zero_solidity,
        dynamic,
    }
}
