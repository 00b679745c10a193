// src/mipmap.rs
//! CPU mip chain generation.
//!
//! Channels pick a downsample filter by content kind:
//! - `Box` for plain color data,
//! - `Min` / `Max` for coverage-style data (solidity, ambient occlusion),
//! - `Normal` for normal maps: renormalizes the averaged vector and stores the
//!   maximum deviation angle of the source normals in the 4th component, which
//!   shading uses to widen the specular lobe at a distance.
//!
//! Depth layers downsample independently, so cube faces and array layers never
//! bleed into each other.

use crate::error::Result;
use crate::pixels::PixelBuffer;

/// Downsample filter used between mip levels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MipFilter {
    Box,
    Min,
    Max,
    Normal,
}

impl MipFilter {
    /// Single character used in cache identity strings.
    #[inline]
    pub fn cache_char(&self) -> char {
        match self {
            MipFilter::Box => 'b',
            MipFilter::Min => 'M',
            MipFilter::Max => 'm',
            MipFilter::Normal => 'n',
        }
    }
}

/// A full mip chain; level 0 is the base image.
#[derive(Clone, Debug)]
pub struct MipChain {
    levels: Vec<PixelBuffer>,
}

impl MipChain {
    /// A chain holding only the base level.
    pub fn base_only(base: PixelBuffer) -> Self {
        Self { levels: vec![base] }
    }

    /// Wrap pre-built levels (cache loads). The levels are trusted to halve.
    pub fn from_levels(levels: Vec<PixelBuffer>) -> Self {
        debug_assert!(!levels.is_empty());
        Self { levels }
    }

    /// Number of levels a full chain has for the given base size, capped at
    /// `max_level + 1` levels when a cap is set.
    pub fn level_count_for(width: u32, height: u32, max_level: Option<u32>) -> u32 {
        let largest = width.max(height).max(1);
        let mut count = (largest as f32).log2().floor() as u32 + 1;
        if let Some(cap) = max_level {
            count = count.min(cap + 1);
        }
        count
    }

    /// Generate the chain from a base level.
    ///
    /// A 1x1 base produces a single-level chain: some drivers misbehave on
    /// mip-mapped 1x1 textures, and there is nothing to downsample anyway.
    pub fn generate(base: PixelBuffer, filter: MipFilter, max_level: Option<u32>) -> Result<Self> {
        let count = Self::level_count_for(base.width(), base.height(), max_level);
        let mut levels = Vec::with_capacity(count as usize);
        levels.push(base);
        if levels[0].width() == 1 && levels[0].height() == 1 {
            return Ok(Self { levels });
        }
        while (levels.len() as u32) < count {
            let next = downsample(levels.last().unwrap(), filter)?;
            levels.push(next);
        }
        Ok(Self { levels })
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.levels.len()
    }

    #[inline]
    pub fn level(&self, index: usize) -> &PixelBuffer {
        &self.levels[index]
    }

    #[inline]
    pub fn base(&self) -> &PixelBuffer {
        &self.levels[0]
    }

    #[inline]
    pub fn levels(&self) -> &[PixelBuffer] {
        &self.levels
    }

    #[inline]
    pub fn into_levels(self) -> Vec<PixelBuffer> {
        self.levels
    }
}

fn downsample(src: &PixelBuffer, filter: MipFilter) -> Result<PixelBuffer> {
    let dst_w = (src.width() / 2).max(1);
    let dst_h = (src.height() / 2).max(1);
    let mut dst = PixelBuffer::new(src.format(), dst_w, dst_h, src.depth())?;

    // A 1-wide or 1-tall source has no second sample in that axis; the offset
    // collapses to 0 so the same texel is read twice.
    let ox = u32::from(src.width() > 1);
    let oy = u32::from(src.height() > 1);
    let comps = src.format().component_count() as usize;
    let normal = filter == MipFilter::Normal && comps >= 4;

    for z in 0..src.depth() {
        for y in 0..dst_h {
            for x in 0..dst_w {
                let sx = (x * 2).min(src.width() - 1);
                let sy = (y * 2).min(src.height() - 1);
                let samples = [
                    src.texel(sx, sy, z),
                    src.texel(sx + ox, sy, z),
                    src.texel(sx, sy + oy, z),
                    src.texel(sx + ox, sy + oy, z),
                ];
                let texel = if normal {
                    filter_normal(&samples)
                } else {
                    match filter {
                        MipFilter::Min => fold(&samples, comps, f32::min),
                        MipFilter::Max => fold(&samples, comps, f32::max),
                        _ => fold_avg(&samples, comps),
                    }
                };
                dst.set_texel(x, y, z, texel);
            }
        }
    }
    Ok(dst)
}

fn fold_avg(samples: &[[f32; 4]; 4], comps: usize) -> [f32; 4] {
    let mut out = [0.0f32; 4];
    for c in 0..comps {
        out[c] = (samples[0][c] + samples[1][c] + samples[2][c] + samples[3][c]) * 0.25;
    }
    out
}

fn fold(samples: &[[f32; 4]; 4], comps: usize, op: fn(f32, f32) -> f32) -> [f32; 4] {
    let mut out = samples[0];
    for sample in &samples[1..] {
        for c in 0..comps {
            out[c] = op(out[c], sample[c]);
        }
    }
    out
}

/// Average and renormalize four encoded normals; the 4th component carries the
/// largest deviation angle (normalized to a quarter turn), never decreasing
/// down the chain.
fn filter_normal(samples: &[[f32; 4]; 4]) -> [f32; 4] {
    const HALF_PI: f32 = std::f32::consts::FRAC_PI_2;

    let decoded: Vec<[f32; 3]> = samples
        .iter()
        .map(|s| normalize([s[0] * 2.0 - 1.0, s[1] * 2.0 - 1.0, s[2] * 2.0 - 1.0]))
        .collect();
    let avg = normalize([
        decoded.iter().map(|n| n[0]).sum::<f32>(),
        decoded.iter().map(|n| n[1]).sum::<f32>(),
        decoded.iter().map(|n| n[2]).sum::<f32>(),
    ]);

    let mut deviation = 0.0f32;
    for n in &decoded {
        let dot = (n[0] * avg[0] + n[1] * avg[1] + n[2] * avg[2]).clamp(-1.0, 1.0);
        deviation = deviation.max(dot.acos() / HALF_PI);
    }
    let inherited = samples.iter().map(|s| s[3]).fold(0.0f32, f32::max);

    [
        avg[0] * 0.5 + 0.5,
        avg[1] * 0.5 + 0.5,
        avg[2] * 0.5 + 0.5,
        deviation.max(inherited).clamp(0.0, 1.0),
    ]
}

fn normalize(v: [f32; 3]) -> [f32; 3] {
    let len = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
    if len < 1e-6 {
        // Degenerate input; fall back to the flat normal.
        return [0.0, 0.0, 1.0];
    }
    [v[0] / len, v[1] / len, v[2] / len]
}
