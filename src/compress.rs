// src/compress.rs
//! Fast block compression for baked channel textures.
//!
//! Only formats with a known-good compressor are supported: 3-component byte
//! data compresses to DXT1, 4-component byte data to DXT3 (explicit alpha).
//! Float and narrow formats stay uncompressed; asking for them is an error the
//! orchestrator reports per material. Quality is "fast": bounding-box endpoint
//! selection, good enough for bake-time compression of skin textures.

use crate::error::{Error, Result};
use crate::mipmap::MipChain;
use crate::pixels::{PixelBuffer, PixelFormat};

/// The compressed counterpart of an uncompressed format, if one exists.
pub fn target_format(format: PixelFormat) -> Option<PixelFormat> {
    match format {
        PixelFormat::Rgb8 => Some(PixelFormat::Dxt1),
        PixelFormat::Rgba8 => Some(PixelFormat::Dxt3),
        _ => None,
    }
}

/// Compress a single mip level.
pub fn compress(buffer: &PixelBuffer) -> Result<PixelBuffer> {
    let target = target_format(buffer.format()).ok_or_else(|| {
        Error::UnsupportedCompression(format!("{:?}", buffer.format()))
    })?;
    let width = buffer.width();
    let height = buffer.height();
    let depth = buffer.depth();
    let blocks_x = width.div_ceil(4);
    let blocks_y = height.div_ceil(4);

    let mut out = Vec::with_capacity(target.byte_len(width, height, depth));
    for z in 0..depth {
        for by in 0..blocks_y {
            for bx in 0..blocks_x {
                let texels = gather_block(buffer, bx * 4, by * 4, z);
                match target {
                    PixelFormat::Dxt1 => encode_color_block(&texels, &mut out),
                    PixelFormat::Dxt3 => {
                        encode_alpha_block(&texels, &mut out);
                        encode_color_block(&texels, &mut out);
                    }
                    _ => unreachable!(),
                }
            }
        }
    }
    PixelBuffer::from_data(target, width, height, depth, out)
}

/// Compress every level of a chain.
pub fn compress_chain(chain: &MipChain) -> Result<MipChain> {
    let mut levels = Vec::with_capacity(chain.count());
    for level in chain.levels() {
        levels.push(compress(level)?);
    }
    Ok(MipChain::from_levels(levels))
}

/// Read a 4x4 block as 8-bit RGBA, clamping reads past the image edge.
fn gather_block(buffer: &PixelBuffer, x0: u32, y0: u32, z: u32) -> [[u8; 4]; 16] {
    let comps = buffer.format().component_count() as usize;
    let mut block = [[0u8, 0, 0, 255]; 16];
    for ty in 0..4u32 {
        for tx in 0..4u32 {
            let x = (x0 + tx).min(buffer.width() - 1);
            let y = (y0 + ty).min(buffer.height() - 1);
            let texel = &mut block[(ty * 4 + tx) as usize];
            for c in 0..comps {
                texel[c] = (buffer.component(x, y, z, c) * 255.0 + 0.5).clamp(0.0, 255.0) as u8;
            }
        }
    }
    block
}

#[inline]
fn rgb565(texel: &[u8; 4]) -> u16 {
    ((texel[0] as u16 >> 3) << 11) | ((texel[1] as u16 >> 2) << 5) | (texel[2] as u16 >> 3)
}

#[inline]
fn expand565(value: u16) -> [i32; 3] {
    let r = ((value >> 11) & 0x1f) as i32;
    let g = ((value >> 5) & 0x3f) as i32;
    let b = (value & 0x1f) as i32;
    [(r << 3) | (r >> 2), (g << 2) | (g >> 4), (b << 3) | (b >> 2)]
}

/// Encode the 8-byte DXT1-style color part: two RGB565 endpoints from the
/// block's bounding box, then 2-bit palette indices, LSB first.
fn encode_color_block(texels: &[[u8; 4]; 16], out: &mut Vec<u8>) {
    let mut lo = [255u8; 3];
    let mut hi = [0u8; 3];
    for texel in texels {
        for c in 0..3 {
            lo[c] = lo[c].min(texel[c]);
            hi[c] = hi[c].max(texel[c]);
        }
    }
    let mut c0 = rgb565(&[hi[0], hi[1], hi[2], 255]);
    let mut c1 = rgb565(&[lo[0], lo[1], lo[2], 255]);
    // Four-color mode requires c0 > c1; a flat block encodes as all-index-0.
    if c0 < c1 {
        std::mem::swap(&mut c0, &mut c1);
    }

    out.extend_from_slice(&c0.to_le_bytes());
    out.extend_from_slice(&c1.to_le_bytes());

    if c0 == c1 {
        out.extend_from_slice(&[0u8; 4]);
        return;
    }

    let e0 = expand565(c0);
    let e1 = expand565(c1);
    let palette = [
        e0,
        e1,
        [
            (2 * e0[0] + e1[0]) / 3,
            (2 * e0[1] + e1[1]) / 3,
            (2 * e0[2] + e1[2]) / 3,
        ],
        [
            (e0[0] + 2 * e1[0]) / 3,
            (e0[1] + 2 * e1[1]) / 3,
            (e0[2] + 2 * e1[2]) / 3,
        ],
    ];

    let mut indices = 0u32;
    for (i, texel) in texels.iter().enumerate() {
        let mut best = 0usize;
        let mut best_dist = i32::MAX;
        for (p, entry) in palette.iter().enumerate() {
            let dr = texel[0] as i32 - entry[0];
            let dg = texel[1] as i32 - entry[1];
            let db = texel[2] as i32 - entry[2];
            let dist = dr * dr + dg * dg + db * db;
            if dist < best_dist {
                best_dist = dist;
                best = p;
            }
        }
        indices |= (best as u32) << (i * 2);
    }
    out.extend_from_slice(&indices.to_le_bytes());
}

/// Encode the 8-byte explicit alpha part of a DXT3 block: 4 bits per texel,
/// LSB first.
fn encode_alpha_block(texels: &[[u8; 4]; 16], out: &mut Vec<u8>) {
    let mut bits = 0u64;
    for (i, texel) in texels.iter().enumerate() {
        let alpha4 = (texel[3] as u64 * 15 + 127) / 255;
        bits |= alpha4 << (i * 4);
    }
    out.extend_from_slice(&bits.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mipmap::MipFilter;
    use crate::pixels::Color;

    fn solid_rgb(width: u32, height: u32, color: Color) -> PixelBuffer {
        let mut buf = PixelBuffer::new(PixelFormat::Rgb8, width, height, 1).unwrap();
        buf.fill_uniform(&color, [true, true, true, false]);
        buf
    }

    #[test]
    fn test_target_formats() {
        assert_eq!(target_format(PixelFormat::Rgb8), Some(PixelFormat::Dxt1));
        assert_eq!(target_format(PixelFormat::Rgba8), Some(PixelFormat::Dxt3));
        assert_eq!(target_format(PixelFormat::R8), None);
        assert_eq!(target_format(PixelFormat::Rgba32F), None);
    }

    #[test]
    fn test_unsupported_format_errors() {
        let buf = PixelBuffer::new(PixelFormat::Rg32F, 4, 4, 1).unwrap();
        let err = compress(&buf).unwrap_err();
        assert!(matches!(err, Error::UnsupportedCompression(_)));
    }

    #[test]
    fn test_dxt1_sizes() {
        let buf = solid_rgb(8, 8, Color::WHITE);
        let compressed = compress(&buf).unwrap();
        assert_eq!(compressed.format(), PixelFormat::Dxt1);
        assert_eq!(compressed.data().len(), 4 * 8);
        // Non-multiple-of-4 sizes round up to whole blocks.
        let odd = solid_rgb(5, 3, Color::WHITE);
        assert_eq!(compress(&odd).unwrap().data().len(), 2 * 8);
    }

    #[test]
    fn test_flat_block_endpoints_equal() {
        let buf = solid_rgb(4, 4, Color::new(0.5, 0.5, 0.5, 1.0));
        let compressed = compress(&buf).unwrap();
        let data = compressed.data();
        let c0 = u16::from_le_bytes([data[0], data[1]]);
        let c1 = u16::from_le_bytes([data[2], data[3]]);
        assert_eq!(c0, c1);
        assert_eq!(&data[4..8], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_dxt3_alpha_encoding() {
        let mut buf = PixelBuffer::new(PixelFormat::Rgba8, 4, 4, 1).unwrap();
        buf.fill_uniform(&Color::new(1.0, 0.0, 0.0, 1.0), [true; 4]);
        buf.set_component(0, 0, 0, 3, 0.0);
        let compressed = compress(&buf).unwrap();
        let data = compressed.data();
        assert_eq!(compressed.format(), PixelFormat::Dxt3);
        assert_eq!(data.len(), 16);
        // First texel alpha nibble is 0, second is 15.
        assert_eq!(data[0] & 0x0f, 0);
        assert_eq!(data[0] >> 4, 15);
    }

    #[test]
    fn test_compress_chain_all_levels() {
        let chain = MipChain::generate(solid_rgb(8, 8, Color::WHITE), MipFilter::Box, None)
            .unwrap();
        let compressed = compress_chain(&chain).unwrap();
        assert_eq!(compressed.count(), chain.count());
        for level in compressed.levels() {
            assert_eq!(level.format(), PixelFormat::Dxt1);
        }
    }
}
