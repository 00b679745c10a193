// src/cache.rs
//! On-disk texture cache.
//!
//! Entries are keyed by a content identity string (see `channel.rs`) hashed
//! into the file name, and validated by a verify payload stored inside the
//! entry: the identity places the entry, the verify bytes prove it is current.
//! Entry layout, all little-endian:
//!
//! ```text
//! version:u8 | verifyLen:i32 | verifyBytes | mipCount:u8
//!   | width:i16 | height:i16 | depth:i16 | formatTag:u8
//!   | mip 0 bytes | mip 1 bytes | ...
//! ```
//!
//! Mip byte lengths are implied by format and halving dimensions. Any
//! validation or parse failure deletes the entry and reports a miss; the
//! caller rebakes and rewrites it. A coarse mutex covers each whole
//! read-or-write transaction so concurrent compiles never interleave on the
//! same file.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use log::{debug, warn};
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::hash::file_key;
use crate::mipmap::MipChain;
use crate::pixels::{PixelBuffer, PixelFormat};

/// Bumped whenever the entry layout or bake semantics change; a mismatch
/// invalidates every existing entry.
pub const CACHE_VERSION: u8 = 1;

const ENTRY_EXTENSION: &str = "tbc";

/// A parsed cache entry: baked mip payloads plus their geometry.
#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub mips: Vec<Vec<u8>>,
}

impl CacheEntry {
    /// Snapshot a baked mip chain for storage.
    pub fn from_chain(chain: &MipChain) -> Self {
        let base = chain.base();
        Self {
            format: base.format(),
            width: base.width(),
            height: base.height(),
            depth: base.depth(),
            mips: chain.levels().iter().map(|l| l.data().to_vec()).collect(),
        }
    }

    /// Rebuild the mip chain from stored payloads.
    pub fn into_chain(self) -> Result<MipChain> {
        let mut levels = Vec::with_capacity(self.mips.len());
        for (i, data) in self.mips.into_iter().enumerate() {
            let w = (self.width >> i).max(1);
            let h = (self.height >> i).max(1);
            levels.push(PixelBuffer::from_data(self.format, w, h, self.depth, data)?);
        }
        if levels.is_empty() {
            return Err(Error::CacheCorrupt("entry has no mip levels".into()));
        }
        Ok(MipChain::from_levels(levels))
    }
}

/// Content-addressed cache directory.
pub struct TextureCache {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl TextureCache {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            lock: Mutex::new(()),
        })
    }

    #[inline]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, identity: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", file_key(identity), ENTRY_EXTENSION))
    }

    /// Look up an entry. Returns `None` on miss, on stale verify data, on a
    /// geometry mismatch and on corruption; everything except a plain miss
    /// also deletes the entry so the rebake can rewrite it.
    pub fn load(
        &self,
        identity: &str,
        verify: &[u8],
        expected_size: (u32, u32, u32),
        expected_mips: u8,
    ) -> Option<CacheEntry> {
        let _guard = self.lock.lock();
        let path = self.entry_path(identity);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
            Err(err) => {
                warn!("cache read failed for '{identity}': {err}");
                return None;
            }
        };

        match parse_entry(&bytes, verify) {
            Ok(entry) => {
                if (entry.width, entry.height, entry.depth) != expected_size {
                    debug!(
                        "cache entry '{identity}' is {}x{}x{}, channel resolved {}x{}x{}; deleted",
                        entry.width,
                        entry.height,
                        entry.depth,
                        expected_size.0,
                        expected_size.1,
                        expected_size.2
                    );
                    let _ = std::fs::remove_file(&path);
                    return None;
                }
                if entry.mips.len() != expected_mips as usize {
                    debug!(
                        "cache entry '{identity}' has {} mips, expected {expected_mips}; deleted",
                        entry.mips.len()
                    );
                    let _ = std::fs::remove_file(&path);
                    return None;
                }
                debug!("cache hit for '{identity}'");
                Some(entry)
            }
            Err(err) => {
                debug!("cache entry '{identity}' rejected: {err:#}; deleted");
                let _ = std::fs::remove_file(&path);
                None
            }
        }
    }

    /// Write an entry. A failed write deletes the partial file and surfaces
    /// the error; the material still compiles, it just is not cached.
    pub fn store(&self, identity: &str, verify: &[u8], entry: &CacheEntry) -> Result<()> {
        let _guard = self.lock.lock();
        let bytes = encode_entry(verify, entry)?;
        let path = self.entry_path(identity);
        if let Err(err) = std::fs::write(&path, &bytes) {
            let _ = std::fs::remove_file(&path);
            return Err(err.into());
        }
        debug!("cache wrote '{identity}' ({} bytes)", bytes.len());
        Ok(())
    }

    /// Drop an entry if present.
    pub fn delete(&self, identity: &str) {
        let _guard = self.lock.lock();
        let _ = std::fs::remove_file(self.entry_path(identity));
    }
}

fn encode_entry(verify: &[u8], entry: &CacheEntry) -> Result<Vec<u8>> {
    let width = i16::try_from(entry.width)
        .map_err(|_| Error::invalid(format!("width {} exceeds cache limits", entry.width)))?;
    let height = i16::try_from(entry.height)
        .map_err(|_| Error::invalid(format!("height {} exceeds cache limits", entry.height)))?;
    let depth = i16::try_from(entry.depth)
        .map_err(|_| Error::invalid(format!("depth {} exceeds cache limits", entry.depth)))?;
    let mip_count = u8::try_from(entry.mips.len())
        .map_err(|_| Error::invalid(format!("{} mip levels exceed cache limits", entry.mips.len())))?;
    if mip_count == 0 {
        return Err(Error::invalid("cache entry needs at least one mip level"));
    }

    let payload: usize = entry.mips.iter().map(Vec::len).sum();
    let mut out = Vec::with_capacity(13 + verify.len() + payload);
    out.push(CACHE_VERSION);
    out.extend_from_slice(&(verify.len() as i32).to_le_bytes());
    out.extend_from_slice(verify);
    out.push(mip_count);
    out.extend_from_slice(&width.to_le_bytes());
    out.extend_from_slice(&height.to_le_bytes());
    out.extend_from_slice(&depth.to_le_bytes());
    out.push(entry.format.tag());
    for mip in &entry.mips {
        out.extend_from_slice(mip);
    }
    Ok(out)
}

fn parse_entry(bytes: &[u8], verify: &[u8]) -> anyhow::Result<CacheEntry> {
    let mut reader = Reader { bytes, pos: 0 };

    let version = reader.u8().context("version byte")?;
    if version != CACHE_VERSION {
        bail!("version {version}, expected {CACHE_VERSION}");
    }

    let verify_len = reader.i32().context("verify length")?;
    if verify_len < 0 || verify_len as usize != verify.len() {
        bail!("verify length {verify_len}, expected {}", verify.len());
    }
    let stored_verify = reader.take(verify.len()).context("verify payload")?;
    if stored_verify != verify {
        bail!("verify payload is stale");
    }

    let mip_count = reader.u8().context("mip count")?;
    if mip_count == 0 {
        bail!("zero mip count");
    }
    let width = reader.i16().context("width")?;
    let height = reader.i16().context("height")?;
    let depth = reader.i16().context("depth")?;
    if width <= 0 || height <= 0 || depth <= 0 {
        bail!("non-positive size {width}x{height}x{depth}");
    }
    let tag = reader.u8().context("format tag")?;
    let format =
        PixelFormat::from_tag(tag).with_context(|| format!("unknown format tag {tag}"))?;

    let (width, height, depth) = (width as u32, height as u32, depth as u32);
    let mut mips = Vec::with_capacity(mip_count as usize);
    for i in 0..mip_count as u32 {
        let w = (width >> i).max(1);
        let h = (height >> i).max(1);
        let len = format.byte_len(w, h, depth);
        let data = reader
            .take(len)
            .with_context(|| format!("mip {i} payload ({len} bytes)"))?;
        mips.push(data.to_vec());
    }
    if reader.pos != bytes.len() {
        bail!("{} trailing bytes", bytes.len() - reader.pos);
    }

    Ok(CacheEntry {
        format,
        width,
        height,
        depth,
        mips,
    })
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> anyhow::Result<&'a [u8]> {
        if self.pos + len > self.bytes.len() {
            bail!("truncated at byte {}", self.pos);
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn u8(&mut self) -> anyhow::Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn i16(&mut self) -> anyhow::Result<i16> {
        let b = self.take(2)?;
        Ok(i16::from_le_bytes([b[0], b[1]]))
    }

    fn i32(&mut self) -> anyhow::Result<i32> {
        let b = self.take(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}
