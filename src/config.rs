// src/config.rs
//! Pipeline configuration.
//!
//! Loaded once at startup from a JSON file (or built in code) and shared
//! read-only across compiler and queue instances.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Tuning knobs for the texture compilation pipeline.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Block-compress baked channel textures where a compressor exists.
    pub compression: bool,
    /// Read and write the on-disk texture cache.
    pub cache_enabled: bool,
    /// Maximum number of GPU objects released per free-queue drain call.
    pub free_drain_budget: usize,
    /// Number of resource-loader threads in the compile service.
    pub loader_threads: usize,
    /// Optional cap on generated mip levels (level 0 is the base image).
    pub max_mip_level: Option<u32>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            compression: true,
            cache_enabled: true,
            free_drain_budget: 1000,
            loader_threads: 4,
            max_mip_level: None,
        }
    }
}

impl PipelineConfig {
    /// Load a configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Save the configuration as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }
}
