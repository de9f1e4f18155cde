use serde::{Deserialize, Serialize};

use crate::error::{LayerPackerError, Result};

/// Capacity reported by the texture device.
///
/// Queried once per `Atlas` and treated as constants for its lifetime:
///   - `max_texture_units` bounds the number of arrays (one unit per array)
///   - `max_array_layers` bounds the depth of each array
///   - `max_texture_size` bounds layer width and height
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct HardwareLimits {
    pub max_texture_units: u32,
    pub max_array_layers: u32,
    pub max_texture_size: u32,
}

impl Default for HardwareLimits {
    /// Minimums guaranteed by desktop OpenGL 4.x.
    fn default() -> Self {
        Self {
            max_texture_units: 16,
            max_array_layers: 256,
            max_texture_size: 2048,
        }
    }
}

impl HardwareLimits {
    pub fn new(max_texture_units: u32, max_array_layers: u32, max_texture_size: u32) -> Self {
        Self {
            max_texture_units,
            max_array_layers,
            max_texture_size,
        }
    }

    /// Rejects devices that could not hold a single texel.
    pub fn validate(&self) -> Result<()> {
        if self.max_texture_units == 0 {
            return Err(LayerPackerError::InvalidConfig(
                "max_texture_units must be at least 1".into(),
            ));
        }
        if self.max_array_layers == 0 {
            return Err(LayerPackerError::InvalidConfig(
                "max_array_layers must be at least 1".into(),
            ));
        }
        if self.max_texture_size == 0 {
            return Err(LayerPackerError::InvalidDimensions {
                width: self.max_texture_size,
                height: self.max_texture_size,
            });
        }
        Ok(())
    }
}

/// Tuning for an `Atlas`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AtlasConfig {
    /// Side of one free-space cell in pixels. 1 tracks every pixel; larger values
    /// trade packing precision for memory on big layers.
    #[serde(default = "default_cell_size")]
    pub cell_size: u32,
    /// Use at most this many units even if the device offers more.
    #[serde(default)]
    pub max_texture_units: Option<u32>,
    /// Cap array depth below the device limit.
    #[serde(default)]
    pub max_array_layers: Option<u32>,
    /// Cap layer size below the device limit.
    #[serde(default)]
    pub max_texture_size: Option<u32>,
}

impl Default for AtlasConfig {
    fn default() -> Self {
        Self {
            cell_size: default_cell_size(),
            max_texture_units: None,
            max_array_layers: None,
            max_texture_size: None,
        }
    }
}

fn default_cell_size() -> u32 {
    1
}

impl AtlasConfig {
    /// Validates the configuration parameters.
    ///
    /// Returns an error if:
    /// - `cell_size` is zero
    /// - an override is zero
    pub fn validate(&self) -> Result<()> {
        if self.cell_size == 0 {
            return Err(LayerPackerError::InvalidConfig(
                "cell_size must be at least 1".into(),
            ));
        }
        for (name, v) in [
            ("max_texture_units", self.max_texture_units),
            ("max_array_layers", self.max_array_layers),
            ("max_texture_size", self.max_texture_size),
        ] {
            if v == Some(0) {
                return Err(LayerPackerError::InvalidConfig(format!(
                    "{name} override must be at least 1"
                )));
            }
        }
        Ok(())
    }

    /// Device limits narrowed by the overrides in this config.
    pub fn effective_limits(&self, hw: HardwareLimits) -> HardwareLimits {
        let pick = |dev: u32, over: Option<u32>| over.map_or(dev, |o| o.min(dev));
        HardwareLimits {
            max_texture_units: pick(hw.max_texture_units, self.max_texture_units),
            max_array_layers: pick(hw.max_array_layers, self.max_array_layers),
            max_texture_size: pick(hw.max_texture_size, self.max_texture_size),
        }
    }

    /// Create a fluent builder for `AtlasConfig`.
    pub fn builder() -> AtlasConfigBuilder {
        AtlasConfigBuilder::new()
    }
}

/// Builder for `AtlasConfig` for ergonomic construction.
#[derive(Debug, Default, Clone)]
pub struct AtlasConfigBuilder {
    cfg: AtlasConfig,
}

impl AtlasConfigBuilder {
    pub fn new() -> Self {
        Self {
            cfg: AtlasConfig::default(),
        }
    }
    pub fn cell_size(mut self, v: u32) -> Self {
        self.cfg.cell_size = v;
        self
    }
    pub fn max_texture_units(mut self, v: u32) -> Self {
        self.cfg.max_texture_units = Some(v);
        self
    }
    pub fn max_array_layers(mut self, v: u32) -> Self {
        self.cfg.max_array_layers = Some(v);
        self
    }
    pub fn max_texture_size(mut self, v: u32) -> Self {
        self.cfg.max_texture_size = Some(v);
        self
    }
    pub fn build(self) -> AtlasConfig {
        self.cfg
    }
}
