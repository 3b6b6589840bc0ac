//! Tunable generation parameters.
//!
//! Everything the sampler, mesh builder, and streaming engine consume comes
//! through these structs, so presets can live in JSON files. Degenerate
//! values are clamped deterministically rather than rejected: the numbers
//! originate from hand-edited assets and must never crash the pipeline.
//!
//! `TerrainAssets` carries a `version` change token. Consumers remember the
//! last token they rendered and compare on demand instead of subscribing to
//! change notifications.

use glam::Vec2;
use serde::{Deserialize, Serialize};

/// Default core (interior) size of a smooth-shaded terrain cell.
pub const SMOOTH_CORE_SIZE: usize = 239;
/// Default core size under flat shading, where exploded triangles multiply
/// the vertex count roughly sixfold.
pub const FLAT_CORE_SIZE: usize = 95;
/// Smallest usable noise scale; non-positive scales clamp to this.
pub const MIN_NOISE_SCALE: f32 = 1e-4;

/// How raw octave sums are remapped into displayable heights.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NormalizeMode {
    /// Remap the observed min/max of this field to [0, 1]. Good for single
    /// standalone maps, wrong for tiled worlds: neighbors disagree.
    Local,
    /// Remap against the theoretical maximum amplitude sum so that every
    /// independently generated cell lands on a comparable height scale.
    Global,
}

/// Inputs to the fractal noise sampler.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct NoiseParams {
    pub seed: u64,
    /// Feature size; larger values stretch terrain features out.
    pub scale: f32,
    /// Number of noise layers summed per sample.
    pub octaves: u32,
    /// Amplitude decay per octave, in [0, 1].
    pub persistence: f32,
    /// Frequency growth per octave, at least 1.
    pub lacunarity: f32,
    /// User-facing world-space shift of the whole terrain.
    pub offset: Vec2,
    pub normalize_mode: NormalizeMode,
}

impl Default for NoiseParams {
    fn default() -> Self {
        Self {
            seed: 0,
            scale: 50.0,
            octaves: 4,
            persistence: 0.5,
            lacunarity: 2.0,
            offset: Vec2::ZERO,
            normalize_mode: NormalizeMode::Global,
        }
    }
}

impl NoiseParams {
    /// Copy with degenerate values clamped to safe minimums.
    ///
    /// Clamps are silent but deterministic: scale below `MIN_NOISE_SCALE`
    /// rises to it, octaves below 1 become 1 (a zero-octave field would make
    /// the global remap divide by zero), lacunarity below 1 becomes 1, and
    /// persistence is confined to [0, 1].
    pub fn sanitized(&self) -> Self {
        Self {
            scale: self.scale.max(MIN_NOISE_SCALE),
            octaves: self.octaves.max(1),
            persistence: self.persistence.clamp(0.0, 1.0),
            lacunarity: self.lacunarity.max(1.0),
            ..*self
        }
    }
}

/// Piecewise-linear remap applied to normalized heights before the height
/// multiplier. Keys are `(input, output)` pairs sorted by input; with fewer
/// than two keys the curve is the identity.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HeightCurve {
    keys: Vec<(f32, f32)>,
}

impl HeightCurve {
    pub fn from_keys(mut keys: Vec<(f32, f32)>) -> Self {
        keys.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        Self { keys }
    }

    pub fn evaluate(&self, t: f32) -> f32 {
        if self.keys.len() < 2 {
            return t;
        }
        let first = self.keys[0];
        let last = self.keys[self.keys.len() - 1];
        if t <= first.0 {
            return first.1;
        }
        if t >= last.0 {
            return last.1;
        }
        for pair in self.keys.windows(2) {
            let (x0, y0) = pair[0];
            let (x1, y1) = pair[1];
            if t <= x1 {
                let span = x1 - x0;
                if span <= f32::EPSILON {
                    return y1;
                }
                return y0 + (y1 - y0) * (t - x0) / span;
            }
        }
        last.1
    }
}

/// Inputs to the mesh builder plus world-placement parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TerrainParams {
    /// Vertical exaggeration applied after the height curve.
    pub height_multiplier: f32,
    pub height_curve: HeightCurve,
    /// Explode triangles into unshared vertices for faceted shading.
    pub use_flat_shading: bool,
    /// Subtract an island-shaped falloff before painting and meshing
    /// (preview pipeline only).
    pub use_falloff: bool,
    /// Uniform scale between generation space and engine world space.
    pub world_scale: f32,
    /// Interior sample count per cell side.
    pub core_size: usize,
}

impl Default for TerrainParams {
    fn default() -> Self {
        Self {
            height_multiplier: 25.0,
            height_curve: HeightCurve::default(),
            use_flat_shading: false,
            use_falloff: false,
            world_scale: 2.5,
            core_size: SMOOTH_CORE_SIZE,
        }
    }
}

impl TerrainParams {
    /// Sampled field size for one cell, border ring included.
    pub fn bordered_size(&self) -> usize {
        self.core_size + 2
    }
}

/// One entry of the level-of-detail table.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LodLevel {
    /// Decimation index; stride is 1 at 0, otherwise `2 * lod`.
    pub lod: u32,
    /// Viewer distance up to which this level is the preferred render mesh.
    pub visible_distance_threshold: f32,
    /// Whether this level's geometry also feeds the physics collider.
    pub use_for_collider: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    EmptyLodTable,
    /// Thresholds must strictly ascend with the table index.
    UnsortedLodTable { index: usize },
    CoreTooSmall { core_size: usize },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::EmptyLodTable => write!(f, "LOD table is empty"),
            ConfigError::UnsortedLodTable { index } => {
                write!(f, "LOD table thresholds not ascending at index {}", index)
            }
            ConfigError::CoreTooSmall { core_size } => {
                write!(f, "cell core size {} is too small to mesh", core_size)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// The full tunable-parameter bundle handed to the pipeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TerrainAssets {
    pub noise: NoiseParams,
    pub terrain: TerrainParams,
    /// Ascending-threshold LOD table; the last threshold is the view range.
    pub lod_levels: Vec<LodLevel>,
    /// Background worker count; 0 picks one per core.
    pub worker_threads: usize,
    /// Change token compared by consumers to detect edits.
    #[serde(default)]
    pub version: u64,
}

impl Default for TerrainAssets {
    fn default() -> Self {
        Self {
            noise: NoiseParams::default(),
            terrain: TerrainParams::default(),
            lod_levels: vec![
                LodLevel { lod: 0, visible_distance_threshold: 150.0, use_for_collider: true },
                LodLevel { lod: 1, visible_distance_threshold: 300.0, use_for_collider: false },
                LodLevel { lod: 2, visible_distance_threshold: 600.0, use_for_collider: false },
            ],
            worker_threads: 0,
            version: 0,
        }
    }
}

impl TerrainAssets {
    /// Mark the bundle as edited so caches regenerate on their next look.
    pub fn bump(&mut self) {
        self.version = self.version.wrapping_add(1);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lod_levels.is_empty() {
            return Err(ConfigError::EmptyLodTable);
        }
        for i in 1..self.lod_levels.len() {
            let prev = self.lod_levels[i - 1].visible_distance_threshold;
            if self.lod_levels[i].visible_distance_threshold <= prev {
                return Err(ConfigError::UnsortedLodTable { index: i });
            }
        }
        if self.terrain.core_size < 2 {
            return Err(ConfigError::CoreTooSmall { core_size: self.terrain.core_size });
        }
        Ok(())
    }

    /// Farthest distance at which any cell stays visible.
    pub fn max_view_distance(&self) -> f32 {
        self.lod_levels
            .last()
            .map(|l| l.visible_distance_threshold)
            .unwrap_or(0.0)
    }

    /// Slot index of the finest level flagged for collision, if any.
    pub fn collider_lod_index(&self) -> Option<usize> {
        self.lod_levels.iter().position(|l| l.use_for_collider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_clamps_degenerates() {
        let params = NoiseParams {
            scale: -3.0,
            octaves: 0,
            persistence: 1.7,
            lacunarity: 0.25,
            ..NoiseParams::default()
        };
        let clean = params.sanitized();
        assert_eq!(clean.scale, MIN_NOISE_SCALE);
        assert_eq!(clean.octaves, 1);
        assert_eq!(clean.persistence, 1.0);
        assert_eq!(clean.lacunarity, 1.0);
    }

    #[test]
    fn test_sanitize_keeps_valid_values() {
        let params = NoiseParams::default();
        assert_eq!(params.sanitized(), params);
    }

    #[test]
    fn test_height_curve_identity_without_keys() {
        let curve = HeightCurve::default();
        assert_eq!(curve.evaluate(0.37), 0.37);
    }

    #[test]
    fn test_height_curve_interpolates() {
        let curve = HeightCurve::from_keys(vec![(0.0, 0.0), (0.5, 0.1), (1.0, 1.0)]);
        assert_eq!(curve.evaluate(0.25), 0.05);
        assert!((curve.evaluate(0.75) - 0.55).abs() < 1e-6);
        // Out-of-range inputs clamp to the end keys.
        assert_eq!(curve.evaluate(-1.0), 0.0);
        assert_eq!(curve.evaluate(2.0), 1.0);
    }

    #[test]
    fn test_height_curve_sorts_keys() {
        let curve = HeightCurve::from_keys(vec![(1.0, 1.0), (0.0, 0.5)]);
        assert_eq!(curve.evaluate(0.0), 0.5);
    }

    #[test]
    fn test_validate_rejects_empty_table() {
        let mut assets = TerrainAssets::default();
        assets.lod_levels.clear();
        assert_eq!(assets.validate(), Err(ConfigError::EmptyLodTable));
    }

    #[test]
    fn test_validate_rejects_unsorted_thresholds() {
        let mut assets = TerrainAssets::default();
        assets.lod_levels[1].visible_distance_threshold = 50.0;
        assert_eq!(assets.validate(), Err(ConfigError::UnsortedLodTable { index: 1 }));
    }

    #[test]
    fn test_collider_lod_is_finest_flagged() {
        let mut assets = TerrainAssets::default();
        assets.lod_levels[0].use_for_collider = false;
        assets.lod_levels[2].use_for_collider = true;
        assert_eq!(assets.collider_lod_index(), Some(2));
    }

    #[test]
    fn test_version_bump() {
        let mut assets = TerrainAssets::default();
        let before = assets.version;
        assets.bump();
        assert_ne!(assets.version, before);
    }

    #[test]
    fn test_assets_round_trip_json() {
        let assets = TerrainAssets::default();
        let text = serde_json::to_string(&assets).expect("serialize");
        let back: TerrainAssets = serde_json::from_str(&text).expect("deserialize");
        assert_eq!(back, assets);
    }
}
