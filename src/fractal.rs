//! Fractal noise sampling: seed plus world offset to a deterministic
//! height field.
//!
//! Cells are generated independently, out of order, on worker threads, so
//! everything here must be a pure function of its inputs. The per-octave
//! scatter offsets are derived from the seed alone; the caller folds the
//! cell center and any user shift into `offset`.

use glam::Vec2;
use noise::{NoiseFn, Perlin};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::config::{NoiseParams, NormalizeMode};
use crate::heightfield::HeightField;

/// Empirical headroom divisor for `NormalizeMode::Global`. The raw octave
/// sum almost never reaches the theoretical maximum amplitude, so the remap
/// divides by `2 * max_possible / GLOBAL_HEIGHT_FUDGE` instead of the full
/// range. Changing this redistributes terrain heights everywhere.
pub const GLOBAL_HEIGHT_FUDGE: f32 = 1.55;

/// Range each octave's scatter offset is drawn from.
const OCTAVE_OFFSET_RANGE: std::ops::Range<i32> = -100_000..100_000;

/// Generate a bordered square height field of the given size.
///
/// `offset` is the world-space sample offset for this field: the streaming
/// engine passes the cell center plus the user offset, the preview pipeline
/// passes the user offset alone.
pub fn generate_height_field(params: &NoiseParams, size: usize, offset: Vec2) -> HeightField {
    let params = params.sanitized();
    let perlin = Perlin::new(params.seed as u32);
    let mut rng = ChaCha8Rng::seed_from_u64(params.seed);

    // Scatter each octave into its own noise-space region. The y shift is
    // subtracted so that increasing the user offset pans the terrain the
    // same way on both axes.
    let mut octave_offsets = Vec::with_capacity(params.octaves as usize);
    let mut max_possible_height = 0.0f32;
    let mut amplitude = 1.0f32;
    for _ in 0..params.octaves {
        let ox = rng.gen_range(OCTAVE_OFFSET_RANGE) as f64 + f64::from(offset.x);
        let oy = rng.gen_range(OCTAVE_OFFSET_RANGE) as f64 - f64::from(offset.y);
        octave_offsets.push((ox, oy));
        max_possible_height += amplitude;
        amplitude *= params.persistence;
    }

    let scale = f64::from(params.scale);
    let half = size as f64 / 2.0;

    let mut field = HeightField::new(size);
    let mut min_height = f32::MAX;
    let mut max_height = f32::MIN;

    for y in 0..size {
        for x in 0..size {
            let mut amplitude = 1.0f32;
            let mut frequency = 1.0f64;
            let mut height = 0.0f32;
            for &(ox, oy) in &octave_offsets {
                let sample_x = (x as f64 - half + ox) / scale * frequency;
                let sample_y = (y as f64 - half + oy) / scale * frequency;
                let value = perlin.get([sample_x, sample_y]) as f32;
                height += value * amplitude;
                amplitude *= params.persistence;
                frequency *= f64::from(params.lacunarity);
            }
            if height < min_height {
                min_height = height;
            }
            if height > max_height {
                max_height = height;
            }
            field.set(x, y, height);
        }
    }

    normalize(
        &mut field,
        params.normalize_mode,
        min_height,
        max_height,
        max_possible_height,
    );
    field
}

fn normalize(
    field: &mut HeightField,
    mode: NormalizeMode,
    min_height: f32,
    max_height: f32,
    max_possible_height: f32,
) {
    match mode {
        NormalizeMode::Local => {
            for v in field.values_mut() {
                *v = inverse_lerp(min_height, max_height, *v);
            }
        }
        NormalizeMode::Global => {
            let divisor = 2.0 * max_possible_height / GLOBAL_HEIGHT_FUDGE;
            for v in field.values_mut() {
                *v = ((*v + 1.0) / divisor).max(0.0);
            }
        }
    }
}

/// Where `value` sits between `a` and `b`, 0 for a constant range.
fn inverse_lerp(a: f32, b: f32, value: f32) -> f32 {
    if (b - a).abs() <= f32::EPSILON {
        0.0
    } else {
        (value - a) / (b - a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MIN_NOISE_SCALE;

    fn params() -> NoiseParams {
        NoiseParams {
            seed: 7,
            scale: 25.0,
            ..NoiseParams::default()
        }
    }

    #[test]
    fn test_determinism() {
        let a = generate_height_field(&params(), 33, Vec2::new(12.0, -7.0));
        let b = generate_height_field(&params(), 33, Vec2::new(12.0, -7.0));
        assert_eq!(a.as_slice(), b.as_slice());
    }

    #[test]
    fn test_seed_changes_field() {
        let a = generate_height_field(&params(), 33, Vec2::ZERO);
        let mut other = params();
        other.seed = 8;
        let b = generate_height_field(&other, 33, Vec2::ZERO);
        assert_ne!(a.as_slice(), b.as_slice());
    }

    #[test]
    fn test_offset_changes_field() {
        let a = generate_height_field(&params(), 33, Vec2::ZERO);
        let b = generate_height_field(&params(), 33, Vec2::new(100.0, 0.0));
        assert_ne!(a.as_slice(), b.as_slice());
    }

    #[test]
    fn test_local_normalization_spans_unit_range() {
        let mut p = params();
        p.normalize_mode = NormalizeMode::Local;
        let field = generate_height_field(&p, 49, Vec2::ZERO);
        let (min, max) = field.min_max();
        assert!(min.abs() < 1e-6, "local min should be 0, got {}", min);
        assert!((max - 1.0).abs() < 1e-6, "local max should be 1, got {}", max);
    }

    #[test]
    fn test_global_normalization_is_non_negative() {
        let field = generate_height_field(&params(), 49, Vec2::new(-300.0, 450.0));
        let (min, _) = field.min_max();
        assert!(min >= 0.0);
    }

    #[test]
    fn test_zero_scale_is_clamped_not_fatal() {
        let mut p = params();
        p.scale = 0.0;
        let field = generate_height_field(&p, 9, Vec2::ZERO);
        assert!(field.as_slice().iter().all(|v| v.is_finite()));
        assert_eq!(p.sanitized().scale, MIN_NOISE_SCALE);
    }

    #[test]
    fn test_adjacent_fields_share_edge_heights() {
        // Two neighboring cells sample overlapping world positions along
        // their shared edge: the last interior column of one cell lines up
        // with the first interior column of the next.
        let size = 49;
        let cell_world_size = (size - 3) as f32;
        let a = generate_height_field(&params(), size, Vec2::ZERO);
        let b = generate_height_field(&params(), size, Vec2::new(cell_world_size, 0.0));
        for y in 0..size {
            let ha = a.get(size - 2, y);
            let hb = b.get(1, y);
            assert!(
                (ha - hb).abs() < 1e-4,
                "edge mismatch at row {}: {} vs {}",
                y,
                ha,
                hb
            );
        }
    }

    #[test]
    fn test_reference_cell_shape_and_range() {
        let p = NoiseParams {
            seed: 0,
            scale: 50.0,
            octaves: 4,
            persistence: 0.5,
            lacunarity: 2.0,
            offset: Vec2::ZERO,
            normalize_mode: NormalizeMode::Global,
        };
        let field = generate_height_field(&p, 241, Vec2::ZERO);
        assert_eq!(field.size(), 241);
        assert_eq!(field.core_size(), 239);
        assert!(field.as_slice().iter().all(|&v| v >= 0.0));
    }
}
