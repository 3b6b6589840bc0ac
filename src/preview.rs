//! Synchronous preview generation for the editing workflow.
//!
//! Runs the full pipeline for a single reference cell on the calling
//! thread: sample the height field, optionally subtract an island falloff,
//! paint a region color map, and build the mesh. Results can be exported
//! as PNGs for offline inspection. The runtime streaming path never goes
//! through here.

use image::{ImageBuffer, Rgb, RgbImage};
use serde::{Deserialize, Serialize};

use crate::config::TerrainAssets;
use crate::fractal;
use crate::heightfield::HeightField;
use crate::mesh::{build_terrain_mesh, MeshError, MeshGeometry};

/// Which preview artifact a tool wants to look at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PreviewMode {
    HeightMap,
    ColorMap,
    FalloffMap,
    Mesh,
}

/// One band of the height-to-color mapping. `height` is the inclusive
/// lower bound of the band; bands are checked in ascending order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegionColor {
    pub name: String,
    pub height: f32,
    pub color: [u8; 3],
}

/// Stock region table: ocean through snow line.
pub fn default_regions() -> Vec<RegionColor> {
    fn region(name: &str, height: f32, color: [u8; 3]) -> RegionColor {
        RegionColor { name: name.to_string(), height, color }
    }
    vec![
        region("deep water", 0.0, [28, 60, 118]),
        region("shallow water", 0.3, [47, 94, 168]),
        region("sand", 0.4, [210, 200, 140]),
        region("grass", 0.45, [86, 152, 23]),
        region("forest", 0.55, [62, 107, 18]),
        region("rock", 0.6, [90, 69, 60]),
        region("mountain", 0.7, [75, 60, 53]),
        region("snow", 0.9, [235, 235, 235]),
    ]
}

/// Everything the editor needs to draw one reference cell.
#[derive(Debug, Clone)]
pub struct PreviewOutput {
    pub height_field: HeightField,
    /// Row-major core-sized color grid (the border ring is not painted).
    pub color_map: Vec<[u8; 3]>,
    pub geometry: MeshGeometry,
}

/// Run the whole pipeline synchronously for the reference cell at the
/// configured offset.
pub fn generate_preview(
    assets: &TerrainAssets,
    regions: &[RegionColor],
    lod: u32,
) -> Result<PreviewOutput, MeshError> {
    let size = assets.terrain.bordered_size();
    let mut field = fractal::generate_height_field(&assets.noise, size, assets.noise.offset);
    if assets.terrain.use_falloff {
        let falloff = generate_falloff_map(size);
        for (v, f) in field.values_mut().zip(falloff.as_slice()) {
            *v = (*v - f).clamp(0.0, 1.0);
        }
    }
    let color_map = paint_color_map(&field, regions);
    let geometry = build_terrain_mesh(&field, &assets.terrain, lod)?;
    Ok(PreviewOutput { height_field: field, color_map, geometry })
}

/// Paint the core of a height field through the region table.
pub fn paint_color_map(field: &HeightField, regions: &[RegionColor]) -> Vec<[u8; 3]> {
    let core = field.core_size();
    let mut colors = vec![[0u8; 3]; core * core];
    for y in 0..core {
        for x in 0..core {
            let height = field.get(x + 1, y + 1);
            let mut color = [0u8; 3];
            for region in regions {
                if height >= region.height {
                    color = region.color;
                } else {
                    break;
                }
            }
            colors[y * core + x] = color;
        }
    }
    colors
}

/// Square island falloff: 0 at the center rising to 1 at the edges.
pub fn generate_falloff_map(size: usize) -> HeightField {
    let mut field = HeightField::new(size);
    for y in 0..size {
        for x in 0..size {
            let nx = x as f32 / size as f32 * 2.0 - 1.0;
            let ny = y as f32 / size as f32 * 2.0 - 1.0;
            field.set(x, y, falloff_curve(nx.abs().max(ny.abs())));
        }
    }
    field
}

/// Sharpened remap pushing mid values toward the extremes.
fn falloff_curve(value: f32) -> f32 {
    const A: f32 = 3.0;
    const B: f32 = 2.2;
    let num = value.powf(A);
    num / (num + (B - B * value).powf(A))
}

/// Write a height field as a grayscale PNG, border included.
pub fn export_height_map(field: &HeightField, path: &str) -> Result<(), image::ImageError> {
    let size = field.size() as u32;
    let mut img: RgbImage = ImageBuffer::new(size, size);
    for y in 0..field.size() {
        for x in 0..field.size() {
            let v = (field.get(x, y).clamp(0.0, 1.0) * 255.0) as u8;
            img.put_pixel(x as u32, y as u32, Rgb([v, v, v]));
        }
    }
    img.save(path)
}

/// Write a painted core-sized color map as a PNG.
pub fn export_color_map(
    colors: &[[u8; 3]],
    core: usize,
    path: &str,
) -> Result<(), image::ImageError> {
    let mut img: RgbImage = ImageBuffer::new(core as u32, core as u32);
    for y in 0..core {
        for x in 0..core {
            img.put_pixel(x as u32, y as u32, Rgb(colors[y * core + x]));
        }
    }
    img.save(path)
}

/// Version-gated preview holder for tools with an apply button.
///
/// Regenerates only when the assets' change token moved since the last
/// render, so repeated redraw requests are free.
#[derive(Default)]
pub struct PreviewCache {
    last_version: Option<u64>,
    output: Option<PreviewOutput>,
    /// How many times the preview has actually been rebuilt.
    pub generations: usize,
}

impl PreviewCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refresh(
        &mut self,
        assets: &TerrainAssets,
        regions: &[RegionColor],
        lod: u32,
    ) -> Result<&PreviewOutput, MeshError> {
        if self.last_version != Some(assets.version) || self.output.is_none() {
            self.output = Some(generate_preview(assets, regions, lod)?);
            self.last_version = Some(assets.version);
            self.generations += 1;
        }
        Ok(self.output.as_ref().expect("refreshed above"))
    }
}
