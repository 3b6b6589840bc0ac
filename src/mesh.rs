//! Terrain mesh construction from bordered height fields.
//!
//! The sampled grid is one cell wider than the visible mesh on every side.
//! The outer ring becomes border vertices that participate in normal
//! accumulation but are discarded from the finalized geometry, so two
//! independently built neighbor cells agree on their shared-edge normals
//! instead of showing a lighting crease.

use glam::{Vec2, Vec3};

use crate::config::TerrainParams;
use crate::heightfield::HeightField;

/// Handle to a vertex during construction. Interior vertices are exported;
/// border vertices exist only to support seam-consistent normals.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VertexId {
    Interior(u32),
    Border(u32),
}

#[derive(Debug, Clone, PartialEq)]
pub enum MeshError {
    /// The decimation stride does not evenly divide the sampled span, so
    /// the walk would miss the far border ring.
    StrideMismatch { bordered_size: usize, stride: usize },
    /// The stride leaves no interior quad to triangulate.
    StrideTooCoarse { bordered_size: usize, stride: usize },
}

impl std::fmt::Display for MeshError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MeshError::StrideMismatch { bordered_size, stride } => write!(
                f,
                "stride {} does not divide the sampled span of a {}-sample field",
                stride, bordered_size
            ),
            MeshError::StrideTooCoarse { bordered_size, stride } => write!(
                f,
                "stride {} leaves no interior geometry in a {}-sample field",
                stride, bordered_size
            ),
        }
    }
}

impl std::error::Error for MeshError {}

/// Finalized, immutable terrain geometry. Triangle indices reference only
/// interior vertices and are contiguous in `[0, vertex_count)`.
#[derive(Debug, Clone)]
pub struct MeshGeometry {
    pub positions: Vec<Vec3>,
    pub uvs: Vec<Vec2>,
    pub triangles: Vec<u32>,
    pub normals: Vec<Vec3>,
}

impl MeshGeometry {
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len() / 3
    }

    /// Horizontal bounding rectangle of the finalized vertices, as
    /// `(min_x, min_z, max_x, max_z)`.
    pub fn footprint(&self) -> (f32, f32, f32, f32) {
        let mut min_x = f32::MAX;
        let mut min_z = f32::MAX;
        let mut max_x = f32::MIN;
        let mut max_z = f32::MIN;
        for p in &self.positions {
            min_x = min_x.min(p.x);
            min_z = min_z.min(p.z);
            max_x = max_x.max(p.x);
            max_z = max_z.max(p.z);
        }
        (min_x, min_z, max_x, max_z)
    }
}

/// Mutable assembly state: interior and border vertices live in separate
/// arrays, and triangles touching any border vertex are kept aside so they
/// can feed normal accumulation without entering the index buffer.
struct MeshBuilder {
    positions: Vec<Vec3>,
    uvs: Vec<Vec2>,
    triangles: Vec<[u32; 3]>,
    border_positions: Vec<Vec3>,
    border_triangles: Vec<[VertexId; 3]>,
    flat_shading: bool,
}

impl MeshBuilder {
    fn new(flat_shading: bool) -> Self {
        Self {
            positions: Vec::new(),
            uvs: Vec::new(),
            triangles: Vec::new(),
            border_positions: Vec::new(),
            border_triangles: Vec::new(),
            flat_shading,
        }
    }

    /// Vertices must arrive in id order within their class.
    fn add_vertex(&mut self, id: VertexId, position: Vec3, uv: Vec2) {
        match id {
            VertexId::Interior(i) => {
                debug_assert_eq!(i as usize, self.positions.len());
                self.positions.push(position);
                self.uvs.push(uv);
            }
            VertexId::Border(i) => {
                debug_assert_eq!(i as usize, self.border_positions.len());
                self.border_positions.push(position);
            }
        }
    }

    fn add_triangle(&mut self, a: VertexId, b: VertexId, c: VertexId) {
        if let (VertexId::Interior(a), VertexId::Interior(b), VertexId::Interior(c)) = (a, b, c) {
            self.triangles.push([a, b, c]);
        } else {
            self.border_triangles.push([a, b, c]);
        }
    }

    fn position(&self, id: VertexId) -> Vec3 {
        match id {
            VertexId::Interior(i) => self.positions[i as usize],
            VertexId::Border(i) => self.border_positions[i as usize],
        }
    }

    /// Un-normalized face normal; the magnitude weights large faces more
    /// during accumulation.
    fn face_normal(a: Vec3, b: Vec3, c: Vec3) -> Vec3 {
        (b - a).cross(c - a)
    }

    fn smooth_normals(&self) -> Vec<Vec3> {
        let mut normals = vec![Vec3::ZERO; self.positions.len()];
        for &[a, b, c] in &self.triangles {
            let n = Self::face_normal(
                self.positions[a as usize],
                self.positions[b as usize],
                self.positions[c as usize],
            );
            normals[a as usize] += n;
            normals[b as usize] += n;
            normals[c as usize] += n;
        }
        // Border triangles contribute to the interior vertices they touch;
        // contributions landing on border vertices are dropped with them.
        for &tri in &self.border_triangles {
            let n = Self::face_normal(
                self.position(tri[0]),
                self.position(tri[1]),
                self.position(tri[2]),
            );
            for id in tri {
                if let VertexId::Interior(i) = id {
                    normals[i as usize] += n;
                }
            }
        }
        normals.into_iter().map(|n| n.normalize_or_zero()).collect()
    }

    fn finalize(self) -> MeshGeometry {
        if self.flat_shading {
            self.finalize_flat()
        } else {
            let normals = self.smooth_normals();
            let triangles = self.triangles.iter().flatten().copied().collect();
            MeshGeometry {
                positions: self.positions,
                uvs: self.uvs,
                triangles,
                normals,
            }
        }
    }

    /// Explode shared vertices so every triangle owns three unique copies
    /// and shades as a flat facet.
    fn finalize_flat(self) -> MeshGeometry {
        let corner_count = self.triangles.len() * 3;
        let mut positions = Vec::with_capacity(corner_count);
        let mut uvs = Vec::with_capacity(corner_count);
        let mut triangles = Vec::with_capacity(corner_count);
        let mut normals = Vec::with_capacity(corner_count);
        for &[a, b, c] in &self.triangles {
            let pa = self.positions[a as usize];
            let pb = self.positions[b as usize];
            let pc = self.positions[c as usize];
            let n = Self::face_normal(pa, pb, pc).normalize_or_zero();
            for (p, uv) in [
                (pa, self.uvs[a as usize]),
                (pb, self.uvs[b as usize]),
                (pc, self.uvs[c as usize]),
            ] {
                triangles.push(positions.len() as u32);
                positions.push(p);
                uvs.push(uv);
                normals.push(n);
            }
        }
        MeshGeometry { positions, uvs, triangles, normals }
    }
}

/// Decimation stride for a level-of-detail index.
pub fn lod_stride(lod: u32) -> usize {
    if lod == 0 {
        1
    } else {
        2 * lod as usize
    }
}

/// Build the renderable mesh for one cell.
///
/// The interior footprint is centered on the origin in the XZ plane and
/// spans `core - 1` world units at every level of detail; decimation
/// changes vertex density, never extent.
pub fn build_terrain_mesh(
    field: &HeightField,
    params: &TerrainParams,
    lod: u32,
) -> Result<MeshGeometry, MeshError> {
    let stride = lod_stride(lod);
    let bordered = field.size();
    if (bordered - 1) % stride != 0 {
        return Err(MeshError::StrideMismatch { bordered_size: bordered, stride });
    }
    if 2 * stride >= bordered - 1 {
        return Err(MeshError::StrideTooCoarse { bordered_size: bordered, stride });
    }

    // Sampled points per line, and the decimated interior span dividing the
    // percent coordinate. The world extent comes from the unsimplified core
    // so that every level of detail produces the same footprint.
    let samples = (bordered - 1) / stride + 1;
    let span = (bordered - 1 - 2 * stride) as f32;
    let core = bordered - 2;
    let extent = (core - 1) as f32;
    let top_left_x = -extent / 2.0;
    let top_left_z = extent / 2.0;

    // First pass: classify sampled points. The outermost ring becomes
    // border vertices; interior vertices take ascending export indices.
    let mut ids = Vec::with_capacity(samples * samples);
    let mut next_interior = 0u32;
    let mut next_border = 0u32;
    for gy in 0..samples {
        for gx in 0..samples {
            let x = gx * stride;
            let y = gy * stride;
            let on_ring = x == 0 || y == 0 || x == bordered - 1 || y == bordered - 1;
            let id = if on_ring {
                let id = VertexId::Border(next_border);
                next_border += 1;
                id
            } else {
                let id = VertexId::Interior(next_interior);
                next_interior += 1;
                id
            };
            ids.push(id);
        }
    }

    let mut builder = MeshBuilder::new(params.use_flat_shading);
    for gy in 0..samples {
        for gx in 0..samples {
            let x = gx * stride;
            let y = gy * stride;
            let percent = Vec2::new(
                (x as f32 - stride as f32) / span,
                (y as f32 - stride as f32) / span,
            );
            let height =
                params.height_curve.evaluate(field.get(x, y)) * params.height_multiplier;
            let position = Vec3::new(
                top_left_x + percent.x * extent,
                height,
                top_left_z - percent.y * extent,
            );
            builder.add_vertex(ids[gy * samples + gx], position, percent);

            if gx < samples - 1 && gy < samples - 1 {
                let a = ids[gy * samples + gx];
                let b = ids[gy * samples + gx + 1];
                let c = ids[(gy + 1) * samples + gx];
                let d = ids[(gy + 1) * samples + gx + 1];
                builder.add_triangle(a, d, c);
                builder.add_triangle(d, a, b);
            }
        }
    }

    Ok(builder.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NoiseParams;
    use crate::fractal::generate_height_field;

    fn test_field(size: usize, offset: Vec2) -> HeightField {
        let params = NoiseParams {
            seed: 11,
            scale: 30.0,
            ..NoiseParams::default()
        };
        generate_height_field(&params, size, offset)
    }

    fn mesh_params(core: usize) -> TerrainParams {
        TerrainParams {
            height_multiplier: 10.0,
            core_size: core,
            ..TerrainParams::default()
        }
    }

    #[test]
    fn test_reference_cell_counts() {
        let field = test_field(241, Vec2::ZERO);
        let mesh = build_terrain_mesh(&field, &mesh_params(239), 0).expect("lod 0");
        assert_eq!(mesh.vertex_count(), 239 * 239);
        assert_eq!(mesh.triangle_count(), 238 * 238 * 2);
        assert_eq!(mesh.uvs.len(), mesh.vertex_count());
        assert_eq!(mesh.normals.len(), mesh.vertex_count());
    }

    #[test]
    fn test_indices_reference_interior_vertices_only() {
        let field = test_field(25, Vec2::ZERO);
        let mesh = build_terrain_mesh(&field, &mesh_params(23), 1).expect("lod 1");
        let count = mesh.vertex_count() as u32;
        assert!(mesh.triangles.iter().all(|&i| i < count));
    }

    #[test]
    fn test_lod_vertex_count_law() {
        let field = test_field(25, Vec2::ZERO);
        for lod in 1..=3u32 {
            let stride = 2 * lod as usize;
            let samples_per_line = (25 - 1) / stride + 1;
            let expected = (samples_per_line - 2) * (samples_per_line - 2);
            let mesh = build_terrain_mesh(&field, &mesh_params(23), lod).expect("mesh");
            assert_eq!(mesh.vertex_count(), expected, "lod {}", lod);
        }
        // Level 0 is the full-density mesh.
        let dense = build_terrain_mesh(&field, &mesh_params(23), 0).expect("lod 0");
        assert_eq!(dense.vertex_count(), 23 * 23);
    }

    #[test]
    fn test_footprint_invariant_across_lods() {
        let field = test_field(25, Vec2::ZERO);
        let reference = build_terrain_mesh(&field, &mesh_params(23), 0)
            .expect("lod 0")
            .footprint();
        assert_eq!(reference, (-11.0, -11.0, 11.0, 11.0));
        for lod in 1..=3u32 {
            let footprint = build_terrain_mesh(&field, &mesh_params(23), lod)
                .expect("mesh")
                .footprint();
            assert_eq!(footprint, reference, "lod {}", lod);
        }
    }

    #[test]
    fn test_stride_mismatch_fails_fast() {
        // A 26-sample field has a span of 25, which stride 2 cannot walk.
        let field = test_field(26, Vec2::ZERO);
        let err = build_terrain_mesh(&field, &mesh_params(24), 1).unwrap_err();
        assert_eq!(err, MeshError::StrideMismatch { bordered_size: 26, stride: 2 });
    }

    #[test]
    fn test_stride_too_coarse_fails_fast() {
        let field = test_field(25, Vec2::ZERO);
        let err = build_terrain_mesh(&field, &mesh_params(23), 6).unwrap_err();
        assert_eq!(err, MeshError::StrideTooCoarse { bordered_size: 25, stride: 12 });
    }

    #[test]
    fn test_height_multiplier_scales_heights() {
        let field = test_field(25, Vec2::ZERO);
        let mut params = mesh_params(23);
        params.height_multiplier = 100.0;
        let tall = build_terrain_mesh(&field, &params, 0).expect("tall");
        params.height_multiplier = 1.0;
        let short = build_terrain_mesh(&field, &params, 0).expect("short");
        let max_tall = tall.positions.iter().map(|p| p.y).fold(f32::MIN, f32::max);
        let max_short = short.positions.iter().map(|p| p.y).fold(f32::MIN, f32::max);
        assert!(max_tall > max_short * 50.0);
    }

    #[test]
    fn test_flat_shading_explodes_vertices() {
        let field = test_field(25, Vec2::ZERO);
        let mut params = mesh_params(23);
        let smooth = build_terrain_mesh(&field, &params, 0).expect("smooth");
        params.use_flat_shading = true;
        let flat = build_terrain_mesh(&field, &params, 0).expect("flat");
        assert_eq!(flat.triangle_count(), smooth.triangle_count());
        assert_eq!(flat.vertex_count(), flat.triangles.len());
        // Exploded indices are the identity sequence.
        assert!(flat.triangles.iter().enumerate().all(|(i, &v)| v as usize == i));
    }

    #[test]
    fn test_smooth_normals_are_unit_length() {
        let field = test_field(25, Vec2::ZERO);
        let mesh = build_terrain_mesh(&field, &mesh_params(23), 0).expect("mesh");
        for n in &mesh.normals {
            assert!((n.length() - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_seam_normals_match_between_neighbor_cells() {
        // Build two horizontally adjacent cells from world-consistent
        // offsets and compare vertex normals along the shared edge. The
        // border ring gives each cell the same one-ring support there, so
        // the normals must agree to float noise.
        let size = 49;
        let core = size - 2;
        let cell_world_size = (core - 1) as f32;
        let left = test_field(size, Vec2::ZERO);
        let right = test_field(size, Vec2::new(cell_world_size, 0.0));
        let params = mesh_params(core);
        let left_mesh = build_terrain_mesh(&left, &params, 0).expect("left");
        let right_mesh = build_terrain_mesh(&right, &params, 0).expect("right");

        for row in 0..core {
            let left_edge = row * core + (core - 1);
            let right_edge = row * core;
            let nl = left_mesh.normals[left_edge];
            let nr = right_mesh.normals[right_edge];
            assert!(
                (nl - nr).length() < 1e-3,
                "seam normal mismatch at row {}: {:?} vs {:?}",
                row,
                nl,
                nr
            );
        }
    }

    #[test]
    fn test_uvs_cover_unit_square() {
        let field = test_field(25, Vec2::ZERO);
        let mesh = build_terrain_mesh(&field, &mesh_params(23), 1).expect("mesh");
        let eps = 1e-6;
        for uv in &mesh.uvs {
            assert!(uv.x >= -eps && uv.x <= 1.0 + eps);
            assert!(uv.y >= -eps && uv.y <= 1.0 + eps);
        }
        let min_u = mesh.uvs.iter().map(|u| u.x).fold(f32::MAX, f32::min);
        let max_u = mesh.uvs.iter().map(|u| u.x).fold(f32::MIN, f32::max);
        assert!(min_u.abs() < eps && (max_u - 1.0).abs() < eps);
    }
}
