//! Viewer-driven chunk streaming over an infinite cell grid.
//!
//! World space is partitioned into fixed-size square cells keyed by integer
//! coordinate. Once per tick the engine drains finished background work,
//! re-derives the set of cells in view range when the viewer has moved far
//! enough, and walks each affected cell's request state machine: height
//! field first, then one mesh per level of detail as the viewer's distance
//! demands it. Cells that fall out of range are hidden, never destroyed;
//! regenerating them would cost more than keeping them parked.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use glam::Vec2;
use log::{debug, info, warn};

use crate::config::{ConfigError, LodLevel, TerrainAssets};
use crate::fractal;
use crate::heightfield::HeightField;
use crate::mesh::{build_terrain_mesh, MeshGeometry};
use crate::scheduler::{PoolStats, WorkerPool};

/// Viewer displacement, in generation-space units, that triggers a full
/// visibility recompute. Smaller movements only service finished jobs.
pub const VIEWER_MOVE_THRESHOLD: f32 = 15.0;
const SQR_VIEWER_MOVE_THRESHOLD: f32 = VIEWER_MOVE_THRESHOLD * VIEWER_MOVE_THRESHOLD;

/// Integer grid coordinate of a terrain cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellCoord {
    pub x: i32,
    pub y: i32,
}

impl CellCoord {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// The host scene graph, seen from the engine's side.
///
/// The engine owns all generation state; the scene only ever receives
/// finished, immutable artifacts and visibility toggles.
pub trait TerrainScene {
    /// A cell object should be allocated at the given world-space center.
    fn on_cell_created(&mut self, coord: CellCoord, world_center: Vec2, world_size: f32);
    /// Replace the cell's render mesh with geometry for `lod`.
    fn install_mesh(&mut self, coord: CellCoord, lod: u32, geometry: Arc<MeshGeometry>);
    /// Install the collision-grade geometry for the cell.
    fn install_collider(&mut self, coord: CellCoord, geometry: Arc<MeshGeometry>);
    fn set_visible(&mut self, coord: CellCoord, visible: bool);
}

/// Per-LOD mesh cache. A slot is requested at most once while pending and
/// holds its geometry forever once built.
#[derive(Default)]
struct LodSlot {
    requested: bool,
    geometry: Option<Arc<MeshGeometry>>,
}

impl LodSlot {
    fn ready(&self) -> bool {
        self.geometry.is_some()
    }
}

struct TerrainCell {
    coord: CellCoord,
    /// Cell center in generation space (world units before `world_scale`).
    position: Vec2,
    height_field: Option<Arc<HeightField>>,
    height_requested: bool,
    slots: Vec<LodSlot>,
    /// Which slot's mesh the scene currently displays.
    previous_lod: Option<usize>,
    visible: bool,
    collider_installed: bool,
}

impl TerrainCell {
    fn new(coord: CellCoord, position: Vec2, slot_count: usize) -> Self {
        let mut slots = Vec::with_capacity(slot_count);
        slots.resize_with(slot_count, LodSlot::default);
        Self {
            coord,
            position,
            height_field: None,
            height_requested: false,
            slots,
            previous_lod: None,
            visible: false,
            collider_installed: false,
        }
    }

    /// Squared distance from a point to this cell's bounding square.
    fn sqr_distance_to(&self, point: Vec2, half_extent: f32) -> f32 {
        let dx = ((point.x - self.position.x).abs() - half_extent).max(0.0);
        let dy = ((point.y - self.position.y).abs() - half_extent).max(0.0);
        dx * dx + dy * dy
    }
}

/// The mutable state completion callbacks are applied against: the sparse
/// cell map plus the list of cells whose background data just arrived.
#[derive(Default)]
struct CellGrid {
    cells: HashMap<CellCoord, TerrainCell>,
    dirty: Vec<CellCoord>,
}

/// Pick the slot index for a viewer distance: the first level whose
/// threshold the distance does not exceed wins; past every threshold the
/// coarsest level applies.
pub fn select_lod(levels: &[LodLevel], distance: f32) -> usize {
    let mut index = 0;
    for (i, level) in levels.iter().enumerate().take(levels.len().saturating_sub(1)) {
        if distance > level.visible_distance_threshold {
            index = i + 1;
        } else {
            break;
        }
    }
    index
}

#[derive(Debug)]
pub enum EngineError {
    Config(ConfigError),
    PoolBuild(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Config(e) => write!(f, "invalid terrain configuration: {}", e),
            EngineError::PoolBuild(e) => write!(f, "failed to build worker pool: {}", e),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<ConfigError> for EngineError {
    fn from(e: ConfigError) -> Self {
        EngineError::Config(e)
    }
}

/// Counters describing the engine's current footprint.
#[derive(Clone, Copy, Debug)]
pub struct EngineStats {
    pub cells: usize,
    pub visible_cells: usize,
    pub recomputes: usize,
    pub jobs: PoolStats,
}

impl EngineStats {
    pub fn summary(&self) -> String {
        format!(
            "Cells: {} ({} visible) | Recomputes: {} | {}",
            self.cells,
            self.visible_cells,
            self.recomputes,
            self.jobs.summary()
        )
    }
}

/// The chunk streaming engine. Owns the cell grid and the worker pool;
/// single-threaded per tick, with all generation pushed to the pool.
pub struct StreamingEngine {
    assets: TerrainAssets,
    pool: WorkerPool<CellGrid>,
    grid: CellGrid,
    /// Cells shown during the latest visibility pass.
    visible: HashSet<CellCoord>,
    viewer: Vec2,
    last_recompute_viewer: Vec2,
    ticked: bool,
    recomputes: usize,
    /// Cell side length in generation-space units.
    chunk_size: f32,
    chunks_in_view: i32,
    max_view_distance: f32,
}

impl StreamingEngine {
    pub fn new(assets: TerrainAssets) -> Result<Self, EngineError> {
        assets.validate()?;
        let pool =
            WorkerPool::new(assets.worker_threads).map_err(|e| EngineError::PoolBuild(e.to_string()))?;
        let chunk_size = (assets.terrain.core_size - 1) as f32;
        let max_view_distance = assets.max_view_distance();
        let chunks_in_view = (max_view_distance / chunk_size).round() as i32;
        info!(
            "streaming engine ready: cell size {}, view distance {}, ring radius {}",
            chunk_size, max_view_distance, chunks_in_view
        );
        Ok(Self {
            assets,
            pool,
            grid: CellGrid::default(),
            visible: HashSet::new(),
            viewer: Vec2::ZERO,
            last_recompute_viewer: Vec2::ZERO,
            ticked: false,
            recomputes: 0,
            chunk_size,
            chunks_in_view,
            max_view_distance,
        })
    }

    /// Advance the engine by one frame-equivalent step.
    ///
    /// Drains every finished background job, recomputes the visible cell
    /// ring when the viewer has moved beyond the hysteresis threshold, and
    /// re-evaluates any cell whose data arrived this tick.
    pub fn tick(&mut self, viewer_world: Vec2, scene: &mut dyn TerrainScene) {
        self.pool.drain(&mut self.grid);

        self.viewer = viewer_world / self.assets.terrain.world_scale;
        let moved = (self.last_recompute_viewer - self.viewer).length_squared();
        if !self.ticked || moved > SQR_VIEWER_MOVE_THRESHOLD {
            self.ticked = true;
            self.last_recompute_viewer = self.viewer;
            self.update_visible_cells(scene);
        }

        if !self.grid.dirty.is_empty() {
            let mut dirty = std::mem::take(&mut self.grid.dirty);
            dirty.sort_unstable();
            dirty.dedup();
            for coord in dirty {
                self.update_cell(coord, scene);
            }
        }
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            cells: self.grid.cells.len(),
            visible_cells: self.visible.len(),
            recomputes: self.recomputes,
            jobs: self.pool.stats(),
        }
    }

    /// Full visibility pass: hide everything shown last time, then walk the
    /// square ring of coordinates around the viewer's cell, creating cells
    /// on first sight.
    fn update_visible_cells(&mut self, scene: &mut dyn TerrainScene) {
        self.recomputes += 1;
        let previously: Vec<CellCoord> = self.visible.drain().collect();
        for coord in previously {
            if let Some(cell) = self.grid.cells.get_mut(&coord) {
                if cell.visible {
                    cell.visible = false;
                    scene.set_visible(coord, false);
                }
            }
        }

        let current_x = (self.viewer.x / self.chunk_size).round() as i32;
        let current_y = (self.viewer.y / self.chunk_size).round() as i32;
        for y_offset in -self.chunks_in_view..=self.chunks_in_view {
            for x_offset in -self.chunks_in_view..=self.chunks_in_view {
                let coord = CellCoord::new(current_x + x_offset, current_y + y_offset);
                if !self.grid.cells.contains_key(&coord) {
                    self.create_cell(coord, scene);
                }
                self.update_cell(coord, scene);
            }
        }
    }

    fn create_cell(&mut self, coord: CellCoord, scene: &mut dyn TerrainScene) {
        let position = Vec2::new(coord.x as f32, coord.y as f32) * self.chunk_size;
        debug!("creating terrain cell {:?} at {:?}", coord, position);
        let mut cell = TerrainCell::new(coord, position, self.assets.lod_levels.len());
        request_height_field(&self.pool, &self.assets, &mut cell);
        self.grid.cells.insert(coord, cell);
        let world_scale = self.assets.terrain.world_scale;
        scene.on_cell_created(coord, position * world_scale, self.chunk_size * world_scale);
    }

    /// Re-evaluate one cell: visibility, render LOD, collider state.
    fn update_cell(&mut self, coord: CellCoord, scene: &mut dyn TerrainScene) {
        let assets = &self.assets;
        let pool = &self.pool;
        let Some(cell) = self.grid.cells.get_mut(&coord) else {
            return;
        };

        // A failed height job leaves the cell retryable; pick it back up.
        if !cell.height_requested && cell.height_field.is_none() {
            request_height_field(pool, assets, cell);
        }

        let half_extent = self.chunk_size / 2.0;
        let distance = cell.sqr_distance_to(self.viewer, half_extent).sqrt();
        let visible = distance <= self.max_view_distance;

        if visible {
            if cell.height_field.is_some() {
                let lod_index = select_lod(&assets.lod_levels, distance);
                if cell.previous_lod != Some(lod_index) {
                    if cell.slots[lod_index].ready() {
                        cell.previous_lod = Some(lod_index);
                        let geometry = cell.slots[lod_index]
                            .geometry
                            .as_ref()
                            .map(Arc::clone)
                            .expect("slot checked ready");
                        scene.install_mesh(coord, assets.lod_levels[lod_index].lod, geometry);
                    } else if !cell.slots[lod_index].requested {
                        request_mesh(pool, assets, cell, lod_index);
                    }
                }

                // Collision fidelity is decoupled from the render mesh: the
                // collider slot is kept warm whenever the viewer is inside
                // the collider level's own range.
                if let Some(collider_index) = assets.collider_lod_index() {
                    let in_collider_range =
                        distance <= assets.lod_levels[collider_index].visible_distance_threshold;
                    if in_collider_range {
                        if cell.slots[collider_index].ready() {
                            if !cell.collider_installed {
                                cell.collider_installed = true;
                                let geometry = cell.slots[collider_index]
                                    .geometry
                                    .as_ref()
                                    .map(Arc::clone)
                                    .expect("slot checked ready");
                                scene.install_collider(coord, geometry);
                            }
                        } else if !cell.slots[collider_index].requested {
                            request_mesh(pool, assets, cell, collider_index);
                        }
                    }
                }
            }
            self.visible.insert(coord);
        } else {
            self.visible.remove(&coord);
        }

        if visible != cell.visible {
            cell.visible = visible;
            scene.set_visible(coord, visible);
        }
    }
}

/// Dispatch the height-field job for a cell and wire its completion back
/// into the grid.
fn request_height_field(pool: &WorkerPool<CellGrid>, assets: &TerrainAssets, cell: &mut TerrainCell) {
    cell.height_requested = true;
    let coord = cell.coord;
    let params = assets.noise;
    let size = assets.terrain.bordered_size();
    let offset = cell.position + assets.noise.offset;
    debug!("requesting height field for {:?}", coord);
    pool.submit(
        move || fractal::generate_height_field(&params, size, offset),
        move |grid: &mut CellGrid, result| {
            let Some(cell) = grid.cells.get_mut(&coord) else {
                return;
            };
            match result {
                Ok(field) => {
                    cell.height_field = Some(Arc::new(field));
                    grid.dirty.push(coord);
                }
                Err(err) => {
                    warn!("height field job for {:?} failed: {}", coord, err);
                    cell.height_requested = false;
                }
            }
        },
    );
}

/// Dispatch a mesh build for one LOD slot. The slot's requested flag is the
/// backpressure: while it is set no second job for this (cell, LOD) pair
/// can be submitted.
fn request_mesh(
    pool: &WorkerPool<CellGrid>,
    assets: &TerrainAssets,
    cell: &mut TerrainCell,
    slot_index: usize,
) {
    let Some(field) = cell.height_field.as_ref().map(Arc::clone) else {
        return;
    };
    cell.slots[slot_index].requested = true;
    let coord = cell.coord;
    let terrain = assets.terrain.clone();
    let lod = assets.lod_levels[slot_index].lod;
    debug!("requesting lod {} mesh for {:?}", lod, coord);
    pool.submit(
        move || build_terrain_mesh(&field, &terrain, lod),
        move |grid: &mut CellGrid, result| {
            let Some(cell) = grid.cells.get_mut(&coord) else {
                return;
            };
            let outcome = match result {
                Ok(build) => build.map_err(|e| e.to_string()),
                Err(err) => Err(err.to_string()),
            };
            match outcome {
                Ok(geometry) => {
                    cell.slots[slot_index].geometry = Some(Arc::new(geometry));
                    grid.dirty.push(coord);
                }
                Err(msg) => {
                    // Surfaced, logged, and left retryable rather than stuck
                    // in a forever-pending slot.
                    warn!("mesh job (lod {}) for {:?} failed: {}", lod, coord, msg);
                    cell.slots[slot_index].requested = false;
                }
            }
        },
    );
}
