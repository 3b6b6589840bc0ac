use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use glam::Vec2;

use landmass::config::{NormalizeMode, TerrainAssets, FLAT_CORE_SIZE};
use landmass::mesh::MeshGeometry;
use landmass::preview::{self, default_regions, PreviewMode};
use landmass::streaming::{CellCoord, StreamingEngine, TerrainScene};

#[derive(Parser, Debug)]
#[command(name = "landmass")]
#[command(about = "Generate and stream fractal terrain meshes")]
struct Args {
    /// Random seed for the noise field
    #[arg(short, long, default_value = "0")]
    seed: u64,

    /// Noise scale; larger values stretch terrain features out
    #[arg(long, default_value = "50.0")]
    scale: f32,

    /// Number of noise octaves
    #[arg(long, default_value = "4")]
    octaves: u32,

    /// Amplitude decay per octave (0.0-1.0)
    #[arg(long, default_value = "0.5")]
    persistence: f32,

    /// Frequency growth per octave
    #[arg(long, default_value = "2.0")]
    lacunarity: f32,

    /// World-space X offset of the sampled terrain
    #[arg(long, default_value = "0.0")]
    offset_x: f32,

    /// World-space Y offset of the sampled terrain
    #[arg(long, default_value = "0.0")]
    offset_y: f32,

    /// Height normalization: "local" or "global"
    #[arg(long, default_value = "global")]
    normalize: String,

    /// Vertical exaggeration of the generated meshes
    #[arg(long, default_value = "25.0")]
    height_multiplier: f32,

    /// Explode triangles for faceted shading (shrinks the default cell)
    #[arg(long)]
    flat: bool,

    /// Subtract an island falloff in the preview
    #[arg(long)]
    falloff: bool,

    /// Override the interior cell size
    #[arg(long)]
    core_size: Option<usize>,

    /// Load a full TerrainAssets JSON file instead of the flags above
    #[arg(long)]
    config: Option<String>,

    /// Directory to write preview PNGs (height, color, falloff)
    #[arg(long)]
    export_dir: Option<String>,

    /// Level of detail used for the preview mesh
    #[arg(long, default_value = "0")]
    preview_lod: u32,

    /// Preview artifact to export: "height", "color", "falloff", "mesh" or "all"
    #[arg(long, default_value = "all")]
    preview_mode: String,

    /// Run a headless streaming simulation for this many ticks
    #[arg(long)]
    simulate: Option<usize>,

    /// Viewer speed per simulated tick, in world units
    #[arg(long, default_value = "12.0")]
    viewer_speed: f32,
}

/// Scene stub for headless runs: counts traffic and logs it.
#[derive(Default)]
struct LoggingScene {
    cells_created: usize,
    meshes_installed: usize,
    colliders_installed: usize,
    visibility_changes: usize,
}

impl TerrainScene for LoggingScene {
    fn on_cell_created(&mut self, coord: CellCoord, world_center: Vec2, _world_size: f32) {
        log::debug!("cell {:?} created at {:?}", coord, world_center);
        self.cells_created += 1;
    }

    fn install_mesh(&mut self, coord: CellCoord, lod: u32, geometry: Arc<MeshGeometry>) {
        log::debug!(
            "cell {:?} now renders lod {} ({} vertices)",
            coord,
            lod,
            geometry.vertex_count()
        );
        self.meshes_installed += 1;
    }

    fn install_collider(&mut self, coord: CellCoord, geometry: Arc<MeshGeometry>) {
        log::debug!(
            "cell {:?} collider installed ({} triangles)",
            coord,
            geometry.triangle_count()
        );
        self.colliders_installed += 1;
    }

    fn set_visible(&mut self, coord: CellCoord, visible: bool) {
        log::debug!("cell {:?} visible: {}", coord, visible);
        self.visibility_changes += 1;
    }
}

fn assets_from_args(args: &Args) -> TerrainAssets {
    if let Some(ref path) = args.config {
        let loaded = fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|text| {
                serde_json::from_str::<TerrainAssets>(&text).map_err(|e| e.to_string())
            });
        match loaded {
            Ok(assets) => return assets,
            Err(e) => {
                eprintln!("Failed to load config {}: {}", path, e);
                std::process::exit(1);
            }
        }
    }

    let mut assets = TerrainAssets::default();
    assets.noise.seed = args.seed;
    assets.noise.scale = args.scale;
    assets.noise.octaves = args.octaves;
    assets.noise.persistence = args.persistence;
    assets.noise.lacunarity = args.lacunarity;
    assets.noise.offset = Vec2::new(args.offset_x, args.offset_y);
    assets.noise.normalize_mode = match args.normalize.as_str() {
        "local" => NormalizeMode::Local,
        _ => NormalizeMode::Global,
    };
    assets.terrain.height_multiplier = args.height_multiplier;
    assets.terrain.use_flat_shading = args.flat;
    assets.terrain.use_falloff = args.falloff;
    if args.flat {
        assets.terrain.core_size = FLAT_CORE_SIZE;
    }
    if let Some(core) = args.core_size {
        assets.terrain.core_size = core;
    }
    assets
}

fn parse_preview_mode(text: &str) -> Option<PreviewMode> {
    match text {
        "height" => Some(PreviewMode::HeightMap),
        "color" => Some(PreviewMode::ColorMap),
        "falloff" => Some(PreviewMode::FalloffMap),
        "mesh" => Some(PreviewMode::Mesh),
        _ => None,
    }
}

fn export_previews(assets: &TerrainAssets, dir: &str, lod: u32, mode: Option<PreviewMode>) {
    let wants = |m: PreviewMode| mode.is_none() || mode == Some(m);

    println!("Generating preview cell...");
    let preview = match preview::generate_preview(assets, &default_regions(), lod) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Preview generation failed: {}", e);
            return;
        }
    };

    let dir = Path::new(dir);
    if let Err(e) = fs::create_dir_all(dir) {
        eprintln!("Failed to create {}: {}", dir.display(), e);
        return;
    }

    if wants(PreviewMode::HeightMap) {
        let height_path = dir.join("height.png");
        match preview::export_height_map(&preview.height_field, &height_path.to_string_lossy()) {
            Ok(()) => println!("Exported height map to: {}", height_path.display()),
            Err(e) => eprintln!("Failed to export height map: {}", e),
        }
    }

    if wants(PreviewMode::ColorMap) {
        let color_path = dir.join("color.png");
        let core = assets.terrain.core_size;
        match preview::export_color_map(&preview.color_map, core, &color_path.to_string_lossy()) {
            Ok(()) => println!("Exported color map to: {}", color_path.display()),
            Err(e) => eprintln!("Failed to export color map: {}", e),
        }
    }

    if wants(PreviewMode::FalloffMap) {
        let falloff_path = dir.join("falloff.png");
        let falloff = preview::generate_falloff_map(assets.terrain.bordered_size());
        match preview::export_height_map(&falloff, &falloff_path.to_string_lossy()) {
            Ok(()) => println!("Exported falloff map to: {}", falloff_path.display()),
            Err(e) => eprintln!("Failed to export falloff map: {}", e),
        }
    }

    if wants(PreviewMode::Mesh) {
        println!(
            "Preview mesh: {} vertices, {} triangles",
            preview.geometry.vertex_count(),
            preview.geometry.triangle_count()
        );
    }
}

fn run_simulation(assets: &TerrainAssets, ticks: usize, viewer_speed: f32) {
    let mut engine = match StreamingEngine::new(assets.clone()) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Failed to start streaming engine: {}", e);
            std::process::exit(1);
        }
    };
    let mut scene = LoggingScene::default();

    println!("Simulating {} ticks...", ticks);
    let mut viewer = Vec2::ZERO;
    for _ in 0..ticks {
        engine.tick(viewer, &mut scene);
        viewer += Vec2::new(viewer_speed, viewer_speed * 0.6);
        std::thread::sleep(Duration::from_millis(5));
    }
    // A few stationary ticks to let in-flight work land.
    for _ in 0..20 {
        engine.tick(viewer, &mut scene);
        std::thread::sleep(Duration::from_millis(5));
    }

    println!("{}", engine.stats().summary());
    println!(
        "Scene traffic: {} cells | {} meshes | {} colliders | {} visibility changes",
        scene.cells_created,
        scene.meshes_installed,
        scene.colliders_installed,
        scene.visibility_changes
    );
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    let assets = assets_from_args(&args);

    if let Err(e) = assets.validate() {
        eprintln!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    let mode = parse_preview_mode(&args.preview_mode);
    if mode.is_none() && args.preview_mode != "all" {
        eprintln!("Unknown preview mode: {}", args.preview_mode);
        std::process::exit(1);
    }

    if let Some(ref dir) = args.export_dir {
        export_previews(&assets, dir, args.preview_lod, mode);
    }

    if let Some(ticks) = args.simulate {
        run_simulation(&assets, ticks, args.viewer_speed);
    }

    if args.export_dir.is_none() && args.simulate.is_none() {
        // Default action: write a preview set next to the binary.
        export_previews(&assets, "landmass_preview", args.preview_lod, mode);
    }
}
