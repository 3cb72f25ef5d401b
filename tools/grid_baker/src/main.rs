//! Offline pathing-grid baker.
//!
//! Reads one heightmap PNG per map level (`<assets>/heightmaps/<level>.png`)
//! plus the world-entity placements, rasterizes walkability and directional
//! edge blockers, and writes `<assets>/grids/<level>.grid` bincode files the
//! server loads at startup.
//!
//! Heightmap convention: luminance below the threshold is walkable ground;
//! at or above it the tile is fully blocked (cliff or water wall) and
//! blocks projectiles.

use std::path::{Path, PathBuf};

use image::GenericImageView;

use shared::pathing::{BakedGrid, PathingGrid};
use shared::tile::MapLevel;
use shared::world_entity::{load_placements_ron, WorldEntityCatalog, WorldEntityPlacement};

const BLOCKED_LUMA_THRESHOLD: u8 = 200;

fn bake_level(
    level: MapLevel,
    assets: &Path,
    catalog: &WorldEntityCatalog,
    placements: &[WorldEntityPlacement],
) -> Result<(), String> {
    let heightmap_path = assets
        .join("heightmaps")
        .join(format!("{}.png", level.asset_stem()));
    let img = image::open(&heightmap_path)
        .map_err(|e| format!("Failed to open {}: {}", heightmap_path.display(), e))?;
    let (width, height) = img.dimensions();
    let mut grid = PathingGrid::new(level, width, height);

    let luma = img.to_luma8();
    for y in 0..height {
        for x in 0..width {
            // PNG rows run top-down; tile y runs bottom-up.
            let pixel = luma.get_pixel(x, height - 1 - y);
            if pixel.0[0] >= BLOCKED_LUMA_THRESHOLD {
                grid.set_fully_blocked(x as i32, y as i32);
                grid.set_projectile_blocked(x as i32, y as i32, true);
            }
        }
    }

    // Overlay the placed world entities: doors block one edge, solid
    // footprints block their tiles.
    let mut overlaid = 0usize;
    for placement in placements.iter().filter(|p| p.pos.level == level) {
        let Some(def) = catalog.get(placement.definition) else {
            eprintln!(
                "warning: placement references unknown definition {:?}",
                placement.definition
            );
            continue;
        };
        crate::blockers::apply(&mut grid, def, placement);
        overlaid += 1;
    }

    let out_dir = assets.join("grids");
    std::fs::create_dir_all(&out_dir).map_err(|e| format!("mkdir error: {}", e))?;
    let out_path = out_dir.join(format!("{}.grid", level.asset_stem()));
    let baked = BakedGrid { grid };
    std::fs::write(&out_path, baked.to_bytes()?).map_err(|e| format!("write error: {}", e))?;
    println!(
        "Baked {:?}: {}x{} tiles, {} entity overlays -> {}",
        level,
        width,
        height,
        overlaid,
        out_path.display()
    );
    Ok(())
}

mod blockers {
    use shared::pathing::PathingGrid;
    use shared::tile::PathingDirection;
    use shared::world_entity::{WorldEntityDefinition, WorldEntityPlacement};

    /// Same overlay rule the server applies for runtime placements.
    pub fn apply(
        grid: &mut PathingGrid,
        def: &WorldEntityDefinition,
        placement: &WorldEntityPlacement,
    ) {
        let (x, y) = placement.pos.xy();
        if def.is_door {
            let (dx, dy) = placement.orientation.delta();
            if let Some(dir) = PathingDirection::from_delta(dx, dy) {
                grid.block_edge(x, y, dir);
            }
            return;
        }
        if def.is_solid {
            for fx in 0..def.footprint.0 as i32 {
                for fy in 0..def.footprint.1 as i32 {
                    grid.set_fully_blocked(x + fx, y + fy);
                    if def.blocks_projectiles {
                        grid.set_projectile_blocked(x + fx, y + fy, true);
                    }
                }
            }
        }
    }
}

fn main() {
    let assets = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| std::env::var("STATIC_ASSETS_PATH").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("assets"));
    println!("Baking grids from {}", assets.display());

    let catalog = match std::fs::read_to_string(assets.join("content/world_entities.ron")) {
        Ok(text) => match WorldEntityCatalog::load_ron(&text) {
            Ok(catalog) => catalog,
            Err(e) => {
                eprintln!("error: {}", e);
                std::process::exit(1);
            }
        },
        Err(_) => {
            eprintln!("warning: no world_entities.ron, baking without entity overlays");
            WorldEntityCatalog::default()
        }
    };
    let placements = match std::fs::read_to_string(assets.join("content/world_entity_placements.ron"))
    {
        Ok(text) => match load_placements_ron(&text) {
            Ok(placements) => placements,
            Err(e) => {
                eprintln!("error: {}", e);
                std::process::exit(1);
            }
        },
        Err(_) => Vec::new(),
    };

    let mut failures = 0;
    for level in MapLevel::ALL {
        if let Err(e) = bake_level(level, &assets, &catalog, &placements) {
            eprintln!("warning: {:?} not baked: {}", level, e);
            failures += 1;
        }
    }
    if failures == MapLevel::ALL.len() {
        eprintln!("error: no grids baked");
        std::process::exit(1);
    }
}
