use std::path::Path;
use std::sync::Arc;

use macroquad::prelude::{vec2, Vec2};
use tracing::info;

use crate::compositor::MapCompositor;
use crate::config::QueryConfig;
use crate::error::MapError;
use crate::ir_map::*;
use crate::layer::TileLayer;
use crate::loader::json_loader::decode_map_file_to_ir;
use crate::query::CollisionQueryEngine;
use crate::shapes::ShapeLibrary;
use crate::spatial::{FlipFlags, Gid};
use crate::tileset::{AssetCatalog, DirCatalog, TilesetRegistry};

/// Maps the GIDs a map file authored onto the registry's contiguous ones.
struct GidRemap {
    // (authored first gid, tile count, assigned first gid), sorted
    ranges: Vec<(u32, u32, u32)>,
}

impl GidRemap {
    fn new(tilesets: &[IrTileset], registry: &TilesetRegistry) -> Self {
        let ranges = tilesets
            .iter()
            .zip(registry.tilesets())
            .map(|(ir, ts)| (ir.authored_first_gid, ts.tile_count(), ts.first_gid()))
            .collect();
        GidRemap { ranges }
    }

    fn max_authored(&self) -> u32 {
        self.ranges
            .iter()
            .map(|&(first, count, _)| first.saturating_add(count).saturating_sub(1))
            .max()
            .unwrap_or(0)
    }

    /// Keeps flip bits; 0 stays 0.
    fn remap(&self, raw: u32) -> Result<u32, MapError> {
        let (gid, flip) = Gid::from_raw(raw);
        if gid.is_empty() {
            return Ok(0);
        }
        let idx = self.ranges.partition_point(|&(first, _, _)| first <= gid.get());
        let invalid = || MapError::InvalidGid {
            gid: gid.get(),
            max_gid: self.max_authored(),
        };
        let (first, count, assigned) = *idx
            .checked_sub(1)
            .and_then(|i| self.ranges.get(i))
            .ok_or_else(invalid)?;
        let local = gid.get() - first;
        if local >= count {
            return Err(invalid());
        }
        Ok((assigned + local) | flip.to_raw_bits())
    }
}

/// A loaded map: shared tilesets plus one composed collision layer per tile
/// layer in the file.
pub struct Map {
    pub tile_w: u32,
    pub tile_h: u32,
    registry: Arc<TilesetRegistry>,
    shapes: Arc<ShapeLibrary>,
    layers: Vec<MapCompositor>,
}

impl Map {
    /// Loads a Tiled JSON map, checking images against files next to it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, MapError> {
        let (ir, base) = decode_map_file_to_ir(path)?;
        Self::from_ir(ir, &DirCatalog::new(base))
    }

    pub fn load_with_catalog(
        path: impl AsRef<Path>,
        assets: &dyn AssetCatalog,
    ) -> Result<Self, MapError> {
        let (ir, _) = decode_map_file_to_ir(path)?;
        Self::from_ir(ir, assets)
    }

    pub fn from_ir(ir: IrMap, assets: &dyn AssetCatalog) -> Result<Self, MapError> {
        let registry = TilesetRegistry::load(ir.tilesets.iter().map(|t| t.def.clone()), assets)?;
        let remap = GidRemap::new(&ir.tilesets, &registry);
        let registry = Arc::new(registry);
        let shapes = Arc::new(ShapeLibrary::from_registry(&registry));

        let mut layers = Vec::new();
        for l in ir.layers {
            let IrLayerKind::Tiles {
                width,
                height,
                data,
            } = l.kind
            else {
                continue;
            };
            let data = remap_layer(&remap, width, &data)?;
            let layer = TileLayer::from_raw_gids(l.name, width, height, ir.tile_w, ir.tile_h, &data)?
                .with_offset(l.offset);
            layers.push(MapCompositor::build(
                layer,
                Arc::clone(&registry),
                Arc::clone(&shapes),
            )?);
        }

        info!(
            tilesets = registry.tilesets().len(),
            layers = layers.len(),
            shapes = shapes.shape_count(),
            "loaded map"
        );
        Ok(Map {
            tile_w: ir.tile_w,
            tile_h: ir.tile_h,
            registry,
            shapes,
            layers,
        })
    }

    pub fn tile_size(&self) -> Vec2 {
        vec2(self.tile_w as f32, self.tile_h as f32)
    }

    pub fn registry(&self) -> &Arc<TilesetRegistry> {
        &self.registry
    }

    pub fn shapes(&self) -> &Arc<ShapeLibrary> {
        &self.shapes
    }

    /// Collision layers in draw order.
    pub fn layers(&self) -> &[MapCompositor] {
        &self.layers
    }

    pub fn layer_index(&self, name: &str) -> Option<usize> {
        self.layers.iter().position(|l| l.layer().name() == name)
    }

    /// First tile layer called `name`.
    pub fn layer(&self, name: &str) -> Option<&MapCompositor> {
        self.layer_index(name).map(|i| &self.layers[i])
    }

    pub fn layer_mut(&mut self, name: &str) -> Option<&mut MapCompositor> {
        let i = self.layer_index(name)?;
        self.layers.get_mut(i)
    }

    pub fn layer_at(&self, index: usize) -> Option<&MapCompositor> {
        self.layers.get(index)
    }

    pub fn engine(&self, name: &str, config: QueryConfig) -> Option<CollisionQueryEngine> {
        self.layer(name).map(|l| l.engine(config))
    }

    /// Places a tile using a GID from the registry's numbering.
    pub fn set_tile(
        &mut self,
        layer: &str,
        x: u32,
        y: u32,
        gid: Gid,
        flip: FlipFlags,
    ) -> Result<(), MapError> {
        let compositor = self
            .layer_mut(layer)
            .ok_or_else(|| MapError::InvalidMap(format!("no tile layer named '{layer}'")))?;
        compositor.set_tile(x, y, gid, flip).map(|_| ())
    }
}

fn remap_layer(remap: &GidRemap, width: u32, data: &[u32]) -> Result<Vec<u32>, MapError> {
    data.iter()
        .enumerate()
        .map(|(i, &raw)| {
            remap.remap(raw).map_err(|source| {
                let width = width.max(1) as usize;
                MapError::UnresolvedGid {
                    x: (i % width) as u32,
                    y: (i / width) as u32,
                    source: Box::new(source),
                }
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tileset::{TilesetDef, TilesetKind};
    use std::collections::HashSet;
    use std::path::PathBuf;

    fn ir_tileset(name: &str, authored_first_gid: u32, tile_count: u32) -> IrTileset {
        IrTileset {
            authored_first_gid,
            def: TilesetDef {
                name: name.into(),
                tile_w: 16,
                tile_h: 16,
                tile_count,
                kind: TilesetKind::PerTileImages,
                tiles: Vec::new(),
            },
        }
    }

    fn ir_map(data: Vec<u32>) -> IrMap {
        IrMap {
            tile_w: 16,
            tile_h: 16,
            tilesets: vec![ir_tileset("a", 1, 4), ir_tileset("b", 101, 2)],
            layers: vec![
                IrLayer {
                    name: "ground".into(),
                    visible: true,
                    offset: Vec2::ZERO,
                    kind: IrLayerKind::Tiles {
                        width: 2,
                        height: 2,
                        data,
                    },
                },
                IrLayer {
                    name: "spawns".into(),
                    visible: true,
                    offset: Vec2::ZERO,
                    kind: IrLayerKind::Unsupported {
                        kind: "objectgroup".into(),
                    },
                },
            ],
        }
    }

    #[test]
    fn authored_gaps_are_remapped_onto_registry_gids() {
        let map = Map::from_ir(
            ir_map(vec![1, 4, 101, 102 | crate::spatial::FLIP_V]),
            &HashSet::<PathBuf>::new(),
        )
        .expect("load");

        let ground = map.layer("ground").expect("ground layer").layer();
        assert_eq!(ground.get(0, 0).expect("cell"), Gid(1));
        assert_eq!(ground.get(1, 0).expect("cell"), Gid(4));
        assert_eq!(ground.get(0, 1).expect("cell"), Gid(5));
        let cell = ground.cell(1, 1).expect("cell");
        assert_eq!(cell.gid, Gid(6));
        assert_eq!(cell.flip, FlipFlags::VERTICAL);

        assert_eq!(map.layers().len(), 1);
        assert!(map.layer("spawns").is_none());
        assert_eq!(map.registry().max_gid(), 6);
    }

    #[test]
    fn gid_in_authored_gap_is_unresolved() {
        let err = Map::from_ir(ir_map(vec![0, 0, 50, 0]), &HashSet::<PathBuf>::new())
            .err()
            .expect("gid 50 falls between tilesets");
        match err {
            MapError::UnresolvedGid { x, y, source } => {
                assert_eq!((x, y), (0, 1));
                assert!(matches!(*source, MapError::InvalidGid { gid: 50, max_gid: 102 }));
            }
            other => panic!("expected UnresolvedGid, got {other:?}"),
        }
    }

    #[test]
    fn first_gid_near_the_top_of_the_range_is_tolerated() {
        let mut ir = ir_map(vec![0, 0, 50, 0]);
        ir.tilesets[1].authored_first_gid = u32::MAX - 1;
        let err = Map::from_ir(ir, &HashSet::<PathBuf>::new())
            .err()
            .expect("gid 50 belongs to no tileset");
        match err {
            MapError::UnresolvedGid { source, .. } => {
                assert!(matches!(
                    *source,
                    MapError::InvalidGid { gid: 50, max_gid } if max_gid == u32::MAX - 1
                ));
            }
            other => panic!("expected UnresolvedGid, got {other:?}"),
        }
    }

    #[test]
    fn set_tile_on_unknown_layer_fails() {
        let mut map =
            Map::from_ir(ir_map(vec![0; 4]), &HashSet::<PathBuf>::new()).expect("load");
        assert!(map
            .set_tile("nope", 0, 0, Gid(1), FlipFlags::empty())
            .is_err());
        map.set_tile("ground", 1, 1, Gid(2), FlipFlags::empty())
            .expect("set");
        assert_eq!(
            map.layer_at(0).expect("layer").layer().get(1, 1).expect("cell"),
            Gid(2)
        );
    }
}
