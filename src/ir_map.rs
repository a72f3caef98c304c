// src/ir_map.rs
use macroquad::prelude::Vec2;

use crate::tileset::TilesetDef;

/// Canonical, format-agnostic map as produced by a loader.
#[derive(Debug, Clone)]
pub struct IrMap {
    pub tile_w: u32,
    pub tile_h: u32,
    pub tilesets: Vec<IrTileset>, // sorted by authored_first_gid
    pub layers: Vec<IrLayer>,     // draw order: array order
}

/// A decoded tileset plus the first GID the map file assigned to it.
///
/// The registry assigns its own contiguous GIDs; layer data gets remapped
/// from `authored_first_gid` onto those.
#[derive(Debug, Clone)]
pub struct IrTileset {
    pub authored_first_gid: u32,
    pub def: TilesetDef,
}

#[derive(Debug, Clone)]
pub enum IrLayerKind {
    Tiles {
        width: u32,
        height: u32,
        data: Vec<u32>, // raw GIDs, flip bits included
    },
    /// Object, image and group layers carry no tile collision.
    Unsupported { kind: String },
}

#[derive(Debug, Clone)]
pub struct IrLayer {
    pub name: String,
    pub visible: bool,
    pub offset: Vec2, // world offset for this layer
    pub kind: IrLayerKind,
}

impl IrMap {
    /// Tile layers only, in draw order.
    pub fn tile_layers(&self) -> impl Iterator<Item = &IrLayer> {
        self.layers
            .iter()
            .filter(|l| matches!(l.kind, IrLayerKind::Tiles { .. }))
    }
}
