use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use macroquad::prelude::{vec2, Rect, Vec2};
use tracing::debug;

use crate::error::MapError;
use crate::shapes::CollisionShape;
use crate::spatial::{Gid, GID_MASK};

/// Where the tile images of a tileset come from.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRef {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
}

/// The two ways Tiled packs tile images.
#[derive(Debug, Clone, PartialEq)]
pub enum TilesetKind {
    /// One image atlas with a regular grid.
    SheetGrid {
        image: ImageRef,
        columns: u32,
        spacing: u32, // 0 if not used
        margin: u32,  // 0 if not used
    },
    /// "Collection of images": every tile carries its own image, columns = 0.
    PerTileImages,
}

/// Authored metadata of one tile. Tiles without a definition are passable
/// and, in a sheet tileset, still drawable.
#[derive(Debug, Clone, PartialEq)]
pub struct TileDefinition {
    pub id: u32,
    /// Required for [`TilesetKind::PerTileImages`], ignored for sheets.
    pub image: Option<ImageRef>,
    /// Ordered multiset; duplicates are kept.
    pub shapes: Vec<CollisionShape>,
}

/// Tileset as authored, before a first GID is assigned.
#[derive(Debug, Clone, PartialEq)]
pub struct TilesetDef {
    pub name: String,
    pub tile_w: u32,
    pub tile_h: u32,
    pub tile_count: u32,
    pub kind: TilesetKind,
    pub tiles: Vec<TileDefinition>,
}

/// Index of a tileset inside its [`TilesetRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TilesetId(u32);

impl TilesetId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone)]
pub struct Tileset {
    name: String,
    first_gid: u32,
    tile_w: u32,
    tile_h: u32,
    tile_count: u32,
    kind: TilesetKind,
    tiles: BTreeMap<u32, TileDefinition>,
}

impl Tileset {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn first_gid(&self) -> u32 {
        self.first_gid
    }

    /// One past the last GID owned by this tileset.
    pub fn end_gid(&self) -> u32 {
        self.first_gid + self.tile_count
    }

    pub fn tile_count(&self) -> u32 {
        self.tile_count
    }

    pub fn tile_size(&self) -> Vec2 {
        vec2(self.tile_w as f32, self.tile_h as f32)
    }

    pub fn kind(&self) -> &TilesetKind {
        &self.kind
    }

    /// Grid column count; 0 for per-tile image tilesets.
    pub fn columns(&self) -> u32 {
        match &self.kind {
            TilesetKind::SheetGrid { columns, .. } => *columns,
            TilesetKind::PerTileImages => 0,
        }
    }

    pub fn tile(&self, local_id: u32) -> Option<&TileDefinition> {
        self.tiles.get(&local_id)
    }

    pub fn tiles(&self) -> impl Iterator<Item = &TileDefinition> {
        self.tiles.values()
    }

    /// The image a tile is drawn from.
    pub fn image_for(&self, local_id: u32) -> Option<&ImageRef> {
        if local_id >= self.tile_count {
            return None;
        }
        match &self.kind {
            TilesetKind::SheetGrid { image, .. } => Some(image),
            TilesetKind::PerTileImages => self.tiles.get(&local_id)?.image.as_ref(),
        }
    }

    /// Source rectangle of a tile inside [`Tileset::image_for`].
    pub fn source_rect(&self, local_id: u32) -> Option<Rect> {
        match &self.kind {
            TilesetKind::SheetGrid {
                columns,
                spacing,
                margin,
                ..
            } => {
                if local_id >= self.tile_count || *columns == 0 {
                    return None;
                }
                let col = local_id % columns;
                let row = local_id / columns;
                let sx = margin + col * (self.tile_w + spacing);
                let sy = margin + row * (self.tile_h + spacing);
                Some(Rect::new(
                    sx as f32,
                    sy as f32,
                    self.tile_w as f32,
                    self.tile_h as f32,
                ))
            }
            TilesetKind::PerTileImages => {
                let image = self.image_for(local_id)?;
                Some(Rect::new(0.0, 0.0, image.width as f32, image.height as f32))
            }
        }
    }
}

/// Answers whether an image file is available to the game.
///
/// Decoding happens elsewhere; the registry only needs existence.
pub trait AssetCatalog {
    fn contains(&self, path: &Path) -> bool;
}

impl AssetCatalog for HashSet<PathBuf> {
    fn contains(&self, path: &Path) -> bool {
        HashSet::contains(self, path)
    }
}

impl AssetCatalog for BTreeSet<PathBuf> {
    fn contains(&self, path: &Path) -> bool {
        BTreeSet::contains(self, path)
    }
}

/// Catalog backed by files under a base directory.
#[derive(Debug, Clone)]
pub struct DirCatalog {
    base: PathBuf,
}

impl DirCatalog {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        DirCatalog { base: base.into() }
    }
}

impl AssetCatalog for DirCatalog {
    fn contains(&self, path: &Path) -> bool {
        self.base.join(path).is_file()
    }
}

/// Every loaded tileset with its assigned GID range.
///
/// First GIDs are handed out in load order as a running sum of tile counts,
/// starting at 1, so ranges are contiguous and never overlap.
#[derive(Debug, Clone)]
pub struct TilesetRegistry {
    tilesets: Vec<Tileset>,
    first_gids: Vec<u32>,
}

impl TilesetRegistry {
    pub fn load<I>(defs: I, assets: &dyn AssetCatalog) -> Result<Self, MapError>
    where
        I: IntoIterator<Item = TilesetDef>,
    {
        let mut tilesets = Vec::new();
        let mut first_gids = Vec::new();
        let mut next_gid: u32 = 1;

        for def in defs {
            let end_gid = next_gid
                .checked_add(def.tile_count)
                .filter(|end| end - 1 <= GID_MASK)
                .ok_or_else(|| {
                    MapError::InvalidMap(format!(
                        "tileset '{}' pushes gids past {GID_MASK}",
                        def.name
                    ))
                })?;
            let tileset = register(def, next_gid, assets)?;
            next_gid = end_gid;

            debug!(
                tileset = %tileset.name,
                first_gid = tileset.first_gid,
                tile_count = tileset.tile_count,
                "registered tileset"
            );
            first_gids.push(tileset.first_gid);
            tilesets.push(tileset);
        }

        Ok(TilesetRegistry {
            tilesets,
            first_gids,
        })
    }

    /// Maps a flag-free GID to its tileset and local tile ID.
    pub fn resolve(&self, gid: Gid) -> Result<(TilesetId, u32), MapError> {
        let invalid = || MapError::InvalidGid {
            gid: gid.get(),
            max_gid: self.max_gid(),
        };
        if gid.is_empty() {
            return Err(invalid());
        }
        let idx = self
            .first_gids
            .partition_point(|&first| first <= gid.get())
            .checked_sub(1)
            .ok_or_else(invalid)?;
        let ts = &self.tilesets[idx];
        if gid.get() >= ts.end_gid() {
            return Err(invalid());
        }
        Ok((TilesetId(idx as u32), gid.get() - ts.first_gid))
    }

    pub fn get(&self, id: TilesetId) -> Option<&Tileset> {
        self.tilesets.get(id.index())
    }

    pub fn by_name(&self, name: &str) -> Option<(TilesetId, &Tileset)> {
        self.tilesets
            .iter()
            .enumerate()
            .find(|(_, ts)| ts.name == name)
            .map(|(i, ts)| (TilesetId(i as u32), ts))
    }

    pub fn tilesets(&self) -> &[Tileset] {
        &self.tilesets
    }

    /// Highest resolvable GID, 0 when nothing is registered.
    pub fn max_gid(&self) -> u32 {
        self.tilesets.last().map_or(0, |ts| ts.end_gid() - 1)
    }
}

fn register(def: TilesetDef, first_gid: u32, assets: &dyn AssetCatalog) -> Result<Tileset, MapError> {
    let TilesetDef {
        name,
        tile_w,
        tile_h,
        tile_count,
        kind,
        tiles,
    } = def;

    if tile_w == 0 || tile_h == 0 {
        return Err(MapError::InvalidMap(format!(
            "tileset '{name}' has a zero tile size"
        )));
    }

    let missing = |path: &Path| MapError::MissingImage {
        tileset: name.clone(),
        path: path.to_path_buf(),
    };

    if let TilesetKind::SheetGrid { image, .. } = &kind {
        if !assets.contains(&image.path) {
            return Err(missing(&image.path));
        }
    }

    let mut by_id = BTreeMap::new();
    for tile in tiles {
        if tile.id >= tile_count {
            return Err(MapError::TileIdOutOfRange {
                tileset: name.clone(),
                id: tile.id,
                tile_count,
            });
        }
        if let TilesetKind::PerTileImages = kind {
            match &tile.image {
                Some(image) if assets.contains(&image.path) => {}
                Some(image) => return Err(missing(&image.path)),
                None => {
                    return Err(MapError::InvalidMap(format!(
                        "tile {} of image collection '{name}' has no image",
                        tile.id
                    )))
                }
            }
        }
        if by_id.contains_key(&tile.id) {
            return Err(MapError::DuplicateTileId {
                tileset: name.clone(),
                id: tile.id,
            });
        }
        by_id.insert(tile.id, tile);
    }

    Ok(Tileset {
        name,
        first_gid,
        tile_w,
        tile_h,
        tile_count,
        kind,
        tiles: by_id,
    })
}
