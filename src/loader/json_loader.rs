// src/loader/json_loader.rs
use std::path::{Path, PathBuf};

use macroquad::prelude::{vec2, Vec2};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::error::MapError;
use crate::ir_map::*;
use crate::shapes::CollisionShape;
use crate::tileset::{ImageRef, TileDefinition, TilesetDef, TilesetKind};

#[derive(Deserialize)]
struct JsonLayer {
    #[serde(default)]
    data: Vec<u32>,
    #[serde(default)]
    width: u32,
    #[serde(default)]
    height: u32,
    #[serde(default = "default_true")]
    visible: bool,
    #[serde(default)]
    offsetx: f32,
    #[serde(default)]
    offsety: f32,
    #[serde(default)]
    name: String,
    #[serde(rename = "type")]
    kind: Option<String>, // "tilelayer" expected here
    #[serde(default)]
    encoding: Option<String>,
    #[serde(default)]
    layers: Vec<JsonLayer>, // children of a "group" layer
}

fn default_true() -> bool {
    true
}

#[derive(Deserialize)]
struct JsonTilesetRef {
    firstgid: u32,
    #[serde(default)]
    source: Option<String>,
    // An embedded tileset keeps every ExternalTileset field inline.
    #[serde(flatten)]
    inline: serde_json::Map<String, JsonValue>,
}

#[derive(Deserialize)]
struct JsonMap {
    tilewidth: u32,
    tileheight: u32,
    #[serde(default)]
    infinite: bool,
    layers: Vec<JsonLayer>,
    tilesets: Vec<JsonTilesetRef>,
}

#[derive(Deserialize)]
struct ExternalTileset {
    #[serde(default)]
    name: String,
    tilewidth: u32,
    tileheight: u32,
    tilecount: u32,
    #[serde(default)]
    columns: u32,
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    imagewidth: u32,
    #[serde(default)]
    imageheight: u32,
    #[serde(default)]
    spacing: u32,
    #[serde(default)]
    margin: u32,
    #[serde(default)]
    tiles: Vec<JsonTile>,
}

#[derive(Deserialize)]
struct JsonObject {
    #[serde(default)]
    x: f32,
    #[serde(default)]
    y: f32,
    #[serde(default)]
    width: f32,
    #[serde(default)]
    height: f32,
    #[serde(default)]
    rotation: f32,
    #[serde(default)]
    point: bool,
    #[serde(default)]
    ellipse: bool,
    #[serde(default)]
    polygon: Vec<JsonObjectPoint>,
    #[serde(default)]
    polyline: Vec<JsonObjectPoint>,
    #[serde(default)]
    text: Option<JsonValue>,
}

#[derive(Deserialize)]
struct JsonObjectPoint {
    x: f32,
    y: f32,
}

#[derive(Deserialize, Default)]
struct JsonObjectGroup {
    #[serde(default)]
    objects: Vec<JsonObject>,
}

#[derive(Deserialize)]
struct JsonTile {
    id: u32,
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    imagewidth: u32,
    #[serde(default)]
    imageheight: u32,
    #[serde(default)]
    objectgroup: JsonObjectGroup,
}

/// Rotates `p` clockwise (y down) by `degrees` around `pivot`.
fn rotate_about(p: Vec2, pivot: Vec2, degrees: f32) -> Vec2 {
    pivot + Vec2::from_angle(degrees.to_radians()).rotate(p - pivot)
}

fn object_to_shape(obj: &JsonObject, tileset: &str, tile: u32) -> Result<CollisionShape, MapError> {
    let unsupported = |kind: &str| MapError::UnsupportedShape {
        tileset: tileset.to_owned(),
        tile,
        kind: kind.to_owned(),
    };
    let origin = vec2(obj.x, obj.y);

    if obj.point {
        return CollisionShape::point(obj.x, obj.y);
    }
    if !obj.polyline.is_empty() {
        return Err(unsupported("polyline"));
    }
    if obj.text.is_some() {
        return Err(unsupported("text"));
    }
    if !obj.polygon.is_empty() {
        let points = obj
            .polygon
            .iter()
            .map(|p| rotate_about(origin + vec2(p.x, p.y), origin, obj.rotation))
            .collect();
        return CollisionShape::polygon(points);
    }

    if obj.ellipse {
        warn!(
            tileset,
            tile,
            width = obj.width,
            height = obj.height,
            "approximating ellipse by its bounding rectangle"
        );
    }
    if obj.rotation == 0.0 {
        return CollisionShape::rectangle(obj.x, obj.y, obj.width, obj.height);
    }
    let corners = [
        origin,
        origin + vec2(obj.width, 0.0),
        origin + vec2(obj.width, obj.height),
        origin + vec2(0.0, obj.height),
    ];
    CollisionShape::polygon(
        corners
            .iter()
            .map(|c| rotate_about(*c, origin, obj.rotation))
            .collect(),
    )
}

/// `image_dir` is where the tileset's image paths are relative to, itself
/// relative to the map directory.
fn tileset_to_def(
    ext: ExternalTileset,
    fallback_name: &str,
    image_dir: &Path,
) -> Result<TilesetDef, MapError> {
    let name = if ext.name.is_empty() {
        fallback_name.to_owned()
    } else {
        ext.name
    };

    let mut tiles = Vec::with_capacity(ext.tiles.len());
    for tile in ext.tiles {
        let shapes = tile
            .objectgroup
            .objects
            .iter()
            .map(|obj| object_to_shape(obj, &name, tile.id))
            .collect::<Result<Vec<_>, _>>()?;
        tiles.push(TileDefinition {
            id: tile.id,
            image: tile.image.map(|image| ImageRef {
                path: image_dir.join(image),
                width: tile.imagewidth,
                height: tile.imageheight,
            }),
            shapes,
        });
    }

    let (kind, tile_count) = match ext.image {
        Some(image) if ext.columns > 0 => (
            TilesetKind::SheetGrid {
                image: ImageRef {
                    path: image_dir.join(image),
                    width: ext.imagewidth,
                    height: ext.imageheight,
                },
                columns: ext.columns,
                spacing: ext.spacing,
                margin: ext.margin,
            },
            ext.tilecount,
        ),
        Some(_) => {
            return Err(MapError::InvalidMap(format!(
                "tileset '{name}' has a sheet image but 0 columns"
            )))
        }
        // Image collections can have gaps in their ids after tiles are removed.
        None => {
            let span = tiles.iter().map(|t| t.id + 1).max().unwrap_or(0);
            (TilesetKind::PerTileImages, ext.tilecount.max(span))
        }
    };

    Ok(TilesetDef {
        name,
        tile_w: ext.tilewidth,
        tile_h: ext.tileheight,
        tile_count,
        kind,
        tiles,
    })
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, MapError> {
    let txt = std::fs::read_to_string(path).map_err(|source| MapError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&txt).map_err(|source| MapError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Decodes a standalone Tiled JSON tileset. Image paths stay relative to
/// the tileset's own directory.
pub fn decode_tileset_file(path: impl AsRef<Path>) -> Result<TilesetDef, MapError> {
    let path = path.as_ref();
    let ext: ExternalTileset = read_json(path)?;
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    tileset_to_def(ext, stem, Path::new(""))
}

fn flatten_layers(
    layers: Vec<JsonLayer>,
    parent_offset: Vec2,
    out: &mut Vec<IrLayer>,
) -> Result<(), MapError> {
    for l in layers {
        let offset = parent_offset + vec2(l.offsetx, l.offsety);
        let kind = match l.kind.as_deref().unwrap_or("tilelayer") {
            "tilelayer" => {
                if let Some(encoding) = l.encoding.as_deref().filter(|e| *e != "csv") {
                    return Err(MapError::InvalidMap(format!(
                        "layer '{}' uses {encoding} encoding; only csv arrays are read",
                        l.name
                    )));
                }
                IrLayerKind::Tiles {
                    width: l.width,
                    height: l.height,
                    data: l.data,
                }
            }
            "group" => {
                flatten_layers(l.layers, offset, out)?;
                continue;
            }
            other => IrLayerKind::Unsupported {
                kind: other.to_owned(),
            },
        };
        out.push(IrLayer {
            name: l.name,
            visible: l.visible,
            offset,
            kind,
        });
    }
    Ok(())
}

/// Decodes a Tiled JSON map and its tilesets. Returns the IR and the map's
/// directory, which every image path in the IR is relative to.
pub fn decode_map_file_to_ir(path: impl AsRef<Path>) -> Result<(IrMap, PathBuf), MapError> {
    let p = path.as_ref();
    if p.extension().and_then(|e| e.to_str()) != Some("json") {
        return Err(MapError::InvalidMap(format!(
            "Map file must be a JSON file: {}",
            p.display()
        )));
    }

    let j: JsonMap = read_json(p)?;
    if j.infinite {
        return Err(MapError::InvalidMap(format!(
            "{} is an infinite map; only fixed-size maps are supported",
            p.display()
        )));
    }

    let map_dir = p
        .parent()
        .map(|d| d.to_path_buf())
        .unwrap_or_else(|| PathBuf::from("./"));

    // Build IR tilesets
    let mut ir_tilesets = Vec::with_capacity(j.tilesets.len());
    for ts in j.tilesets {
        let def = match ts.source {
            Some(source) => {
                if !source.ends_with(".json") {
                    return Err(MapError::InvalidMap(format!(
                        "External tileset must be JSON: {source}"
                    )));
                }
                let rel = Path::new(&source);
                let ext: ExternalTileset = read_json(&map_dir.join(rel))?;
                let stem = rel
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or_default();
                tileset_to_def(ext, stem, rel.parent().unwrap_or(Path::new("")))?
            }
            None => {
                let ext: ExternalTileset = serde_json::from_value(JsonValue::Object(ts.inline))
                    .map_err(|source| MapError::Json {
                        path: p.to_path_buf(),
                        source,
                    })?;
                tileset_to_def(ext, "", Path::new(""))?
            }
        };
        debug!(
            tileset = %def.name,
            authored_first_gid = ts.firstgid,
            tile_count = def.tile_count,
            "decoded tileset"
        );
        ir_tilesets.push(IrTileset {
            authored_first_gid: ts.firstgid,
            def,
        });
    }

    ir_tilesets.sort_by_key(|t| t.authored_first_gid);

    let mut ir_layers = Vec::with_capacity(j.layers.len());
    flatten_layers(j.layers, Vec2::ZERO, &mut ir_layers)?;

    Ok((
        IrMap {
            tile_w: j.tilewidth,
            tile_h: j.tileheight,
            tilesets: ir_tilesets,
            layers: ir_layers,
        },
        map_dir,
    ))
}
