use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Everything that can go wrong while loading tilesets, composing a layer or
/// querying collision geometry.
#[derive(Debug, Error)]
pub enum MapError {
    /// A tileset declared two tiles with the same local ID.
    #[error("tileset '{tileset}' declares tile {id} more than once")]
    DuplicateTileId {
        /// Tileset name.
        tileset: String,
        /// Local tile ID that appeared twice.
        id: u32,
    },

    /// A tile or sheet image is not present in the asset catalog.
    #[error("tileset '{tileset}' references missing image {}", path.display())]
    MissingImage {
        /// Tileset name.
        tileset: String,
        /// Image path as authored.
        path: PathBuf,
    },

    /// A tile definition uses a local ID outside `[0, tile_count)`.
    #[error("tileset '{tileset}' declares tile {id} but only has {tile_count} tiles")]
    TileIdOutOfRange {
        /// Tileset name.
        tileset: String,
        /// Offending local ID.
        id: u32,
        /// Declared tile count.
        tile_count: u32,
    },

    /// GID 0 or a GID past the last registered tileset.
    #[error("gid {gid} does not belong to any tileset (max gid {max_gid})")]
    InvalidGid {
        /// Flag-free GID that failed to resolve.
        gid: u32,
        /// Highest GID the registry can resolve.
        max_gid: u32,
    },

    /// Grid or world coordinate outside the layer.
    #[error("({x}, {y}) is outside the {width}x{height} layer")]
    OutOfBounds {
        /// Column (or world x, truncated, for queries).
        x: i64,
        /// Row (or world y, truncated, for queries).
        y: i64,
        /// Layer width in cells.
        width: u32,
        /// Layer height in cells.
        height: u32,
    },

    /// An occupied cell references a GID the registry cannot resolve.
    #[error("cell ({x}, {y}) references an unresolvable tile")]
    UnresolvedGid {
        /// Column of the cell.
        x: u32,
        /// Row of the cell.
        y: u32,
        /// The registry's resolution failure.
        #[source]
        source: Box<MapError>,
    },

    /// Authored collision geometry that cannot be represented.
    #[error("invalid collision shape: {0}")]
    InvalidShape(String),

    /// Authored collision geometry of a kind the engine does not support.
    #[error("unsupported collision shape '{kind}' on tile {tile} of tileset '{tileset}'")]
    UnsupportedShape {
        /// Tileset name.
        tileset: String,
        /// Local tile ID.
        tile: u32,
        /// Tiled object kind.
        kind: String,
    },

    /// Query arguments that cannot describe a place on the map.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Configuration that failed to parse or validate.
    #[error("invalid config: {0}")]
    Config(String),

    /// Structurally invalid map or tileset data.
    #[error("invalid map: {0}")]
    InvalidMap(String),

    /// Reading a map or tileset file failed.
    #[error("failed to read {}", path.display())]
    Io {
        /// File that could not be read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// A map or tileset file is not valid JSON for its schema.
    #[error("failed to parse {}", path.display())]
    Json {
        /// File that failed to parse.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },
}
