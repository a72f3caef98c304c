//! Per-tile collision primitives and the geometry tests run against them.

use std::collections::HashMap;

use macroquad::prelude::{vec2, Rect, Vec2};

use crate::error::MapError;
use crate::spatial::FlipFlags;
use crate::tileset::{TilesetId, TilesetRegistry};

const EDGE_EPSILON: f32 = 1e-4;

/// A collision primitive, either in tile-local pixels (origin at the tile's
/// top-left) or, after [`transform`], in map space.
#[derive(Debug, Clone, PartialEq)]
pub enum CollisionShape {
    Rectangle(Rect),
    /// Closed outline, at least three vertices, any winding.
    Polygon(Vec<Vec2>),
    Point(Vec2),
}

impl CollisionShape {
    pub fn rectangle(x: f32, y: f32, w: f32, h: f32) -> Result<Self, MapError> {
        if ![x, y, w, h].iter().all(|v| v.is_finite()) || w < 0.0 || h < 0.0 {
            return Err(MapError::InvalidShape(format!(
                "rectangle ({x}, {y}, {w}, {h})"
            )));
        }
        Ok(CollisionShape::Rectangle(Rect::new(x, y, w, h)))
    }

    pub fn polygon(points: Vec<Vec2>) -> Result<Self, MapError> {
        if points.len() < 3 {
            return Err(MapError::InvalidShape(format!(
                "polygon needs at least 3 vertices, got {}",
                points.len()
            )));
        }
        if !points.iter().all(|p| p.is_finite()) {
            return Err(MapError::InvalidShape("polygon vertex is not finite".into()));
        }
        Ok(CollisionShape::Polygon(points))
    }

    pub fn point(x: f32, y: f32) -> Result<Self, MapError> {
        if !(x.is_finite() && y.is_finite()) {
            return Err(MapError::InvalidShape(format!("point ({x}, {y})")));
        }
        Ok(CollisionShape::Point(vec2(x, y)))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            CollisionShape::Rectangle(_) => "rectangle",
            CollisionShape::Polygon(_) => "polygon",
            CollisionShape::Point(_) => "point",
        }
    }

    /// Axis-aligned bounds. A point has zero-sized bounds.
    pub fn bounds(&self) -> Rect {
        match self {
            CollisionShape::Rectangle(r) => *r,
            CollisionShape::Point(p) => Rect::new(p.x, p.y, 0.0, 0.0),
            CollisionShape::Polygon(points) => points_bounds(points),
        }
    }

    /// Strict containment: boundary points are outside. Points are discs of
    /// `point_radius`.
    pub fn contains_point(&self, p: Vec2, point_radius: f32) -> bool {
        match self {
            CollisionShape::Rectangle(r) => rect_strictly_contains(r, p),
            CollisionShape::Point(c) => (p - *c).length() < point_radius,
            CollisionShape::Polygon(points) => polygon_strictly_contains(points, p),
        }
    }

    /// True when the shape and `region` share interior area (touching edges
    /// do not count).
    pub fn overlaps_rect(&self, region: &Rect, point_radius: f32) -> bool {
        match self {
            CollisionShape::Rectangle(r) => rects_overlap(r, region),
            CollisionShape::Point(c) => {
                if point_radius == 0.0 {
                    return rect_strictly_contains(region, *c);
                }
                let nearest = vec2(
                    c.x.clamp(region.x, region.x + region.w),
                    c.y.clamp(region.y, region.y + region.h),
                );
                (nearest - *c).length() < point_radius
            }
            CollisionShape::Polygon(points) => polygon_overlaps_rect(points, region),
        }
    }

    /// Distance along a normalized ray to the first contact, `Some(0.0)` if
    /// the origin is already inside.
    pub fn ray_distance(&self, origin: Vec2, dir: Vec2, point_radius: f32) -> Option<f32> {
        match self {
            CollisionShape::Rectangle(r) => ray_rect(origin, dir, r),
            CollisionShape::Point(c) => ray_disc(origin, dir, *c, point_radius),
            CollisionShape::Polygon(points) => {
                if polygon_strictly_contains(points, origin) {
                    return Some(0.0);
                }
                edges(points)
                    .filter_map(|(a, b)| ray_segment(origin, dir, a, b))
                    .min_by(f32::total_cmp)
            }
        }
    }
}

/// Flips a tile-local point inside a `tile_size` tile.
///
/// The diagonal flag swaps the axes first (which also swaps the tile's
/// extents), then horizontal and vertical mirror about the tile center.
#[inline]
pub fn flip_point(p: Vec2, tile_size: Vec2, flip: FlipFlags) -> Vec2 {
    let (mut p, extent) = if flip.contains(FlipFlags::DIAGONAL) {
        (vec2(p.y, p.x), vec2(tile_size.y, tile_size.x))
    } else {
        (p, tile_size)
    };
    if flip.contains(FlipFlags::HORIZONTAL) {
        p.x = extent.x - p.x;
    }
    if flip.contains(FlipFlags::VERTICAL) {
        p.y = extent.y - p.y;
    }
    p
}

/// Maps a tile-local shape into map space: flip inside the tile, then
/// translate by the cell's world origin.
pub fn transform(
    shape: &CollisionShape,
    tile_size: Vec2,
    origin: Vec2,
    flip: FlipFlags,
) -> CollisionShape {
    let map = |p: Vec2| flip_point(p, tile_size, flip) + origin;
    match shape {
        CollisionShape::Rectangle(r) => {
            let a = map(vec2(r.x, r.y));
            let b = map(vec2(r.x + r.w, r.y + r.h));
            let min = a.min(b);
            let max = a.max(b);
            CollisionShape::Rectangle(Rect::new(min.x, min.y, max.x - min.x, max.y - min.y))
        }
        CollisionShape::Polygon(points) => {
            CollisionShape::Polygon(points.iter().map(|p| map(*p)).collect())
        }
        CollisionShape::Point(p) => CollisionShape::Point(map(*p)),
    }
}

struct TilesetShapes {
    tile_size: Vec2,
    by_tile: HashMap<u32, Vec<CollisionShape>>,
}

/// Read-only lookup of authored tile shapes, keyed by tileset and local ID.
///
/// Shapes are kept as an ordered multiset: duplicates authored on the same
/// tile stay duplicated.
pub struct ShapeLibrary {
    tilesets: Vec<TilesetShapes>,
}

impl ShapeLibrary {
    pub fn from_registry(registry: &TilesetRegistry) -> Self {
        let tilesets = registry
            .tilesets()
            .iter()
            .map(|ts| TilesetShapes {
                tile_size: ts.tile_size(),
                by_tile: ts
                    .tiles()
                    .filter(|def| !def.shapes.is_empty())
                    .map(|def| (def.id, def.shapes.clone()))
                    .collect(),
            })
            .collect();
        ShapeLibrary { tilesets }
    }

    /// Shapes of one tile in authored order; empty for passable tiles.
    pub fn shapes_for(&self, tileset: TilesetId, local_id: u32) -> &[CollisionShape] {
        self.tilesets
            .get(tileset.index())
            .and_then(|ts| ts.by_tile.get(&local_id))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn tile_size(&self, tileset: TilesetId) -> Option<Vec2> {
        self.tilesets.get(tileset.index()).map(|ts| ts.tile_size)
    }

    pub fn shape_count(&self) -> usize {
        self.tilesets
            .iter()
            .flat_map(|ts| ts.by_tile.values())
            .map(|shapes| shapes.len())
            .sum()
    }
}

#[inline]
fn rect_strictly_contains(r: &Rect, p: Vec2) -> bool {
    p.x > r.x && p.x < r.x + r.w && p.y > r.y && p.y < r.y + r.h
}

#[inline]
fn rects_overlap(a: &Rect, b: &Rect) -> bool {
    a.x < b.x + b.w && b.x < a.x + a.w && a.y < b.y + b.h && b.y < a.y + a.h
}

fn edges(points: &[Vec2]) -> impl Iterator<Item = (Vec2, Vec2)> + '_ {
    points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .map(|(a, b)| (*a, *b))
}

fn distance_to_segment(p: Vec2, a: Vec2, b: Vec2) -> f32 {
    let ab = b - a;
    let len2 = ab.length_squared();
    if len2 == 0.0 {
        return (p - a).length();
    }
    let t = ((p - a).dot(ab) / len2).clamp(0.0, 1.0);
    (p - (a + ab * t)).length()
}

fn polygon_strictly_contains(points: &[Vec2], p: Vec2) -> bool {
    if edges(points).any(|(a, b)| distance_to_segment(p, a, b) <= EDGE_EPSILON) {
        return false;
    }
    let mut inside = false;
    for (a, b) in edges(points) {
        if (a.y > p.y) != (b.y > p.y) {
            let x_at = a.x + (p.y - a.y) / (b.y - a.y) * (b.x - a.x);
            if p.x < x_at {
                inside = !inside;
            }
        }
    }
    inside
}

/// Liang-Barsky clip of segment `a..b` to `r`; true when part of the segment
/// runs through the open interior.
fn segment_crosses_rect(a: Vec2, b: Vec2, r: &Rect) -> bool {
    let d = b - a;
    let mut t0 = 0.0f32;
    let mut t1 = 1.0f32;
    let checks = [
        (-d.x, a.x - r.x),
        (d.x, r.x + r.w - a.x),
        (-d.y, a.y - r.y),
        (d.y, r.y + r.h - a.y),
    ];
    for (p, q) in checks {
        if p == 0.0 {
            if q < 0.0 {
                return false;
            }
            continue;
        }
        let t = q / p;
        if p < 0.0 {
            t0 = t0.max(t);
        } else {
            t1 = t1.min(t);
        }
        if t0 > t1 {
            return false;
        }
    }
    t0 < t1 && rect_strictly_contains(r, a + d * ((t0 + t1) * 0.5))
}

fn points_bounds(points: &[Vec2]) -> Rect {
    let mut min = Vec2::splat(f32::INFINITY);
    let mut max = Vec2::splat(f32::NEG_INFINITY);
    for p in points {
        min = min.min(*p);
        max = max.max(*p);
    }
    Rect::new(min.x, min.y, max.x - min.x, max.y - min.y)
}

fn polygon_overlaps_rect(points: &[Vec2], r: &Rect) -> bool {
    if !rects_overlap(&points_bounds(points), r) {
        return false;
    }
    if points.iter().any(|p| rect_strictly_contains(r, *p)) {
        return true;
    }
    if edges(points).any(|(a, b)| segment_crosses_rect(a, b, r)) {
        return true;
    }
    let corners = [
        vec2(r.x, r.y),
        vec2(r.x + r.w, r.y),
        vec2(r.x, r.y + r.h),
        vec2(r.x + r.w, r.y + r.h),
        vec2(r.x + r.w * 0.5, r.y + r.h * 0.5),
    ];
    corners
        .iter()
        .any(|c| polygon_strictly_contains(points, *c))
}

fn ray_rect(origin: Vec2, dir: Vec2, r: &Rect) -> Option<f32> {
    if rect_strictly_contains(r, origin) {
        return Some(0.0);
    }
    let mut t_near = f32::NEG_INFINITY;
    let mut t_far = f32::INFINITY;
    for (o, d, lo, hi) in [
        (origin.x, dir.x, r.x, r.x + r.w),
        (origin.y, dir.y, r.y, r.y + r.h),
    ] {
        if d == 0.0 {
            if o <= lo || o >= hi {
                return None;
            }
            continue;
        }
        let (a, b) = ((lo - o) / d, (hi - o) / d);
        t_near = t_near.max(a.min(b));
        t_far = t_far.min(a.max(b));
    }
    (t_near < t_far && t_near >= 0.0).then_some(t_near)
}

fn ray_segment(origin: Vec2, dir: Vec2, a: Vec2, b: Vec2) -> Option<f32> {
    let e = b - a;
    let denom = dir.perp_dot(e);
    if denom.abs() < f32::EPSILON {
        return None;
    }
    let w = a - origin;
    let t = w.perp_dot(e) / denom;
    let u = w.perp_dot(dir) / denom;
    (t >= 0.0 && (0.0..=1.0).contains(&u)).then_some(t)
}

fn ray_disc(origin: Vec2, dir: Vec2, center: Vec2, radius: f32) -> Option<f32> {
    if radius <= 0.0 {
        return None;
    }
    let m = origin - center;
    let c = m.length_squared() - radius * radius;
    if c < 0.0 {
        return Some(0.0);
    }
    let b = m.dot(dir);
    if b > 0.0 {
        return None;
    }
    let disc = b * b - c;
    if disc <= 0.0 {
        return None;
    }
    Some(-b - disc.sqrt())
}
