//! Read-only collision queries over a [`CollisionGeometry`] snapshot.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use macroquad::prelude::{vec2, Rect, Vec2};

use crate::compositor::{CollisionGeometry, PlacedShape, ShapeRef};
use crate::config::QueryConfig;
use crate::error::MapError;
use crate::spatial::BucketCoord;

/// Nearest contact found by [`CollisionQueryEngine::raycast`].
#[derive(Debug, Clone, PartialEq)]
pub struct RayHit {
    pub shape: Arc<PlacedShape>,
    pub distance: f32,
    pub point: Vec2,
}

/// Point, region and ray queries. Cheap to clone and safe to share across
/// threads; it never mutates the geometry.
#[derive(Clone)]
pub struct CollisionQueryEngine {
    geometry: Arc<CollisionGeometry>,
    config: QueryConfig,
}

impl CollisionQueryEngine {
    pub fn new(geometry: Arc<CollisionGeometry>, config: QueryConfig) -> Self {
        CollisionQueryEngine { geometry, config }
    }

    pub fn geometry(&self) -> &Arc<CollisionGeometry> {
        &self.geometry
    }

    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    /// Rings of neighbour buckets to inspect so no overhanging shape or
    /// point disc is missed.
    ///
    /// Never more than the grid's larger dimension: past that every bucket
    /// is already covered.
    fn reach(&self) -> i32 {
        let grid = self.geometry.grid();
        let cap = grid.width.max(grid.height);
        let disc = (self.config.point_radius / grid.tile_w.min(grid.tile_h))
            .ceil()
            .min(cap as f32) as u32;
        let reach = self
            .config
            .neighbor_reach
            .max(self.geometry.overhang().saturating_add(disc))
            .min(cap);
        i32::try_from(reach).unwrap_or(i32::MAX)
    }

    /// Shapes whose interior strictly contains `(x, y)`, ordered by
    /// [`ShapeRef`].
    pub fn query_point(&self, x: f32, y: f32) -> Result<Vec<Arc<PlacedShape>>, MapError> {
        let p = vec2(x, y);
        if !p.is_finite() {
            return Err(MapError::InvalidQuery(format!("point ({x}, {y})")));
        }
        let home = self.bucket_in_map(p)?;
        let reach = self.reach();

        let mut hits = Vec::new();
        for dy in -reach..=reach {
            for dx in -reach..=reach {
                let c = BucketCoord {
                    x: home.x + dx,
                    y: home.y + dy,
                };
                let Some(bucket) = self.geometry.index().read(c) else {
                    continue;
                };
                hits.extend(
                    bucket
                        .iter()
                        .filter(|s| s.shape.contains_point(p, self.config.point_radius))
                        .cloned(),
                );
            }
        }
        hits.sort_by_key(|s| s.id);
        Ok(hits)
    }

    /// Shapes sharing interior area with `region`, each reported once.
    ///
    /// A region partly off the map is fine; one entirely off it is an error.
    pub fn query_region(&self, region: Rect) -> Result<Vec<Arc<PlacedShape>>, MapError> {
        let finite = [region.x, region.y, region.w, region.h]
            .iter()
            .all(|v| v.is_finite());
        if !finite || region.w < 0.0 || region.h < 0.0 {
            return Err(MapError::InvalidQuery(format!("region {region:?}")));
        }

        let grid = *self.geometry.grid();
        let bounds = grid.world_bounds();
        let disjoint = region.x + region.w < bounds.x
            || region.x > bounds.x + bounds.w
            || region.y + region.h < bounds.y
            || region.y > bounds.y + bounds.h;
        if disjoint {
            let c = grid.world_to_bucket(vec2(region.x, region.y));
            return Err(self.out_of_bounds(c));
        }

        let min = vec2(region.x, region.y);
        let max = vec2(region.x + region.w, region.y + region.h);
        let mut hits: BTreeMap<ShapeRef, Arc<PlacedShape>> = BTreeMap::new();
        for c in grid.buckets_in_rect(min, max, self.reach()) {
            let Some(bucket) = self.geometry.index().read(c) else {
                continue;
            };
            for shape in bucket.iter() {
                if shape.shape.overlaps_rect(&region, self.config.point_radius) {
                    hits.entry(shape.id).or_insert_with(|| Arc::clone(shape));
                }
            }
        }
        Ok(hits.into_values().collect())
    }

    /// First shape hit by a ray from `origin` along `direction`, no farther
    /// than `max_distance`.
    ///
    /// Walks buckets in ray order and only stops once the best hit so far
    /// lies before the exit of the current bucket, so a nearer shape in the
    /// same step is never skipped.
    pub fn raycast(
        &self,
        origin: Vec2,
        direction: Vec2,
        max_distance: f32,
    ) -> Result<Option<RayHit>, MapError> {
        if !origin.is_finite() || !direction.is_finite() || direction.length_squared() == 0.0 {
            return Err(MapError::InvalidQuery(format!(
                "ray from {origin:?} towards {direction:?}"
            )));
        }
        if !max_distance.is_finite() || max_distance <= 0.0 {
            return Err(MapError::InvalidQuery(format!(
                "ray max distance {max_distance}"
            )));
        }

        let grid = *self.geometry.grid();
        let mut cell = self.bucket_in_map(origin)?;
        let dir = direction.normalize();
        let reach = self.reach();
        let radius = self.config.point_radius;

        let rel = origin - grid.offset;
        let (step_x, mut t_max_x, t_delta_x) = axis_setup(rel.x, dir.x, grid.tile_w, cell.x);
        let (step_y, mut t_max_y, t_delta_y) = axis_setup(rel.y, dir.y, grid.tile_h, cell.y);

        let mut tested: HashSet<BucketCoord> = HashSet::new();
        let mut best: Option<(f32, Arc<PlacedShape>)> = None;

        loop {
            let t_exit = t_max_x.min(t_max_y);

            for dy in -reach..=reach {
                for dx in -reach..=reach {
                    let c = BucketCoord {
                        x: cell.x + dx,
                        y: cell.y + dy,
                    };
                    if !tested.insert(c) {
                        continue;
                    }
                    let Some(bucket) = self.geometry.index().read(c) else {
                        continue;
                    };
                    for shape in bucket.iter() {
                        let Some(t) = shape.shape.ray_distance(origin, dir, radius) else {
                            continue;
                        };
                        if t > max_distance {
                            continue;
                        }
                        let closer = match &best {
                            None => true,
                            Some((bt, bs)) => t < *bt || (t == *bt && shape.id < bs.id),
                        };
                        if closer {
                            best = Some((t, Arc::clone(shape)));
                        }
                    }
                }
            }

            if matches!(&best, Some((bt, _)) if *bt <= t_exit) || t_exit > max_distance {
                break;
            }

            if t_max_x < t_max_y {
                cell.x += step_x;
                t_max_x += t_delta_x;
            } else {
                cell.y += step_y;
                t_max_y += t_delta_y;
            }

            let outside = cell.x < -reach
                || cell.y < -reach
                || cell.x >= (grid.width as i32).saturating_add(reach)
                || cell.y >= (grid.height as i32).saturating_add(reach);
            if outside {
                break;
            }
        }

        Ok(best.map(|(distance, shape)| RayHit {
            shape,
            distance,
            point: origin + dir * distance,
        }))
    }

    fn bucket_in_map(&self, p: Vec2) -> Result<BucketCoord, MapError> {
        let c = self.geometry.grid().world_to_bucket(p);
        if self.geometry.grid().contains_bucket(c) {
            Ok(c)
        } else {
            Err(self.out_of_bounds(c))
        }
    }

    fn out_of_bounds(&self, c: BucketCoord) -> MapError {
        let grid = self.geometry.grid();
        MapError::OutOfBounds {
            x: c.x.into(),
            y: c.y.into(),
            width: grid.width,
            height: grid.height,
        }
    }
}

/// Grid-walk parameters for one axis: step direction, ray distance to the
/// first bucket boundary, and distance between boundaries.
fn axis_setup(rel: f32, dir: f32, size: f32, cell: i32) -> (i32, f32, f32) {
    if dir > 0.0 {
        let next = (cell + 1) as f32 * size;
        (1, (next - rel) / dir, size / dir)
    } else if dir < 0.0 {
        let next = cell as f32 * size;
        (-1, (next - rel) / dir, -size / dir)
    } else {
        (0, f32::INFINITY, f32::INFINITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compositor::MapCompositor;
    use crate::layer::TileLayer;
    use crate::shapes::{CollisionShape, ShapeLibrary};
    use crate::spatial::{FlipFlags, Gid};
    use crate::tileset::{ImageRef, TileDefinition, TilesetDef, TilesetKind, TilesetRegistry};
    use std::path::PathBuf;

    const SOLID: u32 = 1;
    const LEDGE: u32 = 2;
    const SPIKE: u32 = 3;
    const MARKER: u32 = 4;
    const OVERHANG: u32 = 5;

    fn compositor(cells: &[(u32, u32, u32)]) -> MapCompositor {
        let rect = |x, y, w, h| CollisionShape::rectangle(x, y, w, h).expect("rect");
        let def = TilesetDef {
            name: "stone".into(),
            tile_w: 32,
            tile_h: 32,
            tile_count: 5,
            kind: TilesetKind::PerTileImages,
            tiles: (0..5)
                .map(|id| TileDefinition {
                    id,
                    image: Some(ImageRef {
                        path: format!("stone/{id:02}.png").into(),
                        width: 32,
                        height: 32,
                    }),
                    shapes: match id {
                        0 => vec![rect(0.0, 0.0, 32.0, 32.0)],
                        1 => vec![rect(0.0, 0.0, 32.0, 5.0), rect(28.0, 0.0, 4.0, 32.0)],
                        2 => vec![CollisionShape::polygon(vec![
                            vec2(0.0, 32.0),
                            vec2(16.0, 0.0),
                            vec2(32.0, 32.0),
                        ])
                        .expect("polygon")],
                        3 => vec![CollisionShape::point(16.0, 16.0).expect("point")],
                        _ => vec![rect(-8.0, 0.0, 16.0, 32.0)],
                    },
                })
                .collect(),
        };
        let assets: HashSet<PathBuf> = (0..5)
            .map(|id| PathBuf::from(format!("stone/{id:02}.png")))
            .collect();
        let registry = TilesetRegistry::load([def], &assets).expect("registry");
        let shapes = ShapeLibrary::from_registry(&registry);

        let mut layer = TileLayer::new("walls", 8, 8, 32, 32).expect("layer");
        for &(x, y, gid) in cells {
            layer.set(x, y, Gid(gid), FlipFlags::empty()).expect("in range");
        }
        MapCompositor::build(layer, Arc::new(registry), Arc::new(shapes)).expect("build")
    }

    fn ids(shapes: &[Arc<PlacedShape>]) -> Vec<ShapeRef> {
        shapes.iter().map(|s| s.id).collect()
    }

    #[test]
    fn point_inside_rectangle_hits_and_edge_misses() {
        let engine = compositor(&[(2, 3, SOLID)]).engine(QueryConfig::default());

        let hits = engine.query_point(80.0, 112.0).expect("on map");
        assert_eq!(ids(&hits), vec![ShapeRef { x: 2, y: 3, slot: 0 }]);

        assert!(engine.query_point(95.0, 96.0).expect("on map").is_empty());
        assert!(engine.query_point(96.0, 112.0).expect("on map").is_empty());
    }

    #[test]
    fn point_query_sees_overhang_from_neighbour() {
        let engine = compositor(&[(3, 0, OVERHANG)]).engine(QueryConfig::default());
        let hits = engine.query_point(92.0, 10.0).expect("on map");
        assert_eq!(ids(&hits), vec![ShapeRef { x: 3, y: 0, slot: 0 }]);
    }

    #[test]
    fn off_map_queries_are_errors() {
        let engine = compositor(&[(0, 0, SOLID)]).engine(QueryConfig::default());
        assert!(matches!(
            engine.query_point(-1.0, 5.0),
            Err(MapError::OutOfBounds { x: -1, y: 0, .. })
        ));
        assert!(matches!(engine.query_point(256.0, 5.0), Err(MapError::OutOfBounds { .. })));
        assert!(matches!(
            engine.query_point(f32::NAN, 5.0),
            Err(MapError::InvalidQuery(_))
        ));
        assert!(matches!(
            engine.query_region(Rect::new(300.0, 300.0, 10.0, 10.0)),
            Err(MapError::OutOfBounds { .. })
        ));
        assert!(matches!(
            engine.query_region(Rect::new(0.0, 0.0, -1.0, 10.0)),
            Err(MapError::InvalidQuery(_))
        ));
    }

    #[test]
    fn region_query_spans_buckets_and_dedupes() {
        let engine = compositor(&[(1, 1, SOLID), (2, 1, LEDGE), (5, 5, SOLID)])
            .engine(QueryConfig::default());

        let hits = engine
            .query_region(Rect::new(40.0, 34.0, 40.0, 10.0))
            .expect("on map");
        assert_eq!(
            ids(&hits),
            vec![
                ShapeRef { x: 1, y: 1, slot: 0 },
                ShapeRef { x: 2, y: 1, slot: 0 },
            ]
        );

        // Partly off the map is allowed.
        let hits = engine
            .query_region(Rect::new(-50.0, -50.0, 100.0, 100.0))
            .expect("overlaps map");
        assert_eq!(ids(&hits), vec![ShapeRef { x: 1, y: 1, slot: 0 }]);
    }

    #[test]
    fn region_query_uses_exact_polygon_test() {
        let engine = compositor(&[(0, 0, SPIKE)]).engine(QueryConfig::default());
        // Top-left corner of the cell is outside the triangle.
        assert!(engine
            .query_region(Rect::new(1.0, 1.0, 4.0, 4.0))
            .expect("on map")
            .is_empty());
        assert_eq!(
            engine
                .query_region(Rect::new(14.0, 20.0, 4.0, 4.0))
                .expect("on map")
                .len(),
            1
        );
    }

    #[test]
    fn raycast_reports_near_edge() {
        let engine = compositor(&[(4, 2, SOLID)]).engine(QueryConfig::default());
        let hit = engine
            .raycast(vec2(10.0, 80.0), vec2(1.0, 0.0), 500.0)
            .expect("valid ray")
            .expect("hits the solid cell");
        assert_eq!(hit.distance, 118.0);
        assert_eq!(hit.point, vec2(128.0, 80.0));
        assert_eq!(hit.shape.id, ShapeRef { x: 4, y: 2, slot: 0 });
    }

    #[test]
    fn raycast_respects_max_distance_and_misses() {
        let engine = compositor(&[(4, 2, SOLID)]).engine(QueryConfig::default());
        assert!(engine
            .raycast(vec2(10.0, 80.0), vec2(1.0, 0.0), 100.0)
            .expect("valid ray")
            .is_none());
        assert!(engine
            .raycast(vec2(10.0, 80.0), vec2(-1.0, 0.0), 500.0)
            .expect("valid ray")
            .is_none());
        assert!(matches!(
            engine.raycast(vec2(10.0, 80.0), Vec2::ZERO, 10.0),
            Err(MapError::InvalidQuery(_))
        ));
        assert!(matches!(
            engine.raycast(vec2(-10.0, 80.0), vec2(1.0, 0.0), 10.0),
            Err(MapError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn raycast_picks_nearest_shape_within_one_bucket() {
        // Ledge tile: top strip and right wall. A ray going down and to the
        // right from above the tile meets the top strip first.
        let engine = compositor(&[(2, 2, LEDGE)]).engine(QueryConfig::default());
        let hit = engine
            .raycast(vec2(66.0, 40.0), vec2(1.0, 1.0), 500.0)
            .expect("valid ray")
            .expect("hits");
        assert_eq!(hit.shape.id, ShapeRef { x: 2, y: 2, slot: 0 });
        assert!((hit.point.y - 64.0).abs() < 1e-3);
    }

    #[test]
    fn raycast_finds_overhang_before_owner_cell() {
        // The overhang reaches 8px into column 2 from column 3.
        let engine = compositor(&[(3, 1, OVERHANG)]).engine(QueryConfig::default());
        let hit = engine
            .raycast(vec2(5.0, 40.0), vec2(1.0, 0.0), 500.0)
            .expect("valid ray")
            .expect("hits");
        assert_eq!(hit.distance, 83.0);
    }

    #[test]
    fn vertical_ray_and_origin_inside_shape() {
        let engine = compositor(&[(1, 5, SOLID)]).engine(QueryConfig::default());
        let hit = engine
            .raycast(vec2(48.0, 2.0), vec2(0.0, 3.0), 500.0)
            .expect("valid ray")
            .expect("hits");
        assert_eq!(hit.distance, 158.0);

        let inside = engine
            .raycast(vec2(48.0, 170.0), vec2(0.0, -1.0), 10.0)
            .expect("valid ray")
            .expect("origin is inside");
        assert_eq!(inside.distance, 0.0);
    }

    #[test]
    fn point_shapes_are_hit_as_discs() {
        let engine = compositor(&[(0, 0, MARKER)])
            .engine(QueryConfig::default().with_point_radius(2.0));
        assert_eq!(engine.query_point(17.0, 16.0).expect("on map").len(), 1);
        let hit = engine
            .raycast(vec2(16.0, 100.0), vec2(0.0, -1.0), 200.0)
            .expect("valid ray")
            .expect("hits the marker");
        assert_eq!(hit.distance, 82.0);
    }

    #[test]
    fn emptied_cell_disappears_from_queries() {
        let mut compositor = compositor(&[(2, 3, SOLID)]);
        let engine = compositor.engine(QueryConfig::default());
        assert_eq!(engine.query_point(80.0, 112.0).expect("on map").len(), 1);

        compositor
            .set_tile(2, 3, Gid::EMPTY, FlipFlags::empty())
            .expect("in range");
        assert!(engine.query_point(80.0, 112.0).expect("on map").is_empty());
        assert!(engine
            .raycast(vec2(10.0, 112.0), vec2(1.0, 0.0), 500.0)
            .expect("valid ray")
            .is_none());
    }

    #[test]
    fn readers_see_whole_buckets_during_rebuilds() {
        let mut compositor = compositor(&[(2, 3, SOLID)]);
        let engine = compositor.engine(QueryConfig::default());

        std::thread::scope(|scope| {
            for _ in 0..4 {
                let engine = engine.clone();
                scope.spawn(move || {
                    for _ in 0..500 {
                        let hits = engine.query_point(80.0, 112.0).expect("on map");
                        assert!(hits.len() <= 1);
                        let region = engine
                            .query_region(Rect::new(0.0, 0.0, 256.0, 256.0))
                            .expect("on map");
                        assert!(region.len() <= 2);
                    }
                });
            }

            for i in 0..200 {
                let gid = if i % 2 == 0 { Gid::EMPTY } else { Gid(LEDGE) };
                compositor
                    .set_tile(2, 3, gid, FlipFlags::empty())
                    .expect("resolvable");
            }
        });

        // Last write was the ledge tile.
        assert_eq!(compositor.geometry().shapes_in_cell(2, 3).expect("in range").len(), 2);
    }

    #[test]
    fn far_off_region_corners_still_clip_to_map() {
        let engine = compositor(&[(2, 3, SOLID)]).engine(QueryConfig::default());
        let hits = engine
            .query_region(Rect::new(-1e30, -1e30, 2e30, 2e30))
            .expect("covers the map");
        assert_eq!(ids(&hits), vec![ShapeRef { x: 2, y: 3, slot: 0 }]);
    }

    #[test]
    fn oversized_reach_settings_still_find_shapes() {
        let config = QueryConfig::default()
            .with_point_radius(1e11)
            .validate()
            .expect("finite radius");
        let engine = compositor(&[(1, 1, SOLID)]).engine(config);
        assert_eq!(engine.query_point(48.0, 48.0).expect("on map").len(), 1);
        assert!(engine
            .raycast(vec2(5.0, 48.0), vec2(1.0, 0.0), 500.0)
            .expect("valid ray")
            .is_some());

        let engine = compositor(&[(1, 1, SOLID)])
            .engine(QueryConfig::default().with_neighbor_reach(u32::MAX));
        assert_eq!(engine.query_point(48.0, 48.0).expect("on map").len(), 1);
    }
}
