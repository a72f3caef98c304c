use serde::Deserialize;

use crate::error::MapError;

fn default_reach() -> u32 {
    1
}

fn default_point_radius() -> f32 {
    0.5
}

/// Tuning for [`CollisionQueryEngine`](crate::CollisionQueryEngine).
///
/// ```json
/// { "neighbor_reach": 1, "point_radius": 0.5 }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct QueryConfig {
    /// Minimum rings of neighbouring buckets inspected around every visited
    /// bucket. Raised automatically when authored shapes overhang further.
    #[serde(default = "default_reach")]
    pub neighbor_reach: u32,
    /// Radius in pixels given to point shapes.
    #[serde(default = "default_point_radius")]
    pub point_radius: f32,
}

impl Default for QueryConfig {
    fn default() -> Self {
        QueryConfig {
            neighbor_reach: default_reach(),
            point_radius: default_point_radius(),
        }
    }
}

impl QueryConfig {
    pub fn from_json_str(json: &str) -> Result<Self, MapError> {
        let config: QueryConfig =
            serde_json::from_str(json).map_err(|e| MapError::Config(e.to_string()))?;
        config.validate()
    }

    pub fn with_neighbor_reach(mut self, reach: u32) -> Self {
        self.neighbor_reach = reach;
        self
    }

    pub fn with_point_radius(mut self, radius: f32) -> Self {
        self.point_radius = radius;
        self
    }

    pub fn validate(self) -> Result<Self, MapError> {
        if !self.point_radius.is_finite() || self.point_radius < 0.0 {
            return Err(MapError::Config(format!(
                "point_radius must be a finite non-negative number, got {}",
                self.point_radius
            )));
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config = QueryConfig::from_json_str(r#"{ "point_radius": 2.0 }"#).expect("parse");
        assert_eq!(config.neighbor_reach, 1);
        assert_eq!(config.point_radius, 2.0);
        assert_eq!(QueryConfig::from_json_str("{}").expect("parse"), QueryConfig::default());
    }

    #[test]
    fn negative_radius_is_rejected() {
        let err = QueryConfig::from_json_str(r#"{ "point_radius": -1 }"#).unwrap_err();
        assert!(matches!(err, MapError::Config(_)));
        assert!(QueryConfig::default().with_point_radius(f32::NAN).validate().is_err());
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        assert!(matches!(
            QueryConfig::from_json_str("{ nope"),
            Err(MapError::Config(_))
        ));
    }
}
