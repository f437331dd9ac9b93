//! Point-in-polygon mapping of vehicle positions to named city regions.

use std::path::Path;

use geo::{Contains, LineString, Point, Polygon};

use crate::reference::{self, ReferenceError};

struct Region {
    name: String,
    polygon: Polygon<f64>,
}

/// The region polygons of one run.
///
/// Rebuilt from disk every run, so edits to the region file land on the next
/// cycle without any cross-process signalling.
pub struct RegionIndex {
    regions: Vec<Region>,
}

impl RegionIndex {
    /// Load the region file from the static directory.
    pub fn load(static_dir: &Path) -> Result<Self, ReferenceError> {
        Ok(Self::from_bounds(reference::region_bounds(static_dir)?))
    }

    /// Build the index from name → boundary ring pairs. Rings are closed
    /// automatically; the pairs keep the file's `(lat, lon)` axis order.
    pub fn from_bounds(bounds: impl IntoIterator<Item = (String, Vec<(f64, f64)>)>) -> Self {
        let mut regions: Vec<Region> = bounds
            .into_iter()
            .map(|(name, ring)| Region {
                name,
                polygon: Polygon::new(LineString::from(ring), vec![]),
            })
            .collect();
        regions.sort_by(|a, b| a.name.cmp(&b.name));
        Self { regions }
    }

    /// Names of every region strictly containing the point.
    ///
    /// Containment is boundary-exclusive: a vehicle exactly on a shared
    /// border belongs to neither side. Zero, one or several matches are all
    /// legal and callers must preserve the multiplicity.
    pub fn locate(&self, latitude: f64, longitude: f64) -> Vec<&str> {
        let point = Point::new(latitude, longitude);
        self.regions
            .iter()
            .filter(|r| r.polygon.contains(&point))
            .map(|r| r.name.as_str())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_square(name: &str) -> (String, Vec<(f64, f64)>) {
        (
            name.to_string(),
            vec![(0.0, 0.0), (0.0, 1.0), (1.0, 1.0), (1.0, 0.0)],
        )
    }

    #[test]
    fn test_locate_inside_and_outside() {
        let index = RegionIndex::from_bounds([unit_square("Center")]);
        assert_eq!(index.locate(0.5, 0.5), vec!["Center"]);
        assert!(index.locate(2.0, 2.0).is_empty());
    }

    #[test]
    fn test_boundary_is_outside() {
        let index = RegionIndex::from_bounds([unit_square("Center")]);
        assert!(index.locate(0.0, 0.5).is_empty());
        assert!(index.locate(1.0, 1.0).is_empty());
    }

    #[test]
    fn test_overlapping_regions_both_match() {
        let wide = (
            "Wide".to_string(),
            vec![(-1.0, -1.0), (-1.0, 2.0), (2.0, 2.0), (2.0, -1.0)],
        );
        let index = RegionIndex::from_bounds([unit_square("Center"), wide]);
        let hits = index.locate(0.5, 0.5);
        assert_eq!(hits, vec!["Center", "Wide"]);
    }

    #[test]
    fn test_empty_index() {
        let index = RegionIndex::from_bounds([]);
        assert!(index.is_empty());
        assert!(index.locate(0.5, 0.5).is_empty());
    }
}
