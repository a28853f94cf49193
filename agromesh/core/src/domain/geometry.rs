// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Geospatial Value Objects
//!
//! WGS84 polygon handling for field boundaries: topology validation,
//! geodesic area, and interior representative points.
//!
//! Polygons are opaque value objects; nothing outside this module needs to
//! know how area or centroids are computed. The store persists them as
//! serialized JSON.

use serde::{Deserialize, Serialize};

/// Mean Earth radius in meters (WGS84 authalic sphere).
const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Default cap on boundary vertex count. Mobile clients simplify traced
/// boundaries before upload; anything larger is a malformed payload.
pub const DEFAULT_MAX_VERTICES: usize = 1_000;

/// A WGS84 coordinate, longitude first.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub lon: f64,
    pub lat: f64,
}

impl Point {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }

    fn in_bounds(&self) -> bool {
        (-180.0..=180.0).contains(&self.lon) && (-90.0..=90.0).contains(&self.lat)
    }
}

/// A simple polygon (single exterior ring) in WGS84.
///
/// The ring may be supplied open or closed; [`Polygon::new`] normalizes by
/// dropping a closing vertex equal to the first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    pub exterior: Vec<Point>,
}

/// Geometry failures surfaced by validation and derivation.
#[derive(Debug, thiserror::Error)]
pub enum GeometryError {
    #[error("invalid geometry: {0}")]
    Invalid(String),

    #[error("coordinate out of bounds: ({lon}, {lat})")]
    OutOfBounds { lon: f64, lat: f64 },
}

impl Polygon {
    pub fn new(mut exterior: Vec<Point>) -> Self {
        if exterior.len() > 1 && exterior.first() == exterior.last() {
            exterior.pop();
        }
        Self { exterior }
    }

    /// Validate ring topology against the rules in the sync contract:
    /// non-empty, at least three distinct vertices, all coordinates inside
    /// WGS84 bounds, vertex count under `max_vertices`, and no
    /// self-intersection.
    pub fn validate(&self, max_vertices: usize) -> Result<(), GeometryError> {
        if self.exterior.is_empty() {
            return Err(GeometryError::Invalid("empty polygon".to_string()));
        }
        if self.exterior.len() > max_vertices {
            return Err(GeometryError::Invalid(format!(
                "polygon has {} vertices, limit is {}",
                self.exterior.len(),
                max_vertices
            )));
        }
        for p in &self.exterior {
            if !p.lon.is_finite() || !p.lat.is_finite() {
                return Err(GeometryError::Invalid("non-finite coordinate".to_string()));
            }
            if !p.in_bounds() {
                return Err(GeometryError::OutOfBounds { lon: p.lon, lat: p.lat });
            }
        }
        if self.exterior.len() < 3 {
            return Err(GeometryError::Invalid(
                "polygon needs at least three vertices".to_string(),
            ));
        }
        for w in self.exterior.windows(2) {
            if w[0] == w[1] {
                return Err(GeometryError::Invalid(
                    "repeated consecutive vertex".to_string(),
                ));
            }
        }
        if self.is_self_intersecting() {
            return Err(GeometryError::Invalid("self-intersecting ring".to_string()));
        }
        Ok(())
    }

    /// Geodesic area in hectares, via spherical-excess summation over the
    /// closed ring. Accurate to well under 1e-4 ha for field-sized parcels.
    pub fn area_hectares(&self) -> f64 {
        let n = self.exterior.len();
        if n < 3 {
            return 0.0;
        }
        let mut total = 0.0f64;
        for i in 0..n {
            let p1 = self.exterior[i];
            let p2 = self.exterior[(i + 1) % n];
            total += (p2.lon.to_radians() - p1.lon.to_radians())
                * (2.0 + p1.lat.to_radians().sin() + p2.lat.to_radians().sin());
        }
        let area_m2 = (total * EARTH_RADIUS_M * EARTH_RADIUS_M / 2.0).abs();
        area_m2 / 10_000.0
    }

    /// A representative point guaranteed to lie inside the ring.
    ///
    /// The vertex-average centroid is used when it falls inside; for
    /// concave rings where it does not, the midpoint of the widest interior
    /// span at the centroid's latitude is taken instead.
    pub fn representative_point(&self) -> Point {
        if self.exterior.is_empty() {
            return Point::new(0.0, 0.0);
        }
        let n = self.exterior.len() as f64;
        let centroid = Point::new(
            self.exterior.iter().map(|p| p.lon).sum::<f64>() / n,
            self.exterior.iter().map(|p| p.lat).sum::<f64>() / n,
        );
        if self.contains(&centroid) {
            return centroid;
        }
        // Scanline at the centroid latitude; nudge once if the line grazes
        // a vertex and produces an odd crossing count.
        for nudge in [0.0, 1e-9] {
            if let Some(p) = self.widest_span_midpoint(centroid.lat + nudge) {
                return p;
            }
        }
        centroid
    }

    /// Even-odd ray cast. An empty ring contains nothing.
    pub fn contains(&self, point: &Point) -> bool {
        let n = self.exterior.len();
        if n == 0 {
            return false;
        }
        let mut inside = false;
        let mut j = n - 1;
        for i in 0..n {
            let a = self.exterior[i];
            let b = self.exterior[j];
            if (a.lat > point.lat) != (b.lat > point.lat) {
                let x = a.lon + (point.lat - a.lat) * (b.lon - a.lon) / (b.lat - a.lat);
                if point.lon < x {
                    inside = !inside;
                }
            }
            j = i;
        }
        inside
    }

    fn widest_span_midpoint(&self, lat: f64) -> Option<Point> {
        let n = self.exterior.len();
        let mut xs = Vec::new();
        for i in 0..n {
            let a = self.exterior[i];
            let b = self.exterior[(i + 1) % n];
            if (a.lat > lat) != (b.lat > lat) {
                xs.push(a.lon + (lat - a.lat) * (b.lon - a.lon) / (b.lat - a.lat));
            }
        }
        if xs.len() < 2 || xs.len() % 2 != 0 {
            return None;
        }
        xs.sort_by(|a, b| a.total_cmp(b));
        let mut best: Option<(f64, f64)> = None;
        for pair in xs.chunks_exact(2) {
            let width = pair[1] - pair[0];
            if best.map(|(w, _)| width > w).unwrap_or(true) {
                best = Some((width, (pair[0] + pair[1]) / 2.0));
            }
        }
        best.map(|(_, mid)| Point::new(mid, lat))
    }

    fn is_self_intersecting(&self) -> bool {
        let n = self.exterior.len();
        for i in 0..n {
            for j in (i + 1)..n {
                // Skip adjacent edges (they share an endpoint).
                if j == i + 1 || (i == 0 && j == n - 1) {
                    continue;
                }
                let (a1, a2) = (self.exterior[i], self.exterior[(i + 1) % n]);
                let (b1, b2) = (self.exterior[j], self.exterior[(j + 1) % n]);
                if segments_intersect(a1, a2, b1, b2) {
                    return true;
                }
            }
        }
        false
    }
}

fn orientation(a: Point, b: Point, c: Point) -> f64 {
    (b.lon - a.lon) * (c.lat - a.lat) - (b.lat - a.lat) * (c.lon - a.lon)
}

fn on_segment(a: Point, b: Point, p: Point) -> bool {
    p.lon >= a.lon.min(b.lon)
        && p.lon <= a.lon.max(b.lon)
        && p.lat >= a.lat.min(b.lat)
        && p.lat <= a.lat.max(b.lat)
}

fn segments_intersect(a1: Point, a2: Point, b1: Point, b2: Point) -> bool {
    let d1 = orientation(a1, a2, b1);
    let d2 = orientation(a1, a2, b2);
    let d3 = orientation(b1, b2, a1);
    let d4 = orientation(b1, b2, a2);

    if ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
    {
        return true;
    }
    (d1 == 0.0 && on_segment(a1, a2, b1))
        || (d2 == 0.0 && on_segment(a1, a2, b2))
        || (d3 == 0.0 && on_segment(b1, b2, a1))
        || (d4 == 0.0 && on_segment(b1, b2, a2))
}
