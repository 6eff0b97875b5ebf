use std::f64::consts::PI;

use serde::Deserialize;

use crate::data::osm::Point;
use crate::errors::{Error, ErrorKind, Result};

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Geographic admission filter; bounds are inclusive.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct Limits {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            min_lat: -90.0,
            max_lat: 90.0,
            min_lon: -180.0,
            max_lon: 180.0,
        }
    }
}

impl Limits {
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        lat >= self.min_lat && lat <= self.max_lat && lon >= self.min_lon && lon <= self.max_lon
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_abs_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    fn around(point: &Point) -> Self {
        BoundingBox {
            min_lat: point.lat,
            max_lat: point.lat,
            min_abs_lat: point.lat.abs(),
            min_lon: point.lon,
            max_lon: point.lon,
        }
    }

    fn widen(&mut self, point: &Point) {
        self.min_lat = self.min_lat.min(point.lat);
        self.max_lat = self.max_lat.max(point.lat);
        self.min_abs_lat = self.min_abs_lat.min(point.lat.abs());
        self.min_lon = self.min_lon.min(point.lon);
        self.max_lon = self.max_lon.max(point.lon);
    }

    /// Equirectangular approximation of the east-west extent, measured at
    /// the latitude closest to the equator.
    pub fn horizontal_span_m(&self) -> f64 {
        (self.min_abs_lat * PI / 180.0).cos() * EARTH_RADIUS_M * (self.max_lon - self.min_lon) * PI / 180.0
    }

    pub fn vertical_span_m(&self) -> f64 {
        EARTH_RADIUS_M * (self.max_lat - self.min_lat) * PI / 180.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CanvasSize {
    /// Area available to projected coordinates.
    pub drawable_width: f64,
    pub drawable_height: f64,
    /// Surface size, drawable area plus the margin on every edge.
    pub width: i32,
    pub height: i32,
}

/// Maps geographic coordinates onto a raster whose aspect ratio follows the
/// real-world extent of every point added.
#[derive(Debug, Clone)]
pub struct GeoProjector {
    nominal_size: u32,
    margin: u32,
    bounds: Option<BoundingBox>,
}

impl GeoProjector {
    pub fn new(nominal_size: u32, margin: u32) -> Self {
        GeoProjector {
            nominal_size,
            margin,
            bounds: None,
        }
    }

    pub fn add_point(&mut self, point: &Point) {
        self.bounds = Some(match self.bounds {
            Some(mut bounds) => {
                bounds.widen(point);
                bounds
            },
            None => BoundingBox::around(point),
        });
    }

    pub fn bounds(&self) -> Option<BoundingBox> {
        self.bounds
    }

    /// Horizontal over vertical span. `None` when either span is zero or no
    /// point was added.
    pub fn ratio(&self) -> Option<f64> {
        let bounds = self.bounds?;
        let horizontal = bounds.horizontal_span_m();
        let vertical = bounds.vertical_span_m();
        if horizontal > 0.0 && vertical > 0.0 {
            Some(horizontal / vertical)
        } else {
            None
        }
    }

    pub fn canvas_size(&self) -> CanvasSize {
        let side = (self.nominal_size as f64 - 2.0 * self.margin as f64).max(1.0);
        let (drawable_width, drawable_height) = match (self.ratio(), self.bounds) {
            (Some(ratio), _) if ratio >= 1.0 => (side, side / ratio),
            (Some(ratio), _) => (side * ratio, side),
            // A dataset spread along a single meridian or parallel.
            (None, Some(bounds)) if bounds.vertical_span_m() > 0.0 => (1.0, side),
            (None, Some(bounds)) if bounds.horizontal_span_m() > 0.0 => (side, 1.0),
            (None, _) => (side, side),
        };
        let drawable_width = drawable_width.max(1.0);
        let drawable_height = drawable_height.max(1.0);
        CanvasSize {
            drawable_width,
            drawable_height,
            width: (drawable_width + 2.0 * self.margin as f64).ceil() as i32,
            height: (drawable_height + 2.0 * self.margin as f64).ceil() as i32,
        }
    }

    /// Raster coordinate of `point`, origin top-left, north up.
    ///
    /// An axis without extent maps to the middle of the drawable area.
    pub fn to_raster(&self, point: &Point, canvas: &CanvasSize) -> Result<(f32, f32)> {
        let bounds = self.bounds.ok_or_else(|| {
            Error::new(ErrorKind::ProjectorNotReady, "No point was added to the projector")
        })?;
        let margin = self.margin as f64;

        let lon_span = bounds.max_lon - bounds.min_lon;
        let x = if lon_span > 0.0 {
            (point.lon - bounds.min_lon) * canvas.drawable_width / lon_span + margin
        } else {
            canvas.drawable_width / 2.0 + margin
        };

        let lat_span = bounds.max_lat - bounds.min_lat;
        let y_from_bottom = if lat_span > 0.0 {
            (point.lat - bounds.min_lat) * canvas.drawable_height / lat_span + margin
        } else {
            canvas.drawable_height / 2.0 + margin
        };
        let y = canvas.height as f64 - y_from_bottom;

        Ok((x as f32, y as f32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::osm::tests::point;

    fn projector_over(points: &[Point]) -> GeoProjector {
        let mut projector = GeoProjector::new(1000, 50);
        for point in points {
            projector.add_point(point);
        }
        projector
    }

    #[test]
    fn bounds_contain_every_point() {
        let points: Vec<Point> = (0..50)
            .map(|i| point(i, -30.0 + (i * 7 % 13) as f64, 100.0 - (i * 11 % 17) as f64))
            .collect();
        let projector = projector_over(&points);
        let bounds = projector.bounds().unwrap();
        for p in &points {
            assert!(bounds.min_lat <= p.lat && p.lat <= bounds.max_lat);
            assert!(bounds.min_lon <= p.lon && p.lon <= bounds.max_lon);
            assert!(bounds.min_abs_lat <= p.lat.abs());
        }
    }

    #[test]
    fn bounds_only_widen() {
        let mut projector = projector_over(&[point(1, 10.0, 10.0), point(2, 20.0, 20.0)]);
        let before = projector.bounds().unwrap();
        projector.add_point(&point(3, 15.0, 15.0));
        assert_eq!(projector.bounds().unwrap(), before);
        projector.add_point(&point(4, 5.0, 25.0));
        let after = projector.bounds().unwrap();
        assert_eq!(after.min_lat, 5.0);
        assert_eq!(after.max_lon, 25.0);
        assert_eq!(after.max_lat, 20.0);
    }

    #[test]
    fn wide_extent_fills_width() {
        // One degree of latitude against four of longitude at the equator.
        let projector = projector_over(&[point(1, 0.0, 0.0), point(2, 1.0, 4.0)]);
        let ratio = projector.ratio().unwrap();
        assert!((ratio - 4.0).abs() < 1e-9);

        let canvas = projector.canvas_size();
        assert_eq!(canvas.drawable_width, 900.0);
        assert!((canvas.drawable_height - 900.0 / ratio).abs() < 1e-9);
        assert_eq!(canvas.width, 1000);
        assert_eq!(canvas.height, (900.0 / ratio + 100.0).ceil() as i32);
    }

    #[test]
    fn tall_extent_fills_height() {
        let projector = projector_over(&[point(1, 40.0, 0.0), point(2, 50.0, 1.0)]);
        let canvas = projector.canvas_size();
        assert_eq!(canvas.drawable_height, 900.0);
        assert!(canvas.drawable_width < 900.0);
        assert!(canvas.width <= 1000);
    }

    #[test]
    fn corners_land_inside_the_margin() {
        let sw = point(1, 40.0, -5.0);
        let ne = point(2, 45.0, 5.0);
        let projector = projector_over(&[sw.clone(), ne.clone()]);
        let canvas = projector.canvas_size();

        let (x0, y0) = projector.to_raster(&sw, &canvas).unwrap();
        let (x1, y1) = projector.to_raster(&ne, &canvas).unwrap();
        assert!((x0 - 50.0).abs() < 1e-3);
        assert!((y1 - 50.0).abs() < 1.0);
        assert!((x1 as f64 - (50.0 + canvas.drawable_width)).abs() < 1e-3);
        assert!((y0 as f64 - (canvas.height as f64 - 50.0)).abs() < 1e-3);
        assert!(y0 > y1, "north must be up");
    }

    #[test]
    fn single_point_maps_to_center() {
        let only = point(1, 48.2, 16.4);
        let projector = projector_over(&[only.clone()]);
        assert!(projector.ratio().is_none());

        let canvas = projector.canvas_size();
        assert_eq!((canvas.width, canvas.height), (1000, 1000));
        let (x, y) = projector.to_raster(&only, &canvas).unwrap();
        assert_eq!((x, y), (500.0, 500.0));
    }

    #[test]
    fn single_meridian_dataset_does_not_divide_by_zero() {
        let projector = projector_over(&[point(1, 10.0, 3.0), point(2, 12.0, 3.0)]);
        let canvas = projector.canvas_size();
        assert_eq!(canvas.drawable_height, 900.0);
        let (x, y) = projector.to_raster(&point(1, 10.0, 3.0), &canvas).unwrap();
        assert!(x.is_finite() && y.is_finite());
    }

    #[test]
    fn empty_projector_is_not_ready() {
        let projector = GeoProjector::new(1000, 50);
        let canvas = projector.canvas_size();
        let err = projector.to_raster(&point(1, 0.0, 0.0), &canvas).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ProjectorNotReady);
    }
}
