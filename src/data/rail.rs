use std::collections::HashMap;

use super::osm::{OsmId, WayCandidate};

/// Band a parsed gauge is clamped to before it widens the statistics, in mm.
pub const GAUGE_BAND: (f64, f64) = (800.0, 1700.0);
/// Band for `maxspeed`, in km/h.
pub const SPEED_BAND: (f64, f64) = (10.0, 400.0);

#[derive(rkyv::Archive, rkyv::Deserialize, rkyv::Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[archive(check_bytes)]
pub enum Category {
    Unknown,
    Rail,
    Bridge,
    Station,
    Tram,
    Subway,
    LightRail,
    Monorail,
    Goods,
}

impl Category {
    pub fn from_railway(value: &str) -> Category {
        match value {
            "rail" => Category::Rail,
            "bridge" => Category::Bridge,
            "goods" => Category::Goods,
            "light_rail" => Category::LightRail,
            "monorail" => Category::Monorail,
            "subway" => Category::Subway,
            "tram" => Category::Tram,
            "station" => Category::Station,
            _ => Category::Unknown,
        }
    }
}

#[derive(rkyv::Archive, rkyv::Deserialize, rkyv::Serialize, Debug, Clone, PartialEq)]
#[archive(check_bytes)]
pub struct Segment {
    pub id: OsmId,
    pub point_ids: Vec<OsmId>,
    pub tags: HashMap<String, String>,
    pub category: Category,
    /// Parsed `gauge` in mm, unclamped; 0 when absent or unparsable.
    pub gauge: f64,
    /// Parsed `maxspeed` in km/h, unclamped; 0 when absent or unparsable.
    pub speed: f64,
    pub visible: bool,
}

/// Running `[lo, hi]` of one attribute. Unset until the first value.
#[derive(rkyv::Archive, rkyv::Deserialize, rkyv::Serialize, Debug, Default, Clone, Copy, PartialEq)]
#[archive(check_bytes)]
pub struct Range {
    pub bounds: Option<(f64, f64)>,
}

impl Range {
    pub fn fold(&mut self, value: f64) {
        self.bounds = Some(match self.bounds {
            Some((lo, hi)) => (lo.min(value), hi.max(value)),
            None => (value, value),
        });
    }

    pub fn lo(&self) -> Option<f64> {
        self.bounds.map(|(lo, _)| lo)
    }

    pub fn hi(&self) -> Option<f64> {
        self.bounds.map(|(_, hi)| hi)
    }

    /// Position of `value` inside the range, in `[0, 1]`.
    ///
    /// An unset or zero-width range normalizes everything to 0.
    pub fn normalize(&self, value: f64) -> f64 {
        match self.bounds {
            Some((lo, hi)) if hi > lo => (value.clamp(lo, hi) - lo) / (hi - lo),
            _ => 0.0,
        }
    }
}

/// Dataset-wide attribute ranges, widened as segments are classified and
/// read only once the whole stream has been consumed.
#[derive(rkyv::Archive, rkyv::Deserialize, rkyv::Serialize, Debug, Default, Clone, Copy, PartialEq)]
#[archive(check_bytes)]
pub struct Statistics {
    pub gauge: Range,
    pub speed: Range,
}

impl Statistics {
    pub fn normalized_gauge(&self, segment: &Segment) -> f64 {
        self.gauge.normalize(segment.gauge)
    }

    pub fn normalized_speed(&self, segment: &Segment) -> f64 {
        self.speed.normalize(segment.speed)
    }
}

fn parse_attribute(tags: &HashMap<String, String>, key: &str) -> Option<f64> {
    tags.get(key)?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
}

/// Turns a way into a segment, widening `statistics` with its gauge and speed
/// when it is a railway.
pub fn classify(way: WayCandidate, statistics: &mut Statistics) -> Segment {
    let railway = way.tags.get("railway");
    let visible = railway.is_some();
    let category = railway
        .map(|value| Category::from_railway(value))
        .unwrap_or(Category::Unknown);

    let gauge = parse_attribute(&way.tags, "gauge");
    let speed = parse_attribute(&way.tags, "maxspeed");

    if visible {
        if let Some(gauge) = gauge {
            statistics.gauge.fold(gauge.clamp(GAUGE_BAND.0, GAUGE_BAND.1));
        }
        if let Some(speed) = speed {
            statistics.speed.fold(speed.clamp(SPEED_BAND.0, SPEED_BAND.1));
        }
    }

    Segment {
        id: way.id,
        point_ids: way.point_ids,
        tags: way.tags,
        category,
        gauge: gauge.unwrap_or(0.0),
        speed: speed.unwrap_or(0.0),
        visible,
    }
}
