use std::collections::{HashMap, HashSet};

use log::info;

use crate::geo::Limits;

pub type OsmId = i64;

/// Node tags that survive extraction; everything else is dropped on read.
pub const POINT_TAG_ALLOW_LIST: [&str; 1] = ["railway"];

const PROGRESS_EVERY: u64 = 200_000;

#[derive(rkyv::Archive, rkyv::Deserialize, rkyv::Serialize, Debug, Clone, PartialEq)]
#[archive(check_bytes)]
pub struct Point {
    pub id: OsmId,
    pub lat: f64,
    pub lon: f64,
    pub tags: HashMap<String, String>,
}

/// A way as read from the container, before classification.
#[derive(Debug, Clone, PartialEq)]
pub struct WayCandidate {
    pub id: OsmId,
    pub point_ids: Vec<OsmId>,
    pub tags: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    Point(Point),
    Way(WayCandidate),
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExtractionReport {
    pub elements: u64,
    pub admitted_points: usize,
    pub discarded_points: usize,
    pub degenerate_ways: usize,
    pub kept_ways: usize,
    /// Point references dropped because the point lay outside the limits.
    pub discarded_refs: usize,
    /// Point references dropped because the point never appeared in the stream.
    pub missing_refs: usize,
}

/// Single-pass fold over the element stream.
///
/// Ways are buffered untouched until [`ElementCollector::finish`], when the
/// final point set is known and their references can be filtered.
pub struct ElementCollector {
    limits: Limits,
    points: HashMap<OsmId, Point>,
    discarded: HashSet<OsmId>,
    ways: Vec<WayCandidate>,
    report: ExtractionReport,
}

impl ElementCollector {
    pub fn new(limits: Limits) -> Self {
        ElementCollector {
            limits,
            points: HashMap::new(),
            discarded: HashSet::new(),
            ways: Vec::new(),
            report: ExtractionReport::default(),
        }
    }

    pub fn push(&mut self, element: Element) {
        match element {
            Element::Point(point) => {
                if self.limits.contains(point.lat, point.lon) {
                    self.points.insert(point.id, point);
                } else {
                    self.discarded.insert(point.id);
                }
            },
            Element::Way(way) => {
                if way.point_ids.len() < 2 {
                    self.report.degenerate_ways += 1;
                } else {
                    self.ways.push(way);
                }
            },
        }

        self.report.elements += 1;
        if self.report.elements % PROGRESS_EVERY == 0 {
            info!(elements = self.report.elements; "Processed elements");
        }
    }

    /// Filters every buffered way against the final point mapping and drops
    /// the ones left with fewer than two points.
    pub fn finish(mut self) -> (HashMap<OsmId, Point>, Vec<WayCandidate>, ExtractionReport) {
        let points = std::mem::take(&mut self.points);
        let buffered = std::mem::take(&mut self.ways);
        let mut ways = Vec::with_capacity(buffered.len());
        let discarded = &self.discarded;
        let report = &mut self.report;

        for mut way in buffered {
            way.point_ids.retain(|id| {
                if points.contains_key(id) {
                    true
                } else {
                    if discarded.contains(id) {
                        report.discarded_refs += 1;
                    } else {
                        report.missing_refs += 1;
                    }
                    false
                }
            });

            if way.point_ids.len() < 2 {
                report.degenerate_ways += 1;
            } else {
                ways.push(way);
            }
        }

        self.report.admitted_points = points.len();
        self.report.discarded_points = self.discarded.len();
        self.report.kept_ways = ways.len();
        (points, ways, self.report)
    }
}
