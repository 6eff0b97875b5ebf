use std::collections::HashMap;

use prost::Message;

use crate::data::osm::{Element, OsmId, Point, WayCandidate, POINT_TAG_ALLOW_LIST};
use crate::errors::{Error, ErrorKind, Result};

use super::proto::{self, DenseNodes, HeaderBlock, PrimitiveBlock};

const DEFAULT_GRANULARITY: i64 = 100;
const NANO: f64 = 1e-9;

fn corrupt(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::CorruptPayload, message)
}

pub fn decode_header_block(data: &[u8]) -> Result<HeaderBlock> {
    HeaderBlock::decode(data).map_err(|err| Error::new(ErrorKind::CorruptPayload, err.to_string()))
}

/// Decoded `OSMData` payload with its coordinate and string-table context.
pub struct PrimitiveBlockView {
    block: PrimitiveBlock,
    granularity: i64,
    lat_offset: i64,
    lon_offset: i64,
}

impl PrimitiveBlockView {
    pub fn decode(data: &[u8]) -> Result<Self> {
        let block = PrimitiveBlock::decode(data)
            .map_err(|err| Error::new(ErrorKind::CorruptPayload, err.to_string()))?;
        Ok(PrimitiveBlockView {
            granularity: block.granularity.map(i64::from).unwrap_or(DEFAULT_GRANULARITY),
            lat_offset: block.lat_offset.unwrap_or(0),
            lon_offset: block.lon_offset.unwrap_or(0),
            block,
        })
    }

    fn coordinate(&self, offset: i64, raw: i64) -> Result<f64> {
        self.granularity
            .checked_mul(raw)
            .and_then(|scaled| scaled.checked_add(offset))
            .map(|nanodegrees| NANO * nanodegrees as f64)
            .ok_or_else(|| corrupt(format!("Coordinate {} overflows at granularity {}", raw, self.granularity)))
    }

    fn lat(&self, raw: i64) -> Result<f64> {
        self.coordinate(self.lat_offset, raw)
    }

    fn lon(&self, raw: i64) -> Result<f64> {
        self.coordinate(self.lon_offset, raw)
    }

    fn string(&self, index: usize) -> String {
        self.block
            .stringtable
            .s
            .get(index)
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
            .unwrap_or_default()
    }

    fn tags(&self, keys: &[u32], vals: &[u32], allow: impl Fn(&str) -> bool) -> HashMap<String, String> {
        keys.iter()
            .zip(vals)
            .map(|(k, v)| (self.string(*k as usize), *v))
            .filter(|(k, _)| allow(k))
            .map(|(k, v)| (k, self.string(v as usize)))
            .collect()
    }

    fn plain_point(&self, node: &proto::Node) -> Result<Point> {
        Ok(Point {
            id: node.id,
            lat: self.lat(node.lat)?,
            lon: self.lon(node.lon)?,
            tags: self.tags(&node.keys, &node.vals, is_allowed_point_tag),
        })
    }

    fn way(&self, way: &proto::Way) -> Result<WayCandidate> {
        let mut id: OsmId = 0;
        let point_ids = way
            .refs
            .iter()
            .map(|delta| -> Result<OsmId> {
                id = id
                    .checked_add(*delta)
                    .ok_or_else(|| corrupt(format!("Way {} node reference overflows", way.id)))?;
                Ok(id)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(WayCandidate {
            id: way.id,
            point_ids,
            tags: self.tags(&way.keys, &way.vals, |_| true),
        })
    }

    /// Lazily yields every node and way of the block, group by group.
    pub fn elements(&self) -> impl Iterator<Item = Result<Element>> + '_ {
        self.block.primitivegroup.iter().flat_map(move |group| {
            let plain = group
                .nodes
                .iter()
                .map(move |node| self.plain_point(node).map(Element::Point));
            let dense = group
                .dense
                .iter()
                .flat_map(move |dense| DenseNodeIter::new(self, dense));
            let ways = group.ways.iter().map(move |way| self.way(way).map(Element::Way));
            plain.chain(dense).chain(ways)
        })
    }
}

fn is_allowed_point_tag(key: &str) -> bool {
    POINT_TAG_ALLOW_LIST.contains(&key)
}

struct DenseNodeIter<'a> {
    view: &'a PrimitiveBlockView,
    dense: &'a DenseNodes,
    index: usize,
    keys_vals_pos: usize,
    id: OsmId,
    lat: i64,
    lon: i64,
    done: bool,
}

impl<'a> DenseNodeIter<'a> {
    fn new(view: &'a PrimitiveBlockView, dense: &'a DenseNodes) -> Self {
        DenseNodeIter {
            view,
            dense,
            index: 0,
            keys_vals_pos: 0,
            id: 0,
            lat: 0,
            lon: 0,
            done: false,
        }
    }

    fn next_tags(&mut self) -> HashMap<String, String> {
        let mut tags = HashMap::new();
        let keys_vals = &self.dense.keys_vals;
        while self.keys_vals_pos < keys_vals.len() {
            let key = keys_vals[self.keys_vals_pos];
            if key == 0 {
                self.keys_vals_pos += 1;
                break;
            }
            let Some(&value) = keys_vals.get(self.keys_vals_pos + 1) else {
                self.keys_vals_pos = keys_vals.len();
                break;
            };
            self.keys_vals_pos += 2;

            let key = self.view.string(key as usize);
            if is_allowed_point_tag(&key) {
                tags.insert(key, self.view.string(value as usize));
            }
        }
        tags
    }
}

impl DenseNodeIter<'_> {
    fn advance(&mut self, d_id: i64, d_lat: i64, d_lon: i64) -> Result<Element> {
        let previous = self.id;
        let overflow = |what: &str| corrupt(format!("Dense node {} overflows after id {}", what, previous));
        self.id = self.id.checked_add(d_id).ok_or_else(|| overflow("id"))?;
        self.lat = self.lat.checked_add(d_lat).ok_or_else(|| overflow("latitude"))?;
        self.lon = self.lon.checked_add(d_lon).ok_or_else(|| overflow("longitude"))?;

        let tags = self.next_tags();
        Ok(Element::Point(Point {
            id: self.id,
            lat: self.view.lat(self.lat)?,
            lon: self.view.lon(self.lon)?,
            tags,
        }))
    }
}

impl Iterator for DenseNodeIter<'_> {
    type Item = Result<Element>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let dense = self.dense;
        if dense.id.len() != dense.lat.len() || dense.id.len() != dense.lon.len() {
            self.done = true;
            return Some(Err(corrupt(format!(
                "Dense nodes carry {} ids, {} latitudes and {} longitudes",
                dense.id.len(),
                dense.lat.len(),
                dense.lon.len()
            ))));
        }

        let i = self.index;
        let (d_id, d_lat, d_lon) = (*dense.id.get(i)?, *dense.lat.get(i)?, *dense.lon.get(i)?);
        self.index += 1;

        let element = self.advance(d_id, d_lat, d_lon);
        self.done = element.is_err();
        Some(element)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use proto::{PrimitiveGroup, StringTable};

    pub fn strings() -> StringTable {
        StringTable {
            s: ["", "railway", "rail", "gauge", "1435", "name", "Central", "maxspeed", "160"]
                .iter()
                .map(|s| s.as_bytes().to_vec())
                .collect(),
        }
    }

    /// Two dense points, one plain point and one way over the three of them.
    pub fn sample_block() -> PrimitiveBlock {
        PrimitiveBlock {
            stringtable: strings(),
            primitivegroup: vec![
                PrimitiveGroup {
                    nodes: vec![],
                    dense: Some(DenseNodes {
                        id: vec![10, 1],
                        lat: vec![515_000_000, 1_000_000],
                        lon: vec![-1_000_000, 2_000_000],
                        keys_vals: vec![1, 2, 5, 6, 0, 0],
                    }),
                    ways: vec![],
                },
                PrimitiveGroup {
                    nodes: vec![proto::Node {
                        id: 12,
                        keys: vec![5],
                        vals: vec![6],
                        lat: 516_000_000,
                        lon: 0,
                    }],
                    dense: None,
                    ways: vec![proto::Way {
                        id: 500,
                        keys: vec![1, 3, 7],
                        vals: vec![2, 4, 8],
                        refs: vec![10, 1, 1],
                    }],
                },
            ],
            granularity: Some(100),
            lat_offset: None,
            lon_offset: None,
        }
    }

    #[test]
    fn decodes_dense_plain_and_ways() {
        let bytes = sample_block().encode_to_vec();
        let view = PrimitiveBlockView::decode(&bytes).unwrap();
        let elements: Vec<Element> = view.elements().collect::<Result<_>>().unwrap();
        assert_eq!(elements.len(), 4);

        let Element::Point(first) = &elements[0] else { panic!("expected a point") };
        assert_eq!(first.id, 10);
        assert!((first.lat - 51.5).abs() < 1e-9);
        assert!((first.lon + 0.1).abs() < 1e-9);
        assert_eq!(first.tags.get("railway").map(String::as_str), Some("rail"));
        assert!(!first.tags.contains_key("name"));

        let Element::Point(second) = &elements[1] else { panic!("expected a point") };
        assert_eq!(second.id, 11);
        assert!((second.lat - 51.6).abs() < 1e-9);
        assert!((second.lon - 0.1).abs() < 1e-9);
        assert!(second.tags.is_empty());

        let Element::Point(plain) = &elements[2] else { panic!("expected a point") };
        assert_eq!(plain.id, 12);
        assert!(plain.tags.is_empty());

        let Element::Way(way) = &elements[3] else { panic!("expected a way") };
        assert_eq!(way.id, 500);
        assert_eq!(way.point_ids, vec![10, 11, 12]);
        assert_eq!(way.tags.get("gauge").map(String::as_str), Some("1435"));
        assert_eq!(way.tags.get("maxspeed").map(String::as_str), Some("160"));
    }

    #[test]
    fn offsets_and_granularity_apply() {
        let mut block = sample_block();
        block.granularity = Some(1000);
        block.lat_offset = Some(500_000_000);
        block.lon_offset = Some(-250_000_000);
        let view = PrimitiveBlockView::decode(&block.encode_to_vec()).unwrap();

        let Some(Ok(Element::Point(point))) = view.elements().next() else { panic!("expected a point") };
        assert!((point.lat - (0.5 + 515.0)).abs() < 1e-6);
        assert!((point.lon - (-0.25 - 1.0)).abs() < 1e-6);
    }

    #[test]
    fn garbage_is_corrupt_payload() {
        let err = PrimitiveBlockView::decode(&[0xff, 0xff, 0xff]).err().unwrap();
        assert_eq!(err.kind, ErrorKind::CorruptPayload);
    }

    #[test]
    fn overflowing_values_are_corrupt_payload() {
        let mut block = sample_block();
        block.primitivegroup[1].nodes[0].lat = i64::MAX / 10;
        let view = PrimitiveBlockView::decode(&block.encode_to_vec()).unwrap();
        let err = view.elements().find_map(|element| element.err()).unwrap();
        assert_eq!(err.kind, ErrorKind::CorruptPayload);

        let mut block = sample_block();
        block.primitivegroup[0].dense.as_mut().unwrap().id = vec![i64::MAX, 1];
        let view = PrimitiveBlockView::decode(&block.encode_to_vec()).unwrap();
        let results: Vec<_> = view.elements().collect();
        assert!(results[0].is_ok());
        assert_eq!(results[1].as_ref().unwrap_err().kind, ErrorKind::CorruptPayload);

        let mut block = sample_block();
        block.primitivegroup[1].ways[0].refs = vec![i64::MAX, 1];
        let view = PrimitiveBlockView::decode(&block.encode_to_vec()).unwrap();
        let last = view.elements().last().unwrap();
        assert_eq!(last.unwrap_err().kind, ErrorKind::CorruptPayload);
    }

    #[test]
    fn dense_column_length_mismatch_is_corrupt_payload() {
        let mut block = sample_block();
        block.primitivegroup[0].dense.as_mut().unwrap().lon = vec![-1_000_000];
        let view = PrimitiveBlockView::decode(&block.encode_to_vec()).unwrap();

        let dense: Vec<_> = view.elements().take_while(|element| !matches!(element, Ok(Element::Way(_)))).collect();
        assert_eq!(dense.len(), 2);
        assert_eq!(dense[0].as_ref().unwrap_err().kind, ErrorKind::CorruptPayload);
        assert!(matches!(dense[1], Ok(Element::Point(Point { id: 12, .. }))));
    }
}
