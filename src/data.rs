use std::collections::HashMap;

use crate::errors::{Error, ErrorKind, Result};

use self::osm::{OsmId, Point};
use self::rail::{Segment, Statistics};

pub mod osm;
pub mod rail;

/// Classified rail network, the hand-off between extraction and drawing.
/// Every segment references at least two points, all present in `points`.

#[derive(rkyv::Archive, rkyv::Deserialize, rkyv::Serialize, Debug, Default, Clone)]
#[archive(check_bytes)]
pub struct RailNetwork {
    pub points: HashMap<OsmId, Point>,
    pub segments: Vec<Segment>,
    pub statistics: Statistics,
}

impl RailNetwork {
    pub fn to_bytes(&self) -> Result<rkyv::AlignedVec> {
        rkyv::to_bytes::<_, 256>(self)
            .map_err(|err| Error::new(ErrorKind::Cache, format!("Could not serialize rail network: {:?}", err)))
    }

    /// Reads back bytes written by [`RailNetwork::to_bytes`], validating
    /// the archive first.
    pub fn from_bytes(bytes: &[u8]) -> Result<RailNetwork> {
        let mut aligned = rkyv::AlignedVec::with_capacity(bytes.len());
        aligned.extend_from_slice(bytes);
        rkyv::from_bytes::<RailNetwork>(&aligned)
            .map_err(|err| Error::new(ErrorKind::Cache, format!("Could not deserialize rail network: {:?}", err)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::osm::tests::{point, way};
    use crate::data::rail::classify;

    fn sample_network() -> RailNetwork {
        let mut network = RailNetwork::default();
        network.points.insert(1, point(1, 51.5, -0.1));
        network.points.insert(2, point(2, 51.6, 0.1));
        network.segments.push(classify(
            way(9, &[1, 2], &[("railway", "subway"), ("gauge", "1435")]),
            &mut network.statistics,
        ));
        network
    }

    #[test]
    fn network_survives_the_cache_format() {
        let network = sample_network();
        let bytes = network.to_bytes().unwrap();
        let restored = RailNetwork::from_bytes(&bytes).unwrap();
        assert_eq!(restored.points, network.points);
        assert_eq!(restored.segments, network.segments);
        assert_eq!(restored.statistics, network.statistics);
    }

    #[test]
    fn damaged_cache_is_a_cache_error() {
        let bytes = sample_network().to_bytes().unwrap();

        let truncated = RailNetwork::from_bytes(&bytes[..bytes.len() / 2]).unwrap_err();
        assert_eq!(truncated.kind, ErrorKind::Cache);

        let garbage = vec![0xff; bytes.len()];
        assert_eq!(RailNetwork::from_bytes(&garbage).unwrap_err().kind, ErrorKind::Cache);

        assert_eq!(RailNetwork::from_bytes(&[]).unwrap_err().kind, ErrorKind::Cache);
    }
}
