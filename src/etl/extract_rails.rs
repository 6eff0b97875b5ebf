use std::{fs::{self, File}, io::{BufReader, Write}, path::{Path, PathBuf}, time::UNIX_EPOCH};

use log::{info, warn};

use crate::{
    data::{
        osm::ElementCollector,
        rail::{classify, Statistics},
        RailNetwork,
    },
    errors::{Error, ErrorKind, Result},
    geo::Limits,
    osmpbf::{blob::BlobHeader, decode_header_block, BlobReader, PrimitiveBlockView, OSM_DATA, OSM_HEADER},
    UserConfig,
};

use super::Etl;

pub const ETL_NAME: &str = "extract_rails";
pub const INPUT_FILE: [&str; 2] = ["raw", "rails.osm.pbf"];
pub const CACHE_DIR: &str = "cache";
const CACHE_PREFIX: &str = "rail_network_";

/// Features a reader must understand to use the file; anything else is refused.
const SUPPORTED_FEATURES: [&str; 2] = ["OsmSchema-V0.6", "DenseNodes"];

pub struct ExtractRailsEtl<'a> {
    user_config: &'a UserConfig,
}

impl ExtractRailsEtl<'_> {
    pub fn new(user_config: &UserConfig) -> ExtractRailsEtl {
        ExtractRailsEtl { user_config }
    }

    pub fn input_path(dir: &Path) -> PathBuf {
        INPUT_FILE.iter().fold(dir.to_path_buf(), |path, part| path.join(part))
    }

    /// Cache file for the configured limits and the current input file.
    /// Fails with `Io` when the input is missing.
    pub fn output_path(&self, dir: &Path) -> Result<PathBuf> {
        let input_path = Self::input_path(dir);
        let metadata = fs::metadata(&input_path).map_err(|err| {
            Error::new(
                ErrorKind::Io,
                format!("Missing raw rails file {}: {}", input_path.display(), err),
            )
        })?;
        let modified = metadata
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map(|age| age.as_nanos())
            .unwrap_or(0);

        let Limits { min_lat, max_lat, min_lon, max_lon } = self.user_config.limits;
        Ok(dir.join(CACHE_DIR).join(format!(
            "{}{}_{}_{}_{}_{}_{}.rkyv",
            CACHE_PREFIX,
            min_lat,
            max_lat,
            min_lon,
            max_lon,
            metadata.len(),
            modified
        )))
    }

    fn check_header(data: &[u8]) -> Result<()> {
        let header = decode_header_block(data)?;
        if let Some(bbox) = &header.bbox {
            info!(
                left = bbox.left as f64 * 1e-9,
                right = bbox.right as f64 * 1e-9,
                top = bbox.top as f64 * 1e-9,
                bottom = bbox.bottom as f64 * 1e-9;
                "File bounding box"
            );
        }
        let required_features = header.required_features.join(",");
        info!(
            required_features = required_features.as_str(),
            writing_program = header.writingprogram.as_deref().unwrap_or("unknown"),
            source = header.source.as_deref().unwrap_or("unknown");
            "Read OSM header"
        );
        for feature in &header.required_features {
            if !SUPPORTED_FEATURES.contains(&feature.as_str()) {
                return Err(Error::new(
                    ErrorKind::MalformedContainer,
                    format!("File requires unsupported feature {}", feature),
                ));
            }
        }
        Ok(())
    }

    /// Folds every blob of the container into a classified network.
    pub fn build_network<I>(&self, blobs: I) -> Result<RailNetwork>
    where
        I: Iterator<Item = Result<(BlobHeader, Vec<u8>)>>,
    {
        let mut collector = ElementCollector::new(self.user_config.limits);
        let mut blob_count = 0u64;

        for blob in blobs {
            let (header, data) = blob?;
            blob_count += 1;
            match header.kind.as_str() {
                OSM_HEADER => Self::check_header(&data)?,
                OSM_DATA => {
                    let view = PrimitiveBlockView::decode(&data)?;
                    for element in view.elements() {
                        collector.push(element?);
                    }
                },
                _ => (),
            }
        }

        let (points, ways, report) = collector.finish();
        info!(
            blobs = blob_count,
            elements = report.elements,
            admitted_points = report.admitted_points,
            discarded_points = report.discarded_points,
            kept_ways = report.kept_ways,
            degenerate_ways = report.degenerate_ways;
            "Extraction finished"
        );
        if report.missing_refs > 0 {
            warn!(
                missing_refs = report.missing_refs,
                discarded_refs = report.discarded_refs;
                "Ways reference points absent from the file"
            );
        }

        let mut statistics = Statistics::default();
        let segments: Vec<_> = ways
            .into_iter()
            .map(|way| classify(way, &mut statistics))
            .collect();

        info!(
            segments = segments.len(),
            visible = segments.iter().filter(|segment| segment.visible).count(),
            min_gauge = statistics.gauge.lo().unwrap_or(f64::NAN),
            max_gauge = statistics.gauge.hi().unwrap_or(f64::NAN),
            min_speed = statistics.speed.lo().unwrap_or(f64::NAN),
            max_speed = statistics.speed.hi().unwrap_or(f64::NAN);
            "Classification finished"
        );

        Ok(RailNetwork {
            points,
            segments,
            statistics,
        })
    }
}

impl Etl for ExtractRailsEtl<'_> {
    type Input = BlobReader<BufReader<File>>;
    type Output = RailNetwork;

    fn etl_name(&self) -> &str {
        ETL_NAME
    }

    fn is_cached(&self, dir: &Path) -> Result<bool> {
        Ok(self.output_path(dir)?.try_exists()?)
    }

    /// Removes every cached network, whatever limits or input it was built from.
    fn clean(&self, dir: &Path) -> Result<()> {
        let cache_dir = dir.join(CACHE_DIR);
        if !cache_dir.try_exists()? {
            return Ok(());
        }
        for entry in fs::read_dir(cache_dir)? {
            let entry = entry?;
            if entry.file_name().to_string_lossy().starts_with(CACHE_PREFIX) {
                fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }

    fn extract(&mut self, dir: &Path) -> Result<Self::Input> {
        let input_path = Self::input_path(dir);
        let file = File::open(&input_path).map_err(|err| {
            Error::new(
                ErrorKind::Io,
                format!("Missing raw rails file {}: {}", input_path.display(), err),
            )
        })?;
        Ok(BlobReader::new(BufReader::new(file)))
    }

    fn transform(&mut self, input: Self::Input) -> Result<Self::Output> {
        self.build_network(input)
    }

    /// Writes next to the final path and renames, so a cache file is either
    /// complete or absent.
    fn load(&mut self, dir: &Path, output: Self::Output) -> Result<()> {
        fs::create_dir_all(dir.join(CACHE_DIR))?;
        let bytes = output.to_bytes()?;
        let output_path = self.output_path(dir)?;
        let partial_path = output_path.with_extension("rkyv.partial");

        let mut output_file = File::create(&partial_path)?;
        output_file.write_all(&bytes)?;
        output_file.sync_all()?;
        fs::rename(partial_path, output_path)?;
        Ok(())
    }
}
