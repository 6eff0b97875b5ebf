use std::{collections::HashMap, fs::{self, File}, io::{BufWriter, Read, Write}, path::{Path, PathBuf}};

use log::info;
use png::{self, BitDepth, ColorType};
use raqote::{DrawOptions, DrawTarget, LineCap, LineJoin, Path as RaqotePath, PathBuilder, StrokeStyle};
use serde::Deserialize;

use crate::{
    data::{
        osm::{OsmId, Point},
        rail::{Segment, Statistics},
        RailNetwork,
    },
    errors::{Error, ErrorKind, Result},
    geo::{CanvasSize, GeoProjector},
    palette::Palette,
    UserConfig,
};

use super::{extract_rails::ExtractRailsEtl, Etl};

pub const ETL_NAME: &str = "draw_map";
pub const OUTPUT_DIR: &str = "output";
pub const OUTPUT_FILE_NAME: &str = "rails.png";

const PROGRESS_EVERY: usize = 20_000;

/// Nominal square bound of the image and the blank border kept on every edge, in px.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct CanvasConfig {
    pub size: u32,
    pub margin: u32,
}

impl Default for CanvasConfig {
    fn default() -> Self {
        CanvasConfig {
            size: 20_000,
            margin: 100,
        }
    }
}

/// Stroke width is `base_width + speed_weight * speed + gauge_weight * gauge`
/// with both attributes normalized to `[0, 1]`.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct Styling {
    pub base_width: f32,
    pub speed_weight: f32,
    pub gauge_weight: f32,
}

impl Default for Styling {
    fn default() -> Self {
        Styling {
            base_width: 3.0,
            speed_weight: 20.0,
            gauge_weight: 5.0,
        }
    }
}

impl Styling {
    pub fn width(&self, normalized_speed: f64, normalized_gauge: f64) -> f32 {
        self.base_width
            + self.speed_weight.max(0.0) * normalized_speed as f32
            + self.gauge_weight.max(0.0) * normalized_gauge as f32
    }
}

#[derive(Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PngCompression {
    Fast,
    #[default]
    Default,
    Best,
}

impl From<PngCompression> for png::Compression {
    fn from(value: PngCompression) -> Self {
        match value {
            PngCompression::Fast => png::Compression::Fast,
            PngCompression::Default => png::Compression::Default,
            PngCompression::Best => png::Compression::Best,
        }
    }
}

fn stroke(width: f32) -> StrokeStyle {
    StrokeStyle {
        cap: LineCap::Round,
        join: LineJoin::Round,
        width,
        miter_limit: 2.0,
        dash_array: Vec::new(),
        dash_offset: 0.0,
    }
}

/// Visible segments, lowest normalized gauge first so higher gauges end up on top.
pub fn draw_order<'a>(segments: &'a [Segment], statistics: &Statistics) -> Vec<&'a Segment> {
    let mut visible: Vec<(f64, &Segment)> = segments
        .iter()
        .filter(|segment| segment.visible)
        .map(|segment| (statistics.normalized_gauge(segment), segment))
        .collect();
    visible.sort_by(|(a, _), (b, _)| a.total_cmp(b));
    visible.into_iter().map(|(_, segment)| segment).collect()
}

fn segment_path(
    segment: &Segment,
    points: &HashMap<OsmId, Point>,
    projector: &GeoProjector,
    canvas: &CanvasSize,
) -> Result<RaqotePath> {
    let mut pb = PathBuilder::new();
    for (index, point_id) in segment.point_ids.iter().enumerate() {
        let point = points.get(point_id).ok_or_else(|| {
            Error::new(
                ErrorKind::BrokenInvariant,
                format!("Segment {} references unknown point {}", segment.id, point_id),
            )
        })?;
        let (x, y) = projector.to_raster(point, canvas)?;
        if index == 0 {
            pb.move_to(x, y);
        } else {
            pb.line_to(x, y);
        }
    }
    Ok(pb.finish())
}

/// Paints every visible segment of `network` onto a fresh surface.
pub fn render(
    network: &RailNetwork,
    palette: &Palette,
    styling: &Styling,
    canvas_config: &CanvasConfig,
) -> Result<DrawTarget> {
    let mut projector = GeoProjector::new(canvas_config.size, canvas_config.margin);
    for point in network.points.values() {
        projector.add_point(point);
    }
    let canvas = projector.canvas_size();
    info!(width = canvas.width, height = canvas.height; "Allocating canvas");

    let mut dt = DrawTarget::new(canvas.width, canvas.height);
    dt.clear(palette.background.to_solid());

    let statistics = &network.statistics;
    let draw_options = DrawOptions::new();
    let mut painted = 0;

    for segment in draw_order(&network.segments, statistics) {
        let path = segment_path(segment, &network.points, &projector, &canvas)?;

        let gauge = statistics.normalized_gauge(segment);
        let speed = statistics.normalized_speed(segment);
        dt.stroke(
            &path,
            &palette.mix(gauge).to_source(),
            &stroke(styling.width(speed, gauge)),
            &draw_options,
        );

        painted += 1;
        if painted % PROGRESS_EVERY == 0 {
            info!(painted = painted; "Painted segments");
        }
    }
    info!(painted = painted; "Painting finished");

    Ok(dt)
}

/// Straight RGBA8 of one premultiplied ARGB pixel.
fn unpremultiply(pixel: u32) -> [u8; 4] {
    let a = (pixel >> 24) & 0xff;
    let mut r = (pixel >> 16) & 0xff;
    let mut g = (pixel >> 8) & 0xff;
    let mut b = pixel & 0xff;
    if a > 0 {
        r = r * 255 / a;
        g = g * 255 / a;
        b = b * 255 / a;
    }
    [r as u8, g as u8, b as u8, a as u8]
}

/// Encodes the surface as 8-bit RGBA PNG into `sink`, one row at a time.
pub fn write_png<W: Write>(dt: &DrawTarget, sink: W, compression: PngCompression) -> Result<()> {
    let width = usize::try_from(dt.width())?;
    let mut encoder = png::Encoder::new(sink, dt.width().try_into()?, dt.height().try_into()?);
    encoder.set_color(ColorType::Rgba);
    encoder.set_depth(BitDepth::Eight);
    encoder.set_compression(compression.into());

    let mut writer = encoder.write_header()?;
    let mut stream = writer.stream_writer()?;
    let mut row_bytes = Vec::with_capacity(width * 4);
    for row in dt.get_data().chunks(width.max(1)) {
        row_bytes.clear();
        for pixel in row {
            row_bytes.extend_from_slice(&unpremultiply(*pixel));
        }
        stream.write_all(&row_bytes)?;
    }
    stream.finish()?;
    writer.finish()?;
    Ok(())
}

pub struct DrawMapEtl<'a> {
    user_config: &'a UserConfig,
}

impl DrawMapEtl<'_> {
    pub fn new(user_config: &UserConfig) -> DrawMapEtl {
        DrawMapEtl { user_config }
    }

    pub fn output_path(dir: &Path) -> PathBuf {
        dir.join(OUTPUT_DIR).join(OUTPUT_FILE_NAME)
    }
}

impl Etl for DrawMapEtl<'_> {
    type Input = RailNetwork;

    type Output = DrawTarget;

    fn etl_name(&self) -> &str {
        ETL_NAME
    }

    /// The image is redrawn on every run.
    fn is_cached(&self, _dir: &Path) -> Result<bool> {
        Ok(false)
    }

    fn clean(&self, dir: &Path) -> Result<()> {
        let output_path = Self::output_path(dir);
        if output_path.try_exists()? {
            fs::remove_file(output_path)?;
        }
        Ok(())
    }

    fn extract(&mut self, dir: &Path) -> Result<Self::Input> {
        let input_path = ExtractRailsEtl::new(self.user_config).output_path(dir)?;
        let mut input_file = File::open(&input_path).map_err(|err| {
            Error::new(
                ErrorKind::Cache,
                format!("Could not open rail network cache {}: {}", input_path.display(), err),
            )
        })?;

        let mut buf_vec: Vec<u8> = Vec::new();
        input_file.read_to_end(&mut buf_vec)?;
        RailNetwork::from_bytes(&buf_vec)
    }

    fn transform(&mut self, input: Self::Input) -> Result<Self::Output> {
        render(
            &input,
            &self.user_config.palette,
            &self.user_config.styling,
            &self.user_config.canvas,
        )
    }

    fn load(&mut self, dir: &Path, output: Self::Output) -> Result<()> {
        fs::create_dir_all(dir.join(OUTPUT_DIR))?;
        let output_file = File::create(Self::output_path(dir))?;
        write_png(&output, BufWriter::new(output_file), self.user_config.png_compression)
    }
}
