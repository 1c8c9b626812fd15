mod template;

use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;
use std::path::Path;

use serde::Serialize;
use topic_atlas_include_zstd::include_zstd;
use tracing::{debug, info};

use self::template::{PageTemplate, escape_html, escape_script_json};
use crate::config::MapConfig;
use crate::label::TopicLabels;
use crate::project::marker::{label_font_sizes, marker_radii};
use crate::{AppError, AppResult};

static DATAMAP_TEMPLATE: &[u8] = include_zstd!("assets/datamap.html");

/// Decorative point colours, cycled by topic id.
const PALETTE: [&str; 20] = [
    "#4e79a7", "#f28e2b", "#e15759", "#76b7b2", "#59a14f", "#edc948", "#b07aa1", "#ff9da7",
    "#9c755f", "#bab0ac", "#1f77b4", "#ff7f0e", "#2ca02c", "#d62728", "#9467bd", "#8c564b",
    "#e377c2", "#7f7f7f", "#bcbd22", "#17becf",
];

/// Per-item inputs of a map, all row-aligned.
#[derive(Debug, Clone, Copy)]
pub struct MapLayers<'a> {
    pub coords: &'a [[f64; 2]],
    pub hover: &'a [String],
    pub weights: &'a [u64],
    pub assignments: &'a [usize],
}

impl MapLayers<'_> {
    fn check(&self) -> AppResult<()> {
        let n = self.coords.len();
        if n == 0 {
            return Err(AppError::Render("there are no points to draw".into()));
        }
        for (name, len) in [
            ("hover texts", self.hover.len()),
            ("marker weights", self.weights.len()),
            ("topic assignments", self.assignments.len()),
        ] {
            if len != n {
                return Err(AppError::Render(format!(
                    "{n} coordinates but {len} {name}"
                )));
            }
        }
        if let Some(row) = self
            .coords
            .iter()
            .position(|[x, y]| !x.is_finite() || !y.is_finite())
        {
            return Err(AppError::Render(format!(
                "point {row} has a non-finite coordinate"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MapPoint {
    pub x: f64,
    pub y: f64,
    pub radius: f64,
    pub hover: String,
    /// Palette index; decorative only
    pub color: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MapLabel {
    pub topic: usize,
    pub text: String,
    pub x: f64,
    pub y: f64,
    pub font_size: f64,
}

/// Data-space bounds of the initial view.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MapView {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
}

impl MapView {
    /// The central `fraction` of the points along each axis.
    ///
    /// Bounds are the `0.5 - fraction / 2` and `0.5 + fraction / 2` quantiles,
    /// so a fraction of 1 frames every point.
    pub fn centred(coords: &[[f64; 2]], fraction: f64) -> Self {
        let lo = (0.5 - fraction / 2.0).clamp(0.0, 0.5);
        let hi = (0.5 + fraction / 2.0).clamp(0.5, 1.0);
        let mut xs: Vec<f64> = coords.iter().map(|c| c[0]).collect();
        let mut ys: Vec<f64> = coords.iter().map(|c| c[1]).collect();
        xs.sort_by(f64::total_cmp);
        ys.sort_by(f64::total_cmp);
        Self {
            x_min: quantile(&xs, lo),
            x_max: quantile(&xs, hi),
            y_min: quantile(&ys, lo),
            y_max: quantile(&ys, hi),
        }
    }
}

/// Linearly interpolated quantile of sorted, non-empty `values`.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let below = pos.floor() as usize;
    let above = pos.ceil() as usize;
    let frac = pos - below as f64;
    sorted[below] + (sorted[above] - sorted[below]) * frac
}

/// Everything the viewer draws.
#[derive(Debug, Clone, Serialize)]
pub struct DataMap {
    #[serde(skip)]
    pub title: String,
    #[serde(skip)]
    pub height: u32,
    pub points: Vec<MapPoint>,
    pub labels: Vec<MapLabel>,
    pub view: MapView,
    pub search: bool,
    pub palette: Vec<&'static str>,
}

impl DataMap {
    /// Assemble the map from row-aligned layers and the topic labels.
    ///
    /// Fails with a render error on misaligned layers, an empty map or a
    /// non-finite coordinate.
    #[tracing::instrument(name = "Building map", level = "debug", skip_all, fields(title = %title))]
    pub fn build(
        title: &str,
        layers: MapLayers<'_>,
        labels: &TopicLabels,
        config: &MapConfig,
    ) -> AppResult<Self> {
        layers.check()?;

        let radii = marker_radii(
            layers.weights,
            config.point_radius_min_pixels,
            config.point_radius_max_pixels,
        );
        let points: Vec<MapPoint> = layers
            .coords
            .iter()
            .zip(layers.hover)
            .zip(&radii)
            .zip(layers.assignments)
            .map(|(((&[x, y], hover), &radius), &topic)| MapPoint {
                x,
                y,
                radius,
                hover: hover.clone(),
                color: topic % PALETTE.len(),
            })
            .collect();

        // topic -> (sum x, sum y, members)
        let mut centroids: BTreeMap<usize, (f64, f64, usize)> = BTreeMap::new();
        for (&[x, y], &topic) in layers.coords.iter().zip(layers.assignments) {
            let entry = centroids.entry(topic).or_insert((0.0, 0.0, 0));
            entry.0 += x;
            entry.1 += y;
            entry.2 += 1;
        }
        let sizes: Vec<usize> = centroids.values().map(|c| c.2).collect();
        let fonts = label_font_sizes(&sizes, config.min_fontsize, config.max_fontsize);
        let map_labels: Vec<MapLabel> = centroids
            .iter()
            .zip(fonts)
            .map(|((&topic, &(sx, sy, n)), font_size)| MapLabel {
                topic,
                text: labels.get(topic).into_owned(),
                x: sx / n as f64,
                y: sy / n as f64,
                font_size,
            })
            .collect();
        debug!(
            points = points.len(),
            labels = map_labels.len(),
            "Assembled map layers"
        );

        Ok(Self {
            title: title.to_string(),
            height: config.height,
            points,
            labels: map_labels,
            view: MapView::centred(layers.coords, config.initial_zoom_fraction),
            search: config.enable_search,
            palette: PALETTE.to_vec(),
        })
    }

    /// Render the self-contained HTML page.
    pub fn to_html(&self) -> AppResult<String> {
        let page = zstd::decode_all(Cursor::new(DATAMAP_TEMPLATE))
            .map_err(|e| AppError::Render(format!("cannot unpack the viewer template: {e}")))?;
        let page = String::from_utf8(page)
            .map_err(|e| AppError::Render(format!("viewer template is not UTF-8: {e}")))?;

        let payload = serde_json::to_string(self)
            .map_err(|e| AppError::Render(format!("cannot serialize the map data: {e}")))?;
        let payload = escape_script_json(&payload);
        let title = escape_html(&self.title);
        let height = self.height.to_string();
        let vars = HashMap::from([
            ("TITLE", title.as_str()),
            ("HEIGHT", height.as_str()),
            ("PAYLOAD", payload.as_str()),
        ]);
        Ok(PageTemplate::new(page).render(&vars))
    }

    /// Render and write the page to `path`.
    #[tracing::instrument(name = "Writing map", level = "info", skip(self), fields(title = %self.title))]
    pub fn write(&self, path: &Path) -> AppResult<()> {
        let html = self.to_html()?;
        std::fs::write(path, html)?;
        info!(
            "Wrote {} points in {} topics to {}",
            self.points.len(),
            self.labels.len(),
            path.display()
        );
        Ok(())
    }
}
