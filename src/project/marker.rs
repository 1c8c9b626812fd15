/// Linearly remap `values` into `[lo, hi]`.
///
/// The smallest value maps to `lo` and the largest to `hi`. When every value
/// is equal there is no spread to preserve and all map to the midpoint.
pub fn rescale(values: &[f64], lo: f64, hi: f64) -> Vec<f64> {
    let (min, max) = values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(min, max), &v| {
            (min.min(v), max.max(v))
        });
    let span = max - min;
    values
        .iter()
        .map(|&v| {
            if span > 0.0 {
                lo + (v - min) / span * (hi - lo)
            } else {
                (lo + hi) / 2.0
            }
        })
        .collect()
}

/// Marker radius in pixels for every item weight.
pub fn marker_radii(weights: &[u64], min_px: f64, max_px: f64) -> Vec<f64> {
    let weights: Vec<f64> = weights.iter().map(|&w| w as f64).collect();
    rescale(&weights, min_px, max_px)
}

/// Label font size for every topic, larger for topics with more members.
pub fn label_font_sizes(topic_sizes: &[usize], min_font: f64, max_font: f64) -> Vec<f64> {
    let sizes: Vec<f64> = topic_sizes.iter().map(|&s| s as f64).collect();
    rescale(&sizes, min_font, max_font)
}
