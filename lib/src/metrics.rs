use std::fmt;

use log::warn;
use ndarray::ArrayView2;

use crate::{
    channel::IntensityStack,
    error::{CellExpError, Result},
    region::{regions, RegionProperties},
    LabelArray, Raster,
};

/// Columns present in every metrics table, in output order
pub const DEFAULT_COLUMNS: [&str; 18] = [
    "image",
    "label_type",
    "label_id",
    "nuclei_channel",
    "nuclei_channel_label",
    "mean_intensity",
    "max_intensity",
    "variance_intensity",
    "summed_intensity",
    "area",
    "perimeter",
    "eccentricity",
    "solidity",
    "major_axis_length",
    "minor_axis_length",
    "equivalent_diameter",
    "centroid_row",
    "centroid_col",
];

/// A single value in the metrics table
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Free text (image names, label types, channel names)
    Text(String),
    /// Integral values (label ids, channel indices)
    Integer(i64),
    /// Measurements
    Float(f64),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FieldValue::Text(text) => write!(f, "{}", text),
            FieldValue::Integer(value) => write!(f, "{}", value),
            FieldValue::Float(value) => write!(f, "{}", value),
        }
    }
}

/// Intensity statistics of one channel restricted to the pixels of one region
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChannelStatistics {
    /// Mean intensity
    pub mean: f64,
    /// Maximum intensity
    pub max: f64,
    /// Population variance of the intensity
    pub variance: f64,
    /// Sum of the intensity
    pub sum: f64,
}

impl ChannelStatistics {
    /// Summarise the values of `channel` at the given (row, col) pixels. An empty pixel list
    /// gives all zeros.
    pub fn of_pixels(channel: ArrayView2<'_, f64>, pixels: &[(usize, usize)]) -> Self {
        if pixels.is_empty() {
            return ChannelStatistics::default();
        }

        let count = pixels.len() as f64;
        let mut sum = 0.0;
        let mut max = f64::NEG_INFINITY;

        for &(row, col) in pixels {
            let value = channel[[row, col]];
            sum += value;
            max = max.max(value);
        }

        let mean = sum / count;
        let variance = pixels
            .iter()
            .map(|&(row, col)| (channel[[row, col]] - mean).powi(2))
            .sum::<f64>()
            / count;

        ChannelStatistics {
            mean,
            max,
            variance,
            sum,
        }
    }
}

/// Measurements for one region of one label array
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsRow {
    /// Name of the source image
    pub image: String,
    /// Which label array the region came from (e.g. `Cells`)
    pub label_type: String,
    /// Label value of the region
    pub label_id: u32,
    /// Index of the channel used as the nuclei channel (after clamping)
    pub nuclei_channel: usize,
    /// Name of the nuclei channel
    pub nuclei_channel_label: String,
    /// Statistics of the nuclei channel
    pub nuclei: ChannelStatistics,
    /// Shape descriptors of the region
    pub shape: RegionProperties,
    /// Statistics of every channel, in channel order
    pub channels: Vec<(String, ChannelStatistics)>,
}

impl MetricsRow {
    /// Returns (column, value) pairs: the default columns followed by four columns per channel
    pub fn fields(&self) -> Vec<(String, FieldValue)> {
        use FieldValue::{Float, Integer, Text};

        let shape = &self.shape;
        let mut fields: Vec<(String, FieldValue)> = DEFAULT_COLUMNS
            .iter()
            .map(|column| column.to_string())
            .zip([
                Text(self.image.clone()),
                Text(self.label_type.clone()),
                Integer(i64::from(self.label_id)),
                Integer(self.nuclei_channel as i64),
                Text(self.nuclei_channel_label.clone()),
                Float(self.nuclei.mean),
                Float(self.nuclei.max),
                Float(self.nuclei.variance),
                Float(self.nuclei.sum),
                Float(shape.area),
                Float(shape.perimeter),
                Float(shape.eccentricity),
                Float(shape.solidity),
                Float(shape.major_axis_length),
                Float(shape.minor_axis_length),
                Float(shape.equivalent_diameter),
                Float(shape.centroid_row),
                Float(shape.centroid_col),
            ])
            .collect();

        for (name, stats) in &self.channels {
            fields.push((format!("mean_intensity_{}", name), Float(stats.mean)));
            fields.push((format!("max_intensity_{}", name), Float(stats.max)));
            fields.push((format!("variance_intensity_{}", name), Float(stats.variance)));
            fields.push((format!("summed_intensity_{}", name), Float(stats.sum)));
        }

        fields
    }
}

/// Per-image record of the warnings already emitted during metric extraction.
///
/// Create one per image and pass it to every [`extract_label_metrics`] call for that image.
#[derive(Debug, Default)]
pub struct ImageWarnings {
    nuclei_channel_clamped: usize,
}

impl ImageWarnings {
    /// Returns a fresh record with no warnings emitted
    pub fn new() -> Self {
        ImageWarnings::default()
    }

    /// Returns how many times the out of range nuclei channel warning was emitted
    pub fn nuclei_channel_warnings(&self) -> usize {
        self.nuclei_channel_clamped
    }

    fn clamp_nuclei_channel(
        &mut self,
        image_name: &str,
        requested: usize,
        num_channels: usize,
    ) -> usize {
        let clamped = requested.min(num_channels.saturating_sub(1));

        if clamped != requested && self.nuclei_channel_clamped == 0 {
            warn!(
                "nuclei_channel {} out of range for image '{}'. Using channel index {} instead.",
                requested, image_name, clamped
            );
            self.nuclei_channel_clamped += 1;
        }

        clamped
    }
}

/// Collect per-region shape and intensity statistics for each named label array.
///
/// When `intensity_image` is supplied it is aligned to the first label array with
/// [`IntensityStack::build`] and reused for the remaining arrays, which must share the same
/// shape. Without it, each label array serves as its own single `mask` channel.
///
/// The statistics of channel `nuclei_channel` (clamped to the available channels) are also
/// copied into the unsuffixed intensity columns. Rows are returned per label array in the
/// order given, and by ascending region id within each array.
pub fn extract_label_metrics(
    image_name: &str,
    label_arrays: &[(&str, &LabelArray)],
    intensity_image: Option<&Raster>,
    nuclei_channel: usize,
    channel_names: Option<&[String]>,
    warnings: &mut ImageWarnings,
) -> Result<Vec<MetricsRow>> {
    let mut rows = Vec::new();
    let mut shared_stack: Option<IntensityStack> = None;

    for &(label_name, labels) in label_arrays {
        if let Some(image) = intensity_image {
            match &shared_stack {
                Some(stack) if stack.spatial_shape() != labels.dim() => {
                    return Err(CellExpError::ShapeMismatch {
                        intensity: image.shape().to_vec(),
                        label: labels.dim(),
                    });
                }
                Some(_) => {}
                None => {
                    shared_stack = Some(IntensityStack::build(
                        image,
                        labels.dim(),
                        channel_names,
                    )?);
                }
            }
        }

        let own_stack;
        let stack = match &shared_stack {
            Some(stack) => stack,
            None => {
                own_stack = IntensityStack::from_labels(labels);
                &own_stack
            }
        };

        let regions = regions(labels);
        if regions.is_empty() || stack.num_channels() == 0 {
            continue;
        }

        let nuclei_index =
            warnings.clamp_nuclei_channel(image_name, nuclei_channel, stack.num_channels());
        let nuclei_label = &stack.names()[nuclei_index];

        for region in regions {
            let channels: Vec<(String, ChannelStatistics)> = stack
                .iter()
                .map(|(name, channel)| {
                    (
                        name.to_string(),
                        ChannelStatistics::of_pixels(channel, region.pixels()),
                    )
                })
                .collect();

            rows.push(MetricsRow {
                image: image_name.to_string(),
                label_type: label_name.to_string(),
                label_id: region.label(),
                nuclei_channel: nuclei_index,
                nuclei_channel_label: nuclei_label.clone(),
                nuclei: channels[nuclei_index].1,
                shape: region.properties(),
                channels,
            });
        }
    }

    Ok(rows)
}
