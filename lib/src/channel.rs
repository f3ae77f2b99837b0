use std::collections::HashSet;

use ndarray::{Array3, ArrayView2, Axis, Ix2, Ix3};

use crate::{
    error::{CellExpError, Result},
    LabelArray, Raster,
};

/// Name given to the pseudo-channel used when no intensity image is available
pub const MASK_CHANNEL_NAME: &str = "mask";

/// A stack of intensity channels aligned to the spatial shape of a label array.
///
/// Channels are stored channel-first, so `channels[[c, row, col]]` is the value of
/// channel `c` at the given pixel. Every channel has a unique, non-empty name.
#[derive(Debug, Clone)]
pub struct IntensityStack {
    channels: Array3<f64>,
    names: Vec<String>,
}

impl IntensityStack {
    /// Build a channel stack from an intensity image so that it lines up with a label array
    /// of shape `label_shape` (rows, cols).
    ///
    /// A 2-D image must match `label_shape` exactly. A 3-D image is accepted either as
    /// (rows, cols, channels), which is reordered to channel-first, or as
    /// (channels, rows, cols). If `channel_names` is supplied it must contain one name per
    /// channel; names are normalised with [`normalise_channel_name`].
    pub fn build(
        image: &Raster,
        label_shape: (usize, usize),
        channel_names: Option<&[String]>,
    ) -> Result<Self> {
        let (rows, cols) = label_shape;
        let shape = image.shape();

        let channels = match image.ndim() {
            2 => {
                if shape != [rows, cols] {
                    return Err(shape_mismatch(shape, label_shape));
                }

                image
                    .view()
                    .into_dimensionality::<Ix2>()?
                    .insert_axis(Axis(0))
                    .to_owned()
            }
            3 => {
                let stack = image.view().into_dimensionality::<Ix3>()?;

                if shape[..2] == [rows, cols] {
                    stack.permuted_axes([2, 0, 1]).as_standard_layout().into_owned()
                } else if shape[1..] == [rows, cols] {
                    stack.to_owned()
                } else {
                    return Err(shape_mismatch(shape, label_shape));
                }
            }
            rank => return Err(CellExpError::UnsupportedRank { rank }),
        };

        let num_channels = channels.len_of(Axis(0));
        let names = match channel_names {
            Some(names) => {
                if names.len() != num_channels {
                    return Err(CellExpError::validation(format!(
                        "{} channel names supplied for an image with {} channels",
                        names.len(),
                        num_channels
                    )));
                }

                normalise_channel_names(names)
            }
            None => (0..num_channels).map(positional_name).collect(),
        };

        Ok(IntensityStack { channels, names })
    }

    /// Use the label array itself as a single pseudo-channel named `mask`
    pub fn from_labels(labels: &LabelArray) -> Self {
        IntensityStack {
            channels: labels.mapv(f64::from).insert_axis(Axis(0)),
            names: vec![MASK_CHANNEL_NAME.to_string()],
        }
    }

    /// Returns the number of channels in the stack
    pub fn num_channels(&self) -> usize {
        self.names.len()
    }

    /// Returns the channel names, in channel order
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Returns the spatial shape (rows, cols) shared by every channel
    pub fn spatial_shape(&self) -> (usize, usize) {
        let (_, rows, cols) = self.channels.dim();
        (rows, cols)
    }

    /// Returns a view of the channel at `index`
    pub fn channel(&self, index: usize) -> ArrayView2<'_, f64> {
        self.channels.index_axis(Axis(0), index)
    }

    /// Iterate over (name, channel) pairs in channel order
    pub fn iter(&self) -> impl Iterator<Item = (&str, ArrayView2<'_, f64>)> + '_ {
        self.names
            .iter()
            .map(String::as_str)
            .zip(self.channels.axis_iter(Axis(0)))
    }
}

fn shape_mismatch(shape: &[usize], label: (usize, usize)) -> CellExpError {
    CellExpError::ShapeMismatch {
        intensity: shape.to_vec(),
        label,
    }
}

fn positional_name(index: usize) -> String {
    format!("ch{}", index)
}

/// Normalise a user supplied channel name so that it can be used as part of a column name.
///
/// The name is lower-cased, whitespace and any other character that is not alphanumeric
/// or `_` is replaced with `_`, and leading/trailing `_` are removed. The result may be
/// empty. Applying the function to its own output returns the same string.
pub fn normalise_channel_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '_' })
        .collect();

    cleaned.trim_matches('_').to_string()
}

/// Normalise a list of channel names, replacing empty or duplicated results with `ch<index>`
pub fn normalise_channel_names<S: AsRef<str>>(names: &[S]) -> Vec<String> {
    let mut seen = HashSet::with_capacity(names.len());
    let mut normalised = Vec::with_capacity(names.len());

    for (index, name) in names.iter().enumerate() {
        let mut label = normalise_channel_name(name.as_ref());

        if label.is_empty() || seen.contains(&label) {
            label = positional_name(index);

            // An earlier user supplied name may already be "ch<index>"
            let mut attempt = 1;
            while seen.contains(&label) {
                label = format!("{}_{}", positional_name(index), attempt);
                attempt += 1;
            }
        }

        seen.insert(label.clone());
        normalised.push(label);
    }

    normalised
}
