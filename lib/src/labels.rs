use core::fmt;
use std::str::FromStr;

use ndarray::Ix2;

use crate::{
    error::{CellExpError, Result},
    LabelArray, Raster,
};

/// The label arrays produced for every nuclei mask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LabelKind {
    /// Whole cells (nucleus plus cytoplasm)
    Cells,
    /// Nuclei, possibly adjusted by the expansion
    NucleiLabels,
    /// Cells with the nucleus removed
    Cytoplasm,
}

impl LabelKind {
    /// Every label kind, in the order they are measured and written
    pub const ALL: [LabelKind; 3] = [LabelKind::Cells, LabelKind::NucleiLabels, LabelKind::Cytoplasm];

    /// Returns the name used in the `label_type` column
    pub fn name(&self) -> &'static str {
        match self {
            LabelKind::Cells => "Cells",
            LabelKind::NucleiLabels => "NucleiLabels",
            LabelKind::Cytoplasm => "Cytoplasm",
        }
    }

    /// Returns the suffix appended to the mask's file stem for the output label image
    pub fn suffix(&self) -> &'static str {
        match self {
            LabelKind::Cells => "_cell_labels.tif",
            LabelKind::NucleiLabels => "_nuclei_labels.tif",
            LabelKind::Cytoplasm => "_cytoplasm_labels.tif",
        }
    }

    /// Returns the output file name for the label image derived from `mask_filename`
    pub fn output_filename(&self, mask_filename: &str) -> String {
        let stem = match mask_filename.rfind('.') {
            Some(index) if index > 0 => &mask_filename[..index],
            _ => mask_filename,
        };

        format!("{}{}", stem, self.suffix())
    }
}

impl fmt::Display for LabelKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for LabelKind {
    type Err = CellExpError;

    fn from_str(name: &str) -> Result<Self> {
        LabelKind::ALL
            .iter()
            .find(|kind| kind.name() == name)
            .copied()
            .ok_or_else(|| CellExpError::validation(format!("unknown label type '{}'", name)))
    }
}

/// Convert a raster to a label array. The raster must be 2-D and hold non-negative values
/// that fit in a `u32`; fractional values are rounded to the nearest label.
pub fn to_label_array(raster: Raster, description: &str) -> Result<LabelArray> {
    if raster.ndim() != 2 {
        return Err(CellExpError::validation(format!(
            "{} has shape {:?}, too many channels for a nuclei mask",
            description,
            raster.shape()
        )));
    }

    let raster = raster.into_dimensionality::<Ix2>()?;

    if let Some(value) = raster
        .iter()
        .find(|v| !v.is_finite() || **v < 0.0 || v.round() > f64::from(u32::MAX))
    {
        return Err(CellExpError::validation(format!(
            "{} contains value {} which is not a valid label",
            description, value
        )));
    }

    Ok(raster.mapv(|v| v.round() as u32))
}

#[cfg(test)]
mod tests {
    use ndarray::{Array, IxDyn};

    use super::*;

    #[test]
    fn output_filenames() {
        assert_eq!(
            LabelKind::Cells.output_filename("sample_nuclei_mask.tif"),
            "sample_nuclei_mask_cell_labels.tif"
        );
        assert_eq!(
            LabelKind::NucleiLabels.output_filename("a.b.png"),
            "a.b_nuclei_labels.tif"
        );
        assert_eq!(
            LabelKind::Cytoplasm.output_filename("noext"),
            "noext_cytoplasm_labels.tif"
        );
    }

    #[test]
    fn label_kind_from_name() {
        for kind in LabelKind::ALL {
            assert_eq!(kind.name().parse::<LabelKind>().unwrap(), kind);
        }

        assert!(matches!(
            "Membrane".parse::<LabelKind>(),
            Err(CellExpError::Validation { .. })
        ));
    }

    #[test]
    fn raster_to_labels() {
        let raster = Array::from_shape_vec(IxDyn(&[2, 2]), vec![0.0, 1.0, 2.9999999, 4.0]).unwrap();
        let labels = to_label_array(raster, "mask").unwrap();

        assert_eq!(labels.into_raw_vec(), vec![0, 1, 3, 4]);
    }

    #[test]
    fn three_dimensional_raster_is_rejected() {
        let raster = Array::zeros(IxDyn(&[2, 2, 5]));

        assert!(matches!(
            to_label_array(raster, "mask"),
            Err(CellExpError::Validation { .. })
        ));
    }

    #[test]
    fn negative_labels_are_rejected() {
        let raster = Array::from_shape_vec(IxDyn(&[1, 2]), vec![0.0, -1.0]).unwrap();

        assert!(matches!(
            to_label_array(raster, "mask"),
            Err(CellExpError::Validation { .. })
        ));
    }
}
