use std::collections::HashSet;

use log::debug;

use crate::{error::Result, LabelArray};

/// Nuclei, cell and cytoplasm labels produced by expanding a nuclei mask.
///
/// A label value identifies the same object in all three arrays.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpandedLabels {
    /// Nuclei labels
    pub nuclei: LabelArray,
    /// Whole cells (nucleus plus cytoplasm)
    pub cells: LabelArray,
    /// Cells with the nucleus removed
    pub cytoplasm: LabelArray,
}

/// Grows labelled nuclei into whole cells.
///
/// Implementations must be deterministic and are shared between worker threads when images are
/// processed in parallel.
pub trait CellExpansion: Sync {
    /// Expand `nuclei` by at most `max_pixels`. With `discard_cells_without_cytoplasm`, labels
    /// left without any cytoplasm are removed from all returned arrays.
    fn expand(
        &self,
        nuclei: &LabelArray,
        max_pixels: u32,
        discard_cells_without_cytoplasm: bool,
    ) -> Result<ExpandedLabels>;
}

/// Assigns every background pixel within `max_pixels` (Euclidean) of a nucleus to the nearest
/// nucleus. Pixels equidistant from several nuclei go to the first one found in the search order.
#[derive(Debug, Clone, Copy, Default)]
pub struct NearestNucleusExpansion;

/// Offsets within `radius` of the origin, sorted by squared distance then row then column
fn search_offsets(radius: u32) -> Vec<(i64, i64)> {
    let radius = i64::from(radius);
    let radius_squared = radius * radius;

    let mut offsets = Vec::new();
    for dr in -radius..=radius {
        for dc in -radius..=radius {
            if dr * dr + dc * dc <= radius_squared {
                offsets.push((dr, dc));
            }
        }
    }

    offsets.sort_by_key(|&(dr, dc)| (dr * dr + dc * dc, dr, dc));
    offsets
}

/// Search radius for an image of `rows` by `cols`. No two pixels are further apart than the
/// diagonal, so `max_pixels` is capped there.
fn reach(max_pixels: u32, rows: usize, cols: usize) -> u32 {
    let height = rows.saturating_sub(1) as f64;
    let width = cols.saturating_sub(1) as f64;
    let diagonal = (height * height + width * width).sqrt().ceil();

    if diagonal >= f64::from(max_pixels) {
        max_pixels
    } else {
        diagonal as u32
    }
}

impl CellExpansion for NearestNucleusExpansion {
    fn expand(
        &self,
        nuclei: &LabelArray,
        max_pixels: u32,
        discard_cells_without_cytoplasm: bool,
    ) -> Result<ExpandedLabels> {
        let (rows, cols) = nuclei.dim();
        let (rows_i, cols_i) = (rows as i64, cols as i64);

        let offsets = search_offsets(reach(max_pixels, rows, cols));
        debug!("Expanding nuclei using {} search offsets", offsets.len());

        let mut cells = nuclei.clone();
        for ((row, col), cell) in cells.indexed_iter_mut() {
            if *cell != 0 {
                continue;
            }

            // Offsets are sorted by distance, so the first nucleus found is the nearest
            let nearest = offsets.iter().find_map(|&(dr, dc)| {
                let (r, c) = (row as i64 + dr, col as i64 + dc);
                if r < 0 || r >= rows_i || c < 0 || c >= cols_i {
                    return None;
                }

                match nuclei[[r as usize, c as usize]] {
                    0 => None,
                    label => Some(label),
                }
            });

            if let Some(label) = nearest {
                *cell = label;
            }
        }

        let mut cytoplasm = cells.clone();
        cytoplasm.zip_mut_with(nuclei, |cyto, &nucleus| {
            if nucleus != 0 {
                *cyto = 0;
            }
        });

        let mut nuclei = nuclei.clone();

        if discard_cells_without_cytoplasm {
            let with_cytoplasm: HashSet<u32> =
                cytoplasm.iter().copied().filter(|&l| l != 0).collect();
            let mut discarded = HashSet::new();

            for label in nuclei.iter_mut().chain(cells.iter_mut()) {
                if *label != 0 && !with_cytoplasm.contains(label) {
                    discarded.insert(*label);
                    *label = 0;
                }
            }

            debug!("Discarded {} cells without cytoplasm", discarded.len());
        }

        Ok(ExpandedLabels {
            nuclei,
            cells,
            cytoplasm,
        })
    }
}
