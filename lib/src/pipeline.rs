use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use log::{debug, info, warn};
use rayon::prelude::*;

use crate::{
    config::Parameters,
    error::{CellExpError, Result},
    expansion::{CellExpansion, ExpandedLabels, NearestNucleusExpansion},
    images,
    job::JobContext,
    labels::{self, LabelKind},
    metrics::{extract_label_metrics, ImageWarnings, MetricsRow},
    pairing::{self, PairingEntry},
    table::{MetricsTable, DEFAULT_TABLE_FILENAME},
    LabelArray,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Initialized,
    Paired,
    Read,
    Expand,
    Stage,
    Measure,
    Finalized,
    CleanedUp,
}

fn enter(state: RunState, detail: &str) {
    debug!("{:?}: {}", state, detail);
}

/// Staging directory for label images. The directory and its contents are removed when the
/// area is dropped, so an aborted run leaves nothing behind.
#[derive(Debug)]
pub struct ScratchArea {
    path: PathBuf,
    removed: bool,
}

impl ScratchArea {
    /// Create the directory at `path` (and any missing parents)
    pub fn create<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let path = path.into();
        std::fs::create_dir_all(&path)?;

        Ok(ScratchArea {
            path,
            removed: false,
        })
    }

    /// Returns the staging directory
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the staging directory. A failure is logged rather than returned.
    pub fn remove(mut self) {
        self.remove_directory();
    }

    fn remove_directory(&mut self) {
        if self.removed {
            return;
        }
        self.removed = true;

        if let Err(error) = std::fs::remove_dir_all(&self.path) {
            warn!("Could not remove {:?}: {}", self.path, error);
        }
    }
}

impl Drop for ScratchArea {
    fn drop(&mut self) {
        self.remove_directory();
    }
}

/// What a completed run produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    /// Number of masks processed
    pub images: usize,
    /// Number of rows in the metrics table
    pub rows: usize,
    /// The metrics table, if any rows were produced
    pub table: Option<PathBuf>,
    /// Label images copied to the output directory
    pub outputs: Vec<PathBuf>,
    /// Label images that were expected but not found in the scratch area
    pub missing_outputs: Vec<PathBuf>,
    /// Intensity images without a mask
    pub unmatched_intensity: usize,
    /// Intensity images passed over because of a key collision
    pub collisions: usize,
}

fn labelled(expanded: &ExpandedLabels) -> [(LabelKind, &LabelArray); 3] {
    [
        (LabelKind::Cells, &expanded.cells),
        (LabelKind::NucleiLabels, &expanded.nuclei),
        (LabelKind::Cytoplasm, &expanded.cytoplasm),
    ]
}

/// Runs cell expansion and quantification over every mask of a job
pub struct Pipeline<E: CellExpansion> {
    context: JobContext,
    parameters: Parameters,
    expansion: E,
}

impl Pipeline<NearestNucleusExpansion> {
    /// Create a pipeline using [`NearestNucleusExpansion`]
    pub fn with_default_expansion(context: JobContext, parameters: Parameters) -> Self {
        Pipeline::new(context, parameters, NearestNucleusExpansion)
    }
}

impl<E: CellExpansion> Pipeline<E> {
    /// Create a pipeline that expands nuclei with `expansion`
    pub fn new(context: JobContext, parameters: Parameters, expansion: E) -> Self {
        Pipeline {
            context,
            parameters,
            expansion,
        }
    }

    /// Returns the job context
    pub fn context(&self) -> &JobContext {
        &self.context
    }

    /// Returns the run parameters
    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    /// Process every mask, copy the label images to the output directory and write the
    /// metrics table.
    ///
    /// Any pairing, reading, expansion or validation error aborts the run, and images after a
    /// failing one are not processed. With [`Parameters::parallel`] images are processed on the
    /// rayon thread pool and rows are still accumulated in pairing order. If several images fail
    /// concurrently, any one of their errors may be returned.
    pub fn run(&self) -> Result<RunSummary> {
        self.context.prepare()?;
        let scratch = ScratchArea::create(self.context.scratch_dir())?;
        enter(RunState::Initialized, &format!("scratch area {:?}", scratch.path()));

        info!(
            "Parameters: max_pixels {}, discard_cells_without_cytoplasm {}, nuclei_channel {}",
            self.parameters.max_pixels,
            self.parameters.discard_cells_without_cytoplasm,
            self.parameters.nuclei_channel
        );

        let discovery = self.context.discover()?;
        let resolution = pairing::resolve(&discovery.masks, &discovery.intensities)?;
        enter(
            RunState::Paired,
            &format!("{} pairs", resolution.entries.len()),
        );

        info!("Processing {} images", resolution.entries.len());

        check_output_names(&resolution.entries)?;

        // Both modes stop scheduling further images after the first failure
        let batches: Vec<Vec<MetricsRow>> = if self.parameters.parallel {
            resolution
                .entries
                .par_iter()
                .map(|entry| self.process(entry, scratch.path()))
                .collect::<Result<_>>()?
        } else {
            resolution
                .entries
                .iter()
                .map(|entry| self.process(entry, scratch.path()))
                .collect::<Result<_>>()?
        };

        let mut table = MetricsTable::new();
        for batch in batches {
            table.accumulate(batch);
        }

        let (outputs, missing_outputs) =
            finalize_outputs(&resolution.entries, scratch.path(), self.context.output_dir())?;
        let table_path = table.write(self.context.output_dir(), DEFAULT_TABLE_FILENAME)?;
        if table_path.is_none() {
            info!("No regions found, metrics table not written");
        }
        enter(
            RunState::Finalized,
            &format!("{} label images copied", outputs.len()),
        );

        scratch.remove();
        enter(RunState::CleanedUp, "scratch area removed");

        info!("Finished.");

        Ok(RunSummary {
            images: resolution.entries.len(),
            rows: table.len(),
            table: table_path,
            outputs,
            missing_outputs,
            unmatched_intensity: resolution.unmatched_intensity.len(),
            collisions: resolution.collisions.len(),
        })
    }

    /// Read, expand, stage and measure one mask
    fn process(&self, entry: &PairingEntry, scratch: &Path) -> Result<Vec<MetricsRow>> {
        let mask = &entry.mask;

        enter(RunState::Read, &mask.filename);
        let raster = images::read_raster(&mask.path)?;
        let raster = if raster.ndim() == 3 {
            images::to_grayscale(raster)
        } else {
            raster
        };
        let nuclei = labels::to_label_array(raster, &mask.filename)?;

        enter(RunState::Expand, &mask.filename);
        let expanded = self.expansion.expand(
            &nuclei,
            self.parameters.max_pixels,
            self.parameters.discard_cells_without_cytoplasm,
        )?;

        enter(RunState::Stage, &mask.filename);
        for (kind, labels) in labelled(&expanded) {
            let path = scratch.join(kind.output_filename(&mask.filename));
            images::write_labels(&path, labels)?;
            debug!("Wrote {} labels to {:?}", kind, path);
        }

        enter(RunState::Measure, &mask.filename);
        let intensity = match &entry.intensity {
            Some(record) => Some(images::read_raster(&record.path)?),
            None => None,
        };

        let label_arrays: Vec<(&str, &LabelArray)> = labelled(&expanded)
            .into_iter()
            .map(|(kind, labels)| (kind.name(), labels))
            .collect();

        let mut warnings = ImageWarnings::new();
        let rows = extract_label_metrics(
            &mask.filename,
            &label_arrays,
            intensity.as_ref(),
            self.parameters.nuclei_channel,
            self.parameters.channel_names.as_deref(),
            &mut warnings,
        )?;

        info!("{}: {} rows", mask.filename, rows.len());

        Ok(rows)
    }
}

/// Fail if two masks would be staged under the same label image names, e.g. `a_mask.tif` and
/// `a_mask.png`.
fn check_output_names(entries: &[PairingEntry]) -> Result<()> {
    let mut staged: HashMap<String, &str> = HashMap::with_capacity(entries.len());

    for entry in entries {
        // All label kinds share the stem, so checking one name is enough
        let name = LabelKind::Cells.output_filename(&entry.mask.filename);

        if let Some(previous) = staged.insert(name.clone(), &entry.mask.filename) {
            return Err(CellExpError::validation(format!(
                "masks {} and {} would both be written as {}",
                previous, entry.mask.filename, name
            )));
        }
    }

    Ok(())
}

/// Copy the staged label images of every entry to `output_dir`.
///
/// Returns the copied files and the staged files that could not be found.
fn finalize_outputs(
    entries: &[PairingEntry],
    scratch: &Path,
    output_dir: &Path,
) -> Result<(Vec<PathBuf>, Vec<PathBuf>)> {
    std::fs::create_dir_all(output_dir)?;

    let mut copied = Vec::new();
    let mut missing = Vec::new();

    for entry in entries {
        for kind in LabelKind::ALL {
            let filename = kind.output_filename(&entry.mask.filename);
            let source = scratch.join(&filename);

            if !source.exists() {
                warn!(
                    "Expected {} labels missing for {}",
                    kind, entry.mask.filename
                );
                missing.push(source);
                continue;
            }

            let destination = output_dir.join(&filename);
            match std::fs::copy(&source, &destination) {
                Ok(_) => {
                    debug!("Copied {:?} to {:?}", source, destination);
                    copied.push(destination);
                }
                Err(error) => {
                    warn!("Could not copy {:?} to {:?}: {}", source, destination, error);
                    missing.push(source);
                }
            }
        }
    }

    Ok((copied, missing))
}

/// Run the pipeline with [`NearestNucleusExpansion`]
pub fn run(context: JobContext, parameters: Parameters) -> Result<RunSummary> {
    Pipeline::with_default_expansion(context, parameters).run()
}

#[cfg(test)]
mod tests {
    use ndarray::s;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::{job::ImageRecord, metrics::FieldValue};

    use super::*;

    /// Returns the nuclei as cells, leaving no cytoplasm
    struct Unexpanded;

    impl CellExpansion for Unexpanded {
        fn expand(&self, nuclei: &LabelArray, _: u32, _: bool) -> Result<ExpandedLabels> {
            Ok(ExpandedLabels {
                nuclei: nuclei.clone(),
                cells: nuclei.clone(),
                cytoplasm: LabelArray::zeros(nuclei.dim()),
            })
        }
    }

    struct Failing;

    impl CellExpansion for Failing {
        fn expand(&self, _: &LabelArray, _: u32, _: bool) -> Result<ExpandedLabels> {
            Err(CellExpError::validation("expansion failed"))
        }
    }

    /// Fails every call, counting how often it was asked to expand
    #[derive(Default)]
    struct CountingFailure {
        calls: AtomicUsize,
    }

    impl CellExpansion for CountingFailure {
        fn expand(&self, _: &LabelArray, _: u32, _: bool) -> Result<ExpandedLabels> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(CellExpError::validation("expansion failed"))
        }
    }

    fn write_sample(dir: &Path, stem: &str, label: u32) -> Result<()> {
        let mut mask = LabelArray::zeros((6, 6));
        mask.slice_mut(s![2..4, 2..4]).fill(label);
        images::write_labels(dir.join(format!("{}_nuclei_mask.tif", stem)), &mask)?;

        let intensity = LabelArray::from_shape_fn((6, 6), |(r, c)| (r * 6 + c) as u32);
        images::write_labels(dir.join(format!("{}_gfp.tif", stem)), &intensity)?;

        Ok(())
    }

    fn context(dir: &Path) -> Result<JobContext> {
        let input = dir.join("in");
        std::fs::create_dir_all(&input)?;

        JobContext::new(Some(input), Some(dir.join("out")))
    }

    fn parameters(parallel: bool) -> Parameters {
        Parameters {
            max_pixels: 1,
            parallel,
            ..Parameters::default()
        }
    }

    #[test]
    fn labels_and_table_are_written() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let context = context(dir.path())?;
        write_sample(context.input_dir(), "s", 3)?;
        let output = context.output_dir().to_path_buf();
        let scratch = context.scratch_dir();

        let summary = run(context, parameters(false))?;

        assert_eq!(summary.images, 1);
        assert_eq!(summary.rows, 3);
        assert_eq!(summary.outputs.len(), 3);
        assert!(summary.missing_outputs.is_empty());
        for suffix in ["_cell_labels.tif", "_nuclei_labels.tif", "_cytoplasm_labels.tif"] {
            assert!(output.join(format!("s_nuclei_mask{}", suffix)).is_file());
        }
        assert!(!scratch.exists());

        let table = MetricsTable::read_from_path(output.join(DEFAULT_TABLE_FILENAME))?;
        let label_types: Vec<&FieldValue> = table.rows().iter().map(|r| &r["label_type"]).collect();
        assert_eq!(
            label_types,
            vec![
                &FieldValue::Text("Cells".to_string()),
                &FieldValue::Text("NucleiLabels".to_string()),
                &FieldValue::Text("Cytoplasm".to_string()),
            ]
        );

        let nucleus = &table.rows()[1];
        assert_eq!(nucleus["image"], FieldValue::Text("s_nuclei_mask.tif".to_string()));
        assert_eq!(nucleus["label_id"], FieldValue::Integer(3));
        assert_eq!(nucleus["area"], FieldValue::Float(4.0));
        // Pixels 14, 15, 20 and 21
        assert_eq!(nucleus["mean_intensity"], FieldValue::Float(17.5));
        assert_eq!(nucleus["mean_intensity_ch0"], FieldValue::Float(17.5));

        Ok(())
    }

    #[test]
    fn label_arrays_without_regions_produce_no_rows() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let context = context(dir.path())?;
        write_sample(context.input_dir(), "s", 1)?;

        let summary = Pipeline::new(context, parameters(false), Unexpanded).run()?;

        assert_eq!(summary.rows, 2);
        // The empty cytoplasm image is still written
        assert_eq!(summary.outputs.len(), 3);

        Ok(())
    }

    #[test]
    fn parallel_run_matches_sequential() -> Result<()> {
        let mut tables = Vec::new();

        for parallel in [false, true] {
            let dir = tempfile::tempdir()?;
            let context = context(dir.path())?;
            for (index, stem) in ["a", "b", "c", "d"].iter().enumerate() {
                write_sample(context.input_dir(), stem, index as u32 + 1)?;
            }
            let output = context.output_dir().to_path_buf();

            run(context, parameters(parallel))?;

            tables.push(MetricsTable::read_from_path(output.join(DEFAULT_TABLE_FILENAME))?);
        }

        assert_eq!(tables[0].len(), 12);
        assert_eq!(tables[0].rows(), tables[1].rows());

        Ok(())
    }

    #[test]
    fn no_masks_aborts_and_cleans_up() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let context = context(dir.path())?;
        let scratch = context.scratch_dir();

        let result = run(context, parameters(false));

        assert!(matches!(result, Err(CellExpError::Pairing { .. })));
        assert!(!scratch.exists());

        Ok(())
    }

    #[test]
    fn expansion_errors_abort_the_run() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let context = context(dir.path())?;
        write_sample(context.input_dir(), "s", 1)?;
        let output = context.output_dir().to_path_buf();

        let result = Pipeline::new(context, parameters(true), Failing).run();

        assert!(matches!(result, Err(CellExpError::Validation { .. })));
        assert!(!output.join(DEFAULT_TABLE_FILENAME).exists());

        Ok(())
    }

    #[test]
    fn first_failure_stops_sequential_run() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let context = context(dir.path())?;
        for (index, stem) in ["a", "b", "c", "d"].iter().enumerate() {
            write_sample(context.input_dir(), stem, index as u32 + 1)?;
        }

        let pipeline = Pipeline::new(context, parameters(false), CountingFailure::default());
        let result = pipeline.run();

        assert!(matches!(result, Err(CellExpError::Validation { .. })));
        assert_eq!(pipeline.expansion.calls.load(Ordering::SeqCst), 1);

        Ok(())
    }

    #[test]
    fn masks_sharing_a_stem_are_rejected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let context = context(dir.path())?;
        for name in ["a_mask.tif", "a_mask.png", "a.tif"] {
            std::fs::write(context.input_dir().join(name), b"")?;
        }
        let output = context.output_dir().to_path_buf();

        let pipeline = Pipeline::new(context, parameters(false), CountingFailure::default());
        let result = pipeline.run();

        assert!(matches!(result, Err(CellExpError::Validation { .. })));
        assert_eq!(pipeline.expansion.calls.load(Ordering::SeqCst), 0);
        assert!(!output.join("a_mask_cell_labels.tif").exists());

        Ok(())
    }

    #[test]
    fn missing_staged_files_are_skipped() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let scratch = dir.path().join("scratch");
        let output = dir.path().join("out");
        std::fs::create_dir_all(&scratch)?;
        std::fs::write(scratch.join("m_mask_cell_labels.tif"), b"labels")?;

        let entries = vec![PairingEntry {
            key: "m".to_string(),
            mask: ImageRecord::new("m_mask.tif", "m_mask.tif"),
            intensity: None,
        }];

        let (copied, missing) = finalize_outputs(&entries, &scratch, &output)?;

        assert_eq!(copied, vec![output.join("m_mask_cell_labels.tif")]);
        assert_eq!(missing.len(), 2);
        assert!(output.join("m_mask_cell_labels.tif").is_file());

        Ok(())
    }

    #[test]
    fn scratch_area_is_removed_on_drop() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("tmp").join("cell_expansion_tmp");

        {
            let scratch = ScratchArea::create(&path)?;
            std::fs::write(scratch.path().join("staged.tif"), b"")?;
        }

        assert!(!path.exists());
        assert!(dir.path().join("tmp").exists());

        Ok(())
    }
}
