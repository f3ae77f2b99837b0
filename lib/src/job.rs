use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::error::{CellExpError, Result};

/// File suffixes considered when none (or only blank ones) are given
pub const DEFAULT_SUFFIXES: [&str; 7] = [".tif", ".tiff", ".png", ".jpg", ".jpeg", ".bmp", ".npy"];

/// Name of the run's scratch area inside the temporary directory
pub const SCRATCH_DIRECTORY_NAME: &str = "cell_expansion_tmp";

const TEMP_DIRECTORY_NAME: &str = "tmp";
const MASK_STEM_SUFFIX: &str = "_mask";

/// A raster file discovered in one of the job's directories
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRecord {
    /// File name, including extension
    pub filename: String,
    /// File name as originally supplied (identical to `filename` for local files)
    pub original_filename: String,
    /// Full path to the file
    pub path: PathBuf,
}

impl ImageRecord {
    /// Create a record for the file called `filename` located at `path`
    pub fn new<P: Into<PathBuf>>(filename: &str, path: P) -> Self {
        ImageRecord {
            filename: filename.to_string(),
            original_filename: filename.to_string(),
            path: path.into(),
        }
    }

    /// Returns true if the file stem ends with `_mask`, ignoring case
    pub fn is_mask(&self) -> bool {
        let stem = match self.filename.rfind('.') {
            Some(index) if index > 0 => &self.filename[..index],
            _ => &self.filename,
        };

        stem.to_lowercase().ends_with(MASK_STEM_SUFFIX)
    }
}

/// Normalise a suffix allow-list: entries are trimmed, lower-cased and given a leading `.`.
/// Blank entries are dropped and an empty result falls back to [`DEFAULT_SUFFIXES`].
pub fn normalise_suffixes<S: AsRef<str>>(suffixes: &[S]) -> Vec<String> {
    let normalised: Vec<String> = suffixes
        .iter()
        .map(|suffix| suffix.as_ref().trim().to_lowercase())
        .filter(|suffix| !suffix.is_empty())
        .map(|suffix| {
            if suffix.starts_with('.') {
                suffix
            } else {
                format!(".{}", suffix)
            }
        })
        .collect();

    if normalised.is_empty() {
        DEFAULT_SUFFIXES.iter().map(|s| s.to_string()).collect()
    } else {
        normalised
    }
}

/// List the files of `directory` whose extension is in `suffixes`, sorted by file name.
///
/// A directory that does not exist contains no images.
pub fn collect_images<P: AsRef<Path>>(directory: P, suffixes: &[String]) -> Result<Vec<ImageRecord>> {
    let directory = directory.as_ref();
    if !directory.exists() {
        debug!("{:?} does not exist, no images collected", directory);
        return Ok(Vec::new());
    }

    let mut records = Vec::new();
    for entry in std::fs::read_dir(directory)? {
        let entry = entry?;
        let path = entry.path();

        if !path.is_file() {
            continue;
        }

        let suffix = match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) => format!(".{}", ext.to_lowercase()),
            None => continue,
        };
        if !suffixes.contains(&suffix) {
            continue;
        }

        let filename = entry.file_name().to_string_lossy().into_owned();
        records.push(ImageRecord::new(&filename, path));
    }

    records.sort_by(|a, b| a.filename.cmp(&b.filename));

    Ok(records)
}

/// The files a run works on
#[derive(Debug, Clone, Default)]
pub struct Discovery {
    /// Nuclei masks, sorted by file name
    pub masks: Vec<ImageRecord>,
    /// Intensity images, sorted by file name
    pub intensities: Vec<ImageRecord>,
    /// Ground truth images, sorted by file name
    pub ground_truth: Vec<ImageRecord>,
}

/// Directories and file filter for one run
#[derive(Debug, Clone)]
pub struct JobContext {
    input_dir: PathBuf,
    output_dir: PathBuf,
    gt_dir: Option<PathBuf>,
    temp_dir: PathBuf,
    intensity_dir: Option<PathBuf>,
    suffixes: Vec<String>,
}

impl JobContext {
    /// Create a context from the input and output directories, both of which are required.
    /// The temporary directory defaults to `<output_dir>/tmp`.
    pub fn new(input_dir: Option<PathBuf>, output_dir: Option<PathBuf>) -> Result<Self> {
        let input_dir =
            input_dir.ok_or_else(|| CellExpError::config("no input directory was given"))?;
        let output_dir =
            output_dir.ok_or_else(|| CellExpError::config("no output directory was given"))?;
        let temp_dir = output_dir.join(TEMP_DIRECTORY_NAME);

        Ok(JobContext {
            input_dir,
            output_dir,
            gt_dir: None,
            temp_dir,
            intensity_dir: None,
            suffixes: normalise_suffixes::<&str>(&[]),
        })
    }

    /// Set the ground truth directory
    pub fn with_gt_dir(mut self, gt_dir: Option<PathBuf>) -> Self {
        self.gt_dir = gt_dir;
        self
    }

    /// Override the temporary directory, if one is given
    pub fn with_temp_dir(mut self, temp_dir: Option<PathBuf>) -> Self {
        if let Some(temp_dir) = temp_dir {
            self.temp_dir = temp_dir;
        }
        self
    }

    /// Read intensity images from a separate directory rather than the input directory
    pub fn with_intensity_dir(mut self, intensity_dir: Option<PathBuf>) -> Self {
        self.intensity_dir = intensity_dir;
        self
    }

    /// Restrict discovery to files with the given suffixes (see [`normalise_suffixes`])
    pub fn with_suffixes<S: AsRef<str>>(mut self, suffixes: &[S]) -> Self {
        self.suffixes = normalise_suffixes(suffixes);
        self
    }

    /// Returns the input directory
    pub fn input_dir(&self) -> &Path {
        &self.input_dir
    }

    /// Returns the output directory
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Returns the ground truth directory, if any
    pub fn gt_dir(&self) -> Option<&Path> {
        self.gt_dir.as_deref()
    }

    /// Returns the temporary directory
    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    /// Returns the separate intensity directory, if any
    pub fn intensity_dir(&self) -> Option<&Path> {
        self.intensity_dir.as_deref()
    }

    /// Returns the normalised suffix allow-list
    pub fn suffixes(&self) -> &[String] {
        &self.suffixes
    }

    /// Returns the scratch area used to stage label images during a run
    pub fn scratch_dir(&self) -> PathBuf {
        self.temp_dir.join(SCRATCH_DIRECTORY_NAME)
    }

    /// Create the input, output and temporary directories if they do not exist
    pub fn prepare(&self) -> Result<()> {
        for directory in [&self.input_dir, &self.output_dir, &self.temp_dir] {
            std::fs::create_dir_all(directory)?;
        }

        Ok(())
    }

    /// Enumerate the masks, intensity images and ground truth of the run.
    ///
    /// With a separate intensity directory every input file is a mask. Otherwise input files
    /// whose stem ends with `_mask` are masks and the remainder are intensity images.
    pub fn discover(&self) -> Result<Discovery> {
        let inputs = collect_images(&self.input_dir, &self.suffixes)?;

        let (masks, intensities) = match &self.intensity_dir {
            Some(intensity_dir) => (inputs, collect_images(intensity_dir, &self.suffixes)?),
            None => inputs.into_iter().partition(ImageRecord::is_mask),
        };

        let ground_truth = match &self.gt_dir {
            Some(gt_dir) => collect_images(gt_dir, &self.suffixes)?,
            None => Vec::new(),
        };

        info!(
            "Found {} masks, {} intensity images and {} ground truth images",
            masks.len(),
            intensities.len(),
            ground_truth.len()
        );

        Ok(Discovery {
            masks,
            intensities,
            ground_truth,
        })
    }
}
