use std::{io, path::PathBuf, result};

use thiserror::Error;

/// A type alias for `Result<T, cellexp_rs::CellExpError>`.
pub type Result<T> = result::Result<T, CellExpError>;

/// Describes what has gone wrong during a cell expansion run
#[derive(Error, Debug)]
pub enum CellExpError {
    /// Run parameters are missing or could not be interpreted
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the offending setting
        message: String,
    },

    /// Masks and intensity images could not be paired
    #[error("pairing failed: {message}")]
    Pairing {
        /// Description of the pairing problem
        message: String,
    },

    /// The intensity image cannot be aligned with the label array
    #[error("intensity shape {intensity:?} cannot be aligned with label shape {label:?}")]
    ShapeMismatch {
        /// Shape of the intensity image
        intensity: Vec<usize>,
        /// Shape of the label array
        label: (usize, usize),
    },

    /// The intensity image has a dimensionality other than 2 or 3
    #[error("intensity image must be 2-D or 3-D, got {rank} dimensions")]
    UnsupportedRank {
        /// Number of dimensions found
        rank: usize,
    },

    /// Input data is not valid for the requested operation
    #[error("validation failed: {message}")]
    Validation {
        /// Description of the invalid data
        message: String,
    },

    /// The file extension is not one we know how to read or write
    #[error("unsupported image format for {path:?}")]
    UnsupportedFormat {
        /// Location of the file
        path: PathBuf,
    },

    /// An I/O error occurred
    #[error("an I/O error occurred: {source}")]
    Io {
        #[from]
        /// The original error that was raised.
        source: io::Error,
    },

    /// An error occurred when decoding an image with the `image` crate
    #[error("an error occurred when decoding the image: {source}")]
    Image {
        #[from]
        /// The original error that was raised.
        source: image::ImageError,
    },

    /// An error occurred when reading or writing a TIFF file
    #[error("an error occurred when handling a TIFF file: {source}")]
    Tiff {
        #[from]
        /// The original error that was raised.
        source: tiff::TiffError,
    },

    /// An error occurred when reading a .npy file
    #[error("an error occurred when reading a .npy file: {source}")]
    Npy {
        #[from]
        /// The original error that was raised.
        source: ndarray_npy::ReadNpyError,
    },

    /// Decoded pixel data did not fit the expected array shape
    #[error("decoded data does not fit the array shape: {source}")]
    Shape {
        #[from]
        /// The original error that was raised.
        source: ndarray::ShapeError,
    },

    /// An error occurred when reading or writing the metrics table
    #[error("an error occurred when handling the metrics table: {source}")]
    Csv {
        #[from]
        /// The original error that was raised.
        source: csv::Error,
    },
}

impl CellExpError {
    pub(crate) fn config<S: Into<String>>(message: S) -> Self {
        CellExpError::Config {
            message: message.into(),
        }
    }

    pub(crate) fn pairing<S: Into<String>>(message: S) -> Self {
        CellExpError::Pairing {
            message: message.into(),
        }
    }

    pub(crate) fn validation<S: Into<String>>(message: S) -> Self {
        CellExpError::Validation {
            message: message.into(),
        }
    }
}
