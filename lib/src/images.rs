use std::{
    fs::File,
    io::{BufReader, BufWriter},
    path::Path,
};

use image::{DynamicImage, GenericImageView};
use log::debug;
use ndarray::{Array, ArrayD, Axis, IxDyn};
use ndarray_npy::ReadNpyExt;
use tiff::{
    decoder::{Decoder, DecodingResult},
    encoder::{colortype, TiffEncoder},
};

use crate::{
    error::{CellExpError, Result},
    LabelArray, Raster,
};

// Luminance weights (ITU-R BT.709) used when reducing an RGB mask to a single plane
const RED_WEIGHT: f64 = 0.2125;
const GREEN_WEIGHT: f64 = 0.7154;
const BLUE_WEIGHT: f64 = 0.0721;

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

/// Read a raster file into an n-dimensional array of `f64`.
///
/// Single plane images are returned as (rows, cols), interleaved multi-sample images as
/// (rows, cols, samples) and multi-page TIFF stacks as (pages, rows, cols).
pub fn read_raster<P: AsRef<Path>>(path: P) -> Result<Raster> {
    let path = path.as_ref();

    let raster = match extension(path).as_deref() {
        Some("tif") | Some("tiff") => read_tiff(path)?,
        Some("npy") => read_npy(path)?,
        Some(_) => from_dynamic_image(image::open(path)?)?,
        None => {
            return Err(CellExpError::UnsupportedFormat {
                path: path.to_path_buf(),
            })
        }
    };

    debug!("Read {:?} with shape {:?}", path, raster.shape());

    Ok(raster)
}

fn decoded_to_f64(result: DecodingResult) -> Vec<f64> {
    match result {
        DecodingResult::U8(data) => data.into_iter().map(f64::from).collect(),
        DecodingResult::U16(data) => data.into_iter().map(f64::from).collect(),
        DecodingResult::U32(data) => data.into_iter().map(f64::from).collect(),
        DecodingResult::U64(data) => data.into_iter().map(|v| v as f64).collect(),
        DecodingResult::I8(data) => data.into_iter().map(f64::from).collect(),
        DecodingResult::I16(data) => data.into_iter().map(f64::from).collect(),
        DecodingResult::I32(data) => data.into_iter().map(f64::from).collect(),
        DecodingResult::I64(data) => data.into_iter().map(|v| v as f64).collect(),
        DecodingResult::F32(data) => data.into_iter().map(f64::from).collect(),
        DecodingResult::F64(data) => data,
    }
}

fn read_tiff(path: &Path) -> Result<Raster> {
    let file = File::open(path)?;
    let mut decoder = Decoder::new(BufReader::new(file))?;

    let mut pages = Vec::new();
    loop {
        let (width, height) = decoder.dimensions()?;
        let data = decoded_to_f64(decoder.read_image()?);
        pages.push((width as usize, height as usize, data));

        if !decoder.more_images() {
            break;
        }
        decoder.next_image()?;
    }

    if pages.len() == 1 {
        let (width, height, data) = pages.remove(0);
        return interleaved(height, width, data);
    }

    let (width, height, _) = pages[0];
    let mut stack = Vec::with_capacity(pages.len() * width * height);
    let num_pages = pages.len();

    for (page_width, page_height, data) in pages {
        if page_width != width || page_height != height || data.len() != width * height {
            return Err(CellExpError::validation(format!(
                "pages of {:?} must all be single-sample {}x{} images",
                path, width, height
            )));
        }
        stack.extend(data);
    }

    Ok(Array::from_shape_vec(IxDyn(&[num_pages, height, width]), stack)?)
}

/// Interpret row-major pixel data with any number of interleaved samples per pixel
fn interleaved(rows: usize, cols: usize, data: Vec<f64>) -> Result<Raster> {
    let pixels = rows * cols;
    if pixels == 0 || data.len() % pixels != 0 {
        return Err(CellExpError::validation(format!(
            "{} samples cannot fill a {}x{} image",
            data.len(),
            rows,
            cols
        )));
    }

    let samples = data.len() / pixels;
    if samples == 1 {
        Ok(Array::from_shape_vec(IxDyn(&[rows, cols]), data)?)
    } else {
        Ok(Array::from_shape_vec(IxDyn(&[rows, cols, samples]), data)?)
    }
}

fn from_dynamic_image(image: DynamicImage) -> Result<Raster> {
    let (width, height) = image.dimensions();
    let (rows, cols) = (height as usize, width as usize);

    let data: Vec<f64> = match image {
        DynamicImage::ImageLuma8(buffer) => buffer.into_raw().into_iter().map(f64::from).collect(),
        DynamicImage::ImageLuma16(buffer) => {
            buffer.into_raw().into_iter().map(f64::from).collect()
        }
        // Alpha carries no information for masks or intensities
        DynamicImage::ImageLumaA8(_) | DynamicImage::ImageLumaA16(_) => image
            .into_luma16()
            .into_raw()
            .into_iter()
            .map(f64::from)
            .collect(),
        DynamicImage::ImageRgb8(buffer) => buffer.into_raw().into_iter().map(f64::from).collect(),
        DynamicImage::ImageRgba8(buffer) => buffer.into_raw().into_iter().map(f64::from).collect(),
        DynamicImage::ImageRgb16(buffer) => buffer.into_raw().into_iter().map(f64::from).collect(),
        DynamicImage::ImageRgba16(buffer) => {
            buffer.into_raw().into_iter().map(f64::from).collect()
        }
        DynamicImage::ImageRgb32F(buffer) => {
            buffer.into_raw().into_iter().map(f64::from).collect()
        }
        other => other
            .into_rgba32f()
            .into_raw()
            .into_iter()
            .map(f64::from)
            .collect(),
    };

    interleaved(rows, cols, data)
}

fn read_npy(path: &Path) -> Result<Raster> {
    let bytes = std::fs::read(path)?;

    // The error of the last dtype tried is the one reported
    macro_rules! try_dtype {
        ($first:ty $(, $rest:ty)*) => {{
            let mut result = ArrayD::<$first>::read_npy(&bytes[..]).map(|a| a.mapv(|v| v as f64));
            $(
                if result.is_err() {
                    result = ArrayD::<$rest>::read_npy(&bytes[..]).map(|a| a.mapv(|v| v as f64));
                }
            )*
            result
        }};
    }

    try_dtype!(f64, f32, u8, u16, u32, u64, i8, i16, i32, i64).map_err(CellExpError::from)
}

/// Collapse an interleaved (rows, cols, samples) raster to a single plane.
///
/// One sample is squeezed, two samples (grey + alpha) keep the grey plane and three or four
/// samples are combined with luminance weights, ignoring alpha. Rasters of any other shape are
/// returned unchanged.
pub fn to_grayscale(raster: Raster) -> Raster {
    if raster.ndim() != 3 {
        return raster;
    }

    match raster.len_of(Axis(2)) {
        1 | 2 => raster.index_axis(Axis(2), 0).to_owned(),
        3 | 4 => {
            let red = raster.index_axis(Axis(2), 0);
            let green = raster.index_axis(Axis(2), 1);
            let blue = raster.index_axis(Axis(2), 2);

            &red * RED_WEIGHT + &green * GREEN_WEIGHT + &blue * BLUE_WEIGHT
        }
        _ => raster,
    }
}

/// Write a label array as a 32-bit greyscale TIFF
pub fn write_labels<P: AsRef<Path>>(path: P, labels: &LabelArray) -> Result<()> {
    let (rows, cols) = labels.dim();
    let data: Vec<u32> = labels.iter().copied().collect();

    let file = File::create(path.as_ref())?;
    let mut encoder = TiffEncoder::new(BufWriter::new(file))?;
    encoder.write_image::<colortype::Gray32>(cols as u32, rows as u32, &data)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use ndarray::Array2;

    use super::*;

    #[test]
    fn labels_round_trip_through_tiff() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("labels.tif");
        let labels: LabelArray =
            Array2::from_shape_vec((2, 3), vec![0, 1, 70000, 2, 2, 0]).unwrap();

        write_labels(&path, &labels)?;
        let raster = read_raster(&path)?;

        assert_eq!(raster.shape(), &[2, 3]);
        assert_eq!(raster[&[1, 0][..]], 2.0);
        assert_eq!(raster[&[0, 2][..]], 70000.0);

        Ok(())
    }

    #[test]
    fn rgb_png_is_read_channel_last() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("rgb.png");
        let image = image::RgbImage::from_fn(4, 2, |x, y| image::Rgb([x as u8, y as u8, 9]));
        image.save(&path)?;

        let raster = read_raster(&path)?;

        assert_eq!(raster.shape(), &[2, 4, 3]);
        assert_eq!(raster[&[1, 3, 0][..]], 3.0);
        assert_eq!(raster[&[1, 3, 1][..]], 1.0);
        assert_eq!(raster[&[1, 3, 2][..]], 9.0);

        Ok(())
    }

    #[test]
    fn npy_integer_labels() -> Result<()> {
        use ndarray_npy::WriteNpyExt;

        let dir = tempfile::tempdir()?;
        let path = dir.path().join("mask.npy");
        let labels = Array2::from_shape_vec((2, 2), vec![0i32, 4, 4, 1]).unwrap();
        labels
            .write_npy(File::create(&path)?)
            .expect("write npy file");

        let raster = read_raster(&path)?;

        assert_eq!(raster.shape(), &[2, 2]);
        assert_eq!(raster[&[0, 1][..]], 4.0);

        Ok(())
    }

    #[test]
    fn npy_unsigned_intensity() -> Result<()> {
        use ndarray_npy::WriteNpyExt;

        let dir = tempfile::tempdir()?;
        let path = dir.path().join("gfp.npy");
        let intensity = Array2::from_shape_vec((1, 3), vec![0u16, 300, 65535]).unwrap();
        intensity
            .write_npy(File::create(&path)?)
            .expect("write npy file");

        let raster = read_raster(&path)?;

        assert_eq!(raster.shape(), &[1, 3]);
        assert_eq!(raster[&[0, 2][..]], 65535.0);

        Ok(())
    }

    #[test]
    fn corrupt_npy_reports_the_read_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("broken.npy");
        std::fs::write(&path, b"not an array")?;

        assert!(matches!(read_raster(&path), Err(CellExpError::Npy { .. })));

        Ok(())
    }

    #[test]
    fn grey_rgb_reduces_to_same_values() {
        let data: Vec<f64> = [0.0, 5.0, 12.0, 255.0]
            .iter()
            .flat_map(|&v| vec![v, v, v])
            .collect();
        let raster = Array::from_shape_vec(IxDyn(&[2, 2, 3]), data).unwrap();
        let grey = to_grayscale(raster);

        assert_eq!(grey.shape(), &[2, 2]);
        for (value, expected) in grey.iter().zip([0.0, 5.0, 12.0, 255.0]) {
            assert!((value - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn many_channel_raster_is_not_reduced() {
        let raster = Array::zeros(IxDyn(&[2, 2, 7]));

        assert_eq!(to_grayscale(raster).ndim(), 3);
    }

    #[test]
    fn missing_extension_is_unsupported() {
        assert!(matches!(
            read_raster("no_extension"),
            Err(CellExpError::UnsupportedFormat { .. })
        ));
    }
}
