use std::collections::{btree_map::Entry, BTreeMap};

use nalgebra::Matrix2;

use crate::LabelArray;

/// Represents a bounding rectangle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundingBox<T: num_traits::Num + Copy> {
    /// Minimum x coordinate (column) for the bounding rectangle
    pub min_x: T,
    /// Minimum y coordinate (row) for the bounding rectangle
    pub min_y: T,
    /// Width of bounding rectangle
    pub width: T,
    /// Height of bounding rectangle
    pub height: T,
}

impl<T: num_traits::Num + Copy> BoundingBox<T> {
    /// Maximum x coordinate for the bounding rectangle (exclusive)
    pub fn max_x(&self) -> T {
        self.min_x + self.width
    }

    /// Maximum y coordinate for the bounding rectangle (exclusive)
    pub fn max_y(&self) -> T {
        self.min_y + self.height
    }
}

/// The pixels (row, col) carrying one label value, in raster order
#[derive(Debug, Clone)]
pub struct Region {
    label: u32,
    pixels: Vec<(usize, usize)>,
}

impl Region {
    /// Returns the label value of the region
    pub fn label(&self) -> u32 {
        self.label
    }

    /// Returns the (row, col) coordinates of every pixel in the region
    pub fn pixels(&self) -> &[(usize, usize)] {
        &self.pixels
    }

    /// Returns the smallest rectangle containing every pixel of the region
    pub fn bounding_box(&self) -> BoundingBox<usize> {
        let mut min_row = usize::MAX;
        let mut min_col = usize::MAX;
        let mut max_row = 0;
        let mut max_col = 0;

        for &(row, col) in &self.pixels {
            min_row = min_row.min(row);
            min_col = min_col.min(col);
            max_row = max_row.max(row);
            max_col = max_col.max(col);
        }

        if self.pixels.is_empty() {
            return BoundingBox {
                min_x: 0,
                min_y: 0,
                width: 0,
                height: 0,
            };
        }

        BoundingBox {
            min_x: min_col,
            min_y: min_row,
            width: max_col - min_col + 1,
            height: max_row - min_row + 1,
        }
    }

    /// Compute the shape descriptors of the region
    pub fn properties(&self) -> RegionProperties {
        let area = self.pixels.len() as f64;
        if self.pixels.is_empty() {
            return RegionProperties::default();
        }

        let (centroid_row, centroid_col) = {
            let (sum_row, sum_col) = self
                .pixels
                .iter()
                .fold((0.0, 0.0), |(r, c), &(row, col)| (r + row as f64, c + col as f64));
            (sum_row / area, sum_col / area)
        };

        let (major, minor) = self.inertia_eigenvalues(centroid_row, centroid_col);
        let eccentricity = if major == 0.0 {
            0.0
        } else {
            (1.0 - minor / major).max(0.0).sqrt()
        };

        let mask = self.padded_mask();

        RegionProperties {
            area,
            perimeter: mask.perimeter(),
            eccentricity,
            solidity: area / mask.convex_area() as f64,
            major_axis_length: 4.0 * major.sqrt(),
            minor_axis_length: 4.0 * minor.sqrt(),
            equivalent_diameter: (4.0 * area / std::f64::consts::PI).sqrt(),
            centroid_row,
            centroid_col,
        }
    }

    /// Eigenvalues (largest first) of the inertia tensor of the region, normalised by area
    fn inertia_eigenvalues(&self, centroid_row: f64, centroid_col: f64) -> (f64, f64) {
        let area = self.pixels.len() as f64;
        let mut mu_rr = 0.0;
        let mut mu_cc = 0.0;
        let mut mu_rc = 0.0;

        for &(row, col) in &self.pixels {
            let dr = row as f64 - centroid_row;
            let dc = col as f64 - centroid_col;

            mu_rr += dr * dr;
            mu_cc += dc * dc;
            mu_rc += dr * dc;
        }

        let tensor = Matrix2::new(
            mu_cc / area,
            -mu_rc / area,
            -mu_rc / area,
            mu_rr / area,
        );
        let eigenvalues = tensor.symmetric_eigenvalues();

        // Rounding can push a zero eigenvalue slightly negative
        let a = eigenvalues[0].max(0.0);
        let b = eigenvalues[1].max(0.0);

        if a >= b {
            (a, b)
        } else {
            (b, a)
        }
    }

    fn padded_mask(&self) -> RegionMask {
        let bounding_box = self.bounding_box();
        let rows = bounding_box.height + 2;
        let cols = bounding_box.width + 2;

        let mut data = vec![false; rows * cols];
        for &(row, col) in &self.pixels {
            let r = row - bounding_box.min_y + 1;
            let c = col - bounding_box.min_x + 1;
            data[r * cols + c] = true;
        }

        RegionMask { rows, cols, data }
    }
}

/// Shape descriptors of a single region
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegionProperties {
    /// Number of pixels in the region
    pub area: f64,
    /// Length of the region boundary, weighting diagonal steps by √2
    pub perimeter: f64,
    /// Eccentricity of the ellipse with the same second moments as the region
    pub eccentricity: f64,
    /// Ratio of the region area to the area of its convex hull
    pub solidity: f64,
    /// Length of the major axis of the ellipse with the same second moments
    pub major_axis_length: f64,
    /// Length of the minor axis of the ellipse with the same second moments
    pub minor_axis_length: f64,
    /// Diameter of a circle with the same area as the region
    pub equivalent_diameter: f64,
    /// Mean row coordinate
    pub centroid_row: f64,
    /// Mean column coordinate
    pub centroid_col: f64,
}

/// Group the pixels of a label array by label value, ignoring background (0).
///
/// Regions are returned in ascending label order; pixels with the same label belong to the
/// same region whether or not they are connected.
pub fn regions(labels: &LabelArray) -> Vec<Region> {
    let mut grouped: BTreeMap<u32, Vec<(usize, usize)>> = BTreeMap::new();

    for ((row, col), &label) in labels.indexed_iter() {
        if label == 0 {
            continue;
        }

        match grouped.entry(label) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().push((row, col));
            }
            Entry::Vacant(entry) => {
                entry.insert(vec![(row, col)]);
            }
        }
    }

    grouped
        .into_iter()
        .map(|(label, pixels)| Region { label, pixels })
        .collect()
}

/// Binary image of one region, cropped to its bounding box with a one pixel background border
struct RegionMask {
    rows: usize,
    cols: usize,
    data: Vec<bool>,
}

impl RegionMask {
    fn get(&self, row: usize, col: usize) -> bool {
        self.data[row * self.cols + col]
    }

    /// Perimeter estimated from the 4-connected boundary pixels. Each boundary pixel is
    /// classified by its boundary neighbours and contributes 1 (straight), √2 (diagonal) or
    /// (1 + √2) / 2 (corner) to the total.
    fn perimeter(&self) -> f64 {
        let mut border = vec![false; self.data.len()];

        for row in 1..self.rows - 1 {
            for col in 1..self.cols - 1 {
                if !self.get(row, col) {
                    continue;
                }

                let interior = self.get(row - 1, col)
                    && self.get(row + 1, col)
                    && self.get(row, col - 1)
                    && self.get(row, col + 1);
                border[row * self.cols + col] = !interior;
            }
        }

        let is_border = |row: usize, col: usize| border[row * self.cols + col];
        let mut total = 0.0;

        for row in 1..self.rows - 1 {
            for col in 1..self.cols - 1 {
                if !is_border(row, col) {
                    continue;
                }

                let edges = [
                    (row - 1, col),
                    (row + 1, col),
                    (row, col - 1),
                    (row, col + 1),
                ]
                .iter()
                .filter(|&&(r, c)| is_border(r, c))
                .count();
                let corners = [
                    (row - 1, col - 1),
                    (row - 1, col + 1),
                    (row + 1, col - 1),
                    (row + 1, col + 1),
                ]
                .iter()
                .filter(|&&(r, c)| is_border(r, c))
                .count();

                total += perimeter_weight(1 + 2 * edges + 10 * corners);
            }
        }

        total
    }

    /// Number of pixels whose centre lies inside or on the convex hull of the region's pixel
    /// corners.
    ///
    /// Coordinates are doubled so that pixel corners and centres are both integers.
    fn convex_area(&self) -> usize {
        let mut corners = Vec::new();
        for row in 0..self.rows {
            for col in 0..self.cols {
                if self.get(row, col) {
                    let (r, c) = (2 * row as i64, 2 * col as i64);
                    corners.extend_from_slice(&[
                        (r - 1, c - 1),
                        (r - 1, c + 1),
                        (r + 1, c - 1),
                        (r + 1, c + 1),
                    ]);
                }
            }
        }

        let hull = convex_hull(corners);

        let mut count = 0;
        for row in 0..self.rows {
            for col in 0..self.cols {
                if self.get(row, col) || in_convex_polygon(&hull, (2 * row as i64, 2 * col as i64)) {
                    count += 1;
                }
            }
        }

        count
    }
}

fn perimeter_weight(code: usize) -> f64 {
    match code {
        5 | 7 | 15 | 17 | 25 | 27 => 1.0,
        21 | 33 => std::f64::consts::SQRT_2,
        13 | 23 => (1.0 + std::f64::consts::SQRT_2) / 2.0,
        _ => 0.0,
    }
}

fn cross(o: (i64, i64), a: (i64, i64), b: (i64, i64)) -> i64 {
    (a.0 - o.0) * (b.1 - o.1) - (a.1 - o.1) * (b.0 - o.0)
}

/// Monotone chain convex hull, returned counter-clockwise without collinear points
fn convex_hull(mut points: Vec<(i64, i64)>) -> Vec<(i64, i64)> {
    points.sort_unstable();
    points.dedup();

    if points.len() < 3 {
        return points;
    }

    let mut hull: Vec<(i64, i64)> = Vec::with_capacity(points.len() * 2);

    for &point in &points {
        while hull.len() >= 2 && cross(hull[hull.len() - 2], hull[hull.len() - 1], point) <= 0 {
            hull.pop();
        }
        hull.push(point);
    }

    let lower_len = hull.len() + 1;
    for &point in points.iter().rev().skip(1) {
        while hull.len() >= lower_len
            && cross(hull[hull.len() - 2], hull[hull.len() - 1], point) <= 0
        {
            hull.pop();
        }
        hull.push(point);
    }

    hull.pop();
    hull
}

fn in_convex_polygon(hull: &[(i64, i64)], point: (i64, i64)) -> bool {
    if hull.len() < 3 {
        return false;
    }

    (0..hull.len()).all(|i| cross(hull[i], hull[(i + 1) % hull.len()], point) >= 0)
}

#[cfg(test)]
mod tests {
    use ndarray::Array2;

    use super::*;

    fn labels(rows: usize, cols: usize, data: Vec<u32>) -> LabelArray {
        Array2::from_shape_vec((rows, cols), data).unwrap()
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {} but got {}",
            expected,
            actual
        );
    }

    #[test]
    fn regions_are_distinct_positive_values() {
        let labels = labels(3, 4, vec![0, 7, 7, 0, 3, 0, 0, 7, 3, 0, 12, 0]);
        let found: Vec<u32> = regions(&labels).iter().map(|r| r.label()).collect();

        assert_eq!(found, vec![3, 7, 12]);
    }

    #[test]
    fn background_only_has_no_regions() {
        assert!(regions(&Array2::zeros((4, 4))).is_empty());
    }

    #[test]
    fn disconnected_pixels_share_a_region() {
        let labels = labels(1, 5, vec![2, 0, 0, 0, 2]);
        let regions = regions(&labels);

        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].pixels(), &[(0, 0), (0, 4)]);
    }

    #[test]
    fn single_pixel() {
        let labels = labels(3, 3, vec![0, 0, 0, 0, 1, 0, 0, 0, 0]);
        let props = regions(&labels)[0].properties();

        assert_close(props.area, 1.0);
        assert_close(props.perimeter, 0.0);
        assert_close(props.eccentricity, 0.0);
        assert_close(props.solidity, 1.0);
        assert_close(props.major_axis_length, 0.0);
        assert_close(props.centroid_row, 1.0);
        assert_close(props.centroid_col, 1.0);
        assert_close(props.equivalent_diameter, (4.0 / std::f64::consts::PI).sqrt());
    }

    #[test]
    fn filled_square() {
        let mut labels = Array2::zeros((6, 6));
        for row in 1..5 {
            for col in 1..5 {
                labels[[row, col]] = 4;
            }
        }

        let props = regions(&labels)[0].properties();

        assert_close(props.area, 16.0);
        // Boundary runs through the centres of the 12 outer pixels
        assert_close(props.perimeter, 12.0);
        assert_close(props.solidity, 1.0);
        assert_close(props.eccentricity, 0.0);
        assert_close(props.major_axis_length, props.minor_axis_length);
        assert_close(props.centroid_row, 2.5);
        assert_close(props.centroid_col, 2.5);
    }

    #[test]
    fn horizontal_line() {
        let labels = labels(1, 5, vec![1, 1, 1, 1, 1]);
        let props = regions(&labels)[0].properties();

        // Variance of 0..5 is 2, so major axis is 4 * sqrt(2)
        assert_close(props.major_axis_length, 4.0 * 2.0f64.sqrt());
        assert_close(props.minor_axis_length, 0.0);
        assert_close(props.eccentricity, 1.0);
        assert_close(props.solidity, 1.0);
        // End pixels have a single boundary neighbour and do not contribute
        assert_close(props.perimeter, 3.0);
    }

    #[test]
    fn concave_region_has_lower_solidity() {
        // L shape: the missing corner pixel lies inside the convex hull
        let labels = labels(2, 2, vec![1, 1, 1, 0]);
        let props = regions(&labels)[0].properties();

        assert_close(props.area, 3.0);
        assert_close(props.solidity, 0.75);
    }

    #[test]
    fn bounding_box_of_region() {
        let labels = labels(3, 4, vec![0, 0, 0, 0, 0, 5, 5, 0, 0, 0, 5, 0]);
        let region = &regions(&labels)[0];

        assert_eq!(
            region.bounding_box(),
            BoundingBox {
                min_x: 1,
                min_y: 1,
                width: 2,
                height: 2
            }
        );
        assert_eq!(region.bounding_box().max_x(), 3);
    }
}
