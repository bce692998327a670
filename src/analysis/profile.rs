use ndarray::{Array2, Array3};
use serde::Serialize;

use super::geometry::{dense_sample_line, line_length, rasterize_line};

// ---------------------------------------------------------------------------
// Sampling strategies
// ---------------------------------------------------------------------------

/// How to walk a topography line profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileMethod {
    /// Integer midpoint rasterization; raw pixel values.
    Rasterize,
    /// Dense resampling with bilinear interpolation between pixels.
    Interpolate,
}

impl ProfileMethod {
    pub fn name(self) -> &'static str {
        match self {
            ProfileMethod::Rasterize => "rasterize",
            ProfileMethod::Interpolate => "interpolate",
        }
    }
}

/// How to pick the pixels of a spectral line profile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SamplingMethod {
    /// Integer midpoint rasterization.
    Rasterize,
    /// Dense resampling to integer indices with the given density factor.
    DenseResample { density_factor: f64 },
}

impl SamplingMethod {
    pub fn name(self) -> &'static str {
        match self {
            SamplingMethod::Rasterize => "rasterize",
            SamplingMethod::DenseResample { .. } => "dense_resample",
        }
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Summary statistics over the sampled values of a profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProfileStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    pub std: f64,
    pub range: f64,
    pub rms: f64,
}

impl ProfileStats {
    fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return ProfileStats::default();
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let mut lo = f64::INFINITY;
        let mut hi = f64::NEG_INFINITY;
        let mut sq_dev = 0.0;
        for &v in values {
            lo = lo.min(v);
            hi = hi.max(v);
            sq_dev += (v - mean).powi(2);
        }

        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let median = if sorted.len() % 2 == 1 {
            sorted[sorted.len() / 2]
        } else {
            (sorted[sorted.len() / 2 - 1] + sorted[sorted.len() / 2]) / 2.0
        };

        ProfileStats {
            min: lo,
            max: hi,
            mean,
            median,
            std: (sq_dev / n).sqrt(),
            range: hi - lo,
            rms: (sq_dev / n).sqrt(),
        }
    }
}

/// A sampled height profile between two grid points.
#[derive(Debug, Clone, Serialize)]
pub struct LineProfile {
    /// Physical position of each sample along the line.
    pub distances: Vec<f64>,
    pub heights: Vec<f64>,
    /// Total physical length of the sampled path.
    pub length: f64,
    /// Start point as `(row, col)`.
    pub start: (usize, usize),
    pub end: (usize, usize),
    pub method: &'static str,
    pub n_points: usize,
    pub stats: ProfileStats,
}

/// A spectral profile: one full bias sweep per sampled pixel.
#[derive(Debug, Clone)]
pub struct SpectralProfile {
    /// Physical position of each sample along the line.
    pub positions: Vec<f64>,
    /// Sampled pixels as `(row, col)`.
    pub pixels: Vec<(usize, usize)>,
    /// Spectra shaped `(n_positions, n_bias)`.
    pub spectra: Array2<f64>,
    pub start: (usize, usize),
    pub end: (usize, usize),
    pub method: &'static str,
    pub n_points: usize,
}

// ---------------------------------------------------------------------------
// Topography profiles
// ---------------------------------------------------------------------------

/// Extract a height profile between two `(row, col)` points.
///
/// Coordinates are clipped into the array bounds. Physical positions are the
/// cumulative per-step Euclidean distance times `pixel_size` (rasterized) or
/// a linear spacing over the total physical length (interpolated).
pub fn topography_profile(
    image: &Array2<f64>,
    start: (usize, usize),
    end: (usize, usize),
    method: ProfileMethod,
    pixel_size: f64,
) -> LineProfile {
    let (rows, cols) = image.dim();
    if rows == 0 || cols == 0 {
        return LineProfile {
            distances: Vec::new(),
            heights: Vec::new(),
            length: 0.0,
            start,
            end,
            method: method.name(),
            n_points: 0,
            stats: ProfileStats::default(),
        };
    }
    let start = clip_point(start, rows, cols);
    let end = clip_point(end, rows, cols);

    let (distances, heights) = match method {
        ProfileMethod::Rasterize => {
            let pixels = rasterize_line(
                (start.1 as i64, start.0 as i64),
                (end.1 as i64, end.0 as i64),
            );
            let heights: Vec<f64> = pixels
                .iter()
                .map(|&(x, y)| image[[y as usize, x as usize]])
                .collect();
            (cumulative_distances(&pixels, pixel_size), heights)
        }
        ProfileMethod::Interpolate => {
            let length = line_length(
                (start.1 as f64, start.0 as f64),
                (end.1 as f64, end.0 as f64),
            );
            let count = ((length.ceil() as usize) * 2).max(10);
            let physical_length = length * pixel_size;

            let mut heights = Vec::with_capacity(count);
            let mut distances = Vec::with_capacity(count);
            for i in 0..count {
                let t = i as f64 / (count - 1) as f64;
                let row = start.0 as f64 + t * (end.0 as f64 - start.0 as f64);
                let col = start.1 as f64 + t * (end.1 as f64 - start.1 as f64);
                heights.push(bilinear_sample(image, row, col));
                distances.push(t * physical_length);
            }
            (distances, heights)
        }
    };

    let stats = ProfileStats::from_values(&heights);
    LineProfile {
        length: distances.last().copied().unwrap_or(0.0),
        n_points: heights.len(),
        distances,
        heights,
        start,
        end,
        method: method.name(),
        stats,
    }
}

// ---------------------------------------------------------------------------
// Spectral profiles
// ---------------------------------------------------------------------------

/// Extract one full bias sweep per sampled pixel along a line through a
/// spectroscopy cube shaped `(n_bias, rows, cols)`.
pub fn spectral_profile(
    cube: &Array3<f64>,
    start: (usize, usize),
    end: (usize, usize),
    method: SamplingMethod,
    pixel_size: f64,
) -> SpectralProfile {
    let (n_bias, rows, cols) = cube.dim();
    if rows == 0 || cols == 0 {
        return SpectralProfile {
            positions: Vec::new(),
            pixels: Vec::new(),
            spectra: Array2::zeros((0, n_bias)),
            start,
            end,
            method: method.name(),
            n_points: 0,
        };
    }
    let start = clip_point(start, rows, cols);
    let end = clip_point(end, rows, cols);

    let raw_pixels = match method {
        SamplingMethod::Rasterize => rasterize_line(
            (start.1 as i64, start.0 as i64),
            (end.1 as i64, end.0 as i64),
        ),
        SamplingMethod::DenseResample { density_factor } => dense_sample_line(
            (start.1 as i64, start.0 as i64),
            (end.1 as i64, end.0 as i64),
            density_factor,
        ),
    };

    let pixels: Vec<(usize, usize)> = raw_pixels
        .iter()
        .map(|&(x, y)| {
            (
                (y.max(0) as usize).min(rows - 1),
                (x.max(0) as usize).min(cols - 1),
            )
        })
        .collect();

    let mut spectra = Array2::zeros((pixels.len(), n_bias));
    for (i, &(row, col)) in pixels.iter().enumerate() {
        for b in 0..n_bias {
            spectra[[i, b]] = cube[[b, row, col]];
        }
    }

    let positions = match method {
        SamplingMethod::Rasterize => cumulative_distances(&raw_pixels, pixel_size),
        SamplingMethod::DenseResample { .. } => {
            let total = line_length(
                (start.1 as f64, start.0 as f64),
                (end.1 as f64, end.0 as f64),
            ) * pixel_size;
            let n = pixels.len();
            (0..n)
                .map(|i| {
                    if n > 1 {
                        total * i as f64 / (n - 1) as f64
                    } else {
                        0.0
                    }
                })
                .collect()
        }
    };

    SpectralProfile {
        n_points: pixels.len(),
        positions,
        pixels,
        spectra,
        start,
        end,
        method: method.name(),
    }
}

/// Bilinear interpolation of a single spectrum at a fractional grid position.
pub fn bilinear_spectrum(cube: &Array3<f64>, row: f64, col: f64) -> Vec<f64> {
    let (n_bias, rows, cols) = cube.dim();
    let (r0, r1, dr) = neighbor_weights(row, rows);
    let (c0, c1, dc) = neighbor_weights(col, cols);

    (0..n_bias)
        .map(|b| {
            (1.0 - dr) * (1.0 - dc) * cube[[b, r0, c0]]
                + (1.0 - dr) * dc * cube[[b, r0, c1]]
                + dr * (1.0 - dc) * cube[[b, r1, c0]]
                + dr * dc * cube[[b, r1, c1]]
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn clip_point(point: (usize, usize), rows: usize, cols: usize) -> (usize, usize) {
    (point.0.min(rows - 1), point.1.min(cols - 1))
}

/// Cumulative Euclidean distance over a pixel path, scaled to physical units.
fn cumulative_distances(pixels: &[(i64, i64)], pixel_size: f64) -> Vec<f64> {
    let mut distances = Vec::with_capacity(pixels.len());
    let mut total = 0.0;
    for (i, &(x, y)) in pixels.iter().enumerate() {
        if i > 0 {
            let (px, py) = pixels[i - 1];
            total += (((x - px).pow(2) + (y - py).pow(2)) as f64).sqrt() * pixel_size;
        }
        distances.push(total);
    }
    distances
}

fn bilinear_sample(image: &Array2<f64>, row: f64, col: f64) -> f64 {
    let (rows, cols) = image.dim();
    let (r0, r1, dr) = neighbor_weights(row, rows);
    let (c0, c1, dc) = neighbor_weights(col, cols);

    (1.0 - dr) * (1.0 - dc) * image[[r0, c0]]
        + (1.0 - dr) * dc * image[[r0, c1]]
        + dr * (1.0 - dc) * image[[r1, c0]]
        + dr * dc * image[[r1, c1]]
}

/// Floor/ceil neighbors of a fractional index, clamped into `0..len`.
fn neighbor_weights(value: f64, len: usize) -> (usize, usize, f64) {
    let clamped = value.clamp(0.0, (len - 1) as f64);
    let floor = clamped.floor() as usize;
    let ceil = (floor + 1).min(len - 1);
    (floor, ceil, clamped - floor as f64)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, Array3};

    #[test]
    fn rasterized_profile_counts_match_the_pixel_path() {
        let image = Array2::from_shape_fn((8, 8), |(r, c)| (r * 8 + c) as f64);
        let profile =
            topography_profile(&image, (0, 0), (0, 5), ProfileMethod::Rasterize, 2.0);
        assert_eq!(profile.n_points, 6);
        assert_eq!(profile.distances[0], 0.0);
        assert_eq!(profile.length, 10.0);
        // Values along the first row.
        assert_eq!(profile.heights, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(profile.stats.min, 0.0);
        assert_eq!(profile.stats.max, 5.0);
        assert_eq!(profile.stats.median, 2.5);
    }

    #[test]
    fn out_of_bounds_points_are_clipped() {
        let image = Array2::zeros((4, 4));
        let profile =
            topography_profile(&image, (0, 0), (10, 10), ProfileMethod::Rasterize, 1.0);
        assert_eq!(profile.end, (3, 3));
        assert!(profile.n_points >= 2);
    }

    #[test]
    fn interpolated_profile_is_linear_on_a_ramp() {
        let image = Array2::from_shape_fn((6, 6), |(_, c)| c as f64);
        let profile =
            topography_profile(&image, (0, 0), (0, 5), ProfileMethod::Interpolate, 1.0);
        assert!(profile.n_points >= 10);
        for (d, h) in profile.distances.iter().zip(profile.heights.iter()) {
            assert!((d - h).abs() < 1e-9, "height equals distance on a unit ramp");
        }
    }

    #[test]
    fn spectral_profile_gathers_every_layer() {
        let cube = Array3::from_shape_fn((3, 4, 4), |(b, r, c)| (b * 100 + r * 10 + c) as f64);
        let profile =
            spectral_profile(&cube, (0, 0), (0, 3), SamplingMethod::Rasterize, 1.0);
        assert_eq!(profile.n_points, 4);
        assert_eq!(profile.spectra.dim(), (4, 3));
        assert_eq!(profile.spectra[[2, 1]], 102.0);
        assert_eq!(profile.positions.len(), 4);
    }

    #[test]
    fn dense_resampling_positions_are_linearly_spaced() {
        let cube = Array3::zeros((2, 8, 8));
        let profile = spectral_profile(
            &cube,
            (0, 0),
            (0, 7),
            SamplingMethod::DenseResample {
                density_factor: 2.0,
            },
            0.5,
        );
        assert!(profile.n_points >= 2);
        let total = 7.0 * 0.5;
        assert_eq!(profile.positions[0], 0.0);
        assert!((profile.positions[profile.n_points - 1] - total).abs() < 1e-9);
    }

    #[test]
    fn bilinear_spectrum_blends_neighbors() {
        let cube = Array3::from_shape_fn((2, 2, 2), |(b, r, c)| (b + r + c) as f64);
        let spectrum = bilinear_spectrum(&cube, 0.5, 0.5);
        assert_eq!(spectrum.len(), 2);
        assert!((spectrum[0] - 1.0).abs() < 1e-12);
        assert!((spectrum[1] - 2.0).abs() < 1e-12);
    }
}
