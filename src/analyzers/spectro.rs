use std::sync::Arc;

use ndarray::Array2;

use crate::analysis::bias::{detect_bias_pattern, BiasPattern};
use crate::analysis::profile::{
    bilinear_spectrum, spectral_profile, SamplingMethod, SpectralProfile,
};
use crate::data::model::{CitsData, StsData};
use crate::error::{Result, SpmError};

// ---------------------------------------------------------------------------
// CITS analyzer
// ---------------------------------------------------------------------------

/// Per-file CITS analysis: bias patterns, slices, point spectra, spectral
/// line profiles and differential conductance.
pub struct CitsAnalyzer {
    data: Arc<CitsData>,
}

impl CitsAnalyzer {
    pub fn new(data: Arc<CitsData>) -> Self {
        CitsAnalyzer { data }
    }

    pub fn data(&self) -> &CitsData {
        &self.data
    }

    /// Classify the bias sweep into forward/backward segments.
    pub fn bias_pattern(&self) -> BiasPattern {
        detect_bias_pattern(self.data.bias_values.as_slice().unwrap_or(&[]))
    }

    /// Owned 2-D slice of the cube at a bias index.
    pub fn bias_slice(&self, bias_index: usize) -> Result<Array2<f64>> {
        self.data
            .bias_slice(bias_index)
            .map(|view| view.to_owned())
            .ok_or_else(|| {
                SpmError::NotFound(format!(
                    "bias index {bias_index} out of range 0..{}",
                    self.data.n_bias_points()
                ))
            })
    }

    /// Full bias sweep recorded at one grid point.
    pub fn point_spectrum(&self, row: usize, col: usize) -> Result<Vec<f64>> {
        let (_, rows, cols) = self.data.data.dim();
        if row >= rows || col >= cols {
            return Err(SpmError::NotFound(format!(
                "grid point ({row}, {col}) outside {rows}x{cols} grid"
            )));
        }
        Ok(self
            .data
            .data
            .slice(ndarray::s![.., row, col])
            .iter()
            .copied()
            .collect())
    }

    /// Bilinearly interpolated sweep at a fractional grid position.
    pub fn interpolated_spectrum(&self, row: f64, col: f64) -> Vec<f64> {
        bilinear_spectrum(&self.data.data, row, col)
    }

    /// One full sweep per sampled pixel along a line through the grid.
    pub fn line_profile(
        &self,
        start: (usize, usize),
        end: (usize, usize),
        method: SamplingMethod,
    ) -> SpectralProfile {
        let pixel_size = if self.data.grid_size[0] == 0 {
            1.0
        } else {
            self.data.x_range / self.data.grid_size[0] as f64
        };
        spectral_profile(&self.data.data, start, end, method, pixel_size)
    }

    /// Differential conductance dI/dV of the sweep at one grid point.
    pub fn conductance_at(&self, row: usize, col: usize) -> Result<Vec<f64>> {
        let spectrum = self.point_spectrum(row, col)?;
        Ok(gradient(
            &spectrum,
            self.data.bias_values.as_slice().unwrap_or(&[]),
        ))
    }
}

// ---------------------------------------------------------------------------
// STS analyzer
// ---------------------------------------------------------------------------

/// Per-file STS analysis: bias patterns, point/averaged spectra and
/// (normalized) differential conductance.
pub struct StsAnalyzer {
    data: Arc<StsData>,
}

impl StsAnalyzer {
    pub fn new(data: Arc<StsData>) -> Self {
        StsAnalyzer { data }
    }

    pub fn data(&self) -> &StsData {
        &self.data
    }

    pub fn bias_pattern(&self) -> BiasPattern {
        detect_bias_pattern(self.data.bias_values.as_slice().unwrap_or(&[]))
    }

    /// The sweep recorded at one measurement point.
    pub fn spectrum(&self, point: usize) -> Result<Vec<f64>> {
        if point >= self.data.n_points() {
            return Err(SpmError::NotFound(format!(
                "point index {point} out of range 0..{}",
                self.data.n_points()
            )));
        }
        Ok(self.data.data.column(point).iter().copied().collect())
    }

    /// Mean sweep over all measurement points.
    pub fn average_spectrum(&self) -> Vec<f64> {
        let n_points = self.data.n_points();
        if n_points == 0 {
            return Vec::new();
        }
        self.data
            .data
            .rows()
            .into_iter()
            .map(|row| row.sum() / n_points as f64)
            .collect()
    }

    /// Differential conductance dI/dV for one point, or for the averaged
    /// spectrum when `point` is `None`.
    pub fn conductance(&self, point: Option<usize>) -> Result<Vec<f64>> {
        let current = match point {
            Some(p) => self.spectrum(p)?,
            None => self.average_spectrum(),
        };
        Ok(gradient(
            &current,
            self.data.bias_values.as_slice().unwrap_or(&[]),
        ))
    }

    /// Normalized conductance (dI/dV)/(I/V); zero where the bias is zero.
    pub fn normalized_conductance(&self, point: Option<usize>) -> Result<Vec<f64>> {
        let current = match point {
            Some(p) => self.spectrum(p)?,
            None => self.average_spectrum(),
        };
        let bias = self.data.bias_values.as_slice().unwrap_or(&[]);
        let conductance = gradient(&current, bias);

        Ok(conductance
            .iter()
            .zip(current.iter().zip(bias.iter()))
            .map(|(&g, (&i, &v))| {
                if v == 0.0 || i == 0.0 {
                    0.0
                } else {
                    g / (i / v)
                }
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Numeric gradient
// ---------------------------------------------------------------------------

/// Gradient of `y` with respect to `x`: central differences inside, one-sided
/// at the ends. Tolerates non-uniform spacing and degenerate inputs.
fn gradient(y: &[f64], x: &[f64]) -> Vec<f64> {
    let n = y.len().min(x.len());
    if n < 2 {
        return vec![0.0; y.len()];
    }

    (0..n)
        .map(|i| {
            let (i0, i1) = if i == 0 {
                (0, 1)
            } else if i == n - 1 {
                (n - 2, n - 1)
            } else {
                (i - 1, i + 1)
            };
            let dx = x[i1] - x[i0];
            if dx == 0.0 {
                0.0
            } else {
                (y[i1] - y[i0]) / dx
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
