use log::warn;
use ndarray::Array2;
use serde::Serialize;

// ---------------------------------------------------------------------------
// Height-map flattening and tilt correction
// ---------------------------------------------------------------------------

/// Background-removal strategies for height maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlattenMethod {
    /// Subtract each row's mean.
    LinewiseMean,
    /// Subtract a per-row polynomial fit of the given degree.
    LinewisePolyfit { degree: usize },
    /// Subtract a globally fitted plane `z = a·x + b·y + c`.
    Plane,
}

/// Tilt adjustment direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TiltDirection {
    Up,
    Down,
    Left,
    Right,
}

/// Apply the selected flattening method. Total: a failed fit logs a warning
/// and returns the input unchanged.
pub fn flatten(image: &Array2<f64>, method: FlattenMethod) -> Array2<f64> {
    match method {
        FlattenMethod::LinewiseMean => linewise_flatten_mean(image),
        FlattenMethod::LinewisePolyfit { degree } => linewise_flatten_polyfit(image, degree),
        FlattenMethod::Plane => plane_flatten(image),
    }
}

/// Subtract each row's mean value.
pub fn linewise_flatten_mean(image: &Array2<f64>) -> Array2<f64> {
    let mut result = image.clone();
    for mut row in result.rows_mut() {
        let mean = row.mean().unwrap_or(0.0);
        row.mapv_inplace(|v| v - mean);
    }
    result
}

/// Subtract a least-squares polynomial of `degree` from each row.
pub fn linewise_flatten_polyfit(image: &Array2<f64>, degree: usize) -> Array2<f64> {
    let mut result = image.clone();
    let n_cols = result.ncols();
    let xs: Vec<f64> = (0..n_cols).map(|i| i as f64).collect();

    for mut row in result.rows_mut() {
        let ys: Vec<f64> = row.iter().copied().collect();
        match polyfit(&xs, &ys, degree) {
            Some(coeffs) => {
                for (value, &x) in row.iter_mut().zip(xs.iter()) {
                    *value -= eval_poly(&coeffs, x);
                }
            }
            None => {
                warn!("row polynomial fit failed (degree {degree}); row left unchanged");
            }
        }
    }
    result
}

/// Fit and subtract a global plane `z = a·x + b·y + c`.
pub fn plane_flatten(image: &Array2<f64>) -> Array2<f64> {
    let (rows, cols) = image.dim();
    let n = (rows * cols) as f64;

    // Normal equations for the 3-parameter plane over the pixel grid.
    let mut sx = 0.0;
    let mut sy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    let mut sxy = 0.0;
    let mut sz = 0.0;
    let mut sxz = 0.0;
    let mut syz = 0.0;
    for ((r, c), &z) in image.indexed_iter() {
        let (x, y) = (c as f64, r as f64);
        sx += x;
        sy += y;
        sxx += x * x;
        syy += y * y;
        sxy += x * y;
        sz += z;
        sxz += x * z;
        syz += y * z;
    }

    let a = vec![
        vec![sxx, sxy, sx],
        vec![sxy, syy, sy],
        vec![sx, sy, n],
    ];
    let b = vec![sxz, syz, sz];
    let Some(coeffs) = solve_linear_system(a, b) else {
        warn!("plane fit is singular; image left unchanged");
        return image.clone();
    };

    let mut result = image.clone();
    for ((r, c), value) in result.indexed_iter_mut() {
        *value -= coeffs[0] * c as f64 + coeffs[1] * r as f64 + coeffs[2];
    }
    result
}

/// Add a linear ramp along one axis, scaled to a fraction of the value range.
///
/// The ramp step is `(max - min) / 10`, or `/ 50` when `fine` is set.
pub fn tilt_correct(image: &Array2<f64>, direction: TiltDirection, fine: bool) -> Array2<f64> {
    let (rows, cols) = image.dim();
    if rows < 2 || cols < 2 {
        return image.clone();
    }

    let mut lo = f64::INFINITY;
    let mut hi = f64::NEG_INFINITY;
    for &v in image.iter() {
        lo = lo.min(v);
        hi = hi.max(v);
    }
    let dh = (hi - lo) / if fine { 50.0 } else { 10.0 };

    let center_row = (rows - 1) as f64 / 2.0;
    let center_col = (cols - 1) as f64 / 2.0;

    let mut result = image.clone();
    for ((r, c), value) in result.indexed_iter_mut() {
        let ramp = match direction {
            TiltDirection::Up | TiltDirection::Down => {
                dh * (r as f64 - center_row) / center_row
            }
            TiltDirection::Left | TiltDirection::Right => {
                dh * (c as f64 - center_col) / center_col
            }
        };
        match direction {
            TiltDirection::Up | TiltDirection::Left => *value += ramp,
            TiltDirection::Down | TiltDirection::Right => *value -= ramp,
        }
    }
    result
}

// ---------------------------------------------------------------------------
// Surface roughness
// ---------------------------------------------------------------------------

/// Standard roughness parameters over a height map.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Roughness {
    /// Arithmetic average roughness.
    pub ra: f64,
    /// Root-mean-square roughness.
    pub rq: f64,
    /// Peak-to-valley height.
    pub rz: f64,
    /// Maximum peak height above the mean.
    pub rp: f64,
    /// Maximum valley depth below the mean.
    pub rv: f64,
    pub mean: f64,
    pub std: f64,
}

pub fn surface_roughness(image: &Array2<f64>) -> Roughness {
    let values: Vec<f64> = image.iter().copied().filter(|v| !v.is_nan()).collect();
    if values.is_empty() {
        return Roughness {
            ra: 0.0,
            rq: 0.0,
            rz: 0.0,
            rp: 0.0,
            rv: 0.0,
            mean: 0.0,
            std: 0.0,
        };
    }

    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let mut lo = f64::INFINITY;
    let mut hi = f64::NEG_INFINITY;
    let mut abs_dev = 0.0;
    let mut sq_dev = 0.0;
    for &v in &values {
        lo = lo.min(v);
        hi = hi.max(v);
        abs_dev += (v - mean).abs();
        sq_dev += (v - mean).powi(2);
    }

    Roughness {
        ra: abs_dev / n,
        rq: (sq_dev / n).sqrt(),
        rz: hi - lo,
        rp: hi - mean,
        rv: mean - lo,
        mean,
        std: (sq_dev / n).sqrt(),
    }
}

// ---------------------------------------------------------------------------
// Small least-squares helpers
// ---------------------------------------------------------------------------

/// Least-squares polynomial fit; returns coefficients lowest order first.
pub fn polyfit(xs: &[f64], ys: &[f64], degree: usize) -> Option<Vec<f64>> {
    if xs.len() != ys.len() || xs.len() <= degree {
        return None;
    }
    let terms = degree + 1;

    // Normal equations A^T A c = A^T y over the Vandermonde matrix.
    let mut ata = vec![vec![0.0; terms]; terms];
    let mut aty = vec![0.0; terms];
    for (&x, &y) in xs.iter().zip(ys.iter()) {
        let mut powers = Vec::with_capacity(terms);
        let mut p = 1.0;
        for _ in 0..terms {
            powers.push(p);
            p *= x;
        }
        for i in 0..terms {
            aty[i] += powers[i] * y;
            for j in 0..terms {
                ata[i][j] += powers[i] * powers[j];
            }
        }
    }
    solve_linear_system(ata, aty)
}

pub fn eval_poly(coeffs: &[f64], x: f64) -> f64 {
    coeffs.iter().rev().fold(0.0, |acc, &c| acc * x + c)
}

/// Gaussian elimination with partial pivoting. Returns `None` for singular
/// systems.
fn solve_linear_system(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| {
            a[i][col]
                .abs()
                .partial_cmp(&a[j][col].abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })?;
        if a[pivot][col].abs() < 1e-12 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        for row in (col + 1)..n {
            let factor = a[row][col] / a[col][col];
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let mut sum = b[row];
        for col in (row + 1)..n {
            sum -= a[row][col] * x[col];
        }
        x[row] = sum / a[row][row];
    }
    Some(x)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
