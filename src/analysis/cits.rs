use log::{info, warn};
use ndarray::{Array2, Array3, Axis};

use super::geometry::rotate_about;
use crate::data::model::SlowScanDirection;

// ---------------------------------------------------------------------------
// CITS cube assembly
// ---------------------------------------------------------------------------

/// Result of turning a flat measurement matrix into an oriented bias cube.
#[derive(Debug, Clone)]
pub struct CitsAssembly {
    /// Cube shaped `(n_bias, grid_y, grid_x)`, rows ordered bottom-up.
    pub cube: Array3<f64>,
    pub direction: SlowScanDirection,
    /// Effective grid `[gx, gy]` after reconciliation.
    pub grid: [usize; 2],
    pub warnings: Vec<String>,
}

/// Reconcile the declared grid with the actual point count, detect the slow
/// scan direction and reshape the flat measurement matrix into a cube.
///
/// Total: every inconsistency degrades to a warning. A point count below the
/// grid product leaves the missing tail of each bias layer zero-filled.
pub fn assemble_cits(
    matrix: &Array2<f64>,
    x_coords: &[f64],
    y_coords: &[f64],
    declared_grid: [usize; 2],
    angle_deg: f64,
    center: (f64, f64),
) -> CitsAssembly {
    let mut warnings = Vec::new();
    let n_bias = matrix.nrows();
    let count = x_coords.len().min(matrix.ncols());

    let [mut gx, mut gy] = declared_grid;
    if gx == 0 || gy == 0 {
        let message = format!("declared grid {gx}x{gy} is empty; assuming 1x{count}");
        warn!("{message}");
        warnings.push(message);
        gx = count.max(1);
        gy = 1;
    }

    // 1. Reconcile point count and grid.
    let mut points_used = count;
    if count != gx * gy {
        let sqrt = (count as f64).sqrt().round() as usize;
        if sqrt * sqrt == count && count > 0 {
            let message =
                format!("grid {gx}x{gy} does not match {count} points; corrected to {sqrt}x{sqrt}");
            info!("{message}");
            warnings.push(message);
            gx = sqrt;
            gy = sqrt;
        } else {
            points_used = count.min(gx * gy);
            let message = format!(
                "grid {gx}x{gy} does not match {count} points; truncating to {points_used}"
            );
            warn!("{message}");
            warnings.push(message);
        }
    }

    // 2. Coordinate grids: a direct reshape only works when the counts agree;
    //    otherwise rebuild from the unique coordinate values when they form a
    //    consistent grid.
    if points_used != gx * gy {
        let unique_x = count_unique(&x_coords[..points_used]);
        let unique_y = count_unique(&y_coords[..points_used.min(y_coords.len())]);
        if unique_x * unique_y == points_used && unique_x > 0 {
            let message = format!(
                "rebuilt grid from unique coordinates: {gx}x{gy} -> {unique_x}x{unique_y}"
            );
            info!("{message}");
            warnings.push(message);
            gx = unique_x;
            gy = unique_y;
        }
    }

    // 3. Slow-axis direction from the rotated first/last coordinates.
    let (direction, direction_warning) =
        detect_scan_direction(x_coords, y_coords, angle_deg, center);
    if let Some(message) = direction_warning {
        warnings.push(message);
    }

    // 4. Cube fill; missing tail cells stay zero.
    let mut cube = Array3::zeros((n_bias, gy, gx));
    for b in 0..n_bias {
        for idx in 0..points_used.min(gx * gy) {
            let (row, col) = (idx / gx, idx % gx);
            cube[[b, row, col]] = matrix[[b, idx]];
        }
    }

    // 5. Display normalization: downward scans are row-reversed so the origin
    //    is bottom-left. `invert_axis` flips strides, no copy.
    if direction == SlowScanDirection::Downward {
        cube.invert_axis(Axis(1));
    }

    CitsAssembly {
        cube,
        direction,
        grid: [gx, gy],
        warnings,
    }
}

/// Decide whether the slow axis ran upward or downward.
///
/// The first and last recorded coordinates are rotated by the negative frame
/// angle about the frame center; the scan ran upward exactly when the
/// rotated end sits above the rotated start. Never fails: degenerate input
/// defaults to downward with a warning.
pub fn detect_scan_direction(
    x_coords: &[f64],
    y_coords: &[f64],
    angle_deg: f64,
    center: (f64, f64),
) -> (SlowScanDirection, Option<String>) {
    let first = x_coords.first().zip(y_coords.first());
    let last = x_coords.last().zip(y_coords.last());
    let (Some((&x0, &y0)), Some((&x1, &y1))) = (first, last) else {
        let message = "no coordinates for direction detection; assuming downward".to_string();
        warn!("{message}");
        return (SlowScanDirection::Downward, Some(message));
    };

    let (_, y0_rot) = rotate_about((x0, y0), center, -angle_deg);
    let (_, y1_rot) = rotate_about((x1, y1), center, -angle_deg);

    if !y0_rot.is_finite() || !y1_rot.is_finite() {
        let message = "non-finite rotated coordinates; assuming downward".to_string();
        warn!("{message}");
        return (SlowScanDirection::Downward, Some(message));
    }

    if y1_rot > y0_rot {
        (SlowScanDirection::Upward, None)
    } else {
        (SlowScanDirection::Downward, None)
    }
}

fn count_unique(values: &[f64]) -> usize {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    sorted.dedup();
    sorted.len()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    /// Build coordinates for a gx x gy grid scanned bottom-up, row-major.
    fn grid_coords(gx: usize, gy: usize) -> (Vec<f64>, Vec<f64>) {
        let mut xs = Vec::new();
        let mut ys = Vec::new();
        for row in 0..gy {
            for col in 0..gx {
                xs.push(col as f64);
                ys.push(row as f64);
            }
        }
        (xs, ys)
    }

    #[test]
    fn exact_grid_keeps_shape_and_detects_upward() {
        let (xs, ys) = grid_coords(3, 2);
        let matrix = Array2::from_shape_fn((2, 6), |(b, i)| (b * 10 + i) as f64);
        let assembly = assemble_cits(&matrix, &xs, &ys, [3, 2], 0.0, (0.0, 0.0));

        assert_eq!(assembly.grid, [3, 2]);
        assert_eq!(assembly.direction, SlowScanDirection::Upward);
        assert!(assembly.warnings.is_empty());
        assert_eq!(assembly.cube.dim(), (2, 2, 3));
        assert_eq!(assembly.cube[[0, 0, 0]], 0.0);
        assert_eq!(assembly.cube[[1, 1, 2]], 15.0);
    }

    #[test]
    fn downward_scan_is_row_reversed() {
        let (xs, ys_up) = grid_coords(2, 2);
        // Scan top-down: reverse the y sequence.
        let ys: Vec<f64> = ys_up.iter().rev().copied().collect();
        let matrix = Array2::from_shape_fn((1, 4), |(_, i)| i as f64);
        let assembly = assemble_cits(&matrix, &xs, &ys, [2, 2], 0.0, (0.0, 0.0));

        assert_eq!(assembly.direction, SlowScanDirection::Downward);
        // Row order flipped: the first scanned row displays on top.
        assert_eq!(assembly.cube[[0, 0, 0]], 2.0);
        assert_eq!(assembly.cube[[0, 1, 0]], 0.0);
    }

    #[test]
    fn perfect_square_count_corrects_the_grid() {
        let (xs, ys) = grid_coords(4, 4);
        let matrix = Array2::zeros((2, 16));
        let assembly = assemble_cits(&matrix, &xs, &ys, [5, 4], 0.0, (0.0, 0.0));
        assert_eq!(assembly.grid, [4, 4]);
        assert_eq!(assembly.warnings.len(), 1);
    }

    #[test]
    fn count_below_grid_product_truncates_and_zero_fills() {
        // 100 points against a declared 9x12 grid (product 108, not square);
        // irregular coordinates, so no unique-value grid can be rebuilt.
        let xs: Vec<f64> = (0..100).map(|i| i as f64 * 0.31).collect();
        let ys: Vec<f64> = (0..100).map(|i| i as f64 * 0.17).collect();
        let matrix = Array2::from_elem((3, 100), 1.0);
        let assembly = assemble_cits(&matrix, &xs, &ys, [9, 12], 0.0, (0.0, 0.0));

        assert_eq!(assembly.grid, [9, 12]);
        assert_eq!(assembly.cube.dim(), (3, 12, 9));
        assert!(assembly
            .warnings
            .iter()
            .any(|w| w.contains("truncating")));
        // 100 filled cells per layer, 8 zero-filled.
        let layer = assembly.cube.index_axis(Axis(0), 0);
        let filled = layer.iter().filter(|&&v| v == 1.0).count();
        assert_eq!(filled, 100);
    }

    #[test]
    fn consistent_unique_coordinates_rebuild_the_grid() {
        // 12 points against a declared 5x4 grid; the coordinates form a
        // clean 4x3 grid, so the grid is rebuilt from the unique values.
        let (xs, ys) = grid_coords(4, 3);
        let matrix = Array2::zeros((1, 12));
        let assembly = assemble_cits(&matrix, &xs, &ys, [5, 4], 0.0, (0.0, 0.0));
        assert_eq!(assembly.grid, [4, 3]);
        assert_eq!(assembly.cube.dim(), (1, 3, 4));
    }

    #[test]
    fn rotated_frame_direction_uses_the_negative_angle() {
        // End point above the start only after undoing a 90° frame rotation.
        let xs = vec![0.0, -5.0];
        let ys = vec![0.0, 0.0];
        let (direction, warning) = detect_scan_direction(&xs, &ys, 90.0, (0.0, 0.0));
        assert_eq!(direction, SlowScanDirection::Upward);
        assert!(warning.is_none());
    }

    #[test]
    fn empty_coordinates_default_downward() {
        let (direction, warning) = detect_scan_direction(&[], &[], 0.0, (0.0, 0.0));
        assert_eq!(direction, SlowScanDirection::Downward);
        assert!(warning.is_some());
    }
}
