// ---------------------------------------------------------------------------
// Line geometry primitives
// ---------------------------------------------------------------------------

/// Integer midpoint line rasterization between two grid points.
///
/// Returns the minimal ordered set of pixels touched by the segment, start
/// and end inclusive, with no duplicates.
///
/// ```
/// let pixels = rusty_spm::analysis::geometry::rasterize_line((0, 0), (3, 2));
/// assert_eq!(pixels, vec![(0, 0), (1, 1), (2, 1), (3, 2)]);
/// ```
pub fn rasterize_line(start: (i64, i64), end: (i64, i64)) -> Vec<(i64, i64)> {
    let (x0, y0) = start;
    let (x1, y1) = end;

    let dx = (x1 - x0).abs();
    let dy = (y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx - dy;

    let mut points = Vec::with_capacity((dx.max(dy) + 1) as usize);
    let (mut x, mut y) = (x0, y0);
    loop {
        points.push((x, y));
        if x == x1 && y == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 > -dy {
            err -= dy;
            x += sx;
        }
        if e2 < dx {
            err += dx;
            y += sy;
        }
    }
    points
}

/// `count` evenly spaced points linearly interpolated between `start` and
/// `end` (both included). `count` is clamped to at least 2.
pub fn interpolate_line(start: (f64, f64), end: (f64, f64), count: usize) -> Vec<(f64, f64)> {
    let count = count.max(2);
    let (x0, y0) = start;
    let (x1, y1) = end;
    (0..count)
        .map(|i| {
            let t = i as f64 / (count - 1) as f64;
            (x0 + t * (x1 - x0), y0 + t * (y1 - y0))
        })
        .collect()
}

/// Euclidean length of the segment.
pub fn line_length(start: (f64, f64), end: (f64, f64)) -> f64 {
    ((end.0 - start.0).powi(2) + (end.1 - start.1).powi(2)).sqrt()
}

/// Dense integer sampling along a segment.
///
/// The sample count is `max(2, round(length * density_factor))`; interpolated
/// coordinates are rounded to integer indices and duplicate pairs are dropped
/// while preserving first-seen order.
pub fn dense_sample_line(
    start: (i64, i64),
    end: (i64, i64),
    density_factor: f64,
) -> Vec<(i64, i64)> {
    let length = line_length(
        (start.0 as f64, start.1 as f64),
        (end.0 as f64, end.1 as f64),
    );
    let count = ((length * density_factor).round() as usize).max(2);

    let mut seen = std::collections::HashSet::new();
    let mut points = Vec::new();
    for (x, y) in interpolate_line(
        (start.0 as f64, start.1 as f64),
        (end.0 as f64, end.1 as f64),
        count,
    ) {
        let coord = (x.round() as i64, y.round() as i64);
        if seen.insert(coord) {
            points.push(coord);
        }
    }
    points
}

/// Rotate `point` by `angle_deg` degrees (counter-clockwise) about `center`.
///
/// Returns the rotated offset relative to `center`; callers comparing
/// positions along an axis need no translation back.
pub fn rotate_about(point: (f64, f64), center: (f64, f64), angle_deg: f64) -> (f64, f64) {
    let (x, y) = (point.0 - center.0, point.1 - center.1);
    let rad = angle_deg.to_radians();
    let (sin, cos) = rad.sin_cos();
    (cos * x - sin * y, sin * x + cos * y)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
