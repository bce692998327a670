use log::debug;
use serde::Serialize;

// ---------------------------------------------------------------------------
// Bias-sweep pattern detection
// ---------------------------------------------------------------------------

/// One sweep segment: inclusive start/end indices into the bias sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepSegment {
    pub start: usize,
    pub end: usize,
}

impl SweepSegment {
    pub fn new(start: usize, end: usize) -> Self {
        SweepSegment { start, end }
    }
}

/// Classification of a 1-D bias sequence into forward/backward sweeps.
#[derive(Debug, Clone, Serialize)]
pub struct BiasPattern {
    /// Never empty: `trivial_forward`, `forward_1`, `multi_forward_N`,
    /// `raster_N` or `unknown_forward`.
    pub pattern_type: String,
    pub forward: Vec<SweepSegment>,
    pub backward: Vec<SweepSegment>,
    /// Number of sweep end points found.
    pub cycles: usize,
}

/// Classify a bias sequence into forward and backward sweep segments.
///
/// Total over every input; degenerate sequences produce a trivial or
/// whole-sequence forward segment rather than an error.
///
/// The starter value is `value[0]`; the ender is the global extremum the
/// starter does not equal, preferring the maximum unless the starter
/// already is the maximum. This rule is kept literally even when the
/// starter equals neither extremum.
pub fn detect_bias_pattern(values: &[f64]) -> BiasPattern {
    if values.len() < 2 {
        let forward = if values.is_empty() {
            Vec::new()
        } else {
            vec![SweepSegment::new(0, values.len() - 1)]
        };
        return BiasPattern {
            pattern_type: "trivial_forward".to_string(),
            forward,
            backward: Vec::new(),
            cycles: 0,
        };
    }

    let starter = values[0];
    let mut max = f64::NEG_INFINITY;
    let mut min = f64::INFINITY;
    for &v in values {
        max = max.max(v);
        min = min.min(v);
    }
    let ender = if starter == max { min } else { max };

    let start_points: Vec<usize> = indices_equal(values, starter);
    let end_points: Vec<usize> = indices_equal(values, ender);
    let cycles = end_points.len();

    let pattern = if start_points.len() == 1 && end_points.len() == 1 {
        BiasPattern {
            pattern_type: "forward_1".to_string(),
            forward: vec![SweepSegment::new(start_points[0], end_points[0])],
            backward: Vec::new(),
            cycles,
        }
    } else if start_points.len() == end_points.len() {
        let forward = start_points
            .iter()
            .zip(end_points.iter())
            .map(|(&s, &e)| SweepSegment::new(s, e))
            .collect::<Vec<_>>();
        BiasPattern {
            pattern_type: format!("multi_forward_{}", forward.len()),
            forward,
            backward: Vec::new(),
            cycles,
        }
    } else if start_points.len() == end_points.len() + 1 {
        // Raster: each sweep out to the ender returns to the next starter.
        let forward = start_points
            .iter()
            .zip(end_points.iter())
            .map(|(&s, &e)| SweepSegment::new(s, e))
            .collect::<Vec<_>>();
        let backward = end_points
            .iter()
            .zip(start_points.iter().skip(1))
            .map(|(&e, &s)| SweepSegment::new(e, s))
            .collect::<Vec<_>>();
        BiasPattern {
            pattern_type: format!("raster_{cycles}"),
            forward,
            backward,
            cycles,
        }
    } else {
        BiasPattern {
            pattern_type: "unknown_forward".to_string(),
            forward: vec![SweepSegment::new(0, values.len() - 1)],
            backward: Vec::new(),
            cycles,
        }
    };

    debug!(
        "bias pattern: {} ({} forward, {} backward)",
        pattern.pattern_type,
        pattern.forward.len(),
        pattern.backward.len()
    );
    pattern
}

fn indices_equal(values: &[f64], target: f64) -> Vec<usize> {
    values
        .iter()
        .enumerate()
        .filter(|(_, &v)| v == target)
        .map(|(i, _)| i)
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
