use std::sync::Arc;

use log::info;
use ndarray::Array2;
use serde::Serialize;

use crate::analysis::flatten::{
    flatten, surface_roughness, tilt_correct, FlattenMethod, Roughness, TiltDirection,
};
use crate::analysis::profile::{topography_profile, LineProfile, ProfileMethod};
use crate::data::model::TopographyData;

// ---------------------------------------------------------------------------
// Topography analyzer
// ---------------------------------------------------------------------------

/// Basic statistics over a height map.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SurfaceStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    pub std: f64,
    pub rms: f64,
}

/// Per-file topography analysis: background removal, tilt correction, line
/// profiles and surface statistics.
///
/// The analyzer owns its processed image; the decoded payload behind the
/// `Arc` is never mutated. `current_image` is the processed image when one
/// exists, the raw height map otherwise.
pub struct TopoAnalyzer {
    data: Arc<TopographyData>,
    processed: Option<Array2<f64>>,
}

impl TopoAnalyzer {
    pub fn new(data: Arc<TopographyData>) -> Self {
        TopoAnalyzer {
            data,
            processed: None,
        }
    }

    pub fn data(&self) -> &TopographyData {
        &self.data
    }

    /// The processed image when background removal or tilt correction has
    /// run, the raw height map otherwise.
    pub fn current_image(&self) -> &Array2<f64> {
        self.processed.as_ref().unwrap_or(&self.data.image)
    }

    pub fn is_processed(&self) -> bool {
        self.processed.is_some()
    }

    /// Apply a flattening method to the raw height map and keep the result
    /// as the current image.
    pub fn flatten(&mut self, method: FlattenMethod) -> &Array2<f64> {
        info!("flattening {} with {method:?}", self.data.signal_type);
        self.processed = Some(flatten(&self.data.image, method));
        self.current_image()
    }

    /// Apply a tilt-correction step to the current image.
    pub fn tilt(&mut self, direction: TiltDirection, fine: bool) -> &Array2<f64> {
        self.processed = Some(tilt_correct(self.current_image(), direction, fine));
        self.current_image()
    }

    /// Discard all processing; `current_image` returns to the raw data.
    pub fn reset(&mut self) {
        self.processed = None;
    }

    /// Height profile over the current image between `(row, col)` points.
    pub fn line_profile(
        &self,
        start: (usize, usize),
        end: (usize, usize),
        method: ProfileMethod,
    ) -> LineProfile {
        topography_profile(
            self.current_image(),
            start,
            end,
            method,
            self.data.pixel_scale_x(),
        )
    }

    /// Summary statistics over the current image, NaN values excluded.
    pub fn statistics(&self) -> SurfaceStats {
        let mut values: Vec<f64> = self
            .current_image()
            .iter()
            .copied()
            .filter(|v| !v.is_nan())
            .collect();
        if values.is_empty() {
            return SurfaceStats {
                min: 0.0,
                max: 0.0,
                mean: 0.0,
                median: 0.0,
                std: 0.0,
                rms: 0.0,
            };
        }
        values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let sq_dev: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
        let median = if values.len() % 2 == 1 {
            values[values.len() / 2]
        } else {
            (values[values.len() / 2 - 1] + values[values.len() / 2]) / 2.0
        };

        SurfaceStats {
            min: values[0],
            max: values[values.len() - 1],
            mean,
            median,
            std: (sq_dev / n).sqrt(),
            rms: (sq_dev / n).sqrt(),
        }
    }

    /// Roughness parameters over the current image.
    pub fn roughness(&self) -> Roughness {
        surface_roughness(self.current_image())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn analyzer() -> TopoAnalyzer {
        let image = Array2::from_shape_fn((4, 4), |(r, c)| (r * 4 + c) as f64);
        TopoAnalyzer::new(Arc::new(TopographyData {
            image,
            x_range: 8.0,
            y_range: 8.0,
            x_pixels: 4,
            y_pixels: 4,
            data_scale: 1.0,
            signal_type: "Topo".to_string(),
            direction: None,
        }))
    }

    #[test]
    fn flatten_zeroes_row_means_and_reset_restores_raw() {
        let mut analyzer = analyzer();
        analyzer.flatten(FlattenMethod::LinewiseMean);
        for row in analyzer.current_image().rows() {
            assert!(row.mean().unwrap().abs() < 1e-9);
        }
        analyzer.reset();
        assert_eq!(analyzer.current_image()[[0, 1]], 1.0);
    }

    #[test]
    fn profile_uses_physical_pixel_scale() {
        let analyzer = analyzer();
        let profile = analyzer.line_profile((0, 0), (0, 3), ProfileMethod::Rasterize);
        // 3 pixel steps at 2 nm per pixel.
        assert_eq!(profile.length, 6.0);
        assert_eq!(profile.n_points, 4);
    }

    #[test]
    fn tilt_builds_on_the_current_image() {
        let mut analyzer = analyzer();
        analyzer.flatten(FlattenMethod::LinewiseMean);
        let before = analyzer.current_image().clone();
        analyzer.tilt(TiltDirection::Left, true);
        assert!(analyzer.is_processed());
        assert_ne!(*analyzer.current_image(), before);
    }

    #[test]
    fn statistics_match_known_values() {
        let stats = analyzer().statistics();
        assert_eq!(stats.min, 0.0);
        assert_eq!(stats.max, 15.0);
        assert_eq!(stats.mean, 7.5);
        assert_eq!(stats.median, 7.5);
    }
}
