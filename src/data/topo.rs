use std::path::Path;

use log::{info, warn};
use ndarray::{Array2, Axis};

// ---------------------------------------------------------------------------
// .int binary decoder
// ---------------------------------------------------------------------------

/// Decode a raw topography (`.int`) file.
///
/// The file is a bare dump of `x_pixels * y_pixels` little-endian `i32`
/// values, row by row from the top of the frame. Each value is multiplied by
/// `scale` and the rows are flipped so the returned array has its origin at
/// the bottom-left corner.
///
/// A length mismatch is not fatal: the decoder logs a warning and returns a
/// zero-filled array of the expected shape so downstream display code always
/// has something to show.
pub fn decode_int_file(
    path: &Path,
    scale: f64,
    x_pixels: usize,
    y_pixels: usize,
) -> std::io::Result<(Array2<f64>, Vec<String>)> {
    let mut warnings = Vec::new();
    let bytes = std::fs::read(path)?;

    let expected = x_pixels * y_pixels * 4;
    if bytes.len() != expected {
        let message = format!(
            "length mismatch in {}: expected {expected} bytes ({x_pixels}x{y_pixels}x4), got {}",
            path.display(),
            bytes.len()
        );
        warn!("{message}");
        warnings.push(message);
        return Ok((Array2::zeros((y_pixels, x_pixels)), warnings));
    }

    let values: Vec<f64> = bytes
        .chunks_exact(4)
        .map(|chunk| {
            let raw = i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            raw as f64 * scale
        })
        .collect();

    // chunks_exact guarantees exactly y*x values here, so the reshape is
    // infallible; fall back to zeros anyway rather than panic.
    let mut image = match Array2::from_shape_vec((y_pixels, x_pixels), values) {
        Ok(arr) => arr,
        Err(e) => {
            let message = format!("reshape failed for {}: {e}", path.display());
            warn!("{message}");
            warnings.push(message);
            return Ok((Array2::zeros((y_pixels, x_pixels)), warnings));
        }
    };

    // Bottom-left origin.
    image.invert_axis(Axis(0));

    info!(
        "decoded {}: {}x{} px, scale {scale}",
        path.display(),
        x_pixels,
        y_pixels
    );
    Ok((image, warnings))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_int(values: &[i32]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::with_suffix(".int").unwrap();
        for v in values {
            file.write_all(&v.to_le_bytes()).unwrap();
        }
        file.flush().unwrap();
        file
    }

    #[test]
    fn decodes_scaled_and_flipped() {
        // 2x2 frame, file order: top row (1, 2) then bottom row (3, 4).
        let file = write_int(&[1, 2, 3, 4]);
        let (image, warnings) = decode_int_file(file.path(), 0.5, 2, 2).unwrap();
        assert!(warnings.is_empty());
        // After the flip the first stored row is the physical bottom row.
        assert_eq!(image[[0, 0]], 1.5);
        assert_eq!(image[[0, 1]], 2.0);
        assert_eq!(image[[1, 0]], 0.5);
        assert_eq!(image[[1, 1]], 1.0);
    }

    #[test]
    fn length_mismatch_yields_zero_array_with_warning() {
        let file = write_int(&[1, 2, 3]);
        let (image, warnings) = decode_int_file(file.path(), 1.0, 2, 2).unwrap();
        assert_eq!(image.dim(), (2, 2));
        assert!(image.iter().all(|&v| v == 0.0));
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        assert!(decode_int_file(Path::new("/no/such/file.int"), 1.0, 2, 2).is_err());
    }
}
