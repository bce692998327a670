use std::path::Path;

use log::{debug, info, warn};
use ndarray::{Array1, Array2};

// ---------------------------------------------------------------------------
// .dat tabular decoder
// ---------------------------------------------------------------------------

/// Measurement units taken from the second header row.
#[derive(Debug, Clone)]
pub struct TableUnits {
    pub time: String,
    pub distance: String,
    pub bias: String,
}

impl Default for TableUnits {
    fn default() -> Self {
        TableUnits {
            time: "s".to_string(),
            distance: "nm".to_string(),
            bias: "mV".to_string(),
        }
    }
}

/// Raw content of a spectroscopy (`.dat`) file, before any grid reshaping.
///
/// Layout on disk (tab-separated):
/// ```text
/// time      distance  bias   x1    x2    …   ← header row 1: labels + x coords
/// s         nm        mV     y1    y2    …   ← header row 2: units + y coords
/// t0        d0        b0     m0,1  m0,2  …   ← one row per bias step
/// ```
#[derive(Debug, Clone)]
pub struct SpectroTable {
    pub times: Array1<f64>,
    pub distances: Array1<f64>,
    pub bias_values: Array1<f64>,
    /// Measurement matrix shaped `(n_bias_steps, n_points)`.
    pub matrix: Array2<f64>,
    pub x_coords: Vec<f64>,
    pub y_coords: Vec<f64>,
    pub units: TableUnits,
    pub warnings: Vec<String>,
}

impl SpectroTable {
    pub fn n_points(&self) -> usize {
        self.x_coords.len()
    }

    pub fn n_bias_steps(&self) -> usize {
        self.bias_values.len()
    }
}

/// Read and validate a `.dat` file.
///
/// Structural problems (missing file, too few rows or columns, unparsable
/// header coordinates) are hard errors; a measurement section narrower than
/// the advertised point list merely narrows the point count with a warning.
pub fn read_dat_file(path: &Path) -> Result<SpectroTable, String> {
    let mut warnings = Vec::new();

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(|e| format!("opening {}: {e}", path.display()))?;

    let mut rows: Vec<csv::StringRecord> = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record.map_err(|e| format!("row {i}: {e}"))?;
        // Drop fully blank lines.
        if record.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }
        rows.push(record);
    }

    if rows.len() < 3 {
        return Err(format!(
            "{}: need at least 3 rows (2 header rows + data), got {}",
            path.display(),
            rows.len()
        ));
    }
    if rows[0].len() < 4 {
        return Err(format!(
            "{}: need at least 4 columns (time, distance, bias + one point), got {}",
            path.display(),
            rows[0].len()
        ));
    }

    // --- Header rows: labels/units in the first three columns, paired
    //     x/y coordinates from the fourth on.
    let header_x = &rows[0];
    let header_y = &rows[1];

    let mut x_coords = Vec::new();
    let mut y_coords = Vec::new();
    for i in 3..header_x.len().min(header_y.len()) {
        let x = header_x.get(i).map(str::trim).unwrap_or("").parse::<f64>();
        let y = header_y.get(i).map(str::trim).unwrap_or("").parse::<f64>();
        match (x, y) {
            (Ok(x), Ok(y)) => {
                x_coords.push(x);
                y_coords.push(y);
            }
            _ => {
                let message = format!("unparsable coordinate pair at column {}", i + 1);
                warn!("{}: {message}", path.display());
                warnings.push(message);
                break;
            }
        }
    }
    if x_coords.is_empty() {
        return Err(format!("{}: no valid coordinate data in header", path.display()));
    }

    let units = TableUnits {
        time: header_y.get(0).map(str::trim).unwrap_or("s").to_string(),
        distance: header_y.get(1).map(str::trim).unwrap_or("nm").to_string(),
        bias: header_y.get(2).map(str::trim).unwrap_or("mV").to_string(),
    };

    // --- Data rows. The measurement section may be narrower than the
    //     advertised point list; narrow rather than fail.
    let data_rows = &rows[2..];
    let mut n_points = x_coords.len();
    let narrowest = data_rows
        .iter()
        .map(|r| r.len().saturating_sub(3))
        .min()
        .unwrap_or(0);
    if narrowest < n_points {
        let message = format!(
            "measurement columns ({narrowest}) fewer than header points ({n_points}); narrowing"
        );
        warn!("{}: {message}", path.display());
        warnings.push(message);
        n_points = narrowest;
    }
    if n_points == 0 {
        return Err(format!("{}: no measurement columns", path.display()));
    }
    x_coords.truncate(n_points);
    y_coords.truncate(n_points);

    let n_steps = data_rows.len();
    let mut times = Vec::with_capacity(n_steps);
    let mut distances = Vec::with_capacity(n_steps);
    let mut bias_values = Vec::with_capacity(n_steps);
    let mut values = Vec::with_capacity(n_steps * n_points);

    for (row_no, record) in data_rows.iter().enumerate() {
        let cell = |i: usize| -> Result<f64, String> {
            record
                .get(i)
                .map(str::trim)
                .unwrap_or("")
                .parse::<f64>()
                .map_err(|_| {
                    format!(
                        "{}: data row {}, column {}: not a number",
                        path.display(),
                        row_no + 3,
                        i + 1
                    )
                })
        };
        times.push(cell(0)?);
        distances.push(cell(1)?);
        bias_values.push(cell(2)?);
        for i in 0..n_points {
            values.push(cell(3 + i)?);
        }
    }

    let matrix = Array2::from_shape_vec((n_steps, n_points), values)
        .map_err(|e| format!("{}: assembling matrix: {e}", path.display()))?;

    debug!(
        "{}: {} bias steps, {} points",
        path.display(),
        n_steps,
        n_points
    );
    info!("read {}", path.display());

    Ok(SpectroTable {
        times: Array1::from(times),
        distances: Array1::from(distances),
        bias_values: Array1::from(bias_values),
        matrix,
        x_coords,
        y_coords,
        units,
        warnings,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_dat(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::with_suffix(".dat").unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn reads_headers_and_matrix() {
        let file = write_dat(
            "time\tdistance\tbias\t1.0\t2.0\n\
             s\tnm\tmV\t5.0\t5.0\n\
             0.0\t0.0\t-100.0\t1.5\t2.5\n\
             0.1\t0.5\t100.0\t3.5\t4.5\n",
        );
        let table = read_dat_file(file.path()).unwrap();
        assert_eq!(table.n_points(), 2);
        assert_eq!(table.n_bias_steps(), 2);
        assert_eq!(table.x_coords, vec![1.0, 2.0]);
        assert_eq!(table.y_coords, vec![5.0, 5.0]);
        assert_eq!(table.bias_values.to_vec(), vec![-100.0, 100.0]);
        assert_eq!(table.matrix[[1, 0]], 3.5);
        assert_eq!(table.units.bias, "mV");
    }

    #[test]
    fn too_few_rows_is_an_error() {
        let file = write_dat("time\tdistance\tbias\t1.0\ns\tnm\tmV\t2.0\n");
        assert!(read_dat_file(file.path()).is_err());
    }

    #[test]
    fn too_few_columns_is_an_error() {
        let file = write_dat("a\tb\tc\nd\te\tf\n1\t2\t3\n");
        assert!(read_dat_file(file.path()).is_err());
    }

    #[test]
    fn narrow_measurement_section_narrows_points() {
        let file = write_dat(
            "time\tdistance\tbias\t1.0\t2.0\n\
             s\tnm\tmV\t5.0\t6.0\n\
             0.0\t0.0\t-100.0\t1.5\n\
             0.1\t0.5\t100.0\t3.5\n",
        );
        let table = read_dat_file(file.path()).unwrap();
        assert_eq!(table.n_points(), 1);
        assert!(!table.warnings.is_empty());
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(read_dat_file(Path::new("/no/such/file.dat")).is_err());
    }
}
