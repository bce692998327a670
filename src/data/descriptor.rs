use std::collections::BTreeMap;
use std::path::Path;

use log::{debug, info, warn};

use super::model::{
    file_stem_of, DecodedResult, DescriptorData, MeasurementMode, ScanParameters,
    SpecFileDesc, TopoFileDesc,
};
use crate::session::keys::{derive_signal, SignalTokens};

// ---------------------------------------------------------------------------
// Public entry-point
// ---------------------------------------------------------------------------

/// Parse an experiment descriptor (`.txt`) file.
///
/// The format is a flat list of `Key : value` parameter lines interleaved
/// with `FileDescBegin … FileDescEnd` blocks, one block per associated
/// `.int` or `.dat` file. Problems inside a block degrade to warnings; only
/// an unreadable file yields a failed result.
pub fn parse_descriptor(path: &Path, tokens: &SignalTokens) -> DecodedResult<DescriptorData> {
    let mut result = DecodedResult::new();
    result.insert_metadata("path", path.display());
    result.insert_metadata("type", "descriptor");

    let raw = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            result.add_error(format!("reading descriptor {}: {e}", path.display()));
            return result;
        }
    };
    // Descriptors from older control software are not always valid UTF-8.
    let content = String::from_utf8_lossy(&raw);

    let mut metadata: BTreeMap<String, String> = BTreeMap::new();
    let mut topo_files: Vec<TopoFileDesc> = Vec::new();
    let mut spec_files: Vec<SpecFileDesc> = Vec::new();
    let mut signal_types: Vec<String> = Vec::new();

    let mut block: Option<Vec<(String, String)>> = None;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "FileDescBegin" {
            if block.is_some() {
                result.add_warning("nested FileDescBegin; previous block discarded".to_string());
            }
            block = Some(Vec::new());
            continue;
        }
        if line == "FileDescEnd" {
            match block.take() {
                Some(fields) => finish_block(
                    &fields,
                    tokens,
                    &mut topo_files,
                    &mut spec_files,
                    &mut signal_types,
                    &mut result,
                ),
                None => result.add_warning("FileDescEnd without FileDescBegin".to_string()),
            }
            continue;
        }

        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_string();
        let value = value.trim().to_string();
        if key.is_empty() {
            continue;
        }
        match &mut block {
            Some(fields) => fields.push((key, value)),
            None => {
                metadata.insert(key, value);
            }
        }
    }

    if block.is_some() {
        result.add_warning("unterminated FileDescBegin block".to_string());
    }

    let scan = scan_parameters_from(&metadata, &mut result);

    result.insert_metadata("total_topo_files", topo_files.len());
    result.insert_metadata("total_spec_files", spec_files.len());
    result.insert_metadata("signal_types_count", signal_types.len());

    info!(
        "descriptor parsed: {} ({} topo, {} spectroscopy files)",
        path.display(),
        topo_files.len(),
        spec_files.len()
    );

    let data = DescriptorData {
        metadata,
        scan,
        topo_files,
        spec_files,
        signal_types,
    };
    result.payload = Some(std::sync::Arc::new(data));
    result
}

// ---------------------------------------------------------------------------
// File-description blocks
// ---------------------------------------------------------------------------

fn finish_block(
    fields: &[(String, String)],
    tokens: &SignalTokens,
    topo_files: &mut Vec<TopoFileDesc>,
    spec_files: &mut Vec<SpecFileDesc>,
    signal_types: &mut Vec<String>,
    result: &mut DecodedResult<DescriptorData>,
) {
    let Some(filename) = field(fields, "FileName") else {
        result.add_warning("file description without FileName skipped".to_string());
        return;
    };
    let filename = filename.to_string();
    let stem = file_stem_of(&filename).to_string();

    let signal_info = derive_signal(&stem, tokens);
    if !signal_types.contains(&signal_info.signal) {
        signal_types.push(signal_info.signal.clone());
    }

    if filename.ends_with(".int") {
        let desc = TopoFileDesc {
            filename,
            caption: field(fields, "Caption").map(str::to_string),
            scale: parse_field(fields, "Scale", result),
            phys_unit: field(fields, "PhysUnit").map(str::to_string),
            offset: parse_field(fields, "Offset", result),
            signal_type: Some(signal_info.signal),
            direction: signal_info.direction,
        };
        debug!("descriptor: topography file {}", desc.filename);
        topo_files.push(desc);
    } else if filename.ends_with(".dat") {
        let caption = field(fields, "Caption").map(str::to_string);
        let (measurement_type, measurement_mode, grid_size) = match &caption {
            Some(c) => parse_caption(c, result),
            None => (None, MeasurementMode::Unknown, None),
        };

        let delays = field_starting_with(fields, "Delays")
            .map(|v| parse_slash_list(v, result))
            .unwrap_or_default();
        let slew_rates = field(fields, "Slewrate")
            .map(|v| parse_slash_list(v, result))
            .unwrap_or_default();

        let desc = SpecFileDesc {
            filename,
            caption,
            measurement_mode,
            measurement_type,
            grid_size,
            header_cols: parse_field(fields, "HeaderCols", result),
            header_rows: parse_field(fields, "HeaderRows", result),
            delays,
            slew_rates,
            average: parse_field(fields, "Average", result),
            signal_type: Some(signal_info.signal),
            direction: signal_info.direction,
        };
        debug!("descriptor: spectroscopy file {}", desc.filename);
        spec_files.push(desc);
    } else {
        result.add_warning(format!("unrecognized file extension: {filename}"));
    }
}

fn field<'a>(fields: &'a [(String, String)], key: &str) -> Option<&'a str> {
    fields
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

fn field_starting_with<'a>(fields: &'a [(String, String)], prefix: &str) -> Option<&'a str> {
    fields
        .iter()
        .find(|(k, _)| k.starts_with(prefix))
        .map(|(_, v)| v.as_str())
}

fn parse_field<T: std::str::FromStr, P>(
    fields: &[(String, String)],
    key: &str,
    result: &mut DecodedResult<P>,
) -> Option<T> {
    let value = field(fields, key)?;
    match value.parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            result.add_warning(format!("unparsable {key}: '{value}'"));
            None
        }
    }
}

/// Parse a `/`-separated numeric list (delays, slew rates). `Infinity`
/// entries parse to `f64::INFINITY` natively.
fn parse_slash_list<P>(value: &str, result: &mut DecodedResult<P>) -> Vec<f64> {
    value
        .split('/')
        .filter_map(|tok| {
            let tok = tok.trim();
            match tok.parse::<f64>() {
                Ok(v) => Some(v),
                Err(_) => {
                    result.add_warning(format!("unparsable numeric entry: '{tok}'"));
                    None
                }
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Caption grammar
// ---------------------------------------------------------------------------

/// Decode a spectroscopy caption such as `X(U)-Lia1R(100/100)`.
///
/// The token after the first `-` names the measurement type; the final
/// parenthesized group is either `gx/gy` (CITS grid) or a point count (STS).
pub fn parse_caption<P>(
    caption: &str,
    result: &mut DecodedResult<P>,
) -> (Option<String>, MeasurementMode, Option<[usize; 2]>) {
    let measurement_type = caption
        .split_once('-')
        .map(|(_, rest)| rest.split('(').next().unwrap_or(rest).trim().to_string())
        .filter(|t| !t.is_empty());

    let bracket = caption
        .rsplit_once('(')
        .and_then(|(_, rest)| rest.split(')').next());

    let (mode, grid) = match bracket {
        Some(content) if content.contains('/') => {
            let parts: Vec<&str> = content.split('/').collect();
            match (parts[0].trim().parse::<usize>(), parts.get(1).and_then(|p| p.trim().parse::<usize>().ok())) {
                (Ok(gx), Some(gy)) if parts.len() == 2 => {
                    (MeasurementMode::Cits, Some([gx, gy]))
                }
                _ => {
                    result.add_warning(format!("unparsable caption grid: '{caption}'"));
                    (MeasurementMode::Unknown, None)
                }
            }
        }
        Some(content) => match content.trim().parse::<usize>() {
            Ok(_) => (MeasurementMode::Sts, None),
            Err(_) => {
                result.add_warning(format!("unparsable caption point count: '{caption}'"));
                (MeasurementMode::Unknown, None)
            }
        },
        None => (MeasurementMode::Unknown, None),
    };

    (measurement_type, mode, grid)
}

// ---------------------------------------------------------------------------
// Scan parameters
// ---------------------------------------------------------------------------

fn scan_parameters_from(
    metadata: &BTreeMap<String, String>,
    result: &mut DecodedResult<DescriptorData>,
) -> ScanParameters {
    let defaults = ScanParameters::default();
    ScanParameters {
        x_pixel: metadata_number(metadata, "xPixel", defaults.x_pixel as f64, result) as usize,
        y_pixel: metadata_number(metadata, "yPixel", defaults.y_pixel as f64, result) as usize,
        x_range: metadata_number(metadata, "XScanRange", defaults.x_range, result),
        y_range: metadata_number(metadata, "YScanRange", defaults.y_range, result),
        angle: metadata_number(metadata, "Angle", defaults.angle, result),
        x_center: metadata_number(metadata, "xCenter", defaults.x_center, result),
        y_center: metadata_number(metadata, "yCenter", defaults.y_center, result),
    }
}

fn metadata_number(
    metadata: &BTreeMap<String, String>,
    key: &str,
    default: f64,
    result: &mut DecodedResult<DescriptorData>,
) -> f64 {
    match metadata.get(key) {
        Some(value) => match value.trim().parse::<f64>() {
            Ok(v) => v,
            Err(_) => {
                warn!("descriptor {key} = '{value}' unparsable, using {default}");
                result.add_warning(format!("unparsable {key}: '{value}', using {default}"));
                default
            }
        },
        None => default,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
