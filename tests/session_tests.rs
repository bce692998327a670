use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rusty_spm::analysis::profile::ProfileMethod;
use rusty_spm::data::model::{DataKind, SlowScanDirection};
use rusty_spm::session::{Session, SessionConfig};
use rusty_spm::SpmError;

// ---------------------------------------------------------------------------
// Fixture: a tiny but complete experiment on disk
// ---------------------------------------------------------------------------

const DESCRIPTOR: &str = "\
Version : 1.0
xPixel : 4
yPixel : 4
XScanRange : 100
YScanRange : 100
Angle : 0
xCenter : 0
yCenter : 0

FileDescBegin
FileName : sample_TopoFwd.int
Caption : Topo Forward
Scale : 0.5
PhysUnit : nm
Offset : 0
FileDescEnd

FileDescBegin
FileName : sample_TopoBwd.int
Caption : Topo Backward
Scale : 0.5
PhysUnit : nm
Offset : 0
FileDescEnd

FileDescBegin
FileName : sample_Lia1R_Matrix.dat
Caption : X(U)-Lia1R(2/2)
HeaderCols : 3
HeaderRows : 2
Average : 1
FileDescEnd

FileDescBegin
FileName : sample_It_to_PC.dat
Caption : X(U)-It_to_PC(2)
HeaderCols : 3
HeaderRows : 2
Average : 1
FileDescEnd
";

fn write_int(path: &Path, rows: usize, cols: usize) {
    let mut file = File::create(path).unwrap();
    for value in 0..(rows * cols) as i32 {
        file.write_all(&value.to_le_bytes()).unwrap();
    }
}

fn write_cits_dat(path: &Path) {
    // 2x2 grid scanned bottom-up, raster bias sweep 0 → 100 → 0 mV.
    let mut file = File::create(path).unwrap();
    writeln!(file, "time\tdistance\tbias\t0.0\t50.0\t0.0\t50.0").unwrap();
    writeln!(file, "s\tnm\tmV\t0.0\t0.0\t50.0\t50.0").unwrap();
    for (step, bias) in [0.0, 50.0, 100.0, 50.0, 0.0].iter().enumerate() {
        let cells: Vec<String> = (0..4).map(|p| format!("{}", step * 10 + p)).collect();
        writeln!(
            file,
            "{:.3}\t0.0\t{bias:.1}\t{}",
            step as f64 * 0.002,
            cells.join("\t")
        )
        .unwrap();
    }
}

fn write_sts_dat(path: &Path) {
    let mut file = File::create(path).unwrap();
    writeln!(file, "time\tdistance\tbias\t25.0\t60.0").unwrap();
    writeln!(file, "s\tnm\tmV\t25.0\t70.0").unwrap();
    for (step, bias) in [-100.0f64, 0.0, 100.0].iter().enumerate() {
        writeln!(
            file,
            "{:.3}\t0.0\t{bias:.1}\t{:.6}\t{:.6}",
            step as f64 * 0.002,
            bias * 1e-3,
            bias * 2e-3,
        )
        .unwrap();
    }
}

fn write_experiment(dir: &Path) -> PathBuf {
    let descriptor = dir.join("sample.txt");
    std::fs::write(&descriptor, DESCRIPTOR).unwrap();
    write_int(&dir.join("sample_TopoFwd.int"), 4, 4);
    write_int(&dir.join("sample_TopoBwd.int"), 4, 4);
    write_cits_dat(&dir.join("sample_Lia1R_Matrix.dat"));
    write_sts_dat(&dir.join("sample_It_to_PC.dat"));
    descriptor
}

fn open_session() -> (tempfile::TempDir, Session) {
    let dir = tempfile::tempdir().unwrap();
    let descriptor = write_experiment(dir.path());
    let session = Session::open(descriptor).unwrap();
    (dir, session)
}

// ---------------------------------------------------------------------------
// Construction and key resolution
// ---------------------------------------------------------------------------

#[test]
fn construction_fails_for_missing_or_wrongly_typed_descriptor() {
    match Session::open("/no/such/experiment.txt") {
        Err(SpmError::NotFound(_)) => {}
        Err(other) => panic!("expected NotFound, got {other}"),
        Ok(_) => panic!("expected NotFound, got a session"),
    }

    let dir = tempfile::tempdir().unwrap();
    let not_txt = dir.path().join("experiment.dat");
    std::fs::write(&not_txt, "x").unwrap();
    match Session::open(&not_txt) {
        Err(SpmError::InvalidFormat(_)) => {}
        Err(other) => panic!("expected InvalidFormat, got {other}"),
        Ok(_) => panic!("expected InvalidFormat, got a session"),
    }
}

#[test]
fn aliases_resolve_case_insensitively() {
    let (_dir, session) = open_session();

    for query in ["TOPOFWD", "topofwd", "TopoFwd"] {
        let (full_key, kind) = session.resolve(query).unwrap();
        assert_eq!(full_key, "sample_TopoFwd");
        assert_eq!(kind, DataKind::Topography);
    }

    let (full_key, kind) = session.resolve("descriptor").unwrap();
    assert_eq!(full_key, "sample");
    assert_eq!(kind, DataKind::Descriptor);

    let (full_key, kind) = session.resolve("lia1r_matrix").unwrap();
    assert_eq!(full_key, "sample_Lia1R_Matrix");
    assert_eq!(kind, DataKind::Cits);

    let (full_key, kind) = session.resolve("it_to_pc").unwrap();
    assert_eq!(full_key, "sample_It_to_PC");
    assert_eq!(kind, DataKind::Sts);

    let err = session.resolve("nonexistent").unwrap_err();
    assert!(err.to_string().contains("sample_TopoFwd"), "lists known keys");
}

#[test]
fn session_exposes_identity_and_records() {
    let (dir, mut session) = open_session();
    assert_eq!(session.experiment_name(), "sample");
    assert_eq!(session.descriptor_key(), "sample");
    assert_eq!(
        session.descriptor_path(),
        dir.path().join("sample.txt").as_path()
    );
    assert!(session.has_key("TopoBwd"));
    assert!(!session.has_key("ghost"));
    assert_eq!(session.keys_of_kind(DataKind::Topography).len(), 2);

    let mut file = session.file("topofwd").unwrap();
    let record = file.record().unwrap();
    assert_eq!(record.kind, DataKind::Topography);
    assert_eq!(record.size, 64, "4x4 pixels of 4 bytes each");
    assert_eq!(record.signal_type.as_deref(), Some("Topo"));

    let metadata = file.metadata();
    assert_eq!(metadata.get("type").map(String::as_str), Some("topography"));
}

#[test]
fn cits_metadata_reports_direction_and_grid() {
    let (_dir, mut session) = open_session();
    let metadata = session.file("lia1r_matrix").unwrap().metadata();
    assert_eq!(
        metadata.get("scan_direction").map(String::as_str),
        Some("upward")
    );
    assert_eq!(metadata.get("grid").map(String::as_str), Some("2x2"));
}

#[test]
fn lookup_never_triggers_a_decode() {
    let (_dir, session) = open_session();
    session.resolve("topofwd").unwrap();
    let diag = session.diagnostics();
    assert_eq!(diag.topography.miss_count, 0);
    assert_eq!(diag.topography.load_count, 0);
}

// ---------------------------------------------------------------------------
// Lazy loading and the cache
// ---------------------------------------------------------------------------

#[test]
fn repeated_load_returns_identical_cached_payload() {
    let (_dir, mut session) = open_session();

    let first = session.file("topofwd").unwrap().topography().unwrap();
    let second = session.file("topofwd").unwrap().topography().unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    let diag = session.diagnostics();
    assert_eq!(diag.topography.hit_count, 1);
    assert_eq!(diag.topography.miss_count, 1);
    assert_eq!(diag.topography.load_count, 1);
}

#[test]
fn topography_decode_applies_scale_and_descriptor_geometry() {
    let (_dir, mut session) = open_session();
    let topo = session.file("TopoFwd").unwrap().topography().unwrap();

    assert_eq!(topo.shape(), (4, 4));
    assert_eq!(topo.x_range, 100.0);
    assert_eq!(topo.pixel_scale_x(), 25.0);
    assert_eq!(topo.data_scale, 0.5);
    // File stores 0..16 top-down; decode flips rows and scales by 0.5.
    assert_eq!(topo.image[[3, 0]], 0.0);
    assert_eq!(topo.image[[0, 0]], 6.0);
    assert_eq!(topo.image[[0, 3]], 7.5);
}

#[test]
fn lru_eviction_with_capacity_one() {
    let dir = tempfile::tempdir().unwrap();
    let descriptor = write_experiment(dir.path());
    let mut session = Session::open_with(
        descriptor,
        SessionConfig {
            cache_capacity: 1,
            ..SessionConfig::default()
        },
    )
    .unwrap();

    session.file("topofwd").unwrap().topography().unwrap();
    assert!(session.file("topofwd").unwrap().is_loaded());

    session.file("topobwd").unwrap().topography().unwrap();
    assert!(!session.file("topofwd").unwrap().is_loaded(), "evicted");
    assert!(session.file("topobwd").unwrap().is_loaded());
}

#[test]
fn unload_and_reload_cycle() {
    let (_dir, mut session) = open_session();
    let mut file = session.file("topofwd").unwrap();
    file.topography().unwrap();
    assert!(file.is_loaded());

    assert!(file.unload());
    assert!(!file.is_loaded());

    let outcome = file.reload();
    assert!(outcome.success);
    assert!(file.is_loaded());
}

#[test]
fn batch_load_survives_bad_keys() {
    let (_dir, mut session) = open_session();
    let outcomes = session.load_many(["topofwd", "ghost", "it_to_pc"]);
    assert_eq!(outcomes.len(), 3);
    assert!(outcomes[0].success);
    assert!(!outcomes[1].success);
    assert!(outcomes[2].success);
}

#[test]
fn wrong_kind_access_is_unsupported() {
    let (_dir, mut session) = open_session();
    let mut file = session.file("topofwd").unwrap();
    match file.cits() {
        Err(SpmError::Unsupported(_)) => {}
        other => panic!("expected Unsupported, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Failure propagation
// ---------------------------------------------------------------------------

#[test]
fn analyzer_on_failed_load_propagates_recorded_errors() {
    let dir = tempfile::tempdir().unwrap();
    let descriptor = write_experiment(dir.path());
    // Corrupt the STS file: structurally too short to decode.
    std::fs::write(dir.path().join("sample_It_to_PC.dat"), "time\tdistance\n").unwrap();

    let mut session = Session::open(descriptor).unwrap();
    let mut file = session.file("it_to_pc").unwrap();

    let outcome = file.load();
    assert!(!outcome.success, "decode must fail");

    match file.sts_analyzer() {
        Err(SpmError::ParseFailure(message)) => {
            assert!(message.contains("sample_It_to_PC"));
        }
        Err(other) => panic!("expected ParseFailure, got {other}"),
        Ok(_) => panic!("expected ParseFailure, got an analyzer"),
    }
}

#[test]
fn failed_decode_is_retried_after_fixing_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let descriptor = write_experiment(dir.path());
    let sts_path = dir.path().join("sample_It_to_PC.dat");
    std::fs::write(&sts_path, "broken").unwrap();

    let mut session = Session::open(descriptor).unwrap();
    assert!(!session.load("it_to_pc").success);

    write_sts_dat(&sts_path);
    assert!(session.load("it_to_pc").success, "failures are not cached");
}

// ---------------------------------------------------------------------------
// Spectroscopy pipelines
// ---------------------------------------------------------------------------

#[test]
fn cits_cube_is_oriented_with_matching_bias_axis() {
    let (_dir, mut session) = open_session();
    let cits = session.file("lia1r_matrix").unwrap().cits().unwrap();

    assert_eq!(cits.grid_size, [2, 2]);
    assert_eq!(cits.data.dim(), (5, 2, 2));
    assert_eq!(cits.n_bias_points(), 5);
    assert_eq!(cits.scan_direction, SlowScanDirection::Upward);
    // Upward scan: no row reversal. Point order (0,0) (50,0) (0,50) (50,50).
    assert_eq!(cits.data[[2, 0, 0]], 20.0);
    assert_eq!(cits.data[[2, 1, 1]], 23.0);
}

#[test]
fn cits_bias_pattern_is_a_single_raster_cycle() {
    let (_dir, mut session) = open_session();
    let mut file = session.file("lia1r_matrix").unwrap();
    let analyzer = file.cits_analyzer().unwrap();

    let pattern = analyzer.bias_pattern();
    assert_eq!(pattern.pattern_type, "raster_1");
    assert_eq!(pattern.cycles, 1);
    assert_eq!(pattern.forward.len(), 1);
    assert_eq!(pattern.backward.len(), 1);
    assert_eq!((pattern.forward[0].start, pattern.forward[0].end), (0, 2));
    assert_eq!((pattern.backward[0].start, pattern.backward[0].end), (2, 4));
}

#[test]
fn sts_invariants_hold_after_decode() {
    let (_dir, mut session) = open_session();
    let sts = session.file("it_to_pc").unwrap().sts().unwrap();
    assert_eq!(sts.n_points(), 2);
    assert_eq!(sts.x_coords.len(), sts.data.ncols());
    assert_eq!(sts.bias_values.len(), sts.data.nrows());
}

// ---------------------------------------------------------------------------
// Analyzer operations end to end
// ---------------------------------------------------------------------------

#[test]
fn flattened_topography_has_zero_row_means() {
    let (_dir, mut session) = open_session();
    let mut file = session.file("topofwd").unwrap();
    let analyzer = file.topo_analyzer().unwrap();

    use rusty_spm::analysis::flatten::FlattenMethod;
    analyzer.flatten(FlattenMethod::LinewiseMean);
    for row in analyzer.current_image().rows() {
        assert!(row.mean().unwrap().abs() < 1e-9);
    }
}

#[test]
fn rasterized_profile_matches_natural_step_count() {
    let (_dir, mut session) = open_session();
    let mut file = session.file("topofwd").unwrap();
    let analyzer = file.topo_analyzer().unwrap();

    let profile = analyzer.line_profile((0, 0), (3, 3), ProfileMethod::Rasterize);
    // Diagonal of a 4x4 grid: 4 pixels, strictly increasing distance.
    assert_eq!(profile.n_points, 4);
    for pair in profile.distances.windows(2) {
        assert!(pair[1] > pair[0]);
    }
}

#[test]
fn analyzer_is_memoized_and_keeps_state_across_accesses() {
    let (_dir, mut session) = open_session();

    {
        let mut file = session.file("topofwd").unwrap();
        let analyzer = file.topo_analyzer().unwrap();
        use rusty_spm::analysis::flatten::FlattenMethod;
        analyzer.flatten(FlattenMethod::LinewiseMean);
        assert!(analyzer.is_processed());
    }
    // A new accessor reaches the same memoized analyzer instance.
    let mut file = session.file("topofwd").unwrap();
    assert!(file.topo_analyzer().unwrap().is_processed());
}

#[test]
fn descriptor_analyzer_summarizes_the_experiment() {
    let (_dir, mut session) = open_session();
    let mut file = session.file("descriptor").unwrap();
    let summary = file.descriptor_analyzer().unwrap().summary();

    assert_eq!(summary.n_topo_files, 2);
    assert_eq!(summary.n_spec_files, 2);
    assert_eq!(summary.n_cits, 1);
    assert_eq!(summary.n_sts, 1);
    assert_eq!(summary.experiment_type, "topography_with_cits");
    assert_eq!(summary.scan.x_pixel, 4);
}

// ---------------------------------------------------------------------------
// Session-wide reporting
// ---------------------------------------------------------------------------

#[test]
fn summary_counts_available_and_loaded_files() {
    let (_dir, mut session) = open_session();
    session.load("topofwd");
    session.load("lia1r_matrix");

    let summary = session.summary();
    assert_eq!(summary.available.topography, 2);
    assert_eq!(summary.available.cits, 1);
    assert_eq!(summary.available.sts, 1);
    assert_eq!(summary.loaded.topography, 1);
    assert_eq!(summary.loaded.cits, 1);
    assert!(summary.scan_parameters.is_some());

    // The summary serializes (frontends consume it as JSON).
    let json = serde_json::to_string(&summary).unwrap();
    assert!(json.contains("\"experiment_name\""));
}

#[test]
fn unload_all_resets_every_manager() {
    let (_dir, mut session) = open_session();
    session.load_many(["topofwd", "topobwd", "lia1r_matrix", "it_to_pc"]);
    assert_eq!(session.summary().loaded.total, 5, "4 datasets + descriptor");

    let unloaded = session.unload_all(false);
    assert_eq!(unloaded, 4, "descriptor excluded");
    assert_eq!(session.summary().loaded.descriptor, 1);

    session.load("topofwd");
    session.clear_caches();
    assert_eq!(session.summary().loaded.total, 0);
}

#[test]
fn find_files_by_signal_and_direction() {
    use rusty_spm::data::model::ScanDirection;
    let (_dir, session) = open_session();

    let topo_files = session.find_by_signal_type("Topo");
    assert_eq!(topo_files.len(), 2);

    let forward = session.find_by_direction(ScanDirection::Forward);
    assert_eq!(forward, vec!["sample_TopoFwd".to_string()]);
}
