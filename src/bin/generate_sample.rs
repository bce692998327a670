use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use rusty_spm::session::Session;

const X_PIXELS: usize = 64;
const Y_PIXELS: usize = 64;
const SCAN_RANGE: f64 = 100.0;
const HEIGHT_SCALE: f64 = 1.0e-3;
const CITS_GRID: usize = 8;

fn gaussian_2d(x: f64, y: f64, cx: f64, cy: f64, sigma: f64, amplitude: f64) -> f64 {
    let d2 = (x - cx).powi(2) + (y - cy).powi(2);
    amplitude * (-d2 / (2.0 * sigma * sigma)).exp()
}

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5))
            .rotate_left(7)
            .wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Box-Muller transform for normal distribution
    fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.next_f64().max(1e-15);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std_dev * z
    }
}

/// Synthetic surface: a few islands on a tilted background, in nm.
fn surface_height(x: f64, y: f64, rng: &mut SimpleRng) -> f64 {
    let islands = [
        (30.0, 30.0, 12.0, 2.5),
        (70.0, 55.0, 9.0, 1.8),
        (45.0, 80.0, 15.0, 3.2),
    ];
    let bumps: f64 = islands
        .iter()
        .map(|&(cx, cy, sigma, amp)| gaussian_2d(x, y, cx, cy, sigma, amp))
        .sum();
    let tilt = 0.01 * x - 0.005 * y;
    bumps + tilt + rng.gauss(0.0, 0.02)
}

fn write_int_file(path: &Path, rng: &mut SimpleRng, mirrored: bool) -> Result<()> {
    let mut file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let step = SCAN_RANGE / X_PIXELS as f64;
    // Rows are stored top-down; the decoder flips them back.
    for row in (0..Y_PIXELS).rev() {
        for col in 0..X_PIXELS {
            let x = if mirrored {
                SCAN_RANGE - col as f64 * step
            } else {
                col as f64 * step
            };
            let y = row as f64 * step;
            let height = surface_height(x, y, rng);
            let raw = (height / HEIGHT_SCALE).round() as i32;
            file.write_all(&raw.to_le_bytes())?;
        }
    }
    Ok(())
}

/// Synthetic tunneling current: slightly nonlinear, gap-like around zero.
fn tunneling_current(bias_mv: f64, x: f64, y: f64, rng: &mut SimpleRng) -> f64 {
    let v = bias_mv / 1000.0;
    let gap = 1.0 + 0.5 * gaussian_2d(x, y, 50.0, 50.0, 20.0, 1.0);
    let current = v.signum() * (v.abs().powf(1.5) / gap) * 1e-9;
    current + rng.gauss(0.0, 1e-12)
}

fn write_cits_dat(path: &Path, rng: &mut SimpleRng) -> Result<()> {
    let mut file = File::create(path).with_context(|| format!("creating {}", path.display()))?;

    let step = SCAN_RANGE / CITS_GRID as f64;
    let coords: Vec<(f64, f64)> = (0..CITS_GRID * CITS_GRID)
        .map(|i| {
            let col = i % CITS_GRID;
            let row = i / CITS_GRID;
            (col as f64 * step, row as f64 * step)
        })
        .collect();

    // Header rows: labels/units plus per-point x/y coordinates.
    let mut line1 = vec!["time".to_string(), "distance".to_string(), "bias".to_string()];
    let mut line2 = vec!["s".to_string(), "nm".to_string(), "mV".to_string()];
    for &(x, y) in &coords {
        line1.push(format!("{x:.3}"));
        line2.push(format!("{y:.3}"));
    }
    writeln!(file, "{}", line1.join("\t"))?;
    writeln!(file, "{}", line2.join("\t"))?;

    // Raster bias sweep: 0 → +100 → 0 mV.
    let sweep: Vec<f64> = (0..=10)
        .map(|i| i as f64 * 10.0)
        .chain((0..10).rev().map(|i| i as f64 * 10.0))
        .collect();

    for (step_no, &bias) in sweep.iter().enumerate() {
        let mut row = vec![
            format!("{:.4}", step_no as f64 * 0.002),
            format!("{:.4}", 0.0),
            format!("{bias:.1}"),
        ];
        for &(x, y) in &coords {
            row.push(format!("{:.6e}", tunneling_current(bias, x, y, rng)));
        }
        writeln!(file, "{}", row.join("\t"))?;
    }
    Ok(())
}

fn write_sts_dat(path: &Path, rng: &mut SimpleRng) -> Result<()> {
    let mut file = File::create(path).with_context(|| format!("creating {}", path.display()))?;

    let points = [(25.0, 25.0), (60.0, 70.0)];
    let mut line1 = vec!["time".to_string(), "distance".to_string(), "bias".to_string()];
    let mut line2 = vec!["s".to_string(), "nm".to_string(), "mV".to_string()];
    for &(x, y) in &points {
        line1.push(format!("{x:.3}"));
        line2.push(format!("{y:.3}"));
    }
    writeln!(file, "{}", line1.join("\t"))?;
    writeln!(file, "{}", line2.join("\t"))?;

    for step_no in 0..21 {
        let bias = -100.0 + step_no as f64 * 10.0;
        let mut row = vec![
            format!("{:.4}", step_no as f64 * 0.002),
            format!("{:.4}", 0.0),
            format!("{bias:.1}"),
        ];
        for &(x, y) in &points {
            row.push(format!("{:.6e}", tunneling_current(bias, x, y, rng)));
        }
        writeln!(file, "{}", row.join("\t"))?;
    }
    Ok(())
}

fn write_descriptor(path: &Path) -> Result<()> {
    let mut file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    write!(
        file,
        "Version : 1.0\n\
         UserName : sample\n\
         xPixel : {X_PIXELS}\n\
         yPixel : {Y_PIXELS}\n\
         XScanRange : {SCAN_RANGE}\n\
         YScanRange : {SCAN_RANGE}\n\
         XPhysUnit : nm\n\
         YPhysUnit : nm\n\
         Angle : 0\n\
         xCenter : 0\n\
         yCenter : 0\n\
         \n\
         FileDescBegin\n\
         FileName : sample_TopoFwd.int\n\
         Caption : Topo Forward\n\
         Scale : {HEIGHT_SCALE}\n\
         PhysUnit : nm\n\
         Offset : 0\n\
         FileDescEnd\n\
         \n\
         FileDescBegin\n\
         FileName : sample_TopoBwd.int\n\
         Caption : Topo Backward\n\
         Scale : {HEIGHT_SCALE}\n\
         PhysUnit : nm\n\
         Offset : 0\n\
         FileDescEnd\n\
         \n\
         FileDescBegin\n\
         FileName : sample_Lia1R_Matrix.dat\n\
         Caption : X(U)-Lia1R({CITS_GRID}/{CITS_GRID})\n\
         HeaderCols : 3\n\
         HeaderRows : 2\n\
         Delays 1/Aqu/3/4/dead : 0.002/0.0069888/1.5E-5/1.5E-5/0\n\
         Slewrate : Infinity/Infinity\n\
         Average : 1\n\
         FileDescEnd\n\
         \n\
         FileDescBegin\n\
         FileName : sample_It_to_PC.dat\n\
         Caption : X(U)-It_to_PC(2)\n\
         HeaderCols : 3\n\
         HeaderRows : 2\n\
         Average : 1\n\
         FileDescEnd\n"
    )?;
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();

    let out_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("sample_experiment"));
    std::fs::create_dir_all(&out_dir)
        .with_context(|| format!("creating {}", out_dir.display()))?;

    let mut rng = SimpleRng::new(42);

    let descriptor = out_dir.join("sample.txt");
    write_descriptor(&descriptor)?;
    write_int_file(&out_dir.join("sample_TopoFwd.int"), &mut rng, false)?;
    write_int_file(&out_dir.join("sample_TopoBwd.int"), &mut rng, true)?;
    write_cits_dat(&out_dir.join("sample_Lia1R_Matrix.dat"), &mut rng)?;
    write_sts_dat(&out_dir.join("sample_It_to_PC.dat"), &mut rng)?;

    // Open the freshly written experiment and show what a frontend would see.
    let mut session = Session::open(&descriptor).context("opening generated experiment")?;
    for key in ["TopoFwd", "Lia1R_Matrix", "It_to_PC"] {
        let outcome = session.load(key);
        println!(
            "load {key}: {}",
            if outcome.success { "ok" } else { "FAILED" }
        );
    }

    let summary = session.summary();
    println!("{}", serde_json::to_string_pretty(&summary)?);
    println!("Wrote sample experiment to {}", out_dir.display());
    Ok(())
}
