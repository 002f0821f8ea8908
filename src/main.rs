use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tomo_align::alignment::{apply_record, AlignmentOrchestrator, ProgressReporter};
use tomo_align::config::{load_config_or_default, Config};
use tomo_align::data::synthetic::{add_gaussian_noise, blob_image, tilt_range, translated_series, RodPhantom};
use tomo_align::data::{load_angles, load_record, load_stack, save_record, save_stack};
use tomo_align::logging::{init_logging, new_correlation_id};
use tomo_align::tilt::{estimate_tilt_com, estimate_tilt_maximage, tilt_com, tilt_maximage, TiltMethod};
use tomo_align::{ImageStack, ShiftMethod, ShiftTable};

#[derive(Parser)]
#[command(name = "tomoalign")]
#[command(about = "Tilt-series alignment and tilt-axis estimation for electron tomography")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML or JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Estimate and apply frame-to-frame shifts
    Shifts {
        /// Directory of 16-bit PNG frames, in tilt order
        #[arg(short, long)]
        input: PathBuf,

        /// Tilt angles, one per line
        #[arg(short, long)]
        angles: Option<PathBuf>,

        /// PC, ECC, COM or StackReg (overrides the config)
        #[arg(short, long)]
        method: Option<String>,

        /// Anchor frame (overrides the config)
        #[arg(short, long)]
        pivot: Option<usize>,

        /// Output directory for aligned frames and the record
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Estimate the tilt axis, then level, center and transpose the frames
    Tilt {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        angles: PathBuf,

        /// maximage or com (overrides the config)
        #[arg(short, long)]
        method: Option<String>,

        /// Sample columns for com, comma-separated
        #[arg(long, value_delimiter = ',')]
        positions: Option<Vec<usize>>,

        /// Re-measure until the residual correction is small (com only)
        #[arg(long)]
        iterative: bool,

        #[arg(short, long)]
        output: PathBuf,
    },

    /// Replay a stored alignment record onto a matching stack
    Apply {
        /// Record JSON written by `shifts` or `tilt`
        #[arg(short, long)]
        record: PathBuf,

        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,
    },

    /// Run the pipeline on a synthetic tilt series and print a report
    Demo {
        #[arg(short = 'n', long, default_value = "9")]
        frames: usize,

        #[arg(short, long, default_value = "96")]
        size: usize,

        #[arg(long, default_value = "7")]
        seed: u64,

        /// Write the generated and aligned frames here
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_config_or_default(cli.config.as_deref().and_then(Path::to_str));
    match cli.verbose {
        0 => {}
        1 => config.logging.global_level = "debug".to_string(),
        _ => config.logging.global_level = "trace".to_string(),
    }
    let _guard = init_logging(&config.logging)?;
    new_correlation_id();

    match cli.command {
        Commands::Shifts { input, angles, method, pivot, output } => {
            handle_shifts(&config, &input, angles.as_deref(), method, pivot, &output)?;
        }
        Commands::Tilt { input, angles, method, positions, iterative, output } => {
            handle_tilt(&config, &input, &angles, method, positions, iterative, &output)?;
        }
        Commands::Apply { record, input, output } => {
            handle_apply(&record, &input, &output)?;
        }
        Commands::Demo { frames, size, seed, output } => {
            handle_demo(&config, frames, size, seed, output.as_deref())?;
        }
    }

    Ok(())
}

fn load_input(input: &Path, angles: Option<&Path>) -> anyhow::Result<ImageStack> {
    let angles = angles.map(load_angles).transpose()?;
    let stack = load_stack(input, angles)?;
    let (rows, cols) = stack.frame_shape();
    println!("Loaded {} frames of {}x{} from {}", stack.frame_count(), cols, rows, input.display());
    Ok(stack)
}

fn write_output(stack: &ImageStack, output: &Path, prefix: &str) -> anyhow::Result<()> {
    let paths = save_stack(output, stack, prefix, false)?;
    if let Some(record) = stack.alignment() {
        save_record(output.join("alignment.json"), record)?;
    }
    println!("Wrote {} frames and alignment.json to {}", paths.len(), output.display());
    Ok(())
}

fn handle_shifts(
    config: &Config,
    input: &Path,
    angles: Option<&Path>,
    method: Option<String>,
    pivot: Option<usize>,
    output: &Path,
) -> anyhow::Result<()> {
    let stack = load_input(input, angles)?;
    let method: ShiftMethod = match method {
        Some(name) => name.parse()?,
        None => config.shifts.method,
    };
    let mut options = config.shifts.align_options();
    if pivot.is_some() {
        options.pivot = pivot;
    }

    let mut progress = ProgressReporter::new(|u| {
        tracing::debug!(stage = u.stage, completed = u.completed, total = u.total, "progress");
    });
    let (aligned, report) = AlignmentOrchestrator::new(options).align(&stack, method, &mut progress)?;

    println!("Method:    {}", report.method);
    match report.pivot {
        Some(pivot) => println!("Pivot:     {}", pivot),
        None => println!("Pivot:     n/a"),
    }
    println!("Max shift: {:.2} px", report.max_shift);
    println!("Elapsed:   {:.1} ms", report.elapsed_ms);

    write_output(&aligned, output, "aligned")
}

fn handle_tilt(
    config: &Config,
    input: &Path,
    angles: &Path,
    method: Option<String>,
    positions: Option<Vec<usize>>,
    iterative: bool,
    output: &Path,
) -> anyhow::Result<()> {
    let stack = load_input(input, Some(angles))?;
    let method: TiltMethod = match method {
        Some(name) => name.parse()?,
        None => config.tilt.method,
    };

    let aligned = match method {
        TiltMethod::MaxImage => tilt_maximage(&stack, &config.tilt.maximage, &mut ProgressReporter::silent())?,
        TiltMethod::CenterOfMass => {
            let mut com = config.tilt.com.clone();
            if positions.is_some() {
                com.positions = positions;
            }
            com.iterative |= iterative;
            tilt_com(&stack, &com)?
        }
        TiltMethod::Minimize => {
            bail!("minimize needs a reconstruction backend and is only available through the library")
        }
    };

    if let Some(record) = aligned.alignment() {
        println!("Rotation: {:.2} deg", record.rotation);
        println!("Shift:    ({:.2}, {:.2}) px", record.x_shift, record.y_shift);
    }
    write_output(&aligned, output, "tilt")
}

fn handle_apply(record: &Path, input: &Path, output: &Path) -> anyhow::Result<()> {
    let record = load_record(record)?;
    let stack = load_input(input, None)?;
    let replayed = apply_record(&record, &stack).context("cannot replay alignment record")?;
    write_output(&replayed, output, "replayed")
}

fn handle_demo(config: &Config, frames: usize, size: usize, seed: u64, output: Option<&Path>) -> anyhow::Result<()> {
    if frames < 3 || size < 48 {
        bail!("demo needs at least 3 frames of at least 48x48");
    }
    let angles = tilt_range(-60.0, 60.0, frames);

    // shift recovery on a translated blob series
    let base = blob_image(size, size, 10, seed);
    let true_shifts: Vec<(f64, f64)> = (0..frames)
        .map(|i| (((i * 7 + seed as usize) % 9) as f64 - 4.0, ((i * 5 + 3) % 7) as f64 - 3.0))
        .collect();
    let series = translated_series(&base, &true_shifts, Some(angles.clone()))?;
    let noisy = add_gaussian_noise(&series, 0.01, seed)?;
    let (aligned, report) = AlignmentOrchestrator::new(config.shifts.align_options()).align(
        &noisy,
        config.shifts.method,
        &mut ProgressReporter::silent(),
    )?;
    let record = aligned.alignment().context("aligned stack carries no record")?;
    let table: ShiftTable = match (record.shifts(), record.transforms()) {
        (Some(shifts), _) => shifts.clone(),
        (None, Some(transforms)) => transforms.iter().map(|t| t.translation_part()).collect::<Vec<_>>().into(),
        (None, None) => bail!("aligned stack carries no per-frame correction"),
    };

    let pivot = report.pivot.unwrap_or(0);
    let (px, py) = true_shifts[pivot];
    let worst = true_shifts
        .iter()
        .enumerate()
        .map(|(i, &(dx, dy))| {
            // the recovered correction undoes the displacement relative to the pivot
            let (ex, ey) = (px - dx, py - dy);
            (table[i].0 - ex).hypot(table[i].1 - ey)
        })
        .fold(0.0, f64::max);
    println!("Shift alignment ({}), pivot {}", report.method, pivot);
    println!("  worst shift error: {:.3} px over {} frames", worst, frames);

    // tilt axis on a rod phantom with known geometry
    let (axis_rotation, axis_offset) = (2.0, 3.0);
    let phantom = RodPhantom::random(8, size as f64 / 8.0, seed).project(
        (size, size),
        &angles,
        axis_rotation,
        axis_offset,
    )?;
    let maximage = estimate_tilt_maximage(&phantom, &config.tilt.maximage, &mut ProgressReporter::silent())?;
    let com = estimate_tilt_com(&phantom, &config.tilt.com)?;
    println!("Tilt axis drawn at {:.2} deg, offset {:.2} px", axis_rotation, axis_offset);
    println!("  maximage: rotation {:.2} deg", maximage.rotation);
    println!(
        "  com:      rotation {:.2} deg, shift {:.2} px ({} measurements)",
        com.estimate.rotation, com.estimate.y_shift, com.iterations
    );

    if let Some(output) = output {
        save_stack(output.join("series"), &noisy, "frame", true)?;
        save_stack(output.join("aligned"), &aligned, "frame", true)?;
        let leveled = tilt_com(&phantom, &config.tilt.com)?;
        save_stack(output.join("phantom"), &phantom, "frame", true)?;
        save_stack(output.join("leveled"), &leveled, "frame", true)?;
        if let Some(record) = leveled.alignment() {
            save_record(output.join("leveled").join("alignment.json"), record)?;
        }
        println!("Frames written under {}", output.display());
    }
    Ok(())
}
