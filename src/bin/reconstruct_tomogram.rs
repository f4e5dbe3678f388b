use std::ops::Deref;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use display_error_chain::ErrorChainExt;
use tracing::info;

use tomo_recon::logging;
use tomo_recon::{reconstruct, write_volume, Interpolation, ReconConfig, TomogramSet, Weighting};

/// Reconstruct one tomogram of a tomogram set by weighted backprojection.
///
/// The set is a JSON file listing, per tomogram, the image stack, the
/// original tomogram size, the optics and one projection matrix plus CTF
/// record per frame. The volume is written as a float32 MRC.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Tomogram set (JSON)
    #[arg(long)]
    tomograms: PathBuf,

    /// Index of the tomogram in the set
    #[arg(long, default_value_t = 0)]
    tomo_index: usize,

    /// Divide the volume by the backprojected point-spread function
    #[arg(long)]
    weight_3d: bool,

    /// Weight every frame in 2D before backprojection
    #[arg(long)]
    weight_2d: bool,

    /// Signal-to-noise ratio assumed by the 3D weighting
    #[arg(long, default_value_t = 10.0)]
    snr: f64,

    /// Skip CTF modulation
    #[arg(long)]
    no_ctf: bool,

    /// Subtract each frame's mean first
    #[arg(long)]
    zero_dc: bool,

    /// Taper distance at the frame edges, in binned pixels
    #[arg(long, default_value_t = 0.0)]
    taper: f64,

    /// Thickness in original pixels (default: tomogram depth)
    #[arg(long, allow_negative_numbers = true)]
    thickness: Option<f64>,

    /// World x of the first voxel
    #[arg(long, default_value_t = 1.0, allow_negative_numbers = true)]
    x0: f64,

    /// World y of the first voxel
    #[arg(long, default_value_t = 1.0, allow_negative_numbers = true)]
    y0: f64,

    /// World z of the first voxel
    #[arg(long, default_value_t = 1.0, allow_negative_numbers = true)]
    z0: f64,

    /// Output width in binned pixels (default: tomogram width / bin)
    #[arg(long)]
    width: Option<usize>,

    /// Output height in binned pixels (default: tomogram height / bin)
    #[arg(long)]
    height: Option<usize>,

    /// Binning of the output volume
    #[arg(long = "bin", default_value_t = 8.0)]
    binning: f64,

    /// Binning of the stored image stack
    #[arg(long = "stack-bin", default_value_t = 1.0)]
    stack_binning: f64,

    /// Number of worker threads
    #[arg(short = 'j', long, default_value_t = 1)]
    threads: usize,

    /// Image sampling used during backprojection
    #[arg(long, value_enum, default_value_t = Sampling::Linear)]
    interpolation: Sampling,

    /// Log filter, e.g. `tomo_recon=debug`
    #[arg(long, default_value = logging::DEFAULT_FILTER)]
    log: String,

    /// Output volume (MRC)
    #[arg(long)]
    output: PathBuf,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Sampling {
    Nearest,
    Linear,
}

impl From<Sampling> for Interpolation {
    fn from(s: Sampling) -> Self {
        match s {
            Sampling::Nearest => Interpolation::Nearest,
            Sampling::Linear => Interpolation::Linear,
        }
    }
}

impl Args {
    fn config(&self) -> Result<ReconConfig> {
        let config = ReconConfig {
            weighting: Weighting::from_flags(self.weight_3d, self.weight_2d)?,
            snr: self.snr,
            apply_ctf: !self.no_ctf,
            zero_dc: self.zero_dc,
            taper: self.taper,
            // negative thickness means "from the metadata"
            thickness: self.thickness.filter(|&t| t >= 0.0),
            origin: [self.x0, self.y0, self.z0],
            width: self.width.filter(|&w| w > 0),
            height: self.height.filter(|&h| h > 0),
            binning: self.binning,
            stack_binning: self.stack_binning,
            threads: self.threads,
            interpolation: self.interpolation.into(),
        };
        config.validate()?;
        Ok(config)
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("ERROR: {}", e.deref().chain());
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    // settings are checked before anything is read or logged
    let config = args.config().context("Invalid arguments")?;

    logging::init(&args.log)?;

    let set = TomogramSet::load(&args.tomograms)
        .context(format!("Failed to load tomogram set {:?}", args.tomograms))?;
    let tomogram = set
        .load_tomogram(args.tomo_index)
        .context(format!("Failed to load tomogram {}", args.tomo_index))?;

    let out = reconstruct(tomogram, &config).context("Reconstruction failed")?;

    info!(output = %args.output.display(), sampling_rate = out.sampling_rate, "writing output");
    write_volume(&args.output, &out.volume, out.sampling_rate)
        .context(format!("Failed to write output {:?}", args.output))?;

    Ok(())
}
