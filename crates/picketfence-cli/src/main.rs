//! picketfence CLI: command-line interface for picket-fence MLC analysis.

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand, ValueEnum};
use picketfence::synthetic::SyntheticFence;
use picketfence::{
    AnalysisConfig, CombineMode, EpidImage, MlcArrangement, MlcPreset, Orientation, PfResult,
    PicketFence, PixelSpacing,
};

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "picketfence")]
#[command(about = "Measure MLC leaf positions on picket-fence EPID images")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze one acquisition (several frames are superimposed).
    Analyze(CliAnalyzeArgs),

    /// Render and analyze a synthetic picket fence.
    Demo(CliDemoArgs),

    /// Print leaf geometry of a preset (or list every preset).
    MlcInfo {
        /// Preset name, e.g. `millennium` or `hd-millennium`.
        #[arg(long)]
        mlc: Option<String>,
    },
}

#[derive(Debug, Clone, Args)]
struct CliAnalyzeArgs {
    /// Input image; repeat for multi-frame acquisitions.
    #[arg(long = "image", required = true)]
    images: Vec<PathBuf>,

    /// Pixel size at the analysis plane (mm).
    #[arg(long, conflicts_with = "dpmm")]
    pixel_size_mm: Option<f64>,

    /// Resolution in dots per mm at the analysis plane.
    #[arg(long)]
    dpmm: Option<f64>,

    /// JSON analysis config; flags below override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// MLC preset name.
    #[arg(long, conflicts_with = "mlc_json")]
    mlc: Option<String>,

    /// Custom MLC arrangement (`picketfence.mlc.v1` JSON).
    #[arg(long)]
    mlc_json: Option<PathBuf>,

    /// Tolerance (mm).
    #[arg(long)]
    tolerance: Option<f64>,

    /// Action tolerance (mm); must not exceed the tolerance.
    #[arg(long)]
    action_tolerance: Option<f64>,

    /// Expected number of pickets.
    #[arg(long)]
    num_pickets: Option<usize>,

    /// Panel sag along leaf travel (mm).
    #[arg(long)]
    sag_mm: Option<f64>,

    /// Edge-leaf inclusion factor.
    #[arg(long)]
    edge_threshold: Option<f64>,

    /// Median filter size applied unconditionally.
    #[arg(long)]
    filter_size: Option<usize>,

    /// Margin cropped from each edge (mm).
    #[arg(long)]
    crop_mm: Option<f64>,

    /// Force image inversion.
    #[arg(long, conflicts_with = "no_invert")]
    invert: bool,

    /// Disable automatic inversion.
    #[arg(long)]
    no_invert: bool,

    /// Skip orientation detection.
    #[arg(long, value_enum)]
    orientation: Option<OrientationArg>,

    /// Frame superposition rule.
    #[arg(long, value_enum)]
    combine: Option<CombineArg>,

    /// Known picket positions (mm from image center), comma separated.
    /// Switches to absolute error measurement.
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
    expected_positions: Vec<f64>,

    /// Path to write the full result (JSON).
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct CliDemoArgs {
    /// Number of pickets.
    #[arg(long, default_value = "10")]
    pickets: usize,

    /// Distance between pickets (mm).
    #[arg(long, default_value = "15.0")]
    gap_mm: f64,

    /// Picket tilt (mm of travel per mm of lateral position).
    #[arg(long, default_value = "0.0", allow_hyphen_values = true)]
    tilt: f64,

    /// Half-range of uniform pixel noise.
    #[arg(long, default_value = "0.0")]
    noise: f32,

    /// Noise seed.
    #[arg(long, default_value = "0")]
    seed: u64,

    /// Leaf error as `picket:leaf:mm`; repeatable.
    #[arg(long = "leaf-error", allow_hyphen_values = true)]
    leaf_errors: Vec<String>,

    /// Tolerance (mm).
    #[arg(long, default_value = "0.5")]
    tolerance: f64,

    /// Write the rendered frame as a 16-bit PNG.
    #[arg(long)]
    save_image: Option<PathBuf>,

    /// Path to write the full result (JSON).
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OrientationArg {
    Vertical,
    Horizontal,
}

impl OrientationArg {
    fn to_core(self) -> Orientation {
        match self {
            Self::Vertical => Orientation::Vertical,
            Self::Horizontal => Orientation::Horizontal,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CombineArg {
    Max,
    Sum,
}

impl CombineArg {
    fn to_core(self) -> CombineMode {
        match self {
            Self::Max => CombineMode::Max,
            Self::Sum => CombineMode::Sum,
        }
    }
}

impl CliAnalyzeArgs {
    fn spacing(&self) -> CliResult<PixelSpacing> {
        match (self.pixel_size_mm, self.dpmm) {
            (Some(mm), _) => Ok(PixelSpacing::isotropic(mm)),
            (None, Some(dpmm)) => Ok(PixelSpacing::from_dpmm(dpmm)),
            (None, None) => Err("pixel size is required; pass --pixel-size-mm or --dpmm".into()),
        }
    }

    fn to_config(&self) -> CliResult<AnalysisConfig> {
        let mut config = match &self.config {
            Some(path) => AnalysisConfig::from_json_file(path)?,
            None => AnalysisConfig::default(),
        };
        if let Some(name) = &self.mlc {
            config.mlc = MlcArrangement::preset(name.parse::<MlcPreset>()?);
        }
        if let Some(path) = &self.mlc_json {
            config.mlc = MlcArrangement::from_json_file(path)?;
        }
        if let Some(v) = self.tolerance {
            config.tolerance_mm = v;
        }
        if self.action_tolerance.is_some() {
            config.action_tolerance_mm = self.action_tolerance;
        }
        if self.num_pickets.is_some() {
            config.num_pickets = self.num_pickets;
        }
        if let Some(v) = self.sag_mm {
            config.sag_adjustment_mm = v;
        }
        if let Some(v) = self.edge_threshold {
            config.sampler.edge_threshold = v;
        }
        if self.filter_size.is_some() {
            config.condition.filter_size = self.filter_size;
        }
        if let Some(v) = self.crop_mm {
            config.condition.crop_mm = v;
        }
        if self.invert {
            config.condition.invert = Some(true);
        } else if self.no_invert {
            config.condition.invert = Some(false);
        }
        if let Some(o) = self.orientation {
            config.condition.orientation = Some(o.to_core());
        }
        if let Some(c) = self.combine {
            config.condition.combine = c.to_core();
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() -> CliResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Analyze(args) => run_analyze(&args),
        Commands::Demo(args) => run_demo(&args),
        Commands::MlcInfo { mlc } => run_mlc_info(mlc.as_deref()),
    }
}

fn load_image(path: &Path, spacing: PixelSpacing) -> CliResult<EpidImage> {
    tracing::info!("Loading image: {}", path.display());
    let img = image::open(path).map_err(|e| -> CliError {
        format!("Failed to open image {}: {}", path.display(), e).into()
    })?;
    let epid = EpidImage::from_dynamic(&img, spacing)?;
    tracing::info!("Image size: {}x{}", epid.width(), epid.height());
    Ok(epid)
}

fn run_analyze(args: &CliAnalyzeArgs) -> CliResult<()> {
    let spacing = args.spacing()?;
    let config = args.to_config()?;
    let images = args
        .images
        .iter()
        .map(|p| load_image(p, spacing))
        .collect::<CliResult<Vec<_>>>()?;

    let analyzer = PicketFence::with_config(config);
    let result = if args.expected_positions.is_empty() {
        analyzer.analyze(&images)?
    } else {
        analyzer.analyze_with_expected(&images, &args.expected_positions)?
    };
    report(&result, args.out.as_deref())
}

fn run_demo(args: &CliDemoArgs) -> CliResult<()> {
    let mut fence = SyntheticFence::evenly_spaced(args.pickets, args.gap_mm)
        .with_tilt(args.tilt)
        .with_noise(args.noise, args.seed);
    for spec in &args.leaf_errors {
        let (picket, leaf, mm) = parse_leaf_error(spec)?;
        fence = fence.with_leaf_error(picket, leaf, mm);
    }
    tracing::info!(
        "Rendering {}x{} synthetic fence with {} pickets",
        fence.width,
        fence.height,
        args.pickets
    );
    let frame = fence.render();

    if let Some(path) = &args.save_image {
        let max = frame.iter().copied().fold(0.0f32, f32::max).max(1.0);
        let scale = f32::from(u16::MAX) / max;
        let out = image::ImageBuffer::<image::Luma<u16>, Vec<u16>>::from_fn(
            frame.width(),
            frame.height(),
            |x, y| image::Luma([(frame.get_pixel(x, y)[0].max(0.0) * scale).round() as u16]),
        );
        out.save(path)?;
        tracing::info!("Synthetic frame written to {}", path.display());
    }

    let mut config = AnalysisConfig::for_mlc(fence.mlc.clone());
    config.tolerance_mm = args.tolerance;
    let result = PicketFence::with_config(config).analyze(&[EpidImage::new(frame, fence.spacing)?])?;
    report(&result, args.out.as_deref())
}

fn parse_leaf_error(spec: &str) -> CliResult<(usize, usize, f64)> {
    let parts: Vec<&str> = spec.split(':').collect();
    let [picket, leaf, mm] = parts.as_slice() else {
        return Err(format!("invalid leaf error '{spec}'; expected picket:leaf:mm").into());
    };
    Ok((picket.trim().parse()?, leaf.trim().parse()?, mm.trim().parse()?))
}

fn report(result: &PfResult, out: Option<&Path>) -> CliResult<()> {
    println!("{}", result.text_summary());
    for dropped in &result.dropped_pickets {
        tracing::warn!(
            "Dropped picket at {:.2} mm: {}",
            dropped.center_mm,
            dropped.reason
        );
    }
    let failed = result.failed_leaves();
    if !failed.is_empty() {
        tracing::info!("Failing leaves: {:?}", failed);
    }

    if let Some(path) = out {
        let json = serde_json::to_string_pretty(result)?;
        std::fs::write(path, &json)?;
        tracing::info!("Results written to {}", path.display());
    }
    Ok(())
}

fn run_mlc_info(name: Option<&str>) -> CliResult<()> {
    let presets = match name {
        Some(n) => vec![n.parse::<MlcPreset>()?],
        None => MlcPreset::ALL.to_vec(),
    };
    for preset in presets {
        let mlc = MlcArrangement::preset(preset);
        let (lo, hi) = mlc.travel_axis_extent();
        println!("{}", mlc.name());
        println!("  leaf pairs:   {}", mlc.n_leaves());
        println!("  extent:       {lo:.1} .. {hi:.1} mm");
        for g in mlc.groups() {
            println!("  group:        {} x {} mm", g.count, g.width_mm);
        }
        if mlc.offset_mm() != 0.0 {
            println!("  offset:       {} mm", mlc.offset_mm());
        }
    }
    Ok(())
}
