use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result, anyhow};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use porter_duff_compositor::renderer::backend::{GpuBackend, SoftwareBackend};
use porter_duff_compositor::{
    BackendKind, CompositorConfig, DisplayHost, DriverOptions, FragmentSet, FrameClock,
    HeadlessHost, RenderLoopDriver, StrategyKind,
};

/// Porter-Duff compositing: fused single-program vs multi-pass rendering.
#[derive(Parser, Debug)]
#[command(name = "porter-duff-compositor", version)]
struct Cli {
    /// JSON config file; flags below override its fields.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    width: Option<u32>,

    #[arg(long)]
    height: Option<u32>,

    #[arg(long, value_enum)]
    strategy: Option<StrategyKind>,

    /// Blend operator name, e.g. source-over, xor.
    #[arg(long)]
    operator: Option<String>,

    #[arg(long, value_enum)]
    fragments: Option<FragmentSet>,

    /// Number of frames to render before exiting.
    #[arg(long)]
    frames: Option<u64>,

    /// Advance to the next operator every N frames.
    #[arg(long)]
    cycle_every: Option<u64>,

    #[arg(long, value_enum)]
    backend: Option<BackendKind>,

    /// Write the final frame as PNG.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Suppress the FPS line.
    #[arg(long)]
    quiet: bool,

    /// Use a fixed frame duration (seconds) instead of the wall clock.
    #[arg(long)]
    fixed_dt: Option<f64>,
}

impl Cli {
    fn into_config(self) -> Result<(CompositorConfig, Option<f64>)> {
        let mut cfg = match self.config.as_deref() {
            Some(path) => CompositorConfig::load(path)?,
            None => CompositorConfig::default(),
        };
        if let Some(v) = self.width {
            cfg.width = v;
        }
        if let Some(v) = self.height {
            cfg.height = v;
        }
        if let Some(v) = self.strategy {
            cfg.strategy = v;
        }
        if let Some(v) = self.operator {
            cfg.operator = v;
        }
        if let Some(v) = self.fragments {
            cfg.fragments = v;
        }
        if let Some(v) = self.frames {
            cfg.frames = v;
        }
        if self.cycle_every.is_some() {
            cfg.cycle_every = self.cycle_every;
        }
        if let Some(v) = self.backend {
            cfg.backend = v;
        }
        if self.output.is_some() {
            cfg.output = self.output;
        }
        cfg.quiet |= self.quiet;
        cfg.validate()?;
        Ok((cfg, self.fixed_dt))
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run<B: GpuBackend>(backend: B, cfg: &CompositorConfig, clock: FrameClock) -> Result<()> {
    let (source, destination) = cfg.fragments.fragments();
    let options = DriverOptions {
        strategy: cfg.strategy,
        operator: cfg.blend_operator()?,
        cycle_every: cfg.cycle_every,
    };
    let mut driver = RenderLoopDriver::new(backend, source, destination, options);
    if !cfg.quiet {
        driver = driver.with_fps_output(Box::new(std::io::stdout()));
    }

    let mut host = HeadlessHost::new(cfg.frames, clock);
    let summary = host.run(&mut driver)?;
    if !cfg.quiet {
        println!();
    }

    // Shutdown releases programs and offscreen surfaces; the visible surface stays readable.
    if let Some(path) = cfg.output.as_deref() {
        if summary.frames == 0 {
            tracing::warn!("no frames rendered, skipping export");
        } else {
            export_frame(&mut driver, path)?;
        }
    }
    tracing::info!(
        frames = summary.frames,
        elapsed_secs = summary.elapsed_secs,
        fps = %driver.perf().format_fps_line(),
        "done"
    );
    Ok(())
}

fn export_frame<B: GpuBackend>(driver: &mut RenderLoopDriver<B>, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create output dir '{}'", parent.display()))?;
    }
    driver
        .read_frame()
        .and_then(|frame| frame.save_png(path))
        .with_context(|| format!("write png '{}'", path.display()))?;
    tracing::info!(path = %path.display(), "saved final frame");
    Ok(())
}

fn main() -> Result<()> {
    init_tracing();
    let (cfg, fixed_dt) = Cli::parse().into_config()?;
    let clock = match fixed_dt {
        Some(dt) if dt > 0.0 => FrameClock::Fixed(dt),
        Some(dt) => return Err(anyhow!("--fixed-dt must be positive, got {dt}")),
        None => FrameClock::Wall,
    };

    match cfg.backend {
        BackendKind::Software => run(SoftwareBackend::new(cfg.width, cfg.height), &cfg, clock),
        #[cfg(feature = "gpu")]
        BackendKind::Wgpu => {
            let backend = porter_duff_compositor::renderer::backend::WgpuBackend::new(
                cfg.width, cfg.height,
            )
            .context("create wgpu backend")?;
            run(backend, &cfg, clock)
        }
        #[cfg(not(feature = "gpu"))]
        BackendKind::Wgpu => Err(anyhow!("the wgpu backend needs a build with `--features gpu`")),
    }
}
