//! Staging demo: adds two large arrays three ways and reports time and traffic for each.
//!
//! - `host`: everything stays in process memory
//! - `upload-per-call`: host operands are staged to the device on every call
//! - `staged`: operands are uploaded once and the output buffer is reused

use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::{Parser, ValueEnum};
use rand::Rng;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use vkstage::{
    Array, BackendKind, ContextConfig, DataType, DeviceContext, ElementwiseFn, ElementwiseKernel,
    HostArray, Operand, Target, TransferStats, compile,
};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Backend {
    Emulated,
    Vulkan,
}

/// Compare host, upload-per-call and staged elementwise addition
#[derive(Parser)]
#[command(name = "vkstage")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Device backend
    #[arg(short, long, value_enum, default_value = "emulated")]
    backend: Backend,

    /// Elements per array
    #[arg(short, long, default_value = "100000")]
    size: usize,

    /// Kernel invocations per strategy
    #[arg(short, long, default_value = "20")]
    repeats: u32,

    /// Emulated device capacity in MiB (default: host available memory)
    #[arg(long)]
    capacity_mb: Option<u64>,

    /// Vulkan physical device index
    #[arg(long, default_value = "0")]
    device_index: usize,

    /// Use random inputs instead of x = 0..n, y = 2x
    #[arg(long)]
    random: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn setup_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();
}

fn inputs(size: usize, random: bool) -> vkstage::Result<(HostArray, HostArray)> {
    let (x, y): (Vec<f32>, Vec<f32>) = if random {
        let mut rng = rand::rng();
        (0..size)
            .map(|_| (rng.random_range(-1.0..1.0), rng.random_range(-1.0..1.0)))
            .unzip()
    } else {
        (0..size).map(|i| (i as f32, 2.0 * i as f32)).unzip()
    };

    Ok((HostArray::from_slice(&x)?, HostArray::from_slice(&y)?))
}

struct Report {
    label: &'static str,
    elapsed: Duration,
    stats: TransferStats,
}

impl Report {
    fn print(&self, repeats: u32) {
        println!(
            "{:<16} {:>10.3} ms/call  {:>6} copies  {:>12} bytes  {:>4} launches",
            self.label,
            self.elapsed.as_secs_f64() * 1000.0 / repeats as f64,
            self.stats.total_copies(),
            self.stats.total_bytes(),
            self.stats.kernel_launches
        );
    }
}

fn time_host(x: &HostArray, y: &HostArray, repeats: u32) -> vkstage::Result<(Report, HostArray)> {
    let kernel = compile(&ElementwiseFn::add(), Target::Host)?;
    let mut out = Array::Host(HostArray::zeros_like(x.desc()));

    let start = Instant::now();
    for _ in 0..repeats {
        kernel.apply_into(&[x.into(), y.into()], &mut out)?;
    }
    let elapsed = start.elapsed();

    Ok((
        Report {
            label: "host",
            elapsed,
            stats: TransferStats::default(),
        },
        out.into_host()?,
    ))
}

fn time_upload_per_call(
    ctx: &DeviceContext,
    kernel: &ElementwiseKernel,
    x: &HostArray,
    y: &HostArray,
    repeats: u32,
) -> vkstage::Result<(Report, HostArray)> {
    ctx.reset_stats();

    let start = Instant::now();
    let mut result = None;
    for _ in 0..repeats {
        result = Some(kernel.call(&[x.into(), y.into()])?);
    }
    let elapsed = start.elapsed();
    let stats = ctx.stats();

    let result = match result {
        Some(array) => array.into_host()?,
        None => HostArray::zeros_like(x.desc()),
    };

    Ok((
        Report {
            label: "upload-per-call",
            elapsed,
            stats,
        },
        result,
    ))
}

fn time_staged(
    ctx: &DeviceContext,
    kernel: &ElementwiseKernel,
    x: &HostArray,
    y: &HostArray,
    repeats: u32,
) -> vkstage::Result<(Report, HostArray)> {
    ctx.reset_stats();

    let start = Instant::now();
    let x_dev = ctx.upload(x)?;
    let y_dev = ctx.upload(y)?;
    let mut out = Array::Device(ctx.allocate(x.shape(), DataType::F32)?);

    for _ in 0..repeats {
        kernel.apply_into(&[Operand::from(&x_dev), Operand::from(&y_dev)], &mut out)?;
    }
    let result = out.into_host()?;
    let elapsed = start.elapsed();

    Ok((
        Report {
            label: "staged",
            elapsed,
            stats: ctx.stats(),
        },
        result,
    ))
}

fn run(cli: &Cli) -> vkstage::Result<()> {
    let config = match cli.backend {
        Backend::Emulated => ContextConfig {
            backend: BackendKind::Emulated {
                capacity_bytes: cli.capacity_mb.map(|mb| mb * 1024 * 1024),
            },
            ..Default::default()
        },
        Backend::Vulkan => ContextConfig::vulkan(cli.device_index),
    };

    let ctx = DeviceContext::new(config)?;
    info!("Using {}", ctx.device_info()?);

    let (x, y) = inputs(cli.size, cli.random)?;
    let kernel = ctx.vectorize(&ElementwiseFn::add())?;

    let (host, expected) = time_host(&x, &y, cli.repeats)?;
    let (per_call, per_call_result) = time_upload_per_call(&ctx, &kernel, &x, &y, cli.repeats)?;
    let (staged, staged_result) = time_staged(&ctx, &kernel, &x, &y, cli.repeats)?;

    println!();
    for report in [&host, &per_call, &staged] {
        report.print(cli.repeats);
    }
    println!();

    let agree = per_call_result == expected && staged_result == expected;
    info!(
        "Results {} across strategies",
        if agree { "agree" } else { "DIFFER" }
    );

    if let Ok(values) = staged_result.as_slice::<f32>() {
        let shown = values.len().min(10);
        info!("First {} results: {:?}", shown, &values[..shown]);
    }

    ctx.shutdown();
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
