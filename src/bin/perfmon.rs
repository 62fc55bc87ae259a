use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use perf_monitor::battery::{BatteryIntent, BatteryStatus};
use perf_monitor::config::MonitorConfig;
use perf_monitor::monitor::{self, MonitorContext};

#[path = "perfmon/report.rs"]
mod report;
use report::{drain_events, RunAggregator};

/// Simulated display refresh: one frame every ~16.7 ms.
const FRAME_INTERVAL: Duration = Duration::from_micros(16_667);

fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli.execute() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("perfmon error: {err:?}");
            ExitCode::from(1)
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "perfmon", about = "Run the performance monitor against a simulated UI loop")]
struct Cli {
    /// Emit monitor logs on stderr.
    #[arg(long, global = true, default_value_t = false)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

impl Cli {
    fn execute(self) -> Result<()> {
        if self.verbose {
            perf_monitor::init_logging();
        }
        match self.command {
            Command::Run(args) => run_command(args),
            Command::Config(args) => config_command(args),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Monitor a simulated UI loop and print what was observed.
    Run(RunArgs),
    /// Print the effective configuration.
    Config(ConfigArgs),
}

#[derive(Args, Debug, Clone)]
struct ConfigArgs {
    /// JSON file with metrics_interval_ms / anr_timeout_ms / leak_detection_delay_ms.
    #[arg(long)]
    config: Option<PathBuf>,
}

impl ConfigArgs {
    fn load(&self) -> MonitorConfig {
        let config = match &self.config {
            Some(path) => MonitorConfig::load_from_file(path),
            None => MonitorConfig::default(),
        };
        config.validated()
    }
}

#[derive(Args, Debug, Clone)]
struct RunArgs {
    #[command(flatten)]
    config: ConfigArgs,
    /// How long to run the simulated UI loop (milliseconds).
    #[arg(long, default_value_t = 3_000)]
    duration_ms: u64,
    /// Override the sampling period (milliseconds).
    #[arg(long)]
    metrics_interval_ms: Option<u64>,
    /// Override the watchdog timeout (milliseconds).
    #[arg(long)]
    anr_timeout_ms: Option<u64>,
    /// Override the leak detection delay (milliseconds).
    #[arg(long)]
    leak_delay_ms: Option<u64>,
    /// Block the UI loop once for this long, halfway through the run.
    #[arg(long)]
    stall_ms: Option<u64>,
    /// Watch an object for leaks and keep it alive.
    #[arg(long, default_value_t = false)]
    leak: bool,
    /// Dispatch a discharging battery that drops 10 points.
    #[arg(long, default_value_t = false)]
    battery_drain: bool,
    /// Directory for crash and metrics logs.
    #[arg(long)]
    log_root: Option<PathBuf>,
    /// Output format for the run report.
    #[arg(long, value_enum, default_value_t = ReportFormat::Table)]
    format: ReportFormat,
}

impl RunArgs {
    fn effective_config(&self) -> MonitorConfig {
        let mut config = self.config.load();
        if let Some(value) = self.metrics_interval_ms {
            config.metrics_interval_ms = value;
        }
        if let Some(value) = self.anr_timeout_ms {
            config.anr_timeout_ms = value;
        }
        if let Some(value) = self.leak_delay_ms {
            config.leak_detection_delay_ms = value;
        }
        config.validated()
    }

    fn validate(&self) -> Result<()> {
        if self.duration_ms == 0 {
            bail!("--duration-ms must be greater than zero");
        }
        if let Some(stall) = self.stall_ms {
            if stall == 0 {
                bail!("--stall-ms must be greater than zero");
            }
        }
        Ok(())
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum ReportFormat {
    Json,
    Table,
}

fn config_command(args: ConfigArgs) -> Result<()> {
    let json =
        serde_json::to_string_pretty(&args.load()).context("serializing configuration")?;
    println!("{json}");
    Ok(())
}

fn battery_intent(level: i32) -> BatteryIntent {
    BatteryIntent {
        level: Some(level),
        scale: Some(100),
        status: Some(BatteryStatus::Discharging),
        temperature_tenths_c: Some(312),
    }
}

fn run_command(args: RunArgs) -> Result<()> {
    args.validate()?;
    let config = args.effective_config();

    let (context, host) = MonitorContext::standalone();
    let context = match &args.log_root {
        Some(root) => context.with_log_root(root),
        None => context,
    };
    let monitor = monitor::initialize(context, config).context("starting monitor")?;

    let mut events = monitor.events();
    let mut snapshots = monitor.metrics();
    let mut aggregator = RunAggregator::default();

    host.battery.dispatch(battery_intent(60));

    let buffer = Arc::new(vec![0u8; 64 * 1024]);
    let label = if args.leak {
        "perfmon.retained_buffer"
    } else {
        "perfmon.released_buffer"
    };
    perf_monitor::watch_for_leaks(&buffer, label);
    let retained = args.leak.then_some(buffer);

    let run_for = Duration::from_millis(args.duration_ms);
    let stall_at = run_for / 2;
    let mut stalled = false;
    let started = Instant::now();

    while started.elapsed() < run_for {
        let elapsed = started.elapsed();
        host.frames.tick(elapsed.as_nanos() as u64);
        host.looper.run_pending();

        if !stalled && elapsed >= stall_at {
            stalled = true;
            if let Some(stall_ms) = args.stall_ms {
                host.looper.post_named(
                    "perfmon.injected_stall",
                    Box::new(move || thread::sleep(Duration::from_millis(stall_ms))),
                );
            }
            if args.battery_drain {
                host.battery.dispatch(battery_intent(50));
            }
            perf_monitor::record_custom_metric("perfmon.halfway", format!("{} ms", elapsed.as_millis()));
        }

        if snapshots.has_changed().unwrap_or(false) {
            aggregator.record_snapshot(snapshots.borrow_and_update().clone());
        }
        drain_events(&mut events, &mut aggregator);
        thread::sleep(FRAME_INTERVAL);
    }

    // Let pending leak checks finish before reporting.
    let settle = Duration::from_millis(config.leak_detection_delay_ms + 200);
    let settle_until = Instant::now() + settle.min(Duration::from_secs(10));
    while Instant::now() < settle_until {
        host.looper.run_pending();
        drain_events(&mut events, &mut aggregator);
        thread::sleep(FRAME_INTERVAL);
    }

    monitor::shutdown();
    drain_events(&mut events, &mut aggregator);
    drop(retained);

    let report = aggregator.into_report(events.missed());
    match args.format {
        ReportFormat::Json => report.print_json()?,
        ReportFormat::Table => report.print_table(),
    }
    Ok(())
}
