mod cli;

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use cli::{Cli, Command, ExecArgs, RecordArgs, SummaryArgs};
use pplot::collector::{host_collector, ProcessCollector};
use pplot::config::Config;
use pplot::metadata::RunMetadata;
use pplot::record::{Schema, COLUMNS};
use pplot::sampler::{iterations_for_timeout, Outcome, RunSummary, Sampler};
use pplot::series::{parse_plot_columns, plot_label, read_series, RunSeries, DEFAULT_PLOT_COLUMNS};
use pplot::sink::{DelimitedSink, RecordSink};
use pplot::supervisor::{split_command, Supervisor};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

fn init_logging(cli: &Cli, config: &Config) -> Result<()> {
    let configured = std::env::var("PPLOT_LOG_LEVEL")
        .unwrap_or_else(|_| config.general.log_level.clone());
    let log_level = if cli.quiet {
        Level::ERROR
    } else {
        match cli.verbose {
            0 => match configured.to_lowercase().as_str() {
                "trace" => Level::TRACE,
                "debug" => Level::DEBUG,
                "warn" => Level::WARN,
                "error" => Level::ERROR,
                _ => Level::INFO,
            },
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// Set once Ctrl-C arrives; the sampler checks it between ticks.
fn interrupt_flag() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&flag);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received interrupt, stopping after the current tick");
            handler_flag.store(true, Ordering::SeqCst);
        }
    });
    flag
}

fn collector() -> Result<Box<dyn ProcessCollector>> {
    host_collector().context("process sampling is not supported on this platform")
}

fn log_outcome(summary: &RunSummary) {
    match summary.outcome {
        Outcome::IterationLimitReached => {
            info!("Process reached timeout before terminating ({} ticks)", summary.ticks)
        }
        Outcome::Terminated(reason) => {
            debug!("Sampling finished: {:?}", reason);
            info!("Recorded {} rows over {} ticks", summary.rows, summary.ticks);
        }
    }
}

fn format_run_time(elapsed: chrono::Duration) -> String {
    let millis = elapsed.num_milliseconds().max(0);
    let hours = millis / 3_600_000;
    let mins = (millis / 60_000) % 60;
    let secs = (millis % 60_000) as f64 / 1000.0;
    format!("{} hour(s), {} minute(s), {:.3} second(s)", hours, mins, secs)
}

async fn run_exec(args: ExecArgs, config: Config) -> Result<()> {
    let mut sampling = config.sampling.clone();
    args.sampling.apply(&mut sampling);
    let plot_cols = match &args.plot_cols {
        Some(list) => parse_plot_columns(list)?,
        None => DEFAULT_PLOT_COLUMNS.iter().map(|c| c.to_string()).collect(),
    };
    if plot_cols.iter().any(|c| c == "files_num") {
        sampling.collect_open_files = true;
    }

    let mut options = sampling.session_options(None)?;
    if let Some(timeout) = args.timeout {
        options.max_iterations = Some(iterations_for_timeout(timeout, options.poll_interval)?);
    }
    let sink_options = sampling.sink_options();
    let collector = collector()?;
    let schema = Sampler::new(collector.as_ref(), options.clone()).schema()?;

    let folder = args.outfolder.unwrap_or(config.output.folder);
    let basename = args
        .basename
        .unwrap_or_else(|| Local::now().format("%Y%m%d%H%M%S").to_string());
    let command_output = args.command_output.unwrap_or(config.output.command_output);
    info!(
        "Output files will be written to: {}, with basename: {}",
        folder.display(),
        basename
    );
    fs::create_dir_all(&folder)
        .with_context(|| format!("Failed to create output folder {}", folder.display()))?;

    let csv_path = folder.join(format!("{}.csv", basename));
    let file = File::create(&csv_path)
        .with_context(|| format!("Failed to create {}", csv_path.display()))?;
    let mut sink = DelimitedSink::new(BufWriter::new(file), &sink_options)?;

    let argv = split_command(&args.command);
    let interrupted = interrupt_flag();
    let started_at = Local::now();
    let mut supervisor = Supervisor::spawn(&argv, command_output, &folder, &basename)
        .with_context(|| format!("Failed to start {:?}", argv))?;
    let pid = supervisor.pid();
    info!("Running '{}' as PID: {}", supervisor.command_line(), pid);

    let session = options.clone();
    let (result, mut supervisor) = tokio::task::spawn_blocking(move || {
        let result = {
            let mut sampler = Sampler::new(collector.as_ref(), session)
                .stop_when(|| interrupted.load(Ordering::SeqCst) || supervisor.has_exited());
            sampler.run(pid, &mut sink)
        };
        let result = result.and_then(|summary| sink.flush().map(|_| summary));
        (result, supervisor)
    })
    .await?;

    let kill_result = supervisor.kill().and_then(|_| supervisor.wait().map(|_| ()));
    let summary = result?;
    kill_result?;
    log_outcome(&summary);

    let finished_at = Local::now();
    info!("Total run time: {}", format_run_time(finished_at - started_at));

    if config.output.write_metadata && !args.no_metadata {
        let meta_path = folder.join(format!("{}.meta.json", basename));
        RunMetadata {
            command: argv,
            pid,
            started_at,
            finished_at,
            interval_secs: options.poll_interval.as_secs_f64(),
            max_iterations: options.max_iterations,
            include_children: options.include_children,
            columns: schema.names().iter().map(|c| c.to_string()).collect(),
            outcome: summary.outcome,
            ticks: 0,
            rows: 0,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
        .with_summary(&summary)
        .save(&meta_path)?;
        debug!("Wrote {}", meta_path.display());
    }

    if !options.headers {
        info!("Stream written without headers; skipping summary");
        return Ok(());
    }
    let series = read_series(BufReader::new(File::open(&csv_path)?), &sink_options)?;
    print_summary(&series, &plot_cols);
    Ok(())
}

async fn run_record(args: RecordArgs, config: Config) -> Result<()> {
    let mut sampling = config.sampling.clone();
    args.sampling.apply(&mut sampling);
    let options = sampling.session_options(args.max_iterations)?;
    let collector = collector()?;

    let writer: Box<dyn Write + Send> = match &args.output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("Failed to create {}", path.display()))?,
        )),
        None => Box::new(io::stdout()),
    };
    let mut sink = DelimitedSink::new(writer, &sampling.sink_options())?;
    let interrupted = interrupt_flag();
    let pid = args.pid;

    let summary = tokio::task::spawn_blocking(move || -> pplot::Result<RunSummary> {
        let mut sampler = Sampler::new(collector.as_ref(), options)
            .stop_when(|| interrupted.load(Ordering::SeqCst));
        let summary = sampler.run(pid, &mut sink)?;
        sink.flush()?;
        Ok(summary)
    })
    .await??;
    log_outcome(&summary);
    Ok(())
}

fn run_summary(args: SummaryArgs, config: Config) -> Result<()> {
    let mut sink_options = config.sampling.sink_options();
    if let Some(separator) = args.separator {
        sink_options.separator = separator;
    }
    let plot_cols = match &args.plot_cols {
        Some(list) => parse_plot_columns(list)?,
        None => DEFAULT_PLOT_COLUMNS.iter().map(|c| c.to_string()).collect(),
    };
    let file = File::open(&args.path)
        .with_context(|| format!("Failed to open {}", args.path.display()))?;
    let series = read_series(BufReader::new(file), &sink_options)?;
    print_summary(&series, &plot_cols);
    Ok(())
}

fn print_summary(series: &RunSeries, columns: &[String]) {
    if series.is_empty() {
        info!("No data to summarise");
        return;
    }
    for column in columns {
        if !series.has_column(column) {
            warn!(
                "Column {} is not in the stream (available: {})",
                column,
                series.columns().join(", ")
            );
            continue;
        }
        println!("{}", plot_label(column).unwrap_or(column.as_str()));
        println!(
            "  {:<16} {:>8} {:>12} {:>12} {:>12} {:>12}",
            "Process", "samples", "min", "mean", "max", "last"
        );
        for (key, s) in series.summarize(column) {
            println!(
                "  {:<16} {:>8} {:>12.2} {:>12.2} {:>12.2} {:>12.2}",
                key.to_string(),
                s.samples,
                s.min,
                s.mean,
                s.max,
                s.last
            );
        }
        if let Some(peak) = series.total(column).into_iter().map(|(_, v)| v).reduce(f64::max) {
            println!("  {:<16} {:>8} {:>12} {:>12} {:>12.2}", "Total (peak)", "", "", "", peak);
        }
    }
}

fn print_columns() {
    let width = COLUMNS.iter().map(|c| c.name.len()).max().unwrap_or(0);
    println!("{:<width$}  Description", "Name", width = width);
    for column in COLUMNS.iter() {
        println!("{:<width$}  {}", column.name, column.description, width = width);
    }
    debug!("Default stream has {} columns", Schema::new(false).len());
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(Config::config_path);
    let loaded = config_path.exists().then(|| Config::load(&config_path));
    let config = match &loaded {
        Some(Ok(config)) => config.clone(),
        _ => Config::default(),
    };
    init_logging(&cli, &config)?;
    match loaded {
        Some(Ok(_)) => debug!("Loaded config from {}", config_path.display()),
        Some(Err(e)) => warn!("Failed to load config: {}, using defaults", e),
        None => debug!("No config file found, using defaults"),
    }

    match cli.command {
        Command::Exec(args) => run_exec(args, config).await,
        Command::Record(args) => run_record(args, config).await,
        Command::Summary(args) => run_summary(args, config),
        Command::Columns => {
            print_columns();
            Ok(())
        }
    }
}
