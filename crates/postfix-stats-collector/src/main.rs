// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use clap::{ArgAction, Parser};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use postfix_stats::{
    classifier::Classifier,
    config::CollectorConfig,
    feeder::feed,
    metric::MetricsSink,
    sampler::QueueSampler,
    statsd::StatsdClient,
    worker_pool::WorkerPool,
};

/// Classifies Postfix log lines and samples qshape, shipping both to StatsD.
///
/// StatsD and qshape settings are read from STATSD_HOST, STATSD_PORT, STATSD_PREFIX,
/// STATSD_MAXUDPSIZE, STATSD_DELAY, POSTFIX_STATS_QSHAPE and POSTFIX_STATS_TOP_DOMAINS.
#[derive(Parser, Debug)]
#[command(name = "postfix-stats-collector", version)]
struct Cli {
    /// -v for a little info, -vv for debugging, -vvv for tracing
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Number of line parser workers [default: number of CPUs]
    #[arg(short, long, value_name = "threads")]
    concurrency: Option<usize>,

    /// Skip qshape monitoring
    #[arg(long)]
    skip_qshape: bool,

    /// Skip log parsing
    #[arg(long)]
    skip_log_parser: bool,

    /// Search for STRING in local recipient addresses, count it as NAME and, if COUNT is
    /// yes/1/true, in the incoming status counters too
    #[arg(short, long = "local", value_name = "STRING,NAME,COUNT")]
    local_emails: Vec<String>,

    /// Sample the queues once instead of every STATSD_DELAY seconds
    #[arg(short = 'o', long = "once")]
    run_once: bool,

    /// How many top domains qshape reports separately
    #[arg(short = 'n', long)]
    top_domains: Option<usize>,

    /// Log files to parse, `-` for standard input
    #[arg(value_name = "file", default_value = "-")]
    log_files: Vec<String>,
}

impl Cli {
    /// Command line values take precedence over the environment.
    fn apply(self, config: &mut CollectorConfig) {
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(top_domains) = self.top_domains {
            config.top_domains = top_domains;
        }
        config.skip_qshape = self.skip_qshape;
        config.skip_log_parser = self.skip_log_parser;
        config.local_addresses = self.local_emails;
        config.run_once = self.run_once;
        config.log_files = self.log_files;
    }
}

fn verbosity_level(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

fn init_logging(log_level: &str) {
    let env_filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("warn"));
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("setting default subscriber failed: {e}");
    }
    debug!("Logging subsystem enabled");
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let verbose = cli.verbose;

    let mut config = CollectorConfig::from_env();
    cli.apply(&mut config);

    let log_level = config
        .log_level
        .clone()
        .unwrap_or_else(|| verbosity_level(verbose).to_string());
    init_logging(&log_level);

    if let Err(e) = config.validate() {
        error!("{e}");
        return ExitCode::FAILURE;
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start runtime: {e}");
            return ExitCode::FAILURE;
        }
    };
    let code = runtime.block_on(run(config));
    // A pending stdin read cannot be interrupted, so do not wait for it.
    runtime.shutdown_background();
    code
}

async fn run(config: CollectorConfig) -> ExitCode {
    let local_addresses = match config.local_address_classifier() {
        Ok(local_addresses) => local_addresses,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    let classifier = match Classifier::with_default_handlers(local_addresses) {
        Ok(classifier) => Arc::new(classifier),
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    let sink: Arc<dyn MetricsSink> = match StatsdClient::new(&config.statsd_config()) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!("Failed to create StatsD client: {e}");
            return ExitCode::FAILURE;
        }
    };

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_ctrl_c(cancel.clone()));

    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    if !config.skip_qshape {
        let sampler = QueueSampler::new(Arc::new(config.qshape_command()), Arc::clone(&sink));
        let period = config.sampling_interval;
        let run_once = config.run_once;
        let cancel = cancel.clone();
        tasks.push(tokio::spawn(async move {
            sampler.run(period, run_once, cancel).await;
        }));
    }

    if !config.skip_log_parser {
        let pool = WorkerPool::new(config.concurrency, classifier, Arc::clone(&sink));
        let source = config.line_source();
        let cancel = cancel.clone();
        tasks.push(tokio::spawn(async move {
            feed(&pool, &source, &cancel).await;
            pool.shutdown().await;
        }));
    }

    for task in tasks {
        if let Err(e) = task.await {
            error!("Collector task failed: {e}");
        }
    }
    info!("Collector stopped");
    ExitCode::SUCCESS
}

async fn cancel_on_ctrl_c(cancel: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("Received Ctrl-C, stopping");
            cancel.cancel();
        }
        Err(e) => error!("Unable to listen for Ctrl-C: {e}"),
    }
}
