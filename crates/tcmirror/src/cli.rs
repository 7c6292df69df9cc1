//! Exposes the command line application.
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tcmirror_service::actualizer::DEFAULT_BRANCH_ALIAS;
use tcmirror_service::config::Config;
use tcmirror_service::metrics;

use crate::commands;
use crate::logging;

/// What `top` ranks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Ranking {
    /// Tests with the highest share of failed runs.
    FailingTests,
    /// Tests with the longest average duration.
    SlowTests,
    /// Suites with the highest share of failed builds.
    FailingSuites,
}

/// tcmirror commands.
#[derive(Debug, Subcommand)]
enum Command {
    /// Reindex tracked suites, then keep advancing queued and running builds until interrupted.
    Run,

    /// Reindex the build history of one suite, or of all tracked suites.
    Reindex {
        /// Only reindex this server.
        #[arg(long, short)]
        server: Option<String>,

        /// The suite to reindex. Reindexes all tracked suites when omitted.
        #[arg(long, requires = "server")]
        suite: Option<String>,

        /// The branch of `--suite`.
        #[arg(long, short, default_value = DEFAULT_BRANCH_ALIAS)]
        branch: String,
    },

    /// Reindex tracked suites and advance queued and running builds once.
    Actualize {
        /// Only actualize this server.
        #[arg(long, short)]
        server: Option<String>,
    },

    /// Print the build history of a suite, one JSON object per line.
    History {
        /// The server of the suite.
        #[arg(long, short)]
        server: String,

        /// The suite (build type) id.
        suite: String,

        #[arg(long, short, default_value = DEFAULT_BRANCH_ALIAS)]
        branch: String,
    },

    /// Load the tracked history and print the top tests or suites.
    Top {
        /// What to rank.
        #[arg(value_enum)]
        ranking: Ranking,

        /// Only rank runs of this server.
        #[arg(long, short)]
        server: Option<String>,

        /// Number of entries to print.
        #[arg(short, default_value_t = 10)]
        n: usize,
    },
}

/// Local mirror of the build history of remote CI servers.
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Cli {
    /// Path to your configuration file.
    #[arg(long, short, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    /// Returns the path to the configuration file.
    fn config(&self) -> Option<&Path> {
        self.config.as_deref()
    }
}

fn configure_metrics(config: &Config) -> Result<()> {
    let Some(ref statsd) = config.metrics.statsd else {
        return Ok(());
    };

    let mut tags = config.metrics.custom_tags.clone();
    if let Some(tag) = config.metrics.hostname_tag.clone() {
        if let Some(name) = hostname::get().ok().and_then(|s| s.into_string().ok()) {
            tags.insert(tag, name);
        }
    }

    metrics::configure_statsd(&config.metrics.prefix, statsd.as_str(), tags)
        .context("failed to configure statsd")
}

/// Runs the main application.
pub fn execute() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::get(cli.config()).context("failed loading config")?;

    let _sentry = sentry::init(sentry::ClientOptions {
        dsn: config.sentry_dsn.clone(),
        release: sentry::release_name!(),
        ..Default::default()
    });

    // SAFETY: No other threads have been spawned yet.
    unsafe { logging::init_logging(&config) };
    configure_metrics(&config)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("tcmirror-io")
        .enable_all()
        .build()
        .context("failed to start the runtime")?;
    let registry = commands::create_registry(config, runtime.handle().to_owned());

    match cli.command {
        Command::Run => runtime
            .block_on(commands::run(&registry))
            .context("failed to run the mirror")?,
        Command::Reindex {
            server,
            suite,
            branch,
        } => runtime
            .block_on(commands::reindex(
                &registry,
                server.as_deref(),
                suite.as_deref(),
                &branch,
            ))
            .context("failed to reindex")?,
        Command::Actualize { server } => runtime
            .block_on(commands::actualize(&registry, server.as_deref()))
            .context("failed to actualize builds")?,
        Command::History {
            server,
            suite,
            branch,
        } => runtime
            .block_on(commands::history(&registry, &server, &suite, &branch))
            .context("failed to load the build history")?,
        Command::Top { ranking, server, n } => runtime
            .block_on(commands::top(&registry, server.as_deref(), ranking, n))
            .context("failed to rank runs")?,
    }

    Ok(())
}
