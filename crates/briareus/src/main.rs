#![warn(clippy::all, clippy::dbg_macro)]

use std::collections::BTreeMap;
use std::io::Read as _;
use std::process::ExitCode;
use std::{fs, io};

use anstream::println;
use anyhow::{Context as _, anyhow};
use camino::Utf8PathBuf;
use clap::{Parser, ValueEnum};
use clap_verbosity_flag::InfoLevel;
use etcetera::AppStrategy as _;
use thiserror::Error;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt as _, util::SubscriberInitExt as _};

use crate::anarep::NotificationTable;
use crate::config::{Config, ConfigError};
use crate::gatherer::{Gatherer, GathererError};
use crate::model::{BuilderResult, InputDesc, StatusReport};
use crate::state::RunState;

mod actor;
mod anarep;
mod bcgen;
mod bldconfig;
mod builder;
mod config;
mod facts;
mod forge;
mod gatherer;
mod model;
mod output;
mod state;

#[cfg(all(
    not(target_family = "windows"),
    any(target_arch = "x86_64", target_arch = "aarch64")
))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

/// Discovers forge state for a project, enumerates its build matrix, and
/// (optionally) correlates builder results into an analysis report.
#[derive(Parser)]
#[command(about, version)]
struct App {
    /// Path to the InputDesc JSON document, or `-` to read it from stdin.
    input: String,

    /// A prior run's StatusReport list (JSON). Absent means "no prior state".
    #[arg(long)]
    prior_report: Option<Utf8PathBuf>,

    /// The builder's BuilderResult list (JSON). Omitting this stops the run
    /// after emitting facts and the jobset, skipping analysis entirely.
    #[arg(long)]
    builder_results: Option<Utf8PathBuf>,

    /// Hydra `builder_conf` JSON, overriding individual jobset fields.
    #[arg(long)]
    builder_conf: Option<Utf8PathBuf>,

    #[arg(long, default_value_t = App::default_cache_dir(), hide_default_value = true)]
    cache_dir: Utf8PathBuf,

    /// Refuse any forge network access.
    #[arg(long)]
    offline: bool,

    /// Per-forge connection limit.
    #[arg(long)]
    concurrency: Option<usize>,

    /// Per-call soft deadline, in seconds.
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Which stage's output to write to stdout.
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Facts)]
    output_format: OutputFormat,

    /// Emit the report stage as JSON instead of a colorized summary.
    #[arg(long)]
    json: bool,

    #[arg(long, value_enum)]
    color: Option<ColorMode>,

    #[command(flatten)]
    verbose: clap_verbosity_flag::Verbosity<InfoLevel>,
}

impl App {
    fn default_cache_dir() -> Utf8PathBuf {
        etcetera::choose_app_strategy(etcetera::AppStrategyArgs {
            top_level_domain: "io.github".into(),
            author: "briareus".into(),
            app_name: "briareus".into(),
        })
        .expect("failed to determine default cache directory")
        .cache_dir()
        .try_into()
        .expect("failed to turn cache directory into a sane path")
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Facts,
    Jobset,
    Report,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ColorMode {
    Auto,
    Always,
    Never,
}

impl From<ColorMode> for anstream::ColorChoice {
    fn from(value: ColorMode) -> Self {
        match value {
            ColorMode::Auto => Self::Auto,
            ColorMode::Always => Self::Always,
            ColorMode::Never => Self::Never,
        }
    }
}

#[derive(Debug, Error)]
enum Error {
    #[error("couldn't read input spec from {0}")]
    ReadInput(String, #[source] anyhow::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Gatherer(#[from] GathererError),
    #[error(transparent)]
    BcGen(#[from] bcgen::BcGenError),
    #[error("couldn't read builder results from {0}")]
    ReadBuilderResults(String, #[source] anyhow::Error),
    #[error("--output-format=report requires --builder-results")]
    ReportWithoutBuilderResults,
}

impl Error {
    /// Exit-code mapping per SPEC_FULL.md §6: `0` success, `1` input error,
    /// `2` forge error (any `InvalidRepo` that propagates), `3` builder-
    /// output error.
    fn exit_code(&self) -> ExitCode {
        match self {
            Error::ReadInput(..)
            | Error::Config(_)
            | Error::BcGen(_)
            | Error::ReportWithoutBuilderResults
            | Error::Gatherer(GathererError::NoRepos) => ExitCode::from(1),
            Error::Gatherer(_) => ExitCode::from(2),
            Error::ReadBuilderResults(..) => ExitCode::from(3),
        }
    }
}

async fn run(app: &App) -> Result<ExitCode, Error> {
    let color_mode = app.color.unwrap_or_else(|| {
        if std::env::var("NO_COLOR").is_ok() {
            ColorMode::Never
        } else if std::env::var("FORCE_COLOR").is_ok() {
            ColorMode::Always
        } else {
            ColorMode::Auto
        }
    });
    anstream::ColorChoice::write_global(color_mode.into());

    let filter = EnvFilter::builder()
        .with_default_directive(app.verbose.tracing_level_filter().into())
        .with_env_var("BRIAREUS_LOG")
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().without_time().with_writer(io::stderr))
        .with(filter)
        .init();

    if matches!(app.output_format, OutputFormat::Report) && app.builder_results.is_none() {
        return Err(Error::ReportWithoutBuilderResults);
    }

    let input_text = if app.input == "-" {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .map_err(|e| Error::ReadInput("<stdin>".to_string(), e.into()))?;
        buf
    } else {
        fs::read_to_string(&app.input)
            .map_err(|e| Error::ReadInput(app.input.clone(), anyhow!(e)))?
    };
    let input: InputDesc = serde_json::from_str(&input_text)
        .context("malformed InputDesc JSON")
        .map_err(|e| Error::ReadInput(app.input.clone(), e))?;

    let config = Config::discover(
        app.cache_dir.clone(),
        app.offline,
        app.concurrency,
        app.timeout_secs,
    )?;

    let state = RunState::new(config, input.repo_locs.clone());
    let gatherer = Gatherer::new(
        state.forge_factory(),
        state.config().concurrency,
        state.config().timeout,
    );
    let gathered = gatherer.run(&input).await?;

    tracing::info!(
        branches = gathered.branches.len(),
        pullreqs = gathered.pullreqs.len(),
        subrepos = gathered.subrepos.len(),
        "gather complete"
    );

    let facts = facts::build(&input, &gathered);
    let configs = bcgen::generate(&input, &gathered)?;
    tracing::info!(configs = configs.len(), "build matrix generated");

    match app.output_format {
        OutputFormat::Facts => {
            for fact in &facts {
                println!("{fact}");
            }
        }
        OutputFormat::Jobset => {
            let Some(project_repo) = input.project_repo() else {
                return Err(bcgen::BcGenError::NoProjectRepo.into());
            };

            let mut repo_urls: BTreeMap<String, String> = input
                .repos
                .iter()
                .map(|r| (r.name.clone(), r.url.clone()))
                .collect();
            for repo in &gathered.subrepos {
                repo_urls.entry(repo.name.clone()).or_insert_with(|| repo.url.clone());
            }

            let builder_conf = app
                .builder_conf
                .as_ref()
                .map(|path| -> Result<_, Error> {
                    let text = fs::read_to_string(path)
                        .map_err(|e| Error::ReadInput(path.to_string(), anyhow!(e)))?;
                    serde_json::from_str(&text)
                        .context("malformed builder_conf JSON")
                        .map_err(|e| Error::ReadInput(path.to_string(), e))
                })
                .transpose()?;

            let jobsets = builder::hydra::build_jobsets(
                &configs,
                &project_repo.name,
                &repo_urls,
                builder_conf.as_ref(),
            );
            println!("{}", output::json::write_jobset(&jobsets));
        }
        OutputFormat::Report => {
            let builder_results_path = app
                .builder_results
                .as_ref()
                .expect("checked for Some at the top of run()");

            let results: Vec<BuilderResult> = read_json(builder_results_path)
                .map_err(|e| Error::ReadBuilderResults(builder_results_path.to_string(), e))?;

            let prior: Vec<StatusReport> = match &app.prior_report {
                Some(path) => {
                    read_json(path).map_err(|e| Error::ReadInput(path.to_string(), e))?
                }
                None => Vec::new(),
            };

            let table = NotificationTable::default();
            let report = anarep::analyze(&configs, &results, &prior, &table);
            tracing::info!(
                var_failures = report.var_failures.len(),
                completely_failing = report.completely_failing.len(),
                notifications = report.notifications.len(),
                "analysis complete"
            );

            if app.json {
                println!("{}", output::json::write_report(&report));
            } else {
                print!("{}", output::plain::render_report(&report));
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Utf8PathBuf) -> Result<T, anyhow::Error> {
    let text = fs::read_to_string(path)?;
    serde_json::from_str(&text).context("malformed JSON")
}

#[tokio::main]
async fn main() -> ExitCode {
    let app = App::parse();

    match run(&app).await {
        Ok(code) => code,
        Err(err) => {
            let code = err.exit_code();
            tracing::error!("{:#}", anyhow!(err));
            code
        }
    }
}
