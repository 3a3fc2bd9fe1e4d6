#![forbid(unsafe_code)]

use std::future::Future;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use autograder_harness::analysis::report::build_report_with_threshold;
use autograder_harness::analysis::{build_report, render_report_markdown, DISAGREEMENT_THRESHOLD};
use autograder_harness::config::ExperimentConfig;
use autograder_harness::dataset::Dataset;
use autograder_harness::experiment::{
    estimate_cost, ExperimentResults, JsonlTraceSink, TraceSink, TrialExecutor,
};
use autograder_harness::gateway::openrouter::OpenRouterAdapter;
use autograder_harness::gateway::{ProviderGateway, TracingUsageSink};
use autograder_harness::logging::init_tracing;
use autograder_harness::prompts::{PromptRenderer, StrategyPrompts};

#[derive(Parser)]
#[command(
    name = "autograder",
    version,
    about = "Measure LLM judge consistency and accuracy against human labels"
)]
struct Cli {
    /// Debug-level logging
    #[arg(long, short, global = true)]
    verbose: bool,
    /// Explicit log filter, e.g. "debug" or "autograder_harness=trace"
    #[arg(long, global = true)]
    log_level: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

/// Overrides applied on top of the config file.
#[derive(Args, Debug, Default)]
struct RunArgs {
    /// TOML experiment config
    #[arg(long)]
    config: Option<PathBuf>,
    /// Judge model id (OpenRouter)
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    temperature: Option<f32>,
    #[arg(long)]
    max_tokens: Option<u32>,
    /// Trials per (case, strategy)
    #[arg(long)]
    trials: Option<u32>,
    /// Comma-separated strategy ids
    #[arg(long, value_delimiter = ',')]
    strategies: Option<Vec<String>>,
    /// Judge requests in flight
    #[arg(long)]
    concurrency: Option<usize>,
    /// Dataset JSON (defaults to the built-in cases)
    #[arg(long)]
    dataset: Option<PathBuf>,
    /// Restrict to these case ids (repeatable)
    #[arg(long = "case")]
    cases: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an experiment and write the results document
    Run {
        #[command(flatten)]
        args: RunArgs,
        /// Results JSON path (default: <output-dir>/experiment_results_<timestamp>.json)
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long)]
        output_dir: Option<PathBuf>,
        /// Markdown report path (default: stdout)
        #[arg(long)]
        report: Option<PathBuf>,
        /// JSONL trace of every trial
        #[arg(long)]
        trace: Option<PathBuf>,
    },
    /// Analyze a saved results document
    Analyze {
        /// Results JSON (default: newest experiment_results_*.json in --output-dir)
        results: Option<PathBuf>,
        #[arg(long, default_value = ".")]
        output_dir: PathBuf,
        /// Markdown report path (default: stdout)
        #[arg(long)]
        report: Option<PathBuf>,
        /// Structured report JSON path
        #[arg(long)]
        json: Option<PathBuf>,
        /// Disagreement threshold on |judge mean - human|
        #[arg(long, default_value_t = DISAGREEMENT_THRESHOLD, value_parser = parse_threshold)]
        threshold: f64,
    },
    /// Estimate tokens and cost without calling the judge
    Estimate {
        #[command(flatten)]
        args: RunArgs,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// List test cases
    Cases {
        #[arg(long)]
        dataset: Option<PathBuf>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Print the rendered judge prompt for one case
    Prompt {
        #[arg(long)]
        strategy: String,
        #[arg(long = "case")]
        case_id: String,
        #[arg(long)]
        dataset: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_level.as_deref())?;

    match cli.command {
        Commands::Run {
            args,
            out,
            output_dir,
            report,
            trace,
        } => {
            let mut config = resolve_config(&args)?;
            if let Some(dir) = output_dir {
                config.output_dir = dir;
            }
            let dataset = load_dataset(config.dataset.as_deref(), &config.cases)?;

            let adapter = OpenRouterAdapter::from_env()?;
            let gateway =
                ProviderGateway::with_config(adapter, Arc::new(TracingUsageSink), config.gateway_config());

            let (trace_sink, trace_worker) = match trace {
                Some(path) => {
                    let (sink, worker) = JsonlTraceSink::new(path)?;
                    (Some(sink), Some(worker))
                }
                None => (None, None),
            };

            let mut executor = TrialExecutor::new(Arc::new(gateway), config.executor_config());
            if let Some(sink) = &trace_sink {
                executor = executor.with_trace(Arc::new(sink.clone()) as Arc<dyn TraceSink>);
            }

            let cancel = Arc::new(AtomicBool::new(false));
            {
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    if watch_interrupts(tokio::signal::ctrl_c, &cancel).await {
                        std::process::exit(130);
                    }
                });
            }

            let results = executor
                .run_experiment(dataset.cases(), &config.strategies, Some(cancel.as_ref()))
                .await?;

            let out = match out {
                Some(path) => path,
                None => {
                    std::fs::create_dir_all(&config.output_dir)?;
                    config.output_dir.join(results.default_file_name())
                }
            };
            results.save(&out)?;
            info!(path = %out.display(), "results saved");

            drop(executor);
            drop(trace_sink);
            if let Some(worker) = trace_worker {
                if let Err(err) = worker.join() {
                    warn!(error = %err, "trace file is incomplete");
                }
            }

            let markdown = render_report_markdown(&build_report(&results));
            write_or_print(report.as_deref(), &markdown)?;
        }
        Commands::Analyze {
            results,
            output_dir,
            report,
            json,
            threshold,
        } => {
            let path = match results {
                Some(path) => path,
                None => ExperimentResults::latest_in(&output_dir)?.ok_or_else(|| {
                    format!(
                        "no experiment_results_*.json in {}; run an experiment first",
                        output_dir.display()
                    )
                })?,
            };
            info!(path = %path.display(), "loading results");
            let results = ExperimentResults::load(&path)?;
            let analysis = build_report_with_threshold(&results, threshold);
            if let Some(path) = json {
                write_json(&path, &analysis)?;
            }
            write_or_print(report.as_deref(), &render_report_markdown(&analysis))?;
        }
        Commands::Estimate { args, json } => {
            let config = resolve_config(&args)?;
            let dataset = load_dataset(config.dataset.as_deref(), &config.cases)?;
            let estimate = estimate_cost(
                dataset.cases(),
                &config.strategies,
                &StrategyPrompts,
                &config.executor_config(),
            )?;

            if json {
                println!("{}", serde_json::to_string_pretty(&estimate)?);
            } else {
                let mut stdout = io::stdout().lock();
                writeln!(stdout, "Model: {}", estimate.model)?;
                writeln!(stdout, "Trials: {}", estimate.trials)?;
                for s in &estimate.strategies {
                    writeln!(
                        stdout,
                        "  {:<18} trials={:<5} input={:<8} output~{:<8} (max {})",
                        s.strategy,
                        s.trials,
                        s.input_tokens,
                        s.expected_output_tokens,
                        s.max_output_tokens
                    )?;
                }
                writeln!(
                    stdout,
                    "Estimated cost: ${:.4} (worst case ${:.4})",
                    estimate.expected_cost_usd, estimate.max_cost_usd
                )?;
            }
        }
        Commands::Cases {
            dataset,
            category,
            json,
        } => {
            let dataset = load_dataset(dataset.as_deref(), &[])?;
            let cases: Vec<_> = match category.as_deref() {
                Some(cat) => {
                    let known = dataset.categories();
                    if !known.contains(&cat) {
                        return Err(format!(
                            "unknown category '{cat}' (available: {})",
                            known.join(", ")
                        )
                        .into());
                    }
                    dataset.by_category(cat).collect()
                }
                None => dataset.cases().iter().collect(),
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&cases)?);
            } else {
                let mut stdout = io::stdout().lock();
                for case in cases {
                    let truth: Vec<String> =
                        case.ground_truth.iter().map(|(_, v)| v.to_string()).collect();
                    writeln!(
                        stdout,
                        "{:<10} {:<11} [{}] {}",
                        case.id,
                        case.category,
                        truth.join(" "),
                        case.query
                    )?;
                }
            }
        }
        Commands::Prompt {
            strategy,
            case_id,
            dataset,
        } => {
            let dataset = load_dataset(dataset.as_deref(), &[])?;
            let case = dataset
                .cases()
                .iter()
                .find(|c| c.id == case_id)
                .ok_or_else(|| format!("unknown case id '{case_id}'"))?;
            let prompt = StrategyPrompts.render(&strategy, &case.query, &case.response)?;
            println!("--- system ---\n{}\n\n--- user ---\n{}", prompt.system, prompt.user);
        }
    }

    Ok(())
}

fn resolve_config(args: &RunArgs) -> Result<ExperimentConfig, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => ExperimentConfig::load(path)?,
        None => ExperimentConfig::default(),
    };

    if let Some(model) = &args.model {
        config.model = model.clone();
    }
    if let Some(t) = args.temperature {
        config.temperature = t;
    }
    if let Some(max) = args.max_tokens {
        config.max_tokens = max;
    }
    if let Some(trials) = args.trials {
        config.num_trials = trials;
    }
    if let Some(strategies) = &args.strategies {
        config.strategies = strategies.iter().map(|s| s.trim().to_string()).collect();
    }
    if let Some(n) = args.concurrency {
        config.concurrency = n;
    }
    if let Some(path) = &args.dataset {
        config.dataset = Some(path.clone());
    }
    if !args.cases.is_empty() {
        config.cases = args.cases.clone();
    }

    config.validate()?;
    Ok(config)
}

fn load_dataset(
    path: Option<&Path>,
    cases: &[String],
) -> Result<Dataset, Box<dyn std::error::Error>> {
    let dataset = match path {
        Some(path) => Dataset::load(path)?,
        None => Dataset::builtin()?,
    };
    if cases.is_empty() {
        Ok(dataset)
    } else {
        Ok(dataset.select(cases)?)
    }
}

/// Sets `cancel` on the first interrupt. Returns true on the second, when the
/// caller should abort without waiting for in-flight trials.
async fn watch_interrupts<F, Fut>(mut next_interrupt: F, cancel: &AtomicBool) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<()>>,
{
    if next_interrupt().await.is_err() {
        return false;
    }
    warn!("interrupt received; finishing in-flight trials (Ctrl-C again to abort)");
    cancel.store(true, Ordering::Relaxed);

    if next_interrupt().await.is_err() {
        return false;
    }
    warn!("second interrupt; aborting without saving results");
    true
}

fn parse_threshold(s: &str) -> Result<f64, String> {
    let threshold: f64 = s.parse().map_err(|e| format!("{e}"))?;
    if !threshold.is_finite() || threshold < 0.0 {
        return Err(format!("threshold must be a finite number >= 0, got {s}"));
    }
    Ok(threshold)
}

fn write_or_print(path: Option<&Path>, content: &str) -> Result<(), io::Error> {
    match path {
        Some(path) => std::fs::write(path, content),
        None => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(content.as_bytes())
        }
    }
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), io::Error> {
    let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
    std::fs::write(path, json)
}
