//! Structured analysis report and its markdown rendering.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::experiment::ExperimentResults;
use crate::scoring::Dimension;

use super::{
    analyze_accuracy, analyze_categories, analyze_consistency, analyze_trial_outcomes,
    identify_failures, Aggregate, CategoryAccuracy, FailureCase, StrategyAccuracy,
    StrategyConsistency, TrialOutcomeSummary, DISAGREEMENT_THRESHOLD,
};

/// |overall bias| above this is reported as systematic over/underrating.
pub const BIAS_FLAG_THRESHOLD: f64 = 0.3;

/// Disagreements listed in the markdown report.
const FAILURES_SHOWN: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub model: String,
    pub temperature: f32,
    pub strategies: Vec<String>,
    pub num_trials: u32,
    pub num_test_cases: usize,
    pub trials_planned: usize,
    pub trials_recorded: usize,
    pub trials_succeeded: usize,
    pub total_tokens: u64,
    pub estimated_cost_usd: f64,
    pub cancelled: bool,
}

/// One row of the headline table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategySummary {
    pub strategy: String,
    pub mean_variance: Option<f64>,
    pub mae: Option<f64>,
    pub bias: Option<f64>,
    pub exact_agreement: Option<f64>,
    pub success_rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyFinding {
    pub strategy: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryFinding {
    pub category: String,
    pub mae: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BiasDirection {
    Overrates,
    Underrates,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiasFinding {
    pub strategy: String,
    pub bias: f64,
    pub direction: BiasDirection,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyFindings {
    /// Lowest overall mean variance.
    pub most_consistent: Option<StrategyFinding>,
    /// Lowest overall MAE.
    pub most_accurate: Option<StrategyFinding>,
    pub biased_strategies: Vec<BiasFinding>,
    /// Highest pooled category MAE.
    pub hardest_category: Option<CategoryFinding>,
    pub easiest_category: Option<CategoryFinding>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub summary: RunSummary,
    pub strategies: Vec<StrategySummary>,
    pub consistency: Vec<StrategyConsistency>,
    pub accuracy: Vec<StrategyAccuracy>,
    pub categories: Vec<CategoryAccuracy>,
    pub failure_threshold: f64,
    pub failures: Vec<FailureCase>,
    pub outcomes: Vec<TrialOutcomeSummary>,
    pub findings: KeyFindings,
}

pub fn build_report(results: &ExperimentResults) -> AnalysisReport {
    build_report_with_threshold(results, DISAGREEMENT_THRESHOLD)
}

pub fn build_report_with_threshold(results: &ExperimentResults, threshold: f64) -> AnalysisReport {
    let consistency = analyze_consistency(results);
    let accuracy = analyze_accuracy(results);
    let categories = analyze_categories(results);
    let failures = identify_failures(results, threshold);
    let outcomes = analyze_trial_outcomes(results);

    let strategies = results
        .strategies()
        .iter()
        .map(|strategy| {
            let c = consistency.iter().find(|c| &c.strategy == strategy);
            let a = accuracy.iter().find(|a| &a.strategy == strategy);
            let o = outcomes.iter().find(|o| &o.strategy == strategy);
            StrategySummary {
                strategy: strategy.clone(),
                mean_variance: c.and_then(|c| c.overall),
                mae: a.and_then(|a| a.overall_mae),
                bias: a.and_then(|a| a.overall_bias),
                exact_agreement: a.and_then(|a| a.overall_exact_agreement),
                success_rate: o.and_then(|o| o.success_rate),
            }
        })
        .collect::<Vec<_>>();

    let findings = key_findings(&strategies, &categories);

    let m = &results.metadata;
    AnalysisReport {
        summary: RunSummary {
            run_id: m.run_id,
            model: m.model.clone(),
            temperature: m.temperature,
            strategies: m.strategies.clone(),
            num_trials: m.num_trials,
            num_test_cases: m.num_test_cases,
            trials_planned: m.trials_planned,
            trials_recorded: m.trials_recorded,
            trials_succeeded: m.trials_succeeded,
            total_tokens: m.total_tokens,
            estimated_cost_usd: m.estimated_cost_usd,
            cancelled: m.cancelled,
        },
        strategies,
        consistency,
        accuracy,
        categories,
        failure_threshold: threshold,
        failures,
        outcomes,
        findings,
    }
}

/// Lowest value wins; ties go to the earlier entry.
fn lowest<'a, T>(
    items: impl Iterator<Item = &'a T>,
    value: impl Fn(&T) -> Option<f64>,
) -> Option<(&'a T, f64)>
where
    T: 'a,
{
    items
        .filter_map(|item| value(item).map(|v| (item, v)))
        .min_by(|a, b| a.1.total_cmp(&b.1))
}

fn key_findings(strategies: &[StrategySummary], categories: &[CategoryAccuracy]) -> KeyFindings {
    let finding = |(s, value): (&StrategySummary, f64)| StrategyFinding {
        strategy: s.strategy.clone(),
        value,
    };

    let biased_strategies = strategies
        .iter()
        .filter_map(|s| {
            let bias = s.bias?;
            if bias.abs() <= BIAS_FLAG_THRESHOLD {
                return None;
            }
            Some(BiasFinding {
                strategy: s.strategy.clone(),
                bias,
                direction: if bias > 0.0 {
                    BiasDirection::Overrates
                } else {
                    BiasDirection::Underrates
                },
            })
        })
        .collect();

    let category_finding = |(c, mae): (&CategoryAccuracy, f64)| CategoryFinding {
        category: c.category.clone(),
        mae,
    };

    KeyFindings {
        most_consistent: lowest(strategies.iter(), |s| s.mean_variance).map(finding),
        most_accurate: lowest(strategies.iter(), |s| s.mae).map(finding),
        biased_strategies,
        hardest_category: lowest(categories.iter(), |c| c.overall.value.map(|v| -v))
            .map(|(c, v)| category_finding((c, -v))),
        easiest_category: lowest(categories.iter(), |c| c.overall.value).map(category_finding),
    }
}

// =============================================================================
// Markdown
// =============================================================================

fn fmt_opt(value: Option<f64>, precision: usize) -> String {
    match value {
        Some(v) => format!("{v:.precision$}"),
        None => "n/a".to_string(),
    }
}

fn fmt_signed(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{v:+.3}"),
        None => "n/a".to_string(),
    }
}

fn fmt_pct(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:.1}%", v * 100.0),
        None => "n/a".to_string(),
    }
}

/// Value with its coverage when some cells were excluded.
fn fmt_aggregate(agg: &Aggregate) -> String {
    let value = fmt_opt(agg.value, 3);
    if agg.included < agg.expected {
        format!("{value} ({}/{})", agg.included, agg.expected)
    } else {
        value
    }
}

fn dimension_header() -> String {
    Dimension::ALL
        .iter()
        .map(|d| d.as_str())
        .collect::<Vec<_>>()
        .join(" | ")
}

pub fn render_report_markdown(report: &AnalysisReport) -> String {
    let mut out = String::new();
    let s = &report.summary;

    out.push_str("# Autograder Experiment Report\n\n");
    out.push_str(&format!("- Run: `{}`\n", s.run_id));
    out.push_str(&format!("- Judge model: {}\n", s.model));
    out.push_str(&format!("- Temperature: {}\n", s.temperature));
    out.push_str(&format!("- Strategies: {}\n", s.strategies.join(", ")));
    out.push_str(&format!(
        "- Test cases: {} x {} trials\n",
        s.num_test_cases, s.num_trials
    ));
    out.push_str(&format!(
        "- Trials: {} succeeded / {} recorded / {} planned\n",
        s.trials_succeeded, s.trials_recorded, s.trials_planned
    ));
    out.push_str(&format!(
        "- Tokens: {} (estimated cost ${:.4})\n",
        s.total_tokens, s.estimated_cost_usd
    ));
    if s.cancelled {
        out.push_str("- **Run was cancelled; statistics cover a partial run.**\n");
    }

    out.push_str("\n## Summary\n\n");
    out.push_str("| Strategy | Mean variance | MAE | Bias | Agreement | Success rate |\n");
    out.push_str("|---|---|---|---|---|---|\n");
    for row in &report.strategies {
        out.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} |\n",
            row.strategy,
            fmt_opt(row.mean_variance, 3),
            fmt_opt(row.mae, 3),
            fmt_signed(row.bias),
            fmt_pct(row.exact_agreement),
            fmt_pct(row.success_rate),
        ));
    }

    out.push_str("\n## Consistency\n\n");
    out.push_str("Mean sample variance across repeated trials (lower is better).\n\n");
    out.push_str(&format!("| Strategy | {} | overall |\n", dimension_header()));
    out.push_str(&format!("|---|{}---|\n", "---|".repeat(Dimension::ALL.len())));
    for row in &report.consistency {
        let cells: Vec<String> = row
            .dimensions
            .iter()
            .map(|d| fmt_aggregate(&d.mean_variance))
            .collect();
        out.push_str(&format!(
            "| {} | {} | {} |\n",
            row.strategy,
            cells.join(" | "),
            fmt_opt(row.overall, 3)
        ));
    }

    out.push_str("\n## Accuracy\n\n");
    out.push_str("Mean absolute error against human labels (lower is better).\n\n");
    out.push_str(&format!("| Strategy | {} | overall |\n", dimension_header()));
    out.push_str(&format!("|---|{}---|\n", "---|".repeat(Dimension::ALL.len())));
    for row in &report.accuracy {
        let cells: Vec<String> = row.dimensions.iter().map(|d| fmt_aggregate(&d.mae)).collect();
        out.push_str(&format!(
            "| {} | {} | {} |\n",
            row.strategy,
            cells.join(" | "),
            fmt_opt(row.overall_mae, 3)
        ));
    }

    out.push_str("\n### Bias\n\n");
    out.push_str("Judge mean minus human label (positive means the judge overrates).\n\n");
    out.push_str(&format!("| Strategy | {} | overall |\n", dimension_header()));
    out.push_str(&format!("|---|{}---|\n", "---|".repeat(Dimension::ALL.len())));
    for row in &report.accuracy {
        let cells: Vec<String> = row
            .dimensions
            .iter()
            .map(|d| fmt_signed(d.bias))
            .collect();
        out.push_str(&format!(
            "| {} | {} | {} |\n",
            row.strategy,
            cells.join(" | "),
            fmt_signed(row.overall_bias)
        ));
    }

    out.push_str("\n## Trial Outcomes\n\n");
    out.push_str("| Strategy | Planned | Recorded | Succeeded | Parse failures | Request failures |\n");
    out.push_str("|---|---|---|---|---|---|\n");
    for row in &report.outcomes {
        out.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} |\n",
            row.strategy,
            row.planned,
            row.recorded,
            row.succeeded,
            row.parse_failures,
            row.request_failures
        ));
    }
    let codes: Vec<String> = report
        .outcomes
        .iter()
        .flat_map(|o| {
            o.failure_codes
                .iter()
                .map(move |(code, n)| format!("{}: {code} x{n}", o.strategy))
        })
        .collect();
    if !codes.is_empty() {
        out.push_str(&format!("\nFailure codes: {}\n", codes.join(", ")));
    }

    out.push_str("\n## Accuracy by Category\n\n");
    out.push_str(&format!(
        "| Category | Cases | {} | overall |\n",
        report.summary.strategies.join(" | ")
    ));
    out.push_str(&format!(
        "|---|---|{}---|\n",
        "---|".repeat(report.summary.strategies.len())
    ));
    for row in &report.categories {
        let cells: Vec<String> = row.strategies.iter().map(|s| fmt_aggregate(&s.mae)).collect();
        out.push_str(&format!(
            "| {} | {} | {} | {} |\n",
            row.category,
            row.num_cases,
            cells.join(" | "),
            fmt_aggregate(&row.overall)
        ));
    }

    out.push_str(&format!(
        "\n## Disagreements (|judge - human| >= {:.1})\n\n",
        report.failure_threshold
    ));
    if report.failures.is_empty() {
        out.push_str("None.\n");
    } else {
        for f in report.failures.iter().take(FAILURES_SHOWN) {
            out.push_str(&format!(
                "- `{}` ({}) {} / {}: judge {:.2} vs human {} ({:+.2}, {} trials)\n",
                f.case_id,
                f.category,
                f.strategy,
                f.dimension,
                f.judge_mean,
                f.ground_truth,
                f.difference,
                f.successful_trials
            ));
        }
        if report.failures.len() > FAILURES_SHOWN {
            out.push_str(&format!(
                "- ... and {} more\n",
                report.failures.len() - FAILURES_SHOWN
            ));
        }
    }

    out.push_str("\n## Key Findings\n\n");
    let f = &report.findings;
    if let Some(best) = &f.most_consistent {
        out.push_str(&format!(
            "- Most consistent: {} (mean variance {:.3})\n",
            best.strategy, best.value
        ));
    }
    if let Some(best) = &f.most_accurate {
        out.push_str(&format!(
            "- Most accurate: {} (MAE {:.3})\n",
            best.strategy, best.value
        ));
    }
    for b in &f.biased_strategies {
        let verb = match b.direction {
            BiasDirection::Overrates => "overrates",
            BiasDirection::Underrates => "underrates",
        };
        out.push_str(&format!(
            "- {} systematically {verb} (bias {:+.3})\n",
            b.strategy, b.bias
        ));
    }
    if let Some(c) = &f.hardest_category {
        out.push_str(&format!("- Hardest category: {} (MAE {:.3})\n", c.category, c.mae));
    }
    if let Some(c) = &f.easiest_category {
        out.push_str(&format!("- Easiest category: {} (MAE {:.3})\n", c.category, c.mae));
    }
    if f.most_consistent.is_none() && f.most_accurate.is_none() {
        out.push_str("- No successful trials; nothing to compare.\n");
    }

    out
}
