use autograder_harness::analysis::report::{build_report_with_threshold, BiasDirection};
use autograder_harness::analysis::{
    analyze_accuracy, analyze_categories, analyze_consistency, analyze_trial_outcomes,
    build_report, identify_failures, render_report_markdown, DISAGREEMENT_THRESHOLD,
};
use autograder_harness::experiment::{
    ExperimentResults, ResultsBuilder, RunSettings, TrialOutcome, TrialResult,
};
use autograder_harness::scoring::{Dimension, DimensionScores};
use autograder_harness::TestCase;
use uuid::Uuid;

fn case(id: &str, category: &str, truth: u8) -> TestCase {
    TestCase {
        id: id.to_string(),
        category: category.to_string(),
        query: format!("query for {id}"),
        response: format!("response for {id}"),
        ground_truth: DimensionScores::uniform(truth).unwrap(),
        notes: String::new(),
    }
}

fn scored(trial: u32, score: u8) -> TrialResult {
    TrialResult {
        trial,
        outcome: TrialOutcome::Scored {
            scores: DimensionScores::uniform(score).unwrap(),
            raw_response: format!("{{\"correctness\": {score}}}"),
        },
        input_tokens: 100,
        output_tokens: 20,
        cost_nanodollars: 50_000,
        latency_ms: 5,
    }
}

fn parse_failure(trial: u32) -> TrialResult {
    TrialResult {
        trial,
        outcome: TrialOutcome::ParseFailure {
            raw_response: "I would rate this highly.".to_string(),
            reason: "no score block".to_string(),
            reason_code: "no_score_block".to_string(),
        },
        input_tokens: 100,
        output_tokens: 10,
        cost_nanodollars: 40_000,
        latency_ms: 5,
    }
}

fn request_failure(trial: u32) -> TrialResult {
    TrialResult {
        trial,
        outcome: TrialOutcome::RequestFailure {
            error: "rate limited".to_string(),
            error_code: "rate_limited".to_string(),
        },
        input_tokens: 0,
        output_tokens: 0,
        cost_nanodollars: 0,
        latency_ms: 1,
    }
}

/// Three cases, two strategies, two trials each.
///
/// zero_shot scores every case 5. few_shot fails both trials on c1, scores
/// c2 at 3 and c3 at 4 then 5.
fn fixture() -> ExperimentResults {
    let cases = vec![
        case("c1", "factual", 5),
        case("c2", "factual", 1),
        case("c3", "safety", 3),
    ];
    let strategies = vec!["zero_shot".to_string(), "few_shot".to_string()];
    let settings = RunSettings {
        run_id: Uuid::new_v4(),
        model: "anthropic/claude-3-haiku".to_string(),
        temperature: 0.3,
        max_tokens: 1024,
        num_trials: 2,
    };
    let mut builder = ResultsBuilder::new(settings, &cases, &strategies);

    builder.record("c1", "zero_shot", scored(1, 5)).unwrap();
    builder.record("c1", "zero_shot", scored(2, 5)).unwrap();
    builder.record("c2", "zero_shot", scored(2, 5)).unwrap();
    builder.record("c2", "zero_shot", scored(1, 5)).unwrap();
    builder.record("c3", "zero_shot", scored(1, 3)).unwrap();
    builder.record("c3", "zero_shot", scored(2, 3)).unwrap();

    builder.record("c1", "few_shot", request_failure(1)).unwrap();
    builder.record("c1", "few_shot", parse_failure(2)).unwrap();
    builder.record("c2", "few_shot", scored(1, 3)).unwrap();
    builder.record("c2", "few_shot", scored(2, 3)).unwrap();
    builder.record("c3", "few_shot", scored(1, 4)).unwrap();
    builder.record("c3", "few_shot", scored(2, 5)).unwrap();

    builder.finish(false)
}

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

#[test]
fn builder_orders_trials_and_totals_usage() {
    let results = fixture();
    let m = &results.metadata;
    assert_eq!(m.trials_planned, 12);
    assert_eq!(m.trials_recorded, 12);
    assert_eq!(m.trials_succeeded, 10);
    assert_eq!(m.total_input_tokens, 1_100);
    assert_eq!(m.total_output_tokens, 210);
    assert_eq!(m.total_tokens, 1_310);
    assert_eq!(m.total_cost_nanodollars, 540_000);

    let c2 = &results.evaluations[1];
    let indices: Vec<u32> = c2.trials("zero_shot").iter().map(|t| t.trial).collect();
    assert_eq!(indices, vec![1, 2]);
}

#[test]
fn consistency_excludes_cells_without_two_successes() {
    let results = fixture();
    let consistency = analyze_consistency(&results);

    assert_eq!(consistency[0].strategy, "zero_shot");
    assert_eq!(consistency[0].overall, Some(0.0));

    let few = &consistency[1];
    for d in &few.dimensions {
        assert_eq!(d.mean_variance.included, 2);
        assert_eq!(d.mean_variance.expected, 3);
        assert!(approx(d.mean_variance.value.unwrap(), 0.25));
    }
    assert!(approx(few.overall.unwrap(), 0.25));
}

#[test]
fn accuracy_reports_mae_bias_and_agreement() {
    let results = fixture();
    let accuracy = analyze_accuracy(&results);

    let zero = &accuracy[0];
    let correctness = &zero.dimensions[0];
    assert_eq!(correctness.dimension, Dimension::Correctness);
    assert!(approx(correctness.mae.value.unwrap(), 4.0 / 3.0));
    assert_eq!(correctness.mae.included, 3);
    assert!(approx(correctness.bias.unwrap(), 4.0 / 3.0));
    assert!(approx(correctness.exact_agreement.unwrap(), 2.0 / 3.0));

    let few = &accuracy[1];
    assert!(approx(few.overall_mae.unwrap(), 1.75));
    assert!(approx(few.overall_bias.unwrap(), 1.75));
    assert_eq!(few.overall_exact_agreement, Some(0.0));
    assert_eq!(few.dimensions[2].mae.included, 2);
    assert_eq!(few.dimensions[2].mae.excluded(), 1);
}

#[test]
fn strategy_without_any_success_has_no_statistics() {
    let cases = vec![case("c1", "factual", 5)];
    let strategies = vec!["zero_shot".to_string()];
    let settings = RunSettings {
        run_id: Uuid::new_v4(),
        model: "m".to_string(),
        temperature: 0.0,
        max_tokens: 10,
        num_trials: 1,
    };
    let mut builder = ResultsBuilder::new(settings, &cases, &strategies);
    builder.record("c1", "zero_shot", parse_failure(1)).unwrap();
    let results = builder.finish(false);

    let accuracy = analyze_accuracy(&results);
    assert_eq!(accuracy[0].overall_mae, None);
    assert_eq!(accuracy[0].dimensions[0].mae.value, None);
    assert_eq!(accuracy[0].dimensions[0].mae.included, 0);
    assert_eq!(analyze_consistency(&results)[0].overall, None);
    assert!(identify_failures(&results, DISAGREEMENT_THRESHOLD).is_empty());

    let report = build_report(&results);
    assert!(report.findings.most_accurate.is_none());
    let markdown = render_report_markdown(&report);
    assert!(markdown.contains("n/a"));
    assert!(markdown.contains("No successful trials"));
}

#[test]
fn failures_include_threshold_and_sort_by_magnitude() {
    let results = fixture();
    let failures = identify_failures(&results, DISAGREEMENT_THRESHOLD);

    assert_eq!(failures.len(), 10);
    for (f, dimension) in failures[..5].iter().zip(Dimension::ALL) {
        assert_eq!(f.case_id, "c2");
        assert_eq!(f.strategy, "zero_shot");
        assert_eq!(f.dimension, dimension);
        assert_eq!(f.judge_mean, 5.0);
        assert_eq!(f.ground_truth, 1);
        assert_eq!(f.difference, 4.0);
        assert_eq!(f.successful_trials, 2);
    }
    // |3 - 1| sits exactly on the threshold and is kept.
    assert!(failures[5..]
        .iter()
        .all(|f| f.strategy == "few_shot" && f.difference == 2.0));

    assert_eq!(identify_failures(&results, 2.5).len(), 5);
    assert!(identify_failures(&results, 4.5).is_empty());
}

#[test]
fn categories_pool_included_cells() {
    let results = fixture();
    let categories = analyze_categories(&results);

    let names: Vec<&str> = categories.iter().map(|c| c.category.as_str()).collect();
    assert_eq!(names, vec!["factual", "safety"]);

    let factual = &categories[0];
    assert_eq!(factual.num_cases, 2);
    assert!(approx(factual.strategies[0].mae.value.unwrap(), 2.0));
    assert_eq!(factual.strategies[1].mae.included, 5);
    assert_eq!(factual.strategies[1].mae.expected, 10);
    assert!(approx(factual.overall.value.unwrap(), 2.0));
    assert_eq!(factual.overall.included, 15);

    let safety = &categories[1];
    assert!(approx(safety.strategies[1].mae.value.unwrap(), 1.5));
    assert!(approx(safety.overall.value.unwrap(), 0.75));
}

#[test]
fn outcomes_count_failure_codes() {
    let results = fixture();
    let outcomes = analyze_trial_outcomes(&results);

    let few = &outcomes[1];
    assert_eq!(few.planned, 6);
    assert_eq!(few.recorded, 6);
    assert_eq!(few.succeeded, 4);
    assert_eq!(few.parse_failures, 1);
    assert_eq!(few.request_failures, 1);
    assert_eq!(few.failure_codes.get("rate_limited"), Some(&1));
    assert_eq!(few.failure_codes.get("no_score_block"), Some(&1));
    assert!(approx(few.success_rate.unwrap(), 4.0 / 6.0));
    assert_eq!(outcomes[0].success_rate, Some(1.0));
}

#[test]
fn report_findings_and_markdown() {
    let results = fixture();
    let report = build_report(&results);

    let findings = &report.findings;
    assert_eq!(
        findings.most_consistent.as_ref().map(|f| f.strategy.as_str()),
        Some("zero_shot")
    );
    assert_eq!(
        findings.most_accurate.as_ref().map(|f| f.strategy.as_str()),
        Some("zero_shot")
    );
    assert_eq!(findings.biased_strategies.len(), 2);
    assert!(findings
        .biased_strategies
        .iter()
        .all(|b| b.direction == BiasDirection::Overrates));
    assert_eq!(
        findings.hardest_category.as_ref().map(|c| c.category.as_str()),
        Some("factual")
    );
    assert_eq!(
        findings.easiest_category.as_ref().map(|c| c.category.as_str()),
        Some("safety")
    );

    let markdown = render_report_markdown(&report);
    for section in [
        "## Summary",
        "## Consistency",
        "## Accuracy",
        "### Bias",
        "## Trial Outcomes",
        "## Accuracy by Category",
        "## Disagreements",
        "## Key Findings",
    ] {
        assert!(markdown.contains(section), "missing {section}");
    }
    assert!(markdown.contains("(2/3)"));
    assert!(!markdown.contains("more\n"));
    assert!(markdown.contains("zero_shot systematically overrates"));

    let strict = build_report_with_threshold(&results, 3.0);
    assert_eq!(strict.failure_threshold, 3.0);
    assert_eq!(strict.failures.len(), 5);
}

fn single_strategy(cases: &[TestCase], trials: &[(&str, Vec<DimensionScores>)]) -> ExperimentResults {
    let strategies = vec!["zero_shot".to_string()];
    let num_trials = trials.iter().map(|(_, s)| s.len()).max().unwrap_or(1) as u32;
    let settings = RunSettings {
        run_id: Uuid::new_v4(),
        model: "anthropic/claude-3-haiku".to_string(),
        temperature: 0.3,
        max_tokens: 1024,
        num_trials,
    };
    let mut builder = ResultsBuilder::new(settings, cases, &strategies);
    for (case_id, scores) in trials {
        for (i, scores) in scores.iter().enumerate() {
            let mut result = scored(i as u32 + 1, 1);
            result.outcome = TrialOutcome::Scored {
                scores: *scores,
                raw_response: String::new(),
            };
            builder.record(case_id, "zero_shot", result).unwrap();
        }
    }
    builder.finish(false)
}

#[test]
fn exact_agreement_rounds_half_points_away_from_zero() {
    let cases = vec![case("c1", "factual", 5), case("c2", "factual", 2)];
    let uniform = |s| DimensionScores::uniform(s).unwrap();
    // c1: mean 4.5 rounds to 5 and agrees. c2: mean 2.5 rounds to 3 and does not.
    let results = single_strategy(
        &cases,
        &[
            ("c1", vec![uniform(4), uniform(5)]),
            ("c2", vec![uniform(2), uniform(3)]),
        ],
    );

    let accuracy = analyze_accuracy(&results);
    for d in &accuracy[0].dimensions {
        assert_eq!(d.exact_agreement, Some(0.5));
        assert!(approx(d.mae.value.unwrap(), 0.5));
        assert_eq!(d.bias, Some(0.0));
    }
    assert_eq!(accuracy[0].overall_exact_agreement, Some(0.5));
}

#[test]
fn accuracy_ignores_trial_order_within_a_cell() {
    let cases = vec![case("c1", "factual", 4), case("c2", "safety", 2)];
    let a = DimensionScores::new(2, 5, 3, 4, 1).unwrap();
    let b = DimensionScores::new(5, 3, 3, 1, 4).unwrap();
    let c = DimensionScores::new(3, 2, 5, 5, 2).unwrap();
    let d = DimensionScores::new(1, 1, 2, 3, 5).unwrap();

    let forward = single_strategy(
        &cases,
        &[("c1", vec![a, b, c]), ("c2", vec![d, a, b])],
    );
    let shuffled = single_strategy(
        &cases,
        &[("c1", vec![c, a, b]), ("c2", vec![b, d, a])],
    );

    assert_ne!(
        forward.evaluations[0].trials("zero_shot"),
        shuffled.evaluations[0].trials("zero_shot")
    );
    let forward_accuracy = analyze_accuracy(&forward);
    assert_eq!(forward_accuracy, analyze_accuracy(&shuffled));
    assert!(forward_accuracy[0].overall_bias.unwrap() != 0.0);
    assert_eq!(
        identify_failures(&forward, DISAGREEMENT_THRESHOLD),
        identify_failures(&shuffled, DISAGREEMENT_THRESHOLD)
    );
}
