use std::process::{Command, Output};

use autograder_harness::experiment::{
    ExperimentResults, ResultsBuilder, RunSettings, TrialOutcome, TrialResult,
};
use autograder_harness::scoring::DimensionScores;
use autograder_harness::Dataset;
use serde_json::{json, Value};
use tempfile::tempdir;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn autograder(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_autograder"))
        .args(args)
        .env_remove("RUST_LOG")
        .env_remove("AUTOGRADER_LOG")
        .output()
        .unwrap()
}

fn stdout(output: &Output) -> String {
    assert!(
        output.status.success(),
        "command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8(output.stdout.clone()).unwrap()
}

#[test]
fn cases_lists_builtin_dataset_as_json() {
    let out = stdout(&autograder(&["cases", "--json"]));
    let cases: Vec<Value> = serde_json::from_str(&out).unwrap();
    assert_eq!(cases.len(), Dataset::builtin().unwrap().len());
    assert_eq!(cases[0]["id"], "fact_01");
    assert_eq!(cases[0]["ground_truth"]["safety"], 5);
}

#[test]
fn cases_filters_by_category() {
    let out = stdout(&autograder(&["cases", "--category", "factual"]));
    assert!(!out.is_empty());
    assert!(out.lines().all(|line| line.contains("factual")));
}

#[test]
fn prompt_renders_strategy_for_case() {
    let out = stdout(&autograder(&[
        "prompt",
        "--strategy",
        "few_shot",
        "--case",
        "fact_01",
    ]));
    assert!(out.contains("--- system ---"));
    assert!(out.contains("--- user ---"));
    assert!(out.contains("What is the capital of France?"));
    assert!(out.contains("\"correctness\""));
}

#[test]
fn unknown_strategy_fails() {
    let output = autograder(&["prompt", "--strategy", "socratic", "--case", "fact_01"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("socratic"));
}

#[test]
fn estimate_reports_json_totals() {
    let out = stdout(&autograder(&[
        "estimate",
        "--json",
        "--trials",
        "2",
        "--strategies",
        "zero_shot,chain_of_thought",
        "--case",
        "fact_01",
        "--case",
        "fact_02",
    ]));
    let estimate: Value = serde_json::from_str(&out).unwrap();
    assert_eq!(estimate["model"], "anthropic/claude-3-haiku");
    assert_eq!(estimate["trials"], 8);
    assert_eq!(estimate["strategies"].as_array().unwrap().len(), 2);
    assert_eq!(estimate["strategies"][1]["strategy"], "chain_of_thought");
    assert!(estimate["input_tokens"].as_u64().unwrap() > 0);
}

#[test]
fn analyze_writes_markdown_and_json_report() {
    let dir = tempdir().unwrap();
    let cases: Vec<_> = Dataset::builtin()
        .unwrap()
        .into_cases()
        .into_iter()
        .take(2)
        .collect();
    let strategies = vec!["zero_shot".to_string()];
    let settings = RunSettings {
        run_id: Uuid::new_v4(),
        model: "anthropic/claude-3-haiku".to_string(),
        temperature: 0.3,
        max_tokens: 1024,
        num_trials: 1,
    };
    let mut builder = ResultsBuilder::new(settings, &cases, &strategies);
    for case in &cases {
        builder
            .record(
                &case.id,
                "zero_shot",
                TrialResult {
                    trial: 1,
                    outcome: TrialOutcome::Scored {
                        scores: DimensionScores::uniform(1).unwrap(),
                        raw_response: String::new(),
                    },
                    input_tokens: 10,
                    output_tokens: 5,
                    cost_nanodollars: 100,
                    latency_ms: 1,
                },
            )
            .unwrap();
    }
    let results = builder.finish(false);
    let results_path = dir.path().join("results.json");
    results.save(&results_path).unwrap();

    let report_path = dir.path().join("report.md");
    let json_path = dir.path().join("report.json");
    stdout(&autograder(&[
        "analyze",
        results_path.to_str().unwrap(),
        "--report",
        report_path.to_str().unwrap(),
        "--json",
        json_path.to_str().unwrap(),
    ]));

    let markdown = std::fs::read_to_string(&report_path).unwrap();
    assert!(markdown.contains("# Autograder Experiment Report"));
    assert!(markdown.contains("## Disagreements"));

    let report: Value = serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
    assert_eq!(report["failure_threshold"], 2.0);
    // fact_01 and fact_02 are mostly 5s; a judge scoring all 1s disagrees widely.
    assert!(!report["failures"].as_array().unwrap().is_empty());
    assert_eq!(report["findings"]["biased_strategies"][0]["direction"], "underrates");

    // Without a path, the newest experiment_results_*.json in --output-dir is used.
    results
        .save(dir.path().join(results.default_file_name()))
        .unwrap();
    let out = stdout(&autograder(&[
        "analyze",
        "--output-dir",
        dir.path().to_str().unwrap(),
    ]));
    assert!(out.contains("# Autograder Experiment Report"));

    let empty = tempdir().unwrap();
    let output = autograder(&["analyze", "--output-dir", empty.path().to_str().unwrap()]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("no experiment_results_"));

    for bad in ["--threshold=-1", "--threshold=NaN"] {
        let output = autograder(&["analyze", results_path.to_str().unwrap(), bad]);
        assert!(!output.status.success(), "{bad} was accepted");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn run_against_mock_judge_writes_results_and_trace() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "message": {
                    "content": "{\"correctness\": 5, \"completeness\": 5, \"conciseness\": 4, \"naturalness\": 5, \"safety\": 5}"
                },
                "finish_reason": "stop"
            }],
            "usage": { "prompt_tokens": 300, "completion_tokens": 40 }
        })))
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let results_path = dir.path().join("results.json");
    let report_path = dir.path().join("report.md");
    let trace_path = dir.path().join("trace.jsonl");
    let base_url = server.uri();

    let args: Vec<String> = vec![
        "run".into(),
        "--case".into(),
        "fact_01".into(),
        "--case".into(),
        "fact_03".into(),
        "--trials".into(),
        "2".into(),
        "--strategies".into(),
        "zero_shot".into(),
        "--out".into(),
        results_path.display().to_string(),
        "--report".into(),
        report_path.display().to_string(),
        "--trace".into(),
        trace_path.display().to_string(),
    ];
    let output = tokio::task::spawn_blocking(move || {
        Command::new(env!("CARGO_BIN_EXE_autograder"))
            .args(&args)
            .env("OPENROUTER_API_KEY", "sk-test")
            .env("OPENROUTER_BASE_URL", base_url)
            .env_remove("RUST_LOG")
            .env_remove("AUTOGRADER_LOG")
            .output()
            .unwrap()
    })
    .await
    .unwrap();
    stdout(&output);

    assert_eq!(server.received_requests().await.unwrap().len(), 4);

    let results = ExperimentResults::load(&results_path).unwrap();
    assert_eq!(results.metadata.trials_recorded, 4);
    assert_eq!(results.metadata.trials_succeeded, 4);
    assert_eq!(results.metadata.total_tokens, 4 * 340);
    assert!(!results.metadata.cancelled);

    let trace = std::fs::read_to_string(&trace_path).unwrap();
    assert_eq!(trace.lines().count(), 4);

    let markdown = std::fs::read_to_string(&report_path).unwrap();
    assert!(markdown.contains("## Key Findings"));
}
