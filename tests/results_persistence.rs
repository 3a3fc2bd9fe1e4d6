use autograder_harness::analysis::build_report;
use autograder_harness::experiment::{
    ExperimentResults, ResultsBuilder, ResultsError, RunSettings, TrialOutcome, TrialResult,
};
use autograder_harness::scoring::DimensionScores;
use autograder_harness::Dataset;
use serde_json::json;
use uuid::Uuid;

fn scored(trial: u32, scores: DimensionScores) -> TrialResult {
    TrialResult {
        trial,
        outcome: TrialOutcome::Scored {
            scores,
            raw_response: "Reasoning...\n{\"correctness\": 4}".to_string(),
        },
        input_tokens: 812,
        output_tokens: 143,
        cost_nanodollars: 381_750,
        latency_ms: 1_204,
    }
}

fn sample_results() -> ExperimentResults {
    let cases: Vec<_> = Dataset::builtin()
        .unwrap()
        .into_cases()
        .into_iter()
        .take(3)
        .collect();
    let strategies = vec!["zero_shot".to_string(), "chain_of_thought".to_string()];
    let settings = RunSettings {
        run_id: Uuid::new_v4(),
        model: "anthropic/claude-3-haiku".to_string(),
        temperature: 0.3,
        max_tokens: 1024,
        num_trials: 2,
    };
    let mut builder = ResultsBuilder::new(settings, &cases, &strategies);

    for case in &cases {
        builder
            .record(&case.id, "zero_shot", scored(1, case.ground_truth))
            .unwrap();
        builder
            .record(
                &case.id,
                "zero_shot",
                scored(2, DimensionScores::new(4, 4, 3, 5, 5).unwrap()),
            )
            .unwrap();
        builder
            .record(
                &case.id,
                "chain_of_thought",
                TrialResult {
                    trial: 1,
                    outcome: TrialOutcome::ParseFailure {
                        raw_response: "{\"correctness\": 4.5}".to_string(),
                        reason: "non-integer score for 'correctness': 4.5".to_string(),
                        reason_code: "non_integer_score".to_string(),
                    },
                    input_tokens: 900,
                    output_tokens: 300,
                    cost_nanodollars: 600_000,
                    latency_ms: 2_000,
                },
            )
            .unwrap();
    }

    builder.finish(true)
}

#[test]
fn saved_document_loads_back_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let results = sample_results();
    let path = dir.path().join(results.default_file_name());

    results.save(&path).unwrap();
    let loaded = ExperimentResults::load(&path).unwrap();

    assert_eq!(loaded, results);
    assert!(loaded.metadata.cancelled);
    assert_eq!(loaded.metadata.trials_recorded, 9);
    assert_eq!(loaded.metadata.trials_planned, 12);
    assert_eq!(build_report(&loaded), build_report(&results));
}

#[test]
fn document_layout_is_stable() {
    let results = sample_results();
    let value: serde_json::Value = serde_json::from_str(&results.to_json_pretty().unwrap()).unwrap();

    let metadata = &value["metadata"];
    assert_eq!(metadata["model"], "anthropic/claude-3-haiku");
    assert_eq!(metadata["num_trials"], 2);
    assert_eq!(metadata["strategies"], json!(["zero_shot", "chain_of_thought"]));

    let first = &value["evaluations"][0];
    assert_eq!(first["id"], "fact_01");
    assert_eq!(first["category"], "factual");
    assert_eq!(first["ground_truth"]["correctness"], 5);

    let trial = &first["results"]["zero_shot"][1];
    assert_eq!(trial["trial"], 2);
    assert_eq!(trial["status"], "scored");
    assert_eq!(trial["scores"]["conciseness"], 3);

    let failed = &first["results"]["chain_of_thought"][0];
    assert_eq!(failed["status"], "parse_failure");
    assert_eq!(failed["reason_code"], "non_integer_score");
    assert!(failed.get("scores").is_none());
}

#[test]
fn load_rejects_inconsistent_documents() {
    let results = sample_results();
    let base = serde_json::to_value(&results).unwrap();

    let mut bad_index = base.clone();
    bad_index["evaluations"][0]["results"]["zero_shot"][0]["trial"] = json!(7);
    assert!(matches!(
        ExperimentResults::from_json(&bad_index.to_string()),
        Err(ResultsError::Integrity { .. })
    ));

    let mut unknown_strategy = base.clone();
    let trials = unknown_strategy["evaluations"][0]["results"]["zero_shot"].clone();
    unknown_strategy["evaluations"][0]["results"]["socratic"] = trials;
    assert!(matches!(
        ExperimentResults::from_json(&unknown_strategy.to_string()),
        Err(ResultsError::Integrity { .. })
    ));

    let mut duplicate = base.clone();
    let first = duplicate["evaluations"][0].clone();
    duplicate["evaluations"][1] = first;
    assert!(matches!(
        ExperimentResults::from_json(&duplicate.to_string()),
        Err(ResultsError::Integrity { .. })
    ));

    let mut out_of_range = base;
    out_of_range["evaluations"][2]["results"]["zero_shot"][1]["scores"]["safety"] = json!(6);
    assert!(matches!(
        ExperimentResults::from_json(&out_of_range.to_string()),
        Err(ResultsError::Json(_))
    ));
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        ExperimentResults::load(dir.path().join("absent.json")),
        Err(ResultsError::Io(_))
    ));
}

#[test]
fn latest_in_picks_most_recently_written_results() {
    let dir = tempfile::tempdir().unwrap();
    assert_eq!(ExperimentResults::latest_in(dir.path()).unwrap(), None);

    let results = sample_results();
    let older = dir.path().join("experiment_results_20991231_235959.json");
    let newer = dir.path().join("experiment_results_20240101_000000.json");
    results.save(&older).unwrap();
    results.save(&newer).unwrap();
    std::fs::write(dir.path().join("notes.json"), "{}").unwrap();

    let old_time = std::time::UNIX_EPOCH + std::time::Duration::from_secs(1_000_000);
    std::fs::File::options()
        .write(true)
        .open(&older)
        .unwrap()
        .set_modified(old_time)
        .unwrap();

    assert_eq!(ExperimentResults::latest_in(dir.path()).unwrap(), Some(newer));
}
