//! Loading config files from disk and turning them into a running pipeline.

mod common;

use std::sync::Arc;

use common::{caller, ConfigBuilder, SchemaMappingBuilder, TestHarness};
use datamill::catalog::PiiStrategy;
use datamill::config::load_config;
use datamill::error::ConfigError;
use datamill::job::{JobStatus, OutputFormat};
use datamill::pipeline::pii::PiiKind;
use datamill::pipeline::{Pipeline, PipelineConfig};
use datamill::worker::InlineDispatcher;

#[test]
fn test_load_json_config_with_defaults() {
    let harness = TestHarness::new();
    let output = harness.output_dir.to_string_lossy().into_owned();
    let path = harness.config_dir.join("datamill.json");
    std::fs::write(&path, ConfigBuilder::new(&output).build_string()).unwrap();

    let config = load_config(&path).unwrap();
    assert_eq!(config.version, "1.0");
    assert_eq!(config.output_directory, output);
    assert!(config.worker_count >= 1);
    assert_eq!(config.queue_capacity, 64);
    assert_eq!(config.logs_page_size, 50);
    assert_eq!(config.logging.level, "info");
    assert_eq!(config.pii.mask, "[REDACTED]");

    let pipeline_config = PipelineConfig::from_config(&config);
    assert_eq!(pipeline_config.output_directory, harness.output_dir);
    assert_eq!(pipeline_config.pii_detectors, PiiKind::ALL.to_vec());
}

#[test]
fn test_load_yaml_config() {
    let harness = TestHarness::new();
    let output = harness.output_dir.to_string_lossy().into_owned();
    let db_path = harness.temp_path().join("jobs.db");
    let doc = ConfigBuilder::new(&output)
        .database_path(&db_path.to_string_lossy())
        .worker_count(3)
        .logs_page_size(25)
        .logging("debug", true)
        .pii("***", &["email", "ssn"]);
    let path = harness.config_dir.join("datamill.yaml");
    std::fs::write(&path, doc.build_yaml()).unwrap();

    let config = load_config(&path).unwrap();
    assert_eq!(config.worker_count, 3);
    assert_eq!(config.logs_page_size, 25);
    assert!(config.logging.json);
    assert_eq!(config.database_path(), Some(db_path));

    let pipeline_config = PipelineConfig::from_config(&config);
    assert_eq!(pipeline_config.pii_mask, "***");
    assert_eq!(
        pipeline_config.pii_detectors,
        vec![PiiKind::Email, PiiKind::Ssn]
    );
}

#[test]
fn test_invalid_configs_are_rejected() {
    let harness = TestHarness::new();
    let output = harness.output_dir.to_string_lossy().into_owned();

    let cases = [
        ("bad-version.json", ConfigBuilder::new(&output).version("2.0")),
        ("no-workers.json", ConfigBuilder::new(&output).worker_count(0)),
        ("big-page.json", ConfigBuilder::new(&output).logs_page_size(500)),
        (
            "bad-detector.json",
            ConfigBuilder::new(&output).pii("[X]", &["passport"]),
        ),
    ];

    for (name, doc) in cases {
        let path = harness.config_dir.join(name);
        std::fs::write(&path, doc.build_string()).unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(
            matches!(
                err,
                ConfigError::SchemaValidation { .. } | ConfigError::Validation { .. }
            ),
            "{}: unexpected error {}",
            name,
            err
        );
    }

    let missing = load_config(harness.config_dir.join("absent.json")).unwrap_err();
    assert!(matches!(missing, ConfigError::ReadFile { .. }));
}

#[test]
fn test_config_drives_pipeline_masking() {
    let harness = TestHarness::new();
    harness.seed_source(
        "people.jsonl",
        "{\"name\":\"Ada\",\"note\":\"mail ada@example.com\"}\n",
        SchemaMappingBuilder::new("map-1")
            .field("name")
            .field("note")
            .pii_field("name", "initials", PiiStrategy::Mask)
            .detect_pii(true),
    );

    let output = harness.output_dir.to_string_lossy().into_owned();
    let path = harness.config_dir.join("datamill.json");
    std::fs::write(
        &path,
        ConfigBuilder::new(&output)
            .pii("<hidden>", &["email"])
            .build_string(),
    )
    .unwrap();
    let config = load_config(&path).unwrap();

    let pipeline = Arc::new(Pipeline::from_config(
        harness.store.clone(),
        harness.catalog.clone(),
        &PipelineConfig::from_config(&config),
    ));
    let controller = harness.controller(Arc::new(InlineDispatcher::new(pipeline)));
    let job = harness.create_job(&controller, OutputFormat::Jsonl, "masked");

    let stored = controller.get_job(&caller(), &job.id).unwrap().job;
    assert_eq!(stored.status, JobStatus::Completed);
    assert_eq!(stored.pii_detected_count, Some(2));

    let dataset = controller.get_dataset(&caller(), &job.id).unwrap().dataset;
    let written = std::fs::read_to_string(&dataset.file_path).unwrap();
    assert_eq!(
        written,
        "{\"name\":\"Ada\",\"note\":\"mail <hidden>\",\"initials\":\"<hidden>\"}\n"
    );
}
