// tests/pipeline_tests.rs
//
// Integration tests for run collection, completion filtering, seed aggregation
// and the end-to-end results pipeline.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use proptest::prelude::*;
use serde_json::json;
use strata::collect::{RunFormat, KEYSPACE_FILE};
use strata::pipeline::MANIFEST_FILE;
use strata::{
    aggregate, filter_complete, pivot, process_results, AggregateOptions, Category, ColumnSchema,
    CountingObserver, DimensionSpec, Error, GroupKey, Keyspace, LongRow, Measure, MetricRecorder,
    OutputFormat, PopulationSnapshot, PopulationStratifier, Predicate, ProcessOptions,
    ResultsConfig, RunIdentity, RunRecord, RunWriter, Source, StepDriver, StratificationRegistry,
    Target, Weight,
};
use tempfile::TempDir;

fn rec(draw: u64, seed: u64, scenario: &str, values: &[(&str, f64)]) -> RunRecord {
    RunRecord::new(
        RunIdentity::new(draw, seed, scenario),
        values.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
    )
}

fn small_config() -> ResultsConfig {
    let mut cfg = ResultsConfig::default();
    cfg.domains.insert("YEAR".into(), vec!["2022".into()]);
    cfg.stratification = vec![DimensionSpec::new("wasting_state", &["cat1", "cat2"])];
    cfg
}

#[test]
fn incomplete_seed_is_dropped_from_every_scenario_of_its_draw() {
    let keyspace = Keyspace::declare(
        vec![0, 1],
        vec![10, 20],
        vec!["baseline".into(), "intervention".into()],
    )
    .unwrap();
    let records = vec![
        rec(0, 10, "baseline", &[]),
        rec(0, 20, "baseline", &[]),
        rec(0, 10, "intervention", &[]),
        rec(1, 10, "baseline", &[]),
        rec(1, 20, "baseline", &[]),
        rec(1, 10, "intervention", &[]),
        rec(1, 20, "intervention", &[]),
    ];

    let kept = filter_complete(records, &keyspace);
    let ids: Vec<_> = kept
        .iter()
        .map(|r| (r.identity.input_draw, r.identity.random_seed, r.identity.scenario.as_str()))
        .collect();
    assert_eq!(
        ids,
        vec![
            (0, 10, "baseline"),
            (0, 10, "intervention"),
            (1, 10, "baseline"),
            (1, 20, "baseline"),
            (1, 10, "intervention"),
            (1, 20, "intervention"),
        ]
    );
}

#[test]
fn draw_without_surviving_seeds_yields_no_rows() {
    let keyspace =
        Keyspace::declare(vec![0], vec![1], vec!["a".into(), "b".into()]).unwrap();
    let kept = filter_complete(vec![rec(0, 1, "a", &[("x", 1.0)])], &keyspace);
    assert!(kept.is_empty());
    let wide = aggregate(&kept, &AggregateOptions::default());
    assert!(wide.is_empty());
}

#[test]
fn single_run_is_stamped_and_processed() {
    let tmp = TempDir::new().unwrap();
    let cfg = small_config();
    let path = tmp.path().join("output.json");
    fs::write(
        &path,
        serde_json::to_vec(&json!({
            "total_population": 10,
            "total_population_living": 9,
            "total_population_dead": 1,
        }))
        .unwrap(),
    )
    .unwrap();

    let options = ProcessOptions {
        single_run: true,
        ..ProcessOptions::default()
    };
    let (data, summary) = process_results(&path, &cfg, &options).unwrap();
    assert_eq!(summary.loaded, 1);
    assert_eq!(summary.kept, 1);

    let population = data.get(Measure::Population).unwrap();
    assert_eq!(population.len(), 3);
    assert!(population
        .rows
        .iter()
        .all(|r| r.input_draw == 0 && r.scenario == cfg.baseline_scenario));
    assert_eq!(population.total(&[("measure", "total_population_living")]), 9.0);
}

#[test]
fn corrupt_runs_are_skipped_but_missing_keyspace_is_fatal() {
    let tmp = TempDir::new().unwrap();
    let cfg = small_config();
    fs::write(tmp.path().join("bad.json"), "{ not json").unwrap();
    fs::write(
        tmp.path().join("good.json"),
        serde_json::to_vec(&json!({
            "input_draw": 3, "random_seed": 1, "scenario": "baseline", "total_population": 5
        }))
        .unwrap(),
    )
    .unwrap();

    let err = process_results(tmp.path(), &cfg, &ProcessOptions::default()).unwrap_err();
    assert!(matches!(err, Error::IncompleteKeyspace(_)));

    fs::write(
        tmp.path().join(KEYSPACE_FILE),
        "input_draw: [3]\nrandom_seed: [1]\nscenario: [baseline]\n",
    )
    .unwrap();
    let (data, summary) = process_results(tmp.path(), &cfg, &ProcessOptions::default()).unwrap();
    assert_eq!(summary.files, 2);
    assert_eq!(summary.skipped.len(), 1);
    assert!(summary.skipped[0].path.ends_with("bad.json"));
    assert_eq!(
        data.get(Measure::Population)
            .unwrap()
            .total(&[("measure", "total_population")]),
        5.0
    );
}

fn runtime_driver(cfg: &ResultsConfig) -> StepDriver {
    let schema = Arc::new(ColumnSchema::new(cfg).unwrap());
    let mut reg = StratificationRegistry::new();
    reg.register(
        "wasting_state",
        vec![Category::equals("cat1"), Category::equals("cat2")],
        Source::column("child_wasting"),
    )
    .unwrap();

    let mut driver = StepDriver::new(
        PopulationStratifier::new(reg),
        MetricRecorder::new(schema),
        0.25,
    );
    driver.add_observer(
        CountingObserver::new("deaths", Target::Measure(Measure::Deaths))
            .bind("CAUSE_OF_DEATH", "cause_of_death")
            .bind_fixed("YEAR", "2022")
            .bind("SEX", "sex")
            .bind("AGE_GROUP", "age_group")
            .filter("alive", Predicate::Equals("dead".into())),
    );
    driver.add_observer(
        CountingObserver::new("yll", Target::Standard("years_of_life_lost".into()))
            .filter("alive", Predicate::Equals("dead".into()))
            .weight(Weight::Column("yll".into())),
    );
    driver
}

fn snapshot() -> PopulationSnapshot {
    PopulationSnapshot::new(vec![1, 2, 3])
        .with_column("sex", ["female", "male", "female"])
        .unwrap()
        .with_column("age_group", ["1_to_4", "post_neonatal", "1_to_4"])
        .unwrap()
        .with_column("child_wasting", ["cat1", "cat2", "cat2"])
        .unwrap()
        .with_column("alive", ["dead", "alive", "dead"])
        .unwrap()
        .with_column("cause_of_death", ["measles", "not_dead", "measles"])
        .unwrap()
        .with_column("yll", [70.0, 0.0, 69.0])
        .unwrap()
}

#[test]
fn runtime_metrics_flow_through_to_long_tables() {
    let tmp = TempDir::new().unwrap();
    let runs = tmp.path().join("runs");
    let cfg = small_config();

    let keyspace =
        Keyspace::declare(vec![7], vec![0, 1], vec!["baseline".into()]).unwrap();
    fs::create_dir_all(&runs).unwrap();
    keyspace.write_yaml_file(runs.join(KEYSPACE_FILE)).unwrap();

    for seed in [0, 1] {
        let mut driver = runtime_driver(&cfg);
        driver.on_time_step(0, &snapshot()).unwrap();
        let metrics = driver.recorder().metrics();
        RunWriter::new(RunFormat::MessagePack)
            .write(&runs, &RunIdentity::new(7, seed, "baseline"), &metrics)
            .unwrap();
    }

    let out = tmp.path().join("out");
    let options = ProcessOptions {
        exclude: Some(out.clone()),
        ..ProcessOptions::default()
    };
    let (data, summary) = process_results(&runs, &cfg, &options).unwrap();
    assert_eq!(summary.kept, 2);

    let deaths = data.get(Measure::Deaths).unwrap();
    assert_eq!(
        deaths.total(&[("cause", "measles"), ("wasting_state", "cat2")]),
        2.0
    );
    assert_eq!(
        deaths.total(&[("cause", "measles"), ("wasting_state", "cat1")]),
        2.0
    );
    assert_eq!(deaths.total(&[("sex", "male")]), 0.0);
    assert_eq!(deaths.total(&[]), 4.0);

    let manifest = data.dump(&out, OutputFormat::Json).unwrap();
    assert!(out.join(MANIFEST_FILE).exists());
    let written: Vec<LongRow> =
        serde_json::from_slice(&fs::read(out.join("deaths.json")).unwrap()).unwrap();
    assert_eq!(written, deaths.rows);
    assert_eq!(manifest.tables.len(), data.len());
}

fn write_records(dir: &Path, records: &[RunRecord]) {
    let writer = RunWriter::new(RunFormat::Json);
    for r in records {
        writer.write(dir, &r.identity, &r.values).unwrap();
    }
}

#[test]
fn processing_is_independent_of_file_layout() {
    let cfg = small_config();
    let schema = ColumnSchema::new(&cfg).unwrap();
    let column = schema.columns_for(Measure::LiveBirthsCount).unwrap()[0].clone();
    let records: Vec<RunRecord> = (0..4)
        .map(|seed| rec(2, seed, "baseline", &[(column.as_str(), seed as f64 + 1.0)]))
        .collect();
    let keyspace = "input_draw: [2]\nrandom_seed: [0, 1, 2, 3]\nscenario: [baseline]\n";

    let flat = TempDir::new().unwrap();
    write_records(flat.path(), &records);
    fs::write(flat.path().join(KEYSPACE_FILE), keyspace).unwrap();

    let nested = TempDir::new().unwrap();
    for (i, r) in records.iter().enumerate() {
        let dir = nested.path().join(format!("shard_{}", i % 2));
        write_records(&dir, std::slice::from_ref(r));
    }
    fs::write(nested.path().join(KEYSPACE_FILE), keyspace).unwrap();

    let (a, _) = process_results(flat.path(), &cfg, &ProcessOptions::default()).unwrap();
    let (b, _) = process_results(nested.path(), &cfg, &ProcessOptions::default()).unwrap();
    let births_a = a.get(Measure::LiveBirthsCount).unwrap();
    let births_b = b.get(Measure::LiveBirthsCount).unwrap();
    assert_eq!(births_a, births_b);
    assert_eq!(births_a.total(&[]), 10.0);
}

fn record_strategy() -> impl Strategy<Value = Vec<RunRecord>> {
    prop::collection::vec(
        (0_u64..3, 0_u64..4, prop::bool::ANY, 0_u32..50, 0_u32..50),
        0..24,
    )
    .prop_map(|rows| {
        rows.into_iter()
            .map(|(draw, seed, b, x, y)| {
                let scenario = if b { "baseline" } else { "intervention" };
                rec(draw, seed, scenario, &[("x", x as f64), ("y", y as f64)])
            })
            .collect()
    })
}

proptest! {
    #[test]
    fn filtering_twice_changes_nothing(records in record_strategy()) {
        let keyspace = Keyspace::declare(
            vec![0, 1, 2],
            vec![0, 1, 2, 3],
            vec!["baseline".into(), "intervention".into()],
        )
        .unwrap();
        let once = filter_complete(records, &keyspace);
        let twice = filter_complete(once.clone(), &keyspace);
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn summing_seed_subsets_matches_summing_all(
        records in record_strategy(),
        split in 0_usize..24,
    ) {
        let split = split.min(records.len());
        let (left, right) = records.split_at(split);
        let opts = AggregateOptions::default();

        let whole = aggregate(&records, &opts);
        let a = aggregate(left, &opts);
        let b = aggregate(right, &opts);

        for (key, row) in whole.rows() {
            for (column, total) in row {
                let part = |t: &strata::WideTable, k: &GroupKey| {
                    t.get(k).and_then(|r| r.get(column)).copied().unwrap_or(0.0)
                };
                prop_assert_eq!(*total, part(&a, key) + part(&b, key));
            }
        }
    }

    #[test]
    fn pivot_rows_equal_wide_rows_times_columns(
        records in record_strategy(),
        disaggregate in prop::bool::ANY,
    ) {
        let wide = aggregate(&records, &AggregateOptions::new(disaggregate, Vec::new()));
        prop_assert_eq!(pivot(&wide).len(), wide.len() * wide.value_columns().len());
    }
}

#[test]
fn reversed_load_order_gives_identical_aggregate() {
    let records: Vec<RunRecord> = (0..6)
        .map(|i| rec(i % 2, i, "baseline", &[("x", i as f64)]))
        .collect();
    let mut reversed = records.clone();
    reversed.reverse();
    let map = |w: &strata::WideTable| -> BTreeMap<GroupKey, BTreeMap<String, f64>> {
        w.rows().clone()
    };
    assert_eq!(
        map(&aggregate(&records, &AggregateOptions::default())),
        map(&aggregate(&reversed, &AggregateOptions::default()))
    );
}
