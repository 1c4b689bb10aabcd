//! End-to-end pipeline tests against a file-backed note store.

use af_cohort_core::annotate::PrecomputedAnnotator;
use af_cohort_core::cohort::CohortCriteria;
use af_cohort_core::config::{DefinitionPaths, OutputPaths, PipelineConfig, TelemetryConfig};
use af_cohort_core::models::Value;
use af_cohort_core::pipeline::{import_notes, Pipeline, RunOutput};
use af_cohort_core::validation::{load_exported, load_gold, validate};
use chrono::NaiveDate;
use std::path::Path;

const NOTES: &str = "\
patientprimarymrn,clinicalnotekey,encounterdate,notetext
M1,N1,2014-03-01,Atrial fibrillation. History of stroke. On warfarin.
M1,N2,2016-07-10,Atrial fibrillation follow up. Warfarin continued. Hypertension.
M2,N3,2015-02-02,Paroxysmal atrial fibrillation. Started apixaban and aspirin.
M3,N4,2010-05-05,Atrial fibrillation on ECG.
M4,N5,2017-01-01,Atrial fibrillation in a teenager.
M5,N6,2013-03-03,Knee pain only.
M6,N7,2018-08-08,Atrial fibrillation noted.
M7,N8,2012-12-12,Atrial fibrillation without demographics.
";

const DEMOGRAPHICS: &str = "\
primary_mrn,date_of_birth,gender
M1,1940-01-01,Female
M2,1950-06-01,Male
M3,1945-01-01,Male
M4,2004-01-01,Female
M6,1960-01-01,Male
";

const CHADSVASC: &str = "\
score,component,cui,points
chadsvasc,chf,C0018802,1
chadsvasc,hypertension,C0020538,1
chadsvasc,age_gte75,,2
chadsvasc,diabetes,C0011849,1
chadsvasc,stroke,C0038454,2
chadsvasc,vascular,C0027051,1
chadsvasc,age_65_74,,1
chadsvasc,female,,1
";

const HASBLED: &str = "\
score,component,cui,points
hasbled,hypertension,C0020538,1
hasbled,stroke,C0038454,1
hasbled,bleeding,C0019080,1
hasbled,age_gt65,,1
";

const MEDICATIONS: &str = "\
component,cui,term
warfarin,C0043031,warfarin
aspirin,C0004057,aspirin
apixaban,C1831808,apixaban
prasugrel,C1620287,prasugrel
clopidogrel,C0070166,clopidogrel
dipyridamole,C0012582,dipyridamole
rivaroxaban,C1739768,rivaroxaban
ticagrelor,C1999375,ticagrelor
dabigatran,C2348066,dabigatran
edoxaban,C2975435,edoxaban
";

const ENGINE_OUTPUT: &str = r#"{
    "N2": [
        {"cui": "C0043031", "meta_anns": {"Negated": {"value": "No"}}},
        {"cui": "C0020538", "meta_anns": {"Negated": {"value": "No"}}}
    ],
    "N3": {"entities": {
        "0": {"cui": "C1831808", "meta_anns": {"Negated": {"value": "No"}}},
        "1": {"cui": "C0004057", "meta_anns": {"Negated": {"value": "No"}}},
        "2": {"cui": "C0038454", "meta_anns": {"Negated": {"value": "Yes"}}}
    }}
}"#;

fn setup(dir: &Path) -> PipelineConfig {
    for (name, contents) in [
        ("notes.csv", NOTES),
        ("demographics.csv", DEMOGRAPHICS),
        ("chadsvasc.csv", CHADSVASC),
        ("hasbled.csv", HASBLED),
        ("medications.csv", MEDICATIONS),
        ("engine.json", ENGINE_OUTPUT),
    ] {
        std::fs::write(dir.join(name), contents).unwrap();
    }

    PipelineConfig {
        definitions: DefinitionPaths {
            scores: vec![dir.join("chadsvasc.csv"), dir.join("hasbled.csv")],
            medications: Some(dir.join("medications.csv")),
        },
        note_store: dir.join("notes.db"),
        demographics: dir.join("demographics.csv"),
        output: OutputPaths {
            table: dir.join("output/af_cohort.csv"),
            json: Some(dir.join("output/af_cohort.json")),
            manifest: dir.join("output/manifest.json"),
        },
        criteria: CohortCriteria {
            reference_date: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
            ..CohortCriteria::default()
        },
        strict_definitions: false,
        telemetry: TelemetryConfig {
            log_level: "debug".into(),
        },
    }
}

fn run(dir: &Path) -> (PipelineConfig, RunOutput) {
    let config = setup(dir);
    assert_eq!(import_notes(&config.note_store, dir.join("notes.csv")).unwrap(), 8);

    let pipeline = Pipeline::new(&config);
    let definitions = pipeline.load_definitions().unwrap();
    let annotator = PrecomputedAnnotator::load(dir.join("engine.json")).unwrap();
    let output = pipeline.run(&definitions, &annotator).unwrap();
    (config, output)
}

#[test]
fn test_full_run() {
    let dir = tempfile::tempdir().unwrap();
    let (_, output) = run(dir.path());
    let table = &output.table;

    // N7 has no engine output; the rest fall out during cohort building
    let ids: Vec<&str> = table.rows().iter().map(|r| r.key.document_id.as_str()).collect();
    assert_eq!(ids, vec!["N3", "N2"]);

    assert_eq!(table.get(0, "total_chadsvasc"), Some(&Value::Float(1.0)));
    assert_eq!(table.get(0, "stroke_chadsvasc"), Some(&Value::Int(0)));
    assert_eq!(table.get(0, "apixaban"), Some(&Value::Int(1)));
    assert_eq!(table.get(0, "ac_and_ap"), Some(&Value::Int(1)));
    assert_eq!(table.get(0, "ac_only"), Some(&Value::Int(0)));

    assert_eq!(table.get(1, "total_chadsvasc"), Some(&Value::Float(4.0)));
    assert_eq!(table.get(1, "age_gte75_chadsvasc"), Some(&Value::Int(1)));
    assert_eq!(table.get(1, "total_hasbled"), Some(&Value::Float(2.0)));
    assert_eq!(table.get(1, "ac_only"), Some(&Value::Int(1)));
    assert_eq!(table.get(1, "no_at"), Some(&Value::Int(0)));
}

#[test]
fn test_manifest_records_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let (config, output) = run(dir.path());
    let manifest = &output.manifest;

    assert_eq!(manifest.counts.complete_cohort, 3);
    assert_eq!(manifest.counts.annotated, 2);
    assert_eq!(manifest.counts.failed, 1);
    assert_eq!(manifest.counts.final_rows, 2);
    assert_eq!(manifest.failures[0].document_id, "N7");
    assert_eq!(manifest.stages[0].stage, "search");
    assert_eq!(manifest.stages[0].documents, 7);
    assert_eq!(manifest.definitions.len(), 3);

    let categories = manifest.categories.as_ref().unwrap();
    assert_eq!(categories.count("any_at"), Some(2));
    assert_eq!(categories.any_plus_none_is_total, Some(true));
    assert_eq!(categories.exclusive_groups_sum_to_any, Some(true));

    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&config.output.manifest).unwrap()).unwrap();
    assert_eq!(written["run_id"], manifest.run_id.as_str());
    assert_eq!(written["counts"]["failed"], 1);

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(config.output.json.as_ref().unwrap()).unwrap()).unwrap();
    assert_eq!(json[1]["doc_id"], "N2");
    assert_eq!(json[1]["female"], 1);
}

#[test]
fn test_validation_sample() {
    let dir = tempfile::tempdir().unwrap();
    let config = setup(dir.path());
    import_notes(&config.note_store, dir.path().join("notes.csv")).unwrap();
    let pipeline = Pipeline::new(&config);

    let first = dir.path().join("output/sample_a.csv");
    let second = dir.path().join("output/sample_b.csv");
    assert_eq!(pipeline.sample(50, 2, &first).unwrap(), 3);
    assert_eq!(pipeline.sample(50, 2, &second).unwrap(), 3);

    let written = std::fs::read_to_string(&first).unwrap();
    assert_eq!(written, std::fs::read_to_string(&second).unwrap());

    let mut lines = written.lines();
    assert_eq!(lines.next(), Some("name,text"));
    let mut names: Vec<&str> = lines.map(|l| l.split(',').next().unwrap()).collect();
    names.sort();
    assert_eq!(names, vec!["N2", "N3", "N7"]);
}

#[test]
fn test_validate_exported_table() {
    let dir = tempfile::tempdir().unwrap();
    let (config, _) = run(dir.path());

    let gold_path = dir.path().join("gold.csv");
    std::fs::write(
        &gold_path,
        "doc_id,af_diagnosis,warfarin,apixaban,stroke_chadsvasc\n\
         N2,YES,YES,NO,NO\n\
         N3,YES,NO,YES,YES\n",
    )
    .unwrap();

    let gold = load_gold(&gold_path).unwrap();
    let exported = load_exported(&config.output.table).unwrap();
    let report = validate(&gold, &exported).unwrap();

    assert_eq!(report.documents, 2);
    let by_name = |name: &str| report.metrics.iter().find(|m| m.component == name).unwrap();

    assert_eq!(by_name("af_diagnosis").tp, 2);
    assert_eq!(by_name("warfarin").accuracy, 1.0);
    assert_eq!(by_name("apixaban").recall, 1.0);

    let stroke = by_name("stroke_chadsvasc");
    assert_eq!((stroke.tn, stroke.fn_), (1, 1));
    assert_eq!(stroke.recall, 0.0);
}
