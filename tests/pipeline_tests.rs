//! Library-level pipeline tests against a recording scheduler.
//!
//! The recording provider logs every context open, stage invocation and
//! release, and appends each stage name to the units it touches so outputs
//! show exactly which steps ran.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Value, json};
use tempfile::TempDir;

use seqforge::config::SharedConfig;
use seqforge::driver::{Directories, execute};
use seqforge::errors::{PhaseError, StageError};
use seqforge::pairing::pair;
use seqforge::parallel::ParallelSpec;
use seqforge::pipeline::{PipelineRegistry, RunContext};
use seqforge::run_spec::RunSpecification;
use seqforge::scheduler::{ContextProvider, ContextRequest, Scheduler};
use seqforge::work_unit::{Batch, WorkUnit, flatten, singletons};

#[derive(Default)]
struct Behaviour {
    fail_stage: Option<&'static str>,
    fail_open: Option<&'static str>,
    duplicate_stage: Option<&'static str>,
    /// Stage that switches `cwl_reporting` on in each unit's prepared config
    reporting_stage: Option<&'static str>,
}

#[derive(Default, Clone)]
struct RecordingProvider {
    events: Arc<Mutex<Vec<String>>>,
    multipliers: Arc<Mutex<Vec<(String, u32)>>>,
    behaviour: Arc<Behaviour>,
}

impl RecordingProvider {
    fn with(behaviour: Behaviour) -> Self {
        Self {
            behaviour: Arc::new(behaviour),
            ..Default::default()
        }
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn position(&self, event: &str) -> usize {
        self.events()
            .iter()
            .position(|e| e == event)
            .unwrap_or_else(|| panic!("missing event {event}"))
    }
}

#[async_trait]
impl ContextProvider for RecordingProvider {
    async fn open(&self, request: ContextRequest<'_>) -> Result<Box<dyn Scheduler>, StageError> {
        self.events
            .lock()
            .unwrap()
            .push(format!("open:{}", request.phase));
        self.multipliers
            .lock()
            .unwrap()
            .push((request.phase.to_string(), request.multiplier));
        if self.behaviour.fail_open == Some(request.phase) {
            return Err(StageError::Aborted("no nodes available".into()));
        }
        Ok(Box::new(RecordingScheduler {
            phase: request.phase.to_string(),
            events: Arc::clone(&self.events),
            behaviour: Arc::clone(&self.behaviour),
        }))
    }
}

struct RecordingScheduler {
    phase: String,
    events: Arc<Mutex<Vec<String>>>,
    behaviour: Arc<Behaviour>,
}

#[async_trait]
impl Scheduler for RecordingScheduler {
    async fn invoke(&self, stage: &str, calls: Vec<Batch>) -> Result<Vec<Batch>, StageError> {
        self.events
            .lock()
            .unwrap()
            .push(format!("invoke:{}:{}", self.phase, stage));
        if self.behaviour.fail_stage == Some(stage) {
            return Err(StageError::NonZeroExit {
                code: 1,
                stderr: "tool crashed".into(),
            });
        }
        let mut units: Vec<WorkUnit> = flatten(calls)
            .into_iter()
            .map(|unit| annotate(unit, stage))
            .collect();
        if self.behaviour.reporting_stage == Some(stage) {
            for unit in &mut units {
                unit.config
                    .insert("algorithm".to_string(), json!({"cwl_reporting": true}));
            }
        }
        if self.behaviour.duplicate_stage == Some(stage) {
            units.extend(units.clone());
        }
        Ok(singletons(units))
    }

    async fn release(&self) {
        self.events
            .lock()
            .unwrap()
            .push(format!("release:{}", self.phase));
    }
}

fn annotate(mut unit: WorkUnit, stage: &str) -> WorkUnit {
    let stages = unit
        .extra
        .entry("stages".to_string())
        .or_insert_with(|| json!([]));
    if let Value::Array(list) = stages {
        list.push(json!(stage));
    }
    if stage == "combine_sample_regions" {
        unit.config.insert(
            "algorithm".to_string(),
            json!({"callable_count": 7, "variantcaller": ["gatk", "freebayes"]}),
        );
    }
    unit
}

fn samples(analysis: &str, n: usize) -> Vec<Batch> {
    singletons((0..n).map(|i| WorkUnit::new(format!("sample{i}"), analysis)))
}

async fn run_named(
    name: &str,
    batches: Vec<Batch>,
    provider: &RecordingProvider,
    work: &Path,
) -> Result<Vec<Batch>, PhaseError> {
    run_with_config(name, batches, provider, work, SharedConfig::default()).await
}

async fn run_with_config(
    name: &str,
    batches: Vec<Batch>,
    provider: &RecordingProvider,
    work: &Path,
    config: SharedConfig,
) -> Result<Vec<Batch>, PhaseError> {
    let registry = PipelineRegistry::builtin().unwrap();
    let registration = registry.resolve(name).unwrap();
    let parallel = ParallelSpec::local(4);
    let dirs = Directories::for_work_dir(work);
    let run_spec = work.join("run.yaml");
    let mut ctx = RunContext::new(&config, &run_spec, &parallel, &dirs, provider);
    registration.pipeline.run(&mut ctx, batches).await
}

mod sequencing {
    use super::*;

    #[tokio::test]
    async fn phases_run_strictly_in_order() {
        let work = TempDir::new().unwrap();
        let provider = RecordingProvider::default();
        run_named("Standard", samples("Standard", 3), &provider, work.path())
            .await
            .unwrap();

        let events = provider.events();
        let release_first = provider.position("release:alignment");
        let open_second = provider.position("open:quality control");
        assert_eq!(provider.position("open:alignment"), 0);
        assert!(release_first < open_second);
        for (index, event) in events.iter().enumerate() {
            if event.starts_with("invoke:alignment:") {
                assert!(index < release_first, "{event} after release");
            }
            if event.starts_with("invoke:quality control:") {
                assert!(index > open_second, "{event} before open");
            }
        }
        assert_eq!(events.last().unwrap(), "release:quality control");
    }

    #[tokio::test]
    async fn steps_follow_declared_order() {
        let work = TempDir::new().unwrap();
        let provider = RecordingProvider::default();
        let out = run_named("Standard", samples("Standard", 1), &provider, work.path())
            .await
            .unwrap();
        assert_eq!(
            out[0][0].field("stages").unwrap(),
            &json!([
                "organize_samples",
                "process_alignment",
                "prep_samples",
                "postprocess_alignment",
                "combine_sample_regions",
                "clean_sample_data",
                "generate_qc_summary",
                "upload_samples"
            ])
        );
    }

    #[tokio::test]
    async fn side_effect_step_runs_once_per_unit() {
        let work = TempDir::new().unwrap();
        let provider = RecordingProvider::default();
        run_named("sailfish", samples("sailfish", 3), &provider, work.path())
            .await
            .unwrap();
        let uploads = provider
            .events()
            .iter()
            .filter(|e| e.ends_with(":upload_samples_project"))
            .count();
        assert_eq!(uploads, 3);
    }

    #[tokio::test]
    async fn multiplier_reflects_batch_before_phase() {
        let work = TempDir::new().unwrap();
        let provider = RecordingProvider::default();
        run_named("variant2", samples("variant2", 2), &provider, work.path())
            .await
            .unwrap();
        let multipliers = provider.multipliers.lock().unwrap().clone();
        assert_eq!(multipliers[0], ("alignment".to_string(), 1));
        // combine_sample_regions set 7 callable regions and two callers
        assert_eq!(multipliers[1], ("variant calling".to_string(), 14));
    }
}

mod aliases {
    use super::*;

    #[tokio::test]
    async fn aliased_names_run_identically() {
        let first_dir = TempDir::new().unwrap();
        let second_dir = TempDir::new().unwrap();
        let first = RecordingProvider::default();
        let second = RecordingProvider::default();

        let a = run_named("variant", samples("variant2", 2), &first, first_dir.path())
            .await
            .unwrap();
        let b = run_named("SNP calling", samples("variant2", 2), &second, second_dir.path())
            .await
            .unwrap();

        assert_eq!(first.events(), second.events());
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn minimal_is_standard() {
        let dir = TempDir::new().unwrap();
        let first = RecordingProvider::default();
        let second = RecordingProvider::default();
        run_named("minimal", samples("Standard", 1), &first, dir.path())
            .await
            .unwrap();
        run_named("standard", samples("Standard", 1), &second, dir.path())
            .await
            .unwrap();
        assert_eq!(first.events(), second.events());
    }
}

mod failures {
    use super::*;

    #[tokio::test]
    async fn step_failure_names_phase_and_stage() {
        let work = TempDir::new().unwrap();
        let provider = RecordingProvider::with(Behaviour {
            fail_stage: Some("process_alignment"),
            ..Default::default()
        });
        let err = run_named("variant2", samples("variant2", 2), &provider, work.path())
            .await
            .unwrap_err();

        match &err {
            PhaseError::Step {
                phase,
                section,
                stage,
                ..
            } => {
                assert_eq!(phase, "alignment");
                assert_eq!(section, "alignment");
                assert_eq!(stage, "process_alignment");
            }
            other => panic!("Expected Step error, got {other:?}"),
        }
        assert!(err.to_string().contains("tool crashed"));

        let events = provider.events();
        assert!(events.contains(&"release:alignment".to_string()));
        assert!(!events.iter().any(|e| e == "open:variant calling"));
    }

    #[tokio::test]
    async fn context_failure_stops_before_any_step() {
        let work = TempDir::new().unwrap();
        let provider = RecordingProvider::with(Behaviour {
            fail_open: Some("quality control"),
            ..Default::default()
        });
        let err = run_named("Standard", samples("Standard", 1), &provider, work.path())
            .await
            .unwrap_err();
        assert!(matches!(&err, PhaseError::Context { phase, .. } if phase == "quality control"));
        assert!(
            !provider
                .events()
                .iter()
                .any(|e| e.starts_with("invoke:quality control"))
        );
    }

    #[tokio::test]
    async fn duplicated_units_fail_the_phase() {
        let work = TempDir::new().unwrap();
        let provider = RecordingProvider::with(Behaviour {
            duplicate_stage: Some("process_alignment"),
            ..Default::default()
        });
        let err = run_named("Standard", samples("Standard", 1), &provider, work.path())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PhaseError::DuplicateIdentity { phase, description }
                if phase == "alignment" && description == "sample0"
        ));
    }
}

mod world_reports {
    use super::*;
    use seqforge::world::OUTPUT_DIR;

    fn report_names(work: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(work.join(OUTPUT_DIR))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn reporting_units_get_one_report_per_section_after_organize() {
        let work = TempDir::new().unwrap();
        let provider = RecordingProvider::default();
        let batches = singletons(vec![
            WorkUnit::new("s1", "Standard").with_field("algorithm", json!({"cwl_reporting": true})),
        ]);
        run_named("Standard", batches, &provider, work.path())
            .await
            .unwrap();

        assert_eq!(
            report_names(work.path()),
            vec![
                "001-alignment.json",
                "002-callable-regions.json",
                "003-quality-control.json",
                "004-upload.json",
            ]
        );

        let first: Value = serde_json::from_str(
            &std::fs::read_to_string(work.path().join(OUTPUT_DIR).join("001-alignment.json"))
                .unwrap(),
        )
        .unwrap();
        assert_eq!(
            first["changes"]["s1"]["stages"],
            json!(["organize_samples", "process_alignment"])
        );
    }

    #[tokio::test]
    async fn organize_samples_can_turn_reporting_on() {
        let work = TempDir::new().unwrap();
        let provider = RecordingProvider::with(Behaviour {
            reporting_stage: Some("organize_samples"),
            ..Default::default()
        });
        run_named("Standard", samples("Standard", 2), &provider, work.path())
            .await
            .unwrap();

        let names = report_names(work.path());
        assert_eq!(names.len(), 4);
        assert_eq!(names[0], "001-alignment.json");
    }

    #[tokio::test]
    async fn shared_config_can_turn_reporting_on() {
        let work = TempDir::new().unwrap();
        let provider = RecordingProvider::default();
        let config = SharedConfig::parse("algorithm:\n  cwl_reporting: true\n").unwrap();
        run_with_config("sailfish", samples("sailfish", 1), &provider, work.path(), config)
            .await
            .unwrap();

        assert_eq!(
            report_names(work.path()),
            vec!["001-adapter-trimming.json", "002-sailfish.json", "003-upload.json"]
        );
    }

    #[tokio::test]
    async fn plain_units_leave_no_reports() {
        let work = TempDir::new().unwrap();
        let provider = RecordingProvider::default();
        run_named("Standard", samples("Standard", 2), &provider, work.path())
            .await
            .unwrap();
        assert!(!work.path().join(OUTPUT_DIR).exists());
    }
}

mod driver {
    use super::*;

    #[tokio::test]
    async fn execute_runs_groups_and_records_provenance() {
        let work = TempDir::new().unwrap();
        let spec = RunSpecification::parse(
            r#"
resources:
  gatk: {memory: 8G}
details:
  - {description: s1, analysis: Standard}
  - {description: s2, analysis: RNA-seq}
  - {description: s3, analysis: standard}
"#,
        )
        .unwrap();
        let registry = PipelineRegistry::builtin().unwrap();
        let pairing = pair(spec, SharedConfig::default(), &registry).unwrap();
        let provider = RecordingProvider::default();
        let dirs = Directories::for_work_dir(work.path());
        let parallel = ParallelSpec::local(2);

        let summary = execute(
            pairing,
            &work.path().join("run.yaml"),
            &parallel,
            dirs,
            &provider,
            Some("test".to_string()),
        )
        .await
        .unwrap();

        let names: Vec<_> = summary.outputs.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["Standard", "RNA-seq"]);
        assert_eq!(summary.outputs[0].batches.len(), 2);

        assert!(summary.record_path.is_file());
        assert_eq!(summary.record.pipelines[0].phases.len(), 2);
        assert_eq!(summary.record.pipelines[1].pipeline, "RNA-seq");
        assert_eq!(summary.record.workflow.as_deref(), Some("test"));

        // the scoped temporary directory is gone, its root stays
        let leftovers = std::fs::read_dir(work.path().join("tmp")).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn failed_run_still_removes_temporary_space() {
        let work = TempDir::new().unwrap();
        let spec = RunSpecification::parse("- {description: s1, analysis: sailfish}\n").unwrap();
        let registry = PipelineRegistry::builtin().unwrap();
        let pairing = pair(spec, SharedConfig::default(), &registry).unwrap();
        let provider = RecordingProvider::with(Behaviour {
            fail_stage: Some("run_sailfish"),
            ..Default::default()
        });

        let err = execute(
            pairing,
            &work.path().join("run.yaml"),
            &ParallelSpec::local(1),
            Directories::for_work_dir(work.path()),
            &provider,
            None,
        )
        .await
        .unwrap_err();

        assert!(format!("{err:#}").contains("run_sailfish"));
        let leftovers = std::fs::read_dir(work.path().join("tmp")).unwrap().count();
        assert_eq!(leftovers, 0);
        assert!(!work.path().join("provenance").exists());
    }
}
