//! Route samples to pipelines and fold their resource overrides into the
//! shared configuration.
//!
//! Resource customisation in the run specification is consumed here: it
//! ends up in the shared configuration and every returned work unit starts
//! with an empty `resources` map. The global overlay is applied on top of each
//! sample's own values, so global settings win.

use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::config::SharedConfig;
use crate::errors::{PairingError, RunSpecError};
use crate::pipeline::{PipelineRegistry, Registration};
use crate::run_spec::{Descriptor, RunSpecification};
use crate::work_unit::{Batch, Resources, WorkUnit, unit_count};

/// Raw file locations are resolved by a later stage.
const FILES_FIELD: &str = "files";

/// Work units routed to one registry entry.
#[derive(Debug, Clone)]
pub struct PipelineGroup {
    pub registration: Registration,
    pub batches: Vec<Batch>,
}

#[derive(Debug)]
pub struct Pairing {
    /// Groups in order of first occurrence
    pub groups: Vec<PipelineGroup>,
    pub config: SharedConfig,
}

impl Pairing {
    pub fn unit_count(&self) -> usize {
        self.groups.iter().map(|g| unit_count(&g.batches)).sum()
    }
}

pub fn pair(
    spec: RunSpecification,
    mut config: SharedConfig,
    registry: &PipelineRegistry,
) -> Result<Pairing, PairingError> {
    let mut groups: Vec<PipelineGroup> = Vec::new();
    for (index, mut descriptor) in spec.details.into_iter().enumerate() {
        descriptor.remove(FILES_FIELD);

        let scratch = scratch_copy(&descriptor, &spec.resources);
        config.update_with_custom(&scratch);

        descriptor.insert("resources".to_string(), Value::Object(Map::new()));
        let unit = into_work_unit(index, descriptor)?;

        let registration = registry.resolve(&unit.analysis)?;
        debug!(
            "Sample {} -> {}",
            unit.description,
            registration.pipeline.name()
        );
        match groups
            .iter_mut()
            .find(|g| g.registration.key() == registration.key())
        {
            Some(group) => group.batches.push(vec![unit]),
            None => groups.push(PipelineGroup {
                registration: registration.clone(),
                batches: vec![vec![unit]],
            }),
        }
    }

    for group in &groups {
        info!(
            "{} samples for {}",
            group.batches.len(),
            group.registration.name
        );
    }
    Ok(Pairing { groups, config })
}

/// The descriptor without its `algorithm` block, with the global overlay applied to `resources`.
fn scratch_copy(descriptor: &Descriptor, overlay: &Resources) -> Map<String, Value> {
    let mut scratch = descriptor.clone();
    scratch.remove("algorithm");
    if overlay.is_empty() {
        return scratch;
    }
    let resources = scratch
        .entry("resources".to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !resources.is_object() {
        *resources = Value::Object(Map::new());
    }
    if let Value::Object(resources) = resources {
        for (tool, params) in overlay {
            let entry = resources
                .entry(tool.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            if let Value::Object(entry) = entry {
                for (key, value) in params {
                    entry.insert(key.clone(), value.clone());
                }
            }
        }
    }
    scratch
}

fn into_work_unit(index: usize, descriptor: Descriptor) -> Result<WorkUnit, RunSpecError> {
    serde_json::from_value(Value::Object(descriptor))
        .map_err(|e| RunSpecError::InvalidShape(format!("sample {index}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ConfigError;
    use serde_json::json;
    use std::collections::BTreeSet;

    fn registry() -> PipelineRegistry {
        PipelineRegistry::builtin().unwrap()
    }

    fn spec(yaml: &str) -> RunSpecification {
        RunSpecification::parse(yaml).unwrap()
    }

    #[test]
    fn every_sample_lands_in_exactly_one_group() {
        let run = spec(
            r#"
- {description: s1, analysis: variant2}
- {description: s2, analysis: RNA-seq}
- {description: s3, analysis: VARIANT2}
- {description: s4, analysis: chip-seq}
- {description: s5, analysis: rna-seq}
"#,
        );
        let pairing = pair(run, SharedConfig::default(), &registry()).unwrap();
        assert_eq!(pairing.groups.len(), 3);
        assert_eq!(pairing.unit_count(), 5);

        let names: Vec<_> = pairing
            .groups
            .iter()
            .map(|g| g.registration.name.as_str())
            .collect();
        assert_eq!(names, vec!["variant2", "RNA-seq", "chip-seq"]);

        let mut seen = BTreeSet::new();
        for group in &pairing.groups {
            assert!(!group.batches.is_empty());
            for batch in &group.batches {
                assert_eq!(batch.len(), 1);
                assert!(seen.insert(batch[0].description.clone()));
            }
        }
        assert_eq!(seen.len(), 5);

        let variant: Vec<_> = pairing.groups[0]
            .batches
            .iter()
            .map(|b| b[0].description.as_str())
            .collect();
        assert_eq!(variant, vec!["s1", "s3"]);
    }

    #[test]
    fn unknown_analysis_fails_pairing() {
        let run = spec("- {description: s1, analysis: variant2}\n- {description: s2, analysis: wgs-magic}\n");
        let err = pair(run, SharedConfig::default(), &registry()).unwrap_err();
        assert!(matches!(
            err,
            PairingError::Config(ConfigError::UnknownAnalysis { analysis }) if analysis == "wgs-magic"
        ));
    }

    #[test]
    fn aliases_form_their_own_groups() {
        let run = spec("- {description: a, analysis: variant}\n- {description: b, analysis: variant2}\n");
        let pairing = pair(run, SharedConfig::default(), &registry()).unwrap();
        assert_eq!(pairing.groups.len(), 2);
        assert_eq!(pairing.groups[0].registration.pipeline.name(), "variant2");
        assert_eq!(pairing.groups[1].registration.pipeline.name(), "variant2");
    }

    #[test]
    fn resources_are_reset_and_files_dropped() {
        let run = spec(
            r#"
resources:
  gatk: {memory: 8G}
details:
  - description: s1
    analysis: variant2
    files: [a_1.fq, a_2.fq]
    resources:
      bwa: {cores: 16}
    algorithm: {aligner: bwa}
"#,
        );
        let pairing = pair(run, SharedConfig::default(), &registry()).unwrap();
        let unit = &pairing.groups[0].batches[0][0];
        assert!(unit.resources.is_empty());
        assert!(unit.field(FILES_FIELD).is_none());
        assert_eq!(unit.algorithm("aligner"), Some(&json!("bwa")));

        let resources = pairing.config.get("resources").unwrap();
        assert_eq!(resources["bwa"]["cores"], json!(16));
        assert_eq!(resources["gatk"]["memory"], json!("8G"));
        // the algorithm block stays on the unit and out of the shared configuration
        assert!(pairing.config.get("algorithm").is_none());
    }

    #[test]
    fn global_overlay_wins_over_sample_values() {
        let run = spec(
            r#"
resources:
  toolA: {memory: 8}
details:
  - description: s1
    analysis: Standard
    resources:
      toolA: {memory: 2, cores: 4}
"#,
        );
        let pairing = pair(run, SharedConfig::default(), &registry()).unwrap();
        let tool = pairing.config.tool_resources("toolA").unwrap();
        assert_eq!(tool["memory"], json!(8));
        assert_eq!(tool["cores"], json!(4));
    }

    #[test]
    fn overrides_accumulate_in_declaration_order() {
        let run = spec(
            r#"
- description: s1
  analysis: Standard
  resources: {gatk: {memory: 2G, cores: 2}}
- description: s2
  analysis: Standard
  resources: {gatk: {memory: 4G}}
"#,
        );
        let pairing = pair(run, SharedConfig::default(), &registry()).unwrap();
        let gatk = pairing.config.tool_resources("gatk").unwrap();
        assert_eq!(gatk["memory"], json!("4G"));
        assert_eq!(gatk["cores"], json!(2));
    }

    #[test]
    fn non_mapping_config_is_rejected() {
        let run = spec("- {description: s1, analysis: Standard, config: 3}\n");
        let err = pair(run, SharedConfig::default(), &registry()).unwrap_err();
        assert!(matches!(err, PairingError::RunSpec(RunSpecError::InvalidShape(_))));
    }
}
