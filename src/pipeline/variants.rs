//! Built-in pipeline variants.
//!
//! Each variant is a plan: an ordered list of phases built from the shared
//! step vocabulary. Variants never override the runner; a new analysis type
//! is a new plan function plus a registry entry.

use std::sync::Arc;

use async_trait::async_trait;

use super::Pipeline;
use super::registry::Registration;
use crate::phase::{Multiplier, Phase, Step};

/// A pipeline whose behaviour is fully described by its phase plan.
pub struct StagedPipeline {
    name: &'static str,
    plan: fn() -> Vec<Phase>,
}

impl StagedPipeline {
    pub fn new(name: &'static str, plan: fn() -> Vec<Phase>) -> Self {
        Self { name, plan }
    }
}

#[async_trait]
impl Pipeline for StagedPipeline {
    fn name(&self) -> &str {
        self.name
    }

    fn plan(&self) -> Vec<Phase> {
        (self.plan)()
    }
}

/// The registration table: canonical names first, then back-compatible aliases.
pub fn builtin() -> Vec<Registration> {
    let calling: Arc<dyn Pipeline> = Arc::new(StagedPipeline::new("variant2", variant2));
    let alignment_only: Arc<dyn Pipeline> = Arc::new(StagedPipeline::new("Standard", standard));
    vec![
        Registration::new("variant2", Arc::clone(&calling)),
        Registration::new("variant", Arc::clone(&calling)),
        Registration::new("SNP calling", calling),
        Registration::new("Standard", Arc::clone(&alignment_only)),
        Registration::new("Minimal", alignment_only),
        Registration::new("sailfish", Arc::new(StagedPipeline::new("sailfish", sailfish))),
        Registration::new("RNA-seq", Arc::new(StagedPipeline::new("RNA-seq", rnaseq))),
        Registration::new(
            "smallRNA-seq",
            Arc::new(StagedPipeline::new("smallRNA-seq", smallrnaseq)),
        ),
        Registration::new("chip-seq", Arc::new(StagedPipeline::new("chip-seq", chipseq))),
    ]
}

fn organize_samples() -> Vec<Step> {
    vec![Step::whole_batch("organize_samples")]
}

fn upload() -> Vec<Step> {
    vec![
        Step::per_unit("upload_samples"),
        Step::side_effect("upload_samples_project"),
    ]
}

fn quality_control() -> Vec<Step> {
    vec![Step::whole_batch("generate_qc_summary")]
}

fn adapter_trimming(trim_stage: &str) -> Vec<Step> {
    vec![Step::per_unit("prepare_sample"), Step::per_unit(trim_stage)]
}

fn callable_regions() -> Vec<Step> {
    vec![
        Step::whole_batch("prep_samples"),
        Step::per_unit("postprocess_alignment"),
        Step::whole_batch("combine_sample_regions"),
        Step::whole_batch("clean_sample_data"),
    ]
}

/// Alignment, variant calling, structural variants, ensembles and population databases.
pub fn variant2() -> Vec<Phase> {
    vec![
        Phase::new("alignment", "multicore")
            .tools(["aligner", "samtools", "sambamba"])
            .file_resource(&["reference", "fasta"])
            .file_resource(&["reference", "aligner"])
            .file_resource(&["files"])
            .multiplier(Multiplier::AlignmentSplits)
            .section("organize samples", organize_samples())
            .section(
                "alignment preparation",
                vec![
                    Step::per_unit("prep_align_inputs"),
                    Step::whole_batch("disambiguate_split"),
                ],
            )
            .section(
                "alignment",
                vec![
                    Step::per_unit("process_alignment"),
                    Step::whole_batch("disambiguate_resolve"),
                    Step::whole_batch("merge_split_alignments"),
                ],
            )
            .section("callable regions", callable_regions())
            .section(
                "structural variation initial",
                vec![Step::whole_batch("detect_sv_initial")],
            )
            .section("hla typing", vec![Step::per_unit("call_hla")]),
        Phase::new("variant calling", "full")
            .tools(["gatk", "picard", "variantcaller"])
            .multiplier(Multiplier::MaxRegions)
            .max_multicore(1)
            .section(
                "alignment post-processing",
                vec![Step::whole_batch("parallel_prep_region")],
            )
            .section(
                "variant calling",
                vec![Step::whole_batch("parallel_variantcall_region")],
            ),
        Phase::new("finalize", "multicore2")
            .tools([
                "gatk",
                "gatk-vqsr",
                "snpeff",
                "bcbio_variation",
                "gemini",
                "samtools",
                "fastqc",
                "bamtools",
                "bcbio-variation-recall",
                "qsignature",
                "svcaller",
            ])
            .multiplier(Multiplier::StructuralCallers)
            .section(
                "joint squaring off/backfilling",
                vec![Step::whole_batch("square_off")],
            )
            .section(
                "variant post-processing",
                vec![
                    Step::per_unit("postprocess_variants"),
                    Step::per_unit("split_variants_by_sample"),
                ],
            )
            .section(
                "prepped BAM merging",
                vec![Step::whole_batch("delayed_bamprep_merge")],
            )
            .section(
                "validation",
                vec![
                    Step::per_unit("compare_to_rm"),
                    Step::whole_batch("combine_multiple_callers"),
                ],
            )
            .section("ensemble calling", vec![Step::whole_batch("combine_calls")])
            .section(
                "validation summary",
                vec![Step::whole_batch("summarize_grading")],
            )
            .section(
                "structural variation final",
                vec![Step::whole_batch("detect_sv_standard")],
            )
            .section(
                "structural variation ensemble",
                vec![Step::whole_batch("detect_sv_ensemble")],
            )
            .section(
                "structural variation validation",
                vec![Step::per_unit("validate_sv")],
            )
            .section(
                "heterogeneity",
                vec![Step::whole_batch("estimate_heterogeneity")],
            )
            .section("population database", vec![Step::whole_batch("prep_gemini_db")])
            .section("quality control", quality_control())
            .section("archive", vec![Step::whole_batch("compress_archive")])
            .section("upload", upload()),
    ]
}

/// Alignment and quality control only.
pub fn standard() -> Vec<Phase> {
    vec![
        Phase::new("alignment", "multicore")
            .tools(["aligner", "samtools", "sambamba"])
            .section("organize samples", organize_samples())
            .section("alignment", vec![Step::per_unit("process_alignment")])
            .section("callable regions", callable_regions()),
        Phase::new("quality control", "multicore2")
            .tools(["fastqc", "bamtools", "qsignature", "kraken", "gatk", "samtools"])
            .section("quality control", quality_control())
            .section("upload", upload()),
    ]
}

pub fn sailfish() -> Vec<Phase> {
    vec![
        Phase::new("trimming", "trimming")
            .tools(["picard", "cutadapt"])
            .section("organize samples", organize_samples())
            .section("adapter trimming", adapter_trimming("trim_sample")),
        Phase::new("sailfish", "sailfish")
            .tools(["sailfish"])
            .section("sailfish", vec![Step::per_unit("run_sailfish")])
            .section("upload", upload()),
    ]
}

pub fn rnaseq() -> Vec<Phase> {
    vec![
        Phase::new("trimming", "trimming")
            .tools(["picard", "cutadapt"])
            .max_multicore(1)
            .section("organize samples", organize_samples())
            .section("adapter trimming", adapter_trimming("trim_sample")),
        Phase::new("alignment", "alignment")
            .tools(["aligner", "picard"])
            .memory_floor("tophat", 10.0)
            .memory_floor("tophat2", 10.0)
            .memory_floor("star", 2.0)
            .memory_floor("hisat2", 8.0)
            .multiplier(Multiplier::AlignmentSplits)
            .section(
                "alignment",
                vec![
                    Step::whole_batch("disambiguate_split"),
                    Step::per_unit("process_alignment"),
                ],
            ),
        Phase::new("expression", "rnaseqcount")
            .tools(["samtools", "cufflinks", "sailfish"])
            .section("disambiguation", vec![Step::whole_batch("disambiguate_resolve")])
            .section(
                "transcript assembly",
                vec![Step::whole_batch("assemble_transcripts")],
            )
            .section(
                "estimate expression (threaded)",
                vec![Step::whole_batch("quantitate_expression_parallel")],
            ),
        Phase::new("single-threaded expression", "rnaseqcount-singlethread")
            .tools(["dexseq", "express"])
            .max_multicore(1)
            .section(
                "estimate expression (single threaded)",
                vec![Step::whole_batch("quantitate_expression_noparallel")],
            ),
        Phase::new("variation", "rnaseq-variation")
            .tools(["gatk"])
            .section("combine expression files", vec![Step::whole_batch("combine_files")])
            .section(
                "RNA-seq variant calling",
                vec![Step::whole_batch("rnaseq_variant_calling")],
            ),
        Phase::new("quality control", "qc")
            .tools(["samtools", "fastqc", "qualimap", "kraken", "gatk"])
            .memory_floor("qualimap", 4.0)
            .section("quality control", quality_control())
            .section("upload", upload()),
    ]
}

pub fn smallrnaseq() -> Vec<Phase> {
    vec![
        Phase::new("trimming", "trimming")
            .tools(["picard", "cutadapt"])
            .section("organize samples", organize_samples())
            .section("adapter trimming", adapter_trimming("trim_srna_sample")),
        Phase::new("alignment", "alignment")
            .tools(["aligner", "picard", "samtools"])
            .memory_floor("bowtie", 8.0)
            .memory_floor("bowtie2", 8.0)
            .memory_floor("star", 2.0)
            .sized_by_first_unit()
            .section("prepare", vec![Step::whole_batch("seqcluster_prepare")])
            .section("alignment", vec![Step::whole_batch("srna_alignment")]),
        Phase::new("annotation", "annotation")
            .tools(["picard", "miraligner"])
            .section("small RNA annotation", vec![Step::per_unit("srna_annotation")]),
        Phase::new("cluster", "cluster")
            .tools(["seqcluster"])
            .memory_floor("seqcluster", 8.0)
            .sized_by_first_unit()
            .section("cluster", vec![Step::whole_batch("seqcluster_cluster")]),
        Phase::new("quality control", "qc")
            .tools(["picard", "fastqc"])
            .section("quality control", quality_control())
            .section("report", vec![Step::whole_batch("srna_report")])
            .section("upload", upload()),
    ]
}

pub fn chipseq() -> Vec<Phase> {
    vec![
        Phase::new("alignment", "multicore")
            .tools(["aligner", "picard"])
            .multiplier(Multiplier::AlignmentSplits)
            .section("organize samples", organize_samples())
            .section(
                "alignment",
                vec![
                    Step::per_unit("prepare_sample"),
                    Step::per_unit("trim_sample"),
                    Step::whole_batch("disambiguate_split"),
                    Step::per_unit("process_alignment"),
                ],
            ),
        Phase::new("post-processing", "persample")
            .tools(["picard", "fastqc"])
            .section("disambiguation", vec![Step::whole_batch("disambiguate_resolve")])
            .section(
                "chip-seq cleaning",
                vec![Step::per_unit("clean_chipseq_alignment")],
            )
            .section("quality control", quality_control())
            .section("upload", upload()),
    ]
}
