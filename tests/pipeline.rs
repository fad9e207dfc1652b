#![allow(missing_docs)]
#![cfg(not(feature = "loom"))]

//! An amplicon-style pipeline: per-sample preprocessing, a fan-out over
//! variant callers, a merge of their calls and a final annotation. Steps
//! only build output paths from their inputs.

mod common;

use jobgraph::{
    Deferred, Graph, Job, JobState, Memory, ResourceBudget, RunConfig, Scheduler, StepContext,
    StepError,
};

fn tool(name: &'static str, suffix: &'static str) -> Job<String> {
    Job::new(name, move |ctx: &StepContext<String>| {
        let input = ctx.inputs().one("in")?;
        let threads = ctx.resources().cores();
        tracing::info!(tool = name, input = %input, threads, "running");
        Ok(format!("{input}.{suffix}"))
    })
}

fn add_sample(
    graph: &mut Graph<String>,
    sample: &str,
) -> Result<Deferred<String>, jobgraph::GraphError> {
    let root = graph.root();
    let (qc, _) = graph.add_child_job(
        root,
        tool("fastqc", "qc").arg("in", format!("{sample}.fastq")),
    )?;
    let (trim, trimmed) = graph.add_child_job(
        qc,
        tool("trimmomatic", "trimmed").arg("in", format!("{sample}.fastq")),
    )?;
    let (_, aligned) = graph.add_child_job(
        trim,
        tool("bwa-mem", "bam")
            .cores(4)
            .memory("8G")
            .input("in", trimmed),
    )?;
    Ok(aligned)
}

#[test]
fn amplicon_pipeline_runs_end_to_end() {
    common::init_tracing();
    let mut graph = Graph::new("amplicon");
    let root = graph.root();
    let aligned = add_sample(&mut graph, "sample1").unwrap();

    let mut callers = graph.fan_out(root, "variant-callers").unwrap();
    for (caller, suffix) in [("gatk", "gatk.vcf"), ("freebayes", "fb.vcf"), ("platypus", "pl.vcf")] {
        callers
            .spawn(&mut graph, tool(caller, suffix).memory("4G").input("in", &aligned))
            .unwrap();
    }
    let (merge, merged) = callers
        .gather(
            &mut graph,
            Job::new("merge", |ctx| Ok(ctx.inputs().all("vcfs")?.join("+"))),
            "vcfs",
        )
        .unwrap();
    let (annotate, annotated) = graph
        .add_child_job(merge, tool("snpeff", "ann").input("in", &merged))
        .unwrap();

    let budget = ResourceBudget::new(8, Memory::gib(16)).unwrap();
    let scheduler = Scheduler::new(RunConfig::new(budget)).unwrap();
    let report = scheduler.run(graph).unwrap();

    assert!(report.is_success(), "{report}");
    assert_eq!(
        aligned.value().as_deref(),
        Some("sample1.fastq.trimmed.bam")
    );
    assert_eq!(
        merged.value().as_deref(),
        Some(
            "sample1.fastq.trimmed.bam.gatk.vcf+\
             sample1.fastq.trimmed.bam.fb.vcf+\
             sample1.fastq.trimmed.bam.pl.vcf"
        )
    );
    assert!(annotated.value().unwrap().ends_with(".pl.vcf.ann"));
    assert_eq!(report.state(annotate), Some(JobState::Completed));
    assert_eq!(report.by_label("merge").map(|record| record.id), Some(merge));
}

#[test]
fn samples_fail_independently() {
    common::init_tracing();
    let mut graph = Graph::new("cohort");
    let root = graph.root();
    let good = add_sample(&mut graph, "good").unwrap();
    let (bad_qc, _) = graph
        .add_child_job(
            root,
            Job::new("fastqc", |_| Err(StepError::new("truncated gzip stream"))),
        )
        .unwrap();
    let (bad_align, bad) = graph
        .add_child_job(
            bad_qc,
            tool("bwa-mem", "bam").arg("in", "bad.fastq".to_owned()),
        )
        .unwrap();

    let report = jobgraph::run(graph, ResourceBudget::new(4, Memory::gib(16)).unwrap()).unwrap();
    assert!(!report.is_success());
    assert_eq!(good.value().as_deref(), Some("good.fastq.trimmed.bam"));
    assert_eq!(report.state(bad_align), Some(JobState::Skipped));
    assert_eq!(bad.error().and_then(|error| error.origin()), Some(bad_qc));
}
