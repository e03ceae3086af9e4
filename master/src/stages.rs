// master/src/stages.rs

use common::{
    engine::{self, Assignment, ShuffleStats},
    record::part_filename,
    JobError, Stage, TaskReport, TaskSpec,
};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use worker::run_stage;

use crate::{input::InputSegment, state::JobContext};

/* ===== Armado de tareas ===== */

/// Una tarea de map por segmento: mapper-input/part-i -> mapper-output/part-i
pub fn map_tasks(mapper: &Path, segments: &[InputSegment], out_dir: &Path) -> Vec<TaskSpec> {
    segments
        .iter()
        .map(|seg| TaskSpec {
            stage: Stage::Map,
            ordinal: seg.ordinal,
            program: mapper.to_path_buf(),
            args: Vec::new(),
            input: seg.path.clone(),
            output: out_dir.join(part_filename(seg.ordinal)),
        })
        .collect()
}

/// El partitioner corre una vez por salida de mapper y recibe R como único argumento.
pub fn partition_tasks(
    partitioner: &Path,
    map_outputs: &[PathBuf],
    num_reducers: usize,
    out_dir: &Path,
) -> Vec<TaskSpec> {
    map_outputs
        .iter()
        .enumerate()
        .map(|(i, input)| TaskSpec {
            stage: Stage::Partition,
            ordinal: i,
            program: partitioner.to_path_buf(),
            args: vec![num_reducers.to_string()],
            input: input.clone(),
            output: out_dir.join(part_filename(i)),
        })
        .collect()
}

/// Una tarea de reduce por partición, incluso las vacías.
pub fn reduce_tasks(reducer: &Path, partitions: &[PathBuf], out_dir: &Path) -> Vec<TaskSpec> {
    partitions
        .iter()
        .enumerate()
        .map(|(i, input)| TaskSpec {
            stage: Stage::Reduce,
            ordinal: i,
            program: reducer.to_path_buf(),
            args: Vec::new(),
            input: input.clone(),
            output: out_dir.join(part_filename(i)),
        })
        .collect()
}

fn outputs(reports: Vec<TaskReport>) -> Vec<PathBuf> {
    reports
        .into_iter()
        .map(|r| {
            if !r.stderr.is_empty() {
                debug!("{} {} stderr:\n{}", r.stage, r.ordinal, r.stderr.trim_end());
            }
            r.output
        })
        .collect()
}

/* ===== Etapas ===== */

pub async fn map_stage(ctx: &JobContext, segments: &[InputSegment]) -> Result<Vec<PathBuf>, JobError> {
    let tasks = map_tasks(&ctx.config.mapper, segments, &ctx.workdir.mapper_output());
    let reports = run_stage(Stage::Map, tasks, ctx.executor.clone(), ctx.concurrency).await?;
    Ok(outputs(reports))
}

/// Sólo corre si hay un partitioner ejecutable; devuelve un archivo de
/// asignaciones por cada salida de mapper.
pub async fn partition_stage(
    ctx: &JobContext,
    partitioner: &Path,
    map_outputs: &[PathBuf],
) -> Result<Vec<PathBuf>, JobError> {
    let tasks = partition_tasks(
        partitioner,
        map_outputs,
        ctx.config.num_reducers,
        &ctx.workdir.partitioner_output(),
    );
    let reports = run_stage(Stage::Partition, tasks, ctx.executor.clone(), ctx.concurrency).await?;
    Ok(outputs(reports))
}

/// Reparte y ordena en un hilo de bloqueo; deja R archivos en reducer-input.
pub async fn shuffle_stage(
    ctx: &JobContext,
    map_outputs: Vec<PathBuf>,
    assignments: Option<Vec<PathBuf>>,
) -> Result<ShuffleStats, JobError> {
    let out_dir = ctx.workdir.reducer_input();
    let num_partitions = ctx.config.num_reducers;
    let max_in_mem = ctx.config.max_in_mem_records;

    info!(
        "shuffle: {} archivos -> {} particiones",
        map_outputs.len(),
        num_partitions
    );

    let handle = tokio::task::spawn_blocking(move || {
        let assignment = match &assignments {
            Some(files) => Assignment::Files(files),
            None => Assignment::Hash,
        };
        engine::shuffle(&map_outputs, assignment, num_partitions, &out_dir, max_in_mem)
    });

    match handle.await {
        Ok(res) => res,
        Err(e) => Err(JobError::shuffle(format!("shuffle task aborted: {}", e))),
    }
}

pub async fn reduce_stage(ctx: &JobContext, stats: &ShuffleStats) -> Result<Vec<PathBuf>, JobError> {
    let inputs: Vec<PathBuf> = stats.partitions.iter().map(|p| p.path.clone()).collect();
    let tasks = reduce_tasks(&ctx.config.reducer, &inputs, &ctx.workdir.reducer_output());
    let reports = run_stage(Stage::Reduce, tasks, ctx.executor.clone(), ctx.concurrency).await?;
    Ok(outputs(reports))
}
