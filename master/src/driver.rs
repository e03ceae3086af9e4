// master/src/driver.rs

use chrono::Utc;
use common::{
    record::part_filename, JobConfig, JobError, JobSummary, PartitionerKind, Stage, SplitPolicy,
};
use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{debug, info, warn};
use worker::{default_concurrency, probe, ProcessRunner, TaskExecutor};

use crate::{
    input::{list_input_files, prepare_input},
    stages::{map_stage, partition_stage, reduce_stage, shuffle_stage},
    state::JobContext,
};

/// Corre un job completo con subprocesos reales.
pub async fn run_job(config: JobConfig) -> Result<JobSummary, JobError> {
    run_job_with(config, Arc::new(ProcessRunner)).await
}

/// Igual que `run_job` pero con un executor a elección (tests).
pub async fn run_job_with(
    mut config: JobConfig,
    executor: Arc<dyn TaskExecutor>,
) -> Result<JobSummary, JobError> {
    let started_at = Utc::now();

    /* ===== Validación: nada corre si algo está mal ===== */
    validate(&mut config)?;
    let input_files = list_input_files(&config.input)?;
    debug!("{} archivos de entrada", input_files.len());

    let concurrency = config.concurrency.unwrap_or_else(default_concurrency);
    let workdir_parent = config.workdir_root.clone().unwrap_or_else(std::env::temp_dir);
    let ctx = JobContext::new(config, executor, concurrency)
        .map_err(|e| JobError::io(workdir_parent, e))?;

    info!(
        "job {}: input={} output={} R={} concurrency={}",
        ctx.job_id,
        ctx.config.input.display(),
        ctx.config.output_dir.display(),
        ctx.config.num_reducers,
        ctx.concurrency
    );

    /* ===== Etapas ===== */
    let input = ctx.config.input.clone();
    let split = ctx.config.split;
    let mapper_input = ctx.workdir.mapper_input();
    let segments = blocking(mapper_input.clone(), move || {
        prepare_input(&input, split, &mapper_input)
    })
    .await?;
    info!("input: {} segmentos", segments.len());

    // Recién con la entrada leída entera se lanza el primer subproceso
    if ctx.config.preflight {
        preflight(&ctx.config).await?;
    }

    let map_outputs = map_stage(&ctx, &segments).await?;

    let assignments = match &ctx.config.partitioner {
        PartitionerKind::Executable(exe) => Some(partition_stage(&ctx, exe, &map_outputs).await?),
        PartitionerKind::Hash => None,
    };

    let stats = shuffle_stage(&ctx, map_outputs, assignments).await?;
    info!(
        "shuffle terminado: {} registros en {} particiones",
        stats.records,
        stats.partitions.len()
    );

    let reduce_outputs = reduce_stage(&ctx, &stats).await?;

    /* ===== Publicación ===== */
    let (files, output_bytes) = publish(&reduce_outputs, &ctx.config.output_dir).await?;

    let summary = JobSummary {
        job_id: ctx.job_id.clone(),
        output_dir: ctx.config.output_dir.clone(),
        files,
        map_tasks: segments.len(),
        reduce_tasks: reduce_outputs.len(),
        intermediate_records: stats.records,
        output_bytes,
        started_at,
        finished_at: Utc::now(),
    };
    info!(
        "job {} terminado en {} ms: {}",
        summary.job_id,
        summary.elapsed_ms(),
        summary.output_dir.display()
    );

    // ctx sale de scope acá: el directorio de trabajo se borra (o se conserva)
    Ok(summary)
}

/// Chequeos previos; resuelve los ejecutables a rutas absolutas.
fn validate(config: &mut JobConfig) -> Result<(), JobError> {
    if config.num_reducers == 0 {
        return Err(JobError::input("number of reducers must be at least 1"));
    }
    match config.split {
        SplitPolicy::Bytes(0) | SplitPolicy::Lines(0) => {
            return Err(JobError::input("split size must be greater than 0"));
        }
        _ => {}
    }
    if config.output_dir.exists() {
        return Err(JobError::input(format!(
            "Output directory already exists: {}",
            config.output_dir.display()
        )));
    }

    config.mapper = resolve_executable("mapper", &config.mapper)?;
    config.reducer = resolve_executable("reducer", &config.reducer)?;
    if let PartitionerKind::Executable(exe) = &config.partitioner {
        config.partitioner = PartitionerKind::Executable(resolve_executable("partitioner", exe)?);
    }
    Ok(())
}

fn resolve_executable(role: &str, path: &Path) -> Result<PathBuf, JobError> {
    let resolved = path.canonicalize().map_err(|e| {
        JobError::input(format!("{} executable '{}': {}", role, path.display(), e))
    })?;
    if !resolved.is_file() {
        return Err(JobError::input(format!(
            "{} executable '{}' is not a file",
            role,
            path.display()
        )));
    }
    Ok(resolved)
}

/// Corre cada ejecutable una vez con stdin vacío. Junta todos los fallos.
async fn preflight(config: &JobConfig) -> Result<(), JobError> {
    let mut failures = Vec::new();

    for (ordinal, program) in [&config.mapper, &config.reducer].into_iter().enumerate() {
        if let Err(e) = probe(program, &[], ordinal).await {
            warn!("{}", e);
            failures.push(e);
        }
    }
    if let PartitionerKind::Executable(exe) = &config.partitioner {
        if let Err(e) = probe(exe, &[config.num_reducers.to_string()], 2).await {
            warn!("{}", e);
            failures.push(e);
        }
    }

    if failures.is_empty() {
        debug!("preflight ok");
        Ok(())
    } else {
        Err(JobError::Stage {
            stage: Stage::Preflight,
            failures,
        })
    }
}

/// Trabajo de archivos fuera del runtime async.
async fn blocking<T, F>(path: PathBuf, f: F) -> Result<T, JobError>
where
    F: FnOnce() -> Result<T, JobError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(res) => res,
        Err(e) => Err(JobError::io(path, io::Error::new(io::ErrorKind::Other, e.to_string()))),
    }
}

/// Copia las salidas de los reducers a `output_dir`, que no debe existir.
/// Si una copia falla se borra el directorio recién creado; nunca uno ajeno.
async fn publish(outputs: &[PathBuf], output_dir: &Path) -> Result<(Vec<String>, u64), JobError> {
    if let Some(parent) = output_dir.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| JobError::io(parent, e))?;
    }
    tokio::fs::create_dir(output_dir).await.map_err(|e| {
        if e.kind() == io::ErrorKind::AlreadyExists {
            JobError::input(format!(
                "Output directory already exists: {}",
                output_dir.display()
            ))
        } else {
            JobError::io(output_dir, e)
        }
    })?;

    match copy_outputs(outputs, output_dir).await {
        Ok(res) => Ok(res),
        Err(e) => {
            if let Err(rm) = tokio::fs::remove_dir_all(output_dir).await {
                warn!("no se pudo borrar {}: {}", output_dir.display(), rm);
            }
            Err(e)
        }
    }
}

async fn copy_outputs(outputs: &[PathBuf], output_dir: &Path) -> Result<(Vec<String>, u64), JobError> {
    let mut files = Vec::with_capacity(outputs.len());
    let mut total: u64 = 0;
    for (i, src) in outputs.iter().enumerate() {
        let name = part_filename(i);
        let dest = output_dir.join(&name);
        total += tokio::fs::copy(src, &dest)
            .await
            .map_err(|e| JobError::io(src, e))?;
        files.push(name);
    }
    debug!("publicados {} archivos ({}B) en {}", files.len(), total, output_dir.display());
    Ok((files, total))
}
