use common::{
    error::{JobError, TaskError},
    task::{Stage, TaskReport, TaskSpec},
};
use std::{
    collections::BTreeMap,
    env, io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use sysinfo::{System, SystemExt};
use tokio::{sync::Semaphore, task::JoinSet};
use tracing::{info, warn};

use crate::runner::TaskExecutor;

/// Concurrencia por defecto de una etapa.
/// - WORKER_CONCURRENCY si está definida
/// - si no, la cantidad de CPUs lógicas
pub fn default_concurrency() -> usize {
    env::var("WORKER_CONCURRENCY")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .filter(|n| *n > 0)
        .unwrap_or_else(|| {
            let mut sys = System::new();
            sys.refresh_cpu();
            sys.cpus().len().max(1)
        })
}

/// Una etapa que no terminó bien.
#[derive(Debug)]
pub struct StageFailure {
    pub stage: Stage,
    /// En el orden en que se observaron
    pub errors: Vec<TaskError>,
    pub succeeded: usize,
    /// Tareas que no se lanzaron porque otra ya había fallado
    pub skipped: usize,
}

impl From<StageFailure> for JobError {
    fn from(f: StageFailure) -> Self {
        JobError::Stage {
            stage: f.stage,
            failures: f.errors,
        }
    }
}

enum Outcome {
    Done(Result<TaskReport, TaskError>),
    Skipped,
}

/// Ejecuta todas las tareas de una etapa, a lo sumo `concurrency` a la vez,
/// y espera a que terminen todas (barrera).
///
/// Después del primer fallo no se lanzan tareas nuevas; las que ya corren
/// terminan igual para no perder su stderr ni dejar archivos a medias.
pub async fn run_stage(
    stage: Stage,
    tasks: Vec<TaskSpec>,
    executor: Arc<dyn TaskExecutor>,
    concurrency: usize,
) -> Result<Vec<TaskReport>, StageFailure> {
    let concurrency = concurrency.max(1);
    info!("etapa {}: {} tareas (concurrency={})", stage, tasks.len(), concurrency);

    let sem = Arc::new(Semaphore::new(concurrency));
    let failed = Arc::new(AtomicBool::new(false));

    // ordinal -> comando, para poder reportar tareas que paniquearon
    let mut pending: BTreeMap<usize, String> = tasks
        .iter()
        .map(|t| (t.ordinal, t.command_line()))
        .collect();

    let mut set = JoinSet::new();
    for spec in tasks {
        let sem = sem.clone();
        let failed = failed.clone();
        let executor = executor.clone();

        set.spawn(async move {
            let Ok(_permit) = sem.acquire_owned().await else {
                return (spec.ordinal, Outcome::Skipped);
            };
            if failed.load(Ordering::SeqCst) {
                return (spec.ordinal, Outcome::Skipped);
            }

            let res = executor.run(&spec).await;
            if res.is_err() {
                failed.store(true, Ordering::SeqCst);
            }
            (spec.ordinal, Outcome::Done(res))
        });
    }

    let mut reports = Vec::new();
    let mut errors = Vec::new();
    let mut skipped = 0;

    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((ordinal, outcome)) => {
                pending.remove(&ordinal);
                match outcome {
                    Outcome::Done(Ok(report)) => reports.push(report),
                    Outcome::Done(Err(e)) => {
                        warn!("{}", e);
                        errors.push(e);
                    }
                    Outcome::Skipped => skipped += 1,
                }
            }
            Err(e) => {
                warn!("panic o join error en etapa {}: {:?}", stage, e);
                failed.store(true, Ordering::SeqCst);
            }
        }
    }

    // Lo que quedó en pending terminó con panic
    for (ordinal, command) in pending {
        errors.push(TaskError::Launch {
            stage,
            ordinal,
            command,
            source: io::Error::new(io::ErrorKind::Other, "task panicked"),
        });
    }

    if !errors.is_empty() {
        return Err(StageFailure {
            stage,
            errors,
            succeeded: reports.len(),
            skipped,
        });
    }

    reports.sort_by_key(|r| r.ordinal);
    info!("etapa {} terminada: {} tareas ok", stage, reports.len());
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::{
        path::PathBuf,
        sync::atomic::AtomicUsize,
        time::Duration,
    };

    /// Executor en memoria: falla en los ordinales indicados y mide concurrencia.
    struct FakeExecutor {
        fail_on: Vec<usize>,
        running: AtomicUsize,
        max_running: AtomicUsize,
        started: AtomicUsize,
        delay: Duration,
    }

    impl FakeExecutor {
        fn new(fail_on: Vec<usize>, delay_ms: u64) -> Self {
            Self {
                fail_on,
                running: AtomicUsize::new(0),
                max_running: AtomicUsize::new(0),
                started: AtomicUsize::new(0),
                delay: Duration::from_millis(delay_ms),
            }
        }
    }

    #[async_trait]
    impl TaskExecutor for FakeExecutor {
        async fn run(&self, spec: &TaskSpec) -> Result<TaskReport, TaskError> {
            self.started.fetch_add(1, Ordering::SeqCst);
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now, Ordering::SeqCst);

            tokio::time::sleep(self.delay).await;
            self.running.fetch_sub(1, Ordering::SeqCst);

            if self.fail_on.contains(&spec.ordinal) {
                return Err(TaskError::Exit {
                    stage: spec.stage,
                    ordinal: spec.ordinal,
                    command: spec.command_line(),
                    code: Some(1),
                    stderr: format!("fallo {}\n", spec.ordinal),
                });
            }
            Ok(TaskReport {
                stage: spec.stage,
                ordinal: spec.ordinal,
                output: spec.output.clone(),
                stderr: String::new(),
                elapsed: self.delay,
            })
        }
    }

    fn tasks(n: usize) -> Vec<TaskSpec> {
        (0..n)
            .map(|i| TaskSpec {
                stage: Stage::Map,
                ordinal: i,
                program: PathBuf::from("fake"),
                args: Vec::new(),
                input: PathBuf::from(format!("in/{i}")),
                output: PathBuf::from(format!("out/{i}")),
            })
            .collect()
    }

    #[tokio::test]
    async fn run_stage_respeta_concurrencia_y_ordena_reportes() {
        let exec = Arc::new(FakeExecutor::new(vec![], 20));

        let reports = run_stage(Stage::Map, tasks(8), exec.clone(), 3).await.unwrap();

        let ordinals: Vec<usize> = reports.iter().map(|r| r.ordinal).collect();
        assert_eq!(ordinals, (0..8).collect::<Vec<_>>());
        assert!(exec.max_running.load(Ordering::SeqCst) <= 3);
        assert_eq!(exec.started.load(Ordering::SeqCst), 8);
    }

    #[tokio::test]
    async fn run_stage_sin_tareas_es_ok() {
        let exec = Arc::new(FakeExecutor::new(vec![], 0));
        let reports = run_stage(Stage::Reduce, Vec::new(), exec, 4).await.unwrap();
        assert!(reports.is_empty());
    }

    #[tokio::test]
    async fn run_stage_deja_terminar_a_las_hermanas_y_junta_errores() {
        // concurrencia 4: las 4 primeras arrancan juntas, 1 y 2 fallan
        let exec = Arc::new(FakeExecutor::new(vec![1, 2], 30));

        let failure = run_stage(Stage::Map, tasks(4), exec.clone(), 4)
            .await
            .unwrap_err();

        assert_eq!(failure.stage, Stage::Map);
        let mut failed: Vec<usize> = failure.errors.iter().map(|e| e.ordinal()).collect();
        failed.sort();
        assert_eq!(failed, vec![1, 2]);
        assert_eq!(failure.succeeded, 2);
        assert_eq!(failure.skipped, 0);
        assert_eq!(exec.started.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn run_stage_no_lanza_tareas_nuevas_despues_de_un_fallo() {
        // concurrencia 1: la tarea 0 falla y el resto no arranca
        let exec = Arc::new(FakeExecutor::new(vec![0], 5));

        let failure = run_stage(Stage::Reduce, tasks(5), exec.clone(), 1)
            .await
            .unwrap_err();

        assert_eq!(failure.errors.len(), 1);
        assert_eq!(failure.errors[0].stderr(), "fallo 0\n");
        assert_eq!(failure.skipped, 4);
        assert_eq!(exec.started.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn default_concurrency_es_positiva() {
        assert!(default_concurrency() >= 1);
    }
}
