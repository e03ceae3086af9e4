//! Ejecución de tareas: un subproceso por tarea y un pool acotado por etapa.

pub mod pool;
pub mod runner;

pub use pool::{default_concurrency, run_stage, StageFailure};
pub use runner::{probe, ProcessRunner, TaskExecutor};
