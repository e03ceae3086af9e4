use async_trait::async_trait;
use common::{
    error::TaskError,
    task::{Stage, TaskReport, TaskSpec},
};
use std::{
    fs::File,
    io,
    path::Path,
    process::Stdio,
    time::Instant,
};
use tokio::process::Command;
use tracing::debug;

/// Cualquier cosa que consuma un archivo por stdin, produzca stdout y
/// reporte un código de salida puede hacer de mapper o reducer.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn run(&self, spec: &TaskSpec) -> Result<TaskReport, TaskError>;
}

/// Ejecuta cada tarea como un subproceso del sistema.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

fn launch_error(spec: &TaskSpec, source: io::Error) -> TaskError {
    TaskError::Launch {
        stage: spec.stage,
        ordinal: spec.ordinal,
        command: spec.command_line(),
        source,
    }
}

#[async_trait]
impl TaskExecutor for ProcessRunner {
    async fn run(&self, spec: &TaskSpec) -> Result<TaskReport, TaskError> {
        let started = Instant::now();

        let input = File::open(&spec.input).map_err(|e| launch_error(spec, e))?;
        let output = File::create(&spec.output).map_err(|e| launch_error(spec, e))?;

        debug!("{} task {}: {}", spec.stage, spec.ordinal, spec.command_line());

        let child = Command::new(&spec.program)
            .args(&spec.args)
            .stdin(Stdio::from(input))
            .stdout(Stdio::from(output))
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| launch_error(spec, e))?;

        let out = child
            .wait_with_output()
            .await
            .map_err(|e| launch_error(spec, e))?;
        let stderr = String::from_utf8_lossy(&out.stderr).into_owned();

        if !out.status.success() {
            return Err(TaskError::Exit {
                stage: spec.stage,
                ordinal: spec.ordinal,
                command: spec.command_line(),
                code: out.status.code(),
                stderr,
            });
        }

        Ok(TaskReport {
            stage: spec.stage,
            ordinal: spec.ordinal,
            output: spec.output.clone(),
            stderr,
            elapsed: started.elapsed(),
        })
    }
}

/// Ejecuta `program` con stdin vacío y exige código 0.
/// Detecta shebangs rotos o permisos faltantes antes de procesar datos.
pub async fn probe(program: &Path, args: &[String], ordinal: usize) -> Result<(), TaskError> {
    let mut command = program.display().to_string();
    for a in args {
        command.push(' ');
        command.push_str(a);
    }
    command.push_str(" < /dev/null");

    let out = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|source| TaskError::Launch {
            stage: Stage::Preflight,
            ordinal,
            command: command.clone(),
            source,
        })?;

    if out.status.success() {
        Ok(())
    } else {
        Err(TaskError::Exit {
            stage: Stage::Preflight,
            ordinal,
            command,
            code: out.status.code(),
            stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
        })
    }
}
