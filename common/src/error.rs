use std::{io, path::PathBuf};

use crate::task::Stage;

/// Código que se reporta cuando el ejecutable ni siquiera pudo arrancar
/// (mismo valor que usa un shell para "command not found").
pub const LAUNCH_FAILURE_CODE: i32 = 127;

/// Código que se reporta cuando el proceso murió por una señal.
pub const SIGNAL_EXIT_CODE: i32 = -1;

#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("{stage} task {ordinal} failed to launch: {command}: {source}")]
    Launch {
        stage: Stage,
        ordinal: usize,
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("{stage} task {ordinal} exited with code {}: {command}", display_code(.code))]
    Exit {
        stage: Stage,
        ordinal: usize,
        command: String,
        code: Option<i32>,
        stderr: String,
    },
}

fn display_code(code: &Option<i32>) -> String {
    match code {
        Some(c) => c.to_string(),
        None => "none (killed by signal)".to_string(),
    }
}

impl TaskError {
    pub fn stage(&self) -> Stage {
        match self {
            TaskError::Launch { stage, .. } | TaskError::Exit { stage, .. } => *stage,
        }
    }

    pub fn ordinal(&self) -> usize {
        match self {
            TaskError::Launch { ordinal, .. } | TaskError::Exit { ordinal, .. } => *ordinal,
        }
    }

    /// Código de salida, con centinelas para fallos de arranque y señales.
    pub fn exit_code(&self) -> i32 {
        match self {
            TaskError::Launch { .. } => LAUNCH_FAILURE_CODE,
            TaskError::Exit { code, .. } => code.unwrap_or(SIGNAL_EXIT_CODE),
        }
    }

    /// stderr capturado (vacío si el proceso no llegó a arrancar).
    pub fn stderr(&self) -> &str {
        match self {
            TaskError::Launch { .. } => "",
            TaskError::Exit { stderr, .. } => stderr,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("input error: {0}")]
    Input(String),

    #[error("{stage} stage failed{}", describe_failures(.failures))]
    Stage {
        stage: Stage,
        failures: Vec<TaskError>,
    },

    #[error("shuffle error: {message}")]
    Shuffle {
        message: String,
        #[source]
        source: Option<io::Error>,
    },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn describe_failures(failures: &Vec<TaskError>) -> String {
    let mut out = format!(" ({} task(s) failed)", failures.len());
    for f in failures {
        out.push_str("\n  ");
        out.push_str(&f.to_string());
        let stderr = f.stderr().trim_end();
        if !stderr.is_empty() {
            for line in stderr.lines() {
                out.push_str("\n    | ");
                out.push_str(line);
            }
        }
    }
    out
}

impl JobError {
    pub fn input(msg: impl Into<String>) -> Self {
        JobError::Input(msg.into())
    }

    pub fn shuffle(msg: impl Into<String>) -> Self {
        JobError::Shuffle {
            message: msg.into(),
            source: None,
        }
    }

    pub fn shuffle_io(msg: impl Into<String>, source: io::Error) -> Self {
        JobError::Shuffle {
            message: msg.into(),
            source: Some(source),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        JobError::Io {
            path: path.into(),
            source,
        }
    }

    /// Etapa en la que falló el job, si fue un fallo de tareas.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            JobError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_error_incluye_stderr_de_cada_tarea() {
        let err = JobError::Stage {
            stage: Stage::Map,
            failures: vec![
                TaskError::Exit {
                    stage: Stage::Map,
                    ordinal: 1,
                    command: "map.sh < a > b".to_string(),
                    code: Some(2),
                    stderr: "boom\nline two\n".to_string(),
                },
                TaskError::Launch {
                    stage: Stage::Map,
                    ordinal: 0,
                    command: "missing.sh".to_string(),
                    source: io::Error::new(io::ErrorKind::NotFound, "not found"),
                },
            ],
        };

        let msg = err.to_string();
        assert!(msg.starts_with("map stage failed (2 task(s) failed)"));
        assert!(msg.contains("map task 1 exited with code 2"));
        assert!(msg.contains("| boom"));
        assert!(msg.contains("| line two"));
        assert!(msg.contains("failed to launch"));
        assert_eq!(err.stage(), Some(Stage::Map));
    }

    #[test]
    fn exit_code_usa_centinelas() {
        let launch = TaskError::Launch {
            stage: Stage::Reduce,
            ordinal: 0,
            command: "x".to_string(),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        };
        let killed = TaskError::Exit {
            stage: Stage::Reduce,
            ordinal: 1,
            command: "x".to_string(),
            code: None,
            stderr: String::new(),
        };

        assert_eq!(launch.exit_code(), LAUNCH_FAILURE_CODE);
        assert_eq!(killed.exit_code(), SIGNAL_EXIT_CODE);
        assert!(killed.to_string().contains("killed by signal"));
    }
}
