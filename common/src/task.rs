use serde::{Deserialize, Serialize};
use std::{fmt, path::PathBuf, time::Duration};

/// Etapa del pipeline a la que pertenece una tarea.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Preflight,
    Map,
    Partition,
    Reduce,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Preflight => "preflight",
            Stage::Map => "map",
            Stage::Partition => "partition",
            Stage::Reduce => "reduce",
        };
        f.write_str(name)
    }
}

/// Una invocación de un ejecutable sobre un archivo de entrada.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub stage: Stage,
    pub ordinal: usize,
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Se conecta al stdin del proceso
    pub input: PathBuf,
    /// Recibe el stdout del proceso tal cual
    pub output: PathBuf,
}

impl TaskSpec {
    /// Línea de comando reproducible, ej: "map.sh < part-00000 > part-00000"
    pub fn command_line(&self) -> String {
        let mut cmd = self.program.display().to_string();
        for a in &self.args {
            cmd.push(' ');
            cmd.push_str(a);
        }
        format!(
            "{} < {} > {}",
            cmd,
            self.input.display(),
            self.output.display()
        )
    }
}

/// Resultado de una tarea que terminó con código 0.
#[derive(Debug, Clone)]
pub struct TaskReport {
    pub stage: Stage,
    pub ordinal: usize,
    pub output: PathBuf,
    pub stderr: String,
    pub elapsed: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_line_incluye_argumentos_y_redirecciones() {
        let spec = TaskSpec {
            stage: Stage::Partition,
            ordinal: 3,
            program: PathBuf::from("/bin/part.sh"),
            args: vec!["4".to_string()],
            input: PathBuf::from("in/part-00003"),
            output: PathBuf::from("out/part-00003"),
        };

        assert_eq!(
            spec.command_line(),
            "/bin/part.sh 4 < in/part-00003 > out/part-00003"
        );
        assert_eq!(spec.stage.to_string(), "partition");
    }
}
