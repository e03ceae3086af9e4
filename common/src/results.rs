use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::job::JobId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: JobId,
    /// Directorio donde quedaron los outputs de este job
    pub output_dir: PathBuf,
    /// Nombres de archivos de salida dentro de output_dir (part-00000, ...)
    pub files: Vec<String>,

    /// -------- Métricas del job --------
    pub map_tasks: usize,
    pub reduce_tasks: usize,
    /// Registros que salieron de los mappers y pasaron por el shuffle
    pub intermediate_records: u64,
    pub output_bytes: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl JobSummary {
    pub fn elapsed_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}
