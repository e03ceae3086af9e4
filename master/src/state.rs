// master/src/state.rs

use common::{JobConfig, JobId};
use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};
use tempfile::TempDir;
use tracing::{debug, info};
use worker::TaskExecutor;

pub const MAPPER_INPUT_DIR: &str = "mapper-input";
pub const MAPPER_OUTPUT_DIR: &str = "mapper-output";
pub const PARTITIONER_OUTPUT_DIR: &str = "partitioner-output";
pub const REDUCER_INPUT_DIR: &str = "reducer-input";
pub const REDUCER_OUTPUT_DIR: &str = "reducer-output";

/// Directorio de trabajo de un job. Se borra al hacer drop,
/// salvo que se haya pedido conservarlo.
#[derive(Debug)]
pub struct WorkDir {
    root: PathBuf,
    // None cuando el directorio se conserva
    guard: Option<TempDir>,
}

impl WorkDir {
    pub fn create(parent: Option<&Path>, keep: bool) -> io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("minihadoop-");
        let dir = match parent {
            Some(p) => {
                fs::create_dir_all(p)?;
                builder.tempdir_in(p)?
            }
            None => builder.tempdir()?,
        };

        let root = dir.path().to_path_buf();
        for sub in [
            MAPPER_INPUT_DIR,
            MAPPER_OUTPUT_DIR,
            PARTITIONER_OUTPUT_DIR,
            REDUCER_INPUT_DIR,
            REDUCER_OUTPUT_DIR,
        ] {
            fs::create_dir(root.join(sub))?;
        }

        let guard = if keep {
            #[allow(deprecated)]
            let _ = dir.into_path();
            None
        } else {
            Some(dir)
        };
        debug!("tmpdir={}", root.display());

        Ok(Self { root, guard })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn is_kept(&self) -> bool {
        self.guard.is_none()
    }

    pub fn mapper_input(&self) -> PathBuf {
        self.root.join(MAPPER_INPUT_DIR)
    }

    pub fn mapper_output(&self) -> PathBuf {
        self.root.join(MAPPER_OUTPUT_DIR)
    }

    pub fn partitioner_output(&self) -> PathBuf {
        self.root.join(PARTITIONER_OUTPUT_DIR)
    }

    pub fn reducer_input(&self) -> PathBuf {
        self.root.join(REDUCER_INPUT_DIR)
    }

    pub fn reducer_output(&self) -> PathBuf {
        self.root.join(REDUCER_OUTPUT_DIR)
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        if self.guard.is_none() {
            info!("directorio de trabajo conservado en {}", self.root.display());
        }
    }
}

/// Todo lo que una etapa necesita saber del job en curso.
/// Lo crea el driver y vive lo mismo que el job.
pub struct JobContext {
    pub job_id: JobId,
    pub config: JobConfig,
    pub workdir: WorkDir,
    pub executor: Arc<dyn TaskExecutor>,
    pub concurrency: usize,
}

impl JobContext {
    pub fn new(
        config: JobConfig,
        executor: Arc<dyn TaskExecutor>,
        concurrency: usize,
    ) -> io::Result<Self> {
        let job_id = uuid::Uuid::new_v4().to_string();
        let workdir = WorkDir::create(config.workdir_root.as_deref(), config.keep_workdir)?;

        // Queda junto a los archivos intermedios para depurar con --keep-tmp
        let meta = serde_json::json!({ "job_id": job_id, "config": config });
        fs::write(
            workdir.path().join("job.json"),
            serde_json::to_vec_pretty(&meta)?,
        )?;

        Ok(Self {
            job_id,
            config,
            workdir,
            executor,
            concurrency,
        })
    }
}
