use serde::{Deserialize, Serialize};
use std::{env, path::PathBuf};

pub type JobId = String;

/// Número de reducers por defecto (R).
pub const DEFAULT_NUM_REDUCERS: usize = 4;

/// Archivos de entrada más grandes que esto se parten en varios segmentos.
pub const DEFAULT_SPLIT_BYTES: u64 = 1 << 20;

const DEFAULT_MAX_IN_MEM_RECORDS: usize = 500_000;

/// Umbral de registros en memoria al ordenar una partición.
/// Se puede sobreescribir con la env var MAX_IN_MEM_RECORDS.
pub fn max_in_mem_records() -> usize {
    env::var("MAX_IN_MEM_RECORDS")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(DEFAULT_MAX_IN_MEM_RECORDS)
}

/// Cómo se parte un archivo de entrada grande en segmentos para los mappers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitPolicy {
    /// Ningún segmento supera este tamaño en bytes (salvo una línea sola más larga).
    Bytes(u64),
    /// Segmentos de a lo sumo esta cantidad de líneas.
    Lines(usize),
}

impl Default for SplitPolicy {
    fn default() -> Self {
        SplitPolicy::Bytes(DEFAULT_SPLIT_BYTES)
    }
}

/// Quién decide a qué reducer va cada registro.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionerKind {
    /// md5(clave) % R
    #[default]
    Hash,
    /// Ejecutable que recibe R como argumento y escribe un número de partición por línea.
    Executable(PathBuf),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Directorio de entrada, archivo único o patrón glob, ej: "data/*.txt"
    pub input: PathBuf,

    /// Directorio de salida; no debe existir todavía
    pub output_dir: PathBuf,

    pub mapper: PathBuf,
    pub reducer: PathBuf,

    /// Cantidad de reducers (R)
    pub num_reducers: usize,

    pub split: SplitPolicy,
    pub partitioner: PartitionerKind,

    /// Máximo de subprocesos simultáneos por etapa
    pub concurrency: Option<usize>,

    pub max_in_mem_records: usize,

    /// Conserva el directorio de trabajo al terminar (debug)
    pub keep_workdir: bool,

    /// Dónde se crea el directorio de trabajo; por defecto el temp del sistema
    pub workdir_root: Option<PathBuf>,

    /// Ejecuta mapper y reducer con entrada vacía antes de empezar
    pub preflight: bool,
}

impl JobConfig {
    pub fn new(
        input: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        mapper: impl Into<PathBuf>,
        reducer: impl Into<PathBuf>,
    ) -> Self {
        Self {
            input: input.into(),
            output_dir: output_dir.into(),
            mapper: mapper.into(),
            reducer: reducer.into(),
            num_reducers: DEFAULT_NUM_REDUCERS,
            split: SplitPolicy::default(),
            partitioner: PartitionerKind::default(),
            concurrency: None,
            max_in_mem_records: max_in_mem_records(),
            keep_workdir: false,
            workdir_root: None,
            preflight: true,
        }
    }

    pub fn with_reducers(mut self, n: usize) -> Self {
        self.num_reducers = n;
        self
    }

    pub fn with_split(mut self, split: SplitPolicy) -> Self {
        self.split = split;
        self
    }

    pub fn with_partitioner(mut self, partitioner: PartitionerKind) -> Self {
        self.partitioner = partitioner;
        self
    }

    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.concurrency = Some(n);
        self
    }

    pub fn keep_workdir(mut self, keep: bool) -> Self {
        self.keep_workdir = keep;
        self
    }

    pub fn with_workdir_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workdir_root = Some(root.into());
        self
    }

    pub fn with_preflight(mut self, preflight: bool) -> Self {
        self.preflight = preflight;
        self
    }
}
