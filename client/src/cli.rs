use anyhow::Result;
use clap::{ArgGroup, Parser};
use common::{JobConfig, JobSummary, PartitionerKind, SplitPolicy, DEFAULT_NUM_REDUCERS};
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "minihadoop")]
#[command(about = "Hadoop Streaming en una sola máquina: mapper y reducer son ejecutables")]
#[command(group(ArgGroup::new("split").args(["split_bytes", "split_lines"])))]
pub struct Cli {
    /// Directorio de entrada, archivo único o patrón glob
    #[arg(short, long, value_name = "PATH")]
    pub input: PathBuf,

    /// Directorio de salida (no debe existir)
    #[arg(short, long, value_name = "DIR")]
    pub output: PathBuf,

    #[arg(short, long, value_name = "EXE")]
    pub mapper: PathBuf,

    #[arg(short, long, value_name = "EXE")]
    pub reducer: PathBuf,

    /// Cantidad de reducers (R)
    #[arg(long, value_name = "N", default_value_t = DEFAULT_NUM_REDUCERS)]
    pub num_reducers: usize,

    /// Ejecutable que recibe R y escribe una partición por línea
    #[arg(long, value_name = "EXE")]
    pub partitioner: Option<PathBuf>,

    /// Parte archivos grandes en segmentos de a lo sumo B bytes
    #[arg(long, value_name = "B")]
    pub split_bytes: Option<u64>,

    /// Parte archivos en segmentos de a lo sumo L líneas
    #[arg(long, value_name = "L")]
    pub split_lines: Option<usize>,

    /// Subprocesos simultáneos por etapa (default: WORKER_CONCURRENCY o CPUs)
    #[arg(long, value_name = "C")]
    pub concurrency: Option<usize>,

    /// Conserva el directorio de trabajo
    #[arg(long)]
    pub keep_tmp: bool,

    /// No prueba los ejecutables antes de empezar
    #[arg(long)]
    pub no_preflight: bool,

    /// Imprime el resumen como JSON
    #[arg(long)]
    pub json: bool,

    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    pub fn job_config(&self) -> JobConfig {
        let mut config = JobConfig::new(&self.input, &self.output, &self.mapper, &self.reducer)
            .with_reducers(self.num_reducers)
            .with_preflight(!self.no_preflight)
            .keep_workdir(self.keep_tmp);

        if let Some(b) = self.split_bytes {
            config = config.with_split(SplitPolicy::Bytes(b));
        } else if let Some(l) = self.split_lines {
            config = config.with_split(SplitPolicy::Lines(l));
        }
        if let Some(p) = &self.partitioner {
            config = config.with_partitioner(PartitionerKind::Executable(p.clone()));
        }
        if let Some(c) = self.concurrency {
            config = config.with_concurrency(c);
        }
        config
    }
}

/// RUST_LOG manda; si no está, info (o debug con -v).
fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_summary(s: &JobSummary) {
    println!("Job {} terminado", s.job_id);
    println!("  salida: {}", s.output_dir.display());
    println!(
        "  tareas: map={}, reduce={}",
        s.map_tasks, s.reduce_tasks
    );
    println!("  registros intermedios: {}", s.intermediate_records);
    println!("  bytes de salida: {}", s.output_bytes);
    println!("  duración: {} ms", s.elapsed_ms());
    println!("  archivos:");
    for f in &s.files {
        println!("    - {}", f);
    }
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = cli.job_config();
    debug!("config: {:?}", config);
    let summary = master::run_job(config).await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }
    Ok(())
}
