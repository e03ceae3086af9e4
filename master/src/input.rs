//! Particionado de la entrada: un segmento por mapper.

use common::{record::part_filename, JobError, SplitPolicy};
use glob::glob;
use std::{
    fs::{self, File},
    io::{self, BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};
use tracing::debug;

/// Rango de bytes de un solo archivo de entrada, cortado en fin de línea,
/// copiado a `path` para que lo consuma un mapper.
#[derive(Debug, Clone)]
pub struct InputSegment {
    pub ordinal: usize,
    pub source: PathBuf,
    pub offset: u64,
    pub len: u64,
    pub path: PathBuf,
}

/// Archivos de entrada en orden lexicográfico.
/// - directorio: sus archivos regulares (los subdirectorios se ignoran)
/// - archivo: ese archivo
/// - cualquier otra cosa: patrón glob, ej: "data/*.txt"
pub fn list_input_files(input: &Path) -> Result<Vec<PathBuf>, JobError> {
    let mut files = Vec::new();

    if input.is_dir() {
        let entries = fs::read_dir(input).map_err(|e| JobError::io(input, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| JobError::io(input, e))?;
            if entry.path().is_file() {
                files.push(entry.path());
            }
        }
    } else if input.is_file() {
        files.push(input.to_path_buf());
    } else {
        let pattern = input.to_string_lossy();
        let paths = glob(&pattern)
            .map_err(|e| JobError::input(format!("invalid input pattern '{}': {}", pattern, e)))?;
        for entry in paths {
            let path = entry.map_err(|e| JobError::input(format!("unreadable input: {}", e)))?;
            if path.is_file() {
                files.push(path);
            }
        }
        if files.is_empty() && !pattern.contains(['*', '?', '[']) {
            return Err(JobError::input(format!(
                "Can't find input '{}'",
                input.display()
            )));
        }
    }

    if files.is_empty() {
        return Err(JobError::input(format!(
            "no input files found in '{}'",
            input.display()
        )));
    }

    files.sort();
    Ok(files)
}

/// Segmento que se está escribiendo.
struct OpenSegment {
    writer: BufWriter<File>,
    segment: InputSegment,
    lines: usize,
}

impl OpenSegment {
    fn create(ordinal: usize, source: &Path, offset: u64, out_dir: &Path) -> io::Result<Self> {
        let path = out_dir.join(part_filename(ordinal));
        Ok(Self {
            writer: BufWriter::new(File::create(&path)?),
            segment: InputSegment {
                ordinal,
                source: source.to_path_buf(),
                offset,
                len: 0,
                path,
            },
            lines: 0,
        })
    }

    /// ¿Agregar esta línea haría que el segmento se pase del límite?
    fn is_full_for(&self, policy: SplitPolicy, line_len: u64) -> bool {
        if self.lines == 0 {
            // una línea nunca se parte, aunque sola supere el límite
            return false;
        }
        match policy {
            SplitPolicy::Bytes(max) => self.segment.len + line_len > max,
            SplitPolicy::Lines(max) => self.lines >= max,
        }
    }

    fn push(&mut self, line: &[u8]) -> io::Result<()> {
        self.writer.write_all(line)?;
        self.segment.len += line.len() as u64;
        self.lines += 1;
        Ok(())
    }

    fn close(mut self) -> io::Result<InputSegment> {
        self.writer.flush()?;
        Ok(self.segment)
    }
}

fn unreadable(source: &Path, e: io::Error) -> JobError {
    JobError::input(format!("can't read input '{}': {}", source.display(), e))
}

/// Parte un archivo en segmentos según `policy`. Los bytes se copian tal cual.
/// Los errores al leer `source` son de entrada; los de escritura, de I/O.
fn split_file(
    source: &Path,
    policy: SplitPolicy,
    out_dir: &Path,
    first_ordinal: usize,
) -> Result<Vec<InputSegment>, JobError> {
    let file = File::open(source).map_err(|e| unreadable(source, e))?;
    let mut reader = BufReader::new(file);
    let write_err = |e: io::Error| JobError::io(out_dir, e);

    let mut segments = Vec::new();
    let mut current = OpenSegment::create(first_ordinal, source, 0, out_dir).map_err(write_err)?;
    let mut offset: u64 = 0;
    let mut line = Vec::new();

    loop {
        line.clear();
        let n = reader
            .read_until(b'\n', &mut line)
            .map_err(|e| unreadable(source, e))?;
        if n == 0 {
            break;
        }
        if current.is_full_for(policy, line.len() as u64) {
            let ordinal = current.segment.ordinal + 1;
            segments.push(current.close().map_err(write_err)?);
            current = OpenSegment::create(ordinal, source, offset, out_dir).map_err(write_err)?;
        }
        current.push(&line).map_err(write_err)?;
        offset += line.len() as u64;
    }
    segments.push(current.close().map_err(write_err)?);

    Ok(segments)
}

/// Resuelve la entrada y la deja en `out_dir` como part-00000, part-00001, ...
/// Los archivos nunca se combinan entre sí.
pub fn prepare_input(
    input: &Path,
    policy: SplitPolicy,
    out_dir: &Path,
) -> Result<Vec<InputSegment>, JobError> {
    let files = list_input_files(input)?;

    let mut segments: Vec<InputSegment> = Vec::new();
    let mut total_size: u64 = 0;

    for file in &files {
        let parts = split_file(file, policy, out_dir, segments.len())?;
        let size: u64 = parts.iter().map(|s| s.len).sum();
        total_size += size;
        debug!(
            "input {} size={}B partitions={}",
            file.display(),
            size,
            parts.len()
        );
        segments.extend(parts);
    }

    debug!("total input size={}B segments={}", total_size, segments.len());
    Ok(segments)
}
