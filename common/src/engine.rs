use std::{
    cmp::Reverse,
    collections::BinaryHeap,
    fs::{self, File},
    io::{self, BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use tracing::debug;

use crate::error::JobError;
use crate::record::{key_of, part_filename, partition_for, trim_newline};

/// Representa una partición física (archivo en disco) de entrada de un reducer.
#[derive(Debug, Clone)]
pub struct Partition {
    pub id: usize,
    pub path: PathBuf,
    pub records: u64,
    pub distinct_keys: u64,
}

#[derive(Debug, Clone)]
pub struct ShuffleStats {
    /// Total de registros que entraron al shuffle
    pub records: u64,
    pub partitions: Vec<Partition>,
}

/// De dónde sale la partición de cada registro.
#[derive(Debug, Clone, Copy)]
pub enum Assignment<'a> {
    /// md5(clave) % R
    Hash,
    /// Un archivo por cada salida de mapper, con un número de partición por línea,
    /// en el mismo orden que los registros.
    Files(&'a [PathBuf]),
}

/// Lee una línea (bytes) incluyendo el `\n`. Devuelve false en EOF.
/// Si la última línea no tiene terminador se le agrega uno, para que
/// no se pegue al primer registro del siguiente archivo.
fn read_record<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<bool> {
    buf.clear();
    if reader.read_until(b'\n', buf)? == 0 {
        return Ok(false);
    }
    if buf.last() != Some(&b'\n') {
        buf.push(b'\n');
    }
    Ok(true)
}

/* =========================
   Ordenamiento con spill a disco
   ========================= */

/// Ordena líneas completas (con su `\n`) byte a byte.
/// Mientras entren en memoria se ordenan ahí; si no, se escriben corridas
/// ordenadas a disco y al final se mezclan con un heap.
///
/// Las líneas se comparan con el terminador incluido: `K\n` y `K\t...\n`
/// quedan siempre contiguas porque ningún otro byte cae entre `\t` y `\n`
/// para una línea de otra clave que empiece con `K`.
struct SpillingSorter {
    buf: Vec<Vec<u8>>,
    runs: Vec<PathBuf>,
    dir: PathBuf,
    threshold: usize,
    spill_counter: usize,
    /// Máximo de corridas abiertas a la vez al mezclar
    fan_in: usize,
}

/// Límite de archivos abiertos por pasada de mezcla.
const MERGE_FAN_IN: usize = 64;

impl SpillingSorter {
    fn new(dir: &Path, threshold: usize) -> Self {
        Self {
            buf: Vec::new(),
            runs: Vec::new(),
            dir: dir.to_path_buf(),
            threshold: threshold.max(1),
            spill_counter: 0,
            fan_in: MERGE_FAN_IN,
        }
    }

    fn add(&mut self, line: Vec<u8>) -> io::Result<()> {
        self.buf.push(line);
        if self.buf.len() >= self.threshold {
            self.spill_one()?;
        }
        Ok(())
    }

    fn next_run_path(&mut self) -> PathBuf {
        self.spill_counter += 1;
        self.dir.join(format!("run-{:05}", self.spill_counter))
    }

    fn spill_one(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        if self.runs.is_empty() {
            fs::create_dir_all(&self.dir)?;
        }

        let path = self.next_run_path();
        let mut writer = BufWriter::new(File::create(&path)?);

        self.buf.sort_unstable();
        for line in self.buf.drain(..) {
            writer.write_all(&line)?;
        }
        writer.flush()?;

        debug!("spill {} ({} corridas)", path.display(), self.spill_counter);
        self.runs.push(path);
        Ok(())
    }

    /// Escribe todo ordenado en `output_path`. Devuelve (registros, claves distintas).
    fn finalize(mut self, output_path: &Path) -> io::Result<(u64, u64)> {
        let mut writer = KeyCountingWriter::new(BufWriter::new(File::create(output_path)?));

        if self.runs.is_empty() {
            // Caso común: todo entró en memoria
            self.buf.sort_unstable();
            for line in &self.buf {
                writer.write_record(line)?;
            }
        } else {
            self.spill_one()?;
            self.collapse_runs()?;
            merge_files(&self.runs, |line| writer.write_record(line))?;
            fs::remove_dir_all(&self.dir)?;
        }

        writer.finish()
    }

    /// Mezcla las corridas de a `fan_in` hasta que entren en una sola pasada.
    fn collapse_runs(&mut self) -> io::Result<()> {
        let fan_in = self.fan_in.max(2);
        while self.runs.len() > fan_in {
            let runs = std::mem::take(&mut self.runs);
            for chunk in runs.chunks(fan_in) {
                let path = self.next_run_path();
                let mut writer = BufWriter::new(File::create(&path)?);
                merge_files(chunk, |line| writer.write_all(line))?;
                writer.flush()?;
                for run in chunk {
                    fs::remove_file(run)?;
                }
                self.runs.push(path);
            }
            debug!("pasada de mezcla: {} -> {} corridas", runs.len(), self.runs.len());
        }
        Ok(())
    }
}

/// Mezcla k-vías de corridas ordenadas; `emit` recibe cada línea en orden.
fn merge_files<F>(runs: &[PathBuf], mut emit: F) -> io::Result<()>
where
    F: FnMut(&[u8]) -> io::Result<()>,
{
    let mut readers = Vec::with_capacity(runs.len());
    for run in runs {
        readers.push(BufReader::new(File::open(run)?));
    }

    let mut heap: BinaryHeap<Reverse<(Vec<u8>, usize)>> = BinaryHeap::new();
    for (idx, reader) in readers.iter_mut().enumerate() {
        let mut line = Vec::new();
        if read_record(reader, &mut line)? {
            heap.push(Reverse((line, idx)));
        }
    }

    while let Some(Reverse((line, idx))) = heap.pop() {
        emit(&line)?;

        let mut next = Vec::new();
        if read_record(&mut readers[idx], &mut next)? {
            heap.push(Reverse((next, idx)));
        }
    }
    Ok(())
}

/// Writer que cuenta registros y claves distintas (la entrada viene ordenada).
struct KeyCountingWriter<W: Write> {
    inner: W,
    last_key: Option<Vec<u8>>,
    records: u64,
    distinct_keys: u64,
}

impl<W: Write> KeyCountingWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            last_key: None,
            records: 0,
            distinct_keys: 0,
        }
    }

    fn write_record(&mut self, line: &[u8]) -> io::Result<()> {
        let key = key_of(line);
        if self.last_key.as_deref() != Some(key) {
            self.distinct_keys += 1;
            self.last_key = Some(key.to_vec());
        }
        self.records += 1;
        self.inner.write_all(line)
    }

    fn finish(mut self) -> io::Result<(u64, u64)> {
        self.inner.flush()?;
        Ok((self.records, self.distinct_keys))
    }
}

/// Ordena el archivo `input` por línea completa y deja el resultado en `output`.
pub fn sort_partition_file(
    input: &Path,
    output: &Path,
    spill_dir: &Path,
    max_in_mem_records: usize,
) -> io::Result<(u64, u64)> {
    let mut reader = BufReader::new(File::open(input)?);
    let mut sorter = SpillingSorter::new(spill_dir, max_in_mem_records);

    let mut line = Vec::new();
    while read_record(&mut reader, &mut line)? {
        sorter.add(std::mem::take(&mut line))?;
    }

    sorter.finalize(output)
}

/* =========================
   Shuffle a particiones en disco
   ========================= */

/// Lee el número de partición que el partitioner externo asignó a un registro.
fn parse_assignment(raw: &[u8], num_partitions: usize) -> Result<usize, String> {
    let text = String::from_utf8_lossy(trim_newline(raw));
    let n: i64 = text
        .trim()
        .parse()
        .map_err(|_| format!("partitioner printed a non-integer value: {:?}", text))?;
    if n < 0 || n as u64 >= num_partitions as u64 {
        return Err(format!(
            "partitioner printed {} but there are only {} reducers",
            n, num_partitions
        ));
    }
    Ok(n as usize)
}

/// Reparte los registros de cada salida de mapper en R buckets sin ordenar.
/// Lee en streaming: nunca tiene un archivo de mapper completo en memoria.
fn partition_to_buckets(
    inputs: &[PathBuf],
    assignment: Assignment<'_>,
    bucket_paths: &[PathBuf],
) -> Result<u64, JobError> {
    let num_partitions = bucket_paths.len();

    // Abrimos un writer por partición
    let mut writers: Vec<BufWriter<File>> = Vec::with_capacity(num_partitions);
    for path in bucket_paths {
        let file = File::create(path)
            .map_err(|e| JobError::shuffle_io(format!("creating {}", path.display()), e))?;
        writers.push(BufWriter::new(file));
    }

    let mut total: u64 = 0;
    let mut line = Vec::new();
    let mut assigned = Vec::new();

    for (idx, input) in inputs.iter().enumerate() {
        let read_err = |e: io::Error| JobError::shuffle_io(format!("reading {}", input.display()), e);
        let mut reader = BufReader::new(File::open(input).map_err(read_err)?);

        let mut assignments = match assignment {
            Assignment::Hash => None,
            Assignment::Files(files) => {
                let path = files.get(idx).ok_or_else(|| {
                    JobError::shuffle(format!("no partitioner output for {}", input.display()))
                })?;
                let file = File::open(path).map_err(|e| {
                    JobError::shuffle_io(format!("reading {}", path.display()), e)
                })?;
                Some((path, BufReader::new(file)))
            }
        };

        let mut records: u64 = 0;
        while read_record(&mut reader, &mut line).map_err(read_err)? {
            let pid = match assignments.as_mut() {
                None => partition_for(key_of(&line), num_partitions),
                Some((path, assigned_reader)) => {
                    let got = read_record(assigned_reader, &mut assigned).map_err(|e| {
                        JobError::shuffle_io(format!("reading {}", path.display()), e)
                    })?;
                    if !got {
                        return Err(JobError::shuffle(format!(
                            "partitioner output {} has fewer lines than {}",
                            path.display(),
                            input.display()
                        )));
                    }
                    parse_assignment(&assigned, num_partitions).map_err(JobError::shuffle)?
                }
            };

            writers[pid]
                .write_all(&line)
                .map_err(|e| JobError::shuffle_io(format!("writing bucket {}", pid), e))?;
            records += 1;
        }

        if let Some((path, assigned_reader)) = assignments.as_mut() {
            while read_record(assigned_reader, &mut assigned).map_err(|e| {
                JobError::shuffle_io(format!("reading {}", path.display()), e)
            })? {
                if !trim_newline(&assigned).iter().all(u8::is_ascii_whitespace) {
                    return Err(JobError::shuffle(format!(
                        "partitioner output {} has more lines than {}",
                        path.display(),
                        input.display()
                    )));
                }
            }
        }

        debug!("{} registros={}", input.display(), records);
        total += records;
    }

    // Flush de todos los writers
    for (pid, w) in writers.iter_mut().enumerate() {
        w.flush()
            .map_err(|e| JobError::shuffle_io(format!("writing bucket {}", pid), e))?;
    }

    Ok(total)
}

/// Etapa de shuffle completa:
///   1. reparte cada registro de `inputs` según su clave (hash o partitioner externo),
///   2. ordena cada partición por línea completa,
///   3. deja exactamente `num_partitions` archivos `part-NNNNN` en `output_dir`,
///      aunque alguno quede vacío.
pub fn shuffle(
    inputs: &[PathBuf],
    assignment: Assignment<'_>,
    num_partitions: usize,
    output_dir: &Path,
    max_in_mem_records: usize,
) -> Result<ShuffleStats, JobError> {
    if num_partitions == 0 {
        return Err(JobError::shuffle("number of partitions must be at least 1"));
    }

    fs::create_dir_all(output_dir)
        .map_err(|e| JobError::shuffle_io(format!("creating {}", output_dir.display()), e))?;

    let bucket_paths: Vec<PathBuf> = (0..num_partitions)
        .map(|pid| output_dir.join(format!("{}.unsorted", part_filename(pid))))
        .collect();

    let records = partition_to_buckets(inputs, assignment, &bucket_paths)?;

    let mut partitions = Vec::with_capacity(num_partitions);
    for (pid, bucket) in bucket_paths.iter().enumerate() {
        let path = output_dir.join(part_filename(pid));
        let spill_dir = output_dir.join(format!("{}.spill", part_filename(pid)));

        let (count, distinct_keys) =
            sort_partition_file(bucket, &path, &spill_dir, max_in_mem_records)
                .map_err(|e| JobError::shuffle_io(format!("sorting partition {}", pid), e))?;
        fs::remove_file(bucket)
            .map_err(|e| JobError::shuffle_io(format!("removing {}", bucket.display()), e))?;

        debug!(
            "{} registros={} claves_unicas={}",
            part_filename(pid),
            count,
            distinct_keys
        );
        partitions.push(Partition {
            id: pid,
            path,
            records: count,
            distinct_keys,
        });
    }

    Ok(ShuffleStats {
        records,
        partitions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{collections::HashMap, env, fs};

    fn temp_dir(sub: &str) -> PathBuf {
        let base = env::temp_dir().join("engine_tests").join(sub);
        let _ = fs::remove_dir_all(&base);
        fs::create_dir_all(&base).unwrap();
        base
    }

    fn write(path: &Path, content: &str) -> PathBuf {
        fs::write(path, content).unwrap();
        path.to_path_buf()
    }

    fn lines_of(path: &Path) -> Vec<String> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| l.to_string())
            .collect()
    }

    /// Todas las líneas de la misma clave están juntas y en un solo archivo.
    fn assert_grouped(partitions: &[Partition]) {
        let mut seen_in: HashMap<String, usize> = HashMap::new();
        for part in partitions {
            let lines = lines_of(&part.path);
            let mut closed: Vec<String> = Vec::new();
            let mut current: Option<String> = None;
            for line in &lines {
                let key = line.split('\t').next().unwrap().to_string();
                if current.as_ref() != Some(&key) {
                    assert!(!closed.contains(&key), "clave {key} partida en {}", part.id);
                    if let Some(prev) = current.take() {
                        closed.push(prev);
                    }
                    current = Some(key.clone());
                }
                if let Some(other) = seen_in.insert(key.clone(), part.id) {
                    assert_eq!(other, part.id, "clave {key} en dos particiones");
                }
            }
        }
    }

    /* ============
       SHUFFLE
       ============ */

    #[test]
    fn shuffle_agrupa_ordena_y_no_pierde_registros() {
        let tmp = temp_dir("basic");
        let m0 = write(&tmp.join("m0"), "hello\t1\nworld\t1\nb\t2\n");
        let m1 = write(&tmp.join("m1"), "hello\t1\nhadoop\t1\nb\t1\n");
        let out = tmp.join("reducer-input");

        for r in 1..=5 {
            let _ = fs::remove_dir_all(&out);
            let stats = shuffle(&[m0.clone(), m1.clone()], Assignment::Hash, r, &out, 1000).unwrap();

            assert_eq!(stats.records, 6);
            assert_eq!(stats.partitions.len(), r);

            let mut all: Vec<String> = Vec::new();
            for part in &stats.partitions {
                let lines = lines_of(&part.path);
                let mut sorted = lines.clone();
                sorted.sort();
                assert_eq!(lines, sorted);
                all.extend(lines);
            }
            all.sort();
            assert_eq!(
                all,
                vec!["b\t1", "b\t2", "hadoop\t1", "hello\t1", "hello\t1", "world\t1"]
            );
            assert_grouped(&stats.partitions);
        }
    }

    #[test]
    fn shuffle_crea_r_archivos_aunque_esten_vacios() {
        let tmp = temp_dir("empty");
        let m0 = write(&tmp.join("m0"), "");
        let out = tmp.join("reducer-input");

        let stats = shuffle(&[m0], Assignment::Hash, 4, &out, 1000).unwrap();

        assert_eq!(stats.records, 0);
        for pid in 0..4 {
            let path = out.join(part_filename(pid));
            assert!(path.exists());
            assert_eq!(fs::metadata(&path).unwrap().len(), 0);
        }
        // no quedan buckets intermedios
        assert_eq!(fs::read_dir(&out).unwrap().count(), 4);
    }

    #[test]
    fn shuffle_agrega_terminador_a_la_ultima_linea() {
        let tmp = temp_dir("no_newline");
        let m0 = write(&tmp.join("m0"), "a\t1");
        let m1 = write(&tmp.join("m1"), "a\t2");
        let out = tmp.join("reducer-input");

        let stats = shuffle(&[m0, m1], Assignment::Hash, 1, &out, 1000).unwrap();

        let content = fs::read_to_string(&stats.partitions[0].path).unwrap();
        assert_eq!(content, "a\t1\na\t2\n");
    }

    #[test]
    fn orden_por_linea_completa_mantiene_grupos_contiguos() {
        // "K\x01" es otra clave que cae entre "K" y "K\t..." si se ignora el \n
        let tmp = temp_dir("bytes");
        let m0 = write(&tmp.join("m0"), "K\t1\nK\x01\nK\n");
        let out = tmp.join("reducer-input");

        let stats = shuffle(&[m0], Assignment::Hash, 1, &out, 1000).unwrap();

        let content = fs::read(&stats.partitions[0].path).unwrap();
        assert_eq!(content, b"K\x01\nK\t1\nK\n".to_vec());
        assert_eq!(stats.partitions[0].distinct_keys, 2);
        assert_grouped(&stats.partitions);
    }

    #[test]
    fn shuffle_con_spill_a_disco_da_el_mismo_resultado() {
        let tmp = temp_dir("spill");
        let mut content = String::new();
        for i in 0..500 {
            content.push_str(&format!("k{}\t{}\n", (i * 7919) % 37, i));
        }
        let m0 = write(&tmp.join("m0"), &content);

        let in_mem = shuffle(&[m0.clone()], Assignment::Hash, 3, &tmp.join("a"), 100_000).unwrap();
        let spilled = shuffle(&[m0], Assignment::Hash, 3, &tmp.join("b"), 16).unwrap();

        for (a, b) in in_mem.partitions.iter().zip(spilled.partitions.iter()) {
            assert_eq!(fs::read(&a.path).unwrap(), fs::read(&b.path).unwrap());
            assert_eq!(a.distinct_keys, b.distinct_keys);
        }
        // los directorios de spill se borran
        assert_eq!(fs::read_dir(tmp.join("b")).unwrap().count(), 3);
    }

    #[test]
    fn mezcla_en_varias_pasadas_con_muchas_corridas() {
        let tmp = temp_dir("fan_in");
        let mut sorter = SpillingSorter::new(&tmp.join("spill"), 2);
        sorter.fan_in = 3;

        let mut expected = Vec::new();
        for i in 0..101 {
            let line = format!("k{:03}\t{}\n", (i * 37) % 101, i).into_bytes();
            expected.push(line.clone());
            sorter.add(line).unwrap();
        }
        expected.sort();
        // 50 corridas llenas más la del resto
        assert_eq!(sorter.runs.len(), 50);

        let out = tmp.join("sorted");
        let (records, distinct) = sorter.finalize(&out).unwrap();

        assert_eq!(records, 101);
        assert_eq!(distinct, 101);
        assert_eq!(fs::read(&out).unwrap(), expected.concat());
        assert!(!tmp.join("spill").exists());
    }

    #[test]
    fn shuffle_usa_asignaciones_del_partitioner() {
        let tmp = temp_dir("assign");
        let m0 = write(&tmp.join("m0"), "zeta\t1\nalfa\t1\nbeta\t1\n");
        let a0 = write(&tmp.join("a0"), "1\n0\n0\n");
        let out = tmp.join("reducer-input");
        let files = vec![a0];

        let stats = shuffle(&[m0], Assignment::Files(&files), 2, &out, 1000).unwrap();

        assert_eq!(lines_of(&stats.partitions[0].path), vec!["alfa\t1", "beta\t1"]);
        assert_eq!(lines_of(&stats.partitions[1].path), vec!["zeta\t1"]);
    }

    #[test]
    fn shuffle_rechaza_asignaciones_invalidas() {
        let tmp = temp_dir("assign_bad");
        let m0 = write(&tmp.join("m0"), "a\t1\nb\t1\n");
        let out = tmp.join("reducer-input");

        for bad in ["0\nx\n", "0\n2\n", "0\n", "0\n1\n1\n", "-1\n0\n"] {
            let a0 = write(&tmp.join("a0"), bad);
            let files = vec![a0];
            let res = shuffle(&[m0.clone()], Assignment::Files(&files), 2, &out, 1000);
            assert!(
                matches!(res, Err(JobError::Shuffle { .. })),
                "asignación {bad:?} debería fallar"
            );
        }
    }

    #[test]
    fn shuffle_propaga_error_al_leer_el_resto_de_asignaciones() {
        let tmp = temp_dir("assign_io");
        // sin registros el único read es el del resto; un directorio da EISDIR
        let m0 = write(&tmp.join("m0"), "");
        let a0 = tmp.join("a0");
        fs::create_dir_all(&a0).unwrap();
        let files = vec![a0];

        let res = shuffle(&[m0], Assignment::Files(&files), 2, &tmp.join("out"), 1000);

        assert!(matches!(res, Err(JobError::Shuffle { source: Some(_), .. })));
    }

    #[test]
    fn shuffle_falla_si_falta_un_archivo_de_mapper() {
        let tmp = temp_dir("missing");
        let res = shuffle(
            &[tmp.join("no_existe")],
            Assignment::Hash,
            2,
            &tmp.join("out"),
            1000,
        );
        assert!(matches!(res, Err(JobError::Shuffle { .. })));
    }
}
