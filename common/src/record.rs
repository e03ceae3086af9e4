//! Registros: líneas de bytes `clave<TAB>valor` tratadas como opacas.

/// Nombre de archivo con la convención de Hadoop: `part-00003`.
pub fn part_filename(num: usize) -> String {
    format!("part-{:05}", num)
}

/// Quita el terminador `\n` (y un `\r` previo) de una línea.
pub fn trim_newline(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Clave de un registro: todo lo anterior al primer tab,
/// o la línea completa (sin terminador) si no hay tab.
pub fn key_of(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    match line.iter().position(|b| *b == b'\t') {
        Some(idx) => &line[..idx],
        None => line,
    }
}

/// Hash estable de la clave: md5 interpretado como entero big-endian.
/// No depende del proceso ni de la corrida.
pub fn keyhash(key: &[u8]) -> u128 {
    let digest = md5::compute(key);
    u128::from_be_bytes(digest.0)
}

/// Partición (reducer) que le toca a una clave.
pub fn partition_for(key: &[u8], num_partitions: usize) -> usize {
    (keyhash(key) % num_partitions as u128) as usize
}
