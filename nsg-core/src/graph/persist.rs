//! On-disk format of a built graph, plus the locked read/write helpers shared
//! with the k-NN graph loader.
//!
//! # Format
//!
//! Little-endian, no header beyond the entry point:
//!
//! ```text
//! u32 navigating_node
//! repeated for each point in id order:
//!     u32 neighbor_count
//!     neighbor_count × u32 neighbor_id
//! ```

use crate::error::{NsgError, Result, format_error};
use crate::graph::{NsgGraph, PointId};
use fs2::FileExt;
use memmap2::Mmap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

const WORD: usize = std::mem::size_of::<u32>();

/// Reads a little-endian `u32` at `offset`.
#[inline]
pub(crate) fn read_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    let b = bytes.get(offset..offset.checked_add(WORD)?)?;
    Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

/// Opens `path` under an exclusive lock, truncates it, runs `write` over a
/// buffered writer and syncs the result to disk.
pub(crate) fn write_locked<P, F>(path: P, write: F) -> Result<()>
where
    P: AsRef<Path>,
    F: FnOnce(&mut BufWriter<&File>) -> std::io::Result<()>,
{
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path.as_ref())?;

    // Lock before truncating.
    FileExt::try_lock_exclusive(&file)?;
    file.set_len(0)?;

    let mut writer = BufWriter::new(&file);
    write(&mut writer)?;
    writer.flush()?;
    drop(writer);

    file.sync_all()?;
    FileExt::unlock(&file)?;
    Ok(())
}

/// Opens `path` under a shared lock and maps it read-only.
///
/// Returns `Ok(None)` for an empty file, which cannot be mapped. The lock is
/// held for as long as the returned `File` lives.
pub(crate) fn map_locked<P: AsRef<Path>>(path: P) -> Result<Option<(File, Mmap)>> {
    let file = File::open(path.as_ref())?;
    FileExt::try_lock_shared(&file)?;

    if file.metadata()?.len() == 0 {
        return Ok(None);
    }

    // SAFETY: the file is held under a shared lock for the life of the map,
    // so cooperating writers cannot truncate it underneath us.
    let mmap = unsafe { Mmap::map(&file)? };
    Ok(Some((file, mmap)))
}

/// Writes `graph` to `path`.
pub(crate) fn save_graph<P: AsRef<Path>>(graph: &NsgGraph, path: P) -> Result<()> {
    let path = path.as_ref();
    write_locked(path, |w| {
        w.write_all(&graph.navigating_node().to_le_bytes())?;
        for list in graph.adjacency() {
            let count = u32::try_from(list.len()).map_err(std::io::Error::other)?;
            w.write_all(&count.to_le_bytes())?;
            for &q in list {
                w.write_all(&q.to_le_bytes())?;
            }
        }
        Ok(())
    })?;

    tracing::info!(path = %path.display(), points = graph.len(), "saved NSG index");
    Ok(())
}

/// Reads a graph from `path`, checking it describes `expected_n` points.
pub(crate) fn load_graph<P: AsRef<Path>>(path: P, expected_n: usize) -> Result<NsgGraph> {
    let path = path.as_ref();
    let (_file, mmap) = map_locked(path)?.ok_or_else(|| format_error(format!("{} is empty", path.display())))?;
    let graph = decode_graph(&mmap, expected_n)?;

    tracing::info!(
        path = %path.display(),
        points = graph.len(),
        navigating_node = graph.navigating_node(),
        "loaded NSG index"
    );
    Ok(graph)
}

/// Parses the index format out of `bytes`.
fn decode_graph(bytes: &[u8], expected_n: usize) -> Result<NsgGraph> {
    let navigating_node = read_u32(bytes, 0).ok_or_else(|| format_error("index file shorter than its header"))?;

    let mut neighbors: Vec<Vec<PointId>> = Vec::with_capacity(expected_n);
    let mut offset = WORD;
    while offset < bytes.len() {
        let count = read_u32(bytes, offset)
            .ok_or_else(|| format_error(format!("truncated degree field for point {}", neighbors.len())))?
            as usize;
        offset += WORD;

        let end = count
            .checked_mul(WORD)
            .and_then(|len| offset.checked_add(len))
            .filter(|&end| end <= bytes.len())
            .ok_or_else(|| {
                format_error(format!(
                    "point {} declares {} neighbors but the file ends first",
                    neighbors.len(),
                    count
                ))
            })?;

        neighbors.push(
            bytes[offset..end]
                .chunks_exact(WORD)
                .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect(),
        );
        offset = end;
    }

    let n = neighbors.len();
    if n != expected_n {
        return Err(NsgError::SizeMismatch { expected: expected_n, actual: n });
    }
    if navigating_node as usize >= n {
        return Err(format_error(format!("navigating node {navigating_node} out of range for {n} points")));
    }
    for (p, list) in neighbors.iter().enumerate() {
        if let Some(&q) = list.iter().find(|&&q| q as usize >= n) {
            return Err(format_error(format!("edge {p} -> {q} out of range for {n} points")));
        }
    }

    Ok(NsgGraph::from_parts(neighbors, navigating_node, 0))
}
