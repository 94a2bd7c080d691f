//! Integration tests for `VectorStore` loading.

use nsg_core::{NsgError, VectorStore};
use tempfile::NamedTempFile;

fn write_fvecs(rows: &[Vec<f32>]) -> NamedTempFile {
    let file = NamedTempFile::new().unwrap();
    let mut bytes = Vec::new();
    for row in rows {
        bytes.extend_from_slice(&(row.len() as i32).to_le_bytes());
        for x in row {
            bytes.extend_from_slice(&x.to_le_bytes());
        }
    }
    std::fs::write(file.path(), bytes).unwrap();
    file
}

#[test]
fn test_load_fvecs() {
    let rows = vec![vec![1.0, 2.0, 3.0], vec![-4.0, 5.5, 0.0]];
    let file = write_fvecs(&rows);

    let store = VectorStore::load_fvecs(file.path()).unwrap();
    assert_eq!(store.len(), 2);
    assert_eq!(store.dimensions(), 3);
    assert_eq!(store.vector(0), &[1.0, 2.0, 3.0]);
    assert_eq!(store.vector(1), &[-4.0, 5.5, 0.0]);
    assert_eq!(store.norm(0), 14.0);
}

#[test]
fn test_load_fvecs_matches_from_rows() {
    let rows: Vec<Vec<f32>> = (0..10).map(|i| vec![i as f32 * 0.5, -(i as f32), 1.0, 2.0]).collect();
    let file = write_fvecs(&rows);

    let loaded = VectorStore::load_fvecs(file.path()).unwrap();
    let direct = VectorStore::from_rows(&rows).unwrap();
    assert_eq!(loaded.as_flat(), direct.as_flat());
}

#[test]
fn test_load_fvecs_empty_or_missing() {
    let empty = NamedTempFile::new().unwrap();
    assert!(matches!(VectorStore::load_fvecs(empty.path()), Err(NsgError::EmptyInput(_))));
    assert!(matches!(
        VectorStore::load_fvecs("/nonexistent/base.fvecs"),
        Err(NsgError::EmptyInput(_))
    ));
}

#[test]
fn test_load_fvecs_format_errors() {
    // Records of different dimension
    let ragged = write_fvecs(&[vec![1.0, 2.0], vec![3.0, 4.0, 5.0, 6.0]]);
    assert!(matches!(VectorStore::load_fvecs(ragged.path()), Err(NsgError::Format(_))));

    // Non-positive dimension header
    let zero = NamedTempFile::new().unwrap();
    std::fs::write(zero.path(), 0i32.to_le_bytes()).unwrap();
    assert!(matches!(VectorStore::load_fvecs(zero.path()), Err(NsgError::Format(_))));

    // Trailing partial record
    let file = write_fvecs(&[vec![1.0, 2.0]]);
    let mut bytes = std::fs::read(file.path()).unwrap();
    bytes.extend_from_slice(&[0, 0]);
    std::fs::write(file.path(), bytes).unwrap();
    assert!(matches!(VectorStore::load_fvecs(file.path()), Err(NsgError::Format(_))));
}

#[test]
fn test_centroid_and_bounds() {
    let store = VectorStore::from_flat(vec![0.0, 0.0, 2.0, 4.0, 4.0, 8.0], 2).unwrap();
    assert_eq!(store.centroid(), vec![2.0, 4.0]);
    assert_eq!(store.get(2), Some(&[4.0, 8.0][..]));
    assert_eq!(store.get(3), None);
}
