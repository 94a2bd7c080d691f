//! Integration tests for the initial k-NN graph file.

use nsg_core::{BuildParams, KnnGraph, Metric, NsgError, NsgIndex, VectorStore};
use tempfile::NamedTempFile;

fn grid_store() -> VectorStore {
    let rows: Vec<Vec<f32>> = (0..36).map(|i| vec![(i % 6) as f32, (i / 6) as f32]).collect();
    VectorStore::from_rows(&rows).unwrap()
}

fn write_words(words: &[u32]) -> NamedTempFile {
    let file = NamedTempFile::new().unwrap();
    let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
    std::fs::write(file.path(), bytes).unwrap();
    file
}

#[test]
fn test_exact_graph_survives_file_round_trip() {
    let knn = KnnGraph::exact(&grid_store(), 4, Metric::L2).unwrap();
    let file = NamedTempFile::new().unwrap();
    knn.save(file.path()).unwrap();

    assert_eq!(std::fs::metadata(file.path()).unwrap().len(), 4 + 36 * 4 * 5);
    assert_eq!(KnnGraph::load(file.path()).unwrap(), knn);
}

#[test]
fn test_exact_excludes_self() {
    let knn = KnnGraph::exact(&grid_store(), 4, Metric::L2).unwrap();
    for p in 0..36 {
        assert!(!knn.neighbors(p).contains(&p));
        assert_eq!(knn.neighbors(p).len(), 4);
    }
    // Corner (0, 0): right and up neighbors first
    assert_eq!(&knn.neighbors(0)[..2], &[1, 6]);
}

#[test]
fn test_build_from_file() {
    let store = grid_store();
    let knn = KnnGraph::exact(&store, 6, Metric::L2).unwrap();
    let file = NamedTempFile::new().unwrap();
    knn.save(file.path()).unwrap();

    let mut from_file = NsgIndex::new(store.clone(), Metric::L2);
    from_file.build_from_file(file.path(), &BuildParams::new(12, 6, 30)).unwrap();

    let mut in_memory = NsgIndex::new(store, Metric::L2);
    in_memory.build(&knn, &BuildParams::new(12, 6, 30)).unwrap();

    assert_eq!(from_file.graph(), in_memory.graph());
}

#[test]
fn test_build_from_mismatched_file() {
    let file = write_words(&[1, 0, 1, 1, 0]);
    let mut index = NsgIndex::new(grid_store(), Metric::L2);
    let err = index.build_from_file(file.path(), &BuildParams::new(4, 1, 4)).unwrap_err();
    assert!(matches!(err, NsgError::InvalidParameter(_)));
    assert!(index.graph().is_none());
}

#[test]
fn test_load_errors() {
    let empty = NamedTempFile::new().unwrap();
    assert!(matches!(KnnGraph::load(empty.path()), Err(NsgError::EmptyInput(_))));

    // Header only
    let header_only = write_words(&[3]);
    assert!(matches!(KnnGraph::load(header_only.path()), Err(NsgError::EmptyInput(_))));

    // One record plus a stray word
    let ragged = write_words(&[1, 0, 1, 7]);
    assert!(matches!(KnnGraph::load(ragged.path()), Err(NsgError::Format(_))));

    // Record ids out of order
    let swapped = write_words(&[1, 1, 0, 0, 1]);
    assert!(matches!(KnnGraph::load(swapped.path()), Err(NsgError::Format(_))));
}

#[test]
fn test_padded_lists_build() {
    // Lists padded with u32::MAX, as an external builder would emit for
    // points with fewer than k neighbors.
    let store = VectorStore::from_rows(&[vec![0.0], vec![1.0], vec![2.0], vec![3.0]]).unwrap();
    let knn = KnnGraph::from_lists(vec![vec![1, u32::MAX], vec![0, 2], vec![1, 3], vec![2, u32::MAX]]);
    let file = NamedTempFile::new().unwrap();
    knn.save(file.path()).unwrap();

    let mut index = NsgIndex::new(store, Metric::L2);
    index.build_from_file(file.path(), &BuildParams::new(4, 2, 4)).unwrap();

    let graph = index.graph().unwrap();
    assert_eq!(graph.reachable_directed(), 4);
    assert!(graph.adjacency().iter().flatten().all(|&q| q < 4));
}
