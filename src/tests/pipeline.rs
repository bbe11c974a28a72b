//! Session scenarios for the search pipeline, run against the vocabulary
//! oracle so no model download is needed.

use crate::semantic::{InitError, PipelineState, QueryError, CACHE_KEY};
use crate::tests::support::{pipeline, vector_storage, VocabularyLoader, CAT_DOG, TEST_DIMENSIONS};

#[test]
fn test_query_ranks_matching_document_first() {
    let tmp = tempfile::tempdir().unwrap();
    let mut pipeline = pipeline(tmp.path(), CAT_DOG, VocabularyLoader::default());
    pipeline.init().unwrap();

    let results = pipeline.search("cat").unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].index, 0);
    assert!(results[0].similarity > results[1].similarity);
    assert_eq!(pipeline.state(), PipelineState::Ready);
}

#[test]
fn test_empty_query_keeps_pipeline_ready() {
    let tmp = tempfile::tempdir().unwrap();
    let mut pipeline = pipeline(tmp.path(), CAT_DOG, VocabularyLoader::default());
    pipeline.init().unwrap();

    assert!(matches!(pipeline.search(""), Err(QueryError::EmptyQuery)));
    assert!(matches!(pipeline.search("  \t\n"), Err(QueryError::EmptyQuery)));
    assert_eq!(pipeline.state(), PipelineState::Ready);

    // the session still answers afterwards
    assert_eq!(pipeline.search("dog").unwrap()[0].index, 1);
}

#[test]
fn test_collection_is_index_aligned() {
    let tmp = tempfile::tempdir().unwrap();
    let json = r#"[
        {"title": "A", "content": "cat"},
        {"title": "B", "content": "dog"},
        {"title": "C", "content": "mouse"},
        {"keywords": ["fish", "snake"], "creator": "x"}
    ]"#;
    let mut pipeline = pipeline(tmp.path(), json, VocabularyLoader::default());
    pipeline.init().unwrap();

    assert_eq!(pipeline.documents().len(), 4);
    assert_eq!(pipeline.collection().len(), 4);

    for (query, expected) in [("cat", 0), ("dog", 1), ("mouse", 2), ("snake", 3)] {
        let results = pipeline.search(query).unwrap();
        assert_eq!(results[0].index, expected, "query {query:?}");
    }
}

#[test]
fn test_empty_documents_keep_their_slot() {
    let tmp = tempfile::tempdir().unwrap();
    let json = r#"[
        {"title": "A", "content": "cat"},
        {"link": "https://example.com"},
        {"title": "   "},
        {"title": "B", "content": "dog"}
    ]"#;
    let loader = VocabularyLoader::default();
    let mut pipeline = pipeline(tmp.path(), json, loader.clone());
    pipeline.init().unwrap();

    // only the two documents with text reach the model
    assert_eq!(loader.embedded(), 2);

    let collection = pipeline.collection();
    assert_eq!(collection.len(), 4);
    assert!(!collection[0].is_placeholder());
    assert!(collection[1].is_placeholder());
    assert!(collection[2].is_placeholder());
    assert!(!collection[3].is_placeholder());
    assert_eq!(collection[1].dimensions(), TEST_DIMENSIONS);

    let results = pipeline.search("dog").unwrap();
    assert_eq!(results[0].index, 3);
    assert!(results[1..].iter().all(|r| r.similarity == 0.0));
    let tail: Vec<usize> = results[1..].iter().map(|r| r.index).collect();
    assert_eq!(tail, vec![0, 1, 2]);
}

#[test]
fn test_second_session_uses_cache() {
    let tmp = tempfile::tempdir().unwrap();
    let loader = VocabularyLoader::default();

    let mut first = pipeline(tmp.path(), CAT_DOG, loader.clone());
    first.init().unwrap();
    let first_collection = first.collection().to_vec();
    first.shutdown();
    assert_eq!(loader.embedded(), 2);

    let mut second = pipeline(tmp.path(), CAT_DOG, loader.clone());
    second.init().unwrap();
    assert_eq!(loader.embedded(), 2);
    assert_eq!(second.collection(), first_collection.as_slice());

    // the query is the only new text sent to the model
    assert_eq!(second.search("cat").unwrap()[0].index, 0);
    assert_eq!(loader.embedded(), 3);
}

#[test]
fn test_clear_cache_forces_reencode() {
    let tmp = tempfile::tempdir().unwrap();
    let loader = VocabularyLoader::default();

    let mut first = pipeline(tmp.path(), CAT_DOG, loader.clone());
    first.init().unwrap();
    first.clear_cache().unwrap();
    first.shutdown();

    assert!(vector_storage(tmp.path()).load().unwrap().is_empty());

    let mut second = pipeline(tmp.path(), CAT_DOG, loader.clone());
    second.init().unwrap();
    assert_eq!(loader.embedded(), 4);
    assert_eq!(vector_storage(tmp.path()).load().unwrap().data.len(), 2);
}

#[test]
fn test_changed_dataset_invalidates_cache() {
    let tmp = tempfile::tempdir().unwrap();
    let loader = VocabularyLoader::default();

    let mut first = pipeline(tmp.path(), CAT_DOG, loader.clone());
    first.init().unwrap();
    first.shutdown();

    let swapped = r#"[
        {"title": "A", "content": "dog"},
        {"title": "B", "content": "cat"}
    ]"#;
    let mut second = pipeline(tmp.path(), swapped, loader.clone());
    second.init().unwrap();

    assert_eq!(loader.embedded(), 4);
    assert_eq!(second.search("cat").unwrap()[0].index, 1);
}

#[test]
fn test_shutdown_then_init_again() {
    let tmp = tempfile::tempdir().unwrap();
    let mut pipeline = pipeline(tmp.path(), CAT_DOG, VocabularyLoader::default());

    pipeline.init().unwrap();
    pipeline.shutdown();
    assert_eq!(pipeline.state(), PipelineState::Uninitialized);
    assert!(pipeline.collection().is_empty());
    assert!(matches!(pipeline.search("cat"), Err(QueryError::NotReady(_))));

    pipeline.init().unwrap();
    assert_eq!(pipeline.search("cat").unwrap()[0].index, 0);
}

#[test]
fn test_corrupt_cache_fails_initialization() {
    let tmp = tempfile::tempdir().unwrap();
    let mut first = pipeline(tmp.path(), CAT_DOG, VocabularyLoader::default());
    first.init().unwrap();
    first.shutdown();

    let cache_file = tmp.path().join("cache").join(CACHE_KEY);
    let mut bytes = std::fs::read(&cache_file).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    std::fs::write(&cache_file, bytes).unwrap();

    let mut second = pipeline(tmp.path(), CAT_DOG, VocabularyLoader::default());
    assert!(matches!(second.init(), Err(InitError::StorageCorrupt(_))));
    assert_eq!(second.state(), PipelineState::Failed);
    assert!(matches!(
        second.search("cat"),
        Err(QueryError::NotReady(PipelineState::Failed))
    ));

    // failure is terminal until the session is shut down
    assert!(matches!(
        second.init(),
        Err(InitError::InvalidState(PipelineState::Failed))
    ));
}

#[test]
fn test_unreadable_cache_is_storage_unavailable() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(tmp.path().join("cache").join(CACHE_KEY)).unwrap();

    let mut pipeline = pipeline(tmp.path(), CAT_DOG, VocabularyLoader::default());
    assert!(matches!(pipeline.init(), Err(InitError::StorageUnavailable(_))));
    assert_eq!(pipeline.state(), PipelineState::Failed);
}

#[test]
fn test_model_unavailable() {
    let tmp = tempfile::tempdir().unwrap();
    let mut pipeline = pipeline(tmp.path(), CAT_DOG, VocabularyLoader::failing());

    assert!(matches!(pipeline.init(), Err(InitError::EmbeddingUnavailable(_))));
    assert_eq!(pipeline.state(), PipelineState::Failed);
}

#[test]
fn test_dataset_fetch_failure() {
    let tmp = tempfile::tempdir().unwrap();
    let mut pipeline = pipeline(tmp.path(), "not json", VocabularyLoader::default());

    assert!(matches!(pipeline.init(), Err(InitError::DatasetFetchFailed(_))));
    assert_eq!(pipeline.state(), PipelineState::Failed);
    assert!(vector_storage(tmp.path()).load().unwrap().is_empty());
}

#[test]
fn test_dataset_without_text_cannot_be_encoded() {
    let tmp = tempfile::tempdir().unwrap();
    let mut pipeline = pipeline(tmp.path(), r#"[{}, {"title": ""}]"#, VocabularyLoader::default());

    assert!(matches!(pipeline.init(), Err(InitError::EncodingFailed(_))));
    assert_eq!(pipeline.state(), PipelineState::Failed);
    assert!(vector_storage(tmp.path()).load().unwrap().is_empty());
}
