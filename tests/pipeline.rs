mod common;

use std::sync::Arc;

use common::{bare_harness, harness, sqlite_manager, stalled_harness, CANNED_ANSWER};
use knowledgecast::chat;
use knowledgecast::error::KcError;
use knowledgecast::ingest::{self, Upload};
use knowledgecast::models::SourceKind;
use knowledgecast::podcast::PodcastStyle;
use knowledgecast::store::VectorStore;
use knowledgecast::studio::{self, PodcastRequest};

fn text_upload(name: &str, body: &str) -> Upload {
    Upload {
        filename: name.to_string(),
        content_type: Some("text/plain".to_string()),
        bytes: body.as_bytes().to_vec(),
    }
}

#[tokio::test]
async fn text_round_trip_answers_with_citation() {
    let h = harness();
    let text = "Hello world, this is a test of the pipeline.";

    let ingested = ingest::ingest_text(&h.manager, Some("s1"), text).await.unwrap();
    assert_eq!(ingested.session_id, "s1");
    assert_eq!(ingested.source.kind, SourceKind::Text);
    assert_eq!(ingested.source.chunk_count, 1);
    assert!(ingested.source.name.starts_with("Text ("));

    let answer = chat::chat(&h.manager, "s1", "What is this a test of?").await.unwrap();
    assert_eq!(answer.response, CANNED_ANSWER);
    assert!(!answer.sources_used.is_empty());
    assert_eq!(answer.sources_used[0].source_file, ingested.source.name);
    assert_eq!(answer.sources_used[0].content, text);
}

#[tokio::test]
async fn ingest_without_session_id_creates_one() {
    let h = harness();
    let ingested = ingest::ingest_text(&h.manager, None, "Some pasted research notes.")
        .await
        .unwrap();
    assert!(uuid::Uuid::parse_str(&ingested.session_id).is_ok());
    assert_eq!(
        ingest::list_sources(&h.manager, &ingested.session_id).unwrap().len(),
        1
    );
}

#[tokio::test]
async fn short_text_is_rejected() {
    let h = harness();
    let err = ingest::ingest_text(&h.manager, Some("s"), "too short").await.unwrap_err();
    assert!(matches!(err, KcError::BadRequest(_)));
}

#[tokio::test]
async fn concurrent_first_ingestions_create_index_once() {
    let h = harness();
    let mut tasks = Vec::new();
    for i in 0..8 {
        let manager = h.manager.clone();
        tasks.push(tokio::spawn(async move {
            let upload = text_upload(
                &format!("file{}.txt", i),
                &format!("Document number {} talks about concurrency.", i),
            );
            ingest::ingest_upload(&manager, Some("race"), upload).await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(h.stores.creates(), 1);
    let sources = ingest::list_sources(&h.manager, "race").unwrap();
    assert_eq!(sources.len(), 8);

    let store = h.stores.store("race").unwrap();
    let total: usize = sources.iter().map(|s| s.chunk_count).sum();
    assert_eq!(store.count().await.unwrap(), total);
}

#[tokio::test]
async fn url_batch_isolates_failures() {
    let h = harness();
    let urls = vec![
        "https://example.com/a".to_string(),
        "https://example.com/fail".to_string(),
        "https://example.com/b".to_string(),
    ];
    let batch = ingest::ingest_urls(&h.manager, Some("web"), &urls).await.unwrap();

    let names: Vec<&str> = batch.sources.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["https://example.com/a", "https://example.com/b"]);
    assert!(batch.sources.iter().all(|s| s.kind == SourceKind::Website));
    assert_eq!(batch.sources[0].url.as_deref(), Some("https://example.com/a"));
    assert_eq!(ingest::list_sources(&h.manager, "web").unwrap().len(), 2);
}

#[tokio::test]
async fn scraping_without_credential_is_feature_disabled() {
    let h = bare_harness();
    let err = ingest::ingest_urls(&h.manager, Some("s"), &["https://example.com".to_string()])
        .await
        .unwrap_err();
    assert!(matches!(err, KcError::FeatureDisabled(_)));
}

#[tokio::test]
async fn youtube_without_credential_is_feature_disabled() {
    let h = bare_harness();
    let err = ingest::ingest_youtube(&h.manager, Some("s"), "https://youtu.be/dQw4w9WgXcQ")
        .await
        .unwrap_err();
    assert!(matches!(err, KcError::FeatureDisabled(_)));
}

#[tokio::test]
async fn non_youtube_url_is_rejected() {
    let h = harness();
    let err = ingest::ingest_youtube(&h.manager, Some("s"), "https://vimeo.com/12345")
        .await
        .unwrap_err();
    assert!(matches!(err, KcError::BadRequest(_)));
}

#[tokio::test]
async fn audio_upload_without_credential_is_feature_disabled() {
    let h = harness();
    let upload = Upload {
        filename: "talk.mp3".to_string(),
        content_type: Some("audio/mpeg".to_string()),
        bytes: vec![1, 2, 3, 4],
    };
    let err = ingest::ingest_upload(&h.manager, Some("s"), upload).await.unwrap_err();
    assert!(matches!(err, KcError::FeatureDisabled(_)));
}

#[tokio::test]
async fn unsupported_upload_is_bad_request() {
    let h = harness();
    let upload = Upload {
        filename: "picture.png".to_string(),
        content_type: Some("image/png".to_string()),
        bytes: vec![0x89, 0x50, 0x4e, 0x47],
    };
    let err = ingest::ingest_upload(&h.manager, Some("s"), upload).await.unwrap_err();
    assert!(matches!(err, KcError::BadRequest(_)));
    assert!(ingest::list_sources(&h.manager, "s").unwrap().is_empty());
}

#[tokio::test]
async fn delete_keeps_remaining_order_and_removes_vectors() {
    let h = harness();
    for name in ["a.txt", "doc.txt", "c.txt"] {
        ingest::ingest_upload(
            &h.manager,
            Some("del"),
            text_upload(name, &format!("Contents of {} for the deletion test.", name)),
        )
        .await
        .unwrap();
    }
    let store = h.stores.store("del").unwrap();
    let before = store.count().await.unwrap();

    let removed = ingest::delete_source(&h.manager, "del", "doc.txt").await.unwrap();
    assert_eq!(removed, 1);

    let names: Vec<String> = ingest::list_sources(&h.manager, "del")
        .unwrap()
        .into_iter()
        .map(|s| s.name)
        .collect();
    assert_eq!(names, vec!["a.txt", "c.txt"]);
    assert!(store.count().await.unwrap() < before);

    let answer = chat::chat(&h.manager, "del", "deletion test contents").await.unwrap();
    assert!(answer.sources_used.iter().all(|c| c.source_file != "doc.txt"));
}

#[tokio::test]
async fn deleting_unknown_source_is_not_found() {
    let h = harness();
    ingest::ingest_text(&h.manager, Some("nf"), "Some text that is long enough.")
        .await
        .unwrap();
    let err = ingest::delete_source(&h.manager, "nf", "missing.pdf").await.unwrap_err();
    assert!(matches!(err, KcError::SourceNotFound(_)));
    assert_eq!(ingest::list_sources(&h.manager, "nf").unwrap().len(), 1);
}

#[tokio::test]
async fn chat_without_sources_makes_no_embedding_call() {
    let h = harness();
    h.manager.create(Some("empty"));
    let err = chat::chat(&h.manager, "empty", "anything?").await.unwrap_err();
    assert!(matches!(err, KcError::BadRequest(_)));
    assert_eq!(h.embedder.calls(), 0);
}

#[tokio::test]
async fn chat_on_unknown_session_is_not_found() {
    let h = harness();
    let err = chat::chat(&h.manager, "nobody", "hello?").await.unwrap_err();
    assert!(matches!(err, KcError::SessionNotFound));
}

#[tokio::test]
async fn chat_without_generator_is_feature_disabled() {
    let h = bare_harness();
    ingest::ingest_text(&h.manager, Some("g"), "Enough text to make a source.")
        .await
        .unwrap();
    let err = chat::chat(&h.manager, "g", "question").await.unwrap_err();
    assert!(matches!(err, KcError::FeatureDisabled(_)));
}

#[tokio::test]
async fn citations_are_truncated_to_preview_length() {
    let h = harness();
    // A single unbroken token cannot be split on whitespace.
    let long = "x".repeat(10_000);
    ingest::ingest_upload(&h.manager, Some("long"), text_upload("long.txt", &long))
        .await
        .unwrap();

    let answer = chat::chat(&h.manager, "long", "x").await.unwrap();
    assert!(!answer.sources_used.is_empty());
    for citation in &answer.sources_used {
        assert!(citation.content.chars().count() <= 500);
    }
}

#[tokio::test]
async fn reset_chat_returns_fresh_id() {
    let h = harness();
    h.manager.create(Some("old"));
    let new_id = chat::reset_chat(&h.manager, "old").await.unwrap();
    assert_ne!(new_id, "old");
    assert!(h.manager.get("old").is_some());
}

#[tokio::test]
async fn podcast_from_text_source() {
    let h = harness();
    let ingested = ingest::ingest_upload(
        &h.manager,
        Some("pod"),
        text_upload("notes.md", "Notes about tide pools and the creatures living in them."),
    )
    .await
    .unwrap();

    let request = PodcastRequest {
        source_name: ingested.source.name.clone(),
        style: PodcastStyle::Educational,
        duration: "5 minutes".to_string(),
    };
    let podcast = studio::generate_podcast(&h.manager, Some("pod"), &request).await.unwrap();
    assert_eq!(podcast.total_lines, 2);
    assert_eq!(podcast.script[0].speaker, "Speaker 1");
    assert_eq!(podcast.source_name, "notes.md");
    assert!(podcast.audio_url.is_none());

    let err = studio::podcast_audio(&h.manager, "pod").await.unwrap_err();
    assert!(matches!(err, KcError::NotFound(_)));
}

#[tokio::test]
async fn podcast_for_unknown_source_is_not_found() {
    let h = harness();
    h.manager.create(Some("pod"));
    let request = PodcastRequest {
        source_name: "ghost.pdf".to_string(),
        style: PodcastStyle::default(),
        duration: "10 minutes".to_string(),
    };
    let err = studio::generate_podcast(&h.manager, Some("pod"), &request)
        .await
        .unwrap_err();
    assert!(matches!(err, KcError::SourceNotFound(_)));
}

#[tokio::test]
async fn session_delete_releases_store() {
    let h = harness();
    ingest::ingest_text(&h.manager, Some("gone"), "Text that will be released soon.")
        .await
        .unwrap();
    let store: Arc<dyn VectorStore> = h.stores.store("gone").unwrap();
    assert!(h.manager.delete("gone").await);
    assert!(h.manager.get("gone").is_none());
    assert!(!store.has_index().await.unwrap());
}

#[tokio::test]
async fn youtube_timeout_commits_nothing() {
    let h = stalled_harness();
    let err = ingest::ingest_youtube(&h.manager, Some("slow"), "https://youtu.be/dQw4w9WgXcQ")
        .await
        .unwrap_err();
    assert!(matches!(err, KcError::Timeout(_)));

    assert!(ingest::list_sources(&h.manager, "slow").unwrap().is_empty());
    let store = h.stores.store("slow").unwrap();
    assert_eq!(store.count().await.unwrap(), 0);
    assert_eq!(h.embedder.calls(), 0);
}

#[tokio::test]
async fn audio_timeout_commits_nothing() {
    let h = stalled_harness();
    let upload = Upload {
        filename: "lecture.mp3".to_string(),
        content_type: Some("audio/mpeg".to_string()),
        bytes: vec![0u8; 64],
    };
    let err = ingest::ingest_upload(&h.manager, Some("slow"), upload).await.unwrap_err();
    assert!(matches!(err, KcError::Timeout(_)));

    assert!(ingest::list_sources(&h.manager, "slow").unwrap().is_empty());
    assert_eq!(h.stores.store("slow").unwrap().count().await.unwrap(), 0);
}

#[tokio::test]
async fn restarted_process_does_not_see_previous_vectors() {
    let tmp = tempfile::TempDir::new().unwrap();
    let data_dir = tmp.path().join("data");

    let before = sqlite_manager(&data_dir);
    ingest::ingest_upload(
        &before,
        Some("sess"),
        text_upload("old_secret.txt", "Secret notes from the previous run."),
    )
    .await
    .unwrap();
    drop(before);

    let after = sqlite_manager(&data_dir);
    ingest::ingest_upload(
        &after,
        Some("sess"),
        text_upload("new.txt", "Fresh notes from the current run."),
    )
    .await
    .unwrap();

    let manifest: Vec<String> = ingest::list_sources(&after, "sess")
        .unwrap()
        .into_iter()
        .map(|s| s.name)
        .collect();
    assert_eq!(manifest, vec!["new.txt"]);

    let answer = chat::chat(&after, "sess", "notes from the run").await.unwrap();
    assert!(!answer.sources_used.is_empty());
    assert!(answer.sources_used.iter().all(|c| c.source_file == "new.txt"));
}
