//! End-to-end pipeline tests: source → index job → hybrid search.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use tempfile::TempDir;
use uuid::Uuid;

use docdex::config::Config;
use docdex::index::IndexOptions;
use docdex::jobs::JobStatus;
use docdex::query::SearchOptions;
use docdex::service::DocdexService;
use docdex::source::{ArchiveSource, DirectorySource};
use docdex::store::Filter;

fn write_corpus(root: &Path) {
    fs::create_dir_all(root.join("grid/guides")).unwrap();
    fs::create_dir_all(root.join("grid/react/guides")).unwrap();
    fs::create_dir_all(root.join("charts/api")).unwrap();

    fs::write(
        root.join("grid/guides/sorting.md"),
        "# Sorting\n\nClick a column header to sort the grid rows.\n\n\
         ## Multi-column sorting\n\nHold shift to sort by several columns.\n",
    )
    .unwrap();
    fs::write(
        root.join("grid/guides/filtering.md"),
        "# Filtering\n\nFilters narrow the visible grid rows by value.\n",
    )
    .unwrap();
    fs::write(
        root.join("grid/react/guides/setup.md"),
        "# React setup\n\nInstall the grid package and render the component.\n",
    )
    .unwrap();
    fs::write(
        root.join("charts/api/axes.md"),
        "# Axes\n\nAxis configuration reference for charts.\n",
    )
    .unwrap();
    // Not on the extension allow-list; must be ignored.
    fs::write(root.join("grid/guides/notes.txt"), "scratch notes").unwrap();
}

fn memory_config() -> Config {
    let mut config = Config::default();
    config.store.backend = "memory".to_string();
    config
}

fn sqlite_config(db_path: &Path) -> Config {
    let mut config = Config::default();
    config.store.backend = "sqlite".to_string();
    config.store.path = db_path.to_path_buf();
    config
}

fn index_options(version: &str) -> IndexOptions {
    IndexOptions {
        version: version.to_string(),
        batch_size: 2,
    }
}

async fn run_index(service: &DocdexService, root: &Path, version: &str) -> docdex::jobs::Job {
    let source = DirectorySource::new(root, &["md".to_string()]).unwrap();
    let job_id = service
        .start_index_job(Box::new(source), index_options(version))
        .unwrap();
    wait_for_terminal(service, job_id).await
}

async fn wait_for_terminal(service: &DocdexService, id: Uuid) -> docdex::jobs::Job {
    for _ in 0..300 {
        if let Some(job) = service.get_job(&id) {
            if job.status.is_terminal() {
                return job;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {id} never finished");
}

#[tokio::test]
async fn directory_corpus_is_indexed_and_searchable() {
    let docs = TempDir::new().unwrap();
    write_corpus(docs.path());

    let service = DocdexService::from_config(memory_config()).await.unwrap();
    let job = run_index(&service, docs.path(), "6.3.3").await;

    assert_eq!(job.status, JobStatus::Completed);
    let result = job.result.unwrap();
    assert_eq!(result["documentsProcessed"], 4);

    let results = service
        .search("sort columns", &SearchOptions::default())
        .await
        .unwrap();
    assert!(!results.is_empty());
    assert_eq!(results[0].metadata.version, "6.3.3");
    assert!(results[0].text.contains("sort"));
    for result in &results {
        assert!(result.score >= 0.0 && result.score <= 1.0);
    }

    let context = service.format_context(&results);
    assert!(context.contains("Source: grid/guides/sorting.md"));
    assert!(context.contains("version 6.3.3"));
}

#[tokio::test]
async fn reindexing_a_version_replaces_it_completely() {
    let docs = TempDir::new().unwrap();
    write_corpus(docs.path());

    let service = DocdexService::from_config(memory_config()).await.unwrap();

    let first = run_index(&service, docs.path(), "1.0").await;
    assert_eq!(first.status, JobStatus::Completed);
    let first_chunks = first.result.unwrap()["chunksIndexed"].as_u64().unwrap();

    let second = run_index(&service, docs.path(), "1.0").await;
    assert_eq!(second.status, JobStatus::Completed);
    let second_chunks = second.result.unwrap()["chunksIndexed"].as_u64().unwrap();
    assert_eq!(first_chunks, second_chunks);

    // The corpus holds exactly one generation of version 1.0.
    let options = SearchOptions {
        limit: Some(100),
        ..Default::default()
    };
    let results = service.search("grid", &options).await.unwrap();
    assert!(results.len() as u64 <= first_chunks);
    assert_eq!(service.all_versions().await.unwrap(), vec!["1.0".to_string()]);
}

#[tokio::test]
async fn search_defaults_to_the_string_maximum_version() {
    let docs = TempDir::new().unwrap();
    write_corpus(docs.path());

    let service = DocdexService::from_config(memory_config()).await.unwrap();
    run_index(&service, docs.path(), "9.0.0").await;
    run_index(&service, docs.path(), "10.0.0").await;

    // Plain string ordering puts "9.0.0" above "10.0.0".
    assert_eq!(
        service.latest_version().await.unwrap().unwrap(),
        "9.0.0"
    );

    let results = service
        .search("sorting", &SearchOptions::default())
        .await
        .unwrap();
    assert!(!results.is_empty());
    assert_eq!(results[0].metadata.version, "9.0.0");
}

#[tokio::test]
async fn tag_filtered_search_returns_only_tagged_results() {
    let docs = TempDir::new().unwrap();
    write_corpus(docs.path());

    let service = DocdexService::from_config(memory_config()).await.unwrap();
    run_index(&service, docs.path(), "1.0").await;

    let options = SearchOptions {
        limit: Some(5),
        tags: vec!["react".to_string()],
        ..Default::default()
    };
    let results = service.search("grid", &options).await.unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].metadata.document_path, "grid/react/guides/setup.md");
    assert_eq!(results[0].metadata.framework, "react");
}

#[tokio::test]
async fn product_filter_narrows_results() {
    let docs = TempDir::new().unwrap();
    write_corpus(docs.path());

    let service = DocdexService::from_config(memory_config()).await.unwrap();
    run_index(&service, docs.path(), "1.0").await;

    let options = SearchOptions {
        filter: Filter::new().equals("product", "charts"),
        ..Default::default()
    };
    let results = service.search("configuration reference", &options).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].metadata.product, "charts");
    assert_eq!(results[0].metadata.doc_type, "api");
}

#[tokio::test]
async fn zip_archive_round_trips_through_the_pipeline() {
    let tmp = TempDir::new().unwrap();
    let archive_path = tmp.path().join("docs.zip");

    let file = fs::File::create(&archive_path).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default();
    writer
        .start_file("grid/guides/grouping.md", options)
        .unwrap();
    writer
        .write_all(b"# Grouping\n\nGroup grid rows by a column value.\n")
        .unwrap();
    writer.start_file("grid/assets/logo.png", options).unwrap();
    writer.write_all(&[0x89, 0x50, 0x4e, 0x47]).unwrap();
    writer.finish().unwrap();

    let service = DocdexService::from_config(memory_config()).await.unwrap();
    let source = ArchiveSource::new(&archive_path, &["md".to_string()]).unwrap();
    let job_id = service
        .start_index_job(Box::new(source), index_options("2.0"))
        .unwrap();
    let job = wait_for_terminal(&service, job_id).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.result.unwrap()["documentsProcessed"], 1);

    let results = service
        .search("group rows", &SearchOptions::default())
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].metadata.document_path, "grid/guides/grouping.md");
}

#[tokio::test]
async fn sqlite_backend_persists_across_service_instances() {
    let docs = TempDir::new().unwrap();
    write_corpus(docs.path());
    let data = TempDir::new().unwrap();
    let db_path = data.path().join("docdex.sqlite");

    {
        let service = DocdexService::from_config(sqlite_config(&db_path))
            .await
            .unwrap();
        let job = run_index(&service, docs.path(), "3.1.0").await;
        assert_eq!(job.status, JobStatus::Completed);
    }

    // A fresh service over the same database sees the indexed corpus.
    let service = DocdexService::from_config(sqlite_config(&db_path))
        .await
        .unwrap();
    assert_eq!(
        service.all_versions().await.unwrap(),
        vec!["3.1.0".to_string()]
    );

    let results = service
        .search("filtering rows", &SearchOptions::default())
        .await
        .unwrap();
    assert!(!results.is_empty());
    assert_eq!(results[0].metadata.version, "3.1.0");
}

#[tokio::test]
async fn sqlite_reindex_replaces_the_version_on_disk() {
    let docs = TempDir::new().unwrap();
    write_corpus(docs.path());
    let data = TempDir::new().unwrap();
    let db_path = data.path().join("docdex.sqlite");

    let service = DocdexService::from_config(sqlite_config(&db_path))
        .await
        .unwrap();

    let first = run_index(&service, docs.path(), "1.0").await;
    let second = run_index(&service, docs.path(), "1.0").await;
    assert_eq!(
        first.result.unwrap()["chunksIndexed"],
        second.result.unwrap()["chunksIndexed"]
    );
    assert_eq!(service.all_versions().await.unwrap(), vec!["1.0".to_string()]);

    let tags = service.all_tags().await.unwrap();
    assert!(tags.contains(&"guides".to_string()));
    assert!(tags.contains(&"1.0".to_string()));
}

#[tokio::test]
async fn job_events_stream_to_subscribers_during_a_run() {
    let docs = TempDir::new().unwrap();
    write_corpus(docs.path());

    let service = DocdexService::from_config(memory_config()).await.unwrap();
    let mut events = service.subscribe();

    let source = DirectorySource::new(docs.path(), &["md".to_string()]).unwrap();
    let job_id = service
        .start_index_job(Box::new(source), index_options("5.0"))
        .unwrap();

    let mut last_progress = 0u8;
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for events")
            .unwrap();
        assert_eq!(event.id, job_id);
        if event.status == JobStatus::Completed {
            assert_eq!(event.progress, 100);
            assert_eq!(event.result.unwrap()["documentsProcessed"], 4);
            break;
        }
        assert!(event.progress >= last_progress, "progress went backwards");
        last_progress = event.progress;
    }
}
