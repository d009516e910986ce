//! Session expiry through a full engine.

mod common;

use common::{upload, wait_terminal, FakeExtractor, FakeOcr, FakeRenderer};
use docmill::{Collaborators, Engine, ProcessOptions, Storage, TaskStatus};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

fn engine(tmp: &TempDir) -> Engine {
    let storage = Storage::new(tmp.path().join("data"));
    let collaborators = Collaborators {
        renderer: Arc::new(FakeRenderer::new(storage.clone())),
        extractor: Arc::new(FakeExtractor::new(storage)),
        ocr: Arc::new(FakeOcr::default()),
    };
    common::engine(tmp, collaborators).0
}

#[tokio::test]
async fn test_sweep_reclaims_only_expired_sessions() {
    let tmp = TempDir::new().unwrap();
    let engine = engine(&tmp);

    let old = upload(&engine, &tmp, "old", "report.docx", b"PK old").await;
    let task = engine.start_processing(old, ProcessOptions::default());
    assert_eq!(wait_terminal(engine.tasks(), &task.id).await.status, TaskStatus::Succeeded);
    assert_eq!(engine.files().list_by_session("old").len(), 3);

    // Sweep 25h from now with the default 24h TTL; "young" is touched to
    // one hour before the sweep.
    let later = SystemTime::now() + Duration::from_secs(25 * 3600);
    upload(&engine, &tmp, "young", "scan.png", b"png").await;
    let young_dir = engine.storage().session_dir("young");
    set_mtime(&young_dir, later - Duration::from_secs(3600));

    let report = engine.cleanup().run_sweep_at(later).await;
    assert!(report.is_clean(), "{:?}", report.failures);
    assert_eq!(report.scanned, 2);
    assert_eq!(report.expired_sessions, vec!["old".to_string()]);
    assert_eq!(report.deleted_files, 3);
    assert!(report.freed_bytes > 0);

    assert!(engine.files().list_by_session("old").is_empty());
    assert!(engine.tasks().list_by_session("old").is_empty());
    assert!(engine.get_task(&task.id).is_none());
    assert!(!engine.storage().session_dir("old").exists());

    assert_eq!(engine.files().list_by_session("young").len(), 1);
    assert!(young_dir.is_dir());
}

#[tokio::test]
async fn test_quota_counts_everything_on_disk() {
    let tmp = TempDir::new().unwrap();
    let engine = engine(&tmp);

    upload(&engine, &tmp, "s1", "scan.png", &[0u8; 4096]).await;
    let usage = engine.cleanup().total_disk_usage().await.unwrap();
    assert!(usage >= 4096);

    assert!(engine.cleanup().check_quota(0, Some(usage)).await.unwrap());
    assert!(!engine.cleanup().check_quota(1, Some(usage)).await.unwrap());
    assert!(engine.cleanup().check_quota(1024, None).await.unwrap());
}

#[tokio::test]
async fn test_engine_shutdown_stops_scheduler() {
    let tmp = TempDir::new().unwrap();
    let engine = engine(&tmp);

    assert!(engine.start_cleanup());
    assert!(!engine.start_cleanup(), "second start is a no-op");
    assert!(engine.cleanup().is_running());

    engine.shutdown();
    tokio::task::yield_now().await;
    assert!(!engine.cleanup().is_running());
}

#[tokio::test]
async fn test_sessions_deleted_during_a_sweep_do_not_abort_it() {
    let tmp = TempDir::new().unwrap();
    let engine = engine(&tmp);
    let data_dir = engine.storage().data_dir().to_path_buf();
    for i in 0..300 {
        engine.storage().create_session_dir(&format!("s{i:03}")).await.unwrap();
    }

    // Another process removes every 7th session while the sweep runs.
    let racer = {
        let data_dir = data_dir.clone();
        std::thread::spawn(move || {
            for i in (0..300).step_by(7) {
                let _ = std::fs::remove_dir_all(data_dir.join(format!("s{i:03}")));
            }
        })
    };
    let report = engine
        .cleanup()
        .run_sweep_at(SystemTime::now() + Duration::from_secs(48 * 3600))
        .await;
    racer.join().unwrap();

    assert!(
        report.failures.iter().all(|f| f.session_id.is_some()),
        "{:?}",
        report.failures
    );
    assert!(!report.expired_sessions.is_empty());
    for id in &report.expired_sessions {
        assert!(!data_dir.join(id).exists(), "{id} left on disk");
    }
}

#[tokio::test]
async fn test_dropping_the_engine_stops_the_sweeper() {
    let tmp = TempDir::new().unwrap();
    let engine = engine(&tmp);
    assert!(engine.start_cleanup());
    tokio::time::sleep(Duration::from_millis(20)).await;

    let sweeper = Arc::downgrade(engine.cleanup());
    drop(engine);
    for _ in 0..100 {
        if sweeper.upgrade().is_none() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("sweeper outlived its engine");
}

/// Set a directory's modification time.
fn set_mtime(path: &std::path::Path, at: SystemTime) {
    let dir = std::fs::File::open(path).unwrap();
    dir.set_modified(at).unwrap();
}
