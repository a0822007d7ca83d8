//! Folder-as-queue behaviour of `DeliveryQueue` against an in-memory drive

mod common;

use common::{image, FakeDrive, DELIVERED, PENDING};
use core_delivery::{AckOutcome, DeliveryError, DeliveryQueue, SCRATCH_FILE_NAME};
use std::sync::atomic::Ordering;
use std::sync::Arc;

fn queue(drive: &Arc<FakeDrive>, scratch: &std::path::Path) -> DeliveryQueue {
    DeliveryQueue::new(drive.clone(), PENDING, DELIVERED, scratch)
}

#[tokio::test]
async fn test_peek_returns_oldest_pending_image() {
    let drive = Arc::new(FakeDrive::new());
    drive.add(image("b", 10, &[PENDING]), b"B");
    drive.add(image("a", 9, &[PENDING]), b"A");
    drive.add(image("older-elsewhere", 7, &["other-folder"]), b"X");

    let mut document = image("doc", 6, &[PENDING]);
    document.mime_type = Some("application/pdf".to_string());
    drive.add(document, b"%PDF");

    let mut trashed = image("trashed", 5, &[PENDING]);
    trashed.trashed = true;
    drive.add(trashed, b"T");

    let scratch = tempfile::tempdir().unwrap();
    let item = queue(&drive, scratch.path()).peek_oldest().await.unwrap().unwrap();

    assert_eq!(item.id, "a");
    assert_eq!(item.mime_type, "image/jpeg");
}

#[tokio::test]
async fn test_peek_breaks_timestamp_ties_by_id() {
    let drive = Arc::new(FakeDrive::new());
    drive.add(image("m", 9, &[PENDING]), b"M");
    drive.add(image("k", 9, &[PENDING]), b"K");

    let scratch = tempfile::tempdir().unwrap();
    let item = queue(&drive, scratch.path()).peek_oldest().await.unwrap().unwrap();
    assert_eq!(item.id, "k");
}

#[tokio::test]
async fn test_peek_on_empty_folder_is_none() {
    let drive = Arc::new(FakeDrive::new());
    drive.add(image("done", 9, &[DELIVERED]), b"D");

    let scratch = tempfile::tempdir().unwrap();
    assert!(queue(&drive, scratch.path()).peek_oldest().await.unwrap().is_none());
}

#[tokio::test]
async fn test_peek_failure_is_queue_operation_failure() {
    let drive = Arc::new(FakeDrive::new());
    drive.fail_list.store(true, Ordering::SeqCst);

    let scratch = tempfile::tempdir().unwrap();
    let err = queue(&drive, scratch.path()).peek_oldest().await.unwrap_err();
    assert!(matches!(
        err,
        DeliveryError::QueueOperationFailed { operation: "list", .. }
    ));
}

#[tokio::test]
async fn test_fetch_writes_scratch_file_and_overwrites_previous() {
    let drive = Arc::new(FakeDrive::new());
    drive.add(image("a", 9, &[PENDING]), b"first image");
    drive.add(image("b", 10, &[PENDING]), b"second");

    let scratch = tempfile::tempdir().unwrap();
    let queue = queue(&drive, &scratch.path().join("work"));

    let a = queue.peek_oldest().await.unwrap().unwrap();
    let path = queue.fetch_content(&a).await.unwrap();
    assert_eq!(path.file_name().unwrap(), SCRATCH_FILE_NAME);
    assert_eq!(std::fs::read(&path).unwrap(), b"first image");

    queue.acknowledge(&a, DELIVERED).await.unwrap();
    let b = queue.peek_oldest().await.unwrap().unwrap();
    let path = queue.fetch_content(&b).await.unwrap();
    assert_eq!(std::fs::read(&path).unwrap(), b"second");

    let entries: Vec<String> = std::fs::read_dir(scratch.path().join("work"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(entries, vec![SCRATCH_FILE_NAME.to_string()]);
}

#[tokio::test]
async fn test_fetch_failure_leaves_no_scratch_file() {
    let drive = Arc::new(FakeDrive::new());
    drive.add(image("a", 9, &[PENDING]), b"A");
    drive.fail_download.store(true, Ordering::SeqCst);

    let scratch = tempfile::tempdir().unwrap();
    let queue = queue(&drive, scratch.path());
    let item = queue.peek_oldest().await.unwrap().unwrap();

    let err = queue.fetch_content(&item).await.unwrap_err();
    assert!(matches!(
        err,
        DeliveryError::QueueOperationFailed { operation: "download", .. }
    ));
    assert!(!queue.scratch_path().exists());
}

#[tokio::test]
async fn test_acknowledge_swaps_only_the_pending_parent() {
    let drive = Arc::new(FakeDrive::new());
    drive.add(image("a", 9, &[PENDING, "album"]), b"A");

    let scratch = tempfile::tempdir().unwrap();
    let queue = queue(&drive, scratch.path());
    let item = queue.peek_oldest().await.unwrap().unwrap();

    assert_eq!(
        queue.acknowledge(&item, DELIVERED).await.unwrap(),
        AckOutcome::Moved
    );
    assert_eq!(drive.parents_of("a"), vec!["album", DELIVERED]);

    // Never selected again
    assert!(queue.peek_oldest().await.unwrap().is_none());
}

#[tokio::test]
async fn test_acknowledge_twice_is_a_no_op() {
    let drive = Arc::new(FakeDrive::new());
    drive.add(image("a", 9, &[PENDING]), b"A");

    let scratch = tempfile::tempdir().unwrap();
    let queue = queue(&drive, scratch.path());
    let item = queue.peek_oldest().await.unwrap().unwrap();

    queue.acknowledge(&item, DELIVERED).await.unwrap();
    assert_eq!(
        queue.acknowledge(&item, DELIVERED).await.unwrap(),
        AckOutcome::AlreadyAcknowledged
    );
    assert_eq!(drive.updates.load(Ordering::SeqCst), 1);
    assert_eq!(drive.parents_of("a"), vec![DELIVERED]);
}

#[tokio::test]
async fn test_acknowledge_that_does_not_take_effect_fails() {
    let drive = Arc::new(FakeDrive::new());
    drive.add(image("a", 9, &[PENDING]), b"A");
    drive.ignore_update.store(true, Ordering::SeqCst);

    let scratch = tempfile::tempdir().unwrap();
    let queue = queue(&drive, scratch.path());
    let item = queue.peek_oldest().await.unwrap().unwrap();

    let err = queue.acknowledge(&item, DELIVERED).await.unwrap_err();
    assert!(matches!(err, DeliveryError::AcknowledgeFailed { ref item_id, .. } if item_id == "a"));
    assert_eq!(drive.parents_of("a"), vec![PENDING]);
}

#[tokio::test]
async fn test_acknowledge_provider_error_changes_nothing() {
    let drive = Arc::new(FakeDrive::new());
    drive.add(image("a", 9, &[PENDING]), b"A");
    drive.fail_update.store(true, Ordering::SeqCst);

    let scratch = tempfile::tempdir().unwrap();
    let queue = queue(&drive, scratch.path());
    let item = queue.peek_oldest().await.unwrap().unwrap();

    let err = queue.acknowledge(&item, DELIVERED).await.unwrap_err();
    assert!(matches!(
        err,
        DeliveryError::QueueOperationFailed { operation: "update_parents", .. }
    ));
    assert_eq!(drive.parents_of("a"), vec![PENDING]);
}
