use std::time::Duration;

use common::{DeferredUploadStatus, Permission, UploadState};
use syncserver::deferred::DeferredUploadService;
use syncserver::entity::user;
use syncserver::error::SyncError;
use syncserver::file_index::{FileIndexKey, FileIndexStore};
use syncserver::lock::{LockManager, sharing_group_lock_name, staging_lock_name};
use syncserver::upload::{CommitOutcome, CommitRequest, StageUpload, StagingStore};
use uuid::Uuid;

use crate::common::{TestApp, change, delete, v0};

async fn index_entry(
    app: &TestApp,
    group: Uuid,
    file: Uuid,
) -> syncserver::entity::file_index::Model {
    FileIndexStore::new(&app.db)
        .find(FileIndexKey::File {
            sharing_group_uuid: group,
            file_uuid: file,
        })
        .await
        .unwrap()
        .expect("File is in the index")
}

async fn try_commit(
    app: &TestApp,
    user: &user::Model,
    device: Uuid,
    group: Uuid,
    master_version: i64,
) -> Result<CommitOutcome, SyncError> {
    app.commits()
        .commit(
            user,
            CommitRequest {
                sharing_group_uuid: group,
                device_uuid: device,
                master_version,
            },
        )
        .await
}

/// Commit, retrying while another commit holds the group lock.
async fn commit_when_free(
    app: &TestApp,
    user: &user::Model,
    device: Uuid,
    group: Uuid,
    master_version: i64,
) -> CommitOutcome {
    loop {
        match try_commit(app, user, device, group, master_version).await {
            Err(SyncError::Busy(_)) => tokio::time::sleep(Duration::from_millis(10)).await,
            Ok(outcome) => return outcome,
            Err(e) => panic!("Commit failed: {e}"),
        }
    }
}

mod versions {
    use super::*;

    #[tokio::test]
    async fn each_commit_advances_master_version_by_one() {
        let app = TestApp::new().await;
        let alice = app.owning_user("alice").await;
        let group = app.create_group(&alice).await;
        let device = Uuid::new_v4();

        for expected in 1..=3 {
            app.stage(&alice, device, group, v0(Uuid::new_v4(), "abc")).await;
            let summary = app.commit_ok(&alice, device, group, expected - 1).await;
            assert_eq!(summary.master_version, expected);
            assert_eq!(summary.number_committed, 1);
            assert_eq!(summary.deferred_upload_id, None);
            assert_eq!(app.current_version(group).await, expected);
        }
    }

    #[tokio::test]
    async fn stale_master_version_asks_for_resync() {
        let app = TestApp::new().await;
        let alice = app.owning_user("alice").await;
        let group = app.create_group(&alice).await;
        let phone = Uuid::new_v4();
        let laptop = Uuid::new_v4();

        app.stage(&alice, phone, group, v0(Uuid::new_v4(), "abc")).await;
        app.commit_ok(&alice, phone, group, 0).await;

        app.stage(&alice, laptop, group, v0(Uuid::new_v4(), "def")).await;
        assert_eq!(
            app.commit(&alice, laptop, group, 0).await,
            CommitOutcome::MasterVersionUpdate(1)
        );
        assert_eq!(app.current_version(group).await, 1);

        // The batch survives and commits once the device catches up.
        let summary = app.commit_ok(&alice, laptop, group, 1).await;
        assert_eq!(summary.master_version, 2);
    }

    #[tokio::test]
    async fn concurrent_commits_on_same_version_have_one_winner() {
        let app = TestApp::new().await;
        let alice = app.owning_user("alice").await;
        let bob = app.owning_user("bob").await;
        let group = app.create_group(&alice).await;
        app.join(&alice, group, &bob, Permission::Write).await;
        let phone = Uuid::new_v4();
        let laptop = Uuid::new_v4();

        app.stage(&alice, phone, group, v0(Uuid::new_v4(), "abc")).await;
        app.stage(&bob, laptop, group, v0(Uuid::new_v4(), "def")).await;

        let (a, b) = tokio::join!(
            commit_when_free(&app, &alice, phone, group, 0),
            commit_when_free(&app, &bob, laptop, group, 0),
        );

        let outcomes = [a, b];
        let winners = outcomes
            .iter()
            .filter(|o| matches!(o, CommitOutcome::Committed(s) if s.master_version == 1))
            .count();
        let losers = outcomes
            .iter()
            .filter(|o| **o == CommitOutcome::MasterVersionUpdate(1))
            .count();
        assert_eq!((winners, losers), (1, 1));
        assert_eq!(app.current_version(group).await, 1);
    }

    #[tokio::test]
    async fn held_group_lock_makes_commit_busy() {
        let app = TestApp::new().await;
        let alice = app.owning_user("alice").await;
        let group = app.create_group(&alice).await;
        let device = Uuid::new_v4();
        app.stage(&alice, device, group, v0(Uuid::new_v4(), "abc")).await;

        let locks = LockManager::new(&app.db);
        let lock = sharing_group_lock_name(group);
        assert!(locks.acquire(&lock, "other", chrono::Duration::seconds(60)).await.unwrap());

        let err = try_commit(&app, &alice, device, group, 0).await.unwrap_err();
        assert!(matches!(err, SyncError::Busy(_)));
        assert_eq!(app.current_version(group).await, 0);

        locks.release(&lock).await.unwrap();
        app.commit_ok(&alice, device, group, 0).await;
        assert!(locks.get(&lock).await.unwrap().is_none());
    }
}

mod batches {
    use super::*;

    #[tokio::test]
    async fn incomplete_batch_is_not_committed() {
        let app = TestApp::new().await;
        let alice = app.owning_user("alice").await;
        let group = app.create_group(&alice).await;
        let device = Uuid::new_v4();
        let file_group = Some(Uuid::new_v4());

        app.stage(
            &alice,
            device,
            group,
            StageUpload {
                upload_count: 2,
                file_group_uuid: file_group,
                ..v0(Uuid::new_v4(), "abc")
            },
        )
        .await;

        let err = try_commit(&app, &alice, device, group, 0).await.unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
        assert_eq!(app.current_version(group).await, 0);
        assert!(FileIndexStore::new(&app.db).list(group).await.unwrap().is_empty());

        let staged = StagingStore::new(&app.db)
            .select_batch(device, group)
            .await
            .unwrap();
        assert_eq!(staged.len(), 1);

        let second = Uuid::new_v4();
        app.stage(
            &alice,
            device,
            group,
            StageUpload {
                upload_index: 2,
                upload_count: 2,
                file_group_uuid: file_group,
                ..v0(second, "def")
            },
        )
        .await;
        let summary = app.commit_ok(&alice, device, group, 0).await;
        assert_eq!(summary.number_committed, 2);
        assert_eq!(index_entry(&app, group, second).await.file_group_uuid, file_group);
    }

    #[tokio::test]
    async fn empty_batch_is_rejected() {
        let app = TestApp::new().await;
        let alice = app.owning_user("alice").await;
        let group = app.create_group(&alice).await;

        let err = try_commit(&app, &alice, Uuid::new_v4(), group, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
    }

    #[tokio::test]
    async fn failed_batch_rolls_back_every_operation() {
        let app = TestApp::new().await;
        let alice = app.owning_user("alice").await;
        let group = app.create_group(&alice).await;
        let device = Uuid::new_v4();
        let existing = Uuid::new_v4();

        app.stage(&alice, device, group, v0(existing, "abc")).await;
        app.commit_ok(&alice, device, group, 0).await;

        let file_group = Some(Uuid::new_v4());
        let fresh = Uuid::new_v4();
        for (index, file) in [(1, fresh), (2, existing)] {
            app.stage(
                &alice,
                device,
                group,
                StageUpload {
                    upload_index: index,
                    upload_count: 2,
                    file_group_uuid: file_group,
                    ..v0(file, "def")
                },
            )
            .await;
        }

        let err = try_commit(&app, &alice, device, group, 1).await.unwrap_err();
        assert!(matches!(err, SyncError::FileVersionConflict(_)));
        assert_eq!(app.current_version(group).await, 1);

        let files = FileIndexStore::new(&app.db).list(group).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].file_uuid, existing);
        assert_eq!(
            StagingStore::new(&app.db)
                .select_batch(device, group)
                .await
                .unwrap()
                .len(),
            2
        );
    }
}

mod files {
    use super::*;

    #[tokio::test]
    async fn v0_then_delete_from_another_device() {
        let app = TestApp::new().await;
        let alice = app.owning_user("alice").await;
        let group = app.create_group(&alice).await;
        let device_a = Uuid::new_v4();
        let device_b = Uuid::new_v4();
        let file = Uuid::new_v4();

        app.stage(&alice, device_a, group, v0(file, "abc")).await;
        let first = app.commit_ok(&alice, device_a, group, 0).await;
        assert_eq!(first.master_version, 1);

        let entry = index_entry(&app, group, file).await;
        assert_eq!(entry.file_version, 1);
        assert_eq!(entry.checksum.as_deref(), Some("abc"));
        assert_eq!(entry.device_uuid, device_a);
        assert_eq!(entry.owning_user_id, alice.id);
        assert!(!entry.deleted);

        app.stage(&alice, device_b, group, delete(file, 1)).await;
        let second = app.commit_ok(&alice, device_b, group, 1).await;
        assert_eq!(second.master_version, 2);

        let entry = index_entry(&app, group, file).await;
        assert_eq!(entry.file_version, 2);
        assert!(entry.deleted);
        // The first device stays part of the file's identity.
        assert_eq!(entry.device_uuid, device_a);

        let deferred_id = second.deferred_upload_id.expect("Deletion is reconciled later");
        let deferred = DeferredUploadService::new(&app.db);
        let row = deferred.get(deferred_id).await.unwrap().unwrap();
        assert_eq!(row.status, DeferredUploadStatus::PendingChange);
        assert_eq!(row.user_id, alice.id);

        let linked = deferred.uploads_for(deferred_id).await.unwrap();
        assert_eq!(linked.len(), 1);
        assert_eq!(linked[0].state, UploadState::DeleteSingleFile);
        assert!(
            StagingStore::new(&app.db)
                .select_batch(device_b, group)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn v0_for_existing_file_conflicts() {
        let app = TestApp::new().await;
        let alice = app.owning_user("alice").await;
        let group = app.create_group(&alice).await;
        let file = Uuid::new_v4();
        let phone = Uuid::new_v4();
        let laptop = Uuid::new_v4();

        app.stage(&alice, phone, group, v0(file, "abc")).await;
        app.commit_ok(&alice, phone, group, 0).await;

        app.stage(&alice, laptop, group, v0(file, "def")).await;
        let err = try_commit(&app, &alice, laptop, group, 1).await.unwrap_err();
        assert!(matches!(err, SyncError::FileVersionConflict(_)));
        assert_eq!(index_entry(&app, group, file).await.checksum.as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn change_based_on_old_version_conflicts() {
        let app = TestApp::new().await;
        let alice = app.owning_user("alice").await;
        let group = app.create_group(&alice).await;
        let device = Uuid::new_v4();
        let file = Uuid::new_v4();

        app.upload_comment_file(&alice, device, group, file).await;
        app.commit_ok(&alice, device, group, 0).await;
        app.stage(&alice, device, group, change(file, 1, r#"{"id":"1"}"#))
            .await;
        app.commit_ok(&alice, device, group, 1).await;

        app.stage(&alice, device, group, change(file, 1, r#"{"id":"2"}"#))
            .await;
        let err = try_commit(&app, &alice, device, group, 2).await.unwrap_err();
        assert!(matches!(err, SyncError::FileVersionConflict(_)));
    }

    #[tokio::test]
    async fn deleted_file_cannot_be_changed() {
        let app = TestApp::new().await;
        let alice = app.owning_user("alice").await;
        let group = app.create_group(&alice).await;
        let device = Uuid::new_v4();
        let file = Uuid::new_v4();

        app.stage(&alice, device, group, v0(file, "abc")).await;
        app.commit_ok(&alice, device, group, 0).await;
        app.stage(&alice, device, group, delete(file, 1)).await;
        app.commit_ok(&alice, device, group, 1).await;

        app.stage(&alice, device, group, delete(file, 2)).await;
        let err = try_commit(&app, &alice, device, group, 2).await.unwrap_err();
        assert!(matches!(err, SyncError::FileVersionConflict(_)));
    }

    #[tokio::test]
    async fn change_clears_checksum_until_merged() {
        let app = TestApp::new().await;
        let alice = app.owning_user("alice").await;
        let group = app.create_group(&alice).await;
        let device = Uuid::new_v4();
        let file = Uuid::new_v4();

        app.upload_comment_file(&alice, device, group, file).await;
        app.commit_ok(&alice, device, group, 0).await;
        assert!(index_entry(&app, group, file).await.checksum.is_some());

        app.stage(
            &alice,
            device,
            group,
            StageUpload {
                app_meta_data: Some("title".into()),
                ..change(file, 1, r#"{"id":"c1","text":"hello"}"#)
            },
        )
        .await;
        let summary = app.commit_ok(&alice, device, group, 1).await;
        assert!(summary.deferred_upload_id.is_some());

        let entry = index_entry(&app, group, file).await;
        assert_eq!(entry.file_version, 2);
        assert_eq!(entry.checksum, None);
        assert_eq!(entry.app_meta_data.as_deref(), Some("title"));

        let err = app
            .files()
            .download_file(&alice, group, file)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Busy(_)));
    }

    #[tokio::test]
    async fn change_to_file_without_resolver_is_rejected() {
        let app = TestApp::new().await;
        let alice = app.owning_user("alice").await;
        let group = app.create_group(&alice).await;
        let device = Uuid::new_v4();
        let file = Uuid::new_v4();

        app.stage(&alice, device, group, v0(file, "abc")).await;
        app.commit_ok(&alice, device, group, 0).await;

        app.stage(&alice, device, group, change(file, 1, r#"{"id":"1"}"#))
            .await;
        let err = try_commit(&app, &alice, device, group, 1).await.unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
    }

    #[tokio::test]
    async fn sharing_user_files_belong_to_inviting_owner() {
        let app = TestApp::new().await;
        let alice = app.owning_user("alice").await;
        let sam = app.sharing_user("sam").await;
        let group = app.create_group(&alice).await;
        app.join(&alice, group, &sam, Permission::Write).await;
        let device = Uuid::new_v4();
        let file = Uuid::new_v4();

        app.stage(&sam, device, group, v0(file, "abc")).await;
        app.commit_ok(&sam, device, group, 0).await;

        assert_eq!(index_entry(&app, group, file).await.owning_user_id, alice.id);
    }

    #[tokio::test]
    async fn uploaded_content_is_downloadable() {
        let app = TestApp::new().await;
        let alice = app.owning_user("alice").await;
        let group = app.create_group(&alice).await;
        let device = Uuid::new_v4();
        let file = Uuid::new_v4();

        let staged = app.upload_comment_file(&alice, device, group, file).await;
        let checksum = staged.checksum.clone().unwrap();
        assert_eq!(
            checksum,
            common::storage::ContentHash::compute(crate::common::EMPTY_COMMENTS.as_bytes()).to_hex()
        );

        let names = app.storage(&alice).await.file_names().await;
        assert_eq!(names, vec![format!("{file}.{device}.1.json")]);

        app.commit_ok(&alice, device, group, 0).await;
        let downloaded = app.files().download_file(&alice, group, file).await.unwrap();
        assert_eq!(downloaded.contents, crate::common::EMPTY_COMMENTS.as_bytes());
        assert_eq!(downloaded.checksum, checksum);
        assert_eq!(downloaded.file_version, 1);
        assert_eq!(downloaded.mime_type.as_deref(), Some("application/json"));
    }

    #[tokio::test]
    async fn upload_with_wrong_checksum_is_rejected() {
        let app = TestApp::new().await;
        let alice = app.owning_user("alice").await;
        let group = app.create_group(&alice).await;

        let err = app
            .files()
            .upload_file(
                &alice,
                Uuid::new_v4(),
                group,
                StageUpload {
                    contents: Some(b"hello".to_vec()),
                    ..v0(Uuid::new_v4(), "00")
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
        assert!(app.storage(&alice).await.file_names().await.is_empty());
    }

    fn plain_upload(file: Uuid, contents: &[u8]) -> StageUpload {
        StageUpload {
            contents: Some(contents.to_vec()),
            checksum: None,
            ..v0(file, "unused")
        }
    }

    #[tokio::test]
    async fn restaged_upload_cannot_replace_stored_content() {
        let app = TestApp::new().await;
        let alice = app.owning_user("alice").await;
        let group = app.create_group(&alice).await;
        let device = Uuid::new_v4();
        let file = Uuid::new_v4();

        let staged = app
            .files()
            .upload_file(&alice, device, group, plain_upload(file, b"first"))
            .await
            .unwrap();
        let again = app
            .files()
            .upload_file(&alice, device, group, plain_upload(file, b"first"))
            .await
            .unwrap();
        assert_eq!(again.id, staged.id);

        let err = app
            .files()
            .upload_file(&alice, device, group, plain_upload(file, b"second"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));

        app.commit_ok(&alice, device, group, 0).await;
        let downloaded = app.files().download_file(&alice, group, file).await.unwrap();
        assert_eq!(downloaded.contents, b"first");
        assert_eq!(
            downloaded.checksum,
            common::storage::ContentHash::compute(&downloaded.contents).to_hex()
        );
    }

    #[tokio::test]
    async fn first_version_of_existing_file_is_not_stored() {
        let app = TestApp::new().await;
        let alice = app.owning_user("alice").await;
        let group = app.create_group(&alice).await;
        let file = Uuid::new_v4();
        let phone = Uuid::new_v4();
        let laptop = Uuid::new_v4();

        app.upload_comment_file(&alice, phone, group, file).await;
        app.commit_ok(&alice, phone, group, 0).await;

        let err = app
            .files()
            .upload_file(&alice, laptop, group, plain_upload(file, b"other"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::FileVersionConflict(_)));
        assert_eq!(
            app.storage(&alice).await.file_names().await,
            vec![format!("{file}.{phone}.1.json")]
        );
    }

    #[tokio::test]
    async fn device_uploading_already_is_busy() {
        let app = TestApp::new().await;
        let alice = app.owning_user("alice").await;
        let group = app.create_group(&alice).await;
        let device = Uuid::new_v4();

        LockManager::new(&app.db)
            .acquire(
                &staging_lock_name(group, device),
                "other-request",
                chrono::Duration::seconds(60),
            )
            .await
            .unwrap();

        let err = app
            .files()
            .upload_file(&alice, device, group, plain_upload(Uuid::new_v4(), b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Busy(_)));
        assert!(app.storage(&alice).await.file_names().await.is_empty());
    }

    #[tokio::test]
    async fn change_must_name_the_files_own_group() {
        let app = TestApp::new().await;
        let alice = app.owning_user("alice").await;
        let group = app.create_group(&alice).await;
        let device = Uuid::new_v4();
        let file = Uuid::new_v4();

        app.stage(&alice, device, group, v0(file, "abc")).await;
        app.commit_ok(&alice, device, group, 0).await;

        app.stage(
            &alice,
            device,
            group,
            StageUpload {
                file_group_uuid: Some(Uuid::new_v4()),
                ..delete(file, 1)
            },
        )
        .await;
        let err = try_commit(&app, &alice, device, group, 1).await.unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));

        assert!(!index_entry(&app, group, file).await.deleted);
        assert_eq!(app.current_version(group).await, 1);
        let staged = StagingStore::new(&app.db).select_batch(device, group).await.unwrap();
        assert_eq!(staged.len(), 1);
        assert!(staged[0].deferred_upload_id.is_none());
    }
}
