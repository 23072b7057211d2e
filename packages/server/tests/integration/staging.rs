use chrono::Utc;
use common::UploadState;
use syncserver::error::SyncError;
use syncserver::upload::{BatchKey, StageUpload, StagingStore};
use uuid::Uuid;

use crate::common::{TestApp, change, v0};

#[tokio::test]
async fn v0_without_checksum_is_rejected() {
    let app = TestApp::new().await;
    let alice = app.owning_user("alice").await;
    let group = app.create_group(&alice).await;
    let device = Uuid::new_v4();

    for checksum in [None, Some(String::new())] {
        let err = app
            .files()
            .stage_upload(
                &alice,
                device,
                group,
                StageUpload {
                    checksum,
                    ..v0(Uuid::new_v4(), "unused")
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
    }

    let batch = StagingStore::new(&app.db)
        .select_batch(device, group)
        .await
        .unwrap();
    assert!(batch.is_empty());
}

#[tokio::test]
async fn restaging_identical_upload_returns_existing_row() {
    let app = TestApp::new().await;
    let alice = app.owning_user("alice").await;
    let group = app.create_group(&alice).await;
    let device = Uuid::new_v4();
    let file = Uuid::new_v4();

    let first = app.stage(&alice, device, group, v0(file, "abc")).await;
    let again = app.stage(&alice, device, group, v0(file, "abc")).await;
    assert_eq!(first.id, again.id);

    let err = app
        .files()
        .stage_upload(&alice, device, group, v0(file, "different"))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Validation(_)));
}

#[tokio::test]
async fn multi_upload_batch_needs_file_group() {
    let app = TestApp::new().await;
    let alice = app.owning_user("alice").await;
    let group = app.create_group(&alice).await;

    let err = app
        .files()
        .stage_upload(
            &alice,
            Uuid::new_v4(),
            group,
            StageUpload {
                upload_count: 2,
                ..v0(Uuid::new_v4(), "abc")
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Validation(_)));
}

#[tokio::test]
async fn state_specific_fields_are_validated() {
    let app = TestApp::new().await;
    let alice = app.owning_user("alice").await;
    let group = app.create_group(&alice).await;
    let device = Uuid::new_v4();
    let file = Uuid::new_v4();

    let invalid = [
        StageUpload {
            contents: None,
            ..change(file, 1, "x")
        },
        change(file, 0, "x"),
        StageUpload {
            change_resolver_name: Some("CommentFile".into()),
            ..change(file, 1, "x")
        },
        StageUpload {
            change_resolver_name: Some("NoSuchResolver".into()),
            ..v0(file, "abc")
        },
        StageUpload {
            state: UploadState::Uploaded,
            ..v0(file, "abc")
        },
        StageUpload {
            upload_index: 2,
            ..v0(file, "abc")
        },
    ];

    for request in invalid {
        let err = app
            .files()
            .stage_upload(&alice, device, group, request.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)), "{request:?}");
    }
}

#[tokio::test]
async fn abandon_drops_only_the_devices_batch() {
    let app = TestApp::new().await;
    let alice = app.owning_user("alice").await;
    let group = app.create_group(&alice).await;
    let phone = Uuid::new_v4();
    let laptop = Uuid::new_v4();

    app.stage(&alice, phone, group, v0(Uuid::new_v4(), "abc")).await;
    app.stage(&alice, laptop, group, v0(Uuid::new_v4(), "def")).await;

    assert_eq!(app.files().abandon(&alice, phone, group).await.unwrap(), 1);

    let staging = StagingStore::new(&app.db);
    assert!(staging.select_batch(phone, group).await.unwrap().is_empty());
    assert_eq!(staging.select_batch(laptop, group).await.unwrap().len(), 1);
}

#[tokio::test]
async fn batch_is_returned_in_upload_order() {
    let app = TestApp::new().await;
    let alice = app.owning_user("alice").await;
    let group = app.create_group(&alice).await;
    let device = Uuid::new_v4();
    let file_group = Some(Uuid::new_v4());
    let staging = StagingStore::new(&app.db);
    let key = BatchKey {
        user_id: alice.id,
        device_uuid: device,
        sharing_group_uuid: group,
    };

    for index in [3, 1, 2] {
        staging
            .stage(
                key,
                StageUpload {
                    upload_index: index,
                    upload_count: 3,
                    file_group_uuid: file_group,
                    ..v0(Uuid::new_v4(), "abc")
                },
                &app.resolvers,
            )
            .await
            .unwrap();
    }

    let indexes: Vec<i32> = staging
        .select_batch(device, group)
        .await
        .unwrap()
        .iter()
        .map(|row| row.upload_index)
        .collect();
    assert_eq!(indexes, vec![1, 2, 3]);
}

#[tokio::test]
async fn abandoned_rows_are_those_staged_before_cutoff() {
    let app = TestApp::new().await;
    let alice = app.owning_user("alice").await;
    let group = app.create_group(&alice).await;
    let device = Uuid::new_v4();

    let staged = app.stage(&alice, device, group, v0(Uuid::new_v4(), "abc")).await;
    let staging = StagingStore::new(&app.db);

    let past = Utc::now() - chrono::Duration::hours(1);
    assert!(staging.abandoned_before(past).await.unwrap().is_empty());

    let future = Utc::now() + chrono::Duration::hours(1);
    let abandoned = staging.abandoned_before(future).await.unwrap();
    assert_eq!(abandoned.len(), 1);
    assert_eq!(abandoned[0].id, staged.id);
}

#[tokio::test]
async fn abandon_removes_stored_first_versions() {
    let app = TestApp::new().await;
    let alice = app.owning_user("alice").await;
    let group = app.create_group(&alice).await;
    let device = Uuid::new_v4();

    app.upload_comment_file(&alice, device, group, Uuid::new_v4()).await;
    assert_eq!(app.storage(&alice).await.file_names().await.len(), 1);

    assert_eq!(app.files().abandon(&alice, device, group).await.unwrap(), 1);
    assert!(app.storage(&alice).await.file_names().await.is_empty());
}

#[tokio::test]
async fn staged_file_cannot_be_inserted_twice() {
    let app = TestApp::new().await;
    let alice = app.owning_user("alice").await;
    let group = app.create_group(&alice).await;
    let device = Uuid::new_v4();
    let file = Uuid::new_v4();
    let staging = StagingStore::new(&app.db);
    let key = BatchKey {
        user_id: alice.id,
        device_uuid: device,
        sharing_group_uuid: group,
    };

    let first = staging.insert(key, v0(file, "abc")).await.unwrap();
    let same = staging.insert(key, v0(file, "abc")).await.unwrap();
    assert_eq!(same.id, first.id);

    let err = staging.insert(key, v0(file, "def")).await.unwrap_err();
    assert!(matches!(err, SyncError::Validation(_)));
    let err = staging.insert(key, v0(Uuid::new_v4(), "abc")).await.unwrap_err();
    assert!(matches!(err, SyncError::Validation(_)));

    assert_eq!(staging.select_batch(device, group).await.unwrap().len(), 1);
}

#[tokio::test]
async fn concurrent_identical_stages_share_one_row() {
    let app = TestApp::new().await;
    let alice = app.owning_user("alice").await;
    let group = app.create_group(&alice).await;
    let device = Uuid::new_v4();
    let request = v0(Uuid::new_v4(), "abc");

    let files = app.files();
    let (a, b) = tokio::join!(
        files.stage_upload(&alice, device, group, request.clone()),
        files.stage_upload(&alice, device, group, request),
    );
    assert_eq!(a.unwrap().id, b.unwrap().id);
    assert_eq!(
        StagingStore::new(&app.db)
            .select_batch(device, group)
            .await
            .unwrap()
            .len(),
        1
    );
}
