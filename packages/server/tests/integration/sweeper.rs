use chrono::Utc;
use common::Permission;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use syncserver::config::SyncConfig;
use syncserver::entity::{sharing_invitation, upload};
use syncserver::lock::{LockManager, sharing_group_lock_name};
use syncserver::sharing::{InvitationService, NewInvitation};
use syncserver::sweeper::{SweepSummary, sweep_once};
use uuid::Uuid;

use crate::common::{TestApp, v0};

#[tokio::test]
async fn sweep_removes_stale_rows_only() {
    let app = TestApp::new().await;
    let alice = app.owning_user("alice").await;
    let group = app.create_group(&alice).await;

    let locks = LockManager::new(&app.db);
    let stale_lock = sharing_group_lock_name(Uuid::new_v4());
    let live_lock = sharing_group_lock_name(Uuid::new_v4());
    locks.acquire(&stale_lock, "gone", chrono::Duration::seconds(-5)).await.unwrap();
    locks.acquire(&live_lock, "here", chrono::Duration::seconds(60)).await.unwrap();

    let invitations = InvitationService::new(&app.db);
    let mut created = Vec::new();
    for _ in 0..2 {
        let inv = invitations
            .create_invitation(
                &alice,
                NewInvitation {
                    sharing_group_uuid: group,
                    permission: Permission::Read,
                    number_acceptors: None,
                    allow_social_acceptance: false,
                    expiry_secs: None,
                },
                &app.config.invitation,
            )
            .await
            .unwrap();
        created.push(inv.sharing_invitation_uuid);
    }
    sharing_invitation::Entity::update_many()
        .col_expr(
            sharing_invitation::Column::Expiry,
            Expr::value(Utc::now() - chrono::Duration::minutes(1)),
        )
        .filter(sharing_invitation::Column::SharingInvitationUuid.eq(created[0]))
        .exec(&app.db)
        .await
        .unwrap();

    let old_device = Uuid::new_v4();
    let new_device = Uuid::new_v4();
    let old = app.stage(&alice, old_device, group, v0(Uuid::new_v4(), "abc")).await;
    app.stage(&alice, new_device, group, v0(Uuid::new_v4(), "def")).await;
    upload::Entity::update_many()
        .col_expr(
            upload::Column::CreatedAt,
            Expr::value(Utc::now() - chrono::Duration::days(2)),
        )
        .filter(upload::Column::Id.eq(old.id))
        .exec(&app.db)
        .await
        .unwrap();

    let summary = sweep_once(&app.db, app.accounts.as_ref(), &SyncConfig::default()).await.unwrap();
    assert_eq!(
        summary,
        SweepSummary {
            locks: 1,
            invitations: 1,
            uploads: 1,
            contents: 0,
        }
    );

    assert!(locks.get(&stale_lock).await.unwrap().is_none());
    assert!(locks.get(&live_lock).await.unwrap().is_some());
    assert!(invitations.lookup(created[1]).await.unwrap().is_some());
    assert_eq!(upload::Entity::find().all(&app.db).await.unwrap().len(), 1);

    let again = sweep_once(&app.db, app.accounts.as_ref(), &SyncConfig::default()).await.unwrap();
    assert_eq!(again, SweepSummary::default());
}

#[tokio::test]
async fn committed_changes_are_not_swept() {
    let app = TestApp::new().await;
    let alice = app.owning_user("alice").await;
    let group = app.create_group(&alice).await;
    let device = Uuid::new_v4();
    let file = Uuid::new_v4();

    app.upload_comment_file(&alice, device, group, file).await;
    app.commit_ok(&alice, device, group, 0).await;
    app.stage(&alice, device, group, crate::common::change(file, 1, r#"{"id":"a"}"#))
        .await;
    app.commit_ok(&alice, device, group, 1).await;

    upload::Entity::update_many()
        .col_expr(
            upload::Column::CreatedAt,
            Expr::value(Utc::now() - chrono::Duration::days(2)),
        )
        .exec(&app.db)
        .await
        .unwrap();

    let summary = sweep_once(&app.db, app.accounts.as_ref(), &SyncConfig::default()).await.unwrap();
    assert_eq!(summary.uploads, 0);
    assert_eq!(upload::Entity::find().all(&app.db).await.unwrap().len(), 1);
}

async fn backdate_uploads(app: &TestApp) {
    upload::Entity::update_many()
        .col_expr(
            upload::Column::CreatedAt,
            Expr::value(Utc::now() - chrono::Duration::days(2)),
        )
        .exec(&app.db)
        .await
        .unwrap();
}

#[tokio::test]
async fn swept_first_versions_lose_their_stored_content() {
    let app = TestApp::new().await;
    let alice = app.owning_user("alice").await;
    let group = app.create_group(&alice).await;

    app.upload_comment_file(&alice, Uuid::new_v4(), group, Uuid::new_v4())
        .await;
    backdate_uploads(&app).await;

    let summary = sweep_once(&app.db, app.accounts.as_ref(), &SyncConfig::default())
        .await
        .unwrap();
    assert_eq!(summary.uploads, 1);
    assert_eq!(summary.contents, 1);
    assert!(upload::Entity::find().all(&app.db).await.unwrap().is_empty());
    assert!(app.storage(&alice).await.file_names().await.is_empty());
}

#[tokio::test]
async fn content_of_unreachable_storage_is_swept_later() {
    let app = TestApp::new().await;
    let alice = app.owning_user("alice").await;
    let group = app.create_group(&alice).await;

    app.upload_comment_file(&alice, Uuid::new_v4(), group, Uuid::new_v4())
        .await;
    backdate_uploads(&app).await;

    let storage = app.storage(&alice).await;
    storage.set_unavailable(true);
    let summary = sweep_once(&app.db, app.accounts.as_ref(), &SyncConfig::default())
        .await
        .unwrap();
    assert_eq!(summary.uploads, 0);
    assert_eq!(upload::Entity::find().all(&app.db).await.unwrap().len(), 1);

    storage.set_unavailable(false);
    let summary = sweep_once(&app.db, app.accounts.as_ref(), &SyncConfig::default())
        .await
        .unwrap();
    assert_eq!(summary.contents, 1);
    assert!(storage.file_names().await.is_empty());
}

#[tokio::test]
async fn group_being_committed_to_is_swept_later() {
    let app = TestApp::new().await;
    let alice = app.owning_user("alice").await;
    let group = app.create_group(&alice).await;

    app.stage(&alice, Uuid::new_v4(), group, v0(Uuid::new_v4(), "abc")).await;
    backdate_uploads(&app).await;

    let locks = LockManager::new(&app.db);
    let lock = sharing_group_lock_name(group);
    locks.acquire(&lock, "committer", chrono::Duration::seconds(60)).await.unwrap();

    let summary = sweep_once(&app.db, app.accounts.as_ref(), &SyncConfig::default())
        .await
        .unwrap();
    assert_eq!(summary.uploads, 0);

    locks.release(&lock).await.unwrap();
    let summary = sweep_once(&app.db, app.accounts.as_ref(), &SyncConfig::default())
        .await
        .unwrap();
    assert_eq!(summary.uploads, 1);
}
