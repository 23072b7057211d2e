use common::Permission;
use syncserver::error::SyncError;
use syncserver::file_index::{FileIndexKey, FileIndexStore};
use syncserver::lock::{LockManager, sharing_group_lock_name};
use syncserver::sharing::{InvitationService, NewInvitation, SharingService};
use uuid::Uuid;

use crate::common::{TestApp, v0};

mod groups {
    use super::*;

    #[tokio::test]
    async fn owning_user_creates_group_as_admin() {
        let app = TestApp::new().await;
        let alice = app.owning_user("alice").await;
        let uuid = Uuid::new_v4();

        let group = SharingService::new(&app.db)
            .create_group(&alice, Some(uuid), Some("Photos".into()))
            .await
            .unwrap();
        assert_eq!(group.sharing_group_uuid, uuid);
        assert!(!group.deleted);

        let summaries = SharingService::new(&app.db)
            .groups_for_user(alice.id)
            .await
            .unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].sharing_group_uuid, uuid);
        assert_eq!(summaries[0].name.as_deref(), Some("Photos"));
        assert_eq!(summaries[0].permission, Permission::Admin);
        assert_eq!(summaries[0].master_version, 0);
    }

    #[tokio::test]
    async fn duplicate_group_uuid_is_rejected() {
        let app = TestApp::new().await;
        let alice = app.owning_user("alice").await;
        let group = app.create_group(&alice).await;

        let err = SharingService::new(&app.db)
            .create_group(&alice, Some(group), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
    }

    #[tokio::test]
    async fn sharing_user_cannot_create_group() {
        let app = TestApp::new().await;
        let sam = app.sharing_user("sam").await;

        let err = SharingService::new(&app.db)
            .create_group(&sam, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn rename_requires_admin() {
        let app = TestApp::new().await;
        let alice = app.owning_user("alice").await;
        let bob = app.owning_user("bob").await;
        let group = app.create_group(&alice).await;
        app.join(&alice, group, &bob, Permission::Write).await;
        let sharing = SharingService::new(&app.db);

        let err = sharing
            .rename_group(bob.id, group, Some("Mine".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::PermissionDenied(_)));

        sharing
            .rename_group(alice.id, group, Some("Renamed".into()))
            .await
            .unwrap();
        let renamed = sharing.group(group).await.unwrap().unwrap();
        assert_eq!(renamed.name.as_deref(), Some("Renamed"));
    }

    #[tokio::test]
    async fn deleted_group_refuses_operations() {
        let app = TestApp::new().await;
        let alice = app.owning_user("alice").await;
        let group = app.create_group(&alice).await;
        let sharing = SharingService::new(&app.db);

        sharing
            .soft_delete_group(alice.id, group, app.config.sync.commit_lock_expiry())
            .await
            .unwrap();

        let err = sharing
            .require_permission(group, alice.id, Permission::Read)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NotFound(_)));
        assert!(sharing.groups_for_user(alice.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn deleting_group_tombstones_files_and_removes_members() {
        let app = TestApp::new().await;
        let alice = app.owning_user("alice").await;
        let bob = app.owning_user("bob").await;
        let group = app.create_group(&alice).await;
        app.join(&alice, group, &bob, Permission::Write).await;

        let device = Uuid::new_v4();
        let files = [Uuid::new_v4(), Uuid::new_v4()];
        app.stage(&alice, device, group, v0(files[0], "abc")).await;
        app.commit_ok(&alice, device, group, 0).await;
        app.stage(&bob, device, group, v0(files[1], "def")).await;
        app.commit_ok(&bob, device, group, 1).await;

        let invitation = InvitationService::new(&app.db)
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

        let sharing = SharingService::new(&app.db);
        sharing
            .soft_delete_group(alice.id, group, app.config.sync.commit_lock_expiry())
            .await
            .unwrap();

        assert_eq!(app.current_version(group).await, 3);
        let index = FileIndexStore::new(&app.db);
        for file in files {
            let tombstone = index
                .find(FileIndexKey::File {
                    sharing_group_uuid: group,
                    file_uuid: file,
                })
                .await
                .unwrap()
                .unwrap();
            assert!(tombstone.deleted);
            assert_eq!(tombstone.file_version, 2);
        }
        assert!(sharing.members(group).await.unwrap().is_empty());
        assert!(
            InvitationService::new(&app.db)
                .lookup(invitation.sharing_invitation_uuid)
                .await
                .unwrap()
                .is_none()
        );
        assert!(sharing.group(group).await.unwrap().unwrap().deleted);
    }

    #[tokio::test]
    async fn only_an_admin_deletes_an_unlocked_group() {
        let app = TestApp::new().await;
        let alice = app.owning_user("alice").await;
        let bob = app.owning_user("bob").await;
        let group = app.create_group(&alice).await;
        app.join(&alice, group, &bob, Permission::Write).await;
        let sharing = SharingService::new(&app.db);
        let expiry = app.config.sync.commit_lock_expiry();

        let err = sharing.soft_delete_group(bob.id, group, expiry).await.unwrap_err();
        assert!(matches!(err, SyncError::PermissionDenied(_)));

        LockManager::new(&app.db)
            .acquire(&sharing_group_lock_name(group), "committer", expiry)
            .await
            .unwrap();
        let err = sharing.soft_delete_group(alice.id, group, expiry).await.unwrap_err();
        assert!(matches!(err, SyncError::Busy(_)));

        assert!(!sharing.group(group).await.unwrap().unwrap().deleted);
        assert_eq!(sharing.members(group).await.unwrap().len(), 2);
        assert_eq!(app.current_version(group).await, 0);
    }

    #[tokio::test]
    async fn non_member_is_denied() {
        let app = TestApp::new().await;
        let alice = app.owning_user("alice").await;
        let mallory = app.owning_user("mallory").await;
        let group = app.create_group(&alice).await;

        let err = SharingService::new(&app.db)
            .require_permission(group, mallory.id, Permission::Read)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn read_member_cannot_write() {
        let app = TestApp::new().await;
        let alice = app.owning_user("alice").await;
        let bob = app.owning_user("bob").await;
        let group = app.create_group(&alice).await;
        app.join(&alice, group, &bob, Permission::Read).await;

        let err = app
            .files()
            .stage_upload(&bob, Uuid::new_v4(), group, v0(Uuid::new_v4(), "abc"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::PermissionDenied(_)));
    }
}

mod leave {
    use super::*;

    #[tokio::test]
    async fn owning_user_leaving_tombstones_their_files() {
        let app = TestApp::new().await;
        let alice = app.owning_user("alice").await;
        let bob = app.owning_user("bob").await;
        let sam = app.sharing_user("sam").await;
        let group = app.create_group(&alice).await;
        app.join(&alice, group, &bob, Permission::Admin).await;
        app.join(&bob, group, &sam, Permission::Write).await;

        let device = Uuid::new_v4();
        let bobs_file = Uuid::new_v4();
        app.stage(&bob, device, group, v0(bobs_file, "abc")).await;
        app.commit_ok(&bob, device, group, 0).await;

        let alices_device = Uuid::new_v4();
        let alices_file = Uuid::new_v4();
        app.stage(&alice, alices_device, group, v0(alices_file, "def"))
            .await;
        app.commit_ok(&alice, alices_device, group, 1).await;

        let sharing = SharingService::new(&app.db);
        assert_eq!(
            sharing.membership(group, sam.id).await.unwrap().unwrap().owning_user_id,
            Some(bob.id)
        );

        let outcome = sharing
            .leave_group(&bob, group, app.config.sync.commit_lock_expiry())
            .await
            .unwrap();
        assert_eq!(outcome.files_deleted, 1);
        assert!(!outcome.group_deleted);
        assert_eq!(app.current_version(group).await, 3);

        let index = FileIndexStore::new(&app.db);
        let tombstone = index
            .find(FileIndexKey::File {
                sharing_group_uuid: group,
                file_uuid: bobs_file,
            })
            .await
            .unwrap()
            .unwrap();
        assert!(tombstone.deleted);
        assert_eq!(tombstone.file_version, 2);

        let kept = index
            .find(FileIndexKey::File {
                sharing_group_uuid: group,
                file_uuid: alices_file,
            })
            .await
            .unwrap()
            .unwrap();
        assert!(!kept.deleted);
        assert_eq!(kept.file_version, 1);

        assert!(sharing.membership(group, bob.id).await.unwrap().is_none());
        let sams_membership = sharing.membership(group, sam.id).await.unwrap().unwrap();
        assert_eq!(sams_membership.owning_user_id, None);
    }

    #[tokio::test]
    async fn leaving_without_files_keeps_master_version() {
        let app = TestApp::new().await;
        let alice = app.owning_user("alice").await;
        let bob = app.owning_user("bob").await;
        let group = app.create_group(&alice).await;
        app.join(&alice, group, &bob, Permission::Read).await;

        let outcome = SharingService::new(&app.db)
            .leave_group(&bob, group, app.config.sync.commit_lock_expiry())
            .await
            .unwrap();
        assert_eq!(outcome.files_deleted, 0);
        assert!(!outcome.group_deleted);
        assert_eq!(app.current_version(group).await, 0);
    }

    #[tokio::test]
    async fn last_member_leaving_deletes_group() {
        let app = TestApp::new().await;
        let alice = app.owning_user("alice").await;
        let group = app.create_group(&alice).await;
        let sharing = SharingService::new(&app.db);

        let outcome = sharing
            .leave_group(&alice, group, app.config.sync.commit_lock_expiry())
            .await
            .unwrap();
        assert!(outcome.group_deleted);
        assert!(sharing.group(group).await.unwrap().unwrap().deleted);
    }

    #[tokio::test]
    async fn non_member_cannot_leave() {
        let app = TestApp::new().await;
        let alice = app.owning_user("alice").await;
        let bob = app.owning_user("bob").await;
        let group = app.create_group(&alice).await;

        let err = SharingService::new(&app.db)
            .leave_group(&bob, group, app.config.sync.commit_lock_expiry())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NotFound(_)));
    }
}
