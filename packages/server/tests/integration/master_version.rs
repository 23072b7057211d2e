use syncserver::master_version::MasterVersionStore;
use uuid::Uuid;

use crate::common::TestApp;

#[tokio::test]
async fn new_group_starts_at_zero() {
    let app = TestApp::new().await;
    let owner = app.owning_user("alice").await;
    let group = app.create_group(&owner).await;

    let versions = MasterVersionStore::new(&app.db);
    assert_eq!(versions.current(group).await.unwrap(), Some(0));
    assert_eq!(versions.current(Uuid::new_v4()).await.unwrap(), None);
}

#[tokio::test]
async fn advance_is_compare_and_swap() {
    let app = TestApp::new().await;
    let owner = app.owning_user("alice").await;
    let group = app.create_group(&owner).await;
    let versions = MasterVersionStore::new(&app.db);

    assert!(versions.advance(group, 0).await.unwrap());
    assert!(!versions.advance(group, 0).await.unwrap());
    assert!(versions.advance(group, 1).await.unwrap());

    assert_eq!(versions.current_for_update(group).await.unwrap(), Some(2));
}
