use common::storage::ContentHash;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use serde_json::{Value, json};
use syncserver::entity::user;
use uuid::Uuid;

use crate::common::{TestServer, routes, token};

/// Create a group over HTTP and return its UUID.
async fn create_group(server: &TestServer, token: &str) -> Uuid {
    let res = server
        .post(routes::SHARING_GROUPS, &json!({ "name": "Notes" }), Some(token), None)
        .await;
    assert_eq!(res.status, 201, "{}", res.text);
    res.body["sharing_group_uuid"].as_str().unwrap().parse().unwrap()
}

fn v0_body(file: Uuid, content: &str, mime: &str) -> Value {
    json!({
        "file_uuid": file,
        "file_version": 0,
        "state": "v0UploadCompleteFile",
        "upload_index": 1,
        "upload_count": 1,
        "content": content,
        "mime_type": mime,
    })
}

mod auth {
    use super::*;

    #[tokio::test]
    async fn missing_token_is_rejected() {
        let server = TestServer::spawn().await;
        let res = server.get(routes::SHARING_GROUPS, None).await;
        assert_eq!(res.status, 401);
        assert_eq!(res.body["code"], "TOKEN_MISSING");
    }

    #[tokio::test]
    async fn malformed_token_is_rejected() {
        let server = TestServer::spawn().await;
        let res = server.get(routes::SHARING_GROUPS, Some("not-a-jwt")).await;
        assert_eq!(res.status, 401);
        assert_eq!(res.body["code"], "TOKEN_INVALID");
    }

    #[tokio::test]
    async fn token_of_relinked_account_is_rejected() {
        let server = TestServer::spawn().await;
        let alice = server.app.owning_user("alice").await;
        let token = token(&alice);
        assert_eq!(server.get(routes::SHARING_GROUPS, Some(&token)).await.status, 200);

        user::Entity::update_many()
            .col_expr(user::Column::CredsId, Expr::value("relinked"))
            .filter(user::Column::Id.eq(alice.id))
            .exec(&server.app.db)
            .await
            .unwrap();

        let res = server.get(routes::SHARING_GROUPS, Some(&token)).await;
        assert_eq!(res.status, 401);
        assert_eq!(res.body["code"], "TOKEN_INVALID");
    }

    #[tokio::test]
    async fn openapi_document_is_served() {
        let server = TestServer::spawn().await;
        let res = server.get("/api-docs/openapi.json", None).await;
        assert_eq!(res.status, 200);
        assert!(res.body["paths"]["/api/v1/sharing-groups/{uuid}/commit"].is_object());
    }
}

mod groups {
    use super::*;

    #[tokio::test]
    async fn create_and_list() {
        let server = TestServer::spawn().await;
        let alice = server.app.owning_user("alice").await;
        let token = token(&alice);

        let uuid = create_group(&server, &token).await;

        let res = server.get(routes::SHARING_GROUPS, Some(&token)).await;
        assert_eq!(res.status, 200);
        let groups = res.body.as_array().unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0]["sharing_group_uuid"], uuid.to_string());
        assert_eq!(groups[0]["name"], "Notes");
        assert_eq!(groups[0]["permission"], "admin");
        assert_eq!(groups[0]["master_version"], 0);
    }

    #[tokio::test]
    async fn sharing_account_cannot_create_group() {
        let server = TestServer::spawn().await;
        let sam = server.app.sharing_user("sam").await;

        let res = server
            .post(routes::SHARING_GROUPS, &json!({}), Some(&token(&sam)), None)
            .await;
        assert_eq!(res.status, 403);
        assert_eq!(res.body["code"], "PERMISSION_DENIED");
    }

    #[tokio::test]
    async fn rename_and_delete() {
        let server = TestServer::spawn().await;
        let alice = server.app.owning_user("alice").await;
        let token = token(&alice);
        let uuid = create_group(&server, &token).await;

        let res = server.patch(&routes::group(uuid), &json!({}), &token).await;
        assert_eq!(res.status, 400);
        assert_eq!(res.body["code"], "VALIDATION_ERROR");

        let res = server
            .patch(&routes::group(uuid), &json!({ "name": "Journal" }), &token)
            .await;
        assert_eq!(res.status, 204);
        let res = server.get(routes::SHARING_GROUPS, Some(&token)).await;
        assert_eq!(res.body[0]["name"], "Journal");

        let res = server.delete(&routes::group(uuid), &token, None).await;
        assert_eq!(res.status, 204);

        let res = server.get(&routes::version(uuid), Some(&token)).await;
        assert_eq!(res.status, 404);
        let res = server.get(routes::SHARING_GROUPS, Some(&token)).await;
        assert_eq!(res.body.as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn last_member_leaving_deletes_group() {
        let server = TestServer::spawn().await;
        let alice = server.app.owning_user("alice").await;
        let token = token(&alice);
        let uuid = create_group(&server, &token).await;

        let res = server
            .post(&routes::leave(uuid), &json!({}), Some(&token), None)
            .await;
        assert_eq!(res.status, 200, "{}", res.text);
        assert_eq!(res.body["files_deleted"], 0);
        assert_eq!(res.body["group_deleted"], true);
    }

    #[tokio::test]
    async fn non_member_cannot_read_index() {
        let server = TestServer::spawn().await;
        let alice = server.app.owning_user("alice").await;
        let mallory = server.app.owning_user("mallory").await;
        let uuid = create_group(&server, &token(&alice)).await;

        let res = server.get(&routes::index(uuid), Some(&token(&mallory))).await;
        assert_eq!(res.status, 403);
    }
}

mod invitations {
    use super::*;

    #[tokio::test]
    async fn invite_inspect_and_redeem() {
        let server = TestServer::spawn().await;
        let alice = server.app.owning_user("alice").await;
        let bob = server.app.owning_user("bob").await;
        let alice_token = token(&alice);
        let bob_token = token(&bob);
        let group = create_group(&server, &alice_token).await;

        let res = server
            .post(
                &routes::invitations(group),
                &json!({ "permission": "write", "number_acceptors": 1 }),
                Some(&alice_token),
                None,
            )
            .await;
        assert_eq!(res.status, 201, "{}", res.text);
        let invitation: Uuid = res.body["sharing_invitation_uuid"]
            .as_str()
            .unwrap()
            .parse()
            .unwrap();

        let res = server.get(&routes::invitation(invitation), Some(&bob_token)).await;
        assert_eq!(res.status, 200);
        assert_eq!(res.body["sharing_group_uuid"], group.to_string());
        assert_eq!(res.body["permission"], "write");
        assert_eq!(res.body["allow_social_acceptance"], false);

        let res = server
            .post(&routes::redeem(invitation), &json!({}), Some(&bob_token), None)
            .await;
        assert_eq!(res.status, 200, "{}", res.text);
        assert_eq!(res.body["permission"], "write");

        let res = server.get(routes::SHARING_GROUPS, Some(&bob_token)).await;
        assert_eq!(res.body[0]["sharing_group_uuid"], group.to_string());
        assert_eq!(res.body[0]["permission"], "write");

        // Used up.
        let res = server.get(&routes::invitation(invitation), Some(&bob_token)).await;
        assert_eq!(res.status, 404);
    }

    #[tokio::test]
    async fn invalid_permission_is_a_validation_error() {
        let server = TestServer::spawn().await;
        let alice = server.app.owning_user("alice").await;
        let alice_token = token(&alice);
        let group = create_group(&server, &alice_token).await;

        let res = server
            .post(
                &routes::invitations(group),
                &json!({ "permission": "owner" }),
                Some(&alice_token),
                None,
            )
            .await;
        assert_eq!(res.status, 400);
        assert_eq!(res.body["code"], "VALIDATION_ERROR");
    }
}

mod files {
    use super::*;

    #[tokio::test]
    async fn upload_commit_and_download() {
        let server = TestServer::spawn().await;
        let alice = server.app.owning_user("alice").await;
        let token = token(&alice);
        let group = create_group(&server, &token).await;
        let device = Uuid::new_v4();
        let file = Uuid::new_v4();

        let res = server
            .post(
                &routes::uploads(group),
                &v0_body(file, "hello world", "text/plain"),
                Some(&token),
                Some(device),
            )
            .await;
        assert_eq!(res.status, 201, "{}", res.text);
        let checksum = ContentHash::compute(b"hello world").to_hex();
        assert_eq!(res.body["checksum"], checksum);
        assert_eq!(res.body["state"], "v0UploadCompleteFile");

        let res = server
            .post(
                &routes::commit(group),
                &json!({ "master_version": 0 }),
                Some(&token),
                Some(device),
            )
            .await;
        assert_eq!(res.status, 200, "{}", res.text);
        assert_eq!(res.body["result"], "committed");
        assert_eq!(res.body["master_version"], 1);
        assert_eq!(res.body["number_committed"], 1);
        assert!(res.body["deferred_upload_id"].is_null());

        let res = server.get(&routes::file(group, file), Some(&token)).await;
        assert_eq!(res.status, 200);
        assert_eq!(res.text, "hello world");
        assert_eq!(res.header("content-type"), Some("text/plain"));
        assert_eq!(res.header("x-checksum"), Some(checksum.as_str()));
        assert_eq!(res.header("x-file-version"), Some("1"));
        let etag = res.header("etag").unwrap().to_string();
        assert_eq!(etag, format!("\"{checksum}\""));

        let cached = server
            .client
            .get(format!("http://{}{}", server.addr, routes::file(group, file)))
            .header("Authorization", format!("Bearer {token}"))
            .header("If-None-Match", &etag)
            .send()
            .await
            .unwrap();
        assert_eq!(cached.status().as_u16(), 304);

        let res = server.get(&routes::index(group), Some(&token)).await;
        assert_eq!(res.status, 200);
        assert_eq!(res.body["master_version"], 1);
        let files = res.body["files"].as_array().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0]["file_uuid"], file.to_string());
        assert_eq!(files[0]["device_uuid"], device.to_string());
        assert_eq!(files[0]["file_version"], 1);
        assert_eq!(files[0]["deleted"], false);
        assert_eq!(files[0]["checksum"], checksum);

        let res = server.get(&routes::version(group), Some(&token)).await;
        assert_eq!(res.body["master_version"], 1);
    }

    #[tokio::test]
    async fn stale_commit_reports_master_version_update() {
        let server = TestServer::spawn().await;
        let alice = server.app.owning_user("alice").await;
        let token = token(&alice);
        let group = create_group(&server, &token).await;
        let phone = Uuid::new_v4();
        let laptop = Uuid::new_v4();

        for device in [phone, laptop] {
            let res = server
                .post(
                    &routes::uploads(group),
                    &v0_body(Uuid::new_v4(), "x", "text/plain"),
                    Some(&token),
                    Some(device),
                )
                .await;
            assert_eq!(res.status, 201, "{}", res.text);
        }

        let commit = json!({ "master_version": 0 });
        let res = server
            .post(&routes::commit(group), &commit, Some(&token), Some(phone))
            .await;
        assert_eq!(res.body["result"], "committed");

        let res = server
            .post(&routes::commit(group), &commit, Some(&token), Some(laptop))
            .await;
        assert_eq!(res.status, 200);
        assert_eq!(res.body["result"], "master_version_update");
        assert_eq!(res.body["master_version"], 1);
    }

    #[tokio::test]
    async fn device_header_is_required() {
        let server = TestServer::spawn().await;
        let alice = server.app.owning_user("alice").await;
        let token = token(&alice);
        let group = create_group(&server, &token).await;

        let res = server
            .post(
                &routes::uploads(group),
                &v0_body(Uuid::new_v4(), "x", "text/plain"),
                Some(&token),
                None,
            )
            .await;
        assert_eq!(res.status, 400);
        assert_eq!(res.body["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn abandon_then_commit_finds_nothing() {
        let server = TestServer::spawn().await;
        let alice = server.app.owning_user("alice").await;
        let token = token(&alice);
        let group = create_group(&server, &token).await;
        let device = Uuid::new_v4();

        server
            .post(
                &routes::uploads(group),
                &v0_body(Uuid::new_v4(), "x", "text/plain"),
                Some(&token),
                Some(device),
            )
            .await;

        let res = server.delete(&routes::uploads(group), &token, Some(device)).await;
        assert_eq!(res.status, 200);
        assert_eq!(res.body["removed"], 1);

        let res = server
            .post(
                &routes::commit(group),
                &json!({ "master_version": 0 }),
                Some(&token),
                Some(device),
            )
            .await;
        assert_eq!(res.status, 400);
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let server = TestServer::spawn().await;
        let alice = server.app.owning_user("alice").await;
        let token = token(&alice);
        let group = create_group(&server, &token).await;

        let res = server
            .get(&routes::file(group, Uuid::new_v4()), Some(&token))
            .await;
        assert_eq!(res.status, 404);
        assert_eq!(res.body["code"], "NOT_FOUND");
    }
}

mod deferred {
    use super::*;

    /// Upload a comment file, commit one change and return the deferred upload id.
    async fn committed_change(server: &TestServer, token: &str, group: Uuid) -> i64 {
        let device = Uuid::new_v4();
        let file = Uuid::new_v4();

        let mut body = v0_body(file, r#"{"elements":[]}"#, "application/json");
        body["change_resolver_name"] = json!("CommentFile");
        let res = server
            .post(&routes::uploads(group), &body, Some(token), Some(device))
            .await;
        assert_eq!(res.status, 201, "{}", res.text);
        server
            .post(
                &routes::commit(group),
                &json!({ "master_version": 0 }),
                Some(token),
                Some(device),
            )
            .await;

        let change = json!({
            "file_uuid": file,
            "file_version": 1,
            "state": "vNUploadFileChange",
            "upload_index": 1,
            "upload_count": 1,
            "content": r#"{"id":"c1"}"#,
        });
        let res = server
            .post(&routes::uploads(group), &change, Some(token), Some(device))
            .await;
        assert_eq!(res.status, 201, "{}", res.text);

        let res = server
            .post(
                &routes::commit(group),
                &json!({ "master_version": 1 }),
                Some(token),
                Some(device),
            )
            .await;
        assert_eq!(res.body["result"], "committed");
        assert_eq!(res.body["master_version"], 2);
        let id = res.body["deferred_upload_id"].as_i64().unwrap();

        // Still merging.
        let res = server.get(&routes::file(group, file), Some(token)).await;
        assert_eq!(res.status, 503);
        assert_eq!(res.body["code"], "BUSY");
        assert!(res.header("retry-after").is_some());

        let res = server.get(&routes::index(group), Some(token)).await;
        assert_eq!(res.body["files"][0]["file_version"], 2);
        assert!(res.body["files"][0]["checksum"].is_null());

        id
    }

    #[tokio::test]
    async fn status_is_visible_to_members_only() {
        let server = TestServer::spawn().await;
        let alice = server.app.owning_user("alice").await;
        let mallory = server.app.owning_user("mallory").await;
        let token = token(&alice);
        let group = create_group(&server, &token).await;
        let id = committed_change(&server, &token, group).await;

        let res = server.get(&routes::deferred_upload(id), Some(&token)).await;
        assert_eq!(res.status, 200);
        assert_eq!(res.body["id"], id);
        assert_eq!(res.body["status"], "pendingChange");
        assert_eq!(res.body["attempts"], 0);

        let res = server
            .get(&routes::deferred_upload(id), Some(&crate::common::token(&mallory)))
            .await;
        assert_eq!(res.status, 404);
    }

    #[tokio::test]
    async fn retry_requires_failed_state() {
        let server = TestServer::spawn().await;
        let alice = server.app.owning_user("alice").await;
        let token = token(&alice);
        let group = create_group(&server, &token).await;
        let id = committed_change(&server, &token, group).await;

        let res = server
            .post(&routes::deferred_retry(id), &json!({}), Some(&token), None)
            .await;
        assert_eq!(res.status, 409);
        assert_eq!(res.body["code"], "CONFLICT");

        server.app.storage(&alice).await.set_revoked(true);
        assert_eq!(server.app.worker().run_once().await.unwrap().failed, 1);

        let res = server.get(&routes::deferred_upload(id), Some(&token)).await;
        assert_eq!(res.body["status"], "error");
        assert_eq!(res.body["error_code"], "ACCESS_REVOKED");

        server.app.storage(&alice).await.set_revoked(false);
        let res = server
            .post(&routes::deferred_retry(id), &json!({}), Some(&token), None)
            .await;
        assert_eq!(res.status, 200, "{}", res.text);
        assert_eq!(res.body["status"], "pendingChange");

        assert_eq!(server.app.worker().run_once().await.unwrap().completed, 1);
        let res = server.get(&routes::deferred_upload(id), Some(&token)).await;
        assert_eq!(res.body["status"], "completed");
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let server = TestServer::spawn().await;
        let alice = server.app.owning_user("alice").await;

        let res = server
            .get(&routes::deferred_upload(4242), Some(&token(&alice)))
            .await;
        assert_eq!(res.status, 404);
    }
}
