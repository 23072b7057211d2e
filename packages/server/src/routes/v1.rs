use utoipa_axum::router::OpenApiRouter;
use utoipa_axum::routes;

use crate::handlers;
use crate::state::AppState;

pub fn routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .nest("/sharing-groups", sharing_group_routes())
        .nest("/invitations", invitation_routes())
        .nest("/deferred-uploads", deferred_upload_routes())
}

fn sharing_group_routes() -> OpenApiRouter<AppState> {
    let groups = OpenApiRouter::new()
        .routes(routes!(
            handlers::sharing::list_groups,
            handlers::sharing::create_group
        ))
        .routes(routes!(
            handlers::sharing::rename_group,
            handlers::sharing::delete_group
        ))
        .routes(routes!(handlers::sharing::leave_group))
        .routes(routes!(handlers::sharing::get_index))
        .routes(routes!(handlers::sharing::get_version))
        .routes(routes!(handlers::invitation::create_invitation));

    let files = OpenApiRouter::new()
        .routes(routes!(handlers::upload::commit_uploads))
        .routes(routes!(handlers::upload::download_file));

    let staging = OpenApiRouter::new()
        .routes(routes!(
            handlers::upload::stage_upload,
            handlers::upload::abandon_uploads
        ))
        .layer(handlers::upload::stage_body_limit());

    groups.merge(files).merge(staging)
}

fn invitation_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(handlers::invitation::get_invitation))
        .routes(routes!(handlers::invitation::redeem_invitation))
}

fn deferred_upload_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(handlers::deferred::get_deferred_upload))
        .routes(routes!(handlers::deferred::retry_deferred_upload))
}
