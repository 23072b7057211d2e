use chrono::{DateTime, Utc};
use common::{DeferredErrorCode, DeferredUploadStatus};
use sea_orm::sea_query::{Expr, ExprTrait};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DbErr, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use uuid::Uuid;

use crate::entity::{deferred_upload, upload};

/// Result of asking for a failed deferred upload to be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryResult {
    /// Row is pending again and will be picked up by the next run.
    Retried,
    NotFound,
    /// Row is not in the error state.
    NotFailed,
}

pub struct DeferredUploadService<'a, C: ConnectionTrait> {
    conn: &'a C,
}

impl<'a, C: ConnectionTrait> DeferredUploadService<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self { conn }
    }

    pub async fn create(
        &self,
        user_id: i32,
        sharing_group_uuid: Uuid,
        file_group_uuid: Option<Uuid>,
    ) -> Result<deferred_upload::Model, DbErr> {
        let now = Utc::now();
        deferred_upload::ActiveModel {
            user_id: Set(user_id),
            sharing_group_uuid: Set(sharing_group_uuid),
            file_group_uuid: Set(file_group_uuid),
            status: Set(DeferredUploadStatus::PendingChange),
            error_code: Set(None),
            error_message: Set(None),
            attempts: Set(0),
            next_attempt_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(self.conn)
        .await
    }

    pub async fn get(&self, id: i32) -> Result<Option<deferred_upload::Model>, DbErr> {
        deferred_upload::Entity::find_by_id(id).one(self.conn).await
    }

    /// Attach committed staging rows to a deferred upload.
    pub async fn link_uploads(&self, id: i32, upload_ids: Vec<i32>) -> Result<u64, DbErr> {
        if upload_ids.is_empty() {
            return Ok(0);
        }
        let result = upload::Entity::update_many()
            .col_expr(upload::Column::DeferredUploadId, Expr::value(Some(id)))
            .filter(upload::Column::Id.is_in(upload_ids))
            .exec(self.conn)
            .await?;
        Ok(result.rows_affected)
    }

    pub async fn uploads_for(&self, id: i32) -> Result<Vec<upload::Model>, DbErr> {
        upload::Entity::find()
            .filter(upload::Column::DeferredUploadId.eq(id))
            .order_by_asc(upload::Column::UploadIndex)
            .order_by_asc(upload::Column::Id)
            .all(self.conn)
            .await
    }

    /// Rows the worker should process now.
    ///
    /// Pending rows always qualify. Failed rows qualify while their error is
    /// retryable, attempts remain and their backoff has elapsed.
    pub async fn pending_ready(
        &self,
        now: DateTime<Utc>,
        max_attempts: i32,
    ) -> Result<Vec<deferred_upload::Model>, DbErr> {
        let retryable: Vec<&str> = DeferredErrorCode::RETRYABLE
            .iter()
            .map(DeferredErrorCode::as_str)
            .collect();

        deferred_upload::Entity::find()
            .filter(
                Condition::any()
                    .add(deferred_upload::Column::Status.eq(DeferredUploadStatus::PendingChange))
                    .add(
                        Condition::all()
                            .add(deferred_upload::Column::Status.eq(DeferredUploadStatus::Error))
                            .add(deferred_upload::Column::ErrorCode.is_in(retryable))
                            .add(deferred_upload::Column::Attempts.lt(max_attempts))
                            .add(
                                Condition::any()
                                    .add(deferred_upload::Column::NextAttemptAt.is_null())
                                    .add(deferred_upload::Column::NextAttemptAt.lte(now)),
                            ),
                    ),
            )
            .order_by_asc(deferred_upload::Column::Id)
            .all(self.conn)
            .await
    }

    /// Rows not yet completed, ready or not, oldest first.
    pub async fn unfinished(&self) -> Result<Vec<deferred_upload::Model>, DbErr> {
        deferred_upload::Entity::find()
            .filter(deferred_upload::Column::Status.ne(DeferredUploadStatus::Completed))
            .order_by_asc(deferred_upload::Column::Id)
            .all(self.conn)
            .await
    }

    /// Finish a row and drop the staging rows it held on to.
    pub async fn mark_completed(&self, id: i32) -> Result<bool, DbErr> {
        let result = deferred_upload::Entity::update_many()
            .col_expr(
                deferred_upload::Column::Status,
                Expr::value(DeferredUploadStatus::Completed.as_str()),
            )
            .col_expr(deferred_upload::Column::ErrorCode, Expr::value(Option::<String>::None))
            .col_expr(deferred_upload::Column::ErrorMessage, Expr::value(Option::<String>::None))
            .col_expr(
                deferred_upload::Column::NextAttemptAt,
                Expr::value(Option::<DateTime<Utc>>::None),
            )
            .col_expr(deferred_upload::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(deferred_upload::Column::Id.eq(id))
            .filter(deferred_upload::Column::Status.ne(DeferredUploadStatus::Completed))
            .exec(self.conn)
            .await?;

        upload::Entity::delete_many()
            .filter(upload::Column::DeferredUploadId.eq(id))
            .exec(self.conn)
            .await?;

        Ok(result.rows_affected == 1)
    }

    /// Record a failed attempt. The row keeps its staging rows for a retry.
    pub async fn mark_error(
        &self,
        id: i32,
        code: DeferredErrorCode,
        message: &str,
        next_attempt_at: Option<DateTime<Utc>>,
    ) -> Result<bool, DbErr> {
        let result = deferred_upload::Entity::update_many()
            .col_expr(
                deferred_upload::Column::Status,
                Expr::value(DeferredUploadStatus::Error.as_str()),
            )
            .col_expr(deferred_upload::Column::ErrorCode, Expr::value(code.as_str()))
            .col_expr(deferred_upload::Column::ErrorMessage, Expr::value(message))
            .col_expr(
                deferred_upload::Column::Attempts,
                Expr::col(deferred_upload::Column::Attempts).add(1),
            )
            .col_expr(deferred_upload::Column::NextAttemptAt, Expr::value(next_attempt_at))
            .col_expr(deferred_upload::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(deferred_upload::Column::Id.eq(id))
            .filter(deferred_upload::Column::Status.ne(DeferredUploadStatus::Completed))
            .exec(self.conn)
            .await?;
        Ok(result.rows_affected == 1)
    }

    /// Put a failed row back into the pending state with a fresh attempt budget.
    pub async fn retry(&self, id: i32) -> Result<RetryResult, DbErr> {
        let result = deferred_upload::Entity::update_many()
            .col_expr(
                deferred_upload::Column::Status,
                Expr::value(DeferredUploadStatus::PendingChange.as_str()),
            )
            .col_expr(deferred_upload::Column::Attempts, Expr::value(0))
            .col_expr(
                deferred_upload::Column::NextAttemptAt,
                Expr::value(Option::<DateTime<Utc>>::None),
            )
            .col_expr(deferred_upload::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(deferred_upload::Column::Id.eq(id))
            .filter(deferred_upload::Column::Status.eq(DeferredUploadStatus::Error))
            .exec(self.conn)
            .await?;

        if result.rows_affected == 1 {
            return Ok(RetryResult::Retried);
        }

        match self.get(id).await? {
            Some(_) => Ok(RetryResult::NotFailed),
            None => Ok(RetryResult::NotFound),
        }
    }
}
