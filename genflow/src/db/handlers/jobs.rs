use crate::{
    db::{
        errors::{DbError, Result},
        models::jobs::{JobCreateDBRequest, JobDBResponse, JobStatus},
    },
    types::{JobId, UserId},
};
use sqlx::PgConnection;

const JOB_COLUMNS: &str = "id, user_id, image_ids, prompt, model, style, folder_id, name, num_outputs, aspect_ratio, \
                           status, credits_used, result_path, result_paths, error_message, created_at, updated_at";

/// Build the error for a conditional update that matched no row
pub(crate) fn transition_error(id: JobId, current: Option<JobStatus>, operation: &str) -> DbError {
    match current {
        None => DbError::NotFound,
        Some(state) => DbError::InvalidState {
            entity_type: "Job".to_string(),
            entity_id: id.to_string(),
            state: state.to_string(),
            operation: operation.to_string(),
        },
    }
}

/// Job records and their state machine.
///
/// Every transition is a conditional `UPDATE ... WHERE status = <expected>`, so concurrent
/// callers racing on one job see exactly one winner; the loser gets
/// [`DbError::InvalidState`].
pub struct Jobs<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Jobs<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    pub async fn create(&mut self, request: &JobCreateDBRequest) -> Result<JobDBResponse> {
        let job = sqlx::query_as::<_, JobDBResponse>(&format!(
            r#"
            INSERT INTO jobs (id, user_id, image_ids, prompt, model, style, folder_id, name, num_outputs, aspect_ratio, credits_used)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(request.id)
        .bind(request.user_id)
        .bind(&request.image_ids)
        .bind(&request.prompt)
        .bind(&request.model)
        .bind(&request.style)
        .bind(request.folder_id)
        .bind(&request.name)
        .bind(request.num_outputs)
        .bind(&request.aspect_ratio)
        .bind(request.credits_used)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(job)
    }

    pub async fn get_by_id(&mut self, id: JobId) -> Result<Option<JobDBResponse>> {
        let job = sqlx::query_as::<_, JobDBResponse>(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(job)
    }

    /// A user's jobs, newest first, with the total count
    pub async fn list_for_user(&mut self, user_id: UserId, skip: i64, limit: i64) -> Result<(Vec<JobDBResponse>, i64)> {
        let jobs = sqlx::query_as::<_, JobDBResponse>(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM jobs
            WHERE user_id = $1
            ORDER BY created_at DESC, id DESC
            OFFSET $2
            LIMIT $3
            "#
        ))
        .bind(user_id)
        .bind(skip)
        .bind(limit)
        .fetch_all(&mut *self.db)
        .await?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&mut *self.db)
            .await?;

        Ok((jobs, total))
    }

    /// pending -> processing
    pub async fn claim(&mut self, id: JobId) -> Result<JobDBResponse> {
        let claimed = sqlx::query_as::<_, JobDBResponse>(&format!(
            r#"
            UPDATE jobs
            SET status = 'processing', updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(id)
        .fetch_optional(&mut *self.db)
        .await?;

        match claimed {
            Some(job) => Ok(job),
            None => Err(transition_error(id, self.current_status(id).await?, "claim")),
        }
    }

    /// processing -> completed, recording every stored result key
    pub async fn complete(&mut self, id: JobId, result_paths: &[String]) -> Result<JobDBResponse> {
        let Some(first) = result_paths.first() else {
            return Err(DbError::Other(anyhow::anyhow!("cannot complete job {id} without a result")));
        };

        let completed = sqlx::query_as::<_, JobDBResponse>(&format!(
            r#"
            UPDATE jobs
            SET status = 'completed', result_path = $2, result_paths = $3, updated_at = NOW()
            WHERE id = $1 AND status = 'processing'
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(first)
        .bind(result_paths)
        .fetch_optional(&mut *self.db)
        .await?;

        match completed {
            Some(job) => Ok(job),
            None => Err(transition_error(id, self.current_status(id).await?, "complete")),
        }
    }

    /// processing -> failed
    pub async fn fail(&mut self, id: JobId, error_message: &str) -> Result<JobDBResponse> {
        let failed = sqlx::query_as::<_, JobDBResponse>(&format!(
            r#"
            UPDATE jobs
            SET status = 'failed', error_message = $2, updated_at = NOW()
            WHERE id = $1 AND status = 'processing'
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(error_message)
        .fetch_optional(&mut *self.db)
        .await?;

        match failed {
            Some(job) => Ok(job),
            None => Err(transition_error(id, self.current_status(id).await?, "fail")),
        }
    }

    /// Change the display name of a job owned by `user_id`
    pub async fn rename(&mut self, id: JobId, user_id: UserId, name: Option<&str>) -> Result<JobDBResponse> {
        let job = sqlx::query_as::<_, JobDBResponse>(&format!(
            r#"
            UPDATE jobs
            SET name = $3, updated_at = NOW()
            WHERE id = $1 AND user_id = $2
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(user_id)
        .bind(name)
        .fetch_optional(&mut *self.db)
        .await?;

        job.ok_or(DbError::NotFound)
    }

    /// Delete a failed job owned by `user_id`. Jobs in any other state are kept.
    pub async fn delete_failed(&mut self, id: JobId, user_id: UserId) -> Result<()> {
        let deleted = sqlx::query("DELETE FROM jobs WHERE id = $1 AND user_id = $2 AND status = 'failed'")
            .bind(id)
            .bind(user_id)
            .execute(&mut *self.db)
            .await?
            .rows_affected();

        if deleted == 1 {
            return Ok(());
        }

        let current: Option<JobStatus> = sqlx::query_scalar("SELECT status FROM jobs WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .fetch_optional(&mut *self.db)
            .await?;

        Err(transition_error(id, current, "delete"))
    }

    async fn current_status(&mut self, id: JobId) -> Result<Option<JobStatus>> {
        let status = sqlx::query_scalar("SELECT status FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use sqlx::PgPool;
    use uuid::Uuid;

    async fn pending_job(pool: &PgPool, user_id: UserId) -> JobDBResponse {
        let mut conn = pool.acquire().await.unwrap();
        Jobs::new(&mut conn)
            .create(&JobCreateDBRequest {
                id: Uuid::new_v4(),
                user_id,
                image_ids: vec![Uuid::new_v4()],
                prompt: "a stone bridge at dusk".to_string(),
                model: "nano-banana".to_string(),
                style: None,
                folder_id: None,
                name: None,
                num_outputs: 1,
                aspect_ratio: None,
                credits_used: Decimal::from(2),
            })
            .await
            .unwrap()
    }

    #[sqlx::test]
    async fn test_create_keeps_caller_id(pool: PgPool) {
        let user_id = Uuid::new_v4();
        let job = pending_job(&pool, user_id).await;
        assert_eq!(job.status, JobStatus::Pending);

        let mut conn = pool.acquire().await.unwrap();
        let fetched = Jobs::new(&mut conn).get_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, job.id);
        assert_eq!(fetched.credits_used, Decimal::from(2));
    }

    #[sqlx::test]
    async fn test_second_claim_is_invalid_state(pool: PgPool) {
        let job = pending_job(&pool, Uuid::new_v4()).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut jobs = Jobs::new(&mut conn);

        assert_eq!(jobs.claim(job.id).await.unwrap().status, JobStatus::Processing);
        let err = jobs.claim(job.id).await.unwrap_err();
        assert!(matches!(err, DbError::InvalidState { ref state, .. } if state == "processing"));
        assert!(matches!(jobs.claim(Uuid::new_v4()).await.unwrap_err(), DbError::NotFound));
    }

    #[sqlx::test]
    async fn test_concurrent_claims_have_one_winner(pool: PgPool) {
        let job = pending_job(&pool, Uuid::new_v4()).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                let mut conn = pool.acquire().await.unwrap();
                Jobs::new(&mut conn).claim(job.id).await
            }));
        }

        let mut winners = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => winners += 1,
                Err(err) => assert!(matches!(err, DbError::InvalidState { .. })),
            }
        }
        assert_eq!(winners, 1);
    }

    #[sqlx::test]
    async fn test_complete_after_fail_is_invalid_state(pool: PgPool) {
        let job = pending_job(&pool, Uuid::new_v4()).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut jobs = Jobs::new(&mut conn);

        jobs.claim(job.id).await.unwrap();
        let failed = jobs.fail(job.id, "provider timed out").await.unwrap();
        assert_eq!(failed.error_message.as_deref(), Some("provider timed out"));

        let err = jobs.complete(job.id, &["results/late.png".to_string()]).await.unwrap_err();
        assert!(matches!(err, DbError::InvalidState { ref state, .. } if state == "failed"));

        let job = jobs.get_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.result_path, None);
    }

    #[sqlx::test]
    async fn test_complete_records_every_result(pool: PgPool) {
        let job = pending_job(&pool, Uuid::new_v4()).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut jobs = Jobs::new(&mut conn);

        jobs.claim(job.id).await.unwrap();
        let paths = vec!["results/a.png".to_string(), "results/b.png".to_string()];
        let done = jobs.complete(job.id, &paths).await.unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.result_path.as_deref(), Some("results/a.png"));
        assert_eq!(done.result_paths, paths);
        assert_eq!(done.credits_used, Decimal::from(2));
    }

    #[sqlx::test]
    async fn test_only_failed_jobs_are_deleted(pool: PgPool) {
        let user_id = Uuid::new_v4();
        let job = pending_job(&pool, user_id).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut jobs = Jobs::new(&mut conn);

        let err = jobs.delete_failed(job.id, user_id).await.unwrap_err();
        assert!(matches!(err, DbError::InvalidState { ref state, .. } if state == "pending"));

        jobs.claim(job.id).await.unwrap();
        let err = jobs.delete_failed(job.id, user_id).await.unwrap_err();
        assert!(matches!(err, DbError::InvalidState { ref state, .. } if state == "processing"));

        jobs.fail(job.id, "provider error").await.unwrap();
        let err = jobs.delete_failed(job.id, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, DbError::NotFound));

        jobs.delete_failed(job.id, user_id).await.unwrap();
        assert!(jobs.get_by_id(job.id).await.unwrap().is_none());
    }

    #[sqlx::test]
    async fn test_credits_used_is_immutable(pool: PgPool) {
        let job = pending_job(&pool, Uuid::new_v4()).await;

        let result = sqlx::query("UPDATE jobs SET credits_used = 0 WHERE id = $1")
            .bind(job.id)
            .execute(&pool)
            .await;
        assert!(result.is_err());

        let mut conn = pool.acquire().await.unwrap();
        let job = Jobs::new(&mut conn).get_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(job.credits_used, Decimal::from(2));
    }

    #[sqlx::test]
    async fn test_status_never_moves_backwards(pool: PgPool) {
        let job = pending_job(&pool, Uuid::new_v4()).await;
        let mut conn = pool.acquire().await.unwrap();
        Jobs::new(&mut conn).claim(job.id).await.unwrap();

        let result = sqlx::query("UPDATE jobs SET status = 'pending' WHERE id = $1")
            .bind(job.id)
            .execute(&pool)
            .await;
        assert!(result.is_err());

        let job = Jobs::new(&mut conn).get_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Processing);
    }

    #[sqlx::test]
    async fn test_rename_is_scoped_to_owner(pool: PgPool) {
        let user_id = Uuid::new_v4();
        let job = pending_job(&pool, user_id).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut jobs = Jobs::new(&mut conn);

        let renamed = jobs.rename(job.id, user_id, Some("Bridge")).await.unwrap();
        assert_eq!(renamed.name.as_deref(), Some("Bridge"));
        assert!(matches!(
            jobs.rename(job.id, Uuid::new_v4(), Some("Mine")).await.unwrap_err(),
            DbError::NotFound
        ));
    }
}
