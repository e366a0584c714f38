use crate::{
    db::{
        errors::{DbError, Result},
        models::profiles::{ProfileDBResponse, SubscriptionUpdate},
    },
    types::UserId,
};
use sqlx::PgConnection;

const PROFILE_COLUMNS: &str =
    "user_id, email, billing_customer_id, subscription_id, subscription_status, plan_price_id, signup_granted_at, created_at, updated_at";

pub struct Profiles<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Profiles<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    pub async fn get_by_user_id(&mut self, user_id: UserId) -> Result<Option<ProfileDBResponse>> {
        let profile = sqlx::query_as::<_, ProfileDBResponse>(&format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE user_id = $1"))
            .bind(user_id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(profile)
    }

    /// Insert the profile if missing. Returns the profile and whether this call created it.
    pub async fn get_or_create(&mut self, user_id: UserId, email: Option<&str>) -> Result<(ProfileDBResponse, bool)> {
        let created = sqlx::query_as::<_, ProfileDBResponse>(&format!(
            r#"
            INSERT INTO profiles (user_id, email)
            VALUES ($1, $2)
            ON CONFLICT (user_id) DO NOTHING
            RETURNING {PROFILE_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(email)
        .fetch_optional(&mut *self.db)
        .await?;

        if let Some(profile) = created {
            return Ok((profile, true));
        }

        let existing = self.get_by_user_id(user_id).await?.ok_or(DbError::NotFound)?;
        Ok((existing, false))
    }

    /// Record that the signup grant has been applied. Keeps the first timestamp.
    pub async fn mark_signup_granted(&mut self, user_id: UserId) -> Result<()> {
        let result = sqlx::query(
            "UPDATE profiles SET signup_granted_at = COALESCE(signup_granted_at, NOW()), updated_at = NOW() WHERE user_id = $1",
        )
        .bind(user_id)
        .execute(&mut *self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    pub async fn find_by_customer_id(&mut self, customer_id: &str) -> Result<Option<ProfileDBResponse>> {
        let profile = sqlx::query_as::<_, ProfileDBResponse>(&format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles WHERE billing_customer_id = $1"
        ))
        .bind(customer_id)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(profile)
    }

    pub async fn find_by_subscription_id(&mut self, subscription_id: &str) -> Result<Option<ProfileDBResponse>> {
        let profile = sqlx::query_as::<_, ProfileDBResponse>(&format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles WHERE subscription_id = $1 ORDER BY updated_at DESC LIMIT 1"
        ))
        .bind(subscription_id)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(profile)
    }

    /// Apply the non-empty fields of `update`, creating the profile if it does not exist yet
    pub async fn update_subscription(&mut self, user_id: UserId, update: &SubscriptionUpdate) -> Result<ProfileDBResponse> {
        let profile = sqlx::query_as::<_, ProfileDBResponse>(&format!(
            r#"
            INSERT INTO profiles (user_id, billing_customer_id, subscription_id, subscription_status, plan_price_id)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (user_id) DO UPDATE SET
                billing_customer_id = COALESCE(EXCLUDED.billing_customer_id, profiles.billing_customer_id),
                subscription_id = COALESCE(EXCLUDED.subscription_id, profiles.subscription_id),
                subscription_status = COALESCE(EXCLUDED.subscription_status, profiles.subscription_status),
                plan_price_id = COALESCE(EXCLUDED.plan_price_id, profiles.plan_price_id),
                updated_at = NOW()
            RETURNING {PROFILE_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(&update.billing_customer_id)
        .bind(&update.subscription_id)
        .bind(&update.subscription_status)
        .bind(&update.plan_price_id)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(profile)
    }
}
