use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use thiserror::Error;

use jobboard_core::notification::{Actor, Audience, NewNotification, Notification, Priority, Role};

use crate::{corrupt, to_rfc3339};

const NOTIFICATION_COLUMNS: &str = "id, type, title, message, target_kind, target_user_id, \
     target_company_id, target_roles, priority, action_url, data_json, read_at, created_at";

/// SQL rendition of [`Audience::matches`]. Binds: user id, company id,
/// company id, JSON array of role names.
const AUDIENCE_FILTER: &str = "(\
    (notifications.target_kind = 'user' AND notifications.target_user_id = ?) \
    OR (notifications.target_kind = 'company' AND notifications.target_company_id = ?) \
    OR (notifications.target_kind = 'roles' \
        AND (notifications.target_company_id IS NULL OR notifications.target_company_id = ?) \
        AND EXISTS (SELECT 1 FROM json_each(notifications.target_roles) AS target \
                    WHERE target.value IN (SELECT value FROM json_each(?)))))";

/// Repository backing the notification sink.
#[derive(Clone)]
pub struct NotificationRepository {
    pub(crate) pool: SqlitePool,
}

impl NotificationRepository {
    /// Inserts a notification outside of any workflow transaction.
    pub async fn create(
        &self,
        notification: &NewNotification,
        now: DateTime<Utc>,
    ) -> Result<Notification, NotificationError> {
        let mut conn = self.pool.acquire().await?;
        insert_notification(&mut *conn, notification, now).await
    }

    /// Inserts a notification as part of a larger transaction.
    pub async fn create_in(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        notification: &NewNotification,
        now: DateTime<Utc>,
    ) -> Result<Notification, NotificationError> {
        insert_notification(&mut **tx, notification, now).await
    }

    pub async fn fetch(&self, notification_id: i64) -> Result<Notification, NotificationError> {
        let row = sqlx::query_as::<_, NotificationRow>(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id = ?"
        ))
        .bind(notification_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(NotificationError::NotFound)?;

        row.into_domain()
    }

    /// Newest notifications visible to `actor`.
    pub async fn recent(
        &self,
        actor: &Actor,
        limit: i64,
    ) -> Result<Vec<Notification>, NotificationError> {
        let binds = AudienceBinds::from_actor(actor)?;
        let rows = sqlx::query_as::<_, NotificationRow>(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications \
             WHERE {AUDIENCE_FILTER} \
             ORDER BY created_at DESC, id DESC \
             LIMIT ?"
        ))
        .bind(binds.user_id)
        .bind(binds.company_id)
        .bind(binds.company_id)
        .bind(&binds.roles_json)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(NotificationRow::into_domain).collect()
    }

    pub async fn unread_count(&self, actor: &Actor) -> Result<i64, NotificationError> {
        let binds = AudienceBinds::from_actor(actor)?;
        let (count,): (i64,) = sqlx::query_as(&format!(
            "SELECT COUNT(*) FROM notifications WHERE read_at IS NULL AND {AUDIENCE_FILTER}"
        ))
        .bind(binds.user_id)
        .bind(binds.company_id)
        .bind(binds.company_id)
        .bind(&binds.roles_json)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Sets `read_at` once. Returns `false` when it was already set.
    pub async fn mark_read(
        &self,
        notification_id: i64,
        now: DateTime<Utc>,
    ) -> Result<bool, NotificationError> {
        let result = sqlx::query(
            "UPDATE notifications SET read_at = ? WHERE id = ? AND read_at IS NULL",
        )
        .bind(to_rfc3339(now))
        .bind(notification_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Marks every unread notification visible to `actor` as read.
    pub async fn mark_all_read(
        &self,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<u64, NotificationError> {
        let binds = AudienceBinds::from_actor(actor)?;
        let result = sqlx::query(&format!(
            "UPDATE notifications SET read_at = ? WHERE read_at IS NULL AND {AUDIENCE_FILTER}"
        ))
        .bind(to_rfc3339(now))
        .bind(binds.user_id)
        .bind(binds.company_id)
        .bind(binds.company_id)
        .bind(&binds.roles_json)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

async fn insert_notification(
    conn: &mut SqliteConnection,
    notification: &NewNotification,
    now: DateTime<Utc>,
) -> Result<Notification, NotificationError> {
    if notification.title.trim().is_empty() {
        return Err(NotificationError::MissingTitle);
    }

    let (user_id, company_id, roles) = match &notification.audience {
        Audience::User { user_id } => (Some(*user_id), None, Vec::new()),
        Audience::Roles { roles, company_id } => (None, *company_id, roles.clone()),
        Audience::Company { company_id } => (None, Some(*company_id), Vec::new()),
    };
    let roles_json = serde_json::to_string(&roles)?;
    let data_json = serde_json::to_string(&notification.data)?;

    let row = sqlx::query_as::<_, NotificationRow>(&format!(
        "INSERT INTO notifications \
         (type, title, message, target_kind, target_user_id, target_company_id, target_roles, \
          priority, action_url, data_json, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
         RETURNING {NOTIFICATION_COLUMNS}"
    ))
    .bind(&notification.kind)
    .bind(&notification.title)
    .bind(&notification.message)
    .bind(notification.audience.kind_str())
    .bind(user_id)
    .bind(company_id)
    .bind(roles_json)
    .bind(notification.priority.as_str())
    .bind(&notification.action_url)
    .bind(data_json)
    .bind(to_rfc3339(now))
    .fetch_one(conn)
    .await?;

    row.into_domain()
}

struct AudienceBinds {
    user_id: i64,
    company_id: Option<i64>,
    roles_json: String,
}

impl AudienceBinds {
    fn from_actor(actor: &Actor) -> Result<Self, NotificationError> {
        Ok(Self {
            user_id: actor.user_id,
            company_id: actor.company_id,
            roles_json: serde_json::to_string(&actor.roles)?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct NotificationRow {
    id: i64,
    #[sqlx(rename = "type")]
    kind: String,
    title: String,
    message: String,
    target_kind: String,
    target_user_id: Option<i64>,
    target_company_id: Option<i64>,
    target_roles: String,
    priority: String,
    action_url: Option<String>,
    data_json: String,
    read_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl NotificationRow {
    fn into_domain(self) -> Result<Notification, NotificationError> {
        let audience = match (self.target_kind.as_str(), self.target_user_id, self.target_company_id) {
            ("user", Some(user_id), _) => Audience::User { user_id },
            ("company", _, Some(company_id)) => Audience::Company { company_id },
            ("roles", _, company_id) => Audience::Roles {
                roles: serde_json::from_str::<Vec<Role>>(&self.target_roles)?,
                company_id,
            },
            _ => return Err(NotificationError::CorruptAudience(self.id)),
        };
        let priority = self.priority.parse::<Priority>().map_err(corrupt)?;
        let data: Value = serde_json::from_str(&self.data_json)?;

        Ok(Notification {
            id: self.id,
            kind: self.kind,
            title: self.title,
            message: self.message,
            audience,
            priority,
            action_url: self.action_url,
            data,
            read_at: self.read_at,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("notification not found")]
    NotFound,
    #[error("notification title must not be empty")]
    MissingTitle,
    #[error("notification {0} has an unreadable audience")]
    CorruptAudience(i64),
    #[error("failed to encode notification json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::setup_db;
    use serde_json::json;

    fn actor(user_id: i64, roles: &[Role], company_id: Option<i64>) -> Actor {
        Actor {
            user_id,
            roles: roles.to_vec(),
            company_id,
        }
    }

    fn notice(title: &str, audience: Audience) -> NewNotification {
        NewNotification::new("test", title, "body", audience)
    }

    #[tokio::test]
    async fn create_round_trips_audience_and_data() {
        let db = setup_db().await;
        let repo = db.notifications();
        let created = repo
            .create(
                &notice("Hello", Audience::company_admins(3)).with_data(json!({ "k": 1 })),
                Utc::now(),
            )
            .await
            .expect("create");

        let fetched = repo.fetch(created.id).await.expect("fetch");
        assert_eq!(fetched.audience, Audience::company_admins(3));
        assert_eq!(fetched.data, json!({ "k": 1 }));
        assert!(!fetched.is_read());
    }

    #[tokio::test]
    async fn rejects_empty_title() {
        let db = setup_db().await;
        let err = db
            .notifications()
            .create(&notice("  ", Audience::User { user_id: 1 }), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, NotificationError::MissingTitle));
    }

    #[tokio::test]
    async fn queries_filter_by_audience() {
        let db = setup_db().await;
        let repo = db.notifications();
        let now = Utc::now();
        repo.create(&notice("for user", Audience::User { user_id: 42 }), now)
            .await
            .expect("user");
        repo.create(&notice("for admins of 3", Audience::company_admins(3)), now)
            .await
            .expect("roles");
        repo.create(&notice("for company 4", Audience::Company { company_id: 4 }), now)
            .await
            .expect("company");
        repo.create(
            &notice(
                "for platform admins",
                Audience::Roles {
                    roles: vec![Role::Admin],
                    company_id: None,
                },
            ),
            now,
        )
        .await
        .expect("admins");

        let candidate = actor(42, &[Role::Candidate], None);
        let recent = repo.recent(&candidate, 20).await.expect("recent");
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].title, "for user");

        let admin_of_3 = actor(7, &[Role::CompanyAdmin], Some(3));
        assert_eq!(repo.unread_count(&admin_of_3).await.expect("count"), 1);

        let admin_of_4 = actor(8, &[Role::CompanyAdmin], Some(4));
        let titles: Vec<String> = repo
            .recent(&admin_of_4, 20)
            .await
            .expect("recent")
            .into_iter()
            .map(|n| n.title)
            .collect();
        assert_eq!(titles, vec!["for company 4".to_string()]);

        let platform = actor(1, &[Role::Admin], None);
        assert_eq!(repo.unread_count(&platform).await.expect("count"), 1);
    }

    #[tokio::test]
    async fn mark_all_read_touches_only_matching_rows() {
        let db = setup_db().await;
        let repo = db.notifications();
        let now = Utc::now();
        let mine_a = repo
            .create(&notice("a", Audience::company_admins(3)), now)
            .await
            .expect("a");
        let mine_b = repo
            .create(&notice("b", Audience::company_admins(3)), now)
            .await
            .expect("b");
        let other_role = repo
            .create(
                &notice(
                    "c",
                    Audience::Roles {
                        roles: vec![Role::Candidate],
                        company_id: None,
                    },
                ),
                now,
            )
            .await
            .expect("c");

        let admin = actor(7, &[Role::CompanyAdmin], Some(3));
        let updated = repo.mark_all_read(&admin, now).await.expect("mark all");
        assert_eq!(updated, 2);

        assert!(repo.fetch(mine_a.id).await.expect("a").is_read());
        assert!(repo.fetch(mine_b.id).await.expect("b").is_read());
        assert!(!repo.fetch(other_role.id).await.expect("c").is_read());
        assert_eq!(repo.mark_all_read(&admin, now).await.expect("again"), 0);
    }

    #[tokio::test]
    async fn mark_read_is_idempotent() {
        let db = setup_db().await;
        let repo = db.notifications();
        let created = repo
            .create(&notice("once", Audience::User { user_id: 1 }), Utc::now())
            .await
            .expect("create");

        assert!(repo.mark_read(created.id, Utc::now()).await.expect("first"));
        let first_read_at = repo.fetch(created.id).await.expect("fetch").read_at;
        assert!(!repo.mark_read(created.id, Utc::now()).await.expect("second"));
        assert_eq!(repo.fetch(created.id).await.expect("fetch").read_at, first_read_at);
    }
}
