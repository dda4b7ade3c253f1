use anyhow::Result;
use chrono::{DateTime, Utc};

use super::session::{AuthSettings, CurrentUser, generate_token, hash_token};
use crate::db::{Database, format_timestamp};
use crate::model::{Role, User};

pub struct Accounts<'a> {
    db: &'a Database,
}

impl<'a> Accounts<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Finds a user by email or creates one. An explicit `role` overwrites the stored one.
    pub async fn upsert_user(&self, email: &str, name: Option<&str>, role: Option<Role>) -> Result<User> {
        let email = email.trim().to_lowercase();
        if email.is_empty() {
            anyhow::bail!("email is required");
        }

        let guard = self.db.write_lock().await;
        self.db
            .connection()
            .execute(
                "INSERT OR IGNORE INTO users (email, name, role) VALUES (?, ?, ?)",
                libsql::params![email.clone(), name, role.unwrap_or(Role::Member).as_str()],
            )
            .await?;

        if let Some(name) = name {
            self.db
                .connection()
                .execute(
                    "UPDATE users SET name = ? WHERE email = ?",
                    libsql::params![name, email.clone()],
                )
                .await?;
        }
        if let Some(role) = role {
            self.db
                .connection()
                .execute(
                    "UPDATE users SET role = ? WHERE email = ?",
                    libsql::params![role.as_str(), email.clone()],
                )
                .await?;
        }
        drop(guard);

        self.get_user_by_email(&email)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to create user: {}", email))
    }

    pub async fn get_user(&self, id: i32) -> Result<Option<User>> {
        let query = "SELECT id, name, email, image, role FROM users WHERE id = ?";
        let mut rows = self.db.connection().query(query, libsql::params![id]).await?;

        if let Some(row) = rows.next().await? {
            Ok(Some(row_to_user(&row)?))
        } else {
            Ok(None)
        }
    }

    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let query = "SELECT id, name, email, image, role FROM users WHERE email = ?";
        let mut rows = self
            .db
            .connection()
            .query(query, libsql::params![email.trim().to_lowercase()])
            .await?;

        if let Some(row) = rows.next().await? {
            Ok(Some(row_to_user(&row)?))
        } else {
            Ok(None)
        }
    }

    pub async fn list_users(&self) -> Result<Vec<User>> {
        let query = "SELECT id, name, email, image, role FROM users ORDER BY email ASC";
        let mut rows = self.db.connection().query(query, ()).await?;

        let mut users = Vec::new();
        while let Some(row) = rows.next().await? {
            users.push(row_to_user(&row)?);
        }
        Ok(users)
    }

    pub async fn update_role(&self, id: i32, role: Role) -> Result<Option<User>> {
        let updated = {
            let _guard = self.db.write_lock().await;
            self.db
                .connection()
                .execute("UPDATE users SET role = ? WHERE id = ?", libsql::params![role.as_str(), id])
                .await?
        };
        if updated == 0 {
            return Ok(None);
        }
        self.get_user(id).await
    }

    /// Removes the user and every session they hold.
    pub async fn delete_user(&self, id: i32) -> Result<bool> {
        let _guard = self.db.write_lock().await;

        self.db.begin().await?;

        let result = async {
            self.db
                .connection()
                .execute("DELETE FROM sessions WHERE user_id = ?", libsql::params![id])
                .await?;
            let deleted = self
                .db
                .connection()
                .execute("DELETE FROM users WHERE id = ?", libsql::params![id])
                .await?;
            Ok::<bool, anyhow::Error>(deleted > 0)
        }
        .await;

        match result {
            Ok(deleted) => {
                self.db.commit().await?;
                Ok(deleted)
            }
            Err(e) => {
                self.db.rollback().await;
                Err(e)
            }
        }
    }

    /// Stores a new session for `user_id` and returns the raw token.
    pub async fn create_session(&self, user_id: i32, settings: &AuthSettings, now: DateTime<Utc>) -> Result<String> {
        let token = generate_token();
        let expires_at = now + settings.session_ttl;

        let _guard = self.db.write_lock().await;
        self.db
            .connection()
            .execute(
                "INSERT INTO sessions (token_hash, user_id, expires_at) VALUES (?, ?, ?)",
                libsql::params![hash_token(&token), user_id, format_timestamp(expires_at)],
            )
            .await?;

        Ok(token)
    }

    /// Looks up an unexpired session. Users on the admin list are promoted on the way through.
    pub async fn resolve_session(
        &self,
        token: &str,
        settings: &AuthSettings,
        now: DateTime<Utc>,
    ) -> Result<Option<CurrentUser>> {
        let query = r#"
            SELECT users.id, users.name, users.email, users.image, users.role
            FROM sessions
            JOIN users ON users.id = sessions.user_id
            WHERE sessions.token_hash = ? AND sessions.expires_at > ?
        "#;
        let mut rows = self
            .db
            .connection()
            .query(query, libsql::params![hash_token(token), format_timestamp(now)])
            .await?;

        let user = match rows.next().await? {
            Some(row) => row_to_user(&row)?,
            None => return Ok(None),
        };

        let mut role = user.role;
        if role != Role::Admin && settings.is_admin_email(&user.email) {
            self.update_role(user.id, Role::Admin).await?;
            tracing::info!(user_id = user.id, "promoted configured admin email");
            role = Role::Admin;
        }

        Ok(Some(CurrentUser {
            id: user.id,
            name: user.name,
            email: user.email,
            role,
        }))
    }

    pub async fn purge_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64> {
        let _guard = self.db.write_lock().await;
        let purged = self
            .db
            .connection()
            .execute("DELETE FROM sessions WHERE expires_at <= ?", libsql::params![format_timestamp(now)])
            .await?;
        Ok(purged)
    }
}

fn row_to_user(row: &libsql::Row) -> Result<User> {
    let role_str: String = row.get(4)?;
    let role: Role = role_str.parse().map_err(|e: String| anyhow::anyhow!("Invalid role: {}", e))?;

    Ok(User {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        image: row.get(3)?,
        role,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn settings() -> AuthSettings {
        AuthSettings {
            admin_emails: vec!["head@library.org".into()],
            session_ttl: Duration::days(1),
        }
    }

    #[tokio::test]
    async fn test_upsert_user_is_idempotent() {
        let db = Database::open_local(":memory:").await.unwrap();
        let accounts = Accounts::new(&db);

        let first = accounts.upsert_user(" Ada@Example.com ", Some("Ada"), None).await.unwrap();
        assert_eq!(first.email, "ada@example.com");
        assert_eq!(first.role, Role::Member);

        let again = accounts.upsert_user("ada@example.com", None, Some(Role::Librarian)).await.unwrap();
        assert_eq!(again.id, first.id);
        assert_eq!(again.name.as_deref(), Some("Ada"));
        assert_eq!(again.role, Role::Librarian);
    }

    #[tokio::test]
    async fn test_session_roundtrip_and_expiry() {
        let db = Database::open_local(":memory:").await.unwrap();
        let accounts = Accounts::new(&db);
        let now = Utc::now();

        let user = accounts.upsert_user("ada@example.com", None, None).await.unwrap();
        let token = accounts.create_session(user.id, &settings(), now).await.unwrap();

        let current = accounts.resolve_session(&token, &settings(), now).await.unwrap().unwrap();
        assert_eq!(current.id, user.id);
        assert_eq!(current.role, Role::Member);

        assert!(accounts.resolve_session("bogus", &settings(), now).await.unwrap().is_none());

        let later = now + Duration::days(2);
        assert!(accounts.resolve_session(&token, &settings(), later).await.unwrap().is_none());
        assert_eq!(accounts.purge_expired_sessions(later).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_admin_email_is_promoted() {
        let db = Database::open_local(":memory:").await.unwrap();
        let accounts = Accounts::new(&db);
        let now = Utc::now();

        let user = accounts.upsert_user("Head@Library.org", None, None).await.unwrap();
        let token = accounts.create_session(user.id, &settings(), now).await.unwrap();

        let current = accounts.resolve_session(&token, &settings(), now).await.unwrap().unwrap();
        assert_eq!(current.role, Role::Admin);
        assert_eq!(accounts.get_user(user.id).await.unwrap().unwrap().role, Role::Admin);
    }

    #[tokio::test]
    async fn test_delete_user_drops_sessions() {
        let db = Database::open_local(":memory:").await.unwrap();
        let accounts = Accounts::new(&db);
        let now = Utc::now();

        let user = accounts.upsert_user("ada@example.com", None, None).await.unwrap();
        let token = accounts.create_session(user.id, &settings(), now).await.unwrap();

        assert!(accounts.delete_user(user.id).await.unwrap());
        assert!(!accounts.delete_user(user.id).await.unwrap());
        assert!(accounts.resolve_session(&token, &settings(), now).await.unwrap().is_none());
    }
}
