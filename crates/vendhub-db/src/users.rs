//! Users: staff accounts, roles and Telegram links.

use rusqlite::{OptionalExtension, params};
use vendhub_core::error::{Result, VendHubError};
use vendhub_core::types::{Role, User};

use crate::action_log::{NewAction, insert_action};
use crate::{VendDb, db_err, now_ts, parse_enum};

const USER_COLUMNS: &str = "id, name, email, role, telegram_id, active, created_at, updated_at";

fn row_to_user(row: &rusqlite::Row) -> rusqlite::Result<User> {
    let role: String = row.get(3)?;
    Ok(User {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        role: parse_enum(&role)?,
        telegram_id: row.get(4)?,
        active: row.get::<_, i32>(5)? != 0,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

impl VendDb {
    /// Create a user. Email uniqueness is enforced by the schema.
    pub fn create_user(
        &self,
        name: &str,
        email: &str,
        password_hash: &str,
        role: Role,
        action: &NewAction,
    ) -> Result<User> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_ts();
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db_err("Begin"))?;
        tx.execute(
            "INSERT INTO users (id, name, email, password_hash, role, active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?6)",
            params![id, name, email.to_lowercase(), password_hash, role.as_str(), now],
        )
        .map_err(|e| match db_err("Create user")(e) {
            VendHubError::Conflict(_) => VendHubError::Conflict(format!("Email already registered: {email}")),
            other => other,
        })?;
        insert_action(&tx, &NewAction { entity_id: id.clone(), ..action.clone() })?;
        tx.commit().map_err(db_err("Commit"))?;
        drop(conn);
        self.get_user(&id)
    }

    pub fn get_user(&self, id: &str) -> Result<User> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id=?1"),
            params![id],
            row_to_user,
        )
        .optional()
        .map_err(db_err("Get user"))?
        .ok_or_else(|| VendHubError::not_found("User", id))
    }

    /// Look up a user with their password hash, for login.
    pub fn get_user_by_email(&self, email: &str) -> Result<Option<(User, String)>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {USER_COLUMNS}, password_hash FROM users WHERE email=?1"),
            params![email.to_lowercase()],
            |row| Ok((row_to_user(row)?, row.get::<_, String>(8)?)),
        )
        .optional()
        .map_err(db_err("Get user by email"))
    }

    pub fn get_user_by_telegram(&self, telegram_id: i64) -> Result<Option<User>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE telegram_id=?1"),
            params![telegram_id],
            row_to_user,
        )
        .optional()
        .map_err(db_err("Get user by telegram"))
    }

    pub fn list_users(&self) -> Result<Vec<User>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY created_at ASC, rowid ASC"))
            .map_err(db_err("Prepare"))?;
        let users = stmt
            .query_map([], row_to_user)
            .map_err(db_err("Query"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err("Read user"))?;
        Ok(users)
    }

    /// Update role and/or active flag. `None` leaves a field unchanged.
    pub fn update_user(
        &self,
        id: &str,
        role: Option<Role>,
        active: Option<bool>,
        action: &NewAction,
    ) -> Result<User> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db_err("Begin"))?;
        let changed = tx
            .execute(
                "UPDATE users SET role=COALESCE(?2, role), active=COALESCE(?3, active), updated_at=?4
                 WHERE id=?1",
                params![id, role.map(|r| r.as_str()), active.map(i32::from), now_ts()],
            )
            .map_err(db_err("Update user"))?;
        if changed == 0 {
            return Err(VendHubError::not_found("User", id));
        }
        insert_action(&tx, action)?;
        tx.commit().map_err(db_err("Commit"))?;
        drop(conn);
        self.get_user(id)
    }

    /// Link (or with `None`, unlink) a Telegram account.
    pub fn link_telegram(&self, id: &str, telegram_id: Option<i64>, action: &NewAction) -> Result<User> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db_err("Begin"))?;
        let changed = tx
            .execute(
                "UPDATE users SET telegram_id=?2, updated_at=?3 WHERE id=?1",
                params![id, telegram_id, now_ts()],
            )
            .map_err(|e| match db_err("Link telegram")(e) {
                VendHubError::Conflict(_) => {
                    VendHubError::Conflict("Telegram account already linked to another user".into())
                }
                other => other,
            })?;
        if changed == 0 {
            return Err(VendHubError::not_found("User", id));
        }
        insert_action(&tx, action)?;
        tx.commit().map_err(db_err("Commit"))?;
        drop(conn);
        self.get_user(id)
    }

    pub fn update_password(&self, id: &str, password_hash: &str, action: &NewAction) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db_err("Begin"))?;
        let changed = tx
            .execute(
                "UPDATE users SET password_hash=?2, updated_at=?3 WHERE id=?1",
                params![id, password_hash, now_ts()],
            )
            .map_err(db_err("Update password"))?;
        if changed == 0 {
            return Err(VendHubError::not_found("User", id));
        }
        insert_action(&tx, action)?;
        tx.commit().map_err(db_err("Commit"))?;
        Ok(())
    }

    /// Delete a user. Fails with a conflict while tasks still reference them.
    pub fn delete_user(&self, id: &str, action: &NewAction) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db_err("Begin"))?;
        let changed = tx
            .execute("DELETE FROM users WHERE id=?1", params![id])
            .map_err(|e| match db_err("Delete user")(e) {
                VendHubError::Conflict(_) => {
                    VendHubError::Conflict("User still has tasks; deactivate instead".into())
                }
                other => other,
            })?;
        if changed == 0 {
            return Err(VendHubError::not_found("User", id));
        }
        insert_action(&tx, action)?;
        tx.commit().map_err(db_err("Commit"))?;
        Ok(())
    }

    pub fn count_users(&self) -> Result<u32> {
        let conn = self.lock()?;
        conn.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))
            .map_err(db_err("Count users"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn act(action: &str) -> NewAction {
        NewAction::new("system", action, "user", "")
    }

    #[test]
    fn test_create_and_lookup_user() {
        let db = VendDb::in_memory().unwrap();
        let user = db
            .create_user("Aziz", "Aziz@Vendhub.uz", "hash", Role::Operator, &act("user.created"))
            .unwrap();
        assert_eq!(user.email, "aziz@vendhub.uz");
        assert!(user.active);
        assert_eq!(user.role, Role::Operator);

        let (found, hash) = db.get_user_by_email("AZIZ@vendhub.uz").unwrap().unwrap();
        assert_eq!(found.id, user.id);
        assert_eq!(hash, "hash");
        assert!(db.get_user_by_email("nobody@vendhub.uz").unwrap().is_none());

        // Audit entry carries the new id
        let log = db.actions_for("user", &user.id).unwrap();
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_duplicate_email_conflicts() {
        let db = VendDb::in_memory().unwrap();
        db.create_user("A", "a@x.uz", "h", Role::Operator, &act("user.created")).unwrap();
        let err = db
            .create_user("B", "a@x.uz", "h", Role::Driver, &act("user.created"))
            .unwrap_err();
        assert!(matches!(err, VendHubError::Conflict(_)));
        assert_eq!(db.count_users().unwrap(), 1);
    }

    #[test]
    fn test_update_role_and_active() {
        let db = VendDb::in_memory().unwrap();
        let u = db.create_user("A", "a@x.uz", "h", Role::Operator, &act("user.created")).unwrap();
        let u = db.update_user(&u.id, Some(Role::Manager), None, &act("user.updated")).unwrap();
        assert_eq!(u.role, Role::Manager);
        assert!(u.active);
        let u = db.update_user(&u.id, None, Some(false), &act("user.updated")).unwrap();
        assert_eq!(u.role, Role::Manager);
        assert!(!u.active);

        let err = db.update_user("missing", Some(Role::Admin), None, &act("x")).unwrap_err();
        assert!(matches!(err, VendHubError::NotFound { .. }));
    }

    #[test]
    fn test_telegram_link_is_unique() {
        let db = VendDb::in_memory().unwrap();
        let a = db.create_user("A", "a@x.uz", "h", Role::Operator, &act("c")).unwrap();
        let b = db.create_user("B", "b@x.uz", "h", Role::Driver, &act("c")).unwrap();
        db.link_telegram(&a.id, Some(777), &act("user.telegram_linked")).unwrap();
        assert_eq!(db.get_user_by_telegram(777).unwrap().unwrap().id, a.id);

        let err = db.link_telegram(&b.id, Some(777), &act("user.telegram_linked")).unwrap_err();
        assert!(matches!(err, VendHubError::Conflict(_)));

        db.link_telegram(&a.id, None, &act("user.telegram_unlinked")).unwrap();
        assert!(db.get_user_by_telegram(777).unwrap().is_none());
    }

    #[test]
    fn test_delete_user() {
        let db = VendDb::in_memory().unwrap();
        let u = db.create_user("A", "a@x.uz", "h", Role::Operator, &act("c")).unwrap();
        db.delete_user(&u.id, &act("user.deleted")).unwrap();
        assert!(matches!(db.get_user(&u.id), Err(VendHubError::NotFound { .. })));
        assert!(db.delete_user(&u.id, &act("user.deleted")).is_err());
    }
}
