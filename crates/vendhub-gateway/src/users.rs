//! Staff accounts: creation, role changes, Telegram linking, login.

use std::sync::Arc;

use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::Deserialize;
use tokio::sync::OnceCell;
use serde_json::json;
use vendhub_core::error::{Result, VendHubError};
use vendhub_core::types::{Actor, Role, User};
use vendhub_db::{NewAction, VendDb};

use crate::auth::{hash_password, verify_password};

pub const MIN_PASSWORD_LENGTH: usize = 8;
/// bcrypt ignores input past 72 bytes.
pub const MAX_PASSWORD_LENGTH: usize = 72;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateUser {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: Role,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateUser {
    pub role: Option<Role>,
    pub active: Option<bool>,
}

#[derive(Clone)]
pub struct UserService {
    db: Arc<VendDb>,
    bcrypt_cost: u32,
    /// Verified against when the email is unknown, so both login paths run bcrypt.
    dummy_hash: Arc<OnceCell<String>>,
}

fn require_admin(actor: &Actor) -> Result<()> {
    if actor.role.can_manage_users() {
        Ok(())
    } else {
        Err(VendHubError::forbidden("Only administrators can manage users"))
    }
}

fn check_password(password: &str) -> Result<()> {
    if password.len() < MIN_PASSWORD_LENGTH {
        return Err(VendHubError::validation(format!(
            "Password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }
    if password.len() > MAX_PASSWORD_LENGTH {
        return Err(VendHubError::validation(format!(
            "Password must be at most {MAX_PASSWORD_LENGTH} bytes"
        )));
    }
    Ok(())
}

/// Random alphanumeric password for accounts created without one.
pub fn generate_password(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len.clamp(MIN_PASSWORD_LENGTH, MAX_PASSWORD_LENGTH))
        .map(char::from)
        .collect()
}

impl UserService {
    pub fn new(db: Arc<VendDb>) -> Self {
        Self {
            db,
            bcrypt_cost: bcrypt::DEFAULT_COST,
            dummy_hash: Arc::default(),
        }
    }

    pub fn with_bcrypt_cost(mut self, cost: u32) -> Self {
        self.bcrypt_cost = cost;
        self.dummy_hash = Arc::default();
        self
    }

    async fn dummy_hash(&self) -> Result<String> {
        self.dummy_hash
            .get_or_try_init(|| async { hash_password(&generate_password(16), self.bcrypt_cost).await })
            .await
            .cloned()
    }

    async fn insert(&self, actor_id: &str, req: CreateUser) -> Result<User> {
        let name = req.name.trim();
        let email = req.email.trim();
        if name.is_empty() {
            return Err(VendHubError::validation("Name is required"));
        }
        if !email.contains('@') {
            return Err(VendHubError::validation(format!("Invalid email: {email}")));
        }
        check_password(&req.password)?;

        let hash = hash_password(&req.password, self.bcrypt_cost).await?;
        let action = NewAction::new(actor_id, "user.created", "user", "")
            .with_details(json!({ "email": email.to_lowercase(), "role": req.role }));
        let user = self.db.create_user(name, email, &hash, req.role, &action)?;
        tracing::info!("👤 User {} ({}) created by {actor_id}", user.email, user.role);
        Ok(user)
    }

    pub async fn create_user(&self, actor: &Actor, req: CreateUser) -> Result<User> {
        require_admin(actor)?;
        self.insert(&actor.user_id, req).await
    }

    /// Create the first administrator. Refuses once any user exists.
    pub async fn bootstrap_admin(&self, name: &str, email: &str, password: &str) -> Result<User> {
        if self.db.count_users()? > 0 {
            return Err(VendHubError::Conflict("Users already exist; ask an admin for an account".into()));
        }
        let req = CreateUser {
            name: name.to_string(),
            email: email.to_string(),
            password: password.to_string(),
            role: Role::Admin,
        };
        self.insert(&Actor::system().user_id, req).await
    }

    /// Task managers need the staff list to assign work.
    pub fn list_users(&self, actor: &Actor) -> Result<Vec<User>> {
        if !actor.role.can_manage_users() && !actor.role.can_manage_tasks() {
            return Err(VendHubError::forbidden("Cannot list users"));
        }
        self.db.list_users()
    }

    pub fn get_user(&self, actor: &Actor, id: &str) -> Result<User> {
        if actor.user_id != id && !actor.role.can_manage_users() && !actor.role.can_manage_tasks() {
            return Err(VendHubError::forbidden("Cannot view other users"));
        }
        self.db.get_user(id)
    }

    pub fn update_user(&self, actor: &Actor, id: &str, req: UpdateUser) -> Result<User> {
        require_admin(actor)?;
        if actor.user_id == id && (req.active == Some(false) || req.role.is_some_and(|r| r != Role::Admin)) {
            return Err(VendHubError::Conflict("Admins cannot demote or deactivate themselves".into()));
        }
        let action = NewAction::new(&actor.user_id, "user.updated", "user", id)
            .with_details(json!({ "role": req.role, "active": req.active }));
        let user = self.db.update_user(id, req.role, req.active, &action)?;
        tracing::info!("👤 User {} updated: role={} active={}", user.email, user.role, user.active);
        Ok(user)
    }

    /// Link a Telegram account, or unlink with `None`.
    pub fn link_telegram(&self, actor: &Actor, id: &str, telegram_id: Option<i64>) -> Result<User> {
        require_admin(actor)?;
        let action = NewAction::new(&actor.user_id, "user.telegram_linked", "user", id)
            .with_details(json!({ "telegram_id": telegram_id }));
        let user = self.db.link_telegram(id, telegram_id, &action)?;
        tracing::info!("🔗 User {} telegram → {:?}", user.email, user.telegram_id);
        Ok(user)
    }

    pub fn delete_user(&self, actor: &Actor, id: &str) -> Result<()> {
        require_admin(actor)?;
        if actor.user_id == id {
            return Err(VendHubError::Conflict("Admins cannot delete themselves".into()));
        }
        let action = NewAction::new(&actor.user_id, "user.deleted", "user", id);
        self.db.delete_user(id, &action)?;
        tracing::info!("🗑️ User {id} deleted by {}", actor.user_id);
        Ok(())
    }

    pub async fn change_password(&self, actor: &Actor, current: &str, new: &str) -> Result<()> {
        let (user, hash) = self.credentials(&self.db.get_user(&actor.user_id)?.email)?;
        if !verify_password(current, &hash).await? {
            return Err(VendHubError::AuthFailed("Current password is wrong".into()));
        }
        check_password(new)?;
        let hash = hash_password(new, self.bcrypt_cost).await?;
        let action = NewAction::new(&actor.user_id, "user.password_changed", "user", &user.id);
        self.db.update_password(&user.id, &hash, &action)
    }

    fn credentials(&self, email: &str) -> Result<(User, String)> {
        self.db
            .get_user_by_email(&email.trim().to_lowercase())?
            .ok_or_else(|| VendHubError::AuthFailed("Invalid email or password".into()))
    }

    /// Check credentials. Unknown email and wrong password give the same error
    /// after the same bcrypt work.
    pub async fn login(&self, email: &str, password: &str) -> Result<User> {
        let email = email.trim().to_lowercase();
        let found = self.db.get_user_by_email(&email)?;
        let hash = match found {
            Some((_, ref hash)) => hash.clone(),
            None => self.dummy_hash().await?,
        };
        let verified = verify_password(password, &hash).await?;
        let Some((user, _)) = found.filter(|_| verified) else {
            tracing::warn!("Failed login for {email}");
            return Err(VendHubError::AuthFailed("Invalid email or password".into()));
        };
        if !user.active {
            return Err(VendHubError::AuthFailed("Account is deactivated".into()));
        }
        let action = NewAction::new(&user.id, "user.login", "user", &user.id);
        self.db.log_action(&action)?;
        Ok(user)
    }
}
