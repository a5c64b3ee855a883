//! Email/password authentication with bcrypt.
//!
//! Staff and admin accounts live in the `users` table with bcrypt
//! password hashes. Sessions are kept in-memory keyed by the cookie
//! token; the per-account lockout counter is persisted in `settings`
//! so a process restart does not clear it. API bearer tokens
//! (`id.secret`, secret stored hashed) authenticate non-browser
//! clients as the owning user.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::{self, DbState};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const MAX_FAILED_ATTEMPTS: u32 = 5;
const LOCKOUT_MINUTES: i64 = 15;
const SESSION_INACTIVITY_MINUTES: i64 = 30;
const SESSION_MAX_DURATION_HOURS: i64 = 12;

/// Name of the session cookie set on login.
pub const SESSION_COOKIE: &str = "pos_session";

/// Permissions granted to administrators.
const ADMIN_PERMISSIONS: &[&str] = &[
    "view_orders",
    "create_order",
    "update_order_status",
    "manage_customers",
    "manage_catalog",
    "record_payment",
    "confirm_payment",
    "manage_expenses",
    "view_reports",
    "export_reports",
    "manage_users",
    "manage_settings",
    "manage_notifications",
];

/// Permissions granted to regular staff.
const STAFF_PERMISSIONS: &[&str] = &[
    "view_orders",
    "create_order",
    "update_order_status",
    "manage_customers",
    "record_payment",
];

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// An authenticated principal: a cookie session or a resolved API token.
#[derive(Clone, Debug)]
pub struct Session {
    pub session_id: String,
    pub user_id: String,
    pub name: String,
    pub role: String,
    pub permissions: Vec<String>,
    pub login_time: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// Check whether this session has expired (inactivity or max duration).
    fn is_expired(&self) -> bool {
        let now = Utc::now();
        if now >= self.expires_at {
            return true;
        }
        if now - self.last_activity > Duration::minutes(SESSION_INACTIVITY_MINUTES) {
            return true;
        }
        false
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }

    /// Convert to the JSON shape the frontend expects.
    pub fn to_user_json(&self) -> Value {
        serde_json::json!({
            "userId": self.user_id,
            "name": self.name,
            "role": {
                "name": self.role,
                "permissions": self.permissions,
            },
            "loginTime": self.login_time.to_rfc3339(),
            "expiresAt": self.expires_at.to_rfc3339(),
        })
    }
}

/// Shared authentication state: live sessions keyed by cookie token.
pub struct AuthState {
    sessions: Mutex<HashMap<String, Session>>,
}

impl AuthState {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for AuthState {
    fn default() -> Self {
        Self::new()
    }
}

/// Lockout tracking entry for one account.
struct LockoutEntry {
    attempts: u32,
    last_attempt: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub fn permissions_for_role(role: &str) -> Vec<String> {
    let set: &[&str] = if role == "admin" {
        ADMIN_PERMISSIONS
    } else {
        STAFF_PERMISSIONS
    };
    set.iter().map(|s| s.to_string()).collect()
}

fn lockout_key(email: &str) -> String {
    format!("lockout_{}", email.trim().to_lowercase())
}

/// Check whether the account is currently locked out.
fn check_lockout(lockout: &LockoutEntry) -> Result<(), String> {
    if lockout.attempts >= MAX_FAILED_ATTEMPTS {
        let elapsed = Utc::now() - lockout.last_attempt;
        if elapsed < Duration::minutes(LOCKOUT_MINUTES) {
            let remaining = LOCKOUT_MINUTES - elapsed.num_minutes();
            return Err(format!(
                "Too many failed attempts. Try again in {remaining} minute(s)."
            ));
        }
        // Lockout period has elapsed; counter resets on next successful login
    }
    Ok(())
}

/// Load the persisted lockout state for an account.
fn load_lockout(conn: &Connection, email: &str) -> LockoutEntry {
    let raw = db::get_setting(conn, "auth", &lockout_key(email));
    let parsed = raw
        .as_deref()
        .and_then(|v| serde_json::from_str::<Value>(v).ok())
        .unwrap_or(Value::Null);

    let attempts = parsed
        .get("attempts")
        .and_then(Value::as_u64)
        .unwrap_or(0) as u32;
    let last_attempt = parsed
        .get("lastAttempt")
        .and_then(Value::as_str)
        .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    LockoutEntry {
        attempts,
        last_attempt,
    }
}

/// Persist the lockout state for an account.
fn persist_lockout(conn: &Connection, email: &str, lockout: &LockoutEntry) {
    let payload = serde_json::json!({
        "attempts": lockout.attempts,
        "lastAttempt": lockout.last_attempt.to_rfc3339(),
    });
    let _ = db::set_setting(conn, "auth", &lockout_key(email), &payload.to_string());
}

/// Create a new session and register it in the auth state.
fn create_session(auth: &AuthState, user_id: &str, name: &str, role: &str) -> Session {
    let now = Utc::now();
    let session = Session {
        session_id: Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        name: name.to_string(),
        role: role.to_string(),
        permissions: permissions_for_role(role),
        login_time: now,
        last_activity: now,
        expires_at: now + Duration::hours(SESSION_MAX_DURATION_HOURS),
    };

    let mut sessions = auth.sessions.lock().unwrap();
    // Opportunistic cleanup so abandoned sessions do not accumulate
    sessions.retain(|_, s| !s.is_expired());
    sessions.insert(session.session_id.clone(), session.clone());
    session
}

// ---------------------------------------------------------------------------
// Login / logout / session lookup
// ---------------------------------------------------------------------------

/// Verify email + password against the users table and create a session.
///
/// Returns the created session; the route layer turns its id into the
/// `pos_session` cookie.
pub fn login(db: &DbState, auth: &AuthState, email: &str, password: &str) -> Result<Session, String> {
    let email = email.trim().to_lowercase();
    if email.is_empty() {
        return Err("Email is required".into());
    }
    if password.is_empty() {
        return Err("Password is required".into());
    }

    let conn = db.conn.lock().map_err(|e| e.to_string())?;

    let mut lockout = load_lockout(&conn, &email);
    check_lockout(&lockout)?;

    let row: Option<(String, String, String, Option<String>, i64)> = conn
        .query_row(
            "SELECT id, name, role, password_hash, is_active
             FROM users
             WHERE lower(email) = ?1 AND role IN ('admin', 'staff')",
            params![email],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                ))
            },
        )
        .ok();

    if let Some((user_id, name, role, Some(hash), is_active)) = row {
        if is_active == 0 {
            return Err("Account is disabled".into());
        }
        if bcrypt::verify(password, &hash).unwrap_or(false) {
            lockout.attempts = 0;
            lockout.last_attempt = Utc::now();
            persist_lockout(&conn, &email, &lockout);
            drop(conn);
            let session = create_session(auth, &user_id, &name, &role);
            info!(user_id = %user_id, role = %role, "login successful");
            return Ok(session);
        }
    }

    lockout.attempts += 1;
    lockout.last_attempt = Utc::now();
    persist_lockout(&conn, &email, &lockout);
    warn!(email = %email, attempts = lockout.attempts, "failed login attempt");
    Err("Invalid email or password".into())
}

/// Invalidate the session behind the given cookie token.
pub fn logout(auth: &AuthState, session_id: &str) {
    let mut sessions = auth.sessions.lock().unwrap();
    if sessions.remove(session_id).is_some() {
        info!(session_id = %session_id, "session logged out");
    }
}

/// Look up a live session by cookie token, refreshing its activity timer.
pub fn get_session(auth: &AuthState, session_id: &str) -> Option<Session> {
    let mut sessions = auth.sessions.lock().unwrap();
    let expired = match sessions.get_mut(session_id) {
        Some(s) if !s.is_expired() => {
            s.last_activity = Utc::now();
            return Some(s.clone());
        }
        Some(_) => true,
        None => false,
    };
    if expired {
        sessions.remove(session_id);
    }
    None
}

/// Resolve a request principal from a cookie token and/or bearer token.
pub fn authenticate(
    db: &DbState,
    auth: &AuthState,
    cookie_token: Option<&str>,
    bearer_token: Option<&str>,
) -> Option<Session> {
    if let Some(token) = cookie_token {
        if let Some(session) = get_session(auth, token) {
            return Some(session);
        }
    }
    if let Some(raw) = bearer_token {
        return verify_api_token(db, raw);
    }
    None
}

// ---------------------------------------------------------------------------
// Password management
// ---------------------------------------------------------------------------

fn validate_password(password: &str) -> Result<(), String> {
    if password.len() < 8 {
        return Err("Password must be at least 8 characters".into());
    }
    Ok(())
}

/// Hash a password for storage.
pub fn hash_password(password: &str) -> Result<String, String> {
    validate_password(password)?;
    bcrypt::hash(password, bcrypt::DEFAULT_COST).map_err(|e| format!("Failed to hash password: {e}"))
}

/// Change the password of the given user after verifying the current one.
pub fn change_password(
    db: &DbState,
    user_id: &str,
    current: &str,
    new_password: &str,
) -> Result<(), String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;

    let hash: Option<String> = conn
        .query_row(
            "SELECT password_hash FROM users WHERE id = ?1",
            params![user_id],
            |row| row.get(0),
        )
        .map_err(|_| format!("User not found: {user_id}"))?;

    let hash = hash.ok_or("Account has no password set")?;
    if !bcrypt::verify(current, &hash).unwrap_or(false) {
        return Err("Current password is incorrect".into());
    }

    let new_hash = hash_password(new_password)?;
    conn.execute(
        "UPDATE users SET password_hash = ?1, updated_at = ?2 WHERE id = ?3",
        params![new_hash, Utc::now().to_rfc3339(), user_id],
    )
    .map_err(|e| format!("update password: {e}"))?;

    info!(user_id = %user_id, "password changed");
    Ok(())
}

/// Create a staff or admin account.
pub fn create_staff_account(
    db: &DbState,
    name: &str,
    email: &str,
    password: &str,
    role: &str,
) -> Result<Value, String> {
    let name = name.trim();
    if name.is_empty() {
        return Err("Name is required".into());
    }
    let email = email.trim().to_lowercase();
    if !email.contains('@') {
        return Err(format!("Invalid email: {email}"));
    }
    if role != "admin" && role != "staff" {
        return Err(format!("Invalid role: {role}. Must be admin or staff"));
    }

    let hash = hash_password(password)?;
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();

    conn.execute(
        "INSERT INTO users (id, name, email, role, password_hash, is_active, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?6)",
        params![id, name, email, role, hash, now],
    )
    .map_err(|e| {
        if e.to_string().contains("UNIQUE") {
            format!("An account with email {email} already exists")
        } else {
            format!("insert staff account: {e}")
        }
    })?;

    info!(user_id = %id, role = %role, "staff account created");

    Ok(serde_json::json!({
        "id": id,
        "name": name,
        "email": email,
        "role": role,
        "createdAt": now,
    }))
}

/// Create the initial admin account if no admin exists yet.
///
/// Returns the generated password when one had to be invented so the
/// operator can read it from the startup log.
pub fn ensure_admin_account(db: &DbState, password: Option<&str>) -> Result<Option<String>, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;

    let admins: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM users WHERE role = 'admin'",
            [],
            |row| row.get(0),
        )
        .map_err(|e| format!("count admins: {e}"))?;
    if admins > 0 {
        return Ok(None);
    }

    let (password, generated) = match password {
        Some(p) if !p.trim().is_empty() => (p.trim().to_string(), None),
        _ => {
            let generated = Uuid::new_v4().simple().to_string();
            (generated.clone(), Some(generated))
        }
    };

    let hash = hash_password(&password)?;
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO users (id, name, email, role, password_hash, is_active, created_at, updated_at)
         VALUES (?1, 'Administrator', 'admin@inkwell.local', 'admin', ?2, 1, ?3, ?3)",
        params![Uuid::new_v4().to_string(), hash, now],
    )
    .map_err(|e| format!("create admin: {e}"))?;

    info!("created initial admin account admin@inkwell.local");
    Ok(generated)
}

// ---------------------------------------------------------------------------
// API tokens
// ---------------------------------------------------------------------------

/// Issue a new API token for a user.
///
/// The plaintext `id.secret` token is returned exactly once; only the
/// secret's bcrypt hash is stored.
pub fn issue_api_token(db: &DbState, user_id: &str, label: &str) -> Result<Value, String> {
    let label = label.trim();
    if label.is_empty() {
        return Err("Token label is required".into());
    }

    let conn = db.conn.lock().map_err(|e| e.to_string())?;

    let exists: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM users WHERE id = ?1 AND role IN ('admin', 'staff') AND is_active = 1",
            params![user_id],
            |row| row.get(0),
        )
        .map_err(|e| format!("check token owner: {e}"))?;
    if exists == 0 {
        return Err(format!("User not found or not staff: {user_id}"));
    }

    let token_id = Uuid::new_v4().simple().to_string();
    let secret = Uuid::new_v4().simple().to_string();
    let secret_hash = bcrypt::hash(&secret, bcrypt::DEFAULT_COST)
        .map_err(|e| format!("Failed to hash token secret: {e}"))?;
    let now = Utc::now().to_rfc3339();

    conn.execute(
        "INSERT INTO api_tokens (id, user_id, label, secret_hash, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![token_id, user_id, label, secret_hash, now],
    )
    .map_err(|e| format!("insert api token: {e}"))?;

    info!(token_id = %token_id, user_id = %user_id, "API token issued");

    Ok(serde_json::json!({
        "id": token_id,
        "label": label,
        "token": format!("{token_id}.{secret}"),
        "createdAt": now,
    }))
}

/// Verify an `id.secret` bearer token and return a principal for its owner.
pub fn verify_api_token(db: &DbState, raw: &str) -> Option<Session> {
    let (token_id, secret) = raw.trim().split_once('.')?;
    if token_id.is_empty() || secret.is_empty() {
        return None;
    }

    let conn = db.conn.lock().ok()?;

    let (user_id, secret_hash): (String, String) = conn
        .query_row(
            "SELECT t.user_id, t.secret_hash
             FROM api_tokens t
             JOIN users u ON u.id = t.user_id
             WHERE t.id = ?1 AND t.revoked_at IS NULL AND u.is_active = 1",
            params![token_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .ok()?;

    if !bcrypt::verify(secret, &secret_hash).unwrap_or(false) {
        return None;
    }

    let (name, role): (String, String) = conn
        .query_row(
            "SELECT name, role FROM users WHERE id = ?1",
            params![user_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .ok()?;

    let now = Utc::now();
    let _ = conn.execute(
        "UPDATE api_tokens SET last_used_at = ?1 WHERE id = ?2",
        params![now.to_rfc3339(), token_id],
    );

    Some(Session {
        session_id: format!("token:{token_id}"),
        user_id,
        name,
        role: role.clone(),
        permissions: permissions_for_role(&role),
        login_time: now,
        last_activity: now,
        expires_at: now + Duration::hours(SESSION_MAX_DURATION_HOURS),
    })
}

/// List all API tokens with owner info (hashes are never exposed).
pub fn list_api_tokens(db: &DbState) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;

    let mut stmt = conn
        .prepare(
            "SELECT t.id, t.label, t.user_id, u.name, t.last_used_at, t.revoked_at, t.created_at
             FROM api_tokens t
             JOIN users u ON u.id = t.user_id
             ORDER BY t.created_at DESC",
        )
        .map_err(|e| e.to_string())?;

    let rows = stmt
        .query_map([], |row| {
            Ok(serde_json::json!({
                "id": row.get::<_, String>(0)?,
                "label": row.get::<_, String>(1)?,
                "userId": row.get::<_, String>(2)?,
                "userName": row.get::<_, String>(3)?,
                "lastUsedAt": row.get::<_, Option<String>>(4)?,
                "revokedAt": row.get::<_, Option<String>>(5)?,
                "createdAt": row.get::<_, String>(6)?,
            }))
        })
        .map_err(|e| e.to_string())?;

    let tokens: Vec<Value> = rows.filter_map(|r| r.ok()).collect();
    Ok(serde_json::json!(tokens))
}

/// Revoke an API token. Revoked tokens stay listed for audit purposes.
pub fn revoke_api_token(db: &DbState, token_id: &str) -> Result<(), String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;

    let changed = conn
        .execute(
            "UPDATE api_tokens SET revoked_at = ?1 WHERE id = ?2 AND revoked_at IS NULL",
            params![Utc::now().to_rfc3339(), token_id],
        )
        .map_err(|e| format!("revoke token: {e}"))?;
    if changed == 0 {
        return Err(format!("Token not found or already revoked: {token_id}"));
    }

    info!(token_id = %token_id, "API token revoked");
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
