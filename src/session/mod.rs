use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};

/// Explicit per-session context threaded into every collaborator call.
///
/// Carries the identity of the app being edited and the credential used
/// for remote calls, so nothing reaches for ambient globals.
#[derive(Clone)]
pub struct SessionContext {
    /// Unique session identifier
    pub id: String,
    /// Identifier of the app whose tree is mounted
    pub app_id: Option<String>,
    /// Bearer credential for remote collaborators
    credential: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl SessionContext {
    /// Create a new session context with a unique ID
    pub fn new(app_id: Option<String>, credential: Option<String>) -> Self {
        Self {
            id: generate_session_id(),
            app_id,
            credential,
            created_at: Utc::now(),
        }
    }

    /// Anonymous context for local-only sessions
    pub fn anonymous() -> Self {
        Self::new(None, None)
    }

    pub fn credential(&self) -> Option<&str> {
        self.credential.as_deref()
    }

    /// Get display identifier (app id or session id)
    pub fn display_id(&self) -> &str {
        self.app_id.as_deref().unwrap_or(&self.id)
    }
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("id", &self.id)
            .field("app_id", &self.app_id)
            .field("credential", &self.credential.as_ref().map(|_| "<redacted>"))
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Generate a short, unique session ID
fn generate_session_id() -> String {
    use std::sync::atomic::{AtomicU32, Ordering};
    static COUNTER: AtomicU32 = AtomicU32::new(0);

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;

    let counter = COUNTER.fetch_add(1, Ordering::SeqCst);

    // Low timestamp bits plus a rolling counter, rendered in base36
    let combined = (timestamp & 0xFFFFFF) << 8 | (counter as u64 & 0xFF);
    format_base36(combined)
}

/// Format a number as base36 string
fn format_base36(mut n: u64) -> String {
    const CHARS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

    if n == 0 {
        return "0".to_string();
    }

    let mut result = Vec::new();
    while n > 0 {
        result.push(CHARS[(n % 36) as usize]);
        n /= 36;
    }
    result.reverse();
    String::from_utf8(result).unwrap_or_else(|_| "error".to_string())
}
