use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use ::time::Date;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cart::LineItem;
use crate::csrf::CsrfTokens;
use crate::time::Timestamp;
use crate::user::{Role, UserId};

/// Opaque identifier carried in the session cookie.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

/// Everything remembered about a visitor between requests.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Session {
    pub user_id: Option<UserId>,
    pub user_email: Option<String>,
    pub user_name: Option<String>,
    pub user_role: Role,
    pub logged_in: bool,
    pub last_activity: Timestamp,
    #[serde(default)]
    pub logged_in_at: Option<Timestamp>,
    #[serde(default)]
    pub csrf: CsrfTokens,
    #[serde(default)]
    pub cart: Vec<LineItem>,
    #[serde(default)]
    pub cart_note: String,
    #[serde(default)]
    pub cart_due: Option<Date>,
    #[serde(default)]
    pub old_input: BTreeMap<String, String>,
    #[serde(default)]
    pub notifications: Vec<Notification>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Success,
    Error,
    Warning,
    Info,
}

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl FromStr for SessionId {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::try_parse(s).map(Self).map_err(|_| ())
    }
}

impl Session {
    pub fn guest(now: Timestamp) -> Self {
        Self {
            last_activity: now,
            ..Default::default()
        }
    }

    /// Nothing worth keeping: an anonymous visitor that hasn't been shown a form.
    pub fn is_blank(&self) -> bool {
        !self.logged_in
            && self.csrf.is_empty()
            && self.cart.is_empty()
            && self.cart_note.is_empty()
            && self.cart_due.is_none()
            && self.old_input.is_empty()
            && self.notifications.is_empty()
    }
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Success => "success",
            NotificationKind::Error => "error",
            NotificationKind::Warning => "warning",
            NotificationKind::Info => "info",
        }
    }
}
