use std::collections::{BTreeMap, HashMap};

use ::time::Date;
use log::{debug, info};

use crate::cart::LineItem;
use crate::csrf::CsrfMode;
use crate::form::CSRF_FIELD;
use crate::session::{Notification, NotificationKind, Session, SessionId};
use crate::time::Timestamp;
use crate::user::{Role, User, UserId};

pub const DEFAULT_TIMEOUT_SECS: i64 = 1800;

#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub timeout_secs: i64,
    pub csrf_mode: CsrfMode,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            csrf_mode: CsrfMode::SingleUse,
        }
    }
}

/// The visitor's session for the duration of one request.
///
/// Built from the stored record when the request arrives and handed back to
/// [`BillDesk::finish`](crate::billdesk::BillDesk::finish) to be persisted.
pub struct RequestContext {
    id: SessionId,
    /// The id the client presented, if it matched a stored record.
    presented: Option<SessionId>,
    /// Ids that must be dropped from the store when this request completes.
    stale: Vec<SessionId>,
    session: Session,
    expired: bool,
    csrf: Option<String>,
    config: SessionConfig,
    now: Timestamp,
}

/// Who the logged-in user is, as far as the session knows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub email: String,
    pub name: String,
    pub role: Role,
}

/// Why a role check failed, and where to send the visitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denied {
    NotLoggedIn,
    Expired,
    Forbidden,
}

impl Denied {
    pub fn redirect_to(&self) -> &'static str {
        match self {
            Denied::NotLoggedIn => "/auth/login",
            Denied::Expired => "/auth/login?message=session_expired",
            Denied::Forbidden => "/access-denied",
        }
    }
}

impl RequestContext {
    /// `stored` is the record found for `presented`, if any. A missing record
    /// starts a new guest session under a fresh id. Logged-in sessions are
    /// checked for expiry straight away.
    pub fn open(
        presented: Option<SessionId>,
        stored: Option<Session>,
        config: SessionConfig,
        now: Timestamp,
    ) -> Self {
        let (id, presented, session) = match (presented, stored) {
            (Some(id), Some(session)) => (id.clone(), Some(id), session),
            (_, _) => (SessionId::new(), None, Session::guest(now)),
        };

        let mut ctx = Self {
            id,
            presented,
            stale: vec![],
            session,
            expired: false,
            csrf: None,
            config,
            now,
        };

        if ctx.is_session_expired(config.timeout_secs) {
            info!("session expired after {}s idle", config.timeout_secs);
        }
        ctx
    }

    pub fn now(&self) -> Timestamp {
        self.now
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Ids to delete, the id to keep, and whether the client already holds it.
    pub fn into_parts(self) -> (Vec<SessionId>, SessionId, bool, Session) {
        let known = self.presented.as_ref() == Some(&self.id);
        (self.stale, self.id, known, self.session)
    }

    /// Record a successful login. The session id is regenerated so an id
    /// planted before login is useless afterwards.
    pub fn login(&mut self, user: &User) {
        self.regenerate_id();

        let s = &mut self.session;
        s.user_id = Some(user.id);
        s.user_email = Some(user.email.clone());
        s.user_name = Some(user.name.clone());
        s.user_role = user.role;
        s.logged_in = true;
        s.last_activity = self.now;
        s.logged_in_at = Some(self.now);
        s.old_input.clear();
        s.csrf.clear();
        self.csrf = None;
        self.expired = false;

        info!("{} login: new session", user.email);
    }

    pub fn logout(&mut self) {
        if let Some(email) = &self.session.user_email {
            info!("{email} logout");
        }
        self.destroy();
    }

    /// Whether this request found a logged-in session that had gone idle.
    pub fn is_expired(&self) -> bool {
        self.expired
    }

    pub fn is_logged_in(&self) -> bool {
        self.session.logged_in
    }

    /// Sliding expiry: an idle logged-in session past `timeout_secs` is
    /// destroyed and reported expired, otherwise its activity time is refreshed.
    pub fn is_session_expired(&mut self, timeout_secs: i64) -> bool {
        if self.session.logged_in && self.now.since(self.session.last_activity) > timeout_secs {
            self.destroy();
            self.expired = true;
            return true;
        }

        self.session.last_activity = self.now;
        false
    }

    pub fn identity(&self) -> Option<Identity> {
        let s = &self.session;
        if !s.logged_in {
            return None;
        }

        Some(Identity {
            user_id: s.user_id?,
            email: s.user_email.clone()?,
            name: s.user_name.clone().unwrap_or_default(),
            role: s.user_role,
        })
    }

    pub fn require_role(&self, roles: &[Role]) -> Result<Identity, Denied> {
        if self.expired {
            return Err(Denied::Expired);
        }

        let identity = self.identity().ok_or(Denied::NotLoggedIn)?;

        if roles.contains(&identity.role) {
            Ok(identity)
        } else {
            debug!(
                "{} ({}) denied, needs one of {roles:?}",
                identity.email,
                identity.role.as_str()
            );
            Err(Denied::Forbidden)
        }
    }

    /// Token for the forms rendered on this request.
    pub fn csrf_token(&mut self) -> String {
        if let Some(token) = &self.csrf {
            return token.clone();
        }

        let token = self.session.csrf.current(self.config.csrf_mode, self.now);
        self.csrf = Some(token.clone());
        token
    }

    pub fn verify_csrf(&mut self, presented: Option<&str>) -> bool {
        self.session
            .csrf
            .verify(self.config.csrf_mode, presented, self.now)
    }

    pub fn verify_csrf_form(&mut self, form: &HashMap<String, String>) -> bool {
        self.verify_csrf(form.get(CSRF_FIELD).map(String::as_str))
    }

    pub fn flash(&mut self, kind: NotificationKind, message: impl Into<String>) {
        self.session.notifications.push(Notification {
            kind,
            message: message.into(),
        });
    }

    pub fn take_notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.session.notifications)
    }

    /// Keep submitted values for the next render. Passwords and the CSRF
    /// token are never kept.
    pub fn flash_input(&mut self, form: &HashMap<String, String>) {
        self.session.old_input = form
            .iter()
            .filter(|(k, _)| k.as_str() != CSRF_FIELD && !k.contains("password"))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
    }

    pub fn take_old_input(&mut self) -> BTreeMap<String, String> {
        std::mem::take(&mut self.session.old_input)
    }

    pub fn cart(&self) -> &[LineItem] {
        &self.session.cart
    }

    pub fn cart_note(&self) -> &str {
        &self.session.cart_note
    }

    pub fn add_to_cart(&mut self, items: Vec<LineItem>, note: &str) {
        self.session.cart.extend(items);
        let note = note.trim();
        if !note.is_empty() {
            self.session.cart_note = note.into();
        }
    }

    pub fn cart_due(&self) -> Option<Date> {
        self.session.cart_due
    }

    pub fn set_cart_due(&mut self, due: Date) {
        self.session.cart_due = Some(due);
    }

    pub fn remove_from_cart(&mut self, index: usize) -> Option<LineItem> {
        if index < self.session.cart.len() {
            Some(self.session.cart.remove(index))
        } else {
            None
        }
    }

    fn regenerate_id(&mut self) {
        let old = std::mem::replace(&mut self.id, SessionId::new());
        self.stale.push(old);
    }

    fn destroy(&mut self) {
        self.regenerate_id();
        self.session = Session::guest(self.now);
        self.csrf = None;
    }
}
