use std::{result, sync::Arc};

use cookie::{Cookie, SameSite};
use log::{debug, error, info, trace, warn};
use warp::http;
use warp::reply::{Reply, Response};

use crate::auth::{self, Credentials};
use crate::backend::{CreateError, FindError, SessionStore, UserStore};
use crate::context::{RequestContext, SessionConfig};
use crate::pagination::Pagination;
use crate::session::SessionId;
use crate::time::Timestamp;
use crate::user::{Role, User, UserId};

pub struct BillDesk {
    sessions: Arc<dyn SessionStore>,
    users: Arc<dyn UserStore>,
    config: Config,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub session: SessionConfig,
    pub cookie: CookieConfig,
    pub per_page: usize,
}

#[derive(Debug, Clone)]
pub struct CookieConfig {
    pub name: String,
    pub path: String,
    pub domain: Option<String>,
    pub secure: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Error {
    Internal,
    Unauthorized,
    BadRequest,
    Forbidden,
}

pub type Result<T> = result::Result<T, Error>;

impl From<Error> for http::StatusCode {
    fn from(e: Error) -> Self {
        match e {
            Error::Internal => http::StatusCode::INTERNAL_SERVER_ERROR,
            Error::Unauthorized => http::StatusCode::UNAUTHORIZED,
            Error::BadRequest => http::StatusCode::BAD_REQUEST,
            Error::Forbidden => http::StatusCode::FORBIDDEN,
        }
    }
}

impl Error {
    pub fn message(&self) -> &'static str {
        match self {
            Error::Internal => "Something went wrong on our side. Please try again.",
            Error::Unauthorized => "You need to log in to do that.",
            Error::BadRequest => "That request couldn't be understood.",
            Error::Forbidden => "This form has expired. Please go back, reload and try again.",
        }
    }
}

impl warp::reject::Reject for Error {}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            name: "billdesk_session".into(),
            path: "/".into(),
            domain: None,
            secure: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            cookie: CookieConfig::default(),
            per_page: 10,
        }
    }
}

impl BillDesk {
    pub fn new<B>(backend: Arc<B>, config: Config) -> Self
    where
        B: SessionStore + UserStore + 'static,
    {
        Self {
            sessions: backend.clone(),
            users: backend,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Load the session named by the request's `Cookie` header.
    pub fn open(&self, cookie_header: Option<&str>) -> Result<RequestContext> {
        let now = now()?;
        self.open_at(cookie_header, now)
    }

    pub fn open_at(&self, cookie_header: Option<&str>, now: Timestamp) -> Result<RequestContext> {
        let presented = cookie_header.and_then(|header| self.session_id_from(header));

        let stored = match &presented {
            Some(id) => self.sessions.load(id).map_err(|()| Error::Internal)?,
            None => None,
        };

        if presented.is_some() && stored.is_none() {
            debug!("unknown session presented, starting afresh");
        }

        let ctx = RequestContext::open(presented.clone(), stored, self.config.session, now);

        // gone even if this request never reaches `finish`
        if let (true, Some(id)) = (ctx.is_expired(), &presented) {
            self.sessions.remove(id).map_err(|()| Error::Internal)?;
        }

        Ok(ctx)
    }

    /// Drop stored sessions idle for longer than the session timeout.
    pub fn purge_idle_sessions(&self) -> Result<usize> {
        let now = now()?;
        self.purge_idle_sessions_at(now)
    }

    pub fn purge_idle_sessions_at(&self, now: Timestamp) -> Result<usize> {
        let before = now.plus_secs(-self.config.session.timeout_secs);

        self.sessions.purge_idle(before).map_err(|()| Error::Internal)
    }

    fn session_id_from(&self, header: &str) -> Option<SessionId> {
        Cookie::split_parse(header)
            .filter_map(|c| c.ok())
            .find(|c| c.name() == self.config.cookie.name)
            .and_then(|c| match c.value().parse::<SessionId>() {
                Ok(id) => Some(id),
                Err(()) => {
                    warn!("malformed session cookie");
                    None
                }
            })
    }

    /// Persist the session and attach whatever `Set-Cookie` the client needs.
    pub fn finish(&self, ctx: RequestContext, reply: impl Reply) -> Result<Response> {
        let (stale, id, known, session) = ctx.into_parts();

        for old in &stale {
            trace!("dropping session {old}");
            self.sessions.remove(old).map_err(|()| Error::Internal)?;
        }

        let cookie = if session.is_blank() {
            // nothing to remember; drop any record and cookie the client holds
            if known {
                self.sessions.remove(&id).map_err(|()| Error::Internal)?;
            }
            (known || !stale.is_empty()).then(|| self.removal_cookie())
        } else {
            self.sessions.save(&id, &session).map_err(|()| Error::Internal)?;
            (!known).then(|| self.session_cookie(&id))
        };

        let mut response = reply.into_response();
        if let Some(cookie) = cookie {
            let value = http::HeaderValue::from_str(&cookie).map_err(|e| {
                error!("couldn't build cookie header: {e:?}");
                Error::Internal
            })?;
            response.headers_mut().append(http::header::SET_COOKIE, value);
        }

        Ok(response)
    }

    fn cookie_builder(&self, value: String) -> cookie::CookieBuilder<'static> {
        let config = &self.config.cookie;

        let mut builder = Cookie::build((config.name.clone(), value))
            .path(config.path.clone())
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(config.secure);

        if let Some(domain) = &config.domain {
            builder = builder.domain(domain.clone());
        }
        builder
    }

    fn session_cookie(&self, id: &SessionId) -> String {
        self.cookie_builder(id.to_string()).build().to_string()
    }

    fn removal_cookie(&self) -> String {
        let mut cookie = self.cookie_builder(String::new()).build();
        cookie.make_removal();
        cookie.to_string()
    }

    /// Check credentials. Which part was wrong is logged, never returned.
    pub fn authenticate(&self, creds: &Credentials) -> Result<User> {
        let email = creds.email();

        let user = self.users.find_user(email).map_err(|e| match e {
            FindError::NotFound => {
                info!("rejecting non-existant user {email}");
                Error::Unauthorized
            }
            FindError::Internal => {
                error!("couldn't authenticate user {email}: {e:?}");
                Error::Internal
            }
        })?;

        if !creds.matches(&user.pwhash) {
            info!("wrong password for user {email}");
            return Err(Error::Unauthorized);
        }

        Ok(user)
    }

    pub fn register(
        &self,
        name: &str,
        email: &str,
        password: &str,
    ) -> result::Result<User, CreateError> {
        self.create_user(name, email, password, Role::Customer)
    }

    fn create_user(
        &self,
        name: &str,
        email: &str,
        password: &str,
        role: Role,
    ) -> result::Result<User, CreateError> {
        let user = User {
            id: UserId::new(),
            email: email.trim().to_lowercase(),
            name: name.trim().into(),
            role,
            pwhash: auth::hash_password(password).map_err(|()| CreateError::Internal)?,
        };

        self.users.create_user(&user)?;
        info!("created {} {}", role.as_str(), user.email);

        Ok(user)
    }

    /// Make sure an administrator account exists for `email`.
    pub fn ensure_admin(&self, email: &str, password: &str) -> Result<()> {
        match self.users.find_user(&email.trim().to_lowercase()) {
            Ok(user) if user.role == Role::Admin => {
                debug!("admin {email} already present");
                Ok(())
            }
            Ok(user) => {
                warn!("{email} exists as {}, not promoting", user.role.as_str());
                Ok(())
            }
            Err(FindError::NotFound) => self
                .create_user("Administrator", email, password, Role::Admin)
                .map(|_| ())
                .map_err(|e| {
                    error!("couldn't create admin {email}: {e:?}");
                    Error::Internal
                }),
            Err(FindError::Internal) => Err(Error::Internal),
        }
    }

    /// One page of the user directory, optionally filtered by role.
    pub fn users_page(&self, role: Option<Role>, page: usize) -> Result<(Vec<User>, Pagination)> {
        let users: Vec<User> = self
            .users
            .users()
            .map_err(|()| Error::Internal)?
            .into_iter()
            .filter(|u| role.map_or(true, |r| u.role == r))
            .collect();

        let pagination = Pagination::new(users.len(), self.config.per_page, page);
        let shown = pagination.slice(&users).to_vec();

        Ok((shown, pagination))
    }
}

fn now() -> Result<Timestamp> {
    Timestamp::now().map_err(|e| {
        error!("couldn't get time: {e:?}");
        Error::Internal
    })
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::backend::MemoryBackend;
    use crate::context::test::NOW;
    use crate::session::NotificationKind;

    fn billdesk() -> BillDesk {
        BillDesk::new(Arc::new(MemoryBackend::new()), Config::default())
    }

    fn set_cookie(response: &Response) -> Option<String> {
        response
            .headers()
            .get(http::header::SET_COOKIE)
            .map(|v| v.to_str().unwrap().to_string())
    }

    #[test]
    fn authenticate_hides_which_part_was_wrong() {
        let bd = billdesk();
        bd.register("Ada", "Ada@Example.com", "Secret1!").unwrap();

        let ok = bd.authenticate(&Credentials::new("ada@example.com", "Secret1!"));
        assert_eq!(ok.unwrap().name, "Ada");

        assert_eq!(
            bd.authenticate(&Credentials::new("ada@example.com", "nope")).unwrap_err(),
            Error::Unauthorized
        );
        assert_eq!(
            bd.authenticate(&Credentials::new("bob@example.com", "Secret1!")).unwrap_err(),
            Error::Unauthorized
        );
    }

    #[test]
    fn duplicate_registration() {
        let bd = billdesk();
        bd.register("Ada", "ada@example.com", "Secret1!").unwrap();
        assert!(matches!(
            bd.register("Ada 2", "ADA@example.com", "Secret1!"),
            Err(CreateError::Exists)
        ));
    }

    #[test]
    fn blank_guest_sessions_are_not_stored() {
        let bd = billdesk();
        let ctx = bd.open_at(None, NOW).unwrap();

        let response = bd.finish(ctx, warp::reply()).unwrap();
        assert_eq!(set_cookie(&response), None);
    }

    #[test]
    fn sessions_persist_between_requests() {
        let bd = billdesk();

        let mut ctx = bd.open_at(None, NOW).unwrap();
        ctx.flash(NotificationKind::Info, "hello");
        let response = bd.finish(ctx, warp::reply()).unwrap();

        let cookie = set_cookie(&response).unwrap();
        assert!(cookie.starts_with("billdesk_session="));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Lax"));
        assert!(cookie.contains("Path=/"));
        let pair = cookie.split(';').next().unwrap().to_string();

        let mut ctx = bd.open_at(Some(&format!("theme=dark; {pair}")), NOW).unwrap();
        assert_eq!(ctx.take_notifications().len(), 1);
        // known id, now blank: record dropped and cookie cleared
        let response = bd.finish(ctx, warp::reply()).unwrap();
        let removal = set_cookie(&response).unwrap();
        assert!(removal.starts_with("billdesk_session=;"));
        assert!(removal.contains("Max-Age=0"));
    }

    #[test]
    fn login_issues_a_new_cookie_and_drops_the_old_record() {
        let bd = billdesk();
        let user = bd.register("Ada", "ada@example.com", "Secret1!").unwrap();

        let mut ctx = bd.open_at(None, NOW).unwrap();
        ctx.csrf_token();
        let guest_id = ctx.id().clone();
        let response = bd.finish(ctx, warp::reply()).unwrap();
        let pair = set_cookie(&response).unwrap().split(';').next().unwrap().to_string();

        let mut ctx = bd.open_at(Some(&pair), NOW).unwrap();
        assert_eq!(ctx.id(), &guest_id);
        ctx.login(&user);
        let response = bd.finish(ctx, warp::reply()).unwrap();

        let new_pair = set_cookie(&response).unwrap().split(';').next().unwrap().to_string();
        assert_ne!(new_pair, pair);
        assert!(bd.sessions.load(&guest_id).unwrap().is_none());

        let ctx = bd.open_at(Some(&new_pair), NOW.plus_secs(60)).unwrap();
        assert!(ctx.is_logged_in());
    }

    fn cookie_pair(response: &Response) -> String {
        set_cookie(response).unwrap().split(';').next().unwrap().to_string()
    }

    #[test]
    fn expired_sessions_are_removed_on_sight() {
        let bd = billdesk();
        let user = bd.register("Ada", "ada@example.com", "Secret1!").unwrap();

        let mut ctx = bd.open_at(None, NOW).unwrap();
        ctx.login(&user);
        let id = ctx.id().clone();
        let pair = cookie_pair(&bd.finish(ctx, warp::reply()).unwrap());

        let ctx = bd.open_at(Some(&pair), NOW.plus_secs(1801)).unwrap();
        assert!(ctx.is_expired());
        // dropped before any handler decides whether to persist
        assert!(bd.sessions.load(&id).unwrap().is_none());
    }

    #[test]
    fn idle_sessions_are_purged() {
        let bd = billdesk();

        let mut stale = vec![];
        for _ in 0..20 {
            let mut ctx = bd.open_at(None, NOW).unwrap();
            ctx.csrf_token();
            stale.push(ctx.id().clone());
            bd.finish(ctx, warp::reply()).unwrap();
        }
        let mut ctx = bd.open_at(None, NOW.plus_secs(1000)).unwrap();
        ctx.csrf_token();
        let fresh = ctx.id().clone();
        bd.finish(ctx, warp::reply()).unwrap();

        assert_eq!(bd.purge_idle_sessions_at(NOW.plus_secs(1800)).unwrap(), 0);
        assert_eq!(bd.purge_idle_sessions_at(NOW.plus_secs(1801)).unwrap(), 20);
        assert!(stale.iter().all(|id| bd.sessions.load(id).unwrap().is_none()));
        assert!(bd.sessions.load(&fresh).unwrap().is_some());
    }

    #[test]
    fn cookie_attributes_follow_config() {
        let config = Config {
            cookie: CookieConfig {
                name: "sid".into(),
                path: "/app".into(),
                domain: Some("billing.example.com".into()),
                secure: true,
            },
            ..Default::default()
        };
        let bd = BillDesk::new(Arc::new(MemoryBackend::new()), config);

        let cookie = bd.session_cookie(&SessionId::new());
        assert!(cookie.starts_with("sid="));
        assert!(cookie.contains("Path=/app"));
        assert!(cookie.contains("Domain=billing.example.com"));
        assert!(cookie.contains("Secure"));
    }

    #[test]
    fn admin_bootstrap_and_listing() {
        let bd = billdesk();
        bd.ensure_admin("root@example.com", "Secret1!").unwrap();
        bd.ensure_admin("root@example.com", "Other1!!").unwrap();
        for i in 0..12 {
            bd.register("C", &format!("c{i:02}@example.com"), "Secret1!").unwrap();
        }

        let (admins, _) = bd.users_page(Some(Role::Admin), 1).unwrap();
        assert_eq!(admins.len(), 1);

        let (page2, pagination) = bd.users_page(Some(Role::Customer), 2).unwrap();
        assert_eq!(page2.len(), 2);
        assert_eq!(pagination.summary(), "11 to 12 of 12");
    }
}
