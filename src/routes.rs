use std::collections::{BTreeMap, HashMap};
use std::convert::Infallible;
use std::sync::Arc;

use askama::Template;
use log::{debug, error, info, warn};
use serde::Deserialize;
use warp::http::{self, StatusCode};
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

use crate::auth::Credentials;
use crate::backend::CreateError;
use crate::billdesk::{BillDesk, Error};
use crate::cart;
use crate::context::{Denied, RequestContext};
use crate::pages::{
    self, AccessDeniedPage, AdminPage, CartDraft, DashboardPage, ErrorPage, HomePage, LoginPage,
    RegisterPage, NOTE_MAX,
};
use crate::session::NotificationKind;
use crate::user::Role;
use crate::validate::{self, FormErrors};

const FORM_LIMIT: u64 = 16 * 1024;

#[derive(Debug, Deserialize)]
struct LoginQuery {
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PageQuery {
    page: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct AdminQuery {
    page: Option<usize>,
    role: Option<String>,
}

type Form = HashMap<String, String>;

pub fn routes(
    bd: Arc<BillDesk>,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let home = warp::path::end()
        .and(warp::get())
        .and(with_context(bd.clone()))
        .and_then(home);

    let auth = {
        let login_form = warp::path!("auth" / "login")
            .and(warp::get())
            .and(with_context(bd.clone()))
            .and(warp::query::<LoginQuery>())
            .and_then(login_form);

        let login = warp::path!("auth" / "login")
            .and(warp::post())
            .and(with_context(bd.clone()))
            .and(form_body())
            .and_then(login);

        let register_form = warp::path!("auth" / "register")
            .and(warp::get())
            .and(with_context(bd.clone()))
            .and_then(register_form);

        let register = warp::path!("auth" / "register")
            .and(warp::post())
            .and(with_context(bd.clone()))
            .and(form_body())
            .and_then(register);

        let logout = warp::path!("auth" / "logout")
            .and(warp::post())
            .and(with_context(bd.clone()))
            .and(form_body())
            .and_then(logout);

        login_form.or(login).or(register_form).or(register).or(logout)
    };

    let billing = {
        let dashboard = warp::path!("dashboard")
            .and(warp::get())
            .and(with_context(bd.clone()))
            .and(warp::query::<PageQuery>())
            .and_then(dashboard);

        let add = warp::path!("cart" / "add")
            .and(warp::post())
            .and(with_context(bd.clone()))
            .and(form_body())
            .and_then(cart_add);

        let remove = warp::path!("cart" / "remove")
            .and(warp::post())
            .and(with_context(bd.clone()))
            .and(form_body())
            .and_then(cart_remove);

        dashboard.or(add).or(remove)
    };

    let admin = warp::path!("admin")
        .and(warp::get())
        .and(with_context(bd.clone()))
        .and(warp::query::<AdminQuery>())
        .and_then(admin);

    let access_denied = warp::path!("access-denied")
        .and(warp::get())
        .and(with_context(bd))
        .and_then(access_denied);

    home.or(auth)
        .or(billing)
        .or(admin)
        .or(access_denied)
        .recover(handle_rejection)
        .with(warp::log("billdesk"))
}

fn with_context(
    bd: Arc<BillDesk>,
) -> impl Filter<Extract = (Arc<BillDesk>, RequestContext), Error = Rejection> + Clone {
    warp::any()
        .map(move || bd.clone())
        .and(warp::header::optional::<String>("cookie"))
        .and_then(|bd: Arc<BillDesk>, cookie: Option<String>| async move {
            let ctx = bd.open(cookie.as_deref()).map_err(warp::reject::custom)?;
            Ok::<_, Rejection>((bd, ctx))
        })
        .untuple_one()
}

fn form_body() -> impl Filter<Extract = (Form,), Error = Rejection> + Clone {
    warp::body::content_length_limit(FORM_LIMIT).and(warp::body::form())
}

fn redirect(to: &str) -> Response {
    warp::reply::with_header(StatusCode::SEE_OTHER, http::header::LOCATION, to).into_response()
}

/// Persist the session and send `reply`.
fn finish(bd: &BillDesk, ctx: RequestContext, reply: impl Reply) -> Result<Response, Rejection> {
    bd.finish(ctx, reply).map_err(warp::reject::custom)
}

fn page(
    bd: &BillDesk,
    ctx: RequestContext,
    page: &impl Template,
    status: StatusCode,
) -> Result<Response, Rejection> {
    let body = pages::render(page).map_err(warp::reject::custom)?;
    finish(bd, ctx, warp::reply::with_status(warp::reply::html(body), status))
}

fn denied(bd: &BillDesk, mut ctx: RequestContext, denied: Denied) -> Result<Response, Rejection> {
    if denied == Denied::NotLoggedIn {
        ctx.flash(NotificationKind::Warning, "Please log in to continue.");
    }
    finish(bd, ctx, redirect(denied.redirect_to()))
}

/// Rejects without persisting anything the request did to the session.
fn check_csrf(ctx: &mut RequestContext, form: &Form) -> Result<(), Rejection> {
    if ctx.verify_csrf_form(form) {
        Ok(())
    } else {
        warn!("rejecting form post with bad csrf token");
        Err(warp::reject::custom(Error::Forbidden))
    }
}

async fn home(bd: Arc<BillDesk>, mut ctx: RequestContext) -> Result<Response, Rejection> {
    let home = HomePage::new(&mut ctx);
    page(&bd, ctx, &home, StatusCode::OK)
}

async fn login_form(
    bd: Arc<BillDesk>,
    mut ctx: RequestContext,
    query: LoginQuery,
) -> Result<Response, Rejection> {
    if ctx.is_logged_in() {
        return finish(&bd, ctx, redirect("/dashboard"));
    }

    let login = LoginPage::new(&mut ctx, query.message.as_deref());
    page(&bd, ctx, &login, StatusCode::OK)
}

async fn login(
    bd: Arc<BillDesk>,
    mut ctx: RequestContext,
    form: Form,
) -> Result<Response, Rejection> {
    check_csrf(&mut ctx, &form)?;
    let creds = Credentials::from_form(&form).map_err(warp::reject::custom)?;

    let mut errors = FormErrors::new();
    errors.check("email", validate::validate_email(creds.email()));
    errors.check("password", validate::validate_password(creds.password(), false));
    if !errors.is_empty() {
        for (_, message) in errors.iter() {
            ctx.flash(NotificationKind::Error, message);
        }
        ctx.flash_input(&form);
        return finish(&bd, ctx, redirect("/auth/login"));
    }

    match bd.authenticate(&creds) {
        Ok(user) => {
            ctx.login(&user);
            ctx.flash(NotificationKind::Success, format!("Welcome back, {}!", user.name));
            finish(&bd, ctx, redirect("/dashboard"))
        }
        Err(Error::Unauthorized) => {
            ctx.flash(NotificationKind::Error, "Invalid email or password");
            ctx.flash_input(&form);
            finish(&bd, ctx, redirect("/auth/login"))
        }
        Err(e) => Err(warp::reject::custom(e)),
    }
}

async fn register_form(bd: Arc<BillDesk>, mut ctx: RequestContext) -> Result<Response, Rejection> {
    if ctx.is_logged_in() {
        return finish(&bd, ctx, redirect("/dashboard"));
    }

    let values = ctx.take_old_input();
    let register = RegisterPage::new(&mut ctx, &values, &FormErrors::new());
    page(&bd, ctx, &register, StatusCode::OK)
}

fn check_registration(form: &Form) -> FormErrors {
    let field = |name: &str| form.get(name).map(String::as_str).unwrap_or("");
    let name = field("name").trim();
    let password = field("password");

    let mut errors = FormErrors::new();
    errors.check(
        "name",
        validate::validate_required("Name", name)
            .and_then(|()| validate::validate_length("Name", name, 2, 100))
            .and_then(|()| validate::validate_single_line("Name", name)),
    );
    errors.check("email", validate::validate_email(field("email").trim()));
    errors.check("password", validate::validate_password(password, true));
    errors.check(
        "password_confirmation",
        validate::validate_matches("Password", password, field("password_confirmation")),
    );
    if field("terms") != "1" {
        errors.add("terms", "You must accept the terms of service");
    }

    errors
}

async fn register(
    bd: Arc<BillDesk>,
    mut ctx: RequestContext,
    form: Form,
) -> Result<Response, Rejection> {
    check_csrf(&mut ctx, &form)?;

    let mut errors = check_registration(&form);
    if errors.is_empty() {
        let field = |name: &str| form.get(name).map(String::as_str).unwrap_or("");

        match bd.register(field("name"), field("email"), field("password")) {
            Ok(user) => {
                ctx.flash(
                    NotificationKind::Success,
                    "Your account has been created. Please log in.",
                );
                let mut keep = Form::new();
                keep.insert("email".into(), user.email);
                ctx.flash_input(&keep);
                return finish(&bd, ctx, redirect("/auth/login"));
            }
            Err(CreateError::Exists) => {
                errors.add("email", "An account with this email already exists");
            }
            Err(CreateError::Internal) => {
                return Err(warp::reject::custom(Error::Internal));
            }
        }
    }

    debug!("registration rejected: {} field(s) invalid", errors.iter().count());
    let values: BTreeMap<String, String> = form
        .into_iter()
        .filter(|(k, _)| !k.contains("password"))
        .collect();
    let register = RegisterPage::new(&mut ctx, &values, &errors);
    page(&bd, ctx, &register, StatusCode::UNPROCESSABLE_ENTITY)
}

async fn logout(
    bd: Arc<BillDesk>,
    mut ctx: RequestContext,
    form: Form,
) -> Result<Response, Rejection> {
    if ctx.is_expired() {
        return denied(&bd, ctx, Denied::Expired);
    }
    check_csrf(&mut ctx, &form)?;

    ctx.logout();
    ctx.flash(NotificationKind::Info, "You have been logged out.");
    finish(&bd, ctx, redirect("/auth/login"))
}

async fn dashboard(
    bd: Arc<BillDesk>,
    mut ctx: RequestContext,
    query: PageQuery,
) -> Result<Response, Rejection> {
    let identity = match ctx.require_role(Role::MEMBERS) {
        Ok(identity) => identity,
        Err(d) => return denied(&bd, ctx, d),
    };

    let dashboard = DashboardPage::new(
        &mut ctx,
        &identity,
        query.page.unwrap_or(1),
        bd.config().per_page,
        &CartDraft::default(),
        &FormErrors::new(),
    );
    page(&bd, ctx, &dashboard, StatusCode::OK)
}

async fn cart_add(
    bd: Arc<BillDesk>,
    mut ctx: RequestContext,
    form: Form,
) -> Result<Response, Rejection> {
    let identity = match ctx.require_role(Role::MEMBERS) {
        Ok(identity) => identity,
        Err(d) => return denied(&bd, ctx, d),
    };
    check_csrf(&mut ctx, &form)?;

    let field = |name: &str| form.get(name).map(|v| v.trim()).unwrap_or("");
    let rows = cart::inputs_from_form(&form, "items");
    let notes = field("notes");
    let due = field("due_date");

    let mut errors = FormErrors::new();
    errors.check("notes", validate::validate_length("Notes", notes, 0, NOTE_MAX));
    if !due.is_empty() {
        errors.check("due_date", validate::validate_date("Due date", due));
    }
    let items = match cart::parse_rows("items", &rows) {
        Ok(items) => {
            errors.check("items", cart::validate_cart_size(ctx.cart().len(), items.len()));
            items
        }
        Err(row_errors) => {
            for (field, message) in row_errors.iter() {
                errors.add(field, message);
            }
            vec![]
        }
    };

    if !errors.is_empty() {
        let draft = CartDraft {
            rows,
            note: notes.into(),
            due: due.into(),
        };
        let per_page = bd.config().per_page;
        let dashboard = DashboardPage::new(&mut ctx, &identity, 1, per_page, &draft, &errors);
        return page(&bd, ctx, &dashboard, StatusCode::UNPROCESSABLE_ENTITY);
    }

    let count = items.len();
    ctx.add_to_cart(items, notes);
    if let Ok(date) = validate::parse_date(due) {
        ctx.set_cart_due(date);
    }
    info!("{} added {count} line item(s)", identity.email);
    ctx.flash(
        NotificationKind::Success,
        if count == 1 {
            "Added 1 item to your cart.".to_string()
        } else {
            format!("Added {count} items to your cart.")
        },
    );
    finish(&bd, ctx, redirect("/dashboard"))
}

async fn cart_remove(
    bd: Arc<BillDesk>,
    mut ctx: RequestContext,
    form: Form,
) -> Result<Response, Rejection> {
    if let Err(d) = ctx.require_role(Role::MEMBERS) {
        return denied(&bd, ctx, d);
    }
    check_csrf(&mut ctx, &form)?;

    let index = form
        .get("index")
        .and_then(|i| i.trim().parse::<usize>().ok())
        .ok_or_else(|| warp::reject::custom(Error::BadRequest))?;

    match ctx.remove_from_cart(index) {
        Some(item) => ctx.flash(
            NotificationKind::Success,
            format!("Removed \"{}\" from your cart.", item.description),
        ),
        None => ctx.flash(
            NotificationKind::Warning,
            "That item is no longer in your cart.",
        ),
    }
    finish(&bd, ctx, redirect("/dashboard"))
}

async fn admin(
    bd: Arc<BillDesk>,
    mut ctx: RequestContext,
    query: AdminQuery,
) -> Result<Response, Rejection> {
    if let Err(d) = ctx.require_role(Role::STAFF) {
        return denied(&bd, ctx, d);
    }

    let filter = query
        .role
        .as_deref()
        .filter(|r| !r.is_empty())
        .and_then(|r| Role::try_from(r).ok());

    let (users, pagination) = bd
        .users_page(filter, query.page.unwrap_or(1))
        .map_err(warp::reject::custom)?;

    let admin = AdminPage::new(&mut ctx, &users, &pagination, filter);
    page(&bd, ctx, &admin, StatusCode::OK)
}

async fn access_denied(bd: Arc<BillDesk>, mut ctx: RequestContext) -> Result<Response, Rejection> {
    let denied = AccessDeniedPage::new(&mut ctx);
    page(&bd, ctx, &denied, StatusCode::FORBIDDEN)
}

async fn handle_rejection(err: Rejection) -> Result<Response, Infallible> {
    let (status, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "We couldn't find that page.")
    } else if let Some(e) = err.find::<Error>() {
        (StatusCode::from(*e), e.message())
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "That action isn't allowed here.")
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "That form was too large.")
    } else {
        debug!("unhandled rejection: {err:?}");
        (StatusCode::BAD_REQUEST, Error::BadRequest.message())
    };

    let body = pages::render(&ErrorPage::new(status.as_u16(), message)).unwrap_or_else(|_| {
        error!("couldn't render error page for {status}");
        message.to_string()
    });

    Ok(warp::reply::with_status(warp::reply::html(body), status).into_response())
}

#[cfg(test)]
mod test {
    use super::*;

    use warp::hyper::body::Bytes;
    use warp::test::request;

    use crate::backend::{MemoryBackend, SessionStore};
    use crate::billdesk::Config;
    use crate::cart::{MAX_CART_ITEMS, MAX_ROWS};
    use crate::session::SessionId;
    use crate::time::Timestamp;

    type Reply = http::Response<Bytes>;

    fn app() -> Arc<BillDesk> {
        app_with_store().0
    }

    fn app_with_store() -> (Arc<BillDesk>, Arc<MemoryBackend>) {
        let store = Arc::new(MemoryBackend::new());
        let bd = Arc::new(BillDesk::new(store.clone(), Config::default()));
        bd.register("Ada", "ada@example.com", "Secret1!").unwrap();
        (bd, store)
    }

    fn session_id(cookie: &str) -> SessionId {
        cookie.split_once('=').unwrap().1.parse().unwrap()
    }

    /// Push the stored session's last activity past the idle timeout.
    fn idle_out(store: &MemoryBackend, cookie: &str) {
        let id = session_id(cookie);
        let mut session = store.load(&id).unwrap().unwrap();
        session.last_activity = session.last_activity.plus_secs(-1801);
        store.save(&id, &session).unwrap();
    }

    fn encode(fields: &[(&str, &str)]) -> String {
        let enc = |s: &str| {
            s.replace('%', "%25")
                .replace('&', "%26")
                .replace('+', "%2B")
                .replace('=', "%3D")
                .replace('\n', "%0A")
                .replace(' ', "+")
        };
        fields
            .iter()
            .map(|(k, v)| format!("{}={}", enc(k), enc(v)))
            .collect::<Vec<_>>()
            .join("&")
    }

    fn body(res: &Reply) -> String {
        String::from_utf8(res.body().to_vec()).unwrap()
    }

    fn set_cookie(res: &Reply) -> Option<String> {
        res.headers()
            .get(http::header::SET_COOKIE)
            .map(|v| v.to_str().unwrap().split(';').next().unwrap().to_string())
    }

    fn location(res: &Reply) -> &str {
        res.headers()
            .get(http::header::LOCATION)
            .unwrap()
            .to_str()
            .unwrap()
    }

    fn csrf(res: &Reply) -> String {
        let body = body(res);
        let marker = "name=\"csrf_token\" value=\"";
        let start = body.find(marker).expect("csrf field") + marker.len();
        body[start..start + 64].to_string()
    }

    async fn get(bd: &Arc<BillDesk>, path: &str, cookie: &str) -> Reply {
        request()
            .path(path)
            .header("cookie", cookie)
            .reply(&routes(bd.clone()))
            .await
    }

    async fn post(bd: &Arc<BillDesk>, path: &str, cookie: &str, fields: &[(&str, &str)]) -> Reply {
        request()
            .method("POST")
            .path(path)
            .header("cookie", cookie)
            .header("content-type", "application/x-www-form-urlencoded")
            .body(encode(fields))
            .reply(&routes(bd.clone()))
            .await
    }

    /// Log in through the forms, returning the session cookie.
    async fn log_in(bd: &Arc<BillDesk>, email: &str, password: &str) -> String {
        let res = get(bd, "/auth/login", "").await;
        let cookie = set_cookie(&res).unwrap();
        let token = csrf(&res);

        let res = post(
            bd,
            "/auth/login",
            &cookie,
            &[("email", email), ("password", password), ("csrf_token", token.as_str())],
        )
        .await;
        assert_eq!(res.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&res), "/dashboard");

        let new_cookie = set_cookie(&res).unwrap();
        assert_ne!(new_cookie, cookie, "session id must change on login");
        new_cookie
    }

    #[tokio::test]
    async fn home_for_guests_sets_no_cookie() {
        let bd = app();
        let res = get(&bd, "/", "").await;

        assert_eq!(res.status(), StatusCode::OK);
        assert!(set_cookie(&res).is_none());
        assert!(body(&res).contains("href=\"/auth/register\""));
    }

    #[tokio::test]
    async fn login_then_dashboard() {
        let bd = app();
        let cookie = log_in(&bd, "ada@example.com", "Secret1!").await;

        let res = get(&bd, "/dashboard", &cookie).await;
        assert_eq!(res.status(), StatusCode::OK);
        let html = body(&res);
        assert!(html.contains("Welcome back, Ada!"));
        assert!(html.contains("Your cart is empty."));

        // the toast was shown once
        let res = get(&bd, "/dashboard", &cookie).await;
        assert!(!body(&res).contains("Welcome back"));
    }

    #[tokio::test]
    async fn failed_login_is_generic_and_keeps_email() {
        let bd = app();
        let res = get(&bd, "/auth/login", "").await;
        let cookie = set_cookie(&res).unwrap();

        let res = post(
            &bd,
            "/auth/login",
            &cookie,
            &[
                ("email", "ada@example.com"),
                ("password", "Wrong1!!"),
                ("csrf_token", csrf(&res).as_str()),
            ],
        )
        .await;
        assert_eq!(res.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&res), "/auth/login");

        let html = body(&get(&bd, "/auth/login", &cookie).await);
        assert!(html.contains("Invalid email or password"));
        assert!(html.contains("value=\"ada@example.com\""));
        assert!(!html.contains("Wrong1!!"));
    }

    #[tokio::test]
    async fn csrf_is_required_and_single_use() {
        let bd = app();
        let res = get(&bd, "/auth/login", "").await;
        let cookie = set_cookie(&res).unwrap();
        let token = csrf(&res);
        let creds = [("email", "ada@example.com"), ("password", "Secret1!")];

        let res = post(&bd, "/auth/login", &cookie, &creds).await;
        assert_eq!(res.status(), StatusCode::FORBIDDEN);

        let res = post(
            &bd,
            "/auth/login",
            &cookie,
            &[creds[0], creds[1], ("csrf_token", "f00d")],
        )
        .await;
        assert_eq!(res.status(), StatusCode::FORBIDDEN);

        let logged_in = post(
            &bd,
            "/auth/login",
            &cookie,
            &[creds[0], creds[1], ("csrf_token", token.as_str())],
        )
        .await;
        assert_eq!(logged_in.status(), StatusCode::SEE_OTHER);
        let cookie = set_cookie(&logged_in).unwrap();

        // replaying the spent token against the new session
        let res = post(&bd, "/auth/logout", &cookie, &[("csrf_token", token.as_str())]).await;
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
        assert_eq!(get(&bd, "/dashboard", &cookie).await.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn role_gates() {
        let bd = app();
        bd.ensure_admin("root@example.com", "Secret1!").unwrap();

        let res = get(&bd, "/dashboard", "").await;
        assert_eq!(res.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&res), "/auth/login");

        let customer = log_in(&bd, "ada@example.com", "Secret1!").await;
        let res = get(&bd, "/admin", &customer).await;
        assert_eq!(res.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&res), "/access-denied");
        assert_eq!(
            get(&bd, "/access-denied", &customer).await.status(),
            StatusCode::FORBIDDEN
        );

        let admin = log_in(&bd, "root@example.com", "Secret1!").await;
        let res = get(&bd, "/admin?role=customer", &admin).await;
        assert_eq!(res.status(), StatusCode::OK);
        let html = body(&res);
        assert!(html.contains("ada@example.com"));
        assert!(!html.contains("<td>root@example.com</td>"));
        assert!(html.contains("Showing 1 to 1 of 1"));
    }

    #[tokio::test]
    async fn register_validates_then_creates() {
        let bd = app();
        let res = get(&bd, "/auth/register", "").await;
        let cookie = set_cookie(&res).unwrap();

        let res = post(
            &bd,
            "/auth/register",
            &cookie,
            &[
                ("name", "Grace"),
                ("email", "grace@example"),
                ("password", "weak"),
                ("password_confirmation", "weak"),
                ("csrf_token", csrf(&res).as_str()),
            ],
        )
        .await;
        assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let html = body(&res);
        assert!(html.contains("value=\"grace@example\""));
        assert!(html.contains("Please enter a valid email address"));
        assert!(html.contains("Password must be at least 8 characters long"));
        assert!(html.contains("You must accept the terms of service"));

        let res = post(
            &bd,
            "/auth/register",
            &cookie,
            &[
                ("name", "Grace"),
                ("email", "Grace@Example.com"),
                ("password", "Hopper1!"),
                ("password_confirmation", "Hopper1!"),
                ("terms", "1"),
                ("csrf_token", csrf(&res).as_str()),
            ],
        )
        .await;
        assert_eq!(res.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&res), "/auth/login");
        assert!(bd
            .authenticate(&Credentials::new("grace@example.com", "Hopper1!"))
            .is_ok());

        let html = body(&get(&bd, "/auth/login", &cookie).await);
        assert!(html.contains("Your account has been created"));
        assert!(html.contains("value=\"grace@example.com\""));
    }

    #[tokio::test]
    async fn cart_add_and_remove() {
        let bd = app();
        let cookie = log_in(&bd, "ada@example.com", "Secret1!").await;

        let res = get(&bd, "/dashboard", &cookie).await;
        let res = post(
            &bd,
            "/cart/add",
            &cookie,
            &[
                ("items[0][description]", "Hosting"),
                ("items[0][quantity]", "0"),
                ("items[0][unit_price]", "12.50"),
                ("due_date", "2026-02-30"),
                ("csrf_token", csrf(&res).as_str()),
            ],
        )
        .await;
        assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let html = body(&res);
        assert!(html.contains("Quantity must be between 1 and 1000"));
        assert!(html.contains("name=\"items[0][description]\" value=\"Hosting\""));
        assert!(html.contains("Due date must be a valid date (YYYY-MM-DD)"));
        assert!(html.contains("value=\"2026-02-30\""));

        let res = post(
            &bd,
            "/cart/add",
            &cookie,
            &[
                ("items[0][description]", "Hosting"),
                ("items[0][quantity]", "2"),
                ("items[0][unit_price]", "12.50"),
                ("items[1][description]", "Support"),
                ("items[1][quantity]", "1"),
                ("items[1][unit_price]", "1000"),
                ("notes", "PO 42"),
                ("due_date", "2026-11-01"),
                ("csrf_token", csrf(&res).as_str()),
            ],
        )
        .await;
        assert_eq!(res.status(), StatusCode::SEE_OTHER);

        let res = get(&bd, "/dashboard", &cookie).await;
        let html = body(&res);
        assert!(html.contains("Added 2 items to your cart."));
        assert!(html.contains("$1,025.00"));
        assert!(html.contains("PO 42"));
        assert!(html.contains("<strong>Due:</strong> 2026-11-01"));

        let res = post(
            &bd,
            "/cart/remove",
            &cookie,
            &[("index", "0"), ("csrf_token", csrf(&res).as_str())],
        )
        .await;
        assert_eq!(res.status(), StatusCode::SEE_OTHER);

        let html = body(&get(&bd, "/dashboard", &cookie).await);
        assert!(html.contains("Removed &quot;Hosting&quot; from your cart."));
        assert!(html.contains("$1,000.00"));
    }

    #[tokio::test]
    async fn logout_ends_the_session() {
        let bd = app();
        let cookie = log_in(&bd, "ada@example.com", "Secret1!").await;

        let res = get(&bd, "/dashboard", &cookie).await;
        let res = post(&bd, "/auth/logout", &cookie, &[("csrf_token", csrf(&res).as_str())]).await;
        assert_eq!(res.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&res), "/auth/login");
        let guest = set_cookie(&res).unwrap();

        assert_eq!(get(&bd, "/dashboard", &cookie).await.status(), StatusCode::SEE_OTHER);
        let html = body(&get(&bd, "/auth/login", &guest).await);
        assert!(html.contains("You have been logged out."));
    }

    #[tokio::test]
    async fn logout_after_expiry_redirects_quietly() {
        let (bd, store) = app_with_store();
        let cookie = log_in(&bd, "ada@example.com", "Secret1!").await;
        let token = csrf(&get(&bd, "/dashboard", &cookie).await);
        idle_out(&store, &cookie);

        let res = post(&bd, "/auth/logout", &cookie, &[("csrf_token", token.as_str())]).await;
        assert_eq!(res.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&res), "/auth/login?message=session_expired");
        assert!(store.load(&session_id(&cookie)).unwrap().is_none());

        // a stale token on an expired session is not a 403 either
        let cookie = log_in(&bd, "ada@example.com", "Secret1!").await;
        idle_out(&store, &cookie);
        let res = post(&bd, "/auth/logout", &cookie, &[("csrf_token", "stale")]).await;
        assert_eq!(res.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&res), "/auth/login?message=session_expired");
        assert!(store.load(&session_id(&cookie)).unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_session_is_dropped_even_when_csrf_fails() {
        let (bd, store) = app_with_store();
        let cookie = log_in(&bd, "ada@example.com", "Secret1!").await;
        idle_out(&store, &cookie);

        // login does no role check, so the bad token is what rejects it
        let res = post(
            &bd,
            "/auth/login",
            &cookie,
            &[("email", "ada@example.com"), ("password", "Secret1!"), ("csrf_token", "stale")],
        )
        .await;
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
        assert!(store.load(&session_id(&cookie)).unwrap().is_none());
    }

    #[tokio::test]
    async fn abandoned_guest_sessions_are_purged() {
        let (bd, store) = app_with_store();

        let mut ids = vec![];
        for _ in 0..20 {
            let res = get(&bd, "/auth/login", "").await;
            ids.push(session_id(&set_cookie(&res).unwrap()));
        }
        assert!(ids.iter().all(|id| store.load(id).unwrap().is_some()));

        let later = Timestamp::now().unwrap().plus_secs(1801);
        assert_eq!(bd.purge_idle_sessions_at(later).unwrap(), 20);
        assert!(ids.iter().all(|id| store.load(id).unwrap().is_none()));
    }

    #[tokio::test]
    async fn register_rejects_multi_line_names() {
        let bd = app();
        let res = get(&bd, "/auth/register", "").await;
        let cookie = set_cookie(&res).unwrap();

        let res = post(
            &bd,
            "/auth/register",
            &cookie,
            &[
                ("name", "Grace\nHopper"),
                ("email", "grace@example.com"),
                ("password", "Hopper1!"),
                ("password_confirmation", "Hopper1!"),
                ("terms", "1"),
                ("csrf_token", csrf(&res).as_str()),
            ],
        )
        .await;
        assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body(&res).contains("Name must not contain line breaks or control characters"));

        // the email is still free
        let res = post(
            &bd,
            "/auth/register",
            &cookie,
            &[
                ("name", "Grace Hopper"),
                ("email", "grace@example.com"),
                ("password", "Hopper1!"),
                ("password_confirmation", "Hopper1!"),
                ("terms", "1"),
                ("csrf_token", csrf(&res).as_str()),
            ],
        )
        .await;
        assert_eq!(res.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&res), "/auth/login");
    }

    #[tokio::test]
    async fn cart_size_is_capped() {
        let bd = app();
        let cookie = log_in(&bd, "ada@example.com", "Secret1!").await;

        let rows = |count: usize| {
            let mut fields = vec![];
            for i in 0..count {
                fields.push((format!("items[{i}][description]"), format!("Item {i}")));
                fields.push((format!("items[{i}][quantity]"), "1".to_string()));
                fields.push((format!("items[{i}][unit_price]"), "1".to_string()));
            }
            fields
        };

        let mut res = get(&bd, "/dashboard", &cookie).await;
        for _ in 0..MAX_CART_ITEMS / MAX_ROWS {
            let mut fields = rows(MAX_ROWS);
            fields.push(("csrf_token".into(), csrf(&res)));
            let fields: Vec<(&str, &str)> =
                fields.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();

            let added = post(&bd, "/cart/add", &cookie, &fields).await;
            assert_eq!(added.status(), StatusCode::SEE_OTHER);
            res = get(&bd, "/dashboard", &cookie).await;
        }

        let mut fields = rows(1);
        fields.push(("csrf_token".into(), csrf(&res)));
        let fields: Vec<(&str, &str)> =
            fields.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();

        let res = post(&bd, "/cart/add", &cookie, &fields).await;
        assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body(&res).contains("Your cart can hold at most 100 items (0 more)"));
    }

    #[tokio::test]
    async fn unknown_paths_render_error_page() {
        let bd = app();
        let res = get(&bd, "/nope", "").await;

        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        assert!(body(&res).contains("<h1>404</h1>"));
    }
}
