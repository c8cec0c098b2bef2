//! Askama page templates and the data they are rendered from.
//!
//! Every page embeds a [`BaseContext`] for the shared layout: navigation
//! depends on who is logged in, and the footer shows the notifications
//! drained from the session, so each one appears exactly once.

use std::collections::BTreeMap;

use askama::Template;
use log::error;

use crate::billdesk::{Error, Result};
use crate::cart::{self, LineItemInput};
use crate::context::{Identity, RequestContext};
use crate::form::{
    dropdown, form_checkbox, form_close, form_errors, form_hidden, form_input, form_line_items,
    form_open, form_select, form_submit, form_textarea,
};
use crate::html::{escape, Attrs, Html};
use crate::pagination::Pagination;
use crate::session::Notification;
use crate::time::{format_datetime, time_ago};
use crate::user::{Role, User};
use crate::validate::FormErrors;

pub const APP_NAME: &str = "BillDesk";
pub const NOTE_MAX: usize = 500;

pub struct NavLink {
    pub href: &'static str,
    pub text: &'static str,
    pub active: bool,
}

/// Data shared by every page using `layout.html`.
pub struct BaseContext {
    pub title: String,
    pub app_name: &'static str,
    pub logged_in: bool,
    pub is_staff: bool,
    pub user_name: String,
    pub role_label: &'static str,
    pub nav: Vec<NavLink>,
    pub user_menu: Html,
    pub logout_form: Html,
    pub notifications: Vec<Notification>,
    /// Empty unless the page carries a form.
    pub csrf_token: String,
}

impl BaseContext {
    pub fn new(ctx: &mut RequestContext, title: &str, path: &str) -> Self {
        let identity = ctx.identity();
        let role = identity.as_ref().map(|i| i.role);

        let (user_menu, logout_form, csrf_token) = match &identity {
            Some(identity) => {
                let token = ctx.csrf_token();
                (user_menu(identity), logout_form(&token), token)
            }
            None => (Html::new(), Html::new(), String::new()),
        };

        Self {
            title: title.into(),
            app_name: APP_NAME,
            logged_in: identity.is_some(),
            is_staff: role.is_some_and(|r| r.is_staff()),
            user_name: identity.as_ref().map(|i| i.name.clone()).unwrap_or_default(),
            role_label: role.unwrap_or_default().label(),
            nav: nav_links(role, path),
            user_menu,
            logout_form,
            notifications: ctx.take_notifications(),
            csrf_token,
        }
    }

    fn with_csrf(mut self, token: &str) -> Self {
        self.csrf_token = token.into();
        self
    }
}

pub fn nav_links(role: Option<Role>, path: &str) -> Vec<NavLink> {
    let links: &[(&'static str, &'static str)] = match role {
        None => &[
            ("/", "Home"),
            ("/auth/login", "Log in"),
            ("/auth/register", "Register"),
        ],
        Some(r) if r.is_staff() => &[("/", "Home"), ("/dashboard", "Dashboard"), ("/admin", "Admin")],
        Some(_) => &[("/", "Home"), ("/dashboard", "Dashboard")],
    };

    links
        .iter()
        .map(|&(href, text)| NavLink {
            href,
            text,
            active: href == path,
        })
        .collect()
}

fn user_menu(identity: &Identity) -> Html {
    let mut items = vec![("/dashboard", "Dashboard")];
    if identity.role.is_staff() {
        items.push(("/admin", "Users"));
    }
    items.push(("#logout-modal", "Log out"));

    dropdown("user-menu", &identity.name, &items)
}

fn logout_form(token: &str) -> Html {
    let mut form = form_open("/auth/logout", "post", token, &Attrs::new());
    form.push(Html::trusted(
        "<button type=\"button\" class=\"btn btn-secondary\" data-dismiss=\"modal\">Cancel</button> ",
    ));
    form.push(form_submit("Log out", &Attrs::new()));
    form.push(form_close());
    form
}

pub fn render(page: &impl Template) -> Result<String> {
    page.render().map_err(|e| {
        error!("couldn't render page: {e}");
        Error::Internal
    })
}

#[derive(Template)]
#[template(path = "home.html")]
pub struct HomePage {
    pub base: BaseContext,
}

#[derive(Template)]
#[template(path = "login.html")]
pub struct LoginPage {
    pub base: BaseContext,
    pub notice: Option<&'static str>,
    pub form: Html,
}

#[derive(Template)]
#[template(path = "register.html")]
pub struct RegisterPage {
    pub base: BaseContext,
    pub form: Html,
}

/// What was typed into the add-to-cart form, to refill it after a failure.
#[derive(Debug, Default)]
pub struct CartDraft {
    pub rows: Vec<LineItemInput>,
    pub note: String,
    pub due: String,
}

pub struct CartRow {
    pub description: String,
    pub quantity: u32,
    pub unit_price: String,
    pub total: String,
    pub remove_form: Html,
}

#[derive(Template)]
#[template(path = "dashboard.html")]
pub struct DashboardPage {
    pub base: BaseContext,
    pub email: String,
    pub signed_in: Option<String>,
    pub rows: Vec<CartRow>,
    pub summary: String,
    pub links: Html,
    pub total: String,
    pub note: String,
    pub due: Option<String>,
    pub add_form: Html,
}

pub struct UserRow {
    pub name: String,
    pub email: String,
    pub role: &'static str,
}

#[derive(Template)]
#[template(path = "admin.html")]
pub struct AdminPage {
    pub base: BaseContext,
    pub filter_form: Html,
    pub users: Vec<UserRow>,
    pub summary: String,
    pub links: Html,
}

#[derive(Template)]
#[template(path = "access_denied.html")]
pub struct AccessDeniedPage {
    pub base: BaseContext,
}

#[derive(Template)]
#[template(path = "error.html")]
pub struct ErrorPage {
    pub app_name: &'static str,
    pub status: u16,
    pub message: String,
}

impl HomePage {
    pub fn new(ctx: &mut RequestContext) -> Self {
        Self {
            base: BaseContext::new(ctx, "Welcome", "/"),
        }
    }
}

impl LoginPage {
    /// `message` is the `?message=` flag the visitor was redirected with.
    pub fn new(ctx: &mut RequestContext, message: Option<&str>) -> Self {
        let old = ctx.take_old_input();
        let token = ctx.csrf_token();
        let base = BaseContext::new(ctx, "Log in", "/auth/login").with_csrf(&token);

        let notice = match message {
            Some("session_expired") => Some("Your session has expired. Please log in again."),
            _ => None,
        };

        let mut form = form_open("/auth/login", "post", &token, &Attrs::new());
        form.push(form_input(
            "email",
            "email",
            "Email",
            value(&old, "email"),
            &Attrs::new().required().with("autocomplete", "email"),
            None,
        ));
        form.push(form_input(
            "password",
            "password",
            "Password",
            "",
            &Attrs::new().required().with("autocomplete", "current-password"),
            None,
        ));
        form.push(form_submit("Log in", &Attrs::new()));
        form.push(form_close());

        Self { base, notice, form }
    }
}

impl RegisterPage {
    pub fn new(
        ctx: &mut RequestContext,
        values: &BTreeMap<String, String>,
        errors: &FormErrors,
    ) -> Self {
        let token = ctx.csrf_token();
        let base = BaseContext::new(ctx, "Create an account", "/auth/register").with_csrf(&token);

        let mut form = form_open("/auth/register", "post", &token, &Attrs::new());
        form.push(form_input(
            "text",
            "name",
            "Full name",
            value(values, "name"),
            &Attrs::new().required().with("autocomplete", "name"),
            errors.get("name"),
        ));
        form.push(form_input(
            "email",
            "email",
            "Email",
            value(values, "email"),
            &Attrs::new().required().with("autocomplete", "email"),
            errors.get("email"),
        ));
        form.push(form_input(
            "password",
            "password",
            "Password",
            "",
            &Attrs::new()
                .required()
                .with("minlength", "8")
                .with("autocomplete", "new-password"),
            errors.get("password"),
        ));
        form.push(form_input(
            "password",
            "password_confirmation",
            "Confirm password",
            "",
            &Attrs::new().required().with("autocomplete", "new-password"),
            errors.get("password_confirmation"),
        ));
        form.push(form_checkbox(
            "terms",
            "I accept the terms of service",
            values.get("terms").is_some_and(|v| v == "1"),
            &Attrs::new(),
        ));
        if let Some(error) = errors.get("terms") {
            form.push(Html::trusted("<p class=\"field-error\">"));
            form.push(escape(error));
            form.push(Html::trusted("</p>"));
        }
        form.push(form_submit("Register", &Attrs::new()));
        form.push(form_close());

        Self { base, form }
    }
}

impl DashboardPage {
    pub fn new(
        ctx: &mut RequestContext,
        identity: &Identity,
        page: usize,
        per_page: usize,
        draft: &CartDraft,
        errors: &FormErrors,
    ) -> Self {
        let token = ctx.csrf_token();
        let now = ctx.now();
        let signed_in = ctx
            .session()
            .logged_in_at
            .map(|at| format!("signed in {} ({} UTC)", time_ago(at, now), format_datetime(at)));

        let items = ctx.cart().to_vec();
        let pagination = Pagination::new(items.len(), per_page, page);
        let offset = pagination.offset();

        let cart_rows = pagination
            .slice(&items)
            .iter()
            .enumerate()
            .map(|(i, item)| {
                let mut remove = form_open("/cart/remove", "post", &token, &Attrs::new().class("inline"));
                remove.push(form_hidden("index", &(offset + i).to_string()));
                remove.push(form_submit(
                    "Remove",
                    &Attrs::new()
                        .class("btn btn-link")
                        .with("aria-label", format!("Remove {}", item.description)),
                ));
                remove.push(form_close());

                CartRow {
                    description: item.description.clone(),
                    quantity: item.quantity,
                    unit_price: cart::format_money(item.unit_price_cents),
                    total: cart::format_money(item.total_cents()),
                    remove_form: remove,
                }
            })
            .collect();

        let mut add_form = form_open("/cart/add", "post", &token, &Attrs::new());
        add_form.push(form_errors(errors));
        add_form.push(form_line_items("items", &draft.rows));
        add_form.push(form_input(
            "date",
            "due_date",
            "Due date (optional)",
            &draft.due,
            &Attrs::new(),
            errors.get("due_date"),
        ));
        add_form.push(form_textarea(
            "notes",
            "Notes (e.g. purchase order number)",
            &draft.note,
            &Attrs::new().with("maxlength", NOTE_MAX.to_string()).with("rows", "3"),
            errors.get("notes"),
        ));
        add_form.push(form_submit("Add to cart", &Attrs::new()));
        add_form.push(form_close());

        Self {
            base: BaseContext::new(ctx, "Dashboard", "/dashboard"),
            email: identity.email.clone(),
            signed_in,
            rows: cart_rows,
            summary: pagination.summary(),
            links: pagination.links("/dashboard"),
            total: cart::format_money(cart::total_cents(&items)),
            note: ctx.cart_note().into(),
            due: ctx.cart_due().map(|d| d.to_string()),
            add_form,
        }
    }
}

impl AdminPage {
    pub fn new(
        ctx: &mut RequestContext,
        users: &[User],
        pagination: &Pagination,
        filter: Option<Role>,
    ) -> Self {
        let selected = filter.map_or("", |r| r.as_str());

        let mut filter_form = form_open("/admin", "get", "", &Attrs::new().class("inline"));
        filter_form.push(form_select(
            "role",
            "Show",
            &[
                ("", "All roles"),
                ("customer", "Customers"),
                ("staff", "Staff"),
                ("admin", "Administrators"),
            ],
            selected,
            &Attrs::new(),
            None,
        ));
        filter_form.push(form_submit("Filter", &Attrs::new().class("btn btn-secondary")));
        filter_form.push(form_close());

        let base = match filter {
            Some(r) => format!("/admin?role={}", r.as_str()),
            None => "/admin".into(),
        };

        Self {
            base: BaseContext::new(ctx, "Users", "/admin"),
            filter_form,
            users: users
                .iter()
                .map(|u| UserRow {
                    name: u.name.clone(),
                    email: u.email.clone(),
                    role: u.role.label(),
                })
                .collect(),
            summary: pagination.summary(),
            links: pagination.links(&base),
        }
    }
}

impl AccessDeniedPage {
    pub fn new(ctx: &mut RequestContext) -> Self {
        Self {
            base: BaseContext::new(ctx, "Access denied", "/access-denied"),
        }
    }
}

impl ErrorPage {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            app_name: APP_NAME,
            status,
            message: message.into(),
        }
    }
}

fn value<'a>(values: &'a BTreeMap<String, String>, field: &str) -> &'a str {
    values.get(field).map(String::as_str).unwrap_or("")
}
