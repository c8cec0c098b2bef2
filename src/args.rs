use std::net::{AddrParseError, IpAddr, SocketAddr};
use std::path::PathBuf;

use clap::Parser;

use crate::billdesk::{Config, CookieConfig};
use crate::context::{SessionConfig, DEFAULT_TIMEOUT_SECS};
use crate::csrf::CsrfMode;

#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Args {
    /// Whether clients connect over https.
    /// If so, the session cookie is sent as a secure cookie.
    #[arg(short, long)]
    secure: bool,

    /// The address to listen on. By default just the IPv4 loopback.
    #[arg(short, long)]
    address: Option<String>,

    /// The port to listen on.
    #[arg(short, long, default_value_t = 80)]
    port: u16,

    /// Directory for users and sessions. Without one, everything is kept in
    /// memory and lost on restart.
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Seconds of inactivity before a logged-in session expires.
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS)]
    session_timeout: i64,

    #[arg(long, default_value = "billdesk_session")]
    cookie_name: String,

    #[arg(long, default_value = "/")]
    cookie_path: String,

    #[arg(long)]
    cookie_domain: Option<String>,

    /// Keep a pool of reusable CSRF tokens per session (several tabs can
    /// post) instead of a single token consumed on use.
    #[arg(long)]
    csrf_pool: bool,

    /// Rows per page in listings.
    #[arg(long, default_value_t = 10)]
    per_page: usize,

    /// Create an administrator with this email at startup, if missing.
    #[arg(long, requires = "admin_password")]
    admin_email: Option<String>,

    #[arg(long, env = "BILLDESK_ADMIN_PASSWORD", hide_env_values = true)]
    admin_password: Option<String>,
}

impl Args {
    pub fn addr(&self) -> Result<SocketAddr, AddrParseError> {
        self.address
            .as_deref()
            .unwrap_or("127.0.0.1")
            .parse()
            .map(|addr: IpAddr| (addr, self.port).into())
    }

    pub fn data_dir(&self) -> Option<&PathBuf> {
        self.data_dir.as_ref()
    }

    pub fn admin(&self) -> Option<(&str, &str)> {
        Some((self.admin_email.as_deref()?, self.admin_password.as_deref()?))
    }

    pub fn config(&self) -> Config {
        Config {
            session: SessionConfig {
                timeout_secs: self.session_timeout,
                csrf_mode: if self.csrf_pool {
                    CsrfMode::DEFAULT_POOL
                } else {
                    CsrfMode::SingleUse
                },
            },
            cookie: CookieConfig {
                name: self.cookie_name.clone(),
                path: self.cookie_path.clone(),
                domain: self.cookie_domain.clone(),
                secure: self.secure,
            },
            per_page: self.per_page,
        }
    }
}
