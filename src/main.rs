use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::{error, info, warn};

mod args;
mod auth;
mod backend;
mod billdesk;
mod cart;
mod context;
mod csrf;
mod form;
mod html;
mod pages;
mod pagination;
mod routes;
mod session;
mod time;
mod user;
mod validate;

use args::Args;
use backend::{FileBackend, MemoryBackend, SessionStore, UserStore};
use billdesk::BillDesk;

const PURGE_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[tokio::main]
async fn main() {
    if std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", "billdesk=info");
    }
    pretty_env_logger::init();

    let args = Args::parse();

    let addr = match args.addr() {
        Ok(addr) => addr,
        Err(e) => {
            error!("invalid listen address: {e}");
            std::process::exit(2);
        }
    };

    let bd = match args.data_dir() {
        Some(dir) => match FileBackend::new(dir) {
            Ok(backend) => {
                info!("storing data under {}", dir.display());
                open_billdesk(Arc::new(backend), &args)
            }
            Err(e) => {
                error!("couldn't open data directory {}: {e}", dir.display());
                std::process::exit(1);
            }
        },
        None => {
            info!("no data directory given, keeping users and sessions in memory");
            open_billdesk(Arc::new(MemoryBackend::new()), &args)
        }
    };

    if let Some((email, password)) = args.admin() {
        if bd.ensure_admin(email, password).is_err() {
            error!("couldn't set up administrator {email}");
            std::process::exit(1);
        }
    }

    let bd = Arc::new(bd);
    tokio::spawn(purge_sessions(bd.clone()));

    info!("listening on {addr}");
    warp::serve(routes::routes(bd)).run(addr).await;
}

async fn purge_sessions(bd: Arc<BillDesk>) {
    let mut interval = tokio::time::interval(PURGE_INTERVAL);

    loop {
        interval.tick().await;
        match bd.purge_idle_sessions() {
            Ok(0) => {}
            Ok(n) => info!("purged {n} idle session(s)"),
            Err(e) => warn!("couldn't purge idle sessions: {e:?}"),
        }
    }
}

fn open_billdesk<B>(backend: Arc<B>, args: &Args) -> BillDesk
where
    B: SessionStore + UserStore + 'static,
{
    BillDesk::new(backend, args.config())
}
