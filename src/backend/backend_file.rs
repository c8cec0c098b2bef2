use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use log::{debug, error, warn};

use crate::backend::{CreateError, FindError, SessionStore, UserStore};
use crate::session::{Session, SessionId};
use crate::time::Timestamp;
use crate::user::{Role, User, UserId};

mod kv;
use kv::KeyValues;

/// Users under `<root>/users/<email>/creds.txt`, sessions under
/// `<root>/sessions/<id>.json`.
pub struct FileBackend {
    root: PathBuf,
}

macro_rules! path {
    ($root: expr, $($components: expr),*) => {
        {
            let mut p = $root.clone();
            path!(@internal, p, $($components),*);
            p
        }
    };
    (@internal, $p:expr, $next:expr, $($rest: expr),*) => {
        $p.push($next);
        path!(@internal, $p, $($rest),*);
    };
    (@internal, $p:expr, $next:expr) => {
        $p.push($next);
    };
}

impl FileBackend {
    pub fn new(path: &Path) -> Result<Self, std::io::Error> {
        let root = path.to_path_buf();

        fs::create_dir_all(path!(root, "users"))?;
        fs::create_dir_all(path!(root, "sessions"))?;

        Ok(Self { root })
    }

    fn write(&self, path: PathBuf, keyvalues: &KeyValues) -> Result<(), std::io::Error> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        kv::write(file, keyvalues)
    }

    fn session_path(&self, id: &SessionId) -> PathBuf {
        // SessionId is a parsed uuid, so this can't escape the directory
        path!(self.root, "sessions", format!("{id}.json"))
    }

    fn user_dir(&self, email: &str) -> Result<PathBuf, ()> {
        if email.is_empty() || email.starts_with('.') || email.contains(['/', '\\']) {
            warn!("refusing unsafe user path {email:?}");
            return Err(());
        }
        Ok(path!(self.root, "users", email))
    }
}

impl SessionStore for FileBackend {
    fn load(&self, id: &SessionId) -> Result<Option<Session>, ()> {
        let path = self.session_path(id);

        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                error!("open \"{path:?}\": {e:?}");
                return Err(());
            }
        };

        serde_json::from_reader(file).map(Some).map_err(|e| {
            error!("couldn't parse session {id}: {e:?}");
        })
    }

    fn save(&self, id: &SessionId, session: &Session) -> Result<(), ()> {
        let path = self.session_path(id);

        let json = serde_json::to_string(session).map_err(|e| {
            error!("couldn't convert session to json: {e:?}");
        })?;

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| {
                error!("couldn't open \"{path:?}\": {e:?}");
            })?;

        writeln!(file, "{}", json).map_err(|e| {
            error!("writing session {id}: {e:?}");
        })
    }

    fn remove(&self, id: &SessionId) -> Result<(), ()> {
        let path = self.session_path(id);

        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => {
                error!("remove \"{path:?}\": {e:?}");
                Err(())
            }
        }
    }

    fn purge_idle(&self, before: Timestamp) -> Result<usize, ()> {
        let path = path!(self.root, "sessions");
        let mut purged = 0;

        let emap = |e: &dyn std::fmt::Debug| {
            error!("error listing sessions: {e:?}");
        };

        for ent in fs::read_dir(path).map_err(|e| emap(&e))? {
            let ent = ent.map_err(|e| emap(&e))?;

            let Some(id) = ent
                .file_name()
                .to_str()
                .and_then(|name| name.strip_suffix(".json"))
                .and_then(|stem| stem.parse::<SessionId>().ok())
            else {
                debug!("ignoring {:?} in sessions", ent.file_name());
                continue;
            };

            let idle = match self.load(&id) {
                Ok(Some(session)) => session.last_activity < before,
                Ok(None) => false,
                // unreadable records can never be resumed
                Err(()) => true,
            };

            if idle {
                self.remove(&id)?;
                purged += 1;
            }
        }

        Ok(purged)
    }
}

impl UserStore for FileBackend {
    fn find_user(&self, email: &str) -> Result<User, FindError> {
        let dir = self.user_dir(email).map_err(|()| FindError::NotFound)?;
        let path = path!(dir, "creds.txt");

        let file = File::open(&path).map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                return FindError::NotFound;
            }
            error!("open \"{path:?}\": {e:?}");
            FindError::Internal
        })?;

        let kv = kv::read(file, &["id", "name", "role", "pwhash"])?;
        let field = |k: &str| kv.get(k).cloned().ok_or(FindError::Internal);

        Ok(User {
            id: field("id")?.parse::<UserId>().map_err(|()| {
                error!("invalid id for user {email}");
                FindError::Internal
            })?,
            email: email.into(),
            name: field("name")?,
            role: Role::try_from(field("role")?.as_str()).map_err(|()| {
                error!("invalid role for user {email}");
                FindError::Internal
            })?,
            pwhash: field("pwhash")?,
        })
    }

    fn create_user(&self, user: &User) -> Result<(), CreateError> {
        let dir = self.user_dir(&user.email).map_err(|()| CreateError::Internal)?;

        match fs::create_dir(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Err(CreateError::Exists),
            Err(e) => {
                error!("create \"{dir:?}\": {e:?}");
                return Err(CreateError::Internal);
            }
        }

        let mut kv = KeyValues::new();
        kv.insert("id".into(), user.id.to_string());
        kv.insert("name".into(), user.name.clone());
        kv.insert("role".into(), user.role.as_str().into());
        kv.insert("pwhash".into(), user.pwhash.clone());

        self.write(path!(dir, "creds.txt"), &kv).map_err(|e| {
            error!("write \"{}\": {e:?}", user.email);
            // an empty user directory would claim the email forever
            if let Err(e) = fs::remove_dir_all(&dir) {
                error!("remove \"{dir:?}\": {e:?}");
            }
            CreateError::Internal
        })
    }

    fn users(&self) -> Result<Vec<User>, ()> {
        let path = path!(self.root, "users");
        let mut users = vec![];

        let emap = |e: &dyn std::fmt::Debug| {
            error!("error listing users: {e:?}");
        };

        for ent in fs::read_dir(path).map_err(|e| emap(&e))? {
            let ent = ent.map_err(|e| emap(&e))?;

            let fname = match ent.file_name().into_string() {
                Ok(x) => x,
                Err(e) => {
                    warn!("couldn't convert path into string: {e:?}");
                    continue;
                }
            };

            match self.find_user(&fname) {
                Ok(u) => users.push(u),
                Err(e) => warn!("skipping user {fname}: {e:?}"),
            }
        }

        users.sort_by(|a, b| a.email.cmp(&b.email));
        Ok(users)
    }
}
