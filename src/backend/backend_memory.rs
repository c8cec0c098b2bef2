use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use log::error;

use crate::backend::{CreateError, FindError, SessionStore, UserStore};
use crate::session::{Session, SessionId};
use crate::time::Timestamp;
use crate::user::User;

/// Process-local storage; everything is lost on restart.
#[derive(Default)]
pub struct MemoryBackend {
    sessions: Mutex<HashMap<SessionId, Session>>,
    users: Mutex<BTreeMap<String, User>>,
}

fn lock<T>(m: &Mutex<T>) -> Result<MutexGuard<'_, T>, ()> {
    m.lock().map_err(|e| {
        error!("memory backend lock poisoned: {e}");
    })
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemoryBackend {
    fn load(&self, id: &SessionId) -> Result<Option<Session>, ()> {
        Ok(lock(&self.sessions)?.get(id).cloned())
    }

    fn save(&self, id: &SessionId, session: &Session) -> Result<(), ()> {
        lock(&self.sessions)?.insert(id.clone(), session.clone());
        Ok(())
    }

    fn remove(&self, id: &SessionId) -> Result<(), ()> {
        lock(&self.sessions)?.remove(id);
        Ok(())
    }

    fn purge_idle(&self, before: Timestamp) -> Result<usize, ()> {
        let mut sessions = lock(&self.sessions)?;
        let held = sessions.len();

        sessions.retain(|_, session| session.last_activity >= before);
        Ok(held - sessions.len())
    }
}

impl UserStore for MemoryBackend {
    fn find_user(&self, email: &str) -> Result<User, FindError> {
        lock(&self.users)
            .map_err(|()| FindError::Internal)?
            .get(email)
            .cloned()
            .ok_or(FindError::NotFound)
    }

    fn create_user(&self, user: &User) -> Result<(), CreateError> {
        let mut users = lock(&self.users).map_err(|()| CreateError::Internal)?;

        if users.contains_key(&user.email) {
            return Err(CreateError::Exists);
        }
        users.insert(user.email.clone(), user.clone());
        Ok(())
    }

    fn users(&self) -> Result<Vec<User>, ()> {
        Ok(lock(&self.users)?.values().cloned().collect())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::user::{Role, UserId};

    #[test]
    fn stores_sessions_and_users() {
        let backend = MemoryBackend::new();
        let id = SessionId::new();

        backend.save(&id, &Session::guest(Timestamp::from_i64(1))).unwrap();
        assert!(backend.load(&id).unwrap().is_some());
        backend.remove(&id).unwrap();
        assert!(backend.load(&id).unwrap().is_none());

        let user = User {
            id: UserId::new(),
            email: "a@example.com".into(),
            name: "A".into(),
            role: Role::Admin,
            pwhash: "s$h".into(),
        };
        backend.create_user(&user).unwrap();
        assert!(matches!(backend.create_user(&user), Err(CreateError::Exists)));
        assert_eq!(backend.find_user("a@example.com").unwrap().role, Role::Admin);
        assert!(matches!(backend.find_user("b@example.com"), Err(FindError::NotFound)));
        assert_eq!(backend.users().unwrap().len(), 1);
    }

    #[test]
    fn purges_idle_sessions() {
        let backend = MemoryBackend::new();
        let idle = SessionId::new();
        let active = SessionId::new();

        backend.save(&idle, &Session::guest(Timestamp::from_i64(100))).unwrap();
        backend.save(&active, &Session::guest(Timestamp::from_i64(200))).unwrap();

        assert_eq!(backend.purge_idle(Timestamp::from_i64(200)).unwrap(), 1);
        assert!(backend.load(&idle).unwrap().is_none());
        assert!(backend.load(&active).unwrap().is_some());
        assert_eq!(backend.purge_idle(Timestamp::from_i64(200)).unwrap(), 0);
    }
}
