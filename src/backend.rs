use crate::session::{Session, SessionId};
use crate::time::Timestamp;
use crate::user::User;

#[derive(Debug)]
pub enum FindError {
    NotFound,
    Internal,
}

#[derive(Debug)]
pub enum CreateError {
    Exists,
    Internal,
}

/// Where session records live between requests.
pub trait SessionStore: Send + Sync {
    fn load(&self, id: &SessionId) -> Result<Option<Session>, ()>;
    fn save(&self, id: &SessionId, session: &Session) -> Result<(), ()>;
    fn remove(&self, id: &SessionId) -> Result<(), ()>;
    /// Drop every record last active before `before`, returning how many went.
    fn purge_idle(&self, before: Timestamp) -> Result<usize, ()>;
}

/// The user directory: credentials, display names and roles.
pub trait UserStore: Send + Sync {
    fn find_user(&self, email: &str) -> Result<User, FindError>;
    fn create_user(&self, user: &User) -> Result<(), CreateError>;
    fn users(&self) -> Result<Vec<User>, ()>;
}

mod backend_file;
pub use backend_file::FileBackend;

mod backend_memory;
pub use backend_memory::MemoryBackend;
