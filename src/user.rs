use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub pwhash: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(Uuid);

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Guest,
    Customer,
    Staff,
    Admin,
}

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::try_parse(s).map(Self).map_err(|_| ())
    }
}

impl Role {
    pub const STAFF: &'static [Role] = &[Role::Staff, Role::Admin];
    pub const MEMBERS: &'static [Role] = &[Role::Customer, Role::Staff, Role::Admin];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Guest => "guest",
            Role::Customer => "customer",
            Role::Staff => "staff",
            Role::Admin => "admin",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Role::Guest => "Guest",
            Role::Customer => "Customer",
            Role::Staff => "Staff",
            Role::Admin => "Administrator",
        }
    }

    pub fn is_staff(&self) -> bool {
        Self::STAFF.contains(self)
    }
}

impl TryFrom<&'_ str> for Role {
    type Error = ();

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "guest" => Ok(Role::Guest),
            "customer" => Ok(Role::Customer),
            "staff" => Ok(Role::Staff),
            "admin" => Ok(Role::Admin),
            _ => Err(()),
        }
    }
}
