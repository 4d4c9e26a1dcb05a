//! Team model.

use serde::{Deserialize, Serialize};

use super::User;

/// Membership entry submitted when a team is registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamMember {
    pub user_id: String,
    pub username: String,
    pub is_active: bool,
}

impl TeamMember {
    /// Turn the entry into a user record owned by `team_name`.
    pub fn into_user(self, team_name: &str) -> User {
        User {
            id: self.user_id,
            username: self.username,
            is_active: self.is_active,
            team_name: team_name.to_string(),
        }
    }
}

impl From<&User> for TeamMember {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id.clone(),
            username: user.username.clone(),
            is_active: user.is_active,
        }
    }
}

/// A named team and its roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    #[serde(rename = "team_name")]
    pub name: String,

    pub members: Vec<TeamMember>,
}

impl Team {
    /// Build a team from its stored member rows.
    pub fn from_users(name: impl Into<String>, users: &[User]) -> Self {
        Self {
            name: name.into(),
            members: users.iter().map(TeamMember::from).collect(),
        }
    }
}
