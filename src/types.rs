use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Buyer,
    Seller,
    Admin,
}

impl Role {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "BUYER" => Some(Self::Buyer),
            "SELLER" => Some(Self::Seller),
            "ADMIN" => Some(Self::Admin),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buyer => "BUYER",
            Self::Seller => "SELLER",
            Self::Admin => "ADMIN",
        }
    }
}

fn student_roles() -> BTreeSet<Role> {
    BTreeSet::from([Role::Buyer, Role::Seller])
}

/// Normalizes the role field of a backend response.
///
/// Accepts a list of role names, the legacy single-role string (`STUDENT`
/// expands to buyer + seller), or nothing at all, which also means a student.
pub fn normalize_roles(value: Option<&Value>) -> BTreeSet<Role> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str())
            .filter_map(Role::parse)
            .collect(),
        Some(Value::String(s)) if s.trim().eq_ignore_ascii_case("STUDENT") => student_roles(),
        Some(Value::String(s)) => match Role::parse(s) {
            Some(role) => BTreeSet::from([role]),
            None => student_roles(),
        },
        _ => student_roles(),
    }
}

/// Picks `roles` over the legacy `role` field, the way the backend sends them.
pub(crate) fn roles_field(obj: &serde_json::Map<String, Value>) -> Option<&Value> {
    obj.get("roles")
        .filter(|v| !v.is_null())
        .or_else(|| obj.get("role").filter(|v| !v.is_null()))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    pub roles: BTreeSet<Role>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl User {
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    pub fn has_any_role(&self, roles: &[Role]) -> bool {
        roles.iter().any(|r| self.has_role(*r))
    }

    pub fn is_admin(&self) -> bool {
        self.has_role(Role::Admin)
    }

    pub fn is_buyer(&self) -> bool {
        self.has_role(Role::Buyer)
    }

    pub fn is_seller(&self) -> bool {
        self.has_role(Role::Seller)
    }

    pub fn is_student(&self) -> bool {
        self.has_any_role(&[Role::Buyer, Role::Seller])
    }

    /// Builds a user from a `/auth/me` payload. Missing fields fall back to
    /// empty strings, matching what the backend omits for partial profiles.
    pub fn from_profile(profile: &Value) -> Self {
        let obj = profile.as_object().cloned().unwrap_or_default();
        Self {
            id: read_string(obj.get("id"))
                .or_else(|| read_string(obj.get("userId")))
                .unwrap_or_default(),
            username: read_string(obj.get("username")).unwrap_or_default(),
            email: read_string(obj.get("email")).unwrap_or_default(),
            roles: normalize_roles(roles_field(&obj)),
            first_name: read_string(obj.get("firstName")),
            last_name: read_string(obj.get("lastName")),
        }
    }

    /// Minimal identity rebuilt from cached storage when the backend is
    /// unreachable. The id is derived from the token prefix.
    pub fn from_cache(access_token: &str, username: &str, roles: BTreeSet<Role>) -> Self {
        Self {
            id: access_token.chars().take(10).collect(),
            username: username.to_string(),
            email: String::new(),
            roles,
            first_name: None,
            last_name: None,
        }
    }
}

pub(crate) fn read_string(value: Option<&Value>) -> Option<String> {
    let s = value?.as_str()?.trim();
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl TokenPair {
    /// Reads the refresh endpoint's response. Anything but two non-empty
    /// token strings is rejected.
    pub fn from_json(json: &Value) -> Option<Self> {
        let obj = json.as_object()?;
        Some(Self {
            access_token: read_string(obj.get("accessToken"))?,
            refresh_token: read_string(obj.get("refreshToken"))?,
        })
    }
}

/// Body of a successful `/auth/login` or `/auth/register` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthResponse {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub user_id: String,
    pub username: Option<String>,
    pub email: String,
    pub roles: BTreeSet<Role>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl AuthResponse {
    pub fn from_json(json: &Value) -> Self {
        let obj = json.as_object().cloned().unwrap_or_default();
        Self {
            access_token: read_string(obj.get("accessToken")),
            refresh_token: read_string(obj.get("refreshToken")),
            user_id: read_string(obj.get("userId"))
                .or_else(|| read_string(obj.get("id")))
                .unwrap_or_default(),
            username: read_string(obj.get("username")),
            email: read_string(obj.get("email")).unwrap_or_default(),
            roles: normalize_roles(roles_field(&obj)),
            first_name: read_string(obj.get("firstName")),
            last_name: read_string(obj.get("lastName")),
        }
    }

    pub fn user(&self) -> User {
        User {
            id: self.user_id.clone(),
            username: self.username.clone().unwrap_or_default(),
            email: self.email.clone(),
            roles: self.roles.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    LoggedOut,
    Authenticating,
    Authenticated,
    RefreshingToken,
}

/// What the UI layer observes about the session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AuthSnapshot {
    pub phase: SessionPhase,
    pub user: Option<User>,
    pub is_loading: bool,
}

impl AuthSnapshot {
    /// Optimistic: a session still being validated counts as signed in.
    pub fn is_authenticated(&self) -> bool {
        !matches!(self.phase, SessionPhase::LoggedOut)
    }
}
