use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Anonymous,
    User,
    Admin,
    System,
}

impl Role {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "anonymous" | "guest" => Some(Role::Anonymous),
            "user" => Some(Role::User),
            "admin" => Some(Role::Admin),
            "system" | "service" => Some(Role::System),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Anonymous => "anonymous",
            Role::User => "user",
            Role::Admin => "admin",
            Role::System => "system",
        }
    }

    /// Admin and system callers may trigger backfills and read the audit log.
    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin | Role::System)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_tokens_count_as_admin() {
        assert_eq!(Role::parse("Service"), Some(Role::System));
        assert!(Role::System.is_admin());
        assert!(!Role::User.is_admin());
        assert_eq!(Role::parse("moderator"), None);
    }
}
