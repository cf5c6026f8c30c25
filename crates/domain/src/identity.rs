use serde::{Deserialize, Serialize};

pub const EMAIL_CHANNEL: &str = "email";

/// An identity record as the external identity provider reports it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalIdentity {
    pub id: String,
    #[serde(default)]
    pub traits: IdentityTraits,
    #[serde(default)]
    pub verifiable_addresses: Vec<VerifiableAddress>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityTraits {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<IdentityName>,
    #[serde(default)]
    pub picture: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityName {
    #[serde(default)]
    pub first: Option<String>,
    #[serde(default)]
    pub last: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiableAddress {
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub via: String,
    #[serde(default)]
    pub verified: bool,
}

impl ExternalIdentity {
    /// Normalized email from the traits, falling back to the first verifiable address.
    pub fn email(&self) -> Option<String> {
        let from_traits = self.traits.email.as_deref().map(normalize_email);
        let from_addresses = || {
            self.verifiable_addresses
                .first()
                .and_then(|address| address.value.as_deref())
                .map(normalize_email)
        };
        from_traits
            .filter(|email| !email.is_empty())
            .or_else(from_addresses)
            .filter(|email| !email.is_empty())
    }

    pub fn has_verified_email(&self) -> bool {
        self.verifiable_addresses
            .iter()
            .any(|address| address.via == EMAIL_CHANNEL && address.verified)
    }

    pub fn first_name(&self) -> Option<String> {
        self.traits
            .name
            .as_ref()
            .and_then(|name| non_blank(name.first.as_deref()))
    }

    pub fn last_name(&self) -> Option<String> {
        self.traits
            .name
            .as_ref()
            .and_then(|name| non_blank(name.last.as_deref()))
    }

    pub fn picture(&self) -> Option<String> {
        non_blank(self.traits.picture.as_deref())
    }
}

pub fn normalize_email(value: &str) -> String {
    value.trim().to_lowercase()
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
}
