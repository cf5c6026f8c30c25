use std::sync::Arc;

use crate::agent_info::AgentInfo;
use crate::identity::normalize_email;
use crate::ports::BoxFuture;
use crate::ports::registration::{LinkOutcome, LinkedUser, Registration, RegistrationError};
use crate::ports::users::UserRepository;
use crate::users::{NewUser, User};
use crate::util::now_ms;

#[derive(Clone, Debug)]
pub struct RegistrationConfig {
    pub require_verified_email: bool,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            require_verified_email: true,
        }
    }
}

#[derive(Clone)]
pub struct UserRegistrationService {
    users: Arc<dyn UserRepository>,
    config: RegistrationConfig,
}

impl UserRegistrationService {
    pub fn new(users: Arc<dyn UserRepository>, config: RegistrationConfig) -> Self {
        Self { users, config }
    }

    /// Creates a user for an identity nobody has registered yet.
    pub async fn register(&self, agent_info: &AgentInfo) -> Result<User, RegistrationError> {
        let email = validate_email(&agent_info.email)?;
        if self.config.require_verified_email && !agent_info.email_verified {
            return Err(RegistrationError::NotVerified(email));
        }
        let authentication_id = required_authentication_id(agent_info)?;

        if self
            .users
            .find_by_authentication_id(authentication_id)
            .await
            .map_err(RegistrationError::Store)?
            .is_some()
        {
            return Err(RegistrationError::DuplicateAuthId(
                authentication_id.to_string(),
            ));
        }
        if self
            .users
            .find_by_email(&email)
            .await
            .map_err(RegistrationError::Store)?
            .is_some()
        {
            return Err(RegistrationError::AlreadyRegistered(email));
        }

        let user = self
            .users
            .create(&NewUser::from_agent_info(agent_info, email.clone()))
            .await
            .map_err(|err| RegistrationError::from_store(err, &email))?;
        tracing::info!(
            user_id = %user.user_id,
            authentication_id = %authentication_id,
            "registered new user"
        );
        Ok(user)
    }

    /// Returns the user already holding the authentication id, links it to the user
    /// with the same email, or registers a new user.
    pub async fn link_or_register(
        &self,
        agent_info: &AgentInfo,
    ) -> Result<LinkedUser, RegistrationError> {
        let authentication_id = required_authentication_id(agent_info)?;
        let email = validate_email(&agent_info.email)?;

        if let Some(user) = self
            .users
            .find_by_authentication_id(authentication_id)
            .await
            .map_err(RegistrationError::Store)?
        {
            return Ok(LinkedUser {
                user,
                outcome: LinkOutcome::Existing,
            });
        }

        if let Some(user) = self
            .users
            .find_by_email(&email)
            .await
            .map_err(RegistrationError::Store)?
        {
            let user = self.link(user, authentication_id).await?;
            return Ok(LinkedUser {
                user,
                outcome: LinkOutcome::Linked,
            });
        }

        let user = self.register(agent_info).await?;
        Ok(LinkedUser {
            user,
            outcome: LinkOutcome::Created,
        })
    }

    async fn link(&self, mut user: User, authentication_id: &str) -> Result<User, RegistrationError> {
        if let Some(existing) = user.linked_authentication_id() {
            if existing == authentication_id {
                return Ok(user);
            }
            tracing::warn!(
                user_id = %user.user_id,
                existing = %existing,
                requested = %authentication_id,
                "user already linked to a different authentication id"
            );
            return Err(RegistrationError::AlreadyRegistered(user.email));
        }

        user.authentication_id = Some(authentication_id.to_string());
        user.updated_at_ms = now_ms();
        let email = user.email.clone();
        let saved = self
            .users
            .save(&user)
            .await
            .map_err(|err| RegistrationError::from_store(err, &email))?;
        tracing::info!(
            user_id = %saved.user_id,
            authentication_id = %authentication_id,
            "linked authentication id to existing user"
        );
        Ok(saved)
    }
}

impl Registration for UserRegistrationService {
    fn register_new_user(
        &self,
        agent_info: &AgentInfo,
    ) -> BoxFuture<'_, Result<User, RegistrationError>> {
        let agent_info = agent_info.clone();
        Box::pin(async move { self.register(&agent_info).await })
    }

    fn create_or_link(
        &self,
        agent_info: &AgentInfo,
    ) -> BoxFuture<'_, Result<LinkedUser, RegistrationError>> {
        let agent_info = agent_info.clone();
        Box::pin(async move { self.link_or_register(&agent_info).await })
    }
}

fn required_authentication_id(agent_info: &AgentInfo) -> Result<&str, RegistrationError> {
    let authentication_id = agent_info.authentication_id.trim();
    if authentication_id.is_empty() {
        return Err(RegistrationError::MissingAuthenticationId);
    }
    Ok(authentication_id)
}

pub fn validate_email(value: &str) -> Result<String, RegistrationError> {
    let email = normalize_email(value);
    let invalid = || RegistrationError::InvalidEmail(value.to_string());
    if email.chars().any(char::is_whitespace) {
        return Err(invalid());
    }
    let (local, domain) = email.split_once('@').ok_or_else(invalid)?;
    if local.is_empty()
        || domain.contains('@')
        || !domain.contains('.')
        || domain.starts_with('.')
        || domain.ends_with('.')
    {
        return Err(invalid());
    }
    Ok(email)
}
