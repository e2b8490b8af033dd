use async_trait::async_trait;

use crate::model::{UserConfig, UserLevel};

#[derive(Debug, Clone, PartialEq)]
pub struct UserInfo {
    pub user_name: String,
    pub password: String,
    pub level: UserLevel,
}

impl From<UserConfig> for UserInfo {
    fn from(u: UserConfig) -> Self {
        UserInfo {
            user_name: u.user_name,
            password: u.password,
            level: u.level,
        }
    }
}

/// Source of credentials for digest and WS-Security authentication.
///
/// Digest verification needs the clear-text password, so implementations
/// must be able to return it.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn get_user(&self, user_name: &str) -> Option<UserInfo>;

    async fn list_users(&self) -> Vec<UserInfo>;
}

pub struct UserRepositoryImpl {
    users: Vec<UserInfo>,
}

impl UserRepositoryImpl {
    pub fn new(users: Vec<UserConfig>) -> Self {
        UserRepositoryImpl {
            users: users.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl UserRepository for UserRepositoryImpl {
    async fn get_user(&self, user_name: &str) -> Option<UserInfo> {
        self.users.iter().find(|u| u.user_name == user_name).cloned()
    }

    async fn list_users(&self) -> Vec<UserInfo> {
        self.users.clone()
    }
}
