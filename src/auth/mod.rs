// Copyright (C) 2025 Category Labs, Inc.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

pub mod sigv4;

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{errors::CredentialError, prelude::*};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
    pub session_token: Option<String>,
}

/// Source of signing credentials.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Returns the current credentials, or [`CredentialError::NotFound`]
    /// when the provider has none to offer.
    async fn credentials(&self) -> Result<Credentials, CredentialError>;
}

/// Sources `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY` /
/// `AWS_SESSION_TOKEN` from the process environment.
#[derive(Debug, Default)]
pub struct EnvCredentialProvider;

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

#[async_trait]
impl CredentialProvider for EnvCredentialProvider {
    async fn credentials(&self) -> Result<Credentials, CredentialError> {
        match (
            non_empty_env("AWS_ACCESS_KEY_ID"),
            non_empty_env("AWS_SECRET_ACCESS_KEY"),
        ) {
            (Some(access_key), Some(secret_key)) => Ok(Credentials {
                access_key,
                secret_key,
                session_token: non_empty_env("AWS_SESSION_TOKEN"),
            }),
            _ => Err(CredentialError::NotFound),
        }
    }
}

/// Reads a named profile from the shared credentials file
/// (`~/.aws/credentials`, overridable via `AWS_SHARED_CREDENTIALS_FILE`).
#[derive(Debug)]
pub struct SharedFileCredentialProvider {
    profile: String,
}

impl SharedFileCredentialProvider {
    pub fn new(profile: impl Into<String>) -> Self {
        Self {
            profile: profile.into(),
        }
    }

    fn credentials_path() -> Option<PathBuf> {
        if let Some(path) = non_empty_env("AWS_SHARED_CREDENTIALS_FILE") {
            return Some(PathBuf::from(path));
        }
        non_empty_env("HOME").map(|home| PathBuf::from(home).join(".aws").join("credentials"))
    }

    fn parse(contents: &str, profile: &str) -> Option<Credentials> {
        let mut in_profile = false;
        let mut access_key = None;
        let mut secret_key = None;
        let mut session_token = None;
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if let Some(section) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                in_profile = section.trim() == profile;
                continue;
            }
            if !in_profile {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim().to_string();
            match key.trim() {
                "aws_access_key_id" => access_key = Some(value),
                "aws_secret_access_key" => secret_key = Some(value),
                "aws_session_token" => session_token = Some(value),
                _ => {}
            }
        }
        Some(Credentials {
            access_key: access_key?,
            secret_key: secret_key?,
            session_token,
        })
    }
}

#[async_trait]
impl CredentialProvider for SharedFileCredentialProvider {
    async fn credentials(&self) -> Result<Credentials, CredentialError> {
        let Some(path) = Self::credentials_path() else {
            return Err(CredentialError::NotFound);
        };
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CredentialError::NotFound)
            }
            Err(e) => {
                return Err(CredentialError::Provider {
                    source: Box::new(e),
                })
            }
        };
        Self::parse(&contents, &self.profile).ok_or(CredentialError::NotFound)
    }
}

/// Lazily constructs the provider for a profile on first use and caches it.
/// A NotFound during construction is memoized as anonymous mode, so requests
/// proceed unsigned from then on.
pub struct CredentialCache {
    profile: String,
    // outer None: not yet constructed; inner None: anonymous mode
    state: Mutex<Option<Option<Arc<dyn CredentialProvider>>>>,
}

impl CredentialCache {
    pub fn new(profile: impl Into<String>) -> Self {
        Self {
            profile: profile.into(),
            state: Mutex::new(None),
        }
    }

    /// Pre-populates the cache with a fixed provider; used by tests and by
    /// embedders with out-of-band credential management.
    pub fn with_provider(provider: Arc<dyn CredentialProvider>) -> Self {
        Self {
            profile: String::new(),
            state: Mutex::new(Some(Some(provider))),
        }
    }

    /// `Ok(None)` means anonymous access.
    pub async fn get(&self) -> Result<Option<Credentials>, CredentialError> {
        let provider = {
            let mut state = self.state.lock().await;
            if state.is_none() {
                *state = Some(match Self::construct(&self.profile).await {
                    Ok(provider) => {
                        debug!(profile = %self.profile, "constructed credential provider");
                        Some(provider)
                    }
                    Err(CredentialError::NotFound) => {
                        debug!(profile = %self.profile, "no credentials found, using anonymous access");
                        None
                    }
                    Err(e) => return Err(e),
                });
            }
            match state.as_ref().and_then(|inner| inner.as_ref()) {
                Some(provider) => provider.clone(),
                None => return Ok(None),
            }
        };
        match provider.credentials().await {
            Ok(credentials) => Ok(Some(credentials)),
            Err(CredentialError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn construct(profile: &str) -> Result<Arc<dyn CredentialProvider>, CredentialError> {
        // the environment wins for the default profile; named profiles go
        // straight to the shared file
        if profile == "default" && EnvCredentialProvider.credentials().await.is_ok() {
            return Ok(Arc::new(EnvCredentialProvider));
        }
        let provider = SharedFileCredentialProvider::new(profile);
        provider.credentials().await?;
        Ok(Arc::new(provider))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FILE: &str = "\
# comment
[default]
aws_access_key_id = AKID_DEFAULT
aws_secret_access_key = SECRET_DEFAULT

[other]
aws_access_key_id=AKID_OTHER
aws_secret_access_key=SECRET_OTHER
aws_session_token=TOKEN_OTHER
";

    #[test]
    fn parses_profiles() {
        let creds = SharedFileCredentialProvider::parse(FILE, "default").unwrap();
        assert_eq!(creds.access_key, "AKID_DEFAULT");
        assert_eq!(creds.secret_key, "SECRET_DEFAULT");
        assert_eq!(creds.session_token, None);

        let creds = SharedFileCredentialProvider::parse(FILE, "other").unwrap();
        assert_eq!(creds.access_key, "AKID_OTHER");
        assert_eq!(creds.session_token.as_deref(), Some("TOKEN_OTHER"));

        assert!(SharedFileCredentialProvider::parse(FILE, "missing").is_none());
    }

    struct Fixed(Credentials);

    #[async_trait]
    impl CredentialProvider for Fixed {
        async fn credentials(&self) -> Result<Credentials, CredentialError> {
            Ok(self.0.clone())
        }
    }

    struct Absent;

    #[async_trait]
    impl CredentialProvider for Absent {
        async fn credentials(&self) -> Result<Credentials, CredentialError> {
            Err(CredentialError::NotFound)
        }
    }

    #[tokio::test]
    async fn cache_serves_fixed_provider() {
        let cache = CredentialCache::with_provider(Arc::new(Fixed(Credentials {
            access_key: "AKID".into(),
            secret_key: "SECRET".into(),
            session_token: None,
        })));
        let creds = cache.get().await.unwrap().unwrap();
        assert_eq!(creds.access_key, "AKID");
        // second fetch reuses the cached provider
        assert!(cache.get().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn provider_not_found_means_anonymous() {
        let cache = CredentialCache::with_provider(Arc::new(Absent));
        assert!(cache.get().await.unwrap().is_none());
    }
}
