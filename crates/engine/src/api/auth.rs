use reqwest::Method;

use parlance_shared::{AuthResponse, Credentials, User};

use super::client::{ApiClient, error_for_status};
use crate::auth::validate_credentials;
use crate::error::{ChatError, ChatResult};

impl ApiClient {
    pub async fn login(&self, credentials: &Credentials) -> ChatResult<User> {
        self.authenticate("/auth/login", credentials).await
    }

    pub async fn register(&self, credentials: &Credentials) -> ChatResult<User> {
        self.authenticate("/auth/register", credentials).await
    }

    /// Ends the session on the server. The local session is cleared whether
    /// or not the call succeeds.
    pub async fn logout(&self) -> ChatResult<()> {
        let result = async {
            let response = self.request(Method::POST, "/auth/logout").send().await?;
            error_for_status(response, None).await?;
            Ok::<(), ChatError>(())
        }
        .await;

        self.auth().clear();
        result
    }

    async fn authenticate(&self, path: &str, credentials: &Credentials) -> ChatResult<User> {
        validate_credentials(credentials)?;

        let response = self.request(Method::POST, path).json(credentials).send().await?;
        let response = error_for_status(response, None).await?;
        let auth: AuthResponse = response.json().await?;

        self.auth().establish(&auth);
        tracing::info!(user = %auth.user.email, "signed in");
        Ok(auth.user)
    }
}
