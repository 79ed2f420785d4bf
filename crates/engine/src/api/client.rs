use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;

use parlance_shared::{Conversation, ConversationPatch, ConversationWithMessages, NewConversation};

use super::types::{
    CreateConversationRequest, ErrorBody, GenerateTitleRequest, GenerateTitleResponse,
    SystemPromptRequest,
};
use crate::auth::AuthContext;
use crate::config::ApiConfig;
use crate::error::{ChatError, ChatResult};

pub(crate) const CONVERSATIONS: &str = "/chat/conversations";

/// REST client for everything except the streaming send.
#[derive(Clone, Debug)]
pub struct ApiClient {
    client: reqwest::Client,
    config: ApiConfig,
    auth: AuthContext,
}

impl ApiClient {
    pub fn new(config: ApiConfig, auth: AuthContext) -> ChatResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .cookie_store(true)
            .build()?;

        Ok(Self {
            client,
            config,
            auth,
        })
    }

    pub fn auth(&self) -> &AuthContext {
        &self.auth
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    pub async fn list_conversations(&self) -> ChatResult<Vec<Conversation>> {
        self.send(self.request(Method::GET, CONVERSATIONS)).await
    }

    pub async fn get_conversation(&self, id: &str) -> ChatResult<ConversationWithMessages> {
        let path = format!("{CONVERSATIONS}/{id}");
        self.send(self.request(Method::GET, &path)).await
    }

    pub async fn create_conversation(&self, title: Option<&str>) -> ChatResult<Conversation> {
        let request = self
            .request(Method::POST, CONVERSATIONS)
            .json(&CreateConversationRequest { title });
        self.send(request).await
    }

    pub async fn create_with_message(&self, params: &NewConversation) -> ChatResult<Conversation> {
        let path = format!("{CONVERSATIONS}/with-message");
        self.send(self.request(Method::POST, &path).json(params)).await
    }

    pub async fn update_conversation(
        &self,
        id: &str,
        patch: &ConversationPatch,
    ) -> ChatResult<Conversation> {
        let path = format!("{CONVERSATIONS}/{id}");
        self.send(self.request(Method::PATCH, &path).json(patch)).await
    }

    pub async fn update_system_prompt(
        &self,
        id: &str,
        system_prompt: &str,
    ) -> ChatResult<Conversation> {
        let path = format!("{CONVERSATIONS}/{id}/system-prompt");
        let request = self
            .request(Method::PATCH, &path)
            .json(&SystemPromptRequest { system_prompt });
        self.send(request).await
    }

    pub async fn delete_conversation(&self, id: &str) -> ChatResult<()> {
        let path = format!("{CONVERSATIONS}/{id}");
        self.execute(self.request(Method::DELETE, &path)).await?;
        Ok(())
    }

    pub async fn generate_title(&self, id: &str, message: &str) -> ChatResult<String> {
        let path = format!("{CONVERSATIONS}/{id}/generate-title");
        let request = self
            .request(Method::POST, &path)
            .json(&GenerateTitleRequest { message });
        let response: GenerateTitleResponse = self.send(request).await?;
        Ok(response.title)
    }

    pub(super) fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.client.request(method, self.config.url(path));
        match self.auth.token() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    pub(super) async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> ChatResult<T> {
        let response = self.execute(request).await?;
        Ok(response.json::<T>().await?)
    }

    async fn execute(&self, request: RequestBuilder) -> ChatResult<Response> {
        let response = request.send().await?;
        error_for_status(response, Some(&self.auth)).await
    }
}

/// Turn a non-2xx response into a `ChatError`.
///
/// With an auth context, a 401 clears the session and becomes
/// `ChatError::Unauthorized`; without one it is reported like any other
/// status (login uses this so bad credentials read as such).
pub(crate) async fn error_for_status(
    response: Response,
    auth: Option<&AuthContext>,
) -> ChatResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == StatusCode::UNAUTHORIZED {
        if let Some(auth) = auth {
            tracing::warn!(url = %response.url(), "request rejected with 401, clearing session");
            auth.clear();
            return Err(ChatError::Unauthorized);
        }
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .ok()
        .and_then(ErrorBody::into_message)
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        });

    Err(ChatError::transport(Some(status), message))
}
