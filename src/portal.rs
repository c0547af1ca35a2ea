//! Typed client for the portal REST API.

use crate::auth::TokenStore;
use crate::error::PortalError;
use log::{debug, info};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use vpcore::error::AuthorizationError;
use vpcore::net::{HttpClient, HttpRequest, HttpResponse};
use vpcore::portal::{
    API_PREFIX, AccessGrant, AccessRequest, AgentConfig, AgentList, ClearResponse, LlmModel,
    LlmModelInput, LlmProvider, LlmProviderInput, MessageResponse, Otp, OtpCreate, OtpLogin,
    OtpUpdate, PasswordChange, TokenResponse, TrafficList, UsageList,
};

/// Whether a call needs the stored bearer token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Auth {
    Public,
    Bearer,
}

pub struct PortalApi {
    http: Arc<dyn HttpClient>,
    base_url: String,
    tokens: Arc<dyn TokenStore>,
}

impl PortalApi {
    pub fn new(http: Arc<dyn HttpClient>, base_url: &str, tokens: Arc<dyn TokenStore>) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            tokens,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn http_client(&self) -> Arc<dyn HttpClient> {
        self.http.clone()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}{}", self.base_url, API_PREFIX, path)
    }

    /// The stored bearer token, if any.
    pub async fn token(&self) -> Result<Option<String>, PortalError> {
        Ok(self.tokens.load().await?)
    }

    pub async fn is_authenticated(&self) -> bool {
        matches!(self.token().await, Ok(Some(_)))
    }

    async fn require_token(&self) -> Result<String, PortalError> {
        self.token()
            .await?
            .ok_or(PortalError::Authorization(AuthorizationError::NotAuthenticated))
    }

    async fn send(&self, request: HttpRequest, auth: Auth) -> Result<HttpResponse, PortalError> {
        let request = match auth {
            Auth::Public => request,
            Auth::Bearer => request.with_bearer(&self.require_token().await?),
        };
        debug!(target: "Portal", "{} {}", request.method, request.url);
        let response = self.http.execute(request).await?;

        if response.is_success() {
            return Ok(response);
        }
        let detail = response.error_detail();
        Err(match response.status_code {
            401 => AuthorizationError::Rejected {
                status: 401,
                detail,
            }
            .into(),
            status => PortalError::Http { status, detail },
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        request: HttpRequest,
        auth: Auth,
    ) -> Result<T, PortalError> {
        let response = self.send(request, auth).await?;
        Ok(response.parse_json()?)
    }

    async fn call_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        request: HttpRequest,
        body: &B,
        auth: Auth,
    ) -> Result<T, PortalError> {
        self.call(request.with_json(body)?, auth).await
    }

    // Authentication

    /// Admin login. The backend expects an OAuth2 password form.
    pub async fn login_admin(
        &self,
        username: &str,
        password: &str,
    ) -> Result<TokenResponse, PortalError> {
        let form = format!(
            "username={}&password={}",
            urlencoding::encode(username),
            urlencoding::encode(password)
        );
        let request = HttpRequest::post(self.url("/auth/login/admin"))
            .with_header("Content-Type", "application/x-www-form-urlencoded")
            .with_body(form.into_bytes());
        let token: TokenResponse = self.call(request, Auth::Public).await?;
        self.tokens.store(&token.access_token).await?;
        info!(target: "Portal", "Admin {username} logged in");
        Ok(token)
    }

    pub async fn login_otp(&self, otp_code: &str) -> Result<TokenResponse, PortalError> {
        let token: TokenResponse = self
            .call_json(
                HttpRequest::post(self.url("/auth/login/otp")),
                &OtpLogin { otp_code },
                Auth::Public,
            )
            .await?;
        self.tokens.store(&token.access_token).await?;
        info!(
            target: "Portal",
            "OTP login succeeded, remaining uses: {:?}",
            token.remaining_uses
        );
        Ok(token)
    }

    pub async fn change_password(
        &self,
        current_password: &str,
        new_password: &str,
    ) -> Result<MessageResponse, PortalError> {
        self.call_json(
            HttpRequest::put(self.url("/auth/change-password")),
            &PasswordChange {
                current_password,
                new_password,
            },
            Auth::Bearer,
        )
        .await
    }

    /// Forgets the stored token.
    pub async fn logout(&self) -> Result<(), PortalError> {
        self.tokens.clear().await?;
        Ok(())
    }

    // Agents

    pub async fn list_agents(&self, limit: u32, offset: u32) -> Result<AgentList, PortalError> {
        let url = self.url(&format!("/agents/list?limit={limit}&offset={offset}"));
        self.call(HttpRequest::get(url), Auth::Bearer).await
    }

    /// Pre-connect access check. Any 401/403 is a rejected grant.
    pub async fn request_access(&self, agent_type: &str) -> Result<AccessGrant, PortalError> {
        let result = self
            .call_json(
                HttpRequest::post(self.url("/agents/access")),
                &AccessRequest { agent_type },
                Auth::Bearer,
            )
            .await;
        match result {
            Err(PortalError::Http {
                status: 403,
                detail,
            }) => Err(AuthorizationError::Rejected {
                status: 403,
                detail,
            }
            .into()),
            other => other,
        }
    }

    // Admin: agents and system configuration

    pub async fn admin_list_agents(&self) -> Result<serde_json::Value, PortalError> {
        self.call(HttpRequest::get(self.url("/admin/agents/")), Auth::Bearer)
            .await
    }

    pub async fn admin_get_agent(&self, agent_id: &str) -> Result<serde_json::Value, PortalError> {
        let url = self.url(&format!("/admin/agents/{}", urlencoding::encode(agent_id)));
        self.call(HttpRequest::get(url), Auth::Bearer).await
    }

    pub async fn admin_create_agent(
        &self,
        agent: &AgentConfig,
    ) -> Result<serde_json::Value, PortalError> {
        self.call_json(
            HttpRequest::post(self.url("/admin/agents/")),
            agent,
            Auth::Bearer,
        )
        .await
    }

    pub async fn admin_update_agent(
        &self,
        agent_id: &str,
        agent: &AgentConfig,
    ) -> Result<serde_json::Value, PortalError> {
        let url = self.url(&format!("/admin/agents/{}", urlencoding::encode(agent_id)));
        self.call_json(HttpRequest::put(url), agent, Auth::Bearer)
            .await
    }

    pub async fn admin_delete_agent(
        &self,
        agent_id: &str,
    ) -> Result<serde_json::Value, PortalError> {
        let url = self.url(&format!("/admin/agents/{}", urlencoding::encode(agent_id)));
        self.call(HttpRequest::delete(url), Auth::Bearer).await
    }

    pub async fn admin_set_agent_enabled(
        &self,
        agent_id: &str,
        enabled: bool,
    ) -> Result<serde_json::Value, PortalError> {
        let action = if enabled { "enable" } else { "disable" };
        let url = self.url(&format!(
            "/admin/agents/{}/{action}",
            urlencoding::encode(agent_id)
        ));
        self.call(HttpRequest::put(url), Auth::Bearer).await
    }

    /// System configuration: `language_codes`, `model_config`,
    /// `audio_options` and `default_messages`.
    pub async fn get_system_config(&self) -> Result<serde_json::Value, PortalError> {
        self.call(
            HttpRequest::get(self.url("/admin/agents/config/system")),
            Auth::Bearer,
        )
        .await
    }

    pub async fn update_system_config(
        &self,
        config: &serde_json::Value,
    ) -> Result<serde_json::Value, PortalError> {
        self.call_json(
            HttpRequest::put(self.url("/admin/agents/config/system")),
            config,
            Auth::Bearer,
        )
        .await
    }

    // Admin: usage and traffic monitoring

    /// OTP usage records, newest first.
    pub async fn admin_agent_usage(&self, limit: u32, offset: u32) -> Result<UsageList, PortalError> {
        let url = self.url(&format!("/admin/agents/usage?limit={limit}&offset={offset}"));
        self.call(HttpRequest::get(url), Auth::Bearer).await
    }

    pub async fn admin_agent_traffic(
        &self,
        limit: u32,
        offset: u32,
    ) -> Result<TrafficList, PortalError> {
        let url = self.url(&format!("/admin/agents/traffic?limit={limit}&offset={offset}"));
        self.call(HttpRequest::get(url), Auth::Bearer).await
    }

    pub async fn admin_clear_usage(&self) -> Result<ClearResponse, PortalError> {
        let cleared: ClearResponse = self
            .call(
                HttpRequest::delete(self.url("/admin/agents/usage/clear")),
                Auth::Bearer,
            )
            .await?;
        info!(target: "Portal", "Usage records cleared: {}", cleared.message);
        Ok(cleared)
    }

    pub async fn admin_clear_traffic(&self) -> Result<ClearResponse, PortalError> {
        let cleared: ClearResponse = self
            .call(
                HttpRequest::delete(self.url("/admin/agents/traffic/clear")),
                Auth::Bearer,
            )
            .await?;
        info!(target: "Portal", "Traffic records cleared: {}", cleared.message);
        Ok(cleared)
    }

    // OTPs

    pub async fn list_otps(&self) -> Result<Vec<Otp>, PortalError> {
        self.call(HttpRequest::get(self.url("/otps/")), Auth::Bearer)
            .await
    }

    pub async fn create_otps(&self, request: OtpCreate) -> Result<Vec<Otp>, PortalError> {
        self.call_json(HttpRequest::post(self.url("/otps/")), &request, Auth::Bearer)
            .await
    }

    pub async fn update_otp(&self, otp_id: i64, update: OtpUpdate) -> Result<Otp, PortalError> {
        self.call_json(
            HttpRequest::put(self.url(&format!("/otps/{otp_id}"))),
            &update,
            Auth::Bearer,
        )
        .await
    }

    pub async fn delete_otp(&self, otp_id: i64) -> Result<(), PortalError> {
        self.send(
            HttpRequest::delete(self.url(&format!("/otps/{otp_id}"))),
            Auth::Bearer,
        )
        .await?;
        Ok(())
    }

    // LLM providers and models

    pub async fn list_providers(&self) -> Result<Vec<LlmProvider>, PortalError> {
        self.call(
            HttpRequest::get(self.url("/admin/llm/providers")),
            Auth::Bearer,
        )
        .await
    }

    pub async fn get_provider(&self, provider_id: i64) -> Result<LlmProvider, PortalError> {
        self.call(
            HttpRequest::get(self.url(&format!("/admin/llm/providers/{provider_id}"))),
            Auth::Bearer,
        )
        .await
    }

    pub async fn create_provider(
        &self,
        provider: &LlmProviderInput,
    ) -> Result<serde_json::Value, PortalError> {
        self.call_json(
            HttpRequest::post(self.url("/admin/llm/providers")),
            provider,
            Auth::Bearer,
        )
        .await
    }

    pub async fn update_provider(
        &self,
        provider_id: i64,
        provider: &LlmProviderInput,
    ) -> Result<serde_json::Value, PortalError> {
        self.call_json(
            HttpRequest::put(self.url(&format!("/admin/llm/providers/{provider_id}"))),
            provider,
            Auth::Bearer,
        )
        .await
    }

    pub async fn delete_provider(&self, provider_id: i64) -> Result<serde_json::Value, PortalError> {
        self.call(
            HttpRequest::delete(self.url(&format!("/admin/llm/providers/{provider_id}"))),
            Auth::Bearer,
        )
        .await
    }

    pub async fn list_models(&self) -> Result<Vec<LlmModel>, PortalError> {
        self.call(HttpRequest::get(self.url("/admin/llm/models")), Auth::Bearer)
            .await
    }

    pub async fn get_model(&self, model_id: i64) -> Result<LlmModel, PortalError> {
        self.call(
            HttpRequest::get(self.url(&format!("/admin/llm/models/{model_id}"))),
            Auth::Bearer,
        )
        .await
    }

    pub async fn create_model(
        &self,
        model: &LlmModelInput,
    ) -> Result<serde_json::Value, PortalError> {
        self.call_json(
            HttpRequest::post(self.url("/admin/llm/models")),
            model,
            Auth::Bearer,
        )
        .await
    }

    pub async fn update_model(
        &self,
        model_id: i64,
        model: &LlmModelInput,
    ) -> Result<serde_json::Value, PortalError> {
        self.call_json(
            HttpRequest::put(self.url(&format!("/admin/llm/models/{model_id}"))),
            model,
            Auth::Bearer,
        )
        .await
    }

    pub async fn delete_model(&self, model_id: i64) -> Result<serde_json::Value, PortalError> {
        self.call(
            HttpRequest::delete(self.url(&format!("/admin/llm/models/{model_id}"))),
            Auth::Bearer,
        )
        .await
    }
}
