use std::error::Error as StdError;
use std::fmt::{self, Debug, Display};

const DEFAULT_AZURE_API_VERSION: &str = "2023-05-15";

/// Builder for [`OpenAIConfig`] targeting the OpenAI API or any compatible
/// endpoint.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct OpenAIConfigBuilder {
    api_key: String,
    model: Option<String>,
    base_url: Option<String>,
}

impl OpenAIConfigBuilder {
    /// Creates a builder with the given API key.
    #[inline]
    pub fn with_api_key<S: Into<String>>(api_key: S) -> Self {
        Self {
            api_key: api_key.into(),
            model: None,
            base_url: None,
        }
    }

    /// Sets the model to use.
    #[inline]
    pub fn with_model<S: Into<String>>(mut self, model: S) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Sets a custom base URL.
    #[inline]
    pub fn with_base_url<S: Into<String>>(mut self, base_url: S) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Builds the configuration.
    #[inline]
    pub fn build(self) -> OpenAIConfig {
        let base_url = self
            .base_url
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        OpenAIConfig {
            api_key: self.api_key,
            model: self.model.unwrap_or_else(|| "gpt-4o".to_string()),
            base_url: base_url.trim_end_matches('/').to_owned(),
            auth: AuthStyle::Bearer,
            api_version: None,
        }
    }
}

impl Debug for OpenAIConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAIConfigBuilder")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Builder for [`OpenAIConfig`] targeting an Azure OpenAI deployment.
///
/// Requests are sent to
/// `{api_base}/openai/deployments/{deployment_name}/chat/completions`
/// with the `api-version` query parameter and the `api-key` header.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct AzureConfigBuilder {
    api_key: String,
    api_base: String,
    api_version: Option<String>,
    deployment_name: String,
    model_name: String,
}

impl AzureConfigBuilder {
    /// Creates a builder with the given API key.
    #[inline]
    pub fn with_api_key<S: Into<String>>(api_key: S) -> Self {
        Self {
            api_key: api_key.into(),
            ..Default::default()
        }
    }

    /// Sets the resource endpoint, e.g. `https://foo.openai.azure.com`.
    #[inline]
    pub fn with_api_base<S: Into<String>>(mut self, api_base: S) -> Self {
        self.api_base = api_base.into();
        self
    }

    /// Sets the API version. Defaults to `2023-05-15`.
    #[inline]
    pub fn with_api_version<S: Into<String>>(mut self, version: S) -> Self {
        self.api_version = Some(version.into());
        self
    }

    /// Sets the deployment name chosen when the model was deployed.
    #[inline]
    pub fn with_deployment_name<S: Into<String>>(mut self, name: S) -> Self {
        self.deployment_name = name.into();
        self
    }

    /// Sets the chat model name of the deployment.
    #[inline]
    pub fn with_model_name<S: Into<String>>(mut self, name: S) -> Self {
        self.model_name = name.into();
        self
    }

    /// Builds the configuration.
    ///
    /// Fails if any of the API key, endpoint, deployment name or model name
    /// is missing.
    pub fn build(self) -> Result<OpenAIConfig, ConfigError> {
        if self.api_key.is_empty() {
            return Err(ConfigError::missing("AZURE_OPENAI_API_KEY"));
        }
        if self.api_base.is_empty() {
            return Err(ConfigError::missing("AZURE_OPENAI_API_BASE"));
        }
        if self.deployment_name.is_empty() {
            return Err(ConfigError::missing("AZURE_OPENAI_DEPLOYMENT_NAME"));
        }
        if self.model_name.is_empty() {
            return Err(ConfigError::missing("AZURE_OPENAI_MODEL_NAME"));
        }
        let base_url = format!(
            "{}/openai/deployments/{}",
            self.api_base.trim_end_matches('/'),
            self.deployment_name
        );
        Ok(OpenAIConfig {
            api_key: self.api_key,
            model: self.model_name,
            base_url,
            auth: AuthStyle::ApiKeyHeader,
            api_version: Some(
                self.api_version
                    .unwrap_or_else(|| DEFAULT_AZURE_API_VERSION.to_owned()),
            ),
        })
    }
}

impl Debug for AzureConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureConfigBuilder")
            .field("api_key", &"<redacted>")
            .field("api_base", &self.api_base)
            .field("api_version", &self.api_version)
            .field("deployment_name", &self.deployment_name)
            .field("model_name", &self.model_name)
            .finish()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum AuthStyle {
    /// `Authorization: Bearer <key>`
    Bearer,
    /// `api-key: <key>`
    ApiKeyHeader,
}

/// Configuration for the OpenAI-compatible provider.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct OpenAIConfig {
    pub(crate) api_key: String,
    pub(crate) model: String,
    pub(crate) base_url: String,
    pub(crate) auth: AuthStyle,
    pub(crate) api_version: Option<String>,
}

impl OpenAIConfig {
    /// Returns the model name sent with each request.
    #[inline]
    pub fn model(&self) -> &str {
        &self.model
    }

    pub(crate) fn completions_url(&self) -> String {
        match &self.api_version {
            Some(version) => format!(
                "{}/chat/completions?api-version={version}",
                self.base_url
            ),
            None => format!("{}/chat/completions", self.base_url),
        }
    }
}

impl Debug for OpenAIConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAIConfig")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("auth", &self.auth)
            .field("api_version", &self.api_version)
            .finish()
    }
}

/// A configuration value is missing or invalid.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigError {
    variable: &'static str,
}

impl ConfigError {
    #[inline]
    fn missing(variable: &'static str) -> Self {
        Self { variable }
    }

    /// Returns the environment variable that should be set.
    #[inline]
    pub fn variable(&self) -> &'static str {
        self.variable
    }
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} is not set", self.variable)
    }
}

impl StdError for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openai_url() {
        let config = OpenAIConfigBuilder::with_api_key("xxx")
            .with_base_url("http://localhost:8080/v1/")
            .build();
        assert_eq!(
            config.completions_url(),
            "http://localhost:8080/v1/chat/completions"
        );
        assert_eq!(config.auth, AuthStyle::Bearer);
    }

    #[test]
    fn test_azure_url() {
        let config = AzureConfigBuilder::with_api_key("xxx")
            .with_api_base("https://foo.openai.azure.com/")
            .with_deployment_name("gpt4-deploy")
            .with_model_name("gpt-4")
            .build()
            .unwrap();
        assert_eq!(
            config.completions_url(),
            "https://foo.openai.azure.com/openai/deployments/gpt4-deploy\
             /chat/completions?api-version=2023-05-15"
        );
        assert_eq!(config.model(), "gpt-4");
        assert_eq!(config.auth, AuthStyle::ApiKeyHeader);
    }

    #[test]
    fn test_azure_missing_deployment() {
        let err = AzureConfigBuilder::with_api_key("xxx")
            .with_api_base("https://foo.openai.azure.com")
            .with_model_name("gpt-4")
            .build()
            .unwrap_err();
        assert_eq!(err.variable(), "AZURE_OPENAI_DEPLOYMENT_NAME");
    }

    #[test]
    fn test_debug_redacts_key() {
        let config = OpenAIConfigBuilder::with_api_key("sk-secret").build();
        assert!(!format!("{config:?}").contains("sk-secret"));
    }
}
