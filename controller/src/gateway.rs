use std::time::Duration;

use async_trait::async_trait;
use perfektday_common::config::GatewayConfig;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("gateway answered {status} for {url}")]
    Status {
        status: reqwest::StatusCode,
        url: String,
    },
    #[error("group does not report attribute {0:?}")]
    MissingAttribute(String),
    #[error("attribute {attribute:?} has unusable value {value}")]
    InvalidValue { attribute: String, value: Value },
}

/// The lighting bridge, addressed through one configured group.
#[async_trait]
pub trait ActuatorGateway: Send + Sync {
    async fn set_attribute(&self, name: &str, value: Value) -> Result<(), GatewayError> {
        let mut body = serde_json::Map::new();
        body.insert(name.to_string(), value);
        self.set_raw(Value::Object(body)).await
    }

    async fn set_raw(&self, body: Value) -> Result<(), GatewayError>;

    async fn get_attribute(&self, name: &str) -> Result<u16, GatewayError>;

    async fn enable_pairing(&self, duration_secs: u16) -> Result<(), GatewayError>;
}

/// deCONZ REST client.
pub struct DeconzGateway {
    client: reqwest::Client,
    api_base: String,
    group: String,
}

impl DeconzGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;

        Ok(Self {
            client,
            api_base: format!(
                "http://{}:{}/api/{}",
                config.host, config.port, config.api_key
            ),
            group: config.group.clone(),
        })
    }

    fn group_url(&self) -> String {
        format!("{}/groups/{}", self.api_base, self.group)
    }

    async fn put(&self, url: String, body: &Value) -> Result<(), GatewayError> {
        debug!("gateway PUT {url} {body}");
        let response = self.client.put(&url).json(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Status { status, url });
        }
        Ok(())
    }
}

#[async_trait]
impl ActuatorGateway for DeconzGateway {
    async fn set_raw(&self, body: Value) -> Result<(), GatewayError> {
        self.put(format!("{}/action", self.group_url()), &body).await
    }

    async fn get_attribute(&self, name: &str) -> Result<u16, GatewayError> {
        let url = self.group_url();
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Status { status, url });
        }
        let group: Value = response.json().await?;
        action_attribute(&group, name)
    }

    async fn enable_pairing(&self, duration_secs: u16) -> Result<(), GatewayError> {
        let url = format!("{}/config", self.api_base);
        self.put(url, &json!({ "permitjoin": duration_secs })).await
    }
}

/// Picks `action.<name>` out of a group document.
pub fn action_attribute(group: &Value, name: &str) -> Result<u16, GatewayError> {
    let value = group
        .get("action")
        .and_then(|action| action.get(name))
        .ok_or_else(|| GatewayError::MissingAttribute(name.to_string()))?;

    value
        .as_u64()
        .and_then(|raw| u16::try_from(raw).ok())
        .ok_or_else(|| GatewayError::InvalidValue {
            attribute: name.to_string(),
            value: value.clone(),
        })
}

/// Body of the combined colour-temperature and brightness write.
pub fn push_body(mired: u16, bri: u8) -> Value {
    json!({ "ct": mired, "bri": bri })
}
