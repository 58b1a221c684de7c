use super::{
    InstanceLookup,
    Reservation,
};
use crate::error::LookupError;
use reqwest::StatusCode;
use serde::{
    Deserialize,
    Serialize,
};
use std::time::Duration;

/// Request payload, mirroring the describe-instances api.
#[derive(Debug, Serialize)]
struct DescribeInstancesRequest<'a> {
    #[serde(rename = "InstanceIds")]
    instance_ids: &'a [String],
}

#[derive(Debug, Deserialize)]
struct DescribeInstancesResponse {
    #[serde(rename = "Reservations", default)]
    reservations: Vec<Reservation>,
}

/// Looks up instances by POSTing their ids as JSON to an http endpoint.
///
/// Credentials and request signing are the endpoint's business, this only attaches an optional bearer token.
#[derive(Clone)]
pub struct HttpLookup {
    client: reqwest::Client,
    endpoint: String,
    api_token: Option<String>,
}

impl HttpLookup {
    /// `timeout` bounds every call so a hung endpoint fails the batch instead of stalling it.
    pub fn new(endpoint: impl ToString, api_token: Option<String>, timeout: Duration) -> Result<Self, LookupError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            api_token,
        })
    }
}

impl InstanceLookup for HttpLookup {
    async fn describe_instances(&self, instance_ids: &[String]) -> Result<Vec<Reservation>, LookupError> {
        trace!(endpoint = %self.endpoint, count = instance_ids.len(), "describe instances");

        let req = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .json(&DescribeInstancesRequest { instance_ids });

        let req = if let Some(token) = &self.api_token {
            req.bearer_auth(token)
        } else {
            req
        };

        let res = req.send().await?;

        let status = res.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(LookupError::Throttled);
        }
        if !status.is_success() {
            return Err(LookupError::Status {
                status,
                body: res.text().await?,
            });
        }

        let body = res.text().await?;
        let body: DescribeInstancesResponse =
            serde_json::from_str(&body).map_err(|err| LookupError::Parse(format!("{err}: {body}")))?;

        Ok(body.reservations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_uses_api_field_names() {
        let ids = vec!["i-1".to_string(), "i-2".to_string()];
        let json = serde_json::to_value(DescribeInstancesRequest { instance_ids: &ids }).unwrap();
        assert_eq!(json, serde_json::json!({"InstanceIds": ["i-1", "i-2"]}));
    }

    #[test]
    fn missing_reservations_is_empty() {
        let body: DescribeInstancesResponse = serde_json::from_str("{}").unwrap();
        assert!(body.reservations.is_empty());
    }
}
