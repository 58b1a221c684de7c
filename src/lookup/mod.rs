//! The remote side of the resolver: something that can describe many instances in one call.

mod fixture;
mod http;

pub use fixture::FixtureLookup;
pub use http::HttpLookup;

use crate::error::LookupError;
use serde::{
    Deserialize,
    Serialize,
};
use std::future::Future;

/// Multi-id instance lookup, such as the cloud provider's describe-instances api.
///
/// Instances that do not exist are omitted from the response rather than reported as errors. Implementations are
/// responsible for their own per-call timeout.
pub trait InstanceLookup: Send + Sync + 'static {
    fn describe_instances(
        &self,
        instance_ids: &[String],
    ) -> impl Future<Output = Result<Vec<Reservation>, LookupError>> + Send;
}

/// A group of instances as returned by the lookup api.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Reservation {
    #[serde(default)]
    pub instances: Vec<Instance>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Instance {
    pub instance_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_dns_name: Option<String>,
}

impl Instance {
    pub fn new(instance_id: impl ToString, private_dns_name: impl ToString) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            private_dns_name: Some(private_dns_name.to_string()),
        }
    }
}

/// Flattens reservations into `(instance id, private dns name)` pairs. A missing name becomes the empty string.
pub fn dns_names(reservations: Vec<Reservation>) -> impl Iterator<Item = (String, String)> {
    reservations
        .into_iter()
        .flat_map(|reservation| reservation.instances)
        .map(|instance| (instance.instance_id, instance.private_dns_name.unwrap_or_default()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_describe_instances_shape() {
        let json = r#"{"Instances": [{"InstanceId": "i-1", "PrivateDnsName": "ip-10-0-0-1"}, {"InstanceId": "i-2"}]}"#;
        let reservation: Reservation = serde_json::from_str(json).unwrap();
        let names: Vec<_> = dns_names(vec![reservation]).collect();
        assert_eq!(
            names,
            vec![
                ("i-1".to_string(), "ip-10-0-0-1".to_string()),
                ("i-2".to_string(), String::new())
            ]
        );
    }
}
