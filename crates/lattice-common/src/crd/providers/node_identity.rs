//! Network node identity configuration

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Admission webhook restricting what each node's credentials may modify
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NodeIdentityConfig {
    /// Deploy the webhook (default: true)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Port the webhook server listens on (default: 9743)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_port: Option<u32>,
}
