use serde::{Deserialize, Deserializer, Serialize};

/// Header carrying the tenant credential, both inbound and towards the listing API.
pub const API_KEY_HEADER: &str = "X-C3-API-KEY";

const RUNNING_STATUS: &str = "running";

/// A backend node as reported by the workload listing API.
///
/// Missing or `null` fields decode to their zero value, so one incomplete
/// record never fails the whole listing.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct Workload {
    // seconds since 1970-01-01 00:00:00 UTC
    #[serde(deserialize_with = "null_as_default")]
    pub created: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub expires: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub node: String,
    #[serde(deserialize_with = "null_as_default")]
    pub running: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub status: String,
    #[serde(rename = "type", deserialize_with = "null_as_default")]
    pub kind: String,
    #[serde(deserialize_with = "null_as_default")]
    pub workload: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl Workload {
    /// Only workloads that are flagged running *and* report a running status
    /// can receive traffic.
    pub fn is_running(&self) -> bool {
        self.running && self.status == RUNNING_STATUS
    }

    pub fn tags(&self) -> &[String] {
        self.tags.as_deref().unwrap_or_default()
    }
}

/// Shortens a tenant credential for logging.
pub fn redact(api_key: &str) -> String {
    match api_key.get(..8) {
        Some(prefix) if api_key.len() > 8 => format!("{prefix}..."),
        _ => "***".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_listing_record() {
        let json = r#"{
            "created": 1717000000,
            "expires": 1717003600,
            "node": "node-1.example.com",
            "running": true,
            "status": "running",
            "type": "gpu",
            "workload": "wl-1",
            "tags": ["llm", "a100"]
        }"#;

        let workload: Workload = serde_json::from_str(json).unwrap();
        assert_eq!(workload.node, "node-1.example.com");
        assert_eq!(workload.kind, "gpu");
        assert_eq!(workload.tags(), ["llm", "a100"]);
        assert!(workload.is_running());
    }

    #[test]
    fn test_missing_tags() {
        let json = r#"{"node": "n", "running": true, "status": "starting", "workload": "w"}"#;
        let workload: Workload = serde_json::from_str(json).unwrap();
        assert!(workload.tags().is_empty());
        // running flag alone is not enough
        assert!(!workload.is_running());

        let serialized = serde_json::to_value(&workload).unwrap();
        assert!(serialized.get("tags").is_none());
        assert_eq!(serialized["type"], "");
    }

    #[test]
    fn test_null_and_missing_fields() {
        let json = r#"[
            {"node": "node-a", "running": true, "status": "running", "tags": ["t"]},
            {"node": "node-b", "running": null, "status": null, "type": null, "tags": null}
        ]"#;
        let workloads: Vec<Workload> = serde_json::from_str(json).unwrap();
        assert_eq!(workloads.len(), 2);
        assert!(workloads[0].is_running());
        assert_eq!(workloads[0].workload, "");
        assert_eq!(workloads[0].created, 0);

        assert_eq!(workloads[1].node, "node-b");
        assert!(!workloads[1].running);
        assert_eq!(workloads[1].status, "");
        assert!(workloads[1].tags().is_empty());

        let listing: Option<Vec<Workload>> = serde_json::from_str("null").unwrap();
        assert!(listing.unwrap_or_default().is_empty());
    }

    #[test]
    fn test_redact() {
        assert_eq!(redact("abcdefghijklmnop"), "abcdefgh...");
        assert_eq!(redact("short"), "***");
        assert_eq!(redact("exactly8"), "***");
    }
}
