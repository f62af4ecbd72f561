// classifier.rs - Response Classification
// Purpose: Decide whether a successful probe is a genuine hit and extract
//          structured storage fields from it.
// Strategies:
//  - DNS: any resolved A record is a hit
//  - HTTP content: blob container URLs embedded in a page body
//  - Listing: blobs enumerated in an EnumerationResults XML document

use crate::candidates::Candidate;
use crate::dns_probe::DnsAnswer;
use crate::errors::ProbeError;
use crate::http_probe::HttpPayload;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use url::Url;

lazy_static! {
    pub static ref RE_BLOB_CONTAINER_URL: Regex = Regex::new(
        r"https://(?P<storageacc>[0-9a-z]{3,24})\.blob\.core\.windows\.net/(?P<container>[0-9a-z\-_$]{3,63})/"
    )
    .unwrap();
}

/// Record texts some resolvers return in place of a real answer
const DNS_SENTINELS: &[&str] = &["communications error", "warning"];

/// A confirmed, classified positive result
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Hit {
    /// Group key: service id for DNS hits, endpoint (or endpoint/container
    /// for blobs) for storage hits
    pub service_id: String,
    /// Dedup key within the group
    pub value: String,
    pub endpoint: Option<String>,
    pub storage_account: Option<String>,
    pub container: Option<String>,
    pub blob_name: Option<String>,
    pub version_id: Option<String>,
    pub content_type: Option<String>,
}

impl Hit {
    pub fn subdomain(service_id: &str, name: &str) -> Self {
        Self {
            service_id: service_id.to_string(),
            value: name.to_string(),
            ..Self::default()
        }
    }

    /// A public container rooted at `https://{endpoint}/{container}`
    pub fn container(value: &str, endpoint: &str, container: &str) -> Self {
        Self {
            service_id: endpoint.to_string(),
            value: value.to_string(),
            endpoint: Some(endpoint.to_string()),
            storage_account: Some(storage_account_of(endpoint)),
            container: Some(container.to_string()),
            ..Self::default()
        }
    }
}

/// First label of a storage endpoint host
pub fn storage_account_of(endpoint: &str) -> String {
    endpoint.split('.').next().unwrap_or_default().to_string()
}

// ═══════════════════════════════════════════════════════════════════
// DNS
// ═══════════════════════════════════════════════════════════════════

pub fn classify_dns(candidate: &Candidate, answer: &DnsAnswer) -> Option<Hit> {
    let first = answer.records.first()?;
    let lowered = first.to_lowercase();
    if DNS_SENTINELS.iter().any(|s| lowered.contains(s)) {
        return None;
    }
    Some(Hit::subdomain(&candidate.group, &candidate.name))
}

// ═══════════════════════════════════════════════════════════════════
// HTTP CONTENT
// ═══════════════════════════════════════════════════════════════════

/// Extract every unique blob container URL from a page body
pub fn classify_content(body: &str) -> Vec<Hit> {
    let mut seen = HashSet::new();
    let mut hits = Vec::new();

    for cap in RE_BLOB_CONTAINER_URL.captures_iter(body) {
        let (Some(full), Some(account), Some(container)) =
            (cap.get(0), cap.name("storageacc"), cap.name("container"))
        else {
            continue;
        };

        if !seen.insert(full.as_str()) {
            continue;
        }

        let endpoint = format!("{}.blob.core.windows.net", account.as_str());
        hits.push(Hit::container(full.as_str(), &endpoint, container.as_str()));
    }

    hits
}

/// Header hints that the responder is blob storage. Informational only.
pub fn storage_signals(payload: &HttpPayload) -> Vec<String> {
    let mut signals = Vec::new();
    if let Some(server) = payload.header("server") {
        if server.contains("Windows-Azure-Blob") {
            signals.push(format!("Server: {}", server));
        }
    }
    if let Some(blob_type) = payload.header("x-ms-blob-type") {
        signals.push(format!("x-ms-blob-type: {}", blob_type));
    }
    signals
}

// ═══════════════════════════════════════════════════════════════════
// CONTAINER LISTING
// ═══════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
struct EnumerationResults {
    #[serde(rename = "@ServiceEndpoint", default)]
    service_endpoint: Option<String>,
    #[serde(rename = "@ContainerName", default)]
    container_name: Option<String>,
    #[serde(rename = "Blobs", default)]
    blobs: BlobList,
    #[serde(rename = "NextMarker", default)]
    next_marker: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct BlobList {
    #[serde(rename = "Blob", default)]
    blob: Vec<BlobEntry>,
}

#[derive(Debug, Deserialize)]
struct BlobEntry {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "VersionId", default)]
    version_id: Option<String>,
    #[serde(rename = "Properties", default)]
    properties: BlobProperties,
}

#[derive(Debug, Default, Deserialize)]
struct BlobProperties {
    #[serde(rename = "Content-Type", default)]
    content_type: Option<String>,
}

/// One page of a container listing
#[derive(Debug, Default)]
pub struct ContainerListing {
    /// Endpoint and container as reported by the listing, falling back to
    /// the probed values
    pub endpoint: String,
    pub container: String,
    pub hits: Vec<Hit>,
    /// Continuation token for the next page, if any
    pub next_marker: Option<String>,
}

/// Parse an EnumerationResults document into blob hits
pub fn classify_listing(endpoint: &str, container: &str, xml: &str) -> Result<ContainerListing, ProbeError> {
    let xml = xml.trim_start_matches('\u{feff}');
    let parsed: EnumerationResults =
        quick_xml::de::from_str(xml).map_err(|e| ProbeError::Malformed(e.to_string()))?;

    let endpoint = parsed
        .service_endpoint
        .as_deref()
        .and_then(|e| crate::candidates::normalize_endpoint(e).ok())
        .unwrap_or_else(|| endpoint.to_string());
    let container = parsed
        .container_name
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| container.to_string());
    let group = format!("{}/{}", endpoint, container);

    let hits = parsed
        .blobs
        .blob
        .into_iter()
        .map(|blob| {
            let version_id = blob.version_id.filter(|v| !v.is_empty());
            let value = blob_url(&endpoint, &container, &blob.name, version_id.as_deref());
            Hit {
                service_id: group.clone(),
                value,
                endpoint: Some(endpoint.clone()),
                storage_account: Some(storage_account_of(&endpoint)),
                container: Some(container.clone()),
                blob_name: Some(blob.name),
                version_id,
                content_type: blob.properties.content_type.filter(|c| !c.is_empty()),
            }
        })
        .collect();

    Ok(ContainerListing {
        endpoint,
        container,
        hits,
        next_marker: parsed.next_marker.filter(|m| !m.trim().is_empty()),
    })
}

/// `https://{endpoint}/{container}/{name}[?versionid=..]` with each path
/// segment percent-encoded
pub fn blob_url(endpoint: &str, container: &str, name: &str, version_id: Option<&str>) -> String {
    let Ok(mut url) = Url::parse(&format!("https://{}/", endpoint)) else {
        return format!("https://{}/{}/{}", endpoint, container, name);
    };
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.pop_if_empty().push(container).extend(name.split('/'));
    }
    if let Some(version) = version_id {
        url.query_pairs_mut().append_pair("versionid", version);
    }
    url.to_string()
}
