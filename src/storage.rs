// storage.rs - Blob storage probes
// Purpose: Container listing with NextMarker pagination and blob content
//          download, both on top of the storage request profile.

use crate::candidates::Candidate;
use crate::case::safe_blob_path;
use crate::classifier::{Hit, classify_listing};
use crate::config::ProbeConfig;
use crate::csv_input::{BlobRef, ContainerRef};
use crate::errors::{CandidateParseError, ProbeError, SetupError};
use crate::http_probe::{HttpProbe, RequestProfile};
use crate::prober::Probe;
use std::collections::HashSet;
use url::Url;

/// A container that answered the anonymous list call
#[derive(Debug, Clone, Default)]
pub struct ListedContainer {
    /// Probed URL, without the listing query
    pub url: String,
    pub endpoint: String,
    pub container: String,
    pub blobs: Vec<Hit>,
    pub pages: usize,
}

impl ListedContainer {
    /// Aggregator group the blobs of this container belong to
    pub fn group_key(&self) -> String {
        format!("{}/{}", self.endpoint, self.container)
    }
}

/// Lists `{candidate.name}?restype=container&comp=list`, following every
/// NextMarker page. `candidate.group` is the endpoint.
#[derive(Clone)]
pub struct ContainerListingProbe {
    http: HttpProbe,
    include_versions: bool,
}

impl ContainerListingProbe {
    pub fn new(config: &ProbeConfig) -> Result<Self, SetupError> {
        Ok(Self {
            http: HttpProbe::new(config, RequestProfile::Storage)?,
            include_versions: false,
        })
    }

    pub fn with_versions(mut self, include_versions: bool) -> Self {
        self.include_versions = include_versions;
        self
    }

    pub fn page_url(&self, base: &str, marker: Option<&str>) -> Result<String, ProbeError> {
        let mut url = Url::parse(base).map_err(|e| CandidateParseError::InvalidUrl {
            value: base.to_string(),
            reason: e.to_string(),
        })?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("restype", "container").append_pair("comp", "list");
            if self.include_versions {
                query.append_pair("include", "versions");
            }
            if let Some(marker) = marker {
                query.append_pair("marker", marker);
            }
        }
        Ok(url.to_string())
    }
}

impl Probe for ContainerListingProbe {
    type Payload = ListedContainer;

    async fn probe(&self, candidate: &Candidate) -> Result<ListedContainer, ProbeError> {
        let base = candidate.name.trim_end_matches('/');
        let container = container_of(base)?;

        let mut listed = ListedContainer {
            url: base.to_string(),
            endpoint: candidate.group.clone(),
            container: container.clone(),
            ..ListedContainer::default()
        };
        let mut seen_markers = HashSet::new();
        let mut marker: Option<String> = None;

        loop {
            let url = self.page_url(base, marker.as_deref())?;
            let payload = self.http.fetch(&url).await?;
            let page = classify_listing(&candidate.group, &container, &payload.body)?;

            if listed.pages == 0 {
                listed.endpoint = page.endpoint;
                listed.container = page.container;
            }
            listed.pages += 1;
            listed.blobs.extend(page.hits);

            match page.next_marker {
                // A repeated marker would loop forever
                Some(next) if seen_markers.insert(next.clone()) => marker = Some(next),
                _ => break,
            }
        }

        Ok(listed)
    }
}

/// Last non-empty path segment of a container URL
pub fn container_of(url: &str) -> Result<String, CandidateParseError> {
    let parsed = Url::parse(url).map_err(|e| CandidateParseError::InvalidUrl {
        value: url.to_string(),
        reason: e.to_string(),
    })?;
    parsed
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .map(|s| s.to_string())
        .ok_or_else(|| CandidateParseError::InvalidUrl {
            value: url.to_string(),
            reason: "no container in path".to_string(),
        })
}

pub fn listing_candidates(targets: &[ContainerRef]) -> Vec<Candidate> {
    targets
        .iter()
        .enumerate()
        .map(|(i, t)| Candidate::new(t.endpoint.clone(), t.url(), i))
        .collect()
}

// ═══════════════════════════════════════════════════════════════════
// DOWNLOAD
// ═══════════════════════════════════════════════════════════════════

/// Fetches raw blob content from `candidate.name`
#[derive(Clone)]
pub struct BlobFetchProbe {
    http: HttpProbe,
}

impl BlobFetchProbe {
    pub fn new(config: &ProbeConfig) -> Result<Self, SetupError> {
        Ok(Self {
            http: HttpProbe::new(config, RequestProfile::Storage)?,
        })
    }
}

impl Probe for BlobFetchProbe {
    type Payload = Vec<u8>;

    async fn probe(&self, candidate: &Candidate) -> Result<Vec<u8>, ProbeError> {
        self.http.fetch_bytes(&candidate.name).await
    }
}

/// A blob to fetch; `candidate.index` is its position in the target list
#[derive(Debug, Clone)]
pub struct DownloadTarget {
    pub candidate: Candidate,
    pub blob: BlobRef,
}

/// Build download candidates, rejecting names that would escape the case tree
pub fn download_targets(blobs: &[BlobRef]) -> (Vec<DownloadTarget>, Vec<CandidateParseError>) {
    let mut targets = Vec::new();
    let mut rejected = Vec::new();

    for blob in blobs {
        if let Err(e) = safe_blob_path(&blob.blob_name) {
            rejected.push(e);
            continue;
        }
        match blob.url() {
            Ok(url) => {
                let candidate = Candidate::new(blob.container.endpoint.clone(), url, targets.len());
                targets.push(DownloadTarget {
                    candidate,
                    blob: blob.clone(),
                });
            }
            Err(e) => rejected.push(e),
        }
    }

    (targets, rejected)
}
