// csv_input.rs - CSV target input for the container and blob flows
// Purpose: Resolve each row to a concrete container (and optionally blob)
//          reference at parse time. A header without a usable shape is
//          fatal; a row without one is skipped with a warning.

use crate::candidates::normalize_endpoint;
use crate::errors::{CandidateParseError, SetupError};
use csv::{ReaderBuilder, StringRecord, Trim};
use std::path::Path;
use url::Url;

/// The two accepted row shapes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowShape {
    /// `Value` holds a full container or blob URL
    ByValue(String),
    /// `Endpoint` and `Container` composed as `https://{Endpoint}/{Container}`
    ByEndpointContainer { endpoint: String, container: String },
}

/// A storage container resolved from one row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRef {
    pub endpoint: String,
    pub container: String,
    /// Scheme and authority requests go to; a `Value` URL keeps its own
    pub origin: String,
}

impl ContainerRef {
    pub fn new(endpoint: &str, container: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            container: container.to_string(),
            origin: format!("https://{}", endpoint),
        }
    }

    pub fn url(&self) -> String {
        format!("{}/{}", self.origin, self.container)
    }
}

/// A blob resolved from one row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobRef {
    pub container: ContainerRef,
    pub blob_name: String,
    pub version_id: Option<String>,
}

impl BlobRef {
    /// Download URL with the blob path percent-encoded
    pub fn url(&self) -> Result<String, CandidateParseError> {
        let mut url = Url::parse(&self.container.url()).map_err(|e| CandidateParseError::InvalidUrl {
            value: self.container.url(),
            reason: e.to_string(),
        })?;
        url.path_segments_mut()
            .map_err(|_| CandidateParseError::InvalidUrl {
                value: self.container.url(),
                reason: "cannot be a base".to_string(),
            })?
            .extend(self.blob_name.split('/'));
        if let Some(ref version) = self.version_id {
            url.query_pairs_mut().append_pair("versionid", version);
        }
        Ok(url.to_string())
    }
}

/// Column positions found in the header row
#[derive(Debug, Default)]
struct Columns {
    value: Option<usize>,
    endpoint: Option<usize>,
    container: Option<usize>,
    blob_name: Option<usize>,
    version_id: Option<usize>,
}

impl Columns {
    fn from_headers(headers: &StringRecord) -> Self {
        let find = |name: &str| headers.iter().position(|h| h.eq_ignore_ascii_case(name));
        Self {
            value: find("Value"),
            endpoint: find("Endpoint"),
            container: find("Container"),
            blob_name: find("BlobName"),
            version_id: find("VersionId"),
        }
    }

    fn has_target_shape(&self) -> bool {
        self.value.is_some() || (self.endpoint.is_some() && self.container.is_some())
    }
}

fn cell(record: &StringRecord, idx: Option<usize>) -> Option<&str> {
    idx.and_then(|i| record.get(i)).filter(|v| !v.is_empty())
}

fn shape_of(record: &StringRecord, cols: &Columns, row: usize) -> Result<RowShape, CandidateParseError> {
    if let Some(value) = cell(record, cols.value) {
        return Ok(RowShape::ByValue(value.to_string()));
    }
    match (cell(record, cols.endpoint), cell(record, cols.container)) {
        (Some(endpoint), Some(container)) => Ok(RowShape::ByEndpointContainer {
            endpoint: endpoint.to_string(),
            container: container.to_string(),
        }),
        _ => Err(CandidateParseError::MalformedRow {
            row,
            reason: "neither Value nor Endpoint+Container is set".to_string(),
        }),
    }
}

/// Split a URL into its container and the blob path below it
fn split_url(value: &str) -> Result<(ContainerRef, Option<String>, Option<String>), CandidateParseError> {
    let invalid = |reason: &str| CandidateParseError::InvalidUrl {
        value: value.to_string(),
        reason: reason.to_string(),
    };

    let url = Url::parse(value).map_err(|e| invalid(&e.to_string()))?;
    let endpoint = normalize_endpoint(value)?;
    let mut segments = url
        .path_segments()
        .ok_or_else(|| invalid("no path"))?
        .filter(|s| !s.is_empty());

    let container = segments.next().ok_or_else(|| invalid("no container in path"))?.to_string();
    let rest: Vec<String> = segments.map(percent_decode).collect();
    let blob = if rest.is_empty() { None } else { Some(rest.join("/")) };
    let version = url
        .query_pairs()
        .find(|(k, _)| k.eq_ignore_ascii_case("versionid"))
        .map(|(_, v)| v.into_owned());

    let origin = url.origin().ascii_serialization();
    Ok((
        ContainerRef {
            endpoint,
            container,
            origin,
        },
        blob,
        version,
    ))
}

fn percent_decode(segment: &str) -> String {
    let escaped = segment.replace('+', "%2B").replace('&', "%26");
    url::form_urlencoded::parse(format!("x={}", escaped).as_bytes())
        .next()
        .map(|(_, v)| v.into_owned())
        .unwrap_or_else(|| segment.to_string())
}

fn resolve_container(shape: &RowShape) -> Result<(ContainerRef, Option<String>, Option<String>), CandidateParseError> {
    match shape {
        RowShape::ByValue(url) => split_url(url),
        RowShape::ByEndpointContainer { endpoint, container } => Ok((
            ContainerRef::new(&normalize_endpoint(endpoint)?, container.trim_matches('/')),
            None,
            None,
        )),
    }
}

/// Rows read from a CSV file plus the rows that were skipped
#[derive(Debug)]
pub struct CsvRows<T> {
    pub rows: Vec<T>,
    pub skipped: Vec<CandidateParseError>,
}

fn read_records(path: &Path) -> Result<(Columns, Vec<(usize, Result<StringRecord, csv::Error>)>), SetupError> {
    if !path.exists() {
        return Err(SetupError::MissingInput(path.to_path_buf()));
    }
    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .from_path(path)
        .map_err(|source| SetupError::Csv {
            path: path.to_path_buf(),
            source,
        })?;

    let headers = rdr.headers().map_err(|source| SetupError::Csv {
        path: path.to_path_buf(),
        source,
    })?;
    let cols = Columns::from_headers(headers);
    if !cols.has_target_shape() {
        return Err(SetupError::MissingColumns {
            path: path.to_path_buf(),
            expected: "Value, or Endpoint and Container".to_string(),
        });
    }

    // Row numbers are 1-based and count the header line
    let records = rdr.records().enumerate().map(|(i, r)| (i + 2, r)).collect();
    Ok((cols, records))
}

/// One container per row; duplicate containers are collapsed
pub fn read_containers(path: &Path) -> Result<CsvRows<ContainerRef>, SetupError> {
    let (cols, records) = read_records(path)?;
    let mut rows: Vec<ContainerRef> = Vec::new();
    let mut skipped = Vec::new();

    for (row, record) in records {
        let parsed = record
            .map_err(|e| CandidateParseError::MalformedRow { row, reason: e.to_string() })
            .and_then(|rec| shape_of(&rec, &cols, row))
            .and_then(|shape| resolve_container(&shape));
        match parsed {
            Ok((container, _, _)) => {
                if !rows.contains(&container) {
                    rows.push(container);
                }
            }
            Err(e) => skipped.push(e),
        }
    }

    Ok(CsvRows { rows, skipped })
}

/// One blob per row. `BlobName`/`VersionId` columns take precedence over
/// what can be recovered from a `Value` URL.
pub fn read_blobs(path: &Path) -> Result<CsvRows<BlobRef>, SetupError> {
    let (cols, records) = read_records(path)?;
    let mut rows: Vec<BlobRef> = Vec::new();
    let mut skipped = Vec::new();

    for (row, record) in records {
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                skipped.push(CandidateParseError::MalformedRow { row, reason: e.to_string() });
                continue;
            }
        };

        let resolved = shape_of(&record, &cols, row).and_then(|shape| resolve_container(&shape));
        let (container, url_blob, url_version) = match resolved {
            Ok(r) => r,
            Err(e) => {
                skipped.push(e);
                continue;
            }
        };

        let blob_name = cell(&record, cols.blob_name).map(|s| s.to_string()).or(url_blob);
        let Some(blob_name) = blob_name else {
            skipped.push(CandidateParseError::MalformedRow {
                row,
                reason: "no blob name".to_string(),
            });
            continue;
        };
        let version_id = cell(&record, cols.version_id).map(|s| s.to_string()).or(url_version);

        let blob = BlobRef {
            container,
            blob_name,
            version_id,
        };
        if !rows.contains(&blob) {
            rows.push(blob);
        }
    }

    Ok(CsvRows { rows, skipped })
}
