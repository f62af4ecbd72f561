// case.rs - Case Directory & Output Writers
// Purpose: Normalize case names, own the case directory tree and write every
//          output file. Files are truncated and rewritten, so a run's output
//          reflects that run only. Only the collecting task calls into here.
//
// Layout:
//   <case>/
//   ├── pub-subdomains.txt
//   ├── services/pub-<id>.txt
//   ├── pub-storageblobs.txt        # container URLs scraped from pages
//   ├── pub-storagecontainers.csv
//   ├── pub-storageblobs.csv        # enumerated blobs
//   ├── storage/<endpoint>/pub-containers.txt
//   ├── storage/<endpoint>/<container>/pub-blobs.csv
//   ├── storage/<endpoint>/<container>/blobs[/<versionId>]/<blobName>
//   ├── dns-results/<candidate>-dns.txt   # verbose only
//   ├── progress.jsonl
//   └── run-metrics.json

use crate::aggregator::Aggregator;
use crate::catalog::ServiceDescriptor;
use crate::classifier::Hit;
use crate::errors::{CandidateParseError, PersistenceError, SetupError};
use std::fs;
use std::path::{Component, Path, PathBuf};

const ILLEGAL_CHARS: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

pub const SUBDOMAINS_FILE: &str = "pub-subdomains.txt";
pub const SERVICES_DIR: &str = "services";
pub const SCRAPED_BLOBS_FILE: &str = "pub-storageblobs.txt";
pub const CONTAINERS_CSV: &str = "pub-storagecontainers.csv";
pub const BLOBS_CSV: &str = "pub-storageblobs.csv";
pub const EXISTING_BLOBS_CSV: &str = "pub-existingblobs.csv";
pub const STORAGE_DIR: &str = "storage";
pub const DNS_RESULTS_DIR: &str = "dns-results";
pub const METRICS_FILE: &str = "run-metrics.json";

const CONTAINER_COLUMNS: &[&str] = &["Value", "Endpoint", "StorageAccount", "Container"];
const BLOB_COLUMNS: &[&str] = &[
    "Value",
    "Endpoint",
    "StorageAccount",
    "Container",
    "BlobName",
    "VersionId",
    "ContentType",
];

/// Lowercase, trim, and replace characters that are unsafe in a directory name
pub fn normalize_case_name(raw: &str) -> String {
    filesystem_safe(&raw.trim().to_lowercase())
}

/// Replace path separators, reserved characters and whitespace with `_`.
/// A dot-only result (`.`, `..`) becomes `_` so it stays a single normal
/// path component.
pub fn filesystem_safe(value: &str) -> String {
    let safe: String = value
        .chars()
        .map(|c| {
            if ILLEGAL_CHARS.contains(&c) || c.is_whitespace() || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();
    if !safe.is_empty() && safe.chars().all(|c| c == '.') {
        return "_".to_string();
    }
    safe
}

/// Turn a blob name into a relative path that cannot escape its directory
pub fn safe_blob_path(name: &str) -> Result<PathBuf, CandidateParseError> {
    let unsafe_name = || CandidateParseError::UnsafeBlobName(name.to_string());

    if name.starts_with('/') || name.contains('\\') {
        return Err(unsafe_name());
    }

    let mut path = PathBuf::new();
    for segment in name.split('/').filter(|s| !s.is_empty()) {
        if segment == ".." || segment == "." || segment.contains(':') {
            return Err(unsafe_name());
        }
        path.push(segment);
    }

    let escapes = path
        .components()
        .any(|c| !matches!(c, Component::Normal(_)));
    if path.as_os_str().is_empty() || escapes {
        return Err(unsafe_name());
    }
    Ok(path)
}

/// Files written (or failed) by one writer call
#[derive(Debug, Default)]
pub struct WriteReport {
    pub written: Vec<PathBuf>,
    pub failed: Vec<PersistenceError>,
}

impl WriteReport {
    pub fn record(&mut self, result: Result<PathBuf, PersistenceError>) {
        match result {
            Ok(path) => self.written.push(path),
            Err(e) => self.failed.push(e),
        }
    }

    pub fn merge(&mut self, other: WriteReport) {
        self.written.extend(other.written);
        self.failed.extend(other.failed);
    }
}

#[derive(Debug, Clone)]
pub struct Case {
    name: String,
    root: PathBuf,
}

impl Case {
    /// Open (creating if absent) `<output_dir>/<normalized name>`
    pub fn open(output_dir: &Path, raw_name: &str) -> Result<Self, crate::errors::SweepError> {
        let name = normalize_case_name(raw_name);
        if name.is_empty() {
            return Err(SetupError::EmptyCaseName(raw_name.to_string()).into());
        }
        let root = output_dir.join(&name);
        fs::create_dir_all(&root).map_err(|e| PersistenceError::new(&root, e))?;
        Ok(Self { name, root })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.root.join(relative)
    }

    /// Truncate-and-write a file under the case, creating parents as needed
    pub fn write_file(&self, relative: impl AsRef<Path>, contents: &[u8]) -> Result<PathBuf, PersistenceError> {
        let path = self.path(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| PersistenceError::new(parent, e))?;
        }
        fs::write(&path, contents).map_err(|e| PersistenceError::new(&path, e))?;
        Ok(path)
    }

    pub fn storage_dir(endpoint: &str) -> PathBuf {
        Path::new(STORAGE_DIR).join(filesystem_safe(endpoint))
    }

    pub fn container_dir(endpoint: &str, container: &str) -> PathBuf {
        Self::storage_dir(endpoint).join(filesystem_safe(container))
    }

    // ═══════════════════════════════════════════════════════════════════
    // SUBDOMAIN OUTPUT
    // ═══════════════════════════════════════════════════════════════════

    /// Aggregate file plus one file per probed service (empty when nothing resolved)
    pub fn write_subdomains(&self, services: &[&ServiceDescriptor], agg: &Aggregator) -> WriteReport {
        let mut report = WriteReport::default();

        let mut sections = Vec::new();
        for svc in services {
            let values: Vec<&str> = agg
                .group(svc.id)
                .map(|g| g.hits.iter().map(|h| h.value.as_str()).collect())
                .unwrap_or_default();

            report.record(self.write_file(Path::new(SERVICES_DIR).join(svc.output_file), lines(&values).as_bytes()));

            if !values.is_empty() {
                sections.push(format!("# {}\n{}", svc.display_name, lines(&values)));
            }
        }

        report.record(self.write_file(SUBDOMAINS_FILE, sections.join("\n").as_bytes()));
        report
    }

    // ═══════════════════════════════════════════════════════════════════
    // STORAGE OUTPUT
    // ═══════════════════════════════════════════════════════════════════

    /// Container URLs scraped from page bodies
    pub fn write_scraped(&self, agg: &Aggregator) -> WriteReport {
        let mut report = WriteReport::default();
        let values: Vec<&str> = agg.hits().map(|h| h.value.as_str()).collect();
        report.record(self.write_file(SCRAPED_BLOBS_FILE, lines(&values).as_bytes()));
        report.record(self.write_csv(CONTAINERS_CSV, CONTAINER_COLUMNS, agg.hits()));
        report
    }

    /// Public containers, aggregate and per endpoint
    pub fn write_containers(&self, agg: &Aggregator) -> WriteReport {
        let mut report = WriteReport::default();
        report.record(self.write_csv(CONTAINERS_CSV, CONTAINER_COLUMNS, agg.hits()));

        for group in agg.groups() {
            let values: Vec<&str> = group.hits.iter().map(|h| h.value.as_str()).collect();
            let file = Self::storage_dir(&group.key).join("pub-containers.txt");
            report.record(self.write_file(file, lines(&values).as_bytes()));
        }
        report
    }

    /// Enumerated blobs, aggregate and per container
    pub fn write_blobs(&self, agg: &Aggregator) -> WriteReport {
        let mut report = WriteReport::default();
        report.record(self.write_csv(BLOBS_CSV, BLOB_COLUMNS, agg.hits()));

        for group in agg.groups() {
            let Some((endpoint, container)) = group.key.split_once('/') else {
                continue;
            };
            let file = Self::container_dir(endpoint, container).join("pub-blobs.csv");
            report.record(self.write_csv(file, BLOB_COLUMNS, group.hits.iter()));
        }
        report
    }

    /// Blobs confirmed by an existence check. Kept apart from the listing
    /// outputs so a check never rewrites them.
    pub fn write_existing_blobs(&self, agg: &Aggregator) -> WriteReport {
        let mut report = WriteReport::default();
        report.record(self.write_csv(EXISTING_BLOBS_CSV, BLOB_COLUMNS, agg.hits()));
        report
    }

    /// Store downloaded blob content under the container's `blobs/` tree
    pub fn write_blob_content(
        &self,
        endpoint: &str,
        container: &str,
        blob_name: &str,
        version_id: Option<&str>,
        bytes: &[u8],
    ) -> Result<PathBuf, PersistenceError> {
        let relative = safe_blob_path(blob_name).map_err(|e| {
            PersistenceError::new(
                Self::container_dir(endpoint, container),
                std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()),
            )
        })?;

        let mut dir = Self::container_dir(endpoint, container).join("blobs");
        if let Some(version) = version_id {
            dir.push(filesystem_safe(version));
        }
        self.write_file(dir.join(relative), bytes)
    }

    /// Raw per-candidate DNS dumps (verbose mode)
    pub fn write_dns_diagnostic(&self, candidate: &str, dump: &str) -> Result<PathBuf, PersistenceError> {
        let file = Path::new(DNS_RESULTS_DIR).join(format!("{}-dns.txt", filesystem_safe(candidate)));
        self.write_file(file, dump.as_bytes())
    }

    fn write_csv<'a>(
        &self,
        relative: impl AsRef<Path>,
        columns: &[&str],
        hits: impl Iterator<Item = &'a Hit>,
    ) -> Result<PathBuf, PersistenceError> {
        let relative = relative.as_ref();
        let to_err = |e: csv::Error| PersistenceError::new(self.path(relative), e.into());

        let mut wtr = csv::Writer::from_writer(Vec::new());
        wtr.write_record(columns).map_err(to_err)?;
        for hit in hits {
            let row = hit_row(hit);
            wtr.write_record(&row[..columns.len()]).map_err(to_err)?;
        }
        let bytes = wtr
            .into_inner()
            .map_err(|e| PersistenceError::new(self.path(relative), e.into_error()))?;
        self.write_file(relative, &bytes)
    }
}

fn hit_row(hit: &Hit) -> [&str; 7] {
    fn opt(v: &Option<String>) -> &str {
        v.as_deref().unwrap_or("")
    }
    [
        hit.value.as_str(),
        opt(&hit.endpoint),
        opt(&hit.storage_account),
        opt(&hit.container),
        opt(&hit.blob_name),
        opt(&hit.version_id),
        opt(&hit.content_type),
    ]
}

/// One value per line, newline-terminated; empty input gives an empty file
fn lines(values: &[&str]) -> String {
    values.iter().map(|v| format!("{}\n", v)).collect()
}
