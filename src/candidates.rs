// candidates.rs - Candidate Generation
// Purpose: Expand base names into probe targets using the permutation
//          templates, and expand storage endpoints into container URLs.
//          Pure and deterministic: no I/O beyond reading wordlist files.

use crate::catalog::ServiceDescriptor;
use crate::errors::{CandidateParseError, SetupError};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use url::Url;

/// Number of forms each permutation word contributes per base
pub const FORMS_PER_PERMUTATION: usize = 6;

lazy_static! {
    static ref RE_CONTAINER_NAME: Regex =
        Regex::new(r"^[a-z0-9](?:[a-z0-9]|-[a-z0-9])*$").unwrap();
}

const RESERVED_CONTAINERS: &[&str] = &["$root", "$web", "$logs"];

/// A single probe target, tagged with the group it reports under
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Candidate {
    /// Service id (DNS flows) or storage endpoint (container flows)
    pub group: String,
    /// DNS name or URL to probe
    pub name: String,
    /// Position in generation order, used to restore a stable output order
    pub index: usize,
}

impl Candidate {
    pub fn new(group: impl Into<String>, name: impl Into<String>, index: usize) -> Self {
        Self {
            group: group.into(),
            name: name.into(),
            index,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════
// WORDLISTS
// ═══════════════════════════════════════════════════════════════════

/// Parse newline-delimited entries: trimmed, blank and `#` lines skipped
pub fn parse_wordlist(content: &str) -> Vec<String> {
    content
        .lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(|l| l.to_string())
        .collect()
}

/// Read a wordlist file. A missing file is fatal.
pub fn read_wordlist(path: &Path) -> Result<Vec<String>, SetupError> {
    if !path.exists() {
        return Err(SetupError::MissingInput(path.to_path_buf()));
    }
    let content = fs::read_to_string(path).map_err(|source| SetupError::UnreadableInput {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(parse_wordlist(&content))
}

/// Merge literal values with an optional file, applying the same skip rule
/// to both and dropping repeated entries (first occurrence kept).
pub fn collect_inputs(literals: &[String], file: Option<&Path>) -> Result<Vec<String>, SetupError> {
    let mut entries: Vec<String> = literals
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty() && !v.starts_with('#'))
        .map(|v| v.to_string())
        .collect();

    if let Some(path) = file {
        entries.extend(read_wordlist(path)?);
    }

    let mut seen = HashSet::new();
    entries.retain(|e| seen.insert(e.clone()));
    Ok(entries)
}

// ═══════════════════════════════════════════════════════════════════
// SUBDOMAIN CANDIDATES
// ═══════════════════════════════════════════════════════════════════

/// Lazy Cartesian expansion of services × suffixes × bases × forms.
///
/// Order: catalog order, then suffix order, then base order; for each base
/// the bare name comes first, followed by the six forms of every
/// permutation word in list order.
pub struct CandidateGenerator {
    services: Vec<&'static ServiceDescriptor>,
    bases: Vec<String>,
    permutations: Vec<String>,
    svc: usize,
    suffix: usize,
    base: usize,
    form: usize,
    index: usize,
}

impl CandidateGenerator {
    pub fn new(
        services: Vec<&'static ServiceDescriptor>,
        bases: &[String],
        permutations: &[String],
    ) -> Self {
        Self {
            services,
            bases: normalize_names(bases),
            permutations: normalize_names(permutations),
            svc: 0,
            suffix: 0,
            base: 0,
            form: 0,
            index: 0,
        }
    }

    fn forms_per_base(&self) -> usize {
        1 + FORMS_PER_PERMUTATION * self.permutations.len()
    }

    /// Total number of candidates this generator yields
    pub fn expected_len(&self) -> usize {
        let suffixes: usize = self.services.iter().map(|s| s.suffixes.len()).sum();
        suffixes * self.bases.len() * self.forms_per_base()
    }
}

impl Iterator for CandidateGenerator {
    type Item = Candidate;

    fn next(&mut self) -> Option<Candidate> {
        loop {
            let service = *self.services.get(self.svc)?;

            let Some(suffix) = service.suffixes.get(self.suffix) else {
                self.svc += 1;
                self.suffix = 0;
                continue;
            };

            let Some(base) = self.bases.get(self.base) else {
                self.suffix += 1;
                self.base = 0;
                continue;
            };

            if self.form >= self.forms_per_base() {
                self.base += 1;
                self.form = 0;
                continue;
            }

            let stem = if self.form == 0 {
                base.clone()
            } else {
                let slot = self.form - 1;
                let word = &self.permutations[slot / FORMS_PER_PERMUTATION];
                permuted(base, word, slot % FORMS_PER_PERMUTATION)
            };
            self.form += 1;

            let candidate = Candidate::new(service.id, format!("{}.{}", stem, suffix), self.index);
            self.index += 1;
            return Some(candidate);
        }
    }
}

/// The six permutation templates, in generation order
fn permuted(base: &str, word: &str, form: usize) -> String {
    match form {
        0 => format!("{}{}", base, word),
        1 => format!("{}-{}", base, word),
        2 => format!("{}_{}", base, word),
        3 => format!("{}{}", word, base),
        4 => format!("{}-{}", word, base),
        _ => format!("{}_{}", word, base),
    }
}

fn normalize_names(entries: &[String]) -> Vec<String> {
    entries
        .iter()
        .map(|e| e.trim())
        .filter(|e| !e.is_empty() && !e.starts_with('#'))
        .map(|e| e.to_lowercase())
        .collect()
}

// ═══════════════════════════════════════════════════════════════════
// CONTAINER CANDIDATES
// ═══════════════════════════════════════════════════════════════════

/// Strip scheme, path and trailing dots/slashes from an endpoint value
pub fn normalize_endpoint(raw: &str) -> Result<String, CandidateParseError> {
    let trimmed = raw.trim();
    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };

    let url = Url::parse(&with_scheme).map_err(|e| CandidateParseError::InvalidUrl {
        value: raw.to_string(),
        reason: e.to_string(),
    })?;

    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(host.trim_end_matches('.').to_lowercase()),
        _ => Err(CandidateParseError::InvalidUrl {
            value: raw.to_string(),
            reason: "missing host".to_string(),
        }),
    }
}

/// Check a container name against the storage naming rules
pub fn is_valid_container_name(name: &str) -> bool {
    RESERVED_CONTAINERS.contains(&name)
        || ((3..=63).contains(&name.len()) && RE_CONTAINER_NAME.is_match(name))
}

/// Expand endpoints × container words into `https://{endpoint}/{word}`.
/// Invalid endpoints and container names are returned alongside for logging.
pub fn container_candidates(
    endpoints: &[String],
    words: &[String],
) -> (Vec<Candidate>, Vec<CandidateParseError>) {
    let mut candidates = Vec::new();
    let mut rejected = Vec::new();

    let mut containers = Vec::new();
    let mut seen = HashSet::new();
    for word in normalize_names(words) {
        if !is_valid_container_name(&word) {
            rejected.push(CandidateParseError::InvalidContainerName(word));
        } else if seen.insert(word.clone()) {
            containers.push(word);
        }
    }

    for raw in endpoints {
        let endpoint = match normalize_endpoint(raw) {
            Ok(e) => e,
            Err(e) => {
                rejected.push(e);
                continue;
            }
        };

        for container in &containers {
            let index = candidates.len();
            candidates.push(Candidate::new(
                endpoint.clone(),
                format!("https://{}/{}", endpoint, container),
                index,
            ));
        }
    }

    (candidates, rejected)
}
