// pipeline.rs - Discovery flows
// Purpose: Wire generator, prober, classifier, aggregator and writers into
//          the five flows. Probing fans out; everything after the join
//          (classification, aggregation, file writes) runs on this task.
//
// Flows:
//  - subdomains: bases × catalog suffixes → DNS → services/ + pub-subdomains.txt
//  - containers: endpoints × container words → anonymous list call
//  - scrape:     page bodies → embedded container URLs
//  - blobs:      CSV containers → paginated listing
//  - download:   CSV blobs → storage/<endpoint>/<container>/blobs/

use crate::aggregator::Aggregator;
use crate::candidates::{Candidate, CandidateGenerator};
use crate::case::{Case, WriteReport};
use crate::catalog::ServiceDescriptor;
use crate::classifier::{Hit, classify_content, classify_dns, storage_account_of, storage_signals};
use crate::config::ProbeConfig;
use crate::csv_input::{BlobRef, ContainerRef};
use crate::dns_probe::{DnsAnswer, diagnostic};
use crate::errors::{CandidateParseError, PersistenceError, ProbeError, SetupError, SweepError};
use crate::http_probe::HttpPayload;
use crate::prober::{BatchOutcome, Probe, probe_all};
use crate::progress::ProgressTracker;
use crate::storage::{ListedContainer, download_targets, listing_candidates};
use crate::summary::RunSummary;
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use url::Url;

/// Print one skipped input line
pub fn warn_skipped(error: &CandidateParseError) {
    println!("{}", format!("[!] Skipping {}", error).yellow());
}

fn stage_banner(title: &str) {
    println!();
    println!("{}", "═══════════════════════════════════════════════════════════════".cyan());
    println!("{}", format!("  {}", title).cyan().bold());
    println!("{}", "═══════════════════════════════════════════════════════════════".cyan());
}

fn progress_bar(total: usize, stage: &str) -> ProgressBar {
    let bar = ProgressBar::new(total as u64);
    let style = ProgressStyle::with_template("{spinner:.blue} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-");
    bar.set_style(style);
    bar.set_message(stage.to_string());
    bar
}

/// One run against one case: configuration, event log and counters
pub struct Session {
    pub case: Case,
    pub config: ProbeConfig,
    pub tracker: ProgressTracker,
    pub summary: RunSummary,
    write_failures: Vec<PersistenceError>,
}

impl Session {
    pub fn open(output_dir: &Path, case_name: &str, flow: &str, config: ProbeConfig) -> Result<Self, SweepError> {
        config.validate()?;
        let case = Case::open(output_dir, case_name)?;
        if let Some(last) = ProgressTracker::interrupted_run(case.root()) {
            println!(
                "{}",
                format!(
                    "[!] Previous run {} stopped after '{}'; its outputs may be incomplete",
                    last.run_id, last.message
                )
                .yellow()
            );
        }
        let summary = RunSummary::new(flow, case.name());
        let tracker = ProgressTracker::new(summary.run_id.clone(), case.name(), case.root());
        tracker.run_started(flow);

        println!(
            "{}",
            format!("[*] Case '{}' at {}", case.name(), case.root().display()).cyan()
        );
        Ok(Self {
            case,
            config,
            tracker,
            summary,
            write_failures: Vec::new(),
        })
    }

    /// Probe a batch with the configured window, reporting failures as they settle
    pub async fn run_stage<P, I>(&mut self, stage: &str, candidates: I, total: usize, probe: &P) -> BatchOutcome<P::Payload>
    where
        P: Probe,
        I: IntoIterator<Item = Candidate>,
    {
        self.tracker.stage_started(stage, total);
        println!(
            "{}",
            format!("[*] {}: {} candidates, concurrency {}", stage, total, self.config.concurrency).cyan()
        );

        let bar = progress_bar(total, stage);
        let verbose = self.config.verbose;
        let batch = probe_all(candidates, probe, self.config.concurrency, |result| {
            bar.inc(1);
            match &result.outcome {
                Ok(_) => bar.println(format!("{}", format!("[+] {}", result.candidate.name).green())),
                Err(e) if e.is_infrastructure() => {
                    bar.println(format!("{}", format!("[!] {}: {}", result.candidate.name, e).yellow()))
                }
                Err(ProbeError::Malformed(e)) => bar.println(format!(
                    "{}",
                    format!("[!] {}: malformed response: {}", result.candidate.name, e).yellow()
                )),
                Err(e) if verbose => bar.println(format!("{}", format!("[-] {}: {}", result.candidate.name, e).dimmed())),
                Err(_) => {}
            }
        })
        .await;
        bar.finish_and_clear();

        let infrastructure = batch.infrastructure_failures();
        for (candidate, error) in &infrastructure {
            self.tracker.infrastructure_warning(&candidate.name, &error.to_string());
        }
        if !infrastructure.is_empty() {
            println!(
                "{}",
                format!(
                    "[!] {} of {} probes failed on resolver infrastructure; results may be unreliable",
                    infrastructure.len(),
                    batch.total()
                )
                .yellow()
                .bold()
            );
        }
        let infrastructure = infrastructure.len();
        self.summary
            .add_batch(total, batch.total(), batch.failures.len(), infrastructure);
        batch
    }

    fn complete_stage(&mut self, stage: &str, data_type: &str, hits: usize, failures: usize) {
        self.tracker.stage_completed(stage, hits, failures);
        if hits > 0 {
            self.tracker.data_found(data_type, hits);
        }
        self.summary.hits += hits;
    }

    fn record_writes(&mut self, report: WriteReport) {
        for failure in report.failed {
            println!("{}", format!("[!] {}", failure).red());
            self.write_failures.push(failure);
        }
    }

    /// Finish a run whose flow returned `outcome`; a failed flow is logged
    /// as a failed run and no summary is stored.
    pub fn conclude<T>(self, outcome: Result<T, SweepError>) -> Result<RunSummary, SweepError> {
        match outcome {
            Ok(_) => self.finish(),
            Err(e) => Err(self.fail(e)),
        }
    }

    pub fn fail(self, error: SweepError) -> SweepError {
        self.tracker.run_failed(&error.to_string());
        error
    }

    /// Finalize and store the summary. Any output that could not be written
    /// turns the run into a `PartialOutput` error.
    pub fn finish(mut self) -> Result<RunSummary, SweepError> {
        self.summary.write_failures = self.write_failures.len();
        self.summary.finalize();
        if let Err(e) = self.summary.save(&self.case) {
            println!("{}", format!("[!] {}", e).red());
            self.write_failures.push(e);
            self.summary.write_failures = self.write_failures.len();
        }
        self.summary.print();

        if self.write_failures.is_empty() {
            self.tracker.run_completed();
            Ok(self.summary)
        } else {
            let err = SweepError::PartialOutput {
                failed: self.write_failures.len(),
            };
            self.tracker.run_failed(&err.to_string());
            Err(err)
        }
    }
}

// ═══════════════════════════════════════════════════════════════════
// SUBDOMAINS
// ═══════════════════════════════════════════════════════════════════

/// Subdomain flow: discover, then rewrite the case-wide subdomain outputs
pub async fn subdomains<P>(
    session: &mut Session,
    services: &[&'static ServiceDescriptor],
    bases: &[String],
    permutations: &[String],
    probe: &P,
) -> Result<Aggregator, SweepError>
where
    P: Probe<Payload = DnsAnswer>,
{
    let agg = discover_subdomains(session, services, bases, permutations, probe).await?;
    let report = session.case.write_subdomains(services, &agg);
    session.record_writes(report);
    Ok(agg)
}

/// Resolve the generated names without touching `pub-subdomains.txt` or
/// `services/`; only verbose DNS diagnostics are written.
pub async fn discover_subdomains<P>(
    session: &mut Session,
    services: &[&'static ServiceDescriptor],
    bases: &[String],
    permutations: &[String],
    probe: &P,
) -> Result<Aggregator, SweepError>
where
    P: Probe<Payload = DnsAnswer>,
{
    let generator = CandidateGenerator::new(services.to_vec(), bases, permutations);
    let total = generator.expected_len();
    if total == 0 {
        return Err(SetupError::NoInput("no base names to permute".to_string()).into());
    }

    stage_banner("SUBDOMAIN DISCOVERY (DNS)");
    let batch = session.run_stage("dns", generator, total, probe).await;

    let mut agg = Aggregator::with_groups(services.iter().map(|s| s.id));
    for (candidate, answer) in &batch.successes {
        if let Some(hit) = classify_dns(candidate, answer) {
            agg.push(hit);
        }
    }
    session.complete_stage("dns", "subdomains", agg.total(), batch.failures.len());

    for svc in services {
        if let Some(group) = agg.group(svc.id).filter(|g| !g.hits.is_empty()) {
            println!(
                "{}",
                format!("[+] {}: {} found", svc.display_name, group.hits.len()).green().bold()
            );
        }
    }

    let mut report = WriteReport::default();
    if session.config.verbose {
        for (candidate, answer) in &batch.successes {
            report.record(session.case.write_dns_diagnostic(&candidate.name, &diagnostic(candidate, Ok(answer))));
        }
        for (candidate, error) in &batch.failures {
            report.record(session.case.write_dns_diagnostic(&candidate.name, &diagnostic(candidate, Err(error))));
        }
    }
    session.record_writes(report);

    Ok(agg)
}

// ═══════════════════════════════════════════════════════════════════
// CONTAINERS
// ═══════════════════════════════════════════════════════════════════

/// Public containers and the blobs their first listing exposed
pub struct ContainerSweep {
    pub containers: Aggregator,
    pub blobs: Aggregator,
}

/// Probe container candidates (`group` = endpoint) with the anonymous list call
pub async fn containers<P>(session: &mut Session, candidates: Vec<Candidate>, probe: &P) -> Result<ContainerSweep, SweepError>
where
    P: Probe<Payload = ListedContainer>,
{
    if candidates.is_empty() {
        return Err(SetupError::NoInput("no container candidates".to_string()).into());
    }

    let mut endpoints: Vec<String> = Vec::new();
    for candidate in &candidates {
        if !endpoints.contains(&candidate.group) {
            endpoints.push(candidate.group.clone());
        }
    }

    stage_banner("STORAGE CONTAINER DISCOVERY");
    let total = candidates.len();
    let batch = session.run_stage("containers", candidates, total, probe).await;

    let mut containers = Aggregator::with_groups(endpoints);
    let mut blobs = Aggregator::new();
    for (_, listed) in &batch.successes {
        // The listing's own ServiceEndpoint wins, as it does for its blobs
        containers.push(Hit::container(&listed.url, &listed.endpoint, &listed.container));
        blobs.declare(listed.group_key());
        blobs.extend(listed.blobs.iter().cloned());
    }
    session.complete_stage("containers", "public containers", containers.total(), batch.failures.len());
    if !blobs.is_empty() {
        println!("{}", format!("[+] {} blobs listed", blobs.total()).green());
        session.tracker.data_found("blobs", blobs.total());
    }

    let mut report = session.case.write_containers(&containers);
    report.merge(session.case.write_blobs(&blobs));
    session.record_writes(report);

    Ok(ContainerSweep { containers, blobs })
}

// ═══════════════════════════════════════════════════════════════════
// SCRAPE
// ═══════════════════════════════════════════════════════════════════

pub async fn scrape<P>(session: &mut Session, urls: &[String], probe: &P) -> Result<Aggregator, SweepError>
where
    P: Probe<Payload = HttpPayload>,
{
    let mut candidates = Vec::new();
    for url in urls {
        match Url::parse(url) {
            Ok(_) => candidates.push(Candidate::new(url.clone(), url.clone(), candidates.len())),
            Err(e) => warn_skipped(&CandidateParseError::InvalidUrl {
                value: url.clone(),
                reason: e.to_string(),
            }),
        }
    }
    if candidates.is_empty() {
        return Err(SetupError::NoInput("no valid page URLs".to_string()).into());
    }

    stage_banner("STORAGE URL SCRAPE");
    let total = candidates.len();
    let batch = session.run_stage("scrape", candidates, total, probe).await;

    let mut agg = Aggregator::new();
    for (candidate, payload) in &batch.successes {
        for signal in storage_signals(payload) {
            println!("{}", format!("[*] {} looks like blob storage ({})", candidate.name, signal).cyan());
        }
        agg.extend(classify_content(&payload.body));
    }
    session.complete_stage("scrape", "container URLs", agg.total(), batch.failures.len());
    for hit in agg.hits() {
        println!("{}", format!("[+] {}", hit.value).green());
    }

    let report = session.case.write_scraped(&agg);
    session.record_writes(report);

    Ok(agg)
}

// ═══════════════════════════════════════════════════════════════════
// BLOBS
// ═══════════════════════════════════════════════════════════════════

pub async fn blobs<P>(session: &mut Session, targets: &[ContainerRef], probe: &P) -> Result<Aggregator, SweepError>
where
    P: Probe<Payload = ListedContainer>,
{
    if targets.is_empty() {
        return Err(SetupError::NoInput("no containers to list".to_string()).into());
    }

    stage_banner("BLOB ENUMERATION");
    let total = targets.len();
    let batch = session.run_stage("blobs", listing_candidates(targets), total, probe).await;

    let mut agg = Aggregator::new();
    for (_, listed) in &batch.successes {
        agg.declare(listed.group_key());
        let added = agg.extend(listed.blobs.iter().cloned());
        println!(
            "{}",
            format!("[+] {}: {} blobs in {} page(s)", listed.url, added, listed.pages).green()
        );
    }
    session.complete_stage("blobs", "blobs", agg.total(), batch.failures.len());

    let report = session.case.write_blobs(&agg);
    session.record_writes(report);

    Ok(agg)
}

// ═══════════════════════════════════════════════════════════════════
// DOWNLOAD
// ═══════════════════════════════════════════════════════════════════

/// Fetch blobs and store them under the case. Returns the written paths.
pub async fn download<P>(session: &mut Session, blobs: &[BlobRef], probe: &P) -> Result<Vec<PathBuf>, SweepError>
where
    P: Probe<Payload = Vec<u8>>,
{
    let (targets, rejected) = download_targets(blobs);
    for e in &rejected {
        warn_skipped(e);
    }
    if targets.is_empty() {
        return Err(SetupError::NoInput("no downloadable blobs".to_string()).into());
    }

    stage_banner("BLOB DOWNLOAD");
    let total = targets.len();
    let candidates = targets.iter().map(|t| t.candidate.clone());
    let batch = session.run_stage("download", candidates, total, probe).await;

    let mut report = WriteReport::default();
    for (candidate, bytes) in &batch.successes {
        let Some(target) = targets.get(candidate.index) else {
            continue;
        };
        let blob = &target.blob;
        report.record(session.case.write_blob_content(
            &blob.container.endpoint,
            &blob.container.container,
            &blob.blob_name,
            blob.version_id.as_deref(),
            bytes,
        ));
    }
    let written = report.written.clone();
    session.complete_stage("download", "downloaded blobs", written.len(), batch.failures.len());
    session.record_writes(report);

    Ok(written)
}

/// HEAD each blob and record the ones that exist, without fetching content
pub async fn check_blobs<P>(session: &mut Session, blobs: &[BlobRef], probe: &P) -> Result<Aggregator, SweepError>
where
    P: Probe<Payload = HttpPayload>,
{
    let mut candidates = Vec::new();
    let mut checked = Vec::new();
    for blob in blobs {
        match blob.url() {
            Ok(url) => {
                candidates.push(Candidate::new(blob.container.endpoint.clone(), url, checked.len()));
                checked.push(blob);
            }
            Err(e) => warn_skipped(&e),
        }
    }
    if candidates.is_empty() {
        return Err(SetupError::NoInput("no blobs to check".to_string()).into());
    }

    stage_banner("BLOB EXISTENCE CHECK");
    let total = candidates.len();
    let batch = session.run_stage("check", candidates, total, probe).await;

    let mut agg = Aggregator::new();
    for (candidate, payload) in &batch.successes {
        let Some(blob) = checked.get(candidate.index) else {
            continue;
        };
        let endpoint = &blob.container.endpoint;
        let container = &blob.container.container;
        agg.push(Hit {
            service_id: format!("{}/{}", endpoint, container),
            value: candidate.name.clone(),
            endpoint: Some(endpoint.clone()),
            storage_account: Some(storage_account_of(endpoint)),
            container: Some(container.clone()),
            blob_name: Some(blob.blob_name.clone()),
            version_id: blob.version_id.clone(),
            content_type: payload.header("content-type").map(str::to_string),
        });
        println!("{}", format!("[+] {}", candidate.name).green());
    }
    session.complete_stage("check", "existing blobs", agg.total(), batch.failures.len());

    let report = session.case.write_existing_blobs(&agg);
    session.record_writes(report);

    Ok(agg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::{SUBDOMAINS_FILE, METRICS_FILE};
    use crate::catalog::{self, CATALOG};
    use std::collections::HashMap;
    use std::fs;
    use tempfile::tempdir;

    /// Resolves a fixed set of names; everything else is NXDOMAIN
    struct FakeDns {
        answers: HashMap<String, Result<DnsAnswer, ProbeError>>,
    }

    impl FakeDns {
        fn new(entries: &[(&str, Result<&str, ProbeError>)]) -> Self {
            let answers = entries
                .iter()
                .map(|(name, outcome)| {
                    let outcome = outcome.clone().map(|ip| DnsAnswer {
                        records: vec![ip.to_string()],
                    });
                    (name.to_string(), outcome)
                })
                .collect();
            Self { answers }
        }
    }

    impl Probe for FakeDns {
        type Payload = DnsAnswer;

        async fn probe(&self, candidate: &Candidate) -> Result<DnsAnswer, ProbeError> {
            tokio::task::yield_now().await;
            self.answers
                .get(&candidate.name)
                .cloned()
                .unwrap_or(Err(ProbeError::NotFound))
        }
    }

    fn session(dir: &Path, flow: &str, verbose: bool) -> Session {
        let config = ProbeConfig {
            verbose,
            ..ProbeConfig::default()
        };
        Session::open(dir, "Contoso Case", flow, config).unwrap()
    }

    #[tokio::test]
    async fn test_subdomain_flow_writes_outputs() {
        let tmp = tempdir().unwrap();
        let mut s = session(tmp.path(), "subdomains", true);
        let services = vec![catalog::find(CATALOG, "blob").unwrap(), catalog::find(CATALOG, "vault").unwrap()];
        let dns = FakeDns::new(&[
            ("contoso.blob.core.windows.net", Ok("20.60.1.1")),
            ("contoso-dev.blob.core.windows.net", Ok("20.60.1.2")),
            ("devcontoso.vault.azure.net", Err(ProbeError::Infrastructure("refused".into()))),
        ]);

        let agg = subdomains(&mut s, &services, &["Contoso".to_string()], &["dev".to_string()], &dns)
            .await
            .unwrap();
        assert_eq!(agg.total(), 2);
        assert_eq!(s.summary.candidates, 14);
        assert_eq!(s.summary.failures, 12);
        assert_eq!(s.summary.infrastructure_warnings, 1);

        let root = s.case.root().to_path_buf();
        let summary = s.finish().unwrap();
        assert_eq!(summary.hits, 2);

        assert_eq!(
            fs::read_to_string(root.join(SUBDOMAINS_FILE)).unwrap(),
            "# Storage Accounts - Blobs\ncontoso.blob.core.windows.net\ncontoso-dev.blob.core.windows.net\n"
        );
        assert_eq!(fs::read_to_string(root.join("services/pub-vault.txt")).unwrap(), "");
        assert!(root.join("dns-results/contoso.blob.core.windows.net-dns.txt").exists());
        assert!(root.join(METRICS_FILE).exists());
        assert!(root.join(crate::progress::PROGRESS_FILE).exists());
    }

    #[tokio::test]
    async fn test_subdomain_flow_requires_bases() {
        let tmp = tempdir().unwrap();
        let mut s = session(tmp.path(), "subdomains", false);
        let services = vec![catalog::find(CATALOG, "blob").unwrap()];
        let dns = FakeDns::new(&[]);
        let err = subdomains(&mut s, &services, &["# only a comment".to_string()], &[], &dns)
            .await
            .unwrap_err();
        assert!(matches!(err, SweepError::Setup(SetupError::NoInput(_))));
    }

    #[tokio::test]
    async fn test_rerun_clears_stale_hits() {
        let tmp = tempdir().unwrap();
        let services = vec![catalog::find(CATALOG, "blob").unwrap()];
        let bases = vec!["contoso".to_string()];

        let mut first = session(tmp.path(), "subdomains", false);
        let found = FakeDns::new(&[("contoso.blob.core.windows.net", Ok("20.60.1.1"))]);
        subdomains(&mut first, &services, &bases, &[], &found).await.unwrap();
        let root = first.case.root().to_path_buf();
        first.finish().unwrap();
        assert!(!fs::read_to_string(root.join("services/pub-blob.txt")).unwrap().is_empty());

        let mut second = session(tmp.path(), "subdomains", false);
        subdomains(&mut second, &services, &bases, &[], &FakeDns::new(&[])).await.unwrap();
        second.finish().unwrap();
        assert_eq!(fs::read_to_string(root.join("services/pub-blob.txt")).unwrap(), "");
        assert_eq!(fs::read_to_string(root.join(SUBDOMAINS_FILE)).unwrap(), "");
    }

    #[tokio::test]
    async fn test_blob_discovery_keeps_subdomain_outputs() {
        let tmp = tempdir().unwrap();
        let websites = catalog::find(CATALOG, "websites").unwrap();
        let blob = catalog::find(CATALOG, "blob").unwrap();
        let bases = vec!["contoso".to_string()];
        let dns = FakeDns::new(&[
            ("contoso.azurewebsites.net", Ok("20.40.1.1")),
            ("contoso.blob.core.windows.net", Ok("20.60.1.1")),
        ]);

        let mut full = session(tmp.path(), "subdomains", false);
        subdomains(&mut full, &[websites, blob], &bases, &[], &dns).await.unwrap();
        let root = full.case.root().to_path_buf();
        full.finish().unwrap();
        let before = fs::read_to_string(root.join(SUBDOMAINS_FILE)).unwrap();
        let websites_before = fs::read_to_string(root.join("services/pub-websites.txt")).unwrap();

        let mut pre = session(tmp.path(), "containers", false);
        let found = discover_subdomains(&mut pre, &[blob], &bases, &[], &dns).await.unwrap();
        pre.finish().unwrap();

        assert_eq!(found.total(), 1);
        assert_eq!(fs::read_to_string(root.join(SUBDOMAINS_FILE)).unwrap(), before);
        assert!(before.contains("# App Services\ncontoso.azurewebsites.net\n"));
        assert_eq!(
            fs::read_to_string(root.join("services/pub-websites.txt")).unwrap(),
            websites_before
        );
    }

    #[test]
    fn test_invalid_config_rejected_before_case() {
        let tmp = tempdir().unwrap();
        let config = ProbeConfig {
            concurrency: 0,
            ..ProbeConfig::default()
        };
        assert!(Session::open(tmp.path(), "x", "subdomains", config).is_err());
        assert!(!tmp.path().join("x").exists());
    }
}
