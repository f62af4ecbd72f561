// dns_probe.rs - DNS A-record probe
// Purpose: Resolve candidate names with trust-dns-resolver, one attempt per
//          name, and map resolver failures to structured probe errors so a
//          broken resolver is never mistaken for a missing host.

use crate::candidates::Candidate;
use crate::config::ProbeConfig;
use crate::errors::ProbeError;
use crate::prober::Probe;
use colored::*;
use std::time::Duration;
use tokio::time::timeout;
use trust_dns_resolver::TokioAsyncResolver;
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::error::{ResolveError, ResolveErrorKind};
use trust_dns_resolver::proto::op::ResponseCode;

/// Records returned for a resolved name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsAnswer {
    pub records: Vec<String>,
}

pub struct DnsProbe {
    resolver: TokioAsyncResolver,
    timeout: Duration,
}

impl DnsProbe {
    /// Build a resolver from the system configuration, falling back to the
    /// library defaults when the system config cannot be read.
    pub fn new(config: &ProbeConfig) -> Self {
        let (resolver_config, mut opts) = match trust_dns_resolver::system_conf::read_system_conf() {
            Ok(conf) => conf,
            Err(e) => {
                println!(
                    "{}",
                    format!("[!] Could not read system resolver config ({}), using public resolvers", e)
                        .yellow()
                );
                (ResolverConfig::default(), ResolverOpts::default())
            }
        };
        Self::apply_quick_opts(&mut opts, config);
        Self {
            resolver: TokioAsyncResolver::tokio(resolver_config, opts),
            timeout: config.dns_timeout(),
        }
    }

    fn apply_quick_opts(opts: &mut ResolverOpts, config: &ProbeConfig) {
        opts.timeout = config.dns_timeout();
        opts.attempts = 1;
        opts.ndots = 0;
    }
}

impl Probe for DnsProbe {
    type Payload = DnsAnswer;

    async fn probe(&self, candidate: &Candidate) -> Result<DnsAnswer, ProbeError> {
        // Fully qualified so search domains are never appended
        let fqdn = format!("{}.", candidate.name.trim_end_matches('.'));

        match timeout(self.timeout, self.resolver.ipv4_lookup(fqdn)).await {
            Ok(Ok(lookup)) => {
                let records: Vec<String> = lookup.iter().map(|a| a.to_string()).collect();
                if records.is_empty() {
                    Err(ProbeError::NotFound)
                } else {
                    Ok(DnsAnswer { records })
                }
            }
            Ok(Err(e)) => Err(classify_resolve_error(&e)),
            Err(_) => Err(ProbeError::Timeout),
        }
    }
}

/// Map a resolver error onto the probe taxonomy
pub fn classify_resolve_error(err: &ResolveError) -> ProbeError {
    match err.kind() {
        ResolveErrorKind::NoRecordsFound { response_code, .. } => {
            if *response_code == ResponseCode::Refused {
                ProbeError::Infrastructure(format!("query refused: {}", err))
            } else {
                ProbeError::NotFound
            }
        }
        ResolveErrorKind::Timeout => ProbeError::Timeout,
        ResolveErrorKind::Io(_) | ResolveErrorKind::Proto(_) | ResolveErrorKind::NoConnections => {
            ProbeError::Infrastructure(err.to_string())
        }
        _ => ProbeError::Transport(err.to_string()),
    }
}

/// Raw per-candidate dump written in verbose mode
pub fn diagnostic(candidate: &Candidate, outcome: Result<&DnsAnswer, &ProbeError>) -> String {
    let mut out = format!("Name: {}\nService: {}\n", candidate.name, candidate.group);
    match outcome {
        Ok(answer) => {
            out.push_str("Status: resolved\n");
            for record in &answer.records {
                out.push_str(&format!("A: {}\n", record));
            }
        }
        Err(e) => {
            let status = if e.is_infrastructure() { "infrastructure" } else { "failed" };
            out.push_str(&format!("Status: {}\nError: {}\n", status, e));
        }
    }
    out
}
