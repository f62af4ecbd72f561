// main.rs - cloudsweep CLI
// Purpose: Parse arguments, read inputs and run one discovery flow against a
//          case directory. Setup problems fail before any probe is sent.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use cloudsweep::candidates::{collect_inputs, container_candidates, read_wordlist};
use cloudsweep::catalog::{self, BLOB_SERVICE_ID, CATALOG};
use cloudsweep::config::ProbeConfig;
use cloudsweep::csv_input;
use cloudsweep::dns_probe::DnsProbe;
use cloudsweep::errors::SetupError;
use cloudsweep::http_probe::{HttpProbe, RequestProfile};
use cloudsweep::pipeline::{self, Session, warn_skipped};
use cloudsweep::storage::{BlobFetchProbe, ContainerListingProbe};
use colored::*;
use std::path::{Path, PathBuf};

/// cloudsweep - Azure asset discovery
#[derive(Parser, Debug)]
#[command(
    name = "cloudsweep",
    version,
    about = "Unauthenticated discovery of Azure subdomains, storage containers and blobs",
    long_about = r#"
╔═══════════════════════════════════════════════════════════════════════════════╗
║                     CLOUDSWEEP - Azure Asset Discovery                        ║
╚═══════════════════════════════════════════════════════════════════════════════╝

  subdomains   Permute base names over Azure service suffixes and resolve them
  containers   Probe storage endpoints for anonymously listable containers
  scrape       Extract blob container URLs from web pages
  blobs        List blobs of known containers (CSV input)
  download     Fetch blobs listed in a CSV into the case directory

═══════════════════════════════════════════════════════════════════════════════

EXAMPLES:

    cloudsweep subdomains --case contoso --base contoso --permutations perms.txt
    cloudsweep containers --case contoso --base contoso --containers words.txt
    cloudsweep scrape --case contoso --url https://www.contoso.com
    cloudsweep blobs --case contoso --input contoso/pub-storagecontainers.csv --versions
    cloudsweep download --case contoso --input contoso/pub-storageblobs.csv
    cloudsweep download --case contoso --input contoso/pub-storageblobs.csv --check

═══════════════════════════════════════════════════════════════════════════════
"#
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Case name; output goes to <output-dir>/<normalized case>/
    #[arg(long, value_name = "NAME", help_heading = "Case")]
    case: String,

    #[arg(long, default_value = ".", value_name = "DIR", help_heading = "Case")]
    output_dir: PathBuf,

    /// Preset for concurrency and timeouts
    #[arg(long, default_value = "default", value_name = "PROFILE", help_heading = "Performance",
          value_parser = ["default", "aggressive", "respectful"])]
    profile: String,

    /// Maximum probes in flight (overrides the profile)
    #[arg(long, value_name = "NUM", help_heading = "Performance")]
    concurrency: Option<usize>,

    /// DNS timeout in seconds (overrides the profile)
    #[arg(long, value_name = "SECONDS", help_heading = "Performance")]
    dns_timeout: Option<u64>,

    /// HTTP timeout in seconds (overrides the profile)
    #[arg(long, value_name = "SECONDS", help_heading = "Performance")]
    http_timeout: Option<u64>,

    /// Print every failed probe and keep raw DNS results
    #[arg(short, long, help_heading = "Output")]
    verbose: bool,
}

impl CommonArgs {
    fn probe_config(&self) -> Result<ProbeConfig, SetupError> {
        let mut config = ProbeConfig::from_profile(&self.profile)?;
        if let Some(c) = self.concurrency {
            config.concurrency = c;
        }
        if let Some(t) = self.dns_timeout {
            config.dns_timeout_secs = t;
        }
        if let Some(t) = self.http_timeout {
            config.http_timeout_secs = t;
        }
        config.verbose = self.verbose;
        config.validate()?;
        Ok(config)
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Enumerate Azure subdomains over DNS
    Subdomains {
        #[command(flatten)]
        common: CommonArgs,
        /// Base name (repeatable)
        #[arg(long, value_name = "NAME")]
        base: Vec<String>,
        #[arg(long, value_name = "FILE")]
        base_file: Option<PathBuf>,
        /// Permutation wordlist
        #[arg(long, value_name = "FILE")]
        permutations: Option<PathBuf>,
        /// Restrict to these service ids (comma separated)
        #[arg(long, value_name = "IDS", value_delimiter = ',')]
        services: Vec<String>,
    },

    /// Find anonymously listable storage containers
    Containers {
        #[command(flatten)]
        common: CommonArgs,
        /// Storage endpoint, e.g. acct.blob.core.windows.net (repeatable)
        #[arg(long, value_name = "HOST")]
        endpoint: Vec<String>,
        #[arg(long, value_name = "FILE")]
        endpoint_file: Option<PathBuf>,
        /// Base names used to discover storage accounts first
        #[arg(long, value_name = "NAME")]
        base: Vec<String>,
        #[arg(long, value_name = "FILE")]
        base_file: Option<PathBuf>,
        #[arg(long, value_name = "FILE")]
        permutations: Option<PathBuf>,
        /// Container name wordlist
        #[arg(long, value_name = "FILE")]
        containers: PathBuf,
    },

    /// Scrape pages for blob container URLs
    Scrape {
        #[command(flatten)]
        common: CommonArgs,
        #[arg(long, value_name = "URL")]
        url: Vec<String>,
        #[arg(long, value_name = "FILE")]
        url_file: Option<PathBuf>,
    },

    /// List blobs of containers from a CSV (Value or Endpoint+Container)
    Blobs {
        #[command(flatten)]
        common: CommonArgs,
        #[arg(long, value_name = "CSV")]
        input: PathBuf,
        /// Include blob versions in the listing
        #[arg(long)]
        versions: bool,
    },

    /// Download blobs from a CSV with BlobName/VersionId columns
    Download {
        #[command(flatten)]
        common: CommonArgs,
        #[arg(long, value_name = "CSV")]
        input: PathBuf,
        /// Only check which blobs exist (HEAD), store nothing
        #[arg(long)]
        check: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    print_banner();

    if let Err(e) = run(cli).await {
        eprintln!("{}", format!("[!] {:#}", e).red().bold());
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Subdomains {
            common,
            base,
            base_file,
            permutations,
            services,
        } => {
            let config = common.probe_config()?;
            let services = catalog::select(CATALOG, &services)?;
            let bases = collect_inputs(&base, base_file.as_deref()).context("reading base names")?;
            let perms = read_optional(permutations.as_deref())?;

            let mut session = Session::open(&common.output_dir, &common.case, "subdomains", config)?;
            let dns = DnsProbe::new(&session.config);
            let outcome = pipeline::subdomains(&mut session, &services, &bases, &perms, &dns).await;
            session.conclude(outcome)?;
        }

        Command::Containers {
            common,
            endpoint,
            endpoint_file,
            base,
            base_file,
            permutations,
            containers,
        } => {
            let config = common.probe_config()?;
            let words = read_wordlist(&containers).context("reading container wordlist")?;
            let mut endpoints = collect_inputs(&endpoint, endpoint_file.as_deref()).context("reading endpoints")?;
            let bases = collect_inputs(&base, base_file.as_deref()).context("reading base names")?;
            let perms = read_optional(permutations.as_deref())?;
            if endpoints.is_empty() && bases.is_empty() {
                return Err(SetupError::NoInput("give --endpoint/--endpoint-file or --base/--base-file".into()).into());
            }

            let blob = catalog::find(CATALOG, BLOB_SERVICE_ID)
                .ok_or_else(|| SetupError::UnknownService(BLOB_SERVICE_ID.to_string()))?;
            let probe = ContainerListingProbe::new(&config)?;
            let mut session = Session::open(&common.output_dir, &common.case, "containers", config)?;

            if !bases.is_empty() {
                let dns = DnsProbe::new(&session.config);
                let found = match pipeline::discover_subdomains(&mut session, &[blob], &bases, &perms, &dns).await {
                    Ok(found) => found,
                    Err(e) => return Err(session.fail(e).into()),
                };
                for hit in found.hits() {
                    if !endpoints.contains(&hit.value) {
                        endpoints.push(hit.value.clone());
                    }
                }
            }

            if endpoints.is_empty() {
                println!("{}", "[-] No storage endpoints to probe".dimmed());
                session.finish()?;
            } else {
                let (candidates, rejected) = container_candidates(&endpoints, &words);
                rejected.iter().for_each(warn_skipped);
                let outcome = pipeline::containers(&mut session, candidates, &probe).await;
                session.conclude(outcome)?;
            }
        }

        Command::Scrape { common, url, url_file } => {
            let config = common.probe_config()?;
            let urls = collect_inputs(&url, url_file.as_deref()).context("reading URLs")?;
            if urls.is_empty() {
                return Err(SetupError::NoInput("give --url or --url-file".into()).into());
            }

            let probe = HttpProbe::new(&config, RequestProfile::Page)?;
            let mut session = Session::open(&common.output_dir, &common.case, "scrape", config)?;
            let outcome = pipeline::scrape(&mut session, &urls, &probe).await;
            session.conclude(outcome)?;
        }

        Command::Blobs {
            common,
            input,
            versions,
        } => {
            let config = common.probe_config()?;
            let parsed = csv_input::read_containers(&input)?;
            parsed.skipped.iter().for_each(warn_skipped);

            let probe = ContainerListingProbe::new(&config)?.with_versions(versions);
            let mut session = Session::open(&common.output_dir, &common.case, "blobs", config)?;
            let outcome = pipeline::blobs(&mut session, &parsed.rows, &probe).await;
            session.conclude(outcome)?;
        }

        Command::Download { common, input, check } => {
            let config = common.probe_config()?;
            let parsed = csv_input::read_blobs(&input)?;
            parsed.skipped.iter().for_each(warn_skipped);

            if check {
                let probe = HttpProbe::new(&config, RequestProfile::Storage)?.head();
                let mut session = Session::open(&common.output_dir, &common.case, "check", config)?;
                let outcome = pipeline::check_blobs(&mut session, &parsed.rows, &probe).await;
                session.conclude(outcome)?;
            } else {
                let probe = BlobFetchProbe::new(&config)?;
                let mut session = Session::open(&common.output_dir, &common.case, "download", config)?;
                let outcome = pipeline::download(&mut session, &parsed.rows, &probe).await;
                session.conclude(outcome)?;
            }
        }
    }

    Ok(())
}

fn read_optional(path: Option<&Path>) -> Result<Vec<String>> {
    match path {
        Some(p) => read_wordlist(p).with_context(|| format!("reading {}", p.display())),
        None => Ok(Vec::new()),
    }
}

fn print_banner() {
    println!("{}", "═══════════════════════════════════════════════════════════════".cyan().bold());
    println!("{}", format!("  cloudsweep v{} - Azure Asset Discovery", env!("CARGO_PKG_VERSION")).white().bold());
    println!("{}", "  DNS | Storage Containers | Blobs".white());
    println!("{}", "═══════════════════════════════════════════════════════════════\n".cyan().bold());
}
