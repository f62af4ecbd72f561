// storage_flows.rs - End-to-end storage flows against a mock blob endpoint

use cloudsweep::candidates::Candidate;
use cloudsweep::case::{BLOBS_CSV, CONTAINERS_CSV, EXISTING_BLOBS_CSV, SCRAPED_BLOBS_FILE};
use cloudsweep::config::ProbeConfig;
use cloudsweep::csv_input;
use cloudsweep::http_probe::{HttpProbe, RequestProfile};
use cloudsweep::pipeline::{self, Session};
use cloudsweep::storage::{BlobFetchProbe, ContainerListingProbe};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::tempdir;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Match, Mock, MockServer, Request, ResponseTemplate};

const ACCT: &str = "acct1.blob.core.windows.net";

/// Matches requests that carry no continuation marker
struct FirstPage;

impl Match for FirstPage {
    fn matches(&self, request: &Request) -> bool {
        !request.url.query_pairs().any(|(k, _)| k == "marker")
    }
}

fn listing(container: &str, blobs: &[&str], next_marker: Option<&str>) -> String {
    let mut xml = format!(
        "\u{feff}<?xml version=\"1.0\" encoding=\"utf-8\"?>\
         <EnumerationResults ServiceEndpoint=\"https://{}/\" ContainerName=\"{}\"><Blobs>",
        ACCT, container
    );
    for name in blobs {
        xml.push_str(&format!(
            "<Blob><Name>{}</Name><Properties><Content-Type>text/plain</Content-Type></Properties></Blob>",
            name
        ));
    }
    xml.push_str("</Blobs>");
    match next_marker {
        Some(m) => xml.push_str(&format!("<NextMarker>{}</NextMarker>", m)),
        None => xml.push_str("<NextMarker />"),
    }
    xml.push_str("</EnumerationResults>");
    xml
}

fn open_session(dir: &Path, flow: &str) -> Session {
    Session::open(dir, "Integration", flow, ProbeConfig::default()).unwrap()
}

fn write_input(dir: &Path, name: &str, content: &str) -> PathBuf {
    let p = dir.join(name);
    fs::write(&p, content).unwrap();
    p
}

async fn mount_paginated(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/cont1"))
        .and(query_param("restype", "container"))
        .and(query_param("comp", "list"))
        .and(header("x-ms-version", "2019-12-12"))
        .and(FirstPage)
        .respond_with(ResponseTemplate::new(200).set_body_string(listing("cont1", &["a.txt", "b.txt"], Some("page2"))))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/cont1"))
        .and(query_param("marker", "page2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing("cont1", &["dir/c.txt"], None)))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_container_probe_public_vs_missing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/public1"))
        .and(query_param("comp", "list"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing("public1", &["index.html"], None)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/private1"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let tmp = tempdir().unwrap();
    let mut session = open_session(tmp.path(), "containers");
    let candidates = vec![
        Candidate::new(ACCT, format!("{}/private1", server.uri()), 0),
        Candidate::new(ACCT, format!("{}/public1", server.uri()), 1),
    ];
    let probe = ContainerListingProbe::new(&session.config).unwrap();
    let sweep = pipeline::containers(&mut session, candidates, &probe).await.unwrap();

    assert_eq!(sweep.containers.total(), 1);
    assert_eq!(sweep.blobs.total(), 1);
    assert_eq!(session.summary.failures, 1);

    let root = session.case.root().to_path_buf();
    session.finish().unwrap();

    let csv = fs::read_to_string(root.join(CONTAINERS_CSV)).unwrap();
    assert_eq!(
        csv,
        format!(
            "Value,Endpoint,StorageAccount,Container\n{}/public1,{},acct1,public1\n",
            server.uri(),
            ACCT
        )
    );
    let per_endpoint = fs::read_to_string(root.join("storage").join(ACCT).join("pub-containers.txt")).unwrap();
    assert_eq!(per_endpoint.lines().count(), 1);

    let blobs = fs::read_to_string(root.join(BLOBS_CSV)).unwrap();
    assert!(blobs.contains("https://acct1.blob.core.windows.net/public1/index.html"));
}

#[tokio::test]
async fn test_container_and_blobs_share_listed_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/public1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing("public1", &["index.html"], None)))
        .mount(&server)
        .await;

    let tmp = tempdir().unwrap();
    let mut session = open_session(tmp.path(), "containers");
    let probed_as = "alias.blob.core.windows.net";
    let candidates = vec![Candidate::new(probed_as, format!("{}/public1", server.uri()), 0)];
    let probe = ContainerListingProbe::new(&session.config).unwrap();
    let sweep = pipeline::containers(&mut session, candidates, &probe).await.unwrap();

    let hit = sweep.containers.hits().next().unwrap();
    assert_eq!(hit.endpoint.as_deref(), Some(ACCT));
    assert_eq!(sweep.blobs.hits().next().unwrap().endpoint.as_deref(), Some(ACCT));

    let root = session.case.root().to_path_buf();
    session.finish().unwrap();

    let listed_dir = root.join("storage").join(ACCT);
    assert_eq!(fs::read_to_string(listed_dir.join("pub-containers.txt")).unwrap().lines().count(), 1);
    assert!(listed_dir.join("public1").join("pub-blobs.csv").exists());
    assert_eq!(
        fs::read_to_string(root.join("storage").join(probed_as).join("pub-containers.txt")).unwrap(),
        ""
    );
}

#[tokio::test]
async fn test_blob_listing_follows_next_marker() {
    let server = MockServer::start().await;
    mount_paginated(&server).await;

    let tmp = tempdir().unwrap();
    let input = write_input(tmp.path(), "containers.csv", &format!("Value\n{}/cont1\n", server.uri()));
    let targets = csv_input::read_containers(&input).unwrap().rows;

    let mut session = open_session(tmp.path(), "blobs");
    let probe = ContainerListingProbe::new(&session.config).unwrap();
    let agg = pipeline::blobs(&mut session, &targets, &probe).await.unwrap();

    let names: Vec<_> = agg.hits().map(|h| h.blob_name.clone().unwrap()).collect();
    assert_eq!(names, vec!["a.txt", "b.txt", "dir/c.txt"]);

    let root = session.case.root().to_path_buf();
    session.finish().unwrap();

    let per_container =
        fs::read_to_string(root.join("storage").join(ACCT).join("cont1").join("pub-blobs.csv")).unwrap();
    assert_eq!(per_container.lines().count(), 4);
    assert!(per_container.contains("dir/c.txt,,text/plain"));
}

#[tokio::test]
async fn test_blob_listing_with_versions() {
    let server = MockServer::start().await;
    let xml = "<EnumerationResults ContainerName=\"cont2\"><Blobs>\
               <Blob><Name>a.txt</Name><VersionId>v1</VersionId><Properties /></Blob>\
               <Blob><Name>a.txt</Name><VersionId>v2</VersionId><Properties /></Blob>\
               </Blobs><NextMarker /></EnumerationResults>";
    Mock::given(method("GET"))
        .and(path("/cont2"))
        .and(query_param("include", "versions"))
        .respond_with(ResponseTemplate::new(200).set_body_string(xml))
        .mount(&server)
        .await;

    let tmp = tempdir().unwrap();
    let mut session = open_session(tmp.path(), "blobs");
    let targets = vec![csv_input::ContainerRef {
        endpoint: ACCT.to_string(),
        container: "cont2".to_string(),
        origin: server.uri(),
    }];
    let probe = ContainerListingProbe::new(&session.config).unwrap().with_versions(true);
    let agg = pipeline::blobs(&mut session, &targets, &probe).await.unwrap();

    let versions: Vec<_> = agg.hits().map(|h| h.version_id.clone().unwrap()).collect();
    assert_eq!(versions, vec!["v1", "v2"]);
}

#[tokio::test]
async fn test_malformed_listing_is_not_fatal() {
    let server = MockServer::start().await;
    mount_paginated(&server).await;
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<EnumerationResults><Blobs><Blob>"))
        .mount(&server)
        .await;

    let tmp = tempdir().unwrap();
    let mut session = open_session(tmp.path(), "blobs");
    let targets = vec![
        csv_input::ContainerRef {
            endpoint: ACCT.to_string(),
            container: "broken".to_string(),
            origin: server.uri(),
        },
        csv_input::ContainerRef {
            endpoint: ACCT.to_string(),
            container: "cont1".to_string(),
            origin: server.uri(),
        },
    ];
    let probe = ContainerListingProbe::new(&session.config).unwrap();
    let agg = pipeline::blobs(&mut session, &targets, &probe).await.unwrap();

    assert_eq!(agg.total(), 3);
    assert_eq!(session.summary.failures, 1);
    assert!(session.finish().is_ok());
}

#[tokio::test]
async fn test_scrape_extracts_unique_containers() {
    let server = MockServer::start().await;
    let body = "<html>see https://acct1.blob.core.windows.net/cont1/x and \
                https://acct1.blob.core.windows.net/cont1/y</html>";
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;

    let tmp = tempdir().unwrap();
    let mut session = open_session(tmp.path(), "scrape");
    let probe = HttpProbe::new(&session.config, RequestProfile::Page).unwrap();
    let urls = vec![format!("{}/", server.uri()), "not a url".to_string()];
    let agg = pipeline::scrape(&mut session, &urls, &probe).await.unwrap();
    assert_eq!(agg.total(), 1);

    let root = session.case.root().to_path_buf();
    session.finish().unwrap();
    assert_eq!(
        fs::read_to_string(root.join(SCRAPED_BLOBS_FILE)).unwrap(),
        "https://acct1.blob.core.windows.net/cont1/\n"
    );

    // The scraped CSV feeds the blob flow directly
    let rows = csv_input::read_containers(&root.join(CONTAINERS_CSV)).unwrap().rows;
    assert_eq!(rows, vec![csv_input::ContainerRef::new(ACCT, "cont1")]);
}

#[tokio::test]
async fn test_download_stores_versioned_blob() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/cont1/dir/a.txt"))
        .and(query_param("versionid", "v1"))
        .and(header("x-ms-version", "2019-12-12"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"secret contents".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let tmp = tempdir().unwrap();
    let input = write_input(
        tmp.path(),
        "blobs.csv",
        &format!(
            "Value,BlobName,VersionId\n{uri}/cont1,dir/a.txt,v1\n{uri}/cont1,../../escape.txt,\n",
            uri = server.uri()
        ),
    );
    let parsed = csv_input::read_blobs(&input).unwrap();
    assert_eq!(parsed.rows.len(), 2);

    let mut session = open_session(tmp.path(), "download");
    let probe = BlobFetchProbe::new(&session.config).unwrap();
    let written = pipeline::download(&mut session, &parsed.rows, &probe).await.unwrap();
    assert_eq!(written.len(), 1);
    assert!(written[0].ends_with("storage/127.0.0.1/cont1/blobs/v1/dir/a.txt"));
    assert_eq!(fs::read(&written[0]).unwrap(), b"secret contents");
    assert!(!tmp.path().join("escape.txt").exists());
}

#[tokio::test]
async fn test_check_reports_existing_blobs_only() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/cont1/a.txt"))
        .and(header("x-ms-version", "2019-12-12"))
        .respond_with(ResponseTemplate::new(200).insert_header("content-type", "text/plain"))
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/cont1/gone.txt"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let tmp = tempdir().unwrap();
    let input = write_input(
        tmp.path(),
        "blobs.csv",
        &format!("Value,BlobName\n{uri}/cont1,a.txt\n{uri}/cont1,gone.txt\n", uri = server.uri()),
    );
    let rows = csv_input::read_blobs(&input).unwrap().rows;

    let mut session = open_session(tmp.path(), "check");
    let probe = HttpProbe::new(&session.config, RequestProfile::Storage).unwrap().head();
    let agg = pipeline::check_blobs(&mut session, &rows, &probe).await.unwrap();
    assert_eq!(agg.total(), 1);
    assert_eq!(session.summary.failures, 1);

    let root = session.case.root().to_path_buf();
    session.finish().unwrap();

    let csv = fs::read_to_string(root.join(EXISTING_BLOBS_CSV)).unwrap();
    assert_eq!(csv.lines().count(), 2);
    assert!(csv.contains(&format!("{}/cont1/a.txt", server.uri())));
    assert!(csv.contains("a.txt,,text/plain"));
    assert!(!root.join(BLOBS_CSV).exists());
    assert!(!root.join("storage").exists());
}

#[tokio::test]
async fn test_rerun_is_byte_identical() {
    let server = MockServer::start().await;
    mount_paginated(&server).await;

    let tmp = tempdir().unwrap();
    let targets = vec![csv_input::ContainerRef {
        endpoint: ACCT.to_string(),
        container: "cont1".to_string(),
        origin: server.uri(),
    }];
    let outputs = [
        PathBuf::from(BLOBS_CSV),
        Path::new("storage").join(ACCT).join("cont1").join("pub-blobs.csv"),
    ];

    let mut snapshots = Vec::new();
    for _ in 0..2 {
        let mut session = open_session(tmp.path(), "blobs");
        let probe = ContainerListingProbe::new(&session.config).unwrap();
        pipeline::blobs(&mut session, &targets, &probe).await.unwrap();
        let root = session.case.root().to_path_buf();
        session.finish().unwrap();
        snapshots.push(outputs.iter().map(|p| fs::read(root.join(p)).unwrap()).collect::<Vec<_>>());
    }
    assert_eq!(snapshots[0], snapshots[1]);
}
