// catalog.rs - Azure Service Catalog
// Purpose: Static table of Azure service families and the DNS suffixes
//          their tenant-named hosts live under. Output file names are
//          derived from ids, so ids must never be renamed.

use crate::errors::SetupError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub id: &'static str,
    pub display_name: &'static str,
    pub suffixes: &'static [&'static str],
    pub output_file: &'static str,
}

// ═══════════════════════════════════════════════════════════════════
// BUILT-IN CATALOG
// ═══════════════════════════════════════════════════════════════════

pub static CATALOG: &[ServiceDescriptor] = &[
    ServiceDescriptor {
        id: "onmicrosoft",
        display_name: "Microsoft Hosted Domain",
        suffixes: &["onmicrosoft.com"],
        output_file: "pub-onmicrosoft.txt",
    },
    ServiceDescriptor {
        id: "scm",
        display_name: "App Services - Management",
        suffixes: &["scm.azurewebsites.net"],
        output_file: "pub-scm.txt",
    },
    ServiceDescriptor {
        id: "websites",
        display_name: "App Services",
        suffixes: &["azurewebsites.net"],
        output_file: "pub-websites.txt",
    },
    ServiceDescriptor {
        id: "p12",
        display_name: "App Services",
        suffixes: &["p.azurewebsites.net"],
        output_file: "pub-p12.txt",
    },
    ServiceDescriptor {
        id: "cloudapp",
        display_name: "App Services",
        suffixes: &["cloudapp.net"],
        output_file: "pub-cloudapp.txt",
    },
    ServiceDescriptor {
        id: "files",
        display_name: "Storage Accounts - Files",
        suffixes: &["file.core.windows.net"],
        output_file: "pub-files.txt",
    },
    ServiceDescriptor {
        id: "blob",
        display_name: "Storage Accounts - Blobs",
        suffixes: &["blob.core.windows.net"],
        output_file: "pub-blob.txt",
    },
    ServiceDescriptor {
        id: "queue",
        display_name: "Storage Accounts - Queues",
        suffixes: &["queue.core.windows.net"],
        output_file: "pub-queue.txt",
    },
    ServiceDescriptor {
        id: "table",
        display_name: "Storage Accounts - Tables",
        suffixes: &["table.core.windows.net"],
        output_file: "pub-table.txt",
    },
    ServiceDescriptor {
        id: "mail",
        display_name: "Email",
        suffixes: &["mail.protection.outlook.com"],
        output_file: "pub-mail.txt",
    },
    ServiceDescriptor {
        id: "sharepoint",
        display_name: "SharePoint",
        suffixes: &["sharepoint.com"],
        output_file: "pub-sharepoint.txt",
    },
    ServiceDescriptor {
        id: "redis",
        display_name: "Databases-Redis",
        suffixes: &["redis.cache.windows.net"],
        output_file: "pub-redis.txt",
    },
    ServiceDescriptor {
        id: "cosmos",
        display_name: "Databases-Cosmos DB",
        suffixes: &["documents.azure.com"],
        output_file: "pub-cosmos.txt",
    },
    ServiceDescriptor {
        id: "mssql",
        display_name: "Databases-MSSQL",
        suffixes: &["database.windows.net"],
        output_file: "pub-mssql.txt",
    },
    ServiceDescriptor {
        id: "vault",
        display_name: "Key Vaults",
        suffixes: &["vault.azure.net"],
        output_file: "pub-vault.txt",
    },
    ServiceDescriptor {
        id: "cdn",
        display_name: "CDN",
        suffixes: &["azureedge.net"],
        output_file: "pub-cdn.txt",
    },
    ServiceDescriptor {
        id: "search",
        display_name: "Search Appliance",
        suffixes: &["search.windows.net"],
        output_file: "pub-search.txt",
    },
    ServiceDescriptor {
        id: "api",
        display_name: "API Services",
        suffixes: &["azure-api.net"],
        output_file: "pub-api.txt",
    },
    ServiceDescriptor {
        id: "acr",
        display_name: "Azure Container Registry",
        suffixes: &["azurecr.io"],
        output_file: "pub-acr.txt",
    },
];

/// Service id used when storage accounts are discovered ahead of container probing
pub const BLOB_SERVICE_ID: &str = "blob";

/// Look up a descriptor by id
pub fn find(catalog: &'static [ServiceDescriptor], id: &str) -> Option<&'static ServiceDescriptor> {
    catalog.iter().find(|s| s.id == id)
}

/// Restrict the catalog to the requested ids, preserving catalog order.
/// An empty selection means the whole catalog.
pub fn select(
    catalog: &'static [ServiceDescriptor],
    ids: &[String],
) -> Result<Vec<&'static ServiceDescriptor>, SetupError> {
    if ids.is_empty() {
        return Ok(catalog.iter().collect());
    }

    for id in ids {
        if find(catalog, id).is_none() {
            return Err(SetupError::UnknownService(id.clone()));
        }
    }

    Ok(catalog
        .iter()
        .filter(|s| ids.iter().any(|id| id == s.id))
        .collect())
}
