//! Paged extraction from the tenant service
//!
//! Extraction authenticates against the service, then walks each
//! interface with limit/offset pagination, writing one page file per
//! response plus the page-count file the stager reads. Everything lands in
//! a throwaway load directory that is deleted when the run finishes unless
//! the operator asked to keep it.

use anyhow::{anyhow, bail, Context, Result};
use reqwest::blocking::Client;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

use crate::config::SourceConfig;
use crate::types::TableSpec;

/// Records requested per page
const PAGE_LIMIT: usize = 1000;

/// Authenticated session against one tenant service
pub struct Extractor<'a> {
    client: Client,
    source: &'a SourceConfig,
    token: String,
}

impl<'a> Extractor<'a> {
    /// Log in and capture the session token from the response header
    pub fn login(source: &'a SourceConfig) -> Result<Extractor<'a>> {
        let client = Client::builder()
            .build()
            .context("building HTTP client")?;
        debug!(url = %source.url, "logging in to tenant service");
        let response = client
            .post(format!("{}/authn/login", source.url))
            .header("X-Okapi-Tenant", &source.tenant)
            .json(&serde_json::json!({
                "username": source.user,
                "password": source.password,
            }))
            .send()
            .with_context(|| format!("logging in to {}", source.url))?;
        if !response.status().is_success() {
            bail!(
                "login to {} failed with status {}",
                source.url,
                response.status()
            );
        }
        let token = response
            .headers()
            .get("x-okapi-token")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| anyhow!("login response carried no token header"))?
            .to_string();
        Ok(Extractor {
            client,
            source,
            token,
        })
    }

    /// Retrieve every page of one interface into the load directory
    ///
    /// Returns false when the interface yielded no records at all, in
    /// which case the table is skipped for the rest of the run.
    pub fn extract_pages(&self, table: &TableSpec, load_dir: &Path) -> Result<bool> {
        info!(table = %table.table_name, path = %table.source_path, "extracting");
        let mut page = 0usize;
        loop {
            let body = self.fetch(&table.source_path, Some(page * PAGE_LIMIT))?;
            let record_count = records_in_page(&body)?;
            if page == 0 && record_count == 0 {
                warn!(table = %table.table_name, "no records found");
                return Ok(false);
            }
            let path = load_dir.join(format!("{}_{}.json", table.table_name, page));
            fs::write(&path, serde_json::to_string(&body)?)
                .with_context(|| format!("writing page file {}", path.display()))?;
            debug!(table = %table.table_name, page, records = record_count, "page written");
            page += 1;
            if record_count < PAGE_LIMIT {
                break;
            }
        }
        write_page_count(load_dir, &table.table_name, page)?;
        Ok(true)
    }

    /// Retrieve an unpaged interface as a single page
    pub fn extract_direct(&self, table: &TableSpec, load_dir: &Path) -> Result<bool> {
        info!(table = %table.table_name, path = %table.source_path, "extracting direct");
        let body = self.fetch(&table.source_path, None)?;
        if records_in_page(&body)? == 0 {
            warn!(table = %table.table_name, "no records found");
            return Ok(false);
        }
        let path = load_dir.join(format!("{}_0.json", table.table_name));
        fs::write(&path, serde_json::to_string(&body)?)
            .with_context(|| format!("writing page file {}", path.display()))?;
        write_page_count(load_dir, &table.table_name, 1)?;
        Ok(true)
    }

    fn fetch(&self, source_path: &str, offset: Option<usize>) -> Result<Value> {
        let mut request = self
            .client
            .get(format!("{}{}", self.source.url, source_path))
            .header("X-Okapi-Tenant", &self.source.tenant)
            .header("X-Okapi-Token", &self.token)
            .header("Accept", "application/json,text/plain");
        if let Some(offset) = offset {
            request = request.query(&[("offset", offset.to_string()), ("limit", PAGE_LIMIT.to_string())]);
        }
        let response = request
            .send()
            .with_context(|| format!("retrieving {}", source_path))?;
        if !response.status().is_success() {
            bail!(
                "retrieving {} failed with status {}",
                source_path,
                response.status()
            );
        }
        response
            .json()
            .with_context(|| format!("parsing response from {}", source_path))
    }
}

/// Count the records in a page body: the elements of the first top-level
/// array member, which is where the stager will look for them
fn records_in_page(body: &Value) -> Result<usize> {
    let object = body
        .as_object()
        .ok_or_else(|| anyhow!("response is not a JSON object"))?;
    Ok(object
        .values()
        .find_map(|v| v.as_array())
        .map(|records| records.len())
        .unwrap_or(0))
}

fn write_page_count(load_dir: &Path, table_name: &str, pages: usize) -> Result<()> {
    let path = load_dir.join(format!("{}_count.txt", table_name));
    fs::write(&path, format!("{}\n", pages))
        .with_context(|| format!("writing page count file {}", path.display()))
}

/// Create a fresh load directory under the configured extraction root
pub fn make_load_dir(extract_dir: &Path) -> Result<PathBuf> {
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("reading system clock")?
        .as_secs();
    let dir = extract_dir.join(format!("tmp_kiln_{}", stamp));
    fs::create_dir_all(&dir)
        .with_context(|| format!("creating load directory {}", dir.display()))?;
    Ok(dir)
}

/// Deletes the extraction directory when dropped, unless told to keep it
pub struct ExtractionFiles {
    dir: PathBuf,
    keep: bool,
}

impl ExtractionFiles {
    pub fn new(dir: PathBuf, keep: bool) -> Self {
        ExtractionFiles { dir, keep }
    }
}

impl Drop for ExtractionFiles {
    fn drop(&mut self) {
        if self.keep {
            info!(dir = %self.dir.display(), "keeping extracted files");
            return;
        }
        if let Err(e) = fs::remove_dir_all(&self.dir) {
            warn!(dir = %self.dir.display(), error = %e, "unable to remove extracted files");
        }
    }
}
