//! Domains that web search results are restricted to.
//!
//! Reads take a lock-free snapshot; every write holds `write_lock` across
//! read, modify and persist so concurrent admin calls cannot lose updates.

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::info;

use crate::error::{ProcessingError, ServiceError, ServiceResult};

/// On-disk shapes; older files hold a bare array
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredAllowList {
    Sites { sites: Vec<String> },
    List(Vec<String>),
}

#[derive(Serialize)]
struct AllowListFile<'a> {
    sites: &'a [String],
}

/// Reduce user input like `https://Docs.Example.com/path` to `docs.example.com`
pub fn normalize_domain(site: &str) -> String {
    let lowered = site.trim().to_lowercase();
    let without_scheme = lowered
        .strip_prefix("https://")
        .or_else(|| lowered.strip_prefix("http://"))
        .unwrap_or(&lowered);
    without_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default()
        .trim()
        .to_string()
}

/// Process-wide, file-backed allow-list
pub struct AllowList {
    path: PathBuf,
    sites: ArcSwap<Vec<String>>,
    write_lock: Mutex<()>,
}

impl AllowList {
    /// Load from `path`; a missing file is an empty list
    pub fn load(path: &Path) -> ServiceResult<Self> {
        let sites = match std::fs::read(path) {
            Ok(bytes) => parse(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(ProcessingError::Io(e).into()),
        };

        info!(path = %path.display(), sites = sites.len(), "Loaded allow-list");
        Ok(Self {
            path: path.to_path_buf(),
            sites: ArcSwap::from_pointee(sites),
            write_lock: Mutex::new(()),
        })
    }

    /// Current snapshot
    pub fn sites(&self) -> Vec<String> {
        self.sites.load().as_ref().clone()
    }

    /// Add a domain and persist the list, returning the updated list.
    ///
    /// Adding a domain that is already present is a no-op.
    pub fn add(&self, site: &str) -> ServiceResult<Vec<String>> {
        let domain = normalize_domain(site);
        if domain.is_empty() {
            return Err(ServiceError::InvalidRequest {
                message: "Site must not be empty".to_string(),
            });
        }

        let _guard = self.write_lock.lock().unwrap();
        let current = self.sites.load_full();
        if current.contains(&domain) {
            return Ok(current.as_ref().clone());
        }

        let mut updated = current.as_ref().clone();
        updated.push(domain.clone());
        self.persist(&updated)?;
        self.sites.store(Arc::new(updated.clone()));

        info!(domain = %domain, total = updated.len(), "Added allowed site");
        Ok(updated)
    }

    /// Write to a sibling temp file, then rename over the old one
    fn persist(&self, sites: &[String]) -> ServiceResult<()> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir).map_err(ProcessingError::Io)?;

        let json = serde_json::to_vec_pretty(&AllowListFile { sites }).map_err(|e| {
            ServiceError::Internal {
                message: format!("Failed to serialize allow-list: {}", e),
            }
        })?;

        let mut file = tempfile::NamedTempFile::new_in(dir).map_err(ProcessingError::Io)?;
        file.write_all(&json).map_err(ProcessingError::Io)?;
        file.persist(&self.path)
            .map_err(|e| ProcessingError::Io(e.error))?;
        Ok(())
    }
}

fn parse(bytes: &[u8]) -> ServiceResult<Vec<String>> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    let stored: StoredAllowList =
        serde_json::from_slice(bytes).map_err(|e| ServiceError::Config {
            message: format!("Invalid allow-list file: {}", e),
        })?;
    let sites = match stored {
        StoredAllowList::Sites { sites } | StoredAllowList::List(sites) => sites,
    };
    Ok(sites
        .iter()
        .map(|s| normalize_domain(s))
        .filter(|s| !s.is_empty())
        .collect())
}
