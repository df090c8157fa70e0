// Direct-download probe over an exported record file

use crate::error::{BatchError, Result};
use reaper_scanner::SizeTag;
use reqwest::Client;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, REFERER};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info};

const PROBE_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
const IMAGE_ACCEPT: &str = "image/avif,image/webp,image/apng,image/svg+xml,image/*,*/*;q=0.8";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    pub id: String,
    pub url: String,
}

/// Read `(id, asset_<tag>)` pairs from a record CSV. Rows without an asset
/// url for the tag are skipped.
pub fn read_probe_targets(path: &Path, tag: &SizeTag) -> Result<Vec<ProbeTarget>> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();

    let column = format!("asset_{}", tag);
    let id_idx = headers
        .iter()
        .position(|h| h == "id")
        .ok_or_else(|| BatchError::Input(format!("{} has no id column", path.display())))?;
    let url_idx = headers.iter().position(|h| h == column).ok_or_else(|| {
        BatchError::Input(format!("{} has no {} column", path.display(), column))
    })?;

    let mut targets = Vec::new();
    for row in reader.records() {
        let row = row?;
        let (Some(id), Some(url)) = (row.get(id_idx), row.get(url_idx)) else {
            continue;
        };
        if url.trim().is_empty() {
            continue;
        }
        targets.push(ProbeTarget {
            id: id.to_string(),
            url: url.to_string(),
        });
    }
    Ok(targets)
}

#[derive(Debug, Clone)]
pub struct ProbeOptions {
    pub limit: Option<usize>,
    /// Store fetched bodies as `<id>.<ext>` here.
    pub save_dir: Option<PathBuf>,
    pub pause: Duration,
    pub timeout: Duration,
    pub referer: String,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            limit: None,
            save_dir: None,
            pause: Duration::from_millis(50),
            timeout: Duration::from_secs(10),
            referer: "https://www.pinterest.com/".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Excellent,
    Moderate,
    Poor,
    Failed,
}

impl Verdict {
    pub fn from_rate(success_rate: f64) -> Self {
        if success_rate >= 90.0 {
            Verdict::Excellent
        } else if success_rate >= 50.0 {
            Verdict::Moderate
        } else if success_rate >= 10.0 {
            Verdict::Poor
        } else {
            Verdict::Failed
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Verdict::Excellent => "direct downloads work; the exported urls are usable as-is",
            Verdict::Moderate => "some downloads are blocked; retry failures or slow down",
            Verdict::Poor => "most downloads fail; the CDN is likely rate limiting",
            Verdict::Failed => "direct downloads do not work from this network",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProbeReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Failure counts keyed by HTTP status or error text.
    pub failures: BTreeMap<String, usize>,
    pub elapsed: Duration,
}

impl ProbeReport {
    pub fn success_rate(&self) -> f64 {
        if self.attempted == 0 {
            return 0.0;
        }
        self.succeeded as f64 / self.attempted as f64 * 100.0
    }

    pub fn per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.attempted as f64 / secs
    }

    pub fn verdict(&self) -> Verdict {
        Verdict::from_rate(self.success_rate())
    }
}

pub struct AssetProbe {
    client: Client,
    options: ProbeOptions,
}

impl AssetProbe {
    pub fn new(options: ProbeOptions) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(IMAGE_ACCEPT));
        headers.insert(
            REFERER,
            HeaderValue::from_str(&options.referer)
                .map_err(|e| BatchError::Input(format!("invalid referer: {}", e)))?,
        );

        let client = Client::builder()
            .user_agent(PROBE_USER_AGENT)
            .default_headers(headers)
            .timeout(options.timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;

        if let Some(ref dir) = options.save_dir {
            fs::create_dir_all(dir)
                .map_err(|e| BatchError::persistence(format!("download dir {}", dir.display()), e))?;
        }

        Ok(Self { client, options })
    }

    /// Fetch every target in order, pausing between requests.
    pub async fn run(&self, targets: &[ProbeTarget]) -> Result<ProbeReport> {
        let targets = match self.options.limit {
            Some(limit) => &targets[..limit.min(targets.len())],
            None => targets,
        };
        info!("Probing {} assets", targets.len());

        let started = Instant::now();
        let mut report = ProbeReport::default();

        for target in targets {
            report.attempted += 1;
            match self.fetch(target).await? {
                None => report.succeeded += 1,
                Some(reason) => {
                    debug!("Probe of {} failed: {}", target.url, reason);
                    report.failed += 1;
                    *report.failures.entry(reason).or_insert(0) += 1;
                }
            }
            if !self.options.pause.is_zero() {
                tokio::time::sleep(self.options.pause).await;
            }
        }

        report.elapsed = started.elapsed();
        Ok(report)
    }

    /// None on success, otherwise the failure key. Only local write
    /// failures are returned as errors.
    async fn fetch(&self, target: &ProbeTarget) -> Result<Option<String>> {
        let response = match self.client.get(&target.url).send().await {
            Ok(response) => response,
            Err(e) => return Ok(Some(failure_key(&e))),
        };

        let status = response.status();
        if !status.is_success() {
            return Ok(Some(format!("HTTP {}", status.as_u16())));
        }

        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => return Ok(Some(failure_key(&e))),
        };

        if let Some(ref dir) = self.options.save_dir {
            let path = dir.join(format!("{}.{}", target.id, asset_extension(&target.url)));
            fs::write(&path, &body)
                .map_err(|e| BatchError::persistence(format!("download {}", path.display()), e))?;
        }
        Ok(None)
    }
}

fn failure_key(error: &reqwest::Error) -> String {
    if error.is_timeout() {
        "timeout".to_string()
    } else if error.is_connect() {
        "connection failed".to_string()
    } else {
        error.to_string()
    }
}

/// File extension of the url's last path segment, `jpg` when absent.
pub fn asset_extension(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.path_segments()?.last().map(str::to_string))
        .and_then(|name| name.rsplit_once('.').map(|(_, ext)| ext.to_lowercase()))
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| "jpg".to_string())
}
