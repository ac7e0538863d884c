use crate::config::Config;
use crate::error::{RepomanError, RepomanResult};
use crate::mirrors::cut_field;
use crate::shell::Cmd;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorTestResult {
    pub mirror_url: String,
    pub response_time: Duration,
    pub success: bool,
    pub error_message: Option<String>,
    pub tested_at: DateTime<Utc>,
}

/// HTTP reachability checks against repository mirrors.
#[derive(Debug, Clone)]
pub struct MirrorProbe {
    client: reqwest::Client,
    timeout: Duration,
    max_concurrent: usize,
}

impl MirrorProbe {
    pub fn new(config: &Config) -> RepomanResult<Self> {
        Ok(Self {
            client: build_client(config)?,
            timeout: config.probe_timeout(),
            max_concurrent: config.probe.max_concurrent_probes.max(1),
        })
    }

    /// HEAD `url`; true when it answers in time with a non-error status.
    pub async fn check_repo(&self, url: &str) -> bool {
        let result = self.test_mirror(url).await;
        if !result.success {
            warn!(
                "No response from repo {}: {}",
                url,
                result.error_message.as_deref().unwrap_or("unknown error")
            );
        }
        result.success
    }

    pub async fn test_mirror(&self, url: &str) -> MirrorTestResult {
        test_mirror_with(&self.client, self.timeout, url).await
    }

    /// Probe every URL with bounded concurrency; reachable mirrors come
    /// first, fastest first.
    pub async fn rank_mirrors(&self, urls: &[String]) -> RepomanResult<Vec<MirrorTestResult>> {
        info!("Ranking {} mirrors by response time", urls.len());

        let semaphore = Arc::new(tokio::sync::Semaphore::new(self.max_concurrent));
        let mut handles = Vec::new();

        for url in urls {
            let permit = semaphore.clone().acquire_owned().await?;
            let client = self.client.clone();
            let limit = self.timeout;
            let url = url.clone();

            handles.push(tokio::spawn(async move {
                let _permit = permit;
                test_mirror_with(&client, limit, &url).await
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(e) => warn!("Mirror test task failed: {}", e),
            }
        }

        results.sort_by(|a, b| {
            b.success
                .cmp(&a.success)
                .then(a.response_time.cmp(&b.response_time))
        });
        Ok(results)
    }
}

pub(crate) fn build_client(config: &Config) -> RepomanResult<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .timeout(config.probe_timeout())
        .user_agent(config.user_agent.clone());
    if let Some(proxy) = &config.https_proxy {
        builder = builder.proxy(reqwest::Proxy::https(proxy)?);
    }
    Ok(builder.build()?)
}

async fn test_mirror_with(client: &reqwest::Client, limit: Duration, url: &str) -> MirrorTestResult {
    debug!("Probing {}", url);
    let start_time = Instant::now();

    let (success, error_message) = match timeout(limit, client.head(url).send()).await {
        Ok(Ok(response)) => {
            let status = response.status();
            if status.is_client_error() || status.is_server_error() {
                (false, Some(format!("HTTP {}", status)))
            } else {
                (true, None)
            }
        }
        Ok(Err(e)) if e.is_timeout() => (false, Some("Request timeout".to_string())),
        Ok(Err(e)) => (false, Some(e.to_string())),
        Err(_) => (false, Some("Request timeout".to_string())),
    };

    MirrorTestResult {
        mirror_url: url.to_string(),
        response_time: start_time.elapsed(),
        success,
        error_message,
        tested_at: Utc::now(),
    }
}

/// Ask `netselect` which of `targets` is closest.
pub async fn netselect_fastest(cmd: &Cmd, program: &str, targets: &[String]) -> RepomanResult<String> {
    if targets.is_empty() {
        return Err(RepomanError::ProbeFailed("no mirrors to probe".to_string()));
    }
    let mut args = vec!["-D".to_string(), "-I".to_string()];
    args.extend(targets.iter().cloned());

    let out = cmd.run_program(program, args.as_slice(), false).await;
    debug!("{} answered {:?} (success: {})", program, out.stdout, out.success);
    if !out.success {
        return Err(RepomanError::ProbeFailed(format!("{} failed", program)));
    }
    parse_netselect_output(&out.stdout)
        .ok_or_else(|| RepomanError::ProbeFailed(format!("{} gave no answer", program)))
}

/// Lines look like `   63 http://mirror/`: the URL is the second column.
pub fn parse_netselect_output(output: &str) -> Option<String> {
    output
        .lines()
        .map(|l| l.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|l| !l.is_empty())
        .map(|l| cut_field(&l, ' ', 2))
        .find(|f| !f.is_empty())
}

/// Ask `netselect-apt` for the closest Debian mirror.
///
/// `codename` of `None` lets netselect-apt fall back to its default suite.
pub async fn netselect_apt_fastest(
    cmd: &Cmd,
    program: &str,
    codename: Option<&str>,
) -> RepomanResult<String> {
    let outfile = tempfile::NamedTempFile::new()?;
    let mut args: Vec<String> = Vec::new();
    if let Some(codename) = codename {
        args.push(codename.to_string());
    }
    args.push("-o".to_string());
    args.push(outfile.path().to_string_lossy().into_owned());

    if !cmd.run_program(program, args.as_slice(), false).await.success {
        return Err(RepomanError::ProbeFailed(format!(
            "{} could not detect fastest repo",
            program
        )));
    }
    let content = std::fs::read_to_string(outfile.path())?;
    first_deb_url(&content)
        .ok_or_else(|| RepomanError::ProbeFailed(format!("{} wrote no deb line", program)))
}

pub fn first_deb_url(content: &str) -> Option<String> {
    content
        .lines()
        .find(|l| l.starts_with("deb "))
        .map(|l| cut_field(l, ' ', 2))
        .filter(|u| !u.is_empty())
}
