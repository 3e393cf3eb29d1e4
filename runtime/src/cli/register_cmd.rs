//! `slothound register`: wire the engine from configuration and run it.

use crate::acquisition::booking::BookingSubmitter;
use crate::acquisition::cipher::CredentialCipher;
use crate::acquisition::engine::{AcquisitionLoop, RunOutcome};
use crate::acquisition::http_client::{HttpGateway, DEFAULT_TIMEOUT};
use crate::acquisition::proxy::{DirectConnection, ProxyMode, ProxyPool, ProxyProvider};
use crate::acquisition::schedule::ScheduleDiscovery;
use crate::acquisition::session::{Credentials, SessionManager};
use crate::acquisition::site::SiteEndpoints;
use crate::config::policy::{parse_bool, PollingPolicy};
use crate::config::{ConfigProvider, PropertiesConfig};
use anyhow::Result;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Run one acquisition and return the process exit code.
pub async fn run(config_path: &Path) -> Result<i32> {
    let config = PropertiesConfig::load_or_create(config_path)?;
    let policy = PollingPolicy::from_config(&config)?;
    let site = SiteEndpoints::from_config(&config);

    let gateway = Arc::new(HttpGateway::new(
        site.home(),
        proxy_provider(&config),
        DEFAULT_TIMEOUT,
    ));
    let credentials = Credentials {
        username: config.get("username", ""),
        password: config.get("password", ""),
    };
    let session = SessionManager::new(
        Arc::clone(&gateway),
        site.clone(),
        CredentialCipher::site_default()?,
        credentials,
    );
    let discovery = ScheduleDiscovery::new(Arc::clone(&gateway), site.clone());
    let submitter = BookingSubmitter::new(gateway, site);

    let mut engine =
        AcquisitionLoop::new(session, discovery, submitter, policy, StdRng::from_entropy());

    info!("starting slothound v{}", env!("CARGO_PKG_VERSION"));
    tokio::select! {
        result = engine.run() => match result {
            Ok(report) => {
                match &report.outcome {
                    RunOutcome::Succeeded { slot, confirmation } => info!(
                        "booked schedule {} with doctor {} ({}), confirmation {confirmation}",
                        slot.schedule_id, slot.doctor_id, slot.day_part
                    ),
                    RunOutcome::Exhausted { retries } => {
                        error!("gave up after {retries} failed cycle(s)")
                    }
                    RunOutcome::CyclesExhausted { cycles } => {
                        error!("gave up after {cycles} cycle(s) without a slot")
                    }
                }
                info!(
                    "cycles={} empty_polls={} claims_lost={} retries_used={} reauthentications={}",
                    report.stats.cycles,
                    report.stats.empty_polls,
                    report.stats.claims_lost,
                    report.stats.retries_used,
                    report.stats.reauthentications
                );
                Ok(report.exit_code())
            }
            Err(e) => {
                error!("run aborted: {e}");
                Ok(1)
            }
        },
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted by user");
            Ok(1)
        }
    }
}

/// Proxy rotation per `enableProxy` / `proxyFilePath` / `proxyMode`.
///
/// A missing or unreadable proxy file falls back to direct connections.
fn proxy_provider(config: &dyn ConfigProvider) -> Box<dyn ProxyProvider> {
    if !parse_bool(&config.get("enableProxy", "false")) {
        return Box::new(DirectConnection);
    }
    let path = config.get("proxyFilePath", "");
    if path.trim().is_empty() {
        warn!("enableProxy is set but proxyFilePath is empty; connecting directly");
        return Box::new(DirectConnection);
    }
    let mode = ProxyMode::from_config(&config.get("proxyMode", "ROUND_ROBIN"));
    match ProxyPool::from_file(Path::new(path.trim()), mode) {
        Ok(pool) if !pool.is_empty() => Box::new(pool),
        Ok(_) => {
            warn!("proxy file {path} has no usable entries; connecting directly");
            Box::new(DirectConnection)
        }
        Err(e) => {
            warn!("{e:#}; connecting directly");
            Box::new(DirectConnection)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn config(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_proxy_disabled_connects_directly() {
        let mut provider = proxy_provider(&config(&[("enableProxy", "false")]));
        assert!(provider.next_proxy().is_none());
    }

    #[test]
    fn test_proxy_file_is_used_when_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proxies.txt");
        std::fs::write(&path, "http@10.1.1.1:8080\nhttp@10.1.1.2:8080\n").unwrap();
        let path_str = path.display().to_string();

        let mut provider = proxy_provider(&config(&[
            ("enableProxy", "true"),
            ("proxyFilePath", &path_str),
        ]));
        assert_eq!(provider.next_proxy().unwrap().address, "10.1.1.1:8080");
        assert_eq!(provider.next_proxy().unwrap().address, "10.1.1.2:8080");
    }

    #[test]
    fn test_missing_proxy_file_connects_directly() {
        let mut provider = proxy_provider(&config(&[
            ("enableProxy", "true"),
            ("proxyFilePath", "/definitely/not/here.txt"),
        ]));
        assert!(provider.next_proxy().is_none());
    }
}
