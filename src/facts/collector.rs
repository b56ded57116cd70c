use std::time::Duration;

use futures::stream::{self, StreamExt};
use tracing::{info, warn};

use crate::config::CollectorConfig;
use crate::error::TransportError;
use crate::facts::parser;
use crate::facts::ssh::SshTransport;
use crate::facts::winrm::WinRmTransport;
use crate::facts::{FactTransport, HostTarget};
use crate::inventory::{FactSet, HostError, HostFacts};

#[derive(Debug)]
pub enum HostOutcome {
    Collected { ip: String, facts: HostFacts },
    Failed(HostError),
}

/// Runs the composite script against hosts, trying each transport in order.
pub struct FactCollector {
    transports: Vec<Box<dyn FactTransport>>,
    session_timeout: Duration,
    workers: usize,
}

impl FactCollector {
    /// SSH first, then WinRM when the fallback is enabled.
    pub fn from_config(config: &CollectorConfig) -> Result<Self, TransportError> {
        let mut transports: Vec<Box<dyn FactTransport>> = vec![Box::new(SshTransport::new(config))];
        if config.winrm_fallback {
            transports.push(Box::new(WinRmTransport::new(config)?));
        }
        Ok(Self::with_transports(
            transports,
            Duration::from_secs(config.session_timeout_secs),
            config.workers,
        ))
    }

    pub fn with_transports(
        transports: Vec<Box<dyn FactTransport>>,
        session_timeout: Duration,
        workers: usize,
    ) -> Self {
        Self {
            transports,
            session_timeout,
            workers: workers.max(1),
        }
    }

    /// Collect one host. Only transport failures move on to the next transport;
    /// a parse failure on captured output is final.
    pub async fn collect_host(&self, target: &HostTarget) -> HostOutcome {
        let mut failures = Vec::new();

        for transport in &self.transports {
            let attempt = tokio::time::timeout(self.session_timeout, transport.run_script(target)).await;
            let raw = match attempt {
                Ok(Ok(raw)) => raw,
                Ok(Err(e)) => {
                    warn!(host = %target.label(), transport = transport.name(), error = %e, "transport failed");
                    failures.push(format!("{}: {}", transport.name(), e));
                    continue;
                }
                Err(_) => {
                    let e = TransportError::SessionTimeout(self.session_timeout.as_secs());
                    warn!(host = %target.label(), transport = transport.name(), error = %e, "transport failed");
                    failures.push(format!("{}: {}", transport.name(), e));
                    continue;
                }
            };

            return match parser::parse(&raw, transport.dialect()) {
                Ok((ip, facts)) => {
                    info!(host = %target.label(), ip = %ip, transport = transport.name(), "facts collected");
                    HostOutcome::Collected { ip, facts }
                }
                Err(e) => {
                    warn!(host = %target.label(), error = %e, "could not parse fact block");
                    HostOutcome::Failed(host_error(target, e.to_string()))
                }
            };
        }

        HostOutcome::Failed(host_error(target, failures.join("; ")))
    }

    /// Collect every target. Sessions run up to `workers` at a time; results are folded into
    /// the set by this single consumer as they complete.
    pub async fn collect_all(&self, targets: &[HostTarget]) -> FactSet {
        let mut outcomes = stream::iter(targets.iter().map(|t| self.collect_host(t)))
            .buffer_unordered(self.workers);

        let mut set = FactSet::new();
        while let Some(outcome) = outcomes.next().await {
            match outcome {
                HostOutcome::Collected { ip, facts } => set.insert(ip, facts),
                HostOutcome::Failed(error) => set.record_error(error),
            }
        }
        set
    }

    /// Blocking entry point for callers without a runtime.
    pub fn collect_blocking(&self, targets: &[HostTarget]) -> std::io::Result<FactSet> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        Ok(runtime.block_on(self.collect_all(targets)))
    }
}

fn host_error(target: &HostTarget, error: String) -> HostError {
    HostError {
        host: target.label().to_string(),
        ip: target.ip.clone(),
        error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::script::Dialect;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    enum Scripted {
        Output(&'static str),
        Refused,
        Hang,
    }

    struct FakeTransport {
        name: &'static str,
        dialect: Dialect,
        by_ip: HashMap<&'static str, Scripted>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl FactTransport for FakeTransport {
        fn name(&self) -> &'static str {
            self.name
        }

        fn dialect(&self) -> Dialect {
            self.dialect
        }

        async fn run_script(&self, target: &HostTarget) -> Result<String, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.by_ip.get(target.ip.as_str()) {
                Some(Scripted::Output(raw)) => Ok(raw.to_string()),
                Some(Scripted::Hang) => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(String::new())
                }
                Some(Scripted::Refused) | None => {
                    Err(TransportError::AuthRejected(target.user.clone()))
                }
            }
        }
    }

    fn target(ip: &str) -> HostTarget {
        HostTarget {
            hostname: String::new(),
            ip: ip.to_string(),
            port: 22,
            user: "root".to_string(),
            password: "x".to_string(),
        }
    }

    const LINUX: &str =
        "START\r\nOS:Ubuntu 22\r\nHOSTNAME:web01\r\nSWAP:0\r\nNAS:\r\nMount Point:\r\nIPs:10.0.0.5\r\nEND\r\n";
    const WINDOWS: &str = "START\nOS:Windows Server 2019\nHOSTNAME:WIN01\nIPs:10.0.0.6\nEND\n";

    fn collector(
        ssh: Vec<(&'static str, Scripted)>,
        winrm: Vec<(&'static str, Scripted)>,
        workers: usize,
    ) -> (FactCollector, Arc<AtomicUsize>) {
        let winrm_calls = Arc::new(AtomicUsize::new(0));
        let transports: Vec<Box<dyn FactTransport>> = vec![
            Box::new(FakeTransport {
                name: "ssh",
                dialect: Dialect::Posix,
                by_ip: ssh.into_iter().collect(),
                calls: Arc::new(AtomicUsize::new(0)),
            }),
            Box::new(FakeTransport {
                name: "winrm",
                dialect: Dialect::PowerShell,
                by_ip: winrm.into_iter().collect(),
                calls: winrm_calls.clone(),
            }),
        ];
        (
            FactCollector::with_transports(transports, Duration::from_millis(200), workers),
            winrm_calls,
        )
    }

    #[tokio::test]
    async fn test_ssh_success_skips_fallback() {
        let (collector, winrm_calls) = collector(vec![("10.0.0.5", Scripted::Output(LINUX))], vec![], 1);
        let set = collector.collect_all(&[target("10.0.0.5")]).await;

        assert_eq!(set.len(), 1);
        assert_eq!(set.get("10.0.0.5").unwrap().hostname, "web01");
        assert_eq!(winrm_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_transport_failure_falls_back_to_winrm() {
        let (collector, winrm_calls) = collector(
            vec![("10.0.0.6", Scripted::Refused)],
            vec![("10.0.0.6", Scripted::Output(WINDOWS))],
            1,
        );
        let set = collector.collect_all(&[target("10.0.0.6")]).await;

        assert_eq!(winrm_calls.load(Ordering::SeqCst), 1);
        assert_eq!(set.get("10.0.0.6").unwrap().os, "Windows Server 2019");
        assert!(set.errors.is_empty());
    }

    #[tokio::test]
    async fn test_parse_failure_does_not_fall_back() {
        let (collector, winrm_calls) = collector(
            vec![("10.0.0.7", Scripted::Output("START\r\nOS:Ubuntu"))],
            vec![("10.0.0.7", Scripted::Output(WINDOWS))],
            1,
        );
        let set = collector.collect_all(&[target("10.0.0.7")]).await;

        assert_eq!(winrm_calls.load(Ordering::SeqCst), 0);
        assert!(set.is_empty());
        assert_eq!(set.errors.len(), 1);
        assert!(set.errors[0].error.contains("truncated"));
    }

    #[tokio::test]
    async fn test_one_host_failure_does_not_block_others() {
        let (collector, _) = collector(
            vec![
                ("10.0.0.1", Scripted::Hang),
                ("10.0.0.5", Scripted::Output(LINUX)),
            ],
            vec![("10.0.0.1", Scripted::Hang)],
            4,
        );
        let set = collector
            .collect_all(&[target("10.0.0.1"), target("10.0.0.5"), target("10.0.0.9")])
            .await;

        assert_eq!(set.len(), 1);
        assert!(set.get("10.0.0.5").is_some());
        assert_eq!(set.errors.len(), 2);
        let hung = set.errors.iter().find(|e| e.ip == "10.0.0.1").unwrap();
        assert!(hung.error.contains("ssh:"));
        assert!(hung.error.contains("winrm:"));
    }
}
