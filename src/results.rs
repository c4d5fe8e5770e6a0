//! # Results Management
//!
//! Collects every report of a run and, when an output file is configured,
//! writes them as JSON together with run metadata and an overall summary.

use crate::cli::{Mode, Role};
use crate::metrics::{Report, ReportSink};
use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// What was run, recorded alongside the reports
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfiguration {
    pub role: Role,
    pub mode: Mode,
    pub url: String,
}

/// System information for reproducibility
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemInfo {
    pub os: String,
    pub architecture: String,
    pub benchmark_version: String,
}

impl Default for SystemInfo {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            architecture: std::env::consts::ARCH.to_string(),
            benchmark_version: crate::VERSION.to_string(),
        }
    }
}

/// Benchmark metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkMetadata {
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub configuration: RunConfiguration,
    pub system_info: SystemInfo,
}

/// Totals across every report of the run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OverallSummary {
    /// Data frames counted by closed receiving windows
    pub total_counted: u64,
    /// Data frames sent by sender runs
    pub total_sent: u64,
    /// Windows closed by END
    pub completed_sessions: usize,
    /// Sender runs that stopped early
    pub incomplete_runs: usize,
    /// Distinct connections that produced a report
    pub connections: usize,
}

/// Final results file structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalBenchmarkResults {
    pub metadata: BenchmarkMetadata,
    pub reports: Vec<Report>,
    pub summary: OverallSummary,
}

/// Collects every report of the run and writes the JSON results file
pub struct ResultsManager {
    output_file: Option<PathBuf>,
    configuration: RunConfiguration,
    reports: Mutex<Vec<Report>>,
}

impl ResultsManager {
    /// Create a new results manager; without an output file reports are only
    /// collected
    pub fn new(output_file: Option<&Path>, configuration: RunConfiguration) -> Self {
        Self {
            output_file: output_file.map(Path::to_path_buf),
            configuration,
            reports: Mutex::new(Vec::new()),
        }
    }

    pub fn output_file(&self) -> Option<&Path> {
        self.output_file.as_deref()
    }

    pub fn reports(&self) -> Vec<Report> {
        self.reports.lock().clone()
    }

    /// Calculate overall summary across all reports
    pub fn summary(&self) -> OverallSummary {
        let reports = self.reports.lock();
        let mut summary = OverallSummary::default();
        let mut connections = HashSet::new();

        for report in reports.iter() {
            connections.insert(report.connection());
            match report {
                Report::Interval(_) => {}
                Report::Final(r) => {
                    summary.total_counted += r.total_count;
                    summary.completed_sessions += 1;
                }
                Report::Sender(r) => {
                    summary.total_sent += r.messages_sent;
                    if !r.completed {
                        summary.incomplete_runs += 1;
                    }
                }
            }
        }

        summary.connections = connections.len();
        summary
    }

    pub fn build_results(&self) -> FinalBenchmarkResults {
        FinalBenchmarkResults {
            metadata: BenchmarkMetadata {
                version: crate::VERSION.to_string(),
                timestamp: chrono::Utc::now(),
                configuration: self.configuration.clone(),
                system_info: SystemInfo::default(),
            },
            reports: self.reports(),
            summary: self.summary(),
        }
    }

    /// Finalize results and write to the output file, if one is configured
    pub fn finalize(&self) -> Result<()> {
        let Some(path) = &self.output_file else {
            debug!("No output file configured; results not written");
            return Ok(());
        };

        info!("Finalizing benchmark results");
        let json = serde_json::to_string_pretty(&self.build_results())
            .context("Failed to serialize results")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write results to {:?}", path))?;

        info!("Results written to: {:?}", path);
        Ok(())
    }
}

impl ReportSink for ResultsManager {
    fn emit(&self, report: &Report) {
        self.reports.lock().push(report.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{FinalReport, SenderSummary};
    use crate::transport::ConnectionId;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    fn configuration() -> RunConfiguration {
        RunConfiguration {
            role: Role::Server,
            mode: Mode::Receive,
            url: "ws://127.0.0.1:8765".to_string(),
        }
    }

    fn final_report(connection: u64, total_count: u64) -> Report {
        Report::Final(FinalReport {
            connection: ConnectionId::new(connection),
            total_count,
            total_elapsed: Duration::from_secs(1),
            average_rate: total_count as f64,
            declared_count: None,
            timestamp: chrono::Utc::now(),
        })
    }

    fn sender_summary(connection: u64, messages_sent: u64, completed: bool) -> Report {
        Report::Sender(SenderSummary {
            connection: ConnectionId::new(connection),
            messages_sent,
            elapsed: Duration::from_secs(1),
            messages_per_second: messages_sent as f64,
            completed,
            timestamp: chrono::Utc::now(),
        })
    }

    #[test]
    fn test_summary_totals() {
        let manager = ResultsManager::new(None, configuration());
        manager.emit(&final_report(1, 100));
        manager.emit(&final_report(2, 50));
        manager.emit(&sender_summary(2, 50, true));
        manager.emit(&sender_summary(3, 7, false));

        assert_eq!(
            manager.summary(),
            OverallSummary {
                total_counted: 150,
                total_sent: 57,
                completed_sessions: 2,
                incomplete_runs: 1,
                connections: 3,
            }
        );
    }

    #[test]
    fn test_finalize_writes_json() {
        let temp_file = NamedTempFile::new().unwrap();
        let manager = ResultsManager::new(Some(temp_file.path()), configuration());
        manager.emit(&final_report(1, 5));
        manager.finalize().unwrap();

        let written = std::fs::read_to_string(temp_file.path()).unwrap();
        let results: FinalBenchmarkResults = serde_json::from_str(&written).unwrap();
        assert_eq!(results.metadata.version, crate::VERSION);
        assert_eq!(results.metadata.configuration.mode, Mode::Receive);
        assert_eq!(results.reports.len(), 1);
        assert_eq!(results.summary.total_counted, 5);
        assert!(written.contains("\"kind\": \"final\""));
    }

    #[test]
    fn test_finalize_without_output_file_is_noop() {
        let manager = ResultsManager::new(None, configuration());
        manager.emit(&final_report(1, 5));
        manager.finalize().unwrap();
        assert!(manager.output_file().is_none());
    }
}
