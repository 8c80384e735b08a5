use std::path::Path;

use regdesk_core::config::{AppConfig, LlmProvider};
use regdesk_db::{connect_with_settings, migrations, ping};
use serde::Serialize;

use crate::commands::{current_thread_runtime, load_config, CommandResult, EXIT_DOCTOR};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(config_path: Option<&Path>, json_output: bool) -> CommandResult {
    let report = build_report(config_path);
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { EXIT_DOCTOR };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report(config_path: Option<&Path>) -> DoctorReport {
    let mut checks = Vec::new();

    match load_config(config_path) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_oracle_settings(&config));
            checks.extend(check_database(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in ["oracle_settings", "database_connectivity", "database_schema"] {
                checks.push(skipped(name, "configuration did not load"));
            }
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

/// The oracle is not contacted; chat turns degrade to an apology while it is down.
fn check_oracle_settings(config: &AppConfig) -> DoctorCheck {
    let provider = match config.llm.provider {
        LlmProvider::Ollama => "ollama",
    };
    let base_url = config.llm.base_url.as_deref().unwrap_or("<unset>");
    let auth = if config.llm.api_key.is_some() { "bearer auth" } else { "no auth" };

    DoctorCheck {
        name: "oracle_settings",
        status: CheckStatus::Pass,
        details: format!(
            "{provider} model `{}` at {base_url} ({auth}, timeout {}s, {} retries)",
            config.llm.model, config.llm.timeout_secs, config.llm.max_retries
        ),
    }
}

/// Connectivity and schema checks share one pool; schema is skipped when the pool fails.
fn check_database(config: &AppConfig) -> [DoctorCheck; 2] {
    let runtime = match current_thread_runtime() {
        Ok(runtime) => runtime,
        Err(error) => {
            return [
                DoctorCheck {
                    name: "database_connectivity",
                    status: CheckStatus::Fail,
                    details: format!("failed to initialize async runtime: {error}"),
                },
                skipped("database_schema", "database was not reachable"),
            ];
        }
    };

    runtime.block_on(async {
        let pool = match connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        {
            Ok(pool) => pool,
            Err(error) => {
                return [
                    DoctorCheck {
                        name: "database_connectivity",
                        status: CheckStatus::Fail,
                        details: format!("failed to connect to database: {error}"),
                    },
                    skipped("database_schema", "database was not reachable"),
                ];
            }
        };

        let checks = match ping(&pool).await {
            Ok(()) => [
                DoctorCheck {
                    name: "database_connectivity",
                    status: CheckStatus::Pass,
                    details: "database reachable".to_string(),
                },
                schema_check(migrations::pending_count(&pool).await),
            ],
            Err(error) => [
                DoctorCheck {
                    name: "database_connectivity",
                    status: CheckStatus::Fail,
                    details: format!("database did not answer: {error}"),
                },
                skipped("database_schema", "database was not reachable"),
            ],
        };
        pool.close().await;
        checks
    })
}

fn schema_check<E: std::fmt::Display>(pending: Result<usize, E>) -> DoctorCheck {
    match pending {
        Ok(0) => DoctorCheck {
            name: "database_schema",
            status: CheckStatus::Pass,
            details: "all migrations applied".to_string(),
        },
        Ok(pending) => DoctorCheck {
            name: "database_schema",
            status: CheckStatus::Fail,
            details: format!("{pending} pending migration(s); run `regdesk migrate`"),
        },
        Err(error) => DoctorCheck {
            name: "database_schema",
            status: CheckStatus::Fail,
            details: format!("could not read the migration ledger: {error}"),
        },
    }
}

fn skipped(name: &'static str, reason: &str) -> DoctorCheck {
    DoctorCheck { name, status: CheckStatus::Skipped, details: format!("skipped because {reason}") }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::{render_human, CheckStatus, DoctorCheck, DoctorReport};

    #[test]
    fn human_report_marks_each_check() {
        let report = DoctorReport {
            overall_status: CheckStatus::Fail,
            summary: "doctor: one or more readiness checks failed".to_string(),
            checks: vec![
                DoctorCheck {
                    name: "config_validation",
                    status: CheckStatus::Fail,
                    details: "llm.model must not be empty".to_string(),
                },
                DoctorCheck {
                    name: "database_connectivity",
                    status: CheckStatus::Skipped,
                    details: "skipped".to_string(),
                },
            ],
        };

        let rendered = render_human(&report);

        assert!(rendered.starts_with("doctor: one or more"));
        assert!(rendered.contains("- [fail] config_validation: llm.model must not be empty"));
        assert!(rendered.contains("- [skip] database_connectivity: skipped"));
    }
}
