pub mod config;
pub mod doctor;
pub mod migrate;

use std::path::Path;

use regdesk_core::config::{AppConfig, ConfigError, LoadOptions};
use serde_json::json;

pub const EXIT_CONFIG: u8 = 2;
pub const EXIT_RUNTIME: u8 = 3;
pub const EXIT_DATABASE: u8 = 4;
pub const EXIT_MIGRATION: u8 = 5;
pub const EXIT_DOCTOR: u8 = 6;

/// Exit code plus the text printed for a command. Non-zero codes are failures.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        Self { exit_code: 0, output: outcome_line(command, "ok", None, &message.into()) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        Self {
            exit_code,
            output: outcome_line(command, "error", Some(error_class), &message.into()),
        }
    }
}

/// Loads configuration the way the server does, with an optional explicit file.
pub(crate) fn load_config(config_path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    AppConfig::load(LoadOptions {
        config_path: config_path.map(Path::to_path_buf),
        require_file: config_path.is_some(),
        ..LoadOptions::default()
    })
}

pub(crate) fn current_thread_runtime() -> std::io::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread().enable_all().build()
}

fn outcome_line(command: &str, status: &str, error_class: Option<&str>, message: &str) -> String {
    json!({
        "command": command,
        "status": status,
        "error_class": error_class,
        "message": message,
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::CommandResult;

    #[test]
    fn failure_line_carries_class_and_code() {
        let result = CommandResult::failure("migrate", "db_connectivity", "unable to open \"x\"", 4);
        let payload: Value = serde_json::from_str(&result.output).expect("json line");

        assert_eq!(result.exit_code, 4);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "db_connectivity");
        assert_eq!(payload["message"], "unable to open \"x\"");
    }
}
