//! Offline validation of the main config and individual zone files via an
//! operator-configured external binary or shell command, each bounded by
//! a timeout. Grounded in the same "run a subprocess, check its exit
//! status, surface stderr verbatim on failure" shape used elsewhere in
//! this corpus for invoking zone tooling.

use crate::config::ExternalCommand;
use crate::error::SteadyDnsError;
use log::{debug, warn};
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

async fn run_with_timeout(
    mut command: Command,
    timeout_secs: u64,
    what: &str,
) -> Result<(), SteadyDnsError> {
    let fut = command.output();
    let output = match timeout(Duration::from_secs(timeout_secs), fut).await {
        Ok(Ok(output)) => output,
        Ok(Err(io_err)) => return Err(SteadyDnsError::IoError(io_err)),
        Err(_) => {
            warn!("{what} timed out after {timeout_secs}s");
            return Err(SteadyDnsError::Timeout(what.to_string()));
        }
    };

    if output.status.success() {
        debug!("{what} succeeded");
        return Ok(());
    }

    Err(SteadyDnsError::ValidatorFailed {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        status: output.status.code(),
    })
}

fn build_command(
    external: &ExternalCommand,
    substitutions: &[(&str, &str)],
) -> Command {
    match external {
        ExternalCommand::Path(path) => {
            let mut command = Command::new(path);
            for (_, value) in substitutions {
                command.arg(value);
            }
            command
        }
        ExternalCommand::ShellTemplate(template) => {
            let mut expanded = template.clone();
            for (key, value) in substitutions {
                expanded = expanded.replace(key, value);
            }
            let mut command = Command::new("sh");
            command.arg("-c").arg(expanded);
            command
        }
    }
}

/// Validates the main nameserver config, e.g. `check-conf <path>`.
pub async fn validate_main_config(
    external: &ExternalCommand,
    main_config_path: &str,
    timeout_secs: u64,
) -> Result<(), SteadyDnsError> {
    let command = build_command(external, &[("$MAIN_CONFIG", main_config_path)]);
    run_with_timeout(command, timeout_secs, "check-conf").await
}

/// Validates a single zone file, e.g. `check-zone <domain> <zone-file>`.
pub async fn validate_zone(
    external: &ExternalCommand,
    domain: &str,
    zone_file_path: &str,
    timeout_secs: u64,
) -> Result<(), SteadyDnsError> {
    let command = build_command(
        external,
        &[("$DOMAIN", domain), ("$ZONE_FILE", zone_file_path)],
    );
    run_with_timeout(command, timeout_secs, "check-zone").await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shell_success() {
        let command = ExternalCommand::ShellTemplate("true".to_string());
        let result = validate_main_config(&command, "/etc/named.conf", 5).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_shell_failure_surfaces_output() {
        let command = ExternalCommand::ShellTemplate("echo boom 1>&2; exit 1".to_string());
        let err = validate_main_config(&command, "/etc/named.conf", 5)
            .await
            .unwrap_err();
        match err {
            SteadyDnsError::ValidatorFailed { stderr, status, .. } => {
                assert!(stderr.contains("boom"));
                assert_eq!(status, Some(1));
            }
            other => panic!("expected ValidatorFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_placeholder_substitution() {
        let command = ExternalCommand::ShellTemplate(
            "test \"$DOMAIN\" = example.com && test \"$ZONE_FILE\" = /tmp/example.com.zone"
                .to_string(),
        );
        let result = validate_zone(&command, "example.com", "/tmp/example.com.zone", 5).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_timeout() {
        let command = ExternalCommand::ShellTemplate("sleep 2".to_string());
        let err = validate_main_config(&command, "/etc/named.conf", 0)
            .await
            .unwrap_err();
        assert!(matches!(err, SteadyDnsError::Timeout(_)));
    }
}
