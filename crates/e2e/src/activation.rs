//! Extension activation detection from extension host logs

use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::{E2eError, E2eResult};
use crate::wait::Poller;

/// What the extension host logs say about one extension
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivationState {
    Pending,
    Activated,
    Failed(String),
}

/// Scans `<user-data-dir>/logs/**/exthost*.log`
#[derive(Debug, Clone)]
pub struct ActivationProbe {
    logs_dir: PathBuf,
    activated: Regex,
    failed: Regex,
    extension_id: String,
}

impl ActivationProbe {
    pub fn new(user_data_dir: &Path, extension_id: &str) -> E2eResult<Self> {
        let id = regex::escape(extension_id);
        let activated = Regex::new(&format!(
            r"(?im)ExtensionService#_doActivateExtension\s+{}(?:,|\s|$)",
            id
        ))
        .map_err(|e| E2eError::Config(e.to_string()))?;
        let failed = Regex::new(&format!(r"(?im)Activating extension '{}' failed:?\s*(.*)$", id))
            .map_err(|e| E2eError::Config(e.to_string()))?;

        Ok(Self {
            logs_dir: user_data_dir.join("logs"),
            activated,
            failed,
            extension_id: extension_id.to_string(),
        })
    }

    /// Read every extension host log once
    pub fn scan(&self) -> E2eResult<ActivationState> {
        if !self.logs_dir.exists() {
            return Ok(ActivationState::Pending);
        }

        let mut activated = false;
        for entry in WalkDir::new(&self.logs_dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let name = entry.file_name().to_string_lossy();
            if !(name.starts_with("exthost") && name.ends_with(".log")) {
                continue;
            }

            // The host may be mid-write; a partial read is fine
            let content = match std::fs::read(entry.path()) {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(_) => continue,
            };

            if let Some(captures) = self.failed.captures(&content) {
                let reason = captures
                    .get(1)
                    .map(|m| m.as_str().trim().to_string())
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| "see extension host log".to_string());
                return Ok(ActivationState::Failed(reason));
            }
            activated |= self.activated.is_match(&content);
        }

        Ok(if activated {
            ActivationState::Activated
        } else {
            ActivationState::Pending
        })
    }

    /// Poll the logs until the extension activates, fails, or `timeout` passes
    pub async fn wait(&self, timeout: Duration) -> E2eResult<()> {
        info!("Waiting for extension '{}' to activate...", self.extension_id);

        let polled = Poller::new(timeout)
            .poll(move || async move {
                match self.scan()? {
                    ActivationState::Pending => Ok(None),
                    ActivationState::Activated => Ok(Some(())),
                    ActivationState::Failed(reason) => Err(E2eError::ActivationFailed {
                        extension_id: self.extension_id.clone(),
                        reason,
                    }),
                }
            })
            .await?;

        polled.ready_or(|elapsed| E2eError::Timeout {
            waiting_for: format!("activation of extension '{}'", self.extension_id),
            elapsed,
        })?;

        debug!("Extension '{}' activated", self.extension_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "JoshSmithXRM.power-platform-developer-suite";

    fn write_log(udd: &Path, body: &str) {
        let dir = udd.join("logs/20261016T101500/window1/exthost");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("exthost.log"), body).unwrap();
    }

    #[test]
    fn test_pending_without_logs() {
        let udd = tempfile::tempdir().unwrap();
        let probe = ActivationProbe::new(udd.path(), ID).unwrap();
        assert_eq!(probe.scan().unwrap(), ActivationState::Pending);
    }

    #[test]
    fn test_activation_record_is_case_insensitive() {
        let udd = tempfile::tempdir().unwrap();
        write_log(
            udd.path(),
            "2026-10-16 10:15:02.114 [info] ExtensionService#_doActivateExtension \
             joshsmithxrm.power-platform-developer-suite, startup: false, activationEvent: 'onStartupFinished'\n",
        );
        let probe = ActivationProbe::new(udd.path(), ID).unwrap();
        assert_eq!(probe.scan().unwrap(), ActivationState::Activated);
    }

    #[test]
    fn test_prefix_of_another_id_does_not_match() {
        let udd = tempfile::tempdir().unwrap();
        write_log(
            udd.path(),
            "[info] ExtensionService#_doActivateExtension JoshSmithXRM.power-platform-developer-suite-preview, startup: false\n",
        );
        let probe = ActivationProbe::new(udd.path(), ID).unwrap();
        assert_eq!(probe.scan().unwrap(), ActivationState::Pending);
    }

    #[test]
    fn test_failure_record_wins() {
        let udd = tempfile::tempdir().unwrap();
        write_log(
            udd.path(),
            "[info] ExtensionService#_doActivateExtension JoshSmithXRM.power-platform-developer-suite, startup: false\n\
             [error] Activating extension 'JoshSmithXRM.power-platform-developer-suite' failed: Cannot find module './dist/extension.js'\n",
        );
        let probe = ActivationProbe::new(udd.path(), ID).unwrap();
        assert_eq!(
            probe.scan().unwrap(),
            ActivationState::Failed("Cannot find module './dist/extension.js'".to_string())
        );
    }

    #[tokio::test]
    async fn test_wait_times_out_naming_extension() {
        let udd = tempfile::tempdir().unwrap();
        let probe = ActivationProbe::new(udd.path(), ID).unwrap();

        let err = probe.wait(Duration::from_millis(200)).await.unwrap_err();
        assert!(err.is_timeout());
        assert!(err.to_string().contains(ID));
    }

    #[tokio::test]
    async fn test_wait_sees_late_activation() {
        let udd = tempfile::tempdir().unwrap();
        let probe = ActivationProbe::new(udd.path(), ID).unwrap();

        let path = udd.path().to_path_buf();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            write_log(
                &path,
                "[info] ExtensionService#_doActivateExtension JoshSmithXRM.power-platform-developer-suite, startup: true\n",
            );
        });

        probe.wait(Duration::from_secs(5)).await.unwrap();
    }
}
