//! Run-directory layout: `log/job/<point>/<task>/<submit-num>/`,
//! `log/scheduler/`, `share/`, and `.service/` (contact file, auth token,
//! run database). `RunDir` creates/resolves this layout; `ContactFile` is
//! the discovery mechanism the read-only query binary uses to find a live
//! scheduler.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use common::utils::{current_timestamp, encode_base64};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContactFile {
    pub host: String,
    pub port: u16,
    pub pid: u32,
    pub uuid: String,
    pub api_version: u32,
    pub started_at: u64,
}

impl ContactFile {
    pub fn new(host: impl Into<String>, port: u16, api_version: u32) -> Self {
        ContactFile {
            host: host.into(),
            port,
            pid: std::process::id(),
            uuid: encode_base64(&format!("{}-{}", current_timestamp(), std::process::id())),
            api_version,
            started_at: current_timestamp(),
        }
    }

    pub fn to_toml(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn from_toml(s: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(s)?)
    }
}

pub struct RunDir {
    root: PathBuf,
}

impl RunDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        RunDir { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn service_dir(&self) -> PathBuf {
        self.root.join(".service")
    }

    pub fn contact_file_path(&self) -> PathBuf {
        self.service_dir().join("contact")
    }

    pub fn run_database_path(&self) -> PathBuf {
        self.service_dir().join("run.db")
    }

    pub fn scheduler_log_dir(&self) -> PathBuf {
        self.root.join("log").join("scheduler")
    }

    pub fn share_dir(&self) -> PathBuf {
        self.root.join("share")
    }

    pub fn job_log_dir(&self, point: &str, task_name: &str, submit_num: u32) -> PathBuf {
        self.root
            .join("log")
            .join("job")
            .join(point)
            .join(task_name)
            .join(submit_num.to_string())
    }

    /// Create every subdirectory of the run-directory layout.
    pub fn ensure_layout(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.service_dir())?;
        std::fs::create_dir_all(self.scheduler_log_dir())?;
        std::fs::create_dir_all(self.share_dir())?;
        std::fs::create_dir_all(self.root.join("log").join("job"))?;
        Ok(())
    }

    /// Write the contact file, marking the scheduler discoverable.
    pub fn write_contact_file(&self, contact: &ContactFile) -> anyhow::Result<()> {
        self.ensure_layout()?;
        std::fs::write(self.contact_file_path(), contact.to_toml()?)?;
        Ok(())
    }

    /// Remove the contact file on clean shutdown.
    pub fn remove_contact_file(&self) -> std::io::Result<()> {
        let path = self.contact_file_path();
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    pub fn read_contact_file(&self) -> anyhow::Result<ContactFile> {
        let text = std::fs::read_to_string(self.contact_file_path())?;
        ContactFile::from_toml(&text)
    }
}
