//! On-disk layout of a managed installation
//!
//! Only the locations the supervisor core needs are modelled here: the tool
//! and build directories used by deployments, the deployment log, and the
//! per-server log directories used by process reconciliation.

use std::path::{Path, PathBuf};

/// File name pattern a server's output log must follow
pub fn server_output_log_name(id: u32) -> String {
    format!("{}_output.log", server_name(id))
}

pub fn server_name(id: u32) -> String {
    format!("Server{}", id)
}

/// Directory conventions rooted at the trusted installation root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallLayout {
    root: PathBuf,
}

impl InstallLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn steamcmd_dir(&self) -> PathBuf {
        self.root.join("bin").join("steamcmd")
    }

    pub fn release_dir(&self) -> PathBuf {
        self.root.join("bin").join("release")
    }

    pub fn beta_dir(&self) -> PathBuf {
        self.root.join("bin").join("beta")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Append-only log written by the deployment workflow
    pub fn update_log_file(&self) -> PathBuf {
        self.logs_dir().join("updates.log")
    }

    pub fn server_dir(&self, id: u32) -> PathBuf {
        self.root.join(server_name(id))
    }

    pub fn server_logs_dir(&self, id: u32) -> PathBuf {
        self.server_dir(id).join("logs")
    }

    pub fn server_output_file(&self, id: u32) -> PathBuf {
        self.server_logs_dir(id).join(server_output_log_name(id))
    }

    /// Expected log directory lookup for the process reconciler
    pub fn expected_dir_fn(&self) -> impl Fn(u32) -> PathBuf + Send + Sync + 'static {
        let layout = self.clone();
        move |id| layout.server_logs_dir(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_paths() {
        let layout = InstallLayout::new("/srv/sdsm");
        assert_eq!(layout.steamcmd_dir(), PathBuf::from("/srv/sdsm/bin/steamcmd"));
        assert_eq!(layout.update_log_file(), PathBuf::from("/srv/sdsm/logs/updates.log"));
        assert_eq!(
            layout.server_output_file(3),
            PathBuf::from("/srv/sdsm/Server3/logs/Server3_output.log")
        );
        let expected = layout.expected_dir_fn();
        assert_eq!(expected(2), PathBuf::from("/srv/sdsm/Server2/logs"));
    }
}
