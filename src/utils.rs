//! Utility functions for directory management and system integration
//!
//! This module provides helper functions following the XDG Base Directory specification
//! for portable configuration and state storage across Linux distributions.
//!
//! # Directory Structure
//!
//! - Config: `~/.config/fakehttp-ipt6/` - `config.json`
//! - State: `~/.local/state/fakehttp-ipt6/` - audit log and optional log file
//!
//! # Example
//!
//! ```no_run
//! use fakehttp_ipt6::utils::{ensure_dirs, get_config_dir};
//!
//! // Ensure directories exist before use
//! ensure_dirs().expect("Failed to create directories");
//!
//! if let Some(config_path) = get_config_dir() {
//!     // Load configuration from config_path
//! }
//! ```

use directories::ProjectDirs;
use std::path::PathBuf;

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "fakehttp", "fakehttp-ipt6")
}

pub fn get_config_dir() -> Option<PathBuf> {
    project_dirs().map(|pd| pd.config_dir().to_path_buf())
}

pub fn get_state_dir() -> Option<PathBuf> {
    project_dirs().and_then(|pd| pd.state_dir().map(std::path::Path::to_path_buf))
}

pub fn ensure_dirs() -> std::io::Result<()> {
    use std::fs::DirBuilder;
    use std::os::unix::fs::DirBuilderExt;

    let mut builder = DirBuilder::new();
    builder.mode(0o700); // User read/write/execute only
    builder.recursive(true);

    if let Some(dir) = get_config_dir() {
        builder.create(dir)?;
    }
    if let Some(dir) = get_state_dir() {
        builder.create(dir)?;
    }

    Ok(())
}

/// Network interfaces currently known to the kernel, sorted by name
pub fn list_interfaces() -> Vec<String> {
    let mut interfaces = Vec::new();
    if let Ok(entries) = std::fs::read_dir("/sys/class/net") {
        for entry in entries.flatten() {
            if let Ok(name) = entry.file_name().into_string() {
                interfaces.push(name);
            }
        }
    }
    interfaces.sort();
    interfaces
}

/// Configured names that match no current interface.
///
/// Wildcards (`eth+`) match by prefix. Interfaces may legitimately appear
/// after setup, so callers should only warn about these.
pub fn unknown_interfaces<'a>(configured: &'a [String], present: &[String]) -> Vec<&'a str> {
    configured
        .iter()
        .filter(|name| !name.is_empty())
        .filter(|name| match name.strip_suffix('+') {
            Some(prefix) => !present.iter().any(|p| p.starts_with(prefix)),
            None => !present.contains(name),
        })
        .map(String::as_str)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dirs_are_namespaced() {
        if let Some(dir) = get_config_dir() {
            assert!(dir.ends_with("fakehttp-ipt6"));
        }
        if let Some(dir) = get_state_dir() {
            assert!(dir.ends_with("fakehttp-ipt6"));
        }
    }

    #[test]
    fn test_list_interfaces_sorted() {
        let interfaces = list_interfaces();
        let mut sorted = interfaces.clone();
        sorted.sort();
        assert_eq!(interfaces, sorted);
    }

    #[test]
    fn test_unknown_interfaces() {
        let present = vec!["eth0".to_string(), "lo".to_string(), "veth12".to_string()];
        let configured = vec![
            "eth0".to_string(),
            "wlan0".to_string(),
            "veth+".to_string(),
            "br+".to_string(),
        ];

        assert_eq!(unknown_interfaces(&configured, &present), vec!["wlan0", "br+"]);
    }
}
