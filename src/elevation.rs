//! Privilege elevation for ip6tables invocations
//!
//! Modifying the mangle table needs `CAP_NET_ADMIN`. When fakehttp-ipt6 is
//! not already running as root, every ip6tables invocation is wrapped in an
//! elevation helper:
//!
//! - **Preferred**: `run0` when available (systemd v256+, no SUID)
//! - **Terminal fallback**: `sudo`
//! - **Non-interactive fallback**: `pkexec`
//!
//! # Environment Variables
//!
//! - `FAKEHTTP_ELEVATION_METHOD`: Force a specific elevation method (`sudo`, `run0`, or `pkexec`).
//! - `FAKEHTTP_IP6TABLES_COMMAND`: Use a different ip6tables binary (e.g. `ip6tables-legacy`,
//!   or a mock script in tests).
//! - `FAKEHTTP_TEST_NO_ELEVATION`: Bypass elevation entirely (for testing only).
//!
//! # Security
//!
//! - Only the ip6tables binary can be elevated
//! - Commands are constructed without shell interpolation

use std::path::{Path, PathBuf};
use tokio::process::Command;

/// ip6tables binary used when no override is set.
///
/// Distro packagers can bake in an absolute path with
/// `FAKEHTTP_SYSTEM_IP6TABLES=/usr/sbin/ip6tables cargo build`.
pub const DEFAULT_IP6TABLES: &str = match option_env!("FAKEHTTP_SYSTEM_IP6TABLES") {
    Some(path) => path,
    None => "ip6tables",
};

/// Error type for privilege elevation operations
#[derive(Debug, thiserror::Error)]
pub enum ElevationError {
    /// pkexec binary not found in PATH
    #[error("pkexec not found - please install PolicyKit")]
    PkexecNotFound,

    /// Requested elevation method is not available (binary not found)
    #[error("Elevation method '{0}' is not available (binary not found)")]
    MethodNotAvailable(String),

    /// Invalid value for `FAKEHTTP_ELEVATION_METHOD`
    #[error("Invalid FAKEHTTP_ELEVATION_METHOD '{0}'. Valid options: sudo, run0, pkexec")]
    InvalidMethod(String),
}

/// Resolves the ip6tables binary, honoring `FAKEHTTP_IP6TABLES_COMMAND`
pub fn ip6tables_program() -> PathBuf {
    std::env::var_os("FAKEHTTP_IP6TABLES_COMMAND")
        .filter(|p| !p.is_empty())
        .map_or_else(|| PathBuf::from(DEFAULT_IP6TABLES), PathBuf::from)
}

/// Checks if a binary exists in PATH
fn binary_exists(name: &str) -> bool {
    std::env::var_os("PATH")
        .and_then(|paths| {
            std::env::split_paths(&paths).find_map(|dir| {
                let full_path = dir.join(name);
                if full_path.is_file() {
                    Some(full_path)
                } else {
                    None
                }
            })
        })
        .is_some()
}

fn wrapped(helper: &str, program: &Path, args: &[&str]) -> Command {
    let mut cmd = Command::new(helper);
    cmd.arg(program).args(args);
    cmd
}

fn direct(program: &Path, args: &[&str]) -> Command {
    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd
}

/// Builds an `ip6tables` command, wrapped in an elevation helper when needed.
///
/// # Errors
///
/// Returns `Err` if the requested or required elevation helper is missing,
/// or `FAKEHTTP_ELEVATION_METHOD` names an unknown method.
pub fn create_elevated_ip6tables_command(
    program: &Path,
    args: &[&str],
) -> Result<Command, ElevationError> {
    use std::os::fd::AsFd;

    // 1. Strict Test Mode Override (Highest Priority)
    if std::env::var_os("FAKEHTTP_TEST_NO_ELEVATION").is_some() {
        return Ok(direct(program, args));
    }

    // 2. Direct Root Execution (No prompt needed)
    if nix::unistd::getuid().is_root() {
        return Ok(direct(program, args));
    }

    // 3. Explicit elevation method override (for sudoers NOPASSWD setups, etc.)
    if let Ok(method) = std::env::var("FAKEHTTP_ELEVATION_METHOD") {
        let method = method.to_lowercase();
        if !method.is_empty() {
            return match method.as_str() {
                "sudo" | "run0" | "pkexec" => {
                    if binary_exists(&method) {
                        Ok(wrapped(&method, program, args))
                    } else {
                        Err(ElevationError::MethodNotAvailable(method))
                    }
                }
                _ => Err(ElevationError::InvalidMethod(method)),
            };
        }
    }

    // 4. Automatic detection - prefer run0 (modern, no SUID), fallback to sudo/pkexec
    if binary_exists("run0") {
        return Ok(wrapped("run0", program, args));
    }

    let is_atty = nix::unistd::isatty(std::io::stdin().as_fd()).unwrap_or(false);

    if is_atty {
        Ok(wrapped("sudo", program, args))
    } else {
        if !binary_exists("pkexec") {
            return Err(ElevationError::PkexecNotFound);
        }
        Ok(wrapped("pkexec", program, args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_helpers::ENV_VAR_MUTEX;
    use std::ffi::OsStr;

    #[test]
    fn test_binary_exists() {
        // sh should exist on all Unix systems
        assert!(binary_exists("sh"));
        // This should not exist
        assert!(!binary_exists("fakehttp_nonexistent_binary_xyz"));
    }

    #[test]
    fn test_test_mode_runs_directly() {
        let _guard = ENV_VAR_MUTEX.lock().unwrap();
        crate::core::test_helpers::disable_elevation();

        let cmd = create_elevated_ip6tables_command(Path::new("ip6tables"), &["-w", "-L"]).unwrap();
        assert_eq!(cmd.as_std().get_program(), "ip6tables");
        let args: Vec<&OsStr> = cmd.as_std().get_args().collect();
        assert_eq!(args, vec!["-w", "-L"]);
    }

    #[test]
    fn test_ip6tables_program_override() {
        let _guard = ENV_VAR_MUTEX.lock().unwrap();

        unsafe {
            std::env::set_var("FAKEHTTP_IP6TABLES_COMMAND", "/usr/sbin/ip6tables-legacy");
        }
        assert_eq!(
            ip6tables_program(),
            PathBuf::from("/usr/sbin/ip6tables-legacy")
        );

        unsafe {
            std::env::set_var("FAKEHTTP_IP6TABLES_COMMAND", "");
        }
        assert_eq!(ip6tables_program(), PathBuf::from(DEFAULT_IP6TABLES));

        unsafe {
            std::env::remove_var("FAKEHTTP_IP6TABLES_COMMAND");
        }
        assert_eq!(ip6tables_program(), PathBuf::from(DEFAULT_IP6TABLES));
    }

    #[test]
    fn test_invalid_elevation_method() {
        let _guard = ENV_VAR_MUTEX.lock().unwrap();

        // Running as root short-circuits before the method is looked at
        if nix::unistd::getuid().is_root() {
            return;
        }

        // Clear test mode and set invalid method
        unsafe {
            std::env::remove_var("FAKEHTTP_TEST_NO_ELEVATION");
            std::env::set_var("FAKEHTTP_ELEVATION_METHOD", "invalid_method");
        }

        let result = create_elevated_ip6tables_command(Path::new("ip6tables"), &["-L"]);

        // Restore test mode for other tests
        unsafe {
            std::env::set_var("FAKEHTTP_TEST_NO_ELEVATION", "1");
            std::env::remove_var("FAKEHTTP_ELEVATION_METHOD");
        }

        assert!(matches!(result, Err(ElevationError::InvalidMethod(_))));
    }

    #[test]
    fn test_elevation_method_case_insensitive() {
        let _guard = ENV_VAR_MUTEX.lock().unwrap();

        if nix::unistd::getuid().is_root() {
            return;
        }

        unsafe {
            std::env::remove_var("FAKEHTTP_TEST_NO_ELEVATION");
            std::env::set_var("FAKEHTTP_ELEVATION_METHOD", "SUDO");
        }

        let result = create_elevated_ip6tables_command(Path::new("ip6tables"), &["-L"]);

        // Restore test mode
        unsafe {
            std::env::set_var("FAKEHTTP_TEST_NO_ELEVATION", "1");
            std::env::remove_var("FAKEHTTP_ELEVATION_METHOD");
        }

        // Should succeed (sudo exists) or fail with MethodNotAvailable (sudo doesn't exist)
        // but NOT InvalidMethod
        assert!(!matches!(result, Err(ElevationError::InvalidMethod(_))));
        if let Ok(cmd) = result {
            assert_eq!(cmd.as_std().get_program(), "sudo");
        }
    }
}
