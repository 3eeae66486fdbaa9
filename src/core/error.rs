use crate::core::provision::Step;
use thiserror::Error;

/// Core error types for fakehttp-ipt6
#[derive(Debug, Error)]
pub enum Error {
    /// A runtime value does not fit its fixed-size command token
    #[error("Cannot format {field} '{value}': longer than {limit} characters")]
    Format {
        field: &'static str,
        value: String,
        limit: usize,
    },

    /// ip6tables failed to spawn or exited non-zero
    #[error("`{command}` failed ({}): {}", describe_exit(*.exit_code), trimmed(.stderr))]
    Execution {
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    /// A mandatory or interface-scoping step failed
    #[error("{step} failed: {source}")]
    Step {
        step: Step,
        #[source]
        source: Box<Error>,
    },
}

fn trimmed(text: &str) -> &str {
    text.trim()
}

fn describe_exit(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exit status {code}"),
        None => "not started".to_string(),
    }
}

impl Error {
    /// Innermost error, unwrapping step context
    pub fn root(&self) -> &Error {
        match self {
            Error::Step { source, .. } => source.root(),
            other => other,
        }
    }

    /// The provisioning step that failed, if this error came from one
    pub fn step(&self) -> Option<&Step> {
        match self {
            Error::Step { step, .. } => Some(step),
            _ => None,
        }
    }

    /// Maps the error to a user-facing explanation
    pub fn translate(&self) -> ErrorTranslation {
        match self.root() {
            Error::Execution { stderr, .. } => Ip6tablesErrorPattern::match_error(stderr),
            Error::Format { field, limit, .. } => {
                ErrorTranslation::new(format!("The {field} is too long for ip6tables"))
                    .with_suggestion(format!("Use at most {limit} characters"))
            }
            other => ErrorTranslation::new(other.to_string()),
        }
    }
}

/// Represents a translated error with helpful context
#[derive(Debug, Clone)]
pub struct ErrorTranslation {
    pub user_message: String,
    pub suggestions: Vec<String>,
    pub help_url: Option<String>,
}

impl ErrorTranslation {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            user_message: message.into(),
            suggestions: Vec::new(),
            help_url: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub fn with_help(mut self, url: impl Into<String>) -> Self {
        self.help_url = Some(url.into());
        self
    }
}

/// Database of ip6tables error patterns and their translations
pub struct Ip6tablesErrorPattern;

impl Ip6tablesErrorPattern {
    /// Matches an error message against known patterns and returns a user-friendly translation.
    pub fn match_error(msg: &str) -> ErrorTranslation {
        let lower = msg.to_lowercase();

        // Permission errors
        if lower.contains("permission denied")
            || lower.contains("operation not permitted")
            || lower.contains("you must be root")
        {
            return ErrorTranslation::new("Insufficient permissions to modify ip6tables rules")
                .with_suggestion("Run as root, or make sure sudo/run0/pkexec is available")
                .with_suggestion("Check if CAP_NET_ADMIN capability is available");
        }

        // Missing ip6tables
        if lower.contains("no such file or directory (os error 2)")
            || lower.contains("command not found")
        {
            return ErrorTranslation::new("ip6tables is not installed or not found in PATH")
                .with_suggestion("Install iptables: sudo apt install iptables  (Debian/Ubuntu)")
                .with_suggestion("Or: sudo dnf install iptables  (Fedora/RHEL)")
                .with_suggestion("Or: sudo pacman -S iptables  (Arch)")
                .with_suggestion("Or point FAKEHTTP_IP6TABLES_COMMAND at the binary");
        }

        // xtables lock held by another process
        if lower.contains("xtables lock") || lower.contains("resource temporarily unavailable") {
            return ErrorTranslation::new("Another process is holding the xtables lock")
                .with_suggestion("Wait for the other firewall tool to finish and try again")
                .with_suggestion(
                    "Check for conflicting firewall managers: sudo systemctl status firewalld ufw",
                );
        }

        // NFQUEUE target missing
        if lower.contains("nfqueue") {
            return ErrorTranslation::new("The NFQUEUE target is not available")
                .with_suggestion("Load the module: sudo modprobe xt_NFQUEUE")
                .with_suggestion(
                    "Make sure the kernel was built with CONFIG_NETFILTER_XT_TARGET_NFQUEUE",
                );
        }

        // Missing match extension (connbytes, length, connmark, ...)
        if lower.contains("couldn't load match") || lower.contains("couldn't load target") {
            return ErrorTranslation::new("A required ip6tables extension is not available")
                .with_suggestion("Check kernel modules: lsmod | grep xt_")
                .with_suggestion("Load missing modules, e.g. sudo modprobe xt_connmark")
                .with_help("https://www.netfilter.org/documentation/");
        }

        // mangle table missing
        if lower.contains("can't initialize ip6tables table")
            || lower.contains("table does not exist")
        {
            return ErrorTranslation::new("The IPv6 mangle table is not available")
                .with_suggestion("Load the module: sudo modprobe ip6table_mangle")
                .with_suggestion("Verify ip6tables works: sudo ip6tables -t mangle -L");
        }

        // Leftovers from a previous run
        if lower.contains("chain already exists") {
            return ErrorTranslation::new("FakeHTTP chains already exist")
                .with_suggestion("A previous run did not clean up")
                .with_suggestion("Run `fakehttp-ipt6 cleanup` and try again");
        }

        // Chain still referenced or not empty
        if lower.contains("too many links") || lower.contains("directory not empty") {
            return ErrorTranslation::new("Chain is still referenced by another rule")
                .with_suggestion("Another rule jumps to the FakeHTTP chains")
                .with_suggestion("Inspect with: sudo ip6tables -t mangle -S");
        }

        // Chain missing
        if lower.contains("no chain/target/match by that name") {
            return ErrorTranslation::new("Chain, target or match not found")
                .with_suggestion("Ensure the chain exists before adding rules to it")
                .with_suggestion("The kernel may lack a required xt_* module");
        }

        // Invalid interface
        if lower.contains("interface") && lower.contains("invalid") {
            return ErrorTranslation::new("Network interface name rejected")
                .with_suggestion("Check available interfaces: ip link show")
                .with_suggestion("Interface names are case-sensitive and max 15 chars");
        }

        // Generic fallback
        ErrorTranslation::new(format!("Firewall error: {}", msg.trim()))
            .with_suggestion("Check the detailed error message for more information")
            .with_suggestion("Verify ip6tables is working: sudo ip6tables -t mangle -S")
    }
}

pub type Result<T> = std::result::Result<T, Error>;
