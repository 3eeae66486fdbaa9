//! ip6tables rule set construction
//!
//! Everything in this module is pure data: it describes the exact ordered
//! `ip6tables` invocations that divert IPv6 TCP traffic into the inspection
//! queue, without executing any of them. The [`provision`](super::provision)
//! driver turns a [`RulePlan`] into process invocations.
//!
//! # Layout
//!
//! ```text
//! mangle PREROUTING ──▶ FAKEHTTP ──(-i <iface> | all)──▶ FAKEHTTP_R
//!                                                         ├─ optional: big conns / big packets → RETURN
//!                                                         ├─ mark exclusions → RETURN
//!                                                         ├─ reserved source prefixes → RETURN
//!                                                         └─ tcp ACK-only → NFQUEUE (bypass)
//! ```

use crate::core::error::{Error, Result};
use std::fmt;

/// Packet-filter table every command targets
pub const TABLE: &str = "mangle";

/// Entry chain, jumped to from PREROUTING
pub const ENTRY_CHAIN: &str = "FAKEHTTP";

/// Redirect chain holding the exclusions and the queue rule
pub const REDIRECT_CHAIN: &str = "FAKEHTTP_R";

/// Maximum number of configured interfaces considered for scoping
pub const MAX_INTERFACES: usize = 64;

/// Kernel interface-name buffer size, including the trailing NUL
pub const IFNAMSIZ: usize = 16;

/// Buffer size for the rendered `mark/mask` token
pub const XMARK_CAPACITY: usize = 64;

/// Buffer size for the rendered queue number token
pub const QUEUE_NUM_CAPACITY: usize = 32;

/// Connections with more packets than this (either direction) are skipped
pub const CONNBYTES_RANGE: &str = "0:32";

/// Packets longer than this are skipped
pub const LENGTH_RANGE: &str = "0:120";

/// Source prefixes that must never reach the inspection queue.
///
/// Unspecified/loopback, IPv4-mapped, both NAT64 prefixes, 6to4,
/// unique-local and link-local.
pub const EXCLUDED_SOURCES: [&str; 7] = [
    "::/127",
    "::ffff:0:0/96",
    "64:ff9b::/96",
    "64:ff9b:1::/48",
    "2002::/16",
    "fc00::/7",
    "fe80::/10",
];

/// Standard mangle hooks the entry chain may have been attached to.
///
/// Only PREROUTING is ever used by setup; cleanup unlinks from all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::EnumIter)]
pub enum Hook {
    Prerouting,
    Input,
    Forward,
    Output,
    Postrouting,
}

impl Hook {
    pub const fn as_str(self) -> &'static str {
        match self {
            Hook::Prerouting => "PREROUTING",
            Hook::Input => "INPUT",
            Hook::Forward => "FORWARD",
            Hook::Output => "OUTPUT",
            Hook::Postrouting => "POSTROUTING",
        }
    }
}

/// Phase a rule belongs to.
///
/// Determines how the driver treats a failure of that rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum Stage {
    /// Teardown; every failure is ignored
    Cleanup,
    /// Chains, exclusions and the queue rule; first failure aborts
    Mandatory,
    /// Extra exclusions needing optional match modules; failures are skipped
    Optional,
    /// Jumps from the entry chain into the redirect chain; first failure aborts
    Interface,
}

/// Values the rule set is parameterized by.
///
/// Produced by the configuration layer and read-only here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeParameters {
    pub mark: u32,
    pub mask: u32,
    pub queue_num: u32,
    /// Ingress interfaces to scope to, in order. An empty entry ends the list.
    pub interfaces: Vec<String>,
    pub all_interfaces: bool,
}

/// One argument of an ip6tables invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Literal(&'static str),
    /// Replaced with the rendered `mark/mask` pair
    XMark,
    /// Replaced with the rendered queue number
    QueueNum,
    /// Ingress interface name, already checked against [`IFNAMSIZ`]
    Interface(String),
}

/// A single ip6tables invocation, minus the program name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSpec {
    stage: Stage,
    tokens: Vec<Token>,
}

impl RuleSpec {
    /// Starts `-w -t mangle <op> <chain>`
    fn mangle(stage: Stage, op: &'static str, chain: &'static str) -> Self {
        Self {
            stage,
            tokens: vec![
                Token::Literal("-w"),
                Token::Literal("-t"),
                Token::Literal(TABLE),
                Token::Literal(op),
                Token::Literal(chain),
            ],
        }
    }

    fn args(mut self, args: &[&'static str]) -> Self {
        self.tokens.extend(args.iter().copied().map(Token::Literal));
        self
    }

    fn xmark(mut self) -> Self {
        self.tokens.push(Token::XMark);
        self
    }

    fn queue_num(mut self) -> Self {
        self.tokens.push(Token::QueueNum);
        self
    }

    fn interface(mut self, name: String) -> Self {
        self.tokens.push(Token::Interface(name));
        self
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    /// The ip6tables operation flag (`-N`, `-A`, `-I`, `-F`, `-D`, `-X`)
    pub fn operation(&self) -> &'static str {
        match self.tokens.get(3) {
            Some(Token::Literal(op)) => *op,
            _ => "",
        }
    }

    /// Chain the operation targets
    pub fn chain(&self) -> &'static str {
        match self.tokens.get(4) {
            Some(Token::Literal(chain)) => *chain,
            _ => "",
        }
    }

    /// Target of `-j`, if the rule has one
    pub fn jump_target(&self) -> Option<&'static str> {
        self.tokens
            .iter()
            .position(|t| *t == Token::Literal("-j"))
            .and_then(|i| match self.tokens.get(i + 1) {
                Some(Token::Literal(target)) => Some(*target),
                _ => None,
            })
    }

    /// Interface matched with `-i`, if any
    pub fn interface_name(&self) -> Option<&str> {
        self.tokens.iter().find_map(|t| match t {
            Token::Interface(name) => Some(name.as_str()),
            _ => None,
        })
    }

    pub fn has_placeholders(&self) -> bool {
        self.tokens
            .iter()
            .any(|t| matches!(t, Token::XMark | Token::QueueNum))
    }

    /// Substitutes placeholders and returns the argument vector
    pub fn render(&self, subst: &Substitutions) -> Vec<String> {
        self.tokens
            .iter()
            .map(|t| match t {
                Token::Literal(s) => (*s).to_string(),
                Token::XMark => subst.xmark.clone(),
                Token::QueueNum => subst.queue_num.clone(),
                Token::Interface(name) => name.clone(),
            })
            .collect()
    }
}

/// Rendered placeholder values shared by every rule of a plan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Substitutions {
    pub xmark: String,
    pub queue_num: String,
}

impl Substitutions {
    /// Renders `mark/mask` and the queue number into their fixed-size tokens.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Format`] if a rendered value does not fit its token.
    pub fn new(params: &RuntimeParameters) -> Result<Self> {
        Ok(Self {
            xmark: fixed_token(
                "mark/mask",
                format!("{}/{}", params.mark, params.mask),
                XMARK_CAPACITY,
            )?,
            queue_num: fixed_token(
                "queue number",
                params.queue_num.to_string(),
                QUEUE_NUM_CAPACITY,
            )?,
        })
    }
}

/// Rejects values that would not fit a NUL-terminated buffer of `capacity` bytes.
///
/// Never truncates.
pub fn fixed_token(field: &'static str, value: String, capacity: usize) -> Result<String> {
    if value.len() >= capacity {
        return Err(Error::Format {
            field,
            value,
            limit: capacity - 1,
        });
    }
    Ok(value)
}

/// Teardown sequence, in dependency order: flush both chains, unlink the
/// entry chain from every hook, then delete redirect before entry.
pub fn cleanup_rules() -> Vec<RuleSpec> {
    use strum::IntoEnumIterator;

    let mut rules = vec![
        RuleSpec::mangle(Stage::Cleanup, "-F", REDIRECT_CHAIN),
        RuleSpec::mangle(Stage::Cleanup, "-F", ENTRY_CHAIN),
    ];
    rules.extend(
        Hook::iter().map(|hook| {
            RuleSpec::mangle(Stage::Cleanup, "-D", hook.as_str()).args(&["-j", ENTRY_CHAIN])
        }),
    );
    rules.push(RuleSpec::mangle(Stage::Cleanup, "-X", REDIRECT_CHAIN));
    rules.push(RuleSpec::mangle(Stage::Cleanup, "-X", ENTRY_CHAIN));
    rules
}

/// Chains, exclusions and the terminal queue rule, in installation order.
pub fn mandatory_rules() -> Vec<RuleSpec> {
    let m = Stage::Mandatory;
    let mut rules = vec![
        RuleSpec::mangle(m, "-N", ENTRY_CHAIN),
        RuleSpec::mangle(m, "-I", Hook::Prerouting.as_str()).args(&["-j", ENTRY_CHAIN]),
        RuleSpec::mangle(m, "-N", REDIRECT_CHAIN),
        // exclude marked packets
        RuleSpec::mangle(m, "-A", REDIRECT_CHAIN)
            .args(&["-m", "mark", "--mark"])
            .xmark()
            .args(&["-j", "CONNMARK", "--set-xmark"])
            .xmark(),
        RuleSpec::mangle(m, "-A", REDIRECT_CHAIN)
            .args(&["-m", "connmark", "--mark"])
            .xmark()
            .args(&["-j", "MARK", "--set-xmark"])
            .xmark(),
        RuleSpec::mangle(m, "-A", REDIRECT_CHAIN)
            .args(&["-m", "mark", "--mark"])
            .xmark()
            .args(&["-j", "RETURN"]),
    ];

    // exclude special IPv6 addresses
    rules.extend(EXCLUDED_SOURCES.iter().map(|&prefix| {
        RuleSpec::mangle(m, "-A", REDIRECT_CHAIN).args(&["-s", prefix, "-j", "RETURN"])
    }));

    // send to nfqueue
    rules.push(
        RuleSpec::mangle(m, "-A", REDIRECT_CHAIN)
            .args(&[
                "-p",
                "tcp",
                "--tcp-flags",
                "ACK,FIN,RST",
                "ACK",
                "-j",
                "NFQUEUE",
                "--queue-bypass",
                "--queue-num",
            ])
            .queue_num(),
    );
    rules
}

/// Best-effort exclusions inserted at the head of the redirect chain.
///
/// Each relies on a match module (`connbytes`, `length`) that some kernels
/// do not ship.
pub fn optional_rules() -> Vec<RuleSpec> {
    let o = Stage::Optional;
    vec![
        // exclude packets from connections with more than 32 packets
        RuleSpec::mangle(o, "-I", REDIRECT_CHAIN).args(&[
            "-m",
            "connbytes",
            "!",
            "--connbytes",
            CONNBYTES_RANGE,
            "--connbytes-dir",
            "both",
            "--connbytes-mode",
            "packets",
            "-j",
            "RETURN",
        ]),
        // exclude big packets
        RuleSpec::mangle(o, "-I", REDIRECT_CHAIN).args(&[
            "-m",
            "length",
            "!",
            "--length",
            LENGTH_RANGE,
            "-j",
            "RETURN",
        ]),
    ]
}

/// Jumps from the entry chain into the redirect chain.
///
/// With `all_interfaces` a single unconditional jump is produced. Otherwise
/// one `-i <name>` jump per interface, stopping at the first empty name or
/// after [`MAX_INTERFACES`] entries.
///
/// # Errors
///
/// Returns [`Error::Format`] if a name does not fit in [`IFNAMSIZ`].
pub fn interface_rules(params: &RuntimeParameters) -> Result<Vec<RuleSpec>> {
    let i = Stage::Interface;

    if params.all_interfaces {
        return Ok(vec![
            RuleSpec::mangle(i, "-A", ENTRY_CHAIN).args(&["-j", REDIRECT_CHAIN]),
        ]);
    }

    params
        .interfaces
        .iter()
        .take(MAX_INTERFACES)
        .take_while(|name| !name.is_empty())
        .map(|name| {
            let name = fixed_token("interface name", name.clone(), IFNAMSIZ)?;
            Ok(RuleSpec::mangle(i, "-A", ENTRY_CHAIN)
                .args(&["-i"])
                .interface(name)
                .args(&["-j", REDIRECT_CHAIN]))
        })
        .collect()
}

/// Every rule of one provisioning run, with its placeholders resolved up front.
///
/// Building the plan performs all formatting checks, so a plan that exists
/// can be applied without further [`Error::Format`] failures.
#[derive(Debug, Clone)]
pub struct RulePlan {
    subst: Substitutions,
    cleanup: Vec<RuleSpec>,
    mandatory: Vec<RuleSpec>,
    optional: Vec<RuleSpec>,
    interfaces: Vec<RuleSpec>,
}

impl RulePlan {
    /// # Errors
    ///
    /// Returns [`Error::Format`] if the mark/mask pair, the queue number or an
    /// interface name cannot be rendered.
    pub fn build(params: &RuntimeParameters) -> Result<Self> {
        Ok(Self {
            subst: Substitutions::new(params)?,
            cleanup: cleanup_rules(),
            mandatory: mandatory_rules(),
            optional: optional_rules(),
            interfaces: interface_rules(params)?,
        })
    }

    pub fn substitutions(&self) -> &Substitutions {
        &self.subst
    }

    pub fn stage(&self, stage: Stage) -> &[RuleSpec] {
        match stage {
            Stage::Cleanup => &self.cleanup,
            Stage::Mandatory => &self.mandatory,
            Stage::Optional => &self.optional,
            Stage::Interface => &self.interfaces,
        }
    }

    pub fn render(&self, spec: &RuleSpec) -> Vec<String> {
        spec.render(&self.subst)
    }

    /// Rendered argument vectors of one stage
    pub fn commands(&self, stage: Stage) -> Vec<Vec<String>> {
        self.stage(stage).iter().map(|s| self.render(s)).collect()
    }

    /// Shell rendering of the whole plan, one `ip6tables` line per rule,
    /// grouped by stage in execution order.
    pub fn to_script(&self, program: &str) -> String {
        use std::fmt::Write;
        use strum::IntoEnumIterator;

        let mut out = String::new();
        for stage in Stage::iter() {
            let _ = writeln!(out, "# {stage}");
            for args in self.commands(stage) {
                let _ = writeln!(out, "{}", format_command(program, &args));
            }
        }
        out
    }
}

/// Joins a program and its arguments for logs and error messages
pub fn format_command(program: &str, args: &[String]) -> String {
    let mut line = String::from(program);
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

impl fmt::Display for RuleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for token in &self.tokens {
            if !first {
                f.write_str(" ")?;
            }
            first = false;
            match token {
                Token::Literal(s) => f.write_str(s)?,
                Token::XMark => f.write_str("<mark/mask>")?,
                Token::QueueNum => f.write_str("<queue-num>")?,
                Token::Interface(name) => f.write_str(name)?,
            }
        }
        Ok(())
    }
}
