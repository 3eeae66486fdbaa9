//! Shared test utilities for core module tests
//!
//! Provides a simulated mangle table and a recording [`Executor`] so the
//! provisioning driver can be exercised without touching real ip6tables.
//! This module is only compiled in test mode.

use crate::core::error::Result;
use crate::core::executor::{ExecStatus, Executor};
use crate::core::rules::{RuntimeParameters, format_command};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Mutex for tests that need exclusive access to environment variables.
///
/// Use this when your test needs to:
/// 1. Temporarily change env vars to different values
/// 2. Restore env vars after the test
/// 3. Test behavior when env vars are absent
///
/// # Example
///
/// ```ignore
/// let _guard = ENV_VAR_MUTEX.lock().unwrap();
/// unsafe {
///     std::env::set_var("FAKEHTTP_ELEVATION_METHOD", "sudo");
/// }
/// // ... test with custom env state ...
/// unsafe {
///     std::env::remove_var("FAKEHTTP_ELEVATION_METHOD");
/// }
/// ```
pub static ENV_VAR_MUTEX: Mutex<()> = Mutex::new(());

/// Makes the real executor run ip6tables directly. Hold [`ENV_VAR_MUTEX`].
pub fn disable_elevation() {
    // SAFETY: callers hold ENV_VAR_MUTEX, and only test code touches this variable.
    unsafe {
        std::env::set_var("FAKEHTTP_TEST_NO_ELEVATION", "1");
    }
}

/// Parameters scoped to every interface
pub fn all_interfaces_params(mark: u32, mask: u32, queue_num: u32) -> RuntimeParameters {
    RuntimeParameters {
        mark,
        mask,
        queue_num,
        interfaces: Vec::new(),
        all_interfaces: true,
    }
}

/// Default mark/queue values scoped to the given interfaces
pub fn interface_params(names: &[&str]) -> RuntimeParameters {
    RuntimeParameters {
        mark: 0x8000,
        mask: 0x8000,
        queue_num: 512,
        interfaces: names.iter().map(|n| (*n).to_string()).collect(),
        all_interfaces: false,
    }
}

/// Runs a future to completion on a fresh single-threaded runtime.
///
/// For property tests, which cannot be `async`.
pub fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("test runtime")
        .block_on(future)
}

const BUILTIN_HOOKS: [&str; 5] = ["PREROUTING", "INPUT", "FORWARD", "OUTPUT", "POSTROUTING"];
const BUILTIN_TARGETS: [&str; 6] = ["RETURN", "MARK", "CONNMARK", "NFQUEUE", "ACCEPT", "DROP"];
const NO_CHAIN: &str = "ip6tables: No chain/target/match by that name.";

/// In-memory model of the ip6tables mangle table.
///
/// Enforces the constraints that make cleanup ordering matter: chains must
/// exist before use, jump targets must exist, and a chain can only be
/// deleted once it is empty and unreferenced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MangleTable {
    chains: BTreeMap<String, Vec<Vec<String>>>,
}

impl Default for MangleTable {
    fn default() -> Self {
        Self {
            chains: BUILTIN_HOOKS
                .iter()
                .map(|hook| ((*hook).to_string(), Vec::new()))
                .collect(),
        }
    }
}

impl MangleTable {
    /// Applies one `-w -t mangle <op> <chain> [rule...]` invocation
    pub fn apply(&mut self, args: &[String]) -> std::result::Result<(), String> {
        let table_pos = args
            .iter()
            .position(|a| a == "mangle")
            .ok_or_else(|| "only the mangle table is modelled".to_string())?;
        let op = args.get(table_pos + 1).map_or("", String::as_str);
        let chain = args.get(table_pos + 2).cloned().unwrap_or_default();
        let rule: Vec<String> = args
            .get(table_pos + 3..)
            .map(<[String]>::to_vec)
            .unwrap_or_default();

        match op {
            "-N" => {
                if self.chains.contains_key(&chain) {
                    return Err("ip6tables: Chain already exists.".to_string());
                }
                self.chains.insert(chain, Vec::new());
                Ok(())
            }
            "-X" => {
                if BUILTIN_HOOKS.contains(&chain.as_str()) {
                    return Err("ip6tables: Invalid argument.".to_string());
                }
                let rules = self.chains.get(&chain).ok_or(NO_CHAIN)?;
                if !rules.is_empty() {
                    return Err("ip6tables: Directory not empty.".to_string());
                }
                if self.is_referenced(&chain) {
                    return Err("ip6tables: Too many links.".to_string());
                }
                self.chains.remove(&chain);
                Ok(())
            }
            "-F" => {
                let rules = self.chains.get_mut(&chain).ok_or(NO_CHAIN)?;
                rules.clear();
                Ok(())
            }
            "-A" | "-I" => {
                self.check_target(&rule)?;
                let rules = self.chains.get_mut(&chain).ok_or(NO_CHAIN)?;
                if op == "-A" {
                    rules.push(rule);
                } else {
                    rules.insert(0, rule);
                }
                Ok(())
            }
            "-D" => {
                let rules = self.chains.get_mut(&chain).ok_or(NO_CHAIN)?;
                let pos = rules.iter().position(|r| *r == rule).ok_or(
                    "ip6tables: Bad rule (does a matching rule exist in that chain?).",
                )?;
                rules.remove(pos);
                Ok(())
            }
            other => Err(format!("unsupported operation {other}")),
        }
    }

    fn check_target(&self, rule: &[String]) -> std::result::Result<(), String> {
        let Some(target) = jump_target(rule) else {
            return Ok(());
        };
        if BUILTIN_TARGETS.contains(&target) || self.chains.contains_key(target) {
            Ok(())
        } else {
            Err(NO_CHAIN.to_string())
        }
    }

    fn is_referenced(&self, chain: &str) -> bool {
        self.chains
            .values()
            .flatten()
            .any(|rule| jump_target(rule) == Some(chain))
    }

    /// Rules of a chain, each joined into one line
    pub fn rules(&self, chain: &str) -> Vec<String> {
        self.chains
            .get(chain)
            .map(|rules| rules.iter().map(|r| r.join(" ")).collect())
            .unwrap_or_default()
    }

    /// True when only the empty built-in hooks remain
    pub fn is_pristine(&self) -> bool {
        *self == Self::default()
    }
}

fn jump_target(rule: &[String]) -> Option<&str> {
    rule.iter()
        .position(|a| a == "-j")
        .and_then(|i| rule.get(i + 1))
        .map(String::as_str)
}

/// Recording [`Executor`] backed by a [`MangleTable`].
///
/// Every invocation is logged. Failures can be injected by call position,
/// by command substring, or by declaring a match module unavailable.
#[derive(Debug, Default)]
pub struct MockExecutor {
    table: Mutex<MangleTable>,
    calls: Mutex<Vec<Vec<String>>>,
    fail_call: Option<usize>,
    fail_on: Vec<String>,
    missing_matches: Vec<String>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from an existing table state
    pub fn with_table(table: MangleTable) -> Self {
        Self {
            table: Mutex::new(table),
            ..Self::default()
        }
    }

    /// Fails the n-th invocation (zero-based), counting from creation
    pub fn failing_call(mut self, n: usize) -> Self {
        self.fail_call = Some(n);
        self
    }

    /// Fails every invocation whose command line contains `needle`
    pub fn failing_on(mut self, needle: &str) -> Self {
        self.fail_on.push(needle.to_string());
        self
    }

    /// Rejects rules using `-m <module>`, like a kernel lacking the xt module
    pub fn without_match(mut self, module: &str) -> Self {
        self.missing_matches.push(module.to_string());
        self
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    /// Invocations joined into command lines, without the program name
    pub fn lines(&self) -> Vec<String> {
        self.calls().iter().map(|c| c.join(" ")).collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn table(&self) -> MangleTable {
        self.table.lock().unwrap().clone()
    }

    fn run(&self, args: &[String]) -> ExecStatus {
        let n = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(args.to_vec());
            calls.len() - 1
        };

        let line = args.join(" ");
        if self.fail_call == Some(n) || self.fail_on.iter().any(|needle| line.contains(needle)) {
            return ExecStatus::failed(Some(1), "ip6tables: injected failure");
        }

        if let Some(module) = args
            .windows(2)
            .find(|w| w[0] == "-m" && self.missing_matches.contains(&w[1]))
            .map(|w| w[1].clone())
        {
            return ExecStatus::failed(
                Some(2),
                format!("ip6tables v1.8.9 (legacy): Couldn't load match `{module}':No such file or directory"),
            );
        }

        match self.table.lock().unwrap().apply(args) {
            Ok(()) => ExecStatus::ok(),
            Err(stderr) => ExecStatus::failed(Some(1), stderr),
        }
    }
}

impl Executor for MockExecutor {
    fn program(&self) -> &str {
        "ip6tables"
    }

    async fn execute(&self, args: &[String], ignore_failure: bool) -> Result<ExecStatus> {
        self.run(args)
            .settle(format_command(self.program(), args), ignore_failure)
    }
}
