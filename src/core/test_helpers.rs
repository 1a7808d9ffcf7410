//! Shared test utilities for core module tests
//!
//! Provides a stateful in-memory iptables mock so the reconciliation
//! protocol can be exercised without privileges or a real namespace.
//! This module is only compiled in test mode.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use crate::core::intent::{ChainIntent, Direction};
use crate::exec::{IptablesRunner, RunOutput};

/// Builds a minimal valid intent for tests; fields beyond the basics are
/// adjusted per test.
pub fn make_intent(name: &str, direction: Direction, ipsets: &[&str]) -> ChainIntent {
    ChainIntent {
        name: name.to_string(),
        direction,
        target: "DROP".to_string(),
        protocol: None,
        source_ports: None,
        destination_ports: None,
        ipsets: ipsets.iter().map(ToString::to_string).collect(),
    }
}

#[derive(Default)]
struct MockState {
    /// chain name -> ordered rule specs
    chains: HashMap<String, Vec<String>>,
    /// recorded argument vectors of every invocation
    invocations: Vec<Vec<String>>,
    /// (operation flag, chain, stderr) failures consumed on first match
    failures: Vec<(String, String, String)>,
}

/// Stateful [`IptablesRunner`] mock mirroring the real tool's observable
/// behavior for `-N`, `-F`, `-S`, and `-A`, including its diagnostics for
/// "chain already exists" and "no such chain".
#[derive(Clone)]
pub struct MockIptables {
    state: Arc<Mutex<MockState>>,
    namespace: String,
}

static MOCK_COUNTER: AtomicU32 = AtomicU32::new(0);

impl MockIptables {
    pub fn new() -> Self {
        let mut state = MockState::default();
        // Kernel base chains always exist and are never assumed empty by
        // the code under test.
        state.chains.insert("INPUT".to_string(), Vec::new());
        state.chains.insert("OUTPUT".to_string(), Vec::new());

        let id = MOCK_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self {
            state: Arc::new(Mutex::new(state)),
            namespace: format!("mock:/proc/{id}/ns/net"),
        }
    }

    pub fn seed_chain(&self, chain: &str, rules: &[&str]) {
        let mut state = self.state.lock().unwrap();
        state.chains.insert(
            chain.to_string(),
            rules.iter().map(ToString::to_string).collect(),
        );
    }

    /// Arranges for the next `op` invocation on `chain` to fail with the
    /// given stderr (consumed on first match).
    pub fn fail_next(&self, op: &str, chain: &str, stderr: &str) {
        self.state.lock().unwrap().failures.push((
            op.to_string(),
            chain.to_string(),
            stderr.to_string(),
        ));
    }

    pub fn chain_exists(&self, chain: &str) -> bool {
        self.state.lock().unwrap().chains.contains_key(chain)
    }

    pub fn rules_of(&self, chain: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .chains
            .get(chain)
            .cloned()
            .unwrap_or_default()
    }

    pub fn invocation_count(&self) -> usize {
        self.state.lock().unwrap().invocations.len()
    }

    fn take_failure(state: &mut MockState, op: &str, chain: &str) -> Option<String> {
        let idx = state
            .failures
            .iter()
            .position(|(f_op, f_chain, _)| f_op == op && f_chain == chain)?;
        Some(state.failures.remove(idx).2)
    }

    fn respond(&self, args: &[&str]) -> RunOutput {
        let mut state = self.state.lock().unwrap();
        state
            .invocations
            .push(args.iter().map(ToString::to_string).collect());

        // Every real invocation starts with the xtables wait flag.
        assert_eq!(args.first(), Some(&"-w"), "missing -w flag: {args:?}");
        let op = args[1];
        let chain = args[2];

        if let Some(stderr) = Self::take_failure(&mut state, op, chain) {
            return failure(&stderr);
        }

        match op {
            "-N" => {
                if state.chains.contains_key(chain) {
                    failure("iptables: Chain already exists.")
                } else {
                    state.chains.insert(chain.to_string(), Vec::new());
                    success("")
                }
            }
            "-F" => match state.chains.get_mut(chain) {
                Some(rules) => {
                    rules.clear();
                    success("")
                }
                None => failure("iptables: No chain/target/match by that name."),
            },
            "-S" => match state.chains.get(chain) {
                Some(rules) => {
                    let mut listing = format!("-N {chain}");
                    for rule in rules {
                        listing.push('\n');
                        listing.push_str(rule);
                    }
                    success(&listing)
                }
                None => failure("iptables: No chain/target/match by that name."),
            },
            "-A" => {
                if !state.chains.contains_key(chain) {
                    return failure("iptables: No chain/target/match by that name.");
                }
                let rule = args[1..].join(" ");
                state
                    .chains
                    .get_mut(chain)
                    .expect("checked above")
                    .push(rule);
                success("")
            }
            other => failure(&format!("mock iptables: unsupported operation {other}")),
        }
    }
}

impl Default for MockIptables {
    fn default() -> Self {
        Self::new()
    }
}

impl IptablesRunner for MockIptables {
    async fn run(&self, args: &[&str]) -> std::io::Result<RunOutput> {
        Ok(self.respond(args))
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }
}

fn success(stdout: &str) -> RunOutput {
    RunOutput {
        success: true,
        exit_code: Some(0),
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

fn failure(stderr: &str) -> RunOutput {
    RunOutput {
        success: false,
        exit_code: Some(1),
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}
