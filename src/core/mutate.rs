//! Idempotent chain mutation primitives
//!
//! Three operations cover every write the reconciler needs, each scoped to
//! (namespace, chain) and each safe to repeat:
//!
//! - [`ChainMutator::create_chain`]: "ensure chain exists", not "chain must
//!   be new": the already-exists diagnostic is success
//! - [`ChainMutator::flush_chain`]: discard all rules, keep the chain
//! - [`ChainMutator::ensure_rule`]: append only when no equivalent rule is
//!   already present, the guard that keeps hooks and rule entries unique
//!   across repeated reconciliations
//!
//! Exit status alone is not enough to classify an iptables failure; the
//! primitives inspect the combined output and fold the recognized benign
//! diagnostics into success, surfacing everything else as
//! [`Error::Mutation`] with the raw text attached.

use tracing::{debug, info};

use crate::core::error::{Error, Result};
use crate::core::probe::RuleProber;
use crate::exec::IptablesRunner;

/// Exact diagnostic iptables emits when `-N` hits an existing chain.
/// Anything else on a failed create is a genuine error.
const CHAIN_ALREADY_EXISTS: &str = "iptables: Chain already exists.";

/// Issues the minimal iptables commands to create, flush, and populate
/// chains in one namespace
#[derive(Debug, Clone)]
pub struct ChainMutator<R> {
    runner: R,
    prober: RuleProber<R>,
}

impl<R: IptablesRunner + Clone> ChainMutator<R> {
    pub fn new(runner: R) -> Self {
        Self {
            prober: RuleProber::new(runner.clone()),
            runner,
        }
    }

    /// The prober backing this mutator's read-before-write checks
    pub fn prober(&self) -> &RuleProber<R> {
        &self.prober
    }

    fn mutation_error(
        &self,
        chain: &str,
        operation: &'static str,
        output: &crate::exec::RunOutput,
    ) -> Error {
        Error::Mutation {
            namespace: self.runner.namespace().to_string(),
            chain: chain.to_string(),
            operation,
            stderr: output.combined(),
            exit_code: output.exit_code,
        }
    }

    /// Ensures a chain exists, treating "already exists" as success.
    ///
    /// A clean exit with empty output means the chain was just created; the
    /// recognized already-exists diagnostic means it was there before. Both
    /// converge on the same outcome for the caller. Any other exit or
    /// unexpected output is a [`Error::Mutation`].
    pub async fn create_chain(&self, chain: &str) -> Result<()> {
        let output = self.runner.run(&["-w", "-N", chain]).await?;

        if output.is_clean() {
            info!("created chain {chain} in {}", self.runner.namespace());
            return Ok(());
        }

        if !output.success && output.combined().contains(CHAIN_ALREADY_EXISTS) {
            debug!("chain {chain} already exists, reusing");
            return Ok(());
        }

        Err(self.mutation_error(chain, "create", &output))
    }

    /// Removes all rules from a chain, preserving the chain itself.
    ///
    /// Failure here is always fatal to the enclosing reconciliation: a chain
    /// that cannot be flushed cannot be safely repopulated, because stale
    /// rules would remain alongside the new ones.
    pub async fn flush_chain(&self, chain: &str) -> Result<()> {
        let output = self.runner.run(&["-w", "-F", chain]).await?;

        if output.success {
            debug!("flushed chain {chain}");
            return Ok(());
        }

        Err(self.mutation_error(chain, "flush", &output))
    }

    /// Appends a rule only if an equivalent rule is not already present.
    ///
    /// Equivalence is substring containment of `rule` against the chain's
    /// current listing. The rule spec is tokenized on whitespace and passed
    /// as discrete arguments, never through a shell.
    pub async fn ensure_rule(&self, chain: &str, rule: &str) -> Result<()> {
        if self.prober.has_rule(chain, rule).await? {
            debug!("rule already present in {chain}: {rule}");
            return Ok(());
        }

        let mut args: Vec<&str> = vec!["-w"];
        args.extend(rule.split_whitespace());

        let output = self.runner.run(&args).await?;
        if output.success {
            debug!("appended rule to {chain}: {rule}");
            return Ok(());
        }

        Err(self.mutation_error(chain, "append", &output))
    }
}
