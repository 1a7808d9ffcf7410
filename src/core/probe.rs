//! Live rule state probing
//!
//! iptables offers no structured query API, so the current state of a chain
//! is read by listing its rule specs (`iptables -w -S <chain>`) and treating
//! the output as opaque text. The reconciler only ever asks one question of
//! it: "does an equivalent rule already exist?", answered by substring
//! containment. Keeping that read behind [`RuleProber`] isolates the textual
//! matching so alternate backends (a netlink query, a test mock) can answer
//! the same question differently.

use tracing::debug;

use crate::core::error::{Error, Result};
use crate::exec::IptablesRunner;

/// Diagnostic iptables prints when the listed chain does not exist
const NO_CHAIN_DIAGNOSTIC: &str = "No chain/target/match by that name";

/// Reads the current rule listing of chains in one namespace
#[derive(Debug, Clone)]
pub struct RuleProber<R> {
    runner: R,
}

impl<R: IptablesRunner> RuleProber<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    /// Lists the current rule specs of a chain as raw text.
    ///
    /// # Errors
    ///
    /// - [`Error::ChainNotFound`] when the chain does not exist in the
    ///   namespace, a distinguishable condition rather than a generic failure
    /// - [`Error::ChainQuery`] for any other non-zero exit
    pub async fn list_rules(&self, chain: &str) -> Result<String> {
        let output = self.runner.run(&["-w", "-S", chain]).await?;

        if output.success {
            return Ok(output.stdout);
        }

        let diagnostics = output.combined();
        if diagnostics.contains(NO_CHAIN_DIAGNOSTIC) {
            debug!("chain {chain} not present in {}", self.runner.namespace());
            return Err(Error::ChainNotFound {
                namespace: self.runner.namespace().to_string(),
                chain: chain.to_string(),
            });
        }

        Err(Error::ChainQuery {
            namespace: self.runner.namespace().to_string(),
            chain: chain.to_string(),
            stderr: diagnostics,
        })
    }

    /// True when an equivalent rule already exists in the chain, determined
    /// by substring containment against the current listing.
    pub async fn has_rule(&self, chain: &str, rule: &str) -> Result<bool> {
        let listing = self.list_rules(chain).await?;
        Ok(listing.contains(rule))
    }
}
