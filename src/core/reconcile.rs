//! Reconciliation orchestration
//!
//! [`Reconciler::reconcile`] makes one namespace's filter table match a
//! desired set of chain intents:
//!
//! 1. **Bootstrap**: ensure the `NSGARD-INPUT`/`NSGARD-OUTPUT` umbrella
//!    chains exist and are hooked exactly once into the kernel's
//!    `INPUT`/`OUTPUT` base chains. Safe to run on every call.
//! 2. **Per-chain application** in caller order: render, create, flush,
//!    append the rendered rules, hook the chain into its umbrella.
//!
//! Chain content is replaced wholesale (last writer wins); nothing is diffed
//! against prior state. The first error aborts the remaining batch with no
//! rollback of already-applied chains.
//!
//! Both directions are bootstrapped and checked identically: a hook failure
//! on the outbound path is as fatal as one on the inbound path.
//!
//! # Concurrency
//!
//! External operations within one call run strictly sequentially; later
//! steps depend on state observed by earlier ones. Calls targeting the same
//! namespace are serialized through a process-wide lock keyed by namespace
//! path, closing the list/append race between concurrent callers. Calls
//! targeting different namespaces proceed concurrently without coordination.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, OnceLock};
use strum::IntoEnumIterator;
use tokio::sync::Mutex;
use tracing::{info, instrument};

use crate::core::error::{Error, Result};
use crate::core::intent::{ChainIntent, Direction, render};
use crate::core::mutate::ChainMutator;
use crate::exec::{IptablesRunner, NetnsRunner};
use crate::netns::NetnsPath;
use crate::validators;

/// Process-wide reconciliation locks, keyed by namespace path.
///
/// Entries are never removed; the set of namespaces a daemon touches over
/// its lifetime is small and bounded by the container count.
static NAMESPACE_LOCKS: OnceLock<StdMutex<HashMap<String, Arc<Mutex<()>>>>> = OnceLock::new();

fn lock_for(namespace: &str) -> Arc<Mutex<()>> {
    let locks = NAMESPACE_LOCKS.get_or_init(|| StdMutex::new(HashMap::new()));
    let mut locks = locks
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    locks.entry(namespace.to_string()).or_default().clone()
}

/// Reconciles desired chain intents against one namespace's live state
#[derive(Debug, Clone)]
pub struct Reconciler<R> {
    mutator: ChainMutator<R>,
    namespace: String,
}

impl Reconciler<NetnsRunner> {
    /// Creates a reconciler scoped to the given network namespace
    pub fn for_namespace(netns: NetnsPath) -> Self {
        let runner = NetnsRunner::new(netns);
        Self::with_runner(runner)
    }
}

impl<R: IptablesRunner + Clone> Reconciler<R> {
    /// Creates a reconciler over an explicit runner (tests inject mocks here)
    pub fn with_runner(runner: R) -> Self {
        let namespace = runner.namespace().to_string();
        Self {
            mutator: ChainMutator::new(runner),
            namespace,
        }
    }

    /// The namespace this reconciler targets
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The mutator backing this reconciler (status queries reuse its prober)
    pub fn mutator(&self) -> &ChainMutator<R> {
        &self.mutator
    }

    /// Makes the namespace's filter table match `intents` exactly.
    ///
    /// Validates every intent up front, then bootstraps the umbrella chains
    /// and applies each intent in caller order. The first failure aborts the
    /// remaining chains; chains applied before it stay applied.
    #[instrument(skip_all, fields(namespace = %self.namespace, chains = intents.len()))]
    pub async fn reconcile(&self, intents: &[ChainIntent]) -> Result<()> {
        // Reject the whole batch before any external command runs.
        for intent in intents {
            validators::validate_intent(intent)
                .map_err(|(field, message)| Error::Validation { field, message })?;
        }

        let lock = lock_for(&self.namespace);
        let _guard = lock.lock().await;

        self.bootstrap().await?;

        for intent in intents {
            self.apply_intent(intent).await?;
        }

        info!("reconciled {} chain(s)", intents.len());
        Ok(())
    }

    /// Ensures both umbrella chains exist and are hooked exactly once into
    /// their base chains. Idempotent; the hook count is unchanged when the
    /// environment is already bootstrapped.
    async fn bootstrap(&self) -> Result<()> {
        for direction in Direction::iter() {
            let umbrella = direction.umbrella_chain();
            let base = direction.base_chain();

            self.mutator.create_chain(umbrella).await?;
            self.mutator
                .ensure_rule(base, &format!("-A {base} -j {umbrella}"))
                .await?;
        }
        Ok(())
    }

    /// Applies one intent: full rule replacement plus umbrella hook.
    async fn apply_intent(&self, intent: &ChainIntent) -> Result<()> {
        let rules = render(intent);

        self.mutator.create_chain(&intent.name).await?;
        self.mutator.flush_chain(&intent.name).await?;

        // Redundant right after a flush, but ensure_rule tolerates rules
        // appearing from interleaved external mutation between steps.
        for rule in &rules {
            self.mutator.ensure_rule(rule.chain(), rule.spec()).await?;
        }

        let umbrella = intent.direction.umbrella_chain();
        self.mutator
            .ensure_rule(umbrella, &format!("-A {umbrella} -j {}", intent.name))
            .await?;

        info!(
            "applied chain {} ({} rule(s), {})",
            intent.name,
            rules.len(),
            intent.direction
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_helpers::{MockIptables, make_intent};

    fn reconciler(mock: &MockIptables) -> Reconciler<MockIptables> {
        Reconciler::with_runner(mock.clone())
    }

    #[tokio::test]
    async fn test_bootstrap_creates_umbrellas_and_hooks() {
        let mock = MockIptables::new();
        reconciler(&mock).reconcile(&[]).await.unwrap();

        assert!(mock.chain_exists("NSGARD-INPUT"));
        assert!(mock.chain_exists("NSGARD-OUTPUT"));
        assert_eq!(
            mock.rules_of("INPUT"),
            vec!["-A INPUT -j NSGARD-INPUT".to_string()]
        );
        assert_eq!(
            mock.rules_of("OUTPUT"),
            vec!["-A OUTPUT -j NSGARD-OUTPUT".to_string()]
        );
    }

    #[tokio::test]
    async fn test_bootstrap_is_hook_count_noop_when_repeated() {
        let mock = MockIptables::new();
        let r = reconciler(&mock);

        for _ in 0..4 {
            r.reconcile(&[]).await.unwrap();
        }

        assert_eq!(mock.rules_of("INPUT").len(), 1);
        assert_eq!(mock.rules_of("OUTPUT").len(), 1);
    }

    #[tokio::test]
    async fn test_reconcile_populates_chain_and_hook() {
        let mock = MockIptables::new();
        let intent = make_intent("web", Direction::Inbound, &["setA", "setB"]);

        reconciler(&mock).reconcile(&[intent]).await.unwrap();

        let rules = mock.rules_of("web");
        assert_eq!(rules.len(), 2);
        assert!(rules[0].contains("--match-set setA src"));
        assert!(rules[1].contains("--match-set setB src"));
        assert_eq!(
            mock.rules_of("NSGARD-INPUT"),
            vec!["-A NSGARD-INPUT -j web".to_string()]
        );
    }

    #[tokio::test]
    async fn test_reconcile_n_times_yields_exact_rule_set_and_one_hook() {
        let mock = MockIptables::new();
        let r = reconciler(&mock);
        let intent = make_intent("web", Direction::Outbound, &["setA"]);

        for _ in 0..5 {
            r.reconcile(std::slice::from_ref(&intent)).await.unwrap();
        }

        assert_eq!(mock.rules_of("web").len(), 1);
        assert_eq!(
            mock.rules_of("NSGARD-OUTPUT"),
            vec!["-A NSGARD-OUTPUT -j web".to_string()]
        );
        assert_eq!(mock.rules_of("OUTPUT").len(), 1);
    }

    #[tokio::test]
    async fn test_reconcile_replaces_stale_rules() {
        let mock = MockIptables::new();
        let r = reconciler(&mock);

        let old = make_intent("app", Direction::Inbound, &["old-set"]);
        r.reconcile(&[old]).await.unwrap();

        let new = make_intent("app", Direction::Inbound, &["new-set"]);
        r.reconcile(&[new]).await.unwrap();

        let rules = mock.rules_of("app");
        assert_eq!(rules.len(), 1);
        assert!(rules[0].contains("new-set"));
    }

    #[tokio::test]
    async fn test_reconcile_empty_ipsets_leaves_chain_present_and_empty() {
        let mock = MockIptables::new();
        let r = reconciler(&mock);

        let populated = make_intent("app", Direction::Inbound, &["some-set"]);
        r.reconcile(&[populated]).await.unwrap();

        let emptied = make_intent("app", Direction::Inbound, &[]);
        r.reconcile(&[emptied]).await.unwrap();

        assert!(mock.chain_exists("app"));
        assert!(mock.rules_of("app").is_empty());
    }

    #[tokio::test]
    async fn test_flush_failure_aborts_later_chains_keeps_earlier() {
        let mock = MockIptables::new();
        let r = reconciler(&mock);

        let a = make_intent("chain-a", Direction::Inbound, &["setA"]);
        let b = make_intent("chain-b", Direction::Inbound, &["setB"]);
        let c = make_intent("chain-c", Direction::Inbound, &["setC"]);

        mock.fail_next("-F", "chain-b", "iptables: Resource temporarily unavailable.");

        let err = r.reconcile(&[a, b, c]).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Mutation {
                operation: "flush",
                ..
            }
        ));

        // chain-a was applied before the failure and stays applied
        assert_eq!(mock.rules_of("chain-a").len(), 1);
        // chain-c was never reached
        assert!(!mock.chain_exists("chain-c"));
    }

    #[tokio::test]
    async fn test_invalid_intent_produces_no_external_mutation() {
        let mock = MockIptables::new();
        let r = reconciler(&mock);

        // Shadows a kernel base chain; validation must catch it up front
        let bad = make_intent("INPUT", Direction::Inbound, &["setA"]);

        let err = r.reconcile(&[bad]).await.unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
        assert_eq!(mock.invocation_count(), 0);
    }

    #[tokio::test]
    async fn test_same_namespace_calls_are_serialized() {
        let mock = MockIptables::new();
        let r1 = reconciler(&mock);
        let r2 = reconciler(&mock);

        let i1 = make_intent("one", Direction::Inbound, &["s1"]);
        let i2 = make_intent("two", Direction::Outbound, &["s2"]);

        let intents1 = [i1];
        let intents2 = [i2];
        let (a, b) = tokio::join!(r1.reconcile(&intents1), r2.reconcile(&intents2));
        a.unwrap();
        b.unwrap();

        // Both chains fully applied, hooks unique despite concurrent callers
        assert_eq!(mock.rules_of("NSGARD-INPUT").len(), 1);
        assert_eq!(mock.rules_of("NSGARD-OUTPUT").len(), 1);
        assert_eq!(mock.rules_of("INPUT").len(), 1);
        assert_eq!(mock.rules_of("OUTPUT").len(), 1);
    }
}
