//! Chain intent data structures and iptables rule rendering
//!
//! This module defines the declarative description of a desired filter chain
//! and the pure rendering step that turns it into iptables rule specs.
//!
//! # Intent Structure
//!
//! A [`ChainIntent`] describes one chain the caller wants to exist in the
//! target namespace:
//! - A unique chain name
//! - Traffic [`Direction`] (decides base chain and matched address field)
//! - A target verdict (`ACCEPT`, `DROP`, or a named target)
//! - Optional protocol plus source/destination port specs
//! - An ordered list of referenced IP-set names
//!
//! # Rendering
//!
//! [`render`] is pure and deterministic: exactly one [`RenderedRule`] per
//! ipset reference, in input order, with no external state touched.
//!
//! # Example
//!
//! ```
//! use nsgard::core::intent::{ChainIntent, Direction, render};
//!
//! let intent = ChainIntent {
//!     name: "partition-a".to_string(),
//!     direction: Direction::Inbound,
//!     target: "DROP".to_string(),
//!     protocol: Some("tcp".to_string()),
//!     source_ports: None,
//!     destination_ports: Some("--dport 8080".to_string()),
//!     ipsets: vec!["peers-a".to_string()],
//! };
//!
//! let rules = render(&intent);
//! assert_eq!(rules.len(), 1);
//! assert_eq!(
//!     rules[0].spec(),
//!     "-A partition-a -m set --match-set peers-a src -j DROP tcp --dport 8080"
//! );
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::error::Error;

/// Traffic direction of a chain
///
/// Decides which kernel base chain the chain is ultimately hooked into and
/// which packet address field its ipset matches apply to. `Copy` trait allows
/// efficient passing by value for this small enum.
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
#[serde(into = "String", try_from = "String")]
#[strum(ascii_case_insensitive)]
pub enum Direction {
    /// Traffic entering the namespace; matches the source address field
    #[strum(serialize = "input", serialize = "inbound")]
    Inbound,
    /// Traffic leaving the namespace; matches the destination address field
    #[strum(serialize = "output", serialize = "outbound")]
    Outbound,
}

impl Direction {
    /// Packet address field matched against the ipset (`src` or `dst`)
    pub const fn match_field(self) -> &'static str {
        match self {
            Direction::Inbound => "src",
            Direction::Outbound => "dst",
        }
    }

    /// Kernel-owned base chain this direction hooks into
    pub const fn base_chain(self) -> &'static str {
        match self {
            Direction::Inbound => "INPUT",
            Direction::Outbound => "OUTPUT",
        }
    }

    /// Namespace-scoped umbrella chain owned by nsgard
    pub const fn umbrella_chain(self) -> &'static str {
        match self {
            Direction::Inbound => "NSGARD-INPUT",
            Direction::Outbound => "NSGARD-OUTPUT",
        }
    }
}

impl TryFrom<String> for Direction {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Error> {
        value
            .parse()
            .map_err(|_| Error::InvalidDirection(value))
    }
}

impl From<Direction> for String {
    fn from(direction: Direction) -> Self {
        direction.to_string()
    }
}

/// Desired specification of one filter chain in a namespace
///
/// Intents are transient inputs: the caller owns them for the duration of a
/// single reconciliation. The chain itself is live external state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChainIntent {
    /// Chain name, unique within the target namespace
    pub name: String,

    /// Which base chain the chain hooks into, and which address field it matches
    pub direction: Direction,

    /// Target verdict for every rendered rule (e.g. `ACCEPT`, `DROP`, a named target)
    pub target: String,

    /// Protocol match (e.g. `tcp`). Port specs are ignored when absent.
    #[serde(default)]
    pub protocol: Option<String>,

    /// Source port spec appended to the protocol clause (e.g. `--sport 80`)
    #[serde(default)]
    pub source_ports: Option<String>,

    /// Destination port spec appended to the protocol clause (e.g. `--dport 443`)
    #[serde(default)]
    pub destination_ports: Option<String>,

    /// Ordered list of referenced IP-set names; one rule is rendered per entry
    #[serde(default)]
    pub ipsets: Vec<String>,
}

impl ChainIntent {
    /// Builds the protocol/port clause of a rendered rule.
    ///
    /// The clause is only built when a protocol is specified; source-port and
    /// destination-port specs are appended in that fixed order, space
    /// separated, and only when non-empty. Returns an empty string when no
    /// protocol is set.
    pub fn protocol_clause(&self) -> String {
        let Some(protocol) = self.protocol.as_deref().filter(|p| !p.is_empty()) else {
            return String::new();
        };

        let mut clause = protocol.to_string();
        if let Some(sport) = self.source_ports.as_deref().filter(|s| !s.is_empty()) {
            clause.push(' ');
            clause.push_str(sport);
        }
        if let Some(dport) = self.destination_ports.as_deref().filter(|s| !s.is_empty()) {
            clause.push(' ');
            clause.push_str(dport);
        }
        clause
    }
}

/// A single fully-formed iptables rule spec produced from a [`ChainIntent`]
/// and one of its ipset references
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedRule {
    chain: String,
    spec: String,
}

impl RenderedRule {
    /// Name of the chain this rule inserts into
    pub fn chain(&self) -> &str {
        &self.chain
    }

    /// The complete rule spec, starting with `-A <chain>`
    pub fn spec(&self) -> &str {
        &self.spec
    }
}

impl fmt::Display for RenderedRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.spec)
    }
}

/// Renders an intent into its ordered iptables rule specs.
///
/// Emits exactly one rule per ipset reference, preserving input order. Each
/// rule inserts into the intent's own chain, matches the direction's address
/// field against the ipset, jumps to the configured verdict, and carries the
/// protocol/port clause when one is configured.
///
/// Pure function: no external state is read or written.
pub fn render(intent: &ChainIntent) -> Vec<RenderedRule> {
    let field = intent.direction.match_field();
    let clause = intent.protocol_clause();

    intent
        .ipsets
        .iter()
        .map(|ipset| {
            let mut spec = format!(
                "-A {} -m set --match-set {} {} -j {}",
                intent.name, ipset, field, intent.target
            );
            if !clause.is_empty() {
                spec.push(' ');
                spec.push_str(&clause);
            }
            RenderedRule {
                chain: intent.name.clone(),
                spec,
            }
        })
        .collect()
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    fn arb_direction() -> impl Strategy<Value = Direction> {
        prop_oneof![Just(Direction::Inbound), Just(Direction::Outbound)]
    }

    proptest! {
        #[test]
        fn test_render_is_deterministic(
            name in "[a-z][a-z0-9-]{0,20}",
            direction in arb_direction(),
            ipsets in proptest::collection::vec("[a-z][a-z0-9-]{0,20}", 0..8),
        ) {
            let intent = ChainIntent {
                name,
                direction,
                target: "ACCEPT".to_string(),
                protocol: None,
                source_ports: None,
                destination_ports: None,
                ipsets,
            };
            prop_assert_eq!(render(&intent), render(&intent));
        }

        #[test]
        fn test_render_rule_count_matches_ipsets(
            name in "[a-z][a-z0-9-]{0,20}",
            direction in arb_direction(),
            ipsets in proptest::collection::vec("[a-z][a-z0-9-]{0,20}", 0..8),
        ) {
            let count = ipsets.len();
            let intent = ChainIntent {
                name: name.clone(),
                direction,
                target: "DROP".to_string(),
                protocol: None,
                source_ports: None,
                destination_ports: None,
                ipsets,
            };
            let rules = render(&intent);
            prop_assert_eq!(rules.len(), count);
            for rule in &rules {
                prop_assert_eq!(rule.chain(), name.as_str());
                let prefix = format!("-A {name} ");
                prop_assert!(rule.spec().starts_with(&prefix));
            }
        }

        #[test]
        fn test_render_preserves_ipset_order(
            ipsets in proptest::collection::vec("[a-z][a-z0-9]{0,12}", 1..8),
        ) {
            let intent = ChainIntent {
                name: "ordered".to_string(),
                direction: Direction::Inbound,
                target: "ACCEPT".to_string(),
                protocol: None,
                source_ports: None,
                destination_ports: None,
                ipsets: ipsets.clone(),
            };
            let rules = render(&intent);
            for (rule, ipset) in rules.iter().zip(&ipsets) {
                let needle = format!("--match-set {ipset} ");
                prop_assert!(rule.spec().contains(&needle));
            }
        }
    }
}
