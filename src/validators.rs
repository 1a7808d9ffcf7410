//! Input validation and sanitization functions for nsgard
//!
//! Rule specs are assembled from intent fields and handed to iptables as
//! discrete arguments, so validation here is what keeps untrusted intent
//! documents from smuggling extra arguments or unprintable bytes into a
//! privileged command line. Every check runs before the first external
//! command of a reconciliation.

use crate::core::intent::ChainIntent;

/// iptables rejects chain names longer than 28 characters
const MAX_CHAIN_NAME_LEN: usize = 28;

/// The kernel rejects ipset names longer than 31 characters
const MAX_IPSET_NAME_LEN: usize = 31;

/// Kernel-owned chains of the filter table; user chains must not shadow them
const RESERVED_CHAINS: [&str; 5] = ["INPUT", "OUTPUT", "FORWARD", "PREROUTING", "POSTROUTING"];

fn is_safe_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')
}

/// Validates a user chain name.
///
/// # Errors
///
/// Returns `Err` if the name is empty, too long, contains unsafe characters,
/// starts with `-` (would parse as a flag), shadows a kernel base chain, or
/// uses the reserved `NSGARD-` umbrella prefix.
pub fn validate_chain_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("chain name cannot be empty".to_string());
    }

    if name.len() > MAX_CHAIN_NAME_LEN {
        return Err(format!(
            "chain name too long (max {MAX_CHAIN_NAME_LEN} characters)"
        ));
    }

    if name.starts_with('-') {
        return Err("chain name cannot start with '-'".to_string());
    }

    if !name.chars().all(is_safe_name_char) {
        return Err("chain name contains invalid characters".to_string());
    }

    if RESERVED_CHAINS.contains(&name) {
        return Err(format!("chain name {name} is a reserved base chain"));
    }

    if name.starts_with("NSGARD-") {
        return Err("the NSGARD- prefix is reserved for umbrella chains".to_string());
    }

    Ok(())
}

/// Validates an ipset name referenced by a rule.
///
/// # Errors
///
/// Returns `Err` if the name is empty, exceeds the kernel limit, contains
/// unsafe characters, or starts with `-`.
pub fn validate_ipset_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("ipset name cannot be empty".to_string());
    }

    if name.len() > MAX_IPSET_NAME_LEN {
        return Err(format!(
            "ipset name too long (max {MAX_IPSET_NAME_LEN} characters)"
        ));
    }

    if name.starts_with('-') {
        return Err("ipset name cannot start with '-'".to_string());
    }

    if !name.chars().all(is_safe_name_char) {
        return Err("ipset name contains invalid characters".to_string());
    }

    Ok(())
}

/// Validates a target verdict (`ACCEPT`, `DROP`, or a named target).
///
/// # Errors
///
/// Returns `Err` for empty targets, over-long names, unsafe characters, or a
/// leading `-`.
pub fn validate_target(target: &str) -> Result<(), String> {
    if target.is_empty() {
        return Err("target verdict cannot be empty".to_string());
    }

    if target.len() > MAX_CHAIN_NAME_LEN {
        return Err(format!(
            "target too long (max {MAX_CHAIN_NAME_LEN} characters)"
        ));
    }

    if target.starts_with('-') {
        return Err("target cannot start with '-'".to_string());
    }

    if !target.chars().all(is_safe_name_char) {
        return Err("target contains invalid characters".to_string());
    }

    Ok(())
}

/// Validates a protocol name (e.g. `tcp`, `udp`, `icmp`).
///
/// # Errors
///
/// Returns `Err` for unsafe characters or over-long names; an empty value is
/// valid (no protocol clause is rendered).
pub fn validate_protocol(protocol: &str) -> Result<(), String> {
    if protocol.is_empty() {
        return Ok(());
    }

    if protocol.len() > 16 {
        return Err("protocol name too long".to_string());
    }

    if !protocol.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()) {
        return Err("protocol must be a lowercase IP protocol name".to_string());
    }

    Ok(())
}

/// Validates a port spec clause such as `--sport 80` or `--dport 8000:9000`.
///
/// The spec is tokenized into iptables arguments, so each token must be
/// either a long option or a port expression (digits, `:`, `,`).
///
/// # Errors
///
/// Returns `Err` when a token is neither; an empty spec is valid.
pub fn validate_port_spec(spec: &str) -> Result<(), String> {
    for token in spec.split_whitespace() {
        let is_option = token.starts_with("--")
            && token.len() > 2
            && token[2..].chars().all(|c| c.is_ascii_lowercase() || c == '-');
        let is_ports = !token.is_empty()
            && token.chars().all(|c| c.is_ascii_digit() || matches!(c, ':' | ','));

        if !is_option && !is_ports {
            return Err(format!("invalid port spec token {token:?}"));
        }
    }

    Ok(())
}

/// Validates every field of an intent, returning the offending field name
/// alongside the message.
pub fn validate_intent(intent: &ChainIntent) -> Result<(), (String, String)> {
    validate_chain_name(&intent.name).map_err(|m| ("name".to_string(), m))?;
    validate_target(&intent.target).map_err(|m| ("target".to_string(), m))?;

    if let Some(protocol) = &intent.protocol {
        validate_protocol(protocol).map_err(|m| ("protocol".to_string(), m))?;
    }
    if let Some(spec) = &intent.source_ports {
        validate_port_spec(spec).map_err(|m| ("source_ports".to_string(), m))?;
    }
    if let Some(spec) = &intent.destination_ports {
        validate_port_spec(spec).map_err(|m| ("destination_ports".to_string(), m))?;
    }

    for ipset in &intent.ipsets {
        validate_ipset_name(ipset).map_err(|m| ("ipsets".to_string(), m))?;
    }

    Ok(())
}
