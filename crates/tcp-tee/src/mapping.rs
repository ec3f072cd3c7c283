//! Mapping resolver: turns the `maps` string into routing rules.
//!
//! Format: rules separated by `,`, each rule a set of `key=value` fragments
//! separated by `;`. Keys are `listen` plus the destination roles of the
//! active [`TeeMode`]. Parsing is fail-fast: the first bad fragment or
//! incomplete rule is returned as the error.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::mode::TeeMode;

/// Dial timeout for mandatory primary destinations (`primary`, `primary1`).
pub const PRIMARY_DIAL_TIMEOUT: Duration = Duration::from_secs(3);

const RULE_DELIMITER: char = ',';
const FIELD_DELIMITER: char = ';';
const LISTEN_KEY: &str = "listen";

/// Errors produced while parsing the `maps` string.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MappingError {
    #[error("bad mapping fragment: {0:?}")]
    BadFragment(String),

    #[error("unknown key {key:?} in {fragment:?}")]
    UnknownKey { key: String, fragment: String },

    #[error("incomplete mapping: {0:?}")]
    Incomplete(String),
}

/// The part a destination plays in a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Primary,
    Shadow,
    Primary1,
    Primary2,
}

impl Role {
    /// Configuration key naming this role in a mapping fragment.
    pub fn key(self) -> &'static str {
        match self {
            Role::Primary => "primary",
            Role::Shadow => "shadow",
            Role::Primary1 => "primary1",
            Role::Primary2 => "primary2",
        }
    }

    /// Whether this destination's response is relayed back to the client.
    pub fn is_authoritative(self) -> bool {
        matches!(self, Role::Primary | Role::Primary1)
    }

    fn dial_timeout(self, timeouts: &DestinationTimeouts) -> Duration {
        match self {
            Role::Primary | Role::Primary1 => PRIMARY_DIAL_TIMEOUT,
            Role::Primary2 => timeouts.primary2_dial,
            Role::Shadow => timeouts.shadow_dial,
        }
    }

    fn policy(self, timeouts: &DestinationTimeouts) -> SinkPolicy {
        match self {
            Role::Shadow => SinkPolicy::BestEffort {
                write_timeout: timeouts.shadow_write,
            },
            _ => SinkPolicy::Mandatory,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// How failures writing to a destination are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkPolicy {
    /// Dial and write failures end the session.
    Mandatory,
    /// Dial failures are tolerated; each write is bounded by `write_timeout`
    /// and its outcome ignored.
    BestEffort { write_timeout: Duration },
}

impl SinkPolicy {
    pub fn is_mandatory(self) -> bool {
        matches!(self, SinkPolicy::Mandatory)
    }
}

/// Runtime timeouts for the destinations whose timeouts are configurable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DestinationTimeouts {
    pub shadow_dial: Duration,
    pub shadow_write: Duration,
    pub primary2_dial: Duration,
}

/// One outbound destination of a routing rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub role: Role,
    pub address: String,
    pub dial_timeout: Duration,
    pub policy: SinkPolicy,
}

impl Destination {
    pub fn new(role: Role, address: impl Into<String>, timeouts: &DestinationTimeouts) -> Self {
        Self {
            role,
            address: address.into(),
            dial_timeout: role.dial_timeout(timeouts),
            policy: role.policy(timeouts),
        }
    }
}

/// A listen address and the destinations every accepted connection feeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingRule {
    pub listen: String,
    /// Ordered as the mode's roles: authoritative first.
    pub destinations: Vec<Destination>,
}

impl RoutingRule {
    /// Human-readable routing summary, e.g. `primary 10.0.0.1:80, shadow 10.0.0.2:80`.
    pub fn describe(&self) -> String {
        self.destinations
            .iter()
            .map(|d| format!("{} {}", d.role, d.address))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Canonical form: `listen=<addr>;<role>=<addr>;...`.
impl fmt::Display for RoutingRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{LISTEN_KEY}={}", self.listen)?;
        for dest in &self.destinations {
            write!(f, "{FIELD_DELIMITER}{}={}", dest.role, dest.address)?;
        }
        Ok(())
    }
}

/// Parse a `maps` string into routing rules for `mode`.
pub fn parse_mappings(
    input: &str,
    mode: TeeMode,
    timeouts: &DestinationTimeouts,
) -> Result<Vec<RoutingRule>, MappingError> {
    input
        .split(RULE_DELIMITER)
        .map(|part| parse_rule(part.trim(), mode, timeouts))
        .collect()
}

/// Join rules back into a single `maps` string.
pub fn format_mappings(rules: &[RoutingRule]) -> String {
    rules
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(RULE_DELIMITER.to_string().as_str())
}

fn parse_rule(
    rule: &str,
    mode: TeeMode,
    timeouts: &DestinationTimeouts,
) -> Result<RoutingRule, MappingError> {
    let roles = mode.roles();
    let mut listen = String::new();
    let mut addresses = vec![String::new(); roles.len()];

    for fragment in rule.split(FIELD_DELIMITER).map(str::trim) {
        if fragment.is_empty() {
            continue;
        }
        let (key, value) = fragment
            .split_once('=')
            .ok_or_else(|| MappingError::BadFragment(fragment.to_string()))?;
        let (key, value) = (key.trim(), value.trim());

        if key == LISTEN_KEY {
            listen = value.to_string();
            continue;
        }
        match roles.iter().position(|role| role.key() == key) {
            Some(idx) => addresses[idx] = value.to_string(),
            None => {
                return Err(MappingError::UnknownKey {
                    key: key.to_string(),
                    fragment: fragment.to_string(),
                })
            }
        }
    }

    if listen.is_empty() || addresses.iter().any(String::is_empty) {
        return Err(MappingError::Incomplete(rule.to_string()));
    }

    let destinations = roles
        .iter()
        .zip(addresses)
        .map(|(role, address)| Destination::new(*role, address, timeouts))
        .collect();

    Ok(RoutingRule {
        listen,
        destinations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timeouts() -> DestinationTimeouts {
        DestinationTimeouts {
            shadow_dial: Duration::from_millis(250),
            shadow_write: Duration::from_millis(40),
            primary2_dial: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_parse_shadow_rule() {
        let rules = parse_mappings(
            "listen=:9001;primary=127.0.0.1:9101;shadow=127.0.0.1:9201",
            TeeMode::Shadow,
            &timeouts(),
        )
        .unwrap();

        assert_eq!(rules.len(), 1);
        let rule = &rules[0];
        assert_eq!(rule.listen, ":9001");
        assert_eq!(rule.destinations.len(), 2);

        let primary = &rule.destinations[0];
        assert_eq!(primary.role, Role::Primary);
        assert_eq!(primary.address, "127.0.0.1:9101");
        assert_eq!(primary.dial_timeout, PRIMARY_DIAL_TIMEOUT);
        assert_eq!(primary.policy, SinkPolicy::Mandatory);

        let shadow = &rule.destinations[1];
        assert_eq!(shadow.role, Role::Shadow);
        assert_eq!(shadow.dial_timeout, Duration::from_millis(250));
        assert_eq!(
            shadow.policy,
            SinkPolicy::BestEffort {
                write_timeout: Duration::from_millis(40)
            }
        );
    }

    #[test]
    fn test_parse_dual_primary_rules_in_order() {
        let input = " listen = 0.0.0.0:80 ; primary2 = b:80 ; primary1 = a:80 ,\
                     listen=0.0.0.0:81;primary1=c:81;primary2=d:81;";
        let rules = parse_mappings(input, TeeMode::DualPrimary, &timeouts()).unwrap();

        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].listen, "0.0.0.0:80");
        // Destinations follow the mode's role order, not fragment order.
        assert_eq!(rules[0].destinations[0].role, Role::Primary1);
        assert_eq!(rules[0].destinations[0].address, "a:80");
        assert_eq!(rules[0].destinations[1].role, Role::Primary2);
        assert_eq!(rules[0].destinations[1].address, "b:80");
        assert_eq!(rules[0].destinations[1].dial_timeout, Duration::from_secs(5));
        assert!(rules[0].destinations[1].policy.is_mandatory());
        assert_eq!(rules[1].listen, "0.0.0.0:81");
        assert_eq!(rules[1].destinations[1].address, "d:81");
    }

    #[test]
    fn test_canonical_form_reparses_to_same_rules() {
        let input = "listen=:9001; shadow=s:1 ;primary=p:1, listen=:9002;primary=p:2;shadow=s:2";
        let rules = parse_mappings(input, TeeMode::Shadow, &timeouts()).unwrap();

        let canonical = format_mappings(&rules);
        assert_eq!(
            canonical,
            "listen=:9001;primary=p:1;shadow=s:1,listen=:9002;primary=p:2;shadow=s:2"
        );

        let reparsed = parse_mappings(&canonical, TeeMode::Shadow, &timeouts()).unwrap();
        assert_eq!(reparsed, rules);
        assert_eq!(format_mappings(&reparsed), canonical);
    }

    #[test]
    fn test_unknown_key_names_fragment() {
        let err = parse_mappings(
            "listen=:1;primary=a:1;shadow=b:1;mirror=c:1",
            TeeMode::Shadow,
            &timeouts(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            MappingError::UnknownKey {
                key: "mirror".to_string(),
                fragment: "mirror=c:1".to_string(),
            }
        );
    }

    #[test]
    fn test_key_from_other_mode_is_unknown() {
        let err = parse_mappings(
            "listen=:1;primary1=a:1;primary2=b:1",
            TeeMode::Shadow,
            &timeouts(),
        )
        .unwrap_err();
        assert!(matches!(err, MappingError::UnknownKey { ref key, .. } if key == "primary1"));
    }

    #[test]
    fn test_fragment_without_equals_is_rejected() {
        let err = parse_mappings(
            "listen=:1;primary=a:1;shadow",
            TeeMode::Shadow,
            &timeouts(),
        )
        .unwrap_err();
        assert_eq!(err, MappingError::BadFragment("shadow".to_string()));
        assert!(err.to_string().contains("\"shadow\""));
    }

    #[test]
    fn test_missing_key_is_incomplete() {
        let err = parse_mappings("listen=:1;primary1=a:1", TeeMode::DualPrimary, &timeouts())
            .unwrap_err();
        assert_eq!(err, MappingError::Incomplete("listen=:1;primary1=a:1".to_string()));
    }

    #[test]
    fn test_empty_value_is_incomplete() {
        let err = parse_mappings(
            "listen=:1;primary=a:1;shadow=",
            TeeMode::Shadow,
            &timeouts(),
        )
        .unwrap_err();
        assert!(matches!(err, MappingError::Incomplete(_)));
    }

    #[test]
    fn test_empty_rule_is_incomplete() {
        let err = parse_mappings(
            "listen=:1;primary=a:1;shadow=b:1,",
            TeeMode::Shadow,
            &timeouts(),
        )
        .unwrap_err();
        assert_eq!(err, MappingError::Incomplete(String::new()));
    }

    #[test]
    fn test_first_error_wins() {
        let err = parse_mappings(
            "listen=:1;bogus, listen=:2;primary",
            TeeMode::Shadow,
            &timeouts(),
        )
        .unwrap_err();
        assert_eq!(err, MappingError::BadFragment("bogus".to_string()));
    }

    #[test]
    fn test_repeated_key_last_wins() {
        let rules = parse_mappings(
            "listen=:1;primary=a:1;primary=a:2;shadow=b:1",
            TeeMode::Shadow,
            &timeouts(),
        )
        .unwrap();
        assert_eq!(rules[0].destinations[0].address, "a:2");
    }

    #[test]
    fn test_describe() {
        let rules = parse_mappings(
            "listen=:1;primary=a:1;shadow=b:1",
            TeeMode::Shadow,
            &timeouts(),
        )
        .unwrap();
        assert_eq!(rules[0].describe(), "primary a:1, shadow b:1");
    }
}
