use std::collections::HashSet;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use serde::{Serialize, Deserialize};
use ipnetwork::IpNetwork;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::error::{ReconResult, ReconError};

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+\-]+@[a-zA-Z0-9.\-]+\.[a-zA-Z]{2,}$").expect("valid email regex")
});

static DOMAIN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([a-zA-Z0-9_]([a-zA-Z0-9_\-]{0,61}[a-zA-Z0-9_])?\.)+[a-zA-Z]{2,63}\.?$")
        .expect("valid domain regex")
});

static PHONE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\+[0-9 ()\-]{6,}$").expect("valid phone regex")
});

/// Semantic type of a scan subject. Its string form is also the type tag
/// of the first event seeded into the scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    Ip,
    Ipv6,
    Netblock,
    Domain,
    Email,
    Asn,
    Phone,
    HumanName,
    Username,
}

impl TargetType {
    pub const ALL: [TargetType; 9] = [
        TargetType::Ip,
        TargetType::Ipv6,
        TargetType::Netblock,
        TargetType::Domain,
        TargetType::Email,
        TargetType::Asn,
        TargetType::Phone,
        TargetType::HumanName,
        TargetType::Username,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TargetType::Ip => "ip",
            TargetType::Ipv6 => "ipv6",
            TargetType::Netblock => "netblock",
            TargetType::Domain => "domain",
            TargetType::Email => "email",
            TargetType::Asn => "asn",
            TargetType::Phone => "phone",
            TargetType::HumanName => "human_name",
            TargetType::Username => "username",
        }
    }

    /// Infer the type of a raw target string.
    ///
    /// Human names and usernames must be wrapped in double quotes, the
    /// quotes are stripped from the returned value.
    pub fn detect(raw: &str) -> ReconResult<(TargetType, String)> {
        let value = raw.trim();
        if value.is_empty() {
            return Err(ReconError::InvalidInput("target must not be empty".to_string()));
        }

        if let Ok(ip) = IpAddr::from_str(value) {
            let kind = if ip.is_ipv4() { TargetType::Ip } else { TargetType::Ipv6 };
            return Ok((kind, ip.to_string()));
        }
        if value.contains('/') {
            if let Ok(net) = IpNetwork::from_str(value) {
                return Ok((TargetType::Netblock, net.to_string()));
            }
        }
        if EMAIL_RE.is_match(value) {
            return Ok((TargetType::Email, value.to_lowercase()));
        }
        let asn = value.strip_prefix("AS").or_else(|| value.strip_prefix("as")).unwrap_or(value);
        if !asn.is_empty() && asn.chars().all(|c| c.is_ascii_digit()) {
            return Ok((TargetType::Asn, asn.to_string()));
        }
        if PHONE_RE.is_match(value) {
            return Ok((TargetType::Phone, value.to_string()));
        }
        if value.len() > 2 && value.starts_with('"') && value.ends_with('"') {
            let inner = value[1..value.len() - 1].trim().to_string();
            if inner.is_empty() {
                return Err(ReconError::InvalidInput("quoted target is empty".to_string()));
            }
            let kind = if inner.contains(' ') { TargetType::HumanName } else { TargetType::Username };
            return Ok((kind, inner));
        }
        if DOMAIN_RE.is_match(value) {
            return Ok((TargetType::Domain, value.trim_end_matches('.').to_lowercase()));
        }

        Err(ReconError::InvalidInput(format!("could not determine the type of target '{}'", value)))
    }
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetType {
    type Err = ReconError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TargetType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ReconError::InvalidInput(format!("unknown target type: {}", s)))
    }
}

/// An alternative name for the target, used for scope matching
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetAlias {
    pub value: String,
    pub alias_type: TargetType,
}

impl TargetAlias {
    pub fn new(value: impl Into<String>, alias_type: TargetType) -> Self {
        Self {
            value: value.into().to_lowercase(),
            alias_type,
        }
    }
}

/// The scan subject plus the aliases it is known by
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    value: String,
    target_type: TargetType,
    aliases: HashSet<TargetAlias>,
}

impl Target {
    /// Create a target, validating the value against its declared type
    pub fn new(value: impl Into<String>, target_type: TargetType) -> ReconResult<Self> {
        let value = value.into().trim().to_string();
        if value.is_empty() {
            return Err(ReconError::InvalidInput("target value must not be empty".to_string()));
        }
        match target_type {
            TargetType::Ip | TargetType::Ipv6 => {
                IpAddr::from_str(&value)
                    .map_err(|_| ReconError::InvalidInput(format!("'{}' is not an IP address", value)))?;
            }
            TargetType::Netblock => {
                IpNetwork::from_str(&value)
                    .map_err(|_| ReconError::InvalidInput(format!("'{}' is not a netblock", value)))?;
            }
            TargetType::Email if !EMAIL_RE.is_match(&value) => {
                return Err(ReconError::InvalidInput(format!("'{}' is not an email address", value)));
            }
            _ => {}
        }

        let mut target = Self {
            value,
            target_type,
            aliases: HashSet::new(),
        };
        target.add_equivalents();
        Ok(target)
    }

    /// Parse a raw string, detecting its type
    pub fn detect(raw: &str) -> ReconResult<Self> {
        let (target_type, value) = TargetType::detect(raw)?;
        Self::new(value, target_type)
    }

    fn add_equivalents(&mut self) {
        let value = self.value.clone();
        self.add_alias(TargetAlias::new(value.clone(), self.target_type));

        match self.target_type {
            TargetType::Domain => {
                let lower = value.to_lowercase();
                if let Some(bare) = lower.strip_prefix("www.") {
                    self.add_alias(TargetAlias::new(bare, TargetType::Domain));
                } else {
                    self.add_alias(TargetAlias::new(format!("www.{}", lower), TargetType::Domain));
                }
            }
            TargetType::Email => {
                if let Some((_, domain)) = value.split_once('@') {
                    self.add_alias(TargetAlias::new(domain, TargetType::Domain));
                }
            }
            _ => {}
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn target_type(&self) -> TargetType {
        self.target_type
    }

    pub fn aliases(&self) -> impl Iterator<Item = &TargetAlias> {
        self.aliases.iter()
    }

    /// Record an alias; returns false when it was already known
    pub fn add_alias(&mut self, alias: TargetAlias) -> bool {
        if alias.value.is_empty() {
            return false;
        }
        let added = self.aliases.insert(alias.clone());
        if added {
            debug!("Target {} gained alias {} ({})", self.value, alias.value, alias.alias_type);
        }
        added
    }

    fn names(&self) -> impl Iterator<Item = &str> {
        self.aliases
            .iter()
            .filter(|a| matches!(a.alias_type, TargetType::Domain))
            .map(|a| a.value.as_str())
    }

    fn addresses(&self) -> impl Iterator<Item = &str> {
        self.aliases
            .iter()
            .filter(|a| matches!(a.alias_type, TargetType::Ip | TargetType::Ipv6))
            .map(|a| a.value.as_str())
    }

    /// Whether `value` belongs to the target.
    ///
    /// `include_children` accepts subdomains of a known name,
    /// `include_parents` accepts domains a known name is a subdomain of.
    pub fn matches(&self, value: &str, include_parents: bool, include_children: bool) -> bool {
        let value = value.trim().trim_end_matches('.').to_lowercase();
        if value.is_empty() {
            return false;
        }

        if let Ok(ip) = IpAddr::from_str(&value) {
            if self.addresses().any(|a| IpAddr::from_str(a).map(|a| a == ip).unwrap_or(false)) {
                return true;
            }
            return self
                .aliases
                .iter()
                .filter(|a| a.alias_type == TargetType::Netblock)
                .filter_map(|a| IpNetwork::from_str(&a.value).ok())
                .any(|net| net.contains(ip));
        }

        if self.aliases.iter().any(|a| a.value == value) {
            return true;
        }

        for name in self.names() {
            if include_children && value.ends_with(&format!(".{}", name)) {
                return true;
            }
            if include_parents && name.ends_with(&format!(".{}", value)) {
                return true;
            }
        }

        false
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.value, self.target_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_target_types() {
        assert_eq!(TargetType::detect("93.184.216.34").unwrap().0, TargetType::Ip);
        assert_eq!(TargetType::detect("2001:db8::1").unwrap().0, TargetType::Ipv6);
        assert_eq!(TargetType::detect("10.0.0.0/24").unwrap().0, TargetType::Netblock);
        assert_eq!(TargetType::detect("admin@example.com").unwrap().0, TargetType::Email);
        assert_eq!(TargetType::detect("AS15169").unwrap(), (TargetType::Asn, "15169".to_string()));
        assert_eq!(TargetType::detect("+1 555 0100").unwrap().0, TargetType::Phone);
        assert_eq!(TargetType::detect("\"John Smith\"").unwrap(), (TargetType::HumanName, "John Smith".to_string()));
        assert_eq!(TargetType::detect("\"jsmith\"").unwrap(), (TargetType::Username, "jsmith".to_string()));
        assert_eq!(TargetType::detect("Example.COM").unwrap(), (TargetType::Domain, "example.com".to_string()));
        assert!(TargetType::detect("not a target").is_err());
        assert!(TargetType::detect("  ").is_err());
    }

    #[test]
    fn test_target_type_from_str() {
        assert_eq!("DOMAIN".parse::<TargetType>().unwrap(), TargetType::Domain);
        assert_eq!("human_name".parse::<TargetType>().unwrap(), TargetType::HumanName);
        assert!("planet".parse::<TargetType>().is_err());
    }

    #[test]
    fn test_domain_matching() {
        let target = Target::new("example.com", TargetType::Domain).unwrap();

        assert!(target.matches("example.com", false, false));
        assert!(target.matches("WWW.EXAMPLE.COM", false, false));
        assert!(target.matches("api.example.com", false, true));
        assert!(!target.matches("api.example.com", false, false));
        assert!(!target.matches("example.org", true, true));
        assert!(!target.matches("notexample.com", false, true));
        assert!(!target.matches("", true, true));
    }

    #[test]
    fn test_parent_matching() {
        let target = Target::new("mail.example.com", TargetType::Domain).unwrap();

        assert!(target.matches("example.com", true, false));
        assert!(!target.matches("example.com", false, false));
    }

    #[test]
    fn test_ip_and_netblock_matching() {
        let mut target = Target::new("example.com", TargetType::Domain).unwrap();
        assert!(!target.matches("93.184.216.34", true, true));

        target.add_alias(TargetAlias::new("93.184.216.34", TargetType::Ip));
        assert!(target.matches("93.184.216.34", false, false));

        let net = Target::new("10.1.0.0/16", TargetType::Netblock).unwrap();
        assert!(net.matches("10.1.200.7", false, false));
        assert!(!net.matches("10.2.0.1", false, false));
    }

    #[test]
    fn test_email_target_aliases_domain() {
        let target = Target::new("admin@example.com", TargetType::Email).unwrap();
        assert!(target.matches("example.com", false, false));
        assert!(target.matches("www.example.com", false, true));
    }

    #[test]
    fn test_invalid_target_rejected() {
        assert!(Target::new("", TargetType::Domain).is_err());
        assert!(Target::new("example.com", TargetType::Ip).is_err());
        assert!(Target::new("nope", TargetType::Email).is_err());
    }

    #[test]
    fn test_duplicate_alias_ignored() {
        let mut target = Target::new("example.com", TargetType::Domain).unwrap();
        assert!(!target.add_alias(TargetAlias::new("EXAMPLE.com", TargetType::Domain)));
        assert!(target.add_alias(TargetAlias::new("example.net", TargetType::Domain)));
    }
}
