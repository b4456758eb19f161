//! Resource modules
//!
//! One [`ScanModule`](crate::engine::ScanModule) per service.

pub mod dns;
pub mod registries;

pub use dns::{DnsModule, DnsRecord};
pub use registries::{RegistriesModule, Repository};

/// Module names accepted on the command line, with their aliases
pub const MODULE_NAMES: &[(&str, &[&str])] = &[
    ("registries", &["ecr"]),
    ("dns", &["route53"]),
];

/// Resolve a command-line module name or alias to its canonical name.
/// `all` expands to every module.
pub fn resolve(name: &str) -> Option<Vec<&'static str>> {
    let name = name.to_lowercase();
    if name == "all" {
        return Some(MODULE_NAMES.iter().map(|(n, _)| *n).collect());
    }
    MODULE_NAMES
        .iter()
        .find(|(canonical, aliases)| *canonical == name || aliases.contains(&name.as_str()))
        .map(|(canonical, _)| vec![*canonical])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_aliases() {
        assert_eq!(resolve("ECR"), Some(vec!["registries"]));
        assert_eq!(resolve("route53"), Some(vec!["dns"]));
        assert_eq!(resolve("all"), Some(vec!["registries", "dns"]));
        assert_eq!(resolve("lambda"), None);
    }
}
