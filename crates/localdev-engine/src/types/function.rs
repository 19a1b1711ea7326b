//! Function records: a deployable handler plus its environment and triggers.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::descriptor::TriggerDescriptor;

/// A `module.entry` handler reference.
///
/// The module part may itself contain dots and slashes; only the last dot
/// separates the entry point.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HandlerRef {
    pub module: String,
    pub entry: String,
}

impl HandlerRef {
    pub fn parse(reference: &str) -> Option<Self> {
        let (module, entry) = reference.rsplit_once('.')?;
        if module.is_empty() || entry.is_empty() {
            return None;
        }
        Some(Self {
            module: module.to_string(),
            entry: entry.to_string(),
        })
    }
}

impl fmt::Display for HandlerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.module, self.entry)
    }
}

/// One function from the service definition, ready to be invoked.
///
/// `environment` holds provider defaults, then function values, then
/// process-level overrides, each layer winning over the previous one.
/// Local override files are layered on top per invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionRecord {
    pub name: String,
    pub handler: HandlerRef,
    pub environment: BTreeMap<String, String>,
    pub triggers: Vec<TriggerDescriptor>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_splits_on_last_dot() {
        let r = HandlerRef::parse("src/handlers/api.v2.handler").expect("valid ref");
        assert_eq!(r.module, "src/handlers/api.v2");
        assert_eq!(r.entry, "handler");
        assert_eq!(r.to_string(), "src/handlers/api.v2.handler");
    }

    #[test]
    fn test_parse_rejects_missing_parts() {
        assert!(HandlerRef::parse("handler").is_none());
        assert!(HandlerRef::parse(".handler").is_none());
        assert!(HandlerRef::parse("index.").is_none());
    }
}
