//! Tool descriptors

use serde::{Deserialize, Serialize};

use super::NAMESPACE_SEPARATOR;

/// One tool as advertised to clients.
///
/// The externally visible name is `namespace + separator + name`; that
/// composition is the only naming contract with clients and must round-trip
/// through [`ToolDescriptor::parse_qualified`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub namespace: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<serde_json::Value>,
}

impl ToolDescriptor {
    /// Externally visible, namespace-qualified tool name.
    pub fn qualified_name(&self) -> String {
        format!("{}{}{}", self.namespace, NAMESPACE_SEPARATOR, self.name)
    }

    /// Split a qualified name into `(namespace, name)` on the first
    /// separator. Returns `None` when no separator is present or either side
    /// is empty. Namespaces never contain the separator, so the split is
    /// unambiguous and the inverse of [`qualified_name`](Self::qualified_name).
    pub fn parse_qualified(qualified: &str) -> Option<(&str, &str)> {
        let (namespace, name) = qualified.split_once(NAMESPACE_SEPARATOR)?;
        if namespace.is_empty() || name.is_empty() {
            return None;
        }
        Some((namespace, name))
    }
}
