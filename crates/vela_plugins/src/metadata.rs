//! The metadata document returned by `plugin_init`.
//!
//! ```json
//! {
//!   "name": "csv",
//!   "version": "1.0.0",
//!   "abiVersion": 1,
//!   "services": [{ "name": "csv", "symbol": "csv", "methods": ["parse", "format"] }],
//!   "actions": [{ "name": "ParseCSV", "role": "own", "verbs": ["parsecsv"], "prepositions": ["from"] }],
//!   "qualifiers": [{ "name": "first", "inputTypes": ["List"], "description": "First element" }],
//!   "stateful": true,
//!   "reentrant": false
//! }
//! ```
//!
//! Every field is optional. A plugin without `name` is named after its file.

use serde::{Deserialize, Serialize};

use crate::abi::ABI_VERSION;
use crate::error::PluginError;
use crate::host::ClaimKind;

/// A service exported by a plugin.
///
/// Method `m` of a service with symbol `s` is invoked as the action `"s.m"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDecl {
    /// Registry name.
    pub name: String,
    /// Action prefix; defaults to the service name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    /// Method names.
    #[serde(default)]
    pub methods: Vec<String>,
}

impl ServiceDecl {
    /// The action prefix for this service's methods.
    #[must_use]
    pub fn symbol(&self) -> &str {
        self.symbol.as_deref().unwrap_or(&self.name)
    }
}

/// An action a plugin handles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionDecl {
    /// Action name.
    pub name: String,
    /// Data-flow role, informational for the host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Verbs that dispatch to this action.
    #[serde(default)]
    pub verbs: Vec<String>,
    /// Prepositions accepted after the verb.
    #[serde(default)]
    pub prepositions: Vec<String>,
}

impl ActionDecl {
    /// Verbs claimed by this action; the lowercased name if none are listed.
    #[must_use]
    pub fn claimed_verbs(&self) -> Vec<String> {
        if self.verbs.is_empty() {
            vec![self.name.to_lowercase()]
        } else {
            self.verbs.iter().map(|verb| verb.to_lowercase()).collect()
        }
    }
}

/// A qualifier a plugin provides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualifierDecl {
    /// Qualifier name.
    pub name: String,
    /// Accepted value types; empty accepts any.
    #[serde(default)]
    pub input_types: Vec<String>,
    /// Human readable summary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl QualifierDecl {
    /// Returns true if the qualifier accepts values of `value_type`.
    #[must_use]
    pub fn accepts(&self, value_type: &str) -> bool {
        self.input_types.is_empty()
            || self
                .input_types
                .iter()
                .any(|accepted| accepted.eq_ignore_ascii_case(value_type))
    }
}

fn default_true() -> bool {
    true
}

/// Parsed `plugin_init` document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginMetadata {
    /// Plugin name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Plugin version string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Binary contract version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abi_version: Option<u32>,
    /// Exported services.
    #[serde(default)]
    pub services: Vec<ServiceDecl>,
    /// Handled actions.
    #[serde(default)]
    pub actions: Vec<ActionDecl>,
    /// Provided qualifiers.
    #[serde(default)]
    pub qualifiers: Vec<QualifierDecl>,
    /// The plugin keeps state between calls.
    #[serde(default = "default_true")]
    pub stateful: bool,
    /// The plugin tolerates concurrent calls.
    #[serde(default)]
    pub reentrant: bool,
}

impl Default for PluginMetadata {
    fn default() -> Self {
        Self {
            name: None,
            version: None,
            abi_version: None,
            services: Vec::new(),
            actions: Vec::new(),
            qualifiers: Vec::new(),
            stateful: true,
            reentrant: false,
        }
    }
}

impl PluginMetadata {
    /// Parses and validates a metadata document.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::InvalidMetadata`] for malformed JSON, an
    /// unsupported `abiVersion`, empty names or a name declared twice.
    pub fn parse(plugin: &str, text: &str) -> Result<Self, PluginError> {
        let metadata: Self =
            serde_json::from_str(text).map_err(|err| invalid(plugin, err.to_string()))?;
        metadata.validate(plugin)?;
        Ok(metadata)
    }

    /// Checks internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::InvalidMetadata`] describing the first problem.
    pub fn validate(&self, plugin: &str) -> Result<(), PluginError> {
        if let Some(version) = self.abi_version
            && version != ABI_VERSION
        {
            return Err(invalid(
                plugin,
                format!("abiVersion {version} is not supported (expected {ABI_VERSION})"),
            ));
        }

        let claims = self.claims();
        for (index, (kind, name)) in claims.iter().enumerate() {
            if name.trim().is_empty() {
                return Err(invalid(plugin, format!("empty {kind} name")));
            }
            if claims[..index].contains(&(*kind, name.clone())) {
                return Err(invalid(plugin, format!("{kind} '{name}' declared twice")));
            }
        }
        Ok(())
    }

    /// Whether calls into this plugin must be serialized.
    #[must_use]
    pub fn serialize_calls(&self) -> bool {
        self.stateful && !self.reentrant
    }

    /// Every name this plugin claims, by namespace.
    #[must_use]
    pub fn claims(&self) -> Vec<(ClaimKind, String)> {
        let services = self
            .services
            .iter()
            .map(|service| (ClaimKind::Service, service.name.clone()));
        let verbs = self
            .actions
            .iter()
            .flat_map(ActionDecl::claimed_verbs)
            .map(|verb| (ClaimKind::Action, verb));
        let qualifiers = self
            .qualifiers
            .iter()
            .map(|qualifier| (ClaimKind::Qualifier, qualifier.name.clone()));
        services.chain(verbs).chain(qualifiers).collect()
    }

    /// The action declaring `verb`, if any.
    #[must_use]
    pub fn action_for_verb(&self, verb: &str) -> Option<&ActionDecl> {
        let verb = verb.to_lowercase();
        self.actions
            .iter()
            .find(|action| action.claimed_verbs().contains(&verb))
    }

    /// The qualifier called `name`, if any.
    #[must_use]
    pub fn qualifier(&self, name: &str) -> Option<&QualifierDecl> {
        self.qualifiers.iter().find(|qualifier| qualifier.name == name)
    }
}

fn invalid(plugin: &str, reason: String) -> PluginError {
    PluginError::InvalidMetadata {
        plugin: plugin.to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &str = r#"{
        "name": "csv",
        "version": "1.0.0",
        "actions": [
            {"name": "ParseCSV", "role": "own", "verbs": ["parsecsv", "readcsv"], "prepositions": ["from"]},
            {"name": "FormatCSV"}
        ],
        "qualifiers": [{"name": "first", "inputTypes": ["List"], "description": "First element"}]
    }"#;

    #[test]
    fn parses_with_defaults() {
        let metadata = PluginMetadata::parse("csv", CSV).unwrap();
        assert_eq!(metadata.name.as_deref(), Some("csv"));
        assert!(metadata.stateful);
        assert!(!metadata.reentrant);
        assert!(metadata.serialize_calls());
        assert_eq!(metadata.qualifiers[0].input_types, vec!["List"]);
    }

    #[test]
    fn action_without_verbs_claims_its_name() {
        let metadata = PluginMetadata::parse("csv", CSV).unwrap();
        let claims = metadata.claims();
        assert!(claims.contains(&(ClaimKind::Action, "formatcsv".to_string())));
        assert!(claims.contains(&(ClaimKind::Action, "readcsv".to_string())));
        assert_eq!(
            metadata.action_for_verb("ReadCSV").map(|a| a.name.as_str()),
            Some("ParseCSV")
        );
    }

    #[test]
    fn rejects_unknown_abi_version() {
        let err = PluginMetadata::parse("x", r#"{"abiVersion": 2}"#).unwrap_err();
        assert!(err.is_contract_violation());
        assert!(err.to_string().contains("abiVersion 2"));
    }

    #[test]
    fn rejects_internal_duplicates() {
        let text = r#"{"services": [{"name": "a"}, {"name": "a"}]}"#;
        assert!(PluginMetadata::parse("x", text).is_err());
    }

    #[test]
    fn rejects_non_json() {
        assert!(matches!(
            PluginMetadata::parse("x", "hello"),
            Err(PluginError::InvalidMetadata { .. })
        ));
    }

    #[test]
    fn service_symbol_defaults_to_name() {
        let text = r#"{"services": [{"name": "counter", "methods": ["get"]}]}"#;
        let metadata = PluginMetadata::parse("x", text).unwrap();
        assert_eq!(metadata.services[0].symbol(), "counter");
    }

    #[test]
    fn qualifier_input_types_are_case_insensitive() {
        let metadata = PluginMetadata::parse("csv", CSV).unwrap();
        let first = metadata.qualifier("first").unwrap();
        assert!(first.accepts("list"));
        assert!(!first.accepts("String"));
    }
}
