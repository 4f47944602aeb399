use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::LazyLock;

use regex::{Captures, Regex};
use stackup_domain::{RegistryKey, TemplateDocument};

use crate::error::TemplateError;
use crate::registry::RegistryView;

const INLINE_DOCUMENT: &str = "<inline>";

#[allow(clippy::expect_used)]
static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder pattern is a valid literal")
});

/// How a placeholder token maps onto the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBinding {
    pub key: RegistryKey,
    /// Prepended to the resolved value, e.g. `https://`.
    pub prefix: Option<String>,
    /// When set the key is read as a list and joined with this separator.
    pub list_separator: Option<String>,
}

impl TokenBinding {
    #[must_use]
    pub const fn key(key: RegistryKey) -> Self {
        Self {
            key,
            prefix: None,
            list_separator: None,
        }
    }

    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    #[must_use]
    pub fn joined(mut self, separator: impl Into<String>) -> Self {
        self.list_separator = Some(separator.into());
        self
    }

    fn resolve(&self, registry: &RegistryView<'_>) -> Result<String, crate::error::RegistryError> {
        let value = match &self.list_separator {
            Some(separator) => registry.resolve_list(&self.key)?.join(separator),
            None => registry.resolve(&self.key)?,
        };
        Ok(match &self.prefix {
            Some(prefix) => format!("{prefix}{value}"),
            None => value,
        })
    }
}

/// Distinct placeholder tokens in first-seen order.
#[must_use]
pub fn placeholders(document: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    PLACEHOLDER
        .captures_iter(document)
        .filter_map(|captures| captures.get(1))
        .map(|token| token.as_str())
        .filter(|token| seen.insert(*token))
        .map(str::to_string)
        .collect()
}

/// Substitutes `${TOKEN}` placeholders from registry values in one pass.
#[derive(Debug, Clone, Default)]
pub struct TemplateResolver {
    bindings: BTreeMap<String, TokenBinding>,
}

impl TemplateResolver {
    #[must_use]
    pub const fn new(bindings: BTreeMap<String, TokenBinding>) -> Self {
        Self { bindings }
    }

    #[must_use]
    pub fn bind(mut self, token: impl Into<String>, binding: TokenBinding) -> Self {
        self.bindings.insert(token.into(), binding);
        self
    }

    #[must_use]
    pub const fn bindings(&self) -> &BTreeMap<String, TokenBinding> {
        &self.bindings
    }

    /// Render an anonymous document.
    ///
    /// # Errors
    ///
    /// See [`TemplateResolver::render_document`].
    pub fn render(
        &self,
        document: &str,
        registry: &RegistryView<'_>,
    ) -> std::result::Result<String, TemplateError> {
        self.render_named(INLINE_DOCUMENT, document, registry)
    }

    /// Render a named document. Either every placeholder is substituted or an
    /// error is returned; resolved values are inserted verbatim and never
    /// re-scanned.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::UnboundPlaceholder`] for a token without a
    /// binding and [`TemplateError::UnresolvedPlaceholder`] for a token whose
    /// registry key cannot be read.
    pub fn render_document(
        &self,
        document: &TemplateDocument,
        registry: &RegistryView<'_>,
    ) -> std::result::Result<String, TemplateError> {
        self.render_named(&document.name, &document.body, registry)
    }

    fn render_named(
        &self,
        name: &str,
        body: &str,
        registry: &RegistryView<'_>,
    ) -> std::result::Result<String, TemplateError> {
        let mut values = HashMap::new();
        for token in placeholders(body) {
            let Some(binding) = self.bindings.get(&token) else {
                return Err(TemplateError::UnboundPlaceholder {
                    document: name.to_string(),
                    token,
                });
            };
            let value = binding.resolve(registry).map_err(|source| {
                TemplateError::UnresolvedPlaceholder {
                    document: name.to_string(),
                    token: token.clone(),
                    source,
                }
            })?;
            values.insert(token, value);
        }

        log::debug!("rendered {name} with {} placeholder(s)", values.len());
        let rendered = PLACEHOLDER.replace_all(body, |captures: &Captures<'_>| {
            values.get(&captures[1]).cloned().unwrap_or_default()
        });
        Ok(rendered.into_owned())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use stackup_domain::{RegistryKey, TemplateDocument, UnitId};

    use super::{TemplateResolver, TokenBinding, placeholders};
    use crate::error::{RegistryError, TemplateError};
    use crate::registry::ExportRegistry;

    fn key(value: &str) -> RegistryKey {
        RegistryKey::try_from(value).expect("key")
    }

    fn producer() -> UnitId {
        UnitId::try_from("network").expect("unit")
    }

    #[test]
    fn substitutes_mapped_token() {
        let registry = ExportRegistry::new();
        registry
            .publish(&producer(), key("network.endpoint"), "https://host")
            .expect("publish");
        let resolver =
            TemplateResolver::default().bind("EP", TokenBinding::key(key("network.endpoint")));

        let rendered = resolver
            .render("endpoint=${EP}", &registry.view())
            .expect("render");
        assert_eq!(rendered, "endpoint=https://host");
    }

    #[test]
    fn unpublished_key_fails_without_partial_output() {
        let registry = ExportRegistry::new();
        registry
            .publish(&producer(), key("network.endpoint"), "https://host")
            .expect("publish");
        let resolver = TemplateResolver::default()
            .bind("EP", TokenBinding::key(key("network.endpoint")))
            .bind("MISSING", TokenBinding::key(key("cluster.name")));

        let error = resolver
            .render("a=${EP} b=${MISSING}", &registry.view())
            .expect_err("unresolved");
        assert_eq!(error.token(), "MISSING");
        assert!(matches!(
            error,
            TemplateError::UnresolvedPlaceholder {
                source: RegistryError::UnresolvedKey { .. },
                ..
            }
        ));
    }

    #[test]
    fn unbound_token_fails() {
        let registry = ExportRegistry::new();
        let error = TemplateResolver::default()
            .render("x=${NOPE}", &registry.view())
            .expect_err("unbound");
        assert!(matches!(error, TemplateError::UnboundPlaceholder { .. }));
    }

    #[test]
    fn derived_forms_apply_prefix_and_join_lists() {
        let registry = ExportRegistry::new();
        registry
            .publish(&producer(), key("observability.opensearch.endpoint"), "search.local")
            .expect("publish");
        registry
            .publish(
                &producer(),
                key("network.subnets.private_ids"),
                vec!["subnet-a".to_string(), "subnet-b".to_string()],
            )
            .expect("publish list");
        let resolver = TemplateResolver::default()
            .bind(
                "OPENSEARCH",
                TokenBinding::key(key("observability.opensearch.endpoint")).with_prefix("https://"),
            )
            .bind(
                "SUBNETS",
                TokenBinding::key(key("network.subnets.private_ids")).joined(","),
            );

        let rendered = resolver
            .render("hosts: ${OPENSEARCH}\nsubnets: ${SUBNETS}", &registry.view())
            .expect("render");
        assert_eq!(
            rendered,
            "hosts: https://search.local\nsubnets: subnet-a,subnet-b"
        );
    }

    #[test]
    fn list_bound_as_scalar_is_a_resolution_error() {
        let registry = ExportRegistry::new();
        registry
            .publish(
                &producer(),
                key("network.subnets.private_ids"),
                vec!["subnet-a".to_string()],
            )
            .expect("publish list");
        let resolver = TemplateResolver::default().bind(
            "SUBNETS",
            TokenBinding::key(key("network.subnets.private_ids")),
        );
        let error = resolver
            .render("${SUBNETS}", &registry.view())
            .expect_err("type mismatch");
        assert!(matches!(
            error,
            TemplateError::UnresolvedPlaceholder {
                source: RegistryError::TypeMismatch { .. },
                ..
            }
        ));
    }

    #[test]
    fn resolved_values_are_not_rescanned() {
        let registry = ExportRegistry::new();
        registry
            .publish(&producer(), key("network.raw"), "${OTHER}")
            .expect("publish");
        registry
            .publish(&producer(), key("network.other"), "expanded")
            .expect("publish");
        let resolver = TemplateResolver::default()
            .bind("RAW", TokenBinding::key(key("network.raw")))
            .bind("OTHER", TokenBinding::key(key("network.other")));

        let rendered = resolver
            .render("value=${RAW}", &registry.view())
            .expect("render");
        assert_eq!(rendered, "value=${OTHER}");
    }

    #[test]
    fn repeated_tokens_and_non_placeholders() {
        let registry = ExportRegistry::new();
        registry
            .publish(&producer(), key("network.vpc.id"), "vpc-1")
            .expect("publish");
        let resolver =
            TemplateResolver::default().bind("VPC", TokenBinding::key(key("network.vpc.id")));

        let rendered = resolver
            .render("${VPC}/${VPC} $VPC ${not-a-token}", &registry.view())
            .expect("render");
        assert_eq!(rendered, "vpc-1/vpc-1 $VPC ${not-a-token}");
    }

    #[test]
    fn document_without_placeholders_is_unchanged() {
        let registry = ExportRegistry::new();
        let document = TemplateDocument::new("static", "version: \"2\"\n");
        let rendered = TemplateResolver::default()
            .render_document(&document, &registry.view())
            .expect("render");
        assert_eq!(rendered, document.body);
    }

    #[test]
    fn lists_placeholders_in_first_seen_order() {
        assert_eq!(
            placeholders("${B} ${A} ${B} ${_C1}"),
            vec!["B".to_string(), "A".to_string(), "_C1".to_string()]
        );
    }
}
