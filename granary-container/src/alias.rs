//! Alias registry — alternate names for canonical bean names.
//!
//! Aliases form a DAG: following `alias → target` chains always terminates
//! at a canonical name. Registration refuses anything that would create a
//! cycle.

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::debug;

use crate::error::{ContainerError, Result};

/// Resolves placeholders or other value-level indirections in strings.
///
/// Used by [`AliasRegistry::resolve_aliases`] to rewrite alias entries, and
/// by the container's embedded-value resolution. Returning `None` means the
/// value resolves to nothing; for aliases that drops the entry.
pub trait StringValueResolver: Send + Sync {
    /// Resolve `value`, returning the replacement string or `None`.
    fn resolve(&self, value: &str) -> Option<String>;
}

impl<F> StringValueResolver for F
where
    F: Fn(&str) -> Option<String> + Send + Sync,
{
    fn resolve(&self, value: &str) -> Option<String> {
        self(value)
    }
}

/// Maps alias strings to target names, transitively down to a canonical name.
///
/// All mutating operations serialize on the internal lock; reads observe a
/// consistent snapshot.
pub struct AliasRegistry {
    aliases: RwLock<HashMap<String, String>>,
    allow_override: bool,
}

impl AliasRegistry {
    /// Creates an empty registry that refuses to re-bind existing aliases.
    pub fn new() -> Self {
        Self::with_override(false)
    }

    /// Creates an empty registry with the given override policy.
    pub fn with_override(allow_override: bool) -> Self {
        Self {
            aliases: RwLock::new(HashMap::new()),
            allow_override,
        }
    }

    /// Binds `alias → name`.
    ///
    /// Registering an alias equal to its target removes any existing
    /// binding for it and succeeds as a no-op.
    ///
    /// # Errors
    /// - [`ContainerError::IllegalState`] if the alias is already bound to a
    ///   different name and overriding is disallowed
    /// - [`ContainerError::IllegalState`] if the binding would create a cycle
    pub fn register_alias(&self, name: &str, alias: &str) -> Result<()> {
        if name.is_empty() || alias.is_empty() {
            return Err(ContainerError::illegal_state(
                "Bean name and alias must not be empty",
            ));
        }

        let mut aliases = self.aliases.write();

        if alias == name {
            aliases.remove(alias);
            debug!(alias, "Ignored alias equal to its target");
            return Ok(());
        }

        if let Some(registered) = aliases.get(alias) {
            if registered == name {
                // Existing alias, nothing to do
                return Ok(());
            }
            if !self.allow_override {
                return Err(ContainerError::illegal_state(format!(
                    "Cannot define alias '{alias}' for name '{name}': \
                     it is already registered for name '{registered}'",
                )));
            }
        }

        if resolves_to(&aliases, name, alias) {
            return Err(ContainerError::illegal_state(format!(
                "Cannot register alias '{alias}' for name '{name}': \
                 '{name}' already resolves to '{alias}'",
            )));
        }

        debug!(alias, name, "Registered alias");
        aliases.insert(alias.to_string(), name.to_string());
        Ok(())
    }

    /// Removes the binding for `alias`.
    ///
    /// # Errors
    /// [`ContainerError::IllegalState`] if no such alias is registered.
    pub fn remove_alias(&self, alias: &str) -> Result<()> {
        self.aliases.write().remove(alias).ok_or_else(|| {
            ContainerError::illegal_state(format!("No alias '{alias}' registered"))
        })?;
        debug!(alias, "Removed alias");
        Ok(())
    }

    /// Returns `true` if `name` is registered as an alias.
    pub fn is_alias(&self, name: &str) -> bool {
        self.aliases.read().contains_key(name)
    }

    /// Returns every alias whose transitive resolution ends at `name`.
    pub fn aliases_of(&self, name: &str) -> Vec<String> {
        let aliases = self.aliases.read();
        let mut found = Vec::new();
        collect_aliases(&aliases, name, &mut found);
        found
    }

    /// Follows the alias chain from `name` until a non-alias is reached.
    ///
    /// Deterministic because the registered chains are acyclic.
    pub fn canonical_name(&self, name: &str) -> String {
        let aliases = self.aliases.read();
        let mut canonical = name;
        while let Some(target) = aliases.get(canonical) {
            canonical = target;
        }
        canonical.to_string()
    }

    /// Applies `resolver` to every alias and target.
    ///
    /// Entries whose resolved alias equals their resolved target are
    /// dropped, as are entries the resolver maps to nothing. A resolved
    /// alias that collides with any other registered alias or target is a
    /// hard failure; no silent shadowing.
    pub fn resolve_aliases(&self, resolver: &dyn StringValueResolver) -> Result<()> {
        let mut aliases = self.aliases.write();
        let snapshot: Vec<(String, String)> = aliases
            .iter()
            .map(|(a, n)| (a.clone(), n.clone()))
            .collect();

        for (alias, registered) in snapshot {
            let resolved_alias = resolver.resolve(&alias);
            let resolved_name = resolver.resolve(&registered);

            let (resolved_alias, resolved_name) = match (resolved_alias, resolved_name) {
                (Some(a), Some(n)) => (a, n),
                _ => {
                    debug!(alias, "Dropped alias resolved to nothing");
                    aliases.remove(&alias);
                    continue;
                }
            };

            if resolved_alias == resolved_name {
                debug!(alias, "Dropped alias resolved to its own target");
                aliases.remove(&alias);
                continue;
            }

            if resolved_alias != alias {
                if aliases.contains_key(&resolved_alias) {
                    return Err(ContainerError::definition_store(
                        resolved_alias.clone(),
                        format!(
                            "Cannot register resolved alias '{resolved_alias}' \
                             (original '{alias}') for name '{resolved_name}': \
                             the alias is already registered",
                        ),
                    ));
                }
                if aliases.values().any(|target| *target == resolved_alias) {
                    return Err(ContainerError::definition_store(
                        resolved_alias.clone(),
                        format!(
                            "Cannot register resolved alias '{resolved_alias}' \
                             (original '{alias}'): it collides with a registered name",
                        ),
                    ));
                }
                aliases.remove(&alias);
            } else if resolved_name == registered {
                continue;
            }

            if resolves_to(&aliases, &resolved_name, &resolved_alias) {
                return Err(ContainerError::illegal_state(format!(
                    "Cannot register resolved alias '{resolved_alias}' for name \
                     '{resolved_name}': '{resolved_name}' already resolves to '{resolved_alias}'",
                )));
            }

            debug!(
                alias = %resolved_alias,
                name = %resolved_name,
                "Rewrote alias via value resolver"
            );
            aliases.insert(resolved_alias, resolved_name);
        }

        Ok(())
    }

    /// Number of registered aliases.
    pub fn len(&self) -> usize {
        self.aliases.read().len()
    }

    /// Returns `true` if no aliases are registered.
    pub fn is_empty(&self) -> bool {
        self.aliases.read().is_empty()
    }
}

impl Default for AliasRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// True if following the chain from `start` passes through `target`.
///
/// Bounded by the map size; the map never holds a cycle.
fn resolves_to(aliases: &HashMap<String, String>, start: &str, target: &str) -> bool {
    if start == target {
        return true;
    }
    let mut current = start;
    let mut steps = 0;
    while let Some(next) = aliases.get(current) {
        if next == target {
            return true;
        }
        current = next;
        steps += 1;
        if steps > aliases.len() {
            break;
        }
    }
    false
}

fn collect_aliases(aliases: &HashMap<String, String>, name: &str, out: &mut Vec<String>) {
    for (alias, target) in aliases {
        if target == name {
            out.push(alias.clone());
            collect_aliases(aliases, alias, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alias_resolves_transitively() {
        let registry = AliasRegistry::new();
        registry.register_alias("canonical", "a1").unwrap();
        registry.register_alias("a1", "a2").unwrap();

        assert_eq!(registry.canonical_name("a2"), "canonical");
        assert_eq!(
            registry.canonical_name("a2"),
            registry.canonical_name("a1")
        );

        let mut aliases = registry.aliases_of("canonical");
        aliases.sort();
        assert_eq!(aliases, vec!["a1".to_string(), "a2".to_string()]);
    }

    #[test]
    fn canonical_name_of_non_alias_is_itself() {
        let registry = AliasRegistry::new();
        assert_eq!(registry.canonical_name("plain"), "plain");
    }

    #[test]
    fn alias_equal_to_name_removes_binding() {
        let registry = AliasRegistry::new();
        registry.register_alias("canonical", "a1").unwrap();
        registry.register_alias("a1", "a1").unwrap();
        assert!(!registry.is_alias("a1"));
    }

    #[test]
    fn cycle_rejected() {
        let registry = AliasRegistry::new();
        registry.register_alias("canonical", "a1").unwrap();

        let result = registry.register_alias("a1", "canonical");
        assert!(matches!(
            result.unwrap_err(),
            ContainerError::IllegalState { .. }
        ));
    }

    #[test]
    fn transitive_cycle_rejected() {
        let registry = AliasRegistry::new();
        registry.register_alias("b", "c").unwrap();
        registry.register_alias("a", "b").unwrap();

        let result = registry.register_alias("c", "a");
        assert!(result.is_err());
    }

    #[test]
    fn rebinding_rejected_without_override() {
        let registry = AliasRegistry::new();
        registry.register_alias("first", "a").unwrap();

        assert!(registry.register_alias("second", "a").is_err());
        // Re-registering the same binding is a no-op
        assert!(registry.register_alias("first", "a").is_ok());
    }

    #[test]
    fn rebinding_allowed_with_override() {
        let registry = AliasRegistry::with_override(true);
        registry.register_alias("first", "a").unwrap();
        registry.register_alias("second", "a").unwrap();

        assert_eq!(registry.canonical_name("a"), "second");
    }

    #[test]
    fn remove_alias_fails_when_absent() {
        let registry = AliasRegistry::new();
        assert!(registry.remove_alias("ghost").is_err());
    }

    #[test]
    fn chain_terminates_within_alias_count() {
        let registry = AliasRegistry::new();
        registry.register_alias("canonical", "a1").unwrap();
        registry.register_alias("a1", "a2").unwrap();
        registry.register_alias("a2", "a3").unwrap();

        // At most |aliases| hops from any alias to the canonical name
        assert_eq!(registry.canonical_name("a3"), "canonical");
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn resolver_rewrites_and_drops() {
        let registry = AliasRegistry::new();
        registry.register_alias("canonical", "old-alias").unwrap();
        registry.register_alias("canonical", "kept").unwrap();

        registry
            .resolve_aliases(&|value: &str| {
                Some(match value {
                    "old-alias" => "new-alias".to_string(),
                    other => other.to_string(),
                })
            })
            .unwrap();

        assert!(!registry.is_alias("old-alias"));
        assert!(registry.is_alias("new-alias"));
        assert!(registry.is_alias("kept"));
        assert_eq!(registry.canonical_name("new-alias"), "canonical");
    }

    #[test]
    fn resolver_dropping_entry() {
        let registry = AliasRegistry::new();
        registry.register_alias("canonical", "doomed").unwrap();

        registry
            .resolve_aliases(&|value: &str| {
                (value != "doomed").then(|| value.to_string())
            })
            .unwrap();

        assert!(registry.is_empty());
    }

    #[test]
    fn resolver_collision_is_hard_failure() {
        let registry = AliasRegistry::new();
        registry.register_alias("canonical", "a1").unwrap();
        registry.register_alias("canonical", "a2").unwrap();

        // Both aliases map to the same resolved string
        let result = registry.resolve_aliases(&|value: &str| {
            Some(match value {
                "a1" | "a2" => "merged".to_string(),
                other => other.to_string(),
            })
        });

        assert!(matches!(
            result.unwrap_err(),
            ContainerError::DefinitionStore(_)
        ));
    }

    #[test]
    fn resolver_alias_equal_to_target_dropped() {
        let registry = AliasRegistry::new();
        registry.register_alias("canonical", "a1").unwrap();

        registry
            .resolve_aliases(&|value: &str| {
                Some(match value {
                    "a1" => "canonical".to_string(),
                    other => other.to_string(),
                })
            })
            .unwrap();

        assert!(registry.is_empty());
    }
}
