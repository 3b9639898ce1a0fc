//! Cross-unit name resolution
//!
//! `ctx.require(name)` lands here. The first matching rule wins:
//!
//! 1. `name` is a loaded unit id, or a bare path with a loaded instance
//!    (the earliest loaded `path#key` is used)
//! 2. `name` is a declared (or previously owned) sub-unit of a loaded owner
//! 3. `name` is disabled with a `~` key: not a unit (`Ok(None)`)
//! 4. `name` is on the basic config's unit allow-list or a key of the
//!    plugin config table
//! 5. the catalog can build `name`
//! 6. otherwise it is not a unit (`Ok(None)`)
//!
//! Rule 4 only chooses the config and the log level for rule 5.
//! Every successful match records the `requester -> name` edge.

use tether_plugin_api::{PluginConfig, UnitRef, instance_key};

use super::error::RuntimeError;
use super::manager::{Origin, PluginManager};

impl PluginManager {
    /// Resolve `name` on behalf of the unit `requester`
    pub(crate) fn resolve_for(
        &self,
        requester: &str,
        name: &str,
    ) -> Result<Option<UnitRef>, RuntimeError> {
        let owner = {
            let mut registry = self.registry();
            let loaded = registry.units.get(name).or_else(|| {
                if instance_key(name).is_some() {
                    return None;
                }
                registry
                    .order
                    .iter()
                    .filter_map(|id| registry.units.get(id))
                    .find(|unit| unit.path() == name)
            });
            if let Some(unit) = loaded {
                let found = unit.unit_ref();
                let id = unit.id().to_string();
                if requester != id {
                    registry.record_edge(requester, &id);
                }
                return Ok(Some(found));
            }

            let declared_by_requester = registry
                .units
                .get(requester)
                .is_some_and(|unit| unit.has_declared_subunit(name));
            if declared_by_requester {
                Some(requester.to_string())
            } else {
                registry
                    .owned_by
                    .get(name)
                    .filter(|owner| registry.units.contains_key(*owner))
                    .cloned()
            }
        };

        if let Some(owner) = owner {
            let config = self.shared.config.plugin(name).unwrap_or_default();
            tracing::debug!(unit = %name, owner = %owner, "Materializing sub-unit");
            let found = self.load_unit(name, config, Origin::Subunit(owner.clone()))?;
            if requester != owner {
                self.registry().record_edge(requester, name);
            }
            return Ok(Some(found));
        }

        if self.shared.config.is_disabled(name) {
            tracing::debug!(unit = %name, requester = %requester, "Unit disabled in config");
            return Ok(None);
        }

        let allowlisted = self
            .shared
            .config
            .basic()
            .unit_allowlist
            .iter()
            .any(|allowed| allowed == name);
        let configured = self.shared.config.plugin(name);
        let expected = allowlisted || configured.is_some();

        if !self.shared.catalog.contains(name) {
            if expected {
                tracing::warn!(unit = %name, requester = %requester, "Unit is configured but not in the catalog");
            }
            return Ok(None);
        }

        let config = configured.unwrap_or_else(PluginConfig::new);
        match self.load_unit(name, config, Origin::Resolved) {
            Ok(found) => {
                if allowlisted {
                    tracing::info!(unit = %name, requester = %requester, "Resolved allow-listed unit");
                }
                self.registry().record_edge(requester, name);
                Ok(Some(found))
            }
            Err(RuntimeError::NotInCatalog { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
