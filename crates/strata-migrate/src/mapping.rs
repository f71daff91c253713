//! Mapping definitions and the configuration resolver.
//!
//! A [`MappingDefinition`] is the declarative, operator-authored description
//! of how each source entity type lands in the destination store. Resolving it
//! produces a [`MigrationPlan`]: validated [`EntityDescriptor`]s in dependency
//! order, with every parent placed before its children.
//!
//! Resolution is pure. Loading from disk is separate ([`MappingDefinition::from_file`]).

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::dag::Dag;
use crate::error::ConfigError;
use crate::projection::ProjectionRules;
use crate::template::{ID_PLACEHOLDER, PathTemplate};

/// Default collection holding migration markers.
pub const DEFAULT_TRACKING_COLLECTION: &str = "_migration_markers";

fn default_tracking_collection() -> String {
    DEFAULT_TRACKING_COLLECTION.to_string()
}

fn default_id_field() -> String {
    ID_PLACEHOLDER.to_string()
}

/// The mapping file as authored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingDefinition {
    /// Collection holding one marker per migrated document.
    #[serde(default = "default_tracking_collection")]
    pub tracking_collection: String,
    /// Explicit phase order; derived from parent links when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<Vec<String>>,
    /// One entry per entity type.
    pub entities: Vec<EntityMapping>,
}

/// Mapping for one entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityMapping {
    /// Entity type name; also the key in the source data set.
    pub name: String,
    /// Source field holding the record identifier.
    #[serde(default = "default_id_field")]
    pub id_field: String,
    /// Parent entity and the projected field referencing it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<ParentLink>,
    /// Destination path template.
    pub path: String,
    /// Field projection rules.
    #[serde(flatten)]
    pub projection: ProjectionRules,
    /// Fields that must be present and non-null after projection.
    #[serde(default)]
    pub required: Vec<String>,
}

/// A child-to-parent reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParentLink {
    /// Parent entity type.
    pub entity: String,
    /// Projected field holding the parent's source identifier.
    pub field: String,
}

impl MappingDefinition {
    /// Parses a mapping from JSON text.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Parse` if the text is not a valid mapping.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })
    }

    /// Loads a mapping file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Io` if the file cannot be read and
    /// `ConfigError::Parse` if it is not a valid mapping.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ConfigError::Io {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        Self::from_json(&text)
    }

    /// Validates the mapping and orders its entity types.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for an empty or duplicated declaration, an
    /// unknown parent, a cycle, a malformed or unresolvable template, two
    /// entity types sharing a destination collection, or an inconsistent
    /// explicit order.
    pub fn resolve(&self) -> Result<MigrationPlan, ConfigError> {
        if self.entities.is_empty() {
            return Err(ConfigError::Empty);
        }
        validate_tracking_collection(&self.tracking_collection)?;

        let mut by_name: HashMap<&str, &EntityMapping> = HashMap::new();
        for entity in &self.entities {
            if by_name.insert(entity.name.as_str(), entity).is_some() {
                return Err(ConfigError::DuplicateEntity {
                    entity: entity.name.clone(),
                });
            }
        }

        let mut dag: Dag<String> = Dag::new();
        for entity in &self.entities {
            dag.add_node(entity.name.clone());
        }
        for entity in &self.entities {
            if let Some(parent) = &entity.parent {
                if !by_name.contains_key(parent.entity.as_str()) {
                    return Err(ConfigError::UnknownParent {
                        entity: entity.name.clone(),
                        parent: parent.entity.clone(),
                    });
                }
                let from = dag.add_node(parent.entity.clone());
                let to = dag.add_node(entity.name.clone());
                dag.add_edge(from, to);
            }
        }
        let derived_order = dag.toposort()?;

        let order = match &self.order {
            Some(explicit) => validate_explicit_order(explicit, &by_name)?,
            None => derived_order,
        };

        let mut templates: HashMap<&str, PathTemplate> = HashMap::new();
        for entity in &self.entities {
            let template =
                PathTemplate::parse(&entity.path).map_err(|e| ConfigError::InvalidTemplate {
                    entity: entity.name.clone(),
                    template: entity.path.clone(),
                    reason: e.to_string(),
                })?;
            templates.insert(entity.name.as_str(), template);
        }

        let mut claimed: Vec<(&str, &PathTemplate)> = Vec::new();
        let mut phases = Vec::with_capacity(order.len());
        for (phase_index, name) in order.iter().enumerate() {
            let entity = by_name[name.as_str()];
            let template = templates[name.as_str()].clone();
            let ancestors = ancestor_chain(entity, &by_name);

            check_placeholders(entity, &template, &ancestors, &templates)?;

            if template.root_collection() == Some(self.tracking_collection.as_str()) {
                return Err(ConfigError::DuplicatePathPrefix {
                    first: entity.name.clone(),
                    second: self.tracking_collection.clone(),
                    pattern: template.collection_pattern(),
                });
            }
            if let Some((first, existing)) = claimed
                .iter()
                .find(|(_, existing)| existing.shares_collection(&template))
            {
                return Err(ConfigError::DuplicatePathPrefix {
                    first: (*first).to_string(),
                    second: entity.name.clone(),
                    pattern: existing.collection_pattern(),
                });
            }
            claimed.push((entity.name.as_str(), &templates[name.as_str()]));

            let mut required = entity.required.clone();
            if let Some(parent) = &entity.parent {
                if !required.contains(&parent.field) {
                    required.push(parent.field.clone());
                }
            }

            phases.push(EntityDescriptor {
                name: entity.name.clone(),
                id_field: entity.id_field.clone(),
                parent: entity.parent.clone(),
                template,
                projection: entity.projection.clone(),
                required,
                ancestors,
                phase_index,
            });
        }

        let index = phases
            .iter()
            .enumerate()
            .map(|(i, phase)| (phase.name.clone(), i))
            .collect();

        Ok(MigrationPlan {
            tracking_collection: self.tracking_collection.clone(),
            phases,
            index,
        })
    }
}

fn validate_tracking_collection(name: &str) -> Result<(), ConfigError> {
    if name.is_empty() || name.contains('/') || name == "." || name == ".." {
        return Err(ConfigError::InvalidOption {
            name: "trackingCollection".into(),
            message: format!("'{name}' is not a single collection name"),
        });
    }
    Ok(())
}

fn validate_explicit_order(
    explicit: &[String],
    by_name: &HashMap<&str, &EntityMapping>,
) -> Result<Vec<String>, ConfigError> {
    let mut position: HashMap<&str, usize> = HashMap::new();
    for (i, name) in explicit.iter().enumerate() {
        if !by_name.contains_key(name.as_str()) {
            return Err(ConfigError::InvalidOrder {
                message: format!("'{name}' is not a declared entity type"),
            });
        }
        if position.insert(name.as_str(), i).is_some() {
            return Err(ConfigError::InvalidOrder {
                message: format!("'{name}' is listed more than once"),
            });
        }
    }

    let mut missing: Vec<&str> = by_name
        .keys()
        .copied()
        .filter(|name| !position.contains_key(name))
        .collect();
    if !missing.is_empty() {
        missing.sort_unstable();
        return Err(ConfigError::InvalidOrder {
            message: format!("missing entity type(s): {}", missing.join(", ")),
        });
    }

    for name in explicit {
        if let Some(parent) = &by_name[name.as_str()].parent {
            if position[parent.entity.as_str()] > position[name.as_str()] {
                return Err(ConfigError::InvalidOrder {
                    message: format!("'{name}' is listed before its parent '{}'", parent.entity),
                });
            }
        }
    }

    Ok(explicit.to_vec())
}

/// Parent first, root last. The parent graph is acyclic by the time this runs.
fn ancestor_chain(entity: &EntityMapping, by_name: &HashMap<&str, &EntityMapping>) -> Vec<String> {
    let mut chain = Vec::new();
    let mut current = entity.parent.as_ref();
    while let Some(link) = current {
        chain.push(link.entity.clone());
        current = by_name
            .get(link.entity.as_str())
            .and_then(|parent| parent.parent.as_ref());
    }
    chain
}

fn check_placeholders(
    entity: &EntityMapping,
    template: &PathTemplate,
    ancestors: &[String],
    templates: &HashMap<&str, PathTemplate>,
) -> Result<(), ConfigError> {
    let parent_placeholders: HashSet<&str> = entity
        .parent
        .as_ref()
        .and_then(|p| templates.get(p.entity.as_str()))
        .map(|t| t.ancestor_placeholders().collect())
        .unwrap_or_default();

    for placeholder in template.ancestor_placeholders() {
        if !ancestors.iter().any(|a| a == placeholder) {
            return Err(ConfigError::UndeclaredPlaceholder {
                entity: entity.name.clone(),
                placeholder: placeholder.to_string(),
            });
        }
        let is_parent = entity
            .parent
            .as_ref()
            .is_some_and(|p| p.entity == placeholder);
        if !is_parent && !parent_placeholders.contains(placeholder) {
            return Err(ConfigError::InvalidTemplate {
                entity: entity.name.clone(),
                template: template.as_str().to_string(),
                reason: format!(
                    "ancestor '{placeholder}' cannot be resolved because the parent's path does not contain it"
                ),
            });
        }
    }
    Ok(())
}

/// A validated entity type, ready to migrate.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityDescriptor {
    /// Entity type name.
    pub name: String,
    /// Source field holding the record identifier.
    pub id_field: String,
    /// Parent link, if any.
    pub parent: Option<ParentLink>,
    /// Parsed destination path template.
    pub template: PathTemplate,
    /// Projection rules.
    pub projection: ProjectionRules,
    /// Required fields, including the parent field.
    pub required: Vec<String>,
    /// Ancestor entity types, parent first.
    pub ancestors: Vec<String>,
    /// Position of this entity's phase in the plan.
    pub phase_index: usize,
}

/// Validated entity types in dependency order.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationPlan {
    tracking_collection: String,
    phases: Vec<EntityDescriptor>,
    index: HashMap<String, usize>,
}

impl MigrationPlan {
    /// Returns the collection holding migration markers.
    #[must_use]
    pub fn tracking_collection(&self) -> &str {
        &self.tracking_collection
    }

    /// Returns the phases in execution order.
    #[must_use]
    pub fn phases(&self) -> &[EntityDescriptor] {
        &self.phases
    }

    /// Looks up an entity type.
    #[must_use]
    pub fn entity(&self, name: &str) -> Option<&EntityDescriptor> {
        self.index.get(name).map(|&i| &self.phases[i])
    }

    /// Returns the phase index of an entity type.
    #[must_use]
    pub fn phase_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Returns the ancestor chain of an entity type, parent first.
    #[must_use]
    pub fn ancestors(&self, name: &str) -> Option<&[String]> {
        self.entity(name).map(|e| e.ancestors.as_slice())
    }

    /// Returns the entity type names in execution order.
    pub fn order(&self) -> impl Iterator<Item = &str> {
        self.phases.iter().map(|p| p.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entity(name: &str, parent: Option<(&str, &str)>, path: &str) -> serde_json::Value {
        let mut value = json!({ "name": name, "path": path });
        if let Some((entity, field)) = parent {
            value["parent"] = json!({ "entity": entity, "field": field });
        }
        value
    }

    fn mapping(entities: Vec<serde_json::Value>) -> MappingDefinition {
        serde_json::from_value(json!({ "entities": entities })).unwrap()
    }

    fn hierarchy() -> MappingDefinition {
        mapping(vec![
            entity(
                "term",
                Some(("department", "department_id")),
                "departments/{department}/terms/{id}",
            ),
            entity("department", None, "departments/{id}"),
        ])
    }

    #[test]
    fn resolves_parents_first() {
        let plan = hierarchy().resolve().unwrap();
        assert_eq!(plan.order().collect::<Vec<_>>(), vec!["department", "term"]);
        assert_eq!(plan.tracking_collection(), DEFAULT_TRACKING_COLLECTION);

        let term = plan.entity("term").unwrap();
        assert_eq!(term.phase_index, 1);
        assert_eq!(term.id_field, "id");
        assert_eq!(term.required, vec!["department_id".to_string()]);
        assert_eq!(plan.ancestors("term").unwrap(), ["department".to_string()]);
    }

    #[test]
    fn parses_flattened_projection() {
        let def = MappingDefinition::from_json(
            r#"{
                "trackingCollection": "_markers",
                "entities": [{
                    "name": "department",
                    "path": "departments/{id}",
                    "drop": ["legacy"],
                    "rename": {"title": "name"},
                    "nullIfEmpty": ["code"],
                    "required": ["name"]
                }]
            }"#,
        )
        .unwrap();
        let rules = &def.entities[0].projection;
        assert_eq!(rules.drop, vec!["legacy".to_string()]);
        assert_eq!(rules.rename["title"], "name");
        assert_eq!(rules.null_if_empty, vec!["code".to_string()]);
        assert_eq!(def.tracking_collection, "_markers");
    }

    #[test]
    fn rejects_empty_and_duplicates() {
        assert_eq!(mapping(vec![]).resolve(), Err(ConfigError::Empty));
        let dup = mapping(vec![
            entity("department", None, "departments/{id}"),
            entity("department", None, "depts/{id}"),
        ]);
        assert!(matches!(
            dup.resolve(),
            Err(ConfigError::DuplicateEntity { .. })
        ));
    }

    #[test]
    fn rejects_unknown_parent() {
        let def = mapping(vec![entity(
            "term",
            Some(("department", "department_id")),
            "terms/{id}",
        )]);
        assert_eq!(
            def.resolve(),
            Err(ConfigError::UnknownParent {
                entity: "term".into(),
                parent: "department".into()
            })
        );
    }

    #[test]
    fn rejects_cycle() {
        let def = mapping(vec![
            entity("a", Some(("b", "b_id")), "a/{id}"),
            entity("b", Some(("a", "a_id")), "b/{id}"),
        ]);
        assert!(matches!(def.resolve(), Err(ConfigError::CycleDetected { .. })));
    }

    #[test]
    fn rejects_undeclared_placeholder() {
        let def = mapping(vec![
            entity("department", None, "departments/{id}"),
            entity(
                "term",
                Some(("department", "department_id")),
                "accounts/{account}/terms/{id}",
            ),
        ]);
        assert_eq!(
            def.resolve(),
            Err(ConfigError::UndeclaredPlaceholder {
                entity: "term".into(),
                placeholder: "account".into()
            })
        );
    }

    #[test]
    fn rejects_unresolvable_grandparent_placeholder() {
        let def = mapping(vec![
            entity("account", None, "accounts/{id}"),
            entity("department", Some(("account", "account_id")), "departments/{id}"),
            entity(
                "term",
                Some(("department", "department_id")),
                "accounts/{account}/terms/{id}",
            ),
        ]);
        assert!(matches!(
            def.resolve(),
            Err(ConfigError::InvalidTemplate { entity, .. }) if entity == "term"
        ));
    }

    #[test]
    fn rejects_shared_collection() {
        let def = mapping(vec![
            entity("department", None, "departments/{id}"),
            entity("faculty", None, "departments/{id}"),
        ]);
        assert_eq!(
            def.resolve(),
            Err(ConfigError::DuplicatePathPrefix {
                first: "department".into(),
                second: "faculty".into(),
                pattern: "departments".into()
            })
        );
    }

    #[test]
    fn rejects_overlapping_collection() {
        let mut def = hierarchy();
        let archived = entity(
            "archived_term",
            Some(("department", "department_id")),
            "departments/CS/terms/{id}",
        );
        def.entities.push(serde_json::from_value(archived).unwrap());

        match def.resolve() {
            Err(ConfigError::DuplicatePathPrefix { first, second, pattern }) => {
                let mut pair = [first, second];
                pair.sort();
                assert_eq!(pair, ["archived_term".to_string(), "term".to_string()]);
                assert!(pattern.ends_with("/terms"), "{pattern}");
            }
            other => panic!("expected DuplicatePathPrefix, got {other:?}"),
        }
    }

    #[test]
    fn rejects_tracking_collection_collision() {
        let def = mapping(vec![entity("department", None, "_migration_markers/{id}")]);
        assert!(matches!(
            def.resolve(),
            Err(ConfigError::DuplicatePathPrefix { .. })
        ));
    }

    #[test]
    fn rejects_malformed_template() {
        let def = mapping(vec![entity("department", None, "departments/{name}")]);
        assert!(matches!(
            def.resolve(),
            Err(ConfigError::InvalidTemplate { .. })
        ));
    }

    #[test]
    fn explicit_order_is_checked() {
        let mut def = hierarchy();
        def.order = Some(vec!["department".into(), "term".into()]);
        assert!(def.resolve().is_ok());

        def.order = Some(vec!["term".into(), "department".into()]);
        assert!(matches!(def.resolve(), Err(ConfigError::InvalidOrder { .. })));

        def.order = Some(vec!["department".into()]);
        assert!(matches!(def.resolve(), Err(ConfigError::InvalidOrder { .. })));

        def.order = Some(vec!["department".into(), "term".into(), "term".into()]);
        assert!(matches!(def.resolve(), Err(ConfigError::InvalidOrder { .. })));
    }

    #[test]
    fn rejects_invalid_tracking_collection() {
        let mut def = hierarchy();
        def.tracking_collection = "a/b".into();
        assert!(matches!(def.resolve(), Err(ConfigError::InvalidOption { .. })));
    }

    #[test]
    fn parse_error_is_config_error() {
        assert!(matches!(
            MappingDefinition::from_json("{ not json"),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let err = MappingDefinition::from_file("/nonexistent/strata/mapping.json")
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
