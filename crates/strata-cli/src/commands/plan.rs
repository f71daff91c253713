//! Plan command - validate the mapping and print the phase order.

use anyhow::Result;
use clap::Args;
use serde::Serialize;

use strata_migrate::mapping::MigrationPlan;

use crate::output::print_json;
use crate::{Config, OutputFormat};

/// Arguments for the plan command.
#[derive(Debug, Args)]
pub struct PlanArgs {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PhaseView<'a> {
    index: usize,
    entity_type: &'a str,
    path: &'a str,
    parent: Option<&'a str>,
    parent_field: Option<&'a str>,
    required: &'a [String],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PlanView<'a> {
    tracking_collection: &'a str,
    phases: Vec<PhaseView<'a>>,
}

fn view(plan: &MigrationPlan) -> PlanView<'_> {
    PlanView {
        tracking_collection: plan.tracking_collection(),
        phases: plan
            .phases()
            .iter()
            .map(|e| PhaseView {
                index: e.phase_index,
                entity_type: &e.name,
                path: e.template.as_str(),
                parent: e.parent.as_ref().map(|p| p.entity.as_str()),
                parent_field: e.parent.as_ref().map(|p| p.field.as_str()),
                required: &e.required,
            })
            .collect(),
    }
}

/// Execute the plan command.
///
/// # Errors
///
/// Returns an error if the mapping is missing or invalid.
pub async fn execute(_args: PlanArgs, config: &Config) -> Result<()> {
    let plan = config.plan().await?;
    let view = view(&plan);

    match config.format {
        OutputFormat::Json => print_json(&view)?,
        OutputFormat::Text | OutputFormat::Table => {
            println!("Tracking collection: {}", view.tracking_collection);
            println!();
            for phase in &view.phases {
                let parent = phase
                    .parent
                    .zip(phase.parent_field)
                    .map(|(entity, field)| format!(" (parent {entity} via {field})"))
                    .unwrap_or_default();
                println!("  {}. {:<16} {}{parent}", phase.index + 1, phase.entity_type, phase.path);
                if !phase.required.is_empty() {
                    println!("       required: {}", phase.required.join(", "));
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_migrate::mapping::MappingDefinition;

    #[test]
    fn test_view_lists_phases_in_order() {
        let plan = MappingDefinition::from_json(
            r#"{"entities": [
                {"name": "semester", "parent": {"entity": "department", "field": "department_id"},
                 "path": "departments/{department}/semesters/{id}"},
                {"name": "department", "path": "departments/{id}"}
            ]}"#,
        )
        .unwrap()
        .resolve()
        .unwrap();

        let view = view(&plan);
        let names: Vec<_> = view.phases.iter().map(|p| p.entity_type).collect();
        assert_eq!(names, vec!["department", "semester"]);
        assert_eq!(view.phases[1].parent, Some("department"));
        assert_eq!(view.phases[1].required, ["department_id".to_string()]);
    }
}
