//! Built-in checklist templates, seeded on first run.

use vendhub_core::error::Result;
use vendhub_core::types::{Actor, TaskType, TemplateStep};
use vendhub_db::{NewAction, VendDb};

fn step(title: &str, requires_photo: bool, requires_weight: bool) -> TemplateStep {
    TemplateStep {
        title: title.to_string(),
        description: String::new(),
        required: true,
        requires_photo,
        requires_weight,
    }
}

fn optional(title: &str) -> TemplateStep {
    TemplateStep {
        required: false,
        ..step(title, false, false)
    }
}

/// The default template set: name, task type, steps.
pub fn default_templates() -> Vec<(&'static str, TaskType, Vec<TemplateStep>)> {
    vec![
        (
            "Ingredient refill",
            TaskType::Refill,
            vec![
                step("Photo of machine before service", true, false),
                step("Weigh bunkers before refill", false, true),
                step("Swap or top up bunkers", false, false),
                step("Weigh bunkers after refill", false, true),
                step("Photo of machine after service", true, false),
            ],
        ),
        (
            "Machine cleaning",
            TaskType::Cleaning,
            vec![
                step("Photo before cleaning", true, false),
                step("Rinse brewing unit and mixers", false, false),
                step("Wipe exterior and dispensing area", false, false),
                optional("Replace drip tray liner"),
                step("Photo after cleaning", true, false),
            ],
        ),
        (
            "Cash collection",
            TaskType::CashCollection,
            vec![
                step("Photo of cash box seal", true, false),
                step("Collect cash box", false, false),
                step("Install empty cash box", false, false),
                optional("Note counter reading"),
            ],
        ),
        (
            "Repair visit",
            TaskType::Repair,
            vec![
                step("Photo of fault", true, false),
                step("Diagnose and repair", false, false),
                step("Test vend", false, false),
                optional("List replaced parts"),
            ],
        ),
        (
            "Inspection",
            TaskType::Inspection,
            vec![
                step("Photo of machine", true, false),
                step("Check display and payment terminal", false, false),
                optional("Check ingredient levels"),
            ],
        ),
    ]
}

/// Insert any default template that does not exist yet. Returns how many were added.
pub fn seed_default_templates(db: &VendDb, actor: &Actor) -> Result<usize> {
    let mut added = 0;
    for (name, task_type, steps) in default_templates() {
        if db.get_template_by_name(name)?.is_some() {
            continue;
        }
        let action = NewAction::new(&actor.user_id, "template.created", "template", "")
            .with_details(serde_json::json!({ "name": name, "seeded": true }));
        db.create_template(name, task_type, &steps, &action)?;
        added += 1;
    }
    if added > 0 {
        tracing::info!("📋 Seeded {added} checklist templates");
    }
    Ok(added)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_every_task_type_but_other() {
        let types: Vec<TaskType> = default_templates().into_iter().map(|(_, t, _)| t).collect();
        for t in [
            TaskType::Refill,
            TaskType::Cleaning,
            TaskType::CashCollection,
            TaskType::Repair,
            TaskType::Inspection,
        ] {
            assert!(types.contains(&t), "missing template for {t}");
        }
    }

    #[test]
    fn test_seed_is_idempotent() {
        let db = VendDb::in_memory().unwrap();
        let n = seed_default_templates(&db, &Actor::system()).unwrap();
        assert_eq!(n, default_templates().len());
        assert_eq!(seed_default_templates(&db, &Actor::system()).unwrap(), 0);
        assert_eq!(db.list_templates().unwrap().len(), n);
    }
}
