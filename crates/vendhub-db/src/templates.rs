//! Checklist templates. Steps are stored as a JSON array.

use rusqlite::{OptionalExtension, params};
use vendhub_core::error::{Result, VendHubError};
use vendhub_core::types::{ChecklistTemplate, TaskType, TemplateStep};

use crate::action_log::{NewAction, insert_action};
use crate::{VendDb, db_err, now_ts, parse_enum};

fn row_to_template(row: &rusqlite::Row) -> rusqlite::Result<ChecklistTemplate> {
    let task_type: String = row.get(2)?;
    let steps_json: String = row.get(3)?;
    let steps = serde_json::from_str(&steps_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(ChecklistTemplate {
        id: row.get(0)?,
        name: row.get(1)?,
        task_type: parse_enum(&task_type)?,
        steps,
        created_at: row.get(4)?,
    })
}

impl VendDb {
    pub fn create_template(
        &self,
        name: &str,
        task_type: TaskType,
        steps: &[TemplateStep],
        action: &NewAction,
    ) -> Result<ChecklistTemplate> {
        let id = uuid::Uuid::new_v4().to_string();
        let steps_json = serde_json::to_string(steps)?;
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db_err("Begin"))?;
        tx.execute(
            "INSERT INTO checklist_templates (id, name, task_type, steps_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, name, task_type.as_str(), steps_json, now_ts()],
        )
        .map_err(|e| match db_err("Create template")(e) {
            VendHubError::Conflict(_) => VendHubError::Conflict(format!("Template name already used: {name}")),
            other => other,
        })?;
        insert_action(&tx, &NewAction { entity_id: id.clone(), ..action.clone() })?;
        tx.commit().map_err(db_err("Commit"))?;
        drop(conn);
        self.get_template(&id)
    }

    pub fn get_template(&self, id: &str) -> Result<ChecklistTemplate> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, name, task_type, steps_json, created_at FROM checklist_templates WHERE id=?1",
            params![id],
            row_to_template,
        )
        .optional()
        .map_err(db_err("Get template"))?
        .ok_or_else(|| VendHubError::not_found("Template", id))
    }

    pub fn get_template_by_name(&self, name: &str) -> Result<Option<ChecklistTemplate>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, name, task_type, steps_json, created_at FROM checklist_templates WHERE name=?1",
            params![name],
            row_to_template,
        )
        .optional()
        .map_err(db_err("Get template"))
    }

    pub fn list_templates(&self) -> Result<Vec<ChecklistTemplate>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT id, name, task_type, steps_json, created_at FROM checklist_templates ORDER BY name ASC")
            .map_err(db_err("Prepare"))?;
        let templates = stmt
            .query_map([], row_to_template)
            .map_err(db_err("Query"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err("Read template"))?;
        Ok(templates)
    }

    /// Delete a template. Tasks already created from it keep their copied steps.
    pub fn delete_template(&self, id: &str, action: &NewAction) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db_err("Begin"))?;
        let changed = tx
            .execute("DELETE FROM checklist_templates WHERE id=?1", params![id])
            .map_err(db_err("Delete template"))?;
        if changed == 0 {
            return Err(VendHubError::not_found("Template", id));
        }
        insert_action(&tx, action)?;
        tx.commit().map_err(db_err("Commit"))?;
        Ok(())
    }
}
