use async_trait::async_trait;
use sqlx::Row;

use docflow_core::domain::document::DocType;
use docflow_core::policy::{ApprovalPolicy, DepartmentRef, PolicyStep, PolicyStore};
use docflow_core::store::StoreError;

use super::{db_err, decode_err};
use crate::DbPool;

/// Standing approval policies. The schema enforces at most one active policy
/// per doc type with a partial unique index.
pub struct SqlPolicyStore {
    pool: DbPool,
}

impl SqlPolicyStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_policy_step(row: &sqlx::sqlite::SqliteRow) -> Result<PolicyStep, StoreError> {
    let order: i64 = row.try_get("step_order").map_err(decode_err)?;
    let department_id: Option<i64> = row.try_get("department_id").map_err(decode_err)?;
    let department_code: Option<String> = row.try_get("department_code").map_err(decode_err)?;

    // A code wins over an id when a step carries both.
    let department = match (department_code, department_id) {
        (Some(code), _) => Some(DepartmentRef::Code(code)),
        (None, Some(id)) => Some(DepartmentRef::Id(id)),
        (None, None) => None,
    };

    Ok(PolicyStep {
        order: order.max(0) as u32,
        approver_id: row.try_get("approver_id").map_err(decode_err)?,
        department,
        position_code: row.try_get("position_code").map_err(decode_err)?,
    })
}

#[async_trait]
impl PolicyStore for SqlPolicyStore {
    async fn find_active(&self, doc_type: DocType) -> Result<Option<ApprovalPolicy>, StoreError> {
        let row = sqlx::query(
            "SELECT id, doc_type, name, active FROM approval_policy
             WHERE doc_type = ? AND active = 1",
        )
        .bind(doc_type.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let id: i64 = row.try_get("id").map_err(decode_err)?;

        let step_rows = sqlx::query(
            "SELECT step_order, approver_id, department_id, department_code, position_code
             FROM policy_step WHERE policy_id = ? ORDER BY step_order ASC",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(Some(ApprovalPolicy {
            id,
            doc_type,
            name: row.try_get("name").map_err(decode_err)?,
            active: row.try_get::<i64, _>("active").map_err(decode_err)? != 0,
            steps: step_rows.iter().map(row_to_policy_step).collect::<Result<Vec<_>, _>>()?,
        }))
    }

    async fn save(&self, policy: ApprovalPolicy) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query(
            "INSERT INTO approval_policy (id, doc_type, name, active)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 doc_type = excluded.doc_type,
                 name = excluded.name,
                 active = excluded.active",
        )
        .bind(policy.id)
        .bind(policy.doc_type.as_str())
        .bind(&policy.name)
        .bind(policy.active as i64)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        sqlx::query("DELETE FROM policy_step WHERE policy_id = ?")
            .bind(policy.id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        for step in &policy.steps {
            let (department_id, department_code) = match &step.department {
                Some(DepartmentRef::Id(id)) => (Some(*id), None),
                Some(DepartmentRef::Code(code)) => (None, Some(code.clone())),
                None => (None, None),
            };
            sqlx::query(
                "INSERT INTO policy_step (policy_id, step_order, approver_id,
                                          department_id, department_code, position_code)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(policy.id)
            .bind(step.order)
            .bind(&step.approver_id)
            .bind(department_id)
            .bind(department_code)
            .bind(&step.position_code)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)
    }
}
