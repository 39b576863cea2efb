use async_trait::async_trait;
use sqlx::Row;

use docflow_core::directory::{Employee, PeopleDirectory};
use docflow_core::store::StoreError;

use super::{db_err, decode_err};
use crate::DbPool;

pub struct SqlPeopleDirectory {
    pool: DbPool,
}

impl SqlPeopleDirectory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const EMPLOYEE_COLUMNS: &str =
    "id, username, display_name, email, department_id, department_code, position_code, admin";

fn row_to_employee(row: &sqlx::sqlite::SqliteRow) -> Result<Employee, StoreError> {
    Ok(Employee {
        id: row.try_get("id").map_err(decode_err)?,
        username: row.try_get("username").map_err(decode_err)?,
        display_name: row.try_get("display_name").map_err(decode_err)?,
        email: row.try_get("email").map_err(decode_err)?,
        department_id: row.try_get("department_id").map_err(decode_err)?,
        department_code: row.try_get("department_code").map_err(decode_err)?,
        position_code: row.try_get("position_code").map_err(decode_err)?,
        admin: row.try_get::<i64, _>("admin").map_err(decode_err)? != 0,
    })
}

#[async_trait]
impl PeopleDirectory for SqlPeopleDirectory {
    async fn find_by_department_position(
        &self,
        department_code: &str,
        position_code: &str,
    ) -> Result<Option<Employee>, StoreError> {
        // Deterministic pick when several people share the position.
        let row = sqlx::query(&format!(
            "SELECT {EMPLOYEE_COLUMNS} FROM employee
             WHERE department_code = ? AND position_code = ?
             ORDER BY id ASC LIMIT 1"
        ))
        .bind(department_code)
        .bind(position_code)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.as_ref().map(row_to_employee).transpose()
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<Employee>, StoreError> {
        let row =
            sqlx::query(&format!("SELECT {EMPLOYEE_COLUMNS} FROM employee WHERE username = ?"))
                .bind(username)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;

        row.as_ref().map(row_to_employee).transpose()
    }

    async fn find_by_employee_id(&self, employee_id: i64) -> Result<Option<Employee>, StoreError> {
        let row = sqlx::query(&format!("SELECT {EMPLOYEE_COLUMNS} FROM employee WHERE id = ?"))
            .bind(employee_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.as_ref().map(row_to_employee).transpose()
    }

    async fn department_code(&self, department_id: i64) -> Result<Option<String>, StoreError> {
        let row = sqlx::query(
            "SELECT department_code FROM employee WHERE department_id = ? LIMIT 1",
        )
        .bind(department_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(|r| r.try_get::<String, _>("department_code").map_err(decode_err)).transpose()
    }
}
