use docflow_core::domain::document::DocType;

use crate::DbPool;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SeedSummary {
    pub employees: u64,
    pub policies: u64,
}

/// Seeds a small demo organization and one standing expense policy. Safe to
/// run repeatedly: rows are replaced, not duplicated.
pub async fn seed_demo(pool: &DbPool) -> Result<SeedSummary, sqlx::Error> {
    let employees: &[(i64, &str, &str, &str, i64, &str, &str, i64)] = &[
        (1, "kim.jiwoo", "Kim Jiwoo", "kim.jiwoo@example.com", 10, "ENG", "팀장", 0),
        (2, "lee.haneul", "Lee Haneul", "lee.haneul@example.com", 20, "FIN", "팀장", 0),
        (3, "park.dana", "Park Dana", "park.dana@example.com", 30, "HR", "사원", 0),
        (4, "choi.minseo", "Choi Minseo", "choi.minseo@example.com", 10, "ENG", "사원", 0),
        (5, "cho.eunji", "Cho Eunji", "cho.eunji@example.com", 30, "HR", "실장", 1),
        (6, "oh.jun", "Oh Jun", "oh.jun@example.com", 10, "ENG", "팀장", 0),
    ];

    for (id, username, display_name, email, department_id, department_code, position_code, admin) in
        employees
    {
        sqlx::query(
            "INSERT OR REPLACE INTO employee
                 (id, username, display_name, email, department_id, department_code,
                  position_code, admin)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(username)
        .bind(display_name)
        .bind(email)
        .bind(department_id)
        .bind(department_code)
        .bind(position_code)
        .bind(admin)
        .execute(pool)
        .await?;
    }

    sqlx::query(
        "INSERT OR REPLACE INTO approval_policy (id, doc_type, name, active)
         VALUES (1, ?, 'expense default', 1)",
    )
    .bind(DocType::Expense.as_str())
    .execute(pool)
    .await?;

    sqlx::query("DELETE FROM policy_step WHERE policy_id = 1").execute(pool).await?;
    sqlx::query(
        "INSERT INTO policy_step (policy_id, step_order, approver_id,
                                  department_id, department_code, position_code)
         VALUES (1, 0, NULL, NULL, 'ENG', '팀장'),
                (1, 1, NULL, NULL, 'FIN', '팀장')",
    )
    .execute(pool)
    .await?;

    Ok(SeedSummary { employees: employees.len() as u64, policies: 1 })
}

#[cfg(test)]
mod tests {
    use sqlx::Row;

    use docflow_core::domain::document::DocType;
    use docflow_core::policy::PolicyStore;

    use super::seed_demo;
    use crate::repositories::SqlPolicyStore;
    use crate::{connect_with_settings, migrations};

    #[tokio::test]
    async fn seeding_twice_does_not_duplicate_rows() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");

        let first = seed_demo(&pool).await.expect("first seed");
        let second = seed_demo(&pool).await.expect("second seed");
        assert_eq!(first, second);

        let employee_count = sqlx::query("SELECT COUNT(*) AS count FROM employee")
            .fetch_one(&pool)
            .await
            .expect("count employees")
            .get::<i64, _>("count");
        assert_eq!(employee_count as u64, first.employees);

        let policy = SqlPolicyStore::new(pool)
            .find_active(DocType::Expense)
            .await
            .expect("find policy")
            .expect("seeded policy");
        assert_eq!(policy.steps.len(), 2);
    }
}
