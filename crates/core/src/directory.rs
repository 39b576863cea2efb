use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::errors::WorkflowError;
use crate::store::StoreError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Employee {
    pub id: i64,
    pub username: String,
    pub display_name: String,
    pub email: String,
    pub department_id: i64,
    pub department_code: String,
    pub position_code: String,
    pub admin: bool,
}

/// People/organization directory port.
#[async_trait]
pub trait PeopleDirectory: Send + Sync {
    async fn find_by_department_position(
        &self,
        department_code: &str,
        position_code: &str,
    ) -> Result<Option<Employee>, StoreError>;

    async fn find_by_username(&self, username: &str) -> Result<Option<Employee>, StoreError>;

    async fn find_by_employee_id(&self, employee_id: i64) -> Result<Option<Employee>, StoreError>;

    async fn department_code(&self, department_id: i64) -> Result<Option<String>, StoreError>;
}

/// Caller-supplied actor identity. Operations accept whichever identifiers
/// the boundary happens to have.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorRef {
    pub username: Option<String>,
    pub employee_id: Option<i64>,
}

impl ActorRef {
    pub fn username(username: impl Into<String>) -> Self {
        Self { username: Some(username.into()), employee_id: None }
    }

    pub fn employee_id(employee_id: i64) -> Self {
        Self { username: None, employee_id: Some(employee_id) }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ResolveStep {
    Username,
    EmployeeId,
}

/// Stable username wins over the numeric id when both are present.
const RESOLVE_CHAIN: [ResolveStep; 2] = [ResolveStep::Username, ResolveStep::EmployeeId];

/// Ordered actor-resolution chain over the people directory.
#[derive(Clone)]
pub struct ActorResolver {
    directory: std::sync::Arc<dyn PeopleDirectory>,
}

impl ActorResolver {
    pub fn new(directory: std::sync::Arc<dyn PeopleDirectory>) -> Self {
        Self { directory }
    }

    pub async fn resolve(&self, actor: &ActorRef) -> Result<Employee, WorkflowError> {
        for step in RESOLVE_CHAIN {
            let found = match step {
                ResolveStep::Username => match &actor.username {
                    Some(username) => self.directory.find_by_username(username).await?,
                    None => None,
                },
                ResolveStep::EmployeeId => match actor.employee_id {
                    Some(employee_id) => self.directory.find_by_employee_id(employee_id).await?,
                    None => None,
                },
            };
            if let Some(employee) = found {
                return Ok(employee);
            }
        }

        Err(WorkflowError::ValidationFailed(format!(
            "actor could not be resolved (username: {:?}, employee id: {:?})",
            actor.username, actor.employee_id
        )))
    }
}

/// Directory backed by a fixed employee set, for tests and seeding.
#[derive(Default)]
pub struct InMemoryDirectory {
    employees: RwLock<HashMap<String, Employee>>,
    department_codes: RwLock<HashMap<i64, String>>,
}

impl InMemoryDirectory {
    pub async fn add_employee(&self, employee: Employee) {
        let mut codes = self.department_codes.write().await;
        codes.insert(employee.department_id, employee.department_code.clone());
        drop(codes);
        self.employees.write().await.insert(employee.username.clone(), employee);
    }

    pub async fn add_department(&self, department_id: i64, code: impl Into<String>) {
        self.department_codes.write().await.insert(department_id, code.into());
    }
}

#[async_trait]
impl PeopleDirectory for InMemoryDirectory {
    async fn find_by_department_position(
        &self,
        department_code: &str,
        position_code: &str,
    ) -> Result<Option<Employee>, StoreError> {
        let employees = self.employees.read().await;
        let mut matches: Vec<&Employee> = employees
            .values()
            .filter(|e| e.department_code == department_code && e.position_code == position_code)
            .collect();
        matches.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(matches.first().map(|e| (*e).clone()))
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<Employee>, StoreError> {
        Ok(self.employees.read().await.get(username).cloned())
    }

    async fn find_by_employee_id(&self, employee_id: i64) -> Result<Option<Employee>, StoreError> {
        Ok(self.employees.read().await.values().find(|e| e.id == employee_id).cloned())
    }

    async fn department_code(&self, department_id: i64) -> Result<Option<String>, StoreError> {
        Ok(self.department_codes.read().await.get(&department_id).cloned())
    }
}
