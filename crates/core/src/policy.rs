use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::directory::PeopleDirectory;
use crate::domain::document::DocType;
use crate::domain::step::ApproverStep;
use crate::errors::WorkflowError;
use crate::store::StoreError;

/// Department named either directly by code or indirectly by id; an indirect
/// reference is translated through the directory at resolution time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepartmentRef {
    Code(String),
    Id(i64),
}

/// One abstract step of a standing policy: either a concrete approver or a
/// (department, position) pair to resolve against the directory.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PolicyStep {
    pub order: u32,
    pub approver_id: Option<String>,
    pub department: Option<DepartmentRef>,
    pub position_code: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApprovalPolicy {
    pub id: i64,
    pub doc_type: DocType,
    pub name: String,
    pub active: bool,
    pub steps: Vec<PolicyStep>,
}

#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// At most one policy is active per doc type.
    async fn find_active(&self, doc_type: DocType) -> Result<Option<ApprovalPolicy>, StoreError>;

    async fn save(&self, policy: ApprovalPolicy) -> Result<(), StoreError>;
}

#[derive(Default)]
pub struct InMemoryPolicyStore {
    policies: RwLock<HashMap<i64, ApprovalPolicy>>,
}

#[async_trait]
impl PolicyStore for InMemoryPolicyStore {
    async fn find_active(&self, doc_type: DocType) -> Result<Option<ApprovalPolicy>, StoreError> {
        let policies = self.policies.read().await;
        Ok(policies.values().find(|p| p.active && p.doc_type == doc_type).cloned())
    }

    async fn save(&self, policy: ApprovalPolicy) -> Result<(), StoreError> {
        self.policies.write().await.insert(policy.id, policy);
        Ok(())
    }
}

/// Caller-supplied manual chain entry, used only when no policy is active.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualStep {
    pub approver_id: String,
    pub approver_name: Option<String>,
}

impl ManualStep {
    pub fn new(approver_id: impl Into<String>) -> Self {
        Self { approver_id: approver_id.into(), approver_name: None }
    }
}

/// Resolves a doc type into a concrete ordered approval chain: the active
/// policy when one exists, the manual chain otherwise.
#[derive(Clone)]
pub struct PolicyResolver {
    policies: Arc<dyn PolicyStore>,
    directory: Arc<dyn PeopleDirectory>,
}

impl PolicyResolver {
    pub fn new(policies: Arc<dyn PolicyStore>, directory: Arc<dyn PeopleDirectory>) -> Self {
        Self { policies, directory }
    }

    pub async fn resolve(
        &self,
        doc_type: DocType,
        manual_chain: &[ManualStep],
    ) -> Result<Vec<ApproverStep>, WorkflowError> {
        if let Some(policy) = self.policies.find_active(doc_type).await? {
            return self.resolve_policy(&policy).await;
        }

        if manual_chain.is_empty() {
            return Err(WorkflowError::ValidationFailed("approval chain is required".to_owned()));
        }

        let mut steps = Vec::with_capacity(manual_chain.len());
        for (index, manual) in manual_chain.iter().enumerate() {
            let name = match &manual.approver_name {
                Some(name) => name.clone(),
                None => self.display_name(&manual.approver_id).await?,
            };
            steps.push(ApproverStep::pending(index as u32, manual.approver_id.clone(), name));
        }
        Ok(steps)
    }

    async fn resolve_policy(
        &self,
        policy: &ApprovalPolicy,
    ) -> Result<Vec<ApproverStep>, WorkflowError> {
        let mut ordered = policy.steps.clone();
        ordered.sort_by_key(|step| step.order);

        let mut steps = Vec::with_capacity(ordered.len());
        for (index, abstract_step) in ordered.iter().enumerate() {
            if let Some(approver_id) = &abstract_step.approver_id {
                let name = self.display_name(approver_id).await?;
                steps.push(ApproverStep::pending(index as u32, approver_id.clone(), name));
                continue;
            }

            let department_code = match &abstract_step.department {
                Some(DepartmentRef::Code(code)) => code.clone(),
                Some(DepartmentRef::Id(department_id)) => self
                    .directory
                    .department_code(*department_id)
                    .await?
                    .ok_or_else(|| {
                        WorkflowError::ValidationFailed(format!(
                            "policy `{}` step {} references unknown department {department_id}",
                            policy.name, abstract_step.order
                        ))
                    })?,
                None => {
                    return Err(WorkflowError::ValidationFailed(format!(
                        "policy `{}` step {} names neither an approver nor a department",
                        policy.name, abstract_step.order
                    )));
                }
            };

            let position_code = abstract_step.position_code.as_deref().ok_or_else(|| {
                WorkflowError::ValidationFailed(format!(
                    "policy `{}` step {} is missing a position code",
                    policy.name, abstract_step.order
                ))
            })?;

            let employee = self
                .directory
                .find_by_department_position(&department_code, position_code)
                .await?
                .ok_or_else(|| {
                    WorkflowError::ValidationFailed(format!(
                        "no approver found for department `{department_code}` position `{position_code}`"
                    ))
                })?;

            steps.push(ApproverStep::pending(
                index as u32,
                employee.username,
                employee.display_name,
            ));
        }
        Ok(steps)
    }

    async fn display_name(&self, approver_id: &str) -> Result<String, WorkflowError> {
        Ok(self
            .directory
            .find_by_username(approver_id)
            .await?
            .map(|e| e.display_name)
            .unwrap_or_else(|| approver_id.to_owned()))
    }
}
