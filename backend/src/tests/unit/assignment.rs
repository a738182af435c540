use tokio_test::assert_ok;
use uuid::Uuid;

use crate::workflows::assignment::{
    AssignmentContext, AssignmentError, Confidence, FallbackEmployees, StaticDirectory,
    TaskAssignmentValidator,
};
use ooak_shared::TaskType;

fn context(task_type: TaskType, lead_id: Option<Uuid>, quotation_id: Option<Uuid>) -> AssignmentContext {
    AssignmentContext {
        task_type,
        lead_id,
        quotation_id,
        client_name: "Priya & Arjun".to_string(),
    }
}

#[tokio::test]
async fn revision_goes_to_lead_owner_through_quotation() {
    let (mut directory, owner) = StaticDirectory::default().with_employee("Deepika");
    let lead_id = Uuid::new_v4();
    let quotation_id = Uuid::new_v4();
    directory.lead_owners.insert(lead_id, owner);
    directory.quotation_leads.insert(quotation_id, lead_id);

    let validator = TaskAssignmentValidator::new(directory, FallbackEmployees::default());
    let result = assert_ok!(validator.assign(&context(TaskType::QuotationRevision, Some(lead_id), Some(quotation_id))).await);

    assert_eq!(result.employee_id, owner);
    assert_eq!(result.confidence, Confidence::High);
    assert!(result.warnings.is_empty());
    assert!(result.reasoning.contains(&lead_id.to_string()));
}

#[tokio::test]
async fn revision_without_lead_id_warns_but_keeps_owner() {
    let (mut directory, owner) = StaticDirectory::default().with_employee("Deepika");
    let lead_id = Uuid::new_v4();
    let quotation_id = Uuid::new_v4();
    directory.lead_owners.insert(lead_id, owner);
    directory.quotation_leads.insert(quotation_id, lead_id);

    let validator = TaskAssignmentValidator::new(directory, FallbackEmployees::default());
    let result = assert_ok!(validator.assign(&context(TaskType::QuotationRevision, None, Some(quotation_id))).await);

    assert_eq!(result.employee_id, owner);
    assert_eq!(result.warnings, vec!["No lead ID provided for ownership validation".to_string()]);
}

#[tokio::test]
async fn ownership_mismatch_falls_back() {
    let (directory, quotation_owner) = StaticDirectory::default().with_employee("Deepika");
    let (directory, context_owner) = directory.with_employee("Sridhar");
    let (mut directory, fallback) = directory.with_employee("Durga");

    let quotation_lead = Uuid::new_v4();
    let context_lead = Uuid::new_v4();
    let quotation_id = Uuid::new_v4();
    directory.lead_owners.insert(quotation_lead, quotation_owner);
    directory.lead_owners.insert(context_lead, context_owner);
    directory.quotation_leads.insert(quotation_id, quotation_lead);

    let validator = TaskAssignmentValidator::new(
        directory,
        FallbackEmployees {
            sales: Some(fallback),
            approval: None,
        },
    );
    let result = assert_ok!(validator.assign(&context(TaskType::QuotationRevision, Some(context_lead), Some(quotation_id))).await);

    assert_eq!(result.employee_id, fallback);
    assert_eq!(result.confidence, Confidence::Low);
    assert!(result.reasoning.starts_with("Fallback assignment: Validation failed"));
    assert_eq!(result.warnings.len(), 1);
    assert!(result.warnings[0].starts_with("Original assignment failed validation: Assignment mismatch"));
}

#[tokio::test]
async fn approval_goes_to_sales_head() {
    let (mut directory, head) = StaticDirectory::default().with_employee("Vikas");
    directory.sales_head = Some(head);

    let validator = TaskAssignmentValidator::new(directory, FallbackEmployees::default());
    let result = assert_ok!(validator.assign(&context(TaskType::QuotationApproval, None, Some(Uuid::new_v4()))).await);

    assert_eq!(result.employee_id, head);
    assert_eq!(result.employee_name, "Vikas");
    assert_eq!(result.reasoning, "Assigned to Sales Head for approval");
}

#[tokio::test]
async fn approval_without_sales_head_uses_approval_fallback() {
    let (directory, sales) = StaticDirectory::default().with_employee("Durga");
    let (directory, approver) = directory.with_employee("Pradeep");

    let validator = TaskAssignmentValidator::new(
        directory,
        FallbackEmployees {
            sales: Some(sales),
            approval: Some(approver),
        },
    );
    let result = assert_ok!(validator.assign(&context(TaskType::QuotationApproval, None, None)).await);

    assert_eq!(result.employee_id, approver);
    assert_eq!(result.reasoning, "Fallback assignment: Assignment error: Sales Head not found");
}

#[tokio::test]
async fn lead_follow_up_requires_lead_id() {
    let (directory, fallback) = StaticDirectory::default().with_employee("Durga");
    let validator = TaskAssignmentValidator::new(
        directory,
        FallbackEmployees {
            sales: Some(fallback),
            approval: None,
        },
    );

    let result = assert_ok!(validator.assign(&context(TaskType::LeadFollowUp, None, None)).await);

    assert_eq!(result.employee_id, fallback);
    assert!(result.reasoning.contains("Lead ID required"));
}

#[tokio::test]
async fn task_types_without_rules_use_fallback() {
    let (directory, fallback) = StaticDirectory::default().with_employee("Durga");
    let validator = TaskAssignmentValidator::new(
        directory,
        FallbackEmployees {
            sales: Some(fallback),
            approval: None,
        },
    );

    let result = assert_ok!(validator.assign(&context(TaskType::General, None, None)).await);

    assert_eq!(result.employee_id, fallback);
    assert_eq!(result.reasoning, "Fallback assignment: No specific rule found");
    assert_eq!(
        result.warnings,
        vec!["Used fallback assignment due to: No specific rule found".to_string()]
    );
}

#[tokio::test]
async fn missing_fallback_is_an_error() {
    let validator = TaskAssignmentValidator::new(StaticDirectory::default(), FallbackEmployees::default());

    let err = validator
        .assign(&context(TaskType::LeadFollowUp, Some(Uuid::new_v4()), None))
        .await
        .unwrap_err();
    assert!(matches!(err, AssignmentError::FallbackNotConfigured("sales")));

    let unknown = Uuid::new_v4();
    let validator = TaskAssignmentValidator::new(
        StaticDirectory::default(),
        FallbackEmployees {
            sales: None,
            approval: Some(unknown),
        },
    );
    let err = validator
        .assign(&context(TaskType::QuotationApproval, None, None))
        .await
        .unwrap_err();
    assert!(matches!(err, AssignmentError::FallbackNotFound(id) if id == unknown));
}
