pub mod api_employees;
pub mod api_leads;
pub mod api_notifications;
pub mod api_quotations;
pub mod api_sequences;
pub mod api_tasks;
