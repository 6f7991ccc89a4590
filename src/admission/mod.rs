//! Admission control ahead of rate limiting.

mod filter;

pub use filter::{AdmissionDecision, AdmissionFilter, AdmissionFlags, AuditRecord, RejectReason};
