use serde::{Deserialize, Serialize};
use utoipa::IntoParams;
use validator::Validate;

use crate::entities::bill::SalePaymentStatus;
use crate::entities::stock_batch::Branch;
use crate::entities::transport::TransportStatus;
use crate::errors::ServiceError;
use crate::services::transports::TransportDecision;

/// Pagination parameters for list operations
#[derive(Debug, Deserialize, Serialize, IntoParams)]
pub struct PaginationParams {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_per_page")]
    pub per_page: u64,
}

fn default_page() -> u64 {
    1
}

fn default_per_page() -> u64 {
    20
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self {
            page: default_page(),
            per_page: default_per_page(),
        }
    }
}

/// Validate request input
pub fn validate_input<T: Validate>(input: &T) -> Result<(), ServiceError> {
    input
        .validate()
        .map_err(|e| ServiceError::ValidationError(format!("Validation failed: {}", e)))
}

pub fn parse_branch(value: &str) -> Result<Branch, ServiceError> {
    value.parse().map_err(|_| {
        ServiceError::ValidationError(format!("unknown branch: {}", value))
    })
}

pub fn parse_sale_payment_status(value: &str) -> Result<SalePaymentStatus, ServiceError> {
    SalePaymentStatus::from_str(&value.to_ascii_lowercase()).ok_or_else(|| {
        ServiceError::ValidationError(format!(
            "invalid payment status: {} (expected unpaid, paid or cash)",
            value
        ))
    })
}

pub fn parse_transport_status(value: &str) -> Result<TransportStatus, ServiceError> {
    TransportStatus::from_str(&value.to_ascii_lowercase()).ok_or_else(|| {
        ServiceError::ValidationError(format!(
            "invalid transport status: {} (expected pending, received or rejected)",
            value
        ))
    })
}

pub fn parse_transport_decision(value: &str) -> Result<TransportDecision, ServiceError> {
    match value.to_ascii_lowercase().as_str() {
        "received" => Ok(TransportDecision::Received),
        "rejected" => Ok(TransportDecision::Rejected),
        other => Err(ServiceError::ValidationError(format!(
            "invalid decision: {} (expected received or rejected)",
            other
        ))),
    }
}

pub fn parse_bill_kind(value: &str) -> Result<crate::entities::bill::BillKind, ServiceError> {
    crate::entities::bill::BillKind::from_str(&value.to_ascii_lowercase()).ok_or_else(|| {
        ServiceError::ValidationError(format!(
            "invalid bill kind: {} (expected purchase or sale)",
            value
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_parsing_is_case_insensitive() {
        assert_eq!(parse_branch("Slemany").unwrap(), Branch::Slemany);
        assert_eq!(parse_branch("erbil").unwrap(), Branch::Erbil);
        assert!(parse_branch("Baghdad").is_err());
    }

    #[test]
    fn decision_parsing_rejects_unknown_values() {
        assert_eq!(
            parse_transport_decision("received").unwrap(),
            TransportDecision::Received
        );
        assert_eq!(
            parse_transport_decision("REJECTED").unwrap(),
            TransportDecision::Rejected
        );
        assert!(parse_transport_decision("lost").is_err());
    }
}
