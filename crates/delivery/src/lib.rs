//! Delivery-side collaborators for the workflow engine — outbound email
//! provider boundary, do-not-contact suppression, and business-hours
//! window arithmetic for delay adjustment.

pub mod business_hours;
pub mod provider;
pub mod suppression;

pub use business_hours::BusinessHours;
pub use provider::{
    CaptureProvider, DeliveryProvider, DeliveryReceipt, FailingProvider, LoggingProvider,
    OutboundEmail,
};
pub use suppression::{SuppressionChecker, SuppressionList, SuppressionScope};
