pub mod cart_item;
pub mod commission;
pub mod order;
pub mod referral;
pub mod referral_usage;
pub mod settlement_failure;
pub mod territory;
pub mod user;
pub mod withdrawal;

pub use commission::{CommissionKind, CommissionStatus};
pub use order::OrderStatus;
pub use settlement_failure::FailureKind;
pub use territory::TerritoryKind;
pub use withdrawal::{WithdrawalMethod, WithdrawalStatus};
