pub mod balance;
pub mod cart;
pub mod commission;
pub mod failure;
pub mod order;
pub mod reconcile;
pub mod referral;
#[cfg(test)]
pub mod test_utils;
pub mod tier;
pub mod user;
pub mod wechat;
pub mod withdrawal;

pub use balance::Balance;
pub use cart::Cart;
pub use commission::Commission;
pub use failure::Failures;
pub use order::Order;
pub use reconcile::Reconciler;
pub use referral::Referral;
pub use tier::Tier;
pub use user::User;
pub use withdrawal::Withdrawal;
