use serde::{Deserialize, Serialize};

use crate::{
  entity::{WithdrawalMethod, WithdrawalStatus, user, withdrawal},
  prelude::*,
  sv::{
    Balance,
    wechat::{Gateway, Payout, TransferBill},
  },
  utils::{self, apply_rate},
};

/// Smallest withdrawal, in cents.
pub const MIN_WITHDRAWAL: i64 = 1_000;
/// Processing fee in basis points.
pub const FEE_BPS: i64 = 100;
const ARRIVAL_HOURS: i64 = 48;

#[derive(Debug, Clone, Deserialize)]
pub struct WithdrawalRequest {
  /// Yuan, floored to the cent.
  pub amount: f64,
  pub method: String,
  #[serde(default)]
  pub account_info: Option<json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WithdrawalReceipt {
  pub withdrawal_id: String,
  pub amount: i64,
  pub fee: i64,
  pub net_amount: i64,
  pub status: WithdrawalStatus,
  pub estimated_arrival: DateTime,
  pub failure_reason: Option<String>,
}

impl From<withdrawal::Model> for WithdrawalReceipt {
  fn from(model: withdrawal::Model) -> Self {
    Self {
      withdrawal_id: model.out_bill_no,
      amount: model.amount,
      fee: model.fee,
      net_amount: model.net_amount,
      status: model.status,
      estimated_arrival: model.estimated_arrival,
      failure_reason: model.failure_reason,
    }
  }
}

/// Result of applying a gateway transfer state to a withdrawal.
#[derive(Debug, Clone)]
pub enum TransferUpdate {
  Applied(withdrawal::Model),
  /// Already in that state or past it.
  Unchanged(withdrawal::Model),
  /// No withdrawal with that reference, or a state we do not track.
  Unknown,
}

/// Maps a gateway transfer state onto the withdrawal lifecycle.
pub fn transfer_status(state: &str) -> Option<WithdrawalStatus> {
  match state {
    "ACCEPTED" | "PROCESSING" | "WAIT_USER_CONFIRM" | "TRANSFERING" => {
      Some(WithdrawalStatus::Processing)
    }
    "SUCCESS" => Some(WithdrawalStatus::Completed),
    "FAIL" => Some(WithdrawalStatus::Failed),
    "CANCELLED" | "CANCELING" => Some(WithdrawalStatus::Cancelled),
    _ => None,
  }
}

/// `WD` + timestamp + 16 hex chars, 32 characters in total.
fn merchant_reference() -> String {
  format!(
    "WD{}{}",
    Utc::now().format("%Y%m%d%H%M%S"),
    utils::random_hex(16)
  )
}

#[derive(Default)]
struct Patch {
  transfer_bill_no: Option<String>,
  transfer_state: Option<String>,
  failure_reason: Option<String>,
}

pub struct Withdrawal<'a> {
  db: &'a DatabaseConnection,
  gateway: &'a dyn Gateway,
  timeout: Duration,
}

impl<'a> Withdrawal<'a> {
  pub fn new(db: &'a DatabaseConnection, gateway: &'a dyn Gateway) -> Self {
    Self { db, gateway, timeout: utils::DEFAULT_TIMEOUT }
  }

  /// Bounds the reservation and the gateway submission separately.
  pub fn with_timeout(self, timeout: Duration) -> Self {
    Self { timeout, ..self }
  }

  pub async fn by_reference(&self, out_bill_no: &str) -> Result<withdrawal::Model> {
    withdrawal::Entity::find()
      .filter(withdrawal::Column::OutBillNo.eq(out_bill_no))
      .one(self.db)
      .await?
      .ok_or(Error::WithdrawalNotFound)
  }

  pub async fn history(&self, user_id: &str) -> Result<Vec<withdrawal::Model>> {
    let withdrawals = withdrawal::Entity::find()
      .filter(withdrawal::Column::UserId.eq(user_id))
      .order_by_desc(withdrawal::Column::CreatedAt)
      .all(self.db)
      .await?;
    Ok(withdrawals)
  }

  /// Records a withdrawal and submits the payout. A rejected or timed out
  /// submission leaves the withdrawal `failed` and is not retried.
  pub async fn request(
    &self,
    user_id: &str,
    request: WithdrawalRequest,
  ) -> Result<withdrawal::Model> {
    let method: WithdrawalMethod = request.method.parse()?;

    if !request.amount.is_finite() || request.amount <= 0.0 {
      return Err(Error::InvalidArgs("amount must be positive".into()));
    }
    let amount = utils::to_cents(request.amount);
    if amount < MIN_WITHDRAWAL {
      return Err(Error::BelowMinimum(MIN_WITHDRAWAL));
    }

    let record = utils::within(
      self.timeout,
      self.reserve(user_id, amount, method, request.account_info),
    )
    .await?;
    info!(
      "withdrawal {} of {} requested by {user_id}",
      record.out_bill_no,
      utils::format_yuan(amount)
    );

    self.submit(record).await
  }

  /// Validates and inserts the pending record in one transaction.
  async fn reserve(
    &self,
    user_id: &str,
    amount: i64,
    method: WithdrawalMethod,
    account_info: Option<json::Value>,
  ) -> Result<withdrawal::Model> {
    let txn = self.db.begin().await?;

    let agent = user::Entity::find_by_id(user_id)
      .one(&txn)
      .await?
      .ok_or(Error::UserNotFound)?;
    if !agent.can_withdraw() {
      return Err(Error::WithdrawalNotAllowed);
    }

    let in_flight = withdrawal::Entity::find()
      .filter(withdrawal::Column::UserId.eq(user_id))
      .filter(withdrawal::Column::Status.is_in(WithdrawalStatus::IN_FLIGHT))
      .count(&txn)
      .await?;
    if in_flight > 0 {
      return Err(Error::WithdrawalInFlight);
    }

    let available = Balance::new(&txn).available(user_id).await?;
    if amount > available {
      return Err(Error::InsufficientBalance);
    }

    let fee = apply_rate(amount, FEE_BPS);
    let now = now();

    let inserted = withdrawal::ActiveModel {
      out_bill_no: Set(merchant_reference()),
      user_id: Set(user_id.to_string()),
      active_user: Set(Some(user_id.to_string())),
      amount: Set(amount),
      fee: Set(fee),
      net_amount: Set(amount - fee),
      method: Set(method),
      account_info: Set(account_info),
      status: Set(WithdrawalStatus::Pending),
      transfer_bill_no: Set(None),
      transfer_state: Set(None),
      failure_reason: Set(None),
      estimated_arrival: Set(now + TimeDelta::hours(ARRIVAL_HOURS)),
      completed_at: Set(None),
      created_at: Set(now),
      updated_at: Set(now),
      ..Default::default()
    }
    .insert(&txn)
    .await;

    let record = match inserted {
      Ok(record) => record,
      Err(err) if Error::is_conflict(&err) => {
        return Err(Error::WithdrawalInFlight);
      }
      Err(err) => return Err(err.into()),
    };

    txn.commit().await?;
    Ok(record)
  }

  async fn submit(&self, record: withdrawal::Model) -> Result<withdrawal::Model> {
    let payout = Payout {
      out_bill_no: record.out_bill_no.clone(),
      open_id: record.user_id.clone(),
      amount: record.net_amount,
      remark: "Agent commission payout".into(),
    };

    let submitted =
      utils::within(self.timeout, self.gateway.transfer(&payout)).await;

    // terminal states only arrive through the transfer callback
    let (to, patch) = match submitted {
      Ok(receipt) => (WithdrawalStatus::Processing, Patch {
        transfer_bill_no: Some(receipt.transfer_bill_no),
        transfer_state: Some(receipt.state),
        failure_reason: None,
      }),
      Err(err) => {
        warn!("payout {} rejected: {err}", record.out_bill_no);
        (WithdrawalStatus::Failed, Patch {
          failure_reason: Some(err.to_string()),
          ..Default::default()
        })
      }
    };

    // a fast callback may already have moved it on
    self.transition(&record.out_bill_no, to, patch).await?;
    self.by_reference(&record.out_bill_no).await
  }

  /// Applies a transfer state reported by the gateway.
  pub async fn apply_transfer(&self, bill: &TransferBill) -> Result<TransferUpdate> {
    let Some(to) = transfer_status(&bill.state) else {
      warn!("transfer {} in untracked state {}", bill.out_bill_no, bill.state);
      return Ok(TransferUpdate::Unknown);
    };

    let record = match self.by_reference(&bill.out_bill_no).await {
      Ok(record) => record,
      Err(Error::WithdrawalNotFound) => {
        warn!("transfer update for unknown withdrawal {}", bill.out_bill_no);
        return Ok(TransferUpdate::Unknown);
      }
      Err(err) => return Err(err),
    };

    if record.status == to || record.status.is_terminal() {
      debug!("withdrawal {} already {:?}", record.out_bill_no, record.status);
      return Ok(TransferUpdate::Unchanged(record));
    }

    let patch = Patch {
      transfer_bill_no: bill.transfer_bill_no.clone(),
      transfer_state: Some(bill.state.clone()),
      failure_reason: bill.fail_reason.clone(),
    };
    if !self.transition(&bill.out_bill_no, to, patch).await? {
      let record = self.by_reference(&bill.out_bill_no).await?;
      return Ok(TransferUpdate::Unchanged(record));
    }

    let record = self.by_reference(&bill.out_bill_no).await?;
    info!("withdrawal {} is now {:?}", record.out_bill_no, record.status);

    Ok(TransferUpdate::Applied(record))
  }

  /// Conditional status change; returns whether this call made it.
  async fn transition(
    &self,
    out_bill_no: &str,
    to: WithdrawalStatus,
    patch: Patch,
  ) -> Result<bool> {
    let now = now();
    let mut update = withdrawal::ActiveModel {
      status: Set(to),
      updated_at: Set(now),
      ..Default::default()
    };

    if let Some(no) = patch.transfer_bill_no {
      update.transfer_bill_no = Set(Some(no));
    }
    if let Some(state) = patch.transfer_state {
      update.transfer_state = Set(Some(state));
    }
    if to.is_terminal() {
      update.active_user = Set(None);
    }
    match to {
      WithdrawalStatus::Completed => update.completed_at = Set(Some(now)),
      WithdrawalStatus::Failed => {
        update.failure_reason = Set(Some(
          patch.failure_reason.unwrap_or_else(|| "payout failed".into()),
        ));
      }
      _ => {}
    }

    let from: &[WithdrawalStatus] = match to {
      WithdrawalStatus::Processing => &[WithdrawalStatus::Pending],
      _ => &WithdrawalStatus::IN_FLIGHT,
    };

    let res = withdrawal::Entity::update_many()
      .set(update)
      .filter(withdrawal::Column::OutBillNo.eq(out_bill_no))
      .filter(withdrawal::Column::Status.is_in(from.iter().copied()))
      .exec(self.db)
      .await?;

    Ok(res.rows_affected > 0)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    entity::order::LineItem,
    sv::{
      Commission, Order, User,
      order::Checkout,
      test_utils::test_db,
      wechat::mock::MockGateway,
    },
  };

  /// School agent `o_agent` with `earned` cents of settled commissions.
  async fn funded_agent(db: &DatabaseConnection, earned: i64) {
    let users = User::new(db);
    users.get_or_create("o_agent", "Agent").await.unwrap();
    users.promote("o_agent", 1, &["North High"]).await.unwrap();
    users.get_or_create("o_buyer", "Buyer").await.unwrap();
    users.set_profile("o_buyer", "North High", "Hangzhou").await.unwrap();

    // 5% base rate
    let order = Order::new(db)
      .checkout(
        "o_buyer",
        Checkout {
          items: vec![LineItem {
            product_id: "deck".into(),
            quantity: 1,
            unit_price: earned * 20,
          }],
          ..Default::default()
        },
      )
      .await
      .unwrap();
    Order::mark_paid(db, &order.id, "4200009").await.unwrap();

    let engine = Commission::new(db);
    engine.process_order(&order.id).await.unwrap();
    engine.settle_due(now() + TimeDelta::seconds(1)).await.unwrap();
  }

  fn request(amount: f64) -> WithdrawalRequest {
    WithdrawalRequest { amount, method: "wechat".into(), account_info: None }
  }

  #[tokio::test]
  async fn test_request_submits_net_payout() {
    let db = test_db::setup().await;
    funded_agent(&db, 5_000).await;
    let gateway = MockGateway::new();

    let record = Withdrawal::new(&db, &gateway)
      .request("o_agent", request(20.009))
      .await
      .unwrap();

    assert_eq!(record.amount, 2_000);
    assert_eq!(record.fee, 20);
    assert_eq!(record.net_amount, 1_980);
    assert_eq!(record.status, WithdrawalStatus::Processing);
    assert_eq!(record.out_bill_no.len(), 32);
    assert!(record.out_bill_no.starts_with("WD"));
    assert_eq!(
      record.transfer_bill_no.as_deref(),
      Some(format!("TB{}", record.out_bill_no).as_str())
    );
    assert_eq!(record.estimated_arrival - record.created_at, TimeDelta::hours(48));

    let payouts = gateway.payouts();
    assert_eq!(payouts.len(), 1);
    assert_eq!(payouts[0].amount, 1_980);
    assert_eq!(payouts[0].open_id, "o_agent");
  }

  #[tokio::test]
  async fn test_one_withdrawal_in_flight() {
    let db = test_db::setup().await;
    funded_agent(&db, 5_000).await;
    let gateway = MockGateway::new();
    let sv = Withdrawal::new(&db, &gateway);

    sv.request("o_agent", request(10.0)).await.unwrap();
    let second = sv.request("o_agent", request(10.0)).await;

    assert!(matches!(second, Err(Error::WithdrawalInFlight)));
    assert_eq!(gateway.payouts().len(), 1);
  }

  #[tokio::test]
  async fn test_request_validation() {
    let db = test_db::setup().await;
    funded_agent(&db, 5_000).await;
    User::new(&db).get_or_create("o_user", "User").await.unwrap();
    let gateway = MockGateway::new();
    let sv = Withdrawal::new(&db, &gateway);

    let low = sv.request("o_agent", request(9.99)).await;
    assert!(matches!(low, Err(Error::BelowMinimum(MIN_WITHDRAWAL))));

    let method = sv
      .request(
        "o_agent",
        WithdrawalRequest {
          amount: 20.0,
          method: "paypal".into(),
          account_info: None,
        },
      )
      .await;
    assert!(matches!(method, Err(Error::InvalidMethod(_))));

    let too_much = sv.request("o_agent", request(50.01)).await;
    assert!(matches!(too_much, Err(Error::InsufficientBalance)));

    let not_agent = sv.request("o_user", request(20.0)).await;
    assert!(matches!(not_agent, Err(Error::WithdrawalNotAllowed)));

    assert!(gateway.payouts().is_empty());
  }

  #[tokio::test]
  async fn test_rejected_submission_marks_failed() {
    let db = test_db::setup().await;
    funded_agent(&db, 5_000).await;
    let gateway = MockGateway::new();
    gateway.fail_transfers(true);
    let sv = Withdrawal::new(&db, &gateway);

    let record = sv.request("o_agent", request(20.0)).await.unwrap();
    assert_eq!(record.status, WithdrawalStatus::Failed);
    assert!(record.failure_reason.unwrap().contains("NOT_ENOUGH"));
    assert!(record.active_user.is_none());

    // failed withdrawals neither block nor spend the balance
    gateway.fail_transfers(false);
    let retry = sv.request("o_agent", request(50.0)).await.unwrap();
    assert_eq!(retry.status, WithdrawalStatus::Processing);
  }

  #[tokio::test]
  async fn test_successful_receipt_waits_for_callback() {
    let db = test_db::setup().await;
    funded_agent(&db, 5_000).await;
    let gateway = MockGateway::new();
    gateway.transfer_state("SUCCESS");
    let sv = Withdrawal::new(&db, &gateway);

    let record = sv.request("o_agent", request(30.0)).await.unwrap();
    assert_eq!(record.status, WithdrawalStatus::Processing);
    assert_eq!(record.transfer_state.as_deref(), Some("SUCCESS"));
    assert_eq!(record.active_user.as_deref(), Some("o_agent"));
    assert!(record.completed_at.is_none());

    let bill = TransferBill {
      out_bill_no: record.out_bill_no.clone(),
      transfer_bill_no: record.transfer_bill_no.clone(),
      state: "SUCCESS".into(),
      fail_reason: None,
    };
    let TransferUpdate::Applied(done) = sv.apply_transfer(&bill).await.unwrap()
    else {
      panic!("expected applied")
    };
    assert_eq!(done.status, WithdrawalStatus::Completed);
    assert!(done.active_user.is_none());
  }

  #[tokio::test]
  async fn test_slow_submission_marks_failed() {
    let db = test_db::setup().await;
    funded_agent(&db, 5_000).await;
    let gateway = MockGateway::new();
    gateway.delay_transfers(Duration::from_secs(5));
    let sv =
      Withdrawal::new(&db, &gateway).with_timeout(Duration::from_millis(300));

    let record = sv.request("o_agent", request(20.0)).await.unwrap();
    assert_eq!(record.status, WithdrawalStatus::Failed);
    assert!(record.failure_reason.unwrap().contains("timed out"));
    assert!(record.active_user.is_none());
    assert!(gateway.payouts().is_empty());
    assert_eq!(Balance::new(&db).available("o_agent").await.unwrap(), 5_000);
  }

  #[tokio::test]
  async fn test_transfer_success_spends_balance() {
    let db = test_db::setup().await;
    funded_agent(&db, 5_000).await;
    let gateway = MockGateway::new();
    let sv = Withdrawal::new(&db, &gateway);
    let record = sv.request("o_agent", request(30.0)).await.unwrap();

    let bill = TransferBill {
      out_bill_no: record.out_bill_no.clone(),
      transfer_bill_no: record.transfer_bill_no.clone(),
      state: "SUCCESS".into(),
      fail_reason: None,
    };
    let TransferUpdate::Applied(done) = sv.apply_transfer(&bill).await.unwrap()
    else {
      panic!("expected applied")
    };
    assert_eq!(done.status, WithdrawalStatus::Completed);
    assert!(done.completed_at.is_some());
    assert!(done.active_user.is_none());

    assert!(matches!(
      sv.apply_transfer(&bill).await.unwrap(),
      TransferUpdate::Unchanged(_)
    ));
    assert_eq!(Balance::new(&db).available("o_agent").await.unwrap(), 2_000);

    let over = sv.request("o_agent", request(20.01)).await;
    assert!(matches!(over, Err(Error::InsufficientBalance)));
  }

  #[tokio::test]
  async fn test_terminal_state_is_final() {
    let db = test_db::setup().await;
    funded_agent(&db, 5_000).await;
    let gateway = MockGateway::new();
    let sv = Withdrawal::new(&db, &gateway);
    let record = sv.request("o_agent", request(30.0)).await.unwrap();

    let fail = TransferBill {
      out_bill_no: record.out_bill_no.clone(),
      transfer_bill_no: None,
      state: "FAIL".into(),
      fail_reason: Some("ACCOUNT_FROZEN".into()),
    };
    let TransferUpdate::Applied(failed) = sv.apply_transfer(&fail).await.unwrap()
    else {
      panic!("expected applied")
    };
    assert_eq!(failed.failure_reason.as_deref(), Some("ACCOUNT_FROZEN"));

    let late = TransferBill { state: "SUCCESS".into(), ..fail };
    assert!(matches!(
      sv.apply_transfer(&late).await.unwrap(),
      TransferUpdate::Unchanged(_)
    ));
    assert_eq!(
      sv.by_reference(&record.out_bill_no).await.unwrap().status,
      WithdrawalStatus::Failed
    );
  }

  #[tokio::test]
  async fn test_unknown_transfer_is_ignored() {
    let db = test_db::setup().await;
    let gateway = MockGateway::new();
    let sv = Withdrawal::new(&db, &gateway);

    let bill = TransferBill {
      out_bill_no: "WD_MISSING".into(),
      transfer_bill_no: None,
      state: "SUCCESS".into(),
      fail_reason: None,
    };
    assert!(matches!(
      sv.apply_transfer(&bill).await.unwrap(),
      TransferUpdate::Unknown
    ));
  }

  #[test]
  fn test_transfer_state_mapping() {
    assert_eq!(transfer_status("WAIT_USER_CONFIRM"), Some(WithdrawalStatus::Processing));
    assert_eq!(transfer_status("SUCCESS"), Some(WithdrawalStatus::Completed));
    assert_eq!(transfer_status("FAIL"), Some(WithdrawalStatus::Failed));
    assert_eq!(transfer_status("CANCELING"), Some(WithdrawalStatus::Cancelled));
    assert_eq!(transfer_status("SOMETHING_NEW"), None);
  }
}
