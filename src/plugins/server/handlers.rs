use axum::{
  Json,
  body::Bytes,
  extract::{Path, Query, State},
  http::{HeaderMap, StatusCode, header},
  response::IntoResponse,
};
use serde::{Deserialize, Serialize};

use crate::{
  entity::{
    CommissionStatus, cart_item, commission, order, settlement_failure, user,
    withdrawal,
  },
  prelude::*,
  state::AppState,
  sv::{
    commission::CommissionSummary,
    order::Checkout,
    referral::ReferralInfo,
    wechat::PayParams,
    withdrawal::{WithdrawalReceipt, WithdrawalRequest},
  },
};

type App = State<Arc<AppState>>;

pub async fn health() -> &'static str {
  "OK"
}

/// Gateway acknowledgment body.
#[derive(Debug, Serialize)]
pub struct Ack {
  pub code: &'static str,
  pub message: String,
}

/// Shared by payment and payout notifications; the payload says which. The
/// reconciler bounds its own steps so side effects never cost the ack.
pub async fn notify(
  State(app): App,
  headers: HeaderMap,
  body: Bytes,
) -> (StatusCode, Json<Ack>) {
  match app.sv().reconciler.handle(&headers, &body).await {
    Ok(outcome) => {
      debug!("notification handled: {outcome:?}");
      (StatusCode::OK, Json(Ack { code: "SUCCESS", message: String::new() }))
    }
    Err(err) => {
      warn!("notification rejected: {err}");
      let message = match &err {
        Error::Db(_) | Error::Internal(_) => "internal error".to_string(),
        other => other.to_string(),
      };
      (err.status(), Json(Ack { code: "FAIL", message }))
    }
  }
}

#[derive(Deserialize)]
pub struct LoginReq {
  pub open_id: String,
  #[serde(default)]
  pub user_name: String,
}

pub async fn login(
  State(app): App,
  Json(req): Json<LoginReq>,
) -> Result<Json<user::Model>> {
  if req.open_id.trim().is_empty() {
    return Err(Error::InvalidArgs("open_id is required".into()));
  }
  let user = app
    .bounded(app.sv().user.get_or_create(req.open_id.trim(), &req.user_name))
    .await?;
  Ok(Json(user))
}

#[derive(Deserialize)]
pub struct ProfileReq {
  #[serde(default)]
  pub school: String,
  #[serde(default)]
  pub city: String,
}

pub async fn set_profile(
  State(app): App,
  Path(open_id): Path<String>,
  Json(req): Json<ProfileReq>,
) -> Result<Json<user::Model>> {
  let user = app
    .bounded(app.sv().user.set_profile(&open_id, &req.school, &req.city))
    .await?;
  Ok(Json(user))
}

#[derive(Deserialize)]
pub struct PromoteReq {
  pub level: i32,
  pub territories: Vec<String>,
}

pub async fn promote(
  State(app): App,
  Path(open_id): Path<String>,
  Json(req): Json<PromoteReq>,
) -> Result<Json<user::Model>> {
  let territories: Vec<&str> =
    req.territories.iter().map(String::as_str).collect();
  let user = app
    .bounded(app.sv().user.promote(&open_id, req.level, &territories))
    .await?;
  Ok(Json(user))
}

pub async fn demote(
  State(app): App,
  Path(open_id): Path<String>,
) -> Result<StatusCode> {
  app.bounded(app.sv().user.demote(&open_id)).await?;
  Ok(StatusCode::NO_CONTENT)
}

pub async fn cart(
  State(app): App,
  Path(open_id): Path<String>,
) -> Result<Json<Vec<cart_item::Model>>> {
  let items = app.bounded(app.sv().cart.items(&open_id)).await?;
  Ok(Json(items))
}

#[derive(Deserialize)]
pub struct CartReq {
  pub product_id: String,
  pub quantity: i32,
  /// Cents.
  pub unit_price: i64,
}

pub async fn add_to_cart(
  State(app): App,
  Path(open_id): Path<String>,
  Json(req): Json<CartReq>,
) -> Result<Json<cart_item::Model>> {
  let item = app
    .bounded(app.sv().cart.add(
      &open_id,
      &req.product_id,
      req.quantity,
      req.unit_price,
    ))
    .await?;
  Ok(Json(item))
}

pub async fn checkout(
  State(app): App,
  Path(open_id): Path<String>,
  Json(req): Json<Checkout>,
) -> Result<Json<order::Model>> {
  let order = app.bounded(app.sv().order.checkout(&open_id, req)).await?;
  Ok(Json(order))
}

pub async fn order(
  State(app): App,
  Path(id): Path<String>,
) -> Result<Json<order::Model>> {
  let order = app.bounded(app.sv().order.by_id(&id)).await?;
  Ok(Json(order))
}

#[derive(Deserialize)]
pub struct PrepayReq {
  pub open_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrepayResp {
  #[serde(flatten)]
  pub params: PayParams,
  pub prepay_id: String,
}

pub async fn prepay(
  State(app): App,
  Path(id): Path<String>,
  Json(req): Json<PrepayReq>,
) -> Result<Json<PrepayResp>> {
  let sv = app.sv();
  let params = app
    .bounded(sv.order.prepay(app.gateway.as_ref(), &id, &req.open_id))
    .await?;

  let prepay_id = params
    .package
    .strip_prefix("prepay_id=")
    .unwrap_or(&params.package)
    .to_string();

  Ok(Json(PrepayResp { params, prepay_id }))
}

pub async fn complete_order(
  State(app): App,
  Path(id): Path<String>,
) -> Result<Json<order::Model>> {
  let order = app.bounded(app.sv().order.complete(&id)).await?;
  Ok(Json(order))
}

pub async fn cancel_order(
  State(app): App,
  Path(id): Path<String>,
) -> Result<Json<order::Model>> {
  let order = app.bounded(app.sv().order.cancel(&id)).await?;
  Ok(Json(order))
}

pub async fn referral(
  State(app): App,
  Path(open_id): Path<String>,
) -> Result<Json<ReferralInfo>> {
  let info = app.bounded(app.sv().referral.info(&open_id)).await?;
  Ok(Json(info))
}

#[derive(Deserialize)]
pub struct OnboardReq {
  pub code: String,
}

pub async fn onboard(
  State(app): App,
  Path(open_id): Path<String>,
  Json(req): Json<OnboardReq>,
) -> Result<Json<user::Model>> {
  let user = app.bounded(app.sv().referral.onboard(&open_id, &req.code)).await?;
  Ok(Json(user))
}

pub async fn qrcode(
  State(app): App,
  Path(open_id): Path<String>,
) -> Result<impl IntoResponse> {
  let sv = app.sv();
  let png = app
    .bounded(sv.referral.share_image(app.gateway.as_ref(), &open_id))
    .await?;
  Ok(([(header::CONTENT_TYPE, "image/png")], png))
}

#[derive(Deserialize)]
pub struct CommissionQuery {
  pub status: Option<CommissionStatus>,
}

#[derive(Serialize)]
pub struct CommissionsResp {
  pub summary: CommissionSummary,
  pub commissions: Vec<commission::Model>,
}

pub async fn commissions(
  State(app): App,
  Path(open_id): Path<String>,
  Query(query): Query<CommissionQuery>,
) -> Result<Json<CommissionsResp>> {
  let sv = app.sv();
  let summary = app.bounded(sv.commission.summary(&open_id)).await?;
  let commissions =
    app.bounded(sv.commission.list(&open_id, query.status)).await?;
  Ok(Json(CommissionsResp { summary, commissions }))
}

#[derive(Serialize)]
pub struct BalanceResp {
  pub earned: i64,
  pub withdrawn: i64,
  pub available: i64,
}

pub async fn balance(
  State(app): App,
  Path(open_id): Path<String>,
) -> Result<Json<BalanceResp>> {
  let sv = app.sv();
  let earned = app.bounded(sv.balance.earned(&open_id)).await?;
  let withdrawn = app.bounded(sv.balance.withdrawn(&open_id)).await?;
  Ok(Json(BalanceResp { earned, withdrawn, available: earned - withdrawn }))
}

pub async fn withdraw(
  State(app): App,
  Path(open_id): Path<String>,
  Json(req): Json<WithdrawalRequest>,
) -> Result<Json<WithdrawalReceipt>> {
  // reservation and submission are bounded separately inside
  let record = app.sv().withdrawal.request(&open_id, req).await?;
  Ok(Json(record.into()))
}

pub async fn withdrawals(
  State(app): App,
  Path(open_id): Path<String>,
) -> Result<Json<Vec<withdrawal::Model>>> {
  let history = app.bounded(app.sv().withdrawal.history(&open_id)).await?;
  Ok(Json(history))
}

pub async fn failures(
  State(app): App,
) -> Result<Json<Vec<settlement_failure::Model>>> {
  let failures = app.bounded(app.sv().failures.unresolved()).await?;
  Ok(Json(failures))
}

#[cfg(test)]
mod tests {
  use axum::{body::Body, http::Request};
  use tower::ServiceExt;

  use super::*;
  use crate::{
    config::Config,
    entity::order::LineItem,
    plugins::server::routes,
    sv::{test_utils::test_db, wechat::mock::MockGateway},
  };

  async fn setup() -> (Arc<AppState>, Arc<MockGateway>) {
    let db = test_db::setup().await;
    let gateway = Arc::new(MockGateway::new());
    let app =
      Arc::new(AppState::with_gateway(db, Config::test(), gateway.clone()));
    (app, gateway)
  }

  async fn pending_order(app: &AppState) -> order::Model {
    let sv = app.sv();
    sv.user.get_or_create("o_buyer", "Buyer").await.unwrap();
    sv.order
      .checkout(
        "o_buyer",
        Checkout {
          items: vec![LineItem {
            product_id: "deck".into(),
            quantity: 2,
            unit_price: 1_500,
          }],
          ..Default::default()
        },
      )
      .await
      .unwrap()
  }

  async fn send(
    app: &Arc<AppState>,
    req: Request<Body>,
  ) -> (StatusCode, json::Value) {
    let resp = routes().with_state(app.clone()).oneshot(req).await.unwrap();
    let status = resp.status();
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, json::from_slice(&body).unwrap_or(json::Value::Null))
  }

  fn notification(headers: HeaderMap, body: Vec<u8>) -> Request<Body> {
    let mut req = Request::post("/api/pay/notify/transfer")
      .body(Body::from(body))
      .unwrap();
    *req.headers_mut() = headers;
    req
  }

  #[tokio::test]
  async fn test_notify_acknowledges_payment() {
    let (app, gateway) = setup().await;
    let order = pending_order(&app).await;

    let (headers, body) = gateway.payment(&order.id, "4200000001");
    let (status, ack) = send(&app, notification(headers, body)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack, json::json!({ "code": "SUCCESS", "message": "" }));

    let order = app.sv().order.by_id(&order.id).await.unwrap();
    assert_eq!(order.status, crate::entity::OrderStatus::Paid);
  }

  #[tokio::test]
  async fn test_notify_rejects_forgery() {
    let (app, gateway) = setup().await;
    let order = pending_order(&app).await;

    let (headers, _) = gateway.payment(&order.id, "4200000001");
    let (_, forged) = gateway.payment(&order.id, "4200000002");
    let (status, ack) = send(&app, notification(headers, forged)).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(ack["code"], "FAIL");
  }

  #[tokio::test]
  async fn test_prepay_returns_client_parameters() {
    let (app, _) = setup().await;
    let order = pending_order(&app).await;

    let req = Request::post(format!("/api/orders/{}/prepay", order.id))
      .header(header::CONTENT_TYPE, "application/json")
      .body(Body::from(r#"{"open_id":"o_buyer"}"#))
      .unwrap();
    let (status, body) = send(&app, req).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["prepayId"], format!("mock_{}", order.id));
    assert_eq!(body["signType"], "RSA");
    assert!(body["timeStamp"].is_string());
  }

  #[tokio::test]
  async fn test_withdraw_maps_errors_to_status() {
    let (app, _) = setup().await;
    app.sv().user.get_or_create("o_plain", "Plain").await.unwrap();

    let withdraw = |amount: f64| {
      Request::post("/api/users/o_plain/withdrawals")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
          json::json!({ "amount": amount, "method": "wechat" }).to_string(),
        ))
        .unwrap()
    };

    let (status, body) = send(&app, withdraw(100.0)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["success"], false);

    let (status, _) = send(&app, withdraw(5.0)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
  }
}
