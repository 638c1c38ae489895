use crate::{entity::cart_item, prelude::*};

pub struct Cart<'a> {
  db: &'a DatabaseConnection,
}

impl<'a> Cart<'a> {
  pub fn new(db: &'a DatabaseConnection) -> Self {
    Self { db }
  }

  /// Adds `quantity` of a product, merging with an existing row.
  pub async fn add(
    &self,
    user_id: &str,
    product_id: &str,
    quantity: i32,
    unit_price: i64,
  ) -> Result<cart_item::Model> {
    if quantity <= 0 || unit_price < 0 {
      return Err(Error::InvalidArgs("invalid cart quantity or price".into()));
    }

    let existing = cart_item::Entity::find()
      .filter(cart_item::Column::UserId.eq(user_id))
      .filter(cart_item::Column::ProductId.eq(product_id))
      .one(self.db)
      .await?;

    let item = match existing {
      Some(item) => {
        cart_item::ActiveModel {
          quantity: Set(item.quantity + quantity),
          unit_price: Set(unit_price),
          ..item.into()
        }
        .update(self.db)
        .await?
      }
      None => {
        cart_item::ActiveModel {
          user_id: Set(user_id.to_string()),
          product_id: Set(product_id.to_string()),
          quantity: Set(quantity),
          unit_price: Set(unit_price),
          created_at: Set(now()),
          ..Default::default()
        }
        .insert(self.db)
        .await?
      }
    };

    Ok(item)
  }

  pub async fn items(&self, user_id: &str) -> Result<Vec<cart_item::Model>> {
    let items = cart_item::Entity::find()
      .filter(cart_item::Column::UserId.eq(user_id))
      .order_by_asc(cart_item::Column::CreatedAt)
      .all(self.db)
      .await?;
    Ok(items)
  }

  /// Removes purchased rows: the listed products, or the whole cart when
  /// the order did not record a selection.
  pub async fn clear_purchased<C: ConnectionTrait>(
    conn: &C,
    user_id: &str,
    product_ids: &[String],
  ) -> Result<u64> {
    let mut query = cart_item::Entity::delete_many()
      .filter(cart_item::Column::UserId.eq(user_id));
    if !product_ids.is_empty() {
      query = query
        .filter(cart_item::Column::ProductId.is_in(product_ids.iter().cloned()));
    }

    let res = query.exec(conn).await?;
    debug!("cleared {} cart rows of {user_id}", res.rows_affected);
    Ok(res.rows_affected)
  }
}
