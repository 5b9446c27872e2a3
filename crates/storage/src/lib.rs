use anyhow::{ensure, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Executor, Pool, Row, Sqlite, Transaction,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use shared::{
    domain::{
        ActorId, Address, Contact, Doctor, DoctorId, DoctorProfile, Institution, InstitutionId,
        InstitutionProfile, NewProduct, OrderId, OrderItemId, OrderState, PaymentTypeId, Product,
        ProductId, ReferenceItem, ReferenceTable, RegisterId, RegistrantKind, RegistrantRef,
        SaleTypeId, SpecialityId,
    },
    validation::OrderTerms,
};

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredOrder {
    pub order_id: OrderId,
    pub actor_id: Option<ActorId>,
    pub register_id: Option<RegisterId>,
    pub freight: f64,
    pub discount: f64,
    pub sale_type_id: Option<SaleTypeId>,
    pub payment_type_id: Option<PaymentTypeId>,
    pub finished: bool,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl StoredOrder {
    pub fn state(&self) -> OrderState {
        OrderState::from_finished_flag(self.finished)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredOrderLine {
    pub item_id: OrderItemId,
    pub product_id: ProductId,
    pub product_name: String,
    pub amount: i64,
    pub unit_price: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredOrderSummary {
    pub order_id: OrderId,
    pub actor_id: Option<ActorId>,
    pub finished: bool,
    pub item_count: i64,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddItemOutcome {
    Added { item_id: OrderItemId, amount: i64 },
    OrderNotFound,
    OrderFinished,
    ProductUnavailable,
    InsufficientStock { available: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveItemOutcome {
    Removed { restocked: i64 },
    OrderNotFound,
    OrderFinished,
    ItemNotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishOutcome {
    Finished,
    OrderNotFound,
    AlreadyFinished,
    Empty,
}

pub enum FinishClaim {
    Claimed(PendingFinish),
    Refused(FinishOutcome),
}

/// A finished order whose transaction has not been committed yet. Dropping it
/// rolls the order back to open.
pub struct PendingFinish {
    tx: Transaction<'static, Sqlite>,
    pub order: StoredOrder,
    pub lines: Vec<StoredOrderLine>,
}

impl PendingFinish {
    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

const ORDER_COLUMNS: &str = "id, actor_id, register_id, freight, discount, sale_type_id, \
     payment_type_id, finished, created_at, finished_at";

const DOCTOR_SELECT: &str = "SELECT d.id, d.name, d.cpf, d.rg, d.crm, d.cel, d.phone, d.email,
            d.speciality_id, r.id AS register_id, r.zip, r.city, r.address, r.district
     FROM doctors d
     LEFT JOIN registers r ON r.doctor_id = d.id";

const INSTITUTION_SELECT: &str = "SELECT i.id, i.name, i.cnpj,
            i.adm_name, i.adm_email, i.adm_cel, i.adm_phone,
            i.enf_name, i.enf_email, i.enf_cel, i.enf_phone,
            r.id AS register_id, r.zip, r.city, r.address, r.district
     FROM institutions i
     LEFT JOIN registers r ON r.institution_id = i.id";

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn create_employee(&self, username: &str) -> Result<ActorId> {
        let rec = sqlx::query(
            "INSERT INTO employees (username) VALUES (?)
             ON CONFLICT(username) DO UPDATE SET username=excluded.username
             RETURNING id",
        )
        .bind(username)
        .fetch_one(&self.pool)
        .await?;
        Ok(ActorId(rec.get::<i64, _>(0)))
    }

    pub async fn username_for_employee(&self, actor_id: ActorId) -> Result<Option<String>> {
        let row = sqlx::query("SELECT username FROM employees WHERE id = ?")
            .bind(actor_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<String, _>(0)))
    }

    pub async fn list_employees(&self) -> Result<Vec<(ActorId, String)>> {
        let rows = sqlx::query("SELECT id, username FROM employees ORDER BY lower(username) ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| (ActorId(r.get::<i64, _>(0)), r.get::<String, _>(1)))
            .collect())
    }

    pub async fn list_reference(&self, table: ReferenceTable) -> Result<Vec<ReferenceItem>> {
        let rows = sqlx::query(&format!(
            "SELECT id, label FROM {} ORDER BY id ASC",
            reference_table_name(table)
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| ReferenceItem {
                id: r.get::<i64, _>(0),
                label: r.get::<String, _>(1),
            })
            .collect())
    }

    pub async fn reference(&self, table: ReferenceTable, id: i64) -> Result<Option<ReferenceItem>> {
        let row = sqlx::query(&format!(
            "SELECT id, label FROM {} WHERE id = ?",
            reference_table_name(table)
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| ReferenceItem {
            id: r.get::<i64, _>(0),
            label: r.get::<String, _>(1),
        }))
    }

    pub async fn insert_reference(&self, table: ReferenceTable, label: &str) -> Result<i64> {
        let rec = sqlx::query(&format!(
            "INSERT INTO {} (label) VALUES (?)
             ON CONFLICT(label) DO UPDATE SET label=excluded.label
             RETURNING id",
            reference_table_name(table)
        ))
        .bind(label)
        .fetch_one(&self.pool)
        .await?;
        Ok(rec.get::<i64, _>(0))
    }

    pub async fn create_product(&self, product: &NewProduct) -> Result<ProductId> {
        let rec = sqlx::query(
            "INSERT INTO products (name, price, amount, available) VALUES (?, ?, ?, ?) RETURNING id",
        )
        .bind(&product.name)
        .bind(product.price)
        .bind(product.amount)
        .bind(product.available)
        .fetch_one(&self.pool)
        .await?;
        Ok(ProductId(rec.get::<i64, _>(0)))
    }

    pub async fn product(&self, product_id: ProductId) -> Result<Option<Product>> {
        let row = sqlx::query("SELECT id, name, price, amount, available FROM products WHERE id = ?")
            .bind(product_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| product_from_row(&r)))
    }

    pub async fn list_available_products(&self) -> Result<Vec<Product>> {
        let rows = sqlx::query(
            "SELECT id, name, price, amount, available FROM products
             WHERE available = 1
             ORDER BY lower(name) ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(product_from_row).collect())
    }

    /// Products that may go into a new order line: flagged available and in stock.
    pub async fn list_selectable_products(&self) -> Result<Vec<Product>> {
        let rows = sqlx::query(
            "SELECT id, name, price, amount, available FROM products
             WHERE available = 1 AND amount > 0
             ORDER BY lower(name) ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(product_from_row).collect())
    }

    pub async fn update_product_stock(
        &self,
        product_id: ProductId,
        amount: i64,
        available: bool,
    ) -> Result<bool> {
        let result = sqlx::query("UPDATE products SET amount = ?, available = ? WHERE id = ?")
            .bind(amount)
            .bind(available)
            .bind(product_id.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn doctor_id_for_cpf(&self, cpf: &str) -> Result<Option<DoctorId>> {
        let row = sqlx::query("SELECT id FROM doctors WHERE cpf = ?")
            .bind(cpf)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| DoctorId(r.get::<i64, _>(0))))
    }

    /// Inserts the doctor and its address record in one transaction.
    pub async fn create_doctor(&self, profile: &DoctorProfile, address: &Address) -> Result<DoctorId> {
        let mut tx = self.pool.begin().await?;

        let rec = sqlx::query(
            "INSERT INTO doctors (name, cpf, rg, crm, cel, phone, email, speciality_id)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING id",
        )
        .bind(&profile.name)
        .bind(&profile.cpf)
        .bind(&profile.rg)
        .bind(&profile.crm)
        .bind(&profile.cel)
        .bind(&profile.phone)
        .bind(&profile.email)
        .bind(profile.speciality_id.0)
        .fetch_one(&mut *tx)
        .await?;
        let doctor_id = DoctorId(rec.get::<i64, _>(0));

        sqlx::query(
            "INSERT INTO registers (doctor_id, zip, city, address, district) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(doctor_id.0)
        .bind(&address.zip)
        .bind(&address.city)
        .bind(&address.address)
        .bind(&address.district)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(doctor_id)
    }

    /// Overwrites the doctor fields and creates or updates its address record.
    /// Returns `false` when the doctor does not exist.
    pub async fn update_doctor(
        &self,
        doctor_id: DoctorId,
        profile: &DoctorProfile,
        address: &Address,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE doctors
             SET name = ?, cpf = ?, rg = ?, crm = ?, cel = ?, phone = ?, email = ?, speciality_id = ?
             WHERE id = ?",
        )
        .bind(&profile.name)
        .bind(&profile.cpf)
        .bind(&profile.rg)
        .bind(&profile.crm)
        .bind(&profile.cel)
        .bind(&profile.phone)
        .bind(&profile.email)
        .bind(profile.speciality_id.0)
        .bind(doctor_id.0)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if updated == 0 {
            return Ok(false);
        }

        sqlx::query(
            "INSERT INTO registers (doctor_id, zip, city, address, district) VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(doctor_id) DO UPDATE SET
                zip = excluded.zip,
                city = excluded.city,
                address = excluded.address,
                district = excluded.district",
        )
        .bind(doctor_id.0)
        .bind(&address.zip)
        .bind(&address.city)
        .bind(&address.address)
        .bind(&address.district)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    /// Deletes the doctor and its address record. Orders that pointed at the
    /// address keep existing with a cleared buyer reference.
    pub async fn delete_doctor(&self, doctor_id: DoctorId) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE orders SET register_id = NULL
             WHERE register_id IN (SELECT id FROM registers WHERE doctor_id = ?)",
        )
        .bind(doctor_id.0)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM registers WHERE doctor_id = ?")
            .bind(doctor_id.0)
            .execute(&mut *tx)
            .await?;
        let removed = sqlx::query("DELETE FROM doctors WHERE id = ?")
            .bind(doctor_id.0)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        Ok(removed > 0)
    }

    pub async fn doctor(&self, doctor_id: DoctorId) -> Result<Option<Doctor>> {
        let row = sqlx::query(&format!("{DOCTOR_SELECT} WHERE d.id = ?"))
            .bind(doctor_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| doctor_from_row(&r)))
    }

    pub async fn list_doctors(&self) -> Result<Vec<Doctor>> {
        let rows = sqlx::query(&format!("{DOCTOR_SELECT} ORDER BY d.id ASC"))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(doctor_from_row).collect())
    }

    pub async fn institution_id_for_cnpj(&self, cnpj: &str) -> Result<Option<InstitutionId>> {
        let row = sqlx::query("SELECT id FROM institutions WHERE cnpj = ?")
            .bind(cnpj)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| InstitutionId(r.get::<i64, _>(0))))
    }

    pub async fn create_institution(
        &self,
        profile: &InstitutionProfile,
        address: &Address,
    ) -> Result<InstitutionId> {
        let mut tx = self.pool.begin().await?;

        let rec = sqlx::query(
            "INSERT INTO institutions (
                name, cnpj,
                adm_name, adm_email, adm_cel, adm_phone,
                enf_name, enf_email, enf_cel, enf_phone
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING id",
        )
        .bind(&profile.name)
        .bind(&profile.cnpj)
        .bind(profile.administration.name.as_deref())
        .bind(profile.administration.email.as_deref())
        .bind(profile.administration.cel.as_deref())
        .bind(profile.administration.phone.as_deref())
        .bind(profile.nursing.name.as_deref())
        .bind(profile.nursing.email.as_deref())
        .bind(profile.nursing.cel.as_deref())
        .bind(profile.nursing.phone.as_deref())
        .fetch_one(&mut *tx)
        .await?;
        let institution_id = InstitutionId(rec.get::<i64, _>(0));

        sqlx::query(
            "INSERT INTO registers (institution_id, zip, city, address, district) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(institution_id.0)
        .bind(&address.zip)
        .bind(&address.city)
        .bind(&address.address)
        .bind(&address.district)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(institution_id)
    }

    pub async fn update_institution(
        &self,
        institution_id: InstitutionId,
        profile: &InstitutionProfile,
        address: &Address,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE institutions
             SET name = ?, cnpj = ?,
                 adm_name = ?, adm_email = ?, adm_cel = ?, adm_phone = ?,
                 enf_name = ?, enf_email = ?, enf_cel = ?, enf_phone = ?
             WHERE id = ?",
        )
        .bind(&profile.name)
        .bind(&profile.cnpj)
        .bind(profile.administration.name.as_deref())
        .bind(profile.administration.email.as_deref())
        .bind(profile.administration.cel.as_deref())
        .bind(profile.administration.phone.as_deref())
        .bind(profile.nursing.name.as_deref())
        .bind(profile.nursing.email.as_deref())
        .bind(profile.nursing.cel.as_deref())
        .bind(profile.nursing.phone.as_deref())
        .bind(institution_id.0)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if updated == 0 {
            return Ok(false);
        }

        sqlx::query(
            "INSERT INTO registers (institution_id, zip, city, address, district) VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(institution_id) DO UPDATE SET
                zip = excluded.zip,
                city = excluded.city,
                address = excluded.address,
                district = excluded.district",
        )
        .bind(institution_id.0)
        .bind(&address.zip)
        .bind(&address.city)
        .bind(&address.address)
        .bind(&address.district)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    pub async fn delete_institution(&self, institution_id: InstitutionId) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE orders SET register_id = NULL
             WHERE register_id IN (SELECT id FROM registers WHERE institution_id = ?)",
        )
        .bind(institution_id.0)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM registers WHERE institution_id = ?")
            .bind(institution_id.0)
            .execute(&mut *tx)
            .await?;
        let removed = sqlx::query("DELETE FROM institutions WHERE id = ?")
            .bind(institution_id.0)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        Ok(removed > 0)
    }

    pub async fn institution(&self, institution_id: InstitutionId) -> Result<Option<Institution>> {
        let row = sqlx::query(&format!("{INSTITUTION_SELECT} WHERE i.id = ?"))
            .bind(institution_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| institution_from_row(&r)))
    }

    pub async fn list_institutions(&self) -> Result<Vec<Institution>> {
        let rows = sqlx::query(&format!("{INSTITUTION_SELECT} ORDER BY i.id ASC"))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(institution_from_row).collect())
    }

    pub async fn list_registrant_refs(&self) -> Result<Vec<RegistrantRef>> {
        let rows = sqlx::query(
            "SELECT r.id, r.doctor_id, r.institution_id, COALESCE(d.name, i.name, '')
             FROM registers r
             LEFT JOIN doctors d ON d.id = r.doctor_id
             LEFT JOIN institutions i ON i.id = r.institution_id
             ORDER BY r.id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(registrant_ref_from_row).collect())
    }

    pub async fn registrant_ref(&self, register_id: RegisterId) -> Result<Option<RegistrantRef>> {
        let row = sqlx::query(
            "SELECT r.id, r.doctor_id, r.institution_id, COALESCE(d.name, i.name, '')
             FROM registers r
             LEFT JOIN doctors d ON d.id = r.doctor_id
             LEFT JOIN institutions i ON i.id = r.institution_id
             WHERE r.id = ?",
        )
        .bind(register_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(registrant_ref_from_row))
    }

    pub async fn open_order_for_actor(&self, actor_id: ActorId) -> Result<Option<StoredOrder>> {
        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE actor_id = ? AND finished = 0"
        ))
        .bind(actor_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| order_from_row(&r)))
    }

    /// Fails if the actor already has an open order.
    pub async fn create_order(
        &self,
        actor_id: ActorId,
        created_at: DateTime<Utc>,
    ) -> Result<StoredOrder> {
        let row = sqlx::query(&format!(
            "INSERT INTO orders (actor_id, created_at) VALUES (?, ?) RETURNING {ORDER_COLUMNS}"
        ))
        .bind(actor_id.0)
        .bind(created_at)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("failed to open order for actor {}", actor_id.0))?;
        Ok(order_from_row(&row))
    }

    pub async fn order(&self, order_id: OrderId) -> Result<Option<StoredOrder>> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = ?"))
            .bind(order_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| order_from_row(&r)))
    }

    pub async fn list_orders(&self) -> Result<Vec<StoredOrderSummary>> {
        let rows = sqlx::query(
            "SELECT o.id, o.actor_id, o.finished, o.created_at, o.finished_at,
                    (SELECT COUNT(*) FROM order_items i WHERE i.order_id = o.id)
             FROM orders o
             ORDER BY o.id DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| StoredOrderSummary {
                order_id: OrderId(r.get::<i64, _>(0)),
                actor_id: r.get::<Option<i64>, _>(1).map(ActorId),
                finished: r.get::<bool, _>(2),
                created_at: r.get::<DateTime<Utc>, _>(3),
                finished_at: r.get::<Option<DateTime<Utc>>, _>(4),
                item_count: r.get::<i64, _>(5),
            })
            .collect())
    }

    pub async fn order_lines(&self, order_id: OrderId) -> Result<Vec<StoredOrderLine>> {
        fetch_order_lines(&self.pool, order_id).await
    }

    pub async fn order_item_count(&self, order_id: OrderId) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM order_items WHERE order_id = ?")
            .bind(order_id.0)
            .fetch_one(&self.pool)
            .await?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// Takes `amount` units out of stock and puts them on the order in one
    /// transaction. A product already on the order has its line incremented.
    ///
    /// The stock decrement is the first statement so the transaction holds the
    /// write lock before it reads anything; overlapping adds queue behind it.
    pub async fn add_order_item(
        &self,
        order_id: OrderId,
        product_id: ProductId,
        amount: i64,
    ) -> Result<AddItemOutcome> {
        ensure!(amount > 0, "order item amount must be positive, got {amount}");
        let mut tx = self.pool.begin().await?;

        let taken = sqlx::query(
            "UPDATE products SET amount = amount - ?
             WHERE id = ? AND available = 1 AND amount >= ?
             RETURNING price",
        )
        .bind(amount)
        .bind(product_id.0)
        .bind(amount)
        .fetch_optional(&mut *tx)
        .await?;

        let order = sqlx::query("SELECT finished FROM orders WHERE id = ?")
            .bind(order_id.0)
            .fetch_optional(&mut *tx)
            .await?;
        // Dropping `tx` on these early returns rolls the decrement back.
        match order.map(|r| r.get::<bool, _>(0)) {
            None => return Ok(AddItemOutcome::OrderNotFound),
            Some(true) => return Ok(AddItemOutcome::OrderFinished),
            Some(false) => {}
        }

        let Some(taken) = taken else {
            let product = sqlx::query("SELECT amount, available FROM products WHERE id = ?")
                .bind(product_id.0)
                .fetch_optional(&mut *tx)
                .await?;
            return Ok(match product {
                Some(r) if r.get::<bool, _>(1) && r.get::<i64, _>(0) > 0 => {
                    AddItemOutcome::InsufficientStock {
                        available: r.get::<i64, _>(0),
                    }
                }
                _ => AddItemOutcome::ProductUnavailable,
            });
        };
        let price = taken.get::<f64, _>(0);

        let line = sqlx::query(
            "INSERT INTO order_items (order_id, product_id, amount, unit_price) VALUES (?, ?, ?, ?)
             ON CONFLICT(order_id, product_id) DO UPDATE SET amount = order_items.amount + excluded.amount
             RETURNING id, amount",
        )
        .bind(order_id.0)
        .bind(product_id.0)
        .bind(amount)
        .bind(price)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(AddItemOutcome::Added {
            item_id: OrderItemId(line.get::<i64, _>(0)),
            amount: line.get::<i64, _>(1),
        })
    }

    /// Deletes a line of an open order and returns its units to stock.
    pub async fn remove_order_item(
        &self,
        order_id: OrderId,
        item_id: OrderItemId,
    ) -> Result<RemoveItemOutcome> {
        let mut tx = self.pool.begin().await?;

        let line = sqlx::query(
            "DELETE FROM order_items
             WHERE id = ? AND order_id = ?
               AND order_id IN (SELECT id FROM orders WHERE finished = 0)
             RETURNING product_id, amount",
        )
        .bind(item_id.0)
        .bind(order_id.0)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(line) = line else {
            let order = sqlx::query("SELECT finished FROM orders WHERE id = ?")
                .bind(order_id.0)
                .fetch_optional(&mut *tx)
                .await?;
            return Ok(match order.map(|r| r.get::<bool, _>(0)) {
                None => RemoveItemOutcome::OrderNotFound,
                Some(true) => RemoveItemOutcome::OrderFinished,
                Some(false) => RemoveItemOutcome::ItemNotFound,
            });
        };
        let product_id = line.get::<i64, _>(0);
        let restocked = line.get::<i64, _>(1);

        sqlx::query("UPDATE products SET amount = amount + ? WHERE id = ?")
            .bind(restocked)
            .bind(product_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(RemoveItemOutcome::Removed { restocked })
    }

    /// Stores freight, discount, sale and payment type. Returns `false` when the
    /// order is missing or already finished.
    pub async fn update_order_terms(&self, order_id: OrderId, terms: &OrderTerms) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE orders
             SET freight = ?, discount = ?, sale_type_id = ?, payment_type_id = ?
             WHERE id = ? AND finished = 0",
        )
        .bind(terms.freight)
        .bind(terms.discount)
        .bind(terms.sale_type_id.0)
        .bind(terms.payment_type_id.0)
        .bind(order_id.0)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Moves an open, non-empty order to finished, optionally recording the buyer.
    pub async fn finish_order(
        &self,
        order_id: OrderId,
        register_id: Option<RegisterId>,
        finished_at: DateTime<Utc>,
    ) -> Result<FinishOutcome> {
        match self.claim_finish(order_id, register_id, finished_at).await? {
            FinishClaim::Claimed(pending) => {
                pending.commit().await?;
                Ok(FinishOutcome::Finished)
            }
            FinishClaim::Refused(outcome) => Ok(outcome),
        }
    }

    /// Marks the order finished inside a transaction that stays open until the
    /// returned claim is committed. Other writers of the order wait on it, and
    /// once it commits they observe `AlreadyFinished`.
    pub async fn claim_finish(
        &self,
        order_id: OrderId,
        register_id: Option<RegisterId>,
        finished_at: DateTime<Utc>,
    ) -> Result<FinishClaim> {
        let mut tx = self.pool.begin().await?;

        let claimed = sqlx::query(&format!(
            "UPDATE orders
             SET finished = 1, finished_at = ?, register_id = COALESCE(?, register_id)
             WHERE id = ? AND finished = 0
               AND EXISTS (SELECT 1 FROM order_items WHERE order_id = orders.id)
             RETURNING {ORDER_COLUMNS}"
        ))
        .bind(finished_at)
        .bind(register_id.map(|id| id.0))
        .bind(order_id.0)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = claimed else {
            let order = sqlx::query("SELECT finished FROM orders WHERE id = ?")
                .bind(order_id.0)
                .fetch_optional(&mut *tx)
                .await?;
            return Ok(FinishClaim::Refused(
                match order.map(|r| r.get::<bool, _>(0)) {
                    None => FinishOutcome::OrderNotFound,
                    Some(true) => FinishOutcome::AlreadyFinished,
                    Some(false) => FinishOutcome::Empty,
                },
            ));
        };
        let order = order_from_row(&row);
        let lines = fetch_order_lines(&mut *tx, order_id).await?;

        Ok(FinishClaim::Claimed(PendingFinish { tx, order, lines }))
    }
}

async fn fetch_order_lines<'e, E>(executor: E, order_id: OrderId) -> Result<Vec<StoredOrderLine>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query(
        "SELECT i.id, i.product_id, p.name, i.amount, i.unit_price
         FROM order_items i
         INNER JOIN products p ON p.id = i.product_id
         WHERE i.order_id = ?
         ORDER BY i.id ASC",
    )
    .bind(order_id.0)
    .fetch_all(executor)
    .await?;
    Ok(rows
        .into_iter()
        .map(|r| StoredOrderLine {
            item_id: OrderItemId(r.get::<i64, _>(0)),
            product_id: ProductId(r.get::<i64, _>(1)),
            product_name: r.get::<String, _>(2),
            amount: r.get::<i64, _>(3),
            unit_price: r.get::<f64, _>(4),
        })
        .collect())
}

/// True when `err` comes from a UNIQUE constraint, such as two registrations
/// of the same CPF racing past the lookup.
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<sqlx::Error>(),
            Some(sqlx::Error::Database(db)) if db.is_unique_violation()
        )
    })
}

fn reference_table_name(table: ReferenceTable) -> &'static str {
    match table {
        ReferenceTable::Speciality => "specialities",
        ReferenceTable::SaleType => "sale_types",
        ReferenceTable::PaymentType => "payment_types",
    }
}

fn product_from_row(r: &SqliteRow) -> Product {
    Product {
        product_id: ProductId(r.get::<i64, _>(0)),
        name: r.get::<String, _>(1),
        price: r.get::<f64, _>(2),
        amount: r.get::<i64, _>(3),
        available: r.get::<bool, _>(4),
    }
}

fn order_from_row(r: &SqliteRow) -> StoredOrder {
    StoredOrder {
        order_id: OrderId(r.get::<i64, _>(0)),
        actor_id: r.get::<Option<i64>, _>(1).map(ActorId),
        register_id: r.get::<Option<i64>, _>(2).map(RegisterId),
        freight: r.get::<f64, _>(3),
        discount: r.get::<f64, _>(4),
        sale_type_id: r.get::<Option<i64>, _>(5).map(SaleTypeId),
        payment_type_id: r.get::<Option<i64>, _>(6).map(PaymentTypeId),
        finished: r.get::<bool, _>(7),
        created_at: r.get::<DateTime<Utc>, _>(8),
        finished_at: r.get::<Option<DateTime<Utc>>, _>(9),
    }
}

fn address_from_row(r: &SqliteRow) -> (Option<RegisterId>, Option<Address>) {
    let Some(register_id) = r.get::<Option<i64>, _>("register_id") else {
        return (None, None);
    };
    let address = Address {
        zip: r.get::<String, _>("zip"),
        city: r.get::<String, _>("city"),
        address: r.get::<String, _>("address"),
        district: r.get::<String, _>("district"),
    };
    (Some(RegisterId(register_id)), Some(address))
}

fn doctor_from_row(r: &SqliteRow) -> Doctor {
    let (register_id, address) = address_from_row(r);
    Doctor {
        doctor_id: DoctorId(r.get::<i64, _>("id")),
        profile: DoctorProfile {
            name: r.get::<String, _>("name"),
            cpf: r.get::<String, _>("cpf"),
            rg: r.get::<String, _>("rg"),
            crm: r.get::<String, _>("crm"),
            cel: r.get::<String, _>("cel"),
            phone: r.get::<String, _>("phone"),
            email: r.get::<String, _>("email"),
            speciality_id: SpecialityId(r.get::<i64, _>("speciality_id")),
        },
        register_id,
        address,
    }
}

fn institution_from_row(r: &SqliteRow) -> Institution {
    let (register_id, address) = address_from_row(r);
    Institution {
        institution_id: InstitutionId(r.get::<i64, _>("id")),
        profile: InstitutionProfile {
            name: r.get::<String, _>("name"),
            cnpj: r.get::<String, _>("cnpj"),
            administration: Contact {
                name: r.get::<Option<String>, _>("adm_name"),
                email: r.get::<Option<String>, _>("adm_email"),
                cel: r.get::<Option<String>, _>("adm_cel"),
                phone: r.get::<Option<String>, _>("adm_phone"),
            },
            nursing: Contact {
                name: r.get::<Option<String>, _>("enf_name"),
                email: r.get::<Option<String>, _>("enf_email"),
                cel: r.get::<Option<String>, _>("enf_cel"),
                phone: r.get::<Option<String>, _>("enf_phone"),
            },
        },
        register_id,
        address,
    }
}

fn registrant_ref_from_row(r: &SqliteRow) -> RegistrantRef {
    let doctor_id = r.get::<Option<i64>, _>(1);
    let institution_id = r.get::<Option<i64>, _>(2);
    let (kind, registrant_id) = match (doctor_id, institution_id) {
        (Some(id), _) => (RegistrantKind::Doctor, id),
        (None, id) => (RegistrantKind::Institution, id.unwrap_or_default()),
    };
    RegistrantRef {
        register_id: RegisterId(r.get::<i64, _>(0)),
        kind,
        registrant_id,
        name: r.get::<String, _>(3),
    }
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    if parent.as_os_str().is_empty() {
        return Ok(());
    }

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url.starts_with("sqlite::memory:") || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
