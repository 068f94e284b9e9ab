//! Customer records (admin only).
//!
//! Customers live in the `users` table with `role = 'customer'` and no
//! password, so they can never log in.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use axum_extra::extract::WithRejection;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::auth::AdminUser;
use super::error::{ApiError, ValidationErrorBuilder};
use super::response::{page_params, ApiResponse, Pagination};
use super::validation::{
    normalize_customer_status, normalize_email, validate_email, validate_non_negative,
    validate_optional_text, validate_phone, validate_user_name,
};
use crate::db::{self, CreateCustomerRequest, CustomerResponse, UpdateCustomerRequest, User};
use crate::{AppState, DbPool};

const DEFAULT_PAGE_SIZE: i64 = 10;

#[derive(Debug, Deserialize)]
pub struct CustomerListQuery {
    pub search: Option<String>,
    pub status: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerStats {
    pub total_customers: i64,
    pub active_customers: i64,
    pub inactive_customers: i64,
}

/// Escape `%`, `_` and the escape character itself for a LIKE pattern
fn like_pattern(search: &str) -> String {
    let mut escaped = String::with_capacity(search.len() + 2);
    escaped.push('%');
    for c in search.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

fn validate_common(
    errors: &mut ValidationErrorBuilder,
    phone: &Option<String>,
    location: &Option<String>,
    company: &Option<String>,
    notes: &Option<String>,
    total_spent: Option<f64>,
    orders: Option<i64>,
) {
    errors.check("phone", validate_phone(phone));
    errors.check("location", validate_optional_text("Location", location, 100));
    errors.check("company", validate_optional_text("Company", company, 100));
    errors.check("notes", validate_optional_text("Notes", notes, 1000));
    errors.check("totalSpent", validate_non_negative("Total spent", total_spent));
    errors.check("orders", validate_non_negative("Orders", orders.map(|o| o as f64)));
}

async fn find_customer(pool: &DbPool, id: &str) -> Result<User, ApiError> {
    sqlx::query_as("SELECT * FROM users WHERE id = ? AND role = 'customer'")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Customer not found"))
}

async fn email_taken(pool: &DbPool, email: &str, except_id: Option<&str>) -> Result<bool, sqlx::Error> {
    let row: Option<(String,)> = sqlx::query_as("SELECT id FROM users WHERE email = ? AND id != ?")
        .bind(email)
        .bind(except_id.unwrap_or(""))
        .fetch_optional(pool)
        .await?;
    Ok(row.is_some())
}

fn trimmed(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// List customers created by the calling admin
pub async fn list_customers(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    WithRejection(Query(query), _): WithRejection<Query<CustomerListQuery>, ApiError>,
) -> Result<ApiResponse<Vec<CustomerResponse>>, ApiError> {
    let (page, limit) = page_params(query.page, query.limit, DEFAULT_PAGE_SIZE);
    let offset = (page - 1) * limit;

    let search = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty());
    let status = query
        .status
        .as_deref()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty());

    let mut filter = String::from("WHERE role = 'customer' AND created_by = ?");
    if search.is_some() {
        filter.push_str(r" AND (name LIKE ? ESCAPE '\' OR email LIKE ? ESCAPE '\')");
    }
    if status.is_some() {
        filter.push_str(" AND status = ?");
    }

    let list_sql = format!("SELECT * FROM users {} ORDER BY created_at DESC LIMIT ? OFFSET ?", filter);
    let count_sql = format!("SELECT COUNT(*) FROM users {}", filter);
    let mut list = sqlx::query_as::<_, User>(&list_sql).bind(&admin.id);
    let mut count = sqlx::query_as::<_, (i64,)>(&count_sql).bind(&admin.id);

    if let Some(search) = search {
        let pattern = like_pattern(search);
        list = list.bind(pattern.clone()).bind(pattern.clone());
        count = count.bind(pattern.clone()).bind(pattern);
    }
    if let Some(status) = &status {
        list = list.bind(status);
        count = count.bind(status);
    }

    let customers = list.bind(limit).bind(offset).fetch_all(&state.db).await?;
    let (total,) = count.fetch_one(&state.db).await?;

    let customers: Vec<CustomerResponse> = customers.into_iter().map(CustomerResponse::from).collect();
    Ok(ApiResponse::ok(customers).with_pagination(Pagination::new(page, limit, total)))
}

pub async fn get_customer(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Path(id): Path<String>,
) -> Result<ApiResponse<CustomerResponse>, ApiError> {
    let customer = find_customer(&state.db, &id).await?;
    Ok(ApiResponse::ok(CustomerResponse::from(customer)))
}

pub async fn create_customer(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    WithRejection(Json(request), _): WithRejection<Json<CreateCustomerRequest>, ApiError>,
) -> Result<ApiResponse<CustomerResponse>, ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    errors.check("name", validate_user_name(&request.name));
    errors.check("email", validate_email(&request.email));
    validate_common(
        &mut errors,
        &request.phone,
        &request.location,
        &request.company,
        &request.notes,
        request.total_spent,
        request.orders,
    );
    let status = match normalize_customer_status(&request.status) {
        Ok(s) => s,
        Err(e) => {
            errors.add("status", e);
            String::new()
        }
    };
    errors.finish()?;

    let email = normalize_email(&request.email);
    if email_taken(&state.db, &email, None).await? {
        return Err(ApiError::conflict("Customer with this email already exists"));
    }

    let id = uuid::Uuid::new_v4().to_string();
    let now = db::now();
    let orders = request.orders.unwrap_or(0);

    sqlx::query(
        r#"
        INSERT INTO users (
            id, name, email, role, provider, phone, location, company, notes, status,
            total_spent, orders, visits, created_by, created_at, updated_at
        ) VALUES (?, ?, ?, 'customer', 'local', ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(request.name.trim())
    .bind(&email)
    .bind(trimmed(request.phone))
    .bind(trimmed(request.location))
    .bind(trimmed(request.company))
    .bind(trimmed(request.notes))
    .bind(&status)
    .bind(request.total_spent.unwrap_or(0.0))
    .bind(orders)
    // Visits start out equal to the order count
    .bind(orders)
    .bind(&admin.id)
    .bind(&now)
    .bind(&now)
    .execute(&state.db)
    .await?;

    tracing::info!(customer_id = %id, admin_id = %admin.id, "Created customer");

    let customer = find_customer(&state.db, &id).await?;
    Ok(ApiResponse::created(
        "Customer created successfully",
        CustomerResponse::from(customer),
    ))
}

/// Partial update; an `orders` change also resets `visits` to match
pub async fn update_customer(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Path(id): Path<String>,
    WithRejection(Json(request), _): WithRejection<Json<UpdateCustomerRequest>, ApiError>,
) -> Result<ApiResponse<CustomerResponse>, ApiError> {
    let customer = find_customer(&state.db, &id).await?;

    let mut errors = ValidationErrorBuilder::new();
    if let Some(name) = &request.name {
        errors.check("name", validate_user_name(name));
    }
    if let Some(email) = &request.email {
        errors.check("email", validate_email(email));
    }
    validate_common(
        &mut errors,
        &request.phone,
        &request.location,
        &request.company,
        &request.notes,
        request.total_spent,
        request.orders,
    );
    let status = match &request.status {
        Some(_) => match normalize_customer_status(&request.status) {
            Ok(s) => Some(s),
            Err(e) => {
                errors.add("status", e);
                None
            }
        },
        None => None,
    };
    errors.finish()?;

    let email = request.email.as_deref().map(normalize_email);
    if let Some(email) = &email {
        if email_taken(&state.db, email, Some(id.as_str())).await? {
            return Err(ApiError::conflict("Customer with this email already exists"));
        }
    }

    let name = request
        .name
        .map(|n| n.trim().to_string())
        .unwrap_or(customer.name);
    let orders = request.orders.unwrap_or(customer.orders);
    let visits = if request.orders.is_some() {
        orders
    } else {
        customer.visits
    };

    sqlx::query(
        r#"
        UPDATE users SET
            name = ?, email = ?, phone = ?, location = ?, company = ?, notes = ?, status = ?,
            total_spent = ?, orders = ?, visits = ?, updated_at = ?
        WHERE id = ? AND role = 'customer'
        "#,
    )
    .bind(&name)
    .bind(email.unwrap_or(customer.email))
    .bind(trimmed(request.phone).or(customer.phone))
    .bind(trimmed(request.location).or(customer.location))
    .bind(trimmed(request.company).or(customer.company))
    .bind(trimmed(request.notes).or(customer.notes))
    .bind(status.or(customer.status))
    .bind(request.total_spent.unwrap_or(customer.total_spent))
    .bind(orders)
    .bind(visits)
    .bind(db::now())
    .bind(&id)
    .execute(&state.db)
    .await?;

    tracing::info!(customer_id = %id, "Updated customer");

    let customer = find_customer(&state.db, &id).await?;
    Ok(ApiResponse::ok(CustomerResponse::from(customer)).with_message("Customer updated successfully"))
}

/// Customers are hard-deleted
pub async fn delete_customer(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Path(id): Path<String>,
) -> Result<ApiResponse<()>, ApiError> {
    let result = sqlx::query("DELETE FROM users WHERE id = ? AND role = 'customer'")
        .bind(&id)
        .execute(&state.db)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Customer not found"));
    }

    tracing::info!(customer_id = %id, "Deleted customer");
    Ok(ApiResponse::message("Customer deleted successfully"))
}

/// Totals across every stored customer
pub async fn customer_stats(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
) -> Result<ApiResponse<CustomerStats>, ApiError> {
    let (total, active, inactive): (i64, i64, i64) = sqlx::query_as(
        r#"
        SELECT COUNT(*),
               COALESCE(SUM(CASE WHEN COALESCE(status, 'active') = 'active' THEN 1 ELSE 0 END), 0),
               COALESCE(SUM(CASE WHEN status = 'inactive' THEN 1 ELSE 0 END), 0)
        FROM users WHERE role = 'customer'
        "#,
    )
    .fetch_one(&state.db)
    .await?;

    Ok(ApiResponse::ok(CustomerStats {
        total_customers: total,
        active_customers: active,
        inactive_customers: inactive,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("ada"), "%ada%");
        assert_eq!(like_pattern("50%_off"), r"%50\%\_off%");
        assert_eq!(like_pattern(r"a\b"), r"%a\\b%");
    }

    #[test]
    fn test_trimmed_drops_blank_values() {
        assert_eq!(trimmed(Some("  Lisbon ".to_string())).as_deref(), Some("Lisbon"));
        assert_eq!(trimmed(Some("   ".to_string())), None);
        assert_eq!(trimmed(None), None);
    }

    #[test]
    fn test_common_validation_collects_errors() {
        let mut errors = ValidationErrorBuilder::new();
        validate_common(
            &mut errors,
            &Some("not a phone".to_string()),
            &None,
            &None,
            &None,
            Some(-5.0),
            Some(-1),
        );
        let err = errors.build().unwrap();
        assert!(err.message().contains("3 fields"));
    }
}
