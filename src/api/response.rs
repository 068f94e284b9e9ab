//! Success envelope shared by every JSON endpoint.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Pagination fields reported next to `data` on list endpoints
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct PageInfo {
    pub count: usize,
    pub total: i64,
    pub page: i64,
    pub pages: i64,
}

impl PageInfo {
    pub fn new(count: usize, total: i64, page: i64, limit: i64) -> Self {
        Self {
            count,
            total,
            page,
            pages: page_count(total, limit),
        }
    }
}

/// Nested pagination block, used by the customer listing
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub pages: i64,
}

impl Pagination {
    pub fn new(page: i64, limit: i64, total: i64) -> Self {
        Self {
            page,
            limit,
            total,
            pages: page_count(total, limit),
        }
    }
}

pub fn page_count(total: i64, limit: i64) -> i64 {
    if limit <= 0 {
        return 0;
    }
    (total + limit - 1) / limit
}

/// Clamp `page`/`limit` query values to sane positive numbers
pub fn page_params(page: Option<i64>, limit: Option<i64>, default_limit: i64) -> (i64, i64) {
    let page = page.filter(|p| *p > 0).unwrap_or(1);
    let limit = limit.filter(|l| *l > 0).unwrap_or(default_limit).min(100);
    (page, limit)
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    #[serde(skip)]
    status: StatusCode,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    total: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    page: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pages: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pagination: Option<Pagination>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            status: StatusCode::OK,
            success: true,
            message: None,
            count: None,
            total: None,
            page: None,
            pages: None,
            pagination: None,
            data: Some(data),
        }
    }

    /// 201 with a message, for resource creation
    pub fn created(message: impl Into<String>, data: T) -> Self {
        Self::ok(data)
            .with_status(StatusCode::CREATED)
            .with_message(message)
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_count(mut self, count: usize) -> Self {
        self.count = Some(count);
        self
    }

    pub fn with_page(mut self, info: PageInfo) -> Self {
        self.count = Some(info.count);
        self.total = Some(info.total);
        self.page = Some(info.page);
        self.pages = Some(info.pages);
        self
    }

    pub fn with_pagination(mut self, pagination: Pagination) -> Self {
        self.pagination = Some(pagination);
        self
    }
}

impl ApiResponse<()> {
    /// Envelope without a `data` field
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::OK,
            success: true,
            message: Some(message.into()),
            count: None,
            total: None,
            page: None,
            pages: None,
            pagination: None,
            data: None,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_page_count() {
        assert_eq!(page_count(0, 10), 0);
        assert_eq!(page_count(10, 10), 1);
        assert_eq!(page_count(11, 10), 2);
        assert_eq!(page_count(5, 0), 0);
    }

    #[test]
    fn test_page_params() {
        assert_eq!(page_params(None, None, 10), (1, 10));
        assert_eq!(page_params(Some(0), Some(-4), 10), (1, 10));
        assert_eq!(page_params(Some(3), Some(500), 10), (3, 100));
    }

    #[test]
    fn test_list_envelope() {
        let body = ApiResponse::ok(json!({ "campaigns": [] }))
            .with_page(PageInfo::new(0, 25, 2, 10));
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["success"], true);
        assert_eq!(value["total"], 25);
        assert_eq!(value["pages"], 3);
        assert!(value.get("message").is_none());
        assert!(value.get("pagination").is_none());
    }

    #[test]
    fn test_message_only_envelope() {
        let value = serde_json::to_value(ApiResponse::message("Done")).unwrap();
        assert_eq!(value, json!({ "success": true, "message": "Done" }));
    }
}
