//! HTTP request handlers

pub mod attendance;
pub mod auth;
pub mod display_file;
pub mod employee;
pub mod expense;
pub mod health;
pub mod inquiry;
pub mod inspection;
pub mod machine;
pub mod order;
pub mod upload;

pub use attendance::*;
pub use auth::*;
pub use display_file::*;
pub use employee::*;
pub use expense::*;
pub use health::*;
pub use inquiry::*;
pub use inspection::*;
pub use machine::*;
pub use order::*;
pub use upload::*;

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Local;
use serde::Deserialize;

use shared::types::Pagination;

/// `page` and `per_page` query parameters
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

impl PageQuery {
    pub fn pagination(&self) -> Pagination {
        Pagination::from_query(self.page, self.per_page)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct YearQuery {
    pub year: Option<i32>,
}

/// CSV download named `{stem}_{YYYYMMDD_HHMMSS}.csv`
pub fn csv_attachment(stem: &str, body: String) -> Response {
    let disposition = format!(
        "attachment; filename=\"{}_{}.csv\"",
        stem,
        Local::now().format("%Y%m%d_%H%M%S")
    );

    let mut response = (StatusCode::OK, body).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/csv; charset=utf-8"),
    );
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    response
}
