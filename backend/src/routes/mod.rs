//! Route definitions for the factory OA platform
//!
//! Routes fall into three groups: public, authenticated and admin-only.
//! Paths shared between groups split per method, with the admin guard
//! layered on the admin methods only.

use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};

use crate::{
    handlers,
    middleware::{admin_middleware, auth_middleware},
    AppState,
};

/// Create API routes
pub fn api_routes(state: AppState) -> Router<AppState> {
    let protected = Router::new()
        .merge(auth_routes())
        .merge(admin_routes().route_layer(middleware::from_fn(admin_middleware)))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware));

    public_routes().merge(protected)
}

/// Routes reachable without a token
fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(handlers::health_check))
        // Login and enrollment
        .route("/auth/init-admin", post(handlers::init_admin))
        .route("/auth/totp-qr", post(handlers::totp_qr))
        .route("/auth/verify-totp", post(handlers::verify_totp))
        .route("/auth/login", post(handlers::login))
        .route("/auth/refresh", post(handlers::refresh))
        // Punch page
        .route("/employees/:emp_id/basic-info", get(handlers::get_basic_info))
        .route("/attendance/clock-in", post(handlers::clock_in))
        .route("/attendance/device-change", post(handlers::request_device_change))
        // Office screens
        .route("/display-files/:file_id/images", get(handlers::get_display_images))
}

/// Routes for any logged-in employee
fn auth_routes() -> Router<AppState> {
    let admin_only = || middleware::from_fn(admin_middleware);

    Router::new()
        .route("/auth/me", get(handlers::me))
        // Employees
        .route(
            "/employees/:emp_id",
            get(handlers::get_employee).merge(
                put(handlers::update_employee)
                    .delete(handlers::delete_employee)
                    .route_layer(admin_only()),
            ),
        )
        .route("/employees/:emp_id/remarks", put(handlers::update_remarks))
        // Orders
        .route("/orders", get(handlers::list_orders).post(handlers::create_order))
        .route("/orders/statistics", get(handlers::order_statistics))
        .route("/orders/export", get(handlers::export_orders))
        .route("/orders/expense-summary", get(handlers::order_expense_summary))
        .route(
            "/orders/update-proportionate-cost",
            post(handlers::update_proportionate_cost),
        )
        .route(
            "/orders/:order_id",
            get(handlers::get_order)
                .put(handlers::update_order)
                .delete(handlers::delete_order),
        )
        .route(
            "/orders/:order_id/individual-expenses",
            get(handlers::list_individual_expenses).post(handlers::add_individual_expense),
        )
        .route(
            "/orders/:order_id/individual-expenses/:expense_id",
            put(handlers::update_individual_expense).delete(handlers::delete_individual_expense),
        )
        // Inspections
        .route(
            "/inspections",
            get(handlers::list_inspections).post(handlers::create_inspection),
        )
        .route(
            "/inspections/:inspection_id",
            get(handlers::get_inspection)
                .merge(delete(handlers::delete_inspection).route_layer(admin_only())),
        )
        .route(
            "/inspections/:inspection_id/remarks",
            put(handlers::update_inspection_remarks),
        )
        .route(
            "/inspections/:inspection_id/progress",
            get(handlers::get_inspection_progress),
        )
        .route(
            "/inspections/:inspection_id/report",
            get(handlers::get_inspection_report),
        )
        .route(
            "/inspections/:inspection_id/stage",
            put(handlers::set_inspection_stage),
        )
        .route(
            "/inspections/:inspection_id/stage-logs",
            get(handlers::list_stage_logs),
        )
        .route(
            "/inspections/:inspection_id/items",
            post(handlers::create_inspection_item),
        )
        .route(
            "/inspections/:inspection_id/items/batch",
            post(handlers::batch_inspection_items),
        )
        .route(
            "/inspections/:inspection_id/items/:item_id",
            put(handlers::update_inspection_item).delete(handlers::delete_inspection_item),
        )
        // Uploads
        .route("/uploads", post(handlers::upload_file))
        .route("/uploads/move", post(handlers::move_file))
        .route("/uploads/delete", post(handlers::delete_file))
        .route("/uploads/chunk", post(handlers::upload_chunk))
        // Display files
        .route(
            "/display-files",
            get(handlers::list_display_files)
                .merge(post(handlers::upload_display_file).route_layer(admin_only())),
        )
        .route(
            "/display-files/:file_id",
            get(handlers::get_display_file)
                .merge(delete(handlers::delete_display_file).route_layer(admin_only())),
        )
        // Machine and part catalog
        .route(
            "/machines",
            get(handlers::list_machines)
                .merge(post(handlers::create_machine).route_layer(admin_only())),
        )
        .route("/machines/export", get(handlers::export_machines))
        .route(
            "/machines/:model",
            get(handlers::get_machine).merge(
                put(handlers::update_machine)
                    .delete(handlers::delete_machine)
                    .route_layer(admin_only()),
            ),
        )
        .route(
            "/parts",
            get(handlers::list_parts)
                .merge(post(handlers::create_part).route_layer(admin_only())),
        )
        .route("/parts/export", get(handlers::export_parts))
        .route(
            "/parts/:part_type_id",
            get(handlers::get_part).merge(
                put(handlers::update_part)
                    .delete(handlers::delete_part)
                    .route_layer(admin_only()),
            ),
        )
        // Inquiries
        .route(
            "/inquiries",
            get(handlers::list_inquiries).post(handlers::create_inquiry),
        )
        .route("/inquiries/stats", get(handlers::inquiry_stats))
        .route(
            "/inquiries/:inquiry_id",
            get(handlers::get_inquiry)
                .put(handlers::update_inquiry)
                .delete(handlers::delete_inquiry),
        )
        .route(
            "/inquiries/:inquiry_id/communications",
            get(handlers::list_communications).post(handlers::add_communication),
        )
        .route(
            "/inquiries/:inquiry_id/communications/:communication_id",
            put(handlers::update_communication).delete(handlers::delete_communication),
        )
}

/// Routes restricted to administrators
fn admin_routes() -> Router<AppState> {
    Router::new()
        // Employees
        .route(
            "/employees",
            get(handlers::list_employees).post(handlers::create_employee),
        )
        .route(
            "/employees/:emp_id/unbind-device",
            post(handlers::unbind_device),
        )
        // Attendance
        .route(
            "/attendance/device-change/:record_id/approve",
            post(handlers::approve_device_change),
        )
        .route(
            "/attendance/device-change/:record_id/reject",
            post(handlers::reject_device_change),
        )
        .route("/attendance/records", get(handlers::list_punch_records))
        .route("/attendance/records/export", get(handlers::export_punch_records))
        .route("/attendance/devices", get(handlers::list_devices))
        .route("/attendance/devices/replace", post(handlers::replace_device))
        .route(
            "/attendance/devices/:temp_emp_id",
            delete(handlers::delete_temp_device),
        )
        // Expenses
        .route(
            "/expenses",
            get(handlers::list_expenses).post(handlers::create_expense),
        )
        .route("/expenses/allocations", get(handlers::list_allocations))
        .route(
            "/expenses/calculation-records",
            get(handlers::list_calculation_records),
        )
        .route("/expenses/calculate", post(handlers::calculate))
        .route("/expenses/summary/:year", get(handlers::expense_summary))
        .route(
            "/expenses/annual-targets/:year",
            get(handlers::get_annual_target).put(handlers::set_annual_target),
        )
        .route(
            "/expenses/:expense_id",
            get(handlers::get_expense)
                .put(handlers::update_expense)
                .delete(handlers::delete_expense),
        )
        // Catalog imports
        .route("/machines/import", post(handlers::import_machines_file))
        .route("/machines/import-json", post(handlers::import_machines_json))
        .route("/parts/import-json", post(handlers::import_parts_json))
        // Inquiry audit log
        .route("/inquiry-logs", get(handlers::list_inquiry_logs))
}
