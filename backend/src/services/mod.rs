//! Business logic services for the factory OA platform

pub mod attendance;
pub mod auth;
pub mod device;
pub mod display_file;
pub mod employee;
pub mod expense;
pub mod export;
pub mod inquiry;
pub mod inspection;
pub mod machine;
pub mod order;
pub mod storage;
pub mod totp;

pub use attendance::AttendanceService;
pub use auth::AuthService;
pub use display_file::DisplayFileService;
pub use employee::EmployeeService;
pub use expense::ExpenseService;
pub use inquiry::InquiryService;
pub use inspection::InspectionService;
pub use machine::MachineService;
pub use order::OrderService;
pub use storage::Storage;
