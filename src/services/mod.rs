pub mod order_service;
pub mod payment_service;
pub mod refund_service;

pub use order_service::OrderService;
pub use payment_service::PaymentService;
pub use refund_service::RefundService;
