pub mod orchestrator;
pub mod payment_saga;
pub mod sweeper;

pub use orchestrator::{SagaOrchestrator, SagaResumer, SagaStepDef};
pub use payment_saga::{
    initial_context, AuthorizePaymentStep, CompleteOrderStep, ConfirmPaymentStep, PaymentSagaInput,
    ReserveCreditStep,
};
pub use sweeper::SagaSweeper;
