pub mod gate;

pub use gate::IdempotencyGate;
