//! Recursive distillation

mod distiller;

pub use distiller::{DISTILLER_WORKER, DistillConfig, Distiller, is_noteworthy};
