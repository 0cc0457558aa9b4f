//! The per-check scheduling machinery

mod escalate;
mod runner;
mod scheduler;
mod status;

pub use escalate::{render_body, render_subject, Escalator, Notifier};
pub use runner::{JobRunner, K8sJobRunner};
pub use scheduler::CheckScheduler;
pub use status::{CrdStatusSink, StatusSink};
