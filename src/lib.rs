//! CKKS homomorphic evaluation engine for privacy-preserving scoring.

#![forbid(unsafe_code)]
#![warn(clippy::pedantic, missing_docs)]

pub mod error;
pub mod modulus;
pub mod ntt;
pub mod polynomial;
pub mod sampling;
pub mod encoding;
pub mod params;
pub mod keys;
pub mod cipher;
pub mod context;
pub mod algebra;
pub mod evaluator;
pub mod noise;
pub mod audit;
pub mod service;
pub mod config;

pub use algebra::CkksAlgebra;
pub use audit::{AuditEvent, AuditSink, FingerprintKey, MemoryAuditSink, TracingAuditSink};
pub use cipher::{Ciphertext, ContextId};
pub use config::{load_config, AppConfig};
pub use context::{create_context, export_context, import_context, SchemeContext};
pub use error::{ErrorKind, HeError, Result};
pub use evaluator::{evaluate, evaluate_plain, PolynomialSpec, LOAN_COEFFICIENTS};
pub use noise::{add_noise, NoiseParams};
pub use params::SchemeParameters;
pub use service::{
    EvaluationRequest, EvaluationResponse, EvaluationService, Identity, Payload, PolicyDecision,
    PolynomialChoice, SessionContext,
};
