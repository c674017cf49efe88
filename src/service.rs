//! Evaluation service: request validation, evaluation, serialization and audit hand-off.
//!
//! The session's scheme context sits behind a readers-writer lock. An evaluation holds
//! the read guard for its whole run; (re)initialisation builds keys outside the lock and
//! swaps them in under the write guard, so it waits for in-flight evaluations.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::audit::{AuditEvent, AuditSink, FingerprintKey};
use crate::cipher::{Ciphertext, ContextId};
use crate::context::SchemeContext;
use crate::error::{ErrorKind, HeError, Result};
use crate::evaluator::{evaluate, PolynomialSpec};
use crate::noise::{add_noise_with_rng, NoiseParams};
use crate::params::SchemeParameters;
use crate::sampling::secure_rng;

const EVALUATE_ACTION: &str = "evaluate";

/// Input to evaluate: a serialized ciphertext or plaintext values.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    Encrypted(Vec<u8>),
    Plain(Vec<f64>),
}

impl Payload {
    /// Encrypted payload from its base64 transport form.
    pub fn encrypted_base64(encoded: &str) -> Result<Self> {
        STANDARD
            .decode(encoded.trim())
            .map(Payload::Encrypted)
            .map_err(|e| HeError::DeserializationError(format!("invalid base64: {e}")))
    }

    fn fingerprint(&self, key: &FingerprintKey) -> String {
        match self {
            Payload::Encrypted(bytes) => key.fingerprint_bytes(bytes),
            Payload::Plain(values) => key.fingerprint_values(values),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PolynomialChoice {
    Coefficients(Vec<f64>),
    Preset(String),
}

impl PolynomialChoice {
    fn resolve(&self) -> Result<PolynomialSpec> {
        match self {
            PolynomialChoice::Coefficients(c) => PolynomialSpec::new(c.clone()),
            PolynomialChoice::Preset(name) => PolynomialSpec::preset(name),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRequest {
    pub payload: Payload,
    pub polynomial: PolynomialChoice,
    /// Request a noised plaintext preview of the result.
    pub preview: Option<NoiseParams>,
}

/// Encrypted result plus optional noised preview.
#[derive(Clone, Debug)]
pub struct EvaluationResult {
    pub encrypted_result: Ciphertext,
    pub plain_preview: Option<Vec<f64>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResponse {
    pub evaluation_id: String,
    pub encrypted_result: Vec<u8>,
    pub plain_preview: Option<Vec<f64>>,
}

impl EvaluationResponse {
    pub fn encrypted_result_base64(&self) -> String {
        STANDARD.encode(&self.encrypted_result)
    }
}

/// Per-request progress.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EvaluationState {
    Received,
    ContextResolved,
    Decoded,
    Evaluated,
    Serialized,
    Completed,
    Failed(ErrorKind),
}

/// Pre-validated caller identity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub actor_id: String,
    pub roles: Vec<String>,
}

impl Identity {
    pub fn new(actor_id: impl Into<String>, roles: &[&str]) -> Self {
        Self {
            actor_id: actor_id.into(),
            roles: roles.iter().map(|r| (*r).to_string()).collect(),
        }
    }
}

/// Outcome of the external policy check.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolicyDecision {
    Allow,
    Deny,
}

/// Session-scoped scheme context and the key for audit fingerprints.
#[derive(Debug, Default)]
pub struct SessionContext {
    inner: RwLock<Option<Arc<SchemeContext>>>,
    fingerprint_key: FingerprintKey,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create fresh keys and make them the session context.
    pub fn initialize(&self, params: SchemeParameters) -> Result<ContextId> {
        let ctx = SchemeContext::create(params)?;
        Ok(self.replace(ctx))
    }

    /// Install a client-supplied context blob.
    pub fn import(&self, serialized: &[u8]) -> Result<ContextId> {
        let ctx = SchemeContext::import(serialized)?;
        Ok(self.replace(ctx))
    }

    /// Generate Galois keys for `steps` and attach them to the current context.
    pub fn attach_galois_keys(&self, steps: &[i64]) -> Result<()> {
        let current = self.current()?;
        let keys = current.generate_galois_keys(steps)?;
        let mut updated = (*current).clone();
        updated.attach_galois_keys(keys);

        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(ctx) if ctx.id() == current.id() => {
                *guard = Some(Arc::new(updated));
                Ok(())
            }
            _ => Err(HeError::ContextNotReady),
        }
    }

    /// Export the current context.
    pub fn export(&self, include_secret_key: bool) -> Result<Vec<u8>> {
        self.current()?.export(include_secret_key)
    }

    pub fn fingerprint_key(&self) -> &FingerprintKey {
        &self.fingerprint_key
    }

    /// Shared handle on the current context.
    pub fn current(&self) -> Result<Arc<SchemeContext>> {
        self.read().clone().ok_or(HeError::ContextNotReady)
    }

    fn read(&self) -> RwLockReadGuard<'_, Option<Arc<SchemeContext>>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn replace(&self, ctx: SchemeContext) -> ContextId {
        let id = ctx.id();
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Some(Arc::new(ctx));
        debug!(context_id = %id, "session context replaced");
        id
    }
}

/// validate → decode → evaluate → serialize → audit.
pub struct EvaluationService {
    session: Arc<SessionContext>,
    audit: Arc<dyn AuditSink>,
}

impl EvaluationService {
    pub fn new(session: Arc<SessionContext>, audit: Arc<dyn AuditSink>) -> Self {
        Self { session, audit }
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    /// Run one request. Every outcome is audited; audit failures are only logged.
    pub fn evaluate(
        &self,
        identity: &Identity,
        decision: PolicyDecision,
        request: &EvaluationRequest,
    ) -> Result<EvaluationResponse> {
        let evaluation_id = format!("eval_{}", secure_rng().gen_range(100_000..=999_999));
        let fingerprint = request.payload.fingerprint(self.session.fingerprint_key());
        let mut tracker = StateTracker::new(&evaluation_id);

        let outcome = self.run(identity, decision, request, &mut tracker);
        let status = match &outcome {
            Ok(_) => {
                tracker.advance(EvaluationState::Completed);
                "completed".to_string()
            }
            Err(e) => {
                tracker.advance(EvaluationState::Failed(e.kind()));
                format!("failed:{}", e.kind())
            }
        };
        self.record(&AuditEvent::new(
            identity.actor_id.clone(),
            EVALUATE_ACTION,
            status,
            format!("evaluation_id={evaluation_id} fingerprint={fingerprint}"),
        ));

        let (result, encrypted_result) = outcome?;
        info!(
            evaluation_id = %evaluation_id,
            fingerprint = %fingerprint,
            level = result.encrypted_result.level(),
            preview = result.plain_preview.is_some(),
            "evaluation completed"
        );
        Ok(EvaluationResponse {
            evaluation_id,
            encrypted_result,
            plain_preview: result.plain_preview,
        })
    }

    fn run(
        &self,
        identity: &Identity,
        decision: PolicyDecision,
        request: &EvaluationRequest,
        tracker: &mut StateTracker,
    ) -> Result<(EvaluationResult, Vec<u8>)> {
        if decision == PolicyDecision::Deny {
            return Err(HeError::AccessDenied(identity.actor_id.clone()));
        }
        let spec = request.polynomial.resolve()?;

        let guard = self.session.read();
        let ctx = guard.as_deref().ok_or(HeError::ContextNotReady)?;
        tracker.advance(EvaluationState::ContextResolved);

        let x = match &request.payload {
            Payload::Encrypted(bytes) => {
                if bytes.is_empty() {
                    return Err(HeError::DeserializationError("missing ciphertext".into()));
                }
                ctx.parse_ciphertext(bytes)?
            }
            Payload::Plain(values) => {
                if values.is_empty() || values.len() > ctx.max_slots() {
                    return Err(HeError::invalid(format!(
                        "plain payload must hold between 1 and {} values",
                        ctx.max_slots()
                    )));
                }
                if let Some(v) = values.iter().find(|v| !v.is_finite()) {
                    return Err(HeError::invalid(format!("non-finite input value {v}")));
                }
                ctx.encrypt(values)?
            }
        };
        tracker.advance(EvaluationState::Decoded);

        let encrypted_result = evaluate(ctx, &x, spec.coefficients())?;
        tracker.advance(EvaluationState::Evaluated);

        let bytes = encrypted_result.to_bytes()?;
        tracker.advance(EvaluationState::Serialized);

        let plain_preview = match request.preview {
            None => None,
            Some(params) => {
                if !ctx.has_secret_key() {
                    return Err(HeError::DecryptionError(
                        "preview requested but the session holds no secret key".into(),
                    ));
                }
                let values = ctx.decrypt(&encrypted_result)?;
                Some(add_noise_with_rng(&values, params, &mut secure_rng())?)
            }
        };

        Ok((
            EvaluationResult {
                encrypted_result,
                plain_preview,
            },
            bytes,
        ))
    }

    fn record(&self, event: &AuditEvent) {
        if let Err(err) = self.audit.record(event) {
            warn!(error = %err, action = %event.action, "audit sink rejected event");
        }
    }
}

struct StateTracker<'a> {
    evaluation_id: &'a str,
    state: EvaluationState,
}

impl<'a> StateTracker<'a> {
    fn new(evaluation_id: &'a str) -> Self {
        debug!(evaluation_id, state = ?EvaluationState::Received, "evaluation state");
        Self {
            evaluation_id,
            state: EvaluationState::Received,
        }
    }

    fn advance(&mut self, next: EvaluationState) {
        debug!(
            evaluation_id = self.evaluation_id,
            from = ?self.state,
            to = ?next,
            "evaluation state"
        );
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditError, MemoryAuditSink};
    use crate::evaluator::LOAN_COEFFICIENTS;

    fn params() -> SchemeParameters {
        SchemeParameters::new(1024, vec![60, 40, 60], 2f64.powi(30))
    }

    fn service() -> (EvaluationService, Arc<MemoryAuditSink>) {
        let session = Arc::new(SessionContext::new());
        session.initialize(params()).unwrap();
        let sink = Arc::new(MemoryAuditSink::default());
        (EvaluationService::new(session, sink.clone()), sink)
    }

    fn alice() -> Identity {
        Identity::new("alice", &["analyst"])
    }

    fn request(payload: Payload) -> EvaluationRequest {
        EvaluationRequest {
            payload,
            polynomial: PolynomialChoice::Preset("loan".into()),
            preview: None,
        }
    }

    #[test]
    fn test_encrypted_branch() {
        let (svc, sink) = service();
        let ctx = svc.session().current().unwrap();
        let ct = ctx.encrypt(&[5.0, 1.0]).unwrap();
        let resp = svc
            .evaluate(&alice(), PolicyDecision::Allow, &request(Payload::Encrypted(ct.to_bytes().unwrap())))
            .unwrap();

        assert!(resp.evaluation_id.starts_with("eval_"));
        assert_eq!(resp.evaluation_id.len(), 11);
        assert!(resp.plain_preview.is_none());
        let values = ctx.decrypt_bytes(&resp.encrypted_result).unwrap();
        assert!((values[0] - 997.5).abs() < 1e-2);
        assert!((values[1] - 1001.5).abs() < 1e-2);

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, "completed");
        let key = svc.session().fingerprint_key();
        assert!(events[0].detail.contains(&key.fingerprint_bytes(&ct.to_bytes().unwrap())));
    }

    #[test]
    fn test_plain_branch_with_preview() {
        let (svc, _) = service();
        let mut req = request(Payload::Plain(vec![5.0]));
        req.preview = Some(NoiseParams::new(0.0, 1.0).unwrap());
        let resp = svc.evaluate(&alice(), PolicyDecision::Allow, &req).unwrap();
        let preview = resp.plain_preview.clone().unwrap();
        assert!((preview[0] - 997.5).abs() < 1e-2);

        let ctx = svc.session().current().unwrap();
        let decoded = Ciphertext::from_base64(&resp.encrypted_result_base64()).unwrap();
        assert_eq!(decoded.level(), 1);
        assert!((ctx.decrypt(&decoded).unwrap()[0] - 997.5).abs() < 1e-2);
    }

    #[test]
    fn test_failures_are_audited() {
        let (svc, sink) = service();
        let cases = [
            (PolicyDecision::Deny, request(Payload::Plain(vec![1.0])), ErrorKind::AccessDenied),
            (PolicyDecision::Allow, request(Payload::Encrypted(vec![])), ErrorKind::DeserializationError),
            (PolicyDecision::Allow, request(Payload::Encrypted(vec![1, 2, 3])), ErrorKind::DeserializationError),
            (PolicyDecision::Allow, request(Payload::Plain(vec![])), ErrorKind::InvalidParameters),
            (PolicyDecision::Allow, request(Payload::Plain(vec![f64::NAN])), ErrorKind::InvalidParameters),
            (
                PolicyDecision::Allow,
                EvaluationRequest {
                    payload: Payload::Plain(vec![1.0]),
                    polynomial: PolynomialChoice::Coefficients(vec![]),
                    preview: None,
                },
                ErrorKind::InvalidParameters,
            ),
        ];
        for (decision, req, kind) in &cases {
            let err = svc.evaluate(&alice(), *decision, req).unwrap_err();
            assert_eq!(err.kind(), *kind);
        }
        let statuses: Vec<String> = sink.events().into_iter().map(|e| e.status).collect();
        assert_eq!(statuses[0], "failed:AccessDenied");
        assert_eq!(statuses[1], "failed:DeserializationError");
        assert_eq!(statuses.len(), cases.len());
    }

    #[test]
    fn test_context_not_ready() {
        let svc = EvaluationService::new(Arc::new(SessionContext::new()), Arc::new(MemoryAuditSink::default()));
        let err = svc
            .evaluate(&alice(), PolicyDecision::Allow, &request(Payload::Plain(vec![1.0])))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ContextNotReady);
    }

    #[test]
    fn test_foreign_ciphertext_is_rejected() {
        let (svc, _) = service();
        let other = SchemeContext::create(params()).unwrap();
        let ct = other.encrypt(&[5.0]).unwrap();
        let err = svc
            .evaluate(&alice(), PolicyDecision::Allow, &request(Payload::Encrypted(ct.to_bytes().unwrap())))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ContextMismatch);
    }

    #[test]
    fn test_preview_needs_secret_key() {
        let (svc, _) = service();
        let public = svc.session().export(false).unwrap();
        let session = Arc::new(SessionContext::new());
        session.import(&public).unwrap();
        let svc = EvaluationService::new(session, Arc::new(MemoryAuditSink::default()));
        let mut req = request(Payload::Plain(LOAN_COEFFICIENTS.to_vec()));
        req.preview = Some(NoiseParams::new(1.0, 1.0).unwrap());
        let err = svc.evaluate(&alice(), PolicyDecision::Allow, &req).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DecryptionError);
        req.preview = None;
        assert!(svc.evaluate(&alice(), PolicyDecision::Allow, &req).is_ok());
    }

    struct FailingSink;

    impl AuditSink for FailingSink {
        fn record(&self, _event: &AuditEvent) -> std::result::Result<(), AuditError> {
            Err(AuditError::Unavailable("disk full".into()))
        }
    }

    #[test]
    fn test_audit_failure_is_swallowed() {
        let session = Arc::new(SessionContext::new());
        session.initialize(params()).unwrap();
        let svc = EvaluationService::new(session, Arc::new(FailingSink));
        assert!(svc
            .evaluate(&alice(), PolicyDecision::Allow, &request(Payload::Plain(vec![2.0])))
            .is_ok());
    }

    #[test]
    fn test_reinitialize_and_galois_keys() {
        let (svc, _) = service();
        let first = svc.session().current().unwrap().id();
        svc.session().attach_galois_keys(&[1]).unwrap();
        let current = svc.session().current().unwrap();
        assert_eq!(current.id(), first);
        assert!(current.galois_key(1).is_ok());

        let second = svc.session().initialize(params()).unwrap();
        assert_ne!(first, second);
        assert!(svc.session().current().unwrap().galois_key(1).is_err());
    }

    #[test]
    fn test_base64_payload() {
        assert!(Payload::encrypted_base64("!!").is_err());
        assert_eq!(Payload::encrypted_base64("AQID").unwrap(), Payload::Encrypted(vec![1, 2, 3]));
    }

    #[test]
    fn test_plain_branch_respects_chain_limits() {
        let (svc, _) = service();
        let ctx = svc.session().current().unwrap();
        let deep = |payload: Payload| EvaluationRequest {
            payload,
            polynomial: PolynomialChoice::Coefficients(vec![1.0; 6]),
            preview: None,
        };
        let encrypted = Payload::Encrypted(ctx.encrypt(&[1.0]).unwrap().to_bytes().unwrap());
        for payload in [encrypted, Payload::Plain(vec![1.0])] {
            let err = svc.evaluate(&alice(), PolicyDecision::Allow, &deep(payload)).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::NoiseBudgetExhausted);
        }
    }

    #[test]
    fn test_plain_fingerprint_is_not_searchable() {
        use sha2::{Digest, Sha256};

        let (svc, sink) = service();
        let req = request(Payload::Plain(vec![52_345.0]));
        svc.evaluate(&alice(), PolicyDecision::Allow, &req).unwrap();
        let detail = sink.events()[0].detail.clone();
        let logged = detail.split("fingerprint=").nth(1).unwrap().to_string();

        let unkeyed = |v: f64| hex::encode(Sha256::digest(v.to_le_bytes()))[..16].to_string();
        assert!((0..100_000u32).all(|v| unkeyed(f64::from(v)) != logged));

        // the same plaintext in another session gets an unrelated fingerprint
        let (other, other_sink) = service();
        other.evaluate(&alice(), PolicyDecision::Allow, &req).unwrap();
        assert!(!other_sink.events()[0].detail.contains(&logged));
    }

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn test_engine_types_are_send_sync() {
        assert_send_sync::<SchemeContext>();
        assert_send_sync::<SessionContext>();
        assert_send_sync::<EvaluationService>();
    }

    #[test]
    fn test_reinitialize_waits_for_in_flight_evaluations() {
        let (svc, _) = service();
        let old = svc.session().current().unwrap();
        let input = old.encrypt(&[5.0]).unwrap().to_bytes().unwrap();
        let req = request(Payload::Encrypted(input));
        let (svc, req) = (&svc, &req);

        let outcomes: Vec<Result<EvaluationResponse>> = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..4)
                .map(|_| {
                    scope.spawn(move || {
                        (0..3)
                            .map(|_| svc.evaluate(&alice(), PolicyDecision::Allow, req))
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            scope.spawn(move || {
                svc.session().attach_galois_keys(&[1]).unwrap();
                svc.session().initialize(params()).unwrap();
            });
            workers.into_iter().flat_map(|w| w.join().unwrap()).collect()
        });

        assert_eq!(outcomes.len(), 12);
        for outcome in outcomes {
            match outcome {
                Ok(resp) => {
                    let values = old.decrypt_bytes(&resp.encrypted_result).unwrap();
                    assert!((values[0] - 997.5).abs() < 1e-2);
                }
                Err(err) => assert_eq!(err.kind(), ErrorKind::ContextMismatch),
            }
        }
        assert_ne!(svc.session().current().unwrap().id(), old.id());
    }
}
