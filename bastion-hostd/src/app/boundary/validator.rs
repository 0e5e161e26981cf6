use super::audit_trail::AuditTrail;
use super::payload::{canonicalize, CanonicalPayload};
use super::rate_limiter::{RateDecision, RateLimiter};
use crate::domain::boundary::{
    AuditEvent, AuditOutcome, ChannelName, ChannelPolicy, CorrelationId, EffectiveLimits,
    Whitelist,
};
use crate::telemetry::HostMetrics;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::warn;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum BoundaryRejection {
    #[error("channel rejected: {reason}")]
    Rejected { reason: String },
    #[error("rate limited, retry after {} ms", retry_after.as_millis())]
    RateLimited { retry_after: Duration },
    #[error("message of {size} bytes exceeds limit of {limit} bytes")]
    SizeExceeded { size: usize, limit: usize },
}

impl BoundaryRejection {
    pub fn outcome(&self) -> AuditOutcome {
        match self {
            BoundaryRejection::Rejected { .. } => AuditOutcome::Rejected,
            BoundaryRejection::RateLimited { .. } => AuditOutcome::RateLimited,
            BoundaryRejection::SizeExceeded { .. } => AuditOutcome::SizeExceeded,
        }
    }
}

/// A call that passed the boundary, with the policy that admitted it.
#[derive(Clone, Debug)]
pub struct Admission {
    pub channel: ChannelName,
    pub policy: ChannelPolicy,
    pub limits: EffectiveLimits,
    pub payload: CanonicalPayload,
}

/// Validates every cross-boundary call: name shape, whitelist, size and
/// rate, in that order. Each decision lands in the audit trail.
pub struct ChannelValidator {
    whitelist: Arc<Whitelist>,
    limiter: Arc<RateLimiter>,
    audit: Arc<AuditTrail>,
    deprecation_warned: Mutex<HashSet<String>>,
    metrics: Option<Arc<HostMetrics>>,
}

impl ChannelValidator {
    pub fn new(
        whitelist: Arc<Whitelist>,
        limiter: Arc<RateLimiter>,
        audit: Arc<AuditTrail>,
        metrics: Option<Arc<HostMetrics>>,
    ) -> Self {
        Self {
            whitelist,
            limiter,
            audit,
            deprecation_warned: Mutex::new(HashSet::new()),
            metrics,
        }
    }

    pub fn whitelist(&self) -> &Arc<Whitelist> {
        &self.whitelist
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn audit(&self) -> &Arc<AuditTrail> {
        &self.audit
    }

    pub fn validate(
        &self,
        channel: &str,
        payload: &Value,
        correlation_id: &CorrelationId,
    ) -> Result<Admission, BoundaryRejection> {
        let result = self.evaluate(channel, payload, Instant::now());
        match &result {
            Ok(admission) => {
                self.audit.record(AuditEvent::new(
                    correlation_id.clone(),
                    channel,
                    AuditOutcome::Allowed,
                    None,
                    Some(admission.payload.bytes),
                ));
                if let Some(metrics) = &self.metrics {
                    metrics.record_boundary_decision(
                        AuditOutcome::Allowed.as_str(),
                        Some(admission.policy.category.as_str()),
                    );
                }
            }
            Err((rejection, size)) => {
                self.audit.record(AuditEvent::new(
                    correlation_id.clone(),
                    channel,
                    rejection.outcome(),
                    Some(&rejection.to_string()),
                    *size,
                ));
                if let Some(metrics) = &self.metrics {
                    metrics.record_boundary_decision(rejection.outcome().as_str(), None);
                }
            }
        }
        result.map_err(|(rejection, _)| rejection)
    }

    fn evaluate(
        &self,
        channel: &str,
        payload: &Value,
        now: Instant,
    ) -> Result<Admission, (BoundaryRejection, Option<usize>)> {
        let name = ChannelName::parse(channel).map_err(|err| {
            (
                BoundaryRejection::Rejected {
                    reason: err.to_string(),
                },
                None,
            )
        })?;
        let policy = self.whitelist.resolve(&name).ok_or_else(|| {
            (
                BoundaryRejection::Rejected {
                    reason: "channel not whitelisted".to_string(),
                },
                None,
            )
        })?;
        let limits = self.whitelist.limits(policy);

        let canonical = canonicalize(payload);
        if canonical.bytes > limits.max_message_bytes {
            return Err((
                BoundaryRejection::SizeExceeded {
                    size: canonical.bytes,
                    limit: limits.max_message_bytes,
                },
                Some(canonical.bytes),
            ));
        }

        if let RateDecision::Limited { retry_after } =
            self.limiter
                .check(name.as_str(), limits.max_calls, limits.window, now)
        {
            return Err((
                BoundaryRejection::RateLimited { retry_after },
                Some(canonical.bytes),
            ));
        }

        if policy.deprecated {
            self.warn_deprecated(&name, policy);
        }

        Ok(Admission {
            channel: name,
            policy: policy.clone(),
            limits,
            payload: canonical,
        })
    }

    fn warn_deprecated(&self, name: &ChannelName, policy: &ChannelPolicy) {
        let first_use = self
            .deprecation_warned
            .lock()
            .insert(name.as_str().to_string());
        if first_use {
            warn!(channel = %name, pattern = %policy.pattern, "deprecated channel used");
        }
    }
}
