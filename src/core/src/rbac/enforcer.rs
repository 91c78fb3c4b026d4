//! Enforcement entry point.
//!
//! [`Enforcer`] answers "may this subject perform this action on this
//! resource?" by combining the decision cache, the matcher and the ownership
//! validator:
//!
//! 1. Look up `(subject, action, resource type)` in the cache. A final
//!    decision is returned as is.
//! 2. On a miss, or on a cached pending-ownership result, run the matcher and
//!    cache its result unless it depended on request attributes.
//! 3. A pending-ownership result is decided by the ownership validator when
//!    an instance is supplied, and denied otherwise.
//!
//! Store failures fail closed with [`DecisionKind::DenyUnavailable`].

use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument, warn};

use super::conditions::Attributes;
use super::filter::{PredicateBuilder, QueryFilter};
use super::matcher::{MatchOutcome, Matcher};
use super::models::{Decision, DecisionKind, Evaluation, Permission, ResourceInstance, Subject};
use super::ownership::OwnershipValidator;
use super::registry::RoleRegistry;
use super::store::{InMemoryBackend, PolicyBackend, PolicyStore};
use crate::cache::{CacheConfig, DecisionCache, DecisionKey};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::telemetry::metrics as authz_metrics;

// ═══════════════════════════════════════════════════════════════════════════════
// Access Request
// ═══════════════════════════════════════════════════════════════════════════════

/// A single authorization question.
#[derive(Clone)]
pub struct AccessRequest<'a> {
    pub subject: &'a dyn Subject,
    pub action: &'a str,
    pub resource_type: &'a str,
    /// The concrete instance, required to satisfy owned-scope grants.
    pub instance: Option<&'a ResourceInstance>,
    /// Request attributes evaluated by rule conditions.
    pub attributes: Attributes,
}

impl<'a> AccessRequest<'a> {
    pub fn new(subject: &'a dyn Subject, action: &'a str, resource_type: &'a str) -> Self {
        Self {
            subject,
            action,
            resource_type,
            instance: None,
            attributes: Attributes::new(),
        }
    }

    pub fn on(mut self, instance: &'a ResourceInstance) -> Self {
        self.instance = Some(instance);
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes.extend(attributes);
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Enforcer
// ═══════════════════════════════════════════════════════════════════════════════

/// Authorization engine facade. Cheap to clone; clones share all state.
#[derive(Debug, Clone)]
pub struct Enforcer {
    registry: Arc<RoleRegistry>,
    store: PolicyStore,
    matcher: Matcher,
    cache: Arc<DecisionCache>,
    ownership: OwnershipValidator,
}

impl Enforcer {
    /// Build an enforcer over `backend` with a cache configured by `cache_config`.
    pub fn new(backend: Arc<dyn PolicyBackend>, cache_config: CacheConfig) -> Self {
        let cache = Arc::new(DecisionCache::new(cache_config));
        let registry = Arc::new(RoleRegistry::with_cache(cache.clone()));
        let store = PolicyStore::new(backend, registry.clone()).with_cache(cache.clone());
        let matcher = Matcher::new(registry.clone(), store.clone());

        Self {
            registry,
            store,
            matcher,
            cache,
            ownership: OwnershipValidator::default(),
        }
    }

    /// In-memory backend with the default cache configuration.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryBackend::new()), CacheConfig::default())
    }

    /// In-memory backend configured from `config`.
    pub fn from_config(config: &Config) -> Self {
        Self::new(Arc::new(InMemoryBackend::new()), config.cache.clone())
    }

    pub fn with_backend(backend: Arc<dyn PolicyBackend>) -> Self {
        Self::new(backend, CacheConfig::default())
    }

    pub fn with_ownership(mut self, ownership: OwnershipValidator) -> Self {
        self.ownership = ownership;
        self
    }

    /// Start the background expiry sweep if the cache config asks for one.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start_sweeper(&self) -> Option<JoinHandle<()>> {
        self.cache
            .config()
            .sweep_interval
            .map(|interval| self.cache.spawn_sweeper(interval))
    }

    pub fn registry(&self) -> &Arc<RoleRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &PolicyStore {
        &self.store
    }

    pub fn cache(&self) -> &Arc<DecisionCache> {
        &self.cache
    }

    pub fn ownership(&self) -> &OwnershipValidator {
        &self.ownership
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Decisions
    // ─────────────────────────────────────────────────────────────────────────

    /// Decide whether `subject` may perform `action` on `resource_type`.
    ///
    /// `instance` is required for grants limited to owned resources.
    pub async fn authorize(
        &self,
        subject: &dyn Subject,
        action: &str,
        resource_type: &str,
        instance: Option<&ResourceInstance>,
    ) -> Decision {
        let mut request = AccessRequest::new(subject, action, resource_type);
        request.instance = instance;
        self.authorize_request(&request).await
    }

    /// Decide an [`AccessRequest`], attributes included.
    #[instrument(
        skip(self, request),
        fields(
            subject = %request.subject.id(),
            action = request.action,
            resource_type = request.resource_type,
        )
    )]
    pub async fn authorize_request(&self, request: &AccessRequest<'_>) -> Decision {
        let evaluation = match self.evaluation(request).await {
            Ok(evaluation) => evaluation,
            Err(err) => {
                error!(
                    backend = self.store.backend_name(),
                    error = %err,
                    "Policy store failed, denying"
                );
                authz_metrics::record_store_error(self.store.backend_name());
                return self.finish(request, Decision::deny(DecisionKind::DenyUnavailable));
            }
        };

        let decision = match evaluation {
            Evaluation::Final(decision) => decision,
            Evaluation::PendingOwnership(rule) => match request.instance {
                Some(instance) if instance.resource_type == request.resource_type => {
                    self.ownership.check_ownership(request.subject, instance, &rule)
                }
                Some(instance) => {
                    warn!(
                        instance_type = %instance.resource_type,
                        "Instance does not match the requested resource type"
                    );
                    Decision::not_owner(Some(rule))
                }
                None => {
                    debug!(rule = %rule.id, "Owned-scope grant without an instance");
                    Decision::not_owner(Some(rule))
                }
            },
        };

        self.finish(request, decision)
    }

    /// Like [`authorize`](Self::authorize), mapping every denial to
    /// [`Error::Forbidden`].
    pub async fn enforce(
        &self,
        subject: &dyn Subject,
        action: &str,
        resource_type: &str,
        instance: Option<&ResourceInstance>,
    ) -> Result<()> {
        if self.authorize(subject, action, resource_type, instance).await.is_allowed() {
            Ok(())
        } else {
            Err(Error::Forbidden)
        }
    }

    /// `true` when every `(action, resource_type)` pair is allowed.
    pub async fn check_all(
        &self,
        subject: &dyn Subject,
        checks: &[(&str, &str)],
        instance: Option<&ResourceInstance>,
    ) -> bool {
        for (action, resource_type) in checks {
            if self.authorize(subject, action, resource_type, instance).await.is_denied() {
                return false;
            }
        }
        true
    }

    /// `true` when at least one `(action, resource_type)` pair is allowed.
    pub async fn check_any(
        &self,
        subject: &dyn Subject,
        checks: &[(&str, &str)],
        instance: Option<&ResourceInstance>,
    ) -> bool {
        for (action, resource_type) in checks {
            if self.authorize(subject, action, resource_type, instance).await.is_allowed() {
                return true;
            }
        }
        false
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Query filtering
    // ─────────────────────────────────────────────────────────────────────────

    /// Which instances of `resource_type` the subject may `action`.
    ///
    /// Owned-scope grants produce [`QueryFilter::OwnedBy`], expressed in
    /// terms of the instance owner id. Store failures produce
    /// [`QueryFilter::Nothing`].
    ///
    /// Custom ownership predicates registered on the validator are not part
    /// of `OwnedBy` or of [`build_filter`](Self::build_filter). For such
    /// resource types, check loaded instances with
    /// [`filter_permits`](Self::filter_permits).
    pub async fn query_filter(&self, subject: &dyn Subject, action: &str, resource_type: &str) -> QueryFilter {
        let request = AccessRequest::new(subject, action, resource_type);
        match self.evaluation(&request).await {
            Ok(evaluation) => QueryFilter::from_evaluation(&evaluation, subject.id()),
            Err(err) => {
                err.log();
                authz_metrics::record_store_error(self.store.backend_name());
                QueryFilter::Nothing
            }
        }
    }

    /// Check a loaded instance against `filter` with this enforcer's
    /// ownership predicates.
    pub fn filter_permits(&self, filter: &QueryFilter, subject: &dyn Subject, instance: &ResourceInstance) -> bool {
        filter.permits_with(subject, instance, &self.ownership)
    }

    /// [`query_filter`](Self::query_filter) translated by `builder`.
    pub async fn build_filter<B: PredicateBuilder>(
        &self,
        subject: &dyn Subject,
        action: &str,
        resource_type: &str,
        builder: &B,
    ) -> B::Predicate {
        self.query_filter(subject, action, resource_type)
            .await
            .build(builder)
    }

    /// Union of the permissions granted to a subject.
    pub async fn effective_permissions(&self, subject: &dyn Subject) -> Result<BTreeSet<Permission>> {
        self.matcher.effective_permissions(subject).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────────

    async fn evaluation(&self, request: &AccessRequest<'_>) -> Result<Evaluation> {
        // Key and evaluation must see the same assignments.
        let assigned = request.subject.roles();
        let key = DecisionKey::new(
            request.subject.id().clone(),
            request.action,
            request.resource_type,
            &assigned,
        );

        if let Some(Evaluation::Final(decision)) = self.cache.get(&key) {
            return Ok(Evaluation::Final(decision));
        }

        let generation = self.cache.generation();
        let outcome = self
            .matcher
            .evaluate_roles(
                request.subject.id(),
                assigned,
                request.action,
                request.resource_type,
                &request.attributes,
            )
            .await?;

        if outcome.cacheable {
            self.cache_outcome(generation, key, &outcome);
        }
        Ok(outcome.evaluation)
    }

    /// Cache an outcome no longer than the bindings it relied on stay active.
    fn cache_outcome(&self, generation: u64, key: DecisionKey, outcome: &MatchOutcome) {
        let ttl = match outcome.valid_until {
            None => self.cache.config().ttl,
            Some(until) => match (until - Utc::now()).to_std() {
                Ok(remaining) => remaining,
                Err(_) => {
                    debug!(key = %key, "Binding already lapsed, not caching");
                    return;
                }
            },
        };
        self.cache
            .put_if_current_with_ttl(generation, key, outcome.evaluation.clone(), ttl);
    }

    fn finish(&self, request: &AccessRequest<'_>, decision: Decision) -> Decision {
        authz_metrics::record_decision(decision.kind());
        let rule_id = decision.matched_rule().map(|rule| rule.id.to_string());

        if decision.is_allowed() {
            debug!(decision = %decision.kind(), rule_id = ?rule_id, "Access allowed");
        } else {
            warn!(
                subject = %request.subject.id(),
                action = request.action,
                resource_type = request.resource_type,
                decision = %decision.kind(),
                rule_id = ?rule_id,
                "Access denied"
            );
        }
        decision
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rbac::conditions::Condition;
    use crate::rbac::models::{PolicyRule, Principal, RoleBinding, RoleId, SubjectId};
    use async_trait::async_trait;
    use serde_json::json;

    async fn blog() -> Enforcer {
        let enforcer = Enforcer::in_memory();
        let registry = enforcer.registry();
        let store = enforcer.store();

        let editor = registry.register("editor").unwrap();
        let author = registry.register("author").unwrap();
        let viewer = registry.register("viewer").unwrap();

        store.grant(&editor, Permission::any("article", "update")).await.unwrap();
        store.grant(&author, Permission::owned("article", "update")).await.unwrap();
        store.grant(&viewer, Permission::any("article", "read")).await.unwrap();
        enforcer
    }

    #[tokio::test]
    async fn test_any_scope_allows_without_instance() {
        let enforcer = blog().await;
        let alice = Principal::new("alice").with_role("editor");
        let decision = enforcer.authorize(&alice, "update", "article", None).await;
        assert!(decision.is_allowed());
        assert_eq!(decision.matched_rule().unwrap().role, RoleId::new("editor"));
    }

    #[tokio::test]
    async fn test_owned_scope_requires_instance() {
        let enforcer = blog().await;
        let dave = Principal::new("dave").with_role("author");

        let decision = enforcer.authorize(&dave, "update", "article", None).await;
        assert_eq!(decision.kind(), DecisionKind::DenyNotOwner);
        assert!(decision.matched_rule().is_some());

        let own = ResourceInstance::new("article", "a1").owned_by("dave");
        assert!(enforcer.authorize(&dave, "update", "article", Some(&own)).await.is_allowed());

        let foreign = ResourceInstance::new("article", "a2").owned_by("erin");
        let decision = enforcer.authorize(&dave, "update", "article", Some(&foreign)).await;
        assert_eq!(decision.kind(), DecisionKind::DenyNotOwner);

        let mismatched = ResourceInstance::new("comment", "c1").owned_by("dave");
        let decision = enforcer.authorize(&dave, "update", "article", Some(&mismatched)).await;
        assert_eq!(decision.kind(), DecisionKind::DenyNotOwner);
    }

    #[tokio::test]
    async fn test_owned_allow_never_cached_as_final() {
        let enforcer = blog().await;
        let dave = Principal::new("dave").with_role("author");
        let own = ResourceInstance::new("article", "a1").owned_by("dave");

        assert!(enforcer.authorize(&dave, "update", "article", Some(&own)).await.is_allowed());

        let key = DecisionKey::for_subject(&dave, "update", "article");
        assert!(matches!(
            enforcer.cache().get(&key),
            Some(Evaluation::PendingOwnership(_))
        ));

        let foreign = ResourceInstance::new("article", "a2").owned_by("erin");
        assert!(enforcer.authorize(&dave, "update", "article", Some(&foreign)).await.is_denied());
    }

    #[tokio::test]
    async fn test_final_decisions_served_from_cache() {
        let enforcer = blog().await;
        let bob = Principal::new("bob").with_role("viewer");

        assert!(enforcer.authorize(&bob, "read", "article", None).await.is_allowed());
        assert!(enforcer.authorize(&bob, "read", "article", None).await.is_allowed());

        let stats = enforcer.cache().stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_mutation_takes_effect_immediately() {
        let enforcer = blog().await;
        let bob = Principal::new("bob").with_role("viewer");
        assert!(enforcer.authorize(&bob, "delete", "article", None).await.is_denied());

        let viewer = enforcer.registry().get(&RoleId::new("viewer")).unwrap();
        enforcer
            .store()
            .grant(&viewer, Permission::any("article", "delete"))
            .await
            .unwrap();
        assert!(enforcer.authorize(&bob, "delete", "article", None).await.is_allowed());

        enforcer
            .store()
            .remove_policy(&viewer, &Permission::any("article", "delete"))
            .await
            .unwrap();
        assert!(enforcer.authorize(&bob, "delete", "article", None).await.is_denied());
    }

    #[tokio::test]
    async fn test_conditional_rules_use_request_attributes() {
        let enforcer = blog().await;
        let support = enforcer.registry().register("support").unwrap();
        enforcer
            .store()
            .add_policy(
                &support,
                Permission::any("ticket", "close"),
                vec![Condition::one_of("channel", ["email", "chat"])],
            )
            .await
            .unwrap();
        let sam = Principal::new("sam").with_role("support");

        let by_email = AccessRequest::new(&sam, "close", "ticket").with_attribute("channel", "email");
        assert!(enforcer.authorize_request(&by_email).await.is_allowed());

        let by_phone = AccessRequest::new(&sam, "close", "ticket").with_attribute("channel", json!("phone"));
        assert!(enforcer.authorize_request(&by_phone).await.is_denied());
        assert!(enforcer.cache().is_empty());
    }

    #[tokio::test]
    async fn test_enforce_and_bulk_checks() {
        let enforcer = blog().await;
        let alice = Principal::new("alice").with_roles(["editor", "viewer"]);

        assert!(enforcer.enforce(&alice, "read", "article", None).await.is_ok());
        let err = enforcer.enforce(&alice, "delete", "article", None).await.unwrap_err();
        assert!(matches!(err, Error::Forbidden));

        let checks = [("read", "article"), ("update", "article")];
        assert!(enforcer.check_all(&alice, &checks, None).await);
        let checks = [("read", "article"), ("delete", "article")];
        assert!(!enforcer.check_all(&alice, &checks, None).await);
        assert!(enforcer.check_any(&alice, &checks, None).await);
        assert!(!enforcer.check_any(&alice, &[("delete", "article")], None).await);
    }

    #[tokio::test]
    async fn test_query_filter() {
        let enforcer = blog().await;
        let alice = Principal::new("alice").with_role("editor");
        let dave = Principal::new("dave").with_role("author");
        let nobody = Principal::new("nobody");

        assert_eq!(enforcer.query_filter(&alice, "update", "article").await, QueryFilter::All);
        assert_eq!(
            enforcer.query_filter(&dave, "update", "article").await,
            QueryFilter::OwnedBy(SubjectId::new("dave"))
        );
        assert_eq!(enforcer.query_filter(&nobody, "update", "article").await, QueryFilter::Nothing);
    }

    #[tokio::test]
    async fn test_bindings_grant_roles() {
        let enforcer = blog().await;
        let frank = Principal::new("frank");
        assert_eq!(
            enforcer.authorize(&frank, "read", "article", None).await.kind(),
            DecisionKind::DenyNoRole
        );

        enforcer
            .store()
            .assign_role(RoleBinding::new(SubjectId::new("frank"), RoleId::new("viewer")))
            .await
            .unwrap();
        assert!(enforcer.authorize(&frank, "read", "article", None).await.is_allowed());
    }

    #[derive(Debug)]
    struct FailingBackend;

    #[async_trait]
    impl PolicyBackend for FailingBackend {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn add_policy(&self, _rule: PolicyRule) -> Result<Arc<PolicyRule>> {
            Err(Error::store_unavailable("connection refused"))
        }

        async fn remove_policy(
            &self,
            _role: &RoleId,
            _permission: &Permission,
        ) -> Result<Arc<PolicyRule>> {
            Err(Error::store_unavailable("connection refused"))
        }

        async fn list_rules(&self, _role: &RoleId) -> Result<Vec<Arc<PolicyRule>>> {
            Err(Error::store_unavailable("connection refused"))
        }

        async fn list_roles(&self) -> Result<BTreeSet<RoleId>> {
            Err(Error::store_unavailable("connection refused"))
        }

        async fn add_binding(&self, _binding: RoleBinding) -> Result<()> {
            Err(Error::store_unavailable("connection refused"))
        }

        async fn remove_binding(&self, _subject: &SubjectId, _role: &RoleId) -> Result<bool> {
            Err(Error::store_unavailable("connection refused"))
        }

        async fn list_bindings(&self, _subject: &SubjectId) -> Result<Vec<RoleBinding>> {
            Err(Error::store_unavailable("connection refused"))
        }
    }

    #[tokio::test]
    async fn test_store_failure_fails_closed() {
        let enforcer = Enforcer::with_backend(Arc::new(FailingBackend));
        enforcer.registry().register("viewer").unwrap();
        let bob = Principal::new("bob").with_role("viewer");

        let decision = enforcer.authorize(&bob, "read", "article", None).await;
        assert_eq!(decision.kind(), DecisionKind::DenyUnavailable);
        assert!(enforcer.cache().is_empty());
        assert_eq!(enforcer.query_filter(&bob, "read", "article").await, QueryFilter::Nothing);
        assert!(enforcer.effective_permissions(&bob).await.is_err());
    }
}
