//! Integration tests for end-to-end authorization.
//!
//! Covers:
//! - Subjects without effective roles
//! - Owned-scope grants with and without a resource instance
//! - Decision caching and invalidation after policy mutations
//! - Composite roles, bindings, conditions and predefined roles
//! - Query filters and fail-closed behaviour
//! - Binding expiry bounding cached decisions

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gatekeeper_core::prelude::*;
use gatekeeper_core::rbac::AttributeMatches;
use serde_json::json;

// ============================================================================
// Helpers
// ============================================================================

async fn enforcer_with(grants: &[(&str, Permission)]) -> Enforcer {
    let enforcer = Enforcer::in_memory();
    for (role, permission) in grants {
        let role = enforcer.registry().register(*role).unwrap();
        enforcer.store().grant(&role, permission.clone()).await.unwrap();
    }
    enforcer
}

// ============================================================================
// Roles
// ============================================================================

#[tokio::test]
async fn test_zero_roles_always_deny_no_role() {
    let enforcer = enforcer_with(&[("admin", Permission::any("*", "*"))]).await;
    let subjects = [
        Principal::new("nobody"),
        // Unregistered role ids carry nothing.
        Principal::new("ghost").with_role("phantom"),
    ];

    for subject in &subjects {
        for (action, resource_type) in [("read", "article"), ("delete", "user"), ("*", "*")] {
            let decision = enforcer.authorize(subject, action, resource_type, None).await;
            assert_eq!(decision.kind(), DecisionKind::DenyNoRole);
            assert!(decision.matched_rule().is_none());
        }
    }
}

#[tokio::test]
async fn test_composite_role_grants_union() {
    let enforcer = enforcer_with(&[
        ("editor", Permission::any("article", "update")),
        ("viewer", Permission::any("article", "read")),
    ])
    .await;
    let registry = enforcer.registry();
    let editor = registry.get(&RoleId::new("editor")).unwrap();
    let viewer = registry.get(&RoleId::new("viewer")).unwrap();

    let both = registry.compose(&[editor, viewer]).unwrap();
    let subject = Principal::new("alice").with_role(both.id().clone());

    assert!(enforcer.authorize(&subject, "update", "article", None).await.is_allowed());
    assert!(enforcer.authorize(&subject, "read", "article", None).await.is_allowed());
    assert!(enforcer.authorize(&subject, "delete", "article", None).await.is_denied());
}

// ============================================================================
// Ownership
// ============================================================================

#[tokio::test]
async fn test_editor_owned_article_scenario() {
    let enforcer = enforcer_with(&[("editor", Permission::owned("article", "edit"))]).await;
    let s1 = Principal::new("s1").with_role("editor");

    let own = ResourceInstance::new("article", "7").owned_by("s1");
    let decision = enforcer.authorize(&s1, "edit", "article", Some(&own)).await;
    assert_eq!(decision.kind(), DecisionKind::Allow);

    let foreign = ResourceInstance::new("article", "7").owned_by("s2");
    let decision = enforcer.authorize(&s1, "edit", "article", Some(&foreign)).await;
    assert_eq!(decision.kind(), DecisionKind::DenyNotOwner);
}

#[tokio::test]
async fn test_owned_scope_without_instance_fails_closed() {
    let enforcer = enforcer_with(&[("editor", Permission::owned("article", "edit"))]).await;
    let s1 = Principal::new("s1").with_role("editor");

    for _ in 0..3 {
        let decision = enforcer.authorize(&s1, "edit", "article", None).await;
        assert_eq!(decision.kind(), DecisionKind::DenyNotOwner);
    }
}

#[tokio::test]
async fn test_owned_scope_decisions_vary_per_instance() {
    let enforcer = enforcer_with(&[("editor", Permission::owned("article", "edit"))]).await;
    let s1 = Principal::new("s1").with_role("editor");
    let own = ResourceInstance::new("article", "1").owned_by("s1");
    let foreign = ResourceInstance::new("article", "2").owned_by("s2");

    for _ in 0..3 {
        assert!(enforcer.authorize(&s1, "edit", "article", Some(&own)).await.is_allowed());
        assert!(enforcer.authorize(&s1, "edit", "article", Some(&foreign)).await.is_denied());
    }
}

#[tokio::test]
async fn test_custom_ownership_predicate() {
    let enforcer = enforcer_with(&[("member", Permission::owned("project", "update"))])
        .await
        .with_ownership(OwnershipValidator::new().with_predicate("project", AttributeMatches::new("members")));
    let alice = Principal::new("alice").with_role("member");

    let project = ResourceInstance::new("project", "p1").with_attribute("members", json!(["alice", "bob"]));
    assert!(enforcer.authorize(&alice, "update", "project", Some(&project)).await.is_allowed());

    let other = ResourceInstance::new("project", "p2").with_attribute("members", json!(["carol"]));
    assert!(enforcer.authorize(&alice, "update", "project", Some(&other)).await.is_denied());
}

// ============================================================================
// Caching
// ============================================================================

#[tokio::test]
async fn test_viewer_scenario_hits_cache() {
    let enforcer = enforcer_with(&[("viewer", Permission::any("article", "read"))]).await;
    let subject = Principal::new("bob").with_role("viewer");

    for _ in 0..5 {
        assert!(enforcer.authorize(&subject, "read", "article", None).await.is_allowed());
    }

    let stats = enforcer.cache().stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 4);
    assert!(stats.hit_rate > 0.7);
}

#[tokio::test]
async fn test_cached_allow_not_returned_after_mutation() {
    let enforcer = enforcer_with(&[("viewer", Permission::any("article", "read"))]).await;
    let subject = Principal::new("bob").with_role("viewer");
    let viewer = enforcer.registry().get(&RoleId::new("viewer")).unwrap();

    assert!(enforcer.authorize(&subject, "read", "article", None).await.is_allowed());
    assert!(enforcer.authorize(&subject, "read", "article", None).await.is_allowed());

    enforcer
        .store()
        .remove_policy(&viewer, &Permission::any("article", "read"))
        .await
        .unwrap();
    let decision = enforcer.authorize(&subject, "read", "article", None).await;
    assert_eq!(decision.kind(), DecisionKind::DenyNoPermission);
}

#[tokio::test]
async fn test_composition_invalidates_cache() {
    let enforcer = enforcer_with(&[
        ("editor", Permission::any("article", "update")),
        ("viewer", Permission::any("article", "read")),
    ])
    .await;
    let registry = enforcer.registry();
    let editor = registry.get(&RoleId::new("editor")).unwrap();
    let viewer = registry.get(&RoleId::new("viewer")).unwrap();
    let subject = Principal::new("alice").with_role("editor");

    assert!(enforcer.authorize(&subject, "read", "article", None).await.is_denied());
    registry.add_members(&editor, &[viewer]).unwrap();
    assert!(enforcer.authorize(&subject, "read", "article", None).await.is_allowed());
}

#[tokio::test]
async fn test_role_change_uses_distinct_cache_key() {
    let enforcer = enforcer_with(&[("viewer", Permission::any("article", "read"))]).await;
    enforcer.registry().register("guest").unwrap();

    let as_guest = Principal::new("bob").with_role("guest");
    let as_viewer = Principal::new("bob").with_role("viewer");

    assert!(enforcer.authorize(&as_guest, "read", "article", None).await.is_denied());
    assert!(enforcer.authorize(&as_viewer, "read", "article", None).await.is_allowed());
}

/// Subject whose assignments change after the first read.
struct ShiftingSubject {
    id: SubjectId,
    reads: AtomicUsize,
}

impl Subject for ShiftingSubject {
    fn id(&self) -> &SubjectId {
        &self.id
    }

    fn roles(&self) -> Vec<RoleId> {
        if self.reads.fetch_add(1, Ordering::SeqCst) == 0 {
            vec![RoleId::new("guest")]
        } else {
            vec![RoleId::new("viewer")]
        }
    }
}

#[tokio::test]
async fn test_assigned_roles_read_once_per_decision() {
    let enforcer = enforcer_with(&[("viewer", Permission::any("article", "read"))]).await;
    enforcer.registry().register("guest").unwrap();

    let shifting = ShiftingSubject {
        id: SubjectId::new("bob"),
        reads: AtomicUsize::new(0),
    };
    let decision = enforcer.authorize(&shifting, "read", "article", None).await;
    assert_eq!(decision.kind(), DecisionKind::DenyNoPermission);
    assert_eq!(shifting.reads.load(Ordering::SeqCst), 1);

    // The cached entry must be keyed on the roles it was decided for.
    let guest = Principal::new("bob").with_role("guest");
    assert!(enforcer.authorize(&guest, "read", "article", None).await.is_denied());
    let viewer = Principal::new("bob").with_role("viewer");
    assert!(enforcer.authorize(&viewer, "read", "article", None).await.is_allowed());
}

#[tokio::test]
async fn test_disabled_cache_still_decides() {
    let config = CacheConfig::builder().enabled(false).build();
    let enforcer = Enforcer::new(Arc::new(InMemoryBackend::new()), config);
    let viewer = enforcer.registry().register("viewer").unwrap();
    enforcer.store().grant(&viewer, Permission::any("article", "read")).await.unwrap();

    let subject = Principal::new("bob").with_role("viewer");
    assert!(enforcer.authorize(&subject, "read", "article", None).await.is_allowed());
    assert!(enforcer.cache().is_empty());
}

// ============================================================================
// Bindings, conditions, predefined roles
// ============================================================================

#[tokio::test]
async fn test_expired_binding_grants_nothing() {
    let enforcer = enforcer_with(&[("viewer", Permission::any("article", "read"))]).await;
    let subject = Principal::new("temp");
    let binding = RoleBinding::new(SubjectId::new("temp"), RoleId::new("viewer"))
        .with_expiry(chrono::Utc::now() + chrono::Duration::hours(1))
        .granted_by(SubjectId::new("admin"));
    enforcer.store().assign_role(binding).await.unwrap();

    assert!(enforcer.authorize(&subject, "read", "article", None).await.is_allowed());

    enforcer
        .store()
        .unassign_role(&SubjectId::new("temp"), &RoleId::new("viewer"))
        .await
        .unwrap();
    assert!(enforcer.authorize(&subject, "read", "article", None).await.is_denied());
}

#[tokio::test]
async fn test_lapsed_binding_not_served_from_cache() {
    let enforcer = enforcer_with(&[("viewer", Permission::any("article", "read"))]).await;
    let subject = Principal::new("temp");
    let binding = RoleBinding::new(SubjectId::new("temp"), RoleId::new("viewer"))
        .with_expiry(chrono::Utc::now() + chrono::Duration::milliseconds(300));
    enforcer.store().assign_role(binding).await.unwrap();

    assert!(enforcer.authorize(&subject, "read", "article", None).await.is_allowed());

    tokio::time::sleep(Duration::from_millis(500)).await;

    let decision = enforcer.authorize(&subject, "read", "article", None).await;
    assert_eq!(decision.kind(), DecisionKind::DenyNoRole);
}

#[tokio::test]
async fn test_conditional_rule() {
    let enforcer = Enforcer::in_memory();
    let ops = enforcer.registry().register("ops").unwrap();
    enforcer
        .store()
        .add_policy(
            &ops,
            Permission::any("deployment", "approve"),
            vec![
                Condition::equals("env", "staging"),
                Condition::negate(Condition::exists("freeze")),
            ],
        )
        .await
        .unwrap();
    let subject = Principal::new("olga").with_role("ops");

    let staging = AccessRequest::new(&subject, "approve", "deployment").with_attribute("env", "staging");
    assert!(enforcer.authorize_request(&staging).await.is_allowed());

    let frozen = staging.clone().with_attribute("freeze", true);
    assert!(enforcer.authorize_request(&frozen).await.is_denied());

    let prod = AccessRequest::new(&subject, "approve", "deployment").with_attribute("env", "production");
    assert!(enforcer.authorize_request(&prod).await.is_denied());
}

#[tokio::test]
async fn test_predefined_roles() {
    let enforcer = Enforcer::in_memory();
    PredefinedRole::install_all(enforcer.store()).await.unwrap();

    let author = Principal::new("ann").with_role(PredefinedRole::Author.id());
    let own = ResourceInstance::new("post", "1").owned_by("ann");
    let foreign = ResourceInstance::new("post", "2").owned_by("ben");

    assert!(enforcer.authorize(&author, "read", "post", None).await.is_allowed());
    assert!(enforcer.authorize(&author, "update", "post", Some(&own)).await.is_allowed());
    assert!(enforcer.authorize(&author, "update", "post", Some(&foreign)).await.is_denied());

    let editor = Principal::new("ed").with_role(PredefinedRole::Editor.id());
    assert!(enforcer.authorize(&editor, "update", "post", Some(&foreign)).await.is_allowed());
    assert!(enforcer.authorize(&editor, "publish", "post", None).await.is_denied());

    let admin = Principal::new("root").with_role(PredefinedRole::Admin.id());
    assert!(enforcer.authorize(&admin, "publish", "post", None).await.is_allowed());
}

// ============================================================================
// Query filters
// ============================================================================

struct SqlPredicate;

impl PredicateBuilder for SqlPredicate {
    type Predicate = String;

    fn all(&self) -> String {
        "1 = 1".to_string()
    }

    fn owned_by(&self, subject: &SubjectId) -> String {
        format!("owner_id = '{}'", subject)
    }

    fn nothing(&self) -> String {
        "1 = 0".to_string()
    }
}

#[tokio::test]
async fn test_build_filter() {
    let enforcer = enforcer_with(&[
        ("editor", Permission::owned("article", "edit")),
        ("viewer", Permission::any("article", "read")),
    ])
    .await;
    let subject = Principal::new("s1").with_roles(["editor", "viewer"]);

    assert_eq!(
        enforcer.build_filter(&subject, "edit", "article", &SqlPredicate).await,
        "owner_id = 's1'"
    );
    assert_eq!(enforcer.build_filter(&subject, "read", "article", &SqlPredicate).await, "1 = 1");
    assert_eq!(enforcer.build_filter(&subject, "delete", "article", &SqlPredicate).await, "1 = 0");

    let filter = enforcer.query_filter(&subject, "edit", "article").await;
    let rows = [
        ResourceInstance::new("article", "1").owned_by("s1"),
        ResourceInstance::new("article", "2").owned_by("s2"),
    ];
    let visible: Vec<_> = rows.iter().filter(|r| filter.permits(r)).map(|r| r.id.as_str()).collect();
    assert_eq!(visible, vec!["1"]);
}

#[tokio::test]
async fn test_filter_follows_custom_ownership_predicate() {
    let enforcer = enforcer_with(&[("member", Permission::owned("project", "update"))])
        .await
        .with_ownership(OwnershipValidator::new().with_predicate("project", AttributeMatches::new("members")));
    let alice = Principal::new("alice").with_role("member");

    let filter = enforcer.query_filter(&alice, "update", "project").await;
    assert_eq!(filter, QueryFilter::OwnedBy(SubjectId::new("alice")));

    let rows = [
        ResourceInstance::new("project", "p1")
            .owned_by("carol")
            .with_attribute("members", json!(["alice"])),
        ResourceInstance::new("project", "p2").owned_by("alice"),
        ResourceInstance::new("project", "p3").with_attribute("members", json!(["bob"])),
    ];
    for row in &rows {
        let allowed = enforcer.authorize(&alice, "update", "project", Some(row)).await.is_allowed();
        assert_eq!(enforcer.filter_permits(&filter, &alice, row), allowed, "row {}", row.id);
    }

    let visible: Vec<_> = rows
        .iter()
        .filter(|r| enforcer.filter_permits(&filter, &alice, r))
        .map(|r| r.id.as_str())
        .collect();
    assert_eq!(visible, vec!["p1"]);
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_authorization_and_mutation() {
    let enforcer = enforcer_with(&[("viewer", Permission::any("article", "read"))]).await;
    let viewer = enforcer.registry().get(&RoleId::new("viewer")).unwrap();

    let mut handles = Vec::new();
    for i in 0..16 {
        let enforcer = enforcer.clone();
        handles.push(tokio::spawn(async move {
            let subject = Principal::new(format!("user-{}", i % 4)).with_role("viewer");
            for _ in 0..50 {
                let decision = enforcer.authorize(&subject, "read", "article", None).await;
                assert!(decision.is_allowed());
            }
        }));
    }

    // Unrelated grants churn the cache while readers run.
    for i in 0..20 {
        enforcer
            .store()
            .grant(&viewer, Permission::any(format!("doc-{}", i), "read"))
            .await
            .unwrap();
    }

    for handle in handles {
        handle.await.unwrap();
    }

    let perms = enforcer
        .effective_permissions(&Principal::new("x").with_role("viewer"))
        .await
        .unwrap();
    assert_eq!(perms.len(), 21);
}
