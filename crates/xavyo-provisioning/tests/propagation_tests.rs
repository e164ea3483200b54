//! Propagation Engine Tests
//!
//! Covers single and bulk propagation against an in-memory connector:
//! - Operation choice (create, update, delete) from links and remote lookups
//! - Capability gating, mandatory mapping items and identity validation
//! - Deadlines, transient retries and password rendering
//! - Link bookkeeping under concurrent propagation

mod common;

use std::sync::Arc;

use sha2::{Digest, Sha256};

use common::{fast_retry, remote, test_config, user, Harness, MockConnector, HR, LDAP};
use xavyo_connector::capability::Capability;
use xavyo_connector::error::ErrorClass;
use xavyo_connector::mapping::MappingItem;
use xavyo_connector::operation::Uid;
use xavyo_connector::schema::PASSWORD;
use xavyo_connector::types::OperationType;
use xavyo_provisioning::{
    AnyType, Attribute, AttributeSchema, EngineConfig, FailureKind, Identity, MappingResolver,
    PasswordCipher, PasswordPropagation, PropagationRequest, PropagationStatus, ResourceKey,
};

fn request(identity: &Identity, resource: &str) -> PropagationRequest {
    PropagationRequest::new(identity.key, ResourceKey::new(resource))
}

mod operation_tests {
    use super::*;

    #[tokio::test]
    async fn test_creates_absent_remote_object_and_links_it() {
        let h = Harness::new(test_config()).await;
        let ldap = h.add_resource(LDAP, MockConnector::new(LDAP)).await;
        let alice = h.save(user("alice", "alice@example.com")).await;

        let outcome = h.engine.propagation().propagate(&request(&alice, LDAP)).await;

        assert_eq!(outcome.status, PropagationStatus::Success);
        assert_eq!(outcome.operation, Some(OperationType::Create));
        assert_eq!(outcome.uid, Some(Uid::new("uid-alice")));
        assert_eq!(MockConnector::calls(&ldap.create_calls), 1);

        let remote = ldap.object("uid-alice").unwrap();
        assert_eq!(remote.attributes.get_string("mail"), Some("alice@example.com"));

        let stored = h.reload(&alice).await.unwrap();
        assert_eq!(
            stored.link(&ResourceKey::new(LDAP)).unwrap().uid,
            Uid::new("uid-alice")
        );
    }

    #[tokio::test]
    async fn test_updates_unlinked_object_found_by_name() {
        let h = Harness::new(test_config()).await;
        let ldap = h.add_resource(LDAP, MockConnector::new(LDAP)).await;
        ldap.seed(remote("r-1", "alice", "old@example.com"));
        let alice = h.save(user("alice", "alice@example.com")).await;

        let outcome = h.engine.propagation().propagate(&request(&alice, LDAP)).await;

        assert_eq!(outcome.status, PropagationStatus::Success);
        assert_eq!(outcome.operation, Some(OperationType::Update));
        assert_eq!(outcome.uid, Some(Uid::new("r-1")));
        assert_eq!(MockConnector::calls(&ldap.create_calls), 0);
        assert_eq!(
            ldap.object("r-1").unwrap().attributes.get_string("mail"),
            Some("alice@example.com")
        );

        let stored = h.reload(&alice).await.unwrap();
        assert_eq!(stored.link(&ResourceKey::new(LDAP)).unwrap().uid, Uid::new("r-1"));
    }

    #[tokio::test]
    async fn test_linked_identity_updates_without_lookup() {
        let h = Harness::new(test_config()).await;
        let ldap = h.add_resource(LDAP, MockConnector::new(LDAP)).await;
        ldap.seed(remote("r-7", "alice", "old@example.com"));
        let alice = h.save(user("alice", "alice@example.com")).await;
        let alice = h.link(alice, LDAP, "r-7").await;

        let outcome = h.engine.propagation().propagate(&request(&alice, LDAP)).await;

        assert_eq!(outcome.operation, Some(OperationType::Update));
        assert!(outcome.is_success());
        assert_eq!(MockConnector::calls(&ldap.get_calls), 0);
        assert_eq!(MockConnector::calls(&ldap.update_calls), 1);
    }

    #[tokio::test]
    async fn test_forced_delete_removes_object_and_link() {
        let h = Harness::new(test_config()).await;
        let ldap = h.add_resource(LDAP, MockConnector::new(LDAP)).await;
        ldap.seed(remote("r-1", "alice", "alice@example.com"));
        let alice = h.save(user("alice", "alice@example.com")).await;
        let alice = h.link(alice, LDAP, "r-1").await;

        let outcome = h
            .engine
            .propagation()
            .propagate(&request(&alice, LDAP).forced(OperationType::Delete))
            .await;

        assert_eq!(outcome.status, PropagationStatus::Success);
        assert_eq!(outcome.operation, Some(OperationType::Delete));
        assert!(ldap.object("r-1").is_none());
        let stored = h.reload(&alice).await.unwrap();
        assert!(stored.link(&ResourceKey::new(LDAP)).is_none());
    }

    #[tokio::test]
    async fn test_delete_of_missing_remote_object_succeeds() {
        let h = Harness::new(test_config()).await;
        let ldap = h.add_resource(LDAP, MockConnector::new(LDAP)).await;
        let alice = h.save(user("alice", "alice@example.com")).await;
        let alice = h.link(alice, LDAP, "gone").await;

        let outcome = h
            .engine
            .propagation()
            .propagate(&request(&alice, LDAP).forced(OperationType::Delete))
            .await;

        assert_eq!(outcome.status, PropagationStatus::Success);
        assert_eq!(MockConnector::calls(&ldap.delete_calls), 1);
        let stored = h.reload(&alice).await.unwrap();
        assert!(stored.link(&ResourceKey::new(LDAP)).is_none());
    }

    #[tokio::test]
    async fn test_unlinked_delete_looks_up_by_name_only() {
        let h = Harness::new(test_config()).await;
        let ldap = h.add_resource(LDAP, MockConnector::new(LDAP)).await;
        ldap.seed(remote("r-1", "bob", "bob@example.com"));
        // No email, which every outbound resolution would require.
        let bob = h
            .save(
                Identity::new(AnyType::USER, "bob")
                    .with_attribute(Attribute::single("surname", "BOB")),
            )
            .await;
        let carol = h
            .save(
                Identity::new(AnyType::USER, "carol")
                    .with_attribute(Attribute::single("surname", "CAROL")),
            )
            .await;

        let found = h
            .engine
            .propagation()
            .propagate(&request(&bob, LDAP).forced(OperationType::Delete))
            .await;
        let absent = h
            .engine
            .propagation()
            .propagate(&request(&carol, LDAP).forced(OperationType::Delete))
            .await;

        assert_eq!(found.status, PropagationStatus::Success);
        assert_eq!(found.operation, Some(OperationType::Delete));
        assert!(ldap.object("r-1").is_none());
        assert_eq!(absent.status, PropagationStatus::Success);
        assert_eq!(MockConnector::calls(&ldap.get_calls), 2);
        assert_eq!(MockConnector::calls(&ldap.delete_calls), 1);
    }

    #[tokio::test]
    async fn test_unsupported_create_is_not_attempted() {
        let h = Harness::new(test_config()).await;
        let ldap = h
            .add_resource(
                LDAP,
                MockConnector::with_capabilities(LDAP, &[Capability::Search, Capability::Update]),
            )
            .await;
        let alice = h.save(user("alice", "alice@example.com")).await;

        let outcome = h.engine.propagation().propagate(&request(&alice, LDAP)).await;

        assert_eq!(outcome.status, PropagationStatus::NotAttempted);
        assert_eq!(outcome.operation, Some(OperationType::Create));
        assert_eq!(MockConnector::calls(&ldap.create_calls), 0);
        assert!(h.reload(&alice).await.unwrap().links.is_empty());
    }
}

mod failure_tests {
    use super::*;

    #[tokio::test]
    async fn test_bulk_isolates_failing_pair() {
        let h = Harness::new(test_config()).await;
        let ldap = h.add_resource(LDAP, MockConnector::new(LDAP)).await;
        ldap.fail_name("user2");

        let mut requests = Vec::new();
        for i in 0..5 {
            let identity = h
                .save(user(&format!("user{i}"), &format!("user{i}@example.com")))
                .await;
            requests.push(request(&identity, LDAP));
        }

        let result = h.engine.propagation().propagate_bulk(&requests).await;

        assert_eq!(result.outcomes.len(), 5);
        assert_eq!(result.succeeded, 4);
        assert_eq!(result.failed, 1);
        assert_eq!(result.not_attempted, 0);
        for (i, outcome) in result.outcomes.iter().enumerate() {
            assert_eq!(outcome.identity, requests[i].identity);
            if i == 2 {
                assert_eq!(outcome.status, PropagationStatus::Failure);
                assert_eq!(
                    outcome.detail.as_ref().unwrap().kind,
                    FailureKind::Connector(ErrorClass::Remote)
                );
            } else {
                assert_eq!(outcome.status, PropagationStatus::Success);
            }
        }
        assert_eq!(ldap.object_count(), 4);
    }

    #[tokio::test]
    async fn test_missing_mandatory_value_leaves_identity_untouched() {
        let h = Harness::new(test_config()).await;
        let ldap = h.add_resource(LDAP, MockConnector::new(LDAP)).await;
        let bob = h
            .save(
                Identity::new(AnyType::USER, "bob")
                    .with_attribute(Attribute::single("surname", "BOB")),
            )
            .await;
        let bob = h.link(bob, HR, "hr-42").await;

        let outcome = h.engine.propagation().propagate(&request(&bob, LDAP)).await;

        assert_eq!(outcome.status, PropagationStatus::Failure);
        assert_eq!(outcome.detail.unwrap().kind, FailureKind::Mapping);
        assert_eq!(MockConnector::calls(&ldap.create_calls), 0);
        assert_eq!(MockConnector::calls(&ldap.update_calls), 0);

        let stored = h.reload(&bob).await.unwrap();
        assert_eq!(stored.version, bob.version);
        assert_eq!(stored.links, bob.links);
    }

    #[tokio::test]
    async fn test_invalid_identity_rejected_before_remote_call() {
        let h = Harness::new(test_config()).await;
        let ldap = h.add_resource(LDAP, MockConnector::new(LDAP)).await;
        let alice = h.save(user("alice", "alice@example.com")).await;
        // Stored as a general value, now declared unique.
        h.store.register_schema(AttributeSchema::unique("surname")).await;

        let outcome = h.engine.propagation().propagate(&request(&alice, LDAP)).await;

        assert_eq!(outcome.status, PropagationStatus::Failure);
        assert_eq!(outcome.detail.unwrap().kind, FailureKind::Validation);
        assert_eq!(MockConnector::calls(&ldap.get_calls), 0);
        assert_eq!(MockConnector::calls(&ldap.create_calls), 0);
    }

    #[tokio::test]
    async fn test_unknown_resource_fails_pair() {
        let h = Harness::new(test_config()).await;
        let alice = h.save(user("alice", "alice@example.com")).await;

        let outcome = h
            .engine
            .propagation()
            .propagate(&request(&alice, "nowhere"))
            .await;

        assert_eq!(outcome.status, PropagationStatus::Failure);
        assert_eq!(outcome.detail.unwrap().kind, FailureKind::Store);
    }

    #[tokio::test]
    async fn test_hanging_call_times_out() {
        let config = EngineConfig {
            call_timeout_ms: 50,
            ..test_config()
        };
        let h = Harness::new(config).await;
        let ldap = h.add_resource(LDAP, MockConnector::new(LDAP)).await;
        ldap.hang_creates();
        let alice = h.save(user("alice", "alice@example.com")).await;

        let outcome = h.engine.propagation().propagate(&request(&alice, LDAP)).await;

        assert_eq!(outcome.status, PropagationStatus::Failure);
        assert_eq!(
            outcome.detail.unwrap().kind,
            FailureKind::Connector(ErrorClass::Timeout)
        );
        assert!(h.reload(&alice).await.unwrap().links.is_empty());
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let config = EngineConfig {
            retry: fast_retry(3),
            ..test_config()
        };
        let h = Harness::new(config).await;
        let ldap = h.add_resource(LDAP, MockConnector::new(LDAP)).await;
        ldap.fail_next_creates_transiently(2);
        let alice = h.save(user("alice", "alice@example.com")).await;

        let outcome = h.engine.propagation().propagate(&request(&alice, LDAP)).await;

        assert_eq!(outcome.status, PropagationStatus::Success);
        assert_eq!(MockConnector::calls(&ldap.create_calls), 3);
    }

    #[tokio::test]
    async fn test_transient_failure_without_retry_fails() {
        let h = Harness::new(test_config()).await;
        let ldap = h.add_resource(LDAP, MockConnector::new(LDAP)).await;
        ldap.fail_next_creates_transiently(1);
        let alice = h.save(user("alice", "alice@example.com")).await;

        let outcome = h.engine.propagation().propagate(&request(&alice, LDAP)).await;

        assert_eq!(
            outcome.detail.unwrap().kind,
            FailureKind::Connector(ErrorClass::Connectivity)
        );
        assert_eq!(MockConnector::calls(&ldap.create_calls), 1);
    }
}

mod password_tests {
    use super::*;

    #[tokio::test]
    async fn test_password_sent_as_digest() {
        let cipher = Arc::new(PasswordCipher::new([7u8; 32]));
        let resolver_cipher = cipher.clone();
        let h = Harness::with_resolver(test_config(), move |store| {
            MappingResolver::new(store).with_cipher(resolver_cipher)
        })
        .await;
        let ldap = h
            .add_resource_with(LDAP, Arc::new(MockConnector::new(LDAP)), |resource| {
                resource
                    .with_mapping(common::user_mapping().with_item(MappingItem::password()))
                    .with_password_propagation(PasswordPropagation::Sha256)
            })
            .await;

        let mut alice = user("alice", "alice@example.com");
        cipher.set_password(&mut alice, "s3cret").unwrap();
        let alice = h.save(alice).await;

        let outcome = h.engine.propagation().propagate(&request(&alice, LDAP)).await;
        assert!(outcome.is_success());

        let sent = ldap.last_attributes.lock().unwrap().clone().unwrap();
        let expected = hex::encode(Sha256::digest(b"s3cret"));
        assert_eq!(sent.get_string(PASSWORD), Some(expected.as_str()));
    }

    #[tokio::test]
    async fn test_password_without_cipher_fails_mapping() {
        let h = Harness::new(test_config()).await;
        let ldap = h
            .add_resource_with(LDAP, Arc::new(MockConnector::new(LDAP)), |resource| {
                resource.with_mapping(common::user_mapping().with_item(MappingItem::password()))
            })
            .await;

        let cipher = PasswordCipher::new([7u8; 32]);
        let mut alice = user("alice", "alice@example.com");
        cipher.set_password(&mut alice, "s3cret").unwrap();
        let alice = h.save(alice).await;

        let outcome = h.engine.propagation().propagate(&request(&alice, LDAP)).await;

        assert_eq!(outcome.detail.unwrap().kind, FailureKind::Mapping);
        assert_eq!(MockConnector::calls(&ldap.create_calls), 0);
    }
}

mod link_tests {
    use super::*;

    #[tokio::test]
    async fn test_concurrent_propagation_keeps_both_links() {
        let h = Harness::new(test_config()).await;
        h.add_resource(LDAP, MockConnector::new(LDAP)).await;
        h.add_resource(HR, MockConnector::new(HR)).await;
        let alice = h.save(user("alice", "alice@example.com")).await;

        let result = h
            .engine
            .propagation()
            .propagate_bulk(&[request(&alice, LDAP), request(&alice, HR)])
            .await;

        assert_eq!(result.succeeded, 2);
        let stored = h.reload(&alice).await.unwrap();
        assert!(stored.link(&ResourceKey::new(LDAP)).is_some());
        assert!(stored.link(&ResourceKey::new(HR)).is_some());
    }
}
