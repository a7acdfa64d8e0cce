//! Interaction dispatch integration tests: identifier ownership, constraint, rate limit
//! and filter rejections, handler failures, persistent handler invocation and parallel
//! dispatch on a multi-threaded runtime.

mod common;

use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use common::{
    block_user, builder_with, init_test_logging, registry_with, slow_filter, test_system,
    test_system_with, RecordingRejectionHandler, RecordingResponder,
};
use component_core::clock::{Clock, MonotonicClock};
use component_core::filters::{all_of, ComponentInteractionRejectionHandler, FilterRegistry};
use component_core::lifecycle::{ComponentBuilder, DispatchOutcome, GroupBuilder, RejectionKind};
use component_core::models::{ComponentInteraction, InteractionConstraints, TimeoutOwner};
use component_core::ratelimit::CooldownRateLimiter;
use component_core::store::{ComponentStore, InMemoryComponentStore};
use component_core::ComponentError;

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn count(outcomes: &[DispatchOutcome], expected: &DispatchOutcome) -> usize {
    outcomes.iter().filter(|outcome| *outcome == expected).count()
}

#[tokio::test(start_paused = true)]
async fn test_foreign_identifiers_are_ignored() -> TestResult {
    let harness = test_system().await?;
    info!("🧪 Testing foreign identifier handling");

    let listener = harness.system.listener();
    let prefix = harness.system.config().identity.prefix.clone();

    let foreign = listener
        .handle(ComponentInteraction::button("other-bot:confirm", 1))
        .await;
    let malformed = listener
        .handle(ComponentInteraction::button(format!("{prefix}abc"), 1))
        .await;

    assert_eq!(foreign, DispatchOutcome::Ignored);
    assert_eq!(malformed, DispatchOutcome::Ignored);
    assert!(harness.responder.replies().is_empty());

    info!("✅ Foreign identifiers ignored without replying");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_unknown_component_replies_expired() -> TestResult {
    let harness = test_system().await?;
    info!("🧪 Testing unknown component");

    let unknown = harness.system.controller().codec().encode(4242);
    let outcome = harness
        .system
        .dispatch(ComponentInteraction::button(unknown, 5))
        .await?;

    assert_eq!(outcome, DispatchOutcome::Expired);
    assert_eq!(
        harness.responder.replies_to(5),
        vec![harness.system.config().messages.component_expired.clone()]
    );

    info!("✅ Unknown component answered as expired");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_constraints_reject_other_users() -> TestResult {
    let harness = test_system().await?;
    info!("🧪 Testing interaction constraints");

    let component = harness
        .system
        .controller()
        .create_component(
            ComponentBuilder::ephemeral()
                .single_use(true)
                .constraints(InteractionConstraints::of_users([1]))
                .bind_to(|_| async { Ok(()) }),
        )
        .await?;

    let listener = harness.system.listener();
    let rejected = listener
        .handle(ComponentInteraction::button(&component.component_id, 2))
        .await;
    assert_eq!(rejected, DispatchOutcome::Rejected(RejectionKind::Constraints));
    assert_eq!(
        harness.responder.replies_to(2),
        vec![harness.system.config().messages.component_not_allowed.clone()]
    );

    // A rejected interaction does not consume the single use
    assert!(harness.store.get_component(component.internal_id).await?.is_some());

    let allowed = listener
        .handle(ComponentInteraction::button(&component.component_id, 1))
        .await;
    assert_eq!(allowed, DispatchOutcome::Executed);

    info!("✅ Only the allowed user could use the component");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_interactions_are_rejected() -> TestResult {
    let harness = test_system_with(|builder| {
        builder
            .rate_limits()
            .register("votes", Arc::new(CooldownRateLimiter::new(Duration::from_secs(10))))
            .expect("group registered once");
        builder
    })
    .await?;
    info!("🧪 Testing rate limited components");

    let controller = harness.system.controller();
    let reference = controller.create_rate_limit_reference("votes", "upvote")?;
    let component = controller
        .create_component(ComponentBuilder::ephemeral().rate_limit_reference(reference))
        .await?;

    let listener = harness.system.listener();
    let first = listener
        .handle(ComponentInteraction::button(&component.component_id, 1))
        .await;
    let second = listener
        .handle(ComponentInteraction::button(&component.component_id, 1))
        .await;

    assert_eq!(first, DispatchOutcome::Executed);
    assert!(matches!(
        second,
        DispatchOutcome::Rejected(RejectionKind::RateLimited { retry_after }) if retry_after <= Duration::from_secs(10)
    ));
    assert_eq!(harness.responder.replies_to(1).len(), 1);

    tokio::time::sleep(Duration::from_secs(11)).await;
    let third = listener
        .handle(ComponentInteraction::button(&component.component_id, 1))
        .await;
    assert_eq!(third, DispatchOutcome::Executed);

    info!("✅ Cooldown enforced and released");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_unknown_rate_limit_group_is_rejected_at_creation() -> TestResult {
    let harness = test_system().await?;
    info!("🧪 Testing unregistered rate limit group");

    let controller = harness.system.controller();
    let reference = controller.create_rate_limit_reference("missing", "button")?;
    let result = controller
        .create_component(ComponentBuilder::ephemeral().rate_limit_reference(reference))
        .await;

    assert!(matches!(
        result,
        Err(ComponentError::UnknownRateLimitGroup(group)) if group == "missing"
    ));

    info!("✅ Unknown group refused");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_component_filter_rejection_goes_to_rejection_handler() -> TestResult {
    let rejections = Arc::new(RecordingRejectionHandler::default());
    let handler = Arc::clone(&rejections);
    let harness = test_system_with(move |builder| {
        builder
            .with_filters(registry_with(vec![block_user("no_bob", 13, false)]))
            .with_rejection_handler(handler as Arc<dyn ComponentInteractionRejectionHandler>)
    })
    .await?;
    info!("🧪 Testing declared component filters");

    let controller = harness.system.controller();
    let no_bob = controller
        .filters()
        .resolve("no_bob")
        .ok_or("filter not registered")?;
    let component = controller
        .create_component(ComponentBuilder::ephemeral().add_filter(no_bob))
        .await?;

    let listener = harness.system.listener();
    let bob = listener
        .handle(ComponentInteraction::button(&component.component_id, 13))
        .await;
    assert_eq!(
        bob,
        DispatchOutcome::Rejected(RejectionKind::Filter {
            filter: "no_bob".to_string(),
            reason: "no_bob says no".to_string(),
        })
    );
    assert_eq!(
        rejections.rejections.lock().clone(),
        vec![(None, "no_bob says no".to_string())]
    );
    assert!(harness.responder.replies().is_empty());

    let alice = listener
        .handle(ComponentInteraction::button(&component.component_id, 14))
        .await;
    assert_eq!(alice, DispatchOutcome::Executed);

    info!("✅ Filter rejection routed to the rejection handler");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_global_filters_run_everywhere_and_cannot_be_declared() -> TestResult {
    let harness = test_system_with(|builder| {
        builder
            .with_filters(registry_with(vec![block_user("banned", 66, true)]))
            .with_rejection_handler(Arc::new(RecordingRejectionHandler::default()))
    })
    .await?;
    info!("🧪 Testing global filters");

    let controller = harness.system.controller();
    let component = controller
        .create_component(ComponentBuilder::ephemeral())
        .await?;

    let outcome = harness
        .system
        .listener()
        .handle(ComponentInteraction::button(&component.component_id, 66))
        .await;
    assert!(matches!(
        outcome,
        DispatchOutcome::Rejected(RejectionKind::Filter { ref filter, .. }) if filter == "banned"
    ));

    let banned = controller
        .filters()
        .resolve("banned")
        .ok_or("filter not registered")?;
    let declared = controller
        .create_component(ComponentBuilder::ephemeral().add_filter(banned))
        .await;
    assert!(matches!(declared, Err(ComponentError::GlobalFilterDeclared(_))));

    info!("✅ Global filter applied without being declared");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_filters_require_rejection_handler() -> TestResult {
    init_test_logging();
    info!("🧪 Testing missing rejection handler");

    let clock = Arc::new(MonotonicClock::new());
    let store = Arc::new(InMemoryComponentStore::new(clock.clone() as Arc<dyn Clock>));
    let result = builder_with(store, clock, Arc::new(RecordingResponder::default()))
        .with_filters(registry_with(vec![block_user("no_bob", 13, false)]))
        .build()
        .await;

    assert!(matches!(result, Err(ComponentError::MissingRejectionHandler)));

    info!("✅ Build refused without a rejection handler");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_handler_failure_replies_general_error() -> TestResult {
    let harness = test_system().await?;
    info!("🧪 Testing handler failure");

    let component = harness
        .system
        .controller()
        .create_component(
            ComponentBuilder::ephemeral()
                .single_use(true)
                .bind_to(|_| async { Err(anyhow::anyhow!("database unavailable")) }),
        )
        .await?;

    let outcome = harness
        .system
        .listener()
        .handle(ComponentInteraction::button(&component.component_id, 3))
        .await;

    assert_eq!(outcome, DispatchOutcome::HandlerFailed);
    assert_eq!(
        harness.responder.replies_to(3),
        vec![harness.system.config().messages.general_error.clone()]
    );
    // Lifecycle is applied before the handler runs
    assert!(harness.store.get_component(component.internal_id).await?.is_none());

    info!("✅ Failure reported and the user notified");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_persistent_handler_receives_arguments() -> TestResult {
    let received: Arc<Mutex<Vec<(u64, Vec<Value>)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    let harness = test_system_with(move |builder| {
        builder
            .persistent_handlers()
            .register_component_fn("vote", move |interaction, args| {
                let sink = Arc::clone(&sink);
                async move {
                    sink.lock().push((interaction.user_id, args));
                    Ok(())
                }
            })
            .expect("handler registered once");
        builder
    })
    .await?;
    info!("🧪 Testing persistent handler dispatch");

    let component = harness
        .system
        .controller()
        .create_component(
            ComponentBuilder::persistent().bind_to_handler("vote", vec![json!(7), json!("up")]),
        )
        .await?;

    let outcome = harness
        .system
        .dispatch(ComponentInteraction::button(&component.component_id, 21))
        .await?;

    assert_eq!(outcome, DispatchOutcome::Executed);
    assert_eq!(
        received.lock().clone(),
        vec![(21, vec![json!(7), json!("up")])]
    );

    info!("✅ Persistent handler invoked with stored arguments");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_is_checked_before_constraints() -> TestResult {
    let harness = test_system_with(|builder| {
        builder
            .rate_limits()
            .register("votes", Arc::new(CooldownRateLimiter::new(Duration::from_secs(10))))
            .expect("group registered once");
        builder
    })
    .await?;
    info!("🧪 Testing rate limit ordering against constraints");

    let controller = harness.system.controller();
    let reference = controller.create_rate_limit_reference("votes", "owner-only")?;
    let component = controller
        .create_component(
            ComponentBuilder::ephemeral()
                .rate_limit_reference(reference)
                .constraints(InteractionConstraints::of_users([1])),
        )
        .await?;

    let listener = harness.system.listener();
    let first = listener
        .handle(ComponentInteraction::button(&component.component_id, 2))
        .await;
    assert_eq!(first, DispatchOutcome::Rejected(RejectionKind::Constraints));

    let second = listener
        .handle(ComponentInteraction::button(&component.component_id, 2))
        .await;
    let DispatchOutcome::Rejected(RejectionKind::RateLimited { retry_after }) = second else {
        return Err(format!("expected a rate limit rejection, got {second:?}").into());
    };

    let messages = &harness.system.config().messages;
    assert_eq!(
        harness.responder.replies_to(2),
        vec![
            messages.component_not_allowed.clone(),
            messages.rate_limited_message(retry_after),
        ]
    );

    info!("✅ Cooldown reply sent before the constraints were consulted");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_unresolvable_declared_filter_replies_not_allowed() -> TestResult {
    let harness = test_system_with(|builder| {
        builder
            .with_filters(registry_with(vec![block_user("no_bob", 13, false)]))
            .with_rejection_handler(Arc::new(RecordingRejectionHandler::default()))
    })
    .await?;
    info!("🧪 Testing a declared filter that no longer resolves");

    let controller = harness.system.controller();
    let no_bob = controller
        .filters()
        .resolve("no_bob")
        .ok_or("filter not registered")?;
    let component = controller
        .create_component(ComponentBuilder::ephemeral().add_filter(no_bob))
        .await?;

    controller.filters().clear();

    let outcome = harness
        .system
        .listener()
        .handle(ComponentInteraction::button(&component.component_id, 14))
        .await;

    assert_eq!(outcome, DispatchOutcome::Failed);
    assert_eq!(
        harness.responder.replies_to(14),
        vec![harness.system.config().messages.component_not_allowed.clone()]
    );
    assert!(harness.store.get_component(component.internal_id).await?.is_some());

    info!("✅ Missing filter answered as not allowed");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_registered_composite_filter_can_be_declared() -> TestResult {
    let registry = Arc::new(FilterRegistry::new());
    let neither = registry.register_named(
        "not_bob_nor_eve",
        all_of(vec![block_user("no_bob", 13, false), block_user("no_eve", 14, false)]),
    )?;
    let shared = Arc::clone(&registry);
    let harness = test_system_with(move |builder| {
        builder
            .with_filters(shared)
            .with_rejection_handler(Arc::new(RecordingRejectionHandler::default()))
    })
    .await?;
    info!("🧪 Testing a composite filter registered under its own name");

    let component = harness
        .system
        .controller()
        .create_component(ComponentBuilder::ephemeral().add_filter(neither))
        .await?;

    let listener = harness.system.listener();
    let eve = listener
        .handle(ComponentInteraction::button(&component.component_id, 14))
        .await;
    assert_eq!(
        eve,
        DispatchOutcome::Rejected(RejectionKind::Filter {
            filter: "not_bob_nor_eve".to_string(),
            reason: "no_eve says no".to_string(),
        })
    );

    let carol = listener
        .handle(ComponentInteraction::button(&component.component_id, 15))
        .await;
    assert_eq!(carol, DispatchOutcome::Executed);

    info!("✅ Composite evaluated through its registered name");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_uses_of_single_use_persistent_component_run_once() -> TestResult {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let harness = test_system_with(move |builder| {
        builder
            .persistent_handlers()
            .register_component_fn("vote", move |_, _| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .expect("handler registered once");
        builder
            .with_filters(registry_with(vec![slow_filter("slow", Duration::from_millis(50))]))
            .with_rejection_handler(Arc::new(RecordingRejectionHandler::default()))
    })
    .await?;
    info!("🧪 Testing parallel uses of a single-use persistent component");

    let controller = harness.system.controller();
    let slow = controller
        .filters()
        .resolve("slow")
        .ok_or("filter not registered")?;
    let component = controller
        .create_component(
            ComponentBuilder::persistent()
                .single_use(true)
                .bind_to_handler("vote", Vec::new())
                .add_filter(slow),
        )
        .await?;

    let (first, second) = tokio::join!(
        harness
            .system
            .dispatch(ComponentInteraction::button(&component.component_id, 1)),
        harness
            .system
            .dispatch(ComponentInteraction::button(&component.component_id, 2)),
    );
    let outcomes = vec![first?, second?];

    assert_eq!(count(&outcomes, &DispatchOutcome::Executed), 1, "{outcomes:?}");
    assert_eq!(count(&outcomes, &DispatchOutcome::Expired), 1, "{outcomes:?}");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(harness.store.get_component(component.internal_id).await?.is_none());

    info!("✅ Handler ran once and the other use was answered as expired");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_uses_of_single_use_ephemeral_component_reply_expired() -> TestResult {
    let harness = test_system_with(|builder| {
        builder
            .with_filters(registry_with(vec![slow_filter("slow", Duration::from_millis(50))]))
            .with_rejection_handler(Arc::new(RecordingRejectionHandler::default()))
    })
    .await?;
    info!("🧪 Testing parallel uses of a single-use ephemeral component");

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let controller = harness.system.controller();
    let slow = controller
        .filters()
        .resolve("slow")
        .ok_or("filter not registered")?;
    let component = controller
        .create_component(
            ComponentBuilder::ephemeral()
                .single_use(true)
                .add_filter(slow)
                .bind_to(move |_| {
                    let counter = Arc::clone(&counter);
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                }),
        )
        .await?;

    let (first, second) = tokio::join!(
        harness
            .system
            .dispatch(ComponentInteraction::button(&component.component_id, 1)),
        harness
            .system
            .dispatch(ComponentInteraction::button(&component.component_id, 2)),
    );
    let outcomes = vec![first?, second?];

    assert_eq!(count(&outcomes, &DispatchOutcome::Executed), 1, "{outcomes:?}");
    assert_eq!(count(&outcomes, &DispatchOutcome::Expired), 1, "{outcomes:?}");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        harness.responder.replies(),
        vec![harness.system.config().messages.component_expired.clone()]
    );

    info!("✅ Losing use answered as expired instead of a general error");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_uses_of_single_use_group_members_run_once() -> TestResult {
    let harness = test_system_with(|builder| {
        builder
            .with_filters(registry_with(vec![slow_filter("slow", Duration::from_millis(50))]))
            .with_rejection_handler(Arc::new(RecordingRejectionHandler::default()))
    })
    .await?;
    info!("🧪 Testing parallel uses of two members of a single-use group");

    let calls = Arc::new(AtomicUsize::new(0));
    let controller = harness.system.controller();
    let slow = controller
        .filters()
        .resolve("slow")
        .ok_or("filter not registered")?;

    let mut members = Vec::new();
    for _ in 0..2 {
        let counter = Arc::clone(&calls);
        members.push(
            controller
                .create_component(
                    ComponentBuilder::ephemeral()
                        .add_filter(Arc::clone(&slow))
                        .bind_to(move |_| {
                            let counter = Arc::clone(&counter);
                            async move {
                                counter.fetch_add(1, Ordering::SeqCst);
                                Ok(())
                            }
                        }),
                )
                .await?,
        );
    }
    controller
        .create_group(GroupBuilder::new(&members).single_use(true))
        .await?;

    let (first, second) = tokio::join!(
        harness
            .system
            .dispatch(ComponentInteraction::button(&members[0].component_id, 1)),
        harness
            .system
            .dispatch(ComponentInteraction::button(&members[1].component_id, 2)),
    );
    let outcomes = vec![first?, second?];

    assert_eq!(count(&outcomes, &DispatchOutcome::Executed), 1, "{outcomes:?}");
    assert_eq!(count(&outcomes, &DispatchOutcome::Expired), 1, "{outcomes:?}");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    for member in &members {
        assert!(harness.store.get_component(member.internal_id).await?.is_none());
    }

    info!("✅ One member consumed the whole group");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_timeout_resets_leave_one_armed_timer() -> TestResult {
    let harness = test_system().await?;
    info!("🧪 Testing concurrent timeout resets on one owner");

    let controller = Arc::clone(harness.system.controller());
    let component = controller
        .create_component(
            ComponentBuilder::ephemeral()
                .timeout(Duration::from_secs(60))
                .reset_timeout_on_use(Duration::from_secs(30)),
        )
        .await?;
    let record = controller
        .get_active_component(component.internal_id)
        .await?
        .ok_or("component missing")?;

    let mut resets = Vec::new();
    for _ in 0..16 {
        let controller = Arc::clone(&controller);
        let record = record.clone();
        resets.push(tokio::spawn(async move {
            controller.try_reset_timeout(&record).await
        }));
    }
    for reset in resets {
        reset.await??;
    }

    let owner = TimeoutOwner::component(component.internal_id);
    let stored = harness
        .store
        .get_component(component.internal_id)
        .await?
        .ok_or("component missing")?;

    assert_eq!(controller.timeouts().armed_count(), 1);
    assert!(controller.timeouts().is_armed(owner));
    assert_eq!(controller.timeouts().armed_at(owner), stored.expires_at);
    assert!(stored.expires_at < component.expires_at);

    info!("✅ Resets serialized into a single timer matching the stored expiry");
    Ok(())
}
