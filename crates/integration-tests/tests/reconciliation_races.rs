//! Payment reconciliation across callbacks, webhooks and admin overrides.
//!
//! Whatever order confirmations arrive in, and however often, an order is
//! completed once, gets one grant per item and triggers one email.

#![allow(clippy::unwrap_used)]

use futures::future::join_all;

use wallcraft_core::{OrderId, PaymentMethod, PaymentStatus};
use wallcraft_integration_tests::{TestApp, signed_proof, signed_webhook_body, webhook};
use wallcraft_storefront::services::payments::CallbackProof;
use wallcraft_storefront::services::reconciliation::{ReconcileError, WebhookOutcome};

async fn captured_webhook(
    app: &TestApp,
    payment_id: &str,
    provider_order_id: &str,
    local: Option<OrderId>,
) -> WebhookOutcome {
    let (body, signature) = webhook("payment.captured", payment_id, Some(provider_order_id), local);
    app.state
        .reconciliation()
        .handle_webhook(PaymentMethod::Razorpay, &body, Some(&signature))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_callback_then_webhook_finalizes_once() {
    let app = TestApp::new();
    let buyer = app.user("hana@example.com").await;
    let wallpaper = app.wallpaper("aurora-over-the-fjord", "2.99").await;
    let (order, provider_order_id) = app.razorpay_checkout(&buyer, &wallpaper).await;

    let settlement = app
        .state
        .reconciliation()
        .confirm_callback(
            PaymentMethod::Razorpay,
            &buyer,
            order.id,
            &signed_proof(&provider_order_id, "pay_hana"),
        )
        .await
        .unwrap();
    assert!(settlement.changed);
    assert_eq!(settlement.grants_issued, 1);
    assert_eq!(settlement.order.payment_status, PaymentStatus::Completed);
    assert_eq!(settlement.order.payment_id.as_deref(), Some("pay_hana"));
    assert_eq!(settlement.order.paid_at, Some(app.now()));

    // At-least-once delivery: the same capture arrives three times.
    for _ in 0..3 {
        let outcome = captured_webhook(&app, "pay_hana", &provider_order_id, Some(order.id)).await;
        let WebhookOutcome::Settled(again) = outcome else {
            panic!("expected settled outcome, got {outcome:?}");
        };
        assert!(!again.changed);
        assert_eq!(again.grants_issued, 0);
    }
    assert_eq!(app.product_downloads(wallpaper.id).await, 1);

    let grants = app.state.entitlements().grants_for_order(order.id).await.unwrap();
    assert_eq!(grants.len(), 1);
    assert_eq!(grants[0].user_id, buyer.id);
    assert_eq!(grants[0].product_id, wallpaper.id);
    assert_eq!(grants[0].max_downloads, 5);
    assert_eq!(grants[0].expires_at, app.now() + chrono::Duration::hours(24));

    let sent = app.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to.as_str(), "hana@example.com");
    assert_eq!(sent[0].order_number, order.order_number);
    assert_eq!(
        sent[0].download_url,
        format!("http://wallcraft.test/api/download/{}", grants[0].token)
    );
}

#[tokio::test]
async fn test_webhook_before_callback() {
    let app = TestApp::new();
    let buyer = app.user("ivan@example.com").await;
    let wallpaper = app.wallpaper("liquid-chrome", "3.49").await;
    let (order, provider_order_id) = app.razorpay_checkout(&buyer, &wallpaper).await;

    // Notes are optional; the provider order id is enough to find the order.
    let outcome = captured_webhook(&app, "pay_ivan", &provider_order_id, None).await;
    let WebhookOutcome::Settled(settlement) = outcome else {
        panic!("expected settled outcome, got {outcome:?}");
    };
    assert!(settlement.changed);
    assert_eq!(settlement.order.id, order.id);

    let late = app
        .state
        .reconciliation()
        .confirm_callback(
            PaymentMethod::Razorpay,
            &buyer,
            order.id,
            &signed_proof(&provider_order_id, "pay_ivan"),
        )
        .await
        .unwrap();
    assert!(!late.changed);
    assert_eq!(late.order.payment_status, PaymentStatus::Completed);

    assert_eq!(
        app.state.entitlements().grants_for_order(order.id).await.unwrap().len(),
        1
    );
    assert_eq!(app.notifier.sent().len(), 1);
}

#[tokio::test]
async fn test_concurrent_confirmations_issue_one_grant() {
    let app = TestApp::new();
    let buyer = app.user("jade@example.com").await;
    let wallpaper = app.wallpaper("pillars-of-creation", "4.99").await;
    let (order, provider_order_id) = app.razorpay_checkout(&buyer, &wallpaper).await;

    let mut tasks = Vec::new();
    for i in 0..16 {
        let state = app.state.clone();
        let buyer = buyer.clone();
        let provider_order_id = provider_order_id.clone();
        tasks.push(tokio::spawn(async move {
            if i % 2 == 0 {
                state
                    .reconciliation()
                    .confirm_callback(
                        PaymentMethod::Razorpay,
                        &buyer,
                        order.id,
                        &signed_proof(&provider_order_id, "pay_jade"),
                    )
                    .await
                    .map(|s| s.changed)
            } else {
                let (body, signature) = webhook(
                    "payment.captured",
                    "pay_jade",
                    Some(&provider_order_id),
                    Some(order.id),
                );
                state
                    .reconciliation()
                    .handle_webhook(PaymentMethod::Razorpay, &body, Some(&signature))
                    .await
                    .map(|outcome| matches!(outcome, WebhookOutcome::Settled(s) if s.changed))
            }
        }));
    }

    let changed = join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .filter(|changed| *changed)
        .count();

    assert_eq!(changed, 1);
    assert_eq!(
        app.state.entitlements().grants_for_order(order.id).await.unwrap().len(),
        1
    );
    assert_eq!(app.notifier.sent().len(), 1);
    assert_eq!(app.product_downloads(wallpaper.id).await, 1);
    assert_eq!(app.order(order.id).await.payment_status, PaymentStatus::Completed);
}

#[tokio::test]
async fn test_forged_callbacks_are_rejected() {
    let app = TestApp::new();
    let buyer = app.user("kai@example.com").await;
    let wallpaper = app.wallpaper("misty-redwoods", "1.99").await;
    let (order, provider_order_id) = app.razorpay_checkout(&buyer, &wallpaper).await;

    let tampered = CallbackProof {
        signature: "00".repeat(32),
        ..signed_proof(&provider_order_id, "pay_kai")
    };
    let err = app
        .state
        .reconciliation()
        .confirm_callback(PaymentMethod::Razorpay, &buyer, order.id, &tampered)
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::InvalidSignature));

    // A genuine proof for a different provider order cannot complete this one.
    let (_, other_provider_order) = app.razorpay_checkout(&buyer, &wallpaper).await;
    let err = app
        .state
        .reconciliation()
        .confirm_callback(
            PaymentMethod::Razorpay,
            &buyer,
            order.id,
            &signed_proof(&other_provider_order, "pay_kai"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::InvalidSignature));

    // Another account cannot confirm the buyer's order.
    let stranger = app.user("lou@example.com").await;
    let err = app
        .state
        .reconciliation()
        .confirm_callback(
            PaymentMethod::Razorpay,
            &stranger,
            order.id,
            &signed_proof(&provider_order_id, "pay_kai"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::UnknownOrder));

    assert_eq!(app.order(order.id).await.payment_status, PaymentStatus::Pending);
    assert!(app.notifier.sent().is_empty());
}

#[tokio::test]
async fn test_webhook_signature_and_routing() {
    let app = TestApp::new();
    let reconciliation = app.state.reconciliation();

    let (body, _) = webhook("payment.captured", "pay_x", Some("order_x"), None);
    let err = reconciliation
        .handle_webhook(PaymentMethod::Razorpay, &body, Some("deadbeef"))
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::InvalidSignature));

    let err = reconciliation
        .handle_webhook(PaymentMethod::Razorpay, &body, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::InvalidSignature));

    let (body, signature) = webhook("payment.captured", "pay_x", Some("order_x"), None);
    let outcome = reconciliation
        .handle_webhook(PaymentMethod::Razorpay, &body, Some(&signature))
        .await
        .unwrap();
    assert!(matches!(outcome, WebhookOutcome::UnknownOrder));

    let (body, signature) = webhook("refund.created", "pay_x", Some("order_x"), None);
    let outcome = reconciliation
        .handle_webhook(PaymentMethod::Razorpay, &body, Some(&signature))
        .await
        .unwrap();
    assert!(matches!(outcome, WebhookOutcome::Ignored(ref name) if name == "refund.created"));
}

#[tokio::test]
async fn test_signed_undecodable_webhook_is_acknowledged() {
    let app = TestApp::new();
    let reconciliation = app.state.reconciliation();

    let (body, signature) = signed_webhook_body(b"not json at all");
    let outcome = reconciliation
        .handle_webhook(PaymentMethod::Razorpay, &body, Some(&signature))
        .await
        .unwrap();
    assert!(matches!(outcome, WebhookOutcome::Malformed(_)));

    let (body, signature) =
        signed_webhook_body(br#"{"entity":"event","event":"payment.captured","payload":{}}"#);
    let outcome = reconciliation
        .handle_webhook(PaymentMethod::Razorpay, &body, Some(&signature))
        .await
        .unwrap();
    assert!(matches!(outcome, WebhookOutcome::Malformed(_)));

    // The same bytes with a bad signature are still rejected.
    let err = reconciliation
        .handle_webhook(PaymentMethod::Razorpay, b"not json at all", Some("0badc0de"))
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::InvalidSignature));
}

#[tokio::test]
async fn test_failed_is_terminal() {
    let app = TestApp::new();
    let buyer = app.user("mae@example.com").await;
    let wallpaper = app.wallpaper("gradient-dusk", "0.99").await;
    let (order, provider_order_id) = app.razorpay_checkout(&buyer, &wallpaper).await;

    let (body, signature) = webhook(
        "payment.failed",
        "pay_mae",
        Some(&provider_order_id),
        Some(order.id),
    );
    let outcome = app
        .state
        .reconciliation()
        .handle_webhook(PaymentMethod::Razorpay, &body, Some(&signature))
        .await
        .unwrap();
    let WebhookOutcome::Settled(settlement) = outcome else {
        panic!("expected settled outcome, got {outcome:?}");
    };
    assert!(settlement.changed);
    assert_eq!(settlement.order.payment_status, PaymentStatus::Failed);

    // A late capture is acknowledged but does not resurrect the order.
    let outcome = captured_webhook(&app, "pay_mae", &provider_order_id, Some(order.id)).await;
    assert!(matches!(outcome, WebhookOutcome::Conflict(ref o) if o.payment_status == PaymentStatus::Failed));

    let err = app
        .state
        .reconciliation()
        .confirm_callback(
            PaymentMethod::Razorpay,
            &buyer,
            order.id,
            &signed_proof(&provider_order_id, "pay_mae"),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ReconcileError::IllegalTransition {
            from: PaymentStatus::Failed,
            to: PaymentStatus::Completed
        }
    ));

    assert!(
        app.state
            .entitlements()
            .grants_for_order(order.id)
            .await
            .unwrap()
            .is_empty()
    );
    assert!(app.notifier.sent().is_empty());
}

#[tokio::test]
async fn test_failure_after_completion_keeps_order_completed() {
    let app = TestApp::new();
    let buyer = app.user("nia@example.com").await;
    let wallpaper = app.wallpaper("saturn-rings-study", "2.49").await;
    let (order, provider_order_id) = app.razorpay_checkout(&buyer, &wallpaper).await;

    captured_webhook(&app, "pay_nia", &provider_order_id, Some(order.id)).await;

    let (body, signature) = webhook(
        "payment.failed",
        "pay_nia",
        Some(&provider_order_id),
        Some(order.id),
    );
    let outcome = app
        .state
        .reconciliation()
        .handle_webhook(PaymentMethod::Razorpay, &body, Some(&signature))
        .await
        .unwrap();
    assert!(matches!(outcome, WebhookOutcome::Conflict(ref o) if o.payment_status == PaymentStatus::Completed));
    assert_eq!(app.order(order.id).await.payment_status, PaymentStatus::Completed);
}

#[tokio::test]
async fn test_email_failure_does_not_block_completion() {
    let app = TestApp::new();
    let buyer = app.user("oli@example.com").await;
    let wallpaper = app.wallpaper("aurora-over-the-fjord", "2.99").await;
    let (order, provider_order_id) = app.razorpay_checkout(&buyer, &wallpaper).await;
    app.notifier.set_failing(true);

    let settlement = app
        .state
        .reconciliation()
        .confirm_callback(
            PaymentMethod::Razorpay,
            &buyer,
            order.id,
            &signed_proof(&provider_order_id, "pay_oli"),
        )
        .await
        .unwrap();

    assert!(settlement.changed);
    assert_eq!(settlement.grants_issued, 1);
    assert_eq!(app.notifier.sent().len(), 1);
}

#[tokio::test]
async fn test_admin_override_and_resend() {
    let app = TestApp::new();
    let admin = app.admin("ops@wallcraft.store").await;
    let buyer = app.user("pia@example.com").await;
    let wallpaper = app.wallpaper("liquid-chrome", "3.49").await;
    let session = app
        .state
        .checkout()
        .start(&buyer, wallpaper.id, PaymentMethod::CryptoUsdt)
        .await
        .unwrap();
    let reconciliation = app.state.reconciliation();

    let err = reconciliation
        .resend_confirmations(session.order_id)
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::NotCompleted(PaymentStatus::Pending)));

    let settlement = reconciliation
        .admin_override(&admin, session.order_id, PaymentStatus::Completed)
        .await
        .unwrap();
    assert!(settlement.changed);
    assert_eq!(settlement.grants_issued, 1);
    assert!(settlement.order.payment_id.is_none());

    let repeat = reconciliation
        .admin_override(&admin, session.order_id, PaymentStatus::Completed)
        .await
        .unwrap();
    assert!(!repeat.changed);

    let err = reconciliation
        .admin_override(&admin, session.order_id, PaymentStatus::Pending)
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::IllegalTransition { .. }));

    let err = reconciliation
        .admin_override(&admin, session.order_id, PaymentStatus::Failed)
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::IllegalTransition { .. }));

    let resent = reconciliation
        .resend_confirmations(session.order_id)
        .await
        .unwrap();
    assert_eq!(resent, 1);
    assert_eq!(app.notifier.sent().len(), 2);
    assert_eq!(
        app.state
            .entitlements()
            .grants_for_order(session.order_id)
            .await
            .unwrap()
            .len(),
        1
    );

    let err = reconciliation
        .admin_override(&admin, OrderId::generate(), PaymentStatus::Completed)
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::UnknownOrder));
}
