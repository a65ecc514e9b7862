//! End-to-end HTTP flows through the full router.

#![allow(clippy::unwrap_used)]

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use serde_json::json;

use wallcraft_integration_tests::{
    PASSWORD, TestApp, from_peer, json_request, json_response, login, send, session_cookie,
    signed_proof, signed_webhook_body, webhook,
};
use wallcraft_storefront::services::payments::RAZORPAY_SIGNATURE_HEADER;

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn raw_webhook(body: Vec<u8>, signature: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/webhooks/razorpay")
        .header(header::CONTENT_TYPE, "application/json")
        .header(RAZORPAY_SIGNATURE_HEADER, signature)
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn test_health_endpoints() {
    let app = TestApp::new();
    let router = app.router();

    let response = send(&router, get("/health")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));

    let response = send(&router, get("/health/ready")).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_request_id_is_echoed() {
    let app = TestApp::new();
    let router = app.router();

    let request = Request::builder()
        .uri("/health")
        .header("x-request-id", "edge-7f3a")
        .body(Body::empty())
        .unwrap();
    let response = send(&router, request).await;
    assert_eq!(response.headers()["x-request-id"], "edge-7f3a");
}

#[tokio::test]
async fn test_signup_and_validation() {
    let app = TestApp::new();
    let router = app.router();

    let response = send(
        &router,
        json_request(
            "POST",
            "/api/auth/signup",
            &json!({ "email": "Uma@Example.com", "password": PASSWORD, "name": "Uma" }),
            None,
        ),
    )
    .await;
    assert!(session_cookie(&response).is_some());
    let (status, body) = json_response(response).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["user"]["email"], "uma@example.com");
    assert_eq!(body["user"]["role"], "USER");
    assert!(body["user"].get("passwordHash").is_none());

    let (status, body) = json_response(
        send(
            &router,
            json_request(
                "POST",
                "/api/auth/signup",
                &json!({ "email": "uma@example.com", "password": PASSWORD }),
                None,
            ),
        )
        .await,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].is_string());

    let (status, _) = json_response(
        send(
            &router,
            json_request(
                "POST",
                "/api/auth/signup",
                &json!({ "email": "vic@example.com", "password": "short" }),
                None,
            ),
        )
        .await,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_repeated_login_failures_lock_the_account() {
    let app = TestApp::new();
    app.user("wes@example.com").await;
    let router = app.router();

    // Spread attempts over client addresses so only the lockout applies.
    let attempt = |n: u8, password: &str| {
        let mut request = json_request(
            "POST",
            "/api/auth/login",
            &json!({ "email": "wes@example.com", "password": password }),
            None,
        );
        request
            .headers_mut()
            .insert("x-forwarded-for", format!("198.51.100.{n}").parse().unwrap());
        request
    };

    for n in 1..=4 {
        let response = send(&router, attempt(n, "Wrong-pass1")).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    let (status, body) = json_response(send(&router, attempt(5, "Wrong-pass1")).await).await;
    assert_eq!(status, StatusCode::LOCKED);
    assert_eq!(
        body["error"],
        "Too many failed attempts. Try again in 15 minutes"
    );

    let response = send(&router, attempt(6, PASSWORD)).await;
    assert_eq!(response.status(), StatusCode::LOCKED);

    app.clock.advance(chrono::Duration::minutes(16));
    let response = send(&router, attempt(7, PASSWORD)).await;
    assert_eq!(response.status(), StatusCode::OK);
}

fn failed_login(n: usize, peer: &str) -> Request<Body> {
    // Distinct emails so no single account reaches the lockout threshold.
    from_peer(
        json_request(
            "POST",
            "/api/auth/login",
            &json!({ "email": format!("nobody{n}@example.com"), "password": "Wrong-pass1" }),
            None,
        ),
        peer,
    )
}

#[tokio::test]
async fn test_login_rate_limit_per_ip() {
    let app = TestApp::new();
    let router = app.router();

    for n in 0..5 {
        let response = send(&router, failed_login(n, "198.51.100.1:4000")).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    let response = send(&router, failed_login(5, "198.51.100.1:4001")).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key(header::RETRY_AFTER));

    // Another direct client keeps its own budget.
    let response = send(&router, failed_login(6, "203.0.113.77:5000")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_forwarded_ip_takes_precedence_over_peer() {
    let app = TestApp::new();
    let router = app.router();

    // One proxy peer, many forwarded clients.
    for n in 0..6 {
        let mut request = failed_login(n, "10.0.0.2:443");
        request
            .headers_mut()
            .insert("x-forwarded-for", format!("192.0.2.{n}").parse().unwrap());
        let response = send(&router, request).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}

#[tokio::test]
async fn test_checkout_requires_session() {
    let app = TestApp::new();
    let wallpaper = app.wallpaper("aurora-over-the-fjord", "2.99").await;
    let router = app.router();

    let (status, body) = json_response(
        send(
            &router,
            json_request(
                "POST",
                "/api/payments/create",
                &json!({ "productId": wallpaper.id, "paymentMethod": "RAZORPAY" }),
                None,
            ),
        )
        .await,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_purchase_verify_and_download() {
    let app = TestApp::new();
    app.user("xia@example.com").await;
    let wallpaper = app.wallpaper("pillars-of-creation", "4.99").await;
    let router = app.router();
    let cookie = login(&router, "xia@example.com").await;

    let (status, created) = json_response(
        send(
            &router,
            json_request(
                "POST",
                "/api/payments/create",
                &json!({ "productId": wallpaper.id, "paymentMethod": "RAZORPAY" }),
                Some(&cookie),
            ),
        )
        .await,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(created["type"], "widget");
    assert_eq!(created["amount"], 499);
    assert_eq!(created["publicKey"], "rzp_test_wallcraft");
    let local_order_id = created["localOrderId"].as_str().unwrap().to_owned();
    let provider_order_id = created["providerOrderId"].as_str().unwrap().to_owned();

    // Wrong signature: generic 400, order untouched.
    let (status, body) = json_response(
        send(
            &router,
            json_request(
                "POST",
                "/api/payments/verify/razorpay",
                &json!({
                    "razorpay_order_id": provider_order_id,
                    "razorpay_payment_id": "pay_xia",
                    "razorpay_signature": "ab".repeat(32),
                    "orderId": local_order_id,
                }),
                Some(&cookie),
            ),
        )
        .await,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Payment verification failed");

    let proof = signed_proof(&provider_order_id, "pay_xia");
    let verify = json!({
        "providerOrderId": proof.provider_order_id,
        "providerPaymentId": proof.provider_payment_id,
        "signature": proof.signature,
        "localOrderId": local_order_id,
    });
    for _ in 0..2 {
        let (status, body) = json_response(
            send(
                &router,
                json_request("POST", "/api/payments/verify/razorpay", &verify, Some(&cookie)),
            )
            .await,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["orderId"], local_order_id.as_str());
        assert_eq!(body["paymentStatus"], "COMPLETED");
    }
    assert_eq!(app.notifier.sent().len(), 1);

    // Buying it again is refused.
    let (status, _) = json_response(
        send(
            &router,
            json_request(
                "POST",
                "/api/payments/create",
                &json!({ "productId": wallpaper.id, "paymentMethod": "CRYPTO_USDT" }),
                Some(&cookie),
            ),
        )
        .await,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let token = app.notifier.sent()[0]
        .download_url
        .rsplit('/')
        .next()
        .unwrap()
        .to_owned();
    let response = send(&router, get(&format!("/api/download/{token}"))).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
    let location = response.headers()[header::LOCATION].to_str().unwrap();
    assert!(location.starts_with(
        "https://files.wallcraft.test/wallpapers/pillars-of-creation/original.png?expires="
    ));

    let response = send(&router, get("/api/download/unknown-token")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    app.clock.advance(chrono::Duration::days(2));
    let response = send(&router, get(&format!("/api/download/{token}"))).await;
    assert_eq!(response.status(), StatusCode::GONE);
}

#[tokio::test]
async fn test_webhook_endpoint() {
    let app = TestApp::new();
    let buyer = app.user("yan@example.com").await;
    let wallpaper = app.wallpaper("liquid-chrome", "3.49").await;
    let (order, provider_order_id) = app.razorpay_checkout(&buyer, &wallpaper).await;
    let router = app.router();

    let (body, _) = webhook("payment.captured", "pay_yan", Some(&provider_order_id), Some(order.id));
    let response = send(&router, raw_webhook(body, "0badc0de")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let (body, signature) = webhook(
        "payment.captured",
        "pay_yan",
        Some(&provider_order_id),
        Some(order.id),
    );
    for _ in 0..3 {
        let (status, json) =
            json_response(send(&router, raw_webhook(body.clone(), &signature)).await).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["received"], true);
    }
    assert_eq!(
        app.state
            .entitlements()
            .grants_for_order(order.id)
            .await
            .unwrap()
            .len(),
        1
    );

    // Unknown orders are acknowledged so the provider stops retrying.
    let (body, signature) = webhook("payment.captured", "pay_ghost", Some("order_ghost"), None);
    let response = send(&router, raw_webhook(body, &signature)).await;
    assert_eq!(response.status(), StatusCode::OK);

    // So are signed payloads that cannot be decoded.
    let (body, signature) = signed_webhook_body(b"{\"event\":");
    let (status, json) = json_response(send(&router, raw_webhook(body, &signature)).await).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["received"], true);
}

#[tokio::test]
async fn test_admin_routes() {
    let app = TestApp::new();
    app.admin("ops@wallcraft.store").await;
    let buyer = app.user("zed@example.com").await;
    let wallpaper = app.wallpaper("gradient-dusk", "0.99").await;
    let session = app
        .state
        .checkout()
        .start(
            &buyer,
            wallpaper.id,
            wallcraft_core::PaymentMethod::CryptoUsdt,
        )
        .await
        .unwrap();
    let router = app.router();
    let uri = format!("/api/admin/orders/{}", session.order_id);
    let complete = json!({ "paymentStatus": "COMPLETED" });

    let response = send(&router, json_request("PATCH", &uri, &complete, None)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let customer = login(&router, "zed@example.com").await;
    let response = send(&router, json_request("PATCH", &uri, &complete, Some(&customer))).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let admin = login(&router, "ops@wallcraft.store").await;
    let (status, body) =
        json_response(send(&router, json_request("PATCH", &uri, &complete, Some(&admin))).await)
            .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["changed"], true);
    assert_eq!(body["grantsIssued"], 1);

    let fail = json!({ "paymentStatus": "FAILED" });
    let response = send(&router, json_request("PATCH", &uri, &fail, Some(&admin))).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let (status, body) = json_response(
        send(
            &router,
            json_request("POST", &format!("{uri}/resend"), &json!({}), Some(&admin)),
        )
        .await,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sent"], 1);
    assert_eq!(app.notifier.sent().len(), 2);

    let missing = format!(
        "/api/admin/orders/{}",
        wallcraft_core::OrderId::generate()
    );
    let response = send(&router, json_request("PATCH", &missing, &complete, Some(&admin))).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_logout_ends_session() {
    let app = TestApp::new();
    app.user("amy@example.com").await;
    let wallpaper = app.wallpaper("misty-redwoods", "1.99").await;
    let router = app.router();
    let cookie = login(&router, "amy@example.com").await;

    let response = send(
        &router,
        json_request("POST", "/api/auth/logout", &json!({}), Some(&cookie)),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = send(
        &router,
        json_request(
            "POST",
            "/api/payments/create",
            &json!({ "productId": wallpaper.id, "paymentMethod": "RAZORPAY" }),
            Some(&cookie),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
