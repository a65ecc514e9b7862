//! Razorpay card/UPI gateway.
//!
//! Checkout opens a Razorpay order through the REST API, the browser widget
//! collects payment, and confirmation arrives twice: as a signed callback
//! from the browser and as a signed webhook from Razorpay.

use async_trait::async_trait;
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use wallcraft_core::{CurrencyCode, OrderId, PaymentMethod, Price};

use super::{
    CallbackProof, ClientAction, GatewayEvent, PROVIDER_ORDER_KEY, PaymentError, PaymentGateway,
    PaymentRef, ProviderHandle,
};
use crate::config::RazorpayConfig;
use crate::models::{CurrentUser, Order, Product};
use crate::services::signing::verify_hex;

/// Header carrying the webhook body signature.
pub const RAZORPAY_SIGNATURE_HEADER: &str = "x-razorpay-signature";

#[derive(Debug, Serialize)]
struct CreateOrderRequest<'a> {
    amount: i64,
    currency: CurrencyCode,
    receipt: String,
    notes: OrderNotes<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OrderNotes<'a> {
    order_id: String,
    order_number: &'a str,
    user_id: String,
    product_id: String,
}

#[derive(Debug, Deserialize)]
struct RazorpayOrder {
    id: String,
    amount: i64,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct WebhookEnvelope {
    event: String,
    #[serde(default)]
    payload: WebhookPayload,
}

#[derive(Debug, Default, Deserialize)]
struct WebhookPayload {
    payment: Option<Entity<PaymentEntity>>,
}

#[derive(Debug, Deserialize)]
struct Entity<T> {
    entity: T,
}

#[derive(Debug, Deserialize)]
struct PaymentEntity {
    id: String,
    order_id: Option<String>,
    /// An object when notes were set, an empty array otherwise.
    #[serde(default)]
    notes: serde_json::Value,
}

impl PaymentEntity {
    fn into_ref(self) -> PaymentRef {
        let local_order_id = self
            .notes
            .get("orderId")
            .and_then(serde_json::Value::as_str)
            .and_then(|s| s.parse::<OrderId>().ok());
        PaymentRef {
            provider_order_id: self.order_id,
            provider_payment_id: self.id,
            local_order_id,
        }
    }
}

/// Razorpay REST client and signature verifier.
#[derive(Debug, Clone)]
pub struct RazorpayGateway {
    client: reqwest::Client,
    config: RazorpayConfig,
}

impl RazorpayGateway {
    /// Create a gateway whose outbound calls time out after
    /// `config.timeout`.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client fails to build.
    pub fn new(config: RazorpayConfig) -> Result<Self, PaymentError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self { client, config })
    }

    /// Convert an order total into the settlement currency.
    fn settlement_price(&self, total: Price) -> Result<Price, PaymentError> {
        settle(
            total,
            self.config.settlement_currency,
            self.config.fx_rate,
        )
    }

    async fn create_order(
        &self,
        request: &CreateOrderRequest<'_>,
    ) -> Result<RazorpayOrder, PaymentError> {
        let url = format!("{}/orders", self.config.api_base.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .basic_auth(
                &self.config.key_id,
                Some(self.config.key_secret.expose_secret()),
            )
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| PaymentError::MalformedPayload(format!("order response: {e}")));
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorEnvelope>(&body)
            .map(|e| e.error.description)
            .unwrap_or(body);
        warn!(status = status.as_u16(), %message, "Razorpay rejected order creation");
        Err(PaymentError::Provider {
            status: status.as_u16(),
            message,
        })
    }
}

/// Price `total` in `settlement`, converting at `rate` when the currencies
/// differ.
fn settle(
    total: Price,
    settlement: CurrencyCode,
    rate: Option<Decimal>,
) -> Result<Price, PaymentError> {
    if total.currency_code == settlement {
        return Ok(total);
    }
    let rate = rate.ok_or(PaymentError::MissingExchangeRate {
        from: total.currency_code,
        to: settlement,
    })?;
    Ok(total.convert(settlement, rate)?)
}

#[async_trait]
impl PaymentGateway for RazorpayGateway {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Razorpay
    }

    #[instrument(skip_all, fields(order_id = %order.id))]
    async fn initiate(
        &self,
        order: &Order,
        product: &Product,
        user: &CurrentUser,
    ) -> Result<ProviderHandle, PaymentError> {
        let settled = self.settlement_price(order.total)?;
        let amount = settled.to_minor_units()?;

        let request = CreateOrderRequest {
            amount,
            currency: settled.currency_code,
            receipt: order.id.to_string(),
            notes: OrderNotes {
                order_id: order.id.to_string(),
                order_number: order.order_number.as_str(),
                user_id: user.id.to_string(),
                product_id: product.id.to_string(),
            },
        };
        let created = self.create_order(&request).await?;
        debug!(razorpay_order_id = %created.id, amount, "Razorpay order created");

        Ok(ProviderHandle {
            provider_order_id: Some(created.id.clone()),
            metadata: serde_json::json!({
                PROVIDER_ORDER_KEY: created.id,
                "settlementAmount": created.amount,
                "settlementCurrency": settled.currency_code,
            }),
            client: ClientAction::Widget {
                provider_order_id: created.id,
                amount: created.amount,
                currency: settled.currency_code,
                public_key: self.config.key_id.clone(),
            },
        })
    }

    fn verify_callback(&self, proof: &CallbackProof) -> Result<(), PaymentError> {
        let message = format!("{}|{}", proof.provider_order_id, proof.provider_payment_id);
        if verify_hex(
            self.config.key_secret.expose_secret().as_bytes(),
            message.as_bytes(),
            &proof.signature,
        ) {
            Ok(())
        } else {
            Err(PaymentError::InvalidSignature)
        }
    }

    fn verify_webhook(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<GatewayEvent, PaymentError> {
        let signature = signature.ok_or(PaymentError::InvalidSignature)?;
        if !verify_hex(
            self.config.webhook_secret.expose_secret().as_bytes(),
            body,
            signature,
        ) {
            return Err(PaymentError::InvalidSignature);
        }

        let envelope: WebhookEnvelope = serde_json::from_slice(body)
            .map_err(|e| PaymentError::MalformedPayload(e.to_string()))?;

        let WebhookEnvelope { event, payload } = envelope;
        let captured = match event.as_str() {
            "payment.captured" | "order.paid" => true,
            "payment.failed" => false,
            _ => return Ok(GatewayEvent::Ignored(event.clone())),
        };

        let payment = payload
            .payment
            .ok_or_else(|| PaymentError::MalformedPayload("missing payment entity".into()))?
            .entity
            .into_ref();

        Ok(if captured {
            GatewayEvent::PaymentCaptured(payment)
        } else {
            GatewayEvent::PaymentFailed(payment)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::str::FromStr;
    use std::time::Duration;

    use secrecy::SecretString;

    use super::*;
    use crate::services::signing::sign_hex;

    fn gateway(fx_rate: Option<Decimal>) -> RazorpayGateway {
        RazorpayGateway::new(RazorpayConfig {
            key_id: "rzp_test_key".to_owned(),
            key_secret: SecretString::from("key-secret"),
            webhook_secret: SecretString::from("webhook-secret"),
            api_base: "http://127.0.0.1:9/v1".to_owned(),
            settlement_currency: CurrencyCode::INR,
            fx_rate,
            timeout: Duration::from_secs(1),
        })
        .unwrap()
    }

    #[test]
    fn test_settle_converts_and_rounds() {
        let usd = Price::new(Decimal::from_str("2.99").unwrap(), CurrencyCode::USD);
        let inr = settle(usd, CurrencyCode::INR, Some(Decimal::from_str("83.125").unwrap())).unwrap();
        assert_eq!(inr.currency_code, CurrencyCode::INR);
        assert_eq!(inr.to_minor_units().unwrap(), 24854);

        let same = settle(usd, CurrencyCode::USD, None).unwrap();
        assert_eq!(same, usd);

        assert!(matches!(
            settle(usd, CurrencyCode::INR, None),
            Err(PaymentError::MissingExchangeRate { .. })
        ));
    }

    #[test]
    fn test_callback_signature() {
        let gw = gateway(None);
        let signature = sign_hex(b"key-secret", b"order_Nx1|pay_Px9");

        let mut proof = CallbackProof {
            provider_order_id: "order_Nx1".to_owned(),
            provider_payment_id: "pay_Px9".to_owned(),
            signature,
        };
        assert!(gw.verify_callback(&proof).is_ok());

        proof.provider_payment_id = "pay_other".to_owned();
        assert!(matches!(
            gw.verify_callback(&proof),
            Err(PaymentError::InvalidSignature)
        ));
    }

    #[test]
    fn test_webhook_events() {
        let gw = gateway(None);
        let order_id = OrderId::generate();
        let body = serde_json::json!({
            "event": "payment.captured",
            "payload": { "payment": { "entity": {
                "id": "pay_Px9",
                "order_id": "order_Nx1",
                "notes": { "orderId": order_id.to_string() }
            }}}
        })
        .to_string();
        let sig = sign_hex(b"webhook-secret", body.as_bytes());

        let event = gw.verify_webhook(body.as_bytes(), Some(&sig)).unwrap();
        assert_eq!(
            event,
            GatewayEvent::PaymentCaptured(PaymentRef {
                provider_order_id: Some("order_Nx1".to_owned()),
                provider_payment_id: "pay_Px9".to_owned(),
                local_order_id: Some(order_id),
            })
        );

        assert!(matches!(
            gw.verify_webhook(body.as_bytes(), None),
            Err(PaymentError::InvalidSignature)
        ));
        assert!(matches!(
            gw.verify_webhook(b"{}", Some(&sig)),
            Err(PaymentError::InvalidSignature)
        ));
    }

    #[test]
    fn test_webhook_without_notes_and_unknown_events() {
        let gw = gateway(None);
        let failed = r#"{"event":"payment.failed","payload":{"payment":{"entity":{"id":"pay_1","order_id":"order_1","notes":[]}}}}"#;
        let sig = sign_hex(b"webhook-secret", failed.as_bytes());
        let event = gw.verify_webhook(failed.as_bytes(), Some(&sig)).unwrap();
        assert!(matches!(
            event,
            GatewayEvent::PaymentFailed(PaymentRef { local_order_id: None, .. })
        ));

        let refund = r#"{"event":"refund.created","payload":{}}"#;
        let sig = sign_hex(b"webhook-secret", refund.as_bytes());
        assert_eq!(
            gw.verify_webhook(refund.as_bytes(), Some(&sig)).unwrap(),
            GatewayEvent::Ignored("refund.created".to_owned())
        );
    }

    #[tokio::test]
    async fn test_initiate_without_rate_fails_before_calling_provider() {
        let gw = gateway(None);
        let order = Order {
            id: OrderId::generate(),
            order_number: wallcraft_core::OrderNumber::generate(chrono::Utc::now()),
            user_id: wallcraft_core::UserId::generate(),
            total: Price::new(Decimal::from_str("2.99").unwrap(), CurrencyCode::USD),
            payment_method: PaymentMethod::Razorpay,
            payment_status: wallcraft_core::PaymentStatus::Pending,
            payment_id: None,
            metadata: serde_json::json!({}),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            paid_at: None,
        };
        let user = CurrentUser {
            id: order.user_id,
            email: wallcraft_core::Email::parse("buyer@example.com").unwrap(),
            role: wallcraft_core::Role::User,
        };
        let product = Product {
            id: wallcraft_core::ProductId::generate(),
            title: "Aurora Borealis".to_owned(),
            slug: "aurora-borealis".to_owned(),
            description: None,
            price: order.total,
            category_id: None,
            file_ref: "wallpapers/aurora.jpg".to_owned(),
            preview_ref: String::new(),
            thumbnail_ref: String::new(),
            resolution: None,
            downloads: 0,
            is_active: true,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };

        let err = gw.initiate(&order, &product, &user).await.unwrap_err();
        assert!(matches!(err, PaymentError::MissingExchangeRate { .. }));
    }
}
