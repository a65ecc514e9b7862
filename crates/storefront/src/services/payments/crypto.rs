//! USDT gateway.
//!
//! No provider API is involved: the expected transfer is recorded on the
//! order and the buyer is sent to a hosted page showing the wallet address.
//! Completion is an admin decision after the transfer is seen on chain.

use async_trait::async_trait;
use rust_decimal::Decimal;

use wallcraft_core::{CurrencyCode, PaymentMethod, Price};

use super::{
    CallbackProof, ClientAction, GatewayEvent, PaymentError, PaymentGateway, ProviderHandle,
};
use crate::config::CryptoConfig;
use crate::models::{CurrentUser, Order, Product};

/// Asset label stored with the order, e.g. `USDT_TRC20`.
fn asset_label(network: &str) -> String {
    format!("USDT_{}", network.to_ascii_uppercase())
}

#[derive(Debug, Clone)]
pub struct CryptoGateway {
    config: CryptoConfig,
    base_url: String,
}

impl CryptoGateway {
    #[must_use]
    pub fn new(config: CryptoConfig, base_url: impl Into<String>) -> Self {
        Self {
            config,
            base_url: base_url.into(),
        }
    }
}

/// USDT tracks USD one to one; other currencies have no configured rate.
fn usdt_amount(total: Price) -> Result<Price, PaymentError> {
    match total.currency_code {
        CurrencyCode::USD | CurrencyCode::USDT => {
            Ok(total.convert(CurrencyCode::USDT, Decimal::ONE)?)
        }
        other => Err(PaymentError::MissingExchangeRate {
            from: other,
            to: CurrencyCode::USDT,
        }),
    }
}

#[async_trait]
impl PaymentGateway for CryptoGateway {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::CryptoUsdt
    }

    async fn initiate(
        &self,
        order: &Order,
        _product: &Product,
        _user: &CurrentUser,
    ) -> Result<ProviderHandle, PaymentError> {
        let wallet = self
            .config
            .wallet_address
            .as_deref()
            .ok_or_else(|| PaymentError::NotConfigured("CRYPTO_WALLET_ADDRESS".to_owned()))?;
        let amount = usdt_amount(order.total)?;

        Ok(ProviderHandle {
            provider_order_id: None,
            metadata: serde_json::json!({
                "cryptoAmount": amount.amount,
                "cryptoCurrency": asset_label(&self.config.network),
                "walletAddress": wallet,
                "network": self.config.network,
            }),
            client: ClientAction::Redirect {
                redirect_url: format!("{}/checkout/crypto?order={}", self.base_url, order.id),
            },
        })
    }

    fn verify_callback(&self, _proof: &CallbackProof) -> Result<(), PaymentError> {
        Err(PaymentError::Unsupported(PaymentMethod::CryptoUsdt))
    }

    fn verify_webhook(
        &self,
        _body: &[u8],
        _signature: Option<&str>,
    ) -> Result<GatewayEvent, PaymentError> {
        Err(PaymentError::Unsupported(PaymentMethod::CryptoUsdt))
    }
}
