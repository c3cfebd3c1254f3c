//! C1: signed REST client against the exchange (§6). Every outbound call is
//! wrapped in a circuit breaker with a bounded 5 s timeout (§5); a tripped
//! breaker surfaces as a plain transport error, never a panic.

use crate::domain::candle::Candle;
use crate::domain::ports::{
    AssetBalance, CancelOrderResponse, ExchangeGateway, ExchangePositionRecord, OrderSide, OrderType, PlaceOrderRequest, PlaceOrderResponse,
};
use crate::infrastructure::core::circuit_breaker::{CircuitBreaker, CircuitBreakerError};
use crate::infrastructure::core::http_client_factory::{HttpClientFactory, build_url_with_query};
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest_middleware::ClientWithMiddleware;
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

pub struct ExchangeClient {
    client: ClientWithMiddleware,
    api_key: String,
    api_secret: String,
    passphrase: String,
    base_url: String,
    breaker: Arc<CircuitBreaker>,
}

impl ExchangeClient {
    pub fn new(base_url: String, api_key: String, api_secret: String, passphrase: String) -> Self {
        Self {
            client: HttpClientFactory::create_client(),
            api_key,
            api_secret,
            passphrase,
            base_url,
            breaker: Arc::new(CircuitBreaker::new("exchange", 5, 2, Duration::from_secs(30))),
        }
    }

    fn sign(&self, timestamp: &str, method: &str, path: &str, query: &str, body: &str) -> Result<String> {
        let prehash = format!("{timestamp}{method}{path}{query}{body}");
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes()).context("hmac key of any size")?;
        mac.update(prehash.as_bytes());
        Ok(BASE64.encode(mac.finalize().into_bytes()))
    }

    async fn signed_request(&self, method: &str, path: &str, query: &str, body: &str) -> Result<String> {
        let timestamp = Utc::now().timestamp_millis().to_string();
        let signature = self.sign(&timestamp, method, path, query, body)?;
        let url = format!("{}{}{}", self.base_url, path, query);

        let mut builder = match method {
            "GET" => self.client.get(&url),
            "POST" => self.client.post(&url).body(body.to_string()),
            other => anyhow::bail!("unsupported HTTP method: {other}"),
        };
        builder = builder
            .header("ACCESS-KEY", &self.api_key)
            .header("ACCESS-SIGN", &signature)
            .header("ACCESS-PASSPHRASE", &self.passphrase)
            .header("ACCESS-TIMESTAMP", &timestamp)
            .header("Content-Type", "application/json");

        let response = builder.send().await.context("exchange request transport failure")?;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            anyhow::bail!("exchange returned {status}: {text}");
        }
        Ok(text)
    }

    async fn guarded<T>(&self, fut: impl std::future::Future<Output = Result<T>>) -> Result<T> {
        self.breaker.call(fut).await.map_err(|e| match e {
            CircuitBreakerError::Open(msg) => anyhow::anyhow!("exchange circuit breaker open: {msg}"),
            CircuitBreakerError::Inner(inner) => inner,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawCandle(i64, String, String, String, String, String);

#[async_trait]
impl ExchangeGateway for ExchangeClient {
    async fn fetch_candles(&self, symbol: &str, interval_code: &str, limit: usize) -> Result<Vec<Candle>> {
        self.guarded(async {
            let path = "/api/v2/mix/market/candles";
            let query = build_url_with_query(
                "",
                &[
                    ("symbol", symbol.to_string()),
                    ("granularity", interval_code.to_string()),
                    ("limit", limit.to_string()),
                ],
            );
            let body = self.signed_request("GET", path, &query, "").await?;
            let raw: Vec<RawCandle> = serde_json::from_str(&body).context("malformed candle payload")?;
            let candles = raw
                .into_iter()
                .map(|RawCandle(open_time, open, high, low, close, volume)| Candle {
                    open_time,
                    open: Decimal::from_str(&open).unwrap_or_default(),
                    high: Decimal::from_str(&high).unwrap_or_default(),
                    low: Decimal::from_str(&low).unwrap_or_default(),
                    close: Decimal::from_str(&close).unwrap_or_default(),
                    volume: Decimal::from_str(&volume).unwrap_or_default(),
                })
                .collect();
            Ok(candles)
        })
        .await
    }

    async fn get_assets(&self) -> Result<Vec<AssetBalance>> {
        self.guarded(async {
            #[derive(Deserialize)]
            struct RawAsset {
                #[serde(rename = "coinName")]
                coin_name: String,
                available: String,
            }
            let path = "/api/v2/mix/account/accounts";
            let body = self.signed_request("GET", path, "", "").await?;
            let raw: Vec<RawAsset> = serde_json::from_str(&body).context("malformed asset payload")?;
            Ok(raw
                .into_iter()
                .map(|a| AssetBalance {
                    coin_name: a.coin_name,
                    available: Decimal::from_str(&a.available).unwrap_or_default(),
                })
                .collect())
        })
        .await
    }

    async fn place_order(&self, request: PlaceOrderRequest) -> Result<PlaceOrderResponse> {
        self.guarded(async {
            let side = match request.side {
                OrderSide::Buy => "buy",
                OrderSide::Sell => "sell",
            };
            let order_type = match request.order_type {
                OrderType::Market => "market",
                OrderType::Limit => "limit",
            };
            let mut payload = serde_json::json!({
                "symbol": request.symbol,
                "side": side,
                "orderType": order_type,
                "size": request.size.to_string(),
            });
            if let Some(price) = request.price {
                payload["price"] = serde_json::Value::String(price.to_string());
            }
            if let Some(client_oid) = &request.client_oid {
                payload["clientOid"] = serde_json::Value::String(client_oid.clone());
            }
            if let Some(tp) = request.preset_take_profit {
                payload["presetTakeProfitPrice"] = serde_json::Value::String(tp.to_string());
            }
            if let Some(sl) = request.preset_stop_loss {
                payload["presetStopLossPrice"] = serde_json::Value::String(sl.to_string());
            }
            let body = payload.to_string();
            let path = "/api/v2/mix/order/place-order";
            let raw = self.signed_request("POST", path, "", &body).await?;

            #[derive(Deserialize)]
            struct RawResponse {
                code: String,
                msg: String,
                data: Option<RawOrderData>,
            }
            #[derive(Deserialize)]
            struct RawOrderData {
                #[serde(rename = "orderId")]
                order_id: Option<String>,
            }
            let parsed: RawResponse = serde_json::from_str(&raw).context("malformed order response")?;
            Ok(PlaceOrderResponse {
                code: parsed.code,
                msg: parsed.msg,
                order_id: parsed.data.and_then(|d| d.order_id),
            })
        })
        .await
    }

    async fn cancel_order(&self, order_id: &str, symbol: Option<&str>) -> Result<CancelOrderResponse> {
        self.guarded(async {
            let mut payload = serde_json::json!({ "orderId": order_id });
            if let Some(symbol) = symbol {
                payload["symbol"] = serde_json::Value::String(symbol.to_string());
            }
            let body = payload.to_string();
            let path = "/api/v2/mix/order/cancel-order";
            let raw = self.signed_request("POST", path, "", &body).await?;

            #[derive(Deserialize)]
            struct RawResponse {
                code: String,
                msg: String,
            }
            let parsed: RawResponse = serde_json::from_str(&raw).context("malformed cancel response")?;
            Ok(CancelOrderResponse { code: parsed.code, msg: parsed.msg })
        })
        .await
    }

    async fn list_positions(&self) -> Result<Vec<ExchangePositionRecord>> {
        self.guarded(async {
            #[derive(Deserialize)]
            struct RawPosition {
                symbol: String,
                #[serde(rename = "holdSide")]
                hold_side: String,
                total: String,
            }
            let path = "/api/v2/mix/position/all-position";
            let body = self.signed_request("GET", path, "", "").await?;
            let raw: Vec<RawPosition> = serde_json::from_str(&body).context("malformed position payload")?;
            let positions = raw
                .into_iter()
                .filter_map(|p| {
                    let size = Decimal::from_str(&p.total).unwrap_or_default();
                    if size == Decimal::ZERO {
                        return None;
                    }
                    let side = match p.hold_side.as_str() {
                        "long" => OrderSide::Buy,
                        "short" => OrderSide::Sell,
                        other => {
                            warn!("unrecognized position side {other}, skipping");
                            return None;
                        }
                    };
                    Some(ExchangePositionRecord { symbol: p.symbol, side, size })
                })
                .collect();
            Ok(positions)
        })
        .await
    }
}
