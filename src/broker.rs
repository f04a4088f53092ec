//! Broker API client.
//!
//! Delivers deposit notifications to the accounting service. Delivery is
//! at-least-once: the broker must dedupe on `sequence_id`.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::error::BrokerError;
use crate::model::Transfer;

/// One deposit notification.
#[derive(Debug, Clone, Serialize)]
pub struct DepositNotice {
    /// Fresh per attempt; lets the broker correlate request logs.
    pub request_id: String,
    pub sequence_id: String,
    pub chain: String,
    pub symbol: String,
    pub tx_hash: String,
    pub address: String,
    pub amount: Decimal,
    pub extra_tag: String,
    pub confirmations: u16,
    /// Unix seconds at send time.
    pub sent_at: i64,
}

impl DepositNotice {
    pub fn from_transfer(transfer: &Transfer, confirmations: u16) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            sequence_id: transfer.sequence_id.clone(),
            chain: transfer.chain.clone(),
            symbol: transfer.symbol.clone(),
            tx_hash: transfer.tx_hash.clone(),
            address: transfer.address.clone(),
            amount: transfer.amount,
            extra_tag: transfer.extra_tag.clone(),
            confirmations,
            sent_at: chrono::Utc::now().timestamp(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerAck {
    pub ok: bool,
    #[serde(default)]
    pub message: String,
}

#[async_trait]
pub trait BrokerApi: Send + Sync {
    async fn deposit_notify(&self, notice: &DepositNotice) -> Result<BrokerAck, BrokerError>;
}

/// HTTP broker client. POSTs the notice as JSON; any non-2xx status is a
/// delivery failure.
pub struct HttpBroker {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
}

impl HttpBroker {
    pub fn new(url: &str, token: Option<String>) -> Result<Self, BrokerError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| BrokerError::Http(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.to_string(),
            token,
        })
    }
}

#[async_trait]
impl BrokerApi for HttpBroker {
    async fn deposit_notify(&self, notice: &DepositNotice) -> Result<BrokerAck, BrokerError> {
        let mut request = self.client.post(&self.url).json(notice);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| BrokerError::Http(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BrokerError::Http(format!(
                "status {}: {}",
                status,
                body.chars().take(200).collect::<String>()
            )));
        }

        let ack: BrokerAck = response
            .json()
            .await
            .map_err(|e| BrokerError::Http(format!("bad ack body: {}", e)))?;

        debug!(
            sequence_id = %notice.sequence_id,
            ok = ack.ok,
            "broker acknowledged notification"
        );
        Ok(ack)
    }
}

/// Scripted broker for tests and dry runs: records every notice and can be
/// told to fail the next N deliveries.
#[derive(Default)]
pub struct MockBroker {
    notices: Mutex<Vec<DepositNotice>>,
    fail_budget: Mutex<u32>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, count: u32) {
        *self.fail_budget.lock().unwrap_or_else(|e| e.into_inner()) = count;
    }

    pub fn notices(&self) -> Vec<DepositNotice> {
        self.notices
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn notice_count(&self) -> usize {
        self.notices.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl BrokerApi for MockBroker {
    async fn deposit_notify(&self, notice: &DepositNotice) -> Result<BrokerAck, BrokerError> {
        {
            let mut budget = self.fail_budget.lock().unwrap_or_else(|e| e.into_inner());
            if *budget > 0 {
                *budget -= 1;
                return Err(BrokerError::Http("scripted delivery failure".to_string()));
            }
        }
        self.notices
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(notice.clone());
        Ok(BrokerAck {
            ok: true,
            message: String::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NotifyStatus;

    fn transfer() -> Transfer {
        Transfer {
            sequence_id: "seq1".to_string(),
            tx_hash: "tx1".to_string(),
            chain: "MOCK".to_string(),
            symbol: "MOCK".to_string(),
            address: "addr1".to_string(),
            amount: Decimal::new(5, 0),
            confirmations: 2,
            extra_tag: String::new(),
            inner_index: 0,
            block_height: 101,
            block_hash: "h101".to_string(),
            notify_status: NotifyStatus::Pending,
            retry_count: 0,
        }
    }

    #[test]
    fn test_notice_carries_fresh_request_id() {
        let t = transfer();
        let a = DepositNotice::from_transfer(&t, 3);
        let b = DepositNotice::from_transfer(&t, 3);
        assert_ne!(a.request_id, b.request_id);
        assert_eq!(a.confirmations, 3);
        assert_eq!(a.sequence_id, "seq1");
    }

    #[tokio::test]
    async fn test_mock_broker_scripted_failures() {
        let broker = MockBroker::new();
        broker.fail_next(1);

        let notice = DepositNotice::from_transfer(&transfer(), 1);
        assert!(broker.deposit_notify(&notice).await.is_err());
        assert!(broker.deposit_notify(&notice).await.unwrap().ok);
        assert_eq!(broker.notice_count(), 1);
    }
}
