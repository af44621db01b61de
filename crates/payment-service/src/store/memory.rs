use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use event_bus::PaymentStatus;
use tokio::sync::RwLock;

use super::{PaymentStore, Result};
use crate::error::PaymentError;
use crate::model::{NewPayment, Payment};

#[derive(Debug, Default)]
struct InMemoryPaymentState {
    payments: BTreeMap<i64, Payment>,
    next_id: i64,
    fail_on_settle: bool,
}

/// In-memory payment store for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentStore {
    state: Arc<RwLock<InMemoryPaymentState>>,
}

impl InMemoryPaymentStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the store to fail settlements with a transient error.
    pub async fn set_fail_on_settle(&self, fail: bool) {
        self.state.write().await.fail_on_settle = fail;
    }

    /// Returns the number of stored payments.
    pub async fn payment_count(&self) -> usize {
        self.state.read().await.payments.len()
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn create(&self, payment: NewPayment) -> Result<Payment> {
        let mut state = self.state.write().await;
        if state
            .payments
            .values()
            .any(|p| p.order_id == payment.order_id)
        {
            return Err(PaymentError::DuplicateOrder(payment.order_id));
        }

        state.next_id += 1;
        let now = Utc::now();
        let payment = Payment {
            id: state.next_id,
            order_id: payment.order_id,
            amount: payment.amount,
            payment_method: payment.payment_method,
            status: PaymentStatus::Pending,
            transaction_id: None,
            created_at: now,
            updated_at: now,
        };
        state.payments.insert(payment.id, payment.clone());
        Ok(payment)
    }

    async fn get(&self, id: i64) -> Result<Option<Payment>> {
        Ok(self.state.read().await.payments.get(&id).cloned())
    }

    async fn get_by_order(&self, order_id: i64) -> Result<Option<Payment>> {
        Ok(self
            .state
            .read()
            .await
            .payments
            .values()
            .find(|p| p.order_id == order_id)
            .cloned())
    }

    async fn settle(
        &self,
        id: i64,
        status: PaymentStatus,
        transaction_id: &str,
    ) -> Result<Option<Payment>> {
        let mut state = self.state.write().await;
        if state.fail_on_settle {
            return Err(PaymentError::Unavailable("injected failure".to_string()));
        }

        Ok(state
            .payments
            .get_mut(&id)
            .filter(|p| p.status == PaymentStatus::Pending)
            .map(|p| {
                p.status = status;
                p.transaction_id = Some(transaction_id.to_string());
                p.updated_at = Utc::now();
                p.clone()
            }))
    }

    async fn list_pending(&self) -> Result<Vec<Payment>> {
        Ok(self
            .state
            .read()
            .await
            .payments
            .values()
            .filter(|p| p.status == PaymentStatus::Pending)
            .cloned()
            .collect())
    }
}
