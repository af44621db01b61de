//! Background settlement of pending payments.
//!
//! Jobs go through a bounded queue to a fixed set of workers. Each job runs in
//! its own task so a panic is contained, and every job reports a
//! [`SettlementOutcome`] to a supervisor that re-enqueues failed jobs until
//! their retry budget is spent.

use std::sync::Arc;
use std::time::Duration;

use event_bus::{EventBus, EventBusExt, EventType, Headers, PaymentStatus, SagaEvent};
use rand::Rng;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::error::PaymentError;
use crate::model::Payment;
use crate::store::PaymentStore;

pub const DEFAULT_SETTLEMENT_DELAY: Duration = Duration::from_secs(3);
pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;
pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct SettlementConfig {
    /// Simulated processor latency applied to every attempt.
    pub delay: Duration,
    pub workers: usize,
    pub queue_capacity: usize,
    /// Re-enqueues allowed after the first attempt.
    pub max_retries: u32,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            delay: DEFAULT_SETTLEMENT_DELAY,
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

/// Decides whether a payment is approved.
pub trait SettlementDecider: Send + Sync {
    fn approve(&self, payment: &Payment) -> bool;
}

/// Approves with a fixed probability.
#[derive(Debug, Clone, Copy)]
pub struct RandomDecider {
    success_rate: f64,
}

impl RandomDecider {
    /// `success_rate` is clamped to `0.0..=1.0`.
    pub fn new(success_rate: f64) -> Self {
        let success_rate = if success_rate.is_nan() {
            0.0
        } else {
            success_rate.clamp(0.0, 1.0)
        };
        Self { success_rate }
    }
}

impl SettlementDecider for RandomDecider {
    fn approve(&self, _payment: &Payment) -> bool {
        rand::thread_rng().gen_bool(self.success_rate)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlementJob {
    pub payment_id: i64,
    /// Zero for the first attempt.
    pub attempt: u32,
}

/// What happened to one job, reported on the completion channel.
#[derive(Debug)]
pub enum SettlementOutcome {
    Settled {
        payment_id: i64,
        status: PaymentStatus,
    },
    AlreadySettled {
        payment_id: i64,
    },
    Failed {
        job: SettlementJob,
        error: PaymentError,
    },
    Panicked {
        job: SettlementJob,
    },
}

/// Producer side of the settlement queue.
#[derive(Debug, Clone)]
pub struct SettlementQueue {
    tx: mpsc::Sender<SettlementJob>,
}

impl SettlementQueue {
    /// Schedules a first settlement attempt. Waits while the queue is full.
    pub async fn enqueue(&self, payment_id: i64) -> Result<(), PaymentError> {
        self.send(SettlementJob {
            payment_id,
            attempt: 0,
        })
        .await
    }

    async fn send(&self, job: SettlementJob) -> Result<(), PaymentError> {
        self.tx
            .send(job)
            .await
            .map_err(|_| PaymentError::SettlementClosed)
    }
}

/// A running worker pool plus its supervisor.
pub struct SettlementPool {
    queue: SettlementQueue,
    tasks: Vec<JoinHandle<()>>,
}

impl SettlementPool {
    /// Spawns `config.workers` workers and the supervisor.
    pub fn start<S: PaymentStore + 'static>(
        store: Arc<S>,
        bus: Arc<dyn EventBus>,
        topic: impl Into<String>,
        decider: Arc<dyn SettlementDecider>,
        config: SettlementConfig,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let queue = SettlementQueue { tx };

        let settler = Arc::new(Settler {
            store,
            bus,
            topic: topic.into(),
            decider,
            delay: config.delay,
        });
        let rx = Arc::new(Mutex::new(rx));

        let mut tasks: Vec<JoinHandle<()>> = (0..config.workers.max(1))
            .map(|worker| {
                tokio::spawn(run_worker(
                    worker,
                    rx.clone(),
                    settler.clone(),
                    done_tx.clone(),
                ))
            })
            .collect();
        tasks.push(tokio::spawn(supervise(
            done_rx,
            queue.clone(),
            config.max_retries,
        )));

        tracing::info!(workers = config.workers, "settlement pool started");
        Self { queue, tasks }
    }

    pub fn queue(&self) -> SettlementQueue {
        self.queue.clone()
    }

    /// Stops the workers and the supervisor. Queued jobs are dropped; their
    /// payments stay pending and are recovered on the next start.
    pub fn shutdown(&self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

struct Settler<S> {
    store: Arc<S>,
    bus: Arc<dyn EventBus>,
    topic: String,
    decider: Arc<dyn SettlementDecider>,
    delay: Duration,
}

impl<S: PaymentStore> Settler<S> {
    #[tracing::instrument(skip(self), fields(payment_id = job.payment_id, attempt = job.attempt))]
    async fn settle(&self, job: SettlementJob) -> Result<SettlementOutcome, PaymentError> {
        tokio::time::sleep(self.delay).await;

        let payment = self
            .store
            .get(job.payment_id)
            .await?
            .ok_or_else(|| PaymentError::NotFound(format!("payment {}", job.payment_id)))?;

        if payment.status.is_terminal() {
            // An earlier attempt may have stored the outcome without announcing it.
            if job.attempt > 0 {
                self.publish(&payment).await?;
            }
            return Ok(SettlementOutcome::AlreadySettled {
                payment_id: payment.id,
            });
        }

        let status = if self.decider.approve(&payment) {
            PaymentStatus::Completed
        } else {
            PaymentStatus::Failed
        };
        let transaction_id = uuid::Uuid::new_v4().to_string();

        let Some(settled) = self
            .store
            .settle(payment.id, status, &transaction_id)
            .await?
        else {
            return Ok(SettlementOutcome::AlreadySettled {
                payment_id: payment.id,
            });
        };

        self.publish(&settled).await?;
        Ok(SettlementOutcome::Settled {
            payment_id: settled.id,
            status,
        })
    }

    async fn publish(&self, payment: &Payment) -> Result<(), PaymentError> {
        let kind = if payment.status == PaymentStatus::Completed {
            EventType::PaymentCompleted
        } else {
            EventType::PaymentFailed
        };
        let key = payment.order_id.to_string();
        let event = SagaEvent::new(kind, key.clone(), &payment.event_payload())
            .map_err(|e| PaymentError::Publish(e.to_string()))?;

        self.bus
            .publish(&self.topic, &key, &event, Headers::new())
            .await
            .map_err(|e| {
                metrics::counter!("payment_publish_failures_total").increment(1);
                tracing::error!(payment_id = payment.id, event_type = %kind, error = %e, "failed to publish payment event");
                PaymentError::Publish(e.to_string())
            })
    }
}

async fn run_worker<S: PaymentStore + 'static>(
    worker: usize,
    rx: Arc<Mutex<mpsc::Receiver<SettlementJob>>>,
    settler: Arc<Settler<S>>,
    done: mpsc::UnboundedSender<SettlementOutcome>,
) {
    loop {
        let job = rx.lock().await.recv().await;
        let Some(job) = job else {
            break;
        };

        let settler = settler.clone();
        let outcome = match tokio::spawn(async move { settler.settle(job).await }).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(error)) => SettlementOutcome::Failed { job, error },
            Err(e) if e.is_panic() => SettlementOutcome::Panicked { job },
            Err(_) => break,
        };

        if done.send(outcome).is_err() {
            break;
        }
    }
    tracing::debug!(worker, "settlement worker stopped");
}

async fn supervise(
    mut done: mpsc::UnboundedReceiver<SettlementOutcome>,
    queue: SettlementQueue,
    max_retries: u32,
) {
    while let Some(outcome) = done.recv().await {
        let job = match outcome {
            SettlementOutcome::Settled { payment_id, status } => {
                metrics::counter!("payments_settled_total", "status" => status.as_str())
                    .increment(1);
                tracing::info!(payment_id, %status, "payment settled");
                continue;
            }
            SettlementOutcome::AlreadySettled { payment_id } => {
                tracing::debug!(payment_id, "payment already settled");
                continue;
            }
            SettlementOutcome::Failed { job, error } => {
                tracing::warn!(payment_id = job.payment_id, attempt = job.attempt, error = %error, "settlement attempt failed");
                if !error.is_retryable() {
                    metrics::counter!("payments_settlement_abandoned_total").increment(1);
                    tracing::error!(payment_id = job.payment_id, error = %error, "settlement abandoned");
                    continue;
                }
                job
            }
            SettlementOutcome::Panicked { job } => {
                tracing::error!(payment_id = job.payment_id, attempt = job.attempt, "settlement attempt panicked");
                job
            }
        };

        if job.attempt >= max_retries {
            metrics::counter!("payments_settlement_abandoned_total").increment(1);
            tracing::error!(payment_id = job.payment_id, attempts = job.attempt + 1, "settlement retries exhausted");
            continue;
        }

        metrics::counter!("payments_settlement_retried_total").increment(1);
        let retry = SettlementJob {
            payment_id: job.payment_id,
            attempt: job.attempt + 1,
        };
        if queue.send(retry).await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use event_bus::{InMemoryEventBus, PaymentEventPayload};

    use super::*;
    use crate::model::NewPayment;
    use crate::store::InMemoryPaymentStore;

    const TOPIC: &str = "payment-events";

    struct Always(bool);

    impl SettlementDecider for Always {
        fn approve(&self, _payment: &Payment) -> bool {
            self.0
        }
    }

    /// Panics on the first `panics` calls, then approves.
    struct PanicsFirst {
        panics: usize,
        calls: AtomicUsize,
    }

    impl SettlementDecider for PanicsFirst {
        fn approve(&self, _payment: &Payment) -> bool {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.panics {
                panic!("processor exploded");
            }
            true
        }
    }

    fn config() -> SettlementConfig {
        SettlementConfig {
            delay: Duration::from_millis(1),
            workers: 2,
            queue_capacity: 4,
            max_retries: 3,
        }
    }

    async fn pending(store: &InMemoryPaymentStore, order_id: i64) -> Payment {
        store
            .create(NewPayment {
                order_id,
                amount: 100.0,
                payment_method: "credit_card".to_string(),
            })
            .await
            .unwrap()
    }

    async fn wait_for_status(store: &InMemoryPaymentStore, id: i64, status: PaymentStatus) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if store.get(id).await.unwrap().unwrap().status == status {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("payment should settle");
    }

    #[test]
    fn test_random_decider_extremes() {
        let payment = Payment {
            id: 1,
            order_id: 1,
            amount: 1.0,
            payment_method: "credit_card".to_string(),
            status: PaymentStatus::Pending,
            transaction_id: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };
        assert!((0..50).all(|_| RandomDecider::new(1.0).approve(&payment)));
        assert!((0..50).all(|_| !RandomDecider::new(0.0).approve(&payment)));
        assert!(!RandomDecider::new(f64::NAN).approve(&payment));
        assert!(RandomDecider::new(7.0).approve(&payment));
    }

    #[tokio::test]
    async fn test_settles_and_publishes_outcome() {
        let store = Arc::new(InMemoryPaymentStore::new());
        let bus = InMemoryEventBus::new();
        let pool = SettlementPool::start(
            store.clone(),
            Arc::new(bus.clone()),
            TOPIC,
            Arc::new(Always(true)),
            config(),
        );

        let payment = pending(&store, 42).await;
        pool.queue().enqueue(payment.id).await.unwrap();
        wait_for_status(&store, payment.id, PaymentStatus::Completed).await;

        let settled = store.get(payment.id).await.unwrap().unwrap();
        assert!(settled.transaction_id.is_some());

        tokio::time::sleep(Duration::from_millis(20)).await;
        let events = bus.events(TOPIC);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), Ok(EventType::PaymentCompleted));
        assert_eq!(events[0].correlation_id, "42");
        let payload: PaymentEventPayload = events[0].payload_as().unwrap();
        assert_eq!(payload.order_id, 42);
        assert_eq!(payload.transaction_id, settled.transaction_id);
        pool.shutdown();
    }

    #[tokio::test]
    async fn test_declined_payment_fails() {
        let store = Arc::new(InMemoryPaymentStore::new());
        let bus = InMemoryEventBus::new();
        let pool = SettlementPool::start(
            store.clone(),
            Arc::new(bus.clone()),
            TOPIC,
            Arc::new(Always(false)),
            config(),
        );

        let payment = pending(&store, 7).await;
        pool.queue().enqueue(payment.id).await.unwrap();
        wait_for_status(&store, payment.id, PaymentStatus::Failed).await;
        pool.shutdown();
    }

    #[tokio::test]
    async fn test_many_jobs_through_small_queue() {
        let store = Arc::new(InMemoryPaymentStore::new());
        let bus = InMemoryEventBus::new();
        let pool = SettlementPool::start(
            store.clone(),
            Arc::new(bus.clone()),
            TOPIC,
            Arc::new(Always(true)),
            config(),
        );

        let mut ids = Vec::new();
        for order_id in 1..=20 {
            let payment = pending(&store, order_id).await;
            pool.queue().enqueue(payment.id).await.unwrap();
            ids.push(payment.id);
        }
        for id in ids {
            wait_for_status(&store, id, PaymentStatus::Completed).await;
        }
        assert!(store.list_pending().await.unwrap().is_empty());
        pool.shutdown();
    }

    #[tokio::test]
    async fn test_panicking_job_is_retried() {
        let store = Arc::new(InMemoryPaymentStore::new());
        let bus = InMemoryEventBus::new();
        let pool = SettlementPool::start(
            store.clone(),
            Arc::new(bus.clone()),
            TOPIC,
            Arc::new(PanicsFirst {
                panics: 2,
                calls: AtomicUsize::new(0),
            }),
            config(),
        );

        let payment = pending(&store, 5).await;
        pool.queue().enqueue(payment.id).await.unwrap();
        wait_for_status(&store, payment.id, PaymentStatus::Completed).await;
        pool.shutdown();
    }

    #[tokio::test]
    async fn test_store_failure_is_retried_then_abandoned() {
        let store = Arc::new(InMemoryPaymentStore::new());
        store.set_fail_on_settle(true).await;
        let bus = InMemoryEventBus::new();
        let decider = Arc::new(PanicsFirst {
            panics: 0,
            calls: AtomicUsize::new(0),
        });
        let pool = SettlementPool::start(
            store.clone(),
            Arc::new(bus.clone()),
            TOPIC,
            decider.clone(),
            config(),
        );

        let payment = pending(&store, 9).await;
        pool.queue().enqueue(payment.id).await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while decider.calls.load(Ordering::SeqCst) < 4 {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("every attempt should run");

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(decider.calls.load(Ordering::SeqCst), 4);
        assert_eq!(
            store.get(payment.id).await.unwrap().unwrap().status,
            PaymentStatus::Pending
        );
        pool.shutdown();
    }

    #[tokio::test]
    async fn test_publish_failure_is_republished_on_retry() {
        let store = Arc::new(InMemoryPaymentStore::new());
        let bus = InMemoryEventBus::new();
        bus.set_fail_on_publish(true);
        let pool = SettlementPool::start(
            store.clone(),
            Arc::new(bus.clone()),
            TOPIC,
            Arc::new(Always(true)),
            SettlementConfig {
                delay: Duration::from_millis(30),
                ..config()
            },
        );

        let payment = pending(&store, 3).await;
        pool.queue().enqueue(payment.id).await.unwrap();
        wait_for_status(&store, payment.id, PaymentStatus::Completed).await;
        bus.set_fail_on_publish(false);

        tokio::time::timeout(Duration::from_secs(5), async {
            while bus.message_count(TOPIC) == 0 {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("outcome should be republished");
        assert_eq!(bus.events(TOPIC)[0].kind(), Ok(EventType::PaymentCompleted));
        pool.shutdown();
    }
}
