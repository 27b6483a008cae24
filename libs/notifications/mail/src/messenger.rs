//! Deferred delivery.
//!
//! [`Mailer::send_later`](crate::Mailer::send_later) hands compiled mail to a
//! [`Messenger`]. The default [`MemoryQueueMessenger`] is an in-process,
//! non-durable queue: a FIFO channel drained by at most `concurrency`
//! deliveries at a time. Outcomes go to a single monitor callback; the
//! caller of `send_later` never sees delivery errors.

use std::fmt;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error};

use crate::config::DEFAULT_QUEUE_CONCURRENCY;
use crate::error::{MailError, MailResult, QueuedMailError};
use crate::mailer::{Mailer, WeakMailer};
use crate::models::CompiledMail;
use crate::transport::{SendResult, TransportConfig};

/// Strategy for delivering mail later
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Accept a mail for delivery. Returning `Ok` means accepted, not sent.
    async fn queue(&self, mail: CompiledMail, config: Option<TransportConfig>) -> MailResult<()>;
}

/// Receives the outcome of every queued delivery
pub type Monitor = Arc<dyn Fn(Result<SendResult, QueuedMailError>) + Send + Sync>;

/// Each job holds its mailer so accepted mail outlives the caller's handle
type Job = (Mailer, CompiledMail, Option<TransportConfig>);

/// In-memory bounded-concurrency queue.
///
/// ```ignore
/// let messenger = MemoryQueueMessenger::new(&mailer)
///     .with_concurrency(4)
///     .monitor(|result| {
///         if let Err(e) = result {
///             eprintln!("{}", e);
///         }
///     });
/// mailer.set_messenger(Arc::new(messenger));
/// ```
pub struct MemoryQueueMessenger {
    mailer: WeakMailer,
    concurrency: usize,
    monitor: Monitor,
    sender: OnceLock<mpsc::UnboundedSender<Job>>,
}

impl MemoryQueueMessenger {
    pub fn new(mailer: &Mailer) -> Self {
        Self {
            mailer: mailer.downgrade(),
            concurrency: DEFAULT_QUEUE_CONCURRENCY,
            monitor: Arc::new(log_outcome),
            sender: OnceLock::new(),
        }
    }

    /// Maximum number of deliveries in flight (default: 10, minimum: 1)
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Replace the default monitor, which logs every outcome
    pub fn monitor<F>(mut self, monitor: F) -> Self
    where
        F: Fn(Result<SendResult, QueuedMailError>) + Send + Sync + 'static,
    {
        self.monitor = Arc::new(monitor);
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Workers start on the first queued mail
    fn sender(&self) -> &mpsc::UnboundedSender<Job> {
        self.sender.get_or_init(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(dispatch(rx, self.concurrency, self.monitor.clone()));
            tx
        })
    }
}

impl fmt::Debug for MemoryQueueMessenger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryQueueMessenger")
            .field("concurrency", &self.concurrency)
            .field("started", &self.sender.get().is_some())
            .finish()
    }
}

#[async_trait]
impl Messenger for MemoryQueueMessenger {
    async fn queue(&self, mail: CompiledMail, config: Option<TransportConfig>) -> MailResult<()> {
        let mailer = self
            .mailer
            .upgrade()
            .ok_or_else(|| MailError::Queue("Mailer has been dropped".to_string()))?;

        self.sender()
            .send((mailer, mail, config))
            .map_err(|_| MailError::Queue("Queue workers have stopped".to_string()))?;

        debug!(concurrency = self.concurrency, "Mail queued");
        Ok(())
    }
}

/// Admit jobs in FIFO order, one semaphore permit per delivery in flight.
async fn dispatch(mut rx: mpsc::UnboundedReceiver<Job>, concurrency: usize, monitor: Monitor) {
    let semaphore = Arc::new(Semaphore::new(concurrency));

    loop {
        let Ok(permit) = semaphore.clone().acquire_owned().await else {
            break;
        };

        let Some((mailer, mail, config)) = rx.recv().await else {
            break;
        };

        let monitor = monitor.clone();
        tokio::spawn(async move {
            let _permit = permit;

            let result = mailer
                .send_compiled(&mail, config.as_ref())
                .await
                .map_err(|error| QueuedMailError {
                    mail: Box::new(mail),
                    error,
                });

            monitor(result);
        });
    }

    debug!("Queue dispatcher stopped");
}

fn log_outcome(result: Result<SendResult, QueuedMailError>) {
    match result {
        Ok(response) => {
            debug!(message_id = %response.message_id, "Queued mail delivered");
        }
        Err(e) => {
            error!(
                error = %e.error,
                subject = ?e.mail.message.subject,
                "Queued mail delivery failed"
            );
        }
    }
}

/// Delivers inside `queue`. Used by fakes so tests need not wait on
/// background work.
pub struct ImmediateMessenger {
    mailer: WeakMailer,
}

impl ImmediateMessenger {
    pub fn new(mailer: &Mailer) -> Self {
        Self {
            mailer: mailer.downgrade(),
        }
    }
}

#[async_trait]
impl Messenger for ImmediateMessenger {
    async fn queue(&self, mail: CompiledMail, config: Option<TransportConfig>) -> MailResult<()> {
        let mailer = self
            .mailer
            .upgrade()
            .ok_or_else(|| MailError::Queue("Mailer has been dropped".to_string()))?;

        mailer.send_compiled(&mail, config.as_ref()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MailerConfig;
    use crate::error::TransportError;
    use crate::models::MessageNode;
    use crate::transport::{FakeTransport, Transport};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Transport that sleeps and records the peak number of concurrent sends
    #[derive(Default)]
    struct SlowTransport {
        in_flight: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Transport for SlowTransport {
        async fn send(
            &self,
            _message: &MessageNode,
            _config: Option<&TransportConfig>,
        ) -> Result<SendResult, TransportError> {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(current, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(SendResult::new("slow"))
        }

        fn name(&self) -> &'static str {
            "slow"
        }
    }

    #[tokio::test]
    async fn test_queue_never_exceeds_concurrency() {
        let transport = SlowTransport::default();
        let peak = transport.peak.clone();
        let mailer = Mailer::new("slow", transport, MailerConfig::default());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let messenger = MemoryQueueMessenger::new(&mailer)
            .with_concurrency(2)
            .monitor(move |result| {
                let _ = tx.send(result.is_ok());
            });
        mailer.set_messenger(Arc::new(messenger));

        for i in 0..6 {
            mailer
                .send_later(move |message| {
                    message.to("user@example.com").subject(format!("#{}", i)).text("hi");
                })
                .await
                .unwrap();
        }

        for _ in 0..6 {
            assert!(rx.recv().await.unwrap());
        }
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failures_reach_monitor_with_mail() {
        let mailer = Mailer::new(
            "failing",
            FakeTransport::failing("Connection refused"),
            MailerConfig::default(),
        );

        let (tx, mut rx) = mpsc::unbounded_channel();
        let messenger = MemoryQueueMessenger::new(&mailer).monitor(move |result| {
            let _ = tx.send(result);
        });
        mailer.set_messenger(Arc::new(messenger));

        // Accepted even though delivery will fail
        mailer
            .send_later(|message| {
                message.to("user@example.com").subject("Lost").text("hi");
            })
            .await
            .unwrap();

        let err = rx.recv().await.unwrap().unwrap_err();
        assert_eq!(err.mail.message.subject.as_deref(), Some("Lost"));
        assert!(matches!(err.error, MailError::Transport(_)));
    }

    #[tokio::test]
    async fn test_accepted_mail_outlives_dropped_mailer() {
        let transport = FakeTransport::new();
        let mailer = Mailer::new("short-lived", transport.clone(), MailerConfig::default());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let messenger = MemoryQueueMessenger::new(&mailer).monitor(move |result| {
            let _ = tx.send(result.map_err(|e| e.to_string()));
        });
        mailer.set_messenger(Arc::new(messenger));

        mailer
            .send_later(|message| {
                message.to("user@example.com").subject("Pending").text("hi");
            })
            .await
            .unwrap();
        drop(mailer);

        let response = rx.recv().await.unwrap().unwrap();
        assert!(response.message_id.starts_with("fake-"));
        assert_eq!(transport.sent_count(), 1);
        assert_eq!(transport.last_sent().unwrap().subject.as_deref(), Some("Pending"));
    }

    #[tokio::test]
    async fn test_immediate_messenger_delivers_before_returning() {
        let transport = FakeTransport::new();
        let mailer = Mailer::new("immediate", transport.clone(), MailerConfig::default());
        mailer.set_messenger(Arc::new(ImmediateMessenger::new(&mailer)));

        mailer
            .send_later(|message| {
                message.to("user@example.com").text("now");
            })
            .await
            .unwrap();

        assert_eq!(transport.sent_count(), 1);
    }

    #[test]
    fn test_concurrency_has_a_floor() {
        let mailer = Mailer::new("m", FakeTransport::new(), MailerConfig::default());
        let messenger = MemoryQueueMessenger::new(&mailer).with_concurrency(0);
        assert_eq!(messenger.concurrency(), 1);
    }
}
