use std::{sync::Arc, time::Duration};

use amqprs::{
    callbacks::{DefaultChannelCallback, DefaultConnectionCallback},
    channel::{
        BasicAckArguments, BasicConsumeArguments, BasicNackArguments, BasicPublishArguments, Channel,
        QueueDeclareArguments,
    },
    connection::{Connection, OpenConnectionArguments},
    consumer::AsyncConsumer,
    BasicProperties, Deliver, FieldTable,
};
use chrono::{DateTime, Days, NaiveDate, Utc};
use log::{error, info, warn};
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::actions;
use crate::config::AmqpConfig;
use crate::models::Booking;
use crate::DbPool;

type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;

const COMPLETION_QUEUE: &str = "guide.booking.completions";
const COMPLETION_TIMER_QUEUE: &str = "guide.booking.completion.timer";

// Published when a booking is made; dead-lettered into the completion queue
// once the booking's last day is over.
#[derive(Debug, Serialize, Deserialize)]
struct BookingCompletionMessage {
    booking_id: Uuid,
    guide_id: Uuid,
    end_date: NaiveDate,
}

/// Start of the first day after `end_date`, in UTC.
pub fn completion_due_at(end_date: NaiveDate) -> Option<DateTime<Utc>> {
    end_date
        .checked_add_days(Days::new(1))
        .and_then(|day| day.and_hms_opt(0, 0, 0))
        .map(|midnight| midnight.and_utc())
}

/// Milliseconds from `now` until the booking may be completed; zero when already due.
pub fn completion_delay_ms(end_date: NaiveDate, now: DateTime<Utc>) -> i64 {
    completion_due_at(end_date)
        .map(|due| (due - now).num_milliseconds().max(0))
        .unwrap_or(0)
}

struct BookingCompletionConsumer {
    db_pool: DbPool,
}

impl BookingCompletionConsumer {
    fn new(db_pool: DbPool) -> Self {
        Self { db_pool }
    }
}

#[async_trait::async_trait]
impl AsyncConsumer for BookingCompletionConsumer {
    async fn consume(
        &mut self,
        channel: &Channel,
        deliver: Deliver,
        _basic_properties: BasicProperties,
        content: Vec<u8>,
    ) {
        if let Err(e) = self.handle_completion(channel, deliver, content).await {
            error!("Failed to process booking completion: {:?}", e);
        }
    }
}

impl BookingCompletionConsumer {
    async fn handle_completion(&mut self, channel: &Channel, deliver: Deliver, content: Vec<u8>) -> Result<()> {
        let message = match serde_json::from_slice::<BookingCompletionMessage>(&content) {
            Ok(message) => message,
            Err(e) => {
                error!("Malformed booking completion message: {:?}", e);
                // Reject without requeue - it will never parse
                if let Err(e) = channel
                    .basic_nack(BasicNackArguments::new(deliver.delivery_tag(), false, false))
                    .await
                {
                    error!("Error rejecting message: {:?}", e);
                }
                return Err(e.into());
            }
        };

        let pool = self.db_pool.clone();
        let booking_id = message.booking_id;
        let today = Utc::now().date_naive();
        let task = tokio::task::spawn_blocking(move || -> Result<Option<Booking>> {
            let mut conn = pool.get()?;
            Ok(actions::complete_booking(&mut conn, booking_id, today)?)
        });
        let outcome = match task.await {
            Ok(result) => result,
            Err(e) => Err(e.into()),
        };

        match outcome {
            Ok(Some(_)) => {
                info!(
                    "Completed booking {} of guide {} (ended {})",
                    message.booking_id, message.guide_id, message.end_date
                );
            }
            Ok(None) => {
                info!("Booking {} needs no completion", message.booking_id);
            }
            Err(e) => {
                error!("Error completing booking {}: {:?}", message.booking_id, e);
                if let Err(e) = channel
                    .basic_nack(BasicNackArguments::new(deliver.delivery_tag(), false, true))
                    .await
                {
                    error!("Error rejecting message: {:?}", e);
                }
                return Err(e);
            }
        }

        if let Err(e) = channel
            .basic_ack(BasicAckArguments::new(deliver.delivery_tag(), false))
            .await
        {
            error!("Error acknowledging message: {:?}", e);
        }
        Ok(())
    }
}

/// Complete every confirmed booking whose last day is over.
pub async fn sweep_elapsed_bookings(pool: DbPool) -> Result<usize> {
    let today = Utc::now().date_naive();
    tokio::task::spawn_blocking(move || -> Result<usize> {
        let mut conn = pool.get()?;
        Ok(actions::complete_elapsed_bookings(&mut conn, today)?)
    })
    .await?
}

/// Schedules and consumes booking completion events over RabbitMQ.
///
/// Every operation is best effort: when the broker is unreachable the startup
/// sweep in `main` still completes elapsed bookings.
#[derive(Clone)]
pub struct BookingEventService {
    db_pool: DbPool,
    amqp: AmqpConfig,
    connection: Option<Arc<Connection>>,
    completion_queue: String,
    completion_timer_queue: String,
}

impl BookingEventService {
    pub fn new(db_pool: DbPool, amqp: AmqpConfig) -> Self {
        Self {
            db_pool,
            amqp,
            connection: None,
            completion_queue: COMPLETION_QUEUE.to_string(),
            completion_timer_queue: COMPLETION_TIMER_QUEUE.to_string(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub async fn initialize(&mut self) -> Result<()> {
        if !self.amqp.enabled {
            info!("RabbitMQ disabled, booking completion relies on the startup sweep");
            return Ok(());
        }

        info!("Connecting to RabbitMQ at {}:{}", self.amqp.host, self.amqp.port);

        let connection = Connection::open(&OpenConnectionArguments::new(
            &self.amqp.host,
            self.amqp.port,
            &self.amqp.username,
            &self.amqp.password,
        ))
        .await?;

        connection.register_callback(DefaultConnectionCallback).await?;

        let setup_channel = connection.open_channel(None).await?;
        setup_channel.register_callback(DefaultChannelCallback).await?;

        setup_channel
            .queue_declare(
                QueueDeclareArguments::new(&self.completion_queue)
                    .durable(true)
                    .finish(),
            )
            .await?;

        setup_channel
            .queue_declare(self.timer_queue_arguments()?)
            .await?;

        self.connection = Some(Arc::new(connection));
        let _ = setup_channel.close().await;

        info!(
            "RabbitMQ ready: timer queue '{}' dead-letters into '{}'",
            self.completion_timer_queue, self.completion_queue
        );
        Ok(())
    }

    // Messages expire out of the timer queue into the completion queue.
    fn timer_queue_arguments(&self) -> Result<QueueDeclareArguments> {
        let mut args = FieldTable::new();
        args.insert("x-dead-letter-exchange".try_into()?, "".into());
        args.insert(
            "x-dead-letter-routing-key".try_into()?,
            self.completion_queue.clone().into(),
        );

        Ok(QueueDeclareArguments::new(&self.completion_timer_queue)
            .durable(true)
            .arguments(args)
            .finish())
    }

    async fn get_fresh_channel(&self) -> Result<Channel> {
        match &self.connection {
            Some(connection) => {
                let channel = connection.open_channel(None).await?;
                channel.register_callback(DefaultChannelCallback).await?;
                Ok(channel)
            }
            None => Err("RabbitMQ connection not initialized".into()),
        }
    }

    // Retries with backoff, then gives up quietly; queue trouble never fails a booking.
    async fn safe_queue_operation<F, Fut>(&self, operation: F) -> Result<()>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        let max_retries = 3;
        let mut delay_ms = 25;

        for attempt in 1..=max_retries {
            match operation().await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < max_retries => {
                    warn!(
                        "Queue operation failed (attempt {}/{}), retrying: {:?}",
                        attempt, max_retries, e
                    );
                    tokio::time::sleep(tokio::time::Duration::from_millis(delay_ms)).await;
                    delay_ms *= 2;
                }
                Err(e) => {
                    error!("Queue operation failed after {} attempts, giving up: {:?}", max_retries, e);
                }
            }
        }

        Ok(())
    }

    /// Arrange for `booking` to be completed once its last day is over.
    pub async fn schedule_completion(&self, booking: &Booking) -> Result<()> {
        if !self.is_connected() {
            return Ok(());
        }

        let message = BookingCompletionMessage {
            booking_id: booking.id,
            guide_id: booking.guide_id,
            end_date: booking.end_date,
        };
        let content = serde_json::to_vec(&message)?;
        let delay_ms = completion_delay_ms(booking.end_date, Utc::now());

        let operation = || {
            let content = content.clone();
            async move {
                let channel = self.get_fresh_channel().await?;

                let (properties, queue) = if delay_ms > 0 {
                    let properties = BasicProperties::default()
                        .with_delivery_mode(2)
                        .with_expiration(&delay_ms.to_string())
                        .finish();
                    (properties, self.completion_timer_queue.as_str())
                } else {
                    let properties = BasicProperties::default().with_delivery_mode(2).finish();
                    (properties, self.completion_queue.as_str())
                };

                channel
                    .basic_publish(properties, content, BasicPublishArguments::new("", queue))
                    .await?;
                let _ = channel.close().await;
                Ok(())
            }
        };

        self.safe_queue_operation(operation).await?;
        info!(
            "Scheduled completion of booking {} in {}ms",
            message.booking_id, delay_ms
        );
        Ok(())
    }

    /// Sweep for elapsed bookings every `every`, whether or not the broker is up.
    ///
    /// The timer queue only dead-letters the message at its head, so a booking
    /// ending soon can wait behind one ending months later.
    pub fn start_completion_sweeper(&self, every: Duration) -> JoinHandle<()> {
        let pool = self.db_pool.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick is immediate; startup already swept.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match sweep_elapsed_bookings(pool.clone()).await {
                    Ok(0) => {}
                    Ok(count) => info!("Completed {} elapsed bookings", count),
                    Err(e) => error!("Sweep of elapsed bookings failed: {:?}", e),
                }
            }
        })
    }

    pub async fn start_consuming_completions(&self) -> Result<()> {
        let Some(connection) = &self.connection else {
            return Err("RabbitMQ connection not initialized".into());
        };

        let channel = connection.open_channel(None).await?;
        channel.register_callback(DefaultChannelCallback).await?;

        let consumer_tag = format!("booking_completion_consumer_{}", Uuid::new_v4());
        let args = BasicConsumeArguments::new(&self.completion_queue, &consumer_tag)
            .manual_ack(true)
            .finish();
        let consumer = BookingCompletionConsumer::new(self.db_pool.clone());
        let queue = self.completion_queue.clone();

        tokio::spawn(async move {
            match channel.basic_consume(consumer, args).await {
                Ok(_) => {
                    info!("Consuming booking completions from '{}'", queue);
                    // The channel must outlive the consumer.
                    loop {
                        tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
                    }
                }
                Err(e) => {
                    error!("Failed to start booking completion consumer: {:?}", e);
                }
            }
        });

        Ok(())
    }
}
