//! `TaskBus` over AMQP 0.9.1 via `lapin`: a `tasks.direct` exchange with
//! three priority-routed durable queues, manual ack, publisher confirms.

use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
    BasicQosOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind};
use tokio::sync::Mutex;
use tracing::info;

use crate::errors::CoreError;
use crate::model::Task;
use crate::ports::{Delivery, TaskBus};

const EXCHANGE: &str = "tasks.direct";
const QUEUES: [&str; 3] = ["tasks.low", "tasks.normal", "tasks.high"];

fn routing_key_for(priority: u8) -> &'static str {
    if priority > 7 {
        "task.high"
    } else if priority < 4 {
        "task.low"
    } else {
        "task.normal"
    }
}

pub struct AmqpTaskBus {
    publish_channel: Channel,
    consumer: Option<Mutex<Consumer>>,
}

impl AmqpTaskBus {
    /// Connects and declares the exchange/queue topology idempotently.
    /// Puts the publish channel into confirm mode so `publish` only
    /// returns once the broker has acknowledged receipt. Publish-only; use
    /// [`AmqpTaskBus::open_consumer`] on the worker side to also bind a
    /// queue.
    pub async fn open(url: &str) -> anyhow::Result<Self> {
        let conn = Connection::connect(url, ConnectionProperties::default())
            .await
            .map_err(CoreError::from)?;
        let publish_channel = conn.create_channel().await.map_err(CoreError::from)?;
        declare_topology(&publish_channel).await?;
        publish_channel
            .confirm_select(lapin::options::ConfirmSelectOptions::default())
            .await
            .map_err(CoreError::from)?;

        Ok(Self {
            publish_channel,
            consumer: None,
        })
    }

    /// Connects, declares topology, and binds a consumer on `queue_name`
    /// with a prefetch of 1 — the serial-processing reference policy from
    /// the concurrency model. Used by the worker; the scheduler never
    /// calls this since it only publishes.
    pub async fn open_consumer(url: &str, queue_name: &str) -> anyhow::Result<Self> {
        let conn = Connection::connect(url, ConnectionProperties::default())
            .await
            .map_err(CoreError::from)?;

        let publish_channel = conn.create_channel().await.map_err(CoreError::from)?;
        declare_topology(&publish_channel).await?;
        publish_channel
            .confirm_select(lapin::options::ConfirmSelectOptions::default())
            .await
            .map_err(CoreError::from)?;

        let consume_channel = conn.create_channel().await.map_err(CoreError::from)?;
        consume_channel
            .basic_qos(1, BasicQosOptions::default())
            .await
            .map_err(CoreError::from)?;
        declare_topology(&consume_channel).await?;

        let consumer = consume_channel
            .basic_consume(
                queue_name,
                "worker",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(CoreError::from)?;

        Ok(Self {
            publish_channel,
            consumer: Some(Mutex::new(consumer)),
        })
    }
}

async fn declare_topology(channel: &Channel) -> anyhow::Result<()> {
    channel
        .exchange_declare(
            EXCHANGE,
            ExchangeKind::Direct,
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(CoreError::from)?;

    for queue in QUEUES {
        channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(CoreError::from)?;
        let routing_key = match queue {
            "tasks.high" => "task.high",
            "tasks.low" => "task.low",
            _ => "task.normal",
        };
        channel
            .queue_bind(
                queue,
                EXCHANGE,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(CoreError::from)?;
    }
    Ok(())
}

#[async_trait]
impl TaskBus for AmqpTaskBus {
    async fn publish(&self, task: &Task) -> anyhow::Result<()> {
        let body = serde_json::to_vec(task)?;
        let routing_key = routing_key_for(task.priority);

        let confirm = self
            .publish_channel
            .basic_publish(
                EXCHANGE,
                routing_key,
                BasicPublishOptions::default(),
                &body,
                BasicProperties::default()
                    .with_content_type("application/json".into())
                    .with_priority(task.priority),
            )
            .await
            .map_err(CoreError::from)?
            .await
            .map_err(CoreError::from)?;

        if confirm.is_nack() {
            anyhow::bail!("broker nacked publish of task {}", task.id);
        }

        info!(task_id = %task.id, routing_key, "published task");
        Ok(())
    }

    async fn next_delivery(&self) -> anyhow::Result<Option<Box<dyn Delivery>>> {
        let consumer_lock = self
            .consumer
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("this bus instance has no consumer bound"))?;
        let mut consumer = consumer_lock.lock().await;

        match consumer.next().await {
            Some(Ok(delivery)) => Ok(Some(Box::new(AmqpDelivery { delivery }) as Box<dyn Delivery>)),
            Some(Err(e)) => Err(CoreError::from(e).into()),
            None => Ok(None),
        }
    }
}

struct AmqpDelivery {
    delivery: lapin::message::Delivery,
}

#[async_trait]
impl Delivery for AmqpDelivery {
    fn payload(&self) -> &[u8] {
        &self.delivery.data
    }

    async fn ack(self: Box<Self>) -> anyhow::Result<()> {
        self.delivery
            .ack(BasicAckOptions::default())
            .await
            .map_err(CoreError::from)?;
        Ok(())
    }

    async fn reject(self: Box<Self>, requeue: bool) -> anyhow::Result<()> {
        self.delivery
            .nack(BasicNackOptions {
                requeue,
                ..Default::default()
            })
            .await
            .map_err(CoreError::from)?;
        Ok(())
    }
}
