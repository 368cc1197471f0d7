use futures_util::StreamExt;
use lapin::{
    options::{BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, QueueDeclareOptions},
    types::FieldTable,
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::time::Duration;

use crate::ocr::{self, MockOcr};

pub const QUEUE_NAME: &str = "receipts.ocr.verify";

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerifyMessage {
    pub payment_id: i32,
}

#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub rabbitmq_url: String,
    pub poll_interval_secs: u64,
    pub batch_size: i64,
}

/// Starts the receipt verification producer and consumer. Broker failures
/// are logged and leave the HTTP server running without the worker.
pub async fn start_receipt_verification_queue(pool: PgPool, ocr: MockOcr, settings: QueueSettings) {
    let conn = match Connection::connect(&settings.rabbitmq_url, ConnectionProperties::default()).await {
        Ok(c) => c,
        Err(e) => {
            log::error!("rabbitmq connect error: {e}");
            return;
        }
    };

    let channel = match conn.create_channel().await {
        Ok(c) => c,
        Err(e) => {
            log::error!("rabbitmq channel error: {e}");
            return;
        }
    };

    if let Err(e) = channel
        .queue_declare(QUEUE_NAME, QueueDeclareOptions::default(), FieldTable::default())
        .await
    {
        log::error!("rabbitmq declare queue error: {e}");
        return;
    }

    log::info!(
        "receipt verification queue started queue={QUEUE_NAME} poll={}s batch={}",
        settings.poll_interval_secs,
        settings.batch_size
    );

    let producer_pool = pool.clone();
    let producer_channel = channel.clone();
    tokio::spawn(async move {
        // Keeps the connection alive for as long as the producer runs.
        let _conn = conn;
        loop {
            if let Err(e) =
                enqueue_unchecked_receipts(&producer_pool, &producer_channel, settings.batch_size).await
            {
                log::error!("queue enqueue error: {e}");
            }
            tokio::time::sleep(Duration::from_secs(settings.poll_interval_secs)).await;
        }
    });

    tokio::spawn(async move {
        if let Err(e) = consume_receipts(&pool, &channel, &ocr).await {
            log::error!("queue consume error: {e}");
        }
    });
}

async fn enqueue_unchecked_receipts(
    pool: &PgPool,
    channel: &Channel,
    batch_size: i64,
) -> Result<(), String> {
    let ids: Vec<i32> = sqlx::query_scalar(
        r#"SELECT id
           FROM payments
           WHERE method = 'gcash_manual'
             AND status = 'pending'
             AND ocr_status = 'not_checked'
           ORDER BY created_at ASC
           LIMIT $1"#,
    )
    .bind(batch_size)
    .fetch_all(pool)
    .await
    .map_err(|e| e.to_string())?;

    for payment_id in ids {
        let payload =
            serde_json::to_vec(&VerifyMessage { payment_id }).map_err(|e| e.to_string())?;
        channel
            .basic_publish(
                "",
                QUEUE_NAME,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default(),
            )
            .await
            .map_err(|e| e.to_string())?
            .await
            .map_err(|e| e.to_string())?;
    }

    Ok(())
}

async fn consume_receipts(pool: &PgPool, channel: &Channel, ocr: &MockOcr) -> Result<(), String> {
    let mut consumer = channel
        .basic_consume(
            QUEUE_NAME,
            "receipt-ocr-consumer",
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(|e| e.to_string())?;

    while let Some(delivery) = consumer.next().await {
        let delivery = match delivery {
            Ok(d) => d,
            Err(e) => {
                log::error!("rabbitmq delivery error: {e}");
                continue;
            }
        };

        if let Err(e) = handle_verify_message(pool, ocr, &delivery.data).await {
            log::error!("handle verify message error: {e}");
        }

        if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
            log::warn!("rabbitmq ack error: {e}");
        }
    }

    Ok(())
}

async fn handle_verify_message(pool: &PgPool, ocr: &MockOcr, data: &[u8]) -> Result<(), String> {
    let msg: VerifyMessage = serde_json::from_slice(data).map_err(|e| e.to_string())?;
    ocr::verify_payment(pool, ocr, msg.payment_id)
        .await
        .map_err(|e| e.to_string())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_message_wire_format() {
        let raw = serde_json::to_string(&VerifyMessage { payment_id: 42 }).unwrap();
        assert_eq!(raw, r#"{"payment_id":42}"#);
        let back: VerifyMessage = serde_json::from_str(&raw).unwrap();
        assert_eq!(back.payment_id, 42);
    }
}
