// tests/transport_memory.rs

mod common;

use tokio::time::{timeout, Duration};

use cloud_messenger::{
    // ---
    create_transport,
    Error,
    MemoryHub,
    QueueSpec,
};

use common::{context, memory};

#[tokio::test]
async fn memory_publish_then_consume_delivers() {
    // ---
    // Arrange
    // ---
    let hub = MemoryHub::new();
    let mut producer = create_transport("producer", &context(), &memory(&hub)).unwrap();
    let mut consumer = create_transport("consumer", &context(), &memory(&hub)).unwrap();
    producer.open().await.unwrap();
    consumer.open().await.unwrap();

    let queue = consumer
        .declare_queue(&QueueSpec::new("test.queue"))
        .await
        .expect("declare failed");
    consumer.start_consumer(&queue, false).await.unwrap();

    // ---
    // Act
    // ---
    producer
        .publish("test.queue", b"hello", true)
        .await
        .expect("publish failed");

    // ---
    // Assert
    // ---
    let received = timeout(Duration::from_millis(100), consumer.next_delivery())
        .await
        .expect("timed out waiting for message")
        .expect("consumer failed")
        .expect("consumer ended unexpectedly");

    assert_eq!(&received.payload[..], b"hello");
    consumer.ack(received.delivery_tag).await.unwrap();
}

#[tokio::test]
async fn memory_prefetch_window_holds_back_deliveries() {
    // ---
    let hub = MemoryHub::new();
    let mut t = create_transport("t", &context(), &memory(&hub)).unwrap();
    t.open().await.unwrap();
    t.declare_queue(&QueueSpec::new("work")).await.unwrap();
    t.set_prefetch(1).await.unwrap();

    assert!(hub.inject("work", "a"));
    assert!(hub.inject("work", "b"));
    t.start_consumer("work", false).await.unwrap();

    let first = t.next_delivery().await.unwrap().unwrap();
    let blocked = timeout(Duration::from_millis(30), t.next_delivery()).await;
    assert!(blocked.is_err(), "second delivery before ack");

    t.ack(first.delivery_tag).await.unwrap();
    let second = t.next_delivery().await.unwrap().unwrap();
    assert_eq!(&second.payload[..], b"b");
}

#[tokio::test]
async fn memory_close_requeues_unacked() {
    // ---
    let hub = MemoryHub::new();
    let mut t = create_transport("t", &context(), &memory(&hub)).unwrap();
    t.open().await.unwrap();
    t.declare_queue(&QueueSpec::new("work")).await.unwrap();
    assert!(hub.inject("work", "job"));

    t.start_consumer("work", false).await.unwrap();
    t.next_delivery().await.unwrap().unwrap();
    assert_eq!(hub.message_count("work"), Some(0));

    t.close().await.unwrap();
    assert_eq!(hub.message_count("work"), Some(1));
}

#[tokio::test]
async fn memory_exclusive_queue_rejects_other_connections() {
    // ---
    let hub = MemoryHub::new();
    let mut owner = create_transport("owner", &context(), &memory(&hub)).unwrap();
    let mut other = create_transport("other", &context(), &memory(&hub)).unwrap();
    owner.open().await.unwrap();
    other.open().await.unwrap();

    let spec = QueueSpec::new("private").exclusive(true);
    owner.declare_queue(&spec).await.unwrap();

    let err = other.declare_queue(&spec).await.unwrap_err();
    assert!(matches!(err, Error::Broker(_)));

    owner.close().await.unwrap();
    assert!(!hub.queue_exists("private"));
    other.declare_queue(&spec).await.unwrap();
}

#[tokio::test]
async fn memory_auto_delete_on_cancel() {
    // ---
    let hub = MemoryHub::new();
    let mut t = create_transport("t", &context(), &memory(&hub)).unwrap();
    t.open().await.unwrap();
    t.declare_queue(&QueueSpec::new("temp").auto_delete(true))
        .await
        .unwrap();

    t.start_consumer("temp", false).await.unwrap();
    assert!(hub.queue_exists("temp"));

    t.cancel_consumer().await.unwrap();
    assert!(!hub.queue_exists("temp"));
}
