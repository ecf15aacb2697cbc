//! AMQP consumer implementation.
//!
//! Consumes the create/update/delete queues of the catalog exchange with
//! manual acknowledgements.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{BoxStream, SelectAll};
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions,
    QueueBindOptions, QueueDeclareOptions,
};
use lapin::message::Delivery;
use lapin::types::{AMQPValue, FieldTable, ShortString};
use lapin::uri::{AMQPAuthority, AMQPUri, AMQPUserInfo};
use lapin::{Channel, Connection, ConnectionProperties};
use rand::Rng;
use tracing::{debug, info, instrument, warn};

use dataset_indexer_shared::RetryPolicy;

use crate::consumer::messages::{Disposition, EventKind, InboundMessage};
use crate::errors::IngestError;
use crate::orchestrator::EventSource;

/// Default queue name prefix; the event kind is appended.
pub const DEFAULT_QUEUE_PREFIX: &str = "etsin";

/// Queue expiry applied when a queue suffix is configured (8 hours).
pub const DEFAULT_SUFFIXED_QUEUE_EXPIRY: Duration = Duration::from_secs(8 * 60 * 60);

/// Delay between connection attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Connection attempts before giving up.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3000;

/// Broker connection and topology settings.
#[derive(Debug, Clone)]
pub struct AmqpSettings {
    /// Broker hosts, tried round-robin.
    pub hosts: Vec<String>,
    pub port: u16,
    pub vhost: String,
    pub user: String,
    pub password: String,
    /// Exchange the catalog publishes to. It is expected to exist.
    pub exchange: String,
    pub queue_prefix: String,
    /// Appended to queue names, for ephemeral deployments.
    pub queue_suffix: Option<String>,
    /// `x-expires` argument for the declared queues.
    pub queue_expiry: Option<Duration>,
    pub prefetch_count: u16,
    pub retry: RetryPolicy,
}

impl AmqpSettings {
    pub fn new(
        hosts: Vec<String>,
        user: impl Into<String>,
        password: impl Into<String>,
        exchange: impl Into<String>,
    ) -> Self {
        Self {
            hosts,
            port: 5672,
            vhost: "/".to_string(),
            user: user.into(),
            password: password.into(),
            exchange: exchange.into(),
            queue_prefix: DEFAULT_QUEUE_PREFIX.to_string(),
            queue_suffix: None,
            queue_expiry: None,
            prefetch_count: 1,
            retry: RetryPolicy::fixed(DEFAULT_RETRY_ATTEMPTS, DEFAULT_RETRY_DELAY),
        }
    }

    /// Set a queue suffix. Suffixed queues expire after 8 hours unless an
    /// expiry is configured explicitly.
    pub fn with_queue_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.queue_suffix = Some(suffix.into());
        if self.queue_expiry.is_none() {
            self.queue_expiry = Some(DEFAULT_SUFFIXED_QUEUE_EXPIRY);
        }
        self
    }

    pub fn with_queue_expiry(mut self, expiry: Duration) -> Self {
        self.queue_expiry = Some(expiry);
        self
    }

    /// Name of the queue receiving events of the given kind.
    pub fn queue_name(&self, kind: EventKind) -> String {
        match &self.queue_suffix {
            Some(suffix) => format!("{}-{}-{}", self.queue_prefix, kind, suffix),
            None => format!("{}-{}", self.queue_prefix, kind),
        }
    }

    fn queue_arguments(&self) -> FieldTable {
        let mut arguments = FieldTable::default();
        if let Some(expiry) = self.queue_expiry {
            arguments.insert(
                ShortString::from("x-expires"),
                AMQPValue::LongLongInt(expiry.as_millis() as i64),
            );
        }
        arguments
    }

    fn uri(&self, host: &str) -> AMQPUri {
        AMQPUri {
            authority: AMQPAuthority {
                userinfo: AMQPUserInfo {
                    username: self.user.clone(),
                    password: self.password.clone(),
                },
                host: host.to_string(),
                port: self.port,
            },
            vhost: self.vhost.clone(),
            ..Default::default()
        }
    }
}

type DeliveryStream = SelectAll<BoxStream<'static, (EventKind, Result<Delivery, lapin::Error>)>>;

/// An open connection with its three queue subscriptions.
struct Session {
    host: String,
    connection: Connection,
    channel: Channel,
    deliveries: DeliveryStream,
    cancelled: bool,
}

/// Event source backed by a RabbitMQ broker.
pub struct AmqpConsumer {
    settings: AmqpSettings,
    consumer_tag: String,
    /// Index of the host the next connection cycle starts from.
    next_host: usize,
    session: Option<Session>,
}

impl AmqpConsumer {
    pub fn new(settings: AmqpSettings) -> Result<Self, IngestError> {
        if settings.hosts.is_empty() {
            return Err(IngestError::connection("No broker hosts configured"));
        }

        let next_host = rand::thread_rng().gen_range(0..settings.hosts.len());
        let consumer_tag = format!("dataset-indexer-{}", std::process::id());

        Ok(Self {
            settings,
            consumer_tag,
            next_host,
            session: None,
        })
    }

    pub fn settings(&self) -> &AmqpSettings {
        &self.settings
    }

    fn consumer_tag_for(consumer_tag: &str, kind: EventKind) -> String {
        format!("{}-{}", consumer_tag, kind)
    }

    /// Open a connection to one host and subscribe to all queues.
    ///
    /// The connection is closed again when the subscription setup fails.
    async fn connect(
        settings: &AmqpSettings,
        consumer_tag: &str,
        host: &str,
    ) -> Result<Session, IngestError> {
        debug!(host = %host, port = settings.port, "Connecting to broker");

        let connection = Connection::connect_uri(settings.uri(host), ConnectionProperties::default())
            .await
            .map_err(|e| IngestError::connection(format!("{}: {}", host, e)))?;

        match Self::open_subscriptions(settings, consumer_tag, &connection).await {
            Ok((channel, deliveries)) => Ok(Session {
                host: host.to_string(),
                connection,
                channel,
                deliveries,
                cancelled: false,
            }),
            Err(e) => {
                warn!(host = %host, error = %e, "Subscription setup failed, closing connection");
                if let Err(close_err) = connection.close(200, "subscription setup failed").await {
                    debug!(error = %close_err, "Connection already closed");
                }
                Err(e)
            }
        }
    }

    /// Declare and bind the queues on a fresh channel and start consuming.
    async fn open_subscriptions(
        settings: &AmqpSettings,
        consumer_tag: &str,
        connection: &Connection,
    ) -> Result<(Channel, DeliveryStream), IngestError> {
        let channel = connection.create_channel().await?;
        channel
            .basic_qos(settings.prefetch_count, BasicQosOptions::default())
            .await?;

        let mut deliveries = SelectAll::new();
        for kind in EventKind::ALL {
            let queue = settings.queue_name(kind);
            channel
                .queue_declare(
                    &queue,
                    QueueDeclareOptions {
                        durable: true,
                        ..Default::default()
                    },
                    settings.queue_arguments(),
                )
                .await?;
            channel
                .queue_bind(
                    &queue,
                    &settings.exchange,
                    kind.routing_key(),
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await?;
            let consumer = channel
                .basic_consume(
                    &queue,
                    &Self::consumer_tag_for(consumer_tag, kind),
                    BasicConsumeOptions::default(),
                    FieldTable::default(),
                )
                .await?;

            info!(queue = %queue, routing_key = kind.routing_key(), "Subscribed to queue");
            deliveries.push(consumer.map(move |delivery| (kind, delivery)).boxed());
        }

        Ok((channel, deliveries))
    }

    async fn close_session(session: Session) {
        if let Err(e) = session.channel.close(200, "closing").await {
            debug!(error = %e, "Channel already closed");
        }
        if let Err(e) = session.connection.close(200, "closing").await {
            debug!(error = %e, "Connection already closed");
        }
    }

    fn session(&self) -> Result<&Session, IngestError> {
        self.session.as_ref().ok_or(IngestError::NotSubscribed)
    }
}

#[async_trait]
impl EventSource for AmqpConsumer {
    /// Connect and subscribe, cycling through the hosts until one accepts.
    ///
    /// An existing session is closed first.
    #[instrument(skip(self))]
    async fn subscribe(&mut self) -> Result<(), IngestError> {
        if let Some(session) = self.session.take() {
            Self::close_session(session).await;
        }

        let start = self.next_host;
        let settings = &self.settings;
        let consumer_tag = self.consumer_tag.as_str();
        let hosts = &settings.hosts;

        let session = settings
            .retry
            .run(
                "amqp_connect",
                move |attempt| {
                    let host = &hosts[(start + attempt as usize) % hosts.len()];
                    Self::connect(settings, consumer_tag, host)
                },
                |_: &IngestError| true,
            )
            .await?;

        let connected = hosts.iter().position(|h| *h == session.host).unwrap_or(start);
        self.next_host = (connected + 1) % hosts.len();
        info!(host = %session.host, "Connected to broker");
        self.session = Some(session);
        Ok(())
    }

    async fn next_message(&mut self) -> Option<Result<InboundMessage, IngestError>> {
        let Some(session) = self.session.as_mut() else {
            return Some(Err(IngestError::NotSubscribed));
        };

        match session.deliveries.next().await {
            Some((kind, Ok(delivery))) => Some(Ok(InboundMessage::new(
                kind,
                delivery.delivery_tag,
                delivery.data,
            ))),
            Some((kind, Err(e))) => {
                warn!(queue = %kind, error = %e, "Delivery stream failed");
                Some(Err(IngestError::connection(e.to_string())))
            }
            None if session.cancelled => None,
            None => Some(Err(IngestError::connection(
                "Broker closed the subscriptions",
            ))),
        }
    }

    async fn settle(
        &mut self,
        delivery_tag: u64,
        disposition: Disposition,
    ) -> Result<(), IngestError> {
        let channel = &self.session()?.channel;
        match disposition {
            Disposition::Ack => {
                channel
                    .basic_ack(delivery_tag, BasicAckOptions::default())
                    .await?
            }
            Disposition::NackRequeue | Disposition::NackDrop => {
                channel
                    .basic_nack(
                        delivery_tag,
                        BasicNackOptions {
                            multiple: false,
                            requeue: disposition == Disposition::NackRequeue,
                        },
                    )
                    .await?
            }
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn cancel(&mut self) -> Result<(), IngestError> {
        let tags: Vec<String> = EventKind::ALL
            .iter()
            .map(|kind| Self::consumer_tag_for(&self.consumer_tag, *kind))
            .collect();
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        if session.cancelled {
            return Ok(());
        }

        for tag in &tags {
            session
                .channel
                .basic_cancel(tag, BasicCancelOptions::default())
                .await?;
        }
        session.cancelled = true;
        info!("Cancelled queue subscriptions");
        Ok(())
    }

    async fn close(&mut self) -> Result<(), IngestError> {
        if let Some(session) = self.session.take() {
            Self::close_session(session).await;
            info!("Broker connection closed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> AmqpSettings {
        AmqpSettings::new(vec!["mq-1".into(), "mq-2".into()], "user", "secret", "datasets")
    }

    #[test]
    fn test_queue_names() {
        let settings = settings();
        assert_eq!(settings.queue_name(EventKind::Create), "etsin-create");
        assert_eq!(settings.queue_name(EventKind::Delete), "etsin-delete");

        let settings = settings.with_queue_suffix("dev42");
        assert_eq!(settings.queue_name(EventKind::Update), "etsin-update-dev42");
    }

    #[test]
    fn test_suffix_sets_default_expiry() {
        let settings = settings();
        assert!(settings.queue_arguments().inner().is_empty());

        let settings = settings.with_queue_suffix("dev");
        assert_eq!(settings.queue_expiry, Some(DEFAULT_SUFFIXED_QUEUE_EXPIRY));
        let arguments = settings.queue_arguments();
        assert_eq!(
            arguments.inner().get(&ShortString::from("x-expires")),
            Some(&AMQPValue::LongLongInt(28_800_000))
        );
    }

    #[test]
    fn test_explicit_expiry_wins() {
        let settings = settings()
            .with_queue_expiry(Duration::from_secs(60))
            .with_queue_suffix("dev");
        assert_eq!(settings.queue_expiry, Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_uri_uses_host_and_credentials() {
        let uri = settings().uri("mq-2");
        assert_eq!(uri.authority.host, "mq-2");
        assert_eq!(uri.authority.port, 5672);
        assert_eq!(uri.authority.userinfo.username, "user");
        assert_eq!(uri.vhost, "/");
    }

    #[test]
    fn test_requires_hosts() {
        let settings = AmqpSettings::new(Vec::new(), "u", "p", "x");
        assert!(AmqpConsumer::new(settings).is_err());
    }

    #[test]
    fn test_consumer_is_a_send_event_source() {
        fn assert_send<T: Send>(_: &T) {}

        let consumer: Box<dyn EventSource> = Box::new(AmqpConsumer::new(settings()).unwrap());
        assert_send(&consumer);
    }

    #[tokio::test]
    async fn test_failed_subscribe_leaves_no_session() {
        // Nothing listens on port 1, every attempt is refused.
        let mut settings = AmqpSettings::new(
            vec!["127.0.0.1".into(), "localhost".into()],
            "user",
            "secret",
            "datasets",
        );
        settings.port = 1;
        settings.retry = RetryPolicy::fixed(3, Duration::from_millis(1));

        let mut consumer = AmqpConsumer::new(settings).unwrap();
        let start = consumer.next_host;

        assert!(matches!(
            consumer.subscribe().await,
            Err(IngestError::ConnectionError(_))
        ));
        assert!(consumer.session.is_none());
        assert_eq!(consumer.next_host, start);
        assert!(matches!(
            consumer.next_message().await,
            Some(Err(IngestError::NotSubscribed))
        ));
    }

    #[tokio::test]
    async fn test_unsubscribed_source() {
        let mut consumer = AmqpConsumer::new(settings()).unwrap();
        assert!(consumer.next_host < 2);
        assert!(matches!(
            consumer.next_message().await,
            Some(Err(IngestError::NotSubscribed))
        ));
        assert!(matches!(
            consumer.settle(1, Disposition::Ack).await,
            Err(IngestError::NotSubscribed)
        ));
        assert!(consumer.cancel().await.is_ok());
    }
}
