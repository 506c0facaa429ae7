use crate::config::ClientConfig;
use crate::error::Error;
use crate::handshake::connect_async_with_config;
use crate::message::Message;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::StreamExt;
use log::debug;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};

/// One live connection. Sending never waits on the socket: messages are queued and written
/// by a separate task, which closes the connection once every sender was dropped. The
/// inbound stream ends when the server closes the connection and yields an error when it
/// breaks.
pub struct Link {
    pub outbound: UnboundedSender<Message>,
    pub inbound: BoxStream<'static, Result<Message, Error>>,
}

/// Opens connections for an engine.
pub trait Transport: Send + Sync {
    fn open(&self) -> BoxFuture<'_, Result<Link, Error>>;
}

pub struct WebSocketTransport {
    url: String,
    config: ClientConfig,
}

impl WebSocketTransport {
    pub fn new(url: impl Into<String>, config: ClientConfig) -> Self {
        Self {
            url: url.into(),
            config,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Transport for WebSocketTransport {
    fn open(&self) -> BoxFuture<'_, Result<Link, Error>> {
        Box::pin(async move {
            let connection = connect_async_with_config(&self.url, Some(self.config.clone())).await?;
            let (reader, mut writer) = connection.split();
            let (outbound, mut outbound_rx) = unbounded_channel::<Message>();

            tokio::spawn(async move {
                while let Some(message) = outbound_rx.recv().await {
                    if let Err(err) = writer.send_message(message).await {
                        debug!("stopped writing to the connection: {}", err);
                        return;
                    }
                }
                let _ = writer.close_connection().await;
            });

            Ok(Link {
                outbound,
                inbound: reader.boxed(),
            })
        })
    }
}
