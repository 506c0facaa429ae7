use crate::config::WebSocketConfig;
use crate::error::Error;
use crate::frame::{Frame, OpCode};
use crate::message::Message;
use crate::write::Writer;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;
use tokio_stream::wrappers::UnboundedReceiverStream;

pub struct WSReader {
    read_rx: UnboundedReceiverStream<Result<Message, Error>>,
}

impl WSReader {
    pub fn new(read_rx: UnboundedReceiverStream<Result<Message, Error>>) -> Self {
        Self { read_rx }
    }
}

impl Stream for WSReader {
    type Item = Result<Message, Error>;
    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        Pin::new(&mut this.read_rx).poll_next(cx)
    }
}

#[derive(Clone)]
pub struct WSWriter {
    writer: Arc<Mutex<Writer<OwnedWriteHalf>>>,
    web_socket_config: WebSocketConfig,
}

impl WSWriter {
    pub fn new(writer: Arc<Mutex<Writer<OwnedWriteHalf>>>, web_socket_config: WebSocketConfig) -> Self {
        Self {
            writer,
            web_socket_config,
        }
    }

    // Sends the close frame and shuts the write side down. The server answers with its own
    // close frame, which ends the reader
    pub async fn close_connection(&mut self) -> Result<(), Error> {
        let mut writer = self.writer.lock().await;
        writer
            .write_frame(Frame::new(true, OpCode::Close, Vec::new()))
            .await?;
        writer.shutdown().await
    }

    pub async fn send_message(&mut self, message: Message) -> Result<(), Error> {
        if message.len() > self.web_socket_config.max_message_size.unwrap_or(usize::MAX) {
            return Err(Error::MaxMessageSize);
        }

        let frames = message.to_frames(self.web_socket_config.max_frame_size.unwrap_or_default());
        self.write_frames(frames).await
    }

    pub async fn send_as_binary(&mut self, data: Vec<u8>) -> Result<(), Error> {
        self.send_message(Message::Binary(data)).await
    }

    pub(crate) async fn write_frames(&mut self, frames: Vec<Frame>) -> Result<(), Error> {
        // Holding the lock for the whole message keeps a fragmented message from
        // interleaving with control frames
        let mut writer = self.writer.lock().await;
        for frame in frames {
            writer.write_frame(frame).await?
        }
        Ok(())
    }
}
