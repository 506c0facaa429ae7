use crate::error::Error;
use crate::message::Message;
use crate::split::{WSReader, WSWriter};
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};

pub struct WSConnection {
    reader: WSReader,
    writer: WSWriter,
}

impl WSConnection {
    pub fn new(reader: WSReader, writer: WSWriter) -> Self {
        Self { reader, writer }
    }

    // Splitting lets one task own the incoming messages while others keep sending
    pub fn split(self) -> (WSReader, WSWriter) {
        (self.reader, self.writer)
    }

    pub async fn send(&mut self, data: Vec<u8>) -> Result<(), Error> {
        self.writer.send_as_binary(data).await
    }

    pub async fn send_message(&mut self, message: Message) -> Result<(), Error> {
        self.writer.send_message(message).await
    }
}

impl Stream for WSConnection {
    type Item = Result<Message, Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        Pin::new(&mut this.reader).poll_next(cx)
    }
}
