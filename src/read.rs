use crate::config::WebSocketConfig;
use crate::error::Error;
use crate::frame::{Frame, OpCode};
use crate::message::Message;
use std::io::ErrorKind;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::timeout;

pub struct ReadStream<R: AsyncRead + Unpin> {
    read: R,
    fragmented_message: Option<Frame>,
    read_tx: UnboundedSender<Result<Message, Error>>,
    internal_tx: UnboundedSender<Frame>,
    config: WebSocketConfig,
}

impl<R: AsyncRead + Unpin> ReadStream<R> {
    pub fn new(
        read: R,
        read_tx: UnboundedSender<Result<Message, Error>>,
        internal_tx: UnboundedSender<Frame>,
        config: WebSocketConfig,
    ) -> Self {
        Self {
            read,
            fragmented_message: None,
            read_tx,
            internal_tx,
            config,
        }
    }

    // Reads frames until the server closes the connection. A clean close, including the peer
    // simply dropping the socket, returns Ok, anything else is returned as an error
    pub async fn poll_messages(&mut self) -> Result<(), Error> {
        loop {
            let frame = match self.read_frame().await {
                Ok(frame) => frame,
                Err(Error::IOError { source }) if source.kind() == ErrorKind::UnexpectedEof => {
                    return Ok(())
                }
                Err(err) => return Err(err),
            };

            match frame.opcode {
                OpCode::Continue => {
                    let fragmented_message = self
                        .fragmented_message
                        .as_mut()
                        .ok_or(Error::InvalidContinuationFrame)?;
                    fragmented_message.payload.extend_from_slice(&frame.payload);

                    if fragmented_message.payload.len()
                        > self.config.max_message_size.unwrap_or(usize::MAX)
                    {
                        return Err(Error::MaxMessageSize);
                    }

                    if frame.final_fragment {
                        if let Some(mut message) = self.fragmented_message.take() {
                            message.final_fragment = true;
                            self.deliver(message)?;
                        }
                    }
                }
                OpCode::Text | OpCode::Binary => {
                    if self.fragmented_message.is_some() {
                        return Err(Error::InvalidFrameFragmentation);
                    }
                    if frame.final_fragment {
                        self.deliver(frame)?;
                    } else {
                        self.fragmented_message = Some(frame);
                    }
                }
                OpCode::Close => {
                    // Echo the close frame, completing the close handshake
                    self.internal_tx
                        .send(Frame::new(true, OpCode::Close, Vec::new()))
                        .map_err(|_| Error::CommunicationError)?;
                    return Ok(());
                }
                OpCode::Ping => self
                    .internal_tx
                    .send(Frame::new(true, OpCode::Pong, frame.payload))
                    .map_err(|_| Error::CommunicationError)?,
                OpCode::Pong => {}
            }
        }
    }

    fn deliver(&mut self, frame: Frame) -> Result<(), Error> {
        let message = Message::from_frame(frame)?;
        self.read_tx
            .send(Ok(message))
            .map_err(|_| Error::CommunicationError)
    }

    pub async fn read_frame(&mut self) -> Result<Frame, Error> {
        let mut header = [0u8; 2];
        self.read.read_exact(&mut header).await?;

        // No extension is negotiated, so the RSV bits must all be zero
        if header[0] & 0b0111_0000 != 0 {
            return Err(Error::RSVNotZero);
        }

        let final_fragment = (header[0] & 0b1000_0000) != 0;
        let opcode = OpCode::from(header[0] & 0b0000_1111)?;

        if !final_fragment && opcode.is_control() {
            return Err(Error::ControlFramesFragmented);
        }

        let masked = (header[1] & 0b1000_0000) != 0;
        let mut length = (header[1] & 0b0111_1111) as usize;

        if opcode.is_control() && length > 125 {
            return Err(Error::ControlFramePayloadSize);
        }

        if length == 126 {
            let mut be_bytes = [0u8; 2];
            self.read.read_exact(&mut be_bytes).await?;
            length = u16::from_be_bytes(be_bytes) as usize;
        } else if length == 127 {
            let mut be_bytes = [0u8; 8];
            self.read.read_exact(&mut be_bytes).await?;
            length = u64::from_be_bytes(be_bytes) as usize;
        }

        if length > self.config.max_frame_size.unwrap_or(usize::MAX) {
            return Err(Error::MaxFrameSize);
        }

        // Servers shouldn't mask their frames, but unmasking costs nothing
        let mask = if masked {
            let mut mask = [0u8; 4];
            self.read.read_exact(&mut mask).await?;
            Some(mask)
        } else {
            None
        };

        let mut payload = vec![0u8; length];
        timeout(self.config.read_timeout, self.read.read_exact(&mut payload)).await??;

        if let Some(mask) = mask {
            for (i, byte) in payload.iter_mut().enumerate() {
                *byte ^= mask[i % 4];
            }
        }

        Ok(Frame::new(final_fragment, opcode, payload))
    }
}
