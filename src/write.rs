use crate::error::Error;
use crate::frame::Frame;
use rand::random;
use tokio::io::{AsyncWrite, AsyncWriteExt};

// Frames sent from a client must be masked with a fresh random key, as RFC 6455 requires
pub struct Writer<W: AsyncWrite + Unpin> {
    write_half: W,
}

impl<W: AsyncWrite + Unpin> Writer<W> {
    pub fn new(write_half: W) -> Self {
        Self { write_half }
    }

    pub async fn write_frame(&mut self, frame: Frame) -> Result<(), Error> {
        let mask: [u8; 4] = random();
        self.write_half.write_all(&frame.encode_masked(mask)).await?;
        self.write_half.flush().await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), Error> {
        self.write_half.shutdown().await?;
        Ok(())
    }
}
