use crate::error::Error;
use crate::frame::{Frame, OpCode};

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Text(String),
    Binary(Vec<u8>),
}

impl Message {
    // Converts a reassembled data frame into a Message variant
    pub fn from_frame(frame: Frame) -> Result<Self, Error> {
        match frame.opcode {
            OpCode::Text => Ok(Message::Text(String::from_utf8(frame.payload)?)),
            OpCode::Binary => Ok(Message::Binary(frame.payload)),
            _ => Err(Error::InvalidOpcode),
        }
    }

    pub fn as_binary(&self) -> &[u8] {
        match self {
            Message::Text(text) => text.as_bytes(),
            Message::Binary(data) => data,
        }
    }

    pub fn len(&self) -> usize {
        self.as_binary().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Splits the message into frames of at most max_frame_size bytes, using Continue
    // frames for everything after the first one
    pub fn to_frames(&self, max_frame_size: usize) -> Vec<Frame> {
        let opcode = match self {
            Message::Text(_) => OpCode::Text,
            Message::Binary(_) => OpCode::Binary,
        };
        let data = self.as_binary();

        if data.len() <= max_frame_size || max_frame_size == 0 {
            return vec![Frame::new(true, opcode, data.to_vec())];
        }

        let chunks = data.chunks(max_frame_size);
        let total_chunks = chunks.len();
        chunks
            .enumerate()
            .map(|(i, chunk)| {
                let frame_opcode = if i == 0 { opcode } else { OpCode::Continue };
                Frame::new(i == total_chunks - 1, frame_opcode, chunk.to_vec())
            })
            .collect()
    }
}
