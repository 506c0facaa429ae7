use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Continue,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    pub fn from(byte: u8) -> Result<Self, Error> {
        match byte {
            0x0 => Ok(OpCode::Continue),
            0x1 => Ok(OpCode::Text),
            0x2 => Ok(OpCode::Binary),
            0x8 => Ok(OpCode::Close),
            0x9 => Ok(OpCode::Ping),
            0xA => Ok(OpCode::Pong),
            _ => Err(Error::InvalidOpcode),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            OpCode::Continue => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }

    pub fn is_control(&self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub final_fragment: bool,
    pub opcode: OpCode,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(final_fragment: bool, opcode: OpCode, payload: Vec<u8>) -> Self {
        Self {
            final_fragment,
            opcode,
            payload,
        }
    }

    // Client frames are always masked, so the header is the 2 base bytes, the extended length
    // and the 4 bytes of the masking key
    pub fn encode_masked(&self, mask: [u8; 4]) -> Vec<u8> {
        let payload_len = self.payload.len();
        let mut buf = Vec::with_capacity(payload_len + 14);

        // (final_fragment as u8) << 7 sets the FIN bit, and the OR puts the opcode in the last 4 bits
        buf.push((self.final_fragment as u8) << 7 | self.opcode.as_u8());

        // The MSB of the second byte signals that the payload is masked
        if payload_len <= 125 {
            buf.push(0b1000_0000 | payload_len as u8);
        } else if payload_len <= 65535 {
            buf.push(0b1000_0000 | 126);
            buf.extend_from_slice(&(payload_len as u16).to_be_bytes());
        } else {
            buf.push(0b1000_0000 | 127);
            buf.extend_from_slice(&(payload_len as u64).to_be_bytes());
        }

        buf.extend_from_slice(&mask);
        buf.extend(
            self.payload
                .iter()
                .enumerate()
                .map(|(i, byte)| byte ^ mask[i % 4]),
        );

        buf
    }
}
