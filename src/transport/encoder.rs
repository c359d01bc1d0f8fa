//! Encoder for data sent to the host programs
//!
//! Encoded output is collected in a single buffer that is split into chunks,
//! each starting with the start sequence. Chunks are handed out one by one,
//! one per host prompt.

use super::encoding::TransportEncoding;

#[derive(Debug, Clone)]
pub struct DataEncoder {
    enc: TransportEncoding,
    buffer: Vec<u8>,
    chunk_starts: Vec<usize>,
    curr_chunk_start: usize,
}

impl DataEncoder {
    pub fn new(enc: TransportEncoding) -> Self {
        Self {
            enc,
            buffer: Vec::with_capacity(4096),
            chunk_starts: Vec::new(),
            curr_chunk_start: 0,
        }
    }

    pub fn encoding(&self) -> &TransportEncoding {
        &self.enc
    }

    /// Drop all content and begin a new response with the start sequence.
    pub fn reset(&mut self) -> &mut Self {
        self.clear();
        let marker = self.enc.start_sequence().to_vec();
        self.buffer.extend_from_slice(&marker);
        self
    }

    /// Drop all content without writing a start sequence.
    pub fn clear(&mut self) -> &mut Self {
        self.buffer.clear();
        self.chunk_starts.clear();
        self.curr_chunk_start = 0;
        self
    }

    /// Close the current chunk (if it has content) and start the next one.
    pub fn new_chunk(&mut self) -> &mut Self {
        if self.curr_chunk_start < self.buffer.len() {
            self.chunk_starts.push(self.curr_chunk_start);
            self.curr_chunk_start = self.buffer.len();
        }
        let marker = self.enc.start_sequence().to_vec();
        self.buffer.extend_from_slice(&marker);
        self
    }

    pub fn available_chunks(&self) -> usize {
        self.chunk_starts.len() + usize::from(self.curr_chunk_start < self.buffer.len())
    }

    pub fn append_byte(&mut self, b: u8) -> &mut Self {
        self.buffer.push(b);
        self
    }

    pub fn append_char(&mut self, ch: char) -> &mut Self {
        let b = self.enc.remote(ch);
        self.buffer.push(b);
        self
    }

    pub fn append_str(&mut self, text: &str) -> &mut Self {
        let remote = self.enc.string_to_remote(text);
        self.buffer.extend_from_slice(&remote);
        self
    }

    /// Self-delimiting integer: leading zero nibbles are skipped, the last
    /// nibble is always written and uses the second table.
    pub fn encode_int(&mut self, value: u32) -> &mut Self {
        let mut started = false;
        for shift in (1..8).rev() {
            let nibble = ((value >> (shift * 4)) & 0x0F) as u8;
            if nibble != 0 || started {
                started = true;
                let b = self.enc.int_nibble_1.code(nibble);
                self.buffer.push(b);
            }
        }
        let b = self.enc.int_nibble_2.code((value & 0x0F) as u8);
        self.buffer.push(b);
        self
    }

    /// Data block: the last byte is written with the `last` tables so the
    /// block needs no length prefix. An empty block writes nothing.
    pub fn encode_data(&mut self, data: &[u8]) -> &mut Self {
        let Some((last, head)) = data.split_last() else {
            return self;
        };
        for &b in head {
            let n1 = self.enc.data_nibble_1_normal.code(b >> 4);
            let n2 = self.enc.data_nibble_2_normal.code(b & 0x0F);
            self.buffer.push(n1);
            self.buffer.push(n2);
        }
        let n1 = self.enc.data_nibble_1_last.code(last >> 4);
        let n2 = self.enc.data_nibble_2_last.code(last & 0x0F);
        self.buffer.push(n1);
        self.buffer.push(n2);
        self
    }

    /// Remove the next chunk from the buffer and return it.
    pub fn take_next_chunk(&mut self) -> Option<Vec<u8>> {
        let (from, to) = match self.chunk_starts.len() {
            0 => {
                if self.curr_chunk_start >= self.buffer.len() {
                    return None;
                }
                let range = (self.curr_chunk_start, self.buffer.len());
                self.curr_chunk_start = self.buffer.len();
                range
            }
            1 => {
                let range = (self.chunk_starts[0], self.curr_chunk_start);
                self.chunk_starts.remove(0);
                range
            }
            _ => {
                let range = (self.chunk_starts[0], self.chunk_starts[1]);
                self.chunk_starts.remove(0);
                range
            }
        };
        Some(self.buffer[from..to].to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }
}
