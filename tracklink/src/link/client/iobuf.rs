//! Internal buffer for the broker byte stream.

use super::{RecvError, SendError};
use std::io;

/// Amount of free space guaranteed before each read.
const READ_CHUNK: usize = 4096;

/// Buffer used to split the incoming stream into packets, and to hold the
/// unsent tail of outgoing packets when the socket is full.
pub struct IOBuf {
    /// Valid data (possibly none) is in `buf[start..end]`.
    buf: Vec<u8>,
    start: usize,
    end: usize,
    /// The buffer never grows past this size.
    limit: usize,
}

impl IOBuf {
    pub fn new(limit: usize) -> IOBuf {
        IOBuf {
            buf: vec![0; std::cmp::min(READ_CHUNK, limit)],
            start: 0,
            end: 0,
            limit,
        }
    }

    pub fn empty(&self) -> bool {
        self.start == self.end
    }

    pub fn size(&self) -> usize {
        self.end - self.start
    }

    pub fn data(&self) -> &[u8] {
        &self.buf[self.start..self.end]
    }

    /// Discards `len` bytes off the beginning of the contained data.
    pub fn consume(&mut self, len: usize) {
        if len > self.size() {
            panic!("Invalid consume for more data that is contained");
        }
        self.start += len;
        if self.start == self.end {
            self.start = 0;
            self.end = 0;
        }
    }

    /// Moves the data internally to the start of the buffer.
    fn compact(&mut self) {
        if self.start != 0 {
            let len = self.size();
            self.buf.copy_within(self.start..self.end, 0);
            self.start = 0;
            self.end = len;
        }
    }

    /// Makes room for at least `wanted` more bytes, within the limit.
    /// Returns the free space available afterwards.
    fn reserve(&mut self, wanted: usize) -> usize {
        self.compact();
        let free = self.buf.len() - self.end;
        if free < wanted && self.buf.len() < self.limit {
            let new_len = std::cmp::min(self.limit, self.end + wanted);
            self.buf.resize(new_len, 0);
        }
        self.buf.len() - self.end
    }

    /// Reads once from `reader` into the buffer.
    pub fn refill<T: io::Read>(&mut self, reader: &mut T) -> Result<(), RecvError> {
        if self.reserve(READ_CHUNK) == 0 {
            return Err(RecvError::Overflow);
        }
        match reader.read(&mut self.buf[self.end..]) {
            Ok(0) => Err(RecvError::Disconnected),
            Ok(size) => {
                self.end += size;
                Ok(())
            }
            Err(e) => match e.kind() {
                io::ErrorKind::WouldBlock => Err(RecvError::NotReady),
                io::ErrorKind::Interrupted => Ok(()),
                _ => Err(RecvError::IO(e)),
            },
        }
    }

    /// Appends all of `data`, or nothing if it does not fit.
    pub fn add_data(&mut self, data: &[u8]) -> Result<(), SendError> {
        if self.reserve(data.len()) < data.len() {
            return Err(SendError::Full);
        }
        self.buf[self.end..self.end + data.len()].copy_from_slice(data);
        self.end += data.len();
        Ok(())
    }

    /// Sends as much of the contained data as possible to `writer`.
    pub fn drain<T: io::Write>(&mut self, writer: &mut T) -> Result<(), SendError> {
        while !self.empty() {
            match writer.write(&self.buf[self.start..self.end]) {
                Ok(0) => return Err(SendError::Disconnected),
                Ok(size) => self.consume(size),
                Err(e) => match e.kind() {
                    io::ErrorKind::WouldBlock => return Err(SendError::MustDrain),
                    io::ErrorKind::Interrupted => {}
                    _ => return Err(SendError::IO(e)),
                },
            }
        }
        Ok(())
    }
}
