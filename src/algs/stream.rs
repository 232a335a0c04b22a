//! Token streams on top of a [`TopoCommunicator`].
//!
//! [`TokenSink`] and [`TokenSource`] are the only interfaces the tree
//! algorithms see. In-memory collections implement both so stages can be
//! driven directly in tests.

use std::collections::VecDeque;

use bytes::BytesMut;

use crate::GraphId;
use crate::algs::communicator::TopoCommunicator;
use crate::algs::fifo::FifoBuffer;
use crate::algs::wire::Token;
use crate::topo_error::TopoError;

/// Default flush threshold of output streams, in bytes.
pub const DEFAULT_MIN_MESSAGE: usize = 1024;

/// Consumer of tokens. Reaching EMPTY ends one logical stream.
pub trait TokenSink {
    fn write(&mut self, token: &Token) -> Result<(), TopoError>;

    fn flush(&mut self) -> Result<(), TopoError> {
        Ok(())
    }
}

/// Producer of tokens. `Ok(None)` means nothing is available right now.
pub trait TokenSource {
    fn next_token(&mut self) -> Result<Option<Token>, TopoError>;
}

impl TokenSink for Vec<Token> {
    fn write(&mut self, token: &Token) -> Result<(), TopoError> {
        self.push(*token);
        Ok(())
    }
}

impl TokenSink for VecDeque<Token> {
    fn write(&mut self, token: &Token) -> Result<(), TopoError> {
        self.push_back(*token);
        Ok(())
    }
}

impl TokenSource for VecDeque<Token> {
    fn next_token(&mut self) -> Result<Option<Token>, TopoError> {
        Ok(self.pop_front())
    }
}

/// Forwards every token to two sinks.
pub struct TeeSink<'a, 'b> {
    first: &'a mut dyn TokenSink,
    second: &'b mut dyn TokenSink,
}

impl<'a, 'b> TeeSink<'a, 'b> {
    pub fn new(first: &'a mut dyn TokenSink, second: &'b mut dyn TokenSink) -> Self {
        Self { first, second }
    }
}

impl TokenSink for TeeSink<'_, '_> {
    fn write(&mut self, token: &Token) -> Result<(), TopoError> {
        self.first.write(token)?;
        self.second.write(token)
    }

    fn flush(&mut self) -> Result<(), TopoError> {
        self.first.flush()?;
        self.second.flush()
    }
}

/// Reads the inbox of one graph id.
pub struct TopoInputStream<'c, C: TopoCommunicator + ?Sized> {
    id: GraphId,
    comm: &'c C,
    buffer: FifoBuffer,
}

impl<'c, C: TopoCommunicator + ?Sized> TopoInputStream<'c, C> {
    pub fn new(id: GraphId, comm: &'c C) -> Self {
        Self {
            id,
            comm,
            buffer: FifoBuffer::new(),
        }
    }

    pub fn id(&self) -> GraphId {
        self.id
    }

    /// Like [`TokenSource::next_token`] but nothing pending is an error.
    pub fn expect_token(&mut self) -> Result<Token, TopoError> {
        self.next_token()?
            .ok_or(TopoError::StreamUnderflow(self.id))
    }
}

impl<C: TopoCommunicator + ?Sized> TokenSource for TopoInputStream<'_, C> {
    fn next_token(&mut self) -> Result<Option<Token>, TopoError> {
        if self.buffer.top().is_none() {
            self.comm.drain_into(self.id, &mut self.buffer)?;
        }
        let Some(run) = self.buffer.top() else {
            return Ok(None);
        };
        let (token, size) = Token::decode(run)?;
        self.buffer.pop(size)?;
        Ok(Some(token))
    }
}

/// Buffers tokens and sends them to a fixed set of destinations.
pub struct TopoOutputStream<'c, C: TopoCommunicator + ?Sized> {
    destinations: Vec<GraphId>,
    comm: &'c C,
    buffer: BytesMut,
    min_message: usize,
    messages: usize,
}

impl<'c, C: TopoCommunicator + ?Sized> TopoOutputStream<'c, C> {
    pub fn new(destinations: Vec<GraphId>, comm: &'c C) -> Self {
        Self::with_min_message(destinations, comm, DEFAULT_MIN_MESSAGE)
    }

    pub fn with_min_message(destinations: Vec<GraphId>, comm: &'c C, min_message: usize) -> Self {
        Self {
            destinations,
            comm,
            buffer: BytesMut::with_capacity(min_message + 64),
            min_message,
            messages: 0,
        }
    }

    pub fn destinations(&self) -> &[GraphId] {
        &self.destinations
    }

    /// Messages handed to the communicator so far.
    pub fn messages_sent(&self) -> usize {
        self.messages
    }
}

impl<C: TopoCommunicator + ?Sized> TokenSink for TopoOutputStream<'_, C> {
    fn write(&mut self, token: &Token) -> Result<(), TopoError> {
        token.encode_into(&mut self.buffer);
        if matches!(token, Token::Empty) || self.buffer.len() > self.min_message {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), TopoError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let message = self.buffer.split().freeze();
        if self.destinations.is_empty() {
            return Ok(());
        }
        self.comm.send(&self.destinations, message)?;
        self.messages += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::SerialCommunicator;

    #[test]
    fn output_flushes_on_threshold_and_empty() {
        let comm = SerialCommunicator::new();
        comm.connect(9).unwrap();
        let mut out = TopoOutputStream::with_min_message(vec![9], &comm, 40);
        out.write(&Token::vertex(1, 0.5, 1)).unwrap();
        assert_eq!(out.messages_sent(), 0);
        out.write(&Token::vertex(2, 0.25, 1)).unwrap(); // 48 > 40
        assert_eq!(out.messages_sent(), 1);
        out.write(&Token::edge(1, 2)).unwrap();
        out.write(&Token::Empty).unwrap();
        assert_eq!(out.messages_sent(), 2);

        let mut input = TopoInputStream::new(9, &comm);
        let mut seen = Vec::new();
        while let Some(t) = input.next_token().unwrap() {
            seen.push(t);
        }
        assert_eq!(
            seen,
            vec![
                Token::vertex(1, 0.5, 1),
                Token::vertex(2, 0.25, 1),
                Token::edge(1, 2),
                Token::Empty
            ]
        );
        assert_eq!(input.expect_token(), Err(TopoError::StreamUnderflow(9)));
    }

    #[test]
    fn output_without_destinations_discards() {
        let comm = SerialCommunicator::new();
        let mut out = TopoOutputStream::new(Vec::new(), &comm);
        out.write(&Token::finalize(3)).unwrap();
        out.write(&Token::Empty).unwrap();
        assert_eq!(out.messages_sent(), 0);
    }

    #[test]
    fn tee_reaches_both_sinks() {
        let mut a: Vec<Token> = Vec::new();
        let mut b: VecDeque<Token> = VecDeque::new();
        {
            let mut tee = TeeSink::new(&mut a, &mut b);
            tee.write(&Token::finalize(4)).unwrap();
        }
        assert_eq!(a, vec![Token::finalize(4)]);
        assert_eq!(b.pop_front(), Some(Token::finalize(4)));
    }
}
