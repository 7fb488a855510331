//! Blocking client for the query server, for renderers that are not async.

use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::trace;

use crate::error::ProtocolError;
use crate::matcher::MatchQuery;
use crate::protocol::{
    decode, encode, read_frame_blocking, write_frame_blocking, QueryRequest, QueryResponse,
    DEFAULT_MAX_FRAME_LEN, PROTOCOL_VERSION,
};

pub struct QueryClient {
    stream: TcpStream,
    max_frame_len: usize,
}

impl QueryClient {
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, ProtocolError> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        })
    }

    /// Bound how long a single read or write may block.
    pub fn with_timeout(self, timeout: Duration) -> Result<Self, ProtocolError> {
        self.stream.set_read_timeout(Some(timeout))?;
        self.stream.set_write_timeout(Some(timeout))?;
        Ok(self)
    }

    /// Send one request and wait for its response.
    pub fn query(&mut self, query: &MatchQuery) -> Result<QueryResponse, ProtocolError> {
        let payload = encode(&QueryRequest::new(query))?;
        write_frame_blocking(&mut self.stream, &payload)?;

        let reply = read_frame_blocking(&mut self.stream, self.max_frame_len)?;
        let response: QueryResponse = decode(&reply)?;
        if response.version != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion(response.version));
        }
        trace!(family = query.family(), found = response.face().is_some(), "query answered");
        Ok(response)
    }
}
