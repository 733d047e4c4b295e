//! Message-level transport.
//!
//! [`NowChannel`] pairs a byte stream with the codec and the
//! defragmenter, turning it into "write one message" and "read one
//! message".

use crate::config::{ClientConfig, DEFAULT_READ_BUFFER_SIZE};
use crate::error::ClientError;
use bytes::Bytes;
use now_proto::{DecodeError, MessageBuffer, MessageClass, NowMessage};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Byte stream usable as a NOW-proto transport.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// A message in wire form, ready to be written.
#[derive(Debug, Clone)]
pub struct EncodedMessage {
    class: MessageClass,
    kind: u8,
    bytes: Bytes,
}

impl EncodedMessage {
    /// Encodes `msg`. Fails without side effects when a field does not fit
    /// the wire format.
    pub fn new(msg: impl Into<NowMessage>) -> Result<Self, ClientError> {
        let msg = msg.into();
        Ok(Self {
            class: msg.class(),
            kind: msg.kind(),
            bytes: msg.encode()?.freeze(),
        })
    }
}

/// A transport framed into NOW-proto messages.
#[derive(Debug)]
pub struct NowChannel<T> {
    stream: T,
    buffer: MessageBuffer,
    read_buf: Vec<u8>,
}

impl<T: Transport> NowChannel<T> {
    /// Creates a channel with default buffer sizes.
    pub fn new(stream: T) -> Self {
        Self {
            stream,
            buffer: MessageBuffer::new(),
            read_buf: vec![0u8; DEFAULT_READ_BUFFER_SIZE],
        }
    }

    /// Creates a channel sized from the client configuration.
    pub fn with_config(stream: T, config: &ClientConfig) -> Self {
        Self {
            stream,
            buffer: MessageBuffer::with_sizes(config.buffer_default_size, config.buffer_max_size),
            read_buf: vec![0u8; config.read_buffer_size],
        }
    }

    /// Encodes and writes one message, then flushes.
    ///
    /// The message is fully encoded before anything is written.
    pub async fn write_message(&mut self, msg: impl Into<NowMessage>) -> Result<(), ClientError> {
        let encoded = EncodedMessage::new(msg)?;
        self.write_encoded(&encoded).await
    }

    /// Writes a message encoded earlier, then flushes.
    pub async fn write_encoded(&mut self, encoded: &EncodedMessage) -> Result<(), ClientError> {
        tracing::debug!(
            "Writing {} message kind={:#04x} ({} bytes)",
            encoded.class,
            encoded.kind,
            encoded.bytes.len()
        );
        self.stream.write_all(&encoded.bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Reads the next message.
    ///
    /// Cancel safe: the only await point is the transport read, and
    /// received bytes are moved into the defragmenter before returning.
    /// Messages of an unknown class or kind are skipped.
    pub async fn read_message(&mut self) -> Result<NowMessage, ClientError> {
        loop {
            while let Some(raw) = self.buffer.take_next_message() {
                match NowMessage::decode(raw) {
                    Ok(msg) => return Ok(msg),
                    Err(DecodeError::UnsupportedMessage { class, kind }) => {
                        tracing::debug!(
                            "Ignoring unsupported message class={:#04x} kind={:#04x}",
                            class,
                            kind
                        );
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            let n = self.stream.read(&mut self.read_buf).await?;
            if n == 0 {
                tracing::debug!("Transport closed (0 bytes)");
                return Err(ClientError::ConnectionClosed);
            }

            tracing::debug!("Received {} bytes", n);
            self.buffer.add_data(&self.read_buf[..n])?;
        }
    }

    /// Shuts down the write side of the transport.
    pub async fn shutdown(&mut self) -> Result<(), ClientError> {
        self.stream.shutdown().await?;
        Ok(())
    }

    /// Returns the underlying stream.
    pub fn into_inner(self) -> T {
        self.stream
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use now_proto::{ChannelMessage, ExecMessage, ProtocolError, SessionMessage};
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_write_then_read() {
        let (a, b) = duplex(1024);
        let mut left = NowChannel::new(a);
        let mut right = NowChannel::new(b);

        left.write_message(SessionMessage::Lock).await.unwrap();
        left.write_message(ChannelMessage::Heartbeat).await.unwrap();

        assert_eq!(
            right.read_message().await.unwrap(),
            NowMessage::Session(SessionMessage::Lock)
        );
        assert_eq!(
            right.read_message().await.unwrap(),
            NowMessage::Channel(ChannelMessage::Heartbeat)
        );
    }

    #[tokio::test]
    async fn test_fragmented_reads() {
        let (mut raw, b) = duplex(1024);
        let mut channel = NowChannel::new(b);

        let wire = NowMessage::from(ExecMessage::Started { session_id: 9 })
            .encode()
            .unwrap();
        for byte in wire.iter() {
            raw.write_all(&[*byte]).await.unwrap();
        }

        assert_eq!(
            channel.read_message().await.unwrap(),
            NowMessage::Exec(ExecMessage::Started { session_id: 9 })
        );
    }

    #[tokio::test]
    async fn test_unsupported_message_skipped() {
        let (mut raw, b) = duplex(1024);
        let mut channel = NowChannel::new(b);

        raw.write_all(&[0x00, 0x00, 0x00, 0x00, 0x42, 0x01, 0x00, 0x00])
            .await
            .unwrap();
        raw.write_all(&NowMessage::from(SessionMessage::Logoff).encode().unwrap())
            .await
            .unwrap();

        assert_eq!(
            channel.read_message().await.unwrap(),
            NowMessage::Session(SessionMessage::Logoff)
        );
    }

    #[tokio::test]
    async fn test_unknown_exec_kind_skipped() {
        let (mut raw, b) = duplex(1024);
        let mut channel = NowChannel::new(b);

        // exec class, unassigned kind, empty body
        raw.write_all(&[0x00, 0x00, 0x00, 0x00, 0x13, 0x07, 0x00, 0x00])
            .await
            .unwrap();
        raw.write_all(
            &NowMessage::from(ExecMessage::Started { session_id: 4 })
                .encode()
                .unwrap(),
        )
        .await
        .unwrap();

        assert_eq!(
            channel.read_message().await.unwrap(),
            NowMessage::Exec(ExecMessage::Started { session_id: 4 })
        );
    }

    #[tokio::test]
    async fn test_eof_is_connection_closed() {
        let (raw, b) = duplex(64);
        let mut channel = NowChannel::new(b);
        drop(raw);

        assert!(matches!(
            channel.read_message().await,
            Err(ClientError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_malformed_body_is_error() {
        let (mut raw, b) = duplex(64);
        let mut channel = NowChannel::new(b);

        // exec started with a 2-byte body
        raw.write_all(&[0x02, 0x00, 0x00, 0x00, 0x13, 0x06, 0x00, 0x00, 0x01, 0x00])
            .await
            .unwrap();

        let err = channel.read_message().await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Protocol(ProtocolError::Decode(DecodeError::NotEnoughBytes { .. }))
        ));
    }

    #[tokio::test]
    async fn test_oversized_frame_is_error() {
        let (mut raw, b) = duplex(64);
        let config = ClientConfig::new().with_buffer_sizes(1024, 2048);
        let mut channel = NowChannel::with_config(b, &config);

        raw.write_all(&[0x00, 0x10, 0x00, 0x00, 0x13, 0x05, 0x04, 0x00])
            .await
            .unwrap();

        assert!(matches!(
            channel.read_message().await,
            Err(ClientError::Protocol(ProtocolError::BufferOverflow { .. }))
        ));
    }
}
