//! Capability exchange, run once per connection before the worker starts.

use crate::channel::{NowChannel, Transport};
use crate::error::ClientError;
use now_proto::{
    Capset, ChannelMessage, NowErrorCode, NowMessage, NowStatus, NowStatusError, ProtoVersion,
};
use std::time::Duration;

/// Client role: sends `capset` and waits for the peer's.
///
/// The peer's capset is returned as the negotiated set.
pub async fn negotiate<T: Transport>(
    channel: &mut NowChannel<T>,
    capset: Capset,
    timeout: Duration,
) -> Result<Capset, ClientError> {
    let local = capset.version;
    tracing::debug!("Sending capabilities (version {})", local);
    channel.write_message(capset).await?;

    let remote = read_capset(channel, timeout).await?;
    tracing::debug!(
        "Peer capabilities received (version {}, heartbeat {:?})",
        remote.version,
        remote.heartbeat()
    );

    check_version(local, remote.version)?;
    Ok(remote)
}

/// Server role: reads the client's capset and echoes it back unchanged.
///
/// A major version mismatch is answered with a `Close` carrying
/// [`NowErrorCode::ProtocolVersion`].
pub async fn accept_client<T: Transport>(
    channel: &mut NowChannel<T>,
    timeout: Duration,
) -> Result<Capset, ClientError> {
    let capset = read_capset(channel, timeout).await?;
    tracing::debug!("Client capabilities received (version {})", capset.version);

    if let Err(e) = check_version(ProtoVersion::CURRENT, capset.version) {
        tracing::warn!("Rejecting client: {}", e);
        let status = NowStatusError::now(NowErrorCode::ProtocolVersion)
            .with_message(format!("unsupported protocol version {}", capset.version));
        channel
            .write_message(ChannelMessage::Close(NowStatus::Error(status)))
            .await?;
        return Err(e);
    }

    channel.write_message(capset.clone()).await?;
    Ok(capset)
}

async fn read_capset<T: Transport>(
    channel: &mut NowChannel<T>,
    timeout: Duration,
) -> Result<Capset, ClientError> {
    let msg = tokio::time::timeout(timeout, channel.read_message())
        .await
        .map_err(|_| {
            tracing::debug!("Capability exchange timed out");
            ClientError::Timeout
        })??;

    match msg {
        NowMessage::Channel(ChannelMessage::Capset(capset)) => Ok(capset),
        other => Err(ClientError::UnexpectedMessage {
            class: other.class().0,
            kind: other.kind(),
        }),
    }
}

fn check_version(local: ProtoVersion, remote: ProtoVersion) -> Result<(), ClientError> {
    if local.major != remote.major {
        return Err(ClientError::VersionMismatch { local, remote });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use now_proto::{ExecCaps, SessionMessage};
    use tokio::io::duplex;

    fn pair() -> (
        NowChannel<tokio::io::DuplexStream>,
        NowChannel<tokio::io::DuplexStream>,
    ) {
        let (a, b) = duplex(4096);
        (NowChannel::new(a), NowChannel::new(b))
    }

    #[tokio::test]
    async fn test_negotiate_with_echo() {
        let (mut client, mut server) = pair();
        let capset = Capset::all().with_heartbeat(Duration::from_secs(30)).unwrap();

        let server_task = tokio::spawn(async move {
            accept_client(&mut server, Duration::from_secs(1)).await
        });

        let negotiated = negotiate(&mut client, capset.clone(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(negotiated, capset);
        assert_eq!(server_task.await.unwrap().unwrap(), capset);
    }

    #[tokio::test]
    async fn test_peer_capset_wins() {
        let (mut client, mut server) = pair();

        let server_task = tokio::spawn(async move {
            server.read_message().await.unwrap();
            let reply = Capset::new().with_exec(ExecCaps::RUN);
            server.write_message(reply).await.unwrap();
            server
        });

        let negotiated = negotiate(&mut client, Capset::all(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(negotiated.exec, ExecCaps::RUN);
        assert_eq!(negotiated.heartbeat(), None);
        drop(server_task.await.unwrap());
    }

    #[tokio::test]
    async fn test_unexpected_first_message() {
        let (mut client, mut server) = pair();

        tokio::spawn(async move {
            server.read_message().await.unwrap();
            server.write_message(SessionMessage::Lock).await.unwrap();
            server
        });

        let err = negotiate(&mut client, Capset::all(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ClientError::UnexpectedMessage {
                class: 0x12,
                kind: 0x01
            }
        ));
    }

    #[tokio::test]
    async fn test_version_mismatch() {
        let (mut client, mut server) = pair();

        tokio::spawn(async move {
            server.read_message().await.unwrap();
            let reply = Capset::all().with_version(ProtoVersion::new(2, 0));
            server.write_message(reply).await.unwrap();
            server
        });

        let err = negotiate(&mut client, Capset::all(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::VersionMismatch { .. }));
    }

    #[tokio::test]
    async fn test_accept_rejects_major_mismatch() {
        let (mut client, mut server) = pair();

        let server_task = tokio::spawn(async move {
            accept_client(&mut server, Duration::from_secs(1)).await
        });

        client
            .write_message(Capset::all().with_version(ProtoVersion::new(2, 0)))
            .await
            .unwrap();

        match client.read_message().await.unwrap() {
            NowMessage::Channel(ChannelMessage::Close(NowStatus::Error(status))) => {
                assert_eq!(status.now_code(), Some(NowErrorCode::ProtocolVersion));
            }
            other => panic!("expected close, got {:?}", other),
        }
        assert!(matches!(
            server_task.await.unwrap(),
            Err(ClientError::VersionMismatch { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_negotiate_timeout() {
        let (mut client, _server) = pair();

        let err = negotiate(&mut client, Capset::all(), Duration::from_secs(10))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Timeout));
    }
}
