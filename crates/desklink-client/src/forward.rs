use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::debug;

/// Copy bytes between `a` and `b` in both directions until either side
/// closes or errors.
///
/// Each direction runs as its own task and reports its terminal result into
/// a two-slot channel. The first result ends the forward: closing either
/// connection propagates closure to the other, so there is no point waiting
/// for the second direction to notice. The forwarder owns both connections
/// and closes them on exit — the lagging task is aborted and its stream
/// halves dropped — so no descriptor leaks regardless of which side failed
/// first.
pub async fn forward<A, B>(a: A, b: B)
where
    A: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    B: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (mut a_read, mut a_write) = tokio::io::split(a);
    let (mut b_read, mut b_write) = tokio::io::split(b);
    let (result_tx, mut result_rx) = mpsc::channel::<std::io::Result<u64>>(2);

    let reverse_tx = result_tx.clone();
    let ab = tokio::spawn(async move {
        let result = tokio::io::copy(&mut a_read, &mut b_write).await;
        // Propagate half-close so a peer draining its read side sees EOF.
        drop(b_write.shutdown().await);
        drop(result_tx.send(result).await);
    });
    let ba = tokio::spawn(async move {
        let result = tokio::io::copy(&mut b_read, &mut a_write).await;
        drop(a_write.shutdown().await);
        drop(reverse_tx.send(result).await);
    });

    match result_rx.recv().await {
        Some(Ok(bytes)) => debug!(bytes, "tunnel direction finished, closing both ends"),
        Some(Err(e)) => debug!("tunnel closed: {e}"),
        None => {}
    }

    ab.abort();
    ba.abort();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// Two connected pipe pairs: forwarding bridges `left` and `right`, the
    /// far ends play the two peers.
    fn bridged() -> (
        tokio::io::DuplexStream,
        tokio::io::DuplexStream,
        tokio::task::JoinHandle<()>,
    ) {
        let (left_far, left_near) = tokio::io::duplex(4096);
        let (right_far, right_near) = tokio::io::duplex(4096);
        let handle = tokio::spawn(forward(left_near, right_near));
        (left_far, right_far, handle)
    }

    #[tokio::test]
    async fn copies_both_directions_in_order() {
        let (mut left, mut right, _handle) = bridged();

        left.write_all(b"abcdef").await.unwrap();
        let mut buf = [0_u8; 6];
        right.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"abcdef");

        right.write_all(b"123").await.unwrap();
        let mut buf = [0_u8; 3];
        left.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"123");
    }

    #[tokio::test]
    async fn large_payload_survives_intact() {
        let (mut left, mut right, _handle) = bridged();

        let payload: Vec<u8> = (0..64 * 1024).map(|i| (i % 251) as u8).collect();
        let expected = payload.clone();
        let writer = tokio::spawn(async move {
            left.write_all(&payload).await.unwrap();
            left.shutdown().await.unwrap();
            left
        });

        let mut received = Vec::new();
        right.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, expected);
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn closing_one_side_ends_the_forward() {
        let (left, mut right, handle) = bridged();

        drop(left);
        handle.await.unwrap();

        // With both ends closed by the forwarder, the surviving peer reads EOF.
        let mut buf = Vec::new();
        right.read_to_end(&mut buf).await.unwrap();
        assert!(buf.is_empty());
    }
}
