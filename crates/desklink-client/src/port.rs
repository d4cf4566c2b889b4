use tokio::net::TcpStream;
use tracing::trace;

/// Find the first unbound local TCP port in `[start, end)`.
///
/// Each candidate is probed with an outbound connect to localhost: a refused
/// connection means nothing listens there and the port is free to bind. A
/// successful probe is closed immediately and the scan moves on. Returns
/// `None` when every port in the range is in use — callers must treat that
/// as fatal for the operation they were binding for.
pub async fn find_free_port(start: u16, end: u16) -> Option<u16> {
    for port in start..end {
        match TcpStream::connect(("127.0.0.1", port)).await {
            Ok(probe) => {
                trace!(port, "port in use, probing next");
                drop(probe);
            }
            Err(_) => return Some(port),
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn skips_bound_ports() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let bound = listener.local_addr().unwrap().port();

        // A range holding only the bound port has no free candidate.
        assert_eq!(find_free_port(bound, bound.saturating_add(1)).await, None);
    }

    #[tokio::test]
    async fn returned_port_is_bindable() {
        let port = find_free_port(5900, 65534).await.expect("range exhausted");
        TcpListener::bind(("127.0.0.1", port))
            .await
            .expect("reported free port must be bindable");
    }

    #[tokio::test]
    async fn empty_range_yields_none() {
        assert_eq!(find_free_port(6000, 6000).await, None);
    }
}
