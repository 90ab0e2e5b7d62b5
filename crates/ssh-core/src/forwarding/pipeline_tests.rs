use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, duplex};

use super::*;

#[tokio::test]
async fn ordered_lines_cross_in_both_directions() -> anyhow::Result<()> {
    let (mut client, client_end) = duplex(64);
    let (upstream_end, upstream) = duplex(64);
    let session = ForwardingSession::new();
    let counters = session.counters();
    let task = tokio::spawn(async move { session.run(client_end, upstream_end).await });

    let mut upstream = BufReader::new(upstream);
    client.write_all(b"hello world\n").await?;
    client.write_all(b"whats up\n").await?;

    let mut line = String::new();
    upstream.read_line(&mut line).await?;
    assert_eq!(line, "hello world\n");
    line.clear();
    upstream.read_line(&mut line).await?;
    assert_eq!(line, "whats up\n");

    upstream.get_mut().write_all(b"world hello\n").await?;
    let mut reply = [0u8; 12];
    client.read_exact(&mut reply).await?;
    assert_eq!(&reply, b"world hello\n");

    drop(client);
    task.await??;
    assert_eq!(counters.a_to_b(), 21);
    assert_eq!(counters.b_to_a(), 12);
    Ok(())
}

#[tokio::test]
async fn counter_matches_payload_length() -> anyhow::Result<()> {
    let payload: Vec<u8> = (0..256 * 1024).map(|i| (i % 251) as u8).collect();
    let (mut a, a_end) = duplex(4096);
    let (b_end, mut b) = duplex(4096);
    let session = ForwardingSession::new();
    let counters = session.counters();
    let task = tokio::spawn(async move { session.run(a_end, b_end).await });

    let expected = payload.clone();
    let reader = tokio::spawn(async move {
        let mut received = Vec::new();
        b.read_to_end(&mut received).await.map(|_| received)
    });

    a.write_all(&payload).await?;
    a.shutdown().await?;

    let received = reader.await??;
    task.await??;
    assert_eq!(received, expected);
    assert_eq!(counters.a_to_b(), payload.len() as u64);
    assert_eq!(counters.b_to_a(), 0);
    Ok(())
}

#[tokio::test]
async fn upstream_close_ends_pipeline() -> anyhow::Result<()> {
    let (_a, a_end) = duplex(64);
    let (b_end, b) = duplex(64);
    let session = ForwardingSession::new();
    let task = tokio::spawn(async move { session.run(a_end, b_end).await });
    drop(b);
    tokio::time::timeout(std::time::Duration::from_secs(2), task).await???;
    Ok(())
}

#[test]
fn half_close_errors_are_graceful() {
    assert!(is_graceful_close(&io::Error::from(io::ErrorKind::BrokenPipe)));
    assert!(is_graceful_close(&io::Error::from(io::ErrorKind::ConnectionReset)));
    assert!(!is_graceful_close(&io::Error::from(io::ErrorKind::PermissionDenied)));
}
