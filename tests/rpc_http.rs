mod support;

use std::time::Duration;

use anyhow::{Context as _, Result};
use ln_chain_swap::Error;
use ln_chain_swap::chain::network::ChainNetwork;
use ln_chain_swap::chain::rpc::{HttpTransport, RpcClient, RpcCommand, RpcQueue};
use ln_chain_swap::config::{CredentialTable, RpcClientConfig, RpcCredentials};
use serde_json::json;
use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use support::port::free_port;

const NET: ChainNetwork = ChainNetwork::Regtest;

enum Reply {
    Respond { status: &'static str, body: String },
    Stall,
}

/// Answers one HTTP request on a local port and hands back the raw request.
async fn serve_once(reply: Reply) -> Result<(u16, JoinHandle<Result<String>>)> {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .context("bind responder")?;
    let port = listener.local_addr()?.port();

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.context("accept")?;
        let request = read_request(&mut socket).await?;
        match reply {
            Reply::Respond { status, body } => {
                let response = format!(
                    "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                socket.write_all(response.as_bytes()).await?;
                socket.shutdown().await?;
            }
            Reply::Stall => tokio::time::sleep(Duration::from_secs(5)).await,
        }
        Ok(request)
    });

    Ok((port, handle))
}

async fn read_request(socket: &mut TcpStream) -> Result<String> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = socket.read(&mut chunk).await.context("read request")?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);

        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let headers = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
            let content_length = headers
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|len| len.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + content_length {
                break;
            }
        }
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn client(port: u16, timeout: Duration) -> RpcClient {
    let mut credentials = CredentialTable::new();
    credentials.insert(
        NET,
        RpcCredentials {
            host: "127.0.0.1".to_string(),
            port: Some(port),
            user: "swap".to_string(),
            password: "secret".to_string(),
        },
    );
    RpcClient::with_transport(
        HttpTransport::new(),
        credentials,
        RpcClientConfig {
            timeout,
            ..RpcClientConfig::default()
        },
        RpcQueue::new(2),
    )
}

#[tokio::test]
async fn posts_authenticated_json_rpc() -> Result<()> {
    let (port, server) = serve_once(Reply::Respond {
        status: "200 OK",
        body: json!({ "result": 321, "error": null, "id": "1" }).to_string(),
    })
    .await?;

    let result = client(port, Duration::from_secs(5))
        .call(RpcCommand::BlockCount, NET, vec![])
        .await?;
    assert_eq!(result, json!(321));

    let request = server.await??;
    assert!(request.starts_with("POST / HTTP/1.1"));
    assert!(request.contains("c3dhcDpzZWNyZXQ="), "{request}");
    assert!(request.contains(r#""method":"getblockcount""#), "{request}");
    Ok(())
}

#[tokio::test]
async fn unauthorized_is_reported_without_pausing() -> Result<()> {
    let (port, server) = serve_once(Reply::Respond {
        status: "401 Unauthorized",
        body: String::new(),
    })
    .await?;

    let rpc = client(port, Duration::from_secs(5));
    let err = rpc
        .call(RpcCommand::BestBlockHash, NET, vec![])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AuthenticationFailure), "{err}");
    assert!(rpc.breaker().paused_for().is_none());

    server.await??;
    Ok(())
}

#[tokio::test]
async fn server_error_pauses_client() -> Result<()> {
    let (port, server) = serve_once(Reply::Respond {
        status: "500 Internal Server Error",
        body: json!({ "result": null, "error": { "code": -26, "message": "non-final" }, "id": "1" })
            .to_string(),
    })
    .await?;

    let rpc = client(port, Duration::from_secs(5));
    let err = rpc
        .call(RpcCommand::SendRawTransaction, NET, vec![json!("00")])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DaemonUnavailable(ref reason) if reason.contains("non-final")), "{err}");
    server.await??;

    let err = rpc
        .call(RpcCommand::BlockCount, NET, vec![])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::CircuitOpen(_)), "{err}");
    Ok(())
}

#[tokio::test]
async fn stalled_daemon_times_out() -> Result<()> {
    let (port, _server) = serve_once(Reply::Stall).await?;

    let rpc = client(port, Duration::from_millis(200));
    let err = rpc
        .call(RpcCommand::BlockCount, NET, vec![])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout(_)), "{err}");
    assert!(rpc.breaker().paused_for().is_some());
    Ok(())
}

#[tokio::test]
async fn refused_connection_is_unavailable() -> Result<()> {
    let port = free_port()?;

    let err = client(port, Duration::from_secs(5))
        .call(RpcCommand::BlockCount, NET, vec![])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DaemonUnavailable(_)), "{err}");
    Ok(())
}
