use crate::config::ClientConfig;
use crate::connection::WSConnection;
use crate::error::Error;
use crate::frame::Frame;
use crate::read::ReadStream;
use crate::request::{construct_http_request, HttpResponse};
use crate::split::{WSReader, WSWriter};
use crate::utils::{generate_websocket_accept_value, generate_websocket_key};
use crate::write::Writer;
use log::debug;
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc::unbounded_channel;
use tokio::sync::Mutex;
use tokio_stream::wrappers::UnboundedReceiverStream;

pub(crate) const SEC_WEBSOCKET_ACCEPT: &str = "Sec-WebSocket-Accept";
const SWITCHING_PROTOCOLS: u16 = 101;

pub async fn connect_async(addr: &str) -> Result<WSConnection, Error> {
    connect_async_with_config(addr, None).await
}

pub async fn connect_async_with_config(
    addr: &str,
    client_config: Option<ClientConfig>,
) -> Result<WSConnection, Error> {
    let config = client_config.unwrap_or_default();
    let client_websocket_key = generate_websocket_key();
    let (request, host_with_port) = construct_http_request(addr, &client_websocket_key)?;

    let stream = TcpStream::connect(&host_with_port).await?;
    // Latency is what we measure, Nagle would only add noise to it
    stream.set_nodelay(true)?;

    let (reader, mut write_half) = stream.into_split();
    let mut buf_reader = BufReader::new(reader);

    write_half.write_all(request.as_bytes()).await?;

    let response = HttpResponse::read_http_response(&mut buf_reader).await?;
    if response.status != SWITCHING_PROTOCOLS {
        return Err(Error::NoUpgrade);
    }

    let expected_accept = generate_websocket_accept_value(&client_websocket_key);
    match response.get_header_value(SEC_WEBSOCKET_ACCEPT) {
        Some(accept) if accept == expected_accept => {}
        _ => return Err(Error::InvalidAcceptKey),
    }
    debug!("websocket handshake with {} completed", host_with_port);

    // Messages from the server reach the user through read_rx, while control frames the reader
    // has to answer (pong, close) go through internal_rx, straight to the socket
    let (read_tx, read_rx) = unbounded_channel();
    let (internal_tx, mut internal_rx) = unbounded_channel::<Frame>();

    let writer = Arc::new(Mutex::new(Writer::new(write_half)));
    let ws_writer = WSWriter::new(writer.clone(), config.web_socket_config.clone());

    let mut read_stream = ReadStream::new(
        buf_reader,
        read_tx.clone(),
        internal_tx,
        config.web_socket_config.clone(),
    );

    // The reader owns the read half. When it returns, read_tx is dropped and the user side
    // of the stream ends, which is how a closed connection is observed
    tokio::spawn(async move {
        if let Err(err) = read_stream.poll_messages().await {
            let _ = read_tx.send(Err(err));
        }
    });

    tokio::spawn(async move {
        while let Some(frame) = internal_rx.recv().await {
            if writer.lock().await.write_frame(frame).await.is_err() {
                break;
            }
        }
    });

    Ok(WSConnection::new(
        WSReader::new(UnboundedReceiverStream::new(read_rx)),
        ws_writer,
    ))
}
