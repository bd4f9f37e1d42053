//! Протокольный движок одного TCP-соединения.
//!
//! Задача чтения разбирает строки в фреймы и превращает их в события
//! супервизора соединения. Задача записи вычитывает неограниченный канал
//! исходящих фреймов, поэтому отправка из ядра никогда не блокируется.

use std::{collections::HashMap, io::ErrorKind, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use qmon_error::{ErrorExt, ProtocolError};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{tcp::OwnedWriteHalf, TcpStream},
    select,
    sync::{mpsc, oneshot},
    time::timeout,
};
use tracing::{debug, trace, warn};

use super::{
    connection_handler::{ConnectionId, ConnectionRef},
    protocol::{ClientFrame, ServerFrame},
};
use crate::pubsub::{Endpoint, Link, LinkId, Message};

/// Конфигурация обслуживания соединения.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Максимальная длина одной строки протокола в байтах
    pub max_frame_len: usize,
    /// Таймаут записи одного фрейма
    pub write_timeout: Duration,
    /// Размер буфера для чтения
    pub read_buffer_size: usize,
}

type Outbound = mpsc::UnboundedSender<ServerFrame>;

/// Уровень соединения поверх канала исходящих фреймов.
pub struct TcpEndpoint {
    container: Arc<str>,
    outbound: Outbound,
}

/// Линк поверх канала исходящих фреймов.
pub struct TcpLink {
    id: LinkId,
    outbound: Outbound,
}

/// Сессии соединения и их линки.
///
/// Ядро сессий не знает: при закрытии сессии движок передаёт супервизору
/// набор её линков.
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: HashMap<String, Vec<LinkId>>,
    links: HashMap<LinkId, String>,
}

/// Принятое TCP-соединение, ещё не запущенное.
pub struct TcpConnection {
    socket: TcpStream,
    peer: SocketAddr,
    config: ConnectionConfig,
    outbound: Outbound,
    outbound_rx: mpsc::UnboundedReceiver<ServerFrame>,
}

enum Flow {
    Continue,
    Close,
}

/// Результат чтения одной строки.
#[derive(Debug, PartialEq, Eq)]
enum LineRead {
    Eof,
    Complete,
    /// Лимит исчерпан до перевода строки; в буфере `max_frame_len + 1` байт.
    TooLong,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl SessionTable {
    pub fn attach(
        &mut self,
        session: &str,
        link: &str,
    ) -> Result<LinkId, ProtocolError> {
        if self.links.contains_key(link) {
            return Err(ProtocolError::DuplicateLink {
                link: link.to_string(),
            });
        }
        let link = LinkId::from(link);
        self.links.insert(link.clone(), session.to_string());
        self.sessions
            .entry(session.to_string())
            .or_default()
            .push(link.clone());
        Ok(link)
    }

    pub fn detach(
        &mut self,
        link: &str,
    ) -> Result<LinkId, ProtocolError> {
        let Some((link, session)) = self.links.remove_entry(link) else {
            return Err(ProtocolError::UnknownLink {
                link: link.to_string(),
            });
        };
        if let Some(links) = self.sessions.get_mut(&session) {
            links.retain(|l| *l != link);
            if links.is_empty() {
                self.sessions.remove(&session);
            }
        }
        Ok(link)
    }

    /// Закрывает сессию и возвращает все её линки.
    pub fn end(
        &mut self,
        session: &str,
    ) -> Result<Vec<LinkId>, ProtocolError> {
        let links = self
            .sessions
            .remove(session)
            .ok_or_else(|| ProtocolError::UnknownSession {
                session: session.to_string(),
            })?;
        for link in &links {
            self.links.remove(link);
        }
        Ok(links)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

impl TcpConnection {
    pub fn new(
        socket: TcpStream,
        peer: SocketAddr,
        config: ConnectionConfig,
    ) -> Self {
        if let Err(e) = socket.set_nodelay(true) {
            debug!(%peer, "Failed to set TCP_NODELAY: {e}");
        }
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        Self {
            socket,
            peer,
            config,
            outbound,
            outbound_rx,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Уровень соединения для супервизора.
    pub fn endpoint(
        &self,
        container: Arc<str>,
    ) -> TcpEndpoint {
        TcpEndpoint {
            container,
            outbound: self.outbound.clone(),
        }
    }

    /// Обслуживает соединение до закрытия транспорта.
    pub async fn run(
        self,
        handler: ConnectionRef,
    ) {
        let TcpConnection {
            socket,
            peer,
            config,
            outbound,
            outbound_rx,
        } = self;
        let id = handler.id();

        handler.on_connection_accepted();

        let (read_half, write_half) = socket.into_split();
        let (stop_tx, stop_rx) = oneshot::channel();
        let writer = tokio::spawn(write_loop(
            id,
            write_half,
            outbound_rx,
            stop_rx,
            config.write_timeout,
        ));

        let mut reader = BufReader::with_capacity(config.read_buffer_size, read_half);
        let mut sessions = SessionTable::default();
        let mut line = Vec::with_capacity(256);

        loop {
            line.clear();
            let read = match read_line_bounded(&mut reader, &mut line, config.max_frame_len).await
            {
                Ok(read) => read,
                Err(e) => {
                    log_read_error(id, peer, &e);
                    break;
                }
            };
            match read {
                LineRead::Eof => {
                    debug!(connection = %id, %peer, "Client closed connection");
                    break;
                }
                LineRead::Complete => {}
                LineRead::TooLong => {
                    let err = ProtocolError::LineTooLong {
                        len: line.len(),
                        max: config.max_frame_len,
                    };
                    report(err, &handler, &outbound);
                    // Остаток строки вычитывается без буферизации.
                    if let Err(e) = skip_line(&mut reader).await {
                        log_read_error(id, peer, &e);
                        break;
                    }
                    continue;
                }
            }

            let flow = match decode_line(&line, config.max_frame_len) {
                Ok(Some(frame)) => {
                    trace!(connection = %id, command = frame.name(), "Frame received");
                    dispatch(frame, &mut sessions, &handler, &outbound)
                }
                Ok(None) => Flow::Continue,
                Err(err) => {
                    report(err, &handler, &outbound);
                    Flow::Continue
                }
            };
            if let Flow::Close = flow {
                debug!(connection = %id, %peer, "Client sent CLOSE");
                break;
            }
        }

        handler.on_transport_closed();
        drop(outbound);
        let _ = stop_tx.send(());
        if let Err(e) = writer.await {
            warn!(connection = %id, "Writer task failed: {e}");
        }
    }
}

/// Читает строку, не буферизуя больше `max_frame_len + 1` байт.
///
/// Последняя строка без перевода строки перед EOF считается полной.
async fn read_line_bounded<R>(
    reader: &mut R,
    line: &mut Vec<u8>,
    max_frame_len: usize,
) -> std::io::Result<LineRead>
where
    R: AsyncBufRead + Unpin,
{
    let limit = max_frame_len as u64 + 1;
    let n = (&mut *reader).take(limit).read_until(b'\n', line).await?;
    if n == 0 {
        return Ok(LineRead::Eof);
    }
    if line.last() != Some(&b'\n') && n as u64 == limit {
        return Ok(LineRead::TooLong);
    }
    Ok(LineRead::Complete)
}

/// Отбрасывает входные байты до ближайшего перевода строки включительно
/// (или до EOF).
async fn skip_line<R>(reader: &mut R) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let (used, done) = {
            let buf = reader.fill_buf().await?;
            match buf.iter().position(|&b| b == b'\n') {
                Some(pos) => (pos + 1, true),
                None => (buf.len(), buf.is_empty()),
            }
        };
        reader.consume(used);
        if done {
            return Ok(());
        }
    }
}

fn log_read_error(
    id: ConnectionId,
    peer: SocketAddr,
    e: &std::io::Error,
) {
    if is_recoverable_error(e) {
        debug!(connection = %id, %peer, "Recoverable read error: {e}");
    } else {
        warn!(connection = %id, %peer, "Fatal read error: {e}");
    }
}

/// Превращает сырую строку в фрейм. Пустые строки пропускаются.
fn decode_line(
    line: &[u8],
    max_frame_len: usize,
) -> Result<Option<ClientFrame>, ProtocolError> {
    if line.len() > max_frame_len {
        return Err(ProtocolError::LineTooLong {
            len: line.len(),
            max: max_frame_len,
        });
    }
    let text = std::str::from_utf8(line).map_err(|_| ProtocolError::InvalidUtf8)?;
    let text = text.trim_end_matches(['\n', '\r']);
    if text.trim().is_empty() {
        return Ok(None);
    }
    ClientFrame::parse(text).map(Some)
}

fn dispatch(
    frame: ClientFrame,
    sessions: &mut SessionTable,
    handler: &ConnectionRef,
    outbound: &Outbound,
) -> Flow {
    match frame {
        ClientFrame::Attach {
            session,
            link,
            address,
        } => match sessions.attach(&session, &link) {
            Ok(link) => {
                let link = TcpLink {
                    id: link,
                    outbound: outbound.clone(),
                };
                handler.on_link_opened(Box::new(link), address);
            }
            Err(err) => report(err, handler, outbound),
        },
        ClientFrame::Detach { link } => match sessions.detach(&link) {
            Ok(link) => handler.on_link_closed(link),
            Err(err) => report(err, handler, outbound),
        },
        ClientFrame::End { session } => match sessions.end(&session) {
            Ok(links) => handler.on_session_closed(links),
            Err(err) => report(err, handler, outbound),
        },
        ClientFrame::Ping => {
            let _ = outbound.send(ServerFrame::Pong);
        }
        ClientFrame::Close => {
            let _ = outbound.send(ServerFrame::Closed);
            return Flow::Close;
        }
    }
    Flow::Continue
}

fn report(
    err: ProtocolError,
    handler: &ConnectionRef,
    outbound: &Outbound,
) {
    let _ = outbound.send(ServerFrame::Error(err.client_message()));
    handler.on_protocol_error(err);
}

async fn write_loop(
    id: ConnectionId,
    mut writer: OwnedWriteHalf,
    mut frames: mpsc::UnboundedReceiver<ServerFrame>,
    mut stop: oneshot::Receiver<()>,
    write_timeout: Duration,
) {
    loop {
        let frame = select! {
            biased;
            frame = frames.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
            _ = &mut stop => {
                // Транспорт закрыт: дописываем то, что уже в очереди.
                while let Ok(frame) = frames.try_recv() {
                    if write_frame(&mut writer, &frame, write_timeout).await.is_err() {
                        break;
                    }
                }
                break;
            }
        };

        if let Err(e) = write_frame(&mut writer, &frame, write_timeout).await {
            debug!(connection = %id, "Failed to write frame: {e:#}");
            break;
        }
    }

    if let Err(e) = writer.shutdown().await {
        if e.kind() != ErrorKind::NotConnected {
            debug!(connection = %id, "Error during shutdown: {e}");
        }
    }
    debug!(connection = %id, "Writer closed");
}

async fn write_frame(
    writer: &mut OwnedWriteHalf,
    frame: &ServerFrame,
    write_timeout: Duration,
) -> Result<()> {
    timeout(write_timeout, writer.write_all(frame.encode().as_bytes()))
        .await
        .context("Write timeout")?
        .context("Failed to write frame")?;
    Ok(())
}

fn is_recoverable_error(error: &std::io::Error) -> bool {
    matches!(
        error.kind(),
        ErrorKind::UnexpectedEof
            | ErrorKind::BrokenPipe
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::TimedOut
    )
}

////////////////////////////////////////////////////////////////////////////////
// Реализации примитивов движка
////////////////////////////////////////////////////////////////////////////////

impl Endpoint for TcpEndpoint {
    fn open(&mut self) {
        let _ = self.outbound.send(ServerFrame::Open {
            container: self.container.to_string(),
        });
    }
}

impl Link for TcpLink {
    fn id(&self) -> &LinkId {
        &self.id
    }

    fn open(
        &mut self,
        address: &str,
    ) {
        let _ = self.outbound.send(ServerFrame::Attached {
            link: self.id.clone(),
            address: address.to_string(),
        });
    }

    fn send(
        &mut self,
        message: &Message,
    ) {
        let frame = ServerFrame::Message {
            link: self.id.clone(),
            message: message.clone(),
        };
        if self.outbound.send(frame).is_err() {
            trace!(link = %self.id, "Delivery after writer closed dropped");
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_frame_len: 64 * 1024,
            write_timeout: Duration::from_secs(10),
            read_buffer_size: 8192,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    /// Тест проверяет, что закрытие сессии возвращает все её линки и
    /// забывает их.
    #[test]
    fn test_session_table_end_returns_links() {
        let mut table = SessionTable::default();
        table.attach("s1", "a").unwrap();
        table.attach("s1", "b").unwrap();
        table.attach("s2", "c").unwrap();

        let links = table.end("s1").unwrap();
        assert_eq!(links, vec![LinkId::from("a"), LinkId::from("b")]);
        assert_eq!(table.session_count(), 1);
        assert_eq!(
            table.detach("a"),
            Err(ProtocolError::UnknownLink { link: "a".into() })
        );
        assert_eq!(
            table.end("s1"),
            Err(ProtocolError::UnknownSession {
                session: "s1".into()
            })
        );
    }

    #[test]
    fn test_session_table_rejects_duplicate_link() {
        let mut table = SessionTable::default();
        table.attach("s1", "a").unwrap();
        assert_eq!(
            table.attach("s2", "a"),
            Err(ProtocolError::DuplicateLink { link: "a".into() })
        );
    }

    /// Тест проверяет, что отсоединение последнего линка удаляет сессию.
    #[test]
    fn test_detach_last_link_drops_session() {
        let mut table = SessionTable::default();
        table.attach("s1", "a").unwrap();
        assert_eq!(table.detach("a").unwrap(), LinkId::from("a"));
        assert_eq!(table.session_count(), 0);
    }

    #[test]
    fn test_decode_line() {
        assert_eq!(decode_line(b"PING\r\n", 64), Ok(Some(ClientFrame::Ping)));
        assert_eq!(decode_line(b"\r\n", 64), Ok(None));
        assert_eq!(decode_line(b"\xff\xfe\n", 64), Err(ProtocolError::InvalidUtf8));
        assert_eq!(
            decode_line(b"PING PING PING\n", 8),
            Err(ProtocolError::LineTooLong { len: 15, max: 8 })
        );
    }

    /// Тест проверяет, что длинная строка без перевода строки не
    /// буферизуется целиком, а её остаток отбрасывается до следующей строки.
    #[tokio::test]
    async fn test_read_line_bounded_stops_at_limit() {
        let data = [vec![b'A'; 1000], b"\nPING\n".to_vec()].concat();
        let mut reader: &[u8] = &data;
        let mut line = Vec::new();

        let read = read_line_bounded(&mut reader, &mut line, 16).await.unwrap();
        assert_eq!(read, LineRead::TooLong);
        assert_eq!(line.len(), 17);

        skip_line(&mut reader).await.unwrap();
        line.clear();
        let read = read_line_bounded(&mut reader, &mut line, 16).await.unwrap();
        assert_eq!(read, LineRead::Complete);
        assert_eq!(line, b"PING\n");

        line.clear();
        let read = read_line_bounded(&mut reader, &mut line, 16).await.unwrap();
        assert_eq!(read, LineRead::Eof);
    }

    #[tokio::test]
    async fn test_read_line_bounded_accepts_limit_and_tail() {
        let mut reader: &[u8] = b"0123456789ABCDE\nlast";
        let mut line = Vec::new();

        let read = read_line_bounded(&mut reader, &mut line, 16).await.unwrap();
        assert_eq!(read, LineRead::Complete);
        assert_eq!(line.len(), 16);

        line.clear();
        let read = read_line_bounded(&mut reader, &mut line, 16).await.unwrap();
        assert_eq!(read, LineRead::Complete);
        assert_eq!(line, b"last");
    }
}
