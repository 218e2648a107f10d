use super::{Console, RconError};
use async_trait::async_trait;
use std::{io, time::Duration};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufStream},
    net::{TcpStream, ToSocketAddrs},
    time::timeout,
};

const SERVERDATA_AUTH: i32 = 3;
const SERVERDATA_AUTH_RESPONSE: i32 = 2;
const SERVERDATA_EXECCOMMAND: i32 = 2;
const SERVERDATA_RESPONSE_VALUE: i32 = 0;

// id + type + two trailing nul bytes
const PACKET_OVERHEAD: usize = 10;
const MAX_RESPONSE_BODY: usize = 4096;
const MAX_COMMAND_BODY: usize = 1446;
const IO_TIMEOUT: Duration = Duration::from_secs(30);

/// Source RCON connection over TCP, as spoken by the game server
pub struct RemoteConsole {
    stream: BufStream<TcpStream>,
    next_id: i32,
}

impl RemoteConsole {
    pub async fn connect<A: ToSocketAddrs>(addr: A, password: &str) -> Result<Self, RconError> {
        let stream = timeout(IO_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| RconError::Connection(timed_out()))?
            .map_err(RconError::Connection)?;
        let mut console = Self {
            stream: BufStream::new(stream),
            next_id: 0,
        };
        let id = console
            .send(SERVERDATA_AUTH, password)
            .await
            .map_err(RconError::Connection)?;
        loop {
            let (got, kind, _) = console.receive().await.map_err(RconError::Connection)?;
            // some servers send an empty value packet ahead of the auth answer
            if kind == SERVERDATA_RESPONSE_VALUE {
                continue;
            }
            if kind != SERVERDATA_AUTH_RESPONSE || got == -1 {
                return Err(RconError::Auth);
            }
            if got != id {
                return Err(RconError::Desync { expected: id, got });
            }
            return Ok(console);
        }
    }

    fn allocate_id(&mut self) -> i32 {
        self.next_id = if self.next_id == i32::MAX { 1 } else { self.next_id + 1 };
        self.next_id
    }

    async fn send(&mut self, kind: i32, body: &str) -> io::Result<i32> {
        let id = self.allocate_id();
        let packet = encode_packet(id, kind, body);
        timeout(IO_TIMEOUT, async {
            self.stream.write_all(&packet).await?;
            self.stream.flush().await
        })
        .await
        .map_err(|_| timed_out())??;
        Ok(id)
    }

    async fn receive(&mut self) -> io::Result<(i32, i32, String)> {
        timeout(IO_TIMEOUT, read_packet(&mut self.stream))
            .await
            .map_err(|_| timed_out())?
    }
}

#[async_trait]
impl Console for RemoteConsole {
    async fn write(&mut self, cmd: &str) -> io::Result<i32> {
        if cmd.len() > MAX_COMMAND_BODY {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("command longer than {MAX_COMMAND_BODY} bytes"),
            ));
        }
        self.send(SERVERDATA_EXECCOMMAND, cmd).await
    }

    async fn read(&mut self) -> io::Result<(String, i32)> {
        let (id, kind, body) = self.receive().await?;
        if kind != SERVERDATA_RESPONSE_VALUE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unexpected rcon packet type {kind}"),
            ));
        }
        Ok((body, id))
    }
}

fn timed_out() -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, "rcon i/o timed out")
}

pub(crate) fn encode_packet(id: i32, kind: i32, body: &str) -> Vec<u8> {
    let size = (body.len() + PACKET_OVERHEAD) as i32;
    let mut packet = Vec::with_capacity(body.len() + PACKET_OVERHEAD + 4);
    packet.extend_from_slice(&size.to_le_bytes());
    packet.extend_from_slice(&id.to_le_bytes());
    packet.extend_from_slice(&kind.to_le_bytes());
    packet.extend_from_slice(body.as_bytes());
    packet.extend_from_slice(&[0, 0]);
    packet
}

pub(crate) async fn read_packet<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<(i32, i32, String)> {
    let size = reader.read_i32_le().await?;
    if size < PACKET_OVERHEAD as i32 || size as usize > MAX_RESPONSE_BODY + PACKET_OVERHEAD {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("invalid rcon packet size {size}"),
        ));
    }
    let mut buf = vec![0u8; size as usize];
    reader.read_exact(&mut buf).await?;
    let id = i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let kind = i32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
    let body = &buf[8..buf.len() - 2];
    let end = body.iter().position(|b| *b == 0).unwrap_or(body.len());
    Ok((id, kind, String::from_utf8_lossy(&body[..end]).into_owned()))
}
