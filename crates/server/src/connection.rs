use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;

use distkv_common::{ConnectionError, INITIAL_BUFFER_CAPACITY, MAX_LINE_LENGTH};
use distkv_protocol::Reply;

/// Wrapper sobre TcpStream com buffer: lê requisições linha a linha e
/// escreve respostas.
pub struct Connection {
    stream: BufWriter<TcpStream>,
    buffer: BytesMut,
}

impl Connection {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream: BufWriter::new(stream),
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
        }
    }

    /// Lê uma linha completa (sem `\n` nem `\r` final). Retorna None no EOF.
    pub async fn read_line(&mut self) -> Result<Option<Bytes>, ConnectionError> {
        loop {
            if let Some(line) = self.parse_line()? {
                return Ok(Some(line));
            }

            let n = self.stream.read_buf(&mut self.buffer).await?;
            if n == 0 {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Err(ConnectionError::ConnectionReset);
            }
        }
    }

    /// Escreve uma resposta no stream.
    pub async fn write_reply(&mut self, reply: &Reply) -> Result<(), ConnectionError> {
        let mut buf = BytesMut::new();
        reply.encode(&mut buf);
        self.stream.write_all(&buf).await?;
        self.stream.flush().await?;
        Ok(())
    }

    fn parse_line(&mut self) -> Result<Option<Bytes>, ConnectionError> {
        match self.buffer.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                let mut line = self.buffer.split_to(pos + 1);
                line.truncate(pos);
                if line.last() == Some(&b'\r') {
                    line.truncate(pos - 1);
                }
                Ok(Some(line.freeze()))
            }
            None if self.buffer.len() > MAX_LINE_LENGTH => {
                Err(ConnectionError::LineTooLong(self.buffer.len()))
            }
            None => Ok(None),
        }
    }
}
