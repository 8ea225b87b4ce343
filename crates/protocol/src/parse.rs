use bytes::Bytes;
use distkv_common::CommandError;

/// Quebra uma linha de requisição em tokens.
///
/// Tokens são separados por whitespace; aspas simples ou duplas agrupam um
/// token (que pode ser vazio) e aceitam escapes `\n`, `\r`, `\t`, `\\` e a
/// própria aspa.
pub fn tokenize(line: &[u8]) -> Result<Vec<Bytes>, CommandError> {
    let mut tokens = Vec::new();
    let mut current = Vec::new();
    let mut quote: Option<u8> = None;
    let mut quoted_token = false;
    let mut bytes = line.iter().copied().peekable();

    while let Some(c) = bytes.next() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(q) if c == b'\\' => match bytes.peek().copied() {
                Some(b'n') => {
                    current.push(b'\n');
                    bytes.next();
                }
                Some(b'r') => {
                    current.push(b'\r');
                    bytes.next();
                }
                Some(b't') => {
                    current.push(b'\t');
                    bytes.next();
                }
                Some(next) if next == b'\\' || next == q => {
                    current.push(next);
                    bytes.next();
                }
                _ => current.push(c),
            },
            Some(_) => current.push(c),
            None if c == b'"' || c == b'\'' => {
                quote = Some(c);
                quoted_token = true;
            }
            None if c.is_ascii_whitespace() => {
                if !current.is_empty() || quoted_token {
                    tokens.push(Bytes::from(std::mem::take(&mut current)));
                    quoted_token = false;
                }
            }
            None => current.push(c),
        }
    }

    if quote.is_some() {
        return Err(CommandError::UnbalancedQuotes);
    }
    if !current.is_empty() || quoted_token {
        tokens.push(Bytes::from(current));
    }

    Ok(tokens)
}

/// Cursor sobre os tokens de uma linha para extrair argumentos sequencialmente.
pub struct Parse {
    parts: std::vec::IntoIter<Bytes>,
    command: String,
}

impl Parse {
    /// Tokeniza a linha e consome o nome do comando (em maiúsculas).
    pub fn new(line: &[u8]) -> Result<Parse, CommandError> {
        let mut parts = tokenize(line)?.into_iter();
        let name = parts.next().ok_or(CommandError::Empty)?;
        let command = String::from_utf8_lossy(&name).to_uppercase();
        Ok(Parse { parts, command })
    }

    /// Nome do comando, já normalizado para maiúsculas.
    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn next_bytes(&mut self) -> Result<Bytes, CommandError> {
        self.parts
            .next()
            .ok_or_else(|| CommandError::WrongArity(self.command.clone()))
    }

    pub fn next_int(&mut self) -> Result<i64, CommandError> {
        let token = self.next_bytes()?;
        std::str::from_utf8(&token)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or_else(|| CommandError::InvalidInteger(String::from_utf8_lossy(&token).into()))
    }

    /// Verifica se todos os argumentos foram consumidos.
    pub fn finish(&self) -> Result<(), CommandError> {
        if self.has_remaining() {
            Err(CommandError::WrongArity(self.command.clone()))
        } else {
            Ok(())
        }
    }

    pub fn has_remaining(&self) -> bool {
        self.parts.len() > 0
    }
}
