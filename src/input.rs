use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use anyhow::{Context, Result};

/// Default read size for word dumps.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Byte source for a word dump, either a file or stdin.
pub struct InputReader {
    reader: Box<dyn Read>,
    is_pipe: bool,
}

impl InputReader {
    /// Opens `input_path`, or stdin when the path is "-".
    pub fn new<P: AsRef<Path>>(input_path: P) -> Result<Self> {
        let path = input_path.as_ref();
        let is_pipe = path.to_string_lossy() == "-";

        let reader: Box<dyn Read> = if is_pipe {
            Box::new(io::stdin().lock())
        } else {
            let file = File::open(path)
                .with_context(|| format!("opening input {}", path.display()))?;
            Box::new(BufReader::new(file))
        };

        Ok(Self::from_reader(reader, is_pipe))
    }

    pub fn from_reader(reader: Box<dyn Read>, is_pipe: bool) -> Self {
        Self { reader, is_pipe }
    }

    /// Returns the number of bytes read, 0 at end of input.
    pub fn read_chunk(&mut self, buffer: &mut [u8]) -> Result<usize> {
        loop {
            match self.reader.read(buffer) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn is_pipe(&self) -> bool {
        self.is_pipe
    }

    /// Feeds the input to `callback` chunk by chunk until end of input or
    /// until the callback returns `Ok(false)`.
    pub fn process_chunks<F>(&mut self, chunk_size: usize, mut callback: F) -> Result<()>
    where
        F: FnMut(&[u8]) -> Result<bool>,
    {
        let mut buffer = vec![0u8; chunk_size.max(1)];

        loop {
            let bytes_read = self.read_chunk(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }

            if !callback(&buffer[..bytes_read])? {
                break;
            }
        }

        Ok(())
    }
}
