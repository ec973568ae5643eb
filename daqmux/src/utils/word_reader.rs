//! Raw word reading for digitizer dumps.
//!
//! Readout files store native 32-bit words. The reader converts byte slices
//! into words in either byte order and keeps track of trailing bytes that do
//! not form a complete word.

use std::io;

use bitstream_io::{BigEndian, BitRead, BitReader, Endianness, LittleEndian};

pub const WORD_BYTES: usize = 4;

#[derive(Debug)]
pub struct WordReader<R: io::Read, E: Endianness> {
    bs: BitReader<R, E>,
    words: usize,
    consumed: usize,
}

pub type WordSliceReader<'a, E> = WordReader<io::Cursor<&'a [u8]>, E>;

impl<'a, E: Endianness> WordReader<io::Cursor<&'a [u8]>, E> {
    pub fn from_slice(data: &'a [u8]) -> Self {
        Self::new(io::Cursor::new(data), data.len())
    }
}

impl<R, E> WordReader<R, E>
where
    R: io::Read,
    E: Endianness,
{
    pub fn new(read: R, len_bytes: usize) -> Self {
        Self {
            bs: BitReader::new(read),
            words: len_bytes / WORD_BYTES,
            consumed: 0,
        }
    }

    /// Number of complete words not yet read.
    pub fn available(&self) -> usize {
        self.words - self.consumed
    }

    #[inline(always)]
    pub fn get_word(&mut self) -> io::Result<u32> {
        if self.available() == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("get_word: out of bounds at word {}", self.consumed),
            ));
        }
        let word = self.bs.read_unsigned_var::<u32>(32)?;
        self.consumed += 1;
        Ok(word)
    }

    /// Appends every remaining complete word to `dst`.
    pub fn read_into(&mut self, dst: &mut Vec<u32>) -> io::Result<usize> {
        let count = self.available();
        dst.reserve(count);
        for _ in 0..count {
            dst.push(self.get_word()?);
        }
        Ok(count)
    }
}

/// Byte order of a raw word dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WordOrder {
    #[default]
    Little,
    Big,
}

/// Collects words from byte chunks of arbitrary length.
///
/// Bytes that do not complete a word are held back until the next chunk.
#[derive(Debug, Default)]
pub struct WordAssembler {
    order: WordOrder,
    pending: Vec<u8>,
}

impl WordAssembler {
    pub fn new(order: WordOrder) -> Self {
        Self {
            order,
            pending: Vec::with_capacity(WORD_BYTES),
        }
    }

    /// Converts `chunk` (prefixed by any held-back bytes) into words.
    pub fn push_bytes(&mut self, chunk: &[u8], dst: &mut Vec<u32>) -> io::Result<usize> {
        let joined;
        let bytes = if self.pending.is_empty() {
            chunk
        } else {
            self.pending.extend_from_slice(chunk);
            joined = std::mem::take(&mut self.pending);
            &joined[..]
        };

        let whole = bytes.len() - bytes.len() % WORD_BYTES;
        let count = match self.order {
            WordOrder::Little => {
                WordSliceReader::<LittleEndian>::from_slice(&bytes[..whole]).read_into(dst)?
            }
            WordOrder::Big => {
                WordSliceReader::<BigEndian>::from_slice(&bytes[..whole]).read_into(dst)?
            }
        };
        self.pending.extend_from_slice(&bytes[whole..]);

        Ok(count)
    }

    /// Bytes held back because they do not form a complete word.
    pub fn pending_bytes(&self) -> usize {
        self.pending.len()
    }
}

#[test]
fn words_follow_byte_order() -> io::Result<()> {
    let bytes = [0x78, 0x56, 0x34, 0x12, 0x01, 0x00, 0x00, 0x80];

    let mut le = Vec::new();
    WordSliceReader::<LittleEndian>::from_slice(&bytes).read_into(&mut le)?;
    assert_eq!(le, vec![0x1234_5678, 0x8000_0001]);

    let mut be = Vec::new();
    WordSliceReader::<BigEndian>::from_slice(&bytes).read_into(&mut be)?;
    assert_eq!(be, vec![0x7856_3412, 0x0100_0080]);
    Ok(())
}

#[test]
fn assembler_carries_partial_words() -> io::Result<()> {
    let mut assembler = WordAssembler::new(WordOrder::Little);
    let mut words = Vec::new();

    assert_eq!(assembler.push_bytes(&[0x01, 0x02, 0x03], &mut words)?, 0);
    assert_eq!(assembler.pending_bytes(), 3);

    assert_eq!(
        assembler.push_bytes(&[0x04, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE], &mut words)?,
        2
    );
    assert_eq!(words, vec![0x0403_0201, 0xDDCC_BBAA]);
    assert_eq!(assembler.pending_bytes(), 1);
    Ok(())
}
