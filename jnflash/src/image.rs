//! Firmware image source.
//!
//! A monitor image file starts with a 4-byte version/ID header that is not
//! written to flash. The rest is streamed in 128-byte pages; the last page
//! may be shorter.

use {
    crate::error::{Error, Result},
    log::debug,
    std::{
        fs::File,
        io::{BufReader, Cursor, ErrorKind, Read},
        path::Path,
    },
};

/// Size of the version/ID header skipped before the first page.
pub const HEADER_LEN: usize = 4;

/// Size of one program request payload.
pub const PAGE_SIZE: usize = 128;

/// Byte written over the magic number so the image stays unbootable until
/// the marker is finalized.
pub const BLANK_SENTINEL: u8 = crate::sector::MAGIC_BLANK;

/// One page of image data and its offset inside the target sector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    /// Offset of the first byte, relative to the sector start.
    pub offset: u32,
    /// Page bytes (at most [`PAGE_SIZE`]).
    pub data: Vec<u8>,
}

/// Sequential page reader over a firmware image.
#[derive(Debug)]
pub struct FirmwareImage<R> {
    reader: R,
    payload_len: Option<u64>,
    next_offset: u32,
    blank_sentinel: bool,
    exhausted: bool,
}

impl FirmwareImage<BufReader<File>> {
    /// Open an image file and skip its header.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let total = file
            .metadata()?
            .len();
        debug!("Opened image {} ({total} bytes)", path.display());

        let mut image = Self::from_reader(BufReader::new(file))?;
        image.payload_len = Some(total.saturating_sub(HEADER_LEN as u64));
        Ok(image)
    }
}

impl FirmwareImage<Cursor<Vec<u8>>> {
    /// Wrap an in-memory image (header included).
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        let total = data.len() as u64;
        let mut image = Self::from_reader(Cursor::new(data))?;
        image.payload_len = Some(total.saturating_sub(HEADER_LEN as u64));
        Ok(image)
    }
}

impl<R: Read> FirmwareImage<R> {
    /// Wrap a reader positioned at the start of the image.
    ///
    /// The payload length is unknown for plain readers; overflow is then
    /// only detected while writing.
    pub fn from_reader(mut reader: R) -> Result<Self> {
        let mut header = [0u8; HEADER_LEN];
        let n = read_full(&mut reader, &mut header)?;
        if n < HEADER_LEN {
            return Err(Error::InvalidImage(format!(
                "image is {n} bytes, shorter than its {HEADER_LEN}-byte header"
            )));
        }
        debug!("Skipped image header {header:02X?}");

        Ok(Self {
            reader,
            payload_len: None,
            next_offset: 0,
            blank_sentinel: false,
            exhausted: false,
        })
    }

    /// Replace the first payload byte with [`BLANK_SENTINEL`].
    #[must_use]
    pub fn with_blank_sentinel(mut self, enabled: bool) -> Self {
        self.blank_sentinel = enabled;
        self
    }

    /// Payload length after the header, if known.
    pub fn payload_len(&self) -> Option<u64> {
        self.payload_len
    }

    /// Number of program requests the payload needs, if the length is known.
    #[allow(clippy::cast_possible_truncation)]
    pub fn page_count(&self) -> Option<usize> {
        self.payload_len
            .map(|len| len.div_ceil(PAGE_SIZE as u64) as usize)
    }

    /// Read the next page, or `None` at end of stream.
    pub fn next_page(&mut self) -> Result<Option<Page>> {
        if self.exhausted {
            return Ok(None);
        }

        let mut data = vec![0u8; PAGE_SIZE];
        let n = read_full(&mut self.reader, &mut data)?;
        if n == 0 {
            self.exhausted = true;
            return Ok(None);
        }
        data.truncate(n);
        if n < PAGE_SIZE {
            self.exhausted = true;
        }

        if self.next_offset == 0 && self.blank_sentinel {
            data[0] = BLANK_SENTINEL;
        }

        let page = Page {
            offset: self.next_offset,
            data,
        };
        self.next_offset += PAGE_SIZE as u32;
        Ok(Some(page))
    }
}

impl<R: Read> Iterator for FirmwareImage<R> {
    type Item = Result<Page>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_page()
            .transpose()
    }
}

/// Fill `buf` as far as the stream allows; short only at end of stream.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {},
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}
