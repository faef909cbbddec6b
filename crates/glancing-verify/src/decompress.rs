use crate::DecompressError;
use bzip2::read::BzDecoder;
use flate2::read::MultiGzDecoder;
use glancing_schema::Compression;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use zip::result::ZipError;
use zip::ZipArchive;

const BLOCK_SIZE: usize = 64 * 1024;
const UNCOMPRESSED_SUFFIX: &str = "_uncompressed";

/// Unpacks one compressed image next to its source.
#[derive(Debug, Clone)]
pub struct Decompressor {
    input: PathBuf,
    output: PathBuf,
    format: Compression,
}

impl Decompressor {
    /// Check preconditions and settle the output path.
    ///
    /// A compression extension on the input wins when nothing is declared.
    /// When a format is declared but the file has no compression extension,
    /// the output gets an `_uncompressed` suffix instead.
    pub fn new(
        input: impl Into<PathBuf>,
        declared: Option<Compression>,
    ) -> Result<Self, DecompressError> {
        let input = input.into();
        if !input.is_file() {
            return Err(DecompressError::NotFound(input));
        }
        let declared = declared.filter(|c| c.is_compressed());
        let found = input
            .extension()
            .and_then(|e| e.to_str())
            .and_then(Compression::from_extension);

        let (format, output) = match (found, declared) {
            (Some(found), Some(declared)) if found != declared => {
                return Err(DecompressError::ExtensionMismatch { declared, found });
            }
            (Some(found), _) => (found, input.with_extension("")),
            (None, Some(declared)) => {
                let mut name: OsString = input.clone().into_os_string();
                name.push(UNCOMPRESSED_SUFFIX);
                (declared, PathBuf::from(name))
            }
            (None, None) => return Err(DecompressError::NotCompressed(input)),
        };

        if output.exists() {
            return Err(DecompressError::OutputExists(output));
        }
        Ok(Self {
            input,
            output,
            format,
        })
    }

    pub fn input(&self) -> &Path {
        &self.input
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    pub fn format(&self) -> Compression {
        self.format
    }

    /// Decompress, returning the output path. With `delete`, the input is
    /// removed once the output is complete. On failure the partial output is
    /// removed and the input is left alone.
    pub fn run(self, delete: bool) -> Result<PathBuf, DecompressError> {
        info!(
            "decompressing {} ({})",
            self.input.display(),
            self.format
        );
        let mut out = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.output)
            .map_err(|e| match e.kind() {
                io::ErrorKind::AlreadyExists => DecompressError::OutputExists(self.output.clone()),
                _ => DecompressError::Io(e),
            })?;

        let mut produced = 0u64;
        let result = self
            .decode_into(&mut out, &mut produced)
            .and_then(|()| out.flush().map_err(DecompressError::from));
        drop(out);

        if let Err(e) = result {
            if let Err(rm) = fs::remove_file(&self.output) {
                warn!("cannot remove partial {}: {rm}", self.output.display());
            }
            return Err(e);
        }
        debug!("wrote {produced} bytes to {}", self.output.display());

        if delete {
            if let Err(e) = fs::remove_file(&self.input) {
                warn!("cannot remove {}: {e}", self.input.display());
            }
        }
        Ok(self.output)
    }

    fn decode_into(&self, out: &mut File, produced: &mut u64) -> Result<(), DecompressError> {
        let file = File::open(&self.input)?;
        let copied = match self.format {
            Compression::Gzip => copy_blocks(MultiGzDecoder::new(BufReader::new(file)), out, produced),
            Compression::Bzip2 => copy_blocks(BzDecoder::new(BufReader::new(file)), out, produced),
            Compression::Zip => return self.unzip_into(file, out, produced),
            Compression::None => copy_blocks(file, out, produced),
        };
        copied.map_err(|e| self.classify(e, *produced))
    }

    fn unzip_into(&self, file: File, out: &mut File, produced: &mut u64) -> Result<(), DecompressError> {
        let mut archive = ZipArchive::new(BufReader::new(file)).map_err(|e| self.zip_error(e))?;
        match archive.len() {
            0 => return Err(DecompressError::EmptyArchive(self.input.clone())),
            1 => {}
            n => warn!(
                "{} holds {n} entries, extracting only the first",
                self.input.display()
            ),
        }
        let entry = archive.by_index(0).map_err(|e| self.zip_error(e))?;
        debug!("extracting zip entry {}", entry.name());
        copy_blocks(entry, out, produced).map_err(|e| self.classify(e, *produced))
    }

    fn zip_error(&self, err: ZipError) -> DecompressError {
        match err {
            ZipError::Io(e) => self.classify(e, 0),
            _ => DecompressError::WrongFormat {
                path: self.input.clone(),
                format: self.format,
            },
        }
    }

    fn classify(&self, err: io::Error, produced: u64) -> DecompressError {
        let path = self.input.clone();
        let format = self.format;
        match err.kind() {
            io::ErrorKind::UnexpectedEof => DecompressError::Truncated { path, format },
            io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData | io::ErrorKind::Other => {
                if produced == 0 {
                    DecompressError::WrongFormat { path, format }
                } else {
                    DecompressError::Truncated { path, format }
                }
            }
            _ => DecompressError::Io(err),
        }
    }
}

fn copy_blocks<R: Read, W: Write>(mut reader: R, writer: &mut W, produced: &mut u64) -> io::Result<()> {
    let mut buf = vec![0u8; BLOCK_SIZE];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        writer.write_all(&buf[..n])?;
        *produced += n as u64;
    }
}
