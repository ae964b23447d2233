//! Whole-file MD5 checksums.

use crate::error::UploadError;
use std::path::{Path, PathBuf};

/// Read block used while hashing; independent of the upload chunk size.
pub(crate) const CHECKSUM_BLOCK_SIZE: usize = 256;

/// Computes the MD5 hash of a local file.
///
/// The file is streamed through the digest in small blocks so memory use
/// stays flat regardless of file size. Runs in a blocking task to avoid
/// blocking the async runtime.
///
/// # Arguments
///
/// * `path` - Path to the file
///
/// # Returns
///
/// The MD5 hash as a lowercase hexadecimal string, or an error.
pub async fn compute_file_md5(path: impl AsRef<Path>) -> Result<String, UploadError> {
    let path: PathBuf = path.as_ref().to_path_buf();

    tokio::task::spawn_blocking(move || md5_of_file(&path))
        .await
        .map_err(|e| UploadError::IoError(std::io::Error::other(format!("Task join error: {}", e))))?
}

fn md5_of_file(path: &Path) -> Result<String, UploadError> {
    use md5::{Digest, Md5};
    use std::io::Read;

    let file = std::fs::File::open(path)?;
    let mut reader = std::io::BufReader::new(file);

    let mut hasher = Md5::new();
    let mut buffer = [0u8; CHECKSUM_BLOCK_SIZE];

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}
