//! Certificate packaging.
//!
//! Bundles the issued certificate chain and the domain private key into a
//! downloadable zip archive. Stateless; archive contents are deterministic
//! for identical inputs (archive metadata such as timestamps is not).

use std::io::{Cursor, Write};

use zip::{write::FileOptions, CompressionMethod, ZipWriter};

use crate::error::Error;

/// Build a `{domain}.crt` + `{domain}.key` archive.
pub fn package(domain: &str, certificate_pem: &str, private_key_pem: &str) -> Result<Vec<u8>, Error> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    writer
        .start_file(format!("{domain}.crt"), options)
        .map_err(|err| Error::Archive(err.to_string()))?;
    writer
        .write_all(certificate_pem.as_bytes())
        .map_err(|err| Error::Archive(err.to_string()))?;

    writer
        .start_file(format!("{domain}.key"), options)
        .map_err(|err| Error::Archive(err.to_string()))?;
    writer
        .write_all(private_key_pem.as_bytes())
        .map_err(|err| Error::Archive(err.to_string()))?;

    let cursor = writer
        .finish()
        .map_err(|err| Error::Archive(err.to_string()))?;
    Ok(cursor.into_inner())
}

/// Download name for the archive.
pub fn archive_file_name(domain: &str) -> String {
    format!("{domain}-ssl.zip")
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use zip::ZipArchive;

    use super::*;

    fn extract(archive: &[u8], name: &str) -> String {
        let mut zip = ZipArchive::new(Cursor::new(archive.to_vec())).unwrap();
        let mut file = zip.by_name(name).unwrap();
        let mut content = String::new();
        file.read_to_string(&mut content).unwrap();
        content
    }

    #[test]
    fn archive_contains_certificate_and_key() {
        let bytes = package("example.com", "CERT PEM", "KEY PEM").unwrap();

        let zip = ZipArchive::new(Cursor::new(bytes.clone())).unwrap();
        let names: Vec<_> = zip.file_names().collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"example.com.crt"));
        assert!(names.contains(&"example.com.key"));

        assert_eq!(extract(&bytes, "example.com.crt"), "CERT PEM");
        assert_eq!(extract(&bytes, "example.com.key"), "KEY PEM");
    }

    #[test]
    fn archive_file_name_matches_download_convention() {
        assert_eq!(archive_file_name("example.com"), "example.com-ssl.zip");
    }
}
