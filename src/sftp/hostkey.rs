//! Host key persistence for the SFTP service.

use std::path::Path;

use anyhow::{Context, Result};
use openssl::rsa::Rsa;
use russh::keys::PrivateKey;

const KEY_BITS: u32 = 2048;

/// Loads the persistent host key at `path`, generating and atomically
/// persisting a fresh RSA-2048 PKCS#1 key if it is missing or unreadable.
pub fn load_or_generate(path: &Path) -> Result<PrivateKey> {
    match std::fs::read_to_string(path) {
        Ok(pem) => match parse_pem(&pem) {
            Ok(key) => return Ok(key),
            Err(e) => {
                tracing::warn!(error = %e, path = %path.display(), "host key unreadable, regenerating");
            }
        },
        Err(_) => {
            tracing::info!(path = %path.display(), "no host key found, generating one");
        }
    }

    let pem = generate_pem()?;
    persist_atomically(path, &pem)?;
    parse_pem(&pem)
}

fn generate_pem() -> Result<String> {
    let rsa = Rsa::generate(KEY_BITS).context("generating RSA host key")?;
    let pem = rsa
        .private_key_to_pem()
        .context("encoding host key as PKCS#1 PEM")?;
    Ok(String::from_utf8(pem).context("host key PEM not valid UTF-8")?)
}

fn parse_pem(pem: &str) -> Result<PrivateKey> {
    russh::keys::decode_secret_key(pem, None).context("parsing host key PEM")
}

fn persist_atomically(path: &Path, pem: &str) -> Result<()> {
    let tmp_path = path.with_extension("pem.tmp");
    std::fs::write(&tmp_path, pem).context("writing host key tmp file")?;
    // Best-effort: a race on first boot between two processes is tolerated,
    // per spec — the loser's tmp file is simply overwritten by the winner's
    // rename.
    std::fs::rename(&tmp_path, path).context("renaming host key into place")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_and_persists_on_first_use() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("sftp_host_key.pem");
        assert!(!path.exists());

        let _key = load_or_generate(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn reuses_existing_key_on_subsequent_loads() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("sftp_host_key.pem");

        load_or_generate(&path).unwrap();
        let first_pem = std::fs::read_to_string(&path).unwrap();

        load_or_generate(&path).unwrap();
        let second_pem = std::fs::read_to_string(&path).unwrap();

        assert_eq!(first_pem, second_pem);
    }

    #[test]
    fn regenerates_when_file_is_garbage() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("sftp_host_key.pem");
        std::fs::write(&path, "not a key").unwrap();

        let _key = load_or_generate(&path).unwrap();
        let pem = std::fs::read_to_string(&path).unwrap();
        assert!(pem.contains("PRIVATE KEY"));
    }
}
